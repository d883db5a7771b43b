//! SQL Server destination writer.
//!
//! [`SqlDestinationWriter`] stages one mapping's rows into its own staging
//! table, then merges and prunes the destination from it. Table-specific
//! behavior comes from [`crate::profile`] instead of specialised writers.

pub mod merge;
pub mod prune;
pub mod staging;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::core::mapping::{
    Mapping, OPTION_DISCARD_DUPLICATES, OPTION_SKIP_FAILING_ROWS,
};
use crate::core::row::SourceRow;
use crate::core::traits::{Connection, DestinationWriter, MergeMode, PruneScope};
use crate::error::{PruneDirection, Result, SyncError};
use crate::profile::{profile_for, TableProfile};
use crate::transform::RowTransformer;

pub use staging::{StagingLoader, StagingTable, DEFAULT_BATCH_SIZE, DEFAULT_STAGING_SUFFIX};

/// Staged rows between progress messages.
const PROGRESS_INTERVAL: u64 = 10_000;

/// Per-writer settings, already resolved against the mapping's options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriterOptions {
    pub batch_size: usize,
    pub discard_duplicates: bool,
    pub skip_failing_rows: bool,
    pub staging_suffix: String,
}

impl Default for WriterOptions {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            discard_duplicates: false,
            skip_failing_rows: false,
            staging_suffix: DEFAULT_STAGING_SUFFIX.to_string(),
        }
    }
}

impl WriterOptions {
    /// Apply the mapping's option overrides on top of job defaults.
    pub fn for_mapping(&self, mapping: &Mapping) -> Self {
        Self {
            discard_duplicates: mapping.option_or(OPTION_DISCARD_DUPLICATES, self.discard_duplicates),
            skip_failing_rows: mapping.option_or(OPTION_SKIP_FAILING_ROWS, self.skip_failing_rows),
            ..self.clone()
        }
    }
}

/// Row counts for one mapping.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WriterStats {
    /// Rows written to the staging table.
    pub staged: u64,
    /// Rows rejected by the bulk load and skipped.
    pub skipped: u64,
    /// Rows discarded as duplicates.
    pub duplicates: u64,
    /// Rows that did not satisfy the mapping's conditions.
    pub filtered: u64,
    /// Rows affected by the merge.
    pub merged: u64,
    /// Rows deleted from the destination.
    pub pruned: u64,
}

pub struct SqlDestinationWriter {
    mapping: Mapping,
    profile: Option<&'static TableProfile>,
    transformer: RowTransformer,
    staging: StagingTable,
    loader: StagingLoader,
    stats: WriterStats,
}

impl SqlDestinationWriter {
    pub fn new(mapping: Mapping, run_id: &Uuid, options: &WriterOptions) -> Self {
        let options = options.for_mapping(&mapping);
        let profile = profile_for(&mapping.destination_table.name);

        let mapped: Vec<&str> = mapping
            .distinct_destination_columns()
            .iter()
            .map(|cm| cm.destination_name())
            .collect();
        let synthetic = profile.map(|p| p.synthetic_for(&mapped)).unwrap_or_default();

        let transformer = RowTransformer::new(&mapping, &synthetic);
        let staging = StagingTable::for_mapping(
            &mapping,
            &options.staging_suffix,
            run_id,
            transformer.columns(),
        );
        let loader = StagingLoader::new(
            options.batch_size,
            options.discard_duplicates,
            options.skip_failing_rows,
        );

        Self {
            mapping,
            profile,
            transformer,
            staging,
            loader,
            stats: WriterStats::default(),
        }
    }

    pub fn stats(&self) -> &WriterStats {
        &self.stats
    }

    pub fn staging(&self) -> &StagingTable {
        &self.staging
    }

    async fn flush(&mut self, conn: &mut dyn Connection) -> Result<()> {
        let before = self.stats.staged;
        let outcome = self.loader.flush(conn, &self.staging).await?;
        self.stats.staged += outcome.written;
        self.stats.skipped += outcome.skipped;

        if self.stats.staged / PROGRESS_INTERVAL > before / PROGRESS_INTERVAL {
            info!(
                "{} rows staged for {}",
                self.stats.staged, self.mapping.destination_table.name
            );
        }
        Ok(())
    }

    async fn prune_relations(
        &mut self,
        conn: &mut dyn Connection,
        extra_conditions: Option<&str>,
    ) -> Result<()> {
        let Some(profile) = self.profile else {
            return Ok(());
        };
        for relation in profile.relations {
            let Some(statement) =
                prune::build_relation_delete(&self.mapping, &self.staging, relation, extra_conditions)?
            else {
                continue;
            };
            let deleted = conn
                .execute(&statement.sql, &statement.params)
                .await
                .map_err(|e| SyncError::RelationPruneFailed {
                    relation: relation.table.to_string(),
                    message: e.server_message(),
                    statement: statement.sql.clone(),
                })?;
            debug!("Deleted {} rows from {}", deleted, relation.table);
        }
        Ok(())
    }

    async fn delete_rows(
        &mut self,
        conn: &mut dyn Connection,
        direction: PruneDirection,
        extra_conditions: Option<&str>,
    ) -> Result<u64> {
        let Some(statement) =
            prune::build_delete(&self.mapping, &self.staging, direction, extra_conditions)?
        else {
            warn!(
                "No columns to match on for {}, nothing removed",
                self.mapping.destination_table.full_name()
            );
            return Ok(0);
        };
        prune::delete_in_chunks(conn, &statement)
            .await
            .map_err(|e| SyncError::PruneStatementFailed {
                table: self.mapping.destination_table.full_name(),
                direction,
                message: e.server_message(),
                statement: statement.sql.clone(),
            })
    }
}

#[async_trait]
impl DestinationWriter for SqlDestinationWriter {
    fn mapping(&self) -> &Mapping {
        &self.mapping
    }

    fn rows_staged(&self) -> u64 {
        self.stats.staged
    }

    async fn prepare(&mut self, conn: &mut dyn Connection) -> Result<()> {
        debug!("Creating staging table {}", self.staging.qualified());
        conn.execute(&self.staging.create_sql(), &[]).await?;
        Ok(())
    }

    async fn stage(&mut self, conn: &mut dyn Connection, row: &SourceRow) -> Result<()> {
        if !self.mapping.conditions_match(row) {
            self.stats.filtered += 1;
            return Ok(());
        }

        let values = self.transformer.transform(row)?;
        let transformer = &self.transformer;
        if !self.loader.push(values.clone(), || transformer.duplicate_key(&values)) {
            self.stats.duplicates += 1;
            return Ok(());
        }

        if self.loader.is_full() {
            self.flush(conn).await?;
        }
        Ok(())
    }

    async fn finish(&mut self, conn: &mut dyn Connection) -> Result<()> {
        self.flush(conn).await?;
        info!(
            "Added {} rows to staging table for {}.",
            self.stats.staged, self.mapping.destination_table.name
        );
        Ok(())
    }

    async fn merge(&mut self, conn: &mut dyn Connection, mode: MergeMode) -> Result<()> {
        let Some(sql) = merge::build_merge_sql(&self.mapping, &self.staging, mode) else {
            warn!(
                "Nothing to merge into {}",
                self.mapping.destination_table.full_name()
            );
            return Ok(());
        };

        match conn.execute(&sql, &[]).await {
            Ok(affected) => {
                self.stats.merged = affected;
                debug!(
                    "Merged {} rows into {}",
                    affected,
                    self.mapping.destination_table.full_name()
                );
                Ok(())
            }
            Err(e) => {
                if self.mapping.has_identity() && mode.inserts() {
                    let off = merge::identity_insert_sql(&self.mapping, false);
                    if let Err(reset) = conn.execute(&off, &[]).await {
                        debug!("Could not reset IDENTITY_INSERT: {}", reset);
                    }
                }
                let diagnostic = if e.is_foreign_key_violation() {
                    merge::foreign_key_diagnostic(conn, &self.mapping, &self.staging)
                        .await
                        .unwrap_or_else(|diag| {
                            warn!("Foreign key diagnostic failed: {}", diag);
                            String::new()
                        })
                } else {
                    String::new()
                };
                Err(SyncError::MergeStatementFailed {
                    staging: self.staging.qualified(),
                    destination: self.mapping.destination_table.qualified(),
                    message: e.server_message(),
                    statement: sql,
                    diagnostic,
                })
            }
        }
    }

    async fn prune(
        &mut self,
        conn: &mut dyn Connection,
        scope: PruneScope,
        extra_conditions: Option<&str>,
    ) -> Result<()> {
        if scope == PruneScope::WithRelations {
            self.prune_relations(conn, extra_conditions).await?;
        }
        let deleted = self
            .delete_rows(conn, PruneDirection::Missing, extra_conditions)
            .await?;
        self.stats.pruned += deleted;
        if deleted > 0 {
            info!(
                "Removed {} rows from {} not present in source",
                deleted, self.mapping.destination_table.name
            );
        }
        Ok(())
    }

    async fn remove_present(
        &mut self,
        conn: &mut dyn Connection,
        extra_conditions: Option<&str>,
    ) -> Result<()> {
        let deleted = self
            .delete_rows(conn, PruneDirection::Present, extra_conditions)
            .await?;
        self.stats.pruned += deleted;
        Ok(())
    }

    async fn close(&mut self, conn: &mut dyn Connection) -> Result<()> {
        conn.execute(&self.staging.drop_sql(), &[]).await?;
        Ok(())
    }
}
