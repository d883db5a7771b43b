//! Drives one synchronization job over a destination connection.
//!
//! Every mapping is staged first, outside any transaction. Merges then run
//! in dependency order and prunes in reverse dependency order, all inside
//! one transaction. Staging tables and row sources are released whatever
//! the outcome.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::core::mapping::{Mapping, OPTION_PRUNE_MISSING};
use crate::core::row::SourceRow;
use crate::core::traits::{
    Connection, DestinationWriter, MergeMode, PruneScope, RowSource, RowSourceFactory,
};
use crate::error::{Result, SyncError};
use crate::ordering::order_mappings;
use crate::writer::{SqlDestinationWriter, WriterOptions, WriterStats};

const DUPLICATE_KEY_HINT: &str =
    "This error usually indicates duplicates on column that is used as primary key or identity.";

/// Job-wide settings, resolved from the configuration.
#[derive(Debug, Clone, Default)]
pub struct JobSettings {
    pub writer: WriterOptions,
    pub merge_mode: MergeMode,
    pub prune_missing: bool,
    /// Prune every mapping, destination tables only.
    pub prune_destination_tables_only: bool,
    /// Extra prune predicates keyed by mapping id.
    pub prune_conditions: BTreeMap<usize, String>,
}

impl JobSettings {
    pub fn from_config(config: &Config) -> Self {
        let job = &config.job;
        Self {
            writer: WriterOptions {
                batch_size: job.batch_size,
                discard_duplicates: job.discard_duplicates,
                skip_failing_rows: job.skip_failing_rows,
                staging_suffix: job.staging_suffix.clone(),
            },
            merge_mode: job.merge_mode,
            prune_missing: job.prune_missing,
            prune_destination_tables_only: job.prune_destination_tables_only,
            prune_conditions: config
                .mappings
                .iter()
                .enumerate()
                .filter_map(|(i, m)| {
                    m.prune_conditions
                        .as_ref()
                        .filter(|c| !c.trim().is_empty())
                        .map(|c| (i + 1, c.clone()))
                })
                .collect(),
        }
    }
}

/// Final state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Completed,
    Failed,
}

/// Per-mapping outcome.
#[derive(Debug, Clone, Serialize)]
pub struct MappingResult {
    pub id: usize,
    pub source: String,
    pub destination: String,
    #[serde(flatten)]
    pub stats: WriterStats,
}

/// Result of a job run.
#[derive(Debug, Clone, Serialize)]
pub struct JobResult {
    /// Unique run identifier.
    pub run_id: String,

    pub status: JobStatus,

    pub started_at: DateTime<Utc>,

    pub completed_at: DateTime<Utc>,

    /// Total duration in seconds.
    pub duration_seconds: f64,

    /// Mappings in the order they were processed.
    pub mappings: Vec<MappingResult>,

    /// Failure description, with hints and the offending source row when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl JobResult {
    pub fn is_success(&self) -> bool {
        self.status == JobStatus::Completed
    }

    pub fn rows_staged(&self) -> u64 {
        self.mappings.iter().map(|m| m.stats.staged).sum()
    }

    pub fn rows_merged(&self) -> u64 {
        self.mappings.iter().map(|m| m.stats.merged).sum()
    }

    pub fn rows_pruned(&self) -> u64 {
        self.mappings.iter().map(|m| m.stats.pruned).sum()
    }

    /// Convert to JSON string.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// `Ok` for a completed job, else [`SyncError::JobFailed`].
    pub fn into_result(self) -> Result<Self> {
        match self.status {
            JobStatus::Completed => Ok(self),
            JobStatus::Failed => Err(SyncError::JobFailed(
                self.error.unwrap_or_else(|| "unknown error".to_string()),
            )),
        }
    }
}

/// A failure plus the source row being staged when it happened.
struct Failure {
    error: SyncError,
    row: Option<SourceRow>,
}

impl From<SyncError> for Failure {
    fn from(error: SyncError) -> Self {
        Self { error, row: None }
    }
}

impl Failure {
    fn describe(&self) -> String {
        let mut message = self.error.to_string();
        if message.contains("Subquery returned more than 1 value") {
            message.push(' ');
            message.push_str(DUPLICATE_KEY_HINT);
        }
        if let Some(row) = &self.row {
            // MissingSourceValue already names the row
            if !matches!(self.error, SyncError::MissingSourceValue { .. }) {
                message.push_str(&format!(" Source row: {}", row));
            }
        }
        message
    }
}

/// Runs jobs with fixed settings.
pub struct JobRunner {
    settings: JobSettings,
    run_id: Uuid,
}

impl JobRunner {
    pub fn new(settings: JobSettings) -> Self {
        Self {
            settings,
            run_id: Uuid::new_v4(),
        }
    }

    /// Use a fixed run id (part of every staging table name).
    pub fn with_run_id(mut self, run_id: Uuid) -> Self {
        self.run_id = run_id;
        self
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Run the job. Failures are reported in the result, never returned.
    pub async fn run(
        &self,
        mappings: Vec<Mapping>,
        conn: &mut dyn Connection,
        sources: &dyn RowSourceFactory,
    ) -> JobResult {
        let started_at = Utc::now();
        info!("Starting synchronization run: {}", self.run_id);

        for m in mappings.iter().filter(|m| !m.destination_table.has_pk()) {
            warn!(
                "Destination table {} has no primary key; rows are matched on {}",
                m.destination_table.full_name(),
                if m.has_explicit_key() { "the key columns" } else { "every mapped column" }
            );
        }

        let mut writers: Vec<SqlDestinationWriter> = Vec::new();
        let outcome = match order_mappings(conn, mappings).await {
            Ok(ordered) => {
                writers = ordered
                    .into_iter()
                    .filter(|m| m.active)
                    .map(|m| SqlDestinationWriter::new(m, &self.run_id, &self.settings.writer))
                    .collect();
                self.execute(conn, sources, &mut writers).await
            }
            Err(e) => Err(Failure::from(e)),
        };

        self.cleanup(conn, &mut writers).await;

        let completed_at = Utc::now();
        let duration_seconds = (completed_at - started_at).num_milliseconds() as f64 / 1000.0;
        let (status, error) = match outcome {
            Ok(()) => {
                info!(
                    "Synchronization run {} completed in {:.2}s",
                    self.run_id, duration_seconds
                );
                (JobStatus::Completed, None)
            }
            Err(failure) => {
                let message = failure.describe();
                error!("Job failed: {}", message);
                (JobStatus::Failed, Some(message))
            }
        };

        JobResult {
            run_id: self.run_id.to_string(),
            status,
            started_at,
            completed_at,
            duration_seconds,
            mappings: writers
                .iter()
                .map(|w| MappingResult {
                    id: w.mapping().id,
                    source: w.mapping().source_table.full_name(),
                    destination: w.mapping().destination_table.full_name(),
                    stats: w.stats().clone(),
                })
                .collect(),
            error,
        }
    }

    async fn execute(
        &self,
        conn: &mut dyn Connection,
        sources: &dyn RowSourceFactory,
        writers: &mut [SqlDestinationWriter],
    ) -> std::result::Result<(), Failure> {
        for writer in writers.iter_mut() {
            self.stage(conn, sources, writer).await?;
        }

        conn.begin().await?;
        let applied = match self.apply(conn, writers).await {
            Ok(()) => conn.commit().await,
            Err(e) => Err(e),
        };
        if let Err(e) = applied {
            if let Err(rollback) = conn.rollback().await {
                warn!("Rollback failed: {}", rollback);
            }
            return Err(e.into());
        }
        Ok(())
    }

    async fn stage(
        &self,
        conn: &mut dyn Connection,
        sources: &dyn RowSourceFactory,
        writer: &mut SqlDestinationWriter,
    ) -> std::result::Result<(), Failure> {
        info!(
            "Importing data to table: {}",
            writer.mapping().destination_table.name
        );
        writer.prepare(conn).await?;

        let mut source = sources.open(writer.mapping()).await?;
        let result = drain(conn, source.as_mut(), writer).await;
        source.close().await;
        result
    }

    /// Merges in dependency order, then prunes in reverse.
    async fn apply(
        &self,
        conn: &mut dyn Connection,
        writers: &mut [SqlDestinationWriter],
    ) -> Result<()> {
        for writer in writers.iter_mut() {
            if writer.rows_staged() == 0 {
                info!(
                    "No rows were imported to the table: {}",
                    writer.mapping().destination_table.name
                );
                continue;
            }
            writer.merge(conn, self.settings.merge_mode).await?;
        }

        for writer in writers.iter_mut().rev() {
            if writer.rows_staged() == 0 {
                continue;
            }
            let forced = self.settings.prune_destination_tables_only;
            if !forced
                && !writer
                    .mapping()
                    .option_or(OPTION_PRUNE_MISSING, self.settings.prune_missing)
            {
                continue;
            }
            let scope = if forced {
                PruneScope::DestinationOnly
            } else {
                PruneScope::WithRelations
            };
            let extra = self
                .settings
                .prune_conditions
                .get(&writer.mapping().id)
                .map(String::as_str);
            writer.prune(conn, scope, extra).await?;
        }
        Ok(())
    }

    async fn cleanup(&self, conn: &mut dyn Connection, writers: &mut [SqlDestinationWriter]) {
        for writer in writers.iter_mut() {
            if let Err(e) = writer.close(conn).await {
                warn!(
                    "Failed to drop staging table {}: {}",
                    writer.staging().qualified(),
                    e
                );
            }
        }
    }
}

async fn drain(
    conn: &mut dyn Connection,
    source: &mut dyn RowSource,
    writer: &mut SqlDestinationWriter,
) -> std::result::Result<(), Failure> {
    while let Some(row) = source.next_row().await? {
        if let Err(error) = writer.stage(conn, &row).await {
            return Err(Failure {
                error,
                row: Some(row),
            });
        }
    }
    writer.finish(conn).await?;
    Ok(())
}
