//! Staging table naming, DDL and batched loading.

use std::collections::HashSet;

use tracing::{debug, warn};
use uuid::Uuid;

use crate::core::identifier::{qualify, qualify_column, quote_ident, quote_literal};
use crate::core::mapping::Mapping;
use crate::core::schema::Column;
use crate::core::traits::{Connection, RejectedRow};
use crate::core::value::SqlValue;
use crate::error::{Result, SyncError};

/// Default rows per bulk load.
pub const DEFAULT_BATCH_SIZE: usize = 1000;

/// Default suffix between the destination name and the mapping id.
pub const DEFAULT_STAGING_SUFFIX: &str = "TempTableForSqlProviderImport";

/// Ephemeral table shaped like a mapping's destination.
#[derive(Debug, Clone, PartialEq)]
pub struct StagingTable {
    pub schema: String,
    pub name: String,
    pub columns: Vec<Column>,
}

impl StagingTable {
    /// Staging table for `mapping` in the destination schema. The name carries
    /// the mapping id and the start of the run id so concurrent jobs differ.
    pub fn for_mapping(mapping: &Mapping, suffix: &str, run_id: &Uuid, columns: Vec<Column>) -> Self {
        let run = run_id.simple().to_string();
        Self {
            schema: mapping.destination_table.schema.clone(),
            name: format!(
                "{}{}{}_{}",
                mapping.destination_table.name,
                suffix,
                mapping.id,
                &run[..8]
            ),
            columns,
        }
    }

    pub fn qualified(&self) -> String {
        qualify(&self.schema, &self.name)
    }

    /// `[schema].[staging].[column]`
    pub fn column_ref(&self, column: &str) -> String {
        qualify_column(&self.schema, &self.name, column)
    }

    /// Drop any leftover table with the same name, then create it. Identity
    /// is not carried over and every column is nullable.
    pub fn create_sql(&self) -> String {
        let columns: Vec<String> = self
            .columns
            .iter()
            .map(|c| format!("{} {} NULL", quote_ident(&c.name), staging_type(c)))
            .collect();
        format!(
            "{}; CREATE TABLE {} ({});",
            self.drop_sql(),
            self.qualified(),
            columns.join(", ")
        )
    }

    pub fn drop_sql(&self) -> String {
        format!(
            "IF OBJECT_ID(N{}, 'U') IS NOT NULL DROP TABLE {}",
            quote_literal(&self.qualified()),
            self.qualified()
        )
    }
}

/// Column type in the staging table; money types are staged as decimals.
fn staging_type(column: &Column) -> String {
    match column.data_type.to_lowercase().as_str() {
        "money" => "decimal(19, 4)".to_string(),
        "smallmoney" => "decimal(10, 4)".to_string(),
        _ => column.sql_type(),
    }
}

/// Result of one batch flush, folded into the writer's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushOutcome {
    pub written: u64,
    pub skipped: u64,
}

/// Buffers staging rows and bulk loads them in batches.
#[derive(Debug)]
pub struct StagingLoader {
    batch_size: usize,
    skip_failing_rows: bool,
    buffer: Vec<Vec<SqlValue>>,
    seen: Option<HashSet<String>>,
}

impl StagingLoader {
    pub fn new(batch_size: usize, discard_duplicates: bool, skip_failing_rows: bool) -> Self {
        let batch_size = batch_size.max(1);
        Self {
            batch_size,
            skip_failing_rows,
            buffer: Vec::with_capacity(batch_size),
            seen: discard_duplicates.then(HashSet::new),
        }
    }

    /// Buffer a row. Returns false, without buffering, when duplicate
    /// discarding is on and `key` was already accepted.
    pub fn push(&mut self, values: Vec<SqlValue>, key: impl FnOnce() -> String) -> bool {
        if let Some(seen) = self.seen.as_mut() {
            if !seen.insert(key()) {
                return false;
            }
        }
        self.buffer.push(values);
        true
    }

    pub fn is_full(&self) -> bool {
        self.buffer.len() >= self.batch_size
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Bulk load the buffered rows into `staging`.
    pub async fn flush(
        &mut self,
        conn: &mut dyn Connection,
        staging: &StagingTable,
    ) -> Result<FlushOutcome> {
        if self.buffer.is_empty() {
            return Ok(FlushOutcome::default());
        }
        let rows = std::mem::replace(&mut self.buffer, Vec::with_capacity(self.batch_size));
        let submitted = rows.len();
        let table = staging.qualified();

        let report = conn.bulk_insert(&table, &staging.columns, rows).await?;
        debug!(
            "Bulk loaded {} of {} rows into {}",
            report.written, submitted, table
        );

        if report.rejected.is_empty() {
            return Ok(FlushOutcome {
                written: report.written,
                skipped: 0,
            });
        }

        let rejected = report.rejected.len();
        if !self.skip_failing_rows {
            return Err(SyncError::BulkTransferRejected {
                table,
                rejected,
                detail: describe_rejections(&staging.columns, &report.rejected),
            });
        }

        warn!("Skipped {} failed rows from the staging table {}", rejected, table);
        Ok(FlushOutcome {
            written: report.written,
            skipped: rejected as u64,
        })
    }
}

/// Header line plus one line per rejected row with the server's reason.
fn describe_rejections(columns: &[Column], rejected: &[RejectedRow]) -> String {
    let mut out = columns
        .iter()
        .map(|c| c.name.as_str())
        .collect::<Vec<_>>()
        .join(", ");
    for row in rejected {
        let values: Vec<String> = row.values.iter().map(|v| v.to_string()).collect();
        out.push_str(&format!("\n{}: {}", values.join(", "), row.reason));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::schema::Table;
    use crate::testing::RecordingConnection;

    fn staging() -> StagingTable {
        let m = Mapping::new(4, Table::new("dbo", "Src"), Table::new("dbo", "EcomGroups"));
        let run = Uuid::parse_str("1f0c2d3e-4b5a-6978-8a9b-0c1d2e3f4a5b").unwrap();
        StagingTable::for_mapping(
            &m,
            DEFAULT_STAGING_SUFFIX,
            &run,
            vec![Column::new("Id", "int"), Column::new("Name", "nvarchar").with_length(100)],
        )
    }

    #[test]
    fn test_staging_name_carries_mapping_and_run() {
        let s = staging();
        assert_eq!(s.name, "EcomGroupsTempTableForSqlProviderImport4_1f0c2d3e");
        assert_eq!(s.qualified(), "[dbo].[EcomGroupsTempTableForSqlProviderImport4_1f0c2d3e]");
    }

    #[test]
    fn test_create_sql_drops_first_and_makes_columns_nullable() {
        let sql = staging().create_sql();
        assert!(sql.starts_with("IF OBJECT_ID(N'[dbo].[EcomGroupsTempTableForSqlProviderImport4_1f0c2d3e]', 'U') IS NOT NULL DROP TABLE"));
        assert!(sql.contains("CREATE TABLE [dbo].[EcomGroupsTempTableForSqlProviderImport4_1f0c2d3e] ([Id] int NULL, [Name] nvarchar(50) NULL);"));
    }

    #[tokio::test]
    async fn test_batches_flush_at_batch_size() {
        let s = staging();
        let mut conn = RecordingConnection::new();
        let mut loader = StagingLoader::new(1000, false, false);
        let mut written = 0;
        for i in 0..2500 {
            loader.push(vec![SqlValue::I64(i), SqlValue::from("x")], String::new);
            if loader.is_full() {
                written += loader.flush(&mut conn, &s).await.unwrap().written;
            }
        }
        written += loader.flush(&mut conn, &s).await.unwrap().written;

        assert_eq!(written, 2500);
        let sizes: Vec<usize> = conn.bulk_loads.iter().map(|(_, n)| *n).collect();
        assert_eq!(sizes, vec![1000, 1000, 500]);
    }

    #[test]
    fn test_duplicate_keys_are_discarded() {
        let mut loader = StagingLoader::new(10, true, false);
        assert!(loader.push(vec![SqlValue::from("a")], || "a".to_string()));
        assert!(!loader.push(vec![SqlValue::from("a")], || "a".to_string()));
        assert_eq!(loader.buffered(), 1);

        let mut keep_all = StagingLoader::new(10, false, false);
        keep_all.push(vec![SqlValue::from("a")], || "a".to_string());
        keep_all.push(vec![SqlValue::from("a")], || "a".to_string());
        assert_eq!(keep_all.buffered(), 2);
    }

    #[tokio::test]
    async fn test_rejected_rows_fail_without_skip() {
        let s = staging();
        let mut conn = RecordingConnection::new();
        conn.reject_rows_containing(SqlValue::from("bad"), "String or binary data would be truncated");
        let mut loader = StagingLoader::new(10, false, false);
        loader.push(vec![SqlValue::I64(1), SqlValue::from("ok")], String::new);
        loader.push(vec![SqlValue::I64(2), SqlValue::from("bad")], String::new);

        let err = loader.flush(&mut conn, &s).await.unwrap_err();
        match err {
            SyncError::BulkTransferRejected { rejected, detail, .. } => {
                assert_eq!(rejected, 1);
                assert!(detail.starts_with("Id, Name"));
                assert!(detail.contains("2, bad: String or binary data would be truncated"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_rejected_rows_are_counted_with_skip() {
        let s = staging();
        let mut conn = RecordingConnection::new();
        conn.reject_rows_containing(SqlValue::from("bad"), "conversion failed");
        let mut loader = StagingLoader::new(10, false, true);
        loader.push(vec![SqlValue::I64(1), SqlValue::from("ok")], String::new);
        loader.push(vec![SqlValue::I64(2), SqlValue::from("bad")], String::new);
        loader.push(vec![SqlValue::I64(3), SqlValue::from("bad")], String::new);

        let outcome = loader.flush(&mut conn, &s).await.unwrap();
        assert_eq!(outcome, FlushOutcome { written: 1, skipped: 2 });
    }
}
