//! [`Connection`] over one pooled tiberius client.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use bb8::PooledConnection;
use tiberius::{Row, ToSql, TokenRow};
use tracing::{debug, warn};

use crate::core::identifier::quote_ident;
use crate::core::schema::Column;
use crate::core::traits::{BulkReport, Connection, RejectedRow};
use crate::core::value::SqlValue;
use crate::error::{Result, SyncError};

use super::convert::{from_column_data, to_column_data, to_sql_param};
use super::pool::TiberiusConnectionManager;

/// Maximum string length (in bytes) for TDS bulk insert.
/// Tiberius bulk insert has a hard limit of 65535 bytes for UTF-16 encoded strings.
const BULK_INSERT_STRING_LIMIT: usize = 65535;

/// Parameters usable by one sp_executesql call.
const MAX_PARAMETERS: usize = 2098;

/// SQL Server's limit on row constructors in one VALUES list.
const MAX_VALUES_ROWS: usize = 1000;

/// Characters of a statement kept in timeout errors.
const STATEMENT_PREVIEW: usize = 120;

/// A destination or catalog session holding one pooled connection.
pub struct MssqlConnection {
    client: PooledConnection<'static, TiberiusConnectionManager>,
    command_timeout: Option<Duration>,
}

/// Server messages become [`SyncError::Statement`] so callers can inspect
/// the error number; everything else stays a connection error.
pub(crate) fn map_tiberius_error(e: tiberius::error::Error) -> SyncError {
    match e {
        tiberius::error::Error::Server(token) => {
            SyncError::statement(Some(token.code()), token.message())
        }
        other => SyncError::Database(other),
    }
}

fn preview(sql: &str) -> String {
    let flat = sql.split_whitespace().collect::<Vec<_>>().join(" ");
    match flat.char_indices().nth(STATEMENT_PREVIEW) {
        Some((i, _)) => format!("{}...", &flat[..i]),
        None => flat,
    }
}

/// Await a tiberius call under the command timeout.
pub(crate) async fn timed<T>(
    limit: Option<Duration>,
    operation: &str,
    fut: impl Future<Output = tiberius::Result<T>>,
) -> Result<T> {
    let result = match limit {
        Some(limit) => tokio::time::timeout(limit, fut).await.map_err(|_| SyncError::Timeout {
            operation: preview(operation),
            seconds: limit.as_secs(),
        })?,
        None => fut.await,
    };
    result.map_err(map_tiberius_error)
}

/// Owned values of a result row, in column order.
pub(crate) fn row_values(row: Row) -> Result<Vec<SqlValue>> {
    row.into_iter().map(from_column_data).collect()
}

/// Check if a row contains any string values that exceed the bulk insert limit.
fn row_has_oversized_strings(row: &[SqlValue]) -> bool {
    row.iter().any(|value| match value {
        SqlValue::String(s) => s.chars().map(|c| c.len_utf16() * 2).sum::<usize>() > BULK_INSERT_STRING_LIMIT,
        _ => false,
    })
}

fn insert_sql(table: &str, columns: &[Column], rows: usize) -> String {
    let column_list: Vec<String> = columns.iter().map(|c| quote_ident(&c.name)).collect();
    let mut param = 0usize;
    let groups: Vec<String> = (0..rows)
        .map(|_| {
            let placeholders: Vec<String> = columns
                .iter()
                .map(|_| {
                    param += 1;
                    format!("@P{}", param)
                })
                .collect();
            format!("({})", placeholders.join(", "))
        })
        .collect();
    format!(
        "INSERT INTO {} ({}) VALUES {}",
        table,
        column_list.join(", "),
        groups.join(", ")
    )
}

impl MssqlConnection {
    pub(crate) fn new(
        client: PooledConnection<'static, TiberiusConnectionManager>,
        command_timeout: Option<Duration>,
    ) -> Self {
        Self {
            client,
            command_timeout,
        }
    }

    async fn simple(&mut self, sql: &str) -> Result<()> {
        let client = &mut self.client;
        timed(self.command_timeout, sql, async move {
            client.simple_query(sql).await?.into_results().await
        })
        .await?;
        Ok(())
    }

    async fn send_bulk(&mut self, table: &str, rows: Vec<TokenRow<'static>>) -> Result<u64> {
        let client = &mut self.client;
        timed(self.command_timeout, table, async move {
            let mut load = client.bulk_insert(table).await?;
            for row in rows {
                load.send(row).await?;
            }
            let result = load.finalize().await?;
            Ok(result.total())
        })
        .await
    }

    /// Parameterized INSERTs, several rows per statement. A chunk the server
    /// refuses is replayed one row at a time to single out the bad rows.
    async fn insert_rows(
        &mut self,
        table: &str,
        columns: &[Column],
        rows: Vec<(usize, Vec<SqlValue>)>,
        report: &mut BulkReport,
    ) -> Result<()> {
        let per_statement = rows_per_insert(columns.len());

        for chunk in rows.chunks(per_statement) {
            let params: Vec<SqlValue> = chunk.iter().flat_map(|(_, v)| v.iter().cloned()).collect();
            match self
                .execute(&insert_sql(table, columns, chunk.len()), &params)
                .await
            {
                Ok(_) => report.written += chunk.len() as u64,
                Err(SyncError::Statement { .. }) if chunk.len() > 1 => {
                    for (index, values) in chunk {
                        match self.execute(&insert_sql(table, columns, 1), values).await {
                            Ok(_) => report.written += 1,
                            Err(SyncError::Statement { message, .. }) => report.rejected.push(RejectedRow {
                                index: *index,
                                values: values.clone(),
                                reason: message,
                            }),
                            Err(e) => return Err(e),
                        }
                    }
                }
                Err(SyncError::Statement { message, .. }) => {
                    let (index, values) = &chunk[0];
                    report.rejected.push(RejectedRow {
                        index: *index,
                        values: values.clone(),
                        reason: message,
                    });
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Connection for MssqlConnection {
    async fn execute(&mut self, sql: &str, params: &[SqlValue]) -> Result<u64> {
        let boxed: Vec<Box<dyn ToSql>> = params.iter().map(to_sql_param).collect();
        let refs: Vec<&dyn ToSql> = boxed.iter().map(|p| p.as_ref()).collect();
        let client = &mut self.client;
        let result = timed(self.command_timeout, sql, async move {
            client.execute(sql, &refs).await
        })
        .await?;
        Ok(result.total())
    }

    async fn query(&mut self, sql: &str, params: &[SqlValue]) -> Result<Vec<Vec<SqlValue>>> {
        let boxed: Vec<Box<dyn ToSql>> = params.iter().map(to_sql_param).collect();
        let refs: Vec<&dyn ToSql> = boxed.iter().map(|p| p.as_ref()).collect();
        let client = &mut self.client;
        let rows = timed(self.command_timeout, sql, async move {
            client.query(sql, &refs).await?.into_first_result().await
        })
        .await?;
        rows.into_iter().map(row_values).collect()
    }

    async fn bulk_insert(
        &mut self,
        table: &str,
        columns: &[Column],
        rows: Vec<Vec<SqlValue>>,
    ) -> Result<BulkReport> {
        let mut report = BulkReport::default();
        let mut bulk_values = Vec::with_capacity(rows.len());
        let mut token_rows = Vec::with_capacity(rows.len());
        let mut oversized = Vec::new();

        for (index, values) in rows.into_iter().enumerate() {
            let values: Vec<SqlValue> = values
                .into_iter()
                .zip(columns)
                .map(|(v, c)| v.coerce(c))
                .collect();

            if row_has_oversized_strings(&values) {
                oversized.push((index, values));
                continue;
            }

            let converted: std::result::Result<Vec<_>, String> = values
                .iter()
                .zip(columns)
                .map(|(v, c)| to_column_data(v, c))
                .collect();
            match converted {
                Ok(data) => {
                    let mut token_row = TokenRow::new();
                    for value in data {
                        token_row.push(value);
                    }
                    token_rows.push(token_row);
                    bulk_values.push((index, values));
                }
                Err(reason) => report.rejected.push(RejectedRow {
                    index,
                    values,
                    reason,
                }),
            }
        }

        if !token_rows.is_empty() {
            match self.send_bulk(table, token_rows).await {
                Ok(written) => report.written += written,
                Err(e @ SyncError::Timeout { .. }) => return Err(e),
                Err(e) => {
                    warn!(
                        "Bulk load into {} failed ({}), retrying {} rows one statement at a time",
                        table,
                        e.server_message(),
                        bulk_values.len()
                    );
                    self.insert_rows(table, columns, bulk_values, &mut report)
                        .await?;
                }
            }
        }

        if !oversized.is_empty() {
            debug!(
                "Falling back to INSERT for {} rows with oversized strings in {}",
                oversized.len(),
                table
            );
            self.insert_rows(table, columns, oversized, &mut report).await?;
        }

        report.rejected.sort_by_key(|r| r.index);
        Ok(report)
    }

    async fn begin(&mut self) -> Result<()> {
        self.simple("BEGIN TRANSACTION").await
    }

    async fn commit(&mut self) -> Result<()> {
        self.simple("COMMIT TRANSACTION").await
    }

    async fn rollback(&mut self) -> Result<()> {
        self.simple("IF @@TRANCOUNT > 0 ROLLBACK TRANSACTION").await
    }
}

/// Rows one multi-row INSERT can carry for a table of `columns` columns.
fn rows_per_insert(columns: usize) -> usize {
    MAX_VALUES_ROWS.min(MAX_PARAMETERS / columns.max(1)).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_sql_numbers_params_across_rows() {
        let columns = vec![Column::new("Id", "int"), Column::new("Name", "nvarchar")];
        assert_eq!(
            insert_sql("[dbo].[Stg]", &columns, 2),
            "INSERT INTO [dbo].[Stg] ([Id], [Name]) VALUES (@P1, @P2), (@P3, @P4)"
        );
    }

    #[test]
    fn test_rows_per_insert_respects_server_limits() {
        assert_eq!(rows_per_insert(1), 1000);
        assert_eq!(rows_per_insert(2), 1000);
        assert_eq!(rows_per_insert(3), 699);
        assert_eq!(rows_per_insert(10), 209);
        assert_eq!(rows_per_insert(3000), 1);
    }

    #[test]
    fn test_row_has_oversized_strings() {
        assert!(!row_has_oversized_strings(&[]));
        assert!(!row_has_oversized_strings(&[SqlValue::from("short"), SqlValue::I32(1)]));
        // exactly at the limit: 32767 BMP chars = 65534 bytes
        assert!(!row_has_oversized_strings(&[SqlValue::String("a".repeat(32767))]));
        assert!(row_has_oversized_strings(&[SqlValue::String("a".repeat(32768))]));
        // surrogate pairs count four bytes
        assert!(row_has_oversized_strings(&[SqlValue::String("😀".repeat(16384))]));
    }

    #[test]
    fn test_preview_flattens_and_truncates() {
        assert_eq!(preview("SELECT\n  1"), "SELECT 1");
        let long = "x".repeat(500);
        assert_eq!(preview(&long).len(), STATEMENT_PREVIEW + 3);
    }

    #[test]
    fn test_non_server_errors_stay_database_errors() {
        let io = tiberius::error::Error::Io {
            kind: std::io::ErrorKind::ConnectionReset,
            message: "reset".into(),
        };
        assert!(matches!(map_tiberius_error(io), SyncError::Database(_)));
    }
}
