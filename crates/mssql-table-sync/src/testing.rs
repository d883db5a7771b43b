//! In-memory fakes for the connection and row source seams.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use crate::core::mapping::Mapping;
use crate::core::row::SourceRow;
use crate::core::schema::Column;
use crate::core::traits::{BulkReport, Connection, RejectedRow, RowSource, RowSourceFactory};
use crate::core::value::SqlValue;
use crate::error::{Result, SyncError};

/// Records every call and answers from scripted rules matched by substring.
#[derive(Debug, Default)]
pub struct RecordingConnection {
    /// Executed statements and queries, in order.
    pub statements: Vec<(String, Vec<SqlValue>)>,
    /// `(table, row count)` per bulk load.
    pub bulk_loads: Vec<(String, usize)>,
    /// Transaction control calls: `BEGIN`, `COMMIT`, `ROLLBACK`.
    pub transactions: Vec<&'static str>,
    affected: Vec<(String, VecDeque<u64>)>,
    failures: Vec<(String, Option<u32>, String)>,
    responses: Vec<(String, Vec<Vec<SqlValue>>)>,
    rejects: Vec<(SqlValue, String)>,
    fail_bulk_into: Option<String>,
}

impl RecordingConnection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Successive affected-row counts for statements containing `pattern`;
    /// 0 once exhausted.
    pub fn affect(&mut self, pattern: &str, counts: impl IntoIterator<Item = u64>) {
        self.affected
            .push((pattern.to_string(), counts.into_iter().collect()));
    }

    /// Fail statements containing `pattern` with a server error.
    pub fn fail_on(&mut self, pattern: &str, code: Option<u32>, message: &str) {
        self.failures
            .push((pattern.to_string(), code, message.to_string()));
    }

    /// Result set for queries containing `pattern`.
    pub fn respond(&mut self, pattern: &str, rows: Vec<Vec<SqlValue>>) {
        self.responses.push((pattern.to_string(), rows));
    }

    /// Reject bulk-loaded rows that contain `value`.
    pub fn reject_rows_containing(&mut self, value: SqlValue, reason: &str) {
        self.rejects.push((value, reason.to_string()));
    }

    /// Fail bulk loads into tables containing `pattern`.
    pub fn fail_bulk_into(&mut self, pattern: &str) {
        self.fail_bulk_into = Some(pattern.to_string());
    }

    pub fn executed_matching(&self, pattern: &str) -> Vec<&String> {
        self.statements
            .iter()
            .map(|(sql, _)| sql)
            .filter(|sql| sql.contains(pattern))
            .collect()
    }

    fn check_failure(&self, sql: &str) -> Result<()> {
        match self.failures.iter().find(|(p, _, _)| sql.contains(p.as_str())) {
            Some((_, code, message)) => Err(SyncError::statement(*code, message.clone())),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl Connection for RecordingConnection {
    async fn execute(&mut self, sql: &str, params: &[SqlValue]) -> Result<u64> {
        self.statements.push((sql.to_string(), params.to_vec()));
        self.check_failure(sql)?;
        let affected = self
            .affected
            .iter_mut()
            .find(|(p, _)| sql.contains(p.as_str()))
            .and_then(|(_, counts)| counts.pop_front())
            .unwrap_or(0);
        Ok(affected)
    }

    async fn query(&mut self, sql: &str, params: &[SqlValue]) -> Result<Vec<Vec<SqlValue>>> {
        self.statements.push((sql.to_string(), params.to_vec()));
        self.check_failure(sql)?;
        Ok(self
            .responses
            .iter()
            .find(|(p, _)| sql.contains(p.as_str()))
            .map(|(_, rows)| rows.clone())
            .unwrap_or_default())
    }

    async fn bulk_insert(
        &mut self,
        table: &str,
        _columns: &[Column],
        rows: Vec<Vec<SqlValue>>,
    ) -> Result<BulkReport> {
        self.bulk_loads.push((table.to_string(), rows.len()));
        if self
            .fail_bulk_into
            .as_deref()
            .is_some_and(|p| table.contains(p))
        {
            return Err(SyncError::statement(Some(4815), "Received an invalid column length from the bcp client"));
        }

        let mut report = BulkReport::default();
        for (index, values) in rows.into_iter().enumerate() {
            match self.rejects.iter().find(|(v, _)| values.contains(v)) {
                Some((_, reason)) => report.rejected.push(RejectedRow {
                    index,
                    values,
                    reason: reason.clone(),
                }),
                None => report.written += 1,
            }
        }
        Ok(report)
    }

    async fn begin(&mut self) -> Result<()> {
        self.transactions.push("BEGIN");
        Ok(())
    }

    async fn commit(&mut self) -> Result<()> {
        self.transactions.push("COMMIT");
        Ok(())
    }

    async fn rollback(&mut self) -> Result<()> {
        self.transactions.push("ROLLBACK");
        Ok(())
    }
}

/// Rows served from memory.
pub struct VecSource {
    rows: VecDeque<SourceRow>,
    closed: Arc<AtomicUsize>,
}

#[async_trait]
impl RowSource for VecSource {
    async fn next_row(&mut self) -> Result<Option<SourceRow>> {
        Ok(self.rows.pop_front())
    }

    async fn close(&mut self) {
        self.rows.clear();
        self.closed.fetch_add(1, Ordering::SeqCst);
    }
}

/// Serves rows per source table name.
#[derive(Default)]
pub struct VecSourceFactory {
    tables: HashMap<String, Vec<SourceRow>>,
    /// Number of sources closed so far.
    pub closed: Arc<AtomicUsize>,
}

impl VecSourceFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rows(mut self, source_table: &str, rows: Vec<SourceRow>) -> Self {
        self.tables.insert(source_table.to_lowercase(), rows);
        self
    }
}

#[async_trait]
impl RowSourceFactory for VecSourceFactory {
    async fn open(&self, mapping: &Mapping) -> Result<Box<dyn RowSource>> {
        let rows = self
            .tables
            .get(&mapping.source_table.name.to_lowercase())
            .cloned()
            .unwrap_or_default();
        Ok(Box::new(VecSource {
            rows: rows.into(),
            closed: Arc::clone(&self.closed),
        }))
    }
}
