//! Seams between the load engine and the outside world.
//!
//! - [`Connection`]: the destination database session (statements, bulk
//!   load, transaction control)
//! - [`RowSource`] / [`RowSourceFactory`]: pull-model row streams per mapping
//! - [`DestinationWriter`]: the staged-write sink the job runner drives
//!
//! The engine only talks to these traits, so SQL generation, batching and
//! transaction handling are exercised in tests with in-memory fakes.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

use super::mapping::Mapping;
use super::row::SourceRow;
use super::schema::Column;
use super::value::SqlValue;

/// A row the bulk load could not write, with the server's reason.
#[derive(Debug, Clone, PartialEq)]
pub struct RejectedRow {
    /// Position within the submitted batch.
    pub index: usize,
    pub values: Vec<SqlValue>,
    pub reason: String,
}

/// Outcome of one bulk load call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BulkReport {
    pub written: u64,
    pub rejected: Vec<RejectedRow>,
}

/// Destination database session.
///
/// Parameters are positional and bound to `@P1`, `@P2`, ... in order.
#[async_trait]
pub trait Connection: Send {
    /// Execute a statement batch, returning the total rows affected.
    async fn execute(&mut self, sql: &str, params: &[SqlValue]) -> Result<u64>;

    /// Run a query and collect the first result set.
    async fn query(&mut self, sql: &str, params: &[SqlValue]) -> Result<Vec<Vec<SqlValue>>>;

    /// Bulk load rows into `table` (already quoted). `columns` describes the
    /// table's columns in order; every row has one value per column.
    ///
    /// Rows the server refuses are returned in the report instead of failing
    /// the call, so the caller decides whether they are fatal.
    async fn bulk_insert(
        &mut self,
        table: &str,
        columns: &[Column],
        rows: Vec<Vec<SqlValue>>,
    ) -> Result<BulkReport>;

    async fn begin(&mut self) -> Result<()>;

    async fn commit(&mut self) -> Result<()>;

    async fn rollback(&mut self) -> Result<()>;
}

/// Forward-only row stream for one mapping.
#[async_trait]
pub trait RowSource: Send {
    /// Next row, or `None` once the source is exhausted.
    async fn next_row(&mut self) -> Result<Option<SourceRow>>;

    /// Release the underlying cursor. Safe to call more than once.
    async fn close(&mut self);
}

/// Opens a [`RowSource`] for each mapping of a job.
#[async_trait]
pub trait RowSourceFactory: Send + Sync {
    async fn open(&self, mapping: &Mapping) -> Result<Box<dyn RowSource>>;
}

/// Which statements a merge issues.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeMode {
    /// UPDATE matched rows, then INSERT unmatched rows.
    #[default]
    Upsert,
    UpdateOnly,
    InsertOnly,
}

impl MergeMode {
    pub fn updates(self) -> bool {
        self != MergeMode::InsertOnly
    }

    pub fn inserts(self) -> bool {
        self != MergeMode::UpdateOnly
    }
}

/// How far a prune reaches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PruneScope {
    /// Destination table plus the known dependent relation tables.
    WithRelations,
    /// Destination table only.
    DestinationOnly,
}

/// Staged-write sink for one mapping.
///
/// Lifecycle: `prepare`, any number of `stage` calls, `finish`, then
/// optionally `merge` / `prune` / `remove_present` inside the job
/// transaction, and always `close`.
#[async_trait]
pub trait DestinationWriter: Send {
    fn mapping(&self) -> &Mapping;

    /// Rows written to the staging table so far.
    fn rows_staged(&self) -> u64;

    /// Create the staging table.
    async fn prepare(&mut self, conn: &mut dyn Connection) -> Result<()>;

    /// Accept one source row.
    async fn stage(&mut self, conn: &mut dyn Connection, row: &SourceRow) -> Result<()>;

    /// Flush buffered rows.
    async fn finish(&mut self, conn: &mut dyn Connection) -> Result<()>;

    /// Move staged rows into the destination.
    async fn merge(&mut self, conn: &mut dyn Connection, mode: MergeMode) -> Result<()>;

    /// Delete destination rows that are not in the staging table.
    async fn prune(
        &mut self,
        conn: &mut dyn Connection,
        scope: PruneScope,
        extra_conditions: Option<&str>,
    ) -> Result<()>;

    /// Delete destination rows that are in the staging table.
    async fn remove_present(
        &mut self,
        conn: &mut dyn Connection,
        extra_conditions: Option<&str>,
    ) -> Result<()>;

    /// Drop the staging table.
    async fn close(&mut self, conn: &mut dyn Connection) -> Result<()>;
}
