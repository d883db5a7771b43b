//! # mssql-table-sync
//!
//! Stage-and-merge synchronization of SQL Server tables.
//!
//! A job maps source tables onto destination tables column by column. For
//! each mapping the library:
//!
//! - **Streams** the filtered source rows
//! - **Stages** transformed rows into a per-run staging table by bulk load
//! - **Merges** staging into the destination with key-matched UPDATE and
//!   anti-joined INSERT
//! - **Prunes** destination rows (and known relation rows) missing from the
//!   source, in bounded chunks
//!
//! Mappings are ordered so referenced tables load before their dependents,
//! and all merges and prunes of a job share one transaction.
//!
//! ## Example
//!
//! ```rust,no_run
//! use mssql_table_sync::{Config, Synchronizer};
//!
//! #[tokio::main]
//! async fn main() -> mssql_table_sync::Result<()> {
//!     let config = Config::load("job.yaml")?;
//!     let sync = Synchronizer::new(config).await?;
//!     let result = sync.run().await?;
//!     println!("Staged {} rows", result.rows_staged());
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod core;
pub mod drivers;
pub mod error;
pub mod orchestrator;
pub mod ordering;
pub mod profile;
pub mod source;
pub mod sql;
pub mod transform;
pub mod writer;

#[cfg(test)]
pub(crate) mod testing;

// Re-exports for convenient access
pub use config::{Config, ConnectionConfig, JobConfig, MappingConfig};
pub use crate::core::{Column, ColumnMapping, Condition, ConditionOperator, Mapping, ScriptType, SqlValue, Table};
pub use crate::core::{Connection, DestinationWriter, MergeMode, PruneScope, RowSource, RowSourceFactory};
pub use error::{Result, SyncError};
pub use orchestrator::{HealthCheckResult, JobPlan, JobResult, JobRunner, JobSettings, JobStatus, Synchronizer};
pub use writer::{SqlDestinationWriter, WriterOptions, WriterStats};
