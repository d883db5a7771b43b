//! Core types shared by every stage of a synchronization job.
//!
//! - [`schema`]: table and column metadata
//! - [`value`]: owned SQL values and type coercion
//! - [`row`]: source rows
//! - [`mapping`]: mappings, column mappings, conditions and key selection
//! - [`traits`]: connection, row source and writer seams
//! - [`identifier`]: identifier validation and quoting

pub mod identifier;
pub mod mapping;
pub mod row;
pub mod schema;
pub mod traits;
pub mod value;

pub use mapping::{ColumnMapping, Condition, ConditionOperator, Mapping, ScriptType};
pub use row::SourceRow;
pub use schema::{Column, ForeignKeyColumn, ForeignKeyEdge, Table, TypeFamily};
pub use traits::{
    BulkReport, Connection, DestinationWriter, MergeMode, PruneScope, RejectedRow, RowSource,
    RowSourceFactory,
};
pub use value::{SqlNullType, SqlValue};
