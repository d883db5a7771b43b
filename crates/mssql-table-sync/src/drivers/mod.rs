//! Database driver implementations.
//!
//! - [`mssql`]: Microsoft SQL Server over TDS (tiberius + bb8)

pub mod mssql;

pub use mssql::{MssqlConnection, MssqlPool};
