//! SQL Server driver: pooled tiberius clients, value conversion, catalog
//! lookups and the [`Connection`](crate::core::traits::Connection)
//! implementation used for the destination.

pub mod catalog;
pub mod connection;
pub mod convert;
pub mod pool;

pub use connection::MssqlConnection;
pub use pool::{MssqlPool, TiberiusConnectionManager};
