//! Configuration type definitions.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::mapping::{ConditionOperator, ScriptType};
use crate::core::traits::MergeMode;
use crate::writer::{DEFAULT_BATCH_SIZE, DEFAULT_STAGING_SUFFIX};

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Database rows are read from.
    pub source: ConnectionConfig,

    /// Database rows are merged into.
    pub destination: ConnectionConfig,

    /// Job-wide defaults.
    #[serde(default)]
    pub job: JobConfig,

    /// Table mappings, in the order they were declared.
    #[serde(default)]
    pub mappings: Vec<MappingConfig>,
}

/// SQL Server connection settings.
#[derive(Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Database host.
    pub host: String,

    /// Database port (default: 1433).
    #[serde(default = "default_mssql_port")]
    pub port: u16,

    /// Database name.
    pub database: String,

    /// Username.
    pub user: String,

    /// Password.
    #[serde(default)]
    pub password: String,

    /// Default schema for unqualified tables (default: "dbo").
    #[serde(default = "default_dbo_schema")]
    pub schema: String,

    /// Encrypt connection (default: false).
    #[serde(default)]
    pub encrypt: bool,

    /// Trust server certificate (default: false).
    #[serde(default)]
    pub trust_server_cert: bool,

    /// Statement timeout in seconds. Unset means the side's default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command_timeout_secs: Option<u64>,

    /// Pool size (default: 4).
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

impl fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &"[REDACTED]")
            .field("schema", &self.schema)
            .field("encrypt", &self.encrypt)
            .field("trust_server_cert", &self.trust_server_cert)
            .field("command_timeout_secs", &self.command_timeout_secs)
            .field("max_connections", &self.max_connections)
            .finish()
    }
}

impl ConnectionConfig {
    /// `host:port/database`, for log lines.
    pub fn endpoint(&self) -> String {
        format!("{}:{}/{}", self.host, self.port, self.database)
    }

    /// Timeout for source queries; none unless configured.
    pub fn source_timeout(&self) -> Option<Duration> {
        self.command_timeout_secs
            .filter(|s| *s > 0)
            .map(Duration::from_secs)
    }

    /// Timeout for destination statements; 1200 seconds unless configured.
    pub fn destination_timeout(&self) -> Option<Duration> {
        match self.command_timeout_secs {
            Some(0) => None,
            Some(secs) => Some(Duration::from_secs(secs)),
            None => Some(Duration::from_secs(DEFAULT_DESTINATION_TIMEOUT_SECS)),
        }
    }
}

/// Destination statements run this long before timing out.
pub const DEFAULT_DESTINATION_TIMEOUT_SECS: u64 = 1200;

/// Job-wide defaults; mapping options override the first three flags.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobConfig {
    /// Delete destination rows that are not in the source (default: false).
    #[serde(default)]
    pub prune_missing: bool,

    /// Prune the destination table only, leaving relation tables alone.
    #[serde(default)]
    pub prune_destination_tables_only: bool,

    /// Drop rows whose mapped values were already staged (default: false).
    #[serde(default)]
    pub discard_duplicates: bool,

    /// Skip rows the bulk load rejects instead of failing (default: false).
    #[serde(default)]
    pub skip_failing_rows: bool,

    /// Which merge statements run (default: upsert).
    #[serde(default)]
    pub merge_mode: MergeMode,

    /// Rows per bulk load (default: 1000).
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Inserted between destination name and mapping id in staging names.
    #[serde(default = "default_staging_suffix")]
    pub staging_suffix: String,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            prune_missing: false,
            prune_destination_tables_only: false,
            discard_duplicates: false,
            skip_failing_rows: false,
            merge_mode: MergeMode::default(),
            batch_size: default_batch_size(),
            staging_suffix: default_staging_suffix(),
        }
    }
}

/// A table reference; the schema defaults to the connection's schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableRef {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,
    pub table: String,
}

impl TableRef {
    pub fn schema_or<'a>(&'a self, default: &'a str) -> &'a str {
        self.schema.as_deref().unwrap_or(default)
    }
}

/// One table mapping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MappingConfig {
    pub source: TableRef,
    pub destination: TableRef,

    #[serde(default = "default_true")]
    pub active: bool,

    /// Per-mapping overrides: `prune-missing`, `discard-duplicates`,
    /// `skip-failing-rows`.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub options: BTreeMap<String, bool>,

    /// Extra predicate ANDed into prune statements, in destination names.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prune_conditions: Option<String>,

    #[serde(default)]
    pub columns: Vec<ColumnMappingConfig>,

    #[serde(default)]
    pub conditions: Vec<ConditionConfig>,
}

/// One column mapping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnMappingConfig {
    /// Source column; omitted for script-only columns.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,

    pub destination: String,

    #[serde(default = "default_true")]
    pub active: bool,

    /// Explicit match key.
    #[serde(default)]
    pub key: bool,

    #[serde(default)]
    pub script: ScriptType,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub script_value: Option<String>,
}

/// One filter condition on a source column.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConditionConfig {
    pub column: String,

    pub operator: ConditionOperator,

    #[serde(default)]
    pub value: String,

    /// Compare against NULL instead of the value.
    #[serde(default)]
    pub null: bool,

    /// Compare against NULL or the empty string.
    #[serde(default)]
    pub null_or_empty: bool,
}

// Default value functions for serde
fn default_mssql_port() -> u16 {
    1433
}

fn default_dbo_schema() -> String {
    "dbo".to_string()
}

fn default_max_connections() -> u32 {
    4
}

fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}

fn default_staging_suffix() -> String {
    DEFAULT_STAGING_SUFFIX.to_string()
}

fn default_true() -> bool {
    true
}
