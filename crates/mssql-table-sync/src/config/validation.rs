//! Configuration validation.

use super::{Config, ConnectionConfig};
use crate::core::identifier::validate_identifier;
use crate::core::mapping::{ConditionOperator, ScriptType};
use crate::error::{Result, SyncError};

fn validate_connection(side: &str, conn: &ConnectionConfig) -> Result<()> {
    if conn.host.is_empty() {
        return Err(SyncError::Config(format!("{}.host is required", side)));
    }
    if conn.database.is_empty() {
        return Err(SyncError::Config(format!("{}.database is required", side)));
    }
    if conn.user.is_empty() {
        return Err(SyncError::Config(format!("{}.user is required", side)));
    }
    if conn.max_connections == 0 {
        return Err(SyncError::Config(format!(
            "{}.max_connections must be at least 1",
            side
        )));
    }
    validate_identifier(&conn.schema)
}

/// Validate the configuration.
pub fn validate(config: &Config) -> Result<()> {
    validate_connection("source", &config.source)?;
    validate_connection("destination", &config.destination)?;

    if config.job.batch_size == 0 {
        return Err(SyncError::Config("job.batch_size must be at least 1".into()));
    }
    if config.job.staging_suffix.is_empty() {
        return Err(SyncError::Config("job.staging_suffix cannot be empty".into()));
    }

    if config.mappings.is_empty() {
        return Err(SyncError::Config("at least one mapping is required".into()));
    }

    for (i, mapping) in config.mappings.iter().enumerate() {
        let at = |field: &str| format!("mappings[{}].{}", i, field);

        validate_identifier(&mapping.source.table)
            .map_err(|e| SyncError::Config(format!("{}: {}", at("source.table"), e)))?;
        validate_identifier(&mapping.destination.table)
            .map_err(|e| SyncError::Config(format!("{}: {}", at("destination.table"), e)))?;

        if mapping.active && !mapping.columns.iter().any(|c| c.active) {
            return Err(SyncError::Config(format!(
                "{} needs at least one active column",
                at("columns")
            )));
        }

        for column in &mapping.columns {
            validate_identifier(&column.destination)?;
            match (&column.source, column.script) {
                (Some(source), _) => validate_identifier(source)?,
                (None, ScriptType::Constant | ScriptType::NewGuid) => {}
                (None, _) => {
                    return Err(SyncError::Config(format!(
                        "{}: column {} has no source and no constant or new_guid script",
                        at("columns"),
                        column.destination
                    )))
                }
            }
        }

        for condition in &mapping.conditions {
            validate_identifier(&condition.column)?;
            if condition.null && condition.null_or_empty {
                return Err(SyncError::Config(format!(
                    "{}: condition on {} cannot set both null and null_or_empty",
                    at("conditions"),
                    condition.column
                )));
            }
        }
    }

    Ok(())
}

/// Non-fatal observations about a configuration that validated.
pub fn warnings(config: &Config) -> Vec<String> {
    let mut out = Vec::new();

    for (i, mapping) in config.mappings.iter().enumerate() {
        if !mapping.active {
            out.push(format!("mappings[{}] is inactive and will be skipped", i));
            continue;
        }

        let same_db = config.source.host.eq_ignore_ascii_case(&config.destination.host)
            && config.source.port == config.destination.port
            && config.source.database.eq_ignore_ascii_case(&config.destination.database);
        let same_table = mapping
            .source
            .schema_or(&config.source.schema)
            .eq_ignore_ascii_case(mapping.destination.schema_or(&config.destination.schema))
            && mapping.source.table.eq_ignore_ascii_case(&mapping.destination.table);
        if same_db && same_table {
            out.push(format!(
                "mappings[{}] reads and writes the same table {}",
                i, mapping.destination.table
            ));
        }

        for condition in &mapping.conditions {
            if condition.operator == ConditionOperator::Unrecognized {
                out.push(format!(
                    "mappings[{}]: unknown operator on {} is treated as equal_to",
                    i, condition.column
                ));
            }
        }

        for column in mapping.columns.iter().filter(|c| c.key && c.script.is_insert_only()) {
            out.push(format!(
                "mappings[{}]: key column {} is produced by an insert-only script",
                i, column.destination
            ));
        }
    }

    out
}
