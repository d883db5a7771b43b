//! Resolve configured mappings against the live catalogs.

use tracing::debug;

use super::{ColumnMappingConfig, Config, ConditionConfig};
use crate::core::mapping::{ColumnMapping, Condition, Mapping};
use crate::core::schema::{Column, Table};
use crate::core::traits::Connection;
use crate::drivers::mssql::catalog::load_table;
use crate::error::{Result, SyncError};
use crate::profile::profile_for;

/// Source column by name, falling back to a profile-computed column.
fn source_column(table: &Table, name: &str) -> Result<Column> {
    if let Some(column) = table.column(name) {
        return Ok(column.clone());
    }
    if let Some(computed) = profile_for(&table.name).and_then(|p| p.computed_column(name)) {
        let mut column = Column::new(computed.name, computed.data_type);
        column.is_virtual = true;
        return Ok(column);
    }
    Err(SyncError::Config(format!(
        "column {} does not exist in source table {}",
        name,
        table.full_name()
    )))
}

fn destination_column(table: &Table, name: &str) -> Result<Column> {
    table.column(name).cloned().ok_or_else(|| {
        SyncError::Config(format!(
            "column {} does not exist in destination table {}",
            name,
            table.full_name()
        ))
    })
}

fn column_mapping(
    source: &Table,
    destination: &Table,
    config: &ColumnMappingConfig,
) -> Result<ColumnMapping> {
    let source_column = config
        .source
        .as_deref()
        .map(|name| source_column(source, name))
        .transpose()?;
    let mut cm = ColumnMapping::new(source_column, destination_column(destination, &config.destination)?)
        .scripted(config.script, config.script_value.as_deref());
    cm.active = config.active;
    cm.is_key = config.key;
    Ok(cm)
}

fn condition(source: &Table, config: &ConditionConfig) -> Result<Condition> {
    let mut condition = Condition::new(
        source_column(source, &config.column)?,
        config.operator,
        config.value.clone(),
    );
    condition.is_null_condition = config.null;
    condition.is_null_or_empty_condition = config.null_or_empty;
    Ok(condition)
}

/// Build fully typed mappings for every active configured mapping.
///
/// Mapping ids are the 1-based position in the file, so they stay stable
/// when inactive mappings are skipped.
pub async fn resolve_mappings(
    config: &Config,
    source: &mut dyn Connection,
    destination: &mut dyn Connection,
) -> Result<Vec<Mapping>> {
    let mut mappings = Vec::new();

    for (index, mc) in config.mappings.iter().enumerate() {
        if !mc.active {
            continue;
        }
        let source_table = load_table(
            source,
            mc.source.schema_or(&config.source.schema),
            &mc.source.table,
        )
        .await?;
        let destination_table = load_table(
            destination,
            mc.destination.schema_or(&config.destination.schema),
            &mc.destination.table,
        )
        .await?;

        let column_mappings = mc
            .columns
            .iter()
            .map(|c| column_mapping(&source_table, &destination_table, c))
            .collect::<Result<Vec<_>>>()?;
        let conditions = mc
            .conditions
            .iter()
            .map(|c| condition(&source_table, c))
            .collect::<Result<Vec<_>>>()?;

        let mut mapping = Mapping::new(index + 1, source_table, destination_table);
        mapping.column_mappings = column_mappings;
        mapping.conditions = conditions;
        mapping.options = mc.options.clone();

        debug!(
            "Resolved mapping {}: {} -> {} ({} columns, {} conditions)",
            mapping.id,
            mapping.source_table.full_name(),
            mapping.destination_table.full_name(),
            mapping.column_mappings.len(),
            mapping.conditions.len()
        );
        mappings.push(mapping);
    }

    Ok(mappings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::valid_config;
    use crate::config::{ColumnMappingConfig, ConditionConfig, MappingConfig, TableRef};
    use crate::core::mapping::{ConditionOperator, ScriptType};
    use crate::core::value::SqlValue;
    use crate::testing::RecordingConnection;

    fn catalog(columns: &[(&str, &str, bool)]) -> Vec<Vec<SqlValue>> {
        columns
            .iter()
            .enumerate()
            .map(|(i, (name, ty, pk))| {
                vec![
                    SqlValue::from(*name),
                    SqlValue::from(*ty),
                    SqlValue::I32(100),
                    SqlValue::I32(0),
                    SqlValue::I32(0),
                    SqlValue::Bool(!pk),
                    SqlValue::Bool(false),
                    SqlValue::Bool(*pk),
                    SqlValue::I32(i as i32 + 1),
                ]
            })
            .collect()
    }

    fn connections() -> (RecordingConnection, RecordingConnection) {
        let mut source = RecordingConnection::new();
        source.respond(
            "sys.columns",
            catalog(&[("No", "nvarchar", true), ("Name", "nvarchar", false), ("Status", "nvarchar", false)]),
        );
        let mut destination = RecordingConnection::new();
        destination.respond(
            "sys.columns",
            catalog(&[
                ("OrderID", "nvarchar", true),
                ("OrderCustomerName", "nvarchar", false),
                ("OrderShopID", "nvarchar", false),
            ]),
        );
        (source, destination)
    }

    #[tokio::test]
    async fn test_resolves_columns_and_conditions() {
        let mut config = valid_config();
        config.mappings[0].columns.push(ColumnMappingConfig {
            source: None,
            destination: "OrderShopID".into(),
            active: true,
            key: false,
            script: ScriptType::Constant,
            script_value: Some("SHOP1".into()),
        });
        config.mappings[0].conditions.push(ConditionConfig {
            column: "status".into(),
            operator: ConditionOperator::EqualTo,
            value: "Open".into(),
            null: false,
            null_or_empty: false,
        });

        let (mut source, mut destination) = connections();
        let mappings = resolve_mappings(&config, &mut source, &mut destination)
            .await
            .unwrap();

        assert_eq!(mappings.len(), 1);
        let m = &mappings[0];
        assert_eq!(m.id, 1);
        assert_eq!(m.source_table.qualified(), "[erp].[Orders]");
        assert_eq!(m.destination_table.qualified(), "[dbo].[EcomOrders]");
        assert!(m.column_mappings[0].destination.is_primary_key);
        assert!(m.column_mappings[2].source.is_none());
        assert_eq!(m.column_mappings[2].script_literal(), "SHOP1");
        assert_eq!(m.conditions[0].column.name, "Status");
    }

    #[tokio::test]
    async fn test_inactive_mappings_keep_positional_ids() {
        let mut config = valid_config();
        let mut second = config.mappings[0].clone();
        config.mappings[0].active = false;
        second.destination = TableRef {
            schema: None,
            table: "EcomOrders".into(),
        };
        config.mappings.push(second);

        let (mut source, mut destination) = connections();
        let mappings = resolve_mappings(&config, &mut source, &mut destination)
            .await
            .unwrap();
        assert_eq!(mappings.len(), 1);
        assert_eq!(mappings[0].id, 2);
    }

    #[tokio::test]
    async fn test_unknown_destination_column_is_config_error() {
        let mut config = valid_config();
        config.mappings[0].columns[1].destination = "Missing".into();
        let (mut source, mut destination) = connections();
        let err = resolve_mappings(&config, &mut source, &mut destination)
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Config(_)));
        assert!(err.to_string().contains("Missing"));
    }

    #[tokio::test]
    async fn test_profile_computed_source_column_resolves_as_virtual() {
        let mut config = valid_config();
        config.mappings = vec![MappingConfig {
            source: TableRef {
                schema: None,
                table: "EcomAssortmentPermissions".into(),
            },
            ..config.mappings[0].clone()
        }];
        config.mappings[0].columns[1].source = Some("AssortmentPermissionExternalID".into());

        let (mut source, mut destination) = connections();
        let mappings = resolve_mappings(&config, &mut source, &mut destination)
            .await
            .unwrap();
        let computed = mappings[0].column_mappings[1].source.as_ref().unwrap();
        assert!(computed.is_virtual);
        assert_eq!(computed.data_type, "nvarchar");
    }
}
