//! Configuration loading and validation.

mod resolve;
mod types;
mod validation;

pub use resolve::resolve_mappings;
pub use types::*;

use crate::error::Result;
use std::path::Path;

impl Config {
    /// Load configuration from a YAML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        validation::validate(self)
    }

    /// Suspicious but legal settings worth reporting.
    pub fn warnings(&self) -> Vec<String> {
        validation::warnings(self)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::core::mapping::{ConditionOperator, ScriptType};
    use crate::core::traits::MergeMode;
    use crate::error::SyncError;

    fn connection(host: &str, database: &str) -> ConnectionConfig {
        ConnectionConfig {
            host: host.to_string(),
            port: 1433,
            database: database.to_string(),
            user: "sync".to_string(),
            password: "secret".to_string(),
            schema: "dbo".to_string(),
            encrypt: false,
            trust_server_cert: false,
            command_timeout_secs: None,
            max_connections: 4,
        }
    }

    fn column(source: &str, destination: &str) -> ColumnMappingConfig {
        ColumnMappingConfig {
            source: Some(source.to_string()),
            destination: destination.to_string(),
            active: true,
            key: false,
            script: ScriptType::None,
            script_value: None,
        }
    }

    pub fn valid_config() -> Config {
        Config {
            source: connection("erp-db", "Erp"),
            destination: connection("shop-db", "Shop"),
            job: JobConfig::default(),
            mappings: vec![MappingConfig {
                source: TableRef {
                    schema: Some("erp".to_string()),
                    table: "Orders".to_string(),
                },
                destination: TableRef {
                    schema: None,
                    table: "EcomOrders".to_string(),
                },
                active: true,
                options: Default::default(),
                prune_conditions: None,
                columns: vec![column("No", "OrderID"), column("Name", "OrderCustomerName")],
                conditions: Vec::new(),
            }],
        }
    }

    const YAML: &str = r#"
source:
  host: erp-db
  database: Erp
  user: reader
  password: hunter2
  schema: erp
destination:
  host: shop-db
  database: Shop
  user: writer
  command_timeout_secs: 0
job:
  prune_missing: true
  merge_mode: insert_only
  batch_size: 500
mappings:
  - source: { table: Orders }
    destination: { schema: dbo, table: EcomOrders }
    options:
      discard-duplicates: true
    columns:
      - { source: No, destination: OrderID, key: true }
      - { source: Name, destination: OrderCustomerName }
      - { destination: OrderShopID, script: constant, script_value: SHOP1 }
    conditions:
      - { column: Status, operator: equal_to, value: Open }
      - { column: Deleted, operator: different_from, null: true }
      - { column: Region, operator: somewhere_in }
"#;

    #[test]
    fn test_from_yaml_applies_defaults() {
        let config = Config::from_yaml(YAML).unwrap();
        assert_eq!(config.source.port, 1433);
        assert_eq!(config.destination.schema, "dbo");
        assert_eq!(config.source.max_connections, 4);
        assert_eq!(config.job.batch_size, 500);
        assert_eq!(config.job.merge_mode, MergeMode::InsertOnly);
        assert!(config.job.prune_missing);
        assert!(!config.job.skip_failing_rows);
        assert_eq!(config.job.staging_suffix, "TempTableForSqlProviderImport");

        let mapping = &config.mappings[0];
        assert!(mapping.active);
        assert_eq!(mapping.source.schema_or(&config.source.schema), "erp");
        assert_eq!(mapping.options.get("discard-duplicates"), Some(&true));
        assert!(mapping.columns[0].key);
        assert_eq!(mapping.columns[2].script, ScriptType::Constant);
        assert_eq!(mapping.conditions[1].operator, ConditionOperator::DifferentFrom);
        assert!(mapping.conditions[1].null);
        assert_eq!(mapping.conditions[2].operator, ConditionOperator::Unrecognized);
    }

    #[test]
    fn test_timeouts() {
        let config = Config::from_yaml(YAML).unwrap();
        assert_eq!(config.source.source_timeout(), None);
        assert_eq!(
            config.source.destination_timeout(),
            Some(std::time::Duration::from_secs(1200))
        );
        assert_eq!(config.destination.destination_timeout(), None);
    }

    #[test]
    fn test_unknown_operator_is_a_warning() {
        let config = Config::from_yaml(YAML).unwrap();
        let warnings = config.warnings();
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("Region"));
    }

    #[test]
    fn test_invalid_yaml_is_yaml_error() {
        let err = Config::from_yaml("source: [").unwrap_err();
        assert!(matches!(err, SyncError::Yaml(_)));
        assert_eq!(err.exit_code(), 1);
    }

    #[test]
    fn test_missing_mappings_fails_validation() {
        let yaml = YAML.split("mappings:").next().unwrap();
        let err = Config::from_yaml(yaml).unwrap_err();
        assert!(matches!(err, SyncError::Config(_)));
    }

    #[test]
    fn test_load_missing_file_is_io_error() {
        let err = Config::load("/nonexistent/job.yaml").unwrap_err();
        assert!(matches!(err, SyncError::Io(_)));
    }
}
