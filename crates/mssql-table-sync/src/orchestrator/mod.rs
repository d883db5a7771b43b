//! Job orchestration: connects the configured databases, resolves the
//! mappings and hands them to the [`JobRunner`].

mod runner;

pub use runner::{JobResult, JobRunner, JobSettings, JobStatus, MappingResult};

use serde::Serialize;
use tracing::info;

use crate::config::{resolve_mappings, Config};
use crate::core::mapping::{Mapping, OPTION_PRUNE_MISSING};
use crate::drivers::mssql::{MssqlConnection, MssqlPool};
use crate::error::Result;
use crate::ordering::order_mappings;
use crate::source::{MssqlSourceFactory, SourceQueryBuilder};

/// One mapping as it would run.
#[derive(Debug, Clone, Serialize)]
pub struct PlannedMapping {
    pub id: usize,
    pub source: String,
    pub destination: String,
    pub source_query: String,
    /// Destination columns rows are matched on.
    pub key_columns: Vec<String>,
    pub prune_missing: bool,
}

/// Mappings in dependency order.
#[derive(Debug, Clone, Serialize)]
pub struct JobPlan {
    pub mappings: Vec<PlannedMapping>,
}

/// Connectivity of both databases.
#[derive(Debug, Clone, Serialize)]
pub struct HealthCheckResult {
    pub healthy: bool,
    pub source_connected: bool,
    pub source_latency_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_error: Option<String>,
    pub destination_connected: bool,
    pub destination_latency_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub destination_error: Option<String>,
}

/// Owns the connection pools for one configuration.
pub struct Synchronizer {
    config: Config,
    source: MssqlPool,
    destination: MssqlPool,
}

impl Synchronizer {
    /// Connect both pools.
    pub async fn new(config: Config) -> Result<Self> {
        let source = MssqlPool::connect(&config.source, config.source.source_timeout(), "source").await?;
        let destination = MssqlPool::connect(
            &config.destination,
            config.destination.destination_timeout(),
            "destination",
        )
        .await?;
        Ok(Self {
            config,
            source,
            destination,
        })
    }

    async fn resolve(&self, destination: &mut MssqlConnection) -> Result<Vec<Mapping>> {
        let mut source = self.source.connection().await?;
        resolve_mappings(&self.config, &mut source, destination).await
    }

    /// Run the job once.
    pub async fn run(&self) -> Result<JobResult> {
        let mut destination = self.destination.connection().await?;
        let mappings = self.resolve(&mut destination).await?;
        info!("Resolved {} mappings", mappings.len());

        let factory = MssqlSourceFactory::new(self.source.clone());
        let runner = JobRunner::new(JobSettings::from_config(&self.config));
        Ok(runner.run(mappings, &mut destination, &factory).await)
    }

    /// Resolve and order the mappings without writing anything.
    pub async fn plan(&self) -> Result<JobPlan> {
        let mut destination = self.destination.connection().await?;
        let mappings = self.resolve(&mut destination).await?;
        let ordered = order_mappings(&mut destination, mappings).await?;

        let mappings = ordered
            .iter()
            .map(|m| {
                Ok(PlannedMapping {
                    id: m.id,
                    source: m.source_table.full_name(),
                    destination: m.destination_table.full_name(),
                    source_query: SourceQueryBuilder::new(m).build()?.sql,
                    key_columns: m
                        .key_columns()
                        .iter()
                        .map(|cm| cm.destination_name().to_string())
                        .collect(),
                    prune_missing: self.config.job.prune_destination_tables_only
                        || m.option_or(OPTION_PRUNE_MISSING, self.config.job.prune_missing),
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(JobPlan { mappings })
    }

    /// Round trip both pools.
    pub async fn health_check(&self) -> HealthCheckResult {
        let source = self.source.ping().await;
        let destination = self.destination.ping().await;

        let latency = |r: &Result<std::time::Duration>| {
            r.as_ref().map(|d| d.as_millis() as u64).unwrap_or(0)
        };
        HealthCheckResult {
            healthy: source.is_ok() && destination.is_ok(),
            source_connected: source.is_ok(),
            source_latency_ms: latency(&source),
            source_error: source.as_ref().err().map(|e| e.to_string()),
            destination_connected: destination.is_ok(),
            destination_latency_ms: latency(&destination),
            destination_error: destination.as_ref().err().map(|e| e.to_string()),
        }
    }
}
