//! mssql-table-sync CLI - stage-and-merge table synchronization for SQL Server.

use clap::{Parser, Subcommand};
use mssql_table_sync::{Config, SyncError, Synchronizer};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{info, warn, Level};
use tracing_subscriber::fmt::format::FmtSpan;

#[derive(Parser)]
#[command(name = "mssql-table-sync")]
#[command(about = "Synchronize SQL Server tables through staged merges")]
#[command(version)]
struct Cli {
    /// Path to YAML job file
    #[arg(short, long, default_value = "job.yaml")]
    config: PathBuf,

    /// Output JSON result to stdout
    #[arg(long)]
    output_json: bool,

    /// Log format: text or json
    #[arg(long, default_value = "text")]
    log_format: String,

    /// Log verbosity: debug, info, warn, error
    #[arg(long, default_value = "info")]
    verbosity: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the job: stage, merge and prune every mapping
    Run,

    /// Show the dependency order and source queries without writing
    Plan,

    /// Check the job file without connecting
    Validate,

    /// Test database connections
    HealthCheck,
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", e.format_detailed());
            ExitCode::from(e.exit_code())
        }
    }
}

async fn run() -> Result<(), SyncError> {
    let cli = Cli::parse();

    setup_logging(&cli.verbosity, &cli.log_format);

    let config = Config::load(&cli.config)?;
    info!("Loaded configuration from {:?}", cli.config);
    for warning in config.warnings() {
        warn!("{}", warning);
    }

    match cli.command {
        Commands::Validate => {
            if cli.output_json {
                println!(
                    "{}",
                    serde_json::json!({ "valid": true, "warnings": config.warnings() })
                );
            } else {
                println!("Configuration is valid");
                println!("  Mappings: {}", config.mappings.len());
                for warning in config.warnings() {
                    println!("  Warning: {}", warning);
                }
            }
        }

        Commands::Run => {
            let sync = Synchronizer::new(config).await?;
            let result = sync.run().await?;

            if cli.output_json {
                println!("{}", result.to_json()?);
            } else {
                let status_msg = if result.is_success() {
                    "Synchronization completed!"
                } else {
                    "Synchronization failed!"
                };
                println!("\n{}", status_msg);
                println!("  Run ID: {}", result.run_id);
                println!("  Duration: {:.2}s", result.duration_seconds);
                for m in &result.mappings {
                    println!(
                        "  {} -> {}: staged {}, merged {}, pruned {}, skipped {}, duplicates {}, filtered {}",
                        m.source,
                        m.destination,
                        m.stats.staged,
                        m.stats.merged,
                        m.stats.pruned,
                        m.stats.skipped,
                        m.stats.duplicates,
                        m.stats.filtered
                    );
                }
            }
            result.into_result()?;
        }

        Commands::Plan => {
            let sync = Synchronizer::new(config).await?;
            let plan = sync.plan().await?;

            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&plan)?);
            } else {
                println!("Execution order:");
                for (i, m) in plan.mappings.iter().enumerate() {
                    println!("  {}. {} -> {}", i + 1, m.source, m.destination);
                    println!("     Key: {}", m.key_columns.join(", "));
                    println!("     Prune missing: {}", m.prune_missing);
                    println!("     Query: {}", m.source_query);
                }
            }
        }

        Commands::HealthCheck => {
            let sync = Synchronizer::new(config).await?;
            let result = sync.health_check().await;

            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                println!("Health Check Results:");
                println!(
                    "  Source: {} ({}ms)",
                    if result.source_connected { "OK" } else { "FAILED" },
                    result.source_latency_ms
                );
                if let Some(ref err) = result.source_error {
                    println!("    Error: {}", err);
                }
                println!(
                    "  Destination: {} ({}ms)",
                    if result.destination_connected { "OK" } else { "FAILED" },
                    result.destination_latency_ms
                );
                if let Some(ref err) = result.destination_error {
                    println!("    Error: {}", err);
                }
                println!(
                    "\n  Overall: {}",
                    if result.healthy { "HEALTHY" } else { "UNHEALTHY" }
                );
            }

            if !result.healthy {
                return Err(SyncError::pool("health check failed", "health-check"));
            }
        }
    }

    Ok(())
}

fn setup_logging(verbosity: &str, format: &str) {
    let level = match verbosity.to_lowercase().as_str() {
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_span_events(FmtSpan::CLOSE)
        .with_target(false)
        .with_writer(std::io::stderr);

    if format == "json" {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}
