mod cli;

use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::Parser;
use serde::Serialize;
use tracing::{error, info};

use relay_ha::cache::MemoryCache;
use relay_ha::channels::LoopbackConnector;
use relay_ha::config::{ProcessEnv, RelayConfig};
use relay_ha::credentials::CredentialFailover;
use relay_ha::logging;
use relay_ha::recovery::package_file_name;
use relay_ha::services::{DisasterRecoveryService, ServiceDeps};

use crate::cli::{Cli, Commands, confirm};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            error!("{e:#}");
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

/// Returns whether the command succeeded.
async fn run(cli: Cli) -> Result<bool> {
    match dotenvy::from_filename(&cli.env_file) {
        Err(e) if !e.not_found() => {
            return Err(e).context(format!("failed to load {}", cli.env_file));
        }
        _ => {}
    }

    let config = RelayConfig::from_env().context("invalid configuration")?;

    // Prompts come before any component starts.
    let approved = match &cli.command {
        Commands::RestoreBackup { package, confirm: false } => {
            confirm(&format!("Restore recovery package {package}? This rewrites configuration."))?
        }
        Commands::Failover { confirm: false } => {
            confirm("Force a failover to the next backup credential?")?
        }
        _ => true,
    };
    if !approved {
        eprintln!("Aborted");
        return Ok(true);
    }

    if matches!(cli.command, Commands::Run) {
        return run_service(config).await;
    }

    logging::init_console_logging(cli.verbose);
    let service = DisasterRecoveryService::initialize(config, deps())
        .await
        .context("failed to initialize")?;
    let outcome = execute(&service, cli.command).await;
    if let Err(e) = service.shutdown().await {
        error!(error = %e, "Shutdown failed");
    }
    outcome
}

fn deps() -> ServiceDeps {
    ServiceDeps {
        connector: Arc::new(LoopbackConnector::new()),
        cache: Arc::new(MemoryCache::new()),
        env: Arc::new(ProcessEnv),
    }
}

async fn run_service(config: RelayConfig) -> Result<bool> {
    let (logging_config, _guard) = logging::init_logging(&config.log_dir)?;

    let service = DisasterRecoveryService::initialize(config, deps())
        .await
        .context("failed to initialize")?;
    logging_config.start_retention_cleanup(service.cancellation_token());
    service.start();
    info!("relay-ha running, press Ctrl-C to stop");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("Shutdown signal received");

    service.shutdown().await?;
    Ok(true)
}

async fn execute(service: &DisasterRecoveryService, command: Commands) -> Result<bool> {
    match command {
        Commands::Run => bail!("run is not a one-shot command"),
        Commands::Status => print_json(&service.get_system_status().await?),
        Commands::HealthCheck => print_json(&service.force_health_check().await?),
        Commands::CreateBackup { save } => {
            let saved = service.create_recovery_package().await?;
            if save {
                let path = Path::new(".").join(package_file_name(&saved.package.package_id));
                tokio::fs::write(&path, saved.package.to_pretty_json()?)
                    .await
                    .with_context(|| format!("failed to write {}", path.display()))?;
                eprintln!("Saved {}", path.display());
            }
            print_json(&saved)
        }
        Commands::RestoreBackup { package, .. } => {
            let package = service.load_recovery_package(&package).await?;
            let report = service.execute_recovery(&package).await?;
            print_json(&report)?;
            if !report.success {
                eprintln!("Recovery failed: {}", report.errors.join("; "));
            }
            Ok(report.success)
        }
        Commands::Failover { .. } => {
            let outcome = service.trigger_credential_failover().await?;
            print_json(&outcome)?;
            match outcome {
                CredentialFailover::Exhausted { reason, .. } => {
                    eprintln!("Failover failed: {reason}");
                    Ok(false)
                }
                _ => Ok(true),
            }
        }
        Commands::SyncPermissions => {
            let report = service.sync_channel_permissions().await?;
            print_json(&report)?;
            Ok(report.failed_tokens == 0)
        }
        Commands::Events { hours } => print_json(&service.get_recent_events(hours).await?),
        Commands::Metrics => print_json(&service.get_performance_metrics().await?),
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<bool> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(true)
}
