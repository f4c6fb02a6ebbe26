//! `run` command implementation.

use std::collections::HashMap;

use anyhow::{Context, Result};
use contracts::{EdgeConfig, SinkConfig, SinkType};
use tracing::{info, warn};

use crate::cli::RunArgs;
use crate::runtime::EdgeRuntime;

/// Name of the file sink added by `--save-path`
const SAVE_PATH_SINK: &str = "save-path";

/// Execute the `run` command
pub async fn run_edge(args: &RunArgs) -> Result<()> {
    let mut config = match &args.config {
        Some(path) => {
            info!(config = %path.display(), "Loading configuration");
            config_loader::ConfigLoader::load_from_path(path)
                .with_context(|| format!("Failed to load config from {}", path.display()))?
        }
        None => EdgeConfig::default(),
    };

    apply_overrides(&mut config, args);
    config_loader::ConfigLoader::validate(&config).context("Invalid configuration")?;

    info!(
        host = %config.server.host,
        port = config.server.port,
        expected_clients = config.server.expected_clients,
        primary = config.coordinator.primary_vehicle_id,
        algorithm = config.coordinator.partition_algorithm,
        sinks = config.sinks.len(),
        "Configuration loaded"
    );

    if args.dry_run {
        info!("Dry run mode - configuration is valid, exiting");
        print_config_summary(&config);
        return Ok(());
    }

    let runtime = EdgeRuntime::start(config).await?;

    shutdown_signal().await?;
    warn!("Received shutdown signal, stopping edge...");

    let stats = runtime.shutdown().await?;
    stats.print_summary();

    info!("EMP edge finished");
    Ok(())
}

/// CLI flags win over the file
fn apply_overrides(config: &mut EdgeConfig, args: &RunArgs) {
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(threads) = args.threads {
        config.pipeline.worker_threads = threads;
    }
    if let Some(clients) = args.clients {
        config.server.expected_clients = clients;
    }
    if let Some(algorithm) = args.algorithm {
        config.coordinator.partition_algorithm = algorithm;
    }
    if let Some(path) = &args.save_path {
        config.sinks.retain(|s| s.name != SAVE_PATH_SINK);
        config.sinks.push(SinkConfig {
            name: SAVE_PATH_SINK.to_string(),
            sink_type: SinkType::File,
            queue_capacity: 16,
            params: HashMap::from([(
                "path".to_string(),
                path.to_string_lossy().into_owned(),
            )]),
        });
    }
}

/// Ctrl+C or SIGTERM
async fn shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut terminate =
            signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;
        tokio::select! {
            result = tokio::signal::ctrl_c() => result.context("Failed to listen for Ctrl+C")?,
            _ = terminate.recv() => {}
        }
    }

    #[cfg(not(unix))]
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl+C")?;

    Ok(())
}

fn print_config_summary(config: &EdgeConfig) {
    println!("\n=== Configuration Summary ===\n");
    println!("Server:");
    println!("  Listen: {}:{}", config.server.host, config.server.port);
    println!("  Expected clients: {}", config.server.expected_clients);
    println!("  Max connections: {}", config.server.max_connections);
    println!("\nCoordinator:");
    println!("  Primary vehicle: {}", config.coordinator.primary_vehicle_id);
    println!("  Partition algorithm: {}", config.coordinator.partition_algorithm);
    println!("  Completion quota: {}", config.coordinator.completion_quota);
    println!("  Merge buffer: {} floats", config.merge_buffer_capacity());
    println!("\nPipeline workers: {}", config.pipeline.worker_threads);

    if !config.sinks.is_empty() {
        println!("\nSinks ({}):", config.sinks.len());
        for sink in &config.sinks {
            println!("  - {} ({:?})", sink.name, sink.sink_type);
        }
    }
    println!();
}
