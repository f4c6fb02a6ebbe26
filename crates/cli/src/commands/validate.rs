//! `validate` command implementation.

use anyhow::{Context, Result};
use contracts::{EdgeConfig, SinkType};
use serde::Serialize;
use tracing::info;

use crate::cli::ValidateArgs;

/// Validation result for JSON output
#[derive(Serialize)]
struct ValidationResult {
    valid: bool,
    config_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    warnings: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    summary: Option<ConfigSummary>,
}

#[derive(Serialize)]
struct ConfigSummary {
    listen: String,
    expected_clients: usize,
    primary_vehicle_id: u32,
    partition_algorithm: u8,
    worker_threads: usize,
    merge_buffer_floats: usize,
    sink_count: usize,
}

/// Execute the `validate` command
pub fn run_validate(args: &ValidateArgs) -> Result<()> {
    info!(config = %args.config.display(), "Validating configuration");

    let result = validate_config(args);

    if args.json {
        let json = serde_json::to_string_pretty(&result)
            .context("Failed to serialize validation result")?;
        println!("{json}");
    } else {
        print_validation_result(&result);
    }

    if result.valid {
        Ok(())
    } else {
        anyhow::bail!("Configuration validation failed")
    }
}

fn validate_config(args: &ValidateArgs) -> ValidationResult {
    let config_path = args.config.display().to_string();

    if !args.config.exists() {
        return ValidationResult {
            valid: false,
            config_path,
            error: Some(format!("File not found: {}", args.config.display())),
            warnings: None,
            summary: None,
        };
    }

    match config_loader::ConfigLoader::load_from_path(&args.config) {
        Ok(config) => {
            let warnings = collect_warnings(&config);
            ValidationResult {
                valid: true,
                config_path,
                error: None,
                warnings: (!warnings.is_empty()).then_some(warnings),
                summary: Some(ConfigSummary {
                    listen: format!("{}:{}", config.server.host, config.server.port),
                    expected_clients: config.server.expected_clients,
                    primary_vehicle_id: config.coordinator.primary_vehicle_id,
                    partition_algorithm: config.coordinator.partition_algorithm,
                    worker_threads: config.pipeline.worker_threads,
                    merge_buffer_floats: config.merge_buffer_capacity(),
                    sink_count: config.sinks.len(),
                }),
            }
        }
        Err(e) => ValidationResult {
            valid: false,
            config_path,
            error: Some(e.to_string()),
            warnings: None,
            summary: None,
        },
    }
}

/// Non-fatal issues
fn collect_warnings(config: &EdgeConfig) -> Vec<String> {
    let mut warnings = Vec::new();

    if config.sinks.is_empty() {
        warnings.push("No sinks configured - merged frames will be dropped".to_string());
    }
    if !config.sinks.iter().any(|s| s.sink_type == SinkType::File) {
        warnings.push("No file sink - merged frames are not persisted".to_string());
    }
    if config.server.expected_clients > 1 && config.coordinator.partition_algorithm >= 3 {
        warnings.push(
            "Bandwidth-based partitioning starts from fallback estimates until data flows"
                .to_string(),
        );
    }

    warnings
}

fn print_validation_result(result: &ValidationResult) {
    if result.valid {
        println!("✓ Configuration is valid: {}", result.config_path);

        if let Some(ref summary) = result.summary {
            println!("\n  Listen: {}", summary.listen);
            println!("  Expected clients: {}", summary.expected_clients);
            println!("  Primary vehicle: {}", summary.primary_vehicle_id);
            println!("  Partition algorithm: {}", summary.partition_algorithm);
            println!("  Workers: {}", summary.worker_threads);
            println!("  Merge buffer: {} floats", summary.merge_buffer_floats);
            println!("  Sinks: {}", summary.sink_count);
        }

        if let Some(ref warnings) = result.warnings {
            println!("\n⚠ Warnings:");
            for warning in warnings {
                println!("  - {warning}");
            }
        }
    } else {
        println!("✗ Configuration is invalid: {}", result.config_path);
        if let Some(ref error) = result.error {
            println!("\n  Error: {error}");
        }
    }
}
