//! # EMP Edge CLI
//!
//! 命令行接口入口点。
//!
//! 提供：
//! - 配置加载、覆盖与验证
//! - 边缘服务编排与生命周期管理
//! - 优雅关闭处理

mod cli;
mod commands;
mod runtime;

use std::net::SocketAddr;

use anyhow::Result;
use clap::Parser;
use tracing::{info, Level};

use cli::{Cli, Commands};
use commands::{run_edge, run_validate};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    init_logging(&cli)?;

    info!(version = env!("CARGO_PKG_VERSION"), "EMP edge starting");

    let result = match &cli.command {
        Commands::Run(args) => run_edge(args).await,
        Commands::Validate(args) => run_validate(args),
    };

    if let Err(ref e) = result {
        tracing::error!(error = %e, "Command failed");
    }

    result
}

/// Tracing for every command; the Prometheus exporter only for `run`
fn init_logging(cli: &Cli) -> Result<()> {
    let edge_level = if cli.quiet {
        Level::WARN
    } else {
        match cli.verbose {
            0 => Level::INFO,
            1 => Level::DEBUG,
            _ => Level::TRACE,
        }
    };

    let metrics_addr = match &cli.command {
        Commands::Run(args) if args.metrics_port != 0 && !args.dry_run => {
            Some(SocketAddr::from(([0, 0, 0, 0], args.metrics_port)))
        }
        _ => None,
    };

    observability::init_with_config(observability::ObservabilityConfig {
        log_format: cli.log_format.into(),
        metrics_addr,
        edge_level,
    })
}
