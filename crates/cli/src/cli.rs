//! CLI argument definitions using clap.

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// EMP Edge - multi-vehicle point-cloud coordinator
#[derive(Parser, Debug)]
#[command(
    name = "emp-edge",
    author,
    version,
    about = "Edge coordinator for cooperative multi-vehicle LiDAR perception",
    long_about = "Accepts point-cloud and pose streams from connected vehicles, merges them\n\
                  into the primary vehicle's frame, decides when each frame is complete \n\
                  and pushes partition decisions back to the fleet."
)]
pub struct Cli {
    /// Increase logging verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true, env = "EMP_EDGE_VERBOSE")]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Log output format
    #[arg(
        long,
        value_enum,
        default_value = "pretty",
        global = true,
        env = "EMP_EDGE_LOG_FORMAT"
    )]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the edge coordinator
    Run(RunArgs),

    /// Validate configuration file without running
    Validate(ValidateArgs),
}

/// Arguments for the `run` command
#[derive(Parser, Debug, Clone)]
pub struct RunArgs {
    /// Configuration file (TOML or JSON); built-in defaults when omitted
    #[arg(long, env = "EMP_EDGE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Listen port
    #[arg(short, long, env = "EMP_EDGE_PORT")]
    pub port: Option<u16>,

    /// Task pipeline worker threads
    #[arg(short, long, env = "EMP_EDGE_THREADS")]
    pub threads: Option<usize>,

    /// Vehicles to wait for before broadcasting start
    #[arg(short = 'c', long, env = "EMP_EDGE_CLIENTS")]
    pub clients: Option<usize>,

    /// Partition algorithm (1/2 basic, 3 bandwidth-weighted, 4 adaptive)
    #[arg(short, long, env = "EMP_EDGE_ALGORITHM")]
    pub algorithm: Option<u8>,

    /// Write merged frames under this directory
    #[arg(short, long, env = "EMP_EDGE_SAVE_PATH")]
    pub save_path: Option<PathBuf>,

    /// Metrics server port (0 = disabled)
    #[arg(long, default_value = "9100", env = "EMP_EDGE_METRICS_PORT")]
    pub metrics_port: u16,

    /// Validate configuration and exit without serving
    #[arg(long)]
    pub dry_run: bool,
}

/// Arguments for the `validate` command
#[derive(Parser, Debug)]
pub struct ValidateArgs {
    /// Path to configuration file to validate
    #[arg(long, default_value = "config.toml")]
    pub config: PathBuf,

    /// Output validation result as JSON
    #[arg(long)]
    pub json: bool,
}

/// Log output format
#[derive(ValueEnum, Clone, Copy, Debug, Default)]
pub enum LogFormat {
    /// JSON structured logging
    Json,
    /// Human-readable pretty format
    #[default]
    Pretty,
    /// Compact single-line format
    Compact,
}

impl From<LogFormat> for observability::LogFormat {
    fn from(format: LogFormat) -> Self {
        match format {
            LogFormat::Json => Self::Json,
            LogFormat::Pretty => Self::Pretty,
            LogFormat::Compact => Self::Compact,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_flags_parse() {
        let cli = Cli::try_parse_from([
            "emp-edge", "-v", "run", "-p", "4000", "-t", "8", "-c", "3", "-a", "4", "-s", "/tmp/out",
        ])
        .unwrap();
        assert_eq!(cli.verbose, 1);
        let Commands::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(args.port, Some(4000));
        assert_eq!(args.threads, Some(8));
        assert_eq!(args.clients, Some(3));
        assert_eq!(args.algorithm, Some(4));
        assert_eq!(args.save_path, Some(PathBuf::from("/tmp/out")));
    }

    #[test]
    fn test_quiet_conflicts_with_verbose() {
        assert!(Cli::try_parse_from(["emp-edge", "-q", "-v", "validate"]).is_err());
    }
}
