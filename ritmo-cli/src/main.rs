//! Ritmo CLI: run and configure training loops from the terminal.

mod commands;
mod demo;
mod persistence;

use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Ritmo: composable training loops
#[derive(Parser, Debug)]
#[command(name = "ritmo", version, about, long_about = None)]
struct Cli {
    /// Workspace directory
    #[arg(short, long, default_value = ".")]
    workspace: PathBuf,

    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Increase verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long)]
    quiet: bool,

    /// Also write JSON logs to daily files in this directory
    #[arg(long)]
    log_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Train a linear model on synthetic data
    Run(RunArgs),
    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(clap::Args, Debug, Clone)]
struct RunArgs {
    /// Stop after this many steps, overriding the configured stop condition
    #[arg(long)]
    steps: Option<u64>,

    /// Seed for the synthetic dataset
    #[arg(long, default_value_t = 42)]
    seed: u64,

    /// Number of input features
    #[arg(long, default_value_t = 4)]
    features: usize,

    /// Number of training samples per epoch
    #[arg(long, default_value_t = 2048)]
    train_samples: usize,

    #[arg(long, default_value_t = 32)]
    batch_size: usize,

    /// Half-width of the uniform label noise
    #[arg(long, default_value_t = 0.1)]
    noise: f64,

    /// SGD learning rate
    #[arg(long = "lr", default_value_t = 0.05)]
    learning_rate: f64,

    /// Write the full history as JSON to this path
    #[arg(long)]
    history_out: Option<PathBuf>,
}

#[derive(clap::Subcommand, Debug)]
enum ConfigAction {
    /// Create default configuration file
    Init,
    /// Show current configuration
    Show,
}

fn main() -> anyhow::Result<()> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 if cli.quiet => "error",
        0 => "info",
        1 => "debug",
        _ => "trace",
    };

    // Human-readable layer for stderr (always active)
    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::new(filter));

    // JSON file layer for structured logging
    let (json_layer, _guard) = match &cli.log_dir {
        Some(log_dir) => {
            std::fs::create_dir_all(log_dir)?;
            let file_appender = tracing_appender::rolling::daily(log_dir, "ritmo.log");
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
            let layer = tracing_subscriber::fmt::layer()
                .json()
                .with_writer(non_blocking)
                .with_filter(EnvFilter::new("debug"));
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    // Resolve workspace
    let workspace = cli
        .workspace
        .canonicalize()
        .unwrap_or_else(|_| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));

    commands::handle_command(cli.command, &workspace, cli.config.as_deref())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_run_defaults() {
        let cli = Cli::try_parse_from(["ritmo", "run"]).unwrap();
        let Commands::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(args.seed, 42);
        assert_eq!(args.batch_size, 32);
        assert!(args.steps.is_none());
        assert_eq!(cli.verbose, 0);
    }

    #[test]
    fn test_parse_run_overrides() {
        let cli = Cli::try_parse_from([
            "ritmo",
            "-vv",
            "--log-dir",
            "/tmp/ritmo-logs",
            "run",
            "--steps",
            "500",
            "--lr",
            "0.2",
            "--history-out",
            "out/history.json",
        ])
        .unwrap();
        assert_eq!(cli.verbose, 2);
        assert_eq!(cli.log_dir, Some(PathBuf::from("/tmp/ritmo-logs")));
        let Commands::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(args.steps, Some(500));
        assert_eq!(args.learning_rate, 0.2);
        assert_eq!(args.history_out, Some(PathBuf::from("out/history.json")));
    }

    #[test]
    fn test_parse_config_show() {
        let cli = Cli::try_parse_from(["ritmo", "--config", "run.toml", "config", "show"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Config {
                action: ConfigAction::Show
            }
        ));
        assert_eq!(cli.config, Some(PathBuf::from("run.toml")));
    }

    #[test]
    fn test_subcommand_is_required() {
        assert!(Cli::try_parse_from(["ritmo"]).is_err());
    }
}
