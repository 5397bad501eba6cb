//! Historical pattern backtest engine - main entry point
//!
//! This binary provides three subcommands:
//! - serve: Run the HTTP API
//! - backtest: Run one backtest variant from the command line
//! - download: Download historical candles to CSV

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod commands;

#[derive(Parser, Debug)]
#[command(name = "pattern-backtest")]
#[command(about = "Intraday pattern backtesting with an HTTP API and live signal generation", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the HTTP API server
    Serve {
        /// Path to configuration file
        #[arg(short, long)]
        config: Option<String>,

        /// State database path
        #[arg(long, default_value = "state.db")]
        state_db: String,

        /// Listen port (overrides config file)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Run one backtest variant
    Backtest {
        /// Path to configuration file
        #[arg(short, long)]
        config: Option<String>,

        /// Variant to run (patterns, regimes, short, scalp)
        #[arg(short, long, default_value = "patterns")]
        variant: String,

        /// Days of 5-minute history to fetch
        #[arg(short, long, default_value = "30")]
        days: u32,

        /// Run offline from a CSV file instead of fetching
        #[arg(long)]
        data_file: Option<String>,
    },

    /// Download historical candles to CSV
    Download {
        /// Path to configuration file
        #[arg(short, long)]
        config: Option<String>,

        /// Symbol to download (defaults to the configured primary)
        #[arg(short, long)]
        symbol: Option<String>,

        /// Days of history to fetch
        #[arg(short, long, default_value = "30")]
        days: u32,

        /// Output CSV path
        #[arg(short, long, default_value = "data/candles.csv")]
        output: String,
    },
}

fn setup_logging(verbose: bool, command_name: &str) -> Result<()> {
    std::fs::create_dir_all("logs")?;

    let log_filename = format!(
        "{}_{}.log",
        command_name,
        chrono::Local::now().format("%Y-%m-%d_%H-%M-%S")
    );
    let log_path = PathBuf::from("logs").join(&log_filename);

    // Filter out noisy external crates
    let level = if verbose { "debug" } else { "info" };
    let filter_str = format!(
        "{},hyper=warn,hyper_util=warn,reqwest=warn,rustls=warn,h2=warn",
        level
    );
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&filter_str));

    let file_appender = tracing_appender::rolling::never("logs", &log_filename);

    let console_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_line_number(true)
        .with_file(true)
        .with_ansi(true);

    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(file_appender)
        .with_target(true)
        .with_line_number(true)
        .with_file(true)
        .with_ansi(false);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .init();

    info!("Logging initialized");
    info!("Log file: {}", log_path.display());

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    let cli = Cli::parse();

    let command_name = match &cli.command {
        Commands::Serve { .. } => "serve",
        Commands::Backtest { .. } => "backtest",
        Commands::Download { .. } => "download",
    };

    setup_logging(cli.verbose, command_name)?;

    match cli.command {
        Commands::Serve {
            config,
            state_db,
            port,
        } => commands::serve::run(config, state_db, port).await,

        Commands::Backtest {
            config,
            variant,
            days,
            data_file,
        } => commands::backtest::run(config, variant, days, data_file).await,

        Commands::Download {
            config,
            symbol,
            days,
            output,
        } => commands::download::run(config, symbol, days, output).await,
    }
}
