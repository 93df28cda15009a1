//! # Cache Session Configuration Validator
//!
//! Command-line tool that loads a session configuration the same way the
//! library does and prints the effective result.

use cache_session::config::ConfigManager;
use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use std::process;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

#[derive(Parser)]
#[command(name = "cache-session-config")]
#[command(about = "Validate cache session configuration files")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    /// Configuration file (TOML or YAML); defaults to ./cache-session.* if present
    #[arg(short, long)]
    file: Option<PathBuf>,

    /// Verbose output level (use multiple times for more verbosity)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Table)]
    format: OutputFormat,
}

fn main() {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };
    let _subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .try_init();

    match run(&cli) {
        Ok(()) => {
            info!("Configuration validation completed successfully");
            process::exit(0);
        }
        Err(e) => {
            error!("Configuration validation failed: {}", e);
            eprintln!("Configuration invalid: {e}");
            process::exit(1);
        }
    }
}

fn run(cli: &Cli) -> anyhow::Result<()> {
    let manager = match &cli.file {
        Some(path) => ConfigManager::load_from_file(path)?,
        None => ConfigManager::load()?,
    };

    match cli.format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&manager.debug_config())?);
        }
        OutputFormat::Table => {
            let config = manager.config();
            println!("Cache session configuration ({})", manager.environment());
            if let Some(path) = manager.source_file() {
                println!("  source file:             {}", path.display());
            }
            println!("  cache_id:                {}", config.cache_id);
            println!("  exceptions_enabled:      {}", config.exceptions_enabled);
            println!("  request_timeout_ms:      {}", config.request_timeout_ms);
            println!("  enumeration.chunk_size:  {}", config.enumeration.chunk_size);
            println!(
                "  locking.default_lock_timeout_ms: {}",
                config.locking.default_lock_timeout_ms
            );
            println!(
                "  registry.max_tokens_per_category: {}",
                config.registry.max_tokens_per_category
            );
            println!(
                "  async_operations:        {} workers, queue {}",
                config.async_operations.worker_threads, config.async_operations.queue_capacity
            );
            println!("Configuration is valid");
        }
    }
    Ok(())
}
