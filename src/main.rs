//! Balancer - sweeps user deposits into the admin wallet

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::error;
use tracing_subscriber::EnvFilter;

use tron_balancer::cli::commands;
use tron_balancer::config::Config;

/// Balancer - sweeps user deposits into the admin wallet
#[derive(Parser)]
#[command(name = "balancer")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "balancer.toml", env = "BALANCER_CONFIG")]
    config: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Consume sweep requests until Ctrl-C
    Run,

    /// Resend deferred messages and exit
    Replay,

    /// Queue a sweep for every user address and configured token
    EnqueueAll,

    /// Show current configuration (secrets masked)
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    let config = match Config::load(&cli.config) {
        Ok(cfg) => cfg,
        Err(e) => {
            init_tracing(false);
            error!("Failed to load configuration: {:#}", e);
            std::process::exit(1);
        }
    };

    init_tracing(config.logging.json);

    let result = match cli.command {
        Commands::Run => commands::run(&config).await,
        Commands::Replay => commands::replay(&config).await,
        Commands::EnqueueAll => commands::enqueue_all(&config).await,
        Commands::Config => commands::show_config(&config),
    };

    if let Err(e) = result {
        error!("Command failed: {:#}", e);
        std::process::exit(1);
    }

    Ok(())
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("tron_balancer=info"));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_line_number(true);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}
