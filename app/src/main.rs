use clap::Parser;
use qg_config::Config;
use qg_core::telemetry;
use std::process;

/// Instrument a SQLite pool, run a small workload, and print its metrics
#[derive(Parser, Debug)]
#[command(name = "querygauge", version)]
struct Cli {
    /// Workload rounds to run before printing metrics
    #[arg(long, default_value_t = 10)]
    iterations: u32,

    /// Runtime environment; "production" logs JSON
    #[arg(long, default_value = "development")]
    env: String,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    telemetry::init_tracing(&cli.env, "querygauge");
    tracing::info!("querygauge starting");

    // Load configuration - exit with non-zero if invalid
    let config = match Config::load() {
        Ok(config) => {
            tracing::debug!(?config, "Configuration loaded successfully");
            config
        }
        Err(e) => {
            tracing::error!("Failed to load configuration: {}", e);
            process::exit(1);
        }
    };

    tracing::info!(
        namespace = %config.metrics.namespace,
        database = %config.database.name,
        url = %config.database.url,
        "Application configured and ready"
    );

    match app::run(&config, cli.iterations).await {
        Ok(text) => print!("{}", text),
        Err(e) => {
            tracing::error!("Workload failed: {}", e);
            process::exit(1);
        }
    }
}
