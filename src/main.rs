use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::{error, info};

use mqtt_ingest::config::{load_config, load_config_from};
use mqtt_ingest::session::SessionManager;
use mqtt_ingest::transport;
use mqtt_ingest::utils::logging;

#[derive(Parser)]
#[command(name = "mqtt-ingest", version, about = "Supervised multi-session MQTT ingestion")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP control surface until Ctrl-C.
    Serve {
        /// Settings file, without extension (defaults to config/default).
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    match cli.command {
        Command::Serve { config } => serve(config).await,
    }
}

async fn serve(config: Option<PathBuf>) -> ExitCode {
    let loaded = match &config {
        Some(path) => load_config_from(&path.to_string_lossy()),
        None => load_config(),
    };
    let settings = match loaded {
        Ok(settings) => settings,
        Err(err) => {
            eprintln!("Failed to load configuration: {err}");
            return ExitCode::FAILURE;
        }
    };
    logging::init(&settings.log.level);

    let manager = Arc::new(SessionManager::new(settings.ingest.clone()));
    let shutdown = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(error = %err, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    let result = transport::serve(&settings.server, Arc::clone(&manager), shutdown).await;
    manager.shutdown().await;

    match result {
        Ok(()) => {
            info!("Shut down cleanly");
            ExitCode::SUCCESS
        }
        Err(err) => {
            error!(error = %err, "Control surface failed");
            ExitCode::FAILURE
        }
    }
}
