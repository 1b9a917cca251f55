//! gitpulse CLI entry point

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};

use gitpulse::config::Config;
use gitpulse::export::JsonLineConsumer;
use gitpulse::server::Receiver;

#[derive(Parser)]
#[command(name = "gitpulse")]
#[command(author, version, about = "Local telemetry receiver for Git Trace2 event streams", long_about = None)]
struct Cli {
    /// Path to the receiver configuration file
    #[arg(short, long, default_value = "gitpulse.yml")]
    config: PathBuf,

    /// Override the listening endpoint from the config file
    #[arg(long)]
    endpoint: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let mut config = Config::load(&cli.config)?;
    if let Some(endpoint) = cli.endpoint {
        if cfg!(windows) {
            config.pipe = endpoint;
        } else {
            config.socket = endpoint;
        }
        config.validate()?;
    }

    if config.enable_commands {
        info!("command verbs are enabled");
    }

    // Finalized span batches go to stdout as JSON lines; a real
    // deployment wires its own SpanConsumer here.
    let consumer = Arc::new(JsonLineConsumer::new(tokio::io::stdout()));

    let receiver = Receiver::new(Arc::new(config), consumer);
    let handle = receiver.handle();

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, shutting down");
            handle.shutdown();
        }
    });

    if let Err(e) = receiver.run().await {
        error!("receiver failed: {e}");
        return Err(e.into());
    }

    Ok(())
}
