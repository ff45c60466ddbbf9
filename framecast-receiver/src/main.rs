//! framecast consumer: entry point.
//!
//! ```text
//! framecast-receiver                    Connect with defaults
//! framecast-receiver --config <path>    Use custom config TOML
//! framecast-receiver --host 10.0.0.7    Override the producer host
//! framecast-receiver --gen-config       Dump default config and exit
//! ```

use std::path::PathBuf;

use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use framecast_core::DisconnectReason;
use framecast_receiver::config::ReceiverConfig;
use framecast_receiver::service::ReceiverService;

// ── CLI ──────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "framecast-receiver", about = "framecast frame consumer")]
struct Cli {
    /// Path to configuration TOML file.
    #[arg(short, long, default_value = "framecast-receiver.toml")]
    config: PathBuf,

    /// Producer host (overrides config).
    #[arg(long)]
    host: Option<String>,

    /// Producer port (overrides config).
    #[arg(short, long)]
    port: Option<u16>,

    /// Write each displayed frame to this file.
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Print the default configuration to stdout and exit.
    #[arg(long)]
    gen_config: bool,
}

// ── Main ─────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    if cli.gen_config {
        let text = toml::to_string_pretty(&ReceiverConfig::default())?;
        println!("{text}");
        return Ok(());
    }

    let mut config = ReceiverConfig::load(&cli.config);
    if let Some(host) = cli.host {
        config.network.host = host;
    }
    if let Some(port) = cli.port {
        config.network.port = port;
    }
    if let Some(path) = cli.output {
        config.output.enabled = true;
        config.output.path = path;
    }

    // Init tracing.
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("framecast-receiver v{}", env!("CARGO_PKG_VERSION"));
    info!("producer: {}", config.endpoint());

    let service = ReceiverService::new(config);
    let stop = service.stop_handle();

    // Ctrl-C handler.
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Ctrl-C received, disconnecting");
        stop.cancel();
    });

    let summary = service.run().await?;
    match summary.reason {
        DisconnectReason::ConnectionLost => warn!("connection lost; giving up"),
        _ => info!(
            received = summary.frames_received,
            displayed = summary.display.frames_displayed,
            dropped = summary.frames_dropped,
            "done"
        ),
    }

    Ok(())
}
