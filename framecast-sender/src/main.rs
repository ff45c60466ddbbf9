//! framecast producer: entry point.
//!
//! ```text
//! framecast-sender                  Run in the foreground
//! framecast-sender --config <path>  Load a custom config TOML
//! framecast-sender --port 9000      Override the listen port
//! framecast-sender --gen-config     Write default config to stdout
//! ```

use std::path::PathBuf;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use framecast_sender::config::SenderConfig;
use framecast_sender::service::SenderService;

// ── CLI ──────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "framecast-sender", about = "framecast frame producer")]
struct Cli {
    /// Path to configuration TOML file.
    #[arg(short, long, default_value = "framecast-sender.toml")]
    config: PathBuf,

    /// Listen address (overrides the config file).
    #[arg(long)]
    listen: Option<String>,

    /// Listen port (overrides the config file).
    #[arg(short, long)]
    port: Option<u16>,

    /// Target frames per second (overrides the config file).
    #[arg(long)]
    fps: Option<u32>,

    /// Print the default configuration to stdout and exit.
    #[arg(long)]
    gen_config: bool,
}

// ── Main ─────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // --gen-config: dump defaults and exit.
    if cli.gen_config {
        let text = toml::to_string_pretty(&SenderConfig::default())?;
        println!("{text}");
        return Ok(());
    }

    // Load config, then apply CLI overrides.
    let mut config = SenderConfig::load(&cli.config);
    if let Some(listen) = cli.listen {
        config.network.listen_addr = listen;
    }
    if let Some(port) = cli.port {
        config.network.port = port;
    }
    if let Some(fps) = cli.fps {
        config.stream.fps = fps;
    }

    // Init tracing.
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("framecast-sender v{}", env!("CARGO_PKG_VERSION"));
    info!("listen: {}:{}", config.network.listen_addr, config.network.port);
    info!("target FPS: {}", config.stream.fps);
    info!("source: {:?}", config.source.kind);

    let service = SenderService::new(config);
    let stop = service.stop_handle();

    // Ctrl-C handler.
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Ctrl-C received, shutting down");
        stop.cancel();
    });

    let summary = service.run().await?;
    info!(
        captured = summary.frames_captured,
        broadcast = summary.frames_broadcast,
        dropped = summary.frames_dropped,
        "done"
    );

    Ok(())
}
