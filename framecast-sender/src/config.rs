//! Configuration for the framecast producer.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use framecast_core::{
    DEFAULT_MAX_FRAME_BYTES, DEFAULT_PORT, DEFAULT_QUEUE_CAPACITY, ServerConfig, SessionConfig,
    StreamerConfig,
};

/// Top-level configuration loaded from a TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SenderConfig {
    /// Listener and wire settings.
    pub network: NetworkConfig,
    /// Pacing settings.
    pub stream: StreamConfig,
    /// Where frames come from.
    pub source: SourceConfig,
    /// Logging settings.
    pub logging: LoggingConfig,
}

/// Network configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Address to listen on.
    pub listen_addr: String,
    /// TCP port to listen on.
    pub port: u16,
    /// Consecutive ports to try when `port` is taken.
    pub port_attempts: u16,
    /// Largest frame payload in bytes.
    pub max_frame_bytes: usize,
    /// Exchange delay values and acknowledgments with receivers.
    pub latency_feedback: bool,
}

/// Pacing configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Target frames per second.
    pub fps: u32,
    /// Frames held between capture and broadcast.
    pub queue_capacity: usize,
    /// Send the placeholder for this long after start.
    pub start_delay_ms: u64,
    /// File whose bytes are sent during the start delay. Empty for none.
    pub placeholder: PathBuf,
    /// Seconds between aggregate stats log lines. 0 disables them.
    pub stats_interval_secs: u64,
}

/// Which frame source to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// Synthetic moving test pattern.
    Pattern,
    /// Encoded image files from a directory, in name order, looping.
    Directory,
}

/// Frame source configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    pub kind: SourceKind,
    /// Image directory for `kind = "directory"`.
    pub directory: PathBuf,
    /// Test pattern width in pixels.
    pub width: u32,
    /// Test pattern height in pixels.
    pub height: u32,
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level or filter directive: "trace", "debug", "info", ...
    pub level: String,
}

// ── Defaults ─────────────────────────────────────────────────────

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0".into(),
            port: DEFAULT_PORT,
            port_attempts: 10,
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
            latency_feedback: true,
        }
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            fps: 30,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            start_delay_ms: 0,
            placeholder: PathBuf::new(),
            stats_interval_secs: 5,
        }
    }
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            kind: SourceKind::Pattern,
            directory: PathBuf::from("frames"),
            width: 640,
            height: 360,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
        }
    }
}

// ── Loading ──────────────────────────────────────────────────────

impl SenderConfig {
    /// Load configuration from a TOML file, falling back to defaults.
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => toml::from_str(&contents).unwrap_or_else(|e| {
                tracing::warn!("invalid config {}: {e}; using defaults", path.display());
                Self::default()
            }),
            Err(_) => {
                tracing::info!("no config at {}; using defaults", path.display());
                Self::default()
            }
        }
    }

    /// Write the default configuration to a file (for bootstrapping).
    pub fn write_default(path: &Path) -> std::io::Result<()> {
        let text = toml::to_string_pretty(&Self::default()).map_err(std::io::Error::other)?;
        std::fs::write(path, text)
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            max_frame_bytes: self.network.max_frame_bytes.clamp(1, u32::MAX as usize),
            latency_feedback: self.network.latency_feedback,
        }
    }

    pub fn to_server_config(&self) -> ServerConfig {
        ServerConfig {
            listen_addr: self.network.listen_addr.clone(),
            port: self.network.port,
            port_attempts: self.network.port_attempts.max(1),
            session: self.session_config(),
        }
    }

    /// Pacing settings; the placeholder payload is loaded by the service.
    pub fn to_streamer_config(&self) -> StreamerConfig {
        StreamerConfig {
            fps: self.stream.fps.clamp(1, 120),
            queue_capacity: self.stream.queue_capacity.max(1),
            start_delay: Duration::from_millis(self.stream.start_delay_ms),
            placeholder: None,
        }
    }

    pub fn stats_interval(&self) -> Option<Duration> {
        (self.stream.stats_interval_secs > 0)
            .then(|| Duration::from_secs(self.stream.stats_interval_secs))
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let text = toml::to_string_pretty(&SenderConfig::default()).unwrap();
        assert!(text.contains("listen_addr"));
        assert!(text.contains("fps"));
        assert!(text.contains("kind = \"pattern\""));
    }

    #[test]
    fn roundtrip_config() {
        let text = toml::to_string_pretty(&SenderConfig::default()).unwrap();
        let parsed: SenderConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed.network.port, 56666);
        assert_eq!(parsed.stream.fps, 30);
        assert_eq!(parsed.source.kind, SourceKind::Pattern);
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let parsed: SenderConfig = toml::from_str(
            r#"
            [network]
            port = 9000

            [source]
            kind = "directory"
            directory = "/srv/frames"
            "#,
        )
        .unwrap();
        assert_eq!(parsed.network.port, 9000);
        assert_eq!(parsed.network.listen_addr, "0.0.0.0");
        assert_eq!(parsed.source.kind, SourceKind::Directory);
        assert_eq!(parsed.stream.queue_capacity, 5);
    }

    #[test]
    fn to_streamer_config_clamps() {
        let mut cfg = SenderConfig::default();
        cfg.stream.fps = 500;
        cfg.stream.queue_capacity = 0;
        let streamer = cfg.to_streamer_config();
        assert_eq!(streamer.fps, 120);
        assert_eq!(streamer.queue_capacity, 1);

        cfg.stream.fps = 0;
        assert_eq!(cfg.to_streamer_config().fps, 1);
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let cfg = SenderConfig::load(Path::new("/nonexistent/framecast-sender.toml"));
        assert_eq!(cfg.network.port, DEFAULT_PORT);
    }

    #[test]
    fn write_default_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sender.toml");
        SenderConfig::write_default(&path).unwrap();
        let cfg = SenderConfig::load(&path);
        assert_eq!(cfg.stream.stats_interval_secs, 5);
        assert!(cfg.stats_interval().is_some());
    }
}
