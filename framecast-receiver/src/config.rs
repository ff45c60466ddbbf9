//! Consumer configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use framecast_core::{
    ConnectionInfo, DEFAULT_MAX_FRAME_BYTES, DEFAULT_PORT, DEFAULT_QUEUE_CAPACITY,
    ReconnectConfig, SessionConfig,
};

/// Top-level configuration for the consumer.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ReceiverConfig {
    /// Producer endpoint and wire settings.
    pub network: NetworkConfig,
    /// Loss detection and reconnection timing.
    pub reconnect: ReconnectSection,
    /// Display pacing.
    pub stream: StreamConfig,
    /// Where displayed frames go.
    pub output: OutputConfig,
    /// Logging.
    pub logging: LoggingConfig,
}

/// Network settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Producer host name or IP address.
    pub host: String,
    /// Producer TCP port.
    pub port: u16,
    /// Connection timeout in milliseconds.
    pub connect_timeout_ms: u64,
    /// Largest accepted frame payload in bytes.
    pub max_frame_bytes: usize,
    /// Exchange delay values and acknowledgments with the producer.
    pub latency_feedback: bool,
}

/// Reconnection timing, all in milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectSection {
    /// No frame for this long means the signal is lost.
    pub max_silence_ms: u64,
    /// Give up this long after a loss.
    pub reconnect_window_ms: u64,
    /// Silence check and redial period.
    pub poll_interval_ms: u64,
}

/// Display settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Display rate; also declared to the producer as the pacing interval.
    pub fps: u32,
    /// Received frames buffered ahead of display.
    pub queue_capacity: usize,
    /// Seconds between status log lines. 0 disables them.
    pub stats_interval_secs: u64,
}

/// Frame output.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Write each displayed frame to `path`.
    pub enabled: bool,
    /// Destination file; replaced on every displayed frame.
    pub path: PathBuf,
}

/// Logging.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level or filter directive.
    pub level: String,
}

// ── Defaults ─────────────────────────────────────────────────────

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: DEFAULT_PORT,
            connect_timeout_ms: 5000,
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
            latency_feedback: true,
        }
    }
}

impl Default for ReconnectSection {
    fn default() -> Self {
        Self {
            max_silence_ms: 3000,
            reconnect_window_ms: 10_000,
            poll_interval_ms: 1000,
        }
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            fps: 30,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            stats_interval_secs: 5,
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            path: PathBuf::from("latest-frame.bin"),
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

impl ReceiverConfig {
    /// Load from a TOML file, falling back to defaults.
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

    /// Write default config to a file.
    pub fn write_default(path: &Path) -> std::io::Result<()> {
        let text = toml::to_string_pretty(&Self::default()).map_err(std::io::Error::other)?;
        std::fs::write(path, text)
    }

    pub fn endpoint(&self) -> ConnectionInfo {
        ConnectionInfo::new(self.network.host.clone(), self.network.port)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.network.connect_timeout_ms.max(1))
    }

    /// Display rate clamped to 1..=120.
    pub fn fps(&self) -> u32 {
        self.stream.fps.clamp(1, 120)
    }

    pub fn frame_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / f64::from(self.fps()))
    }

    pub fn stats_interval(&self) -> Option<Duration> {
        (self.stream.stats_interval_secs > 0)
            .then(|| Duration::from_secs(self.stream.stats_interval_secs))
    }

    pub fn to_reconnect_config(&self) -> ReconnectConfig {
        let section = &self.reconnect;
        ReconnectConfig {
            max_silence: Duration::from_millis(section.max_silence_ms.max(1)),
            reconnect_window: Duration::from_millis(section.reconnect_window_ms),
            poll_interval: Duration::from_millis(section.poll_interval_ms.max(1)),
            connect_timeout: self.connect_timeout(),
            queue_capacity: self.stream.queue_capacity.max(1),
            pacing_interval: self.frame_interval(),
            session: SessionConfig {
                max_frame_bytes: self.network.max_frame_bytes.clamp(1, u32::MAX as usize),
                latency_feedback: self.network.latency_feedback,
            },
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let text = toml::to_string_pretty(&ReceiverConfig::default()).unwrap();
        assert!(text.contains("host"));
        assert!(text.contains("max_silence_ms"));
        assert!(text.contains("[output]"));
    }

    #[test]
    fn roundtrip_config() {
        let text = toml::to_string_pretty(&ReceiverConfig::default()).unwrap();
        let parsed: ReceiverConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed.network.port, DEFAULT_PORT);
        assert_eq!(parsed.reconnect.reconnect_window_ms, 10_000);
        assert!(!parsed.output.enabled);
    }

    #[test]
    fn reconnect_config_matches_defaults() {
        let reconnect = ReceiverConfig::default().to_reconnect_config();
        let core = ReconnectConfig::default();
        assert_eq!(reconnect.max_silence, core.max_silence);
        assert_eq!(reconnect.reconnect_window, core.reconnect_window);
        assert_eq!(reconnect.poll_interval, core.poll_interval);
        assert_eq!(reconnect.queue_capacity, core.queue_capacity);
        assert!(reconnect.validate().is_ok());
    }

    #[test]
    fn out_of_range_values_are_clamped() {
        let mut cfg = ReceiverConfig::default();
        cfg.stream.fps = 0;
        cfg.stream.queue_capacity = 0;
        cfg.reconnect.poll_interval_ms = 0;
        cfg.network.connect_timeout_ms = 0;
        let reconnect = cfg.to_reconnect_config();
        assert_eq!(cfg.fps(), 1);
        assert_eq!(reconnect.queue_capacity, 1);
        assert_eq!(reconnect.pacing_interval, Duration::from_secs(1));
        assert!(reconnect.validate().is_ok());

        cfg.stream.fps = 1000;
        assert_eq!(cfg.fps(), 120);
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let parsed: ReceiverConfig = toml::from_str(
            r#"
            [network]
            host = "10.0.0.7"

            [output]
            enabled = true
            path = "/tmp/frame.jpg"
            "#,
        )
        .unwrap();
        assert_eq!(parsed.endpoint().to_string(), "10.0.0.7:56666");
        assert!(parsed.output.enabled);
        assert_eq!(parsed.stream.fps, 30);
    }

    #[test]
    fn write_default_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("receiver.toml");
        ReceiverConfig::write_default(&path).unwrap();
        let cfg = ReceiverConfig::load(&path);
        assert_eq!(cfg.reconnect.max_silence_ms, 3000);
    }
}
