use std::time::Duration;

use async_trait::async_trait;
use tokio::net::TcpStream;
use tracing::debug;

use crate::error::StreamError;
use crate::session::{BoxedReader, BoxedWriter};

/// Opens a fresh byte-stream connection to the producer.
///
/// The reconnection controller only ever dials through this trait, so
/// tests can hand it in-memory pipes instead of sockets.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn connect(&self) -> Result<(BoxedReader, BoxedWriter), StreamError>;

    /// Human-readable remote description for logs.
    fn describe(&self) -> String;
}

// ── ConnectionInfo ───────────────────────────────────────────────

/// A producer endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionInfo {
    host: String,
    port: u16,
}

impl ConnectionInfo {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

impl std::fmt::Display for ConnectionInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

// ── TcpConnector ─────────────────────────────────────────────────

/// Dials a producer over TCP, giving up after `timeout`.
#[derive(Debug, Clone)]
pub struct TcpConnector {
    endpoint: ConnectionInfo,
    timeout: Duration,
}

impl TcpConnector {
    pub fn new(endpoint: ConnectionInfo, timeout: Duration) -> Self {
        Self { endpoint, timeout }
    }

    pub fn endpoint(&self) -> &ConnectionInfo {
        &self.endpoint
    }
}

#[async_trait]
impl Connector for TcpConnector {
    async fn connect(&self) -> Result<(BoxedReader, BoxedWriter), StreamError> {
        let address = self.endpoint.to_string();
        let stream = tokio::time::timeout(self.timeout, TcpStream::connect(address.as_str()))
            .await
            .map_err(|_| StreamError::Timeout(self.timeout))??;
        stream.set_nodelay(true)?;
        debug!(peer = %address, "connected");
        let (reader, writer) = stream.into_split();
        Ok((Box::new(reader), Box::new(writer)))
    }

    fn describe(&self) -> String {
        self.endpoint.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_display() {
        let info = ConnectionInfo::new("127.0.0.1", 9000);
        assert_eq!(info.to_string(), "127.0.0.1:9000");
        assert_eq!(info.host(), "127.0.0.1");
        assert_eq!(info.port(), 9000);
    }

    #[tokio::test]
    async fn refused_connection_is_a_transport_error() {
        // Bind then drop to get a port nobody listens on.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let connector = TcpConnector::new(
            ConnectionInfo::new("127.0.0.1", port),
            Duration::from_secs(2),
        );
        assert!(matches!(
            connector.connect().await,
            Err(StreamError::Transport(_))
        ));
    }

    #[tokio::test]
    async fn connects_to_listener() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let connector = TcpConnector::new(
            ConnectionInfo::new("127.0.0.1", port),
            Duration::from_secs(2),
        );
        let (dialed, accepted) = tokio::join!(connector.connect(), listener.accept());
        assert!(dialed.is_ok());
        assert!(accepted.is_ok());
        assert_eq!(connector.describe(), format!("127.0.0.1:{port}"));
    }
}
