mod connection;
mod server;

pub use connection::{ConnectionInfo, Connector, TcpConnector};
pub use server::{
    BroadcastGroup, BroadcastReport, BroadcastServer, DEFAULT_PORT, GroupStats, ServerConfig,
};
