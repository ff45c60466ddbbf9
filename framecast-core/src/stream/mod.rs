//! Stream-level building blocks around the transport: delay and
//! throughput estimation, the producer pacing loop, and the collaborator
//! traits the application plugs in.

pub mod latency;
pub mod observer;
pub mod source;
pub mod streamer;
pub mod throughput;

pub use latency::LatencyEstimator;
pub use observer::{NoopObserver, StreamObserver};
pub use source::{FrameSource, TestPattern};
pub use streamer::{StreamSummary, Streamer, StreamerConfig};
pub use throughput::ThroughputMeter;
