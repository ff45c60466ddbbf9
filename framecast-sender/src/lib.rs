//! # framecast-sender: frame producer
//!
//! Captures frames from a configured source (a synthetic test pattern
//! or a directory of encoded images), paces them at the target rate and
//! broadcasts each one to every connected receiver over TCP.
//!
//! Slow receivers skip frames instead of slowing the stream down; only
//! aggregate figures (receiver count, throughput, mean delay) are
//! reported.

pub mod config;
pub mod service;
pub mod source;
