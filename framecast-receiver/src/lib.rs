//! # framecast-receiver: frame consumer
//!
//! Connects to a framecast producer, buffers incoming frames in a small
//! drop-incoming queue and takes them off at the display rate. Signal
//! loss is detected by silence; the connection is redialed for a bounded
//! window before the consumer reports it lost for good.

pub mod config;
pub mod connection;
pub mod display;
pub mod service;
