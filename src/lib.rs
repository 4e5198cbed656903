//! Server RTT Probe
//!
//! Ranks a pool of candidate servers by ICMP loss and latency, then measures
//! HTTP download throughput on the ones a user picks from the best.
//!
//! Features:
//! - One shared ICMP socket for all concurrent probes, replies matched by sequence id
//! - Concurrency control with a semaphore per stage
//! - Percentile-banded 0-10 scoring against the batch's own population
//! - Adaptive two-phase download test sized to the request timeout
//! - DNS resolution with retry

pub mod config;
pub mod error;
pub mod model;
pub mod ping;
pub mod pipeline;
pub mod report;
pub mod resolver;
pub mod score;
pub mod select;
pub mod source;
pub mod stats;
pub mod throughput;

pub use config::{Cli, PipelineConfig};
pub use pipeline::{Pipeline, Scored};
