//! Candidate records and the results attached to them.

use std::{net::Ipv4Addr, time::Duration};

use serde::{Deserialize, Serialize};

/// A candidate as delivered by the source collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateSeed {
    pub id: String,
    pub domain: String,
    #[serde(default, alias = "remain")]
    pub remaining_capacity: String,
    #[serde(default)]
    pub location: String,
}

/// A seed after address resolution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Candidate {
    pub id: String,
    pub domain: String,
    pub resolved_address: Option<Ipv4Addr>,
    pub remaining_capacity: String,
    pub location: String,
}

impl Candidate {
    pub fn new(seed: CandidateSeed, resolved_address: Option<Ipv4Addr>) -> Self {
        Self {
            id: seed.id,
            domain: seed.domain,
            resolved_address,
            remaining_capacity: seed.remaining_capacity,
            location: seed.location,
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.resolved_address.is_some()
    }
}

/// Outcome of one candidate's ping sampling window.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PingResult {
    pub sample_count: u64,
    pub success_count: u64,
    pub error_count: u64,
    /// `error_count / sample_count`, 1.0 when nothing succeeded.
    pub error_rate: f64,
    /// Mean RTT in milliseconds over successful samples.
    pub mean_rtt_ms: Option<f64>,
    /// 95% margin of error of `mean_rtt_ms`, in milliseconds.
    pub rtt_moe_ms: Option<f64>,
}

impl PingResult {
    /// Builds a result from raw RTT samples (ms) and an error count.
    pub fn from_samples(rtts_ms: &[f64], error_count: u64) -> Self {
        let success_count = rtts_ms.len() as u64;
        let sample_count = success_count + error_count;
        let error_rate = if sample_count == 0 || success_count == 0 {
            1.0
        } else {
            error_count as f64 / sample_count as f64
        };
        Self {
            sample_count,
            success_count,
            error_count,
            error_rate,
            mean_rtt_ms: crate::stats::mean(rtts_ms),
            rtt_moe_ms: crate::stats::margin_of_error(rtts_ms),
        }
    }
}

/// Percentile-banded sub-scores plus the weighted composite.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Score {
    pub error_subscore: u8,
    pub reputation_subscore: u8,
    pub rtt_subscore: u8,
    pub composite: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ThroughputResult {
    #[serde(with = "duration_secs")]
    pub avg_response_latency: Duration,
    pub bytes_per_sec: f64,
    /// Payload of the refinement round the result was measured at.
    pub payload_bytes: u64,
}

mod duration_secs {
    use std::time::Duration;

    use serde::Serializer;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }
}
