//! Run configuration.
//!
//! The command line (with `RTT_RANK__*` environment fallbacks) is parsed into
//! [`Cli`] and mapped onto the per-stage config structs. Every struct has a
//! `Default` matching the values in [`defaults`].

use std::{path::PathBuf, str::FromStr, time::Duration};

use clap::{Parser, ValueEnum};

/// Default configuration values.
pub mod defaults {
    use std::time::Duration;

    /// Wall-clock window each candidate is pinged for.
    pub const PING_WINDOW: Duration = Duration::from_secs(20);
    /// Per-echo reply timeout.
    pub const PING_TIMEOUT: Duration = Duration::from_millis(600);
    /// Total ICMP packet size (8-byte header + payload).
    pub const PING_PACKET_SIZE: usize = 16;
    pub const PING_TTL: u32 = 128;
    /// Worker cap for the resolve and ping stages.
    pub const MAX_CONCURRENT_PROBES: usize = 100;
    /// Resolution attempts per candidate, first try included.
    pub const RESOLVE_ATTEMPTS: usize = 2;

    /// Parallel downloads per throughput round.
    pub const THROUGHPUT_CONCURRENCY: usize = 2;
    /// Absolute timeout for a single download request.
    pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
    pub const HTTP_PORT: u16 = 80;
    pub const USER_AGENT: &str =
        "Mozilla/5.0 (Macintosh; Intel Mac OS X 10.8; rv:24.0) Gecko/20100101 Firefox/24.0";

    pub const ERROR_WEIGHT: f64 = 0.6;
    pub const REPUTATION_WEIGHT: f64 = 0.2;
    pub const RTT_WEIGHT: f64 = 0.2;

    /// Image edge lengths served under `/speedtest/random{N}x{N}.jpg`.
    pub const DOWNLOAD_SIZES: [u64; 10] = [350, 500, 750, 1000, 1500, 2000, 2500, 3000, 3500, 4000];
    /// Upload payloads in megabytes. Kept for symmetry with the download ladder.
    pub const UPLOAD_SIZES_MB: [f64; 8] = [0.25, 0.5, 1.0, 2.0, 4.0, 8.0, 16.0, 32.0];
}

/* ================== Payload Ladder ================== */

/// One rung of the download ladder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LadderStep {
    /// Edge length `N` of the `random{N}x{N}.jpg` resource.
    pub size: u64,
    /// Expected payload in bytes (`N * N * 2`).
    pub payload: u64,
}

impl LadderStep {
    pub fn from_size(size: u64) -> Self {
        Self { size, payload: size * size * 2 }
    }

    pub fn path(&self) -> String {
        format!("/speedtest/random{0}x{0}.jpg", self.size)
    }
}

/// The ascending download ladder.
pub fn download_ladder() -> Vec<LadderStep> {
    defaults::DOWNLOAD_SIZES.iter().copied().map(LadderStep::from_size).collect()
}

/// Upload payload sizes in bytes. Not used by the probing path.
pub fn upload_ladder() -> Vec<u64> {
    defaults::UPLOAD_SIZES_MB.iter().map(|mb| (mb * 1_000_000.0) as u64).collect()
}

/* ================== Stage Configs ================== */

#[derive(Debug, Clone)]
pub struct PingConfig {
    pub window: Duration,
    pub timeout: Duration,
    pub packet_size: usize,
    pub ttl: u32,
}

impl Default for PingConfig {
    fn default() -> Self {
        Self {
            window: defaults::PING_WINDOW,
            timeout: defaults::PING_TIMEOUT,
            packet_size: defaults::PING_PACKET_SIZE,
            ttl: defaults::PING_TTL,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ThroughputConfig {
    pub concurrency: usize,
    pub request_timeout: Duration,
    pub port: u16,
    pub user_agent: String,
    pub ladder: Vec<LadderStep>,
}

impl Default for ThroughputConfig {
    fn default() -> Self {
        Self {
            concurrency: defaults::THROUGHPUT_CONCURRENCY,
            request_timeout: defaults::REQUEST_TIMEOUT,
            port: defaults::HTTP_PORT,
            user_agent: defaults::USER_AGENT.to_string(),
            ladder: download_ladder(),
        }
    }
}

/// Composite score weights.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoringConfig {
    pub error_weight: f64,
    pub reputation_weight: f64,
    pub rtt_weight: f64,
}

impl ScoringConfig {
    /// Returns the weights scaled to sum to one, so the composite stays in
    /// `[0, 10]`. Falls back to the defaults when the sum is not positive.
    pub fn normalized(&self) -> Self {
        let sum = self.error_weight + self.reputation_weight + self.rtt_weight;
        if !(sum.is_finite() && sum > 0.0)
            || self.error_weight < 0.0
            || self.reputation_weight < 0.0
            || self.rtt_weight < 0.0
        {
            return Self::default();
        }
        Self {
            error_weight: self.error_weight / sum,
            reputation_weight: self.reputation_weight / sum,
            rtt_weight: self.rtt_weight / sum,
        }
    }
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            error_weight: defaults::ERROR_WEIGHT,
            reputation_weight: defaults::REPUTATION_WEIGHT,
            rtt_weight: defaults::RTT_WEIGHT,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub max_concurrent_probes: usize,
    pub resolve_attempts: usize,
    pub ping: PingConfig,
    pub throughput: ThroughputConfig,
    pub scoring: ScoringConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_concurrent_probes: defaults::MAX_CONCURRENT_PROBES,
            resolve_attempts: defaults::RESOLVE_ATTEMPTS,
            ping: PingConfig::default(),
            throughput: ThroughputConfig::default(),
            scoring: ScoringConfig::default(),
        }
    }
}

/* ================== Command Line ================== */

/// How finalists are handed over for throughput testing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectMode {
    /// Prompt on stdin.
    Interactive,
    /// Take the first `n` finalists.
    Auto(usize),
    /// Skip throughput testing.
    None,
}

impl FromStr for SelectMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "interactive" => Ok(Self::Interactive),
            "none" => Ok(Self::None),
            other => {
                let n = other
                    .strip_prefix("auto:")
                    .ok_or_else(|| format!("expected interactive, none or auto:N, got '{other}'"))?;
                n.parse::<usize>()
                    .map(Self::Auto)
                    .map_err(|e| format!("invalid auto count '{n}': {e}"))
            }
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "server-rtt-probe", version, about)]
pub struct Cli {
    /// JSON file listing candidate servers.
    #[arg(long, env = "RTT_RANK__CANDIDATES")]
    pub candidates: PathBuf,

    /// Seconds each candidate is pinged for.
    #[arg(
        long,
        env = "RTT_RANK__PING_WINDOW_SECS",
        default_value_t = defaults::PING_WINDOW.as_secs()
    )]
    pub ping_window_secs: u64,

    /// Per-echo timeout in milliseconds.
    #[arg(
        long,
        env = "RTT_RANK__PING_TIMEOUT_MS",
        default_value_t = defaults::PING_TIMEOUT.as_millis() as u64
    )]
    pub ping_timeout_ms: u64,

    /// Concurrent workers for resolving and pinging.
    #[arg(long, env = "RTT_RANK__CONCURRENCY", default_value_t = defaults::MAX_CONCURRENT_PROBES)]
    pub concurrency: usize,

    /// Parallel downloads per throughput round.
    #[arg(
        long,
        env = "RTT_RANK__THROUGHPUT_CONCURRENCY",
        default_value_t = defaults::THROUGHPUT_CONCURRENCY
    )]
    pub throughput_concurrency: usize,

    /// Absolute timeout per download request, in seconds.
    #[arg(
        long,
        env = "RTT_RANK__REQUEST_TIMEOUT_SECS",
        default_value_t = defaults::REQUEST_TIMEOUT.as_secs()
    )]
    pub request_timeout_secs: u64,

    #[arg(long, default_value_t = defaults::ERROR_WEIGHT)]
    pub error_weight: f64,

    #[arg(long, default_value_t = defaults::REPUTATION_WEIGHT)]
    pub reputation_weight: f64,

    #[arg(long, default_value_t = defaults::RTT_WEIGHT)]
    pub rtt_weight: f64,

    /// interactive, none, or auto:N
    #[arg(long, env = "RTT_RANK__SELECT", default_value = "interactive")]
    pub select: SelectMode,

    /// Print the final report as JSON instead of tables.
    #[arg(long)]
    pub json: bool,

    #[arg(long, env = "RTT_RANK__LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,
}

impl Cli {
    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            max_concurrent_probes: self.concurrency.max(1),
            resolve_attempts: defaults::RESOLVE_ATTEMPTS,
            ping: PingConfig {
                window: Duration::from_secs(self.ping_window_secs),
                timeout: Duration::from_millis(self.ping_timeout_ms),
                ..PingConfig::default()
            },
            throughput: ThroughputConfig {
                concurrency: self.throughput_concurrency.max(1),
                request_timeout: Duration::from_secs(self.request_timeout_secs),
                ..ThroughputConfig::default()
            },
            scoring: ScoringConfig {
                error_weight: self.error_weight,
                reputation_weight: self.reputation_weight,
                rtt_weight: self.rtt_weight,
            }
            .normalized(),
        }
    }
}
