//! Two-phase download throughput test.
//!
//! A calibration round at the smallest ladder payload estimates bandwidth,
//! then a refinement round runs at the ladder payload that best fills the
//! remaining time budget:
//!
//! ```text
//! target = (timeout - avg_response_latency) * throughput / concurrency
//! ```

use std::{future::Future, time::Duration};

use futures::future::join_all;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::{
    config::{LadderStep, ThroughputConfig},
    error::ThroughputError,
    model::ThroughputResult,
};

/// Timing of one completed download.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DownloadSample {
    /// Time to response headers.
    pub response_latency: Duration,
    /// Time to the last body byte.
    pub completion_latency: Duration,
    pub length: u64,
}

impl DownloadSample {
    /// Body bytes per second, `None` when the body arrived with no measurable
    /// transfer time.
    pub fn bytes_per_sec(&self) -> Option<f64> {
        let transfer = self.completion_latency.checked_sub(self.response_latency)?.as_secs_f64();
        (transfer > 0.0).then(|| self.length as f64 / transfer)
    }
}

/// Fetches one ladder payload from a host.
pub trait Downloader {
    fn download(
        &self,
        host: &str,
        step: LadderStep,
    ) -> impl Future<Output = Result<DownloadSample, ThroughputError>> + Send;
}

/// Plain HTTP downloader with an absolute per-request timeout.
#[derive(Debug, Clone)]
pub struct HttpDownloader {
    client: reqwest::Client,
    port: u16,
    timeout: Duration,
}

impl HttpDownloader {
    pub fn new(config: &ThroughputConfig) -> Result<Self, ThroughputError> {
        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(ThroughputError::Client)?;
        Ok(Self { client, port: config.port, timeout: config.request_timeout })
    }

    async fn fetch(&self, url: &str, started: Instant) -> Result<DownloadSample, ThroughputError> {
        let mut response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|source| ThroughputError::Request { url: url.to_string(), source })?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            return Err(ThroughputError::Status { url: url.to_string(), status });
        }
        let response_latency = started.elapsed();
        let mut completion_latency = response_latency;
        let mut length = 0u64;
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|source| ThroughputError::Request { url: url.to_string(), source })?
        {
            length += chunk.len() as u64;
            completion_latency = started.elapsed();
        }
        Ok(DownloadSample { response_latency, completion_latency, length })
    }
}

impl Downloader for HttpDownloader {
    async fn download(
        &self,
        host: &str,
        step: LadderStep,
    ) -> Result<DownloadSample, ThroughputError> {
        let url = format!("http://{host}:{}{}", self.port, step.path());
        let started = Instant::now();
        // Dropping the request future on timeout aborts the connection.
        tokio::time::timeout(self.timeout, self.fetch(&url, started))
            .await
            .map_err(|_| ThroughputError::Timeout { url, timeout: self.timeout })?
    }
}

/* ================== Rounds ================== */

/// Aggregate of one parallel round.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RoundStats {
    pub step: LadderStep,
    pub avg_response_latency: Duration,
    /// Sum of per-request throughput across the concurrent set.
    pub bytes_per_sec: f64,
    pub succeeded: usize,
    pub attempted: usize,
}

/// Averages response latency and sums throughput over measurable samples.
pub fn aggregate(
    step: LadderStep,
    samples: &[DownloadSample],
    attempted: usize,
) -> Option<RoundStats> {
    let measured: Vec<(Duration, f64)> = samples
        .iter()
        .filter_map(|s| s.bytes_per_sec().map(|bps| (s.response_latency, bps)))
        .collect();
    if measured.is_empty() {
        return None;
    }
    let total_latency: Duration = measured.iter().map(|(rt, _)| *rt).sum();
    Some(RoundStats {
        step,
        avg_response_latency: total_latency / measured.len() as u32,
        bytes_per_sec: measured.iter().map(|(_, bps)| bps).sum(),
        succeeded: measured.len(),
        attempted,
    })
}

/// Runs `concurrency` simultaneous downloads of `step`. Failed requests are
/// left out; a round where none succeeds is an error.
pub async fn run_round<D: Downloader>(
    downloader: &D,
    host: &str,
    step: LadderStep,
    concurrency: usize,
) -> Result<RoundStats, ThroughputError> {
    let attempted = concurrency.max(1);
    let results = join_all((0..attempted).map(|_| downloader.download(host, step))).await;
    let samples: Vec<DownloadSample> = results
        .into_iter()
        .filter_map(|r| match r {
            Ok(sample) => Some(sample),
            Err(e) => {
                debug!(host, payload = step.payload, error = %e, "download failed");
                None
            }
        })
        .collect();
    aggregate(step, &samples, attempted)
        .ok_or(ThroughputError::NoSuccessfulRequests { payload: step.payload, attempted })
}

/// Picks the ladder step whose payload is relatively closest to the target
/// the calibration round implies. Earlier steps win ties.
pub fn choose_step(
    ladder: &[LadderStep],
    calibration: &RoundStats,
    timeout: Duration,
    concurrency: usize,
) -> Option<LadderStep> {
    let first = *ladder.first()?;
    let remaining = timeout.as_secs_f64() - calibration.avg_response_latency.as_secs_f64();
    let target = remaining * calibration.bytes_per_sec / concurrency.max(1) as f64;
    if !(target.is_finite() && target > 0.0) {
        return Some(first);
    }
    let distance = |step: &LadderStep| (step.payload as f64 - target).abs() / target;
    let closest = ladder[1..]
        .iter()
        .fold(first, |best, step| if distance(step) < distance(&best) { *step } else { best });
    Some(closest)
}

/// Calibrates, refines and returns the refinement round as the result.
pub async fn probe_candidate<D: Downloader>(
    downloader: &D,
    host: &str,
    config: &ThroughputConfig,
) -> Result<ThroughputResult, ThroughputError> {
    let first = *config.ladder.first().ok_or(ThroughputError::EmptyLadder)?;
    let calibration = run_round(downloader, host, first, config.concurrency).await?;
    let step = choose_step(&config.ladder, &calibration, config.request_timeout, config.concurrency)
        .ok_or(ThroughputError::EmptyLadder)?;
    debug!(
        host,
        calibration_bps = calibration.bytes_per_sec,
        calibration_rt_ms = calibration.avg_response_latency.as_millis() as u64,
        chosen_size = step.size,
        "calibration done"
    );
    let refined = run_round(downloader, host, step, config.concurrency).await?;
    info!(host, payload = step.payload, bps = refined.bytes_per_sec, "throughput measured");
    Ok(ThroughputResult {
        avg_response_latency: refined.avg_response_latency,
        bytes_per_sec: refined.bytes_per_sec,
        payload_bytes: step.payload,
    })
}
