//! Stage-by-stage measurement pipeline.
//!
//! ```text
//! seeds -> resolve -> Resolved -> ping -> Pinged -> aggregate -> Aggregated
//!       -> score -> Scored -> (selection) -> throughput -> Vec<ThroughputOutcome>
//! ```
//!
//! Every stage consumes the complete output of the previous one, so a stage
//! never starts before the whole batch has cleared its predecessor.

use std::{
    sync::atomic::{AtomicUsize, Ordering},
    time::Instant,
};

use futures::future::join_all;
use serde::Serialize;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use crate::{
    config::PipelineConfig,
    error::ThroughputError,
    model::{Candidate, CandidateSeed, PingResult, Score, ThroughputResult},
    ping::{sample_window, Pinger},
    resolver::{resolve_with_retry, Resolve},
    score::{self, BatchStats, Bands, Metrics},
    stats::PopulationStats,
    throughput::{probe_candidate, Downloader},
};

/* ================== Stage Outputs ================== */

/// Output of the resolve stage, in seed order.
#[derive(Debug, Clone)]
pub struct Resolved {
    pub candidates: Vec<Candidate>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Probed {
    pub candidate: Candidate,
    pub ping: PingResult,
}

fn metrics(ping: &PingResult) -> Metrics {
    Metrics {
        error_rate: ping.error_rate,
        sample_count: ping.sample_count as f64,
        mean_rtt_ms: ping.mean_rtt_ms,
    }
}

/// Output of the ping stage.
#[derive(Debug, Clone)]
pub struct Pinged {
    pub probed: Vec<Probed>,
    pub unresolved: Vec<Candidate>,
}

/// Ping results with the batch's frozen populations.
#[derive(Debug, Clone)]
pub struct Aggregated {
    pub probed: Vec<Probed>,
    pub unresolved: Vec<Candidate>,
    /// `None` when nothing was probed.
    pub stats: Option<BatchStats>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Ranked {
    pub candidate: Candidate,
    pub ping: PingResult,
    pub bands: Bands,
    pub score: Score,
}

/// Output of the score stage.
#[derive(Debug, Clone, Serialize)]
pub struct Scored {
    /// Best first.
    pub ranked: Vec<Ranked>,
    pub unresolved: Vec<Candidate>,
    pub stats: Option<BatchStats>,
    pub composite_stats: Option<PopulationStats>,
    #[serde(skip)]
    finalist_count: usize,
}

impl Scored {
    /// Candidates at or above the batch's p95 composite, best first.
    pub fn finalists(&self) -> &[Ranked] {
        &self.ranked[..self.finalist_count]
    }
}

#[derive(Debug)]
pub struct ThroughputOutcome {
    pub id: String,
    pub domain: String,
    pub result: Result<ThroughputResult, ThroughputError>,
}

/* ================== Progress ================== */

/// Done/total counter for one fan-out stage, logged as each candidate finishes.
#[derive(Debug)]
pub struct Progress {
    stage: &'static str,
    total: usize,
    done: AtomicUsize,
}

impl Progress {
    pub fn new(stage: &'static str, total: usize) -> Self {
        Self { stage, total, done: AtomicUsize::new(0) }
    }

    /// Records one finished candidate and returns the new done count.
    pub fn tick(&self, started: Instant) -> usize {
        let done = self.done.fetch_add(1, Ordering::Relaxed) + 1;
        let elapsed = started.elapsed().as_secs_f64();
        // Remaining time assumes the rest finish at the average rate so far.
        let eta_secs = elapsed / done as f64 * self.total.saturating_sub(done) as f64;
        info!(stage = self.stage, current = done, total = self.total, eta_secs, "progress");
        done
    }

    pub fn done(&self) -> usize {
        self.done.load(Ordering::Relaxed)
    }
}

/* ================== Pipeline ================== */

pub struct Pipeline<R, P, D> {
    config: PipelineConfig,
    resolver: R,
    pinger: P,
    downloader: D,
}

impl<R: Resolve, P: Pinger, D: Downloader> Pipeline<R, P, D> {
    pub fn new(config: PipelineConfig, resolver: R, pinger: P, downloader: D) -> Self {
        Self { config, resolver, pinger, downloader }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Resolve, ping, aggregate and score one batch.
    pub async fn rank(&self, seeds: Vec<CandidateSeed>) -> Scored {
        let resolved = self.resolve(seeds).await;
        let pinged = self.ping(resolved).await;
        self.score(aggregate(pinged))
    }

    pub async fn resolve(&self, seeds: Vec<CandidateSeed>) -> Resolved {
        let started = Instant::now();
        let semaphore = Semaphore::new(self.config.max_concurrent_probes.max(1));
        let attempts = self.config.resolve_attempts;

        let progress = Progress::new("resolving", seeds.len());

        let tasks = seeds.into_iter().map(|seed| {
            let semaphore = &semaphore;
            let progress = &progress;
            async move {
                let _permit = semaphore.acquire().await.ok();
                let resolved = resolve_with_retry(&self.resolver, &seed.domain, attempts).await;
                let candidate = match resolved {
                    Ok(ip) => Candidate::new(seed, Some(ip)),
                    Err(e) => {
                        warn!(candidate = %seed.id, error = %e, "unresolved");
                        Candidate::new(seed, None)
                    }
                };
                progress.tick(started);
                candidate
            }
        });
        let candidates = join_all(tasks).await;

        let resolved = candidates.iter().filter(|c| c.is_resolved()).count();
        info!(
            resolved,
            unresolved = candidates.len() - resolved,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "resolve stage done"
        );
        Resolved { candidates }
    }

    pub async fn ping(&self, resolved: Resolved) -> Pinged {
        let started = Instant::now();
        let semaphore = Semaphore::new(self.config.max_concurrent_probes.max(1));
        let window = self.config.ping.window;

        let (targets, unresolved): (Vec<Candidate>, Vec<Candidate>) =
            resolved.candidates.into_iter().partition(Candidate::is_resolved);
        info!(count = targets.len(), window_secs = window.as_secs_f64(), "pinging");

        let progress = Progress::new("pinging", targets.len());

        let tasks = targets.into_iter().filter_map(|candidate| {
            let ip = candidate.resolved_address?;
            let semaphore = &semaphore;
            let progress = &progress;
            Some(async move {
                let _permit = semaphore.acquire().await.ok();
                let ping = sample_window(&self.pinger, ip, window).await;
                debug!(
                    candidate = %candidate.id,
                    samples = ping.sample_count,
                    error_rate = ping.error_rate,
                    rtt_ms = ?ping.mean_rtt_ms,
                    "ping window done"
                );
                progress.tick(started);
                Probed { candidate, ping }
            })
        });
        let probed = join_all(tasks).await;

        info!(
            probed = probed.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "ping stage done"
        );
        Pinged { probed, unresolved }
    }

    pub fn score(&self, aggregated: Aggregated) -> Scored {
        let Aggregated { probed, unresolved, stats } = aggregated;
        let Some(batch) = stats else {
            return Scored {
                ranked: Vec::new(),
                unresolved,
                stats: None,
                composite_stats: None,
                finalist_count: 0,
            };
        };

        let weights = self.config.scoring;
        let mut ranked: Vec<Ranked> = probed
            .into_iter()
            .map(|p| {
                let bands = score::bands(&metrics(&p.ping), &batch);
                let score = score::score(&bands, &weights);
                Ranked { candidate: p.candidate, ping: p.ping, bands, score }
            })
            .collect();
        ranked.sort_by(|a, b| {
            score::rank_order((&a.score, &metrics(&a.ping)), (&b.score, &metrics(&b.ping)))
        });

        let composites: Vec<f64> = ranked.iter().map(|r| r.score.composite).collect();
        let (composite_stats, finalist_count) = match score::finalist_indices(&composites) {
            Some((stats, picked)) => (Some(stats), picked.len()),
            None => (None, 0),
        };
        info!(scored = ranked.len(), finalists = finalist_count, "score stage done");

        Scored { ranked, unresolved, stats: Some(batch), composite_stats, finalist_count }
    }

    /// Runs the throughput test on the selected finalists, one at a time.
    /// Ids that are not finalists are skipped.
    pub async fn throughput(&self, scored: &Scored, selected: &[String]) -> Vec<ThroughputOutcome> {
        let mut outcomes = Vec::new();
        for id in selected {
            let Some(finalist) = scored.finalists().iter().find(|r| &r.candidate.id == id) else {
                warn!(candidate = %id, "not a finalist, skipping throughput test");
                continue;
            };
            let domain = finalist.candidate.domain.clone();
            info!(candidate = %id, %domain, "throughput test");
            let result = probe_candidate(&self.downloader, &domain, &self.config.throughput).await;
            if let Err(e) = &result {
                warn!(candidate = %id, error = %e, "throughput undefined");
            }
            outcomes.push(ThroughputOutcome { id: id.clone(), domain, result });
        }
        outcomes
    }
}

/// Freezes the per-metric populations of a complete ping batch.
pub fn aggregate(pinged: Pinged) -> Aggregated {
    let Pinged { probed, unresolved } = pinged;
    let error_rates: Vec<f64> = probed.iter().map(|p| p.ping.error_rate).collect();
    let sample_counts: Vec<f64> = probed.iter().map(|p| p.ping.sample_count as f64).collect();
    let rtts: Vec<f64> = probed.iter().filter_map(|p| p.ping.mean_rtt_ms).collect();

    let populations =
        (PopulationStats::from_values(&error_rates), PopulationStats::from_values(&sample_counts));
    let stats = match populations {
        (Some(error_rate), Some(sample_count)) => {
            Some(BatchStats { error_rate, sample_count, rtt: PopulationStats::from_values(&rtts) })
        }
        _ => None,
    };
    Aggregated { probed, unresolved, stats }
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;

    use super::*;

    fn probed(id: &str, error_rate: f64, rtt: Option<f64>, samples: u64) -> Probed {
        let success = ((1.0 - error_rate) * samples as f64).round() as u64;
        Probed {
            candidate: Candidate {
                id: id.to_string(),
                domain: format!("{id}.example.com"),
                resolved_address: Some(Ipv4Addr::new(10, 0, 0, 1)),
                remaining_capacity: String::new(),
                location: String::new(),
            },
            ping: PingResult {
                sample_count: samples,
                success_count: success,
                error_count: samples - success,
                error_rate,
                mean_rtt_ms: rtt,
                rtt_moe_ms: rtt.map(|_| 0.5),
            },
        }
    }

    #[test]
    fn aggregate_skips_missing_rtt() {
        let a = aggregate(Pinged {
            probed: vec![probed("a", 0.0, Some(10.0), 100), probed("b", 1.0, None, 30)],
            unresolved: vec![],
        });
        let stats = a.stats.unwrap();
        let rtt = stats.rtt.unwrap();
        assert_eq!((rtt.min, rtt.max), (10.0, 10.0));
        assert_eq!(stats.error_rate.max, 1.0);
        assert_eq!(stats.sample_count.min, 30.0);
    }

    #[tokio::test]
    async fn progress_counts_every_finished_candidate() {
        let progress = Progress::new("pinging", 5);
        let started = Instant::now();
        let mut ticks = join_all((0..5).map(|_| async { progress.tick(started) })).await;
        ticks.sort_unstable();
        assert_eq!(ticks, vec![1, 2, 3, 4, 5]);
        assert_eq!(progress.done(), 5);
    }

    #[test]
    fn aggregate_of_empty_batch_has_no_stats() {
        let a = aggregate(Pinged { probed: vec![], unresolved: vec![] });
        assert!(a.stats.is_none());
    }
}
