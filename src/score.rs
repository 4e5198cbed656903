//! Percentile banding, composite scores and finalist selection.

use std::cmp::Ordering;

use serde::Serialize;

use crate::{config::ScoringConfig, model::Score, stats::PopulationStats};

/// Position of a value within its population.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Band {
    Best,
    Top5,
    Top10,
    Bottom5,
    BelowAverage,
    Average,
}

impl Band {
    pub fn subscore(self) -> u8 {
        match self {
            Band::Best => 10,
            Band::Top5 => 8,
            Band::Top10 => 6,
            Band::Bottom5 => 0,
            Band::BelowAverage => 4,
            Band::Average => 5,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Band::Best => "best",
            Band::Top5 => "top5",
            Band::Top10 => "top10",
            Band::Bottom5 => "bottom5",
            Band::BelowAverage => "below-avg",
            Band::Average => "avg",
        }
    }
}

/// Bands `value` against `stats`. The first matching rule wins.
pub fn band(value: f64, stats: &PopulationStats, smaller_better: bool) -> Band {
    if smaller_better {
        if value == stats.min {
            Band::Best
        } else if value <= stats.p5 {
            Band::Top5
        } else if value <= stats.p10 {
            Band::Top10
        } else if value >= stats.p95 {
            Band::Bottom5
        } else if value > stats.mean {
            Band::BelowAverage
        } else {
            Band::Average
        }
    } else if value == stats.max {
        Band::Best
    } else if value >= stats.p95 {
        Band::Top5
    } else if value >= stats.p90 {
        Band::Top10
    } else if value <= stats.p5 {
        Band::Bottom5
    } else if value < stats.mean {
        Band::BelowAverage
    } else {
        Band::Average
    }
}

/// Frozen per-metric populations of one batch.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BatchStats {
    pub error_rate: PopulationStats,
    pub sample_count: PopulationStats,
    /// `None` when no candidate in the batch got a single reply.
    pub rtt: Option<PopulationStats>,
}

/// Metric inputs for one candidate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Metrics {
    pub error_rate: f64,
    pub sample_count: f64,
    pub mean_rtt_ms: Option<f64>,
}

/// Bands per metric, kept for reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Bands {
    pub error: Band,
    pub reputation: Band,
    pub rtt: Band,
}

pub fn bands(metrics: &Metrics, stats: &BatchStats) -> Bands {
    let rtt = match (metrics.mean_rtt_ms, stats.rtt.as_ref()) {
        (Some(rtt), Some(rtt_stats)) => band(rtt, rtt_stats, true),
        // No replies at all ranks as the worst RTT.
        _ => Band::Bottom5,
    };
    Bands {
        error: band(metrics.error_rate, &stats.error_rate, true),
        reputation: band(metrics.sample_count, &stats.sample_count, false),
        rtt,
    }
}

pub fn score(bands: &Bands, weights: &ScoringConfig) -> Score {
    let error_subscore = bands.error.subscore();
    let reputation_subscore = bands.reputation.subscore();
    let rtt_subscore = bands.rtt.subscore();
    let composite = weights.error_weight * f64::from(error_subscore)
        + weights.reputation_weight * f64::from(reputation_subscore)
        + weights.rtt_weight * f64::from(rtt_subscore);
    Score {
        error_subscore,
        reputation_subscore,
        rtt_subscore,
        composite: composite.clamp(0.0, 10.0),
    }
}

/// Ranking order: composite desc, then error rate asc, then mean RTT asc.
/// Candidates without an RTT sort after those with one.
pub fn rank_order(a: (&Score, &Metrics), b: (&Score, &Metrics)) -> Ordering {
    b.0.composite
        .total_cmp(&a.0.composite)
        .then_with(|| a.1.error_rate.total_cmp(&b.1.error_rate))
        .then_with(|| {
            let ar = a.1.mean_rtt_ms.unwrap_or(f64::INFINITY);
            let br = b.1.mean_rtt_ms.unwrap_or(f64::INFINITY);
            ar.total_cmp(&br)
        })
}

/// Indices of `composites` clearing the batch's p95, returned with the stats
/// the cut was taken from.
pub fn finalist_indices(composites: &[f64]) -> Option<(PopulationStats, Vec<usize>)> {
    let stats = PopulationStats::from_values(composites)?;
    let picked = composites
        .iter()
        .enumerate()
        .filter(|(_, c)| **c >= stats.p95)
        .map(|(i, _)| i)
        .collect();
    Some((stats, picked))
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn stats(values: &[f64]) -> PopulationStats {
        PopulationStats::from_values(values).unwrap()
    }

    #[test]
    fn smaller_better_band_order() {
        let s = stats(&(0..=100).map(f64::from).collect::<Vec<_>>());
        assert_eq!(band(0.0, &s, true), Band::Best);
        assert_eq!(band(5.0, &s, true), Band::Top5);
        assert_eq!(band(10.0, &s, true), Band::Top10);
        assert_eq!(band(95.0, &s, true), Band::Bottom5);
        assert_eq!(band(60.0, &s, true), Band::BelowAverage);
        assert_eq!(band(50.0, &s, true), Band::Average);
        assert_eq!(band(30.0, &s, true), Band::Average);
    }

    #[test]
    fn larger_better_band_order() {
        let s = stats(&(0..=100).map(f64::from).collect::<Vec<_>>());
        assert_eq!(band(100.0, &s, false), Band::Best);
        assert_eq!(band(95.0, &s, false), Band::Top5);
        assert_eq!(band(90.0, &s, false), Band::Top10);
        assert_eq!(band(5.0, &s, false), Band::Bottom5);
        assert_eq!(band(40.0, &s, false), Band::BelowAverage);
        assert_eq!(band(70.0, &s, false), Band::Average);
    }

    #[test]
    fn degenerate_population_is_best() {
        let s = stats(&[3.0, 3.0, 3.0]);
        assert_eq!(band(3.0, &s, true), Band::Best);
        assert_eq!(band(3.0, &s, false), Band::Best);
    }

    #[test]
    fn missing_rtt_is_worst() {
        let batch = BatchStats {
            error_rate: stats(&[0.0, 1.0]),
            sample_count: stats(&[10.0, 20.0]),
            rtt: Some(stats(&[10.0])),
        };
        let m = Metrics { error_rate: 1.0, sample_count: 10.0, mean_rtt_ms: None };
        let b = bands(&m, &batch);
        assert_eq!(b.rtt, Band::Bottom5);
        assert_eq!(score(&b, &ScoringConfig::default()).rtt_subscore, 0);
    }

    #[test]
    fn composite_uses_weights() {
        let b = Bands { error: Band::Best, reputation: Band::Average, rtt: Band::Bottom5 };
        let s = score(&b, &ScoringConfig::default());
        assert!((s.composite - (0.6 * 10.0 + 0.2 * 5.0)).abs() < 1e-12);
    }

    #[test]
    fn ties_break_on_error_then_rtt() {
        let s =
            Score { error_subscore: 5, reputation_subscore: 5, rtt_subscore: 5, composite: 5.0 };
        let a = Metrics { error_rate: 0.1, sample_count: 1.0, mean_rtt_ms: Some(20.0) };
        let b = Metrics { error_rate: 0.2, sample_count: 1.0, mean_rtt_ms: Some(10.0) };
        let c = Metrics { error_rate: 0.1, sample_count: 1.0, mean_rtt_ms: Some(15.0) };
        let d = Metrics { error_rate: 0.1, sample_count: 1.0, mean_rtt_ms: None };
        assert_eq!(rank_order((&s, &a), (&s, &b)), Ordering::Less);
        assert_eq!(rank_order((&s, &c), (&s, &a)), Ordering::Less);
        assert_eq!(rank_order((&s, &a), (&s, &d)), Ordering::Less);
    }

    #[test]
    fn finalists_clear_p95_inclusive() {
        let (stats, picked) = finalist_indices(&[10.0, 5.0, 0.0]).unwrap();
        assert!((stats.p95 - 9.5).abs() < 1e-12);
        assert_eq!(picked, vec![0]);

        let (_, all) = finalist_indices(&[4.0, 4.0, 4.0]).unwrap();
        assert_eq!(all, vec![0, 1, 2]);
        assert!(finalist_indices(&[]).is_none());
    }

    fn any_band() -> impl Strategy<Value = Band> {
        prop_oneof![
            Just(Band::Best),
            Just(Band::Top5),
            Just(Band::Top10),
            Just(Band::Bottom5),
            Just(Band::BelowAverage),
            Just(Band::Average),
        ]
    }

    proptest! {
        #[test]
        fn prop_composite_in_range(
            error in any_band(), reputation in any_band(), rtt in any_band(),
            we in 0.0f64..10.0, wr in 0.0f64..10.0, wt in 0.0f64..10.0,
        ) {
            let weights = ScoringConfig { error_weight: we, reputation_weight: wr, rtt_weight: wt }
                .normalized();
            let s = score(&Bands { error, reputation, rtt }, &weights);
            prop_assert!((0.0..=10.0).contains(&s.composite));
        }

        #[test]
        fn prop_finalists_meet_threshold(values in prop::collection::vec(0.0f64..=10.0, 1..100)) {
            let (stats, picked) = finalist_indices(&values).unwrap();
            prop_assert!(!picked.is_empty());
            for i in picked {
                prop_assert!(values[i] >= stats.p95);
            }
        }
    }
}
