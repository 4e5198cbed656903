//! Terminal tables and the JSON report.

use serde::Serialize;

use crate::{
    model::{Candidate, PingResult, ThroughputResult},
    pipeline::{Ranked, Scored, ThroughputOutcome},
    score::{Band, Bands, BatchStats},
    select::Finalist,
    stats::PopulationStats,
};

/* ================== Formatting ================== */

pub fn truncate_str(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        format!("{}...", s.chars().take(max_len.saturating_sub(3)).collect::<String>())
    }
}

/// `1.95 MB/s (15.6 Mbit/s)`
pub fn format_rate(bytes_per_sec: f64) -> String {
    format!("{:.2} MB/s ({:.1} Mbit/s)", bytes_per_sec / 1e6, bytes_per_sec * 8.0 / 1e6)
}

/// `10.0±0.3ms`, or `-` when nothing replied.
pub fn format_rtt(ping: &PingResult) -> String {
    match (ping.mean_rtt_ms, ping.rtt_moe_ms) {
        (Some(rtt), Some(moe)) => format!("{rtt:.1}±{moe:.1}ms"),
        (Some(rtt), None) => format!("{rtt:.1}ms"),
        _ => "-".to_string(),
    }
}

fn marked(value: String, band: Band) -> String {
    match band {
        Band::Average => value,
        other => format!("{value} ({})", other.label()),
    }
}

/// One-line metrics summary handed to the selection prompt.
pub fn format_metrics_summary(r: &Ranked) -> String {
    format!(
        "score {:.1} | err {} | rtt {} | {} pings",
        r.score.composite,
        marked(format!("{:.2}%", r.ping.error_rate * 100.0), r.bands.error),
        marked(format_rtt(&r.ping), r.bands.rtt),
        r.ping.sample_count,
    )
}

pub fn finalists_for_selection(scored: &Scored) -> Vec<Finalist> {
    scored
        .finalists()
        .iter()
        .map(|r| Finalist {
            id: r.candidate.id.clone(),
            location: r.candidate.location.clone(),
            summary: format_metrics_summary(r),
        })
        .collect()
}

/* ================== Output Formatting ================== */

pub fn print_header() {
    println!();
    println!("╔══════════════════════════════════════════════════════════════════════════════════════════════╗");
    println!("║                         SERVER RTT PROBE - ICMP Ping + HTTP Throughput                       ║");
    println!("╚══════════════════════════════════════════════════════════════════════════════════════════════╝");
    println!();
}

fn print_population_row(name: &str, unit: &str, s: &PopulationStats) {
    println!(
        "│ {:<8} │ {:>9.2}{:<2} │ {:>9.2}{:<2} │ {:>9.2}{:<2} │ {:>9.2}{:<2} │ {:>9.2}{:<2} │",
        name, s.min, unit, s.p5, unit, s.mean, unit, s.p95, unit, s.max, unit
    );
}

pub fn print_population(stats: &BatchStats, composite: Option<&PopulationStats>) {
    println!("┌──────────────────────────────────────────────────────────────────────────────┐");
    println!("│                            POPULATION STATISTICS                             │");
    println!("├──────────┬─────────────┬─────────────┬─────────────┬─────────────┬─────────────┤");
    println!(
        "│ {:<8} │ {:>11} │ {:>11} │ {:>11} │ {:>11} │ {:>11} │",
        "Metric", "Min", "P5", "Mean", "P95", "Max"
    );
    println!("├──────────┼─────────────┼─────────────┼─────────────┼─────────────┼─────────────┤");
    print_population_row("Err", "%", &stats.error_rate.scaled(100.0));
    if let Some(rtt) = &stats.rtt {
        print_population_row("RTT", "ms", rtt);
    }
    print_population_row("Pings", "", &stats.sample_count);
    if let Some(composite) = composite {
        print_population_row("Score", "", composite);
    }
    println!("└──────────┴─────────────┴─────────────┴─────────────┴─────────────┴─────────────┘");
}

fn tiers(bands: &Bands) -> String {
    format!("{}/{}/{}", bands.error.label(), bands.reputation.label(), bands.rtt.label())
}

pub fn print_ranking(scored: &Scored) {
    let finalists = scored.finalists().len();
    println!();
    println!("┌────────────────────────────────────────────────────────────────────────────────────────────────────────────────────────────────────────┐");
    println!("│                         RANKING (* = finalist, score 0-10, higher is better)                                                           │");
    println!("├────────────────────────────────────────────────────────────────────────────────────────────────────────────────────────────────────────┤");
    println!(
        "│ {:>5} │ {:<10} │ {:<20} │ {:>6} │ {:>6} │ {:>8} │ {:>14} │ {:>2} {:>2} {:>2} │ {:>5} │ {:<27} │",
        "Rank",
        "Id",
        "Location",
        "Avail",
        "Pings",
        "Err",
        "RTT",
        "E",
        "R",
        "T",
        "Score",
        "Tiers (err/pings/rtt)"
    );
    println!("├───────┼────────────┼──────────────────────┼────────┼────────┼──────────┼────────────────┼──────────┼───────┼─────────────────────────────┤");
    for (i, r) in scored.ranked.iter().enumerate() {
        let rank = if i < finalists { format!("*{}", i + 1) } else { (i + 1).to_string() };
        println!(
            "│ {:>5} │ {:<10} │ {:<20} │ {:>6} │ {:>6} │ {:>7.2}% │ {:>14} │ {:>2} {:>2} {:>2} │ {:>5.1} │ {:<27} │",
            rank,
            truncate_str(&r.candidate.id, 10),
            truncate_str(&r.candidate.location, 20),
            truncate_str(&r.candidate.remaining_capacity, 6),
            r.ping.sample_count,
            r.ping.error_rate * 100.0,
            format_rtt(&r.ping),
            r.score.error_subscore,
            r.score.reputation_subscore,
            r.score.rtt_subscore,
            r.score.composite,
            tiers(&r.bands),
        );
    }
    println!("└───────┴────────────┴──────────────────────┴────────┴────────┴──────────┴────────────────┴──────────┴───────┴─────────────────────────────┘");
}

pub fn print_unresolved(unresolved: &[Candidate]) {
    if unresolved.is_empty() {
        return;
    }
    println!();
    println!("Unresolved ({}), not probed:", unresolved.len());
    for c in unresolved {
        println!("  {:<10} {:<32} {}", c.id, c.domain, c.location);
    }
}

pub fn throughput_line(outcome: &ThroughputOutcome) -> String {
    match &outcome.result {
        Ok(t) => format!(
            "{}\tdownload {}\trt {:.0}ms\tpayload {} bytes",
            outcome.id,
            format_rate(t.bytes_per_sec),
            t.avg_response_latency.as_secs_f64() * 1000.0,
            t.payload_bytes
        ),
        Err(e) => format!("{}\tdownload undefined ({e})", outcome.id),
    }
}

pub fn print_throughput(outcomes: &[ThroughputOutcome]) {
    if outcomes.is_empty() {
        return;
    }
    println!();
    println!("Throughput:");
    for outcome in outcomes {
        println!("  {}", throughput_line(outcome));
    }
}

/* ================== JSON Report ================== */

#[derive(Debug, Serialize)]
struct ThroughputEntry<'a> {
    id: &'a str,
    domain: &'a str,
    /// `None` when the test was undefined.
    result: Option<&'a ThroughputResult>,
    error: Option<String>,
}

#[derive(Debug, Serialize)]
struct JsonReport<'a> {
    #[serde(flatten)]
    scored: &'a Scored,
    finalists: Vec<&'a str>,
    throughput: Vec<ThroughputEntry<'a>>,
}

pub fn to_json(scored: &Scored, outcomes: &[ThroughputOutcome]) -> serde_json::Result<String> {
    let report = JsonReport {
        scored,
        finalists: scored.finalists().iter().map(|r| r.candidate.id.as_str()).collect(),
        throughput: outcomes
            .iter()
            .map(|o| ThroughputEntry {
                id: &o.id,
                domain: &o.domain,
                result: o.result.as_ref().ok(),
                error: o.result.as_ref().err().map(ToString::to_string),
            })
            .collect(),
    };
    serde_json::to_string_pretty(&report)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::error::ThroughputError;

    #[test]
    fn truncates_long_names() {
        assert_eq!(truncate_str("short", 10), "short");
        assert_eq!(truncate_str("a-very-long-location", 10), "a-very-...");
    }

    #[test]
    fn tiers_list_every_metric() {
        let bands = Bands { error: Band::Best, reputation: Band::Average, rtt: Band::Bottom5 };
        assert_eq!(tiers(&bands), "best/avg/bottom5");
    }

    #[test]
    fn rate_formatting() {
        assert_eq!(format_rate(2_000_000.0), "2.00 MB/s (16.0 Mbit/s)");
    }

    #[test]
    fn rtt_formatting() {
        let ping = PingResult::from_samples(&[10.0, 10.0], 0);
        assert_eq!(format_rtt(&ping), "10.0±0.0ms");
        assert_eq!(format_rtt(&PingResult::from_samples(&[], 3)), "-");
    }

    #[test]
    fn undefined_throughput_is_not_zero() {
        let outcome = ThroughputOutcome {
            id: "s1".into(),
            domain: "s1.example.com".into(),
            result: Err(ThroughputError::NoSuccessfulRequests { payload: 245_000, attempted: 2 }),
        };
        let line = throughput_line(&outcome);
        assert!(line.contains("undefined"));
        assert!(!line.contains("0.00 MB/s"));

        let ok = ThroughputOutcome {
            id: "s2".into(),
            domain: "s2.example.com".into(),
            result: Ok(ThroughputResult {
                avg_response_latency: Duration::from_millis(40),
                bytes_per_sec: 2_000_000.0,
                payload_bytes: 8_000_000,
            }),
        };
        assert!(throughput_line(&ok).starts_with("s2\tdownload 2.00 MB/s"));
    }
}
