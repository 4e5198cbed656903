//! Server RTT Probe
//!
//! Pings every candidate server over one shared ICMP socket, ranks them by
//! loss and latency against the batch's own percentiles, then runs an
//! adaptive HTTP download test on the finalists the user picks.
//!
//! # Usage
//!
//! ```bash
//! # Unprivileged ICMP needs net.ipv4.ping_group_range to include your gid,
//! # otherwise run with CAP_NET_RAW.
//! server-rtt-probe --candidates servers.json
//!
//! # Non-interactive: throughput-test the best 3, JSON on stdout
//! server-rtt-probe --candidates servers.json --select auto:3 --json
//! ```

use std::io::IsTerminal;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use server_rtt_probe::{
    config::{Cli, LogFormat, SelectMode},
    ping::PingSession,
    report,
    resolver::SystemResolver,
    select::{AutoSelector, InteractiveSelector, NoSelection, Selector},
    source::{CandidateSource, JsonFileSource},
    throughput::HttpDownloader,
    Pipeline,
};

fn init_logging(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Json => registry.with(fmt::layer().json().with_writer(std::io::stderr)).init(),
        LogFormat::Text => {
            let ansi = std::io::stderr().is_terminal();
            registry.with(fmt::layer().with_writer(std::io::stderr).with_ansi(ansi)).init()
        }
    }
}

fn selector_for(mode: SelectMode) -> Box<dyn Selector> {
    match mode {
        SelectMode::Interactive => Box::new(InteractiveSelector::stdio()),
        SelectMode::Auto(count) => Box::new(AutoSelector { count }),
        SelectMode::None => Box::new(NoSelection),
    }
}

/* ================== Main ================== */

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_format);
    let config = cli.pipeline_config();

    if !cli.json {
        report::print_header();
    }

    let seeds = JsonFileSource::new(&cli.candidates)
        .load()
        .await
        .context("failed to load candidate list")?;

    let session = PingSession::open(&config.ping).context("failed to open ping session")?;
    let downloader = HttpDownloader::new(&config.throughput)?;
    let pipeline = Pipeline::new(config, SystemResolver, session, downloader);

    tracing::info!(
        candidates = seeds.len(),
        concurrency = pipeline.config().max_concurrent_probes,
        window_secs = pipeline.config().ping.window.as_secs(),
        "starting probe"
    );
    let scored = pipeline.rank(seeds).await;

    if !cli.json {
        if let Some(stats) = &scored.stats {
            report::print_population(stats, scored.composite_stats.as_ref());
        }
        report::print_ranking(&scored);
        report::print_unresolved(&scored.unresolved);
    }

    let finalists = report::finalists_for_selection(&scored);
    let mut selector = selector_for(cli.select);
    let selected = tokio::task::block_in_place(|| selector.select(&finalists))
        .context("selection failed")?;

    let outcomes = pipeline.throughput(&scored, &selected).await;

    if cli.json {
        println!("{}", report::to_json(&scored, &outcomes)?);
    } else {
        report::print_throughput(&outcomes);
        if let Some(best) = scored.finalists().first() {
            println!();
            println!(
                "RECOMMENDATION: '{}' ({}) {}",
                best.candidate.id,
                best.candidate.location,
                report::format_metrics_summary(best)
            );
        }
        println!();
    }

    Ok(())
}
