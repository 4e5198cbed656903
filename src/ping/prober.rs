use std::{net::Ipv4Addr, time::Duration};

use tokio::time::Instant;
use tracing::trace;

use super::Pinger;
use crate::{error::PingError, model::PingResult};

/// Pings `target` back to back until `window` has elapsed.
///
/// Every probe gets exactly one attempt. Each failure counts as one error
/// sample and sampling carries on, unless the session itself is gone.
pub async fn sample_window<P: Pinger>(
    pinger: &P,
    target: Ipv4Addr,
    window: Duration,
) -> PingResult {
    let started = Instant::now();
    let mut rtts_ms = Vec::new();
    let mut errors = 0u64;

    loop {
        match pinger.ping(target).await {
            Ok(rtt) => rtts_ms.push(rtt.as_secs_f64() * 1000.0),
            Err(PingError::SessionClosed) => {
                errors += 1;
                break;
            }
            Err(e) => {
                trace!(%target, error = %e, "probe failed");
                errors += 1;
            }
        }
        if started.elapsed() >= window {
            break;
        }
    }

    PingResult::from_samples(&rtts_ms, errors)
}
