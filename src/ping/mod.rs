//! ICMP echo probing.
//!
//! - [`PingSession`]: the single shared socket, correlating replies by sequence id
//! - [`sample_window`]: the per-candidate sampling loop

mod packet;
mod prober;
mod session;

use std::{future::Future, net::Ipv4Addr, time::Duration};

pub use prober::sample_window;
pub use session::PingSession;

use crate::error::PingError;

/// Sends a single echo probe and yields its round-trip time.
pub trait Pinger {
    fn ping(&self, target: Ipv4Addr) -> impl Future<Output = Result<Duration, PingError>> + Send;
}
