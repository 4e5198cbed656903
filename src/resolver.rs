//! Hostname to IPv4 resolution with a bounded retry budget.

use std::{future::Future, net::{IpAddr, Ipv4Addr}};

use tracing::debug;

use crate::error::ResolveError;

/// Resolves a hostname to one IPv4 address.
pub trait Resolve {
    fn resolve(&self, host: &str) -> impl Future<Output = Result<Ipv4Addr, ResolveError>> + Send;
}

/// Resolver backed by the system's `getaddrinfo` through tokio.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemResolver;

impl Resolve for SystemResolver {
    async fn resolve(&self, host: &str) -> Result<Ipv4Addr, ResolveError> {
        let addr_str = format!("{host}:0");
        let mut addrs = tokio::net::lookup_host(addr_str)
            .await
            .map_err(|source| ResolveError::Lookup { host: host.to_string(), source })?;
        let first_v4 = addrs.find_map(|addr| match addr.ip() {
            IpAddr::V4(ip) => Some(ip),
            IpAddr::V6(_) => None,
        });
        first_v4.ok_or_else(|| ResolveError::NoIpv4 { host: host.to_string() })
    }
}

/// Tries `resolver` up to `attempts` times, returning the last error.
pub async fn resolve_with_retry<R: Resolve>(
    resolver: &R,
    host: &str,
    attempts: usize,
) -> Result<Ipv4Addr, ResolveError> {
    let attempts = attempts.max(1);
    let mut attempt = 1;
    loop {
        match resolver.resolve(host).await {
            Ok(ip) => return Ok(ip),
            Err(e) if attempt < attempts => {
                debug!(host, attempt, error = %e, "resolve failed, retrying");
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
