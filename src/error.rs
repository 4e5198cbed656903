//! Error types for each probing stage.
//!
//! Per-candidate failures (resolution, ping, throughput) are recorded on the
//! candidate's result and never abort the batch. A [`SourceError`] or a
//! [`PingError::Socket`] on session open is fatal to a run.

use std::{io, net::Ipv4Addr, path::PathBuf, time::Duration};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("lookup for {host} failed: {source}")]
    Lookup {
        host: String,
        #[source]
        source: io::Error,
    },
    #[error("{host} has no IPv4 address")]
    NoIpv4 { host: String },
}

#[derive(Debug, Error)]
pub enum PingError {
    #[error("failed to open ICMP socket: {0}")]
    Socket(#[source] io::Error),
    #[error("send to {target} failed: {source}")]
    Send {
        target: Ipv4Addr,
        #[source]
        source: io::Error,
    },
    #[error("no reply from {target} within {timeout:?}")]
    Timeout { target: Ipv4Addr, timeout: Duration },
    #[error("{target} unreachable (icmp code {code})")]
    Unreachable { target: Ipv4Addr, code: u8 },
    #[error("no free sequence id for {target}")]
    SequenceExhausted { target: Ipv4Addr },
    #[error("ping session closed")]
    SessionClosed,
}

#[derive(Debug, Error)]
pub enum ThroughputError {
    #[error("request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("{url} answered with status {status}")]
    Status { url: String, status: u16 },
    #[error("request to {url} exceeded {timeout:?}")]
    Timeout { url: String, timeout: Duration },
    #[error("all {attempted} requests of the round at {payload} bytes failed")]
    NoSuccessfulRequests { payload: u64, attempted: usize },
    #[error("payload ladder is empty")]
    EmptyLadder,
    #[error("failed to build http client: {0}")]
    Client(#[source] reqwest::Error),
}

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("failed to read candidate list {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse candidate list {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("candidate list is empty")]
    Empty,
}

#[derive(Debug, Error)]
pub enum SelectionError {
    #[error("index {index} is out of range 1..={len}")]
    OutOfRange { index: usize, len: usize },
    #[error("'{token}' is not a candidate index")]
    InvalidToken { token: String },
    #[error("failed to read selection: {0}")]
    Io(#[from] io::Error),
}
