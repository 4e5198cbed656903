//! One ICMP socket shared by every concurrent probe.
//!
//! Requests are keyed by sequence id in an in-flight map. A background task
//! reads replies and completes the matching request through a oneshot
//! channel. Each request reclaims its own entry on timeout, so a lost reply
//! never affects other requests sharing the socket.

use std::{
    io,
    net::{IpAddr, Ipv4Addr, SocketAddr},
    sync::{
        atomic::{AtomicU16, Ordering},
        Arc,
    },
    time::Duration,
};

use dashmap::{mapref::entry::Entry, DashMap};
use socket2::{Domain, Protocol, Socket, Type};
use tokio::{net::UdpSocket, sync::oneshot, task::JoinHandle, time::Instant};
use tracing::{debug, trace, warn};

use super::{
    packet::{self, IcmpMessage},
    Pinger,
};
use crate::{config::PingConfig, error::PingError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SocketKind {
    /// Unprivileged `SOCK_DGRAM` ICMP. The kernel owns the identifier.
    Datagram,
    /// `SOCK_RAW`, sees all ICMP traffic so replies are filtered by identifier.
    Raw,
}

enum Reply {
    Echo { received_at: Instant },
    Undeliverable { code: u8 },
}

struct Pending {
    target: Ipv4Addr,
    tx: oneshot::Sender<Reply>,
}

struct Shared {
    socket: UdpSocket,
    kind: SocketKind,
    identifier: u16,
    packet_size: usize,
    timeout: Duration,
    next_sequence: AtomicU16,
    in_flight: DashMap<u16, Pending>,
}

struct ReceiverTask(JoinHandle<()>);

impl Drop for ReceiverTask {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Handle to the shared probing session. Clones share the same socket.
#[derive(Clone)]
pub struct PingSession {
    shared: Arc<Shared>,
    _receiver: Arc<ReceiverTask>,
}

impl std::fmt::Debug for PingSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PingSession")
            .field("kind", &self.shared.kind)
            .field("identifier", &self.shared.identifier)
            .field("in_flight", &self.shared.in_flight.len())
            .finish()
    }
}

fn open_socket(ttl: u32) -> io::Result<(UdpSocket, SocketKind)> {
    let (socket, kind) = match Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::ICMPV4)) {
        Ok(s) => (s, SocketKind::Datagram),
        Err(dgram_err) => {
            debug!(error = %dgram_err, "datagram ICMP socket unavailable, trying raw");
            let s = Socket::new(Domain::IPV4, Type::RAW, Some(Protocol::ICMPV4))
                .map_err(|_| dgram_err)?;
            (s, SocketKind::Raw)
        }
    };
    socket.set_ttl(ttl)?;
    socket.set_nonblocking(true)?;
    let std_socket: std::net::UdpSocket = socket.into();
    Ok((UdpSocket::from_std(std_socket)?, kind))
}

impl PingSession {
    /// Opens the ICMP socket and starts the reply reader. Must run inside a
    /// tokio runtime.
    pub fn open(config: &PingConfig) -> Result<Self, PingError> {
        let (socket, kind) = open_socket(config.ttl).map_err(PingError::Socket)?;
        let shared = Arc::new(Shared {
            socket,
            kind,
            identifier: (std::process::id() % 65535) as u16,
            packet_size: config.packet_size,
            timeout: config.timeout,
            next_sequence: AtomicU16::new(0),
            in_flight: DashMap::new(),
        });
        let receiver = tokio::spawn(receive_loop(Arc::clone(&shared)));
        debug!(?kind, identifier = shared.identifier, "ping session open");
        Ok(Self { shared, _receiver: Arc::new(ReceiverTask(receiver)) })
    }

    /// Number of requests awaiting a reply.
    pub fn in_flight(&self) -> usize {
        self.shared.in_flight.len()
    }

    fn claim_sequence(
        &self,
        target: Ipv4Addr,
    ) -> Result<(InFlightGuard<'_>, oneshot::Receiver<Reply>), PingError> {
        for _ in 0..=u16::MAX {
            let sequence = self.shared.next_sequence.fetch_add(1, Ordering::Relaxed);
            if let Entry::Vacant(slot) = self.shared.in_flight.entry(sequence) {
                let (tx, rx) = oneshot::channel();
                slot.insert(Pending { target, tx });
                return Ok((InFlightGuard { map: &self.shared.in_flight, sequence }, rx));
            }
        }
        Err(PingError::SequenceExhausted { target })
    }

    /// Sends one echo request and waits for its reply or timeout.
    pub async fn ping(&self, target: Ipv4Addr) -> Result<Duration, PingError> {
        let (guard, rx) = self.claim_sequence(target)?;
        let request =
            packet::echo_request(self.shared.identifier, guard.sequence, self.shared.packet_size);

        let sent_at = Instant::now();
        self.shared
            .socket
            .send_to(&request, SocketAddr::new(IpAddr::V4(target), 0))
            .await
            .map_err(|source| PingError::Send { target, source })?;

        let timeout = self.shared.timeout;
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(Reply::Echo { received_at })) => {
                Ok(received_at.saturating_duration_since(sent_at))
            }
            Ok(Ok(Reply::Undeliverable { code })) => Err(PingError::Unreachable { target, code }),
            Ok(Err(_)) => Err(PingError::SessionClosed),
            Err(_) => Err(PingError::Timeout { target, timeout }),
        }
        // `guard` drops here and reclaims the sequence id if no reply came.
    }
}

impl Pinger for PingSession {
    async fn ping(&self, target: Ipv4Addr) -> Result<Duration, PingError> {
        PingSession::ping(self, target).await
    }
}

/// Removes the in-flight entry when a request finishes, times out or is dropped.
struct InFlightGuard<'a> {
    map: &'a DashMap<u16, Pending>,
    sequence: u16,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.map.remove(&self.sequence);
    }
}

impl Shared {
    fn complete(&self, sequence: u16, from: Ipv4Addr, reply: Reply) {
        match self.in_flight.remove_if(&sequence, |_, pending| pending.target == from) {
            Some((_, pending)) => {
                let _ = pending.tx.send(reply);
            }
            None => trace!(sequence, %from, "reply without matching request"),
        }
    }

    fn dispatch(&self, message: IcmpMessage, from: Ipv4Addr, received_at: Instant) {
        let owned =
            |identifier: u16| self.kind == SocketKind::Datagram || identifier == self.identifier;
        match message {
            IcmpMessage::EchoReply { identifier, sequence } if owned(identifier) => {
                self.complete(sequence, from, Reply::Echo { received_at });
            }
            IcmpMessage::Undeliverable { code, destination, identifier, sequence, .. }
                if owned(identifier) =>
            {
                self.complete(sequence, destination, Reply::Undeliverable { code });
            }
            _ => {}
        }
    }
}

async fn receive_loop(shared: Arc<Shared>) {
    let mut buf = [0u8; 1500];
    loop {
        let (len, from) = match shared.socket.recv_from(&mut buf).await {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, "icmp receive failed");
                tokio::time::sleep(Duration::from_millis(10)).await;
                continue;
            }
        };
        let received_at = Instant::now();
        let IpAddr::V4(from) = from.ip() else { continue };
        if let Some(message) = packet::parse(&buf[..len]) {
            shared.dispatch(message, from, received_at);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ID: u16 = 0x1234;

    /// Session over a plain UDP socket with no reader task; replies are fed
    /// straight into `dispatch`.
    async fn offline_session(kind: SocketKind) -> PingSession {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let shared = Arc::new(Shared {
            socket,
            kind,
            identifier: ID,
            packet_size: 16,
            timeout: Duration::from_millis(600),
            next_sequence: AtomicU16::new(0),
            in_flight: DashMap::new(),
        });
        PingSession { shared, _receiver: Arc::new(ReceiverTask(tokio::spawn(async {}))) }
    }

    fn host(last: u8) -> Ipv4Addr {
        Ipv4Addr::new(192, 0, 2, last)
    }

    fn echo(identifier: u16, sequence: u16) -> IcmpMessage {
        IcmpMessage::EchoReply { identifier, sequence }
    }

    #[tokio::test]
    async fn replies_complete_their_own_request_in_any_order() {
        let session = offline_session(SocketKind::Raw).await;
        let (a, rx_a) = session.claim_sequence(host(1)).unwrap();
        let (b, mut rx_b) = session.claim_sequence(host(2)).unwrap();
        let (c, rx_c) = session.claim_sequence(host(3)).unwrap();
        assert_eq!((a.sequence, b.sequence, c.sequence), (0, 1, 2));
        assert_eq!(session.in_flight(), 3);

        let t1 = Instant::now();
        let shared = &session.shared;
        shared.dispatch(echo(ID, c.sequence), host(3), t1);
        shared.dispatch(echo(ID, a.sequence), host(1), t1);
        // Foreign identifier and wrong source leave b pending.
        shared.dispatch(echo(ID + 1, b.sequence), host(2), t1);
        shared.dispatch(echo(ID, b.sequence), host(9), t1);
        assert!(rx_b.try_recv().is_err());
        assert_eq!(session.in_flight(), 1);

        let t2 = Instant::now();
        shared.dispatch(echo(ID, b.sequence), host(2), t2);

        assert!(matches!(rx_a.await, Ok(Reply::Echo { received_at }) if received_at == t1));
        assert!(matches!(rx_b.await, Ok(Reply::Echo { received_at }) if received_at == t2));
        assert!(matches!(rx_c.await, Ok(Reply::Echo { received_at }) if received_at == t1));
        assert_eq!(session.in_flight(), 0);
        drop((a, b, c));
        assert_eq!(session.in_flight(), 0);
    }

    #[tokio::test]
    async fn datagram_socket_ignores_identifier() {
        let session = offline_session(SocketKind::Datagram).await;
        let (guard, rx) = session.claim_sequence(host(1)).unwrap();
        // The kernel rewrites the identifier on unprivileged sockets.
        session.shared.dispatch(echo(0xbeef, guard.sequence), host(1), Instant::now());
        assert!(matches!(rx.await, Ok(Reply::Echo { .. })));
    }

    #[tokio::test]
    async fn undeliverable_matches_on_quoted_destination() {
        let session = offline_session(SocketKind::Raw).await;
        let (guard, rx) = session.claim_sequence(host(7)).unwrap();
        let report = IcmpMessage::Undeliverable {
            icmp_type: 3,
            code: 1,
            destination: host(7),
            identifier: ID,
            sequence: guard.sequence,
        };
        // Sent by a router, not by the target.
        session.shared.dispatch(report, Ipv4Addr::new(198, 51, 100, 1), Instant::now());
        assert!(matches!(rx.await, Ok(Reply::Undeliverable { code: 1 })));
    }

    #[tokio::test]
    async fn dropped_request_reclaims_its_sequence() {
        let session = offline_session(SocketKind::Raw).await;
        let (guard, rx) = session.claim_sequence(host(1)).unwrap();
        let sequence = guard.sequence;
        drop(guard);
        drop(rx);
        assert_eq!(session.in_flight(), 0);

        // A late reply for the reclaimed id is dropped quietly.
        session.shared.dispatch(echo(ID, sequence), host(1), Instant::now());

        // Once the counter wraps, the freed id is handed out again.
        session.shared.next_sequence.store(sequence, Ordering::Relaxed);
        let (again, _rx) = session.claim_sequence(host(2)).unwrap();
        assert_eq!(again.sequence, sequence);
    }

    #[tokio::test]
    async fn busy_sequences_are_skipped() {
        let session = offline_session(SocketKind::Raw).await;
        let (first, _rx1) = session.claim_sequence(host(1)).unwrap();
        session.shared.next_sequence.store(first.sequence, Ordering::Relaxed);
        let (second, _rx2) = session.claim_sequence(host(1)).unwrap();
        assert_ne!(first.sequence, second.sequence);
        assert_eq!(session.in_flight(), 2);
    }

    #[tokio::test]
    #[ignore = "needs ICMP socket permission (ping_group_range or CAP_NET_RAW)"]
    async fn loopback_echo() {
        let session = PingSession::open(&PingConfig::default()).unwrap();
        let rtt = session.ping(Ipv4Addr::LOCALHOST).await.unwrap();
        assert!(rtt < Duration::from_millis(600));
        assert_eq!(session.in_flight(), 0);
    }

    #[tokio::test]
    #[ignore = "needs ICMP socket permission (ping_group_range or CAP_NET_RAW)"]
    async fn concurrent_probes_share_one_socket() {
        let session = PingSession::open(&PingConfig::default()).unwrap();
        let probes = (0..32).map(|_| session.ping(Ipv4Addr::LOCALHOST));
        let results = futures::future::join_all(probes).await;
        assert!(results.iter().all(|r| r.is_ok()));
        assert_eq!(session.in_flight(), 0);
    }
}
