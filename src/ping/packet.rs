//! ICMPv4 echo encoding and reply parsing.

use std::net::Ipv4Addr;

pub const ECHO_REPLY: u8 = 0;
pub const DESTINATION_UNREACHABLE: u8 = 3;
pub const ECHO_REQUEST: u8 = 8;
pub const TIME_EXCEEDED: u8 = 11;

pub const HEADER_LEN: usize = 8;

/// A parsed inbound ICMP message we can correlate with a pending echo.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IcmpMessage {
    EchoReply { identifier: u16, sequence: u16 },
    /// Unreachable or time-exceeded report quoting one of our requests.
    Undeliverable {
        icmp_type: u8,
        code: u8,
        destination: Ipv4Addr,
        identifier: u16,
        sequence: u16,
    },
}

/// RFC 1071 internet checksum.
pub fn checksum(data: &[u8]) -> u16 {
    let mut sum: u32 = data
        .chunks(2)
        .map(|pair| match pair {
            [hi, lo] => u32::from(u16::from_be_bytes([*hi, *lo])),
            [hi] => u32::from(*hi) << 8,
            _ => 0,
        })
        .sum();
    while sum >> 16 != 0 {
        sum = (sum & 0xffff) + (sum >> 16);
    }
    !(sum as u16)
}

/// Builds an echo request of `packet_size` bytes (header included).
pub fn echo_request(identifier: u16, sequence: u16, packet_size: usize) -> Vec<u8> {
    let mut buf = vec![0u8; packet_size.max(HEADER_LEN)];
    buf[0] = ECHO_REQUEST;
    buf[4..6].copy_from_slice(&identifier.to_be_bytes());
    buf[6..8].copy_from_slice(&sequence.to_be_bytes());
    for (i, b) in buf[HEADER_LEN..].iter_mut().enumerate() {
        *b = (i % 256) as u8;
    }
    let sum = checksum(&buf);
    buf[2..4].copy_from_slice(&sum.to_be_bytes());
    buf
}

/// Strips a leading IPv4 header if present. Raw sockets (and datagram
/// sockets on some platforms) deliver it.
fn strip_ipv4_header(buf: &[u8]) -> Option<&[u8]> {
    match buf.first() {
        Some(b) if b >> 4 == 4 => {
            let ihl = usize::from(b & 0x0f) * 4;
            if ihl < 20 || buf.len() < ihl {
                return None;
            }
            Some(&buf[ihl..])
        }
        Some(_) => Some(buf),
        None => None,
    }
}

fn id_seq(icmp: &[u8]) -> Option<(u16, u16)> {
    if icmp.len() < HEADER_LEN {
        return None;
    }
    Some((u16::from_be_bytes([icmp[4], icmp[5]]), u16::from_be_bytes([icmp[6], icmp[7]])))
}

pub fn parse(buf: &[u8]) -> Option<IcmpMessage> {
    let icmp = strip_ipv4_header(buf)?;
    if icmp.len() < HEADER_LEN {
        return None;
    }
    match icmp[0] {
        ECHO_REPLY => {
            let (identifier, sequence) = id_seq(icmp)?;
            Some(IcmpMessage::EchoReply { identifier, sequence })
        }
        icmp_type @ (DESTINATION_UNREACHABLE | TIME_EXCEEDED) => {
            // Body quotes the original IP header plus the first 8 bytes of our request.
            let quoted = &icmp[HEADER_LEN..];
            if quoted.len() < 20 || quoted[0] >> 4 != 4 {
                return None;
            }
            let destination = Ipv4Addr::new(quoted[16], quoted[17], quoted[18], quoted[19]);
            let inner = strip_ipv4_header(quoted)?;
            if inner.first() != Some(&ECHO_REQUEST) {
                return None;
            }
            let (identifier, sequence) = id_seq(inner)?;
            Some(IcmpMessage::Undeliverable {
                icmp_type,
                code: icmp[1],
                destination,
                identifier,
                sequence,
            })
        }
        _ => None,
    }
}
