use std::{
    cmp, io,
    net::IpAddr,
    time::{Duration, Instant},
};

use once_cell::sync::Lazy;
use pnet::{
    packet::{
        icmp::{self, echo_reply, echo_request, IcmpCode, IcmpPacket, IcmpTypes},
        icmpv6::{self, Icmpv6Code, Icmpv6Packet, Icmpv6Types},
        ip::IpNextHeaderProtocols,
        Packet,
    },
    transport::{
        icmp_packet_iter, icmpv6_packet_iter, transport_channel,
        TransportChannelType::Layer4, TransportProtocol,
    },
};

use crate::{error::ScanError, scan::Liveness};

const ECHO_COUNT: u16 = 4;
const ECHO_INTERVAL: Duration = Duration::from_secs(1);
const DEADLINE: Duration = Duration::from_secs(4);

const BUFFER_SZ: usize = 4096;
const ECHO_HDR_SZ: usize = 8;
const ECHO_PAYLOAD: &[u8] = b"gscan:up";
const ECHO_PCKT_SZ: usize = ECHO_HDR_SZ + ECHO_PAYLOAD.len();

const MIN_WAIT: Duration = Duration::from_millis(1);

static IDENTIFIER: Lazy<u16> = Lazy::new(rand::random);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PingStats {
    pub transmitted: u16,
    pub received: u16,
}

impl PingStats {
    /// Any reply at all means the host is there; loss doesn't matter.
    #[inline]
    pub fn is_up(&self) -> bool {
        self.received > 0
    }
}

/// ICMP echo liveness check. Echo requests go out once per interval
/// until `count` were sent; the exchange ends at the deadline or when
/// every request got its reply.
#[derive(Debug, Clone, Copy)]
pub struct IcmpPing {
    count: u16,
    interval: Duration,
    deadline: Duration,
}

impl Default for IcmpPing {
    fn default() -> Self {
        Self {
            count: ECHO_COUNT,
            interval: ECHO_INTERVAL,
            deadline: DEADLINE,
        }
    }
}

impl IcmpPing {
    pub fn run(&self, ip: IpAddr) -> Result<PingStats, ScanError> {
        let protocol = match ip {
            IpAddr::V4(_) => TransportProtocol::Ipv4(IpNextHeaderProtocols::Icmp),
            IpAddr::V6(_) => TransportProtocol::Ipv6(IpNextHeaderProtocols::Icmpv6),
        };

        let (mut tx, mut rx) =
            transport_channel(BUFFER_SZ, Layer4(protocol)).map_err(ScanError::IcmpChannelFailed)?;

        let ident = *IDENTIFIER;

        match ip {
            IpAddr::V4(_) => {
                let mut replies = icmp_packet_iter(&mut rx);
                self.exchange(
                    ip,
                    ident,
                    |seq| {
                        let raw = echo_request_v4(ident, seq)?;
                        let pckt = IcmpPacket::new(&raw).ok_or(ScanError::PacketBuildFailed)?;
                        tx.send_to(pckt, ip)
                            .map(drop)
                            .map_err(|e| ScanError::PacketSendFailed(ip, e))
                    },
                    |wait| {
                        Ok(replies
                            .next_with_timeout(wait)?
                            .map(|(pckt, src)| (src, reply_ident_v4(&pckt))))
                    },
                )
            }
            IpAddr::V6(_) => {
                let mut replies = icmpv6_packet_iter(&mut rx);
                self.exchange(
                    ip,
                    ident,
                    |seq| {
                        let raw = echo_request_v6(ident, seq)?;
                        let pckt = Icmpv6Packet::new(&raw).ok_or(ScanError::PacketBuildFailed)?;
                        tx.send_to(pckt, ip)
                            .map(drop)
                            .map_err(|e| ScanError::PacketSendFailed(ip, e))
                    },
                    |wait| {
                        Ok(replies
                            .next_with_timeout(wait)?
                            .map(|(pckt, src)| (src, reply_ident_v6(&pckt))))
                    },
                )
            }
        }
    }

    fn exchange<S, R>(
        &self,
        ip: IpAddr,
        ident: u16,
        mut send: S,
        mut recv: R,
    ) -> Result<PingStats, ScanError>
    where
        S: FnMut(u16) -> Result<(), ScanError>,
        R: FnMut(Duration) -> io::Result<Option<(IpAddr, Option<u16>)>>,
    {
        let started = Instant::now();
        let deadline = started + self.deadline;
        let mut next_send = started;
        let mut stats = PingStats::default();

        loop {
            let now = Instant::now();
            if now >= deadline || stats.received >= self.count {
                break;
            }

            if stats.transmitted < self.count && now >= next_send {
                send(stats.transmitted)?;
                stats.transmitted += 1;
                next_send += self.interval;
                continue;
            }

            let until = if stats.transmitted < self.count {
                cmp::min(next_send, deadline)
            } else {
                deadline
            };
            let wait = cmp::max(until.saturating_duration_since(now), MIN_WAIT);

            match recv(wait).map_err(|e| ScanError::PacketRecvFailed(ip, e))? {
                Some((src, Some(id))) if src == ip && id == ident => {
                    stats.received += 1;
                    log::debug!(
                        "Echo reply {} from `{}` after {:.3}s",
                        stats.received,
                        src,
                        started.elapsed().as_secs_f32()
                    );
                }
                _ => (),
            }
        }

        Ok(stats)
    }
}

impl Liveness for IcmpPing {
    fn is_up(&self, ip: IpAddr) -> bool {
        match self.run(ip) {
            Ok(stats) => {
                log::debug!(
                    "Sent {} echo requests to `{}`, received {} replies",
                    stats.transmitted,
                    ip,
                    stats.received
                );
                stats.is_up()
            }
            Err(e) => {
                log::warn!("{}", e);
                false
            }
        }
    }
}

fn echo_request_v4(ident: u16, seq: u16) -> Result<Vec<u8>, ScanError> {
    let mut raw = vec![0; ECHO_PCKT_SZ];
    {
        let mut echo =
            echo_request::MutableEchoRequestPacket::new(&mut raw).ok_or(ScanError::PacketBuildFailed)?;
        echo.set_icmp_type(IcmpTypes::EchoRequest);
        echo.set_icmp_code(IcmpCode::new(0));
        echo.set_identifier(ident);
        echo.set_sequence_number(seq);
        echo.set_payload(ECHO_PAYLOAD);

        let checksum = IcmpPacket::new(echo.packet())
            .map(|p| icmp::checksum(&p))
            .ok_or(ScanError::PacketBuildFailed)?;
        echo.set_checksum(checksum);
    }

    Ok(raw)
}

// The kernel fills in the ICMPv6 checksum on raw sockets.
fn echo_request_v6(ident: u16, seq: u16) -> Result<Vec<u8>, ScanError> {
    let mut raw = vec![0; ECHO_PCKT_SZ];
    {
        let mut echo = icmpv6::echo_request::MutableEchoRequestPacket::new(&mut raw)
            .ok_or(ScanError::PacketBuildFailed)?;
        echo.set_icmpv6_type(Icmpv6Types::EchoRequest);
        echo.set_icmpv6_code(Icmpv6Code::new(0));
        echo.set_identifier(ident);
        echo.set_sequence_number(seq);
        echo.set_payload(ECHO_PAYLOAD);
    }

    Ok(raw)
}

fn reply_ident_v4(pckt: &IcmpPacket) -> Option<u16> {
    if pckt.get_icmp_type() != IcmpTypes::EchoReply {
        return None;
    }

    echo_reply::EchoReplyPacket::new(pckt.packet()).map(|r| r.get_identifier())
}

fn reply_ident_v6(pckt: &Icmpv6Packet) -> Option<u16> {
    if pckt.get_icmpv6_type() != Icmpv6Types::EchoReply {
        return None;
    }

    icmpv6::echo_reply::EchoReplyPacket::new(pckt.packet()).map(|r| r.get_identifier())
}
