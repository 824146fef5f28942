use crate::error::TraceError;
use pnet_packet::icmp::{IcmpPacket, IcmpTypes};
use pnet_packet::ipv4::Ipv4Packet;
use pnet_packet::udp::UdpPacket;
use pnet_packet::Packet;
use socket2::{Domain, Protocol, Socket, Type};
use std::io::{self, Read};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::{Duration, Instant};

pub const DEFAULT_PORT: u16 = 33434;

/// Reply to one TTL-scoped probe.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProbeReply {
    pub responder: IpAddr,
    /// The destination itself answered; there is nothing past this hop.
    pub is_final: bool,
    pub rtt: Duration,
}

/// Sends one TTL-scoped datagram and waits up to `timeout` for an answer.
/// `Ok(None)` means nothing came back in time.
pub trait ProbePrimitive: Send + Sync {
    fn send_probe(
        &self,
        destination: Ipv4Addr,
        ttl: u8,
        port: u16,
        timeout: Duration,
    ) -> io::Result<Option<ProbeReply>>;
}

/// Classic UDP traceroute probe: an empty datagram with a short TTL, answered
/// by ICMP time-exceeded from routers or destination-unreachable from the
/// target. Needs permission to open a raw ICMP socket.
#[derive(Debug, Clone, Default)]
pub struct UdpProbe;

impl UdpProbe {
    pub fn new() -> Self {
        Self
    }

    /// Fails early when the process cannot open raw ICMP sockets.
    pub fn check_privileges() -> Result<(), TraceError> {
        Socket::new(Domain::IPV4, Type::RAW, Some(Protocol::ICMPV4))
            .map(|_| ())
            .map_err(TraceError::Socket)
    }
}

impl ProbePrimitive for UdpProbe {
    fn send_probe(
        &self,
        destination: Ipv4Addr,
        ttl: u8,
        port: u16,
        timeout: Duration,
    ) -> io::Result<Option<ProbeReply>> {
        let icmp_socket = Socket::new(Domain::IPV4, Type::RAW, Some(Protocol::ICMPV4))?;

        let udp_socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
        udp_socket.set_ttl(u32::from(ttl))?;
        udp_socket.bind(&SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0).into())?;
        let local_port = udp_socket
            .local_addr()?
            .as_socket()
            .map(|addr| addr.port())
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "probe socket has no port"))?;

        let target = SocketAddr::new(IpAddr::V4(destination), port);
        let send_time = Instant::now();
        udp_socket.send_to(&[], &target.into())?;
        let deadline = send_time + timeout;

        let mut buf = [0u8; 1500];
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(None);
            }
            icmp_socket.set_read_timeout(Some(remaining))?;

            let len = match (&icmp_socket).read(&mut buf) {
                Ok(len) => len,
                Err(err)
                    if matches!(
                        err.kind(),
                        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
                    ) =>
                {
                    return Ok(None);
                }
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(err),
            };

            if let Some((responder, is_final)) =
                match_reply(&buf[..len], destination, local_port, port)
            {
                return Ok(Some(ProbeReply {
                    responder: IpAddr::V4(responder),
                    is_final,
                    rtt: send_time.elapsed(),
                }));
            }
        }
    }
}

/// Checks that an ICMP datagram answers our probe: the quoted IPv4 header
/// must target `destination` and the quoted UDP header must carry our ports.
/// Every raw socket sees every ICMP packet, so concurrent probes rely on this
/// to pick out their own replies.
pub(crate) fn match_reply(
    datagram: &[u8],
    destination: Ipv4Addr,
    local_port: u16,
    port: u16,
) -> Option<(Ipv4Addr, bool)> {
    let outer = Ipv4Packet::new(datagram)?;
    let icmp = IcmpPacket::new(outer.payload())?;
    let is_final = match icmp.get_icmp_type() {
        IcmpTypes::TimeExceeded => false,
        IcmpTypes::DestinationUnreachable => true,
        _ => return None,
    };

    // 4 bytes of unused/next-hop-mtu precede the quoted datagram.
    let quoted = icmp.payload().get(4..)?;
    let inner = Ipv4Packet::new(quoted)?;
    if inner.get_destination() != destination {
        return None;
    }
    let header_len = usize::from(inner.get_header_length()) * 4;
    let udp = UdpPacket::new(quoted.get(header_len..)?)?;
    if udp.get_source() != local_port || udp.get_destination() != port {
        return None;
    }

    Some((outer.get_source(), is_final))
}
