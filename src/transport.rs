//! Probe transports of the hop discovery engine.
//!
//! UDP and TCP probes are sent from short-lived sockets; the replies they
//! trigger are ICMP messages read on the engine's ICMP socket. ICMP probes have
//! no transport: they are written on that shared socket directly.
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use anyhow::Result;
use socket2::Socket;

use crate::config::{ProbeMethod, TraceConfig};
use crate::models::{Probe, L3, L4};

mod half_open;
mod tcp;
mod udp;

pub use half_open::*;
pub use tcp::*;
pub use udp::*;

/// Send a single probe with the TTL and the port pair it describes.
pub trait ProbeTransport: Send {
    fn send_probe(&mut self, probe: &Probe, payload: &[u8]) -> Result<()>;
}

/// Pick the transport of a probe method, `None` for ICMP probes.
pub fn for_method(method: ProbeMethod, config: &TraceConfig) -> Option<Box<dyn ProbeTransport>> {
    match method {
        ProbeMethod::Icmp => None,
        ProbeMethod::Default | ProbeMethod::Udp => Some(Box::new(UdpTransport)),
        ProbeMethod::Tcp => Some(Box::new(TcpTransport::new(config.connect_timeout))),
        ProbeMethod::TcpHalfOpen => Some(half_open_transport(config.connect_timeout)),
    }
}

/// The L4 protocol of the probes of a method.
pub fn probe_protocol(method: ProbeMethod, l3_protocol: L3) -> L4 {
    match method {
        ProbeMethod::Icmp => l3_protocol.icmp(),
        ProbeMethod::Default | ProbeMethod::Udp => L4::UDP,
        ProbeMethod::Tcp | ProbeMethod::TcpHalfOpen => L4::TCP,
    }
}

pub(crate) fn unspecified(l3_protocol: L3) -> IpAddr {
    match l3_protocol {
        L3::IPv4 => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
        L3::IPv6 => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
    }
}

pub(crate) fn set_hop_limit(socket: &Socket, l3_protocol: L3, ttl: u8) -> std::io::Result<()> {
    match l3_protocol {
        L3::IPv4 => socket.set_ttl(ttl as u32),
        L3::IPv6 => socket.set_unicast_hops_v6(ttl as u32),
    }
}

#[cfg(test)]
mod tests {
    use crate::config::{ProbeMethod, TraceConfig};
    use crate::models::{L3, L4};
    use crate::transport::{for_method, probe_protocol};

    #[test]
    fn test_probe_protocol() {
        assert_eq!(probe_protocol(ProbeMethod::Icmp, L3::IPv6), L4::ICMPv6);
        assert_eq!(probe_protocol(ProbeMethod::Default, L3::IPv4), L4::UDP);
        assert_eq!(probe_protocol(ProbeMethod::TcpHalfOpen, L3::IPv4), L4::TCP);
    }

    #[test]
    fn test_icmp_has_no_transport() {
        let config = TraceConfig::default();
        assert!(for_method(ProbeMethod::Icmp, &config).is_none());
        assert!(for_method(ProbeMethod::Tcp, &config).is_some());
    }
}
