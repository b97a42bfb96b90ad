use std::net::SocketAddr;

use anyhow::{Context, Result};
use log::trace;
use socket2::{Domain, Protocol, SockAddr, Socket, Type};

use crate::models::Probe;
use crate::transport::{set_hop_limit, unspecified, ProbeTransport};

/// Send each probe from a fresh UDP socket bound to the probe source port.
pub struct UdpTransport;

impl ProbeTransport for UdpTransport {
    fn send_probe(&mut self, probe: &Probe, payload: &[u8]) -> Result<()> {
        let destination = probe.destination();
        let socket = Socket::new(
            Domain::for_address(destination),
            Type::DGRAM,
            Some(Protocol::UDP),
        )
        .context("cannot open UDP socket")?;
        socket.set_reuse_address(true)?;
        let local = SocketAddr::new(unspecified(probe.l3_protocol()), probe.src_port);
        socket
            .bind(&SockAddr::from(local))
            .with_context(|| format!("cannot bind UDP socket to {local}"))?;
        set_hop_limit(&socket, probe.l3_protocol(), probe.ttl)?;
        trace!("send {}", probe);
        socket
            .send_to(payload, &SockAddr::from(destination))
            .with_context(|| format!("cannot send UDP probe to {destination}"))?;
        Ok(())
    }
}
