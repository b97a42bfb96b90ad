use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use anyhow::{Context, Result};
use log::{debug, trace};
use socket2::{Domain, Protocol, SockAddr, Socket, Type};

use crate::models::Probe;
use crate::transport::{set_hop_limit, ProbeTransport};
use crate::utilities::discover_local_addr;

/// Send each probe as a full TCP connect, closed as soon as it resolves.
///
/// Refused, unreachable and timed out connects are the expected outcome of a
/// TTL-limited probe and are not reported as errors.
pub struct TcpTransport {
    connect_timeout: Duration,
    local_addr: Option<IpAddr>,
}

impl TcpTransport {
    pub fn new(connect_timeout: Duration) -> Self {
        TcpTransport {
            connect_timeout,
            local_addr: None,
        }
    }

    fn local_addr(&mut self, dst_addr: IpAddr) -> Result<IpAddr> {
        match self.local_addr {
            Some(addr) if addr.is_ipv4() == dst_addr.is_ipv4() => Ok(addr),
            _ => {
                let addr = discover_local_addr(dst_addr)?;
                debug!("tcp probes source address {}", addr);
                self.local_addr = Some(addr);
                Ok(addr)
            }
        }
    }
}

impl ProbeTransport for TcpTransport {
    fn send_probe(&mut self, probe: &Probe, _payload: &[u8]) -> Result<()> {
        let destination = probe.destination();
        let local = SocketAddr::new(self.local_addr(probe.dst_addr)?, probe.src_port);
        let socket = Socket::new(
            Domain::for_address(destination),
            Type::STREAM,
            Some(Protocol::TCP),
        )
        .context("cannot open TCP socket")?;
        socket.set_reuse_address(true)?;
        // Close with a reset so that the source port can be bound again right away.
        socket.set_linger(Some(Duration::ZERO))?;
        socket
            .bind(&SockAddr::from(local))
            .with_context(|| format!("cannot bind TCP socket to {local}"))?;
        set_hop_limit(&socket, probe.l3_protocol(), probe.ttl)?;
        trace!("send {}", probe);
        match socket.connect_timeout(&SockAddr::from(destination), self.connect_timeout) {
            Ok(()) => debug!("connected to {}", destination),
            Err(error) => trace!("connect to {} ended: {}", destination, error),
        }
        Ok(())
    }
}
