use std::fmt::{Display, Formatter};
use std::net::{IpAddr, SocketAddr};

use crate::models::protocols::{L3, L4};

/// A hop discovery probe.
///
/// The probe identity travels in the port pair: the source port carries the
/// process tag and the destination port carries the hop/offset index.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Probe {
    pub dst_addr: IpAddr,
    pub src_port: u16,
    pub dst_port: u16,
    pub ttl: u8,
    pub protocol: L4,
}

impl Probe {
    pub fn l3_protocol(&self) -> L3 {
        self.dst_addr.into()
    }

    pub fn destination(&self) -> SocketAddr {
        SocketAddr::new(self.dst_addr, self.dst_port)
    }
}

impl Display for Probe {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "dst_addr={} src_port={} dst_port={} ttl={} protocol={:?}",
            self.dst_addr, self.src_port, self.dst_port, self.ttl, self.protocol
        )
    }
}
