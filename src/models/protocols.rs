use std::net::IpAddr;

use pnet::packet::ip::{IpNextHeaderProtocol, IpNextHeaderProtocols};

/// Layer 3 protocol.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum L3 {
    IPv4,
    IPv6,
}

impl From<IpAddr> for L3 {
    fn from(value: IpAddr) -> Self {
        match value {
            IpAddr::V4(_) => L3::IPv4,
            IpAddr::V6(_) => L3::IPv6,
        }
    }
}

impl L3 {
    /// The ICMP flavour carried over this protocol version.
    pub fn icmp(&self) -> L4 {
        match self {
            L3::IPv4 => L4::ICMP,
            L3::IPv6 => L4::ICMPv6,
        }
    }
}

/// Layer 4 protocol.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum L4 {
    ICMP,
    ICMPv6,
    UDP,
    TCP,
}

impl From<L4> for u8 {
    fn from(value: L4) -> Self {
        let val: IpNextHeaderProtocol = value.into();
        val.0
    }
}

impl From<L4> for IpNextHeaderProtocol {
    fn from(value: L4) -> Self {
        match value {
            L4::ICMP => IpNextHeaderProtocols::Icmp,
            L4::ICMPv6 => IpNextHeaderProtocols::Icmpv6,
            L4::UDP => IpNextHeaderProtocols::Udp,
            L4::TCP => IpNextHeaderProtocols::Tcp,
        }
    }
}

impl TryFrom<u8> for L4 {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match IpNextHeaderProtocol(value) {
            IpNextHeaderProtocols::Icmp => Ok(L4::ICMP),
            IpNextHeaderProtocols::Icmpv6 => Ok(L4::ICMPv6),
            IpNextHeaderProtocols::Udp => Ok(L4::UDP),
            IpNextHeaderProtocols::Tcp => Ok(L4::TCP),
            _ => Err(value),
        }
    }
}
