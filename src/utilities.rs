//! Utilities.
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, UdpSocket};

use dns_lookup::lookup_host;
use pcap::Device;

use crate::config::AddressFamily;
use crate::error::{Error, Result};
use crate::models::L3;

/// Resolve a host name or an IP literal to a single address of the requested family.
///
/// ```
/// use netprobe::config::AddressFamily;
/// use netprobe::utilities::resolve_target;
///
/// let addr = resolve_target("2001:db8::1", AddressFamily::Ip).unwrap();
/// assert!(addr.is_ipv6());
/// assert!(resolve_target("2001:db8::1", AddressFamily::Ip4).is_err());
/// ```
pub fn resolve_target(host: &str, family: AddressFamily) -> Result<IpAddr> {
    if host.is_empty() {
        return Err(Error::BadConfig("target address must be specified".into()));
    }
    let candidates = match host.parse::<IpAddr>() {
        Ok(addr) => vec![addr],
        Err(_) => lookup_host(host).map_err(|_| Error::Unresolvable(host.to_string()))?,
    };
    candidates
        .into_iter()
        .find(|addr| family.accepts(L3::from(*addr)))
        .ok_or_else(|| Error::Unresolvable(format!("{host} ({family})")))
}

/// Return the pcap device for the given interface.
// NOTE: We need this function to get the IP addresses associated to an interface,
// as a device created using interface.into() will contain an empty list of addresses.
fn get_device(interface: &str) -> Option<Device> {
    Device::list()
        .ok()?
        .into_iter()
        .find(|device| device.name.eq(interface))
}

/// Return the preferred address of the given family on the interface.
pub fn interface_address(interface: &str, l3_protocol: L3) -> Result<IpAddr> {
    let device =
        get_device(interface).ok_or_else(|| Error::UnknownInterface(interface.to_string()))?;
    let mut addresses: Vec<IpAddr> = device
        .addresses
        .iter()
        .map(|address| address.addr)
        .filter(|addr| L3::from(*addr) == l3_protocol)
        .collect();
    // Prefer non link-local addresses.
    addresses.sort_by_key(is_link_local);
    addresses.first().copied().ok_or_else(|| {
        Error::UnknownInterface(format!("{interface} has no {l3_protocol:?} address"))
    })
}

fn is_link_local(addr: &IpAddr) -> bool {
    match addr {
        IpAddr::V4(addr) => addr.is_link_local(),
        IpAddr::V6(addr) => addr.segments()[0] & 0xffc0 == 0xfe80,
    }
}

/// Return the local address the system would use to reach `target`.
/// No packet is sent: connecting a UDP socket only selects a route.
pub fn discover_local_addr(target: IpAddr) -> Result<IpAddr> {
    let unspecified: IpAddr = match target {
        IpAddr::V4(_) => Ipv4Addr::UNSPECIFIED.into(),
        IpAddr::V6(_) => Ipv6Addr::UNSPECIFIED.into(),
    };
    let socket = UdpSocket::bind(SocketAddr::new(unspecified, 0)).map_err(Error::Transport)?;
    socket
        .connect(SocketAddr::new(target, 80))
        .map_err(Error::Transport)?;
    Ok(socket.local_addr().map_err(Error::Transport)?.ip())
}

#[cfg(test)]
mod tests {
    use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

    use crate::config::AddressFamily;
    use crate::error::Error;
    use crate::utilities::{discover_local_addr, interface_address, is_link_local, resolve_target};

    #[test]
    fn test_resolve_literal() {
        assert_eq!(
            resolve_target("93.184.216.34", AddressFamily::Ip4).unwrap(),
            IpAddr::V4(Ipv4Addr::new(93, 184, 216, 34))
        );
        assert!(matches!(
            resolve_target("93.184.216.34", AddressFamily::Ip6),
            Err(Error::Unresolvable(_))
        ));
        assert!(matches!(
            resolve_target("", AddressFamily::Ip),
            Err(Error::BadConfig(_))
        ));
    }

    #[test]
    fn test_discover_loopback() {
        let addr = IpAddr::V4(Ipv4Addr::LOCALHOST);
        assert_eq!(discover_local_addr(addr).unwrap(), addr);
    }

    #[test]
    fn test_unknown_interface() {
        assert!(interface_address("does-not-exist0", crate::models::L3::IPv4).is_err());
    }

    #[test]
    fn test_link_local() {
        assert!(is_link_local(&IpAddr::V6("fe80::1".parse::<Ipv6Addr>().unwrap())));
        assert!(!is_link_local(&IpAddr::V6(Ipv6Addr::LOCALHOST)));
    }
}
