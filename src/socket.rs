//! ICMP sockets with read and write deadlines.
//!
//! Privileged runs use raw ICMP sockets, which receive every ICMP message
//! addressed to the host. Unprivileged runs use the kernel "ping" sockets
//! (`SOCK_DGRAM` + `IPPROTO_ICMP`), which only see the replies to their own
//! requests and rewrite the echo identifier.
use std::fmt::{Display, Formatter};
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use log::debug;
use socket2::{Domain, Protocol, SockAddr, Socket, Type};

use crate::config::AddressFamily;
use crate::error::{Error, Result};
use crate::models::L3;

/// Shortest deadline accepted by the socket layer (a zero timeout means "block forever").
const MIN_DEADLINE: Duration = Duration::from_millis(1);

/// Logical network of an ICMP socket.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Network {
    Udp4,
    Udp6,
    Ip4Icmp,
    Ip6Icmp,
    /// Privileged ICMP with no explicit family; opened as IPv4.
    IpIcmp,
}

impl Network {
    /// Select the network from the privilege flag and the address family.
    ///
    /// ```
    /// use netprobe::config::AddressFamily;
    /// use netprobe::socket::Network;
    ///
    /// assert_eq!(Network::select(true, AddressFamily::Ip6).to_string(), "udp6");
    /// assert_eq!(Network::select(false, AddressFamily::Ip).to_string(), "ip:icmp");
    /// ```
    pub fn select(unprivileged: bool, family: AddressFamily) -> Self {
        match (unprivileged, family) {
            (true, AddressFamily::Ip6) => Network::Udp6,
            (true, _) => Network::Udp4,
            (false, AddressFamily::Ip4) => Network::Ip4Icmp,
            (false, AddressFamily::Ip6) => Network::Ip6Icmp,
            (false, AddressFamily::Ip) => Network::IpIcmp,
        }
    }

    pub fn l3(&self) -> L3 {
        match self {
            Network::Udp6 | Network::Ip6Icmp => L3::IPv6,
            _ => L3::IPv4,
        }
    }

    pub fn is_privileged(&self) -> bool {
        !matches!(self, Network::Udp4 | Network::Udp6)
    }

    fn socket_type(&self) -> Type {
        if self.is_privileged() {
            Type::RAW
        } else {
            Type::DGRAM
        }
    }
}

impl Display for Network {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Network::Udp4 => "udp4",
            Network::Udp6 => "udp6",
            Network::Ip4Icmp => "ip4:icmp",
            Network::Ip6Icmp => "ip6:ipv6-icmp",
            Network::IpIcmp => "ip:icmp",
        };
        write!(f, "{name}")
    }
}

/// A packet read from an ICMP socket.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct RawPacket {
    /// Number of bytes written in the buffer.
    pub len: usize,
    /// The sender of the packet.
    pub peer: IpAddr,
    /// The TTL or hop limit of the packet, when the platform reports it.
    pub ttl: Option<u8>,
}

/// A connection able to send and receive ICMP messages.
///
/// Both engines share one connection between their send and receive loops.
pub trait PacketConn: Send + Sync {
    fn l3(&self) -> L3;

    /// Whether echo identifiers are preserved by the kernel.
    fn is_privileged(&self) -> bool;

    fn set_hop_limit(&self, ttl: u8) -> Result<()>;

    /// Read one packet, failing with [`Error::Timeout`] after `deadline`.
    fn read_with_deadline(&self, buffer: &mut [u8], deadline: Duration) -> Result<RawPacket>;

    /// Write one packet, failing with [`Error::Timeout`] after `deadline`.
    fn write_with_deadline(&self, buffer: &[u8], dst_addr: IpAddr, deadline: Duration)
        -> Result<()>;
}

/// A `socket2` ICMP socket.
pub struct IcmpSocket {
    socket: Socket,
    network: Network,
}

impl IcmpSocket {
    pub fn open(network: Network, bind_addr: Option<IpAddr>) -> Result<Self> {
        let (domain, protocol) = match network.l3() {
            L3::IPv4 => (Domain::IPV4, Protocol::ICMPV4),
            L3::IPv6 => (Domain::IPV6, Protocol::ICMPV6),
        };
        let socket =
            Socket::new(domain, network.socket_type(), Some(protocol)).map_err(Error::Transport)?;
        if let Some(addr) = bind_addr {
            socket
                .bind(&SockAddr::from(SocketAddr::new(addr, 0)))
                .map_err(Error::Transport)?;
        }
        #[cfg(target_os = "linux")]
        if let Err(error) = cmsg::enable_recv_ttl(&socket, network.l3()) {
            debug!("cannot enable ttl reception: {}", error);
        }
        debug!("open network={} bind_addr={:?}", network, bind_addr);
        Ok(IcmpSocket { socket, network })
    }

    fn recv(&self, buffer: &mut [u8]) -> Result<RawPacket> {
        #[cfg(target_os = "linux")]
        {
            cmsg::recv_with_ttl(&self.socket, buffer, self.network.l3())
        }
        #[cfg(not(target_os = "linux"))]
        {
            // SAFETY: `recv_from` only writes initialized bytes into the buffer.
            let uninit =
                unsafe { &mut *(buffer as *mut [u8] as *mut [std::mem::MaybeUninit<u8>]) };
            let (len, addr) = self.socket.recv_from(uninit)?;
            let peer = addr
                .as_socket()
                .map(|addr| addr.ip())
                .ok_or_else(|| Error::Parse("peer is not an IP address".into()))?;
            Ok(RawPacket {
                len,
                peer,
                ttl: None,
            })
        }
    }
}

impl PacketConn for IcmpSocket {
    fn l3(&self) -> L3 {
        self.network.l3()
    }

    fn is_privileged(&self) -> bool {
        self.network.is_privileged()
    }

    fn set_hop_limit(&self, ttl: u8) -> Result<()> {
        match self.network.l3() {
            L3::IPv4 => self.socket.set_ttl(ttl as u32),
            L3::IPv6 => self.socket.set_unicast_hops_v6(ttl as u32),
        }
        .map_err(Error::Transport)
    }

    fn read_with_deadline(&self, buffer: &mut [u8], deadline: Duration) -> Result<RawPacket> {
        self.socket
            .set_read_timeout(Some(deadline.max(MIN_DEADLINE)))
            .map_err(Error::Transport)?;
        self.recv(buffer)
    }

    fn write_with_deadline(
        &self,
        buffer: &[u8],
        dst_addr: IpAddr,
        deadline: Duration,
    ) -> Result<()> {
        self.socket
            .set_write_timeout(Some(deadline.max(MIN_DEADLINE)))
            .map_err(Error::Transport)?;
        self.socket
            .send_to(buffer, &SockAddr::from(SocketAddr::new(dst_addr, 0)))?;
        Ok(())
    }
}

/// Reply TTL reception through `IP_RECVTTL` / `IPV6_RECVHOPLIMIT` control messages.
#[cfg(target_os = "linux")]
mod cmsg {
    use std::io;
    use std::mem::{size_of, size_of_val, zeroed};
    use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
    use std::os::unix::io::AsRawFd;

    use socket2::Socket;

    use crate::error::{Error, Result};
    use crate::models::L3;
    use crate::socket::RawPacket;

    pub fn enable_recv_ttl(socket: &Socket, l3_protocol: L3) -> io::Result<()> {
        let (level, name) = match l3_protocol {
            L3::IPv4 => (libc::IPPROTO_IP, libc::IP_RECVTTL),
            L3::IPv6 => (libc::IPPROTO_IPV6, libc::IPV6_RECVHOPLIMIT),
        };
        let value: libc::c_int = 1;
        let ret = unsafe {
            libc::setsockopt(
                socket.as_raw_fd(),
                level,
                name,
                &value as *const _ as *const libc::c_void,
                size_of_val(&value) as libc::socklen_t,
            )
        };
        if ret != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    pub fn recv_with_ttl(socket: &Socket, buffer: &mut [u8], l3_protocol: L3) -> Result<RawPacket> {
        let mut iov = libc::iovec {
            iov_base: buffer.as_mut_ptr() as *mut libc::c_void,
            iov_len: buffer.len(),
        };
        let mut control = [0u8; 64];
        let mut storage: libc::sockaddr_storage = unsafe { zeroed() };
        let mut msg: libc::msghdr = unsafe { zeroed() };
        msg.msg_name = &mut storage as *mut _ as *mut libc::c_void;
        msg.msg_namelen = size_of::<libc::sockaddr_storage>() as libc::socklen_t;
        msg.msg_iov = &mut iov;
        msg.msg_iovlen = 1;
        msg.msg_control = control.as_mut_ptr() as *mut libc::c_void;
        msg.msg_controllen = control.len() as _;

        let len = unsafe { libc::recvmsg(socket.as_raw_fd(), &mut msg, 0) };
        if len < 0 {
            return Err(io::Error::last_os_error().into());
        }

        Ok(RawPacket {
            len: len as usize,
            peer: peer_address(&storage)?,
            ttl: find_ttl(&msg, l3_protocol),
        })
    }

    fn find_ttl(msg: &libc::msghdr, l3_protocol: L3) -> Option<u8> {
        let (level, kind) = match l3_protocol {
            L3::IPv4 => (libc::IPPROTO_IP, libc::IP_TTL),
            L3::IPv6 => (libc::IPPROTO_IPV6, libc::IPV6_HOPLIMIT),
        };
        unsafe {
            let mut cmsg = libc::CMSG_FIRSTHDR(msg);
            while !cmsg.is_null() {
                if (*cmsg).cmsg_level == level && (*cmsg).cmsg_type == kind {
                    let ttl = std::ptr::read_unaligned(libc::CMSG_DATA(cmsg) as *const libc::c_int);
                    return u8::try_from(ttl).ok();
                }
                cmsg = libc::CMSG_NXTHDR(msg, cmsg);
            }
        }
        None
    }

    fn peer_address(storage: &libc::sockaddr_storage) -> Result<IpAddr> {
        match storage.ss_family as libc::c_int {
            libc::AF_INET => {
                let addr: &libc::sockaddr_in = unsafe { &*(storage as *const _ as *const _) };
                Ok(IpAddr::V4(Ipv4Addr::from(u32::from_be(addr.sin_addr.s_addr))))
            }
            libc::AF_INET6 => {
                let addr: &libc::sockaddr_in6 = unsafe { &*(storage as *const _ as *const _) };
                Ok(IpAddr::V6(Ipv6Addr::from(addr.sin6_addr.s6_addr)))
            }
            family => Err(Error::Parse(format!("unknown address family: {family}"))),
        }
    }
}
