//! A minimal packet dumper on top of a live pcap capture.
use std::fmt::{Display, Formatter};
use std::io::Write;
use std::net::IpAddr;

use anyhow::{bail, Context, Result};
use chrono::{Local, TimeZone};
use log::{debug, info};
use pcap::{Linktype, Packet};
use pnet::packet::ethernet::{EtherTypes, EthernetPacket};
use pnet::packet::icmp::IcmpPacket;
use pnet::packet::icmpv6::Icmpv6Packet;
use pnet::packet::ip::{IpNextHeaderProtocol, IpNextHeaderProtocols};
use pnet::packet::ipv4::Ipv4Packet;
use pnet::packet::ipv6::Ipv6Packet;
use pnet::packet::tcp::TcpPacket;
use pnet::packet::udp::UdpPacket;
use pnet::packet::Packet as PnetPacket;

use crate::cancel::Cancellation;

/// Number of bytes captured per packet.
pub const SNAPLEN: i32 = 65536;

/// pcap read timeout, also the latency of cancellation.
pub const READ_TIMEOUT_MS: i32 = 100;

/// Linux cooked capture.
const LINUX_SLL: Linktype = Linktype(113);

#[derive(Clone, Debug, Default)]
pub struct Dumper {
    pub interface: String,
    /// Print the Ethernet addresses of each frame.
    pub ethernet: bool,
}

/// Totals of a capture.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct CaptureStatistics {
    pub packets: u64,
    pub bytes: u64,
    pub undecoded: u64,
}

impl Display for CaptureStatistics {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} packets captured, {} bytes, {} not decoded",
            self.packets, self.bytes, self.undecoded
        )
    }
}

impl Dumper {
    pub fn new(interface: &str, ethernet: bool) -> Self {
        Dumper {
            interface: interface.to_string(),
            ethernet,
        }
    }

    /// Print one line per captured packet until `cancel` is triggered.
    pub fn sniff(
        &self,
        filter: Option<&str>,
        cancel: &Cancellation,
        out: &mut dyn Write,
    ) -> Result<CaptureStatistics> {
        let mut cap = pcap::Capture::from_device(self.interface.as_str())?
            .promisc(true)
            .snaplen(SNAPLEN)
            .timeout(READ_TIMEOUT_MS)
            .open()
            .with_context(|| format!("cannot open capture on {}", self.interface))?;
        if let Some(filter) = filter {
            cap.filter(filter, true)
                .with_context(|| format!("invalid filter {filter:?}"))?;
        }
        let linktype = cap.get_datalink();
        info!(
            "listening on {} link_type={}",
            self.interface,
            linktype.get_name().unwrap_or_else(|_| linktype.0.to_string())
        );

        let mut statistics = CaptureStatistics::default();
        while !cancel.is_cancelled() {
            let packet = match cap.next_packet() {
                Ok(packet) => packet,
                Err(pcap::Error::TimeoutExpired) => continue,
                Err(error) => return Err(error).context("capture failed"),
            };
            statistics.packets += 1;
            statistics.bytes += packet.header.len as u64;
            match self.summarize(&packet, linktype) {
                Ok(line) => writeln!(out, "{line}")?,
                Err(error) => {
                    statistics.undecoded += 1;
                    debug!("cannot decode packet: {:#}", error);
                }
            }
        }
        writeln!(out, "{statistics}")?;
        out.flush()?;
        Ok(statistics)
    }

    /// Format a captured packet as a single line.
    pub fn summarize(&self, packet: &Packet, linktype: Linktype) -> Result<String> {
        let timestamp = Local
            .timestamp_opt(
                packet.header.ts.tv_sec as i64,
                packet.header.ts.tv_usec as u32 * 1000,
            )
            .single()
            .context("invalid capture timestamp")?;
        let body = summarize_frame(packet.data, linktype, self.ethernet)?;
        Ok(format!(
            "{} {}, length {}",
            timestamp.format("%H:%M:%S%.6f"),
            body,
            packet.header.len
        ))
    }
}

/// Format the link and network layers of a frame.
pub fn summarize_frame(data: &[u8], linktype: Linktype, ethernet: bool) -> Result<String> {
    let (prefix, payload) = match linktype {
        Linktype::ETHERNET => {
            let frame = EthernetPacket::new(data).context("cannot build Ethernet header")?;
            let prefix = if ethernet {
                format!("{} > {}, ", frame.get_source(), frame.get_destination())
            } else {
                String::new()
            };
            match frame.get_ethertype() {
                EtherTypes::Ipv4 | EtherTypes::Ipv6 => (prefix, &data[14..]),
                other => return Ok(format!("{}ethertype 0x{:04x}", prefix, other.0)),
            }
        }
        Linktype::NULL => (String::new(), data.get(4..).context("short loopback header")?),
        LINUX_SLL => (String::new(), data.get(16..).context("short cooked header")?),
        Linktype(12) | Linktype(101) => (String::new(), data),
        other => bail!("unsupported link type: {}", other.0),
    };
    Ok(format!("{}{}", prefix, summarize_ip(payload)?))
}

fn summarize_ip(data: &[u8]) -> Result<String> {
    let version = data.first().map(|x| x >> 4).context("empty packet")?;
    match version {
        4 => {
            let ip = Ipv4Packet::new(data).context("cannot build IPv4 header")?;
            let transport = summarize_transport(
                ip.get_source().into(),
                ip.get_destination().into(),
                ip.get_next_level_protocol(),
                ip.payload(),
            );
            Ok(format!("IP {transport}"))
        }
        6 => {
            let ip = Ipv6Packet::new(data).context("cannot build IPv6 header")?;
            let transport = summarize_transport(
                ip.get_source().into(),
                ip.get_destination().into(),
                ip.get_next_header(),
                ip.payload(),
            );
            Ok(format!("IP6 {transport}"))
        }
        other => bail!("unsupported IP version: {}", other),
    }
}

fn summarize_transport(
    src: IpAddr,
    dst: IpAddr,
    protocol: IpNextHeaderProtocol,
    payload: &[u8],
) -> String {
    match protocol {
        IpNextHeaderProtocols::Tcp => match TcpPacket::new(payload) {
            Some(tcp) => format!(
                "{}.{} > {}.{}: TCP",
                src,
                tcp.get_source(),
                dst,
                tcp.get_destination()
            ),
            None => format!("{src} > {dst}: TCP (truncated)"),
        },
        IpNextHeaderProtocols::Udp => match UdpPacket::new(payload) {
            Some(udp) => format!(
                "{}.{} > {}.{}: UDP",
                src,
                udp.get_source(),
                dst,
                udp.get_destination()
            ),
            None => format!("{src} > {dst}: UDP (truncated)"),
        },
        IpNextHeaderProtocols::Icmp => match IcmpPacket::new(payload) {
            Some(icmp) => format!(
                "{} > {}: ICMP type {} code {}",
                src,
                dst,
                icmp.get_icmp_type().0,
                icmp.get_icmp_code().0
            ),
            None => format!("{src} > {dst}: ICMP (truncated)"),
        },
        IpNextHeaderProtocols::Icmpv6 => match Icmpv6Packet::new(payload) {
            Some(icmp) => format!(
                "{} > {}: ICMP6 type {} code {}",
                src,
                dst,
                icmp.get_icmpv6_type().0,
                icmp.get_icmpv6_code().0
            ),
            None => format!("{src} > {dst}: ICMP6 (truncated)"),
        },
        other => format!("{} > {}: protocol {}", src, dst, other.0),
    }
}
