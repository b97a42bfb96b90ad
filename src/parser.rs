//! Function for parsing replies.
use std::net::IpAddr;
use std::time::SystemTime;

use anyhow::{bail, Context, Result};
use pnet::packet::icmp::{IcmpPacket, IcmpTypes};
use pnet::packet::icmpv6::{Icmpv6Packet, Icmpv6Types};
use pnet::packet::ipv4::Ipv4Packet;
use pnet::packet::ipv6::Ipv6Packet;
use pnet::packet::{icmp, icmpv6, Packet as _};

use crate::models::{EchoReply, IcmpMessage, QuotedProbe, Reply, L3, L4};

/// Number of bytes of the original datagram quoted after its IP header.
pub const QUOTED_DATAGRAM_SIZE: usize = 8;

const IPV6_HEADER_SIZE: usize = 40;

/// Parse a packet read from an ICMP socket into a reply.
///
/// Raw IPv4 sockets deliver the IP header in front of the ICMP message: it is
/// stripped and its TTL is used if the socket did not report one. IPv6 and
/// datagram sockets deliver the ICMP message directly.
pub fn parse(
    packet: &[u8],
    l3_protocol: L3,
    reply_src_addr: IpAddr,
    reply_ttl: Option<u8>,
    capture_timestamp: SystemTime,
) -> Result<Reply> {
    let mut reply = Reply {
        capture_timestamp,
        reply_src_addr,
        reply_ttl,
        ..Default::default()
    };

    let message = match l3_protocol {
        L3::IPv4 if has_ipv4_header(packet) => {
            let ip = Ipv4Packet::new(packet).context("Cannot build IPv4 header")?;
            reply.reply_ttl = reply.reply_ttl.or(Some(ip.get_ttl()));
            let header_length = ip.get_header_length() as usize * 4;
            packet
                .get(header_length..)
                .context("Cannot skip IPv4 header")?
        }
        _ => packet,
    };

    reply.reply_size = message.len();
    reply.message = match l3_protocol {
        L3::IPv4 => parse_icmp(message)?,
        L3::IPv6 => parse_icmpv6(message)?,
    };
    Ok(reply)
}

fn has_ipv4_header(packet: &[u8]) -> bool {
    packet.first().map_or(false, |byte| byte >> 4 == 4)
}

fn parse_icmp(message: &[u8]) -> Result<IcmpMessage> {
    let icmp = IcmpPacket::new(message).context("Cannot build ICMP header")?;
    let code = icmp.get_icmp_code().0;
    Ok(match icmp.get_icmp_type() {
        IcmpTypes::EchoReply => {
            let echo = icmp::echo_reply::EchoReplyPacket::new(message)
                .context("Cannot build ICMP Echo Reply header")?;
            IcmpMessage::EchoReply(EchoReply {
                identifier: echo.get_identifier(),
                sequence: echo.get_sequence_number(),
                payload: echo.payload().to_vec(),
            })
        }
        IcmpTypes::DestinationUnreachable => IcmpMessage::DestinationUnreachable {
            code,
            quote: parse_quote(icmp.payload(), L3::IPv4)?,
        },
        IcmpTypes::TimeExceeded => IcmpMessage::TimeExceeded {
            code,
            quote: parse_quote(icmp.payload(), L3::IPv4)?,
        },
        other => IcmpMessage::Unknown {
            icmp_type: other.0,
            code,
        },
    })
}

fn parse_icmpv6(message: &[u8]) -> Result<IcmpMessage> {
    let icmp = Icmpv6Packet::new(message).context("Cannot build ICMPv6 header")?;
    let code = icmp.get_icmpv6_code().0;
    Ok(match icmp.get_icmpv6_type() {
        Icmpv6Types::EchoReply => {
            let echo = icmpv6::echo_reply::EchoReplyPacket::new(message)
                .context("Cannot build ICMPv6 Echo Reply header")?;
            IcmpMessage::EchoReply(EchoReply {
                identifier: echo.get_identifier(),
                sequence: echo.get_sequence_number(),
                payload: echo.payload().to_vec(),
            })
        }
        Icmpv6Types::DestinationUnreachable => IcmpMessage::DestinationUnreachable {
            code,
            quote: parse_quote(icmp.payload(), L3::IPv6)?,
        },
        Icmpv6Types::TimeExceeded => IcmpMessage::TimeExceeded {
            code,
            quote: parse_quote(icmp.payload(), L3::IPv6)?,
        },
        other => IcmpMessage::Unknown {
            icmp_type: other.0,
            code,
        },
    })
}

/// Recover the probe identity from the body of an ICMP error message.
///
/// The body starts with 4 unused bytes, then the original IP header and the
/// first 8 bytes of the original datagram.
fn parse_quote(body: &[u8], l3_protocol: L3) -> Result<QuotedProbe> {
    let quoted = body.get(4..).context("Cannot find quoted datagram")?;
    let (dst_addr, protocol, header_length) = match l3_protocol {
        L3::IPv4 => {
            let ip = Ipv4Packet::new(quoted).context("Cannot build inner IPv4 header")?;
            let header_length = ip.get_header_length() as usize * 4;
            if header_length < Ipv4Packet::minimum_packet_size() {
                bail!("Invalid inner IPv4 header length: {}", header_length);
            }
            (
                IpAddr::V4(ip.get_destination()),
                ip.get_next_level_protocol().0,
                header_length,
            )
        }
        L3::IPv6 => {
            let ip = Ipv6Packet::new(quoted).context("Cannot build inner IPv6 header")?;
            (
                IpAddr::V6(ip.get_destination()),
                ip.get_next_header().0,
                IPV6_HEADER_SIZE,
            )
        }
    };

    let datagram = quoted
        .get(header_length..header_length + QUOTED_DATAGRAM_SIZE)
        .context("Quoted datagram is too short")?;
    let word = |offset: usize| u16::from_be_bytes([datagram[offset], datagram[offset + 1]]);

    // UDP and TCP carry the identity in the ports, ICMP in the id and sequence.
    let (src_identity, dst_identity) = match L4::try_from(protocol) {
        Ok(L4::ICMP) | Ok(L4::ICMPv6) => (word(4), word(6)),
        _ => (word(0), word(2)),
    };

    Ok(QuotedProbe {
        dst_addr,
        protocol,
        src_identity,
        dst_identity,
    })
}
