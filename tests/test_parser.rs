use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::time::{Duration, UNIX_EPOCH};

use netprobe::models::{IcmpMessage, QuotedProbe, L3, L4};
use netprobe::parser::parse;
use netprobe::timestamp::{decode_timestamp, echo_payload};
use pnet::packet::ip::{IpNextHeaderProtocol, IpNextHeaderProtocols};
use pnet::packet::ipv4::MutableIpv4Packet;
use pnet::packet::ipv6::MutableIpv6Packet;

const ROUTER_V4: Ipv4Addr = Ipv4Addr::new(72, 14, 204, 68);
const TARGET_V4: Ipv4Addr = Ipv4Addr::new(8, 8, 8, 8);

fn ipv4_packet(
    src_addr: Ipv4Addr,
    dst_addr: Ipv4Addr,
    ttl: u8,
    protocol: IpNextHeaderProtocol,
    options: usize,
    payload: &[u8],
) -> Vec<u8> {
    let header_length = 20 + options * 4;
    let mut buffer = vec![0u8; header_length + payload.len()];
    {
        let mut ip = MutableIpv4Packet::new(&mut buffer).unwrap();
        ip.set_version(4);
        ip.set_header_length(5 + options as u8);
        ip.set_total_length((header_length + payload.len()) as u16);
        ip.set_ttl(ttl);
        ip.set_next_level_protocol(protocol);
        ip.set_source(src_addr);
        ip.set_destination(dst_addr);
    }
    buffer[header_length..].copy_from_slice(payload);
    buffer
}

fn ipv6_packet(dst_addr: Ipv6Addr, protocol: IpNextHeaderProtocol, payload: &[u8]) -> Vec<u8> {
    let mut buffer = vec![0u8; 40 + payload.len()];
    {
        let mut ip = MutableIpv6Packet::new(&mut buffer).unwrap();
        ip.set_version(6);
        ip.set_payload_length(payload.len() as u16);
        ip.set_next_header(protocol);
        ip.set_hop_limit(1);
        ip.set_source(Ipv6Addr::LOCALHOST);
        ip.set_destination(dst_addr);
    }
    buffer[40..].copy_from_slice(payload);
    buffer
}

/// An ICMP error message: type, code, checksum, 4 unused bytes, then the quote.
fn icmp_error(icmp_type: u8, code: u8, quote: &[u8]) -> Vec<u8> {
    let mut message = vec![icmp_type, code, 0, 0, 0, 0, 0, 0];
    message.extend_from_slice(quote);
    message
}

fn echo_reply(icmp_type: u8, identifier: u16, sequence: u16, payload: &[u8]) -> Vec<u8> {
    let mut message = vec![icmp_type, 0, 0, 0];
    message.extend_from_slice(&identifier.to_be_bytes());
    message.extend_from_slice(&sequence.to_be_bytes());
    message.extend_from_slice(payload);
    message
}

fn ports(src_port: u16, dst_port: u16) -> [u8; 8] {
    let mut datagram = [0u8; 8];
    datagram[0..2].copy_from_slice(&src_port.to_be_bytes());
    datagram[2..4].copy_from_slice(&dst_port.to_be_bytes());
    datagram
}

#[test]
fn test_udp_icmp_ttl_exceeded() {
    let quote = ipv4_packet(
        Ipv4Addr::new(192, 168, 1, 5),
        TARGET_V4,
        1,
        IpNextHeaderProtocols::Udp,
        0,
        &ports(0x9234, 33438),
    );
    let message = icmp_error(11, 0, &quote);
    let packet = ipv4_packet(
        ROUTER_V4,
        Ipv4Addr::new(192, 168, 1, 5),
        250,
        IpNextHeaderProtocols::Icmp,
        0,
        &message,
    );

    let timestamp = UNIX_EPOCH + Duration::from_secs(1_613_155_623);
    let reply = parse(&packet, L3::IPv4, IpAddr::V4(ROUTER_V4), None, timestamp).unwrap();
    assert_eq!(reply.capture_timestamp, timestamp);
    assert_eq!(reply.reply_src_addr, IpAddr::V4(ROUTER_V4));
    assert_eq!(reply.reply_ttl, Some(250));
    assert_eq!(reply.reply_size, message.len());
    assert!(reply.is_time_exceeded());
    assert!(!reply.is_echo_reply());
    assert!(!reply.is_destination_unreachable());
    assert_eq!(
        reply.message,
        IcmpMessage::TimeExceeded {
            code: 0,
            quote: QuotedProbe {
                dst_addr: IpAddr::V4(TARGET_V4),
                protocol: L4::UDP.into(),
                src_identity: 0x9234,
                dst_identity: 33438,
            }
        }
    );
}

#[test]
fn test_icmp_icmp_destination_unreachable() {
    // The quoted ICMP echo request carries the identity in its id and sequence.
    let datagram = [8, 0, 0, 0, 0x12, 0x34, 0x00, 0x07];
    let quote = ipv4_packet(
        Ipv4Addr::new(192, 168, 1, 5),
        TARGET_V4,
        1,
        IpNextHeaderProtocols::Icmp,
        0,
        &datagram,
    );
    let message = icmp_error(3, 1, &quote);
    let reply = parse(
        &message,
        L3::IPv4,
        IpAddr::V4(ROUTER_V4),
        Some(63),
        UNIX_EPOCH,
    )
    .unwrap();
    assert_eq!(reply.reply_ttl, Some(63));
    assert!(reply.is_destination_unreachable());
    let quote = reply.quote().unwrap();
    assert_eq!(quote.protocol, 1);
    assert_eq!(quote.src_identity, 0x1234);
    assert_eq!(quote.dst_identity, 7);
}

#[test]
fn test_quote_with_ip_options() {
    let quote = ipv4_packet(
        Ipv4Addr::new(192, 168, 1, 5),
        TARGET_V4,
        1,
        IpNextHeaderProtocols::Tcp,
        2,
        &ports(40000, 443),
    );
    let message = icmp_error(11, 0, &quote);
    let reply = parse(&message, L3::IPv4, IpAddr::V4(ROUTER_V4), None, UNIX_EPOCH).unwrap();
    let quote = reply.quote().unwrap();
    assert_eq!(quote.protocol, 6);
    assert_eq!(quote.src_identity, 40000);
    assert_eq!(quote.dst_identity, 443);
}

#[test]
fn test_icmp_echo_reply() {
    let timestamp = UNIX_EPOCH + Duration::from_micros(1_700_000_000_250_000);
    let payload = echo_payload(timestamp, 56);
    let message = echo_reply(0, 4242, 12, &payload);
    let reply = parse(
        &message,
        L3::IPv4,
        IpAddr::V4(TARGET_V4),
        Some(117),
        UNIX_EPOCH,
    )
    .unwrap();
    assert_eq!(reply.reply_size, 64);
    assert_eq!(reply.display_ttl(), 117);
    match reply.message {
        IcmpMessage::EchoReply(echo) => {
            assert_eq!(echo.identifier, 4242);
            assert_eq!(echo.sequence, 12);
            assert_eq!(echo.sent_at(), Some(timestamp));
            assert_eq!(decode_timestamp(&echo.payload), Some(timestamp));
        }
        other => panic!("unexpected message: {:?}", other),
    }
}

#[test]
fn test_icmp6_echo_reply() {
    let message = echo_reply(129, 1, 2, &[0x00, 0x01]);
    let reply = parse(
        &message,
        L3::IPv6,
        IpAddr::V6(Ipv6Addr::LOCALHOST),
        None,
        UNIX_EPOCH,
    )
    .unwrap();
    assert!(reply.is_echo_reply());
    assert_eq!(reply.display_ttl(), -1);
}

#[test]
fn test_tcp_icmp6_ttl_exceeded() {
    let target: Ipv6Addr = "2001:4860:4860::8888".parse().unwrap();
    let quote = ipv6_packet(target, IpNextHeaderProtocols::Tcp, &ports(0x9234, 33434));
    let message = icmp_error(3, 0, &quote);
    let router: Ipv6Addr = "2001:db8::1".parse().unwrap();
    let reply = parse(&message, L3::IPv6, IpAddr::V6(router), Some(62), UNIX_EPOCH).unwrap();
    assert_eq!(
        reply.message,
        IcmpMessage::TimeExceeded {
            code: 0,
            quote: QuotedProbe {
                dst_addr: IpAddr::V6(target),
                protocol: 6,
                src_identity: 0x9234,
                dst_identity: 33434,
            }
        }
    );
}

#[test]
fn test_short_quote_is_dropped() {
    // Only 4 of the 8 quoted datagram bytes are present.
    let mut quote = ipv4_packet(
        Ipv4Addr::new(192, 168, 1, 5),
        TARGET_V4,
        1,
        IpNextHeaderProtocols::Udp,
        0,
        &ports(0x9234, 33434),
    );
    quote.truncate(24);
    let message = icmp_error(3, 3, &quote);
    assert!(parse(&message, L3::IPv4, IpAddr::V4(ROUTER_V4), None, UNIX_EPOCH).is_err());

    // Not even a full IP header.
    let message = icmp_error(11, 0, &quote[..12]);
    assert!(parse(&message, L3::IPv4, IpAddr::V4(ROUTER_V4), None, UNIX_EPOCH).is_err());
    assert!(parse(&[], L3::IPv6, IpAddr::V4(ROUTER_V4), None, UNIX_EPOCH).is_err());
}

#[test]
fn test_unknown_type() {
    let message = icmp_error(5, 1, &[]);
    let reply = parse(&message, L3::IPv4, IpAddr::V4(ROUTER_V4), None, UNIX_EPOCH).unwrap();
    assert_eq!(
        reply.message,
        IcmpMessage::Unknown {
            icmp_type: 5,
            code: 1
        }
    );
    assert!(reply.quote().is_none());
}
