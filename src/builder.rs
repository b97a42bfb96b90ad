//! Functions for building probe payloads and ICMP echo requests.
//!
//! The kernel builds the IP header (and the UDP/TCP headers for the port based
//! probes), so we only ever craft the ICMP message itself.
//!
//! # Examples
//!
//! ```
//! use netprobe::builder::build_echo_request;
//! use netprobe::models::L3;
//! use pnet::packet::icmp::echo_request::EchoRequestPacket;
//!
//! let packet = build_echo_request(L3::IPv4, 42, 7, &[0x08, 0x09]).unwrap();
//! let echo = EchoRequestPacket::new(&packet).unwrap();
//! assert_eq!(echo.get_identifier(), 42);
//! assert_eq!(echo.get_sequence_number(), 7);
//! ```
use anyhow::{Context, Result};
use pnet::packet::{icmp, icmpv6, Packet as _};
use pnet::util;

use crate::models::L3;

/// Size of the ICMP echo header: type, code, checksum, identifier and sequence.
pub const ECHO_HEADER_SIZE: usize = 8;

/// Build an ICMP or ICMPv6 Echo Request carrying `payload`.
///
/// The ICMP checksum is computed here. The ICMPv6 checksum covers a
/// pseudo-header with the source address chosen by the kernel, so it is left
/// to zero and filled in by the kernel.
pub fn build_echo_request(
    l3_protocol: L3,
    identifier: u16,
    sequence: u16,
    payload: &[u8],
) -> Result<Vec<u8>> {
    let mut buffer = vec![0u8; ECHO_HEADER_SIZE + payload.len()];
    match l3_protocol {
        L3::IPv4 => {
            let mut echo = icmp::echo_request::MutableEchoRequestPacket::new(&mut buffer)
                .context("Cannot build ICMP Echo Request header")?;
            echo.set_icmp_type(icmp::IcmpTypes::EchoRequest);
            echo.set_icmp_code(icmp::echo_request::IcmpCodes::NoCode);
            echo.set_identifier(identifier);
            echo.set_sequence_number(sequence);
            echo.set_payload(payload);
            echo.set_checksum(0);
            let checksum = util::checksum(echo.packet(), 1);
            echo.set_checksum(checksum);
        }
        L3::IPv6 => {
            let mut echo = icmpv6::echo_request::MutableEchoRequestPacket::new(&mut buffer)
                .context("Cannot build ICMPv6 Echo Request header")?;
            echo.set_icmpv6_type(icmpv6::Icmpv6Types::EchoRequest);
            echo.set_icmpv6_code(icmpv6::echo_request::Icmpv6Codes::NoCode);
            echo.set_identifier(identifier);
            echo.set_sequence_number(sequence);
            echo.set_payload(payload);
            echo.set_checksum(0);
        }
    }
    Ok(buffer)
}

/// Payload of a hop discovery probe: a zero byte followed by the probe offset.
pub fn build_hop_payload(offset: usize) -> [u8; 2] {
    [0x00, offset as u8]
}
