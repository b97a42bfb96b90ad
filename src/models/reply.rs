use std::net::{IpAddr, Ipv6Addr};
use std::time::{Duration, SystemTime};

use crate::timestamp::decode_timestamp;

/// The original probe headers quoted in an ICMP error message.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct QuotedProbe {
    /// The IP that was targeted by the probe.
    pub dst_addr: IpAddr,
    /// The L4 protocol number of the probe.
    pub protocol: u8,
    /// The UDP/TCP source port, or the ICMP identifier.
    pub src_identity: u16,
    /// The UDP/TCP destination port, or the ICMP sequence number.
    pub dst_identity: u16,
}

/// An ICMP echo reply.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EchoReply {
    pub identifier: u16,
    pub sequence: u16,
    pub payload: Vec<u8>,
}

impl EchoReply {
    /// The send timestamp embedded in the payload, if any.
    pub fn sent_at(&self) -> Option<SystemTime> {
        decode_timestamp(&self.payload)
    }
}

/// A classified ICMP message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum IcmpMessage {
    EchoReply(EchoReply),
    DestinationUnreachable { code: u8, quote: QuotedProbe },
    TimeExceeded { code: u8, quote: QuotedProbe },
    Unknown { icmp_type: u8, code: u8 },
}

/// A reply read from the ICMP socket.
#[derive(Clone, Debug)]
pub struct Reply {
    /// The time at which the reply was read.
    pub capture_timestamp: SystemTime,
    /// The source IP of the reply packet.
    pub reply_src_addr: IpAddr,
    /// The size in bytes of the ICMP message.
    pub reply_size: usize,
    /// The TTL of the reply packet, when the transport exposes it.
    pub reply_ttl: Option<u8>,
    pub message: IcmpMessage,
}

impl Default for Reply {
    fn default() -> Self {
        Reply {
            capture_timestamp: SystemTime::UNIX_EPOCH,
            reply_src_addr: IpAddr::V6(Ipv6Addr::UNSPECIFIED),
            reply_size: 0,
            reply_ttl: None,
            message: IcmpMessage::Unknown {
                icmp_type: 0,
                code: 0,
            },
        }
    }
}

impl Reply {
    /// The TTL as printed in result lines, `-1` when unknown.
    pub fn display_ttl(&self) -> i16 {
        self.reply_ttl.map_or(-1, i16::from)
    }

    /// Round-trip time measured against a send timestamp.
    pub fn rtt_since(&self, sent_at: SystemTime) -> Duration {
        self.capture_timestamp
            .duration_since(sent_at)
            .unwrap_or_default()
    }

    pub fn is_echo_reply(&self) -> bool {
        matches!(self.message, IcmpMessage::EchoReply(_))
    }

    pub fn is_destination_unreachable(&self) -> bool {
        matches!(self.message, IcmpMessage::DestinationUnreachable { .. })
    }

    pub fn is_time_exceeded(&self) -> bool {
        matches!(self.message, IcmpMessage::TimeExceeded { .. })
    }

    pub fn quote(&self) -> Option<&QuotedProbe> {
        match &self.message {
            IcmpMessage::DestinationUnreachable { quote, .. }
            | IcmpMessage::TimeExceeded { quote, .. } => Some(quote),
            _ => None,
        }
    }
}
