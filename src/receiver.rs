use std::fmt::{Display, Formatter};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use anyhow::Result;
use log::trace;

use crate::error::Error;
use crate::models::Reply;
use crate::parser::parse;
use crate::socket::PacketConn;

/// Large enough for any ICMP message carried in an Ethernet frame, with room for jumbo frames.
const BUFFER_SIZE: usize = 9216;

pub struct Receiver {
    conn: Arc<dyn PacketConn>,
    buffer: Vec<u8>,
    statistics: ReceiverStatistics,
}

impl Receiver {
    pub fn new(conn: Arc<dyn PacketConn>) -> Self {
        Receiver {
            conn,
            buffer: vec![0u8; BUFFER_SIZE],
            statistics: ReceiverStatistics::default(),
        }
    }

    /// Wait at most `deadline` for the next reply.
    ///
    /// Read timeouts surface as [`Error::Timeout`] and malformed packets as
    /// [`Error::Parse`], so that the caller can tell them apart with `downcast_ref`.
    pub fn next_reply(&mut self, deadline: Duration) -> Result<Reply> {
        let packet = match self.conn.read_with_deadline(&mut self.buffer, deadline) {
            Ok(packet) => packet,
            Err(Error::Timeout) => return Err(Error::Timeout.into()),
            Err(error) => {
                self.statistics.read_errors += 1;
                return Err(error.into());
            }
        };
        let capture_timestamp = SystemTime::now();
        self.statistics.received += 1;

        let data = &self.buffer[..packet.len.min(self.buffer.len())];
        trace!(
            "receive peer={} ttl={:?} bytes={} data={}",
            packet.peer,
            packet.ttl,
            packet.len,
            hex::encode(data)
        );
        parse(
            data,
            self.conn.l3(),
            packet.peer,
            packet.ttl,
            capture_timestamp,
        )
        .map_err(|error| {
            self.statistics.received_invalid += 1;
            Error::Parse(format!("{error:#}")).into()
        })
    }

    pub fn statistics(&self) -> &ReceiverStatistics {
        &self.statistics
    }
}

#[derive(Copy, Clone, Debug, Default)]
pub struct ReceiverStatistics {
    /// Number of packets read from the socket.
    pub received: u64,
    /// Number of packets that could not be parsed.
    pub received_invalid: u64,
    pub read_errors: u64,
}

impl Display for ReceiverStatistics {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "packets_received={}", self.received)?;
        write!(f, " packets_received_invalid={}", self.received_invalid)?;
        write!(f, " read_errors={}", self.read_errors)
    }
}
