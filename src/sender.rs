//! Send ICMP echo requests on a shared connection.
use std::net::IpAddr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use anyhow::Result;
use log::trace;

use crate::builder::build_echo_request;
use crate::error::Error;
use crate::identity::Sequence;
use crate::socket::PacketConn;
use crate::statistics::SendStatistics;
use crate::timestamp::echo_payload;

/// Outcome of an echo request write.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SendOutcome {
    Sent(u16),
    /// The write deadline expired; the attempt still counts as sent.
    TimedOut(u16),
}

/// Build and write one echo request.
///
/// Write timeouts are returned as [`Error::Timeout`] for the caller to report.
pub fn send_echo_request(
    conn: &dyn PacketConn,
    dst_addr: IpAddr,
    identifier: u16,
    sequence: u16,
    payload: &[u8],
    deadline: Duration,
) -> Result<()> {
    let packet = build_echo_request(conn.l3(), identifier, sequence, payload)?;
    trace!(
        "send dst_addr={} id={} seq={} bytes={}",
        dst_addr,
        identifier,
        sequence,
        packet.len()
    );
    conn.write_with_deadline(&packet, dst_addr, deadline)?;
    Ok(())
}

/// Whether an error is an expired read or write deadline.
pub fn is_timeout(error: &anyhow::Error) -> bool {
    error.downcast_ref::<Error>().is_some_and(Error::is_timeout)
}

/// Echo request sender of the echo prober.
///
/// It owns the sequence counter and the send statistics.
pub struct EchoSender {
    conn: Arc<dyn PacketConn>,
    dst_addr: IpAddr,
    identifier: u16,
    payload_size: usize,
    write_deadline: Duration,
    sequence: Sequence,
    statistics: Arc<Mutex<SendStatistics>>,
}

impl EchoSender {
    pub fn new(
        conn: Arc<dyn PacketConn>,
        dst_addr: IpAddr,
        identifier: u16,
        payload_size: usize,
        write_deadline: Duration,
    ) -> Self {
        EchoSender {
            conn,
            dst_addr,
            identifier,
            payload_size,
            write_deadline,
            sequence: Sequence::default(),
            statistics: Arc::new(Mutex::new(SendStatistics::default())),
        }
    }

    pub fn send(&mut self) -> Result<SendOutcome> {
        let timestamp = SystemTime::now();
        let sequence = self.sequence.current();
        let payload = echo_payload(timestamp, self.payload_size);
        let outcome = match send_echo_request(
            self.conn.as_ref(),
            self.dst_addr,
            self.identifier,
            sequence,
            &payload,
            self.write_deadline,
        ) {
            Ok(()) => SendOutcome::Sent(sequence),
            Err(error) if is_timeout(&error) => SendOutcome::TimedOut(sequence),
            Err(error) => {
                return Err(error.context(format!("cannot send icmp_seq {sequence}")));
            }
        };
        self.statistics
            .lock()
            .unwrap()
            .record_send(timestamp, matches!(outcome, SendOutcome::TimedOut(_)));
        self.sequence.advance();
        Ok(outcome)
    }

    /// Return a reference to the send statistics.
    /// This reference can be cloned to read the statistics from another thread.
    pub fn statistics(&self) -> &Arc<Mutex<SendStatistics>> {
        &self.statistics
    }
}
