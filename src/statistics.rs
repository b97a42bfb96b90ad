//! Echo prober statistics.
//!
//! The send loop owns [`SendStatistics`] and the receive loop owns
//! [`ReceiveStatistics`]; each is written by a single thread.
use std::fmt::{Display, Formatter};
use std::net::IpAddr;
use std::time::SystemTime;

#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct SendStatistics {
    /// Number of echo requests sent, write timeouts included.
    pub sent: u64,
    pub write_timeouts: u64,
    /// Time of the first echo request.
    pub first_sent: Option<SystemTime>,
}

impl SendStatistics {
    pub fn record_send(&mut self, timestamp: SystemTime, timed_out: bool) {
        self.first_sent.get_or_insert(timestamp);
        self.sent += 1;
        if timed_out {
            self.write_timeouts += 1;
        }
    }
}

impl Display for SendStatistics {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "packets_sent={}", self.sent)?;
        write!(f, " write_timeouts={}", self.write_timeouts)
    }
}

/// Round-trip times in milliseconds.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct ReceiveStatistics {
    pub received: u64,
    pub min: f64,
    pub max: f64,
    pub avg: f64,
    pub sum_of_squares: f64,
}

impl ReceiveStatistics {
    pub fn record_rtt(&mut self, rtt: f64) {
        if self.received == 0 || rtt < self.min {
            self.min = rtt;
        }
        if self.received == 0 || rtt > self.max {
            self.max = rtt;
        }
        let received = self.received as f64;
        self.avg = (received * self.avg + rtt) / (received + 1.0);
        self.sum_of_squares += rtt * rtt;
        self.received += 1;
    }

    /// Population standard deviation of the round-trip times.
    pub fn mdev(&self) -> f64 {
        if self.received == 0 {
            return 0.0;
        }
        let variance = self.sum_of_squares / self.received as f64 - self.avg * self.avg;
        variance.max(0.0).sqrt()
    }
}

impl Display for ReceiveStatistics {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "packets_received={}", self.received)?;
        write!(f, " rtt_min={:.3}", self.min)?;
        write!(f, " rtt_avg={:.3}", self.avg)?;
        write!(f, " rtt_max={:.3}", self.max)
    }
}

/// The final report of an echo prober run.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Summary {
    pub dst_addr: IpAddr,
    pub send: SendStatistics,
    pub receive: ReceiveStatistics,
}

impl Summary {
    /// Percentage of echo requests left unanswered, 0 when nothing was sent.
    pub fn loss_percent(&self) -> u64 {
        if self.send.sent == 0 {
            return 0;
        }
        self.send.sent.saturating_sub(self.receive.received) * 100 / self.send.sent
    }
}

impl Display for Summary {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        writeln!(f)?;
        writeln!(f, "--- {} ping statistics ---", self.dst_addr)?;
        writeln!(
            f,
            "{} packets transmitted, {} packets received, {}% packet loss",
            self.send.sent,
            self.receive.received,
            self.loss_percent()
        )?;
        writeln!(
            f,
            "round-trip min/avg/max/mdev = {:.3}/{:.3}/{:.3}/{:.3} ms",
            self.receive.min,
            self.receive.avg,
            self.receive.max,
            self.receive.mdev()
        )
    }
}
