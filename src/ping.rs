//! The echo prober.
//!
//! A run opens one ICMP socket and drives two loops over it: a sender that
//! writes an echo request every interval, and a receiver that classifies the
//! replies, updates the statistics and prints one line per reply. The first
//! loop to finish (or fail) cancels the other; the summary is always printed.
//!
//! ```no_run
//! use netprobe::cancel::Cancellation;
//! use netprobe::config::PingConfig;
//! use netprobe::ping::Pinger;
//!
//! let config = PingConfig {
//!     target: "example.org".into(),
//!     count: Some(4),
//!     ..Default::default()
//! };
//! let summary = Pinger::new(config).run(&Cancellation::new()).unwrap();
//! println!("{:?}", summary);
//! ```
use std::io::{stdout, Write};
use std::net::IpAddr;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{anyhow, Result};
use log::{info, trace};

use crate::cancel::Cancellation;
use crate::config::PingConfig;
use crate::identity::process_tag;
use crate::logger::{SharedStatistics, StatisticsLogger};
use crate::models::{EchoReply, QuotedProbe, Reply, L3};
use crate::rate_limiter::RateLimiter;
use crate::receive_loop::{receive_loop, ReplyHandler};
use crate::receiver::Receiver;
use crate::sender::{EchoSender, SendOutcome};
use crate::socket::{IcmpSocket, Network, PacketConn};
use crate::statistics::{ReceiveStatistics, SendStatistics, Summary};
use crate::timestamp::as_millis_f64;
use crate::utilities::{interface_address, resolve_target};

/// The result stream shared by the two loops.
pub type Output = Arc<Mutex<Box<dyn Write + Send>>>;

pub struct Pinger {
    config: PingConfig,
    output: Output,
}

impl Pinger {
    pub fn new(config: PingConfig) -> Self {
        Self::with_output(config, Box::new(stdout()))
    }

    pub fn with_output(config: PingConfig, output: Box<dyn Write + Send>) -> Self {
        Pinger {
            config,
            output: Arc::new(Mutex::new(output)),
        }
    }

    /// Resolve the target, open the socket and probe until the count, the
    /// timeout or `cancel` ends the run.
    pub fn run(&self, cancel: &Cancellation) -> Result<Summary> {
        info!("{}", self.config);
        self.config.validate()?;
        let dst_addr = resolve_target(&self.config.target, self.config.family)?;
        let l3_protocol = L3::from(dst_addr);
        let network = Network::select(self.config.unprivileged, l3_protocol.into());
        let bind_addr = match &self.config.interface {
            Some(interface) => Some(interface_address(interface, l3_protocol)?),
            None => None,
        };
        let conn = IcmpSocket::open(network, bind_addr)?;
        conn.set_hop_limit(self.config.ttl)?;
        self.run_on(Arc::new(conn), dst_addr, cancel)
    }

    /// Probe `dst_addr` over an already opened connection.
    pub fn run_on(
        &self,
        conn: Arc<dyn PacketConn>,
        dst_addr: IpAddr,
        cancel: &Cancellation,
    ) -> Result<Summary> {
        self.config.validate()?;
        let cancel = cancel.child();
        let identifier = process_tag();
        let mut sender = EchoSender::new(
            conn.clone(),
            dst_addr,
            identifier,
            self.config.payload_size,
            self.config.read_deadline(),
        );
        let send_statistics = sender.statistics().clone();
        let receive_statistics = Arc::new(Mutex::new(ReceiveStatistics::default()));
        let mut rate_limiter = RateLimiter::new(self.config.interval);

        let logger = self.config.statistics_interval.map(|interval| {
            let statistics: Vec<SharedStatistics> = vec![
                send_statistics.clone(),
                receive_statistics.clone(),
                rate_limiter.statistics().clone(),
            ];
            StatisticsLogger::new(interval, statistics)
        });

        let mut handler = EchoHandler {
            identifier,
            privileged: conn.is_privileged(),
            l3_icmp: u8::from(conn.l3().icmp()),
            quiet: self.config.quiet,
            timestamp: self.config.timestamp,
            statistics: receive_statistics.clone(),
            output: self.output.clone(),
        };
        let mut receiver = Receiver::new(conn);
        let deadline = self.config.read_deadline();

        let (send_result, receive_result) = thread::scope(|scope| {
            let receive = scope.spawn(|| {
                let _guard = cancel.cancel_on_drop();
                receive_loop(&mut receiver, &mut handler, &cancel, deadline)
            });
            let send = scope.spawn(|| {
                let _guard = cancel.cancel_on_drop();
                self.send_loop(&mut sender, &mut rate_limiter, &cancel)
            });
            (
                send.join()
                    .unwrap_or_else(|_| Err(anyhow!("send loop panicked"))),
                receive
                    .join()
                    .unwrap_or_else(|_| Err(anyhow!("receive loop panicked"))),
            )
        });

        if let Some(logger) = logger {
            logger.stop();
        }

        let summary = Summary {
            dst_addr,
            send: *send_statistics.lock().unwrap(),
            receive: *receive_statistics.lock().unwrap(),
        };
        {
            let mut output = self.output.lock().unwrap();
            write!(output, "{summary}")?;
            output.flush()?;
        }

        send_result?;
        receive_result?;
        Ok(summary)
    }

    fn send_loop(
        &self,
        sender: &mut EchoSender,
        rate_limiter: &mut RateLimiter,
        cancel: &Cancellation,
    ) -> Result<()> {
        // The limiter returns immediately on the first call, then once per interval,
        // so the loop lingers one interval after the last request.
        while rate_limiter.wait(cancel) {
            if !self.continue_to_ping(&sender.statistics().lock().unwrap()) {
                break;
            }
            match sender.send()? {
                SendOutcome::Sent(sequence) => trace!("sent icmp_seq={}", sequence),
                SendOutcome::TimedOut(sequence) => {
                    let mut output = self.output.lock().unwrap();
                    writeln!(output, "Request timeout for icmp_seq {sequence}")?;
                    output.flush()?;
                }
            }
        }
        Ok(())
    }

    fn continue_to_ping(&self, statistics: &SendStatistics) -> bool {
        if let Some(count) = self.config.count {
            if statistics.sent >= count {
                return false;
            }
        }
        if let (Some(timeout), Some(first_sent)) = (self.config.timeout, statistics.first_sent) {
            if first_sent.elapsed().unwrap_or_default() >= timeout {
                return false;
            }
        }
        true
    }
}

/// Reply handler of the echo prober.
struct EchoHandler {
    identifier: u16,
    privileged: bool,
    l3_icmp: u8,
    quiet: bool,
    timestamp: bool,
    statistics: Arc<Mutex<ReceiveStatistics>>,
    output: Output,
}

impl EchoHandler {
    /// Datagram sockets rewrite the identifier and only deliver their own
    /// replies, so the identifier is only checked on raw sockets.
    fn matches(&self, identifier: u16) -> bool {
        !self.privileged || identifier == self.identifier
    }

    fn print(&self, line: &str) -> Result<()> {
        if self.quiet {
            return Ok(());
        }
        let mut output = self.output.lock().unwrap();
        if self.timestamp {
            let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default();
            write!(output, "[{}.{:06}] ", now.as_secs(), now.subsec_micros())?;
        }
        writeln!(output, "{line}")?;
        output.flush()?;
        Ok(())
    }

    fn quoted_sequence(&self, quote: &QuotedProbe) -> Option<u16> {
        (quote.protocol == self.l3_icmp && self.matches(quote.src_identity))
            .then_some(quote.dst_identity)
    }
}

impl ReplyHandler for EchoHandler {
    fn on_echo_reply(&mut self, reply: &Reply, echo: &EchoReply) -> Result<()> {
        if !self.matches(echo.identifier) {
            trace!("ignore echo reply id={}", echo.identifier);
            return Ok(());
        }
        let Some(sent_at) = echo.sent_at() else {
            trace!("ignore echo reply without timestamp");
            return Ok(());
        };
        let rtt = as_millis_f64(reply.rtt_since(sent_at));
        self.statistics.lock().unwrap().record_rtt(rtt);
        self.print(&format!(
            "{} bytes from {}: icmp_seq={} ttl={} time={:.3} ms",
            reply.reply_size,
            reply.reply_src_addr,
            echo.sequence,
            reply.display_ttl(),
            rtt
        ))
    }

    fn on_destination_unreachable(
        &mut self,
        reply: &Reply,
        _code: u8,
        quote: &QuotedProbe,
    ) -> Result<()> {
        match self.quoted_sequence(quote) {
            Some(sequence) => self.print(&format!(
                "From {} icmp_seq={} Destination unreachable",
                reply.reply_src_addr, sequence
            )),
            None => Ok(()),
        }
    }

    fn on_time_exceeded(&mut self, reply: &Reply, _code: u8, quote: &QuotedProbe) -> Result<()> {
        match self.quoted_sequence(quote) {
            Some(sequence) => self.print(&format!(
                "From {} icmp_seq={} Time to live exceeded",
                reply.reply_src_addr, sequence
            )),
            None => Ok(()),
        }
    }
}
