//! The hop discovery engine.
//!
//! A run owns a receive loop over an ICMP socket and a send loop sweeping the
//! TTLs with a [`ProbeTransport`]. Both loops write into a shared [`HopTable`]
//! and print it through a [`HopPrinter`] after every write, so that hops are
//! printed in order as soon as they are complete.
//!
//! ```no_run
//! use netprobe::cancel::Cancellation;
//! use netprobe::config::{ProbeMethod, TraceConfig};
//! use netprobe::traceroute::TraceRouter;
//!
//! let config = TraceConfig {
//!     target: "example.org".into(),
//!     method: ProbeMethod::Icmp,
//!     ..Default::default()
//! };
//! TraceRouter::new(config).run(&Cancellation::new()).unwrap();
//! ```
use std::io::{stdout, Write};
use std::net::IpAddr;
use std::sync::mpsc::{sync_channel, Receiver as ReadySignal, SyncSender};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, SystemTime};

use anyhow::{anyhow, Result};
use log::{debug, info, trace, warn};

use crate::builder::build_hop_payload;
use crate::cancel::Cancellation;
use crate::config::{TraceConfig, DEFAULT_READ_DEADLINE};
use crate::hop_table::HopTable;
use crate::identity::{hop_source_identity, process_tag, HopIndex};
use crate::models::{EchoReply, Probe, QuotedProbe, Reply, L3, L4};
use crate::ping::Output;
use crate::printer::HopPrinter;
use crate::rate_limiter::RateLimiter;
use crate::receive_loop::{receive_loop, ReplyHandler};
use crate::receiver::Receiver;
use crate::sender::send_echo_request;
use crate::socket::{IcmpSocket, Network, PacketConn};
use crate::transport::{for_method, probe_protocol, ProbeTransport};
use crate::utilities::resolve_target;

/// Period of the timeout sweep while the send loop waits.
pub const SWEEP_INTERVAL: Duration = Duration::from_millis(50);

/// State shared by the two loops, always accessed under its mutex.
struct TraceState {
    dst_addr: IpAddr,
    table: HopTable,
    printer: HopPrinter,
    final_hop: Option<u8>,
    output: Output,
}

impl TraceState {
    fn flush(&mut self) -> Result<()> {
        let mut output = self.output.lock().unwrap();
        self.printer.flush(&self.table, self.final_hop, &mut **output)?;
        Ok(())
    }

    fn record_reply(&mut self, ttl: u8, offset: usize, addr: IpAddr, at: SystemTime) -> Result<()> {
        if !self.table.record_reply(ttl, offset, addr, at) {
            trace!("ignore reply ttl={} offset={} from={}", ttl, offset, addr);
            return Ok(());
        }
        // A later reply may come from an earlier hop.
        if addr == self.dst_addr {
            self.final_hop = self.table.final_hop(self.dst_addr);
            debug!("destination reached at hop {:?}", self.final_hop);
        }
        self.flush()
    }

    fn sweep(&mut self, wait: Duration) -> Result<()> {
        if self.table.sweep_timeouts(SystemTime::now(), wait) > 0 {
            self.flush()?;
        }
        Ok(())
    }
}

type SharedState = Arc<Mutex<TraceState>>;

pub struct TraceRouter {
    config: TraceConfig,
    output: Output,
}

impl TraceRouter {
    pub fn new(config: TraceConfig) -> Self {
        Self::with_output(config, Box::new(stdout()))
    }

    pub fn with_output(config: TraceConfig, output: Box<dyn Write + Send>) -> Self {
        TraceRouter {
            config,
            output: Arc::new(Mutex::new(output)),
        }
    }

    /// Resolve the target and discover the hops towards it.
    /// Returns the final state of the hop table.
    pub fn run(&self, cancel: &Cancellation) -> Result<HopTable> {
        info!("{}", self.config);
        self.config.validate()?;
        let dst_addr = resolve_target(&self.config.target, self.config.family)?;
        let network = Network::select(self.config.unprivileged, L3::from(dst_addr).into());
        let transport = for_method(self.config.method, &self.config);
        self.run_with(
            || Ok(Arc::new(IcmpSocket::open(network, None)?) as Arc<dyn PacketConn>),
            transport,
            dst_addr,
            cancel,
        )
    }

    /// Discover the hops towards `dst_addr` over an already opened connection.
    /// Without a transport, probes are ICMP echo requests written on `conn`.
    pub fn run_on(
        &self,
        conn: Arc<dyn PacketConn>,
        transport: Option<Box<dyn ProbeTransport>>,
        dst_addr: IpAddr,
        cancel: &Cancellation,
    ) -> Result<HopTable> {
        self.config.validate()?;
        self.run_with(move || Ok(conn), transport, dst_addr, cancel)
    }

    fn run_with<F>(
        &self,
        open: F,
        transport: Option<Box<dyn ProbeTransport>>,
        dst_addr: IpAddr,
        cancel: &Cancellation,
    ) -> Result<HopTable>
    where
        F: FnOnce() -> Result<Arc<dyn PacketConn>> + Send,
    {
        {
            let mut output = self.output.lock().unwrap();
            writeln!(
                output,
                "traceroute to {} ({}), {} hops max",
                self.config.target, dst_addr, self.config.max_ttl
            )?;
            output.flush()?;
        }

        let cancel = cancel.child();
        let state = Arc::new(Mutex::new(TraceState {
            dst_addr,
            table: HopTable::new(self.config.first_ttl, self.config.max_ttl, self.config.queries),
            printer: HopPrinter::new(self.config.first_ttl),
            final_hop: None,
            output: self.output.clone(),
        }));
        let (ready_tx, ready_rx) = sync_channel(1);

        let (send_result, receive_result) = thread::scope(|scope| {
            let receive = scope.spawn(|| {
                let _guard = cancel.cancel_on_drop();
                self.receive_replies(open, ready_tx, dst_addr, state.clone(), &cancel)
            });
            let send = scope.spawn(|| {
                let _guard = cancel.cancel_on_drop();
                self.send_probes(ready_rx, transport, dst_addr, state.clone(), &cancel)
            });
            (
                send.join()
                    .unwrap_or_else(|_| Err(anyhow!("send loop panicked"))),
                receive
                    .join()
                    .unwrap_or_else(|_| Err(anyhow!("receive loop panicked"))),
            )
        });

        receive_result?;
        send_result?;
        let table = state.lock().unwrap().table.clone();
        Ok(table)
    }

    fn receive_replies<F>(
        &self,
        open: F,
        ready: SyncSender<Arc<dyn PacketConn>>,
        dst_addr: IpAddr,
        state: SharedState,
        cancel: &Cancellation,
    ) -> Result<()>
    where
        F: FnOnce() -> Result<Arc<dyn PacketConn>>,
    {
        let conn = open()?;
        let protocol = probe_protocol(self.config.method, conn.l3());
        let mut handler = TraceHandler {
            dst_addr,
            src_identity: hop_source_identity(process_tag()),
            // Datagram ICMP sockets rewrite the echo identifier, UDP and TCP
            // source ports are always exact.
            strict: conn.is_privileged() || !matches!(protocol, L4::ICMP | L4::ICMPv6),
            protocol: u8::from(protocol),
            index: HopIndex::new(self.config.start_identity(), self.config.queries),
            state,
        };
        let mut receiver = Receiver::new(conn.clone());
        // The sender is gone if the run was cancelled before the socket opened.
        if ready.send(conn).is_err() {
            return Ok(());
        }
        receive_loop(&mut receiver, &mut handler, cancel, DEFAULT_READ_DEADLINE)
    }

    fn send_probes(
        &self,
        ready: ReadySignal<Arc<dyn PacketConn>>,
        mut transport: Option<Box<dyn ProbeTransport>>,
        dst_addr: IpAddr,
        state: SharedState,
        cancel: &Cancellation,
    ) -> Result<()> {
        // The receive loop drops the channel if it cannot open its socket.
        let Ok(conn) = ready.recv() else {
            return Ok(());
        };
        let config = &self.config;
        let protocol = probe_protocol(config.method, conn.l3());
        let src_identity = hop_source_identity(process_tag());
        let index = HopIndex::new(config.start_identity(), config.queries);
        let window = config.hop_window();
        let mut rate_limiter = RateLimiter::new(config.send_wait);
        let mut last_sent = None;

        'hops: for ttl in config.first_ttl..=config.max_ttl {
            loop {
                {
                    let mut state = state.lock().unwrap();
                    if state.final_hop.is_some() {
                        break 'hops;
                    }
                    state.sweep(config.wait_time)?;
                    if state.table.unresolved_hops(ttl.saturating_sub(1)) < window {
                        break;
                    }
                }
                if !cancel.sleep(SWEEP_INTERVAL) {
                    return Ok(());
                }
            }
            for offset in 0..config.queries {
                if !rate_limiter.wait(cancel) {
                    return Ok(());
                }
                let probe = Probe {
                    dst_addr,
                    src_port: src_identity,
                    dst_port: index.encode(ttl, offset),
                    ttl,
                    protocol,
                };
                state
                    .lock()
                    .unwrap()
                    .table
                    .record_send(ttl, offset, SystemTime::now());
                let payload = build_hop_payload(offset);
                let result = match transport.as_mut() {
                    Some(transport) => transport.send_probe(&probe, &payload),
                    None => send_icmp_probe(conn.as_ref(), &probe, &payload),
                };
                // The slot of a failed probe is left to the timeout sweep.
                if let Err(error) = result {
                    warn!("cannot send probe ttl={} offset={}: {:#}", ttl, offset, error);
                }
            }
            last_sent = Some(ttl);
        }

        let Some(last_sent) = last_sent else {
            return Ok(());
        };
        loop {
            {
                let mut state = state.lock().unwrap();
                state.sweep(config.wait_time)?;
                let last_hop = state.final_hop.unwrap_or(last_sent);
                if state.printer.is_done(last_hop) {
                    break;
                }
            }
            if !cancel.sleep(SWEEP_INTERVAL) {
                break;
            }
        }
        Ok(())
    }
}

fn send_icmp_probe(conn: &dyn PacketConn, probe: &Probe, payload: &[u8]) -> Result<()> {
    conn.set_hop_limit(probe.ttl)?;
    send_echo_request(
        conn,
        probe.dst_addr,
        probe.src_port,
        probe.dst_port,
        payload,
        DEFAULT_READ_DEADLINE,
    )
}

/// Reply handler of the hop discovery engine.
struct TraceHandler {
    dst_addr: IpAddr,
    src_identity: u16,
    strict: bool,
    protocol: u8,
    index: HopIndex,
    state: SharedState,
}

impl TraceHandler {
    fn on_quote(&mut self, reply: &Reply, quote: &QuotedProbe) -> Result<()> {
        if quote.protocol != self.protocol
            || quote.dst_addr != self.dst_addr
            || (self.strict && quote.src_identity != self.src_identity)
        {
            trace!("correlation miss {:?}", quote);
            return Ok(());
        }
        self.record(reply, quote.dst_identity)
    }

    fn record(&mut self, reply: &Reply, dst_identity: u16) -> Result<()> {
        match self.index.decode(dst_identity) {
            Some((ttl, offset)) => self.state.lock().unwrap().record_reply(
                ttl,
                offset,
                reply.reply_src_addr,
                reply.capture_timestamp,
            ),
            None => Ok(()),
        }
    }
}

impl ReplyHandler for TraceHandler {
    fn on_echo_reply(&mut self, reply: &Reply, echo: &EchoReply) -> Result<()> {
        let icmp = u8::from(L3::from(self.dst_addr).icmp());
        if self.protocol != icmp
            || reply.reply_src_addr != self.dst_addr
            || (self.strict && echo.identifier != self.src_identity)
        {
            trace!("ignore echo reply from={}", reply.reply_src_addr);
            return Ok(());
        }
        self.record(reply, echo.sequence)
    }

    fn on_destination_unreachable(
        &mut self,
        reply: &Reply,
        _code: u8,
        quote: &QuotedProbe,
    ) -> Result<()> {
        self.on_quote(reply, quote)
    }

    fn on_time_exceeded(&mut self, reply: &Reply, _code: u8, quote: &QuotedProbe) -> Result<()> {
        self.on_quote(reply, quote)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;
    use std::net::{IpAddr, Ipv4Addr};
    use std::sync::{Arc, Mutex};
    use std::time::{Duration, SystemTime};

    use crate::hop_table::{HopTable, Slot};
    use crate::identity::HopIndex;
    use crate::models::{EchoReply, QuotedProbe, Reply};
    use crate::printer::HopPrinter;
    use crate::receive_loop::ReplyHandler;
    use crate::traceroute::{TraceHandler, TraceState};

    const TARGET: IpAddr = IpAddr::V4(Ipv4Addr::new(192, 0, 2, 1));
    const ROUTER: IpAddr = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1));

    fn handler(protocol: u8, strict: bool) -> TraceHandler {
        let sent_at = SystemTime::now();
        let mut table = HopTable::new(1, 3, 3);
        for ttl in 1..=3 {
            for offset in 0..3 {
                table.record_send(ttl, offset, sent_at);
            }
        }
        let output: Box<dyn Write + Send> = Box::new(Vec::new());
        TraceHandler {
            dst_addr: TARGET,
            src_identity: 0x9234,
            strict,
            protocol,
            index: HopIndex::new(33434, 3),
            state: Arc::new(Mutex::new(TraceState {
                dst_addr: TARGET,
                table,
                printer: HopPrinter::new(1),
                final_hop: None,
                output: Arc::new(Mutex::new(output)),
            })),
        }
    }

    fn reply_from(addr: IpAddr) -> Reply {
        Reply {
            capture_timestamp: SystemTime::now() + Duration::from_millis(1),
            reply_src_addr: addr,
            ..Default::default()
        }
    }

    fn slot(handler: &TraceHandler, ttl: u8, offset: usize) -> Slot {
        *handler.state.lock().unwrap().table.slot(ttl, offset).unwrap()
    }

    #[test]
    fn test_quote_correlation() {
        let mut handler = handler(17, true);
        let quote = QuotedProbe {
            dst_addr: TARGET,
            protocol: 17,
            src_identity: 0x9234,
            dst_identity: 33434 + 4,
        };
        handler
            .on_time_exceeded(&reply_from(ROUTER), 0, &quote)
            .unwrap();
        assert!(matches!(slot(&handler, 2, 1), Slot::Responded { addr: ROUTER, .. }));

        // Another process, another destination, another protocol.
        for other in [
            QuotedProbe {
                src_identity: 0x9999,
                dst_identity: 33434,
                ..quote
            },
            QuotedProbe {
                dst_addr: ROUTER,
                dst_identity: 33434,
                ..quote
            },
            QuotedProbe {
                protocol: 6,
                dst_identity: 33434,
                ..quote
            },
        ] {
            handler
                .on_time_exceeded(&reply_from(ROUTER), 0, &other)
                .unwrap();
        }
        assert_eq!(slot(&handler, 1, 0), Slot::Pending);
    }

    #[test]
    fn test_destination_reached() {
        let mut handler = handler(17, true);
        let quote = QuotedProbe {
            dst_addr: TARGET,
            protocol: 17,
            src_identity: 0x9234,
            dst_identity: 33434 + 6,
        };
        handler
            .on_destination_unreachable(&reply_from(TARGET), 3, &quote)
            .unwrap();
        assert_eq!(handler.state.lock().unwrap().final_hop, Some(3));
    }

    #[test]
    fn test_destination_reached_out_of_order() {
        let mut handler = handler(17, true);
        let quote = QuotedProbe {
            dst_addr: TARGET,
            protocol: 17,
            src_identity: 0x9234,
            dst_identity: 33434 + 6,
        };
        handler
            .on_destination_unreachable(&reply_from(TARGET), 3, &quote)
            .unwrap();
        // Hop 2 probes were already past the last router.
        let earlier = QuotedProbe {
            dst_identity: 33434 + 3,
            ..quote
        };
        handler
            .on_destination_unreachable(&reply_from(TARGET), 3, &earlier)
            .unwrap();
        let state = handler.state.lock().unwrap();
        assert_eq!(state.final_hop, Some(2));
        assert_eq!(state.table.final_hop(TARGET), Some(2));
    }

    #[test]
    fn test_icmp_echo_reply() {
        let mut handler = handler(1, false);
        let echo = EchoReply {
            identifier: 0x1111,
            sequence: 33434 + 8,
            payload: vec![0, 2],
        };
        // Echo replies only come from the destination.
        handler.on_echo_reply(&reply_from(ROUTER), &echo).unwrap();
        assert_eq!(slot(&handler, 3, 2), Slot::Pending);
        handler.on_echo_reply(&reply_from(TARGET), &echo).unwrap();
        assert!(matches!(slot(&handler, 3, 2), Slot::Responded { addr: TARGET, .. }));
        assert_eq!(handler.state.lock().unwrap().final_hop, Some(3));
    }
}
