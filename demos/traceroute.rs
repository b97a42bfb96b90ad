//! A traceroute command on top of netprobe.
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use log::LevelFilter;
use netprobe::cancel::Cancellation;
use netprobe::config::{parse_keyword, AddressFamily, ProbeMethod, TraceConfig};
use netprobe::logger::configure_logger;
use netprobe::traceroute::TraceRouter;

// Options follow `traceroute --help` where they exist.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Address family: ip, ip4 or ip6.
    #[arg(long, default_value_t = AddressFamily::Ip, value_parser = parse_keyword::<AddressFamily>)]
    family: AddressFamily,
    /// Probe method: default, icmp, udp, tcp or tcp-half-open.
    #[arg(short = 'M', long, default_value_t = ProbeMethod::Default, value_parser = parse_keyword::<ProbeMethod>)]
    method: ProbeMethod,
    /// Start from the first_ttl hop.
    #[arg(short = 'f', long = "first", default_value_t = 1)]
    first_ttl: u8,
    /// Set the max number of hops (max TTL to be reached).
    #[arg(short = 'm', long = "max-hops", default_value_t = 30)]
    max_ttl: u8,
    /// Number of probes sent before waiting for their replies.
    #[arg(short = 'N', long = "sim-queries", default_value_t = 3)]
    sim_queries: usize,
    /// Number of probes per hop.
    #[arg(short = 'q', long = "queries", default_value_t = 3)]
    queries: usize,
    /// First destination port, or ICMP sequence number.
    #[arg(short = 'p', long = "port")]
    port: Option<u16>,
    /// Wait for a probe no more than N seconds.
    #[arg(short = 'w', long = "wait", default_value_t = 5.0)]
    wait: f64,
    /// Seconds between probes.
    #[arg(short = 'z', long = "sendwait", default_value_t = 0.1)]
    send_wait: f64,
    /// Listen on a datagram ICMP socket instead of a raw socket.
    #[arg(short = 'u', long, default_value_t = false)]
    unprivileged: bool,
    /// Minimum log level.
    #[arg(short = 'L', long, default_value_t = LevelFilter::Warn)]
    log_level: LevelFilter,
    /// The host to traceroute to.
    #[arg(index = 1)]
    host: String,
}

fn main() -> Result<()> {
    let args = Args::parse();
    configure_logger(args.log_level);

    let cancel = Cancellation::new();
    {
        let cancel = cancel.clone();
        ctrlc::set_handler(move || cancel.cancel())?;
    }

    let config = TraceConfig {
        target: args.host,
        family: args.family,
        method: args.method,
        first_ttl: args.first_ttl,
        max_ttl: args.max_ttl,
        sim_queries: args.sim_queries,
        queries: args.queries,
        port: args.port,
        wait_time: Duration::from_secs_f64(args.wait),
        send_wait: Duration::from_secs_f64(args.send_wait),
        unprivileged: args.unprivileged,
        ..Default::default()
    };
    TraceRouter::new(config).run(&cancel)?;
    Ok(())
}
