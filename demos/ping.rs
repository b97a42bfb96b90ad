//! A ping command on top of netprobe.
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use log::LevelFilter;
use netprobe::cancel::Cancellation;
use netprobe::config::{parse_keyword, AddressFamily, PingConfig};
use netprobe::logger::configure_logger;
use netprobe::ping::Pinger;
use netprobe::timestamp::DEFAULT_PAYLOAD_SIZE;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Stop after sending count echo requests.
    #[arg(short = 'c', long)]
    count: Option<u64>,
    /// Seconds to wait between echo requests.
    #[arg(short = 'i', long, default_value_t = 1.0)]
    interval: f64,
    /// Interface whose address is used as the source address.
    #[arg(short = 'I', long)]
    interface: Option<String>,
    /// Outgoing TTL.
    #[arg(short = 't', long, default_value_t = 64)]
    ttl: u8,
    /// Address family: ip, ip4 or ip6.
    #[arg(long, default_value_t = AddressFamily::Ip, value_parser = parse_keyword::<AddressFamily>)]
    family: AddressFamily,
    /// Use a datagram ICMP socket instead of a raw socket.
    #[arg(short = 'u', long, default_value_t = false)]
    unprivileged: bool,
    /// Stop sending after this many seconds.
    #[arg(short = 'w', long)]
    timeout: Option<f64>,
    /// Seconds to wait for each read and write.
    #[arg(short = 'W', long, default_value_t = 1.0)]
    deadline: f64,
    /// Number of payload bytes.
    #[arg(short = 's', long, default_value_t = DEFAULT_PAYLOAD_SIZE)]
    size: usize,
    /// Only print the summary.
    #[arg(short = 'q', long, default_value_t = false)]
    quiet: bool,
    /// Print a timestamp before each line.
    #[arg(short = 'D', long, default_value_t = false)]
    timestamp: bool,
    /// Log the engine statistics every N seconds.
    #[arg(long)]
    statistics_interval: Option<u64>,
    /// Minimum log level.
    #[arg(short = 'L', long, default_value_t = LevelFilter::Warn)]
    log_level: LevelFilter,
    /// The host to ping.
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

    let config = PingConfig {
        target: args.host,
        count: args.count,
        interval: Duration::from_secs_f64(args.interval),
        interface: args.interface,
        ttl: args.ttl,
        family: args.family,
        unprivileged: args.unprivileged,
        timeout: args.timeout.map(Duration::from_secs_f64),
        deadline: Some(Duration::from_secs_f64(args.deadline)),
        payload_size: args.size,
        quiet: args.quiet,
        timestamp: args.timestamp,
        statistics_interval: args.statistics_interval.map(Duration::from_secs),
    };
    Pinger::new(config).run(&cancel)?;
    Ok(())
}
