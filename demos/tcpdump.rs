//! A packet dump command on top of netprobe.
use std::io::stdout;

use anyhow::Result;
use clap::Parser;
use log::LevelFilter;
use netprobe::cancel::Cancellation;
use netprobe::capture::Dumper;
use netprobe::logger::configure_logger;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Interface to capture packets on.
    #[arg(short = 'i', long)]
    interface: String,
    /// Print the Ethernet addresses of each frame.
    #[arg(short = 'e', long, default_value_t = false)]
    ethernet: bool,
    /// Minimum log level.
    #[arg(short = 'L', long, default_value_t = LevelFilter::Info)]
    log_level: LevelFilter,
    /// BPF filter expression.
    #[arg(trailing_var_arg = true)]
    filter: Vec<String>,
}

fn main() -> Result<()> {
    let args = Args::parse();
    configure_logger(args.log_level);

    let cancel = Cancellation::new();
    {
        let cancel = cancel.clone();
        ctrlc::set_handler(move || cancel.cancel())?;
    }

    let filter = args.filter.join(" ");
    let filter = (!filter.is_empty()).then_some(filter.as_str());
    Dumper::new(&args.interface, args.ethernet).sniff(filter, &cancel, &mut stdout())?;
    Ok(())
}
