#![doc = include_str!("../README.md")]

pub mod builder;
pub mod cancel;
pub mod capture;
pub mod config;
pub mod error;
pub mod hop_table;
pub mod identity;
pub mod logger;
pub mod models;
pub mod parser;
pub mod ping;
pub mod printer;
pub mod rate_limiter;
pub mod receive_loop;
pub mod receiver;
pub mod sender;
pub mod socket;
pub mod statistics;
pub mod timestamp;
pub mod traceroute;
pub mod transport;
pub mod utilities;

pub use receive_loop::*;
pub use sender::*;
