//! Data structures for representing probes and replies.
mod probe;
mod protocols;
mod reply;

pub use probe::*;
pub use protocols::*;
pub use reply::*;
