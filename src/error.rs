//! Error taxonomy shared by the socket layer and the engines.
use std::io;

use thiserror::Error;

/// A probing error result.
pub type Result<T> = std::result::Result<T, Error>;

/// A probing error.
#[derive(Error, Debug)]
pub enum Error {
    /// The configuration cannot be used (fatal, detected before any socket work).
    #[error("invalid configuration: {0}")]
    BadConfig(String),
    #[error("cannot resolve {0}")]
    Unresolvable(String),
    #[error("unknown interface: {0}")]
    UnknownInterface(String),
    /// A socket could not be opened, bound or configured.
    #[error("transport error: {0}")]
    Transport(io::Error),
    /// A read or write deadline expired; recovered by the caller.
    #[error("deadline exceeded")]
    Timeout,
    /// A packet was too short or malformed; it is dropped.
    #[error("malformed packet: {0}")]
    Parse(String),
}

impl From<io::Error> for Error {
    fn from(error: io::Error) -> Self {
        match error.kind() {
            io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => Error::Timeout,
            _ => Error::Transport(error),
        }
    }
}

impl Error {
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout)
    }
}
