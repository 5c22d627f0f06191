//! Crate-wide error type.

use std::io;

use thiserror::Error;

use crate::bus::BusError;
use crate::codec::CodecError;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error(transparent)]
    Bus(#[from] BusError),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("invalid configuration: {0}")]
    Config(String),

    /// A programming error. The reactor stops when one reaches it.
    #[error("invariant violated: {0}")]
    Invariant(String),
}

impl Error {
    pub fn invariant(msg: impl Into<String>) -> Self {
        Error::Invariant(msg.into())
    }

    /// Whether the reactor must stop. Bus failures mean a notification was lost, which
    /// leaves some connection's state machine stuck, so they count as fatal too.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Invariant(_) | Error::Bus(_))
    }
}

/// Errors that mean the peer went away rather than something being wrong on our side.
pub fn is_disconnect(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::UnexpectedEof
    )
}
