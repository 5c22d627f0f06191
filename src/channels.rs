//! Bus channels and their payloads.

use std::fmt;

use crate::bus::Message;

/// Reactor-unique connection id. Ids are never reused for the lifetime of a reactor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    /// A connection was accepted and its session is ready for a protocol.
    SessionInitialized,
    /// New bytes are waiting in the session's recv buffer.
    DataReceived,
    /// The session's send buffer drained to empty.
    SendBufferEmpty,
    /// The session is gone. Release anything keyed by its id.
    SessionDeleted,
    /// The protocol engine has output waiting to be moved into the send buffer.
    WantWrite,
    /// A request stream finished receiving and awaits a response.
    StreamReady,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    SessionInitialized(SessionId),
    DataReceived(SessionId),
    SendBufferEmpty(SessionId),
    SessionDeleted(SessionId),
    WantWrite(SessionId),
    StreamReady { session: SessionId, stream_id: u32 },
}

impl Event {
    pub fn session(&self) -> SessionId {
        match *self {
            Event::SessionInitialized(id)
            | Event::DataReceived(id)
            | Event::SendBufferEmpty(id)
            | Event::SessionDeleted(id)
            | Event::WantWrite(id) => id,
            Event::StreamReady { session, .. } => session,
        }
    }
}

impl Message for Event {
    type Channel = Channel;

    fn channel(&self) -> Channel {
        match self {
            Event::SessionInitialized(_) => Channel::SessionInitialized,
            Event::DataReceived(_) => Channel::DataReceived,
            Event::SendBufferEmpty(_) => Channel::SendBufferEmpty,
            Event::SessionDeleted(_) => Channel::SessionDeleted,
            Event::WantWrite(_) => Channel::WantWrite,
            Event::StreamReady { .. } => Channel::StreamReady,
        }
    }
}
