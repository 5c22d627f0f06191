//! Buffered, backpressure-aware connection driver.
//!
//! A [`Session`] binds one non-blocking socket to a recv [`Buffer`] and a send [`Buffer`].
//! Its read and write "watchers" are the readiness interests registered with mio:
//!
//! - reading is enabled while the recv buffer has room and holds no more than the high
//!   watermark;
//! - writing is enabled once the send buffer holds more than the low watermark and stays
//!   enabled until the buffer drains to empty.
//!
//! The readiness handlers themselves live on [`Core`] because they publish on the bus and
//! may tear the session down.

use std::io::{Read, Write};

use log::{debug, error, info, trace};
use mio::event::Source;
use mio::{Interest, Registry, Token};

use crate::buffer::{Buffer, Transfer};
use crate::channels::{Event, SessionId};
use crate::config::Config;
use crate::error::{is_disconnect, Result};
use crate::reactor::Core;

/// A non-blocking byte-stream socket the reactor can poll.
pub trait Socket: Read + Write + Source {}

impl<T: Read + Write + Source + ?Sized> Socket for T {}

pub struct Session {
    id: SessionId,
    socket: Box<dyn Socket>,
    recv_buffer: Buffer,
    send_buffer: Buffer,
    reading: bool,
    writing: bool,
    registered: Option<Interest>,
    remote_address: String,
    recv_high_watermark: usize,
    send_low_watermark: usize,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("remote_address", &self.remote_address)
            .field("recv_used", &self.recv_buffer.used_space())
            .field("send_used", &self.send_buffer.used_space())
            .field("reading", &self.reading)
            .field("writing", &self.writing)
            .finish()
    }
}

impl Session {
    fn new(id: SessionId, socket: Box<dyn Socket>, remote_address: String, config: &Config) -> Self {
        Self {
            id,
            socket,
            recv_buffer: Buffer::allocate(config.recv_buffer_size),
            send_buffer: Buffer::allocate(config.send_buffer_size),
            reading: true,
            writing: false,
            registered: None,
            remote_address,
            recv_high_watermark: config.recv_high_watermark,
            send_low_watermark: config.send_low_watermark,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn remote_address(&self) -> &str {
        &self.remote_address
    }

    /// Whether the read watcher is active.
    pub fn is_reading(&self) -> bool {
        self.reading
    }

    /// Whether the write watcher is active.
    pub fn is_writing(&self) -> bool {
        self.writing
    }

    pub fn recv_buffer(&self) -> &Buffer {
        &self.recv_buffer
    }

    pub fn send_buffer(&self) -> &Buffer {
        &self.send_buffer
    }

    pub(crate) fn recv_buffer_mut(&mut self) -> &mut Buffer {
        &mut self.recv_buffer
    }

    pub(crate) fn send_buffer_mut(&mut self) -> &mut Buffer {
        &mut self.send_buffer
    }

    fn check_recv_watermark(&mut self) {
        let wanted =
            !self.recv_buffer.is_full() && self.recv_buffer.used_space() <= self.recv_high_watermark;
        if wanted && !self.reading {
            debug!("[{}] re-enable receiving data", self.id);
        } else if !wanted && self.reading {
            debug!("[{}] stop receiving data", self.id);
        }
        self.reading = wanted;
    }

    fn check_send_watermark(&mut self) {
        if self.send_buffer.used_space() > self.send_low_watermark && !self.writing {
            debug!("[{}] start flushing out send buffer", self.id);
            self.writing = true;
        }
    }

    /// Bring the registered interest set in line with the watcher flags.
    fn sync_interest(&mut self, registry: &Registry) -> std::io::Result<()> {
        let wanted = match (self.reading, self.writing) {
            (true, true) => Some(Interest::READABLE | Interest::WRITABLE),
            (true, false) => Some(Interest::READABLE),
            (false, true) => Some(Interest::WRITABLE),
            (false, false) => None,
        };
        if wanted == self.registered {
            return Ok(());
        }
        let token = Token(self.id.0 as usize);
        match (self.registered, wanted) {
            (None, Some(interest)) => registry.register(&mut *self.socket, token, interest)?,
            (Some(_), Some(interest)) => registry.reregister(&mut *self.socket, token, interest)?,
            (Some(_), None) => registry.deregister(&mut *self.socket)?,
            (None, None) => {}
        }
        trace!("[{}] interest {:?} -> {:?}", self.id, self.registered, wanted);
        self.registered = wanted;
        Ok(())
    }
}

/// What a transfer loop ended with.
enum Outcome {
    Ready,
    Closed,
    Failed(std::io::Error),
}

impl Core {
    /// Adopt a connected socket and announce it on [`Channel::SessionInitialized`].
    ///
    /// [`Channel::SessionInitialized`]: crate::channels::Channel::SessionInitialized
    pub fn add_session(&mut self, socket: Box<dyn Socket>, remote_address: String) -> Result<SessionId> {
        let id = self.next_session_id();
        debug!("[{}] init session", id);
        let mut session = Session::new(id, socket, remote_address, &self.config);
        session.sync_interest(&self.registry)?;
        self.sessions.insert(id, session);
        self.bus.broadcast(Event::SessionInitialized(id))?;
        Ok(id)
    }

    pub fn session(&self, id: SessionId) -> Option<&Session> {
        self.sessions.get(&id)
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Read readiness: fill the recv buffer until it is full or the socket would block.
    pub fn handle_readable(&mut self, id: SessionId) -> Result<()> {
        let Some(session) = self.sessions.get_mut(&id) else {
            return Ok(());
        };
        trace!("[{}] readable", id);

        let outcome = loop {
            if session.recv_buffer.is_full() {
                break Outcome::Ready;
            }
            match session.recv_buffer.fill_from_socket(&mut *session.socket) {
                Ok(Transfer::Bytes(n)) => debug!("[{}] recv {} bytes", id, n),
                Ok(Transfer::WouldBlock) => break Outcome::Ready,
                Ok(Transfer::Closed) => break Outcome::Closed,
                Err(e) => break Outcome::Failed(e),
            }
        };
        match outcome {
            Outcome::Ready => {}
            Outcome::Closed => {
                debug!("[{}] peer closed connection", id);
                return self.delete_session(id);
            }
            Outcome::Failed(e) if is_disconnect(&e) => {
                debug!("[{}] connection reset by peer", id);
                return self.delete_session(id);
            }
            Outcome::Failed(e) => {
                error!("[{}] recv: {}", id, e);
                return self.delete_session(id);
            }
        }

        session.check_recv_watermark();
        self.sync_interest(id)?;
        self.bus.broadcast(Event::DataReceived(id))?;
        Ok(())
    }

    /// Write readiness.
    pub fn handle_writable(&mut self, id: SessionId) -> Result<()> {
        trace!("[{}] writable", id);
        self.flush_send_buffer(id)
    }

    /// Drain the send buffer to the socket now, without waiting for write readiness.
    ///
    /// Write interest stays armed while bytes remain. Draining to empty disarms it and
    /// publishes [`Event::SendBufferEmpty`].
    pub fn flush_send_buffer(&mut self, id: SessionId) -> Result<()> {
        let Some(session) = self.sessions.get_mut(&id) else {
            return Ok(());
        };
        if session.send_buffer.is_empty() {
            return Ok(());
        }

        let outcome = loop {
            if session.send_buffer.is_empty() {
                break Outcome::Ready;
            }
            match session.send_buffer.drain_to_socket(&mut *session.socket) {
                Ok(Transfer::Bytes(n)) => debug!("[{}] send {} bytes", id, n),
                Ok(Transfer::WouldBlock) => break Outcome::Ready,
                Ok(Transfer::Closed) => break Outcome::Closed,
                Err(e) => break Outcome::Failed(e),
            }
        };
        match outcome {
            Outcome::Ready => {}
            Outcome::Closed => {
                debug!("[{}] peer stopped accepting data", id);
                return self.delete_session(id);
            }
            Outcome::Failed(e) if is_disconnect(&e) => {
                debug!("[{}] connection reset by peer", id);
                return self.delete_session(id);
            }
            Outcome::Failed(e) => {
                error!("[{}] send: {}", id, e);
                return self.delete_session(id);
            }
        }

        let drained = session.send_buffer.is_empty();
        if drained {
            debug!("[{}] send buffer is empty", id);
        }
        session.writing = !drained;
        self.sync_interest(id)?;
        if drained {
            self.bus.broadcast(Event::SendBufferEmpty(id))?;
        }
        Ok(())
    }

    /// Copy up to `dst.len()` received bytes out of the session.
    pub fn session_recv(&mut self, id: SessionId, dst: &mut [u8]) -> Result<usize> {
        let Some(session) = self.sessions.get_mut(&id) else {
            return Ok(0);
        };
        let n = session.recv_buffer.drain_to_memory(dst);
        session.check_recv_watermark();
        self.sync_interest(id)?;
        Ok(n)
    }

    /// Queue as much of `src` as fits in the send buffer.
    pub fn session_send(&mut self, id: SessionId, src: &[u8]) -> Result<usize> {
        let Some(session) = self.sessions.get_mut(&id) else {
            return Ok(0);
        };
        let n = session.send_buffer.fill_from_memory(src);
        session.check_send_watermark();
        self.sync_interest(id)?;
        Ok(n)
    }

    /// Mark `n` bytes of the recv buffer's outgoing view as consumed.
    pub fn recv_consumed(&mut self, id: SessionId, n: usize) -> Result<()> {
        let Some(session) = self.sessions.get_mut(&id) else {
            return Ok(());
        };
        session.recv_buffer.outgoing_consumed(n);
        session.check_recv_watermark();
        self.sync_interest(id)
    }

    /// Mark `n` bytes written into the send buffer's incoming view as provided.
    pub fn send_provided(&mut self, id: SessionId, n: usize) -> Result<()> {
        let Some(session) = self.sessions.get_mut(&id) else {
            return Ok(());
        };
        session.send_buffer.incoming_provided(n);
        session.check_send_watermark();
        self.sync_interest(id)
    }

    /// Tear a session down. Calling it again for the same id is a no-op.
    pub fn delete_session(&mut self, id: SessionId) -> Result<()> {
        let Some(mut session) = self.sessions.remove(&id) else {
            return Ok(());
        };
        info!("[{}] close connection {}", id, session.remote_address);

        if session.registered.is_some() {
            if let Err(e) = self.registry.deregister(&mut *session.socket) {
                debug!("[{}] deregister: {}", id, e);
            }
        }
        drop(session);

        let cancelled = self.bus.cancel_messages(|event| event.session() == id);
        if cancelled > 0 {
            trace!("[{}] cancelled {} pending message(s)", id, cancelled);
        }
        self.bus.broadcast(Event::SessionDeleted(id))?;
        Ok(())
    }

    fn sync_interest(&mut self, id: SessionId) -> Result<()> {
        let Some(session) = self.sessions.get_mut(&id) else {
            return Ok(());
        };
        if let Err(e) = session.sync_interest(&self.registry) {
            error!("[{}] update interest: {}", id, e);
            return self.delete_session(id);
        }
        Ok(())
    }
}
