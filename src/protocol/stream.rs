//! Per-stream state and the stream-id map.

use std::collections::HashMap;

use log::debug;

use crate::channels::SessionId;
use crate::codec::H2Header;
use crate::error::{Error, Result};
use crate::reactor::Core;
use crate::timer::{TimerKey, Timers};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Open,
    /// The peer sent END_STREAM; the response is still outstanding.
    HalfClosedRemote,
}

/// One request/response exchange multiplexed over a protocol session.
#[derive(Debug)]
pub struct Stream {
    id: u32,
    session: SessionId,
    state: StreamState,
    recv_timer: TimerKey,
    send_timer: TimerKey,
    headers: Vec<H2Header>,
    received: usize,
}

impl Stream {
    pub(crate) fn new(id: u32, session: SessionId, recv_timer: TimerKey, send_timer: TimerKey) -> Self {
        Self {
            id,
            session,
            state: StreamState::Open,
            recv_timer,
            send_timer,
            headers: Vec::new(),
            received: 0,
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn session(&self) -> SessionId {
        self.session
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    /// Request headers followed by any trailers, in arrival order.
    pub fn headers(&self) -> &[H2Header] {
        &self.headers
    }

    /// Request body bytes seen so far.
    pub fn received(&self) -> usize {
        self.received
    }

    pub(crate) fn push_header(&mut self, header: H2Header) {
        self.headers.push(header);
    }

    pub(crate) fn add_received(&mut self, n: usize) {
        self.received += n;
    }

    pub(crate) fn set_half_closed(&mut self) {
        self.state = StreamState::HalfClosedRemote;
    }

    pub(crate) fn start_recv_timer(&self, timers: &mut Timers<Core>) {
        timers.start(self.recv_timer);
    }

    pub(crate) fn extend_recv_timer(&self, timers: &mut Timers<Core>) {
        timers.again(self.recv_timer);
    }

    pub(crate) fn extend_recv_timer_if_pending(&self, timers: &mut Timers<Core>) {
        if timers.is_active(self.recv_timer) {
            timers.again(self.recv_timer);
        }
    }

    pub(crate) fn stop_recv_timer(&self, timers: &mut Timers<Core>) {
        timers.stop(self.recv_timer);
    }

    pub(crate) fn extend_send_timer(&self, timers: &mut Timers<Core>) {
        timers.again(self.send_timer);
    }

    pub(crate) fn stop_send_timer(&self, timers: &mut Timers<Core>) {
        timers.stop(self.send_timer);
    }

    pub fn is_recv_timer_active(&self, timers: &Timers<Core>) -> bool {
        timers.is_active(self.recv_timer)
    }

    pub fn is_send_timer_active(&self, timers: &Timers<Core>) -> bool {
        timers.is_active(self.send_timer)
    }

    /// Stop and drop both timers.
    pub(crate) fn release(self, timers: &mut Timers<Core>) {
        timers.remove(self.recv_timer);
        timers.remove(self.send_timer);
    }
}

/// Open streams of one protocol session, keyed by stream id.
#[derive(Debug, Default)]
pub struct StreamMap {
    streams: HashMap<u32, Stream>,
}

impl StreamMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a new stream. An id that is still mapped is a programming error.
    pub fn insert(&mut self, stream: Stream) -> Result<()> {
        if self.streams.contains_key(&stream.id) {
            return Err(Error::invariant(format!(
                "[{}] stream {} inserted twice",
                stream.session, stream.id
            )));
        }
        self.streams.insert(stream.id, stream);
        Ok(())
    }

    pub fn get(&self, id: u32) -> Option<&Stream> {
        self.streams.get(&id)
    }

    pub(crate) fn get_mut(&mut self, id: u32) -> Option<&mut Stream> {
        self.streams.get_mut(&id)
    }

    pub fn contains(&self, id: u32) -> bool {
        self.streams.contains_key(&id)
    }

    pub(crate) fn remove(&mut self, id: u32) -> Option<Stream> {
        self.streams.remove(&id)
    }

    pub fn len(&self) -> usize {
        self.streams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }

    /// Delete every stream, releasing its timers.
    pub(crate) fn clear(&mut self, timers: &mut Timers<Core>) {
        for (id, stream) in self.streams.drain() {
            debug!("[{}] remove stream {} from session", stream.session, id);
            stream.release(timers);
        }
    }
}
