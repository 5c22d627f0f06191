//! Engine callback table for one protocol session.
//!
//! The engine calls back synchronously from `mem_recv` and `send`, while the protocol
//! session is mutably borrowed. [`Callbacks`] therefore borrows exactly the pieces of
//! [`Core`] the callbacks touch. Callbacks cannot fail, so the first fatal error is kept
//! and surfaced by the caller after the engine returns.

use log::{debug, trace};

use super::stream::{Stream, StreamMap};
use super::{stream_timeout, TimerKind};
use crate::bus::Bus;
use crate::channels::{Event, SessionId};
use crate::codec::{frame_type, EngineCallbacks, FlowWindows, FrameHeader, H2Header, HeadersCategory};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::reactor::Core;
use crate::timer::{TimerKey, Timers};

pub(crate) struct Callbacks<'a> {
    pub session: SessionId,
    pub streams: &'a mut StreamMap,
    pub timers: &'a mut Timers<Core>,
    pub bus: &'a mut Bus<Core, Event>,
    pub config: &'a Config,
    pub settings_timer: TimerKey,
    fatal: Option<Error>,
}

impl<'a> Callbacks<'a> {
    pub fn new(
        session: SessionId,
        streams: &'a mut StreamMap,
        timers: &'a mut Timers<Core>,
        bus: &'a mut Bus<Core, Event>,
        config: &'a Config,
        settings_timer: TimerKey,
    ) -> Self {
        Self {
            session,
            streams,
            timers,
            bus,
            config,
            settings_timer,
            fatal: None,
        }
    }

    /// The first fatal error raised by a callback, if any.
    pub fn finish(self) -> Result<()> {
        match self.fatal {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn fail(&mut self, err: Error) {
        if self.fatal.is_none() {
            self.fatal = Some(err);
        }
    }

    fn open_stream(&mut self, stream_id: u32) -> Result<()> {
        let session = self.session;
        let recv_timer = self.timers.insert(self.config.stream_recv_timeout, move |core: &mut Core| {
            stream_timeout(core, session, stream_id, TimerKind::Recv)
        });
        let send_timer = self.timers.insert(self.config.stream_send_timeout, move |core: &mut Core| {
            stream_timeout(core, session, stream_id, TimerKind::Send)
        });
        let stream = Stream::new(stream_id, session, recv_timer, send_timer);
        stream.start_recv_timer(self.timers);
        if let Err(e) = self.streams.insert(stream) {
            self.timers.remove(recv_timer);
            self.timers.remove(send_timer);
            return Err(e);
        }
        Ok(())
    }

    fn stream_frame_received(&mut self, frame: &FrameHeader) -> Result<()> {
        let Some(stream) = self.streams.get_mut(frame.stream_id) else {
            return Ok(());
        };
        if frame.is_end_stream() {
            stream.stop_recv_timer(self.timers);
            stream.set_half_closed();
            debug!("[{}] prepare response for stream {}", self.session, frame.stream_id);
            self.bus.broadcast(Event::StreamReady {
                session: self.session,
                stream_id: frame.stream_id,
            })?;
        } else {
            stream.extend_recv_timer(self.timers);
        }
        Ok(())
    }
}

impl EngineCallbacks for Callbacks<'_> {
    fn on_begin_headers(&mut self, stream_id: u32, category: HeadersCategory) {
        debug!("[{}] begin headers for stream {} ({:?})", self.session, stream_id, category);
        if category != HeadersCategory::Request {
            return;
        }
        if let Err(e) = self.open_stream(stream_id) {
            self.fail(e);
        }
    }

    fn on_header(&mut self, stream_id: u32, header: &H2Header) {
        trace!("[{}] header for stream {}: {:?}={:?}", self.session, stream_id, header.name, header.value);
        if let Some(stream) = self.streams.get_mut(stream_id) {
            stream.push_header(header.clone());
        }
    }

    fn on_frame_recv(&mut self, frame: &FrameHeader) {
        trace!("[{}] receive frame type {} for stream {}", self.session, frame.frame_type, frame.stream_id);
        match frame.frame_type {
            frame_type::DATA | frame_type::HEADERS => {
                if let Err(e) = self.stream_frame_received(frame) {
                    self.fail(e);
                }
            }
            frame_type::SETTINGS if frame.is_ack() => {
                debug!("[{}] stop settings timer", self.session);
                self.timers.stop(self.settings_timer);
            }
            _ => {}
        }
    }

    fn on_data_chunk_recv(&mut self, stream_id: u32, data: &[u8]) {
        trace!("[{}] receive {} bytes of data for stream {}", self.session, data.len(), stream_id);
        if let Some(stream) = self.streams.get_mut(stream_id) {
            stream.add_received(data.len());
        }
    }

    fn on_frame_send(&mut self, frame: &FrameHeader, windows: FlowWindows) {
        trace!("[{}] sent frame type {} for stream {}", self.session, frame.frame_type, frame.stream_id);
        let Some(stream) = self.streams.get(frame.stream_id) else {
            return;
        };
        if frame.is_end_stream() {
            stream.stop_send_timer(self.timers);
        } else if windows.is_blocked() {
            debug!("[{}] stream {} blocked by flow control", self.session, frame.stream_id);
            stream.extend_recv_timer_if_pending(self.timers);
            stream.extend_send_timer(self.timers);
        } else {
            stream.stop_send_timer(self.timers);
        }
    }

    fn on_stream_close(&mut self, stream_id: u32, error_code: u32) {
        debug!("[{}] close stream {} (error {})", self.session, stream_id, error_code);
        match self.streams.remove(stream_id) {
            Some(stream) => stream.release(self.timers),
            None => self.fail(Error::invariant(format!(
                "[{}] engine closed unknown stream {}",
                self.session, stream_id
            ))),
        }
    }
}
