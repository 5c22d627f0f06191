//! Server-side HTTP/2 stream multiplexing engine.
//!
//! The engine owns everything that is wire-level: frame splitting, HPACK state, stream
//! lifecycle as seen by the protocol, SETTINGS/PING acknowledgement and flow-control
//! accounting. Everything that is policy (timers, application hand-off, shutdown) belongs
//! to the caller, which observes the engine through [`EngineCallbacks`].

use std::collections::{BTreeMap, VecDeque};

use log::{debug, trace};

use super::frame::{self, error_code, frame_type, settings_id, Frame, FrameHeader, FrameKind, FrameParser};
use super::hpack::{H2Header, HpackDecoder, HpackEncoder};
use super::CodecError;

const DEFAULT_WINDOW_SIZE: i64 = 65_535;
const MAX_WINDOW_SIZE: i64 = 0x7FFF_FFFF;
const MAX_ALLOWED_FRAME_SIZE: u32 = 0x00FF_FFFF;

/// Which kind of header block a `begin headers` notification opens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeadersCategory {
    /// First HEADERS on a new client-initiated stream.
    Request,
    /// A second header block on an open stream.
    Trailers,
}

/// The peer's receive windows, i.e. how much DATA may still be sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlowWindows {
    pub stream: i64,
    pub connection: i64,
}

impl FlowWindows {
    pub fn is_blocked(&self) -> bool {
        self.stream <= 0 || self.connection <= 0
    }
}

/// Callback table invoked synchronously from [`H2Engine::mem_recv`] and [`H2Engine::send`].
///
/// All methods default to no-ops so implementors only hook what they need.
pub trait EngineCallbacks {
    fn on_begin_headers(&mut self, _stream_id: u32, _category: HeadersCategory) {}

    fn on_header(&mut self, _stream_id: u32, _header: &H2Header) {}

    /// A complete inbound frame was processed. HEADERS are reported once per header block.
    fn on_frame_recv(&mut self, _frame: &FrameHeader) {}

    fn on_data_chunk_recv(&mut self, _stream_id: u32, _data: &[u8]) {}

    /// The last byte of an outbound frame was handed to the caller.
    fn on_frame_send(&mut self, _frame: &FrameHeader, _windows: FlowWindows) {}

    fn on_stream_close(&mut self, _stream_id: u32, _error_code: u32) {}
}

/// Local settings advertised and enforced by the engine.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub max_concurrent_streams: u32,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            max_concurrent_streams: 100,
        }
    }
}

#[derive(Debug)]
struct EngineStream {
    remote_closed: bool,
    local_closed: bool,
    response_submitted: bool,
    reset: bool,
    /// May go negative after the peer shrinks SETTINGS_INITIAL_WINDOW_SIZE.
    send_window: i64,
    body: Vec<u8>,
    body_offset: usize,
}

impl EngineStream {
    fn new(send_window: i64) -> Self {
        Self {
            remote_closed: false,
            local_closed: false,
            response_submitted: false,
            reset: false,
            send_window,
            body: Vec::new(),
            body_offset: 0,
        }
    }

    fn body_pending(&self) -> bool {
        self.body_offset < self.body.len()
    }
}

/// What happens to the stream once a frame has been fully sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SendEffect {
    None,
    EndStream,
    Reset(u32),
}

#[derive(Debug)]
struct OutFrame {
    header: FrameHeader,
    bytes: Vec<u8>,
    written: usize,
    effect: SendEffect,
}

/// HTTP/2 server session engine.
#[derive(Debug)]
pub struct H2Engine {
    parser: FrameParser,
    decoder: HpackDecoder,
    encoder: HpackEncoder,
    settings: EngineSettings,
    streams: BTreeMap<u32, EngineStream>,
    outbound: VecDeque<OutFrame>,
    current: Option<OutFrame>,
    /// Connection-level window granted by the peer.
    send_window: i64,
    peer_initial_window: i64,
    peer_max_frame_size: u32,
    last_stream_id: u32,
    goaway_sent: bool,
    goaway_received: bool,
    failed: bool,
}

impl Default for H2Engine {
    fn default() -> Self {
        Self::new(EngineSettings::default())
    }
}

impl H2Engine {
    pub fn new(settings: EngineSettings) -> Self {
        Self {
            parser: FrameParser::server(),
            decoder: HpackDecoder::new(),
            encoder: HpackEncoder::new(),
            settings,
            streams: BTreeMap::new(),
            outbound: VecDeque::new(),
            current: None,
            send_window: DEFAULT_WINDOW_SIZE,
            peer_initial_window: DEFAULT_WINDOW_SIZE,
            peer_max_frame_size: frame::DEFAULT_MAX_FRAME_SIZE,
            last_stream_id: 0,
            goaway_sent: false,
            goaway_received: false,
            failed: false,
        }
    }

    /// Feed inbound bytes. All bytes are always consumed; incomplete frames are buffered.
    ///
    /// After an error the engine is poisoned and silently discards further input: the
    /// caller is expected to terminate the session.
    pub fn mem_recv(&mut self, data: &[u8], cb: &mut dyn EngineCallbacks) -> Result<usize, CodecError> {
        if self.failed {
            return Ok(data.len());
        }
        let result = self.process(data, cb);
        if result.is_err() {
            self.failed = true;
        }
        result.map(|()| data.len())
    }

    fn process(&mut self, data: &[u8], cb: &mut dyn EngineCallbacks) -> Result<(), CodecError> {
        for frame in self.parser.feed(data)? {
            self.on_frame(frame, cb)?;
        }
        Ok(())
    }

    fn on_frame(&mut self, frame: Frame, cb: &mut dyn EngineCallbacks) -> Result<(), CodecError> {
        let header = frame.header;
        let stream_id = header.stream_id;
        trace!("recv frame type={} flags={:#x} stream={}", header.frame_type, header.flags, stream_id);

        match frame.kind {
            FrameKind::Headers { header_block, end_stream } => {
                self.recv_headers(&header, &header_block, end_stream, cb)?;
            }
            FrameKind::Data { data, end_stream, flow_len } => {
                self.recv_data(&header, &data, end_stream, flow_len, cb)?;
            }
            FrameKind::RstStream { error_code } => {
                if stream_id == 0 {
                    return Err(CodecError::Protocol("RST_STREAM on stream 0".to_string()));
                }
                if self.streams.remove(&stream_id).is_some() {
                    cb.on_frame_recv(&header);
                    cb.on_stream_close(stream_id, error_code);
                }
            }
            FrameKind::Settings { ack, settings } => {
                if !ack {
                    self.apply_settings(&settings)?;
                    self.queue(frame::settings_ack(), SendEffect::None);
                }
                cb.on_frame_recv(&header);
            }
            FrameKind::Ping { ack, data } => {
                if stream_id != 0 {
                    return Err(CodecError::Protocol("PING on a stream".to_string()));
                }
                if !ack {
                    self.queue(frame::ping_ack(data), SendEffect::None);
                }
                cb.on_frame_recv(&header);
            }
            FrameKind::GoAway { last_stream_id, error_code } => {
                debug!("peer sent GOAWAY last_stream={} error={}", last_stream_id, error_code);
                self.goaway_received = true;
                cb.on_frame_recv(&header);
            }
            FrameKind::WindowUpdate { increment } => {
                self.recv_window_update(stream_id, increment)?;
                cb.on_frame_recv(&header);
            }
        }
        Ok(())
    }

    fn recv_headers(
        &mut self,
        header: &FrameHeader,
        block: &[u8],
        end_stream: bool,
        cb: &mut dyn EngineCallbacks,
    ) -> Result<(), CodecError> {
        let stream_id = header.stream_id;
        if stream_id == 0 || stream_id % 2 == 0 {
            return Err(CodecError::Protocol(format!("HEADERS on invalid stream {}", stream_id)));
        }

        // Decode unconditionally: the dynamic table must stay in sync even for
        // blocks we end up ignoring.
        let headers = self.decoder.decode(block)?;

        let existing = self.streams.get(&stream_id).map(|s| (s.reset, s.remote_closed));
        let category = match existing {
            Some((true, _)) => return Ok(()),
            Some((false, true)) => {
                self.reset_stream(stream_id, error_code::STREAM_CLOSED);
                return Ok(());
            }
            Some((false, false)) => HeadersCategory::Trailers,
            None => {
                if stream_id <= self.last_stream_id {
                    return Err(CodecError::Protocol(format!("HEADERS on closed stream {}", stream_id)));
                }
                self.last_stream_id = stream_id;
                if self.goaway_sent {
                    debug!("ignore stream {} opened after GOAWAY", stream_id);
                    return Ok(());
                }
                if self.streams.len() >= self.settings.max_concurrent_streams as usize {
                    debug!("refuse stream {}: too many concurrent streams", stream_id);
                    self.queue(frame::rst_stream(stream_id, error_code::REFUSED_STREAM), SendEffect::None);
                    return Ok(());
                }
                self.streams.insert(stream_id, EngineStream::new(self.peer_initial_window));
                HeadersCategory::Request
            }
        };

        cb.on_begin_headers(stream_id, category);
        for h in &headers {
            cb.on_header(stream_id, h);
        }
        cb.on_frame_recv(header);
        if end_stream {
            self.close_remote(stream_id, cb);
        }
        Ok(())
    }

    fn recv_data(
        &mut self,
        header: &FrameHeader,
        data: &[u8],
        end_stream: bool,
        flow_len: u32,
        cb: &mut dyn EngineCallbacks,
    ) -> Result<(), CodecError> {
        let stream_id = header.stream_id;
        if stream_id == 0 {
            return Err(CodecError::Protocol("DATA on stream 0".to_string()));
        }

        // Hand the whole frame's credit straight back; the application never lags behind.
        if flow_len > 0 {
            self.queue(frame::window_update(0, flow_len), SendEffect::None);
        }

        let (remote_closed, reset) = match self.streams.get(&stream_id) {
            Some(stream) => (stream.remote_closed, stream.reset),
            None if stream_id > self.last_stream_id => {
                return Err(CodecError::Protocol(format!("DATA on idle stream {}", stream_id)));
            }
            None => return Ok(()),
        };
        if reset {
            return Ok(());
        }
        if remote_closed {
            self.reset_stream(stream_id, error_code::STREAM_CLOSED);
            return Ok(());
        }

        if !end_stream && flow_len > 0 {
            self.queue(frame::window_update(stream_id, flow_len), SendEffect::None);
        }
        if !data.is_empty() {
            cb.on_data_chunk_recv(stream_id, data);
        }
        cb.on_frame_recv(header);
        if end_stream {
            self.close_remote(stream_id, cb);
        }
        Ok(())
    }

    fn recv_window_update(&mut self, stream_id: u32, increment: u32) -> Result<(), CodecError> {
        let increment = increment as i64;
        if stream_id == 0 {
            self.send_window += increment;
            if self.send_window > MAX_WINDOW_SIZE {
                return Err(CodecError::FlowControl(0));
            }
            return Ok(());
        }
        let overflow = match self.streams.get_mut(&stream_id) {
            Some(stream) => {
                stream.send_window += increment;
                stream.send_window > MAX_WINDOW_SIZE
            }
            None => false,
        };
        if overflow {
            self.reset_stream(stream_id, error_code::FLOW_CONTROL_ERROR);
        }
        Ok(())
    }

    fn apply_settings(&mut self, settings: &[(u16, u32)]) -> Result<(), CodecError> {
        for &(id, value) in settings {
            match id {
                settings_id::INITIAL_WINDOW_SIZE => {
                    let value = value as i64;
                    if value > MAX_WINDOW_SIZE {
                        return Err(CodecError::FlowControl(0));
                    }
                    let delta = value - self.peer_initial_window;
                    for stream in self.streams.values_mut() {
                        stream.send_window += delta;
                    }
                    self.peer_initial_window = value;
                }
                settings_id::MAX_FRAME_SIZE => {
                    if !(frame::DEFAULT_MAX_FRAME_SIZE..=MAX_ALLOWED_FRAME_SIZE).contains(&value) {
                        return Err(CodecError::Protocol(format!("invalid SETTINGS_MAX_FRAME_SIZE {}", value)));
                    }
                    self.peer_max_frame_size = value;
                }
                settings_id::ENABLE_PUSH if value > 1 => {
                    return Err(CodecError::Protocol(format!("invalid SETTINGS_ENABLE_PUSH {}", value)));
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn close_remote(&mut self, stream_id: u32, cb: &mut dyn EngineCallbacks) {
        let closed = match self.streams.get_mut(&stream_id) {
            Some(stream) => {
                stream.remote_closed = true;
                stream.local_closed
            }
            None => false,
        };
        if closed {
            self.streams.remove(&stream_id);
            cb.on_stream_close(stream_id, error_code::NO_ERROR);
        }
    }

    fn queue(&mut self, bytes: Vec<u8>, effect: SendEffect) {
        if let Some(header) = FrameHeader::parse(&bytes) {
            self.outbound.push_back(OutFrame {
                header,
                bytes,
                written: 0,
                effect,
            });
        }
    }

    /// Queue a SETTINGS frame announcing the given entries.
    pub fn submit_settings(&mut self, entries: &[(u16, u32)]) {
        self.queue(frame::settings(entries), SendEffect::None);
    }

    /// Queue a response on an open stream. An empty or missing body ends the stream on
    /// the HEADERS frame; otherwise the body goes out as DATA within the flow-control
    /// windows.
    pub fn submit_response(
        &mut self,
        stream_id: u32,
        headers: &[H2Header],
        body: Option<Vec<u8>>,
    ) -> Result<(), CodecError> {
        let stream = match self.streams.get_mut(&stream_id) {
            Some(stream) if !stream.local_closed && !stream.response_submitted && !stream.reset => stream,
            _ => return Err(CodecError::StreamNotOpen(stream_id)),
        };
        stream.response_submitted = true;
        let body = body.unwrap_or_default();
        let end_stream = body.is_empty();
        stream.body = body;
        stream.body_offset = 0;

        let block = self.encoder.encode(headers);
        self.queue_header_block(stream_id, &block, end_stream);
        Ok(())
    }

    fn queue_header_block(&mut self, stream_id: u32, block: &[u8], end_stream: bool) {
        let max = self.peer_max_frame_size as usize;
        let pieces: Vec<&[u8]> = if block.is_empty() {
            vec![block]
        } else {
            block.chunks(max).collect()
        };
        let last = pieces.len() - 1;
        for (i, piece) in pieces.into_iter().enumerate() {
            let end_headers = i == last;
            let effect = if end_headers && end_stream {
                SendEffect::EndStream
            } else {
                SendEffect::None
            };
            let bytes = if i == 0 {
                frame::headers(stream_id, piece, end_stream, end_headers)
            } else {
                frame::continuation(stream_id, piece, end_headers)
            };
            self.queue(bytes, effect);
        }
    }

    /// Queue RST_STREAM for an open stream. The stream closes once the frame is sent.
    pub fn reset_stream(&mut self, stream_id: u32, code: u32) -> bool {
        match self.streams.get_mut(&stream_id) {
            Some(stream) if !stream.reset => {
                stream.reset = true;
                stream.body.clear();
                stream.body_offset = 0;
                self.queue(frame::rst_stream(stream_id, code), SendEffect::Reset(code));
                true
            }
            _ => false,
        }
    }

    /// Queue GOAWAY with the given error code. New streams are ignored from now on.
    pub fn terminate_session(&mut self, code: u32) {
        if self.goaway_sent {
            return;
        }
        self.goaway_sent = true;
        self.queue(frame::goaway(self.last_stream_id, code), SendEffect::None);
    }

    pub fn want_read(&self) -> bool {
        if self.failed {
            return false;
        }
        !((self.goaway_sent || self.goaway_received) && self.streams.is_empty())
    }

    pub fn want_write(&self) -> bool {
        self.current.is_some() || !self.outbound.is_empty() || self.has_sendable_data()
    }

    fn has_sendable_data(&self) -> bool {
        self.send_window > 0
            && self
                .streams
                .values()
                .any(|s| s.body_pending() && s.send_window > 0)
    }

    /// Serialize pending output into `out`, returning the number of bytes written.
    ///
    /// Frames are split across calls when `out` is too small; `on_frame_send` fires when
    /// a frame's last byte has been written.
    pub fn send(&mut self, out: &mut [u8], cb: &mut dyn EngineCallbacks) -> usize {
        let mut written = 0;
        while written < out.len() {
            if self.current.is_none() {
                self.current = match self.outbound.pop_front() {
                    Some(frame) => Some(frame),
                    None => self.next_data_frame(),
                };
            }
            let Some(frame) = self.current.as_mut() else {
                break;
            };
            let n = (frame.bytes.len() - frame.written).min(out.len() - written);
            out[written..written + n].copy_from_slice(&frame.bytes[frame.written..frame.written + n]);
            written += n;
            frame.written += n;
            if frame.written < frame.bytes.len() {
                break;
            }
            if let Some(frame) = self.current.take() {
                self.frame_sent(frame, cb);
            }
        }
        written
    }

    fn next_data_frame(&mut self) -> Option<OutFrame> {
        if self.send_window <= 0 {
            return None;
        }
        let max_frame = self.peer_max_frame_size as i64;
        let connection = self.send_window;
        let (&stream_id, stream) = self
            .streams
            .iter_mut()
            .find(|(_, s)| s.body_pending() && s.send_window > 0)?;

        let remaining = (stream.body.len() - stream.body_offset) as i64;
        let len = remaining.min(stream.send_window).min(connection).min(max_frame) as usize;
        let start = stream.body_offset;
        let end_stream = start + len == stream.body.len();
        let bytes = frame::data(stream_id, &stream.body[start..start + len], end_stream);
        stream.body_offset += len;
        stream.send_window -= len as i64;
        if end_stream {
            stream.body = Vec::new();
            stream.body_offset = 0;
        }
        self.send_window -= len as i64;

        let header = FrameHeader::new(len as u32, frame_type::DATA, bytes[4], stream_id);
        Some(OutFrame {
            header,
            bytes,
            written: 0,
            effect: if end_stream { SendEffect::EndStream } else { SendEffect::None },
        })
    }

    fn frame_sent(&mut self, frame: OutFrame, cb: &mut dyn EngineCallbacks) {
        let stream_id = frame.header.stream_id;
        cb.on_frame_send(&frame.header, self.windows(stream_id));

        match frame.effect {
            SendEffect::None => {}
            SendEffect::EndStream => {
                let closed = match self.streams.get_mut(&stream_id) {
                    Some(stream) => {
                        stream.local_closed = true;
                        stream.remote_closed
                    }
                    None => false,
                };
                if closed {
                    self.streams.remove(&stream_id);
                    cb.on_stream_close(stream_id, error_code::NO_ERROR);
                }
            }
            SendEffect::Reset(code) => {
                if self.streams.remove(&stream_id).is_some() {
                    cb.on_stream_close(stream_id, code);
                }
            }
        }
    }

    fn windows(&self, stream_id: u32) -> FlowWindows {
        FlowWindows {
            stream: self.streams.get(&stream_id).map_or(0, |s| s.send_window),
            connection: self.send_window,
        }
    }

    pub fn stream_send_window(&self, stream_id: u32) -> Option<i64> {
        self.streams.get(&stream_id).map(|s| s.send_window)
    }

    pub fn connection_send_window(&self) -> i64 {
        self.send_window
    }

    pub fn is_stream_open(&self, stream_id: u32) -> bool {
        self.streams.contains_key(&stream_id)
    }

    pub fn open_streams(&self) -> usize {
        self.streams.len()
    }

    pub fn last_stream_id(&self) -> u32 {
        self.last_stream_id
    }

    pub fn goaway_sent(&self) -> bool {
        self.goaway_sent
    }
}
