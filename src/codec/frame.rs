//! HTTP/2 frame layer: header parsing, inbound frame splitting and outbound frame builders.
//!
//! The [`FrameParser`] turns a byte stream into whole frames. It buffers partial frames,
//! validates the client connection preface when running on the server side, and assembles
//! HEADERS + CONTINUATION sequences into a single header block.
//!
//! Reference: RFC 7540 (HTTP/2)

use super::CodecError;

/// HTTP/2 frame types (RFC 7540 Section 6)
#[allow(dead_code)]
pub mod frame_type {
    pub const DATA: u8 = 0x0;
    pub const HEADERS: u8 = 0x1;
    pub const PRIORITY: u8 = 0x2;
    pub const RST_STREAM: u8 = 0x3;
    pub const SETTINGS: u8 = 0x4;
    pub const PUSH_PROMISE: u8 = 0x5;
    pub const PING: u8 = 0x6;
    pub const GOAWAY: u8 = 0x7;
    pub const WINDOW_UPDATE: u8 = 0x8;
    pub const CONTINUATION: u8 = 0x9;
}

/// HTTP/2 frame flags
#[allow(dead_code)]
pub mod flags {
    pub const END_STREAM: u8 = 0x1;
    pub const ACK: u8 = 0x1;
    pub const END_HEADERS: u8 = 0x4;
    pub const PADDED: u8 = 0x8;
    pub const PRIORITY: u8 = 0x20;
}

/// HTTP/2 SETTINGS identifiers (RFC 7540 Section 6.5.2)
#[allow(dead_code)]
pub mod settings_id {
    pub const HEADER_TABLE_SIZE: u16 = 0x1;
    pub const ENABLE_PUSH: u16 = 0x2;
    pub const MAX_CONCURRENT_STREAMS: u16 = 0x3;
    pub const INITIAL_WINDOW_SIZE: u16 = 0x4;
    pub const MAX_FRAME_SIZE: u16 = 0x5;
    pub const MAX_HEADER_LIST_SIZE: u16 = 0x6;
}

/// HTTP/2 error codes (RFC 7540 Section 7)
#[allow(dead_code)]
pub mod error_code {
    pub const NO_ERROR: u32 = 0x0;
    pub const PROTOCOL_ERROR: u32 = 0x1;
    pub const INTERNAL_ERROR: u32 = 0x2;
    pub const FLOW_CONTROL_ERROR: u32 = 0x3;
    pub const SETTINGS_TIMEOUT: u32 = 0x4;
    pub const STREAM_CLOSED: u32 = 0x5;
    pub const FRAME_SIZE_ERROR: u32 = 0x6;
    pub const REFUSED_STREAM: u32 = 0x7;
    pub const CANCEL: u32 = 0x8;
    pub const COMPRESSION_ERROR: u32 = 0x9;
    pub const CONNECT_ERROR: u32 = 0xa;
    pub const ENHANCE_YOUR_CALM: u32 = 0xb;
    pub const INADEQUATE_SECURITY: u32 = 0xc;
    pub const HTTP_1_1_REQUIRED: u32 = 0xd;
}

/// Size of the fixed frame header.
pub const FRAME_HEADER_SIZE: usize = 9;

/// Default SETTINGS_MAX_FRAME_SIZE.
pub const DEFAULT_MAX_FRAME_SIZE: u32 = 16_384;

/// Largest frame payload we accept from a peer. We never advertise a larger
/// SETTINGS_MAX_FRAME_SIZE, so anything above is a FRAME_SIZE_ERROR.
pub const MAX_INBOUND_FRAME_SIZE: u32 = DEFAULT_MAX_FRAME_SIZE;

/// Maximum accumulated header block size (256 KB).
/// Prevents unbounded memory growth from malicious/buggy CONTINUATION floods.
pub const MAX_HEADER_BLOCK_SIZE: usize = 256 * 1024;

/// The HTTP/2 connection preface (24 bytes)
pub const CONNECTION_PREFACE: &[u8] = b"PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n";

/// A parsed HTTP/2 frame header (9 bytes)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub length: u32,      // 24 bits
    pub frame_type: u8,
    pub flags: u8,
    pub stream_id: u32,   // 31 bits (high bit reserved)
}

impl FrameHeader {
    pub fn new(length: u32, frame_type: u8, flags: u8, stream_id: u32) -> Self {
        Self {
            length,
            frame_type,
            flags,
            stream_id: stream_id & 0x7FFF_FFFF,
        }
    }

    /// Parse a 9-byte frame header
    pub fn parse(data: &[u8]) -> Option<Self> {
        if data.len() < FRAME_HEADER_SIZE {
            return None;
        }

        let length = ((data[0] as u32) << 16) | ((data[1] as u32) << 8) | (data[2] as u32);
        let stream_id = u32::from_be_bytes([data[5], data[6], data[7], data[8]]);
        Some(Self::new(length, data[3], data[4], stream_id))
    }

    /// Serialize into the 9-byte wire representation.
    pub fn encode(&self) -> [u8; FRAME_HEADER_SIZE] {
        let len = self.length.to_be_bytes();
        let sid = (self.stream_id & 0x7FFF_FFFF).to_be_bytes();
        [
            len[1], len[2], len[3],
            self.frame_type,
            self.flags,
            sid[0], sid[1], sid[2], sid[3],
        ]
    }

    /// Total frame size including header
    pub fn total_size(&self) -> usize {
        FRAME_HEADER_SIZE + self.length as usize
    }

    pub fn is_end_stream(&self) -> bool {
        self.flags & flags::END_STREAM != 0
    }

    pub fn is_end_headers(&self) -> bool {
        self.flags & flags::END_HEADERS != 0
    }

    /// ACK shares its bit with END_STREAM; only meaningful for SETTINGS and PING.
    pub fn is_ack(&self) -> bool {
        self.flags & flags::ACK != 0
    }
}

/// Decoded frame body. HEADERS carries the complete (CONTINUATION-assembled) block.
#[derive(Debug, Clone, PartialEq)]
pub enum FrameKind {
    Headers {
        header_block: Vec<u8>,
        end_stream: bool,
    },
    Data {
        data: Vec<u8>,
        end_stream: bool,
        /// Bytes counted against flow control, padding included.
        flow_len: u32,
    },
    RstStream {
        error_code: u32,
    },
    GoAway {
        last_stream_id: u32,
        error_code: u32,
    },
    Settings {
        ack: bool,
        /// (identifier, value) pairs. Empty for ACK frames.
        settings: Vec<(u16, u32)>,
    },
    WindowUpdate {
        increment: u32,
    },
    Ping {
        ack: bool,
        data: [u8; 8],
    },
}

/// One inbound frame as seen by the engine.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub header: FrameHeader,
    pub kind: FrameKind,
}

/// Splits an inbound byte stream into frames.
#[derive(Debug, Default)]
pub struct FrameParser {
    /// Buffer for incomplete frames
    buffer: Vec<u8>,
    /// Whether the client connection preface must precede the first frame
    expect_preface: bool,
    preface_received: bool,
    /// Stream ID with pending header block (waiting for CONTINUATION + END_HEADERS)
    pending_headers_stream: Option<u32>,
    /// END_STREAM flag from the HEADERS frame that started the pending header block
    pending_headers_end_stream: bool,
    /// Accumulated header block data across HEADERS + CONTINUATION frames
    pending_header_block: Vec<u8>,
}

impl FrameParser {
    /// Parser for the client side of a connection: no preface is expected.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parser for the server side: the first 24 bytes must be the client preface.
    pub fn server() -> Self {
        Self {
            expect_preface: true,
            ..Self::default()
        }
    }

    pub fn preface_received(&self) -> bool {
        !self.expect_preface || self.preface_received
    }

    /// Number of buffered bytes that do not yet form a whole frame.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Feed raw bytes and return every frame completed by them.
    pub fn feed(&mut self, data: &[u8]) -> Result<Vec<Frame>, CodecError> {
        self.buffer.extend_from_slice(data);
        let mut frames = Vec::new();

        if !self.preface_received() {
            let n = self.buffer.len().min(CONNECTION_PREFACE.len());
            if self.buffer[..n] != CONNECTION_PREFACE[..n] {
                return Err(CodecError::BadPreface);
            }
            if n < CONNECTION_PREFACE.len() {
                return Ok(frames);
            }
            self.buffer.drain(..CONNECTION_PREFACE.len());
            self.preface_received = true;
        }

        loop {
            let header = match FrameHeader::parse(&self.buffer) {
                Some(h) => h,
                None => break,
            };
            if header.length > MAX_INBOUND_FRAME_SIZE {
                return Err(CodecError::FrameSize(header.length));
            }

            let total_size = header.total_size();
            if self.buffer.len() < total_size {
                break;
            }

            // After split_off(total_size), self.buffer keeps [0..total_size] and the
            // remainder becomes the new buffer.
            let remainder = self.buffer.split_off(total_size);
            let mut payload = std::mem::replace(&mut self.buffer, remainder);
            payload.drain(..FRAME_HEADER_SIZE);

            if let Some(frame) = self.parse_frame(header, payload)? {
                frames.push(frame);
            }
        }

        Ok(frames)
    }

    fn parse_frame(&mut self, header: FrameHeader, payload: Vec<u8>) -> Result<Option<Frame>, CodecError> {
        if let Some(pending) = self.pending_headers_stream {
            if header.frame_type != frame_type::CONTINUATION {
                return Err(CodecError::Protocol(format!(
                    "expected CONTINUATION for stream {} but got frame type {}",
                    pending, header.frame_type
                )));
            }
        }

        let kind = match header.frame_type {
            frame_type::DATA => {
                let flow_len = header.length;
                let data = extract_data_payload(&header, payload)?;
                FrameKind::Data {
                    data,
                    end_stream: header.is_end_stream(),
                    flow_len,
                }
            }
            frame_type::HEADERS => {
                let header_block = extract_headers_payload(&header, payload)?;
                if !header.is_end_headers() {
                    // Headers span multiple frames - accumulate and wait for CONTINUATION
                    if header_block.len() > MAX_HEADER_BLOCK_SIZE {
                        return Err(CodecError::HeaderBlockTooLarge(header_block.len()));
                    }
                    self.pending_headers_stream = Some(header.stream_id);
                    self.pending_headers_end_stream = header.is_end_stream();
                    self.pending_header_block = header_block;
                    return Ok(None);
                }
                FrameKind::Headers {
                    header_block,
                    end_stream: header.is_end_stream(),
                }
            }
            frame_type::CONTINUATION => {
                let pending_stream = self.pending_headers_stream.ok_or_else(|| {
                    CodecError::Protocol(format!("unexpected CONTINUATION frame for stream {}", header.stream_id))
                })?;
                if pending_stream != header.stream_id {
                    return Err(CodecError::Protocol(format!(
                        "CONTINUATION for stream {} but pending headers on stream {}",
                        header.stream_id, pending_stream
                    )));
                }
                let new_size = self.pending_header_block.len() + payload.len();
                if new_size > MAX_HEADER_BLOCK_SIZE {
                    self.pending_headers_stream = None;
                    self.pending_header_block.clear();
                    return Err(CodecError::HeaderBlockTooLarge(new_size));
                }
                self.pending_header_block.extend_from_slice(&payload);
                if !header.is_end_headers() {
                    return Ok(None);
                }
                let end_stream = std::mem::take(&mut self.pending_headers_end_stream);
                self.pending_headers_stream = None;
                let header_block = std::mem::take(&mut self.pending_header_block);
                let mut frame_flags = flags::END_HEADERS;
                if end_stream {
                    frame_flags |= flags::END_STREAM;
                }
                return Ok(Some(Frame {
                    header: FrameHeader::new(header_block.len() as u32, frame_type::HEADERS, frame_flags, header.stream_id),
                    kind: FrameKind::Headers { header_block, end_stream },
                }));
            }
            frame_type::RST_STREAM => {
                if payload.len() != 4 {
                    return Err(CodecError::FrameSize(header.length));
                }
                FrameKind::RstStream {
                    error_code: u32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]]),
                }
            }
            frame_type::SETTINGS => {
                let ack = header.is_ack();
                if header.stream_id != 0 {
                    return Err(CodecError::Protocol("SETTINGS frame on a stream".to_string()));
                }
                if payload.len() % 6 != 0 || (ack && !payload.is_empty()) {
                    return Err(CodecError::FrameSize(header.length));
                }
                let settings = payload
                    .chunks_exact(6)
                    .map(|entry| {
                        let id = u16::from_be_bytes([entry[0], entry[1]]);
                        let value = u32::from_be_bytes([entry[2], entry[3], entry[4], entry[5]]);
                        (id, value)
                    })
                    .collect();
                FrameKind::Settings { ack, settings }
            }
            frame_type::GOAWAY => {
                if payload.len() < 8 {
                    return Err(CodecError::FrameSize(header.length));
                }
                let last_stream_id = u32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]]) & 0x7FFF_FFFF;
                let error_code = u32::from_be_bytes([payload[4], payload[5], payload[6], payload[7]]);
                FrameKind::GoAway {
                    last_stream_id,
                    error_code,
                }
            }
            frame_type::WINDOW_UPDATE => {
                if payload.len() != 4 {
                    return Err(CodecError::FrameSize(header.length));
                }
                let increment = u32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]]) & 0x7FFF_FFFF;
                if increment == 0 {
                    return Err(CodecError::Protocol("WINDOW_UPDATE with zero increment".to_string()));
                }
                FrameKind::WindowUpdate { increment }
            }
            frame_type::PING => {
                if payload.len() != 8 {
                    return Err(CodecError::FrameSize(header.length));
                }
                let mut data = [0u8; 8];
                data.copy_from_slice(&payload[..8]);
                FrameKind::Ping {
                    ack: header.is_ack(),
                    data,
                }
            }
            // PRIORITY is advisory, clients never send PUSH_PROMISE, unknown types are ignored.
            _ => return Ok(None),
        };

        Ok(Some(Frame { header, kind }))
    }
}

/// Extract DATA payload, handling PADDED flag.
fn extract_data_payload(header: &FrameHeader, mut payload: Vec<u8>) -> Result<Vec<u8>, CodecError> {
    if header.flags & flags::PADDED == 0 {
        return Ok(payload);
    }
    if payload.is_empty() {
        return Err(CodecError::Protocol("PADDED DATA frame with no payload".to_string()));
    }
    let pad_length = payload[0] as usize;
    if pad_length >= payload.len() {
        return Err(CodecError::Protocol("invalid padding length in DATA frame".to_string()));
    }
    payload.truncate(payload.len() - pad_length);
    payload.remove(0);
    Ok(payload)
}

/// Extract HEADERS payload, handling PADDED and PRIORITY flags.
fn extract_headers_payload(header: &FrameHeader, mut payload: Vec<u8>) -> Result<Vec<u8>, CodecError> {
    let mut offset = 0;
    let mut end = payload.len();

    if header.flags & flags::PADDED != 0 {
        if payload.is_empty() {
            return Err(CodecError::Protocol("PADDED HEADERS frame with no payload".to_string()));
        }
        let pad_length = payload[0] as usize;
        offset = 1;
        if pad_length >= payload.len() - offset {
            return Err(CodecError::Protocol("invalid padding length in HEADERS frame".to_string()));
        }
        end = payload.len() - pad_length;
    }

    if header.flags & flags::PRIORITY != 0 {
        if end - offset < 5 {
            return Err(CodecError::Protocol("PRIORITY HEADERS frame with insufficient data".to_string()));
        }
        offset += 5; // stream dependency (4 bytes) + weight (1 byte)
    }

    payload.truncate(end);
    if offset > 0 {
        payload.drain(..offset);
    }
    Ok(payload)
}

fn with_header(length: usize, frame_type: u8, flags: u8, stream_id: u32, payload: &[u8]) -> Vec<u8> {
    let header = FrameHeader::new(length as u32, frame_type, flags, stream_id);
    let mut frame = Vec::with_capacity(FRAME_HEADER_SIZE + payload.len());
    frame.extend_from_slice(&header.encode());
    frame.extend_from_slice(payload);
    frame
}

/// Build a SETTINGS frame carrying the given entries.
pub fn settings(entries: &[(u16, u32)]) -> Vec<u8> {
    let mut payload = Vec::with_capacity(entries.len() * 6);
    for (id, value) in entries {
        payload.extend_from_slice(&id.to_be_bytes());
        payload.extend_from_slice(&value.to_be_bytes());
    }
    with_header(payload.len(), frame_type::SETTINGS, 0, 0, &payload)
}

pub fn settings_ack() -> Vec<u8> {
    with_header(0, frame_type::SETTINGS, flags::ACK, 0, &[])
}

pub fn ping_ack(data: [u8; 8]) -> Vec<u8> {
    with_header(8, frame_type::PING, flags::ACK, 0, &data)
}

pub fn rst_stream(stream_id: u32, error_code: u32) -> Vec<u8> {
    with_header(4, frame_type::RST_STREAM, 0, stream_id, &error_code.to_be_bytes())
}

pub fn goaway(last_stream_id: u32, error_code: u32) -> Vec<u8> {
    let mut payload = [0u8; 8];
    payload[..4].copy_from_slice(&(last_stream_id & 0x7FFF_FFFF).to_be_bytes());
    payload[4..].copy_from_slice(&error_code.to_be_bytes());
    with_header(8, frame_type::GOAWAY, 0, 0, &payload)
}

/// stream_id=0 updates the connection-level window, otherwise stream-level
pub fn window_update(stream_id: u32, increment: u32) -> Vec<u8> {
    let increment = increment & 0x7FFF_FFFF;
    with_header(4, frame_type::WINDOW_UPDATE, 0, stream_id, &increment.to_be_bytes())
}

pub fn headers(stream_id: u32, block: &[u8], end_stream: bool, end_headers: bool) -> Vec<u8> {
    let mut frame_flags = 0;
    if end_stream {
        frame_flags |= flags::END_STREAM;
    }
    if end_headers {
        frame_flags |= flags::END_HEADERS;
    }
    with_header(block.len(), frame_type::HEADERS, frame_flags, stream_id, block)
}

/// end_headers: true if this is the final frame in the header block sequence
pub fn continuation(stream_id: u32, block: &[u8], end_headers: bool) -> Vec<u8> {
    let frame_flags = if end_headers { flags::END_HEADERS } else { 0 };
    with_header(block.len(), frame_type::CONTINUATION, frame_flags, stream_id, block)
}

pub fn data(stream_id: u32, payload: &[u8], end_stream: bool) -> Vec<u8> {
    let frame_flags = if end_stream { flags::END_STREAM } else { 0 };
    with_header(payload.len(), frame_type::DATA, frame_flags, stream_id, payload)
}
