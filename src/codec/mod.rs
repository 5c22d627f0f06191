//! Sans-I/O HTTP/2 server engine.
//!
//! This is the stream-multiplexing collaborator the protocol layer drives. It never
//! touches a socket: inbound bytes are fed with [`H2Engine::mem_recv`], outbound bytes are
//! pulled with [`H2Engine::send`] into whatever region the caller provides (normally the
//! session's send buffer view), and protocol events are reported through the
//! [`EngineCallbacks`] table.

pub mod engine;
pub mod frame;
pub mod hpack;

use thiserror::Error;

pub use engine::{EngineCallbacks, EngineSettings, FlowWindows, H2Engine, HeadersCategory};
pub use frame::{
    error_code, flags, frame_type, settings_id, Frame, FrameHeader, FrameKind, FrameParser,
    CONNECTION_PREFACE, FRAME_HEADER_SIZE, MAX_HEADER_BLOCK_SIZE,
};
pub use hpack::{H2Header, HpackDecoder, HpackEncoder};

/// Connection-level failures detected while processing peer input or submitting output.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("invalid connection preface")]
    BadPreface,
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("invalid frame size ({0} bytes)")]
    FrameSize(u32),
    #[error("header block too large ({0} bytes, max {max})", max = MAX_HEADER_BLOCK_SIZE)]
    HeaderBlockTooLarge(usize),
    #[error("HPACK decode error: {0}")]
    Compression(String),
    #[error("flow control window overflow on stream {0}")]
    FlowControl(u32),
    #[error("stream {0} is not open")]
    StreamNotOpen(u32),
}

impl CodecError {
    /// The HTTP/2 error code carried by the GOAWAY this failure leads to.
    pub fn error_code(&self) -> u32 {
        match self {
            CodecError::BadPreface | CodecError::Protocol(_) | CodecError::StreamNotOpen(_) => {
                error_code::PROTOCOL_ERROR
            }
            CodecError::FrameSize(_) => error_code::FRAME_SIZE_ERROR,
            CodecError::HeaderBlockTooLarge(_) => error_code::ENHANCE_YOUR_CALM,
            CodecError::Compression(_) => error_code::COMPRESSION_ERROR,
            CodecError::FlowControl(_) => error_code::FLOW_CONTROL_ERROR,
        }
    }
}
