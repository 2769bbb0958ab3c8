//! Error taxonomy for the protocol core (RFC 7540 §7 / spec §7).

use num_derive::{FromPrimitive, ToPrimitive};
use num_traits::FromPrimitive as _;
use thiserror::Error;

/// The 14 error codes a GOAWAY or RST_STREAM frame may carry.
///
/// https://httpwg.org/specs/rfc7540.html#ErrorCodes
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, FromPrimitive, ToPrimitive)]
#[repr(u32)]
pub enum Http2ErrorCode {
    NoError = 0x0,
    ProtocolError = 0x1,
    InternalError = 0x2,
    FlowControlError = 0x3,
    SettingsTimeout = 0x4,
    StreamClosed = 0x5,
    FrameSizeError = 0x6,
    RefusedStream = 0x7,
    Cancel = 0x8,
    CompressionError = 0x9,
    ConnectError = 0xa,
    EnhanceYourCalm = 0xb,
    InadequateSecurity = 0xc,
    Http11Required = 0xd,
}

impl Http2ErrorCode {
    /// Unknown wire values fall back to `InternalError` rather than panicking;
    /// RFC 7540 does not reserve a code for "unrecognized code".
    #[must_use]
    pub fn from_wire(value: u32) -> Self {
        Http2ErrorCode::from_u32(value).unwrap_or(Http2ErrorCode::InternalError)
    }
}

/// Errors surfaced while assembling a frame from a byte stream (spec §4.4).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("frame payload size {size} exceeds negotiated maximum {max}")]
    SizeError { size: u32, max: u32 },
    #[error("malformed frame: {0}")]
    ProtocolError(String),
}

/// Errors from the HPACK codec (spec §4.3); all are connection-fatal
/// `COMPRESSION_ERROR` once surfaced to the protocol handler, except
/// `HeaderListTooLarge`, which only fails the request being built.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HpackError {
    #[error("not enough data to decode a complete representation")]
    NotEnoughData,
    #[error("integer representation exceeds 32 bits")]
    InvalidInteger,
    #[error("huffman decoding failed: {0}")]
    Compression(#[from] crate::huffman::HuffmanError),
    #[error("header field index {0} is out of range")]
    InvalidIndex(u64),
    #[error("zero index in indexed header field representation")]
    ZeroIndex,
    #[error("dynamic table size update received after a header representation")]
    SizeUpdateAfterHeader,
    #[error("dynamic table size update {requested} exceeds advertised maximum {max}")]
    OversizedDynamicTableUpdate { requested: u32, max: u32 },
    #[error("encoded header list size {size} exceeds max_header_list_size {max}")]
    HeaderListTooLarge { size: u32, max: u32 },
    #[error("request header block is malformed: {0}")]
    MalformedRequest(String),
}

impl From<crate::bitstream::StringReadError> for HpackError {
    fn from(err: crate::bitstream::StringReadError) -> Self {
        match err {
            crate::bitstream::StringReadError::NotEnoughData => HpackError::NotEnoughData,
            crate::bitstream::StringReadError::InvalidInteger => HpackError::InvalidInteger,
            crate::bitstream::StringReadError::Compression(e) => HpackError::Compression(e),
        }
    }
}

impl From<crate::bitstream::BitReadError> for HpackError {
    fn from(err: crate::bitstream::BitReadError) -> Self {
        match err {
            crate::bitstream::BitReadError::NotEnoughData => HpackError::NotEnoughData,
            crate::bitstream::BitReadError::InvalidInteger => HpackError::InvalidInteger,
        }
    }
}

/// A connection-level (session-fatal) error: triggers GOAWAY, finishes every
/// active stream, and closes the transport.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("connection error {code:?}: {message}")]
pub struct ConnectionError {
    pub code: Http2ErrorCode,
    pub message: String,
}

impl ConnectionError {
    pub fn new(code: Http2ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl From<HpackError> for ConnectionError {
    fn from(err: HpackError) -> Self {
        ConnectionError::new(Http2ErrorCode::CompressionError, err.to_string())
    }
}

impl From<FrameError> for ConnectionError {
    fn from(err: FrameError) -> Self {
        match err {
            FrameError::SizeError { .. } => {
                ConnectionError::new(Http2ErrorCode::FrameSizeError, err.to_string())
            }
            FrameError::ProtocolError(_) => {
                ConnectionError::new(Http2ErrorCode::ProtocolError, err.to_string())
            }
        }
    }
}

/// A stream-level error: a RST_STREAM carrying `code` is emitted and the
/// stream's carrier is finished with a mapped application error.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("stream error {code:?}: {message}")]
pub struct StreamError {
    pub code: Http2ErrorCode,
    pub message: String,
}

impl StreamError {
    pub fn new(code: Http2ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// The terminal, application-visible error delivered to a stream's response
/// carrier (spec §7: "a single terminal event ... carrying a mapped
/// application error code and a diagnostic string").
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Http2Error {
    #[error(transparent)]
    Connection(#[from] ConnectionError),
    #[error(transparent)]
    Stream(#[from] StreamError),
    /// RFC 7540 §6.8's "graceful shutdown" convention: a GOAWAY with
    /// `NO_ERROR` still fails streams with ids above `last_stream_id`, but
    /// signals the client should simply retry them on a fresh connection.
    #[error("Server stopped accepting new streams on this connection")]
    ContentReSendError,
    #[error("the transport closed before the response completed")]
    TransportClosed,
}
