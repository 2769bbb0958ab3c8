//! Binary frame codec (spec §4.4, RFC 7540 §4).
//!
//! Frames are a tagged variant keyed by `FrameType` rather than a class
//! hierarchy (spec §9 "Polymorphic frame payloads"): the reader always
//! returns a plain `Frame { header, payload }`, and callers interpret the
//! payload per type. Padding and priority prefixes are views over that
//! slice, never separate owned structures.

use bitflags::bitflags;
use bytes::{Bytes, BytesMut};
use num_derive::{FromPrimitive, ToPrimitive};
use num_traits::{FromPrimitive as _, ToPrimitive as _};

use crate::error::FrameError;

pub type StreamId = u32;

pub const FRAME_HEADER_LEN: usize = 9;
pub const DEFAULT_MAX_FRAME_SIZE: u32 = 16_384;
pub const MAX_FRAME_SIZE_CEILING: u32 = 16_777_215;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, FromPrimitive, ToPrimitive)]
#[repr(u8)]
pub enum FrameType {
    Data = 0x0,
    Headers = 0x1,
    Priority = 0x2,
    RstStream = 0x3,
    Settings = 0x4,
    PushPromise = 0x5,
    Ping = 0x6,
    GoAway = 0x7,
    WindowUpdate = 0x8,
    Continuation = 0x9,
}

bitflags! {
    /// Flag bits, shared across types per RFC 7540 §6 (the bit means
    /// different things depending on `FrameType`, but never overlaps within
    /// a single frame).
    #[repr(transparent)]
    pub struct Flags: u8 {
        const END_STREAM  = 0x1;
        const ACK         = 0x1;
        const END_HEADERS = 0x4;
        const PADDED      = 0x8;
        const PRIORITY    = 0x20;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub length: u32,
    pub frame_type: Option<FrameType>,
    pub raw_type: u8,
    pub flags: Flags,
    pub stream_id: StreamId,
}

/// A fully-assembled frame: the typed header plus its raw payload bytes.
#[derive(Debug, Clone)]
pub struct Frame {
    pub header: FrameHeader,
    pub payload: Bytes,
}

impl Frame {
    #[must_use]
    pub fn frame_type(&self) -> Option<FrameType> {
        self.header.frame_type
    }

    #[must_use]
    pub fn flags(&self) -> Flags {
        self.header.flags
    }

    #[must_use]
    pub fn stream_id(&self) -> StreamId {
        self.header.stream_id
    }
}

/// Strips the PADDED prefix/suffix from a DATA/HEADERS/PUSH_PROMISE payload,
/// returning the unpadded slice. `prefix_len` is 1 for DATA/HEADERS
/// (Pad Length is a single byte) and also 1 here since PUSH_PROMISE's
/// Promised Stream ID is handled separately by its caller.
pub fn strip_padding(payload: &[u8]) -> Result<&[u8], FrameError> {
    if payload.is_empty() {
        return Ok(payload);
    }
    let pad_len = payload[0] as usize;
    let rest = &payload[1..];
    if pad_len > rest.len() {
        return Err(FrameError::ProtocolError(format!(
            "padding length {pad_len} exceeds remaining payload {}",
            rest.len()
        )));
    }
    Ok(&rest[..rest.len() - pad_len])
}

fn validate_payload_len(frame_type: FrameType, len: usize, flags: Flags) -> Result<(), FrameError> {
    match frame_type {
        FrameType::Settings => {
            if flags.contains(Flags::ACK) {
                if len != 0 {
                    return Err(FrameError::SizeError { size: len as u32, max: 0 });
                }
            } else if len % 6 != 0 {
                return Err(FrameError::ProtocolError(format!(
                    "SETTINGS payload length {len} is not a multiple of 6"
                )));
            }
        }
        FrameType::Priority => {
            if len != 5 {
                return Err(FrameError::ProtocolError(format!(
                    "PRIORITY payload must be 5 bytes, got {len}"
                )));
            }
        }
        FrameType::Ping => {
            if len != 8 {
                return Err(FrameError::ProtocolError(format!(
                    "PING payload must be 8 bytes, got {len}"
                )));
            }
        }
        FrameType::GoAway => {
            if len < 8 {
                return Err(FrameError::ProtocolError(format!(
                    "GOAWAY payload must be at least 8 bytes, got {len}"
                )));
            }
        }
        FrameType::RstStream | FrameType::WindowUpdate => {
            if len != 4 {
                return Err(FrameError::ProtocolError(format!(
                    "{frame_type:?} payload must be 4 bytes, got {len}"
                )));
            }
        }
        FrameType::Headers => {
            if flags.contains(Flags::PRIORITY) && len < 5 {
                return Err(FrameError::ProtocolError(
                    "HEADERS with PRIORITY needs at least 5 payload bytes".into(),
                ));
            }
        }
        FrameType::PushPromise => {
            if len < 4 {
                return Err(FrameError::ProtocolError(
                    "PUSH_PROMISE needs at least 4 payload bytes".into(),
                ));
            }
        }
        FrameType::Data | FrameType::Continuation => {}
    }
    Ok(())
}

#[derive(Debug, Default)]
enum ReadState {
    #[default]
    Header,
    Payload {
        header: FrameHeader,
        buf: BytesMut,
    },
}

/// A resumable frame assembler: partial header and payload reads preserve
/// progress across `push` calls so callers may feed it arbitrarily sized
/// chunks as they arrive from the transport.
#[derive(Debug, Default)]
pub struct FrameReader {
    state: ReadState,
    incoming: BytesMut,
    max_frame_size: u32,
}

impl FrameReader {
    #[must_use]
    pub fn new(max_frame_size: u32) -> Self {
        Self {
            state: ReadState::Header,
            incoming: BytesMut::new(),
            max_frame_size,
        }
    }

    pub fn set_max_frame_size(&mut self, max_frame_size: u32) {
        self.max_frame_size = max_frame_size;
    }

    /// Appends newly-read transport bytes to the internal buffer.
    pub fn feed(&mut self, bytes: &[u8]) {
        self.incoming.extend_from_slice(bytes);
    }

    /// Attempts to assemble one complete frame from buffered bytes.
    /// `Ok(None)` means "not enough data yet, call again after more input".
    pub fn poll(&mut self) -> Result<Option<Frame>, FrameError> {
        loop {
            match &mut self.state {
                ReadState::Header => {
                    if self.incoming.len() < FRAME_HEADER_LEN {
                        return Ok(None);
                    }
                    let raw = self.incoming.split_to(FRAME_HEADER_LEN);
                    let length = u32::from_be_bytes([0, raw[0], raw[1], raw[2]]);
                    let raw_type = raw[3];
                    let flags = Flags::from_bits_truncate(raw[4]);
                    let stream_id =
                        u32::from_be_bytes([raw[5], raw[6], raw[7], raw[8]]) & 0x7fff_ffff;
                    if length > self.max_frame_size {
                        return Err(FrameError::SizeError {
                            size: length,
                            max: self.max_frame_size,
                        });
                    }
                    let frame_type = FrameType::from_u8(raw_type);
                    if let Some(ft) = frame_type {
                        validate_payload_len(ft, length as usize, flags)?;
                    }
                    let header = FrameHeader {
                        length,
                        frame_type,
                        raw_type,
                        flags,
                        stream_id,
                    };
                    self.state = ReadState::Payload {
                        header,
                        buf: BytesMut::with_capacity(length as usize),
                    };
                }
                ReadState::Payload { header, buf } => {
                    let remaining = header.length as usize - buf.len();
                    let take = remaining.min(self.incoming.len());
                    if take > 0 {
                        buf.extend_from_slice(&self.incoming.split_to(take));
                    }
                    if buf.len() < header.length as usize {
                        return Ok(None);
                    }
                    let header = *header;
                    let payload = std::mem::take(buf).freeze();
                    self.state = ReadState::Header;
                    return Ok(Some(Frame { header, payload }));
                }
            }
        }
    }
}

/// Builds outbound frames into a caller-owned growable buffer.
#[derive(Debug, Default)]
pub struct FrameWriter {
    buf: BytesMut,
    payload_start: usize,
}

impl FrameWriter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Resets the buffer and writes a 9-byte placeholder header.
    pub fn start(&mut self, frame_type: FrameType, flags: Flags, stream_id: StreamId) {
        self.buf.clear();
        self.buf.extend_from_slice(&[0u8; FRAME_HEADER_LEN]);
        self.buf[3] = frame_type.to_u8().expect("FrameType fits in u8");
        self.buf[4] = flags.bits();
        self.buf[5..9].copy_from_slice(&(stream_id & 0x7fff_ffff).to_be_bytes());
        self.payload_start = FRAME_HEADER_LEN;
        self.patch_length();
    }

    pub fn append(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
        self.patch_length();
    }

    pub fn append_u8(&mut self, value: u8) {
        self.append(&[value]);
    }

    pub fn append_u16(&mut self, value: u16) {
        self.append(&value.to_be_bytes());
    }

    pub fn append_u32(&mut self, value: u32) {
        self.append(&value.to_be_bytes());
    }

    fn patch_length(&mut self) {
        let length = (self.buf.len() - self.payload_start) as u32;
        self.buf[0..3].copy_from_slice(&length.to_be_bytes()[1..]);
    }

    #[must_use]
    pub fn payload_len(&self) -> usize {
        self.buf.len() - self.payload_start
    }

    /// Hands the assembled frame bytes to the caller as one contiguous
    /// buffer, ready for a single transport write.
    #[must_use]
    pub fn finish(&mut self) -> Bytes {
        Bytes::from(std::mem::take(&mut self.buf).freeze())
    }

    /// Writes a single HEADERS frame if the payload fits `size_limit`,
    /// otherwise splits it into a HEADERS frame followed by one or more
    /// CONTINUATION frames, each bounded by `size_limit`, with END_HEADERS
    /// set only on the last.
    pub fn write_headers(
        stream_id: StreamId,
        mut header_flags: Flags,
        block: &[u8],
        size_limit: usize,
    ) -> Vec<Bytes> {
        let mut out = Vec::new();
        let mut writer = FrameWriter::new();
        if block.len() <= size_limit {
            header_flags.insert(Flags::END_HEADERS);
            writer.start(FrameType::Headers, header_flags, stream_id);
            writer.append(block);
            out.push(writer.finish());
            return out;
        }

        header_flags.remove(Flags::END_HEADERS);
        let (first, mut rest) = block.split_at(size_limit);
        writer.start(FrameType::Headers, header_flags, stream_id);
        writer.append(first);
        out.push(writer.finish());

        while !rest.is_empty() {
            let chunk_len = rest.len().min(size_limit);
            let (chunk, remainder) = rest.split_at(chunk_len);
            let flags = if remainder.is_empty() {
                Flags::END_HEADERS
            } else {
                Flags::empty()
            };
            writer.start(FrameType::Continuation, flags, stream_id);
            writer.append(chunk);
            out.push(writer.finish());
            rest = remainder;
        }
        out
    }

    /// Splits `data` into DATA frames of at most `size_limit` bytes each,
    /// none of them flagged END_STREAM (the caller sends a trailing empty
    /// END_STREAM frame separately once the upload source is exhausted).
    pub fn write_data_chunks(stream_id: StreamId, data: &[u8], size_limit: usize) -> Vec<Bytes> {
        if data.is_empty() {
            return Vec::new();
        }
        let mut out = Vec::new();
        let mut writer = FrameWriter::new();
        for chunk in data.chunks(size_limit.max(1)) {
            writer.start(FrameType::Data, Flags::empty(), stream_id);
            writer.append(chunk);
            out.push(writer.finish());
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_then_read_round_trips() {
        let mut writer = FrameWriter::new();
        writer.start(FrameType::Ping, Flags::empty(), 0);
        writer.append(b"12345678");
        let bytes = writer.finish();

        let mut reader = FrameReader::new(DEFAULT_MAX_FRAME_SIZE);
        reader.feed(&bytes);
        let frame = reader.poll().unwrap().unwrap();
        assert_eq!(frame.frame_type(), Some(FrameType::Ping));
        assert_eq!(frame.stream_id(), 0);
        assert_eq!(&frame.payload[..], b"12345678");
    }

    #[test]
    fn partial_header_then_partial_payload_resumes() {
        let mut writer = FrameWriter::new();
        writer.start(FrameType::Data, Flags::END_STREAM, 1);
        writer.append(b"hello world");
        let bytes = writer.finish();

        let mut reader = FrameReader::new(DEFAULT_MAX_FRAME_SIZE);
        reader.feed(&bytes[..4]);
        assert!(reader.poll().unwrap().is_none());
        reader.feed(&bytes[4..12]);
        assert!(reader.poll().unwrap().is_none());
        reader.feed(&bytes[12..]);
        let frame = reader.poll().unwrap().unwrap();
        assert_eq!(&frame.payload[..], b"hello world");
    }

    #[test]
    fn oversized_payload_is_a_size_error() {
        let mut reader = FrameReader::new(16);
        let mut header = vec![0u8, 0, 20, FrameType::Data.to_u8().unwrap(), 0, 0, 0, 0, 1];
        header.extend(std::iter::repeat(0).take(20));
        reader.feed(&header);
        assert!(matches!(reader.poll(), Err(FrameError::SizeError { .. })));
    }

    #[test]
    fn settings_ack_must_be_empty() {
        let mut reader = FrameReader::new(DEFAULT_MAX_FRAME_SIZE);
        let mut bytes = vec![0u8, 0, 6, FrameType::Settings.to_u8().unwrap(), 0x1, 0, 0, 0, 0];
        bytes.extend(std::iter::repeat(0).take(6));
        reader.feed(&bytes);
        assert!(matches!(reader.poll(), Err(FrameError::SizeError { .. })));
    }

    #[test]
    fn headers_exactly_at_limit_needs_no_continuation() {
        let block = vec![0xffu8; 16];
        let frames = FrameWriter::write_headers(1, Flags::END_STREAM, &block, 16);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0][4] & Flags::END_HEADERS.bits(), Flags::END_HEADERS.bits());
    }

    #[test]
    fn headers_over_limit_continues() {
        let block = vec![0xffu8; 20];
        let frames = FrameWriter::write_headers(1, Flags::END_STREAM, &block, 16);
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0][3], FrameType::Headers.to_u8().unwrap());
        assert_eq!(frames[1][3], FrameType::Continuation.to_u8().unwrap());
        assert_eq!(frames[0][4] & Flags::END_HEADERS.bits(), 0);
        assert_eq!(frames[1][4] & Flags::END_HEADERS.bits(), Flags::END_HEADERS.bits());
    }

    #[test]
    fn padded_data_frame_with_full_padding_carries_zero_bytes() {
        // payloadSize - 1 padding bytes: pad_len byte + (payloadSize-1) pad
        // bytes, zero real data bytes.
        let payload = [4u8, 0, 0, 0, 0];
        assert_eq!(strip_padding(&payload).unwrap(), &[] as &[u8]);
    }

    #[test]
    fn unknown_frame_type_is_not_an_error() {
        let mut bytes = vec![0u8, 0, 3, 0x42, 0, 0, 0, 0, 1];
        bytes.extend_from_slice(b"abc");
        let mut reader = FrameReader::new(DEFAULT_MAX_FRAME_SIZE);
        reader.feed(&bytes);
        let frame = reader.poll().unwrap().unwrap();
        assert_eq!(frame.frame_type(), None);
        assert_eq!(frame.header.raw_type, 0x42);
    }
}
