//! The external collaborator interfaces the protocol core consumes but does
//! not own (spec §1 "External collaborators", §9 "Upload source as lazy
//! sequence"). The connection never resolves hosts, negotiates TLS, or owns
//! a socket; callers hand it bytes and pull bytes from it.

use std::fmt;

/// A byte-oriented, ordered, reliable, full-duplex transport. The protocol
/// handler only ever calls `write`; reading inbound bytes is the caller's
/// job, fed in via `Connection::transport_readable`.
pub trait Transport {
    /// Writes `bytes` to the transport. Implementations should buffer
    /// internally rather than block; the handler never retries a partial
    /// write itself, it assumes the transport accepted everything or will
    /// report failure via `transport_closed`.
    fn write(&mut self, bytes: &[u8]);
}

/// A lazy, optionally-seekable producer of upload body bytes (spec §9
/// "Upload source as lazy sequence"). The handler never blocks waiting for
/// it: `NotReady` parks the owning stream on the suspended queue until the
/// caller signals readiness again by re-driving the connection.
pub enum UploadReadResult {
    /// Up to the requested byte count, plus whether this was the last chunk.
    Data(Vec<u8>, bool),
    NotReady,
    Error(String),
}

pub trait UploadSource: Send {
    /// Pulls at most `max_len` bytes. Must not block.
    fn read_at_most(&mut self, max_len: usize) -> UploadReadResult;
}

/// An in-memory upload source over a fixed byte buffer, useful for tests
/// and for small bodies the caller already has fully materialized.
pub struct BufferUploadSource {
    data: Vec<u8>,
    position: usize,
}

impl BufferUploadSource {
    #[must_use]
    pub fn new(data: Vec<u8>) -> Self {
        Self { data, position: 0 }
    }
}

impl UploadSource for BufferUploadSource {
    fn read_at_most(&mut self, max_len: usize) -> UploadReadResult {
        let remaining = self.data.len() - self.position;
        let take = remaining.min(max_len);
        let chunk = self.data[self.position..self.position + take].to_vec();
        self.position += take;
        UploadReadResult::Data(chunk, self.position == self.data.len())
    }
}

impl fmt::Debug for BufferUploadSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferUploadSource")
            .field("len", &self.data.len())
            .field("position", &self.position)
            .finish()
    }
}

/// An in-memory duplex pair used by the test suite to drive a `Connection`
/// without a real socket: writes land in an outbound `Vec<u8>` the test can
/// inspect, and inbound bytes are queued manually.
#[derive(Debug, Default)]
pub struct RecordingTransport {
    pub written: Vec<u8>,
}

impl Transport for RecordingTransport {
    fn write(&mut self, bytes: &[u8]) {
        self.written.extend_from_slice(bytes);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffer_upload_source_reports_end_of_data() {
        let mut src = BufferUploadSource::new(vec![1, 2, 3, 4, 5]);
        match src.read_at_most(3) {
            UploadReadResult::Data(chunk, eof) => {
                assert_eq!(chunk, vec![1, 2, 3]);
                assert!(!eof);
            }
            _ => panic!("expected data"),
        }
        match src.read_at_most(10) {
            UploadReadResult::Data(chunk, eof) => {
                assert_eq!(chunk, vec![4, 5]);
                assert!(eof);
            }
            _ => panic!("expected data"),
        }
    }

    #[test]
    fn recording_transport_captures_writes() {
        let mut t = RecordingTransport::default();
        t.write(b"hello");
        t.write(b" world");
        assert_eq!(&t.written, b"hello world");
    }
}
