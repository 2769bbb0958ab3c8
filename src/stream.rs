//! Per-stream state machine (spec §3 "Stream", RFC 7540 §5.1).

use bytes::BytesMut;

use crate::error::{Http2ErrorCode, StreamError};
use crate::flow_control::Window;
use crate::frame::StreamId;
use crate::hpack::HeaderField;
use crate::request::{Priority, Request};
use crate::response::ResponseBuilder;
use crate::transport::UploadSource;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Idle,
    Open,
    HalfClosedLocal,
    HalfClosedRemote,
    /// A server-pushed stream reserved via PUSH_PROMISE, not yet claimed.
    ReservedRemote,
    Closed,
}

impl StreamState {
    /// Transition on sending END_STREAM ourselves.
    #[must_use]
    pub fn on_send_end_stream(self) -> Self {
        match self {
            StreamState::Open => StreamState::HalfClosedLocal,
            StreamState::HalfClosedRemote => StreamState::Closed,
            other => other,
        }
    }

    /// Transition on receiving END_STREAM from the peer.
    #[must_use]
    pub fn on_recv_end_stream(self) -> Self {
        match self {
            StreamState::Open => StreamState::HalfClosedRemote,
            StreamState::HalfClosedLocal | StreamState::ReservedRemote => StreamState::Closed,
            other => other,
        }
    }

    /// A promised stream transitions out of `ReservedRemote` the moment its
    /// response HEADERS arrive, independent of END_STREAM.
    #[must_use]
    pub fn on_recv_headers(self) -> Self {
        match self {
            StreamState::ReservedRemote => StreamState::HalfClosedLocal,
            other => other,
        }
    }

    #[must_use]
    pub fn on_reset(self) -> Self {
        StreamState::Closed
    }

    #[must_use]
    pub fn can_receive_headers(self) -> bool {
        matches!(self, StreamState::Open | StreamState::HalfClosedLocal)
    }

    #[must_use]
    pub fn is_closed(self) -> bool {
        matches!(self, StreamState::Closed)
    }
}

/// Accumulates a HEADERS/PUSH_PROMISE block across CONTINUATION frames
/// (spec §4.5 "HEADERS handling (inbound)"). All CONTINUATION frames must
/// share `stream_id`; the connection enforces that before calling `append`.
#[derive(Debug, Default)]
pub struct HeaderBlockAccumulator {
    buf: BytesMut,
    stream_id: Option<StreamId>,
    end_stream: bool,
    is_push_promise: bool,
}

impl HeaderBlockAccumulator {
    pub fn begin(&mut self, stream_id: StreamId, end_stream: bool, is_push_promise: bool) {
        self.buf.clear();
        self.stream_id = Some(stream_id);
        self.end_stream = end_stream;
        self.is_push_promise = is_push_promise;
    }

    pub fn append(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    #[must_use]
    pub fn stream_id(&self) -> Option<StreamId> {
        self.stream_id
    }

    pub fn take(&mut self) -> (StreamId, BytesMut, bool, bool) {
        let stream_id = self.stream_id.take().expect("accumulator was active");
        (
            stream_id,
            std::mem::take(&mut self.buf),
            self.end_stream,
            self.is_push_promise,
        )
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.stream_id.is_some()
    }
}

/// A single multiplexed stream. Owned by the connection's stream map;
/// methods that need connection-wide state (the HPACK contexts, the
/// recycled-id set) take it as a borrowed argument rather than storing a
/// handle back to the connection (spec §9: "no ownership cycle").
pub struct Stream {
    pub id: StreamId,
    pub state: StreamState,
    pub priority: Priority,
    pub send_window: Window,
    pub recv_window: Window,
    pub request: Request,
    pub response: ResponseBuilder,
    pub upload: Option<Box<dyn UploadSource>>,
    pub upload_suspended: bool,
    pub cache_key: Option<String>,
    pub pushed_request_headers: Option<Vec<HeaderField>>,
}

impl Stream {
    #[must_use]
    pub fn new_outbound(
        id: StreamId,
        request: Request,
        upload: Option<Box<dyn UploadSource>>,
        send_window: u32,
        recv_window: u32,
    ) -> Self {
        let state = if upload.is_some() {
            StreamState::Open
        } else {
            StreamState::HalfClosedLocal
        };
        let priority = request.priority;
        Self {
            id,
            state,
            priority,
            send_window: Window::new(send_window),
            recv_window: Window::new(recv_window),
            request,
            response: ResponseBuilder::new(),
            upload,
            upload_suspended: false,
            cache_key: None,
            pushed_request_headers: None,
        }
    }

    #[must_use]
    pub fn new_reserved(
        id: StreamId,
        cache_key: String,
        pushed_headers: Vec<HeaderField>,
        send_window: u32,
        recv_window: u32,
    ) -> Self {
        Self {
            id,
            state: StreamState::ReservedRemote,
            priority: Priority::Normal,
            send_window: Window::new(send_window),
            recv_window: Window::new(recv_window),
            request: Request::placeholder(),
            response: ResponseBuilder::new(),
            upload: None,
            upload_suspended: false,
            cache_key: Some(cache_key),
            pushed_request_headers: Some(pushed_headers),
        }
    }

    /// Moves the stream to `Closed` and returns the mapped stream error for
    /// the caller to emit as a RST_STREAM.
    pub fn reset_locally(&mut self, code: Http2ErrorCode, message: impl Into<String>) -> StreamError {
        self.state = self.state.on_reset();
        StreamError::new(code, message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_stream_with_body_transitions_through_upload() {
        let mut state = StreamState::Open;
        state = state.on_send_end_stream();
        assert_eq!(state, StreamState::HalfClosedLocal);
        state = state.on_recv_end_stream();
        assert_eq!(state, StreamState::Closed);
    }

    #[test]
    fn reserved_remote_moves_to_half_closed_local_on_headers() {
        let mut state = StreamState::ReservedRemote;
        state = state.on_recv_headers();
        assert_eq!(state, StreamState::HalfClosedLocal);
    }

    #[test]
    fn accumulator_round_trips_fragment() {
        let mut acc = HeaderBlockAccumulator::default();
        acc.begin(1, false, false);
        assert_eq!(acc.stream_id(), Some(1));
        acc.append(b"abc");
        let (id, buf, end_stream, is_push) = acc.take();
        assert_eq!(id, 1);
        assert_eq!(&buf[..], b"abc");
        assert!(!end_stream);
        assert!(!is_push);
        assert!(!acc.is_active());
    }
}
