//! The protocol handler: a sans-io state machine driven by an external
//! event loop (spec §4.5 "Protocol handler", §5 "Concurrency & resource
//! model"). It never owns a socket or blocks; callers feed it inbound bytes
//! and poll it for outbound bytes and completed responses.

use std::collections::{HashMap, VecDeque};

use bytes::Bytes;
use log::{debug, error, trace, warn};

use crate::config::Http2Config;
use crate::error::{ConnectionError, Http2Error, Http2ErrorCode, StreamError};
use crate::flow_control::{should_replenish, Window};
use crate::frame::{self, Flags, Frame, FrameReader, FrameType, FrameWriter, StreamId};
use crate::hpack::{Decoder as HpackDecoder, Encoder as HpackEncoder, HeaderField};
use crate::recycled::RecycledStreamIds;
use crate::request::Request;
use crate::response::Response;
use crate::settings::{
    PeerSettings, SettingsEffect, DEFAULT_HEADER_TABLE_SIZE, DEFAULT_INITIAL_WINDOW_SIZE,
};
use crate::stream::{HeaderBlockAccumulator, Stream};
use crate::transport::{Transport, UploadReadResult, UploadSource};

const CONNECTION_PREFACE: &[u8] = b"PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n";

pub type RequestId = u64;

/// A completed or in-progress happening the caller learns about by draining
/// `Connection::poll_event` after driving the state machine (spec §6
/// "Outbound events").
#[derive(Debug)]
pub enum ConnectionEvent {
    ResponseHeaders { request_id: RequestId, status: u16 },
    ResponseData { request_id: RequestId, chunk: Bytes },
    ResponseComplete { request_id: RequestId, response: Response },
    ResponseFailed { request_id: RequestId, error: Http2Error },
    /// A PUSH_PROMISE arrived and is buffered under `cache_key`, waiting for
    /// a matching `send_request` call to claim it (spec §4.5 "PUSH_PROMISE
    /// handling").
    PushPromised { cache_key: String },
    GoingAway { last_stream_id: StreamId, code: Http2ErrorCode },
}

fn cache_key_from_fields(fields: &[HeaderField]) -> Option<String> {
    let get = |name: &[u8]| -> Option<String> {
        fields
            .iter()
            .find(|f| f.name.as_ref() == name)
            .map(|f| String::from_utf8_lossy(&f.value).into_owned())
    };
    Some(format!(
        "{}://{}{}",
        get(b":scheme")?,
        get(b":authority")?,
        get(b":path")?
    ))
}

pub struct Connection {
    config: Http2Config,
    reader: FrameReader,
    hpack_encoder: HpackEncoder,
    hpack_decoder: HpackDecoder,
    peer_settings: PeerSettings,
    /// Our view of how many bytes we may still send across the whole
    /// connection (bounded by the peer's connection-level window).
    send_window: Window,
    /// How many more bytes the peer may send us before we must reply with a
    /// connection-level WINDOW_UPDATE.
    recv_window: Window,
    next_stream_id: StreamId,
    streams: HashMap<StreamId, Stream>,
    recycled_ids: RecycledStreamIds,
    header_accumulator: HeaderBlockAccumulator,
    pending_promised_stream_id: Option<StreamId>,
    last_promised_stream_id: StreamId,
    promised_by_cache_key: HashMap<String, StreamId>,
    events: VecDeque<ConnectionEvent>,
    next_request_id: RequestId,
    request_to_stream: HashMap<RequestId, StreamId>,
    stream_to_request: HashMap<StreamId, RequestId>,
    peer_going_away: bool,
    closed: bool,
}

impl Connection {
    #[must_use]
    pub fn new(config: Http2Config) -> Self {
        Self {
            reader: FrameReader::new(config.max_frame_size),
            hpack_encoder: HpackEncoder::new(DEFAULT_HEADER_TABLE_SIZE, config.huffman_compression_enabled),
            hpack_decoder: HpackDecoder::new(config.header_table_size),
            peer_settings: PeerSettings::default(),
            send_window: Window::new(DEFAULT_INITIAL_WINDOW_SIZE),
            recv_window: Window::new(config.session_receive_window_size),
            next_stream_id: 1,
            streams: HashMap::new(),
            recycled_ids: RecycledStreamIds::new(),
            header_accumulator: HeaderBlockAccumulator::default(),
            pending_promised_stream_id: None,
            last_promised_stream_id: 0,
            promised_by_cache_key: HashMap::new(),
            events: VecDeque::new(),
            next_request_id: 0,
            request_to_stream: HashMap::new(),
            stream_to_request: HashMap::new(),
            peer_going_away: false,
            closed: false,
            config,
        }
    }

    /// Sends the connection preface and our initial SETTINGS frame. Must be
    /// called exactly once, before any other method.
    pub fn start(&mut self, transport: &mut dyn Transport) {
        transport.write(CONNECTION_PREFACE);
        let mut writer = FrameWriter::new();
        writer.start(FrameType::Settings, Flags::empty(), 0);
        writer.append(&self.config.settings_payload());
        transport.write(&writer.finish());
        if let Some(delta) = self.config.session_window_update_delta() {
            self.send_window_update(0, delta, transport);
        }
    }

    #[must_use]
    pub fn poll_event(&mut self) -> Option<ConnectionEvent> {
        self.events.pop_front()
    }

    /// Feeds freshly-read transport bytes in. Assembles as many frames as
    /// are complete and dispatches each in order.
    pub fn transport_readable(&mut self, data: &[u8], transport: &mut dyn Transport) {
        if self.closed {
            return;
        }
        self.reader.feed(data);
        loop {
            match self.reader.poll() {
                Ok(Some(frame)) => {
                    if let Err(err) = self.handle_frame(frame, transport) {
                        self.fail_connection(err, transport);
                        return;
                    }
                }
                Ok(None) => return,
                Err(frame_err) => {
                    self.fail_connection(frame_err.into(), transport);
                    return;
                }
            }
        }
    }

    /// Signals that the transport can accept more bytes; retries every
    /// stream whose upload was suspended on flow control or a not-ready
    /// source.
    pub fn transport_writable(&mut self, transport: &mut dyn Transport) {
        if self.closed {
            return;
        }
        self.drive_all_uploads(transport);
    }

    /// Signals the transport is gone. Every in-flight stream fails with
    /// `Http2Error::TransportClosed`.
    pub fn transport_closed(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        for (stream_id, _stream) in self.streams.drain() {
            if let Some(request_id) = self.stream_to_request.remove(&stream_id) {
                self.request_to_stream.remove(&request_id);
                self.events.push_back(ConnectionEvent::ResponseFailed {
                    request_id,
                    error: Http2Error::TransportClosed,
                });
            }
        }
    }

    /// Starts a new request, or claims an already-buffered PUSH_PROMISE
    /// whose cache key matches (spec §4.5 "PUSH_PROMISE handling").
    pub fn send_request(
        &mut self,
        request: Request,
        upload: Option<Box<dyn UploadSource>>,
        transport: &mut dyn Transport,
    ) -> RequestId {
        let request_id = self.next_request_id;
        self.next_request_id += 1;

        let cache_key = request.cache_key();
        if let Some(stream_id) = self.promised_by_cache_key.remove(&cache_key) {
            if let Some(stream) = self.streams.get_mut(&stream_id) {
                stream.request = request;
                self.stream_to_request.insert(stream_id, request_id);
                self.request_to_stream.insert(request_id, stream_id);
                if let Some(status) = stream.response.status() {
                    self.events
                        .push_back(ConnectionEvent::ResponseHeaders { request_id, status });
                }
                return request_id;
            }
        }

        if self.peer_going_away {
            self.events.push_back(ConnectionEvent::ResponseFailed {
                request_id,
                error: Http2Error::ContentReSendError,
            });
            return request_id;
        }

        let fields = match request.header_list() {
            Ok(fields) => fields,
            Err(err) => {
                self.events.push_back(ConnectionEvent::ResponseFailed {
                    request_id,
                    error: Http2Error::Connection(err.into()),
                });
                return request_id;
            }
        };
        let encoded = match self
            .hpack_encoder
            .encode(&fields, self.peer_settings.max_header_list_size)
        {
            Ok(bytes) => bytes,
            Err(err) => {
                self.events.push_back(ConnectionEvent::ResponseFailed {
                    request_id,
                    error: Http2Error::Connection(err.into()),
                });
                return request_id;
            }
        };

        let stream_id = self.next_stream_id;
        self.next_stream_id += 2;
        let flags = if upload.is_none() {
            Flags::END_STREAM
        } else {
            Flags::empty()
        };
        for chunk in FrameWriter::write_headers(
            stream_id,
            flags,
            &encoded,
            self.peer_settings.max_frame_size as usize,
        ) {
            transport.write(&chunk);
        }

        let stream = Stream::new_outbound(
            stream_id,
            request,
            upload,
            self.peer_settings.initial_window_size,
            self.config.stream_receive_window_size,
        );
        self.streams.insert(stream_id, stream);
        self.stream_to_request.insert(stream_id, request_id);
        self.request_to_stream.insert(request_id, stream_id);

        self.drive_upload_for_stream(stream_id, transport);
        request_id
    }

    /// Abandons a request in progress: emits RST_STREAM(CANCEL) and drops
    /// the stream, with no terminal event (the caller initiated this, it
    /// already knows).
    pub fn cancel_stream(&mut self, request_id: RequestId, transport: &mut dyn Transport) {
        let Some(stream_id) = self.request_to_stream.remove(&request_id) else {
            return;
        };
        self.stream_to_request.remove(&stream_id);
        self.streams.remove(&stream_id);
        self.recycled_ids.insert(stream_id);
        self.send_rst_stream(stream_id, Http2ErrorCode::Cancel, transport);
    }

    // ---- inbound frame dispatch --------------------------------------

    fn handle_frame(&mut self, frame: Frame, transport: &mut dyn Transport) -> Result<(), ConnectionError> {
        if self.header_accumulator.is_active() && frame.frame_type() != Some(FrameType::Continuation) {
            return Err(ConnectionError::new(
                Http2ErrorCode::ProtocolError,
                "a non-CONTINUATION frame arrived while a header block was in progress",
            ));
        }
        trace!("stream {} <- {:?} ({} bytes)", frame.stream_id(), frame.frame_type(), frame.payload.len());
        match frame.frame_type() {
            Some(FrameType::Data) => self.handle_data(frame, transport),
            Some(FrameType::Headers) => self.handle_headers(frame, transport),
            Some(FrameType::Priority) => Ok(()),
            Some(FrameType::RstStream) => self.handle_rst_stream(frame),
            Some(FrameType::Settings) => self.handle_settings(frame, transport),
            Some(FrameType::PushPromise) => self.handle_push_promise(frame, transport),
            Some(FrameType::Ping) => self.handle_ping(frame, transport),
            Some(FrameType::GoAway) => self.handle_goaway(frame),
            Some(FrameType::WindowUpdate) => self.handle_window_update(frame, transport),
            Some(FrameType::Continuation) => self.handle_continuation(frame, transport),
            // RFC 7540 §4.1: implementations MUST ignore unknown frame types.
            None => Ok(()),
        }
    }

    fn handle_headers(&mut self, frame: Frame, transport: &mut dyn Transport) -> Result<(), ConnectionError> {
        let stream_id = frame.stream_id();
        let flags = frame.flags();
        let mut payload: &[u8] = if flags.contains(Flags::PADDED) {
            frame::strip_padding(&frame.payload)?
        } else {
            &frame.payload
        };
        if flags.contains(Flags::PRIORITY) {
            if payload.len() < 5 {
                return Err(ConnectionError::new(
                    Http2ErrorCode::ProtocolError,
                    "HEADERS priority fields truncated",
                ));
            }
            payload = &payload[5..];
        }
        self.header_accumulator
            .begin(stream_id, flags.contains(Flags::END_STREAM), false);
        self.header_accumulator.append(payload);
        if flags.contains(Flags::END_HEADERS) {
            self.finish_header_block(transport)?;
        }
        Ok(())
    }

    fn handle_push_promise(&mut self, frame: Frame, transport: &mut dyn Transport) -> Result<(), ConnectionError> {
        if !self.config.server_push_enabled {
            return Err(ConnectionError::new(
                Http2ErrorCode::ProtocolError,
                "received PUSH_PROMISE with server push disabled",
            ));
        }
        let associated_stream_id = frame.stream_id();
        let flags = frame.flags();
        let mut payload: &[u8] = if flags.contains(Flags::PADDED) {
            frame::strip_padding(&frame.payload)?
        } else {
            &frame.payload
        };
        if payload.len() < 4 {
            return Err(ConnectionError::new(
                Http2ErrorCode::ProtocolError,
                "PUSH_PROMISE payload truncated",
            ));
        }
        let promised_stream_id =
            u32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]]) & 0x7fff_ffff;
        payload = &payload[4..];
        if promised_stream_id == 0
            || promised_stream_id % 2 != 0
            || promised_stream_id <= self.last_promised_stream_id
        {
            return Err(ConnectionError::new(
                Http2ErrorCode::ProtocolError,
                format!("invalid promised stream id {promised_stream_id}"),
            ));
        }
        self.last_promised_stream_id = promised_stream_id;
        self.pending_promised_stream_id = Some(promised_stream_id);
        self.header_accumulator.begin(associated_stream_id, false, true);
        self.header_accumulator.append(payload);
        if flags.contains(Flags::END_HEADERS) {
            self.finish_header_block(transport)?;
        }
        Ok(())
    }

    fn handle_continuation(&mut self, frame: Frame, transport: &mut dyn Transport) -> Result<(), ConnectionError> {
        if self.header_accumulator.stream_id() != Some(frame.stream_id()) {
            return Err(ConnectionError::new(
                Http2ErrorCode::ProtocolError,
                "CONTINUATION stream id does not match the in-progress header block",
            ));
        }
        self.header_accumulator.append(&frame.payload);
        if frame.flags().contains(Flags::END_HEADERS) {
            self.finish_header_block(transport)?;
        }
        Ok(())
    }

    fn finish_header_block(&mut self, transport: &mut dyn Transport) -> Result<(), ConnectionError> {
        let (stream_id, buf, end_stream, is_push_promise) = self.header_accumulator.take();
        let fields = self.hpack_decoder.decode(&buf)?;
        if is_push_promise {
            self.handle_push_promise_fields(fields)
        } else {
            self.handle_response_fields(stream_id, fields, end_stream, transport)
        }
    }

    fn handle_push_promise_fields(&mut self, fields: Vec<HeaderField>) -> Result<(), ConnectionError> {
        let promised_stream_id = self.pending_promised_stream_id.take().ok_or_else(|| {
            ConnectionError::new(
                Http2ErrorCode::InternalError,
                "header block completed without a pending promised stream id",
            )
        })?;
        let cache_key = cache_key_from_fields(&fields).ok_or_else(|| {
            ConnectionError::new(
                Http2ErrorCode::ProtocolError,
                "PUSH_PROMISE is missing required pseudo-headers",
            )
        })?;
        self.promised_by_cache_key.insert(cache_key.clone(), promised_stream_id);
        self.streams.insert(
            promised_stream_id,
            Stream::new_reserved(
                promised_stream_id,
                cache_key.clone(),
                fields,
                self.peer_settings.initial_window_size,
                self.config.stream_receive_window_size,
            ),
        );
        self.events.push_back(ConnectionEvent::PushPromised { cache_key });
        Ok(())
    }

    fn handle_response_fields(
        &mut self,
        stream_id: StreamId,
        fields: Vec<HeaderField>,
        end_stream: bool,
        transport: &mut dyn Transport,
    ) -> Result<(), ConnectionError> {
        let Some(stream) = self.streams.get_mut(&stream_id) else {
            if self.recycled_ids.contains(stream_id) {
                return Ok(());
            }
            return Err(ConnectionError::new(
                Http2ErrorCode::ProtocolError,
                format!("HEADERS for unknown stream {stream_id}"),
            ));
        };
        if !stream.state.can_receive_headers() {
            let err = stream.reset_locally(
                Http2ErrorCode::ProtocolError,
                "HEADERS received in a state that cannot accept them",
            );
            self.reset_stream(stream_id, err, transport);
            return Ok(());
        }
        stream.state = stream.state.on_recv_headers();
        stream.response.apply_headers(fields, &stream.request.url);
        let status = stream.response.status();
        if let Some(status) = status {
            if let Some(&request_id) = self.stream_to_request.get(&stream_id) {
                self.events
                    .push_back(ConnectionEvent::ResponseHeaders { request_id, status });
            }
        }
        if end_stream {
            let Some(stream) = self.streams.get_mut(&stream_id) else {
                return Ok(());
            };
            stream.state = stream.state.on_recv_end_stream();
            let closed = stream.state.is_closed();
            if closed {
                self.finish_stream(stream_id);
            }
        }
        Ok(())
    }

    fn handle_data(&mut self, frame: Frame, transport: &mut dyn Transport) -> Result<(), ConnectionError> {
        let stream_id = frame.stream_id();
        let flags = frame.flags();
        let payload: &[u8] = if flags.contains(Flags::PADDED) {
            frame::strip_padding(&frame.payload)?
        } else {
            &frame.payload
        };
        let len = frame.payload.len() as u32;

        self.recv_window
            .receive(len)
            .map_err(|e| ConnectionError::new(e.into(), "connection receive window exceeded"))?;
        if let Some(delta) = should_replenish(
            self.recv_window.available(),
            self.config.session_receive_window_size,
        ) {
            self.recv_window
                .credit(delta)
                .map_err(|e| ConnectionError::new(e.into(), "connection window credit overflowed"))?;
            self.send_window_update(0, delta, transport);
        }

        let Some(stream) = self.streams.get_mut(&stream_id) else {
            if self.recycled_ids.contains(stream_id) {
                return Ok(());
            }
            return Err(ConnectionError::new(
                Http2ErrorCode::ProtocolError,
                format!("DATA for unknown stream {stream_id}"),
            ));
        };
        if let Err(e) = stream.recv_window.receive(len) {
            let err = stream.reset_locally(e.into(), "stream receive window exceeded");
            self.reset_stream(stream_id, err, transport);
            return Ok(());
        }
        stream.response.append_data(payload);
        if let Some(&request_id) = self.stream_to_request.get(&stream_id) {
            self.events.push_back(ConnectionEvent::ResponseData {
                request_id,
                chunk: Bytes::copy_from_slice(payload),
            });
        }

        let stream = self.streams.get_mut(&stream_id).expect("checked above");
        if let Some(delta) = should_replenish(
            stream.recv_window.available(),
            self.config.stream_receive_window_size,
        ) {
            stream
                .recv_window
                .credit(delta)
                .map_err(|e| ConnectionError::new(e.into(), "stream window credit overflowed"))?;
            self.send_window_update(stream_id, delta, transport);
        }

        if flags.contains(Flags::END_STREAM) {
            let Some(stream) = self.streams.get_mut(&stream_id) else {
                return Ok(());
            };
            stream.state = stream.state.on_recv_end_stream();
            let closed = stream.state.is_closed();
            if closed {
                self.finish_stream(stream_id);
            }
        }
        Ok(())
    }

    fn handle_settings(&mut self, frame: Frame, transport: &mut dyn Transport) -> Result<(), ConnectionError> {
        if frame.flags().contains(Flags::ACK) {
            return Ok(());
        }
        let effects = self.peer_settings.apply(&frame.payload)?;
        for effect in effects {
            match effect {
                SettingsEffect::HeaderTableSize(size) => {
                    self.hpack_encoder.set_peer_max_dynamic_table_size(size);
                }
                SettingsEffect::InitialWindowSizeDelta(delta) => {
                    let mut overflowed = Vec::new();
                    for (&stream_id, stream) in &mut self.streams {
                        if let Err(e) = stream.send_window.apply_delta(delta) {
                            let err = stream.reset_locally(
                                e.into(),
                                "INITIAL_WINDOW_SIZE change overflowed a stream send window",
                            );
                            overflowed.push((stream_id, err));
                        }
                    }
                    for (stream_id, err) in overflowed {
                        self.reset_stream(stream_id, err, transport);
                    }
                }
                SettingsEffect::EnablePush(_)
                | SettingsEffect::MaxConcurrentStreams(_)
                | SettingsEffect::MaxFrameSize(_)
                | SettingsEffect::MaxHeaderListSize(_) => {}
            }
        }
        self.send_settings_ack(transport);
        self.drive_all_uploads(transport);
        Ok(())
    }

    fn handle_ping(&mut self, frame: Frame, transport: &mut dyn Transport) -> Result<(), ConnectionError> {
        if frame.flags().contains(Flags::ACK) {
            return Ok(());
        }
        let mut writer = FrameWriter::new();
        writer.start(FrameType::Ping, Flags::ACK, 0);
        writer.append(&frame.payload);
        transport.write(&writer.finish());
        Ok(())
    }

    fn handle_goaway(&mut self, frame: Frame) -> Result<(), ConnectionError> {
        if frame.payload.len() < 8 {
            return Err(ConnectionError::new(
                Http2ErrorCode::FrameSizeError,
                "GOAWAY payload truncated",
            ));
        }
        let payload = &frame.payload;
        let last_stream_id =
            u32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]]) & 0x7fff_ffff;
        let code = Http2ErrorCode::from_wire(u32::from_be_bytes([
            payload[4], payload[5], payload[6], payload[7],
        ]));
        self.events
            .push_back(ConnectionEvent::GoingAway { last_stream_id, code });
        self.peer_going_away = true;

        let stranded: Vec<StreamId> = self
            .streams
            .keys()
            .copied()
            .filter(|&id| id % 2 == 1 && id > last_stream_id)
            .collect();
        for stream_id in stranded {
            self.streams.remove(&stream_id);
            self.recycled_ids.insert(stream_id);
            if let Some(request_id) = self.stream_to_request.remove(&stream_id) {
                self.request_to_stream.remove(&request_id);
                self.events.push_back(ConnectionEvent::ResponseFailed {
                    request_id,
                    error: Http2Error::ContentReSendError,
                });
            }
        }
        Ok(())
    }

    fn handle_rst_stream(&mut self, frame: Frame) -> Result<(), ConnectionError> {
        if frame.payload.len() < 4 {
            return Err(ConnectionError::new(
                Http2ErrorCode::FrameSizeError,
                "RST_STREAM payload truncated",
            ));
        }
        let stream_id = frame.stream_id();
        let code = Http2ErrorCode::from_wire(u32::from_be_bytes([
            frame.payload[0],
            frame.payload[1],
            frame.payload[2],
            frame.payload[3],
        ]));
        if self.streams.contains_key(&stream_id) {
            self.abort_stream(stream_id, StreamError::new(code, "stream reset by peer"));
        } else {
            self.recycled_ids.insert(stream_id);
        }
        Ok(())
    }

    fn handle_window_update(&mut self, frame: Frame, transport: &mut dyn Transport) -> Result<(), ConnectionError> {
        if frame.payload.len() < 4 {
            return Err(ConnectionError::new(
                Http2ErrorCode::FrameSizeError,
                "WINDOW_UPDATE payload truncated",
            ));
        }
        let increment = u32::from_be_bytes([
            frame.payload[0],
            frame.payload[1],
            frame.payload[2],
            frame.payload[3],
        ]) & 0x7fff_ffff;
        if increment == 0 {
            return Err(ConnectionError::new(
                Http2ErrorCode::ProtocolError,
                "WINDOW_UPDATE increment must be nonzero",
            ));
        }
        let stream_id = frame.stream_id();
        if stream_id == 0 {
            self.send_window
                .credit(increment)
                .map_err(|e| ConnectionError::new(e.into(), "connection send window overflowed"))?;
            self.drive_all_uploads(transport);
            return Ok(());
        }
        let Some(stream) = self.streams.get_mut(&stream_id) else {
            return Ok(());
        };
        if let Err(e) = stream.send_window.credit(increment) {
            let err = stream.reset_locally(e.into(), "stream send window overflowed");
            self.reset_stream(stream_id, err, transport);
            return Ok(());
        }
        self.drive_upload_for_stream(stream_id, transport);
        Ok(())
    }

    // ---- outbound upload loop -----------------------------------------

    fn drive_all_uploads(&mut self, transport: &mut dyn Transport) {
        let ids: Vec<StreamId> = self
            .streams
            .iter()
            .filter(|(_, s)| s.upload.is_some())
            .map(|(id, _)| *id)
            .collect();
        for id in ids {
            self.drive_upload_for_stream(id, transport);
        }
    }

    /// Pulls from the stream's upload source until it blocks on flow
    /// control, reports `NotReady`, errors, or finishes (spec §4.5 "Upload
    /// loop", §9 "Upload source as lazy sequence").
    fn drive_upload_for_stream(&mut self, stream_id: StreamId, transport: &mut dyn Transport) {
        loop {
            let Some(stream) = self.streams.get_mut(&stream_id) else { return };
            if stream.upload.is_none() {
                return;
            }
            let budget = self
                .send_window
                .available()
                .min(stream.send_window.available())
                .min(self.peer_settings.max_frame_size) as usize;
            if budget == 0 {
                stream.upload_suspended = true;
                return;
            }
            let result = stream
                .upload
                .as_mut()
                .expect("checked Some above")
                .read_at_most(budget);
            match result {
                UploadReadResult::Data(chunk, at_end) => {
                    if chunk.is_empty() && !at_end {
                        stream.upload_suspended = true;
                        return;
                    }
                    let len = chunk.len() as u32;
                    let flags = if at_end { Flags::END_STREAM } else { Flags::empty() };
                    let mut writer = FrameWriter::new();
                    writer.start(FrameType::Data, flags, stream_id);
                    writer.append(&chunk);
                    transport.write(&writer.finish());
                    stream
                        .send_window
                        .consume(len)
                        .expect("budget already bounded the chunk size");
                    self.send_window
                        .consume(len)
                        .expect("budget already bounded the chunk size");
                    if at_end {
                        stream.upload = None;
                        stream.state = stream.state.on_send_end_stream();
                        let closed = stream.state.is_closed();
                        if closed {
                            self.finish_stream(stream_id);
                        }
                        return;
                    }
                }
                UploadReadResult::NotReady => {
                    stream.upload_suspended = true;
                    return;
                }
                UploadReadResult::Error(message) => {
                    let err = stream.reset_locally(Http2ErrorCode::InternalError, message);
                    self.reset_stream(stream_id, err, transport);
                    return;
                }
            }
        }
    }

    // ---- stream/connection bookkeeping --------------------------------

    fn finish_stream(&mut self, stream_id: StreamId) {
        let Some(stream) = self.streams.remove(&stream_id) else { return };
        debug!("stream {stream_id} closed");
        self.recycled_ids.insert(stream_id);
        if let Some(request_id) = self.stream_to_request.remove(&stream_id) {
            self.request_to_stream.remove(&request_id);
            self.events.push_back(ConnectionEvent::ResponseComplete {
                request_id,
                response: stream.response.finish(),
            });
        }
    }

    /// A locally-detected stream error: emits RST_STREAM to the peer, then
    /// cleans up.
    fn reset_stream(&mut self, stream_id: StreamId, err: StreamError, transport: &mut dyn Transport) {
        self.send_rst_stream(stream_id, err.code, transport);
        self.abort_stream(stream_id, err);
    }

    /// Cleans up a stream the peer already reset; no RST_STREAM of our own
    /// is sent.
    fn abort_stream(&mut self, stream_id: StreamId, err: StreamError) {
        warn!("stream {stream_id} aborted: {err}");
        self.streams.remove(&stream_id);
        self.recycled_ids.insert(stream_id);
        if let Some(request_id) = self.stream_to_request.remove(&stream_id) {
            self.request_to_stream.remove(&request_id);
            self.events.push_back(ConnectionEvent::ResponseFailed {
                request_id,
                error: err.into(),
            });
        }
    }

    fn fail_connection(&mut self, err: ConnectionError, transport: &mut dyn Transport) {
        if self.closed {
            return;
        }
        error!("connection failed: {err}");
        self.closed = true;
        self.send_goaway(err.code, err.message.as_bytes(), transport);
        for (stream_id, _stream) in self.streams.drain() {
            if let Some(request_id) = self.stream_to_request.remove(&stream_id) {
                self.request_to_stream.remove(&request_id);
                self.events.push_back(ConnectionEvent::ResponseFailed {
                    request_id,
                    error: Http2Error::Connection(err.clone()),
                });
            }
        }
    }

    // ---- frame senders --------------------------------------------------

    fn send_window_update(&mut self, stream_id: StreamId, increment: u32, transport: &mut dyn Transport) {
        let mut writer = FrameWriter::new();
        writer.start(FrameType::WindowUpdate, Flags::empty(), stream_id);
        writer.append_u32(increment & 0x7fff_ffff);
        transport.write(&writer.finish());
    }

    fn send_rst_stream(&mut self, stream_id: StreamId, code: Http2ErrorCode, transport: &mut dyn Transport) {
        let mut writer = FrameWriter::new();
        writer.start(FrameType::RstStream, Flags::empty(), stream_id);
        writer.append_u32(code as u32);
        transport.write(&writer.finish());
    }

    fn send_settings_ack(&mut self, transport: &mut dyn Transport) {
        let mut writer = FrameWriter::new();
        writer.start(FrameType::Settings, Flags::ACK, 0);
        transport.write(&writer.finish());
    }

    fn send_goaway(&mut self, code: Http2ErrorCode, debug: &[u8], transport: &mut dyn Transport) {
        let mut writer = FrameWriter::new();
        writer.start(FrameType::GoAway, Flags::empty(), 0);
        writer.append_u32(0);
        writer.append_u32(code as u32);
        writer.append(debug);
        transport.write(&writer.finish());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hpack::Encoder as TestEncoder;
    use crate::request::Request;
    use crate::transport::{BufferUploadSource, RecordingTransport};
    use num_traits::ToPrimitive as _;
    use url::Url;

    fn encode_response_headers(status: u16) -> Bytes {
        let mut enc = TestEncoder::new(4096, false);
        let fields = [HeaderField::new(":status", status.to_string())];
        enc.encode(&fields, u32::MAX).unwrap()
    }

    fn frame_bytes(frame_type: FrameType, flags: Flags, stream_id: StreamId, payload: &[u8]) -> Bytes {
        let mut writer = FrameWriter::new();
        writer.start(frame_type, flags, stream_id);
        writer.append(payload);
        writer.finish()
    }

    #[test]
    fn start_writes_preface_and_settings() {
        let mut conn = Connection::new(Http2Config::default());
        let mut transport = RecordingTransport::default();
        conn.start(&mut transport);
        assert!(transport.written.starts_with(CONNECTION_PREFACE));
        assert_eq!(
            transport.written[CONNECTION_PREFACE.len() + 3],
            FrameType::Settings.to_u8().unwrap()
        );
    }

    #[test]
    fn single_get_round_trip() {
        let mut conn = Connection::new(Http2Config::default());
        let mut transport = RecordingTransport::default();
        conn.start(&mut transport);

        let request_id = conn.send_request(
            Request::get(Url::parse("https://example.com/").unwrap()),
            None,
            &mut transport,
        );

        let settings = frame_bytes(FrameType::Settings, Flags::empty(), 0, &[]);
        let headers = encode_response_headers(200);
        let headers_frame = frame_bytes(
            FrameType::Headers,
            Flags::END_HEADERS | Flags::END_STREAM,
            1,
            &headers,
        );

        let mut inbound = Vec::new();
        inbound.extend_from_slice(&settings);
        inbound.extend_from_slice(&headers_frame);
        conn.transport_readable(&inbound, &mut transport);

        let mut saw_headers = false;
        let mut saw_complete = false;
        while let Some(event) = conn.poll_event() {
            match event {
                ConnectionEvent::ResponseHeaders { request_id: id, status } => {
                    assert_eq!(id, request_id);
                    assert_eq!(status, 200);
                    saw_headers = true;
                }
                ConnectionEvent::ResponseComplete { request_id: id, response } => {
                    assert_eq!(id, request_id);
                    assert_eq!(response.status, 200);
                    saw_complete = true;
                }
                other => panic!("unexpected event: {other:?}"),
            }
        }
        assert!(saw_headers && saw_complete);
    }

    #[test]
    fn upload_suspends_on_flow_control_then_resumes() {
        let mut conn = Connection::new(Http2Config::default());
        let mut transport = RecordingTransport::default();
        conn.start(&mut transport);

        // Shrinks the window every new stream will start with, to 5 bytes.
        let mut settings_payload = Vec::new();
        settings_payload.extend(crate::settings::encode_param(
            crate::settings::SettingsParameter::InitialWindowSize,
            5,
        ));
        let settings = frame_bytes(FrameType::Settings, Flags::empty(), 0, &settings_payload);
        conn.transport_readable(&settings, &mut transport);

        let upload = Box::new(BufferUploadSource::new(b"0123456789".to_vec()));
        conn.send_request(
            Request::post(Url::parse("https://example.com/upload").unwrap(), Bytes::new()),
            Some(upload),
            &mut transport,
        );

        // Only 5 of the 10 body bytes fit in the window; the rest waits.
        assert!(conn.streams.get(&1).unwrap().upload_suspended);
        assert!(conn.streams.get(&1).unwrap().upload.is_some());

        let window_update = frame_bytes(FrameType::WindowUpdate, Flags::empty(), 1, &5u32.to_be_bytes());
        conn.transport_readable(&window_update, &mut transport);

        // The remaining 5 bytes went out with END_STREAM.
        assert!(conn.streams.get(&1).unwrap().upload.is_none());
    }

    #[test]
    fn goaway_fails_streams_above_last_stream_id() {
        let mut conn = Connection::new(Http2Config::default());
        let mut transport = RecordingTransport::default();
        conn.start(&mut transport);

        let request_id = conn.send_request(
            Request::get(Url::parse("https://example.com/a").unwrap()),
            None,
            &mut transport,
        );

        let mut goaway_payload = Vec::new();
        goaway_payload.extend_from_slice(&0u32.to_be_bytes());
        goaway_payload.extend_from_slice(&(Http2ErrorCode::NoError as u32).to_be_bytes());
        let goaway = frame_bytes(FrameType::GoAway, Flags::empty(), 0, &goaway_payload);
        conn.transport_readable(&goaway, &mut transport);

        let mut saw_going_away = false;
        let mut saw_failed = false;
        while let Some(event) = conn.poll_event() {
            match event {
                ConnectionEvent::GoingAway { last_stream_id, .. } => {
                    assert_eq!(last_stream_id, 0);
                    saw_going_away = true;
                }
                ConnectionEvent::ResponseFailed { request_id: id, error } => {
                    assert_eq!(id, request_id);
                    assert!(matches!(error, Http2Error::ContentReSendError));
                    saw_failed = true;
                }
                other => panic!("unexpected event: {other:?}"),
            }
        }
        assert!(saw_going_away && saw_failed);
    }

    #[test]
    fn push_promise_is_claimed_by_matching_request() {
        let mut conn = Connection::new(Http2Config::default());
        let mut transport = RecordingTransport::default();
        conn.start(&mut transport);

        let mut enc = TestEncoder::new(4096, false);
        let promise_fields = [
            HeaderField::new(":method", "GET"),
            HeaderField::new(":scheme", "https"),
            HeaderField::new(":authority", "example.com"),
            HeaderField::new(":path", "/style.css"),
        ];
        let encoded_promise = enc.encode(&promise_fields, u32::MAX).unwrap();
        let mut push_payload = Vec::new();
        push_payload.extend_from_slice(&2u32.to_be_bytes());
        push_payload.extend_from_slice(&encoded_promise);
        let push_frame = frame_bytes(FrameType::PushPromise, Flags::END_HEADERS, 1, &push_payload);
        conn.transport_readable(&push_frame, &mut transport);

        let cache_key = match conn.poll_event() {
            Some(ConnectionEvent::PushPromised { cache_key }) => cache_key,
            other => panic!("expected PushPromised, got {other:?}"),
        };
        assert_eq!(cache_key, "https://example.com/style.css");

        let request_id = conn.send_request(
            Request::get(Url::parse("https://example.com/style.css").unwrap()),
            None,
            &mut transport,
        );
        assert!(conn.request_to_stream.get(&request_id) == Some(&2));
    }

    #[test]
    fn initial_window_size_overflow_resets_only_the_offending_stream() {
        use crate::settings::{SettingsParameter, MAX_WINDOW_SIZE};

        let mut conn = Connection::new(Http2Config::default());
        let mut transport = RecordingTransport::default();
        conn.start(&mut transport);

        let failing = conn.send_request(
            Request::get(Url::parse("https://example.com/a").unwrap()),
            None,
            &mut transport,
        );

        // Credit stream 1's send window all the way to the 2^31-1 ceiling.
        let top_up = MAX_WINDOW_SIZE - 65_535;
        let mut window_update_payload = Vec::new();
        window_update_payload.extend_from_slice(&top_up.to_be_bytes());
        let window_update = frame_bytes(FrameType::WindowUpdate, Flags::empty(), 1, &window_update_payload);
        conn.transport_readable(&window_update, &mut transport);

        // An INITIAL_WINDOW_SIZE increase of just 1 now overflows stream 1's
        // send window past the ceiling, but must not take the connection down.
        let mut settings_payload = Vec::new();
        settings_payload.extend_from_slice(&(SettingsParameter::InitialWindowSize as u16).to_be_bytes());
        settings_payload.extend_from_slice(&65_536u32.to_be_bytes());
        let settings = frame_bytes(FrameType::Settings, Flags::empty(), 0, &settings_payload);
        conn.transport_readable(&settings, &mut transport);

        let mut saw_failed = false;
        while let Some(event) = conn.poll_event() {
            match event {
                ConnectionEvent::ResponseFailed { request_id, .. } => {
                    assert_eq!(request_id, failing);
                    saw_failed = true;
                }
                other => panic!("unexpected event: {other:?}"),
            }
        }
        assert!(saw_failed);
        assert!(!conn.streams.contains_key(&1));

        // The connection itself survived: a second request still goes out.
        let second = conn.send_request(
            Request::get(Url::parse("https://example.com/b").unwrap()),
            None,
            &mut transport,
        );
        assert!(conn.request_to_stream.contains_key(&second));
    }
}
