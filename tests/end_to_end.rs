//! Black-box scenarios driving `Connection` purely through its public API
//! and hand-built wire bytes, the way a real transport adapter would feed
//! it. Internal codec invariants (HPACK table eviction, Huffman padding,
//! frame reassembly) have their own unit tests next to the code; these
//! cover behavior that only shows up once the pieces are wired together.

use http2::{Connection, ConnectionEvent, Http2Config, Http2Error, RecordingTransport, Request, Url};

const SETTINGS: u8 = 0x4;
const HEADERS: u8 = 0x1;
const PUSH_PROMISE: u8 = 0x5;
const GOAWAY: u8 = 0x7;
const END_HEADERS: u8 = 0x4;
const END_STREAM: u8 = 0x1;

fn frame(frame_type: u8, flags: u8, stream_id: u32, payload: &[u8]) -> Vec<u8> {
    let len = payload.len() as u32;
    let mut out = Vec::with_capacity(9 + payload.len());
    out.extend_from_slice(&len.to_be_bytes()[1..]);
    out.push(frame_type);
    out.push(flags);
    out.extend_from_slice(&(stream_id & 0x7fff_ffff).to_be_bytes());
    out.extend_from_slice(payload);
    out
}

/// Walks a byte stream of back-to-back frames (as `RecordingTransport`
/// accumulates them, with no preface mixed in) and returns each one's type
/// byte.
fn frame_types_written(written: &[u8]) -> Vec<u8> {
    let mut types = Vec::new();
    let mut pos = 0;
    while pos + 9 <= written.len() {
        let len = u32::from_be_bytes([0, written[pos], written[pos + 1], written[pos + 2]]) as usize;
        types.push(written[pos + 3]);
        pos += 9 + len;
    }
    types
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

    let mut inbound = Vec::new();
    inbound.extend(frame(SETTINGS, 0, 0, &[]));
    // ":status: 200" is HPACK static table index 8 (RFC 7541 Appendix A),
    // encoded as a single indexed-header-field byte.
    inbound.extend(frame(HEADERS, END_HEADERS | END_STREAM, 1, &[0x88]));
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
                assert!(response.body.is_empty());
                saw_complete = true;
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }
    assert!(saw_headers && saw_complete);
}

#[test]
fn goaway_mid_flight_fails_the_stream_and_later_requests() {
    let mut conn = Connection::new(Http2Config::default());
    let mut transport = RecordingTransport::default();
    conn.start(&mut transport);

    let in_flight = conn.send_request(
        Request::get(Url::parse("https://example.com/a").unwrap()),
        None,
        &mut transport,
    );

    let mut goaway_payload = Vec::new();
    goaway_payload.extend_from_slice(&0u32.to_be_bytes()); // last_stream_id = 0
    goaway_payload.extend_from_slice(&0u32.to_be_bytes()); // NO_ERROR
    conn.transport_readable(&frame(GOAWAY, 0, 0, &goaway_payload), &mut transport);

    let mut saw_going_away = false;
    let mut saw_failed = false;
    while let Some(event) = conn.poll_event() {
        match event {
            ConnectionEvent::GoingAway { .. } => saw_going_away = true,
            ConnectionEvent::ResponseFailed { request_id, error } => {
                assert_eq!(request_id, in_flight);
                assert!(matches!(error, Http2Error::ContentReSendError));
                saw_failed = true;
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }
    assert!(saw_going_away && saw_failed);

    // A request started after the peer announced it's going away never
    // touches the wire; it fails immediately so the caller can retry
    // elsewhere.
    let after_goaway = conn.send_request(
        Request::get(Url::parse("https://example.com/b").unwrap()),
        None,
        &mut transport,
    );
    match conn.poll_event() {
        Some(ConnectionEvent::ResponseFailed { request_id, error }) => {
            assert_eq!(request_id, after_goaway);
            assert!(matches!(error, Http2Error::ContentReSendError));
        }
        other => panic!("expected an immediate ResponseFailed, got {other:?}"),
    }
}

#[test]
fn invalid_push_promise_stream_id_fails_the_connection() {
    let mut conn = Connection::new(Http2Config::default());
    let mut transport = RecordingTransport::default();
    conn.start(&mut transport);
    conn.send_request(
        Request::get(Url::parse("https://example.com/").unwrap()),
        None,
        &mut transport,
    );
    transport.written.clear();

    // Promised stream ids must be even (server-initiated); 3 is not.
    let mut payload = Vec::new();
    payload.extend_from_slice(&3u32.to_be_bytes());
    payload.push(0x88); // unreachable header byte
    conn.transport_readable(&frame(PUSH_PROMISE, END_HEADERS, 1, &payload), &mut transport);

    assert!(frame_types_written(&transport.written).contains(&GOAWAY));

    // Once failed, the connection is deaf: further inbound bytes produce no
    // more outbound frames.
    let before = transport.written.len();
    conn.transport_readable(&frame(SETTINGS, 0, 0, &[]), &mut transport);
    assert_eq!(transport.written.len(), before);
}
