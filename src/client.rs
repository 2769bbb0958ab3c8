//! A thin convenience wrapper gluing a `Connection` to a blocking
//! `Read + Write` stream. Not part of the protocol core: it exists because
//! the teacher ships one, not because the handler needs it. Real
//! integrations are expected to implement `Transport` against their own
//! reactor and drive `Connection` directly.

use std::io::{self, Read, Write};

use log::trace;

use crate::config::Http2Config;
use crate::connection::{Connection, ConnectionEvent, RequestId};
use crate::error::Http2Error;
use crate::request::Request;
use crate::response::Response;
use crate::transport::Transport;
use crate::Url;

/// Adapts a blocking stream to the sans-io `Transport` trait. Reading is
/// driven by `Client::request`'s loop, not by this type.
struct IoTransport<S> {
    io: S,
}

impl<S: Write> Transport for IoTransport<S> {
    fn write(&mut self, bytes: &[u8]) {
        // A blocking stream either accepts everything or the connection is
        // already broken; there is nothing useful to retry here.
        let _ = self.io.write_all(bytes);
    }
}

/// Drives one `Connection` against one blocking stream, one request at a
/// time. Suitable for a CLI or a test harness; not for a concurrent client.
pub struct Client<S> {
    connection: Connection,
    transport: IoTransport<S>,
}

impl<S: Read + Write> Client<S> {
    pub fn new(io: S, config: Http2Config) -> Self {
        let mut connection = Connection::new(config);
        let mut transport = IoTransport { io };
        connection.start(&mut transport);
        Self { connection, transport }
    }

    /// A bodyless GET, blocking until the response completes.
    pub fn get(&mut self, url: Url) -> Result<Response, Http2Error> {
        self.request(Request::get(url))
    }

    /// Issues `request` and blocks, reading from the stream and feeding the
    /// connection until that specific request reaches a terminal event.
    pub fn request(&mut self, request: Request) -> Result<Response, Http2Error> {
        let request_id = self
            .connection
            .send_request(request, None, &mut self.transport);
        self.run_until_done(request_id)
    }

    fn run_until_done(&mut self, request_id: RequestId) -> Result<Response, Http2Error> {
        let mut buf = [0u8; 8192];
        loop {
            while let Some(event) = self.connection.poll_event() {
                match event {
                    ConnectionEvent::ResponseComplete { request_id: id, response } if id == request_id => {
                        return Ok(response);
                    }
                    ConnectionEvent::ResponseFailed { request_id: id, error } if id == request_id => {
                        return Err(error);
                    }
                    other => trace!("dropping unrelated event while awaiting {request_id}: {other:?}"),
                }
            }
            match self.transport.io.read(&mut buf) {
                Ok(0) => {
                    self.connection.transport_closed();
                    return Err(Http2Error::TransportClosed);
                }
                Ok(n) => self
                    .connection
                    .transport_readable(&buf[..n], &mut self.transport),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(_) => {
                    self.connection.transport_closed();
                    return Err(Http2Error::TransportClosed);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    /// An in-memory stream whose `read` side is pre-seeded and whose
    /// `write` side is discarded, enough to exercise the request loop
    /// without a real socket.
    struct LoopbackStream {
        inbound: Cursor<Vec<u8>>,
    }

    impl Read for LoopbackStream {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.inbound.read(buf)
        }
    }

    impl Write for LoopbackStream {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            Ok(buf.len())
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn get_fails_cleanly_when_transport_closes_before_response() {
        let io = LoopbackStream { inbound: Cursor::new(Vec::new()) };
        let mut client = Client::new(io, Http2Config::default());
        let err = client
            .get(Url::parse("https://example.com/").unwrap())
            .unwrap_err();
        assert!(matches!(err, Http2Error::TransportClosed));
    }
}
