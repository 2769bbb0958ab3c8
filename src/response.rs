//! The inbound response carrier and the in-progress accumulator the
//! connection fills in as HEADERS/CONTINUATION/DATA arrive (spec §4.5
//! "HEADERS handling (inbound)", §6 "Inbound events").

use bytes::{Bytes, BytesMut};
use url::Url;

use crate::hpack::HeaderField;

#[derive(Debug, Clone)]
pub struct Response {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
    pub redirect_url: Option<Url>,
}

impl Response {
    #[must_use]
    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }
}

/// Redirect-eligible status codes (spec §4.5: "a `location` header combined
/// with a redirect status updates the stream's redirect URL").
fn is_redirect_status(status: u16) -> bool {
    matches!(status, 301 | 302 | 303 | 307 | 308)
}

#[derive(Debug, Default)]
pub struct ResponseBuilder {
    status: Option<u16>,
    headers: Vec<(String, String)>,
    body: BytesMut,
    content_length: Option<u64>,
    redirect_url: Option<Url>,
}

impl ResponseBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn status(&self) -> Option<u16> {
        self.status
    }

    /// Applies a decoded header block: extracts `:status` and
    /// `content-length`, drops other pseudo-headers, and delivers the rest
    /// to the carrier.
    pub fn apply_headers(&mut self, fields: Vec<HeaderField>, request_url: &Url) {
        for field in fields {
            let name = String::from_utf8_lossy(&field.name).into_owned();
            let value = String::from_utf8_lossy(&field.value).into_owned();
            if name == ":status" {
                self.status = value.parse().ok();
                continue;
            }
            if name.starts_with(':') {
                continue;
            }
            if name.eq_ignore_ascii_case("content-length") {
                self.content_length = value.parse().ok();
            }
            if name.eq_ignore_ascii_case("location") {
                if let Some(status) = self.status {
                    if is_redirect_status(status) {
                        self.redirect_url = request_url.join(&value).ok();
                    }
                }
            }
            self.headers.push((name, value));
        }
    }

    pub fn append_data(&mut self, bytes: &[u8]) {
        self.body.extend_from_slice(bytes);
    }

    #[must_use]
    pub fn content_length(&self) -> Option<u64> {
        self.content_length
    }

    #[must_use]
    pub fn finish(self) -> Response {
        Response {
            status: self.status.unwrap_or(0),
            headers: self.headers,
            body: self.body.freeze(),
            redirect_url: self.redirect_url,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url() -> Url {
        Url::parse("https://example.com/original").unwrap()
    }

    #[test]
    fn status_and_body_are_collected() {
        let mut builder = ResponseBuilder::new();
        builder.apply_headers(
            vec![
                HeaderField::new(&b":status"[..], &b"200"[..]),
                HeaderField::new(&b"content-type"[..], &b"text/plain"[..]),
            ],
            &url(),
        );
        builder.append_data(b"hello");
        let response = builder.finish();
        assert_eq!(response.status, 200);
        assert_eq!(response.header("content-type"), Some("text/plain"));
        assert_eq!(&response.body[..], b"hello");
    }

    #[test]
    fn redirect_status_with_location_sets_redirect_url() {
        let mut builder = ResponseBuilder::new();
        builder.apply_headers(
            vec![
                HeaderField::new(&b":status"[..], &b"302"[..]),
                HeaderField::new(&b"location"[..], &b"/new-path"[..]),
            ],
            &url(),
        );
        let response = builder.finish();
        assert_eq!(
            response.redirect_url.unwrap().as_str(),
            "https://example.com/new-path"
        );
    }

    #[test]
    fn non_redirect_status_ignores_location() {
        let mut builder = ResponseBuilder::new();
        builder.apply_headers(
            vec![
                HeaderField::new(&b":status"[..], &b"200"[..]),
                HeaderField::new(&b"location"[..], &b"/ignored"[..]),
            ],
            &url(),
        );
        assert!(builder.finish().redirect_url.is_none());
    }
}
