//! The outbound request carrier and HPACK header-list assembly rules from
//! spec §4.3 (pseudo-header ordering, hop-by-hop filtering).

use bytes::Bytes;
use derive_more::Display;
use url::Url;

use crate::error::HpackError;
use crate::hpack::HeaderField;

/// Hop-by-hop header names that have no meaning over HTTP/2 and must never
/// reach the wire (RFC 7540 §8.1.2.2).
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "host",
    "keep-alive",
    "proxy-connection",
    "transfer-encoding",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Priority {
    Low,
    Normal,
    High,
}

impl Priority {
    #[must_use]
    pub fn weight(self) -> u8 {
        match self {
            Priority::Low => 0,
            Priority::Normal => 127,
            Priority::High => 255,
        }
    }
}

#[derive(Debug, Clone, Display, PartialEq, Eq)]
pub enum Method {
    #[display(fmt = "GET")]
    Get,
    #[display(fmt = "POST")]
    Post,
    #[display(fmt = "PUT")]
    Put,
    #[display(fmt = "DELETE")]
    Delete,
    #[display(fmt = "HEAD")]
    Head,
    #[display(fmt = "PATCH")]
    Patch,
    #[display(fmt = "OPTIONS")]
    Options,
    #[display(fmt = "{}", _0)]
    Other(String),
}

#[derive(Debug, Clone)]
pub struct Request {
    pub method: Method,
    pub url: Url,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
    pub priority: Priority,
}

impl Request {
    #[must_use]
    pub fn new(method: Method, url: Url, headers: Vec<(String, String)>, body: impl Into<Bytes>) -> Self {
        Self {
            method,
            url,
            headers,
            body: body.into(),
            priority: Priority::Normal,
        }
    }

    #[must_use]
    pub fn get(url: Url) -> Self {
        Self::new(Method::Get, url, Vec::new(), Bytes::new())
    }

    #[must_use]
    pub fn post(url: Url, body: impl Into<Bytes>) -> Self {
        Self::new(Method::Post, url, Vec::new(), body)
    }

    #[must_use]
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    #[must_use]
    pub fn with_headers(mut self, headers: Vec<(String, String)>) -> Self {
        self.headers = headers;
        self
    }

    /// A stand-in request for a reserved (pushed) stream before any real
    /// request claims it; never encoded onto the wire.
    #[must_use]
    pub fn placeholder() -> Self {
        Self::get(Url::parse("http://promised.invalid/").expect("static URL parses"))
    }

    fn authority(&self) -> Option<String> {
        let host = self.url.host_str()?;
        Some(match self.url.port() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_owned(),
        })
    }

    fn path(&self) -> String {
        let mut path = if self.url.path().is_empty() {
            "/".to_owned()
        } else {
            self.url.path().to_owned()
        };
        if let Some(query) = self.url.query() {
            path.push('?');
            path.push_str(query);
        }
        path
    }

    /// The cache key used to match a real request against a buffered
    /// PUSH_PROMISE (spec §4.5 "PUSH_PROMISE handling": `scheme://authority/path`).
    /// Must stay in lockstep with how the connection derives a key from a
    /// PUSH_PROMISE's `:scheme`/`:authority`/`:path` pseudo-headers.
    #[must_use]
    pub fn cache_key(&self) -> String {
        format!(
            "{}://{}{}",
            self.url.scheme(),
            self.authority().unwrap_or_default(),
            self.path()
        )
    }

    /// Builds the ordered header list HPACK will encode: `:method`,
    /// `:scheme`, `:path`, then `:authority` if known, each exactly once,
    /// followed by regular fields lowercased with hop-by-hop names dropped.
    /// A caller-supplied pseudo-header (anything starting with `:`) is
    /// rejected, matching the rule that a request may carry only the four
    /// well-known ones, assembled here, and never `:status`.
    pub fn header_list(&self) -> Result<Vec<HeaderField>, HpackError> {
        let mut out = Vec::with_capacity(4 + self.headers.len());
        out.push(HeaderField::new(":method", self.method.to_string()));
        out.push(HeaderField::new(":scheme", self.url.scheme().to_owned()));
        out.push(HeaderField::new(":path", self.path()));
        if let Some(authority) = self.authority() {
            out.push(HeaderField::new(":authority", authority));
        }
        for (name, value) in &self.headers {
            let lower = name.to_ascii_lowercase();
            if lower.starts_with(':') {
                return Err(HpackError::MalformedRequest(format!(
                    "request header list may not include pseudo-header {lower:?}"
                )));
            }
            if HOP_BY_HOP.contains(&lower.as_str()) {
                continue;
            }
            out.push(HeaderField::new(lower, value.clone()));
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn pseudo_headers_come_first_in_order() {
        let req = Request::get(url("https://example.com/index?x=1"));
        let fields = req.header_list().unwrap();
        assert_eq!(fields[0].name.as_ref(), b":method");
        assert_eq!(fields[1].name.as_ref(), b":scheme");
        assert_eq!(fields[2].name.as_ref(), b":path");
        assert_eq!(fields[2].value.as_ref(), b"/index?x=1");
        assert_eq!(fields[3].name.as_ref(), b":authority");
        assert_eq!(fields[3].value.as_ref(), b"example.com");
    }

    #[test]
    fn hop_by_hop_headers_are_dropped() {
        let req = Request::get(url("https://example.com/")).with_headers(vec![
            ("Connection".to_owned(), "keep-alive".to_owned()),
            ("X-Custom".to_owned(), "value".to_owned()),
        ]);
        let fields = req.header_list().unwrap();
        assert!(!fields.iter().any(|f| f.name.as_ref() == b"connection"));
        assert!(fields.iter().any(|f| f.name.as_ref() == b"x-custom"));
    }

    #[test]
    fn caller_pseudo_header_is_rejected() {
        let req = Request::get(url("https://example.com/"))
            .with_headers(vec![(":status".to_owned(), "200".to_owned())]);
        assert!(req.header_list().is_err());
    }

    #[test]
    fn cache_key_matches_scheme_authority_path() {
        let req = Request::get(url("https://example.com:8443/a/b"));
        assert_eq!(req.cache_key(), "https://example.com:8443/a/b");
    }
}
