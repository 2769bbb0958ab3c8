#![warn(future_incompatible, nonstandard_style, rust_2018_idioms, unused)]
#![warn(clippy::pedantic)]
#![allow(
    clippy::doc_markdown,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::module_name_repetitions,
    clippy::wildcard_imports,
    clippy::similar_names,
    clippy::cast_possible_truncation,
    clippy::too_many_lines
)]

mod bitstream;
mod config;
mod connection;
mod error;
mod flow_control;
mod frame;
mod hpack;
mod huffman;
mod recycled;
mod request;
mod response;
mod settings;
mod stream;
mod transport;

pub mod client;

pub use bytes::Bytes;
pub use client::Client;
pub use config::{ConfigError, Http2Config};
pub use connection::{Connection, ConnectionEvent, RequestId};
pub use error::{ConnectionError, FrameError, Http2Error, Http2ErrorCode, HpackError, StreamError};
pub use frame::StreamId;
pub use request::{Method, Priority, Request};
pub use response::Response;
pub use transport::{BufferUploadSource, RecordingTransport, Transport, UploadReadResult, UploadSource};
pub use url::Url;
