//! Indexed header compression (RFC 7541), spec component 3.

mod decoder;
mod encoder;
mod table;

pub use decoder::Decoder;
pub use encoder::{Encoder, HeaderField};
pub use table::STATIC_TABLE_LEN;
