//! Configuration knobs (spec §6 "Configuration knobs with enumerated
//! effects").

use base64::Engine;

use crate::settings::{
    encode_initial_settings, DEFAULT_HEADER_TABLE_SIZE, DEFAULT_INITIAL_WINDOW_SIZE, MAX_WINDOW_SIZE,
};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("stream_receive_window_size must be in [1, 2^31-1], got {0}")]
    InvalidStreamWindow(u32),
    #[error("session_receive_window_size must be >= {DEFAULT_INITIAL_WINDOW_SIZE}, got {0}")]
    InvalidSessionWindow(u32),
    #[error("max_frame_size must be in [16384, 2^24-1], got {0}")]
    InvalidMaxFrameSize(u32),
}

#[derive(Debug, Clone, Copy)]
pub struct Http2Config {
    /// SETTINGS.ENABLE_PUSH; when false, inbound PUSH_PROMISE is refused.
    pub server_push_enabled: bool,
    /// SETTINGS.INITIAL_WINDOW_SIZE, applied to each stream's receive window.
    pub stream_receive_window_size: u32,
    /// Delivered as WINDOW_UPDATE on stream 0 after the preface when it
    /// exceeds the RFC default of 65 535.
    pub session_receive_window_size: u32,
    /// SETTINGS.MAX_FRAME_SIZE.
    pub max_frame_size: u32,
    /// Controls whether the HPACK encoder may choose Huffman-coded strings.
    pub huffman_compression_enabled: bool,
    /// The size we advertise via SETTINGS.HEADER_TABLE_SIZE for our own
    /// (decoder-side) dynamic table.
    pub header_table_size: u32,
    /// SETTINGS.MAX_HEADER_LIST_SIZE we advertise, if any.
    pub max_header_list_size: Option<u32>,
}

impl Default for Http2Config {
    fn default() -> Self {
        Self {
            server_push_enabled: true,
            stream_receive_window_size: DEFAULT_INITIAL_WINDOW_SIZE,
            session_receive_window_size: DEFAULT_INITIAL_WINDOW_SIZE,
            max_frame_size: crate::frame::DEFAULT_MAX_FRAME_SIZE,
            huffman_compression_enabled: true,
            header_table_size: DEFAULT_HEADER_TABLE_SIZE,
            max_header_list_size: None,
        }
    }
}

impl Http2Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.stream_receive_window_size == 0 || self.stream_receive_window_size > MAX_WINDOW_SIZE {
            return Err(ConfigError::InvalidStreamWindow(self.stream_receive_window_size));
        }
        if self.session_receive_window_size < DEFAULT_INITIAL_WINDOW_SIZE
            || self.session_receive_window_size > MAX_WINDOW_SIZE
        {
            return Err(ConfigError::InvalidSessionWindow(self.session_receive_window_size));
        }
        if !(crate::frame::DEFAULT_MAX_FRAME_SIZE..=crate::frame::MAX_FRAME_SIZE_CEILING)
            .contains(&self.max_frame_size)
        {
            return Err(ConfigError::InvalidMaxFrameSize(self.max_frame_size));
        }
        Ok(())
    }

    /// The initial SETTINGS payload this configuration produces.
    #[must_use]
    pub fn settings_payload(&self) -> Vec<u8> {
        encode_initial_settings(
            self.stream_receive_window_size,
            self.max_frame_size,
            self.server_push_enabled,
            self.max_header_list_size,
        )
    }

    /// The same payload, base64url-encoded with no padding, for use as an
    /// HTTP/1.1 Upgrade header value (spec §6 "Wire").
    #[must_use]
    pub fn settings_frame_base64(&self) -> String {
        base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(self.settings_payload())
    }

    #[must_use]
    pub fn session_window_update_delta(&self) -> Option<u32> {
        if self.session_receive_window_size > DEFAULT_INITIAL_WINDOW_SIZE {
            Some(self.session_receive_window_size - DEFAULT_INITIAL_WINDOW_SIZE)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        assert!(Http2Config::default().validate().is_ok());
    }

    #[test]
    fn zero_stream_window_is_rejected() {
        let mut config = Http2Config::default();
        config.stream_receive_window_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn session_window_delta_only_above_default() {
        let config = Http2Config::default();
        assert_eq!(config.session_window_update_delta(), None);
        let mut config = config;
        config.session_receive_window_size = 1 << 20;
        assert_eq!(
            config.session_window_update_delta(),
            Some((1 << 20) - DEFAULT_INITIAL_WINDOW_SIZE)
        );
    }

    #[test]
    fn settings_frame_base64_has_no_padding() {
        let config = Http2Config::default();
        assert!(!config.settings_frame_base64().contains('='));
    }
}
