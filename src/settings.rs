//! SETTINGS parameter identifiers and the negotiated-value table threaded
//! through the protocol handler (spec §4.5 "SETTINGS handling", §6).

use enum_map::{enum_map, Enum, EnumMap};
use num_derive::{FromPrimitive, ToPrimitive};

use crate::error::{ConnectionError, Http2ErrorCode};
use crate::frame::{DEFAULT_MAX_FRAME_SIZE, MAX_FRAME_SIZE_CEILING};

pub const DEFAULT_HEADER_TABLE_SIZE: u32 = 4_096;
pub const DEFAULT_INITIAL_WINDOW_SIZE: u32 = 65_535;
pub const MAX_CONCURRENT_STREAMS_CEILING: u32 = 1_000;
pub const MAX_WINDOW_SIZE: u32 = (1u32 << 31) - 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, FromPrimitive, ToPrimitive, Enum)]
#[repr(u16)]
pub enum SettingsParameter {
    HeaderTableSize = 0x1,
    EnablePush = 0x2,
    MaxConcurrentStreams = 0x3,
    InitialWindowSize = 0x4,
    MaxFrameSize = 0x5,
    MaxHeaderListSize = 0x6,
}

/// The values a peer has declared for us via SETTINGS (spec §3
/// "Peer-declared settings"). `max_header_list_size` and
/// `max_concurrent_streams` default to "unlimited", represented as `u32::MAX`.
#[derive(Debug, Clone, Copy)]
pub struct PeerSettings {
    pub header_table_size: u32,
    pub enable_push: bool,
    pub max_concurrent_streams: u32,
    pub initial_window_size: u32,
    pub max_frame_size: u32,
    pub max_header_list_size: u32,
}

impl Default for PeerSettings {
    fn default() -> Self {
        Self {
            header_table_size: DEFAULT_HEADER_TABLE_SIZE,
            enable_push: true,
            max_concurrent_streams: u32::MAX,
            initial_window_size: DEFAULT_INITIAL_WINDOW_SIZE,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            max_header_list_size: u32::MAX,
        }
    }
}

/// An accepted change to one SETTINGS parameter, returned by
/// `PeerSettings::apply` so the protocol handler can react (e.g. rewrite
/// every active stream's send window on an `InitialWindowSize` change).
#[derive(Debug, Clone, Copy)]
pub enum SettingsEffect {
    HeaderTableSize(u32),
    EnablePush(bool),
    MaxConcurrentStreams(u32),
    InitialWindowSizeDelta(i64),
    MaxFrameSize(u32),
    MaxHeaderListSize(u32),
}

impl PeerSettings {
    /// Parses and validates a SETTINGS frame payload's 6-byte (id, value)
    /// pairs, applying each recognized, in-range id and returning the
    /// resulting effects in wire order. Unknown ids are silently ignored.
    pub fn apply(&mut self, payload: &[u8]) -> Result<Vec<SettingsEffect>, ConnectionError> {
        let mut effects = Vec::new();
        for chunk in payload.chunks_exact(6) {
            let id = u16::from_be_bytes([chunk[0], chunk[1]]);
            let value = u32::from_be_bytes([chunk[2], chunk[3], chunk[4], chunk[5]]);
            let Some(param) = <SettingsParameter as num_traits::FromPrimitive>::from_u16(id) else {
                continue;
            };
            effects.push(self.apply_one(param, value)?);
        }
        Ok(effects)
    }

    fn apply_one(
        &mut self,
        param: SettingsParameter,
        value: u32,
    ) -> Result<SettingsEffect, ConnectionError> {
        match param {
            SettingsParameter::HeaderTableSize => {
                self.header_table_size = value;
                Ok(SettingsEffect::HeaderTableSize(value))
            }
            SettingsParameter::EnablePush => {
                if value > 1 {
                    return Err(ConnectionError::new(
                        Http2ErrorCode::ProtocolError,
                        format!("ENABLE_PUSH must be 0 or 1, got {value}"),
                    ));
                }
                self.enable_push = value == 1;
                Ok(SettingsEffect::EnablePush(self.enable_push))
            }
            SettingsParameter::MaxConcurrentStreams => {
                if value > MAX_CONCURRENT_STREAMS_CEILING {
                    return Err(ConnectionError::new(
                        Http2ErrorCode::ProtocolError,
                        format!("MAX_CONCURRENT_STREAMS {value} exceeds implementation ceiling"),
                    ));
                }
                self.max_concurrent_streams = value;
                Ok(SettingsEffect::MaxConcurrentStreams(value))
            }
            SettingsParameter::InitialWindowSize => {
                if value > MAX_WINDOW_SIZE {
                    return Err(ConnectionError::new(
                        Http2ErrorCode::FlowControlError,
                        format!("INITIAL_WINDOW_SIZE {value} exceeds 2^31-1"),
                    ));
                }
                let delta = i64::from(value) - i64::from(self.initial_window_size);
                self.initial_window_size = value;
                Ok(SettingsEffect::InitialWindowSizeDelta(delta))
            }
            SettingsParameter::MaxFrameSize => {
                if !(DEFAULT_MAX_FRAME_SIZE..=MAX_FRAME_SIZE_CEILING).contains(&value) {
                    return Err(ConnectionError::new(
                        Http2ErrorCode::ProtocolError,
                        format!("MAX_FRAME_SIZE {value} out of [16384, 16777215]"),
                    ));
                }
                self.max_frame_size = value;
                Ok(SettingsEffect::MaxFrameSize(value))
            }
            SettingsParameter::MaxHeaderListSize => {
                self.max_header_list_size = value;
                Ok(SettingsEffect::MaxHeaderListSize(value))
            }
        }
    }
}

/// Encodes one SETTINGS parameter/value pair into a 6-byte chunk.
#[must_use]
pub fn encode_param(param: SettingsParameter, value: u32) -> [u8; 6] {
    let mut out = [0u8; 6];
    out[0..2].copy_from_slice(&(param as u16).to_be_bytes());
    out[2..6].copy_from_slice(&value.to_be_bytes());
    out
}

/// The outbound settings this client will advertise, built from
/// `Http2Config` (spec §6 "Configuration knobs").
#[must_use]
pub fn encode_initial_settings(
    stream_receive_window: u32,
    max_frame_size: u32,
    server_push_enabled: bool,
    max_header_list_size: Option<u32>,
) -> Vec<u8> {
    let mut payload = Vec::new();
    payload.extend(encode_param(
        SettingsParameter::EnablePush,
        u32::from(server_push_enabled),
    ));
    payload.extend(encode_param(
        SettingsParameter::InitialWindowSize,
        stream_receive_window,
    ));
    payload.extend(encode_param(SettingsParameter::MaxFrameSize, max_frame_size));
    if let Some(max) = max_header_list_size {
        payload.extend(encode_param(SettingsParameter::MaxHeaderListSize, max));
    }
    payload
}

/// Convenience table for code that wants to address settings by enum key
/// rather than by field name (mirrors the teacher's `enum_map` usage for
/// per-setting bookkeeping).
#[must_use]
pub fn default_settings_map() -> EnumMap<SettingsParameter, u32> {
    enum_map! {
        SettingsParameter::HeaderTableSize => DEFAULT_HEADER_TABLE_SIZE,
        SettingsParameter::EnablePush => 1,
        SettingsParameter::MaxConcurrentStreams => u32::MAX,
        SettingsParameter::InitialWindowSize => DEFAULT_INITIAL_WINDOW_SIZE,
        SettingsParameter::MaxFrameSize => DEFAULT_MAX_FRAME_SIZE,
        SettingsParameter::MaxHeaderListSize => u32::MAX,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_setting_id_is_ignored() {
        let mut settings = PeerSettings::default();
        let mut payload = Vec::new();
        payload.extend(0x99u16.to_be_bytes());
        payload.extend(123u32.to_be_bytes());
        let effects = settings.apply(&payload).unwrap();
        assert!(effects.is_empty());
    }

    #[test]
    fn initial_window_size_overflow_is_flow_control_error() {
        let mut settings = PeerSettings::default();
        let mut payload = Vec::new();
        payload.extend(encode_param(SettingsParameter::InitialWindowSize, u32::MAX));
        let err = settings.apply(&payload).unwrap_err();
        assert_eq!(err.code, Http2ErrorCode::FlowControlError);
    }

    #[test]
    fn max_frame_size_below_default_is_protocol_error() {
        let mut settings = PeerSettings::default();
        let mut payload = Vec::new();
        payload.extend(encode_param(SettingsParameter::MaxFrameSize, 100));
        let err = settings.apply(&payload).unwrap_err();
        assert_eq!(err.code, Http2ErrorCode::ProtocolError);
    }

    #[test]
    fn initial_window_size_delta_is_reported() {
        let mut settings = PeerSettings::default();
        let mut payload = Vec::new();
        payload.extend(encode_param(SettingsParameter::InitialWindowSize, 100));
        let effects = settings.apply(&payload).unwrap();
        assert!(matches!(
            effects[0],
            SettingsEffect::InitialWindowSizeDelta(delta) if delta == 100 - DEFAULT_INITIAL_WINDOW_SIZE as i64
        ));
    }
}
