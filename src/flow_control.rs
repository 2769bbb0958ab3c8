//! Signed 31-bit flow-control windows (spec §3, §4.5 "DATA handling" and
//! "WINDOW_UPDATE").

use crate::error::Http2ErrorCode;
use crate::settings::MAX_WINDOW_SIZE;

/// A send or receive credit that can go negative (e.g. immediately after a
/// SETTINGS_INITIAL_WINDOW_SIZE decrease) but never past `-2^31`, and must
/// never be driven below zero by our own sends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    value: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum WindowError {
    #[error("flow-control window would overflow past 2^31-1")]
    Overflow,
    #[error("flow-control window would go negative by {0} bytes")]
    Underflow(u32),
}

impl Window {
    #[must_use]
    pub fn new(initial: u32) -> Self {
        Self { value: i64::from(initial) }
    }

    #[must_use]
    pub fn value(&self) -> i64 {
        self.value
    }

    #[must_use]
    pub fn available(&self) -> u32 {
        self.value.max(0).min(i64::from(u32::MAX)) as u32
    }

    /// Applied when the peer sends WINDOW_UPDATE. Delta must already be
    /// validated to be in `[1, 2^31-1]` by the caller.
    pub fn credit(&mut self, delta: u32) -> Result<(), WindowError> {
        self.value += i64::from(delta);
        if self.value > i64::from(MAX_WINDOW_SIZE) {
            return Err(WindowError::Overflow);
        }
        Ok(())
    }

    /// Applied when we send DATA payload bytes. Never allowed to go below
    /// zero (spec §3 invariant).
    pub fn consume(&mut self, amount: u32) -> Result<(), WindowError> {
        if i64::from(amount) > self.value {
            return Err(WindowError::Underflow(amount));
        }
        self.value -= i64::from(amount);
        Ok(())
    }

    /// Applied when we receive DATA payload bytes from the peer; may go
    /// negative only as a consequence of an `INITIAL_WINDOW_SIZE` decrease
    /// applied retroactively, but never from an actual received byte count
    /// that exceeds the advertised window.
    pub fn receive(&mut self, amount: u32) -> Result<(), WindowError> {
        if i64::from(amount) > self.value {
            return Err(WindowError::Underflow(amount));
        }
        self.value -= i64::from(amount);
        Ok(())
    }

    /// Applies a SETTINGS_INITIAL_WINDOW_SIZE delta to an already-open
    /// stream's send window (spec §3: "applied to existing streams by the
    /// declared delta"). May push the window negative; only a positive
    /// overflow past 2^31-1 is an error.
    pub fn apply_delta(&mut self, delta: i64) -> Result<(), WindowError> {
        self.value += delta;
        if self.value > i64::from(MAX_WINDOW_SIZE) {
            return Err(WindowError::Overflow);
        }
        Ok(())
    }
}

impl From<WindowError> for Http2ErrorCode {
    fn from(err: WindowError) -> Self {
        match err {
            WindowError::Overflow => Http2ErrorCode::FlowControlError,
            WindowError::Underflow(_) => Http2ErrorCode::FlowControlError,
        }
    }
}

/// Decides whether a WINDOW_UPDATE should be scheduled after consuming
/// `consumed` bytes out of an `initial`-sized window now sitting at
/// `remaining` (spec §4.5: "when either window drops below half its
/// configured initial value").
#[must_use]
pub fn should_replenish(remaining: u32, initial: u32) -> Option<u32> {
    if u64::from(remaining) * 2 < u64::from(initial) {
        Some(initial - remaining)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn consume_cannot_go_negative() {
        let mut w = Window::new(5);
        assert!(w.consume(5).is_ok());
        assert_eq!(w.value(), 0);
        assert!(w.consume(1).is_err());
    }

    #[test]
    fn credit_then_consume_round_trips_scenario_2() {
        // Spec Scenario 2: initial window 5, two 5-byte DATA sends bounded
        // by one WINDOW_UPDATE(delta=5) in between.
        let mut w = Window::new(5);
        w.consume(5).unwrap();
        assert_eq!(w.value(), 0);
        w.credit(5).unwrap();
        w.consume(5).unwrap();
        assert_eq!(w.value(), 0);
    }

    #[test]
    fn negative_delta_from_settings_change_is_allowed() {
        let mut w = Window::new(100);
        w.apply_delta(-150).unwrap();
        assert_eq!(w.value(), -50);
    }

    #[test]
    fn replenish_threshold_is_half_initial() {
        assert_eq!(should_replenish(10_000, 65_535), None);
        assert!(should_replenish(1_000, 65_535).is_some());
    }
}
