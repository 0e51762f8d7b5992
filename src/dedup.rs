//! Cooldown gate: one notification per physical scan.
//!
//! Several channels can see the same scan (key events and the ambient input
//! channel both fire when a scanner types into the page). The gate remembers
//! only the last accepted value and when it was accepted; an identical value
//! inside the cooldown window is dropped. A different value always passes.

use std::time::{Duration, Instant};
use tracing::debug;

use crate::capture::ChannelKind;
use crate::symbology::Symbology;

/// A format-valid barcode accepted by the validator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetectionResult {
    pub value: String,
    pub symbology: Symbology,
    pub channel: ChannelKind,
    /// Monotonic acceptance time, used for cooldown arithmetic.
    pub accepted_at: Instant,
    /// Wall-clock acceptance time, for display and logs.
    pub accepted_at_utc: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone)]
pub struct CooldownGate {
    window: Duration,
    last: Option<(String, Instant)>,
}

impl CooldownGate {
    pub fn new(window: Duration) -> Self {
        Self { window, last: None }
    }

    /// Decide whether `result` should reach subscribers. Accepting updates
    /// the remembered value and time; suppressing leaves them untouched.
    pub fn admit(&mut self, result: &DetectionResult) -> bool {
        if let Some((ref value, at)) = self.last {
            let elapsed = result.accepted_at.saturating_duration_since(at);
            if *value == result.value && elapsed < self.window {
                debug!(
                    barcode = %result.value,
                    channel = %result.channel,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Duplicate scan suppressed"
                );
                return false;
            }
        }
        self.last = Some((result.value.clone(), result.accepted_at));
        true
    }

    pub fn last_accepted(&self) -> Option<&str> {
        self.last.as_ref().map(|(v, _)| v.as_str())
    }
}

// ===========================================================================
// Tests
// ===========================================================================
