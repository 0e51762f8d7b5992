//! Timing classifier: turns per-channel keystrokes into finalized candidates.
//!
//! Pure state machine. Every operation takes the arrival time explicitly, so
//! "given these timestamped characters, what gets finalized" is answered
//! without timers or a browser. The service layer owns the clock.
//!
//! Rules:
//! - A gap above the inter-key threshold means human-paced input: the stale
//!   buffer is dropped and the new character starts a fresh one
//! - Reaching 13 all-digit characters finalizes at once (nothing longer exists)
//! - Otherwise the buffer waits for the idle timeout; then an all-digit buffer
//!   of at least `min_fallback_length` is finalized, anything else is noise
//! - Enter/Tab finalizes whatever is buffered, length checks left to the validator

use std::time::{Duration, Instant};
use tracing::trace;

use crate::config::ScannerConfig;
use crate::symbology::{is_all_digits, MAX_PLAUSIBLE_LEN};

// ---------------------------------------------------------------------------
// Scan buffer
// ---------------------------------------------------------------------------

/// Accumulator for one channel's in-progress candidate.
#[derive(Debug, Clone, Default)]
pub struct ScanBuffer {
    characters: String,
    last_arrival: Option<Instant>,
}

impl ScanBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn as_str(&self) -> &str {
        &self.characters
    }

    pub fn len(&self) -> usize {
        self.characters.chars().count()
    }

    pub fn is_empty(&self) -> bool {
        self.characters.is_empty()
    }

    pub fn last_arrival(&self) -> Option<Instant> {
        self.last_arrival
    }

    fn push(&mut self, ch: char, at: Instant) {
        self.characters.push(ch);
        self.last_arrival = Some(at);
    }

    /// Take the contents and reset to empty.
    fn take(&mut self) -> String {
        self.last_arrival = None;
        std::mem::take(&mut self.characters)
    }

    fn clear(&mut self) {
        self.characters.clear();
        self.last_arrival = None;
    }
}

// ---------------------------------------------------------------------------
// Classifier
// ---------------------------------------------------------------------------

/// What a single character arrival did to the buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyOutcome {
    /// Appended; waiting for more input or the idle timeout.
    Buffering,
    /// Previous contents were human-paced and dropped; this char starts anew.
    Restarted { discarded: String },
    /// The buffer reached full length and was finalized.
    Finalized(String),
    /// The buffer grew past the configured maximum and was dropped.
    Overflow,
}

#[derive(Debug, Clone)]
pub struct TimingClassifier {
    buffer: ScanBuffer,
    inter_key_gap: Duration,
    idle_finalize: Duration,
    min_fallback_length: usize,
    max_buffer_length: usize,
    /// When the idle timer fires. `None` while disarmed.
    idle_deadline: Option<Instant>,
}

impl TimingClassifier {
    pub fn new(config: &ScannerConfig) -> Self {
        Self {
            buffer: ScanBuffer::new(),
            inter_key_gap: config.inter_key_gap(),
            idle_finalize: config.idle_finalize(),
            min_fallback_length: config.min_fallback_length,
            max_buffer_length: config.max_buffer_length,
            idle_deadline: None,
        }
    }

    pub fn buffer(&self) -> &ScanBuffer {
        &self.buffer
    }

    pub fn idle_deadline(&self) -> Option<Instant> {
        self.idle_deadline
    }

    /// Feed one character that arrived at `at`.
    pub fn push(&mut self, ch: char, at: Instant) -> KeyOutcome {
        let mut outcome = KeyOutcome::Buffering;

        if let Some(last) = self.buffer.last_arrival() {
            let gap = at.saturating_duration_since(last);
            if gap > self.inter_key_gap && !self.buffer.is_empty() {
                let discarded = self.buffer.take();
                trace!(
                    gap_ms = gap.as_millis() as u64,
                    discarded = %discarded,
                    "Human-paced input, buffer restarted"
                );
                outcome = KeyOutcome::Restarted { discarded };
            }
        }

        self.buffer.push(ch, at);

        if self.buffer.len() > self.max_buffer_length {
            self.reset();
            return KeyOutcome::Overflow;
        }

        if self.buffer.len() == MAX_PLAUSIBLE_LEN && is_all_digits(self.buffer.as_str()) {
            self.idle_deadline = None;
            return KeyOutcome::Finalized(self.buffer.take());
        }

        self.idle_deadline = Some(at + self.idle_finalize);
        outcome
    }

    /// Enter/Tab: finalize whatever is buffered, regardless of length.
    pub fn terminate(&mut self) -> Option<String> {
        self.idle_deadline = None;
        if self.buffer.is_empty() {
            return None;
        }
        Some(self.buffer.take())
    }

    /// Fire the idle timer if its deadline has passed.
    ///
    /// Returns the buffer when it's an all-digit run of at least the fallback
    /// length; shorter or non-numeric buffers are dropped silently.
    pub fn poll_idle(&mut self, now: Instant) -> Option<String> {
        let deadline = self.idle_deadline?;
        if now < deadline {
            return None;
        }
        self.idle_deadline = None;

        let contents = self.buffer.take();
        if contents.chars().count() >= self.min_fallback_length && is_all_digits(&contents) {
            Some(contents)
        } else {
            if !contents.is_empty() {
                trace!(discarded = %contents, "Idle buffer dropped as noise");
            }
            None
        }
    }

    /// Hand over the buffer unconditionally (diagnostic force-finalize).
    pub fn force_finalize(&mut self) -> Option<String> {
        self.terminate()
    }

    /// Drop the buffer and disarm the timer without finalizing.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.idle_deadline = None;
    }
}

// ===========================================================================
// Tests
// ===========================================================================
