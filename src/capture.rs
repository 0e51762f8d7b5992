//! Capture channels: every input surface a scanner peripheral might use.
//!
//! Channels only turn raw host events into [`CaptureEvent`]s. None of them
//! validate; acceptance is centralized so all channels share one policy.
//!
//! - **Key events**: document-level key-downs outside text fields, digits and
//!   Enter/Tab only
//! - **Paste**: document-level paste of a plausible raw barcode, forwarded whole
//! - **Hidden input**: an invisible input that grabs focus whenever nothing
//!   editable has it, for setups that only deliver to the focused element
//! - **Ambient input**: `input` events on any element whose value already
//!   looks like a full barcode, re-armed per element
//!
//! The host side (a webview bridge, a test double) implements [`InputHost`]
//! and pushes [`HostEvent`]s in; nothing here touches a real DOM.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::time::{Duration, Instant};
use tracing::{debug, trace};
use uuid::Uuid;

use crate::config::ScannerConfig;
use crate::symbology::{is_all_digits, is_plausible_barcode, MAX_PLAUSIBLE_LEN};

// ---------------------------------------------------------------------------
// Channel identity
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelKind {
    KeyEvent,
    Paste,
    HiddenInput,
    AmbientInput,
    /// COM/USB-serial scanner lines.
    Serial,
    /// Values pushed through the diagnostic injection API.
    Injected,
}

impl ChannelKind {
    /// Channels attached to the host surface on start, in attach order.
    pub const HOST_CHANNELS: [ChannelKind; 4] = [
        ChannelKind::KeyEvent,
        ChannelKind::Paste,
        ChannelKind::HiddenInput,
        ChannelKind::AmbientInput,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ChannelKind::KeyEvent => "key_event",
            ChannelKind::Paste => "paste",
            ChannelKind::HiddenInput => "hidden_input",
            ChannelKind::AmbientInput => "ambient_input",
            ChannelKind::Serial => "serial",
            ChannelKind::Injected => "injected",
        }
    }
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Raw host events
// ---------------------------------------------------------------------------

/// What kind of element an event targeted / currently holds focus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FocusTarget {
    /// Document body or nothing focused.
    #[default]
    None,
    /// A legitimate editable field (input, textarea, contenteditable).
    TextInput,
    /// The scanner's own hidden input.
    HiddenInput,
    /// Any other focusable element (button, link, ...).
    Other,
}

impl FocusTarget {
    pub fn is_editable(self) -> bool {
        matches!(self, FocusTarget::TextInput | FocusTarget::HiddenInput)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Key {
    Char(char),
    Enter,
    Tab,
    /// Any other named key (Shift, ArrowLeft, F1, ...).
    Other(String),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Modifiers {
    pub ctrl: bool,
    pub alt: bool,
    pub meta: bool,
    pub shift: bool,
}

impl Modifiers {
    /// Ctrl/Alt/Meta chords are shortcuts, never scanner output.
    pub fn is_chord(self) -> bool {
        self.ctrl || self.alt || self.meta
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyEvent {
    pub key: Key,
    #[serde(default)]
    pub modifiers: Modifiers,
    #[serde(default)]
    pub target: FocusTarget,
}

impl KeyEvent {
    pub fn char(ch: char, target: FocusTarget) -> Self {
        Self {
            key: Key::Char(ch),
            modifiers: Modifiers::default(),
            target,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PasteEvent {
    pub text: String,
    #[serde(default)]
    pub target: FocusTarget,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputEvent {
    /// Stable identity of the element whose value changed.
    pub element: String,
    #[serde(default)]
    pub target: FocusTarget,
    pub value: String,
}

/// Everything a host surface can report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HostEvent {
    KeyDown(KeyEvent),
    Paste(PasteEvent),
    Input(InputEvent),
    SerialLine { line: String },
}

// ---------------------------------------------------------------------------
// Capture events
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CapturePayload {
    /// One keystroke for the timing classifier.
    Char(char),
    /// Enter/Tab: finalize the channel's buffer now.
    Terminator,
    /// A complete string that bypasses the timing classifier.
    Candidate(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureEvent {
    pub channel: ChannelKind,
    pub at: Instant,
    pub payload: CapturePayload,
}

impl CaptureEvent {
    pub fn candidate(channel: ChannelKind, value: impl Into<String>, at: Instant) -> Self {
        Self {
            channel,
            at,
            payload: CapturePayload::Candidate(value.into()),
        }
    }
}

// ---------------------------------------------------------------------------
// Host surface
// ---------------------------------------------------------------------------

/// The page/window the channels tap into.
///
/// Implementations wire `attach`/`detach` to real event listeners and own the
/// hidden input element; only the capture channels call these.
pub trait InputHost {
    fn attach(&mut self, channel: ChannelKind);
    fn detach(&mut self, channel: ChannelKind);

    fn create_hidden_input(&mut self, element_id: &str);
    fn focus_hidden_input(&mut self);
    /// Reset the hidden input's value after a candidate was taken from it.
    fn clear_hidden_input(&mut self);
    fn destroy_hidden_input(&mut self);

    /// What currently holds focus.
    fn focused_target(&self) -> FocusTarget;
}

/// Host with no surface at all: serial-only or fully injected setups.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullHost;

impl InputHost for NullHost {
    fn attach(&mut self, _channel: ChannelKind) {}
    fn detach(&mut self, _channel: ChannelKind) {}
    fn create_hidden_input(&mut self, _element_id: &str) {}
    fn focus_hidden_input(&mut self) {}
    fn clear_hidden_input(&mut self) {}
    fn destroy_hidden_input(&mut self) {}
    fn focused_target(&self) -> FocusTarget {
        FocusTarget::None
    }
}

// ---------------------------------------------------------------------------
// Key-event channel
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Clone, Copy)]
pub struct KeyChannel;

impl KeyChannel {
    pub fn observe(&self, event: &KeyEvent, at: Instant) -> Option<CaptureEvent> {
        // Keys aimed at the hidden input still go through the classifier so
        // human-paced typing there is told apart from a scan.
        if event.target == FocusTarget::TextInput || event.modifiers.is_chord() {
            return None;
        }
        let payload = match event.key {
            Key::Char(ch) if ch.is_ascii_digit() => CapturePayload::Char(ch),
            Key::Enter | Key::Tab => CapturePayload::Terminator,
            _ => return None,
        };
        Some(CaptureEvent {
            channel: ChannelKind::KeyEvent,
            at,
            payload,
        })
    }
}

// ---------------------------------------------------------------------------
// Paste channel
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Clone, Copy)]
pub struct PasteChannel;

impl PasteChannel {
    pub fn observe(&self, event: &PasteEvent, at: Instant) -> Option<CaptureEvent> {
        if event.target == FocusTarget::TextInput {
            return None;
        }
        let text = event.text.trim();
        if !is_plausible_barcode(text) {
            trace!(len = text.len(), "Paste ignored, not a raw barcode");
            return None;
        }
        Some(CaptureEvent::candidate(ChannelKind::Paste, text, at))
    }
}

// ---------------------------------------------------------------------------
// Hidden-input channel
// ---------------------------------------------------------------------------

/// Owns the invisible focus-trap input for as long as capture is active.
#[derive(Debug)]
pub struct HiddenInputChannel {
    element_id: Option<String>,
    pending: Option<(String, Instant)>,
    /// Last value seen in the element and when it changed.
    last_change: Option<(String, Instant)>,
    settle: Duration,
    inter_key_gap: Duration,
    refocus_interval: Duration,
    next_refocus: Option<Instant>,
}

impl HiddenInputChannel {
    pub fn new(config: &ScannerConfig) -> Self {
        Self {
            element_id: None,
            pending: None,
            last_change: None,
            settle: config.idle_finalize(),
            inter_key_gap: config.inter_key_gap(),
            refocus_interval: config.refocus_interval(),
            next_refocus: None,
        }
    }

    pub fn element_id(&self) -> Option<&str> {
        self.element_id.as_deref()
    }

    pub fn attach<H: InputHost + ?Sized>(&mut self, host: &mut H, now: Instant) {
        if self.element_id.is_some() {
            return;
        }
        let id = format!("scan-wedge-hidden-{}", Uuid::new_v4());
        host.create_hidden_input(&id);
        debug!(element = %id, "Hidden scanner input created");
        self.element_id = Some(id);
        self.reclaim_focus(host);
        self.next_refocus = Some(now + self.refocus_interval);
    }

    pub fn detach<H: InputHost + ?Sized>(&mut self, host: &mut H) {
        self.pending = None;
        self.last_change = None;
        self.next_refocus = None;
        if let Some(id) = self.element_id.take() {
            host.destroy_hidden_input();
            debug!(element = %id, "Hidden scanner input destroyed");
        }
    }

    fn reclaim_focus<H: InputHost + ?Sized>(&self, host: &mut H) {
        if !host.focused_target().is_editable() {
            host.focus_hidden_input();
        }
    }

    /// Handle an input event if it belongs to the hidden element.
    pub fn observe<H: InputHost + ?Sized>(
        &mut self,
        event: &InputEvent,
        at: Instant,
        host: &mut H,
    ) -> Option<CaptureEvent> {
        if self.element_id.as_deref() != Some(event.element.as_str()) {
            return None;
        }

        let value = event.value.trim();
        if value.is_empty() {
            self.pending = None;
            self.last_change = None;
            return None;
        }

        // A value that grows slower than the inter-key gap is someone typing
        // into the focus trap, not a scanner.
        let previous = self.last_change.replace((value.to_string(), at));
        if let Some((prev, prev_at)) = previous {
            let grew = value.len() > prev.len() && value.starts_with(prev.as_str());
            if grew && at.saturating_duration_since(prev_at) > self.inter_key_gap {
                trace!(len = value.len(), "Hidden input typed at human pace, discarded");
                self.pending = None;
                host.clear_hidden_input();
                return None;
            }
        }

        if !is_all_digits(value) || value.len() > MAX_PLAUSIBLE_LEN {
            self.pending = None;
            host.clear_hidden_input();
            return None;
        }
        if value.len() == MAX_PLAUSIBLE_LEN {
            self.pending = None;
            host.clear_hidden_input();
            return Some(CaptureEvent::candidate(ChannelKind::HiddenInput, value, at));
        }

        self.pending = Some((value.to_string(), at));
        None
    }

    /// Settle timer: forward a value that stopped changing, then clear it.
    pub fn poll_settled<H: InputHost + ?Sized>(
        &mut self,
        now: Instant,
        host: &mut H,
    ) -> Option<CaptureEvent> {
        let (_, changed_at) = self.pending.as_ref()?;
        if now < *changed_at + self.settle {
            return None;
        }
        let (value, _) = self.pending.take()?;
        host.clear_hidden_input();
        is_plausible_barcode(&value)
            .then(|| CaptureEvent::candidate(ChannelKind::HiddenInput, value, now))
    }

    /// Refocus timer: pull focus back unless a real field has it.
    pub fn poll_refocus<H: InputHost + ?Sized>(&mut self, now: Instant, host: &mut H) {
        let Some(due) = self.next_refocus else {
            return;
        };
        if now < due {
            return;
        }
        self.next_refocus = Some(now + self.refocus_interval);
        self.reclaim_focus(host);
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        let settle = self.pending.as_ref().map(|(_, at)| *at + self.settle);
        earliest(settle, self.next_refocus)
    }
}

// ---------------------------------------------------------------------------
// Ambient input-event channel
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct AmbientInputChannel {
    /// Per element: plausible value waiting to settle, and when it last changed.
    pending: HashMap<String, (String, Instant)>,
    /// Per element: when it last produced a candidate.
    last_fired: HashMap<String, Instant>,
    settle: Duration,
    rearm: Duration,
}

impl AmbientInputChannel {
    pub fn new(config: &ScannerConfig) -> Self {
        Self {
            pending: HashMap::new(),
            last_fired: HashMap::new(),
            settle: config.idle_finalize(),
            rearm: config.ambient_rearm(),
        }
    }

    pub fn observe(&mut self, event: &InputEvent, at: Instant) -> Option<CaptureEvent> {
        self.forget_expired(at);
        if event.target == FocusTarget::HiddenInput {
            return None;
        }
        let value = event.value.trim();

        if value.len() == MAX_PLAUSIBLE_LEN && is_all_digits(value) {
            self.pending.remove(&event.element);
            return self.fire(&event.element, value.to_string(), at);
        }
        if is_plausible_barcode(value) {
            self.pending
                .insert(event.element.clone(), (value.to_string(), at));
        } else {
            self.pending.remove(&event.element);
        }
        None
    }

    fn fire(&mut self, element: &str, value: String, at: Instant) -> Option<CaptureEvent> {
        if let Some(last) = self.last_fired.get(element) {
            if at.saturating_duration_since(*last) < self.rearm {
                trace!(element = %element, "Ambient detection inside re-arm delay");
                return None;
            }
        }
        self.last_fired.insert(element.to_string(), at);
        Some(CaptureEvent::candidate(ChannelKind::AmbientInput, value, at))
    }

    /// Settle timer: forward values that stopped changing.
    pub fn poll_settled(&mut self, now: Instant) -> Vec<CaptureEvent> {
        let settle = self.settle;
        let due: Vec<String> = self
            .pending
            .iter()
            .filter(|(_, (_, changed))| now >= *changed + settle)
            .map(|(element, _)| element.clone())
            .collect();

        let mut out = Vec::new();
        for element in due {
            if let Some((value, _)) = self.pending.remove(&element) {
                if let Some(event) = self.fire(&element, value, now) {
                    out.push(event);
                }
            }
        }

        self.forget_expired(now);
        out
    }

    /// Drop re-arm stamps that no longer suppress anything.
    fn forget_expired(&mut self, now: Instant) {
        let rearm = self.rearm;
        self.last_fired
            .retain(|_, fired| now.saturating_duration_since(*fired) < rearm);
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending
            .values()
            .map(|(_, changed)| *changed + self.settle)
            .min()
    }

    pub fn reset(&mut self) {
        self.pending.clear();
        self.last_fired.clear();
    }
}

pub(crate) fn earliest(a: Option<Instant>, b: Option<Instant>) -> Option<Instant> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, None) => a,
        (None, b) => b,
    }
}

// ===========================================================================
// Tests
// ===========================================================================
