//! Scanner service: one owned instance of the whole detection pipeline.
//!
//! raw host event → channel → timing classifier → validator → cooldown gate →
//! listeners
//!
//! Single-threaded by construction: every method takes `&mut self` and the
//! current time, runs to completion, and returns. Timers are deadlines the
//! driver polls through [`ScannerService::tick`]; [`ScannerService::next_deadline`]
//! says when the next one is due. The tokio driver in [`crate::runtime`] is
//! one such driver; tests drive it by hand with synthetic `Instant`s.

use std::collections::BTreeMap;
use std::time::Instant;
use tracing::{debug, info, trace};

use crate::capture::{
    earliest, AmbientInputChannel, CaptureEvent, CapturePayload, ChannelKind, HiddenInputChannel,
    HostEvent, InputHost, KeyChannel, PasteChannel,
};
use crate::classifier::{KeyOutcome, TimingClassifier};
use crate::config::ScannerConfig;
use crate::dedup::{CooldownGate, DetectionResult};
use crate::diagnostics::ScannerSnapshot;
use crate::listeners::{ListenerId, ListenerRegistry, ScanListener};
use crate::symbology::{self, ValidationPolicy};

pub struct ScannerService<H: InputHost> {
    config: ScannerConfig,
    policy: ValidationPolicy,
    host: H,
    active: bool,
    attached: Vec<ChannelKind>,

    key_channel: KeyChannel,
    paste_channel: PasteChannel,
    hidden_channel: HiddenInputChannel,
    ambient_channel: AmbientInputChannel,
    /// Per-channel keystroke buffers (key events and injected keys).
    classifiers: BTreeMap<ChannelKind, TimingClassifier>,

    gate: CooldownGate,
    listeners: ListenerRegistry,
    last_scan: Option<DetectionResult>,
}

impl<H: InputHost> ScannerService<H> {
    pub fn new(config: ScannerConfig, host: H) -> Self {
        let classifiers = [ChannelKind::KeyEvent, ChannelKind::Injected]
            .into_iter()
            .map(|kind| (kind, TimingClassifier::new(&config)))
            .collect();

        Self {
            policy: ValidationPolicy {
                verify_ean8_checksum: config.verify_ean8_checksum,
            },
            key_channel: KeyChannel,
            paste_channel: PasteChannel,
            hidden_channel: HiddenInputChannel::new(&config),
            ambient_channel: AmbientInputChannel::new(&config),
            classifiers,
            gate: CooldownGate::new(config.cooldown()),
            listeners: ListenerRegistry::new(),
            last_scan: None,
            active: false,
            attached: Vec::new(),
            host,
            config,
        }
    }

    pub fn config(&self) -> &ScannerConfig {
        &self.config
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn host_mut(&mut self) -> &mut H {
        &mut self.host
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    // -----------------------------------------------------------------------
    // Start / stop
    // -----------------------------------------------------------------------

    /// Attach the enabled channels. No-op when already listening.
    pub fn start_listening(&mut self, now: Instant) {
        if self.active {
            return;
        }

        for kind in ChannelKind::HOST_CHANNELS {
            if !self.channel_enabled(kind) {
                continue;
            }
            self.host.attach(kind);
            self.attached.push(kind);
            if kind == ChannelKind::HiddenInput {
                self.hidden_channel.attach(&mut self.host, now);
            }
        }

        self.active = true;
        info!(channels = ?self.attached, "Barcode scan listening started");
    }

    /// Detach every channel, cancel timers, and drop in-progress buffers
    /// without finalizing them. Listeners stay registered.
    pub fn stop_listening(&mut self) {
        if !self.active {
            return;
        }

        for classifier in self.classifiers.values_mut() {
            classifier.reset();
        }
        self.ambient_channel.reset();
        self.hidden_channel.detach(&mut self.host);
        for kind in self.attached.drain(..) {
            self.host.detach(kind);
        }

        self.active = false;
        info!("Barcode scan listening stopped");
    }

    // -----------------------------------------------------------------------
    // Events and timers
    // -----------------------------------------------------------------------

    /// Route one raw host event through its channel.
    pub fn handle_event(&mut self, event: &HostEvent, now: Instant) {
        if !self.active {
            return;
        }
        match event {
            HostEvent::KeyDown(key) if self.is_attached(ChannelKind::KeyEvent) => {
                if let Some(capture) = self.key_channel.observe(key, now) {
                    self.process(capture);
                }
            }
            HostEvent::Paste(paste) if self.is_attached(ChannelKind::Paste) => {
                if let Some(capture) = self.paste_channel.observe(paste, now) {
                    self.process(capture);
                }
            }
            HostEvent::Input(input) => {
                let hidden = self.hidden_channel.element_id() == Some(input.element.as_str());
                let capture = if hidden {
                    self.hidden_channel.observe(input, now, &mut self.host)
                } else if self.is_attached(ChannelKind::AmbientInput) {
                    self.ambient_channel.observe(input, now)
                } else {
                    None
                };
                if let Some(capture) = capture {
                    self.process(capture);
                }
            }
            HostEvent::SerialLine { line } => {
                let value = line.trim();
                if symbology::is_plausible_barcode(value) {
                    self.process(CaptureEvent::candidate(ChannelKind::Serial, value, now));
                } else {
                    trace!(len = value.len(), "Serial line ignored");
                }
            }
            _ => {}
        }
    }

    /// Fire every timer whose deadline is at or before `now`.
    pub fn tick(&mut self, now: Instant) {
        let kinds: Vec<ChannelKind> = self.classifiers.keys().copied().collect();
        for kind in kinds {
            let finalized = self
                .classifiers
                .get_mut(&kind)
                .and_then(|c| c.poll_idle(now));
            if let Some(candidate) = finalized {
                self.evaluate(kind, candidate, now);
            }
        }

        if !self.active {
            return;
        }

        if let Some(capture) = self.hidden_channel.poll_settled(now, &mut self.host) {
            self.process(capture);
        }
        self.hidden_channel.poll_refocus(now, &mut self.host);

        for capture in self.ambient_channel.poll_settled(now) {
            self.process(capture);
        }
    }

    /// Earliest pending timer, if any.
    pub fn next_deadline(&self) -> Option<Instant> {
        let mut next = self
            .classifiers
            .values()
            .filter_map(TimingClassifier::idle_deadline)
            .min();
        if self.active {
            next = earliest(next, self.hidden_channel.next_deadline());
            next = earliest(next, self.ambient_channel.next_deadline());
        }
        next
    }

    fn channel_enabled(&self, kind: ChannelKind) -> bool {
        match kind {
            ChannelKind::KeyEvent => self.config.key_channel_enabled,
            ChannelKind::Paste => self.config.paste_channel_enabled,
            ChannelKind::HiddenInput => self.config.hidden_input_channel_enabled,
            ChannelKind::AmbientInput => self.config.ambient_input_channel_enabled,
            ChannelKind::Serial | ChannelKind::Injected => false,
        }
    }

    fn is_attached(&self, kind: ChannelKind) -> bool {
        self.attached.contains(&kind)
    }

    fn process(&mut self, capture: CaptureEvent) {
        let CaptureEvent {
            channel,
            at,
            payload,
        } = capture;

        let finalized = match payload {
            CapturePayload::Candidate(value) => Some(value),
            CapturePayload::Terminator => self
                .classifiers
                .get_mut(&channel)
                .and_then(TimingClassifier::terminate),
            CapturePayload::Char(ch) => match self.classifiers.get_mut(&channel) {
                Some(classifier) => match classifier.push(ch, at) {
                    KeyOutcome::Finalized(value) => Some(value),
                    KeyOutcome::Overflow => {
                        debug!(channel = %channel, "Scan buffer overflow, discarded");
                        None
                    }
                    KeyOutcome::Buffering | KeyOutcome::Restarted { .. } => None,
                },
                None => None,
            },
        };

        if let Some(candidate) = finalized {
            self.evaluate(channel, candidate, at);
        }
    }

    /// Validate, dedup, and notify.
    fn evaluate(&mut self, channel: ChannelKind, candidate: String, at: Instant) {
        let Some(symbology) = symbology::classify(&candidate, self.policy) else {
            trace!(channel = %channel, candidate = %candidate, "Candidate rejected as noise");
            return;
        };

        let result = DetectionResult {
            value: candidate,
            symbology,
            channel,
            accepted_at: at,
            accepted_at_utc: chrono::Utc::now(),
        };
        if !self.gate.admit(&result) {
            return;
        }

        info!(
            barcode = %result.value,
            symbology = %result.symbology,
            channel = %result.channel,
            "Barcode scanned"
        );
        let delivered = self.listeners.notify(&result);
        debug!(delivered, total = self.listeners.len(), "Scan listeners notified");
        self.last_scan = Some(result);
    }

    // -----------------------------------------------------------------------
    // Diagnostics / manual injection
    // -----------------------------------------------------------------------

    /// Push a whole value into the pipeline as if it had been scanned.
    pub fn inject(&mut self, value: &str, now: Instant) {
        debug!(value = %value, "Injected scan");
        self.process(CaptureEvent::candidate(
            ChannelKind::Injected,
            value.trim(),
            now,
        ));
    }

    /// Push one keystroke through the timing classifier, bypassing capture.
    pub fn inject_key(&mut self, ch: char, now: Instant) {
        self.process(CaptureEvent {
            channel: ChannelKind::Injected,
            at: now,
            payload: CapturePayload::Char(ch),
        });
    }

    /// Finalize every non-empty buffer now, regardless of timing.
    pub fn force_finalize(&mut self, now: Instant) {
        let kinds: Vec<ChannelKind> = self.classifiers.keys().copied().collect();
        for kind in kinds {
            let taken = self
                .classifiers
                .get_mut(&kind)
                .and_then(TimingClassifier::force_finalize);
            if let Some(candidate) = taken {
                self.evaluate(kind, candidate, now);
            }
        }
    }

    pub fn snapshot(&self) -> ScannerSnapshot {
        let current_buffer = self
            .classifiers
            .values()
            .map(|c| c.buffer().as_str())
            .find(|s| !s.is_empty())
            .unwrap_or_default()
            .to_string();

        ScannerSnapshot {
            current_buffer,
            is_active: self.active,
            last_scan: self.last_scan.as_ref().map(|r| r.value.clone()),
            attached_channels: self.attached.clone(),
        }
    }

    // -----------------------------------------------------------------------
    // Listeners
    // -----------------------------------------------------------------------

    pub fn add_scan_listener<F>(&mut self, callback: F) -> ListenerId
    where
        F: Fn(&DetectionResult) + Send + Sync + 'static,
    {
        self.listeners.subscribe(callback)
    }

    pub fn add_shared_listener(&mut self, callback: ScanListener) -> ListenerId {
        self.listeners.subscribe_arc(callback)
    }

    pub fn remove_scan_listener(&mut self, id: ListenerId) -> bool {
        self.listeners.unsubscribe(id)
    }

    pub fn remove_shared_listener(&mut self, callback: &ScanListener) -> bool {
        self.listeners.unsubscribe_arc(callback)
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }
}

impl<H: InputHost> Drop for ScannerService<H> {
    fn drop(&mut self) {
        self.stop_listening();
    }
}

// ===========================================================================
// Tests
// ===========================================================================
