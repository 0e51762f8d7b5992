//! Scanner timing thresholds and channel switches.
//!
//! Scanner hardware differs a lot in emission speed, so every threshold the
//! pipeline uses is a named field here instead of an inline constant. The
//! config can be built from defaults, deserialized from JSON, or read from a
//! flat terminal-settings blob with [`ScannerConfig::from_settings`].

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

use crate::error::{Result, ScanError};
use crate::symbology::MAX_PLAUSIBLE_LEN;

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

pub const DEFAULT_INTER_KEY_GAP_MS: u64 = 100;
pub const DEFAULT_IDLE_FINALIZE_MS: u64 = 500;
pub const DEFAULT_COOLDOWN_MS: u64 = 500;
pub const DEFAULT_REFOCUS_INTERVAL_MS: u64 = 500;
pub const DEFAULT_AMBIENT_REARM_MS: u64 = 300;
pub const DEFAULT_MIN_FALLBACK_LENGTH: usize = 8;
pub const DEFAULT_MAX_BUFFER_LENGTH: usize = 64;
pub const DEFAULT_SERIAL_BAUD_RATE: u32 = 9600;

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

/// Tunable configuration for a [`crate::ScannerService`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ScannerConfig {
    /// Maximum gap between two keystrokes of one scan. A longer gap means
    /// human-paced input and restarts the buffer.
    pub inter_key_gap_ms: u64,
    /// Silence after which an in-progress buffer is finalized (or dropped).
    pub idle_finalize_ms: u64,
    /// Window in which the same value is not delivered twice.
    pub cooldown_ms: u64,
    /// How often the hidden input reclaims focus from non-editable elements.
    pub refocus_interval_ms: u64,
    /// Minimum delay between two ambient detections on the same element.
    pub ambient_rearm_ms: u64,
    /// Shortest all-digit buffer the idle fallback will finalize.
    pub min_fallback_length: usize,
    /// Buffers growing past this are discarded as stuck-key noise.
    pub max_buffer_length: usize,
    /// Enforce the EAN-8 check digit. Off by default: EAN-8 is accepted on
    /// length alone unless a deployment opts in.
    pub verify_ean8_checksum: bool,

    pub key_channel_enabled: bool,
    pub paste_channel_enabled: bool,
    pub hidden_input_channel_enabled: bool,
    pub ambient_input_channel_enabled: bool,

    /// Serial port of a COM-attached scanner, if any.
    pub serial_port: Option<String>,
    pub serial_baud_rate: u32,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            inter_key_gap_ms: DEFAULT_INTER_KEY_GAP_MS,
            idle_finalize_ms: DEFAULT_IDLE_FINALIZE_MS,
            cooldown_ms: DEFAULT_COOLDOWN_MS,
            refocus_interval_ms: DEFAULT_REFOCUS_INTERVAL_MS,
            ambient_rearm_ms: DEFAULT_AMBIENT_REARM_MS,
            min_fallback_length: DEFAULT_MIN_FALLBACK_LENGTH,
            max_buffer_length: DEFAULT_MAX_BUFFER_LENGTH,
            verify_ean8_checksum: false,
            key_channel_enabled: true,
            paste_channel_enabled: true,
            hidden_input_channel_enabled: true,
            ambient_input_channel_enabled: true,
            serial_port: None,
            serial_baud_rate: DEFAULT_SERIAL_BAUD_RATE,
        }
    }
}

impl ScannerConfig {
    pub fn inter_key_gap(&self) -> Duration {
        Duration::from_millis(self.inter_key_gap_ms)
    }

    pub fn idle_finalize(&self) -> Duration {
        Duration::from_millis(self.idle_finalize_ms)
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }

    pub fn refocus_interval(&self) -> Duration {
        Duration::from_millis(self.refocus_interval_ms)
    }

    pub fn ambient_rearm(&self) -> Duration {
        Duration::from_millis(self.ambient_rearm_ms)
    }

    /// Reject settings that would make the classifier misbehave.
    pub fn validate(&self) -> Result<()> {
        if self.inter_key_gap_ms == 0 {
            return Err(ScanError::Config("interKeyGapMs must be > 0".into()));
        }
        if self.idle_finalize_ms <= self.inter_key_gap_ms {
            return Err(ScanError::Config(format!(
                "idleFinalizeMs ({}) must exceed interKeyGapMs ({})",
                self.idle_finalize_ms, self.inter_key_gap_ms
            )));
        }
        if self.refocus_interval_ms == 0 {
            return Err(ScanError::Config("refocusIntervalMs must be > 0".into()));
        }
        // A cap below the longest symbology would discard every EAN-13 burst.
        if self.max_buffer_length < MAX_PLAUSIBLE_LEN {
            return Err(ScanError::Config(format!(
                "maxBufferLength ({}) must be at least {MAX_PLAUSIBLE_LEN}",
                self.max_buffer_length
            )));
        }
        if self.min_fallback_length == 0 || self.min_fallback_length > self.max_buffer_length {
            return Err(ScanError::Config(format!(
                "minFallbackLength ({}) must be in 1..={}",
                self.min_fallback_length, self.max_buffer_length
            )));
        }
        if self.serial_baud_rate == 0 {
            return Err(ScanError::Config("serialBaudRate must be > 0".into()));
        }
        Ok(())
    }

    /// Build a config from a flat terminal-settings object.
    ///
    /// Each setting is looked up under its bare key (`scanner_cooldown_ms`)
    /// and under the `hardware.` namespace. Missing keys keep their default.
    pub fn from_settings(settings: &Value) -> Result<Self> {
        let mut cfg = Self::default();

        if let Some(v) = setting_u64(settings, "scanner_inter_key_gap_ms") {
            cfg.inter_key_gap_ms = v;
        }
        if let Some(v) = setting_u64(settings, "scanner_idle_finalize_ms") {
            cfg.idle_finalize_ms = v;
        }
        if let Some(v) = setting_u64(settings, "scanner_cooldown_ms") {
            cfg.cooldown_ms = v;
        }
        if let Some(v) = setting_u64(settings, "scanner_refocus_interval_ms") {
            cfg.refocus_interval_ms = v;
        }
        if let Some(v) = setting_u64(settings, "scanner_ambient_rearm_ms") {
            cfg.ambient_rearm_ms = v;
        }
        if let Some(v) = setting_u64(settings, "scanner_min_fallback_length") {
            cfg.min_fallback_length = v as usize;
        }
        if let Some(v) = setting_bool(settings, "scanner_verify_ean8_checksum") {
            cfg.verify_ean8_checksum = v;
        }
        if let Some(v) = setting_bool(settings, "scanner_hidden_input_enabled") {
            cfg.hidden_input_channel_enabled = v;
        }
        if let Some(v) = setting_bool(settings, "scanner_ambient_input_enabled") {
            cfg.ambient_input_channel_enabled = v;
        }

        // Serial scanner only when explicitly enabled with a port
        // (keyboard-wedge scanners don't need one).
        let serial_enabled = setting_bool(settings, "barcode_scanner_enabled").unwrap_or(false);
        if serial_enabled {
            cfg.serial_port = setting_str(settings, "barcode_scanner_port");
        }
        if let Some(v) = setting_u64(settings, "scanner_baud_rate") {
            cfg.serial_baud_rate = v as u32;
        }

        cfg.validate()?;
        Ok(cfg)
    }
}

// ---------------------------------------------------------------------------
// Settings lookup
// ---------------------------------------------------------------------------

fn lookup<'a>(settings: &'a Value, key: &str) -> Option<&'a Value> {
    settings
        .get(key)
        .or_else(|| settings.get(format!("hardware.{key}").as_str()))
        .filter(|v| !v.is_null())
}

fn setting_u64(settings: &Value, key: &str) -> Option<u64> {
    let v = lookup(settings, key)?;
    v.as_u64()
        .or_else(|| v.as_str().and_then(|s| s.trim().parse().ok()))
}

fn setting_bool(settings: &Value, key: &str) -> Option<bool> {
    let v = lookup(settings, key)?;
    v.as_bool().or_else(|| match v.as_str()?.trim() {
        "true" | "1" => Some(true),
        "false" | "0" => Some(false),
        _ => None,
    })
}

fn setting_str(settings: &Value, key: &str) -> Option<String> {
    lookup(settings, key)
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

// ===========================================================================
// Tests
// ===========================================================================
