//! Keyboard-wedge barcode scan detection.
//!
//! Hand-held scanners present themselves as keyboards: a scan arrives as a
//! burst of keystrokes, a paste, or a value dropped into whatever text field
//! has focus. This crate tells those bursts apart from human typing, validates
//! them as EAN-13 / EAN-8 / UPC-A, suppresses duplicates seen through several
//! channels at once, and hands each accepted code to registered listeners.
//! It also generates and renders internal EAN-13 codes for labelling.
//!
//! The entry point is [`ScannerService`]; wrap it with [`runtime::spawn`] to
//! drive it from tokio.

pub mod capture;
pub mod classifier;
pub mod codec;
pub mod config;
pub mod dedup;
pub mod diagnostics;
pub mod error;
pub mod listeners;
pub mod lookup;
pub mod runtime;
pub mod serial;
pub mod service;
pub mod symbology;

use anyhow::Context;
use std::path::Path;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub use capture::{ChannelKind, FocusTarget, HostEvent, InputHost, NullHost};
pub use codec::{format, generate_code, render, render_png_data_url, unformat, validate};
pub use config::ScannerConfig;
pub use dedup::DetectionResult;
pub use diagnostics::ScannerSnapshot;
pub use error::{Result, ScanError};
pub use listeners::{ListenerId, ScanListener};
pub use lookup::{resolve_scan, ProductCatalog, ScanLookup};
pub use runtime::ScannerHandle;
pub use service::ScannerService;
pub use symbology::Symbology;

/// Install the global tracing subscriber: console plus a daily rolling file
/// in `log_dir`. Old log files beyond [`diagnostics::MAX_LOG_FILES`] are
/// pruned first.
///
/// `RUST_LOG` overrides the default filter. Keep the returned guard alive for
/// as long as logs should be written; dropping it flushes the file writer.
pub fn init_logging(log_dir: &Path) -> anyhow::Result<WorkerGuard> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,scan_wedge_lib=debug"));

    diagnostics::prune_old_logs_in(log_dir, diagnostics::MAX_LOG_FILES);

    std::fs::create_dir_all(log_dir)
        .with_context(|| format!("creating log directory {}", log_dir.display()))?;

    let file_appender = tracing_appender::rolling::daily(log_dir, diagnostics::LOG_FILE_PREFIX);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let file_layer = fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_target(true);
    let console_layer = fmt::layer().with_target(true);
    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .context("installing tracing subscriber")?;

    info!("Starting scan-wedge v{}", env!("CARGO_PKG_VERSION"));
    Ok(guard)
}

/// [`init_logging`] into the platform default log directory.
pub fn init_default_logging() -> anyhow::Result<WorkerGuard> {
    init_logging(&diagnostics::get_log_dir())
}
