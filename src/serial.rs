//! Serial barcode scanner channel.
//!
//! Complements the keyboard-wedge channels for scanners attached over a
//! COM/tty port. A blocking reader assembles newline-terminated lines and
//! forwards each one to the scanner task as a [`HostEvent::SerialLine`];
//! validation and cooldown happen there, same as every other channel.
//!
//! On a read error the reader backs off and retries rather than giving up.

use serde::{Deserialize, Serialize};
use std::io::Read;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::capture::HostEvent;
use crate::config::ScannerConfig;
use crate::error::Result;
use crate::runtime::ScannerHandle;

/// Port read timeout. Bounds how long a stop request waits for the reader.
pub const READ_TIMEOUT: Duration = Duration::from_millis(200);

/// Partial-line bytes kept before the assembler gives up on a line.
pub const MAX_LINE_BUFFER: usize = 512;

const ERROR_BACKOFF: Duration = Duration::from_secs(1);

// ---------------------------------------------------------------------------
// Port enumeration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SerialPortSummary {
    pub name: String,
    pub port_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vid: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub manufacturer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub product: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub serial_number: Option<String>,
}

impl From<serialport::SerialPortInfo> for SerialPortSummary {
    fn from(info: serialport::SerialPortInfo) -> Self {
        let mut summary = SerialPortSummary {
            name: info.port_name,
            port_type: String::new(),
            vid: None,
            pid: None,
            manufacturer: None,
            product: None,
            serial_number: None,
        };
        summary.port_type = match info.port_type {
            serialport::SerialPortType::UsbPort(usb) => {
                summary.vid = Some(usb.vid);
                summary.pid = Some(usb.pid);
                summary.manufacturer = usb.manufacturer;
                summary.product = usb.product;
                summary.serial_number = usb.serial_number;
                "usb"
            }
            serialport::SerialPortType::BluetoothPort => "bluetooth",
            serialport::SerialPortType::PciPort => "pci",
            serialport::SerialPortType::Unknown => "unknown",
        }
        .to_string();
        summary
    }
}

/// List serial/COM ports on this system.
pub fn list_ports() -> Result<Vec<SerialPortSummary>> {
    let ports = serialport::available_ports()?;
    Ok(ports.into_iter().map(SerialPortSummary::from).collect())
}

// ---------------------------------------------------------------------------
// Line assembly
// ---------------------------------------------------------------------------

/// Splits a byte stream into trimmed lines. Scanners end each code with
/// `\n` or `\r\n`.
#[derive(Debug, Default)]
pub struct LineAssembler {
    buf: String,
}

impl LineAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk and return every line it completed. Blank lines are
    /// dropped.
    pub fn push(&mut self, chunk: &str) -> Vec<String> {
        self.buf.push_str(chunk);

        let mut lines = Vec::new();
        while let Some(pos) = self.buf.find('\n') {
            let line = self.buf[..pos].trim().to_string();
            self.buf.drain(..=pos);
            if !line.is_empty() {
                lines.push(line);
            }
        }

        // A terminator that never arrives must not grow the buffer forever.
        if self.buf.len() > MAX_LINE_BUFFER {
            warn!(len = self.buf.len(), "Serial line buffer overflow, discarded");
            self.buf.clear();
        }
        lines
    }

    pub fn pending(&self) -> &str {
        &self.buf
    }
}

// ---------------------------------------------------------------------------
// Reader loop
// ---------------------------------------------------------------------------

/// Read `reader` until EOF, cancellation, or `sink` returning `false`.
///
/// Timeouts are treated as "no data yet". Other errors back off for a second
/// and retry. Blocking: run it on a dedicated thread.
pub fn run_reader<R, F>(mut reader: R, cancel: &CancellationToken, mut sink: F)
where
    R: Read,
    F: FnMut(String) -> bool,
{
    let mut assembler = LineAssembler::new();
    let mut buf = [0u8; 256];

    while !cancel.is_cancelled() {
        match reader.read(&mut buf) {
            Ok(0) => {
                debug!("Serial reader reached end of stream");
                return;
            }
            Ok(n) => {
                let text = String::from_utf8_lossy(&buf[..n]);
                for line in assembler.push(&text) {
                    debug!(line = %line, "Serial line received");
                    if !sink(line) {
                        return;
                    }
                }
            }
            Err(ref e) if e.kind() == std::io::ErrorKind::TimedOut => continue,
            Err(ref e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => {
                warn!(error = %e, "Serial scanner read error");
                std::thread::sleep(ERROR_BACKOFF);
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Background scanner
// ---------------------------------------------------------------------------

/// A running serial reader bound to a scanner task.
pub struct SerialScanner {
    port: String,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl SerialScanner {
    /// Open `port` and forward its lines to `handle`.
    ///
    /// The reader stops on [`SerialScanner::stop`], when the scanner task
    /// shuts down, or when its queue closes.
    pub fn start(port: &str, baud_rate: u32, handle: ScannerHandle) -> Result<Self> {
        let reader = serialport::new(port, baud_rate)
            .timeout(READ_TIMEOUT)
            .open()?;

        let cancel = handle.child_token();
        let token = cancel.clone();
        let port_name = port.to_string();
        let task = tokio::task::spawn_blocking(move || {
            info!(port = %port_name, "Serial scanner background reader started");
            run_reader(reader, &token, |line| {
                handle
                    .blocking_send_event(HostEvent::SerialLine { line })
                    .is_ok()
            });
            info!(port = %port_name, "Serial scanner background reader stopped");
        });

        info!(port = port, baud = baud_rate, "Serial scanner opened");
        Ok(Self {
            port: port.to_string(),
            cancel,
            task,
        })
    }

    /// Start the reader configured in `config`, if any.
    pub fn from_config(config: &ScannerConfig, handle: ScannerHandle) -> Result<Option<Self>> {
        match config.serial_port.as_deref() {
            Some(port) if !port.trim().is_empty() => {
                Self::start(port.trim(), config.serial_baud_rate, handle).map(Some)
            }
            _ => Ok(None),
        }
    }

    /// Stop reading and wait for the port to close.
    pub async fn stop(self) {
        self.cancel.cancel();
        if let Err(e) = self.task.await {
            warn!(port = %self.port, error = %e, "Serial reader task failed");
        }
        info!(port = %self.port, "Serial scanner stopped");
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_list_ports_does_not_fail() {
        // May be empty on CI, but enumeration itself should work.
        let _ = list_ports();
    }

    fn spawn_scanner(rt: &tokio::runtime::Runtime) -> ScannerHandle {
        let _guard = rt.enter();
        let service = crate::service::ScannerService::new(
            ScannerConfig::default(),
            crate::capture::NullHost,
        );
        crate::runtime::spawn(service).0
    }

    #[test]
    fn test_open_nonexistent_port_fails() {
        let rt = tokio::runtime::Runtime::new().unwrap();
        let handle = spawn_scanner(&rt);
        let _guard = rt.enter();
        assert!(SerialScanner::start("/dev/does-not-exist-999", 9600, handle).is_err());
    }

    #[test]
    fn test_from_config_without_port_starts_nothing() {
        let rt = tokio::runtime::Runtime::new().unwrap();
        let handle = spawn_scanner(&rt);
        let _guard = rt.enter();

        let none = ScannerConfig::default();
        assert!(SerialScanner::from_config(&none, handle.clone())
            .unwrap()
            .is_none());

        let blank = ScannerConfig {
            serial_port: Some("   ".into()),
            ..ScannerConfig::default()
        };
        assert!(SerialScanner::from_config(&blank, handle.clone())
            .unwrap()
            .is_none());

        let missing = ScannerConfig {
            serial_port: Some("/dev/does-not-exist-999".into()),
            ..ScannerConfig::default()
        };
        assert!(SerialScanner::from_config(&missing, handle).is_err());
    }

    #[test]
    fn test_assembler_splits_crlf_lines_across_chunks() {
        let mut a = LineAssembler::new();
        assert!(a.push("400638").is_empty());
        assert_eq!(a.push("1333931\r\n9638"), vec!["4006381333931"]);
        assert_eq!(a.pending(), "9638");
        assert_eq!(a.push("5074\n\r\n"), vec!["96385074"]);
        assert!(a.pending().is_empty());
    }

    #[test]
    fn test_assembler_discards_runaway_line() {
        let mut a = LineAssembler::new();
        let junk = "9".repeat(MAX_LINE_BUFFER + 1);
        assert!(a.push(&junk).is_empty());
        assert!(a.pending().is_empty());
        assert_eq!(a.push("96385074\n"), vec!["96385074"]);
    }

    #[test]
    fn test_reader_forwards_lines_until_eof() {
        let input = Cursor::new(b"4006381333931\r\n96385074\n".to_vec());
        let mut lines = Vec::new();
        run_reader(input, &CancellationToken::new(), |l| {
            lines.push(l);
            true
        });
        assert_eq!(lines, vec!["4006381333931", "96385074"]);
    }

    #[test]
    fn test_reader_stops_when_sink_closes() {
        let input = Cursor::new(b"4006381333931\n96385074\n".to_vec());
        let mut lines = Vec::new();
        run_reader(input, &CancellationToken::new(), |l| {
            lines.push(l);
            false
        });
        assert_eq!(lines.len(), 1);
    }

    #[test]
    fn test_reader_honours_cancellation() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let mut called = false;
        run_reader(Cursor::new(b"4006381333931\n".to_vec()), &cancel, |_| {
            called = true;
            true
        });
        assert!(!called);
    }

    #[test]
    fn test_summary_serializes_camel_case() {
        let s = SerialPortSummary {
            name: "/dev/ttyUSB0".into(),
            port_type: "usb".into(),
            vid: Some(0x05e0),
            pid: Some(0x1200),
            manufacturer: None,
            product: None,
            serial_number: Some("S123".into()),
        };
        let v = serde_json::to_value(&s).unwrap();
        assert_eq!(v["portType"], "usb");
        assert_eq!(v["serialNumber"], "S123");
        assert!(v.get("manufacturer").is_none());
    }
}
