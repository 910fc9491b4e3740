//! Serial barcode scanner driver for COM port scanners.
//!
//! Produces the raw scan strings the reconciliation session consumes.
//! Keyboard-wedge scanners are handled by the frontend; this module covers
//! scanners connected via serial/COM port.
//!
//! Key design goals:
//! - **Background reader**: blocking tokio task reads the port and delivers
//!   [`ScanEvent`]s over an mpsc channel
//! - **Newline framing**: barcodes arrive `\r\n`/`\n`-terminated; partial
//!   reads accumulate until a full line is seen
//! - **Auto-retry**: on read failure, retries after a short backoff
//!
//! Note the session applies its own same-barcode debounce on top of this;
//! the driver forwards every framed line it sees.

use chrono::Utc;
use serde_json::Value;
use std::io::Read;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Shortest barcode accepted from the wire.
const MIN_BARCODE_LEN: usize = 3;
/// Longest barcode accepted from the wire.
const MAX_BARCODE_LEN: usize = 50;
/// Cap on the accumulation buffer for ports that never send a newline.
const MAX_LINE_BUF: usize = 512;

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

static SCANNER_RUNNING: AtomicBool = AtomicBool::new(false);
static SCANNER_PORT: Mutex<Option<String>> = Mutex::new(None);
static LAST_SCAN: Mutex<Option<String>> = Mutex::new(None);

/// One decoded barcode from the serial scanner.
#[derive(Debug, Clone)]
pub struct ScanEvent {
    pub barcode: String,
    pub source: &'static str,
    /// RFC-3339 UTC time the line was framed.
    pub timestamp: String,
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// List available serial/COM ports on this system.
pub fn list_ports() -> Result<Value, String> {
    let ports = serialport::available_ports().map_err(|e| format!("Failed to list ports: {e}"))?;

    let list: Vec<Value> = ports
        .iter()
        .map(|p| {
            let mut obj = serde_json::json!({
                "name": p.port_name,
            });
            match &p.port_type {
                serialport::SerialPortType::UsbPort(usb) => {
                    obj["portType"] = "usb".into();
                    obj["vid"] = usb.vid.into();
                    obj["pid"] = usb.pid.into();
                    if let Some(ref m) = usb.manufacturer {
                        obj["manufacturer"] = m.clone().into();
                    }
                    if let Some(ref p) = usb.product {
                        obj["product"] = p.clone().into();
                    }
                }
                serialport::SerialPortType::BluetoothPort => {
                    obj["portType"] = "bluetooth".into();
                }
                serialport::SerialPortType::PciPort => {
                    obj["portType"] = "pci".into();
                }
                serialport::SerialPortType::Unknown => {
                    obj["portType"] = "unknown".into();
                }
            }
            obj
        })
        .collect();

    Ok(serde_json::json!({
        "success": true,
        "ports": list,
    }))
}

/// Start the serial barcode scanner background reader.
///
/// Opens the COM port and spawns a blocking task that reads
/// newline-terminated barcodes and delivers them on the returned channel.
/// The reader stops when [`stop`] is called or the receiver is dropped.
pub fn start(port: &str, baud_rate: u32) -> Result<mpsc::Receiver<ScanEvent>, String> {
    if SCANNER_RUNNING.load(Ordering::SeqCst) {
        return Err("Serial scanner already running — stop first".to_string());
    }

    let mut serial = serialport::new(port, baud_rate)
        .timeout(Duration::from_millis(200))
        .open()
        .map_err(|e| format!("Failed to open {port} @ {baud_rate}: {e}"))?;

    {
        let mut p = SCANNER_PORT.lock().unwrap_or_else(|e| e.into_inner());
        *p = Some(port.to_string());
    }
    SCANNER_RUNNING.store(true, Ordering::SeqCst);

    let (tx, rx) = mpsc::channel::<ScanEvent>(32);
    let port_name = port.to_string();

    tokio::task::spawn_blocking(move || {
        info!(port = %port_name, baud = baud_rate, "Serial scanner background reader started");
        let mut line_buf = String::new();
        let mut read_buf = [0u8; 256];

        'outer: while SCANNER_RUNNING.load(Ordering::SeqCst) {
            match serial.read(&mut read_buf) {
                Ok(n) if n > 0 => {
                    let chunk = String::from_utf8_lossy(&read_buf[..n]).to_string();
                    for barcode in frame_lines(&mut line_buf, &chunk) {
                        info!(barcode = %barcode, "Serial scanner: barcode detected");

                        if let Ok(mut ls) = LAST_SCAN.lock() {
                            *ls = Some(barcode.clone());
                        }

                        let event = ScanEvent {
                            barcode,
                            source: "serial",
                            timestamp: Utc::now().to_rfc3339(),
                        };
                        if tx.blocking_send(event).is_err() {
                            // Receiver gone; shut the reader down
                            SCANNER_RUNNING.store(false, Ordering::SeqCst);
                            break 'outer;
                        }
                    }
                }
                Ok(_) => {}
                Err(ref e) if e.kind() == std::io::ErrorKind::TimedOut => {}
                Err(e) => {
                    warn!(error = %e, "Serial scanner read error");
                    // Brief backoff before retry
                    std::thread::sleep(Duration::from_secs(1));
                }
            }

            std::thread::sleep(Duration::from_millis(50));
        }

        info!(port = %port_name, "Serial scanner background reader stopped");
    });

    Ok(rx)
}

/// Stop the serial barcode scanner.
pub fn stop() -> Result<Value, String> {
    if !SCANNER_RUNNING.load(Ordering::SeqCst) {
        return Ok(serde_json::json!({
            "success": true,
            "message": "Scanner was not running",
        }));
    }

    SCANNER_RUNNING.store(false, Ordering::SeqCst);
    info!("Serial scanner stopped");
    Ok(serde_json::json!({ "success": true }))
}

/// Get the serial scanner status.
pub fn get_status() -> Result<Value, String> {
    let running = SCANNER_RUNNING.load(Ordering::SeqCst);
    let port = SCANNER_PORT
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .clone();
    let last = LAST_SCAN.lock().unwrap_or_else(|e| e.into_inner()).clone();

    Ok(serde_json::json!({
        "connected": running,
        "port": port,
        "lastScan": last,
    }))
}

// ---------------------------------------------------------------------------
// Framing
// ---------------------------------------------------------------------------

/// Append `chunk` to the accumulation buffer and return every complete,
/// length-sane barcode line it now contains.
fn frame_lines(line_buf: &mut String, chunk: &str) -> Vec<String> {
    let mut barcodes = Vec::new();
    line_buf.push_str(chunk);

    while let Some(pos) = line_buf.find('\n') {
        let barcode = line_buf[..pos].trim().to_string();
        *line_buf = line_buf[pos + 1..].to_string();

        if barcode.len() >= MIN_BARCODE_LEN && barcode.len() <= MAX_BARCODE_LEN {
            barcodes.push(barcode);
        }
    }

    // Prevent unbounded growth
    if line_buf.len() > MAX_LINE_BUF {
        line_buf.clear();
    }

    barcodes
}

// ===========================================================================
// Tests
// ===========================================================================
