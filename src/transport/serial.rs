//! Serial port transport over the `serialport` crate.
//!
//! The blocking driver is bridged into the async engine by two dedicated
//! threads: a reader that forwards device bytes as [`TransportEvent::Data`]
//! and a writer that executes [`WriteCommand`]s (a flush is the drain
//! signal). Read timeouts are idle ticks; real errors end the link with
//! [`TransportEvent::Closed`].

use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use bytes::Bytes;
use serialport::{DataBits, FlowControl, Parity, SerialPortInfo, SerialPortType, StopBits};
use tokio::sync::mpsc;

use super::{Transport, TransportEvent, TransportLink, TransportWriter, WriteCommand};
use crate::error::Result;

/// Default baud rate for newly created transports.
pub const DEFAULT_BAUD_RATE: u32 = 115_200;

/// Blocking read timeout; doubles as the stop-flag poll interval.
const READ_TIMEOUT: Duration = Duration::from_millis(50);

const READ_BUFFER_SIZE: usize = 4096;
const EVENT_CHANNEL_CAPACITY: usize = 64;
const WRITE_CHANNEL_CAPACITY: usize = 8;

/// Information about an available serial port.
#[derive(Debug, Clone)]
pub struct PortInfo {
    /// Port name (e.g., "/dev/ttyUSB0" or "COM3").
    pub name: String,
    /// USB vendor ID (if USB device).
    pub vid: Option<u16>,
    /// USB product ID (if USB device).
    pub pid: Option<u16>,
    /// Manufacturer name (if available).
    pub manufacturer: Option<String>,
    /// Product name (if available).
    pub product: Option<String>,
    /// Serial number (if available).
    pub serial_number: Option<String>,
}

impl From<SerialPortInfo> for PortInfo {
    fn from(info: SerialPortInfo) -> Self {
        let (vid, pid, manufacturer, product, serial_number) = match info.port_type {
            SerialPortType::UsbPort(usb) => (
                Some(usb.vid),
                Some(usb.pid),
                usb.manufacturer,
                usb.product,
                usb.serial_number,
            ),
            _ => (None, None, None, None, None),
        };

        Self {
            name: info.port_name,
            vid,
            pid,
            manufacturer,
            product,
            serial_number,
        }
    }
}

/// List the serial ports available on this machine.
pub fn list_ports() -> Vec<PortInfo> {
    serialport::available_ports()
        .unwrap_or_default()
        .into_iter()
        .map(PortInfo::from)
        .collect()
}

/// Transport over a UART device opened by path.
///
/// Ports are opened 8N1 with no flow control. Reconnecting is supported:
/// each `connect` stops the previous link's threads and opens the device
/// again.
pub struct SerialPortTransport {
    path: String,
    baud_rate: u32,
    stop: Option<Arc<AtomicBool>>,
}

impl SerialPortTransport {
    /// Create a transport for the device at `path`.
    pub fn new(path: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            path: path.into(),
            baud_rate,
            stop: None,
        }
    }

    /// The device path this transport opens.
    pub fn path(&self) -> &str {
        &self.path
    }
}

impl Transport for SerialPortTransport {
    fn connect(&mut self) -> Result<TransportLink> {
        self.disconnect();

        let port = serialport::new(self.path.as_str(), self.baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .timeout(READ_TIMEOUT)
            .open()?;
        let write_port = port.try_clone()?;

        tracing::debug!(path = %self.path, baud = self.baud_rate, "serial port opened");

        let stop = Arc::new(AtomicBool::new(false));
        let (event_tx, events) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let (cmd_tx, cmd_rx) = mpsc::channel(WRITE_CHANNEL_CAPACITY);

        thread::spawn({
            let event_tx = event_tx.clone();
            let stop = Arc::clone(&stop);
            move || read_loop(port, event_tx, stop)
        });
        thread::spawn(move || write_loop(write_port, cmd_rx, event_tx));

        self.stop = Some(stop);
        Ok(TransportLink {
            events,
            writer: TransportWriter::new(cmd_tx),
        })
    }

    fn disconnect(&mut self) {
        if let Some(stop) = self.stop.take() {
            stop.store(true, Ordering::Release);
        }
    }
}

/// Reader thread: forward device bytes until stopped or failed.
fn read_loop(
    mut port: Box<dyn serialport::SerialPort>,
    events: mpsc::Sender<TransportEvent>,
    stop: Arc<AtomicBool>,
) {
    let mut buffer = [0u8; READ_BUFFER_SIZE];
    loop {
        if stop.load(Ordering::Acquire) {
            let _ = events.blocking_send(TransportEvent::Closed(None));
            return;
        }

        match port.read(&mut buffer) {
            Ok(0) => continue,
            Ok(n) => {
                let chunk = Bytes::copy_from_slice(&buffer[..n]);
                if events.blocking_send(TransportEvent::Data(chunk)).is_err() {
                    // Nobody is listening anymore.
                    return;
                }
            }
            Err(e) if e.kind() == io::ErrorKind::TimedOut => continue,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                tracing::warn!(error = %e, "serial read failed");
                let _ = events.blocking_send(TransportEvent::Closed(Some(e)));
                return;
            }
        }
    }
}

/// Writer thread: execute write/drain commands until the handle is dropped.
fn write_loop(
    mut port: Box<dyn serialport::SerialPort>,
    mut commands: mpsc::Receiver<WriteCommand>,
    events: mpsc::Sender<TransportEvent>,
) {
    while let Some(command) = commands.blocking_recv() {
        match command {
            WriteCommand::Write(bytes, ack) => {
                let result = port.write_all(&bytes);
                if let Err(e) = &result {
                    tracing::warn!(error = %e, "serial write failed");
                    let _ = events.try_send(TransportEvent::Error(io::Error::new(
                        e.kind(),
                        e.to_string(),
                    )));
                }
                let _ = ack.send(result);
            }
            WriteCommand::Drain(ack) => {
                let result = port.flush();
                if result.is_ok() {
                    let _ = events.try_send(TransportEvent::Drain);
                }
                let _ = ack.send(result);
            }
        }
    }
}
