//! Transport module - the byte-oriented drivers underneath the engine.
//!
//! A [`Transport`] produces a [`TransportLink`] on connect: a stream of
//! [`TransportEvent`]s (inbound bytes, drain ticks, errors, close) plus a
//! [`TransportWriter`] handle whose `write` and `drain` complete when the
//! driver acknowledges them. Two implementations ship with the crate:
//!
//! - [`SerialPortTransport`] over a real UART device
//! - [`memory`] pairs for tests and demos

mod serial;

pub mod memory;

pub use serial::{list_ports, PortInfo, SerialPortTransport, DEFAULT_BAUD_RATE};

use std::io;

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};

use crate::error::Result;

/// Events emitted by a connected link, in arrival order.
#[derive(Debug)]
pub enum TransportEvent {
    /// Bytes read from the device. Chunk boundaries are arbitrary.
    Data(Bytes),
    /// All previously written bytes were flushed to the OS.
    Drain,
    /// A driver-level error that did not end the link.
    Error(io::Error),
    /// The link ended. `None` is an expected close, `Some` carries the
    /// failure. Always the final event.
    Closed(Option<io::Error>),
}

/// Commands accepted by a transport's write backend.
#[derive(Debug)]
pub enum WriteCommand {
    /// Write all the bytes, then acknowledge.
    Write(Bytes, oneshot::Sender<io::Result<()>>),
    /// Flush everything written so far, then acknowledge.
    Drain(oneshot::Sender<io::Result<()>>),
}

/// A live connection to the device.
#[derive(Debug)]
pub struct TransportLink {
    /// Inbound event stream; ends with [`TransportEvent::Closed`].
    pub events: mpsc::Receiver<TransportEvent>,
    /// Outbound write handle.
    pub writer: TransportWriter,
}

/// Handle for writing to a connected transport.
///
/// Cheaply cloneable; commands are acknowledged by the driver backend, so
/// a resolved `write` means the bytes were handed to the OS and a resolved
/// `drain` means they were flushed.
#[derive(Clone, Debug)]
pub struct TransportWriter {
    tx: mpsc::Sender<WriteCommand>,
}

impl TransportWriter {
    /// Wrap a command channel whose receiver is driven by a write backend.
    pub fn new(tx: mpsc::Sender<WriteCommand>) -> Self {
        Self { tx }
    }

    /// Write `bytes` to the device.
    pub async fn write(&self, bytes: Bytes) -> io::Result<()> {
        let (ack, acked) = oneshot::channel();
        self.tx
            .send(WriteCommand::Write(bytes, ack))
            .await
            .map_err(|_| link_down())?;
        acked.await.map_err(|_| link_down())?
    }

    /// Wait until everything written so far is flushed.
    pub async fn drain(&self) -> io::Result<()> {
        let (ack, acked) = oneshot::channel();
        self.tx
            .send(WriteCommand::Drain(ack))
            .await
            .map_err(|_| link_down())?;
        acked.await.map_err(|_| link_down())?
    }
}

fn link_down() -> io::Error {
    io::Error::new(io::ErrorKind::BrokenPipe, "transport link is down")
}

/// A byte-oriented device the engine can drive.
///
/// `connect` opens the device and hands back a live link; `disconnect`
/// tears the current link down, after which the link's event stream ends
/// with [`TransportEvent::Closed`]. Implementations must support repeated
/// connect/disconnect cycles where the device allows it.
pub trait Transport: Send {
    /// Open the device and return a live link.
    fn connect(&mut self) -> Result<TransportLink>;

    /// Tear down the current link, if any.
    fn disconnect(&mut self);
}
