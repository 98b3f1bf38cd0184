//! In-memory transport pairs.
//!
//! [`pair`] builds two connected transports where bytes written on one
//! side surface as [`TransportEvent::Data`] on the other, and drains
//! complete immediately. Lets callers wire two engines back to back
//! without hardware; the test suite is built on it.

use std::io;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::{Transport, TransportEvent, TransportLink, TransportWriter, WriteCommand};
use crate::error::{Result, SerialIoError};

const CHANNEL_CAPACITY: usize = 64;

/// One side of an in-memory link.
///
/// Supports a single `connect`; a memory link cannot be reopened once
/// torn down.
pub struct MemoryTransport {
    peer_tx: mpsc::Sender<TransportEvent>,
    self_tx: mpsc::Sender<TransportEvent>,
    events: Option<mpsc::Receiver<TransportEvent>>,
    backend: Option<JoinHandle<()>>,
}

/// Build two transports wired to each other.
pub fn pair() -> (MemoryTransport, MemoryTransport) {
    let (a_tx, a_rx) = mpsc::channel(CHANNEL_CAPACITY);
    let (b_tx, b_rx) = mpsc::channel(CHANNEL_CAPACITY);

    let a = MemoryTransport {
        peer_tx: b_tx.clone(),
        self_tx: a_tx.clone(),
        events: Some(a_rx),
        backend: None,
    };
    let b = MemoryTransport {
        peer_tx: a_tx,
        self_tx: b_tx,
        events: Some(b_rx),
        backend: None,
    };
    (a, b)
}

impl Transport for MemoryTransport {
    fn connect(&mut self) -> Result<TransportLink> {
        let events = self.events.take().ok_or(SerialIoError::Closed)?;

        let (cmd_tx, cmd_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let backend = tokio::spawn(run_backend(
            cmd_rx,
            self.peer_tx.clone(),
            self.self_tx.clone(),
        ));
        self.backend = Some(backend);

        Ok(TransportLink {
            events,
            writer: TransportWriter::new(cmd_tx),
        })
    }

    fn disconnect(&mut self) {
        if let Some(backend) = self.backend.take() {
            backend.abort();
        }
        let _ = self.self_tx.try_send(TransportEvent::Closed(None));
    }
}

/// Write backend: deliver writes to the peer, drain immediately.
async fn run_backend(
    mut commands: mpsc::Receiver<WriteCommand>,
    peer_tx: mpsc::Sender<TransportEvent>,
    self_tx: mpsc::Sender<TransportEvent>,
) {
    while let Some(command) = commands.recv().await {
        match command {
            WriteCommand::Write(bytes, ack) => {
                let result = peer_tx
                    .send(TransportEvent::Data(bytes))
                    .await
                    .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "peer is gone"));
                let _ = ack.send(result);
            }
            WriteCommand::Drain(ack) => {
                let _ = self_tx.try_send(TransportEvent::Drain);
                let _ = ack.send(Ok(()));
            }
        }
    }
}
