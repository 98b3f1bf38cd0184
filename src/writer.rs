//! Single-slot write queue with chunked sending.
//!
//! Outbound frames are serialized through one task: items run strictly in
//! submission order and the next item starts only once the previous one
//! finished, success or failure. Each frame is written in chunks, waiting
//! for the transport's drain after every chunk, as a workaround for
//! drivers that drop bytes on large writes.

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::error::{Result, SerialIoError};
use crate::transport::TransportWriter;

/// Default chunk size for outbound writes.
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// One queued frame and the signal for its completion.
struct WriteJob {
    frame: Bytes,
    done: oneshot::Sender<Result<()>>,
}

/// FIFO of outbound frames, drained one at a time.
///
/// Unbounded depth; dropping every handle ends the queue task.
#[derive(Clone)]
pub(crate) struct WriteQueue {
    tx: mpsc::UnboundedSender<WriteJob>,
}

impl WriteQueue {
    /// Enqueue a frame. The receiver resolves when the frame was fully
    /// written and drained, or with the first write/drain error.
    pub fn push(&self, frame: Bytes) -> oneshot::Receiver<Result<()>> {
        let (done, receiver) = oneshot::channel();
        if let Err(rejected) = self.tx.send(WriteJob { frame, done }) {
            let WriteJob { done, .. } = rejected.0;
            let _ = done.send(Err(SerialIoError::Closed));
        }
        receiver
    }
}

/// Spawn the queue task over a connected transport writer.
pub(crate) fn spawn_write_queue(
    writer: TransportWriter,
    chunk_size: usize,
) -> (WriteQueue, JoinHandle<()>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let task = tokio::spawn(write_queue_loop(rx, writer, chunk_size));
    (WriteQueue { tx }, task)
}

async fn write_queue_loop(
    mut jobs: mpsc::UnboundedReceiver<WriteJob>,
    writer: TransportWriter,
    chunk_size: usize,
) {
    while let Some(job) = jobs.recv().await {
        let result = send_in_parts(&writer, job.frame, chunk_size).await;
        if let Err(error) = &result {
            tracing::warn!(%error, "frame write failed");
        }
        let _ = job.done.send(result);
    }
}

/// Write `frame` in chunks of at most `chunk_size` bytes, draining after
/// each chunk. Aborts on the first error.
async fn send_in_parts(writer: &TransportWriter, frame: Bytes, chunk_size: usize) -> Result<()> {
    let mut from = 0;
    while from < frame.len() {
        let to = usize::min(from + chunk_size, frame.len());
        writer.write(frame.slice(from..to)).await?;
        writer.drain().await?;
        from = to;
    }
    Ok(())
}
