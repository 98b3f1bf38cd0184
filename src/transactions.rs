//! Tracking of in-flight transactions awaiting replies.
//!
//! [`TransactionHolder`] maps transaction ids to one-shot completion
//! handles, each guarded by a timer. A transaction is completed exactly
//! once: by a matching reply, by an error reply, by a write failure, or by
//! its timer. Removal always cancels the timer first, so a late fire is
//! impossible.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;

use crate::error::SerialIoError;
use crate::protocol::Message;

/// Default transaction timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(5000);

type Completion = oneshot::Sender<Result<Message, SerialIoError>>;

/// One pending transaction: its completion handle and its timeout timer.
struct Transaction {
    completion: Completion,
    timer: JoinHandle<()>,
}

/// Map of id → pending transaction.
///
/// Cheaply cloneable; clones share the same map, so the send path, the
/// inbound dispatcher, and the timer tasks all see one set of pending
/// transactions.
#[derive(Clone, Default)]
pub struct TransactionHolder {
    inner: Arc<Mutex<HashMap<u16, Transaction>>>,
}

impl TransactionHolder {
    /// Create an empty holder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a transaction for `id` and arm its timeout.
    ///
    /// Returns the receiver that resolves with the reply or fails with the
    /// timeout, a remote error, or a transport error. Registering an id
    /// that is still pending replaces the old transaction; its receiver
    /// observes a closed channel.
    pub async fn add(
        &self,
        id: u16,
        timeout: Duration,
    ) -> oneshot::Receiver<Result<Message, SerialIoError>> {
        let (completion, receiver) = oneshot::channel();

        let mut map = self.inner.lock().await;
        let holder = self.clone();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if holder.reject(id, SerialIoError::Timeout).await {
                tracing::debug!(id, "transaction timed out");
            }
        });

        if let Some(stale) = map.insert(id, Transaction { completion, timer }) {
            stale.timer.abort();
            tracing::warn!(id, "replaced pending transaction with reused id");
        }

        receiver
    }

    /// Remove the transaction for `id`, cancelling its timer.
    async fn take(&self, id: u16) -> Option<Transaction> {
        let transaction = self.inner.lock().await.remove(&id);
        if let Some(transaction) = &transaction {
            transaction.timer.abort();
        }
        transaction
    }

    /// Drop the transaction for `id` without signaling it.
    ///
    /// Returns whether a transaction was pending. The receiver observes a
    /// closed channel.
    pub async fn remove(&self, id: u16) -> bool {
        self.take(id).await.is_some()
    }

    /// Complete the transaction for `id` with a reply message.
    ///
    /// Returns `false` when no transaction was pending (already completed,
    /// timed out, or never registered).
    pub async fn resolve(&self, id: u16, message: Message) -> bool {
        match self.take(id).await {
            Some(transaction) => {
                let _ = transaction.completion.send(Ok(message));
                true
            }
            None => false,
        }
    }

    /// Fail the transaction for `id` with an error.
    ///
    /// Returns `false` when no transaction was pending.
    pub async fn reject(&self, id: u16, error: SerialIoError) -> bool {
        match self.take(id).await {
            Some(transaction) => {
                let _ = transaction.completion.send(Err(error));
                true
            }
            None => false,
        }
    }

    /// Whether a transaction is pending for `id`.
    pub async fn contains(&self, id: u16) -> bool {
        self.inner.lock().await.contains_key(&id)
    }

    /// Number of pending transactions.
    pub async fn len(&self) -> usize {
        self.inner.lock().await.len()
    }

    /// Whether no transactions are pending.
    pub async fn is_empty(&self) -> bool {
        self.inner.lock().await.is_empty()
    }
}
