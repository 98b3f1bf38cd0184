//! The send/receive engine.
//!
//! [`SerialIo`] binds a transport to the stream parser, serializes
//! outbound writes through the write queue, correlates replies to
//! in-flight requests by id, and supervises the link: an unexpected close
//! triggers a reopen loop that retries at a fixed interval until the port
//! comes back or [`SerialIo::close`] is called.
//!
//! # Example
//!
//! ```ignore
//! use serial_io::{SerialIo, SerialIoError};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), SerialIoError> {
//!     let io = SerialIo::new("/dev/ttyUSB0");
//!     io.on_message(|msg| async move {
//!         tracing::info!("request: {}", msg.payload_text());
//!         Ok::<_, SerialIoError>("acknowledged".to_string())
//!     });
//!
//!     io.open().await?;
//!     let reply = io.send_request("hello").await?;
//!     println!("peer said: {}", reply.payload_text());
//!     io.close().await
//! }
//! ```

use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::error::{Result, SerialIoError};
use crate::protocol::{DataParser, IdSequence, Message, MessageType};
use crate::transactions::{TransactionHolder, DEFAULT_TIMEOUT};
use crate::transport::{
    list_ports, PortInfo, SerialPortTransport, Transport, TransportEvent, TransportLink,
    DEFAULT_BAUD_RATE,
};
use crate::writer::{spawn_write_queue, WriteQueue, DEFAULT_CHUNK_SIZE};

/// Default timeout for [`SerialIo::ping`].
pub const DEFAULT_PING_TIMEOUT: Duration = Duration::from_millis(500);

/// Delay between reopen attempts after an unexpected close.
pub const DEFAULT_REOPEN_DELAY: Duration = Duration::from_secs(1);

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct SerialIoConfig {
    /// Baud rate for the serial transport.
    pub baud_rate: u32,
    /// Default transaction timeout.
    pub timeout: Duration,
    /// Timeout for pings.
    pub ping_timeout: Duration,
    /// Maximum bytes per write before waiting for a drain.
    pub chunk_size: usize,
    /// Delay between reopen attempts.
    pub reopen_delay: Duration,
}

impl Default for SerialIoConfig {
    fn default() -> Self {
        Self {
            baud_rate: DEFAULT_BAUD_RATE,
            timeout: DEFAULT_TIMEOUT,
            ping_timeout: DEFAULT_PING_TIMEOUT,
            chunk_size: DEFAULT_CHUNK_SIZE,
            reopen_delay: DEFAULT_REOPEN_DELAY,
        }
    }
}

/// Conversion of a message-handler return value into an optional reply
/// payload.
///
/// Returning `()` (or `None`) sends no reply; text and byte types reply
/// with their content.
pub trait IntoReply {
    /// The reply payload, or `None` for no reply.
    fn into_reply(self) -> Option<Bytes>;
}

impl IntoReply for () {
    fn into_reply(self) -> Option<Bytes> {
        None
    }
}

impl IntoReply for String {
    fn into_reply(self) -> Option<Bytes> {
        Some(Bytes::from(self))
    }
}

impl IntoReply for &'static str {
    fn into_reply(self) -> Option<Bytes> {
        Some(Bytes::from_static(self.as_bytes()))
    }
}

impl IntoReply for Vec<u8> {
    fn into_reply(self) -> Option<Bytes> {
        Some(Bytes::from(self))
    }
}

impl IntoReply for Bytes {
    fn into_reply(self) -> Option<Bytes> {
        Some(self)
    }
}

impl<T: IntoReply> IntoReply for Option<T> {
    fn into_reply(self) -> Option<Bytes> {
        self.and_then(IntoReply::into_reply)
    }
}

/// Boxed future returned by wrapped message handlers.
type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;

type MessageHandler = Arc<dyn Fn(Message) -> BoxFuture<Result<Option<Bytes>>> + Send + Sync>;
type OpenHandler = Arc<dyn Fn() + Send + Sync>;
type CloseHandler = Arc<dyn Fn(bool) + Send + Sync>;
type DrainHandler = Arc<dyn Fn() + Send + Sync>;
type ErrorHandler = Arc<dyn Fn(&io::Error) + Send + Sync>;

/// User-registered event taps.
#[derive(Default)]
struct Handlers {
    message: Mutex<Option<MessageHandler>>,
    open: Mutex<Option<OpenHandler>>,
    close: Mutex<Option<CloseHandler>>,
    drain: Mutex<Option<DrainHandler>>,
    error: Mutex<Option<ErrorHandler>>,
}

struct Inner {
    config: SerialIoConfig,
    transport: Mutex<Box<dyn Transport>>,
    transactions: TransactionHolder,
    ids: IdSequence,
    handlers: Handlers,
    queue: Mutex<Option<WriteQueue>>,
    closing: AtomicBool,
    open: AtomicBool,
}

/// Request/reply messaging engine over a byte-oriented transport.
///
/// Cheaply cloneable; all clones drive the same link.
#[derive(Clone)]
pub struct SerialIo {
    inner: Arc<Inner>,
}

impl SerialIo {
    /// Create an engine for the serial device at `path` with defaults.
    pub fn new(path: impl Into<String>) -> Self {
        Self::with_config(path, SerialIoConfig::default())
    }

    /// Create an engine for the serial device at `path`.
    pub fn with_config(path: impl Into<String>, config: SerialIoConfig) -> Self {
        let transport = SerialPortTransport::new(path, config.baud_rate);
        Self::with_transport(Box::new(transport), config)
    }

    /// List the serial ports available on this machine.
    pub fn list() -> Vec<PortInfo> {
        list_ports()
    }

    /// Create an engine over an arbitrary transport (e.g. a memory pair).
    pub fn with_transport(transport: Box<dyn Transport>, config: SerialIoConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                transport: Mutex::new(transport),
                transactions: TransactionHolder::new(),
                ids: IdSequence::new(),
                handlers: Handlers::default(),
                queue: Mutex::new(None),
                closing: AtomicBool::new(false),
                open: AtomicBool::new(false),
            }),
        }
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Open the underlying port and start processing.
    ///
    /// Resolves once the port is open; the `on_open` tap fires on success.
    pub async fn open(&self) -> Result<()> {
        if self.is_open() {
            return Ok(());
        }
        self.inner.closing.store(false, Ordering::Release);

        let link = self.lock_transport().connect()?;
        self.start_link(link);
        self.inner.open.store(true, Ordering::Release);
        self.emit_open();
        Ok(())
    }

    /// Close the underlying port.
    ///
    /// Marks the close as expected so the reopen loop stays off; the
    /// `on_close` tap fires once the link has wound down.
    pub async fn close(&self) -> Result<()> {
        self.inner.closing.store(true, Ordering::Release);
        self.inner.open.store(false, Ordering::Release);
        self.lock_transport().disconnect();
        Ok(())
    }

    /// Whether the port is currently open.
    pub fn is_open(&self) -> bool {
        self.inner.open.load(Ordering::Acquire)
    }

    fn lock_transport(&self) -> std::sync::MutexGuard<'_, Box<dyn Transport>> {
        self.inner
            .transport
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Spin up the write queue and the event pump for a fresh link.
    fn start_link(&self, link: TransportLink) {
        let (queue, _task) = spawn_write_queue(link.writer, self.inner.config.chunk_size);
        *self.inner.queue.lock().unwrap_or_else(|p| p.into_inner()) = Some(queue);

        let engine = self.clone();
        tokio::spawn(async move { engine.pump(link.events).await });
    }

    /// Event pump: parse inbound bytes, forward taps, wind down on close.
    async fn pump(self, mut events: mpsc::Receiver<TransportEvent>) {
        let mut parser = DataParser::new();
        loop {
            match events.recv().await {
                Some(TransportEvent::Data(chunk)) => {
                    for message in parser.parse_data(&chunk) {
                        self.dispatch(message).await;
                    }
                }
                Some(TransportEvent::Drain) => self.emit_drain(),
                Some(TransportEvent::Error(error)) => self.emit_error(&error),
                Some(TransportEvent::Closed(error)) => {
                    self.handle_close(error).await;
                    return;
                }
                None => {
                    self.handle_close(None).await;
                    return;
                }
            }
        }
    }

    /// Wind down the link and, for unexpected closes, start the reopen
    /// supervisor. In-flight transactions are left to their timers.
    async fn handle_close(&self, error: Option<io::Error>) {
        self.inner.open.store(false, Ordering::Release);
        *self.inner.queue.lock().unwrap_or_else(|p| p.into_inner()) = None;

        if let Some(error) = &error {
            tracing::warn!(%error, "port closed with error");
        }

        let expected = self.inner.closing.load(Ordering::Acquire);
        self.emit_close(!expected);
        if expected {
            return;
        }

        let engine = self.clone();
        tokio::spawn(async move { engine.reopen_loop().await });
    }

    /// Retry `open` at a fixed interval until it succeeds or the engine is
    /// closed. The attempt counter only ever grows; supervision has no
    /// upper bound.
    async fn reopen_loop(self) {
        let mut attempt: u64 = 0;
        loop {
            tokio::time::sleep(self.inner.config.reopen_delay).await;
            if self.inner.closing.load(Ordering::Acquire) {
                return;
            }
            attempt += 1;
            match self.open().await {
                Ok(()) => {
                    tracing::info!(attempt, "port reopened");
                    return;
                }
                Err(error) => {
                    tracing::warn!(attempt, %error, "reopen attempt failed");
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Inbound dispatch
    // ------------------------------------------------------------------

    async fn dispatch(&self, message: Message) {
        match message.message_type() {
            Some(MessageType::Request) => {
                let handler = self
                    .inner
                    .handlers
                    .message
                    .lock()
                    .unwrap_or_else(|p| p.into_inner())
                    .clone();
                let Some(handler) = handler else {
                    tracing::debug!(id = message.id(), "request dropped, no handler registered");
                    return;
                };

                let id = message.id();
                let engine = self.clone();
                tokio::spawn(async move {
                    match handler(message).await {
                        Ok(Some(payload)) => {
                            if let Err(error) = engine.send_reply(payload, id).await {
                                tracing::warn!(id, %error, "failed to send reply");
                            }
                        }
                        Ok(None) => {}
                        Err(error) => {
                            let text = error.to_string();
                            if let Err(error) = engine.send_error_reply(&text, id).await {
                                tracing::warn!(id, %error, "failed to send error reply");
                            }
                        }
                    }
                });
            }
            Some(MessageType::Ping) => {
                let id = message.id();
                let engine = self.clone();
                tokio::spawn(async move {
                    if let Err(error) = engine.send_reply(Bytes::new(), id).await {
                        tracing::warn!(id, %error, "failed to answer ping");
                    }
                });
            }
            Some(MessageType::Reply) => {
                let id = message.id();
                if !self.inner.transactions.resolve(id, message).await {
                    tracing::debug!(id, "reply without matching transaction");
                }
            }
            Some(MessageType::Error) => {
                let id = message.id();
                let error = SerialIoError::Remote(message.payload_text());
                if !self.inner.transactions.reject(id, error).await {
                    tracing::debug!(id, "error reply without matching transaction");
                }
            }
            None => {
                tracing::warn!(
                    id = message.id(),
                    message_type = message.type_byte(),
                    "dropping message with unknown type"
                );
            }
        }
    }

    // ------------------------------------------------------------------
    // Outbound API
    // ------------------------------------------------------------------

    /// Allocate the next transaction id.
    pub fn next_id(&self) -> u16 {
        self.inner.ids.next_id()
    }

    /// Send a REQUEST and await the peer's reply.
    pub async fn send_request(&self, data: impl Into<Bytes>) -> Result<Message> {
        let message = Message::create(&data.into(), MessageType::Request, self.next_id());
        self.send(message).await
    }

    /// Send a REQUEST whose payload is the JSON text of `value`.
    pub async fn send_request_json<T: serde::Serialize>(&self, value: &T) -> Result<Message> {
        let text = serde_json::to_string(value)?;
        self.send_request(text).await
    }

    /// Send a REPLY for the request with `id`.
    pub async fn send_reply(&self, data: impl Into<Bytes>, id: u16) -> Result<Message> {
        let message = Message::create(&data.into(), MessageType::Reply, id);
        self.send(message).await
    }

    /// Send an ERROR reply carrying `error` as text.
    pub async fn send_error_reply(&self, error: &str, id: u16) -> Result<Message> {
        let message = Message::create(error.as_bytes(), MessageType::Error, id);
        self.send(message).await
    }

    /// Probe the peer with an empty PING; resolves on its empty reply.
    pub async fn ping(&self) -> Result<Message> {
        let message = Message::create(b"", MessageType::Ping, self.next_id());
        self.send_with_timeout(message, self.inner.config.ping_timeout)
            .await
    }

    /// Send a message with the default transaction timeout.
    pub async fn send(&self, message: Message) -> Result<Message> {
        self.send_with_timeout(message, self.inner.config.timeout)
            .await
    }

    /// Send a message, awaiting its completion.
    ///
    /// The transaction is registered before the frame is queued. REPLY
    /// messages complete as soon as the frame is written (no remote answer
    /// is expected); everything else completes on the correlated inbound
    /// reply, on an error reply, on a write failure, or on the timeout.
    pub async fn send_with_timeout(&self, message: Message, timeout: Duration) -> Result<Message> {
        let id = message.id();
        let is_reply = message.message_type() == Some(MessageType::Reply);

        let completion = self.inner.transactions.add(id, timeout).await;

        let queue = self
            .inner
            .queue
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone();
        let Some(queue) = queue else {
            self.inner.transactions.remove(id).await;
            return Err(SerialIoError::Closed);
        };

        match queue.push(message.frame_bytes()).await {
            Ok(Ok(())) => {
                if is_reply {
                    self.inner.transactions.resolve(id, message).await;
                }
            }
            Ok(Err(error)) => {
                self.inner.transactions.reject(id, error).await;
            }
            Err(_) => {
                self.inner.transactions.reject(id, SerialIoError::Closed).await;
            }
        }

        match completion.await {
            Ok(result) => result,
            Err(_) => Err(SerialIoError::Closed),
        }
    }

    // ------------------------------------------------------------------
    // Event taps
    // ------------------------------------------------------------------

    /// Register the request handler.
    ///
    /// Invoked for every inbound REQUEST. A payload-shaped return value is
    /// sent back as a REPLY with the request's id; an error return is sent
    /// back as an ERROR reply carrying the error's text. Failures to send
    /// either are logged, never propagated.
    pub fn on_message<F, Fut, R>(&self, handler: F)
    where
        F: Fn(Message) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R>> + Send + 'static,
        R: IntoReply,
    {
        let wrapped: MessageHandler = Arc::new(move |message| {
            let fut = handler(message);
            Box::pin(async move { fut.await.map(IntoReply::into_reply) })
        });
        *self
            .inner
            .handlers
            .message
            .lock()
            .unwrap_or_else(|p| p.into_inner()) = Some(wrapped);
    }

    /// Register a tap fired when the port opens (including reopens).
    pub fn on_open<F: Fn() + Send + Sync + 'static>(&self, handler: F) {
        *self
            .inner
            .handlers
            .open
            .lock()
            .unwrap_or_else(|p| p.into_inner()) = Some(Arc::new(handler));
    }

    /// Register a tap fired when the port closes. The flag is `true` for
    /// an unexpected close, i.e. when the engine will attempt to reopen.
    pub fn on_close<F: Fn(bool) + Send + Sync + 'static>(&self, handler: F) {
        *self
            .inner
            .handlers
            .close
            .lock()
            .unwrap_or_else(|p| p.into_inner()) = Some(Arc::new(handler));
    }

    /// Register a tap fired on transport drain signals.
    pub fn on_drain<F: Fn() + Send + Sync + 'static>(&self, handler: F) {
        *self
            .inner
            .handlers
            .drain
            .lock()
            .unwrap_or_else(|p| p.into_inner()) = Some(Arc::new(handler));
    }

    /// Register a tap fired on transport errors that did not end the link.
    pub fn on_error<F: Fn(&io::Error) + Send + Sync + 'static>(&self, handler: F) {
        *self
            .inner
            .handlers
            .error
            .lock()
            .unwrap_or_else(|p| p.into_inner()) = Some(Arc::new(handler));
    }

    fn emit_open(&self) {
        let tap = self
            .inner
            .handlers
            .open
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone();
        if let Some(tap) = tap {
            tap();
        }
    }

    fn emit_close(&self, unexpected: bool) {
        let tap = self
            .inner
            .handlers
            .close
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone();
        if let Some(tap) = tap {
            tap(unexpected);
        }
    }

    fn emit_drain(&self) {
        let tap = self
            .inner
            .handlers
            .drain
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone();
        if let Some(tap) = tap {
            tap();
        }
    }

    fn emit_error(&self, error: &io::Error) {
        tracing::warn!(%error, "transport error");
        let tap = self
            .inner
            .handlers
            .error
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone();
        if let Some(tap) = tap {
            tap(error);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults() {
        let config = SerialIoConfig::default();
        assert_eq!(config.baud_rate, DEFAULT_BAUD_RATE);
        assert_eq!(config.timeout, DEFAULT_TIMEOUT);
        assert_eq!(config.ping_timeout, DEFAULT_PING_TIMEOUT);
        assert_eq!(config.chunk_size, DEFAULT_CHUNK_SIZE);
        assert_eq!(config.reopen_delay, DEFAULT_REOPEN_DELAY);
    }

    #[test]
    fn into_reply_conversions() {
        assert_eq!(().into_reply(), None);
        assert_eq!("text".into_reply(), Some(Bytes::from_static(b"text")));
        assert_eq!(
            String::from("owned").into_reply(),
            Some(Bytes::from_static(b"owned"))
        );
        assert_eq!(
            vec![1u8, 2, 3].into_reply(),
            Some(Bytes::from_static(&[1, 2, 3]))
        );
        assert_eq!(None::<String>.into_reply(), None);
        assert_eq!(
            Some("inner").into_reply(),
            Some(Bytes::from_static(b"inner"))
        );
    }

    #[test]
    fn next_id_is_sequential_per_engine() {
        let engine = SerialIo::new("/dev/ttyNONE");
        assert_eq!(engine.next_id(), 0);
        assert_eq!(engine.next_id(), 1);

        let other = SerialIo::new("/dev/ttyNONE");
        assert_eq!(other.next_id(), 0);
    }

    #[tokio::test]
    async fn send_while_closed_rejects() {
        let engine = SerialIo::new("/dev/ttyNONE");
        let message = Message::create(b"never sent", MessageType::Request, engine.next_id());

        let error = engine.send(message).await.unwrap_err();
        assert!(matches!(error, SerialIoError::Closed));
        assert!(engine.inner.transactions.is_empty().await);
    }

    #[tokio::test]
    async fn open_on_missing_port_rejects_and_open_tap_stays_quiet() {
        let engine = SerialIo::new("/dev/ttyMISSING");
        let opened = Arc::new(AtomicBool::new(false));
        engine.on_open({
            let opened = Arc::clone(&opened);
            move || opened.store(true, Ordering::SeqCst)
        });

        assert!(engine.open().await.is_err());
        assert!(!engine.is_open());
        assert!(!opened.load(Ordering::SeqCst));
    }
}
