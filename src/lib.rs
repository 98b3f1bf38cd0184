//! # serial-io
//!
//! Request/reply messaging over byte-oriented serial transports (UART
//! devices such as `/dev/tty*`).
//!
//! The crate frames variable-length payloads into self-delimited messages,
//! recovers framing from garbage and partial data, correlates replies to
//! in-flight requests by id, serializes outbound writes, enforces
//! per-transaction timeouts, and survives transient disconnects by
//! reopening the port.
//!
//! ## Architecture
//!
//! - **Protocol** ([`protocol`]): 11-byte header framing, [`Message`]
//!   values, and the resyncing [`DataParser`].
//! - **Transactions** ([`TransactionHolder`]): id → one-shot completion
//!   with a timeout timer.
//! - **Transport** ([`transport`]): the serial driver bridge and an
//!   in-memory pair for tests.
//! - **Engine** ([`SerialIo`]): wires it all together and supervises the
//!   link.
//!
//! ## Example
//!
//! ```ignore
//! use serial_io::SerialIo;
//!
//! #[tokio::main]
//! async fn main() -> serial_io::Result<()> {
//!     let io = SerialIo::new("/dev/ttyUSB0");
//!     io.open().await?;
//!
//!     let reply = io.send_request("status?").await?;
//!     println!("{}", reply.payload_text());
//!
//!     io.close().await
//! }
//! ```
//!
//! Payloads are opaque byte strings; any application-level encoding (JSON
//! included) is the caller's concern, with
//! [`send_request_json`](SerialIo::send_request_json) as a thin text
//! convenience.

pub mod error;
pub mod protocol;
pub mod transport;

mod engine;
mod transactions;
mod writer;

pub use engine::{
    IntoReply, SerialIo, SerialIoConfig, DEFAULT_PING_TIMEOUT, DEFAULT_REOPEN_DELAY,
};
pub use error::{Result, SerialIoError};
pub use protocol::{DataParser, IdSequence, Message, MessageType};
pub use transactions::{TransactionHolder, DEFAULT_TIMEOUT};
pub use writer::DEFAULT_CHUNK_SIZE;
