//! Incremental stream parser with garbage recovery.
//!
//! [`DataParser`] consumes arbitrary byte chunks and yields complete
//! messages. It tolerates leading garbage, split headers and payloads,
//! and frames aborted mid-write: whenever a fresh start sequence shows up
//! before the pending frame's payload completes, the partial frame is
//! dropped silently and parsing resumes at the new start. The peer's
//! transaction timeout is what eventually surfaces the loss.
//!
//! # Example
//!
//! ```
//! use serial_io::protocol::{DataParser, Message, MessageType};
//!
//! let mut parser = DataParser::new();
//! let frame = Message::create(b"hi", MessageType::Request, 1);
//!
//! // Garbage before the frame is discarded.
//! let mut stream = vec![0xDE, 0xAD];
//! stream.extend_from_slice(frame.frame());
//!
//! let messages = parser.parse_data(&stream);
//! assert_eq!(messages.len(), 1);
//! assert_eq!(messages[0].payload(), b"hi");
//! ```

use bytes::{Buf, BytesMut};

use super::message::Message;
use super::wire_format::{HEADER_SIZE, LENGTH_OFFSET, START_SEQUENCE};

/// Find the first start sequence in `haystack`.
fn find_start_sequence(haystack: &[u8]) -> Option<usize> {
    haystack
        .windows(START_SEQUENCE.len())
        .position(|window| window == START_SEQUENCE)
}

/// Stateful parser turning a byte stream into framed messages.
///
/// All state lives in the parser; `parse_data` is the sole mutator and is
/// not re-entrant. Feeding the same byte stream in any chunking produces
/// the same message sequence.
#[derive(Debug, Default)]
pub struct DataParser {
    /// Accumulated unconsumed bytes.
    buffer: BytesMut,
    /// True once a start sequence sits at the head of `buffer` and we are
    /// waiting for the body.
    pending_message: bool,
}

impl DataParser {
    /// Create an empty parser.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk and extract every complete message now available.
    ///
    /// Returns messages in stream order; an empty vec means more bytes are
    /// needed.
    pub fn parse_data(&mut self, chunk: &[u8]) -> Vec<Message> {
        self.buffer.extend_from_slice(chunk);

        let mut messages = Vec::new();
        loop {
            // A full header is the minimum unit of progress.
            if self.buffer.len() < HEADER_SIZE {
                break;
            }

            if !self.pending_message {
                match find_start_sequence(&self.buffer) {
                    Some(0) => self.pending_message = true,
                    Some(index) => {
                        tracing::debug!(discarded = index, "skipping bytes before start sequence");
                        self.buffer.advance(index);
                        self.pending_message = true;
                    }
                    None => {
                        // The tail may hold a split start sequence prefix.
                        let keep = START_SEQUENCE.len() - 1;
                        let discard = self.buffer.len() - keep;
                        tracing::debug!(discarded = discard, "no start sequence in buffer");
                        self.buffer.advance(discard);
                        break;
                    }
                }
                continue;
            }

            let length = u32::from_be_bytes([
                self.buffer[LENGTH_OFFSET],
                self.buffer[LENGTH_OFFSET + 1],
                self.buffer[LENGTH_OFFSET + 2],
                self.buffer[LENGTH_OFFSET + 3],
            ]) as usize;
            let raw_size = HEADER_SIZE + length;

            // A later start sequence inside the pending frame's span means
            // the frame was cut short by the sender; drop the partial and
            // resume from the new start. No overlap can begin at offsets
            // 1..4 (the head magic ends 0x00 0x00 0x0F), so the scan
            // starts at the length field.
            if let Some(found) = find_start_sequence(&self.buffer[LENGTH_OFFSET..]) {
                let index = LENGTH_OFFSET + found;
                if index < raw_size {
                    tracing::debug!(discarded = index, "start sequence inside pending frame");
                    self.buffer.advance(index);
                    self.pending_message = false;
                    continue;
                }
            }

            if self.buffer.len() < raw_size {
                break;
            }

            let frame = self.buffer.split_to(raw_size).freeze();
            let message = Message::from_frame(frame);
            tracing::trace!(id = message.id(), len = message.frame_len(), "parsed message");
            messages.push(message);
            self.pending_message = false;
        }

        messages
    }

    /// Number of buffered, unconsumed bytes.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }
}
