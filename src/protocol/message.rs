//! Message value with typed accessors.
//!
//! A [`Message`] is an immutable view over one contiguous framed buffer,
//! using `bytes::Bytes` so that clones and payload slices share storage.
//!
//! # Example
//!
//! ```
//! use serial_io::protocol::{Message, MessageType};
//!
//! let msg = Message::create(b"hello", MessageType::Request, 42);
//! assert_eq!(msg.id(), 42);
//! assert_eq!(msg.message_type(), Some(MessageType::Request));
//! assert_eq!(msg.payload(), b"hello");
//! assert_eq!(msg.frame_len(), 11 + 5);
//! ```

use std::fmt;

use bytes::{BufMut, Bytes, BytesMut};

use super::wire_format::{
    MessageType, HEADER_SIZE, ID_OFFSET, START_SEQUENCE, TYPE_OFFSET,
};

/// One framed message: start sequence, length, id, type, payload.
#[derive(Clone)]
pub struct Message {
    frame: Bytes,
}

impl Message {
    /// Build a framed message from a payload, type, and transaction id.
    pub fn create(payload: &[u8], message_type: MessageType, id: u16) -> Self {
        let mut frame = BytesMut::with_capacity(HEADER_SIZE + payload.len());
        frame.extend_from_slice(&START_SEQUENCE);
        frame.put_u32(payload.len() as u32);
        frame.put_u16(id);
        frame.put_u8(message_type.as_byte());
        frame.extend_from_slice(payload);
        Self {
            frame: frame.freeze(),
        }
    }

    /// Wrap an already-framed buffer.
    ///
    /// The buffer must start with the start sequence and span exactly
    /// `11 + LENGTH` bytes; the parser is the only producer of such
    /// buffers.
    pub(crate) fn from_frame(frame: Bytes) -> Self {
        debug_assert!(frame.len() >= HEADER_SIZE);
        debug_assert_eq!(&frame[..START_SEQUENCE.len()], &START_SEQUENCE);
        Self { frame }
    }

    /// Transaction id.
    #[inline]
    pub fn id(&self) -> u16 {
        u16::from_be_bytes([self.frame[ID_OFFSET], self.frame[ID_OFFSET + 1]])
    }

    /// The raw type byte, including unknown codes.
    #[inline]
    pub fn type_byte(&self) -> u8 {
        self.frame[TYPE_OFFSET]
    }

    /// Decoded message type; `None` when the type byte is unknown.
    #[inline]
    pub fn message_type(&self) -> Option<MessageType> {
        MessageType::from_byte(self.type_byte())
    }

    /// Payload bytes.
    #[inline]
    pub fn payload(&self) -> &[u8] {
        &self.frame[HEADER_SIZE..]
    }

    /// Payload as shared `Bytes` (cheap, zero-copy slice).
    #[inline]
    pub fn payload_bytes(&self) -> Bytes {
        self.frame.slice(HEADER_SIZE..)
    }

    /// Payload length in bytes.
    #[inline]
    pub fn payload_len(&self) -> usize {
        self.frame.len() - HEADER_SIZE
    }

    /// Payload decoded as UTF-8 text, lossily.
    pub fn payload_text(&self) -> String {
        String::from_utf8_lossy(self.payload()).into_owned()
    }

    /// The full framed buffer, header included.
    #[inline]
    pub fn frame(&self) -> &[u8] {
        &self.frame
    }

    /// The full framed buffer as shared `Bytes`.
    #[inline]
    pub fn frame_bytes(&self) -> Bytes {
        self.frame.clone()
    }

    /// Total framed size: `11 + payload length`.
    #[inline]
    pub fn frame_len(&self) -> usize {
        self.frame.len()
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message")
            .field("id", &self.id())
            .field("type", &self.type_byte())
            .field("payload_len", &self.payload_len())
            .finish()
    }
}
