//! Protocol module - wire format, message values, and stream parsing.
//!
//! This module implements the binary framing layer:
//! - 11-byte header layout with a fixed start sequence
//! - Message value over a framed buffer with typed accessors
//! - Resyncing incremental parser for arbitrary byte chunks

mod message;
mod parser;
mod wire_format;

pub use message::Message;
pub use parser::DataParser;
pub use wire_format::{
    IdSequence, MessageType, HEADER_SIZE, ID_OFFSET, LENGTH_OFFSET, START_SEQUENCE, TYPE_OFFSET,
};
