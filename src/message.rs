//! Application-level messages, and the frame segmentation used to send them.

use crate::encoder::segment;
use crate::frame::OpCode;

/// A complete, reassembled application message handed to the caller or
/// accepted for sending. Text payloads are kept as raw bytes rather than
/// `String` — UTF-8 validation already happened during decode, and
/// re-validating on every access is wasted work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Text(Vec<u8>),
    Binary(Vec<u8>),
}

impl Message {
    pub fn opcode(&self) -> OpCode {
        match self {
            Message::Text(_) => OpCode::Text,
            Message::Binary(_) => OpCode::Binary,
        }
    }

    pub fn payload(&self) -> &[u8] {
        match self {
            Message::Text(bytes) | Message::Binary(bytes) => bytes,
        }
    }

    pub fn into_payload(self) -> Vec<u8> {
        match self {
            Message::Text(bytes) | Message::Binary(bytes) => bytes,
        }
    }

    /// Split this message into the `(opcode, fin, payload)` triples that
    /// should be written to the wire, honoring `max_frame_size`.
    pub fn to_frames(&self, max_frame_size: usize) -> Vec<(OpCode, bool, &[u8])> {
        segment(self.payload(), self.opcode(), max_frame_size)
    }
}
