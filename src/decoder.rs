//! Inbound frame decoding and reassembly.
//!
//! `FrameDecoder` is fed a rolling [`BytesMut`] buffer owned by the
//! connection task and peels complete frames off the front. Continuation
//! frames are folded into an internal partial-frame buffer and only
//! surfaced once the message is complete; control frames bypass reassembly
//! and surface immediately. Nothing here touches a socket — decoding is a
//! pure function over a buffer the caller fills from the transport.

use crate::error::ProtocolErrorKind;
use crate::frame::{Frame, OpCode};
use bytes::{Buf, BytesMut};

struct Partial {
    opcode: OpCode,
    payload: Vec<u8>,
}

pub struct FrameDecoder {
    partial: Option<Partial>,
    max_message_size: usize,
}

impl FrameDecoder {
    pub fn new(max_message_size: usize) -> Self {
        Self { partial: None, max_message_size }
    }

    /// Try to decode one logical unit (a control frame, or a fully
    /// reassembled data message) from the front of `buf`.
    ///
    /// Returns `Ok(None)` when more bytes are needed — in which case `buf`
    /// is left byte-for-byte unchanged — or when a continuation fragment
    /// was consumed but the message isn't finished yet.
    pub fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Frame>, ProtocolErrorKind> {
        let Some((header, total_len)) = Self::peek_header(buf)? else {
            return Ok(None);
        };

        if buf.len() < total_len {
            return Ok(None);
        }

        // Only now do we commit to consuming the frame from the buffer.
        // Server frames are never masked (rejected in peek_header), so the
        // payload bytes are used as-is.
        let mut raw = buf.split_to(total_len);
        raw.advance(header.prefix_len);
        let payload = raw.to_vec();

        self.assemble(header.opcode, header.fin, payload)
    }

    fn assemble(
        &mut self,
        opcode: OpCode,
        fin: bool,
        payload: Vec<u8>,
    ) -> Result<Option<Frame>, ProtocolErrorKind> {
        if opcode.is_control() {
            // Control frames are never fragmented and bypass reassembly
            // even if a data message is mid-flight.
            return Ok(Some(Frame::new(opcode, true, payload)));
        }

        match opcode {
            OpCode::Text | OpCode::Binary => {
                if self.partial.is_some() {
                    return Err(ProtocolErrorKind::FragmentationInProgress);
                }
                if payload.len() > self.max_message_size {
                    return Err(ProtocolErrorKind::MessageTooBig);
                }
                if fin {
                    Ok(Some(Frame::new(opcode, true, payload)))
                } else {
                    self.partial = Some(Partial { opcode, payload });
                    Ok(None)
                }
            }
            OpCode::Continuation => {
                let partial = self
                    .partial
                    .as_mut()
                    .ok_or(ProtocolErrorKind::UnexpectedContinuation)?;
                partial.payload.extend_from_slice(&payload);
                if partial.payload.len() > self.max_message_size {
                    self.partial = None;
                    return Err(ProtocolErrorKind::MessageTooBig);
                }
                if fin {
                    let Partial { opcode, payload } = self.partial.take().unwrap();
                    Ok(Some(Frame::new(opcode, true, payload)))
                } else {
                    Ok(None)
                }
            }
            _ => unreachable!("control opcodes handled above"),
        }
    }

    /// Peek at the frame header without consuming anything. Returns the
    /// parsed header plus the total on-wire length of the frame (header +
    /// mask + payload), or `None` if the buffer doesn't yet contain a full
    /// header/length-field/mask prefix.
    fn peek_header(buf: &BytesMut) -> Result<Option<(Header, usize)>, ProtocolErrorKind> {
        if buf.len() < 2 {
            return Ok(None);
        }

        let b0 = buf[0];
        let b1 = buf[1];

        let fin = b0 & 0b1000_0000 != 0;
        let rsv = b0 & 0b0111_0000;
        if rsv != 0 {
            return Err(ProtocolErrorKind::ReservedBitsSet);
        }
        let opcode = OpCode::from_u8(b0 & 0b0000_1111)?;

        let masked = b1 & 0b1000_0000 != 0;
        if masked {
            // server->client frames MUST NOT be masked.
            return Err(ProtocolErrorKind::MaskedServerFrame);
        }

        if opcode.is_control() && !fin {
            return Err(ProtocolErrorKind::ControlFrameFragmented);
        }

        let len7 = b1 & 0b0111_1111;
        let mut offset = 2usize;
        let payload_len: u64 = match len7 {
            0..=125 => len7 as u64,
            126 => {
                if buf.len() < offset + 2 {
                    return Ok(None);
                }
                let n = u16::from_be_bytes([buf[offset], buf[offset + 1]]);
                offset += 2;
                n as u64
            }
            127 => {
                if buf.len() < offset + 8 {
                    return Ok(None);
                }
                let mut bytes = [0u8; 8];
                bytes.copy_from_slice(&buf[offset..offset + 8]);
                offset += 8;
                u64::from_be_bytes(bytes)
            }
            _ => unreachable!("7-bit field"),
        };

        if opcode.is_control() && payload_len > 125 {
            return Err(ProtocolErrorKind::ControlFramePayloadTooLarge);
        }

        let prefix_len = offset;
        let total_len = prefix_len + payload_len as usize;

        Ok(Some((Header { opcode, fin, prefix_len }, total_len)))
    }
}

struct Header {
    opcode: OpCode,
    fin: bool,
    prefix_len: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::encode_frame_with_mask;

    fn server_frame(payload: &[u8], opcode: OpCode, fin: bool) -> BytesMut {
        BytesMut::from(&encode_frame_with_mask(payload, opcode, fin, false, [0; 4])[..])
    }

    #[test]
    fn decodes_single_complete_frame() {
        let mut buf = server_frame(b"hi", OpCode::Text, true);
        let mut decoder = FrameDecoder::new(1 << 20);
        let frame = decoder.decode(&mut buf).unwrap().unwrap();
        assert_eq!(frame.opcode, OpCode::Text);
        assert_eq!(frame.payload, b"hi");
        assert!(buf.is_empty());
    }

    #[test]
    fn leaves_buffer_untouched_on_incomplete_prefix() {
        let full = server_frame(b"hello world", OpCode::Text, true);
        let mut truncated = BytesMut::from(&full[..full.len() - 3]);
        let snapshot = truncated.clone();
        let mut decoder = FrameDecoder::new(1 << 20);
        let result = decoder.decode(&mut truncated).unwrap();
        assert!(result.is_none());
        assert_eq!(truncated, snapshot);
    }

    #[test]
    fn byte_at_a_time_matches_whole_buffer_decode() {
        let frame_bytes = server_frame(b"streaming payload", OpCode::Binary, true);

        let mut whole = frame_bytes.clone();
        let mut whole_decoder = FrameDecoder::new(1 << 20);
        let whole_result = whole_decoder.decode(&mut whole).unwrap().unwrap();

        let mut trickle = BytesMut::new();
        let mut trickle_decoder = FrameDecoder::new(1 << 20);
        let mut trickle_result = None;
        for byte in frame_bytes.iter() {
            trickle.extend_from_slice(&[*byte]);
            if let Some(frame) = trickle_decoder.decode(&mut trickle).unwrap() {
                trickle_result = Some(frame);
            }
        }

        assert_eq!(Some(whole_result), trickle_result);
    }

    #[test]
    fn reassembles_three_fragments() {
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&encode_frame_with_mask(
            &[b'a'; 100],
            OpCode::Text,
            false,
            false,
            [0; 4],
        ));
        buf.extend_from_slice(&encode_frame_with_mask(
            &[b'b'; 50],
            OpCode::Continuation,
            false,
            false,
            [0; 4],
        ));
        buf.extend_from_slice(&encode_frame_with_mask(
            &[b'c'; 50],
            OpCode::Continuation,
            true,
            false,
            [0; 4],
        ));

        let mut decoder = FrameDecoder::new(1 << 20);
        assert!(decoder.decode(&mut buf).unwrap().is_none());
        assert!(decoder.decode(&mut buf).unwrap().is_none());
        let frame = decoder.decode(&mut buf).unwrap().unwrap();
        assert_eq!(frame.opcode, OpCode::Text);
        assert_eq!(frame.payload.len(), 200);
        assert!(frame.payload[..100].iter().all(|&b| b == b'a'));
        assert!(frame.payload[100..150].iter().all(|&b| b == b'b'));
        assert!(frame.payload[150..].iter().all(|&b| b == b'c'));
    }

    #[test]
    fn ping_between_continuations_does_not_disturb_reassembly() {
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&encode_frame_with_mask(
            b"first-",
            OpCode::Text,
            false,
            false,
            [0; 4],
        ));
        buf.extend_from_slice(&encode_frame_with_mask(b"ping-payload", OpCode::Ping, true, false, [0; 4]));
        buf.extend_from_slice(&encode_frame_with_mask(
            b"second",
            OpCode::Continuation,
            true,
            false,
            [0; 4],
        ));

        let mut decoder = FrameDecoder::new(1 << 20);
        assert!(decoder.decode(&mut buf).unwrap().is_none()); // first fragment
        let ping = decoder.decode(&mut buf).unwrap().unwrap();
        assert_eq!(ping.opcode, OpCode::Ping);
        let message = decoder.decode(&mut buf).unwrap().unwrap();
        assert_eq!(message.opcode, OpCode::Text);
        assert_eq!(message.payload, b"first-second");
    }

    #[test]
    fn masked_server_frame_is_protocol_error() {
        let mut buf = BytesMut::from(
            &encode_frame_with_mask(b"x", OpCode::Text, true, true, [9, 9, 9, 9])[..],
        );
        let mut decoder = FrameDecoder::new(1 << 20);
        assert_eq!(
            decoder.decode(&mut buf).unwrap_err(),
            ProtocolErrorKind::MaskedServerFrame
        );
    }

    #[test]
    fn fragmented_control_frame_is_protocol_error() {
        let mut buf = BytesMut::from(&encode_frame_with_mask(b"x", OpCode::Ping, false, false, [0; 4])[..]);
        let mut decoder = FrameDecoder::new(1 << 20);
        assert_eq!(
            decoder.decode(&mut buf).unwrap_err(),
            ProtocolErrorKind::ControlFrameFragmented
        );
    }

    #[test]
    fn continuation_without_partial_is_protocol_error() {
        let mut buf = BytesMut::from(
            &encode_frame_with_mask(b"x", OpCode::Continuation, true, false, [0; 4])[..],
        );
        let mut decoder = FrameDecoder::new(1 << 20);
        assert_eq!(
            decoder.decode(&mut buf).unwrap_err(),
            ProtocolErrorKind::UnexpectedContinuation
        );
    }

    #[test]
    fn text_while_fragment_in_progress_is_protocol_error() {
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&encode_frame_with_mask(b"a", OpCode::Text, false, false, [0; 4]));
        buf.extend_from_slice(&encode_frame_with_mask(b"b", OpCode::Text, true, false, [0; 4]));

        let mut decoder = FrameDecoder::new(1 << 20);
        assert!(decoder.decode(&mut buf).unwrap().is_none());
        assert_eq!(
            decoder.decode(&mut buf).unwrap_err(),
            ProtocolErrorKind::FragmentationInProgress
        );
    }

    #[test]
    fn oversize_message_is_protocol_error() {
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&encode_frame_with_mask(&[0u8; 50], OpCode::Binary, false, false, [0; 4]));
        buf.extend_from_slice(&encode_frame_with_mask(&[0u8; 50], OpCode::Continuation, true, false, [0; 4]));

        let mut decoder = FrameDecoder::new(60);
        assert!(decoder.decode(&mut buf).unwrap().is_none());
        assert_eq!(
            decoder.decode(&mut buf).unwrap_err(),
            ProtocolErrorKind::MessageTooBig
        );
    }

    #[test]
    fn oversize_single_frame_message_is_protocol_error() {
        let mut buf = server_frame(&[0u8; 100], OpCode::Binary, true);
        let mut decoder = FrameDecoder::new(60);
        assert_eq!(
            decoder.decode(&mut buf).unwrap_err(),
            ProtocolErrorKind::MessageTooBig
        );
    }
}
