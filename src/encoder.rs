//! Outbound frame encoding.
//!
//! Pure functions: given a payload and framing parameters, produce the exact
//! bytes to write to the transport. No I/O happens here, so encoding can be
//! tested in isolation from a socket.

use crate::frame::OpCode;
use rand::Rng;

/// Encode a single frame. `masked` is always `true` for this client-side
/// crate; the parameter exists so the tests in this module can exercise
/// the unmasked branch too, since the masking transform itself doesn't
/// care which direction a frame is traveling.
pub fn encode_frame(payload: &[u8], opcode: OpCode, fin: bool, masked: bool) -> Vec<u8> {
    let mask = if masked { random_mask() } else { [0u8; 4] };
    encode_frame_with_mask(payload, opcode, fin, masked, mask)
}

/// Fresh 32 bits of CSPRNG randomness for one outbound frame's mask key.
/// Never reused across frames and never derived from a fixed seed.
pub fn random_mask() -> [u8; 4] {
    rand::rng().random::<[u8; 4]>()
}

/// Same as [`encode_frame`] but with an explicit mask key, so tests can
/// assert on exact wire bytes.
pub fn encode_frame_with_mask(
    payload: &[u8],
    opcode: OpCode,
    fin: bool,
    masked: bool,
    mask: [u8; 4],
) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len() + 14);

    let first_byte = ((fin as u8) << 7) | opcode.as_u8();
    out.push(first_byte);

    let len = payload.len();
    let mask_bit = if masked { 0b1000_0000 } else { 0 };
    if len <= 125 {
        out.push(mask_bit | len as u8);
    } else if len <= 65535 {
        out.push(mask_bit | 126);
        out.extend_from_slice(&(len as u16).to_be_bytes());
    } else {
        out.push(mask_bit | 127);
        out.extend_from_slice(&(len as u64).to_be_bytes());
    }

    if masked {
        out.extend_from_slice(&mask);
        out.extend(payload.iter().enumerate().map(|(i, b)| b ^ mask[i % 4]));
    } else {
        out.extend_from_slice(payload);
    }

    out
}

/// Split `payload` into one or more frames obeying `max_frame_size`. The
/// first frame carries `opcode`; later ones carry `Continuation`. Never used
/// for control frames — callers must not segment those.
pub fn segment(
    payload: &[u8],
    opcode: OpCode,
    max_frame_size: usize,
) -> Vec<(OpCode, bool, &[u8])> {
    debug_assert!(!opcode.is_control(), "control frames must never be segmented");

    if payload.is_empty() {
        return vec![(opcode, true, payload)];
    }

    let chunks: Vec<&[u8]> = payload.chunks(max_frame_size.max(1)).collect();
    let last = chunks.len() - 1;
    chunks
        .into_iter()
        .enumerate()
        .map(|(i, chunk)| {
            let op = if i == 0 { opcode } else { OpCode::Continuation };
            (op, i == last, chunk)
        })
        .collect()
}
