//! RFC 6455 frame codec, client side.
//!
//! Outbound frames are always final (no fragmentation) and masked, as the
//! protocol requires of clients. Inbound frames come from the router and must
//! be unmasked; fragmented messages are reassembled one layer up.

use rand::RngCore as _;

/// Frame-level protocol violations.
#[derive(Debug, thiserror::Error)]
pub(crate) enum FrameError {
    /// A reserved header bit was set (no extension was negotiated).
    #[error("reserved frame bits are set")]
    ReservedBits,
    /// The opcode is not one of the six RFC 6455 opcodes.
    #[error("unknown frame opcode {0:#x}")]
    UnknownOpcode(u8),
    /// Server frames must not be masked.
    #[error("server frame has the mask bit set")]
    MaskedServerFrame,
    /// The declared payload length cannot be represented in memory.
    #[error("frame payload length {0} is too large")]
    PayloadTooLarge(u64),
}

/// A WebSocket frame opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Opcode {
    Continuation,
    Text,
    Binary,
    Close,
    Ping,
    Pong,
}

impl Opcode {
    fn from_bits(bits: u8) -> Result<Self, FrameError> {
        match bits {
            0x0 => Ok(Opcode::Continuation),
            0x1 => Ok(Opcode::Text),
            0x2 => Ok(Opcode::Binary),
            0x8 => Ok(Opcode::Close),
            0x9 => Ok(Opcode::Ping),
            0xA => Ok(Opcode::Pong),
            other => Err(FrameError::UnknownOpcode(other)),
        }
    }

    fn bits(self) -> u8 {
        match self {
            Opcode::Continuation => 0x0,
            Opcode::Text => 0x1,
            Opcode::Binary => 0x2,
            Opcode::Close => 0x8,
            Opcode::Ping => 0x9,
            Opcode::Pong => 0xA,
        }
    }
}

/// One parsed inbound frame.
#[derive(Debug)]
pub(crate) struct Frame {
    pub(crate) fin: bool,
    pub(crate) opcode: Opcode,
    pub(crate) payload: Vec<u8>,
}

/// Outcome of feeding buffered bytes to the decoder.
///
/// `Incomplete` is the normal keep-accumulating signal, not an error: the
/// reader appends more bytes from the socket and tries again.
#[derive(Debug)]
pub(crate) enum Decoded {
    Frame {
        frame: Frame,
        /// How many bytes of the buffer the frame consumed.
        consumed: usize,
    },
    Incomplete,
}

const FIN: u8 = 0x80;
const RSV: u8 = 0x70;
const MASK: u8 = 0x80;

/// Parses one server frame from the front of `buf`.
pub(crate) fn decode(buf: &[u8]) -> Result<Decoded, FrameError> {
    if buf.len() < 2 {
        return Ok(Decoded::Incomplete);
    }
    if buf[0] & RSV != 0 {
        return Err(FrameError::ReservedBits);
    }
    let fin = buf[0] & FIN != 0;
    let opcode = Opcode::from_bits(buf[0] & 0x0F)?;
    if buf[1] & MASK != 0 {
        return Err(FrameError::MaskedServerFrame);
    }

    let (length, mut offset): (u64, usize) = match buf[1] & 0x7F {
        126 => {
            if buf.len() < 4 {
                return Ok(Decoded::Incomplete);
            }
            (u64::from(u16::from_be_bytes([buf[2], buf[3]])), 4)
        }
        127 => {
            if buf.len() < 10 {
                return Ok(Decoded::Incomplete);
            }
            let mut be = [0u8; 8];
            be.copy_from_slice(&buf[2..10]);
            (u64::from_be_bytes(be), 10)
        }
        n => (u64::from(n), 2),
    };

    let length = usize::try_from(length).map_err(|_| FrameError::PayloadTooLarge(length))?;
    let total = offset
        .checked_add(length)
        .ok_or(FrameError::PayloadTooLarge(length as u64))?;
    if buf.len() < total {
        return Ok(Decoded::Incomplete);
    }
    let payload = buf[offset..total].to_vec();
    offset = total;

    Ok(Decoded::Frame {
        frame: Frame {
            fin,
            opcode,
            payload,
        },
        consumed: offset,
    })
}

/// Encodes one final, masked client frame.
pub(crate) fn encode(opcode: Opcode, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len() + 14);
    out.push(FIN | opcode.bits());

    match payload.len() {
        len if len < 126 => out.push(MASK | len as u8),
        len if len <= u16::MAX as usize => {
            out.push(MASK | 126);
            out.extend_from_slice(&(len as u16).to_be_bytes());
        }
        len => {
            out.push(MASK | 127);
            out.extend_from_slice(&(len as u64).to_be_bytes());
        }
    }

    let mut key = [0u8; 4];
    rand::thread_rng().fill_bytes(&mut key);
    out.extend_from_slice(&key);
    out.extend(
        payload
            .iter()
            .enumerate()
            .map(|(i, byte)| byte ^ key[i % 4]),
    );
    out
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn server_frame(first: u8, payload: &[u8]) -> Vec<u8> {
        let mut bytes = vec![first];
        match payload.len() {
            len if len < 126 => bytes.push(len as u8),
            len if len <= u16::MAX as usize => {
                bytes.push(126);
                bytes.extend_from_slice(&(len as u16).to_be_bytes());
            }
            len => {
                bytes.push(127);
                bytes.extend_from_slice(&(len as u64).to_be_bytes());
            }
        }
        bytes.extend_from_slice(payload);
        bytes
    }

    fn decode_one(bytes: &[u8]) -> (Frame, usize) {
        match decode(bytes).unwrap() {
            Decoded::Frame { frame, consumed } => (frame, consumed),
            Decoded::Incomplete => panic!("frame should be complete"),
        }
    }

    #[test]
    fn decodes_a_short_text_frame() {
        let bytes = server_frame(0x81, br#"[2,1,{}]"#);
        let (frame, consumed) = decode_one(&bytes);
        assert!(frame.fin);
        assert_eq!(frame.opcode, Opcode::Text);
        assert_eq!(frame.payload, br#"[2,1,{}]"#);
        assert_eq!(consumed, bytes.len());
    }

    #[test]
    fn decodes_the_sixteen_bit_length_tier() {
        let payload = vec![b'x'; 600];
        let bytes = server_frame(0x81, &payload);
        let (frame, consumed) = decode_one(&bytes);
        assert_eq!(frame.payload.len(), 600);
        assert_eq!(consumed, 600 + 4);
    }

    #[test]
    fn decodes_the_sixty_four_bit_length_tier() {
        let payload = vec![b'x'; 70_000];
        let bytes = server_frame(0x82, &payload);
        let (frame, consumed) = decode_one(&bytes);
        assert_eq!(frame.opcode, Opcode::Binary);
        assert_eq!(frame.payload.len(), 70_000);
        assert_eq!(consumed, 70_000 + 10);
    }

    #[test]
    fn short_reads_report_incomplete_at_every_prefix() {
        let bytes = server_frame(0x81, b"hello");
        for cut in 0..bytes.len() {
            assert!(
                matches!(decode(&bytes[..cut]).unwrap(), Decoded::Incomplete),
                "prefix of {cut} bytes should be incomplete"
            );
        }
    }

    #[test]
    fn trailing_bytes_are_left_for_the_next_frame() {
        let mut bytes = server_frame(0x81, b"one");
        bytes.extend_from_slice(&server_frame(0x89, b""));
        let (frame, consumed) = decode_one(&bytes);
        assert_eq!(frame.payload, b"one");
        let (ping, _) = decode_one(&bytes[consumed..]);
        assert_eq!(ping.opcode, Opcode::Ping);
    }

    #[test]
    fn masked_server_frames_are_rejected() {
        let bytes = vec![0x81, 0x80 | 0x01, 1, 2, 3, 4, 0xFF];
        assert!(matches!(
            decode(&bytes),
            Err(FrameError::MaskedServerFrame)
        ));
    }

    #[test]
    fn reserved_bits_are_rejected() {
        let bytes = server_frame(0x81 | 0x40, b"x");
        assert!(matches!(decode(&bytes), Err(FrameError::ReservedBits)));
    }

    #[test]
    fn unknown_opcodes_are_rejected() {
        let bytes = server_frame(0x83, b"");
        assert!(matches!(
            decode(&bytes),
            Err(FrameError::UnknownOpcode(0x3))
        ));
    }

    #[test]
    fn encoded_client_frames_are_final_and_masked() {
        let payload = br#"[1,"realm1",{}]"#;
        let bytes = encode(Opcode::Text, payload);
        assert_eq!(bytes[0], 0x81);
        assert_eq!(bytes[1] & 0x80, 0x80, "mask bit must be set");
        assert_eq!(bytes[1] & 0x7F, payload.len() as u8);
        let key = &bytes[2..6];
        let unmasked: Vec<u8> = bytes[6..]
            .iter()
            .enumerate()
            .map(|(i, byte)| byte ^ key[i % 4])
            .collect();
        assert_eq!(unmasked, payload);
    }

    #[test]
    fn encoding_picks_the_right_length_tier() {
        let bytes = encode(Opcode::Text, &[b'x'; 200]);
        assert_eq!(bytes[1] & 0x7F, 126);
        assert_eq!(u16::from_be_bytes([bytes[2], bytes[3]]), 200);

        let bytes = encode(Opcode::Binary, &[b'x'; 70_000]);
        assert_eq!(bytes[1] & 0x7F, 127);
    }
}
