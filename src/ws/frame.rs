// WebSocket frame codec (RFC 6455 section 5), unextended and unfragmented
//
//  0               1               2               3
//  F R R R opcode  M len7          extended length (0, 2 or 8 bytes)
//  masking key (4 bytes, client frames only)         payload ...

use std::io::{self, Read};

pub const OPCODE_CONTINUATION: u8 = 0x0;
pub const OPCODE_TEXT: u8 = 0x1;
pub const OPCODE_CLOSE: u8 = 0x8;

const FIN_BIT: u8 = 0x80;
const MASK_BIT: u8 = 0x80;
const LEN_16: u8 = 126;
const LEN_64: u8 = 127;

/// Largest payload accepted from a peer
pub const MAX_PAYLOAD_LEN: u64 = 1 << 20;

/// Close frame with no status code
pub const CLOSE_FRAME: [u8; 2] = [FIN_BIT | OPCODE_CLOSE, 0x00];

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Client frame is not masked")]
    Unmasked,

    #[error("Fragmented frames are not supported")]
    Fragmented,

    #[error("Unsupported opcode 0x{0:x}")]
    UnsupportedOpcode(u8),

    #[error("Peer sent close")]
    Closed,

    #[error("Payload of {0} bytes exceeds limit")]
    PayloadTooLarge(u64),

    #[error("Text payload is not valid UTF-8")]
    InvalidUtf8,
}

impl ProtocolError {
    /// Orderly end of the session rather than a violation
    pub fn is_disconnect(&self) -> bool {
        match self {
            ProtocolError::Closed => true,
            ProtocolError::Io(e) => matches!(
                e.kind(),
                io::ErrorKind::UnexpectedEof | io::ErrorKind::ConnectionReset | io::ErrorKind::ConnectionAborted
            ),
            _ => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub fin: bool,
    pub opcode: u8,
    pub masked: bool,
    pub payload_len: u64,
    pub mask_key: [u8; 4],
    /// Already unmasked
    pub payload: Vec<u8>,
}

fn apply_mask(payload: &mut [u8], key: [u8; 4]) {
    for (i, byte) in payload.iter_mut().enumerate() {
        *byte ^= key[i % 4];
    }
}

/// Decode one client frame. Unmasked frames are rejected before the payload is read.
pub fn read_frame<R: Read>(reader: &mut R) -> Result<Frame, ProtocolError> {
    let mut header = [0u8; 2];
    reader.read_exact(&mut header)?;

    let fin = header[0] & FIN_BIT != 0;
    let opcode = header[0] & 0x0F;
    let masked = header[1] & MASK_BIT != 0;

    let payload_len = match header[1] & 0x7F {
        LEN_16 => {
            let mut ext = [0u8; 2];
            reader.read_exact(&mut ext)?;
            u64::from(u16::from_be_bytes(ext))
        }
        LEN_64 => {
            let mut ext = [0u8; 8];
            reader.read_exact(&mut ext)?;
            u64::from_be_bytes(ext)
        }
        len7 => u64::from(len7),
    };

    if !masked {
        return Err(ProtocolError::Unmasked);
    }
    if payload_len > MAX_PAYLOAD_LEN {
        return Err(ProtocolError::PayloadTooLarge(payload_len));
    }

    let mut mask_key = [0u8; 4];
    reader.read_exact(&mut mask_key)?;

    let mut payload = vec![0u8; payload_len as usize];
    reader.read_exact(&mut payload)?;
    apply_mask(&mut payload, mask_key);

    Ok(Frame {
        fin,
        opcode,
        masked,
        payload_len,
        mask_key,
        payload,
    })
}

/// Read the next application message: a complete text frame
pub fn read_text<R: Read>(reader: &mut R) -> Result<String, ProtocolError> {
    let frame = read_frame(reader)?;
    match (frame.fin, frame.opcode) {
        (_, OPCODE_CLOSE) => Err(ProtocolError::Closed),
        (true, OPCODE_TEXT) => String::from_utf8(frame.payload).map_err(|_| ProtocolError::InvalidUtf8),
        (false, _) | (_, OPCODE_CONTINUATION) => Err(ProtocolError::Fragmented),
        (_, opcode) => Err(ProtocolError::UnsupportedOpcode(opcode)),
    }
}

/// Encode a single final frame. Clients pass a mask key, servers pass `None`.
pub fn encode_frame(payload: &[u8], opcode: u8, mask: Option<[u8; 4]>) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len() + 14);
    out.push(FIN_BIT | (opcode & 0x0F));

    let mask_bit = if mask.is_some() { MASK_BIT } else { 0 };
    match payload.len() {
        len @ 0..=125 => out.push(mask_bit | len as u8),
        len @ 126..=0xFFFF => {
            out.push(mask_bit | LEN_16);
            out.extend_from_slice(&(len as u16).to_be_bytes());
        }
        len => {
            out.push(mask_bit | LEN_64);
            out.extend_from_slice(&(len as u64).to_be_bytes());
        }
    }

    match mask {
        Some(key) => {
            out.extend_from_slice(&key);
            let start = out.len();
            out.extend_from_slice(payload);
            apply_mask(&mut out[start..], key);
        }
        None => out.extend_from_slice(payload),
    }
    out
}

pub fn encode_text(text: &str, mask: Option<[u8; 4]>) -> Vec<u8> {
    encode_frame(text.as_bytes(), OPCODE_TEXT, mask)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    const KEY: [u8; 4] = [0x37, 0xfa, 0x21, 0x3d];

    #[test]
    fn test_rfc_masked_hello() {
        // RFC 6455 5.7: single-frame masked text "Hello"
        let wire = [0x81, 0x85, 0x37, 0xfa, 0x21, 0x3d, 0x7f, 0x9f, 0x4d, 0x51, 0x58];
        assert_eq!(encode_text("Hello", Some(KEY)), wire);

        let frame = read_frame(&mut Cursor::new(wire)).unwrap();
        assert!(frame.fin && frame.masked);
        assert_eq!(frame.opcode, OPCODE_TEXT);
        assert_eq!(frame.payload, b"Hello");
    }

    #[test]
    fn test_all_length_encodings_decode() {
        for (len, header_len) in [(10usize, 2usize), (200, 4), (70_000, 10)] {
            let payload: Vec<u8> = (0..len).map(|i| b'a' + (i % 26) as u8).collect();
            let wire = encode_frame(&payload, OPCODE_TEXT, Some(KEY));
            assert_eq!(wire.len(), header_len + 4 + len);

            let mut reader = Cursor::new(wire);
            let text = read_text(&mut reader).unwrap();
            assert_eq!(text.as_bytes(), payload.as_slice());
            assert_eq!(reader.position() as usize, header_len + 4 + len);
        }
    }

    #[test]
    fn test_unmasked_frame_rejected() {
        let wire = encode_text("forward", None);
        assert!(matches!(
            read_frame(&mut Cursor::new(wire)),
            Err(ProtocolError::Unmasked)
        ));
    }

    #[test]
    fn test_close_and_unsupported_frames() {
        let close = encode_frame(&[], OPCODE_CLOSE, Some(KEY));
        let err = read_text(&mut Cursor::new(close)).unwrap_err();
        assert!(matches!(err, ProtocolError::Closed));
        assert!(err.is_disconnect());

        let binary = encode_frame(b"\x01\x02", 0x2, Some(KEY));
        assert!(matches!(
            read_text(&mut Cursor::new(binary)),
            Err(ProtocolError::UnsupportedOpcode(0x2))
        ));

        let mut fragment = encode_text("forw", Some(KEY));
        fragment[0] &= !FIN_BIT;
        assert!(matches!(
            read_text(&mut Cursor::new(fragment)),
            Err(ProtocolError::Fragmented)
        ));
    }

    #[test]
    fn test_truncated_and_oversized() {
        let mut wire = encode_text("forward", Some(KEY));
        wire.truncate(wire.len() - 2);
        let err = read_text(&mut Cursor::new(wire)).unwrap_err();
        assert!(err.is_disconnect());

        let mut huge = vec![FIN_BIT | OPCODE_TEXT, MASK_BIT | LEN_64];
        huge.extend_from_slice(&(MAX_PAYLOAD_LEN + 1).to_be_bytes());
        assert!(matches!(
            read_frame(&mut Cursor::new(huge)),
            Err(ProtocolError::PayloadTooLarge(_))
        ));
    }

    #[test]
    fn test_server_close_frame() {
        assert_eq!(encode_frame(&[], OPCODE_CLOSE, None), CLOSE_FRAME);
    }
}
