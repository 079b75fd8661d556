use crate::error::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpCode {
    Continue,
    Text,
    Binary,
    Close,
    Ping,
    Pong,
}

impl OpCode {
    pub fn from(byte: u8) -> Result<Self, Error> {
        match byte {
            0x0 => Ok(OpCode::Continue),
            0x1 => Ok(OpCode::Text),
            0x2 => Ok(OpCode::Binary),
            0x8 => Ok(OpCode::Close),
            0x9 => Ok(OpCode::Ping),
            0xA => Ok(OpCode::Pong),
            _ => Err(Error::InvalidOpcode),
        }
    }

    pub fn as_u8(&self) -> u8 {
        match self {
            OpCode::Continue => 0x0,
            OpCode::Text => 0x1,
            OpCode::Binary => 0x2,
            OpCode::Close => 0x8,
            OpCode::Ping => 0x9,
            OpCode::Pong => 0xA,
        }
    }

    pub fn is_control(&self) -> bool {
        matches!(self, OpCode::Close | OpCode::Ping | OpCode::Pong)
    }
}

/// A single protocol unit on the wire.
///
/// Masking keys are consumed during parsing; server frames are written
/// unmasked, so the decoded payload is all that needs to be kept.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub final_fragment: bool,
    pub opcode: OpCode,
    pub payload: Vec<u8>,
}

impl Frame {
    pub fn new(final_fragment: bool, opcode: OpCode, payload: Vec<u8>) -> Self {
        Self {
            final_fragment,
            opcode,
            payload,
        }
    }

    pub fn close() -> Self {
        Frame::new(true, OpCode::Close, Vec::new())
    }

    pub fn pong(payload: Vec<u8>) -> Self {
        Frame::new(true, OpCode::Pong, payload)
    }

    /// Decode one whole frame from the front of `buffer`.
    ///
    /// A buffer that ends before any decoding step completes yields
    /// `InsufficientBytes`; the caller is expected to read more bytes and
    /// retry. Everything else that deviates from the base protocol fails
    /// the frame: non-zero RSV bits, reserved opcodes, fragmented or
    /// oversized control frames, and length fields that are wider than
    /// their value requires.
    pub fn parse(buffer: &[u8]) -> Result<Frame, Error> {
        if buffer.len() < 2 {
            return Err(Error::InsufficientBytes);
        }

        // The first bit in the first byte tells us whether this frame is the
        // final fragment of a message, and the last 4 bits carry the opcode.
        let final_fragment = (buffer[0] & 0b1000_0000) != 0;

        // RSV bits are only meaningful when an extension was negotiated.
        // This server negotiates none, so any of them being set means the
        // connection has to fail.
        if buffer[0] & 0b0111_0000 != 0 {
            return Err(Error::RSVNotZero);
        }

        let opcode = OpCode::from(buffer[0] & 0b0000_1111)?;

        // Second byte: the mask bit, then a 7-bit payload length which may
        // spill over into a 16 or 64-bit extension.
        let masked = (buffer[1] & 0b1000_0000) != 0;
        let mut length = (buffer[1] & 0b0111_1111) as usize;

        let mut cursor = 2;
        if length == 126 {
            if buffer.len() < cursor + 2 {
                return Err(Error::InsufficientBytes);
            }
            length = u16::from_be_bytes([buffer[2], buffer[3]]) as usize;
            if length <= 125 {
                return Err(Error::NonMinimalPayloadLength);
            }
            cursor += 2;
        } else if length == 127 {
            if buffer.len() < cursor + 8 {
                return Err(Error::InsufficientBytes);
            }
            let mut be_bytes = [0u8; 8];
            be_bytes.copy_from_slice(&buffer[2..10]);
            let wide = u64::from_be_bytes(be_bytes);
            if wide & (1 << 63) != 0 {
                return Err(Error::OversizePayloadLength);
            }
            if wide <= 65535 {
                return Err(Error::NonMinimalPayloadLength);
            }
            length = wide as usize;
            cursor += 8;
        }

        // Control frames carry at most 125 bytes and are never fragmented.
        if opcode.is_control() {
            if !final_fragment {
                return Err(Error::ControlFramesFragmented);
            }
            if length > 125 {
                return Err(Error::ControlFramePayloadSize);
            }
        }

        let mask = if masked {
            if buffer.len() < cursor + 4 {
                return Err(Error::InsufficientBytes);
            }
            let mut key = [0u8; 4];
            key.copy_from_slice(&buffer[cursor..cursor + 4]);
            cursor += 4;
            Some(key)
        } else {
            None
        };

        if buffer.len() < cursor + length {
            return Err(Error::InsufficientBytes);
        }
        let mut payload = buffer[cursor..cursor + length].to_vec();

        // Client frames arrive masked: each payload byte was XORed with the
        // corresponding byte (modulo 4) of the 4-byte key, and the same
        // operation recovers the original data.
        if let Some(key) = mask {
            apply_mask(&mut payload, key);
        }

        Ok(Frame {
            final_fragment,
            opcode,
            payload,
        })
    }

    /// Serialize for server-to-client sending: unmasked, RSV all zero,
    /// and the smallest length encoding that fits the payload.
    pub fn to_bytes(&self) -> Vec<u8> {
        let first_byte = (self.final_fragment as u8) << 7 | self.opcode.as_u8();
        let payload_len = self.payload.len();

        let mut data = Vec::with_capacity(payload_len + 10);
        data.push(first_byte);

        if payload_len <= 125 {
            data.push(payload_len as u8);
        } else if payload_len <= 65535 {
            data.push(126);
            data.extend_from_slice(&(payload_len as u16).to_be_bytes());
        } else {
            data.push(127);
            data.extend_from_slice(&(payload_len as u64).to_be_bytes());
        }

        data.extend_from_slice(&self.payload);
        data
    }
}

/// On-wire size of the frame that starts at the first byte of `buffer`,
/// derived from the header alone.
///
/// This is what lets the socket reader cut exact frame boundaries out of
/// the TCP byte stream instead of guessing from read sizes.
pub fn frame_length(buffer: &[u8]) -> Result<usize, Error> {
    if buffer.len() < 2 {
        return Err(Error::InsufficientBytes);
    }

    let masked = (buffer[1] & 0b1000_0000) != 0;
    let len7 = (buffer[1] & 0b0111_1111) as usize;

    let (payload_len, header_len) = match len7 {
        126 => {
            if buffer.len() < 4 {
                return Err(Error::InsufficientBytes);
            }
            (u16::from_be_bytes([buffer[2], buffer[3]]) as usize, 4)
        }
        127 => {
            if buffer.len() < 10 {
                return Err(Error::InsufficientBytes);
            }
            let mut be_bytes = [0u8; 8];
            be_bytes.copy_from_slice(&buffer[2..10]);
            let wide = u64::from_be_bytes(be_bytes);
            if wide & (1 << 63) != 0 {
                return Err(Error::OversizePayloadLength);
            }
            (wide as usize, 10)
        }
        n => (n, 2),
    };

    Ok(header_len + if masked { 4 } else { 0 } + payload_len)
}

/// XOR `payload` with the 4-byte masking key. Applying it twice with the
/// same key is the identity.
pub fn apply_mask(payload: &mut [u8], key: [u8; 4]) {
    for (i, byte) in payload.iter_mut().enumerate() {
        *byte ^= key[i % 4];
    }
}

/// Split a complete message into the frames that carry it on the wire.
///
/// The first frame keeps the data opcode, every later one is a
/// continuation, and only the last has the FIN bit set. A message that
/// fits within `max_size` yields a single final frame.
pub fn build_frames(payload: Vec<u8>, opcode: OpCode, max_size: usize) -> Vec<Frame> {
    if payload.is_empty() {
        return vec![Frame::new(true, opcode, payload)];
    }

    let mut frames = Vec::new();
    for chunk in payload.chunks(max_size) {
        frames.push(Frame::new(
            false,
            if frames.is_empty() {
                opcode
            } else {
                OpCode::Continue
            },
            chunk.to_vec(),
        ));
    }

    if let Some(last_frame) = frames.last_mut() {
        last_frame.final_fragment = true;
    }

    frames
}
