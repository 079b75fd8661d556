use crate::error::Error;
use crate::frame::{Frame, OpCode};

/// Accumulates the data frames of one fragmented message until the final
/// fragment arrives. Control frames never pass through here.
#[derive(Default)]
pub(crate) struct FrameStack {
    frames: Vec<Frame>,
}

impl FrameStack {
    pub fn new() -> Self {
        Self { frames: Vec::new() }
    }

    /// Feed one data frame.
    ///
    /// Returns the reassembled message once a FIN frame lands: the opcode
    /// of the first fragment plus the payloads concatenated in arrival
    /// order. A Text or Binary frame while another message is still being
    /// assembled, or a Continue frame with nothing to continue, fails the
    /// connection.
    pub fn push(&mut self, frame: Frame) -> Result<Option<(OpCode, Vec<u8>)>, Error> {
        match frame.opcode {
            OpCode::Text | OpCode::Binary => {
                if !self.frames.is_empty() {
                    return Err(Error::FragmentedInProgress);
                }
            }
            OpCode::Continue => {
                if self.frames.is_empty() {
                    return Err(Error::InvalidContinuationFrame);
                }
            }
            _ => return Err(Error::InvalidOpcode),
        }

        let final_fragment = frame.final_fragment;
        self.frames.push(frame);

        if !final_fragment {
            return Ok(None);
        }

        let opcode = self.frames[0].opcode;
        let mut payload = Vec::new();
        for frame in self.frames.drain(..) {
            payload.extend_from_slice(&frame.payload);
        }

        Ok(Some((opcode, payload)))
    }
}
