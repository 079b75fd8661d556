use crate::frame::Frame;

/// One unit on a connection's outbound write channel.
///
/// Broadcast fan-out serializes a frame once and hands every peer a copy
/// of the raw bytes; targeted sends and the handshake response carry their
/// own form and are rendered at write time.
#[derive(Debug, Clone)]
pub enum Message {
    Handshake(Vec<u8>),
    Frame(Frame),
    Raw(Vec<u8>),
}

impl Message {
    pub fn into_bytes(self) -> Vec<u8> {
        match self {
            Message::Handshake(bytes) => bytes,
            Message::Frame(frame) => frame.to_bytes(),
            Message::Raw(bytes) => bytes,
        }
    }
}
