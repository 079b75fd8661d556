use std::io;
use std::string::FromUtf8Error;
use thiserror::Error;
use tokio::time::error::Elapsed;

#[derive(Error, Debug)]
pub enum Error {
    // Channel errors
    #[error("channel communication error")]
    CommunicationError,

    // General errors
    #[error("{source}")]
    Timeout {
        #[from]
        source: Elapsed,
    },

    #[error("IO Error happened: {source}")]
    IOError {
        #[from]
        source: io::Error,
    },

    #[error("{source}")]
    FromUtf8Error {
        #[from]
        source: FromUtf8Error,
    },

    // Handshake errors
    #[error("Invalid handshake request line")]
    InvalidHTTPHandshake,

    #[error("Handshake request method must be GET")]
    InvalidHandshakeMethod,

    #[error("Handshake request path must not be empty")]
    EmptyHandshakePath,

    #[error("Host header missing in the request")]
    NoHostHeaderPresent,

    #[error("Upgrade: websocket header missing in the request")]
    NoUpgradeHeaderPresent,

    #[error("Connection: Upgrade header missing in the request")]
    NoConnectionHeaderPresent,

    #[error("Couldn't find Sec-WebSocket-Key header in the request")]
    NoSecWebsocketKey,

    #[error("Sec-WebSocket-Key must base64-decode to 16 bytes")]
    InvalidSecWebsocketKey,

    #[error("Unsupported Sec-WebSocket-Version, only 13 is accepted")]
    InvalidWebsocketVersion,

    #[error("Handshake request larger than {0} bytes")]
    HandshakeTooLarge(usize),

    // Framing errors
    #[error("Incomplete frame, more bytes required")]
    InsufficientBytes,

    #[error("RSV not zero")]
    RSVNotZero,

    #[error("Invalid Opcode")]
    InvalidOpcode,

    #[error("Control frames must not be fragmented")]
    ControlFramesFragmented,

    #[error("Control frame with invalid payload size, can't be greater than 125")]
    ControlFramePayloadSize,

    #[error("64-bit payload length with the most significant bit set")]
    OversizePayloadLength,

    #[error("Payload length not encoded in its smallest form")]
    NonMinimalPayloadLength,

    // Fragmentation errors
    #[error("Incoming fragmented message but there is one already in progress")]
    FragmentedInProgress,

    #[error("Invalid continuation frame: no fragmented message to continue")]
    InvalidContinuationFrame,

    // Server errors
    #[error("Peer is not connected to this server")]
    NotConnected,

    #[error("listen_tls requires a tls_config")]
    MissingTlsConfig,

    #[error("Server is shutting down")]
    Shutdown,
}
