use crate::error::Error;
use crate::request::Request;
use base64::prelude::BASE64_STANDARD;
use base64::Engine;
use sha1::{Digest, Sha1};

/// Sec-WebSocket-Accept calculation seed, fixed by RFC 6455.
pub(crate) const ACCEPT_KEY_SEED: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// The 101 Switching Protocols response for an accepted handshake.
pub struct Response {
    version: String,
    accept: String,
}

impl Response {
    pub fn new(request: &Request) -> Result<Response, Error> {
        let key = request
            .header("Sec-WebSocket-Key")
            .ok_or(Error::NoSecWebsocketKey)?;

        Ok(Response {
            version: request.version.clone(),
            accept: generate_websocket_accept_value(key),
        })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        format!(
            "{} 101 Switching Protocols\r\n\
             Upgrade: websocket\r\n\
             Connection: Upgrade\r\n\
             Sec-WebSocket-Accept: {}\r\n\
             \r\n",
            self.version, self.accept
        )
        .into_bytes()
    }
}

/// Validate an opening request and produce its 101 response.
pub fn accept_handshake(request: &Request) -> Result<Response, Error> {
    request.validate()?;
    Response::new(request)
}

/// The accept key proves the server understood the handshake: the SHA1 of
/// the trimmed client key concatenated with the fixed seed, base64-encoded.
pub(crate) fn generate_websocket_accept_value(key: &str) -> String {
    let mut sha1 = Sha1::new();
    sha1.update(key.trim().as_bytes());
    sha1.update(ACCEPT_KEY_SEED.as_bytes());
    BASE64_STANDARD.encode(sha1.finalize())
}
