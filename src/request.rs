use crate::error::Error;
use base64::prelude::BASE64_STANDARD;
use base64::Engine;
use std::collections::HashMap;

/// A parsed WebSocket opening handshake request.
///
/// Header names are kept case-sensitive, the way they appeared on the
/// wire; only the Upgrade and Connection header values are compared
/// case-insensitively during validation.
#[derive(Debug)]
pub struct Request {
    pub method: String,
    pub path: String,
    pub version: String,
    pub headers: HashMap<String, String>,
}

impl Request {
    /// Parse the opening request bytes: a request line of exactly three
    /// tokens, then `Name: value` header lines until the first empty line.
    pub fn parse(raw: &[u8]) -> Result<Request, Error> {
        let text = String::from_utf8(raw.to_vec())?;
        let mut lines = text.split("\r\n");

        // e.g. GET /chat HTTP/1.1
        let request_line = lines.next().ok_or(Error::InvalidHTTPHandshake)?;
        let mut parts = request_line.split_whitespace();
        let method = parts.next().ok_or(Error::InvalidHTTPHandshake)?.to_string();
        let path = parts.next().ok_or(Error::InvalidHTTPHandshake)?.to_string();
        let version = parts.next().ok_or(Error::InvalidHTTPHandshake)?.to_string();
        if parts.next().is_some() {
            return Err(Error::InvalidHTTPHandshake);
        }

        let mut headers = HashMap::new();
        for line in lines {
            if line.is_empty() {
                break;
            }
            let (key, value) = line.split_once(": ").ok_or(Error::InvalidHTTPHandshake)?;
            headers.insert(key.to_string(), value.to_string());
        }

        Ok(Request {
            method,
            path,
            version,
            headers,
        })
    }

    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers.get(key).map(String::as_str)
    }

    /// Decide whether this request opens a WebSocket session.
    ///
    /// Everything here must hold, and the first rule that fails names the
    /// error the connection is closed with.
    pub fn validate(&self) -> Result<(), Error> {
        if self.method != "GET" {
            return Err(Error::InvalidHandshakeMethod);
        }

        if self.path.is_empty() {
            return Err(Error::EmptyHandshakePath);
        }

        if self.header("Host").is_none() {
            return Err(Error::NoHostHeaderPresent);
        }

        match self.header("Upgrade") {
            Some(value) if value.to_lowercase().contains("websocket") => {}
            _ => return Err(Error::NoUpgradeHeaderPresent),
        }

        match self.header("Connection") {
            Some(value) if value.to_lowercase().contains("upgrade") => {}
            _ => return Err(Error::NoConnectionHeaderPresent),
        }

        // The key itself is opaque, but it has to be the base64 form of
        // exactly 16 bytes.
        let key = self.header("Sec-WebSocket-Key").ok_or(Error::NoSecWebsocketKey)?;
        let decoded = BASE64_STANDARD
            .decode(key.trim())
            .map_err(|_| Error::InvalidSecWebsocketKey)?;
        if decoded.len() != 16 {
            return Err(Error::InvalidSecWebsocketKey);
        }

        match self.header("Sec-WebSocket-Version") {
            Some(version) if version.trim() == "13" => Ok(()),
            _ => Err(Error::InvalidWebsocketVersion),
        }
    }
}
