//! Minimal async WebSockets broadcast server for the Tokio stack.
//!
//! This library implements the server side of the
//! [WebSocket Protocol RFC](https://datatracker.ietf.org/doc/html/rfc6455)
//! over plain TCP or TLS: it performs the opening handshake, reads frames
//! off the socket at exact boundaries, unmasks client payloads, reassembles
//! fragmented messages, and relays every completed message to all connected
//! peers through a single dispatcher task.
//!
//! A chat-style relay takes a few lines:
//!
//! ```no_run
//! use socket_relay::config::ServerConfig;
//! use socket_relay::server::WSServer;
//!
//! #[tokio::main]
//! async fn main() {
//!     let mut server = WSServer::new(ServerConfig::default());
//!     server.on_connect(|conn| println!("client {} connected", conn.id()));
//!     server.listen().await.unwrap();
//! }
//! ```

pub mod config;
pub mod connection;
pub mod error;
pub mod frame;
pub mod handshake;
pub mod message;
pub mod request;
pub mod server;

mod dispatcher;
mod read;
mod reassembly;
mod stream;
