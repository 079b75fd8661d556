use crate::config::ServerConfig;
use crate::connection::{Connection, ConnectionHandle, DEFAULT_MAX_DATA_SIZE};
use crate::dispatcher::{
    ConnectionSet, DispatchEvent, Dispatcher, Hooks, EVENT_CAPACITY,
};
use crate::error::Error;
use crate::frame::{build_frames, OpCode};
use crate::handshake::accept_handshake;
use crate::message::Message;
use crate::request::Request;
use crate::stream::SocketRelayStream;
use log::{debug, error, info, warn};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::mpsc::{self, Receiver, Sender};
use tokio::sync::{watch, Mutex};
use tokio_rustls::TlsAcceptor;

/// A ready to use websockets broadcast server.
///
/// Every message a peer completes is fanned out to all connected peers
/// through a single dispatcher task; `on_connect`, `on_message` and
/// `on_close` hooks observe the lifecycle from that task. The server runs
/// until its handle signals shutdown.
pub struct WSServer {
    config: ServerConfig,
    connections: ConnectionSet,
    events_tx: Sender<DispatchEvent>,
    events_rx: Receiver<DispatchEvent>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
    hooks: Hooks,
}

impl WSServer {
    pub fn new(config: ServerConfig) -> Self {
        let (events_tx, events_rx) = mpsc::channel(EVENT_CAPACITY);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        WSServer {
            config,
            connections: Arc::new(Mutex::new(HashMap::new())),
            events_tx,
            events_rx,
            shutdown_tx,
            shutdown_rx,
            hooks: Hooks::default(),
        }
    }

    /// Hook invoked after a peer completes its handshake, right before it
    /// enters the connection set.
    pub fn on_connect(&mut self, hook: impl Fn(&ConnectionHandle) + Send + Sync + 'static) {
        self.hooks.on_connect = Some(Box::new(hook));
    }

    /// Hook invoked with the payload of every broadcast frame.
    pub fn on_message(&mut self, hook: impl Fn(&[u8]) + Send + Sync + 'static) {
        self.hooks.on_message = Some(Box::new(hook));
    }

    /// Hook invoked when a peer leaves the connection set.
    pub fn on_close(&mut self, hook: impl Fn(&ConnectionHandle) + Send + Sync + 'static) {
        self.hooks.on_close = Some(Box::new(hook));
    }

    /// Cloneable endpoints for notifying peers and shutting the server
    /// down, usable from any task while the server runs.
    pub fn handle(&self) -> ServerHandle {
        // A zero falls back to the same default the connections use, so
        // notify fragmentation never sees a zero chunk size.
        let max_data_size = if self.config.max_data_size == 0 {
            DEFAULT_MAX_DATA_SIZE
        } else {
            self.config.max_data_size
        };

        ServerHandle {
            connections: self.connections.clone(),
            events_tx: self.events_tx.clone(),
            shutdown_tx: self.shutdown_tx.clone(),
            max_data_size,
        }
    }

    /// Bind and serve plaintext connections until shutdown.
    pub async fn listen(self) -> Result<(), Error> {
        self.serve(None).await
    }

    /// Bind and serve TLS connections until shutdown. Requires a
    /// `tls_config` in the server configuration.
    pub async fn listen_tls(self) -> Result<(), Error> {
        let tls_config = self
            .config
            .tls_config
            .clone()
            .ok_or(Error::MissingTlsConfig)?;
        self.serve(Some(TlsAcceptor::from(tls_config))).await
    }

    async fn serve(self, acceptor: Option<TlsAcceptor>) -> Result<(), Error> {
        let addr = format!("{}:{}", self.config.host, self.config.port);
        let listener = TcpListener::bind(&addr).await?;
        info!(
            "listening on {}{}",
            addr,
            if acceptor.is_some() { " with TLS" } else { "" }
        );

        let dispatcher = Dispatcher::new(
            self.connections.clone(),
            self.events_rx,
            self.shutdown_rx.clone(),
            self.hooks,
        );
        let dispatcher_task = tokio::spawn(dispatcher.run());

        let mut shutdown_rx = self.shutdown_rx;
        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        debug!("accepted {}", peer);
                        let socket_stream = match &acceptor {
                            Some(acceptor) => match acceptor.accept(stream).await {
                                Ok(tls_stream) => SocketRelayStream::Secure(tls_stream),
                                Err(err) => {
                                    warn!("TLS accept failed for {}: {}", peer, err);
                                    continue;
                                }
                            },
                            None => SocketRelayStream::Plain(stream),
                        };

                        // The connection announces itself to the dispatcher
                        // only after its handshake succeeds; unhandshaken
                        // peers never enter the set.
                        Connection::accept(
                            socket_stream,
                            self.config.max_data_size,
                            self.events_tx.clone(),
                        );
                    }
                    Err(err) => {
                        error!("accept failed: {}", err);
                        continue;
                    }
                },
            }
        }

        let _ = dispatcher_task.await;
        Ok(())
    }
}

/// Endpoints for pushing server-originated messages and shutting down.
#[derive(Clone)]
pub struct ServerHandle {
    connections: ConnectionSet,
    events_tx: Sender<DispatchEvent>,
    shutdown_tx: watch::Sender<bool>,
    max_data_size: usize,
}

impl ServerHandle {
    /// Broadcast bytes to every connected peer.
    pub async fn notify(&self, data: Vec<u8>) -> Result<(), Error> {
        for frame in build_frames(data, OpCode::Binary, self.max_data_size) {
            self.events_tx
                .send(DispatchEvent::Broadcast(frame))
                .await
                .map_err(|_| Error::Shutdown)?;
        }
        Ok(())
    }

    /// Send bytes to a single peer. Fails with `NotConnected` when the
    /// peer is not in the connection set.
    pub async fn notify_to(&self, data: Vec<u8>, conn: &ConnectionHandle) -> Result<(), Error> {
        if !self.connections.lock().await.contains_key(&conn.id()) {
            return Err(Error::NotConnected);
        }

        for frame in build_frames(data, OpCode::Binary, self.max_data_size) {
            conn.enqueue(Message::Frame(frame)).await?;
        }
        Ok(())
    }

    /// Signal shutdown: every live connection gets a close, the dispatcher
    /// stops consuming events, and the accept loop winds down.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}

/// Adopt a byte stream whose HTTP connection was hijacked elsewhere, with
/// its opening request already parsed.
///
/// The request is validated with the same rules as the accept path, the
/// identical 101 response bytes are written to the stream, and the peer
/// joins the connection set. Returns the handle of the new connection.
pub async fn accept_upgraded<S>(
    stream: S,
    request: &Request,
    handle: &ServerHandle,
) -> Result<ConnectionHandle, Error>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let response = accept_handshake(request)?;
    Ok(Connection::adopt(
        stream,
        handle.max_data_size,
        handle.events_tx.clone(),
        response.to_bytes(),
    ))
}
