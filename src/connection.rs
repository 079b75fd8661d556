use crate::dispatcher::DispatchEvent;
use crate::error::Error;
use crate::frame::{build_frames, Frame, OpCode};
use crate::handshake::accept_handshake;
use crate::message::Message;
use crate::read::{Inbound, ReadStream};
use crate::reassembly::FrameStack;
use crate::request::Request;
use log::{debug, warn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, WriteHalf};
use tokio::sync::mpsc::{self, Receiver, Sender};
use tokio::task::JoinHandle;
use uuid::Uuid;

pub type ID = Uuid;

pub(crate) const DEFAULT_MAX_DATA_SIZE: usize = 1024;

// Used for generating a new UUID, every time a new client connects the server
pub(crate) fn generate_new_uuid() -> Uuid {
    let mut rng = StdRng::from_entropy();
    let buf: [u8; 16] = rng.gen();

    Uuid::new_v8(buf)
}

/// Connection lifecycle. A peer only enters the dispatcher's set once it
/// reaches `Connected`, and leaves it exactly once on the way to `Closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Initialize,
    Opening,
    Connected,
    Closing,
    Closed,
}

/// Cheap cloneable identity of a live connection: the id the dispatcher
/// tracks membership by, plus the endpoints for queueing outbound bytes
/// and raising the close signal.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: ID,
    outbound_tx: Sender<Message>,
    close_tx: Sender<()>,
}

impl ConnectionHandle {
    pub(crate) fn new(id: ID, outbound_tx: Sender<Message>, close_tx: Sender<()>) -> Self {
        Self {
            id,
            outbound_tx,
            close_tx,
        }
    }

    pub fn id(&self) -> ID {
        self.id
    }

    pub(crate) async fn enqueue(&self, message: Message) -> Result<(), Error> {
        self.outbound_tx
            .send(message)
            .await
            .map_err(|_| Error::CommunicationError)
    }

    /// Raise the close signal. A full channel means a close is already
    /// pending, which is just as good.
    pub fn close(&self) {
        let _ = self.close_tx.try_send(());
    }
}

/// Per-peer unit owning one byte stream: drives the lifecycle, decides per
/// inbound frame whether to reassemble, pong, or close, and is the only
/// writer of its socket.
pub(crate) struct Connection<S> {
    id: ID,
    state: State,
    max_data_size: usize,
    write_half: WriteHalf<S>,
    frame_stack: FrameStack,
    inbound_rx: Receiver<Inbound>,
    outbound_tx: Sender<Message>,
    outbound_rx: Receiver<Message>,
    close_rx: Receiver<()>,
    events_tx: Sender<DispatchEvent>,
    handle: ConnectionHandle,
    reader: JoinHandle<()>,
    joined: bool,
    pending_join: bool,
}

impl<S: AsyncRead + AsyncWrite + Send + 'static> Connection<S> {
    /// Adopt a freshly accepted stream: the peer still has to handshake.
    pub fn accept(stream: S, max_data_size: usize, events_tx: Sender<DispatchEvent>) -> ConnectionHandle {
        Self::spawn(stream, max_data_size, events_tx, State::Initialize, None)
    }

    /// Adopt a stream whose handshake was already validated elsewhere;
    /// `response` is queued as the first bytes out, and the peer is
    /// announced to the dispatcher before any frame is processed.
    pub fn adopt(
        stream: S,
        max_data_size: usize,
        events_tx: Sender<DispatchEvent>,
        response: Vec<u8>,
    ) -> ConnectionHandle {
        Self::spawn(
            stream,
            max_data_size,
            events_tx,
            State::Connected,
            Some(response),
        )
    }

    fn spawn(
        stream: S,
        max_data_size: usize,
        events_tx: Sender<DispatchEvent>,
        state: State,
        greeting: Option<Vec<u8>>,
    ) -> ConnectionHandle {
        let max_data_size = if max_data_size == 0 {
            DEFAULT_MAX_DATA_SIZE
        } else {
            max_data_size
        };

        let id = generate_new_uuid();
        let (read_half, write_half) = tokio::io::split(stream);
        let (inbound_tx, inbound_rx) = mpsc::channel(1);
        let (outbound_tx, outbound_rx) = mpsc::channel(1);
        let (close_tx, close_rx) = mpsc::channel(1);

        let handle = ConnectionHandle::new(id, outbound_tx.clone(), close_tx.clone());

        let handshaken = state == State::Connected;
        let reader = ReadStream::new(read_half, inbound_tx, close_tx, max_data_size);
        let reader_task = tokio::spawn(reader.run(handshaken));

        let connection = Connection {
            id,
            state,
            max_data_size,
            write_half,
            frame_stack: FrameStack::new(),
            inbound_rx,
            outbound_tx,
            outbound_rx,
            close_rx,
            events_tx,
            handle: handle.clone(),
            reader: reader_task,
            joined: false,
            pending_join: handshaken,
        };

        if let Some(bytes) = greeting {
            // Nothing else can produce yet, the peer is not in the set.
            let _ = connection.outbound_tx.try_send(Message::Handshake(bytes));
        }

        tokio::spawn(connection.run());
        handle
    }

    async fn run(mut self) {
        // Adopted streams are already handshaken; announce them before the
        // first frame so membership precedes any fan-out they trigger.
        if self.pending_join {
            match self
                .events_tx
                .send(DispatchEvent::Join(self.handle.clone()))
                .await
            {
                Ok(()) => self.joined = true,
                Err(_) => self.state = State::Closing,
            }
        }

        while self.state != State::Closing {
            tokio::select! {
                inbound = self.inbound_rx.recv() => match inbound {
                    Some(event) => {
                        if let Err(err) = self.handle_inbound(event).await {
                            debug!("connection {}: {}", self.id, err);
                            self.state = State::Closing;
                        }
                    }
                    None => self.state = State::Closing,
                },
                Some(message) = self.outbound_rx.recv() => {
                    if let Err(err) = self.write_message(message).await {
                        debug!("connection {}: write failed: {}", self.id, err);
                        self.state = State::Closing;
                    }
                }
                Some(_) = self.close_rx.recv() => {
                    self.state = State::Closing;
                    self.drain_outbound().await;
                    let _ = self.write_message(Message::Frame(Frame::close())).await;
                }
                else => self.state = State::Closing,
            }
        }

        self.release().await;
    }

    async fn handle_inbound(&mut self, event: Inbound) -> Result<(), Error> {
        match (self.state, event) {
            (State::Initialize, Inbound::Handshake(raw)) => self.handle_handshake(&raw).await,
            (State::Connected, Inbound::FrameBuffer(buffer)) => {
                let frame = Frame::parse(&buffer)?;
                self.handle_frame(frame).await
            }
            // A unit arriving in any other state is dropped; the reader is
            // strictly sequential, so this only happens while closing.
            _ => Ok(()),
        }
    }

    async fn handle_handshake(&mut self, raw: &[u8]) -> Result<(), Error> {
        self.state = State::Opening;

        let response = match Request::parse(raw).and_then(|request| accept_handshake(&request)) {
            Ok(response) => response,
            Err(err) => {
                // Closed without any response bytes.
                warn!("connection {}: invalid handshake: {}", self.id, err);
                self.state = State::Closing;
                return Ok(());
            }
        };

        // The channel is empty before the peer joins the set, so this
        // cannot contend with fan-out.
        self.outbound_tx
            .send(Message::Handshake(response.to_bytes()))
            .await
            .map_err(|_| Error::CommunicationError)?;
        self.state = State::Connected;

        self.events_tx
            .send(DispatchEvent::Join(self.handle.clone()))
            .await
            .map_err(|_| Error::CommunicationError)?;
        self.joined = true;

        Ok(())
    }

    async fn handle_frame(&mut self, frame: Frame) -> Result<(), Error> {
        match frame.opcode {
            OpCode::Text | OpCode::Binary | OpCode::Continue => {
                if let Some((opcode, payload)) = self.frame_stack.push(frame)? {
                    for frame in build_frames(payload, opcode, self.max_data_size) {
                        self.events_tx
                            .send(DispatchEvent::Broadcast(frame))
                            .await
                            .map_err(|_| Error::CommunicationError)?;
                    }
                }
            }
            OpCode::Close => {
                // The peer initiated: echo a close frame before releasing.
                self.state = State::Closing;
                let _ = self.write_message(Message::Frame(Frame::close())).await;
            }
            OpCode::Ping => {
                // Pongs go straight back to the peer that pinged, never
                // through the dispatcher.
                self.write_message(Message::Frame(Frame::pong(frame.payload)))
                    .await?;
            }
            OpCode::Pong => {}
        }

        Ok(())
    }

    async fn write_message(&mut self, message: Message) -> Result<(), Error> {
        self.write_half.write_all(&message.into_bytes()).await?;
        self.write_half.flush().await?;
        Ok(())
    }

    /// Flush whatever the dispatcher already queued before the stream is
    /// released.
    async fn drain_outbound(&mut self) {
        while let Ok(message) = self.outbound_rx.try_recv() {
            if self.write_message(message).await.is_err() {
                break;
            }
        }
    }

    async fn release(&mut self) {
        self.reader.abort();

        // Refuse further fan-out bytes so the dispatcher can never block
        // on a departing peer, then flush what it already queued.
        self.outbound_rx.close();
        self.drain_outbound().await;

        if self.joined {
            let _ = self.events_tx.send(DispatchEvent::Leave(self.id)).await;
        }

        let _ = self.write_half.shutdown().await;
        self.state = State::Closed;
        debug!("connection {} released", self.id);
    }
}
