use crate::error::Error;
use crate::frame::frame_length;
use bytes::BytesMut;
use log::debug;
use std::io::{self, ErrorKind};
use tokio::io::{AsyncRead, AsyncReadExt, ReadHalf};
use tokio::sync::mpsc::Sender;
use tokio::time::{timeout, Duration};

/// Sliding deadline on socket reads; an idle peer fails the read and the
/// connection moves to closing.
const IDLE_TIMEOUT: Duration = Duration::from_secs(60);

/// Limit the maximum amount of handshake data read to prevent a denial of
/// service attack.
const MAX_HANDSHAKE_SIZE: usize = 16 * 1024;

/// One complete inbound unit, ready for the connection's main loop: the
/// opening handshake bytes, or the bytes of exactly one frame.
pub(crate) enum Inbound {
    Handshake(Vec<u8>),
    FrameBuffer(Vec<u8>),
}

/// Socket-reader half of a connection.
///
/// Delivers at most one inbound event at a time: the channel is bounded at
/// capacity 1, so the next unit is not handed over before the main loop
/// consumed the previous one.
pub(crate) struct ReadStream<S> {
    read_half: ReadHalf<S>,
    inbound_tx: Sender<Inbound>,
    close_tx: Sender<()>,
    max_data_size: usize,
}

impl<S: AsyncRead> ReadStream<S> {
    pub fn new(
        read_half: ReadHalf<S>,
        inbound_tx: Sender<Inbound>,
        close_tx: Sender<()>,
        max_data_size: usize,
    ) -> Self {
        Self {
            read_half,
            inbound_tx,
            close_tx,
            max_data_size,
        }
    }

    /// Pump the socket until it fails or the main loop goes away, then
    /// raise the close signal so the stream gets released.
    pub async fn run(mut self, handshaken: bool) {
        if let Err(err) = self.poll_socket(handshaken).await {
            debug!("reader stopped: {}", err);
        }
        let _ = self.close_tx.try_send(());
    }

    async fn poll_socket(&mut self, handshaken: bool) -> Result<(), Error> {
        let mut buffer = BytesMut::with_capacity(self.max_data_size);

        if !handshaken {
            let request = self.read_handshake(&mut buffer).await?;
            self.inbound_tx
                .send(Inbound::Handshake(request))
                .await
                .map_err(|_| Error::CommunicationError)?;
        }

        loop {
            let frame_buffer = self.read_frame_buffer(&mut buffer).await?;
            self.inbound_tx
                .send(Inbound::FrameBuffer(frame_buffer))
                .await
                .map_err(|_| Error::CommunicationError)?;
        }
    }

    /// Accumulate until the blank line that terminates the header block.
    /// Bytes the peer pipelined behind the handshake stay in the buffer
    /// for frame reading.
    async fn read_handshake(&mut self, buffer: &mut BytesMut) -> Result<Vec<u8>, Error> {
        loop {
            if let Some(end) = find_header_end(buffer) {
                return Ok(buffer.split_to(end).to_vec());
            }
            if buffer.len() > MAX_HANDSHAKE_SIZE {
                return Err(Error::HandshakeTooLarge(MAX_HANDSHAKE_SIZE));
            }
            self.fill(buffer).await?;
        }
    }

    /// Cut exactly one frame using the length implied by its header.
    ///
    /// TCP gives no frame boundaries: a read may hold half a frame or
    /// several, so the header is parsed as soon as enough of it arrived
    /// and bytes are pulled until the full frame is in the buffer.
    async fn read_frame_buffer(&mut self, buffer: &mut BytesMut) -> Result<Vec<u8>, Error> {
        loop {
            match frame_length(buffer) {
                Ok(total) if buffer.len() >= total => {
                    return Ok(buffer.split_to(total).to_vec());
                }
                Ok(_) | Err(Error::InsufficientBytes) => self.fill(buffer).await?,
                Err(err) => return Err(err),
            }
        }
    }

    /// One socket read of at most `max_data_size` bytes, under the idle
    /// deadline.
    async fn fill(&mut self, buffer: &mut BytesMut) -> Result<(), Error> {
        let mut chunk = vec![0u8; self.max_data_size];
        let size = timeout(IDLE_TIMEOUT, self.read_half.read(&mut chunk)).await??;
        if size == 0 {
            return Err(io::Error::new(ErrorKind::UnexpectedEof, "peer closed the stream").into());
        }
        buffer.extend_from_slice(&chunk[..size]);
        Ok(())
    }
}

fn find_header_end(buffer: &[u8]) -> Option<usize> {
    buffer
        .windows(4)
        .position(|window| window == b"\r\n\r\n")
        .map(|position| position + 4)
}
