use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio_rustls::server::TlsStream;

/// The byte stream under a connection: a plain TCP socket or one already
/// wrapped by the TLS acceptor.
pub enum SocketRelayStream {
    Plain(TcpStream),
    Secure(TlsStream<TcpStream>),
}

impl AsyncRead for SocketRelayStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            SocketRelayStream::Plain(stream) => Pin::new(stream).poll_read(cx, buf),
            SocketRelayStream::Secure(stream) => Pin::new(stream).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for SocketRelayStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            SocketRelayStream::Plain(stream) => Pin::new(stream).poll_write(cx, buf),
            SocketRelayStream::Secure(stream) => Pin::new(stream).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            SocketRelayStream::Plain(stream) => Pin::new(stream).poll_flush(cx),
            SocketRelayStream::Secure(stream) => Pin::new(stream).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            SocketRelayStream::Plain(stream) => Pin::new(stream).poll_shutdown(cx),
            SocketRelayStream::Secure(stream) => Pin::new(stream).poll_shutdown(cx),
        }
    }
}
