//! A `tokio::net::TcpStream` wrapper that gives Crane a connect/accept
//! surface plus graceful half-close, instead of handing Crane a bare
//! `TcpStream` (which already satisfies [`mesh_wire::PhysicalStream`] on
//! its own — this wraps it for the socket configuration and shutdown
//! semantics a real deployment needs around that).

use crate::error::TcpTransportError;
use socket2::SockRef;
use std::io;
use std::net::{Shutdown as StdShutdown, SocketAddr};
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio::net::{TcpListener as TokioTcpListener, TcpStream as TokioTcpStream};

/// Which side of the duplex connection to close (spec.md §A/§C4: a graceful
/// shutdown only closes the write half, letting the peer's remaining bytes
/// still arrive).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownDirection {
    Read,
    Write,
    Both,
}

/// Socket-level configuration applied once per connection (spec.md §A:
/// "graceful half-close" — `SO_LINGER` controls whether a lingering close
/// waits for the peer's FIN or gives up and sends RST).
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpSocketConfig {
    linger: Option<Duration>,
}

impl TcpSocketConfig {
    pub const fn new() -> Self {
        Self { linger: None }
    }

    pub fn with_linger(mut self, linger: Option<Duration>) -> Self {
        self.linger = linger;
        self
    }

    pub fn linger(&self) -> Option<Duration> {
        self.linger
    }

    fn apply(&self, stream: &TokioTcpStream) -> Result<(), TcpTransportError> {
        SockRef::from(stream).set_linger(self.linger).map_err(TcpTransportError::Configure)
    }
}

/// A connected TCP channel. Implements [`AsyncRead`]/[`AsyncWrite`] by
/// delegating straight to the inner stream, so it satisfies
/// [`mesh_wire::PhysicalStream`]'s blanket impl and can be handed to
/// `Crane::launch` directly.
#[derive(Debug)]
pub struct TcpChannel {
    stream: TokioTcpStream,
    local_addr: SocketAddr,
    peer_addr: SocketAddr,
}

impl TcpChannel {
    fn from_stream(stream: TokioTcpStream, config: TcpSocketConfig) -> Result<Self, TcpTransportError> {
        config.apply(&stream)?;
        let local_addr = stream.local_addr().map_err(TcpTransportError::Configure)?;
        let peer_addr = stream.peer_addr().map_err(TcpTransportError::Configure)?;
        Ok(Self { stream, local_addr, peer_addr })
    }

    pub async fn connect(addr: SocketAddr) -> Result<Self, TcpTransportError> {
        Self::connect_with_config(addr, TcpSocketConfig::default()).await
    }

    pub async fn connect_with_config(addr: SocketAddr, config: TcpSocketConfig) -> Result<Self, TcpTransportError> {
        let stream = TokioTcpStream::connect(addr).await.map_err(|err| TcpTransportError::Connect(addr, err))?;
        stream.set_nodelay(true).map_err(TcpTransportError::Configure)?;
        Self::from_stream(stream, config)
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// Close one or both directions without tearing down the whole socket
    /// immediately (spec.md §A: graceful half-close). `Write` sends a FIN
    /// via the normal `AsyncWrite::shutdown` path; `Read` stops the kernel
    /// from delivering further inbound bytes without touching the write
    /// side, which `tokio::net::TcpStream` has no direct async method for,
    /// so it goes through `socket2` instead.
    pub async fn shutdown(&mut self, direction: ShutdownDirection) -> Result<(), TcpTransportError> {
        match direction {
            ShutdownDirection::Write => AsyncWriteExt::shutdown(&mut self.stream).await.map_err(TcpTransportError::Shutdown),
            ShutdownDirection::Read => SockRef::from(&self.stream).shutdown(StdShutdown::Read).map_err(TcpTransportError::Shutdown),
            ShutdownDirection::Both => {
                AsyncWriteExt::shutdown(&mut self.stream).await.map_err(TcpTransportError::Shutdown)?;
                SockRef::from(&self.stream).shutdown(StdShutdown::Read).map_err(TcpTransportError::Shutdown)
            }
        }
    }

    /// Unwrap into the raw Tokio stream, e.g. to hand straight to
    /// `Crane::launch` without going through this type's own
    /// `AsyncRead`/`AsyncWrite` delegation.
    pub fn into_inner(self) -> TokioTcpStream {
        self.stream
    }
}

impl AsyncRead for TcpChannel {
    fn poll_read(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().stream).poll_read(cx, buf)
    }
}

impl AsyncWrite for TcpChannel {
    fn poll_write(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.get_mut().stream).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().stream).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().stream).poll_shutdown(cx)
    }
}

/// Wraps `tokio::net::TcpListener` to hand out [`TcpChannel`]s with a fixed
/// [`TcpSocketConfig`] applied to every accepted connection.
#[derive(Debug)]
pub struct TcpServerChannel {
    listener: TokioTcpListener,
    local_addr: SocketAddr,
    config: TcpSocketConfig,
}

impl TcpServerChannel {
    pub async fn bind(addr: SocketAddr) -> Result<Self, TcpTransportError> {
        Self::bind_with_config(addr, TcpSocketConfig::default()).await
    }

    pub async fn bind_with_config(addr: SocketAddr, config: TcpSocketConfig) -> Result<Self, TcpTransportError> {
        let listener = TokioTcpListener::bind(addr).await.map_err(|err| TcpTransportError::Bind(addr, err))?;
        let local_addr = listener.local_addr().map_err(|err| TcpTransportError::Bind(addr, err))?;
        Ok(Self { listener, local_addr, config })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub async fn accept(&self) -> Result<(TcpChannel, SocketAddr), TcpTransportError> {
        let (stream, peer) = self.listener.accept().await.map_err(TcpTransportError::Accept)?;
        stream.set_nodelay(true).map_err(TcpTransportError::Configure)?;
        let channel = TcpChannel::from_stream(stream, self.config)?;
        Ok((channel, peer))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test(flavor = "multi_thread")]
    async fn connect_and_accept_round_trip_bytes() {
        let server = TcpServerChannel::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let addr = server.local_addr();

        let client = tokio::spawn(async move {
            let mut channel = TcpChannel::connect(addr).await.unwrap();
            channel.write_all(b"hello").await.unwrap();
            channel
        });

        let (mut accepted, _peer) = server.accept().await.unwrap();
        let mut buf = [0u8; 5];
        accepted.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hello");

        client.await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn write_shutdown_delivers_eof_to_peer() {
        let server = TcpServerChannel::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let addr = server.local_addr();

        let client = tokio::spawn(async move {
            let mut channel = TcpChannel::connect(addr).await.unwrap();
            channel.shutdown(ShutdownDirection::Write).await.unwrap();
        });

        let (mut accepted, _peer) = server.accept().await.unwrap();
        let mut buf = Vec::new();
        let n = accepted.read_to_end(&mut buf).await.unwrap();
        assert_eq!(n, 0);

        client.await.unwrap();
    }
}
