//! Connection streams handed from dialers to the transport.
//!
//! [`Stream`] implements enum-dispatch for [`AsyncRead`] and [`AsyncWrite`] around the
//! concrete stream types a dialer might produce, so that the transport (and the response
//! body which eventually owns the connection) can work with a single type.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use pin_project::pin_project;
use tokio::io::{AsyncRead, AsyncWrite, DuplexStream, ReadBuf};
use tokio::net::TcpStream;
#[cfg(target_family = "unix")]
use tokio::net::UnixStream;

#[derive(Debug)]
#[pin_project(project = StreamCoreProjection)]
enum StreamCore {
    /// A TCP stream
    Tcp(#[pin] TcpStream),

    /// A Unix domain socket stream
    #[cfg(target_family = "unix")]
    Unix(#[pin] UnixStream),

    /// An in-memory duplex stream
    Duplex(#[pin] DuplexStream),
}

/// A connection to an SCGI server.
///
/// Streams are created by [`From`] conversions from TCP, Unix and in-memory
/// duplex streams.
#[derive(Debug)]
#[pin_project]
pub struct Stream {
    #[pin]
    inner: StreamCore,
}

impl Stream {
    /// A short name for the kind of stream, for diagnostics.
    pub fn kind(&self) -> &'static str {
        match &self.inner {
            StreamCore::Tcp(_) => "tcp",
            #[cfg(target_family = "unix")]
            StreamCore::Unix(_) => "unix",
            StreamCore::Duplex(_) => "duplex",
        }
    }
}

macro_rules! dispatch_core {
    (pin $driver:ident.$method:ident($($args:expr),*)) => {
        match $driver.project().inner.project() {
            StreamCoreProjection::Tcp(stream) => stream.$method($($args),*),
            #[cfg(target_family = "unix")]
            StreamCoreProjection::Unix(stream) => stream.$method($($args),*),
            StreamCoreProjection::Duplex(stream) => stream.$method($($args),*),
        }
    };

    ($driver:ident.$method:ident($($args:expr),*)) => {
        match &$driver.inner {
            StreamCore::Tcp(stream) => stream.$method($($args),*),
            #[cfg(target_family = "unix")]
            StreamCore::Unix(stream) => stream.$method($($args),*),
            StreamCore::Duplex(stream) => stream.$method($($args),*),
        }
    };
}

impl AsyncRead for Stream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        dispatch_core!(pin self.poll_read(cx, buf))
    }
}

impl AsyncWrite for Stream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<Result<usize, io::Error>> {
        dispatch_core!(pin self.poll_write(cx, buf))
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), io::Error>> {
        dispatch_core!(pin self.poll_flush(cx))
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), io::Error>> {
        dispatch_core!(pin self.poll_shutdown(cx))
    }

    fn poll_write_vectored(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        bufs: &[io::IoSlice<'_>],
    ) -> Poll<Result<usize, io::Error>> {
        dispatch_core!(pin self.poll_write_vectored(cx, bufs))
    }

    fn is_write_vectored(&self) -> bool {
        dispatch_core!(self.is_write_vectored())
    }
}

impl From<TcpStream> for Stream {
    fn from(stream: TcpStream) -> Self {
        Self {
            inner: StreamCore::Tcp(stream),
        }
    }
}

#[cfg(target_family = "unix")]
impl From<UnixStream> for Stream {
    fn from(stream: UnixStream) -> Self {
        Self {
            inner: StreamCore::Unix(stream),
        }
    }
}

impl From<DuplexStream> for Stream {
    fn from(stream: DuplexStream) -> Self {
        Self {
            inner: StreamCore::Duplex(stream),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use static_assertions::assert_impl_all;
    use tokio::io::{AsyncReadExt as _, AsyncWriteExt as _};

    assert_impl_all!(Stream: Send, Sync, Unpin);

    #[tokio::test]
    async fn duplex_dispatch() {
        let (client, mut server) = tokio::io::duplex(64);
        let mut stream = Stream::from(client);
        assert_eq!(stream.kind(), "duplex");

        stream.write_all(b"ping").await.unwrap();
        let mut buf = [0u8; 4];
        server.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");

        server.write_all(b"pong").await.unwrap();
        stream.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"pong");
    }

    #[cfg(target_family = "unix")]
    #[tokio::test]
    async fn unix_dispatch() {
        let (client, mut server) = UnixStream::pair().unwrap();
        let mut stream = Stream::from(client);
        assert_eq!(stream.kind(), "unix");

        stream.write_all(b"hello").await.unwrap();
        stream.shutdown().await.unwrap();

        let mut buf = Vec::new();
        server.read_to_end(&mut buf).await.unwrap();
        assert_eq!(buf, b"hello");
    }
}
