//! Dialing SCGI servers.
//!
//! SCGI targets are named by URLs with the `scgi` scheme. A URL with a host
//! (`scgi://localhost:5000/RPC2`) names a TCP endpoint at `host:port`, and a URL
//! without one (`scgi:///var/run/rtorrent.sock`) names a Unix domain socket at the
//! URL path. [`DialTarget`] holds the resolved endpoint, and a [`Dialer`] turns it into
//! an open [`Stream`].
//!
//! Any [`tower::Service`] from [`DialTarget`] to a stream type is a dialer, so a custom
//! dial function can be supplied with [`tower::service_fn`]. [`DefaultDialer`] connects
//! with tokio's TCP and Unix streams.

use std::fmt;
use std::future::Future;
use std::io;
use std::str::FromStr;
use std::task::{Context, Poll};
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use http::Uri;
use tokio::net::TcpStream;
use tracing::{trace, warn, Instrument};
use url::Url;

use crate::client::Error;
use crate::stream::Stream;
use crate::{BoxError, BoxFuture};

/// The URL scheme accepted by the transport.
pub const SCHEME: &str = "scgi";

/// The kind of network a [`DialTarget`] lives on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Network {
    /// A TCP endpoint, addressed as `host:port`.
    Tcp,

    /// A Unix domain socket, addressed by filesystem path.
    Unix,
}

impl Network {
    /// The conventional name of this network, `"tcp"` or `"unix"`.
    pub fn as_str(&self) -> &'static str {
        match self {
            Network::Tcp => "tcp",
            Network::Unix => "unix",
        }
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A resolved SCGI endpoint: the network kind and the address on that network.
///
/// Targets are usually derived from the request URI. A target can also be
/// attached to a request as an extension, in which case it is used instead of
/// the URI. This is the only way to reach a Unix socket, since [`http::Uri`]
/// cannot represent a URL with an empty host:
///
/// ```
/// # use scgi_transport::client::conn::{DialTarget, Network};
/// let target: DialTarget = "scgi:///var/run/rtorrent.sock".parse().unwrap();
/// assert_eq!(target.network(), Network::Unix);
///
/// let request = http::Request::post("scgi://localhost/RPC2")
///     .extension(target)
///     .body(scgi_transport::Body::empty())
///     .unwrap();
/// # let _ = request;
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DialTarget {
    network: Network,
    address: Box<str>,
}

impl DialTarget {
    /// A TCP target at `address` (`host:port`).
    pub fn tcp(address: impl Into<Box<str>>) -> Self {
        Self {
            network: Network::Tcp,
            address: address.into(),
        }
    }

    /// A Unix domain socket target at `path`.
    pub fn unix(path: impl Into<Utf8PathBuf>) -> Self {
        Self {
            network: Network::Unix,
            address: path.into().into_string().into(),
        }
    }

    /// Network kind of the target.
    pub fn network(&self) -> Network {
        self.network
    }

    /// Address of the target on its network.
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Socket path, for Unix targets.
    pub fn unix_path(&self) -> Option<&Utf8Path> {
        match self.network {
            Network::Unix => Some(Utf8Path::new(&self.address)),
            Network::Tcp => None,
        }
    }

    /// Resolve the target named by a request URI.
    pub fn from_uri(uri: &Uri) -> Result<Self, Error> {
        let scheme = uri.scheme_str().unwrap_or_default();
        if scheme != SCHEME {
            return Err(Error::UnsupportedScheme(scheme.to_owned()));
        }

        match uri.host().filter(|host| !host.is_empty()) {
            Some(host) => Ok(Self::tcp(join_host_port(host, uri.port_u16()))),
            None => Ok(Self::unix(decode_path(uri.path())?)),
        }
    }

    /// Resolve the target named by a URL.
    pub fn from_url(url: &Url) -> Result<Self, Error> {
        if url.scheme() != SCHEME {
            return Err(Error::UnsupportedScheme(url.scheme().to_owned()));
        }

        match url.host_str().filter(|host| !host.is_empty()) {
            Some(host) => Ok(Self::tcp(join_host_port(host, url.port()))),
            None => Ok(Self::unix(decode_path(url.path())?)),
        }
    }
}

/// URL paths are percent-encoded, socket paths are not.
fn decode_path(path: &str) -> Result<String, Error> {
    percent_encoding::percent_decode_str(path)
        .decode_utf8()
        .map(|path| path.into_owned())
        .map_err(|_| Error::InvalidSocketPath(path.to_owned()))
}

fn join_host_port(host: &str, port: Option<u16>) -> String {
    match port {
        Some(port) => format!("{host}:{port}"),
        None => host.to_owned(),
    }
}

impl FromStr for DialTarget {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let url = Url::parse(s)?;
        Self::from_url(&url)
    }
}

impl fmt::Display for DialTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}", self.network, self.address)
    }
}

/// Dialers open connections to SCGI servers.
///
/// A dialer is a service which accepts a [`DialTarget`] and returns a stream which
/// can be converted into a [`Stream`]. This trait is implemented for every such
/// [`tower::Service`], so it only needs to be named in bounds.
pub trait Dialer: Clone + Send + 'static {
    /// The stream type returned by this dialer.
    type IO: Into<Stream> + Send + 'static;

    /// Error returned when the dial fails.
    type Error: Into<BoxError>;

    /// Future returned by [`Dialer::dial`].
    type Future: Future<Output = Result<Self::IO, <Self as Dialer>::Error>> + Send + 'static;

    /// Open a connection to `target`.
    fn dial(&mut self, target: DialTarget) -> <Self as Dialer>::Future;

    /// Poll the dialer to see if it is ready to open a connection.
    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), <Self as Dialer>::Error>>;
}

impl<T, IO> Dialer for T
where
    T: tower::Service<DialTarget, Response = IO> + Clone + Send + 'static,
    T::Error: Into<BoxError>,
    T::Future: Send + 'static,
    IO: Into<Stream> + Send + 'static,
{
    type IO = IO;
    type Error = T::Error;
    type Future = T::Future;

    fn dial(&mut self, target: DialTarget) -> <Self as Dialer>::Future {
        tower::Service::call(self, target)
    }

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), <Self as Dialer>::Error>> {
        tower::Service::poll_ready(self, cx)
    }
}

/// The dialer used when no other dialer is configured.
///
/// TCP targets are connected with [`tokio::net::TcpStream::connect`], which resolves
/// host names with the system resolver. Unix targets are connected with
/// [`tokio::net::UnixStream::connect`].
#[derive(Debug, Clone)]
pub struct DefaultDialer {
    /// TCP keepalive idle time applied to TCP connections.
    pub keep_alive: Option<Duration>,

    /// Whether to disable Nagle's algorithm on TCP connections.
    pub nodelay: bool,
}

impl Default for DefaultDialer {
    fn default() -> Self {
        Self {
            keep_alive: Some(Duration::from_secs(90)),
            nodelay: true,
        }
    }
}

impl DefaultDialer {
    /// Create a dialer with the default socket options.
    pub fn new() -> Self {
        Self::default()
    }

    async fn connect(self, target: DialTarget) -> io::Result<Stream> {
        match target.network() {
            Network::Tcp => {
                let stream = TcpStream::connect(target.address()).await?;
                self.configure(&stream);
                if let Ok(peer_addr) = stream.peer_addr() {
                    trace!(peer.addr = %peer_addr, "tcp connected");
                } else {
                    trace!("tcp connected");
                }
                Ok(stream.into())
            }
            #[cfg(target_family = "unix")]
            Network::Unix => {
                let stream = tokio::net::UnixStream::connect(target.address()).await?;
                trace!("unix connected");
                Ok(stream.into())
            }
            #[cfg(not(target_family = "unix"))]
            Network::Unix => Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "unix domain sockets are not supported on this platform",
            )),
        }
    }

    fn configure(&self, stream: &TcpStream) {
        if let Err(e) = stream.set_nodelay(self.nodelay) {
            warn!("tcp set_nodelay error: {}", e);
        }

        if let Some(dur) = self.keep_alive {
            let conf = socket2::TcpKeepalive::new().with_time(dur);
            if let Err(e) = socket2::SockRef::from(stream).set_tcp_keepalive(&conf) {
                warn!("tcp set_keepalive error: {}", e);
            }
        }
    }
}

impl tower::Service<DialTarget> for DefaultDialer {
    type Response = Stream;
    type Error = io::Error;
    type Future = BoxFuture<'static, Result<Stream, io::Error>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, target: DialTarget) -> Self::Future {
        let span = tracing::trace_span!(
            "dial",
            network = %target.network(),
            address = %target.address()
        );
        Box::pin(self.clone().connect(target).instrument(span))
    }
}

#[cfg(test)]
mod tests {

    use tokio::net::TcpListener;
    use tower::ServiceExt as _;

    use super::*;

    #[test]
    fn target_from_uri_with_host() {
        let uri: Uri = "scgi://host:8080".parse().unwrap();
        let target = DialTarget::from_uri(&uri).unwrap();
        assert_eq!(target.network().as_str(), "tcp");
        assert_eq!(target.address(), "host:8080");
        assert_eq!(target.unix_path(), None);
    }

    #[test]
    fn target_from_uri_keeps_path_out_of_address() {
        let uri: Uri = "scgi://127.0.0.1:5000/RPC2".parse().unwrap();
        let target = DialTarget::from_uri(&uri).unwrap();
        assert_eq!(target, DialTarget::tcp("127.0.0.1:5000"));
    }

    #[test]
    fn target_without_host() {
        let target: DialTarget = "scgi:///socket".parse().unwrap();
        assert_eq!(target.network().as_str(), "unix");
        assert_eq!(target.address(), "/socket");
        assert_eq!(target.unix_path(), Some(Utf8Path::new("/socket")));
    }

    #[test]
    fn target_from_url_with_host() {
        let target: DialTarget = "scgi://host:8080/RPC2".parse().unwrap();
        assert_eq!(target.network(), Network::Tcp);
        assert_eq!(target.address(), "host:8080");
    }

    #[test]
    fn target_with_bad_scheme() {
        let err = "http://localhost/".parse::<DialTarget>().unwrap_err();
        assert_eq!(err.to_string(), r#"unsupported protocol scheme "http""#);

        let uri: Uri = "http://localhost/RPC2".parse().unwrap();
        let err = DialTarget::from_uri(&uri).unwrap_err();
        assert_eq!(err.to_string(), r#"unsupported protocol scheme "http""#);
    }

    #[test]
    fn target_without_scheme() {
        let uri: Uri = "/RPC2".parse().unwrap();
        let err = DialTarget::from_uri(&uri).unwrap_err();
        assert!(matches!(err, Error::UnsupportedScheme(scheme) if scheme.is_empty()));
    }

    #[test]
    fn target_socket_path_is_decoded() {
        let target: DialTarget = "scgi:///tmp/my sock".parse().unwrap();
        assert_eq!(target.address(), "/tmp/my sock");

        let target: DialTarget = "scgi:///tmp/my%20sock".parse().unwrap();
        assert_eq!(target.unix_path(), Some(Utf8Path::new("/tmp/my sock")));

        let target: DialTarget = "scgi:///run/\u{fc}.sock".parse().unwrap();
        assert_eq!(target.address(), "/run/\u{fc}.sock");
    }

    #[test]
    fn target_socket_path_must_be_utf8() {
        let err = "scgi:///run/%FF.sock".parse::<DialTarget>().unwrap_err();
        assert!(matches!(err, Error::InvalidSocketPath(path) if path == "/run/%FF.sock"));
    }

    #[test]
    fn target_display() {
        assert_eq!(DialTarget::tcp("host:8080").to_string(), "tcp://host:8080");
        assert_eq!(DialTarget::unix("/socket").to_string(), "unix:///socket");
    }

    #[tokio::test]
    async fn default_dialer_tcp() {
        let _ = tracing_subscriber::fmt::try_init();

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let (stream, accepted) = tokio::join!(
            DefaultDialer::new().oneshot(DialTarget::tcp(addr.to_string())),
            listener.accept()
        );

        assert_eq!(stream.unwrap().kind(), "tcp");
        accepted.unwrap();
    }

    #[cfg(target_family = "unix")]
    #[tokio::test]
    async fn default_dialer_unix() {
        let _ = tracing_subscriber::fmt::try_init();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scgi.sock");
        let listener = tokio::net::UnixListener::bind(&path).unwrap();

        let target = DialTarget::unix(Utf8PathBuf::from_path_buf(path).unwrap());
        let (stream, accepted) =
            tokio::join!(DefaultDialer::new().oneshot(target), listener.accept());

        assert_eq!(stream.unwrap().kind(), "unix");
        accepted.unwrap();
    }

    #[tokio::test]
    async fn default_dialer_missing_socket() {
        let dir = tempfile::tempdir().unwrap();
        let path = Utf8PathBuf::from_path_buf(dir.path().join("missing.sock")).unwrap();

        let result = DefaultDialer::new().oneshot(DialTarget::unix(path)).await;
        assert!(result.is_err());
    }
}
