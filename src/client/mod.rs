//! SCGI client transport.
//!
//! [`ScgiTransport`] is a [`tower::Service`] which performs one SCGI round trip per
//! request. It is the lowest level at which an SCGI server looks like an HTTP server:
//! requests and responses are plain [`http`] types, and anything which can drive a
//! `tower::Service<http::Request<B>>` (retries, timeouts, an XML-RPC client) can use
//! it directly.
//!
//! Each round trip:
//!
//! 1. resolves a [`DialTarget`](conn::DialTarget) from the request, preferring a
//!    target attached as a request extension over the request URI,
//! 2. opens a connection with the configured [`Dialer`](conn::Dialer),
//! 3. writes the SCGI header block and the request body,
//! 4. reads and parses the response head,
//! 5. hands the connection to the [`ResponseBody`](conn::ResponseBody).
//!
//! Any failure before the last step closes the connection before the error is
//! returned. Nothing is retried.

use std::fmt;
use std::io;
use std::sync::Arc;
use std::task::{Context, Poll};

use http_body::Body as HttpBody;
use tokio::io::BufReader;
use tracing::{debug, trace, Instrument};

use self::conn::decode::{read_head, BodyDecoder};
use self::conn::encode::{declared_length, write_request};
use self::conn::{DefaultDialer, DialTarget, Dialer, ResponseBody};
use crate::stream::Stream;
use crate::{BoxError, BoxFuture};

mod builder;
pub mod conn;
mod error;

pub use self::builder::{Builder, ScgiConfig};
pub use self::error::{BodyError, Error, ParseError};

/// An HTTP-shaped transport which speaks SCGI.
///
/// # Example
/// ```no_run
/// # use http_body_util::BodyExt as _;
/// # use scgi_transport::{Body, ScgiTransport};
/// # use tower::ServiceExt as _;
/// # async fn run() -> Result<(), scgi_transport::BoxError> {
/// let request = http::Request::post("scgi://127.0.0.1:5000/RPC2")
///     .body(Body::from("<?xml version=\"1.0\"?><methodCall/>"))?;
///
/// let response = ScgiTransport::new().oneshot(request).await?;
/// let body = response.into_body().collect().await?.to_bytes();
/// println!("{}", String::from_utf8_lossy(&body));
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct ScgiTransport<D = DefaultDialer> {
    dialer: D,
    config: Arc<ScgiConfig>,
}

impl<D: fmt::Debug> fmt::Debug for ScgiTransport<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScgiTransport")
            .field("dialer", &self.dialer)
            .field("config", &self.config)
            .finish()
    }
}

impl ScgiTransport {
    /// Create a transport with the default dialer and limits.
    pub fn new() -> Self {
        Builder::new().build()
    }

    /// Create a builder for a transport.
    pub fn builder() -> Builder {
        Builder::new()
    }
}

impl Default for ScgiTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl<D> ScgiTransport<D> {
    /// The limits applied to each round trip.
    pub fn config(&self) -> &ScgiConfig {
        &self.config
    }

    /// The dialer used to open connections.
    pub fn dialer(&self) -> &D {
        &self.dialer
    }
}

impl<D, B> tower::Service<http::Request<B>> for ScgiTransport<D>
where
    D: Dialer,
    B: HttpBody + Send + 'static,
    B::Data: Send,
    B::Error: Into<BoxError> + Send,
{
    type Response = http::Response<ResponseBody>;
    type Error = Error;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Dialer::poll_ready(&mut self.dialer, cx).map_err(|error| Error::Dial(error.into()))
    }

    fn call(&mut self, request: http::Request<B>) -> Self::Future {
        // The dialer which was polled ready goes with this request.
        let clone = self.dialer.clone();
        let dialer = std::mem::replace(&mut self.dialer, clone);
        let config = self.config.clone();

        let span = tracing::debug_span!(
            "scgi",
            method = %request.method(),
            uri = %request.uri()
        );
        Box::pin(round_trip(dialer, config, request).instrument(span))
    }
}

async fn round_trip<D, B>(
    mut dialer: D,
    config: Arc<ScgiConfig>,
    request: http::Request<B>,
) -> Result<http::Response<ResponseBody>, Error>
where
    D: Dialer,
    B: HttpBody,
    B::Error: Into<BoxError>,
{
    let target = match request.extensions().get::<DialTarget>() {
        Some(target) => target.clone(),
        None => DialTarget::from_uri(request.uri())?,
    };

    let (parts, body) = request.into_parts();
    let declared = declared_length(&parts.headers, &body);

    let mut stream = dial(&mut dialer, target, &config).await?;
    trace!(stream = stream.kind(), "scgi connection open");

    if let Err(error) = write_request(&mut stream, declared, body).await {
        debug!("scgi request failed, closing connection: {}", error);
        return Err(error);
    }

    let (read, write) = tokio::io::split(stream);
    let mut reader = BufReader::new(read);
    let head = read_head(&mut reader, &parts.method, parts.version, &config).await;
    let (head, kind) = match head {
        Ok(head) => head,
        Err(error) => {
            debug!("scgi response failed, closing connection: {}", error);
            return Err(error);
        }
    };
    trace!(status = %head.status(), body = ?kind, "scgi response head");

    let body = ResponseBody::new(BodyDecoder::new(reader, kind), write);
    Ok(head.map(|()| body))
}

async fn dial<D: Dialer>(
    dialer: &mut D,
    target: DialTarget,
    config: &ScgiConfig,
) -> Result<Stream, Error> {
    let connecting = dialer.dial(target);
    let connected = match config.connect_timeout {
        Some(timeout) => tokio::time::timeout(timeout, connecting)
            .await
            .map_err(|_| {
                let error = io::Error::new(io::ErrorKind::TimedOut, "connect timed out");
                Error::Dial(error.into())
            })?,
        None => connecting.await,
    };

    connected
        .map(Into::into)
        .map_err(|error| Error::Dial(error.into()))
}
