//! SCGI transport
//!
//! An HTTP-shaped client transport for servers which speak [SCGI] instead of HTTP,
//! such as the XML-RPC endpoint of rTorrent.
//!
//! The [`ScgiTransport`] is a [`tower::Service`] which accepts [`http::Request`]s and
//! returns [`http::Response`]s, so it can be dropped in wherever a generic HTTP client
//! service is expected. Each request opens a fresh connection (TCP or Unix domain socket,
//! chosen from the request URL), sends the request as an SCGI netstring header block followed
//! by the body, and parses the SCGI response back into a regular HTTP response. The
//! response body owns the connection, which is released when the body is closed or dropped.
//!
//! # Example
//! ```no_run
//! # use scgi_transport::{Body, ScgiTransport};
//! # use tower::ServiceExt as _;
//! # async fn run() -> Result<(), scgi_transport::BoxError> {
//! let transport = ScgiTransport::new();
//! let request = http::Request::post("scgi://localhost:5000/RPC2")
//!     .body(Body::from("<?xml version=\"1.0\"?><methodCall/>"))?;
//! let mut response = transport.oneshot(request).await?;
//! println!("status: {}", response.status());
//! response.body_mut().close().await;
//! # Ok(())
//! # }
//! ```
//!
//! [SCGI]: https://python.ca/scgi/protocol.txt

#![cfg_attr(docsrs, feature(doc_auto_cfg))]

use std::fmt;
use std::future::Future;
use std::pin::Pin;

pub mod body;
pub use body::Body;
pub mod client;
pub use client::{Builder, Error, ScgiConfig, ScgiTransport};
pub mod stream;

/// Type-erased error used at trait boundaries.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

pub(crate) type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

pub(crate) struct DebugLiteral<T: fmt::Display>(T);

impl<T: fmt::Display> fmt::Debug for DebugLiteral<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
