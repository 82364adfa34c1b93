//! Client connection types.
//!
//! An SCGI round trip uses a connection for exactly one request, and is split into
//! a few stages which each live in their own module.
//!
//! ## Dial
//!
//! A [`Dialer`] opens a connection to the [`DialTarget`] named by the request. Any
//! [`tower::Service`] from a [`DialTarget`] to a stream is a dialer, and the builtin
//! [`DefaultDialer`] connects over TCP or to a Unix domain socket.
//!
//! ## Encode
//!
//! The request is written as a netstring-framed SCGI header block carrying
//! `CONTENT_LENGTH` and `SCGI`, followed by the raw request body. See [`encode`].
//!
//! ## Decode
//!
//! The response begins with a CGI `Status:` line, which is rewritten into an HTTP
//! status line so the rest of the head can be parsed as HTTP/1. The body is framed
//! with the usual HTTP/1 rules and handed to the caller as a [`ResponseBody`], which
//! owns the connection from then on.

mod body;
pub(crate) mod decode;
pub mod dial;
pub mod encode;

pub use self::body::ResponseBody;
pub use self::decode::{reason, STATUS_PREFIX};
pub use self::dial::{DefaultDialer, DialTarget, Dialer, Network, SCHEME};
