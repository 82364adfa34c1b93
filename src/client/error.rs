use std::io;

use thiserror::Error;

use super::conn::decode::STATUS_PREFIX;
use crate::BoxError;

/// Error returned by an SCGI round-trip.
///
/// Every error is returned to the caller of the round-trip; nothing is retried,
/// and any connection opened for the request has been closed by the time the
/// error is seen.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// The target URL does not use the `scgi` scheme.
    #[error("unsupported protocol scheme {0:?}")]
    UnsupportedScheme(String),

    /// The target URL could not be parsed.
    #[error("invalid scgi url: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// A Unix socket path does not decode to UTF-8.
    #[error("invalid socket path {0:?}")]
    InvalidSocketPath(String),

    /// The connection could not be established, or the dial timed out.
    #[error("dial: {0}")]
    Dial(#[source] BoxError),

    /// Writing the request to the connection failed.
    #[error("write: {0}")]
    Write(#[source] io::Error),

    /// The request body produced an error while it was being sent.
    #[error("request body: {0}")]
    Body(#[source] BoxError),

    /// The request body did not match the length declared in the SCGI headers.
    #[error("request body length mismatch: declared {expected} bytes, sent {actual}")]
    BodyLength {
        /// Length sent as `CONTENT_LENGTH`.
        expected: u64,
        /// Length the body actually produced.
        actual: u64,
    },

    /// The response did not start with an SCGI `Status:` line.
    #[error("expected {:?} header, received {:?}", STATUS_PREFIX, .line)]
    Protocol {
        /// The first line received from the server, verbatim.
        line: String,
    },

    /// Reading the response head failed.
    #[error("read: {0}")]
    Read(#[source] io::Error),

    /// The response head could not be parsed.
    #[error("parse: {0}")]
    Parse(#[from] ParseError),
}

/// The response head was readable but not valid HTTP once the status line was rewritten.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ParseError {
    /// The head is not valid HTTP/1.
    #[error("malformed response head: {0}")]
    Malformed(#[from] httparse::Error),

    /// The parser did not consume the complete head.
    #[error("incomplete response head")]
    Incomplete,

    /// The head exceeded the configured size limit.
    #[error("response head exceeds {0} bytes")]
    HeadTooLarge(usize),

    /// The head contained more headers than the configured limit.
    #[error("response has more than {0} headers")]
    TooManyHeaders(usize),

    /// The status code is out of range.
    #[error("invalid status code {0}")]
    InvalidStatus(u16),

    /// A header name was not valid.
    #[error("invalid header name: {0}")]
    HeaderName(#[from] http::header::InvalidHeaderName),

    /// A header value was not valid.
    #[error("invalid header value: {0}")]
    HeaderValue(#[from] http::header::InvalidHeaderValue),

    /// `Content-Length` is missing a valid value or disagrees with itself.
    #[error("invalid content-length header")]
    ContentLength,
}

/// Error produced while streaming a response body.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum BodyError {
    /// Reading from the connection failed.
    #[error("response body: {0}")]
    Io(#[from] io::Error),

    /// The connection closed before the body was complete.
    #[error("connection closed before the response body was complete")]
    Incomplete,

    /// A chunk size line could not be parsed.
    #[error("invalid chunk size line {0:?}")]
    ChunkSize(String),

    /// Chunk data was not followed by a line terminator.
    #[error("missing line terminator after chunk data")]
    ChunkTerminator,

    /// A trailer line could not be parsed.
    #[error("invalid trailer line {0:?}")]
    Trailer(String),

    /// A framing line exceeded the size limit.
    #[error("chunk framing line exceeds {0} bytes")]
    LineTooLong(usize),
}
