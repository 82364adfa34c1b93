//! SCGI response decoding.
//!
//! An SCGI response looks like an HTTP/1 response whose status line has been
//! replaced by a CGI `Status:` header:
//!
//! ```text
//! Status: 200 OK\r\n
//! Content-Type: text/xml\r\n
//! Content-Length: 122\r\n
//! \r\n
//! <body>
//! ```
//!
//! Decoding rewrites the `Status:` prefix into an HTTP protocol label, parses the
//! head with [`httparse`], and then frames the body from the remaining bytes of the
//! connection according to the usual HTTP/1 rules.

use std::pin::Pin;
use std::task::{ready, Context, Poll};

use bytes::Bytes;
use http::header::{CONTENT_LENGTH, TRANSFER_ENCODING};
use http::{HeaderMap, HeaderName, HeaderValue, Method, Response, StatusCode, Version};
use http_body::{Frame, SizeHint};
use tokio::io::{AsyncBufRead, AsyncBufReadExt as _, AsyncReadExt as _};
use tracing::trace;

use crate::client::error::{BodyError, ParseError};
use crate::client::{Error, ScgiConfig};

/// Prefix of the first line of every SCGI response.
pub const STATUS_PREFIX: &str = "Status:";

/// Longest chunk-size or trailer line accepted while decoding a chunked body.
const MAX_FRAMING_LINE: usize = 4096;

/// The protocol label substituted for the `Status:` prefix.
///
/// The head is parsed as HTTP/1, so only HTTP/1.0 requests keep their own label.
pub(crate) fn protocol_label(version: Version) -> &'static str {
    if version == Version::HTTP_10 {
        "HTTP/1.0"
    } else {
        "HTTP/1.1"
    }
}

/// The reason phrase of a decoded response.
///
/// This is the phrase sent by the server when it differs from the canonical
/// phrase for the status code, and the canonical phrase otherwise.
pub fn reason<B>(response: &Response<B>) -> Option<&str> {
    response
        .extensions()
        .get::<hyper::ext::ReasonPhrase>()
        .and_then(|reason| std::str::from_utf8(reason.as_bytes()).ok())
        .or_else(|| response.status().canonical_reason())
}

/// How the body following a response head is delimited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BodyKind {
    /// No body follows the head.
    Empty,

    /// Exactly this many bytes follow the head.
    Length(u64),

    /// The body uses chunked transfer coding.
    Chunked,

    /// The body runs until the server closes the connection.
    Eof,
}

/// Read the head of an SCGI response from `reader`.
///
/// The returned response carries the status, version and headers; the body is
/// left unread in `reader` and described by the returned [`BodyKind`].
pub(crate) async fn read_head<R>(
    reader: &mut R,
    method: &Method,
    version: Version,
    config: &ScgiConfig,
) -> Result<(Response<()>, BodyKind), Error>
where
    R: AsyncBufRead + Unpin,
{
    let limit = config.max_header_size;

    let mut status = Vec::new();
    read_line(reader, limit, limit, &mut status).await?;
    if !status.starts_with(STATUS_PREFIX.as_bytes()) {
        return Err(Error::Protocol {
            line: String::from_utf8_lossy(&status).into_owned(),
        });
    }

    let mut head = Vec::with_capacity(status.len() + 256);
    head.extend_from_slice(protocol_label(version).as_bytes());
    head.extend_from_slice(&status[STATUS_PREFIX.len()..]);

    loop {
        let start = head.len();
        let remaining = limit.saturating_sub(start);
        read_line(reader, remaining, limit, &mut head).await?;
        if matches!(&head[start..], b"\r\n" | b"\n") {
            break;
        }
    }
    trace!(bytes = head.len(), "scgi response head read");

    let response = parse_head(&head, config.max_headers)?;
    let kind = body_kind(method, response.status(), response.headers())?;
    Ok((response, kind))
}

/// Append one line, including its terminator, to `line`.
///
/// At most `remaining` bytes are read; `limit` is the configured head size
/// reported when the line does not fit.
async fn read_line<R>(
    reader: &mut R,
    remaining: usize,
    limit: usize,
    line: &mut Vec<u8>,
) -> Result<(), Error>
where
    R: AsyncBufRead + Unpin,
{
    if remaining == 0 {
        return Err(ParseError::HeadTooLarge(limit).into());
    }

    let read = (&mut *reader)
        .take(remaining as u64)
        .read_until(b'\n', line)
        .await
        .map_err(Error::Read)?;

    // Only the bytes read by this call count: `line` may already end in a terminator.
    if read > 0 && line.last() == Some(&b'\n') {
        return Ok(());
    }

    if read >= remaining {
        Err(ParseError::HeadTooLarge(limit).into())
    } else {
        Err(Error::Read(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            "connection closed before the response head was complete",
        )))
    }
}

fn parse_head(head: &[u8], max_headers: usize) -> Result<Response<()>, ParseError> {
    let mut headers = vec![httparse::EMPTY_HEADER; max_headers];
    let mut parsed = httparse::Response::new(&mut headers);
    match parsed.parse(head) {
        Ok(httparse::Status::Complete(_)) => {}
        Ok(httparse::Status::Partial) => return Err(ParseError::Incomplete),
        Err(httparse::Error::TooManyHeaders) => {
            return Err(ParseError::TooManyHeaders(max_headers))
        }
        Err(error) => return Err(error.into()),
    }

    let code = parsed.code.ok_or(ParseError::Incomplete)?;
    let status = StatusCode::from_u16(code).map_err(|_| ParseError::InvalidStatus(code))?;

    let mut response = Response::new(());
    *response.status_mut() = status;
    *response.version_mut() = match parsed.version {
        Some(0) => Version::HTTP_10,
        _ => Version::HTTP_11,
    };

    let map = response.headers_mut();
    map.reserve(parsed.headers.len());
    for header in parsed.headers.iter() {
        let name = HeaderName::from_bytes(header.name.as_bytes())?;
        let value = HeaderValue::from_bytes(header.value)?;
        map.append(name, value);
    }

    if let Some(reason) = parsed.reason {
        if !reason.is_empty() && Some(reason) != status.canonical_reason() {
            if let Ok(reason) = hyper::ext::ReasonPhrase::try_from(reason.as_bytes()) {
                response.extensions_mut().insert(reason);
            }
        }
    }

    Ok(response)
}

fn body_kind(
    method: &Method,
    status: StatusCode,
    headers: &HeaderMap,
) -> Result<BodyKind, ParseError> {
    if method == Method::HEAD
        || status.is_informational()
        || status == StatusCode::NO_CONTENT
        || status == StatusCode::NOT_MODIFIED
    {
        return Ok(BodyKind::Empty);
    }

    if headers.contains_key(TRANSFER_ENCODING) {
        // Only a final `chunked` coding delimits the body; anything else reads to close.
        let chunked = headers
            .get_all(TRANSFER_ENCODING)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .flat_map(|value| value.split(','))
            .map(str::trim)
            .filter(|coding| !coding.is_empty())
            .last()
            .is_some_and(|coding| coding.eq_ignore_ascii_case("chunked"));

        return Ok(if chunked {
            BodyKind::Chunked
        } else {
            BodyKind::Eof
        });
    }

    let mut length = None;
    for value in headers.get_all(CONTENT_LENGTH) {
        let parsed = value
            .to_str()
            .ok()
            .and_then(|value| value.trim().parse::<u64>().ok())
            .ok_or(ParseError::ContentLength)?;
        match length {
            Some(existing) if existing != parsed => return Err(ParseError::ContentLength),
            _ => length = Some(parsed),
        }
    }

    Ok(match length {
        Some(0) => BodyKind::Empty,
        Some(n) => BodyKind::Length(n),
        None => BodyKind::Eof,
    })
}

#[derive(Debug)]
enum Chunked {
    Size(Vec<u8>),
    Data(u64),
    DataEnd(Vec<u8>),
    Trailers(Vec<u8>, HeaderMap),
}

#[derive(Debug)]
enum DecodeState {
    Length(u64),
    Chunked(Chunked),
    Eof,
    Done,
}

/// Frames the body that follows a response head.
#[derive(Debug)]
pub(crate) struct BodyDecoder<R> {
    reader: R,
    state: DecodeState,
}

impl<R> BodyDecoder<R> {
    pub(crate) fn new(reader: R, kind: BodyKind) -> Self {
        let state = match kind {
            BodyKind::Empty | BodyKind::Length(0) => DecodeState::Done,
            BodyKind::Length(n) => DecodeState::Length(n),
            BodyKind::Chunked => DecodeState::Chunked(Chunked::Size(Vec::new())),
            BodyKind::Eof => DecodeState::Eof,
        };
        Self { reader, state }
    }

    /// Has the body been read to its end?
    pub(crate) fn is_done(&self) -> bool {
        matches!(self.state, DecodeState::Done)
    }
}

impl<R> http_body::Body for BodyDecoder<R>
where
    R: AsyncBufRead + Unpin,
{
    type Data = Bytes;
    type Error = BodyError;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let Self { reader, state } = self.get_mut();
        loop {
            match state {
                DecodeState::Done => return Poll::Ready(None),
                DecodeState::Length(remaining) => {
                    let Some(data) = ready!(poll_data(reader, cx, *remaining))? else {
                        *state = DecodeState::Done;
                        return Poll::Ready(Some(Err(BodyError::Incomplete)));
                    };
                    *remaining -= data.len() as u64;
                    if *remaining == 0 {
                        *state = DecodeState::Done;
                    }
                    return Poll::Ready(Some(Ok(Frame::data(data))));
                }
                DecodeState::Eof => {
                    let Some(data) = ready!(poll_data(reader, cx, u64::MAX))? else {
                        *state = DecodeState::Done;
                        return Poll::Ready(None);
                    };
                    return Poll::Ready(Some(Ok(Frame::data(data))));
                }
                DecodeState::Chunked(Chunked::Size(line)) => {
                    ready!(poll_line(reader, cx, line))?;
                    let size = parse_chunk_size(line)?;
                    *state = if size == 0 {
                        DecodeState::Chunked(Chunked::Trailers(Vec::new(), HeaderMap::new()))
                    } else {
                        DecodeState::Chunked(Chunked::Data(size))
                    };
                }
                DecodeState::Chunked(Chunked::Data(remaining)) => {
                    let Some(data) = ready!(poll_data(reader, cx, *remaining))? else {
                        *state = DecodeState::Done;
                        return Poll::Ready(Some(Err(BodyError::Incomplete)));
                    };
                    *remaining -= data.len() as u64;
                    if *remaining == 0 {
                        *state = DecodeState::Chunked(Chunked::DataEnd(Vec::new()));
                    }
                    return Poll::Ready(Some(Ok(Frame::data(data))));
                }
                DecodeState::Chunked(Chunked::DataEnd(line)) => {
                    ready!(poll_line(reader, cx, line))?;
                    if !is_blank(line) {
                        *state = DecodeState::Done;
                        return Poll::Ready(Some(Err(BodyError::ChunkTerminator)));
                    }
                    *state = DecodeState::Chunked(Chunked::Size(Vec::new()));
                }
                DecodeState::Chunked(Chunked::Trailers(line, trailers)) => {
                    ready!(poll_line(reader, cx, line))?;
                    if is_blank(line) {
                        let trailers = std::mem::take(trailers);
                        *state = DecodeState::Done;
                        if trailers.is_empty() {
                            return Poll::Ready(None);
                        }
                        return Poll::Ready(Some(Ok(Frame::trailers(trailers))));
                    }
                    let (name, value) = parse_trailer(line)?;
                    trailers.append(name, value);
                    line.clear();
                }
            }
        }
    }

    fn is_end_stream(&self) -> bool {
        self.is_done()
    }

    fn size_hint(&self) -> SizeHint {
        match self.state {
            DecodeState::Done => SizeHint::with_exact(0),
            DecodeState::Length(remaining) => SizeHint::with_exact(remaining),
            _ => SizeHint::default(),
        }
    }
}

/// Read up to `limit` buffered bytes, or `None` at end of stream.
fn poll_data<R>(
    reader: &mut R,
    cx: &mut Context<'_>,
    limit: u64,
) -> Poll<Result<Option<Bytes>, BodyError>>
where
    R: AsyncBufRead + Unpin,
{
    let buf = ready!(Pin::new(&mut *reader).poll_fill_buf(cx))?;
    if buf.is_empty() {
        return Poll::Ready(Ok(None));
    }

    let n = usize::try_from(limit).map_or(buf.len(), |limit| buf.len().min(limit));
    let data = Bytes::copy_from_slice(&buf[..n]);
    Pin::new(&mut *reader).consume(n);
    Poll::Ready(Ok(Some(data)))
}

/// Accumulate one line, including its terminator, into `line`.
fn poll_line<R>(
    reader: &mut R,
    cx: &mut Context<'_>,
    line: &mut Vec<u8>,
) -> Poll<Result<(), BodyError>>
where
    R: AsyncBufRead + Unpin,
{
    loop {
        let buf = ready!(Pin::new(&mut *reader).poll_fill_buf(cx))?;
        if buf.is_empty() {
            return Poll::Ready(Err(BodyError::Incomplete));
        }

        let (used, complete) = match buf.iter().position(|&b| b == b'\n') {
            Some(idx) => (idx + 1, true),
            None => (buf.len(), false),
        };
        line.extend_from_slice(&buf[..used]);
        Pin::new(&mut *reader).consume(used);

        if line.len() > MAX_FRAMING_LINE {
            return Poll::Ready(Err(BodyError::LineTooLong(MAX_FRAMING_LINE)));
        }
        if complete {
            return Poll::Ready(Ok(()));
        }
    }
}

fn is_blank(line: &[u8]) -> bool {
    matches!(line, b"\r\n" | b"\n")
}

fn parse_chunk_size(line: &[u8]) -> Result<u64, BodyError> {
    let invalid = || BodyError::ChunkSize(String::from_utf8_lossy(line).into_owned());
    let text = std::str::from_utf8(line).map_err(|_| invalid())?;
    // Chunk extensions follow a `;` and are ignored.
    let size = text.split(';').next().unwrap_or_default().trim();
    u64::from_str_radix(size, 16).map_err(|_| invalid())
}

fn parse_trailer(line: &[u8]) -> Result<(HeaderName, HeaderValue), BodyError> {
    let invalid = || BodyError::Trailer(String::from_utf8_lossy(line).into_owned());
    let colon = line.iter().position(|&b| b == b':').ok_or_else(invalid)?;
    let name = HeaderName::from_bytes(line[..colon].trim_ascii()).map_err(|_| invalid())?;
    let value = HeaderValue::from_bytes(line[colon + 1..].trim_ascii()).map_err(|_| invalid())?;
    Ok((name, value))
}
