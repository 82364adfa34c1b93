//! SCGI request encoding.
//!
//! An SCGI request is a netstring-framed header block followed by the raw body:
//!
//! ```text
//! 24:CONTENT_LENGTH\0<n>\0SCGI\01\0,<body>
//! ```
//!
//! The header block is a sequence of NUL-terminated names and values, and the
//! netstring prefix is the byte length of the block.

use bytes::{Buf, Bytes};
use http::HeaderMap;
use http_body::Body;
use http_body_util::BodyExt as _;
use tokio::io::{AsyncWrite, AsyncWriteExt as _, BufWriter};
use tracing::trace;

use crate::client::Error;
use crate::BoxError;

/// The SCGI header block for a body of `content_length` bytes.
///
/// `CONTENT_LENGTH` must be the first header, and `SCGI` must be `1`.
pub fn header_block(content_length: u64) -> Vec<u8> {
    let mut block = Vec::with_capacity(32);
    for (name, value) in [
        ("CONTENT_LENGTH", content_length.to_string()),
        ("SCGI", "1".to_owned()),
    ] {
        block.extend_from_slice(name.as_bytes());
        block.push(0);
        block.extend_from_slice(value.as_bytes());
        block.push(0);
    }
    block
}

/// Frame `content` as a netstring: `<len>:<content>,`.
pub fn netstring(content: &[u8]) -> Vec<u8> {
    let mut framed = format!("{}:", content.len()).into_bytes();
    framed.reserve(content.len() + 1);
    framed.extend_from_slice(content);
    framed.push(b',');
    framed
}

/// The length a request body declares, either through its size hint or a
/// `Content-Length` header.
pub(crate) fn declared_length<B: Body>(headers: &HeaderMap, body: &B) -> Option<u64> {
    body.size_hint().exact().or_else(|| {
        headers
            .get(http::header::CONTENT_LENGTH)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.trim().parse().ok())
    })
}

enum Payload<B> {
    Streaming(B),
    Buffered(Bytes),
}

/// Write an SCGI request carrying `body` to `io`.
///
/// When `declared` is `None` the body is collected first, since SCGI requires
/// the length up front. A streamed body which produces a different number of
/// bytes than declared fails with [`Error::BodyLength`]. The body is dropped
/// before this returns, whether or not the write succeeded.
pub async fn write_request<W, B>(io: &mut W, declared: Option<u64>, body: B) -> Result<(), Error>
where
    W: AsyncWrite + Unpin,
    B: Body,
    B::Error: Into<BoxError>,
{
    let (length, payload) = match declared {
        Some(length) => (length, Payload::Streaming(body)),
        None => {
            let bytes = body
                .collect()
                .await
                .map_err(|error| Error::Body(error.into()))?
                .to_bytes();
            (bytes.len() as u64, Payload::Buffered(bytes))
        }
    };

    let mut writer = BufWriter::new(io);
    let headers = netstring(&header_block(length));
    writer.write_all(&headers).await.map_err(Error::Write)?;
    trace!(content_length = length, "scgi headers written");

    let written = match payload {
        Payload::Buffered(mut bytes) => {
            let written = bytes.len() as u64;
            writer.write_all_buf(&mut bytes).await.map_err(Error::Write)?;
            written
        }
        Payload::Streaming(body) => copy_body(&mut writer, body).await?,
    };

    if written != length {
        return Err(Error::BodyLength {
            expected: length,
            actual: written,
        });
    }

    writer.flush().await.map_err(Error::Write)?;
    trace!(bytes = written, "scgi body written");
    Ok(())
}

async fn copy_body<W, B>(writer: &mut W, body: B) -> Result<u64, Error>
where
    W: AsyncWrite + Unpin,
    B: Body,
    B::Error: Into<BoxError>,
{
    let mut body = std::pin::pin!(body);
    let mut written = 0u64;
    while let Some(frame) = body.frame().await {
        let frame = frame.map_err(|error| Error::Body(error.into()))?;
        // Trailers have no representation in SCGI.
        if let Ok(mut data) = frame.into_data() {
            written += data.remaining() as u64;
            writer.write_all_buf(&mut data).await.map_err(Error::Write)?;
        }
    }
    Ok(written)
}
