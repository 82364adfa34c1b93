//! Response bodies which own their connection.

use std::fmt;
use std::pin::Pin;
use std::task::{ready, Context, Poll};

use bytes::Bytes;
use http_body::{Frame, SizeHint};
use tokio::io::{AsyncWriteExt as _, BufReader, ReadHalf, WriteHalf};
use tracing::{debug, trace};

use super::decode::BodyDecoder;
use crate::client::error::BodyError;
use crate::stream::Stream;
use crate::DebugLiteral;

type Decoder = BodyDecoder<BufReader<ReadHalf<Stream>>>;

/// The body of an SCGI response.
///
/// The body holds the connection the response arrived on. The connection is
/// released exactly once: when the body has been read to its end, when reading
/// it fails, when [`ResponseBody::close`] is called, or when the body is dropped,
/// whichever comes first. Closing an unread body simply discards the rest of the
/// response.
pub struct ResponseBody {
    // Dropped before `conn`, so the decoder's read half is gone by the time
    // the connection is shut down.
    inner: Option<Decoder>,
    conn: Option<WriteHalf<Stream>>,
}

impl ResponseBody {
    pub(crate) fn new(inner: Decoder, conn: WriteHalf<Stream>) -> Self {
        let mut body = Self {
            inner: Some(inner),
            conn: Some(conn),
        };

        if body.inner.as_ref().is_some_and(|inner| inner.is_done()) {
            body.release();
        }
        body
    }

    /// Has the connection behind this body been released?
    pub fn is_closed(&self) -> bool {
        self.conn.is_none()
    }

    /// Close the body and the connection it holds.
    ///
    /// Any unread part of the body is discarded. The connection is shut down
    /// only the first time this is called; later calls do nothing.
    pub async fn close(&mut self) {
        drop(self.inner.take());

        if let Some(mut conn) = self.conn.take() {
            if let Err(error) = conn.shutdown().await {
                debug!("scgi connection shutdown error: {}", error);
            }
            trace!("scgi connection closed");
        }
    }

    /// Release the connection without waiting for a graceful shutdown.
    fn release(&mut self) {
        drop(self.inner.take());
        if self.conn.take().is_some() {
            trace!("scgi connection released");
        }
    }
}

impl fmt::Debug for ResponseBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResponseBody")
            .field("inner", &DebugLiteral(self.inner.as_ref().map_or("closed", |_| "open")))
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl http_body::Body for ResponseBody {
    type Data = Bytes;
    type Error = BodyError;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.get_mut();
        let Some(inner) = this.inner.as_mut() else {
            return Poll::Ready(None);
        };

        let frame = ready!(Pin::new(&mut *inner).poll_frame(cx));
        match &frame {
            Some(Ok(_)) if !inner.is_done() => {}
            Some(Err(error)) => {
                debug!("scgi response body error: {}", error);
                this.release();
            }
            _ => this.release(),
        }
        Poll::Ready(frame)
    }

    fn is_end_stream(&self) -> bool {
        self.inner
            .as_ref()
            .map_or(true, |inner| inner.is_end_stream())
    }

    fn size_hint(&self) -> SizeHint {
        self.inner
            .as_ref()
            .map_or_else(|| SizeHint::with_exact(0), |inner| inner.size_hint())
    }
}
