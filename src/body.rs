//! Request body type.
//!
//! [`Body`] wraps the few shapes of request body a caller is likely to hand the
//! transport (nothing, a buffer, or some other [`http_body::Body`]) behind one type.

use std::fmt;
use std::pin::Pin;

use bytes::Bytes;
use http_body_util::BodyExt;
use http_body_util::{Empty, Full};

use crate::BoxError;

/// An http request using [Body] as the body.
pub type Request = http::Request<Body>;

/// A wrapper for different internal body types which implements [http_body::Body](http_body::Body)
///
/// Bodies can be created from [`Bytes`](bytes::Bytes), [`String`](std::string::String),
/// `Vec<u8>`, or [`&'static str`](str) using [`From`](std::convert::From) implementations.
///
/// An empty body can be created with [Body::empty](Body::empty).
#[derive(Debug)]
#[pin_project::pin_project]
pub struct Body {
    #[pin]
    inner: InnerBody,
}

impl Body {
    /// Create a new `Body` that wraps another [`http_body::Body`].
    pub fn new<B>(body: B) -> Self
    where
        B: http_body::Body<Data = Bytes> + Send + 'static,
        B::Error: Into<BoxError>,
    {
        let body = match try_downcast::<Body, B>(body) {
            Ok(body) => return body,
            Err(body) => body,
        };
        let body = match try_downcast::<Full<Bytes>, B>(body) {
            Ok(full) => return full.into(),
            Err(body) => body,
        };
        let body = match try_downcast::<Empty<Bytes>, B>(body) {
            Ok(_) => return Self::empty(),
            Err(body) => body,
        };

        Self {
            inner: InnerBody::Boxed(Box::pin(body.map_err(Into::into))),
        }
    }

    /// Create a new empty body.
    pub fn empty() -> Self {
        Self {
            inner: InnerBody::Empty,
        }
    }
}

impl Default for Body {
    fn default() -> Self {
        Self::empty()
    }
}

impl From<Bytes> for Body {
    fn from(body: Bytes) -> Self {
        Self {
            inner: InnerBody::Full(body.into()),
        }
    }
}

impl From<Vec<u8>> for Body {
    fn from(body: Vec<u8>) -> Self {
        Bytes::from(body).into()
    }
}

impl From<String> for Body {
    fn from(body: String) -> Self {
        Self { inner: body.into() }
    }
}

impl From<&'static str> for Body {
    fn from(body: &'static str) -> Self {
        Self {
            inner: InnerBody::Full(body.into()),
        }
    }
}

impl From<Full<Bytes>> for Body {
    fn from(body: Full<Bytes>) -> Self {
        Self {
            inner: InnerBody::Full(body),
        }
    }
}

impl From<Empty<Bytes>> for Body {
    fn from(_body: Empty<Bytes>) -> Self {
        Self {
            inner: InnerBody::Empty,
        }
    }
}

fn try_downcast<T, K>(k: K) -> Result<T, K>
where
    T: 'static,
    K: Send + 'static,
{
    let mut k = Some(k);
    if let Some(k) = <dyn std::any::Any>::downcast_mut::<Option<T>>(&mut k) {
        Ok(k.take().expect("downcast option is always populated"))
    } else {
        Err(k.expect("downcast option is always populated"))
    }
}

#[pin_project::pin_project(project = InnerBodyProj)]
enum InnerBody {
    Empty,
    Full(#[pin] Full<Bytes>),
    Boxed(#[pin] Pin<Box<dyn http_body::Body<Data = Bytes, Error = BoxError> + Send + 'static>>),
}

impl From<String> for InnerBody {
    fn from(body: String) -> Self {
        if body.is_empty() {
            Self::Empty
        } else {
            Self::Full(body.into())
        }
    }
}

macro_rules! poll_frame {
    ($body:ident, $cx:ident) => {
        $body
            .poll_frame($cx)
            .map(|opt| opt.map(|res| res.map_err(Into::into)))
    };
}

impl http_body::Body for Body {
    type Data = Bytes;
    type Error = BoxError;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Option<Result<http_body::Frame<Self::Data>, Self::Error>>> {
        let this = self.project();
        match this.inner.project() {
            InnerBodyProj::Empty => std::task::Poll::Ready(None),
            InnerBodyProj::Full(body) => poll_frame!(body, cx),
            InnerBodyProj::Boxed(body) => poll_frame!(body, cx),
        }
    }

    fn is_end_stream(&self) -> bool {
        match self.inner {
            InnerBody::Empty => true,
            InnerBody::Full(ref body) => body.is_end_stream(),
            InnerBody::Boxed(ref body) => body.is_end_stream(),
        }
    }

    fn size_hint(&self) -> http_body::SizeHint {
        match self.inner {
            InnerBody::Empty => http_body::SizeHint::with_exact(0),
            InnerBody::Full(ref body) => body.size_hint(),
            InnerBody::Boxed(ref body) => body.size_hint(),
        }
    }
}

impl fmt::Debug for InnerBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InnerBody::Empty => f.debug_struct("Empty").finish(),
            InnerBody::Full(_) => f.debug_struct("Full").finish(),
            InnerBody::Boxed(_) => f.debug_struct("Boxed").finish(),
        }
    }
}

#[cfg(test)]
mod tests {

    use super::*;

    use http_body::Body as _;
    use static_assertions::assert_impl_all;

    assert_impl_all!(Body: Send);

    #[test]
    fn size_hints() {
        assert_eq!(Body::empty().size_hint().exact(), Some(0));
        assert_eq!(Body::from("hello").size_hint().exact(), Some(5));
        assert_eq!(Body::from(String::new()).size_hint().exact(), Some(0));
        assert_eq!(Body::from(vec![1u8, 2, 3]).size_hint().exact(), Some(3));
    }

    #[test]
    fn new_does_not_rebox() {
        let body = Body::new(Body::from("hello"));
        assert!(matches!(body.inner, InnerBody::Full(_)));
    }

    #[test]
    fn new_unwraps_full_and_empty() {
        let body = Body::new(Full::new(Bytes::from_static(b"payload")));
        assert!(matches!(body.inner, InnerBody::Full(_)));

        let body = Body::new(Empty::<Bytes>::new());
        assert!(matches!(body.inner, InnerBody::Empty));
    }

    #[tokio::test]
    async fn collect_boxed_body() {
        let inner = Full::new(Bytes::from_static(b"payload"))
            .map_err(|never: std::convert::Infallible| -> std::io::Error { match never {} });
        let body = Body::new(inner);
        assert!(matches!(body.inner, InnerBody::Boxed(_)));

        let bytes = body.collect().await.unwrap().to_bytes();
        assert_eq!(bytes, Bytes::from_static(b"payload"));
    }
}
