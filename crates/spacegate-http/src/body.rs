//! Gateway HTTP response body type.

use std::convert::Infallible;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use http_body::{Frame, SizeHint};

/// Response body for gateway responses.
///
/// Gateway responses are rendered in full before they are sent (JSON
/// documents, or nothing for preflights and redirects), so the body is a
/// single optional buffer yielded as one data frame.
#[derive(Debug, Default)]
pub struct GatewayBody {
    data: Option<Bytes>,
}

impl GatewayBody {
    /// Create a body from raw bytes. Empty input yields an empty body.
    #[must_use]
    pub fn from_bytes(data: impl Into<Bytes>) -> Self {
        let data = data.into();
        Self {
            data: (!data.is_empty()).then_some(data),
        }
    }

    /// Create an empty body.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Remaining buffered length in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.as_ref().map_or(0, Bytes::len)
    }

    /// Whether nothing is left to send.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_none()
    }
}

impl http_body::Body for GatewayBody {
    type Data = Bytes;
    type Error = Infallible;

    fn poll_frame(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        Poll::Ready(self.get_mut().data.take().map(|data| Ok(Frame::data(data))))
    }

    fn is_end_stream(&self) -> bool {
        self.is_empty()
    }

    fn size_hint(&self) -> SizeHint {
        SizeHint::with_exact(u64::try_from(self.len()).unwrap_or(u64::MAX))
    }
}
