use bytes::{Bytes, BytesMut};
use futures_core::Stream;
use std::pin::Pin;
use std::task::{Context, Poll};

use crate::transport::TransportError;

type CompletionHook = Box<dyn FnOnce(Bytes) + Send>;

/// Body stream that passes every chunk through untouched while keeping a copy.
///
/// When the inner stream ends cleanly the buffered body is handed to the
/// completion hook exactly once. Errors, drops before the end, and bodies
/// over `limit` bytes never reach the hook.
pub struct ObservedBody<S> {
    inner: S,
    buffer: BytesMut,
    limit: usize,
    on_complete: Option<CompletionHook>,
}

impl<S> ObservedBody<S> {
    pub fn new(inner: S, limit: usize, on_complete: impl FnOnce(Bytes) + Send + 'static) -> Self {
        Self {
            inner,
            buffer: BytesMut::new(),
            limit,
            on_complete: Some(Box::new(on_complete)),
        }
    }

    fn observe_chunk(&mut self, chunk: &Bytes) {
        if self.on_complete.is_none() {
            return;
        }
        if self.buffer.len() + chunk.len() > self.limit {
            tracing::debug!(limit = self.limit, "Response body over observation limit, skipping");
            self.abandon();
            return;
        }
        self.buffer.extend_from_slice(chunk);
    }

    fn abandon(&mut self) {
        self.on_complete = None;
        self.buffer = BytesMut::new();
    }

    fn finish(&mut self) {
        if let Some(hook) = self.on_complete.take() {
            let body = std::mem::take(&mut self.buffer).freeze();
            hook(body);
        }
    }
}

impl<S> Stream for ObservedBody<S>
where
    S: Stream<Item = Result<Bytes, TransportError>> + Unpin,
{
    type Item = Result<Bytes, TransportError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        match Pin::new(&mut self.inner).poll_next(cx) {
            Poll::Ready(Some(Ok(chunk))) => {
                self.observe_chunk(&chunk);
                Poll::Ready(Some(Ok(chunk)))
            }
            Poll::Ready(Some(Err(err))) => {
                self.abandon();
                Poll::Ready(Some(Err(err)))
            }
            Poll::Ready(None) => {
                self.finish();
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}
