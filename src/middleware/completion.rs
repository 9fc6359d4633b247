use std::pin::Pin;
use std::task::{Context, Poll};

use axum::body::Body;
use bytes::Bytes;
use http_body::{Body as _, Frame, SizeHint};
use tokio::sync::oneshot;

use crate::error::CompletionError;

/// Response body that reports, exactly once, how its delivery ended.
///
/// `Err` only if the inner body yields an error. Everything else counts as
/// finished: polled to the end, dropped after `is_end_stream`, swapped out
/// for an empty body (HEAD), or dropped because the client went away.
pub struct ObservedBody {
    inner: Body,
    done: Option<oneshot::Sender<Result<(), CompletionError>>>,
}

/// Receiving half of the completion signal.
pub struct Completion(oneshot::Receiver<Result<(), CompletionError>>);

impl ObservedBody {
    pub fn new(inner: Body) -> (Self, Completion) {
        let (tx, rx) = oneshot::channel();
        let body = Self {
            inner,
            done: Some(tx),
        };
        (body, Completion(rx))
    }

    fn finish(&mut self, outcome: Result<(), CompletionError>) {
        if let Some(tx) = self.done.take() {
            let _ = tx.send(outcome);
        }
    }
}

impl Completion {
    pub async fn wait(self) -> Result<(), CompletionError> {
        // The sender always fires from `Drop`, so a closed channel means
        // the body went away without an error.
        self.0.await.unwrap_or(Ok(()))
    }
}

impl http_body::Body for ObservedBody {
    type Data = Bytes;
    type Error = axum::Error;

    fn poll_frame(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = &mut *self;
        let polled = Pin::new(&mut this.inner).poll_frame(cx);

        match &polled {
            Poll::Ready(None) => this.finish(Ok(())),
            Poll::Ready(Some(Err(err))) => {
                this.finish(Err(CompletionError::Body(err.to_string())))
            }
            _ => {}
        }

        polled
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}

impl Drop for ObservedBody {
    fn drop(&mut self) {
        self.finish(Ok(()));
    }
}
