use futures::{Stream, StreamExt};
use std::pin::Pin;
use std::task::{Context, Poll};

use crate::error::CoreResult;

/// A live, cancellable sequence of change events.
///
/// Dropping the handle (or calling [`Subscription::cancel`]) drops the
/// underlying change-feed receiver, which is what releases the subscription
/// at the store. An `Err` item is terminal: the stream ends after it and the
/// caller decides whether to subscribe again.
pub struct Subscription<T> {
    inner: Pin<Box<dyn Stream<Item = CoreResult<T>> + Send>>,
}

impl<T> Subscription<T> {
    pub fn new<S>(stream: S) -> Self
    where
        S: Stream<Item = CoreResult<T>> + Send + 'static,
    {
        Self { inner: Box::pin(stream) }
    }

    /// Waits for the next event. `None` means the feed is gone.
    pub async fn next_event(&mut self) -> Option<CoreResult<T>> {
        self.inner.next().await
    }

    pub fn cancel(self) {
        drop(self);
    }
}

impl<T> Stream for Subscription<T> {
    type Item = CoreResult<T>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.as_mut().poll_next(cx)
    }
}
