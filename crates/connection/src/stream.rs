//! Cancellation-safe stream adapter
//!
//! Abandoning a partially consumed result stream can leave the backend session
//! in an indeterminate state. [`CancelSafeStream`] drains instead: once the
//! consumer cancels, nothing more is forwarded, the upstream is pulled to its
//! own terminal signal with every item discarded, and only then is the
//! attached guard (typically a session lease) dropped.

use futures::{Stream, TryStream, TryStreamExt};
use std::fmt;
use std::pin::Pin;
use std::task::{Context, Poll};

/// Stream wrapper that drains its upstream when cancelled or dropped early
pub struct CancelSafeStream<S, G = ()>
where
    S: TryStream + Unpin + Send + 'static,
    S::Ok: Send,
    S::Error: fmt::Display + Send,
    G: Send + 'static,
{
    /// Present until the upstream terminates or a drain has finished with it.
    /// Clearing it is the single-use guard: a later cancel finds nothing to drain.
    upstream: Option<S>,

    /// Kept alive until the upstream has reached its terminal signal
    guard: Option<G>,

    /// The upstream ended while being consumed normally
    terminated: bool,

    /// Nothing more is forwarded once set
    cancelled: bool,
}

impl<S> CancelSafeStream<S, ()>
where
    S: TryStream + Unpin + Send + 'static,
    S::Ok: Send,
    S::Error: fmt::Display + Send,
{
    pub fn new(upstream: S) -> Self {
        Self::with_guard(upstream, ())
    }
}

impl<S, G> CancelSafeStream<S, G>
where
    S: TryStream + Unpin + Send + 'static,
    S::Ok: Send,
    S::Error: fmt::Display + Send,
    G: Send + 'static,
{
    /// Wrap `upstream`, holding `guard` until it has fully terminated
    pub fn with_guard(upstream: S, guard: G) -> Self {
        Self {
            upstream: Some(upstream),
            guard: Some(guard),
            terminated: false,
            cancelled: false,
        }
    }

    /// Whether the upstream ended while being consumed normally
    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    /// Stop forwarding and drain the upstream to its terminal signal.
    ///
    /// Remaining items and any error are swallowed. The guard is dropped once
    /// the drain completes. Calling this again is a no-op. If this future is
    /// dropped before the drain finishes, the upstream stays with the adapter
    /// and dropping the adapter finishes the drain.
    pub async fn cancel(&mut self) {
        self.cancelled = true;
        if let Some(upstream) = self.upstream.as_mut() {
            let discarded = drain(upstream).await;
            self.upstream = None;
            tracing::debug!("Drained cancelled stream, discarded {} item(s)", discarded);
        }
        self.guard.take();
    }

    /// Hand back the guard after the upstream terminated normally.
    ///
    /// Returns `None` if the stream did not terminate; the guard then stays
    /// with the drain that dropping the adapter starts.
    pub fn into_guard(mut self) -> Option<G> {
        if self.terminated {
            self.guard.take()
        } else {
            None
        }
    }
}

/// Pull `upstream` to completion, discarding items and swallowing errors
async fn drain<S>(upstream: &mut S) -> usize
where
    S: TryStream + Unpin,
    S::Error: fmt::Display,
{
    let mut discarded = 0;
    loop {
        match upstream.try_next().await {
            Ok(Some(_)) => discarded += 1,
            Ok(None) => return discarded,
            Err(e) => {
                discarded += 1;
                tracing::debug!("Swallowed error while draining cancelled stream: {}", e);
            }
        }
    }
}

// The guard is never pinned, so the adapter is Unpin whenever its upstream is.
impl<S, G> Unpin for CancelSafeStream<S, G>
where
    S: TryStream + Unpin + Send + 'static,
    S::Ok: Send,
    S::Error: fmt::Display + Send,
    G: Send + 'static,
{
}

impl<S, G> Stream for CancelSafeStream<S, G>
where
    S: TryStream + Unpin + Send + 'static,
    S::Ok: Send,
    S::Error: fmt::Display + Send,
    G: Send + 'static,
{
    type Item = Result<S::Ok, S::Error>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.cancelled {
            return Poll::Ready(None);
        }
        let Some(upstream) = this.upstream.as_mut() else {
            return Poll::Ready(None);
        };

        match upstream.try_poll_next_unpin(cx) {
            Poll::Ready(None) => {
                this.terminated = true;
                this.upstream = None;
                Poll::Ready(None)
            }
            other => other,
        }
    }
}

impl<S, G> Drop for CancelSafeStream<S, G>
where
    S: TryStream + Unpin + Send + 'static,
    S::Ok: Send,
    S::Error: fmt::Display + Send,
    G: Send + 'static,
{
    fn drop(&mut self) {
        let Some(mut upstream) = self.upstream.take() else {
            return;
        };
        let guard = self.guard.take();

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    let discarded = drain(&mut upstream).await;
                    tracing::debug!(
                        "Drained dropped stream in background, discarded {} item(s)",
                        discarded
                    );
                    drop(guard);
                });
            }
            Err(_) => {
                tracing::warn!("No runtime available to drain a dropped stream, abandoning it");
            }
        }
    }
}
