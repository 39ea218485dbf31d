//! Single-delivery completion handles.
//!
//! Each submitted request gets a [`Completer`] (kept by the reactor with the
//! request) and a [`Completion`] (returned to the caller). `complete`
//! consumes the completer, so a request can deliver at most one event.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use futures::channel::oneshot;

/// Events that can stand in for a request the reactor dropped without
/// delivering (only during teardown).
pub trait CompletionEvent: Send + 'static {
    fn canceled() -> Self;
}

/// Reactor side of a completion.
#[derive(Debug)]
pub struct Completer<E> {
    tx: oneshot::Sender<E>,
}

impl<E> Completer<E> {
    /// Deliver the event. Returns `false` when the caller dropped its
    /// `Completion` and nobody will see it.
    pub fn complete(self, event: E) -> bool {
        self.tx.send(event).is_ok()
    }

    /// True once the caller dropped its `Completion`.
    pub fn is_abandoned(&self) -> bool {
        self.tx.is_canceled()
    }
}

/// Caller side of a completion. Resolves to exactly one event.
#[derive(Debug)]
#[must_use = "a Completion does nothing unless awaited or waited on"]
pub struct Completion<E> {
    rx: oneshot::Receiver<E>,
}

/// Create a connected completer/completion pair.
pub fn completion_pair<E>() -> (Completer<E>, Completion<E>) {
    let (tx, rx) = oneshot::channel();
    (Completer { tx }, Completion { rx })
}

impl<E: CompletionEvent> Completion<E> {
    /// Block the current thread until the event arrives.
    pub fn wait(self) -> E {
        futures::executor::block_on(self)
    }

    /// Take the event if it already arrived.
    pub fn try_take(&mut self) -> Option<E> {
        match self.rx.try_recv() {
            Ok(event) => event,
            Err(oneshot::Canceled) => Some(E::canceled()),
        }
    }

    /// Block for at most `timeout`. Gives the completion back on timeout.
    pub fn wait_timeout(mut self, timeout: Duration) -> Result<E, Self> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(event) = self.try_take() {
                return Ok(event);
            }
            if Instant::now() >= deadline {
                return Err(self);
            }
            std::thread::sleep(Duration::from_millis(1));
        }
    }
}

impl<E: CompletionEvent> Future for Completion<E> {
    type Output = E;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<E> {
        match Pin::new(&mut self.get_mut().rx).poll(cx) {
            Poll::Ready(Ok(event)) => Poll::Ready(event),
            Poll::Ready(Err(oneshot::Canceled)) => Poll::Ready(E::canceled()),
            Poll::Pending => Poll::Pending,
        }
    }
}
