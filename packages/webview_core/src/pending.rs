use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::oneshot;
use tokio::sync::oneshot::error::TryRecvError;

use crate::error::CoreError;

/// Sending half of a completion handle.
pub type Responder<T> = oneshot::Sender<Result<T, CoreError>>;

/// Completion handle for work submitted to the runtime.
///
/// Settles exactly once. Await it from async code, or call [`Pending::wait`]
/// from a plain thread. If the work is dropped without running (runtime shut
/// down, lane gone) the handle settles with [`CoreError::Cancelled`].
#[must_use = "a Pending does nothing unless awaited or waited on"]
pub struct Pending<T> {
    state: State<T>,
}

enum State<T> {
    Waiting(oneshot::Receiver<Result<T, CoreError>>),
    Ready(Option<Result<T, CoreError>>),
}

// The result is only ever moved out, never pinned.
impl<T> Unpin for Pending<T> {}

impl<T> Pending<T> {
    pub(crate) fn channel() -> (Responder<T>, Self) {
        let (tx, rx) = oneshot::channel();
        (
            tx,
            Self {
                state: State::Waiting(rx),
            },
        )
    }

    /// A handle that is already settled with `err`.
    pub fn failed(err: CoreError) -> Self {
        Self {
            state: State::Ready(Some(Err(err))),
        }
    }

    /// Block the current thread until settled.
    ///
    /// # Panics
    ///
    /// Panics when called from within an async execution context; await the
    /// handle there instead.
    pub fn wait(self) -> Result<T, CoreError> {
        match self.state {
            State::Waiting(rx) => rx.blocking_recv().unwrap_or(Err(CoreError::Cancelled)),
            State::Ready(result) => result.unwrap_or(Err(CoreError::Cancelled)),
        }
    }

    /// Non-blocking check. Yields the result the first time it is available;
    /// `None` while still pending.
    pub fn try_result(&mut self) -> Option<Result<T, CoreError>> {
        match &mut self.state {
            State::Waiting(rx) => match rx.try_recv() {
                Ok(result) => {
                    self.state = State::Ready(None);
                    Some(result)
                }
                Err(TryRecvError::Empty) => None,
                Err(TryRecvError::Closed) => {
                    self.state = State::Ready(None);
                    Some(Err(CoreError::Cancelled))
                }
            },
            State::Ready(result) => result.take(),
        }
    }
}

impl<T> Future for Pending<T> {
    type Output = Result<T, CoreError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match &mut this.state {
            State::Waiting(rx) => Pin::new(rx)
                .poll(cx)
                .map(|received| received.unwrap_or(Err(CoreError::Cancelled))),
            State::Ready(result) => Poll::Ready(result.take().unwrap_or(Err(CoreError::Cancelled))),
        }
    }
}

impl<T> std::fmt::Debug for Pending<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match &self.state {
            State::Waiting(_) => "waiting",
            State::Ready(Some(_)) => "ready",
            State::Ready(None) => "taken",
        };
        f.debug_struct("Pending").field("state", &state).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wait_returns_settled_value() {
        let (tx, pending) = Pending::<u32>::channel();
        std::thread::spawn(move || {
            let _ = tx.send(Ok(7));
        });
        assert_eq!(pending.wait(), Ok(7));
    }

    #[test]
    fn dropped_responder_means_cancelled() {
        let (tx, pending) = Pending::<()>::channel();
        drop(tx);
        assert_eq!(pending.wait(), Err(CoreError::Cancelled));
    }

    #[test]
    fn failed_is_ready_immediately() {
        let mut pending = Pending::<()>::failed(CoreError::RuntimeNotStarted);
        assert_eq!(pending.try_result(), Some(Err(CoreError::RuntimeNotStarted)));
        assert_eq!(pending.try_result(), None);
    }

    #[test]
    fn try_result_polls_without_blocking() {
        let (tx, mut pending) = Pending::<&'static str>::channel();
        assert_eq!(pending.try_result(), None);
        tx.send(Ok("done")).unwrap();
        assert_eq!(pending.try_result(), Some(Ok("done")));
    }

    #[test]
    fn awaitable_from_any_executor() {
        let (tx, pending) = Pending::<u8>::channel();
        tx.send(Err(CoreError::NotRecording)).unwrap();
        assert_eq!(
            futures::executor::block_on(pending),
            Err(CoreError::NotRecording)
        );
    }
}
