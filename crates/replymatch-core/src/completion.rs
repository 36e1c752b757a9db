use std::time::Duration;

use crate::error::{MatchError, Result};

/// Create a linked single-assignment slot.
///
/// The [`Completer`] goes to whoever may produce the outcome (the registry);
/// the [`Completion`] stays with the caller that waits for it.
pub fn completion<R>() -> (Completer<R>, Completion<R>) {
    let (tx, rx) = oneshot::channel();
    (Completer { tx }, Completion { rx })
}

/// Write side of a completion. Resolving consumes it, so it can only happen once.
#[derive(Debug)]
pub struct Completer<R> {
    tx: oneshot::Sender<Result<R>>,
}

impl<R> Completer<R> {
    /// Deliver an outcome.
    ///
    /// Returns `false` if the waiting side already dropped its [`Completion`];
    /// the outcome is discarded in that case.
    pub fn resolve(self, outcome: Result<R>) -> bool {
        self.tx.send(outcome).is_ok()
    }

    pub fn succeed(self, value: R) -> bool {
        self.resolve(Ok(value))
    }

    pub fn fail(self, err: MatchError) -> bool {
        self.resolve(Err(err))
    }
}

/// Read side of a completion.
///
/// Dropping the `Completer` without resolving it surfaces as
/// [`MatchError::Abandoned`]. With the `async` feature this is also a `Future`.
#[derive(Debug)]
pub struct Completion<R> {
    rx: oneshot::Receiver<Result<R>>,
}

impl<R> Completion<R> {
    /// Block until the outcome is available.
    pub fn wait(self) -> Result<R> {
        self.rx.recv().unwrap_or(Err(MatchError::Abandoned))
    }

    /// Block for at most `timeout`. `None` means nothing arrived yet.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<Result<R>> {
        match self.rx.recv_timeout(timeout) {
            Ok(outcome) => Some(outcome),
            Err(oneshot::RecvTimeoutError::Timeout) => None,
            Err(oneshot::RecvTimeoutError::Disconnected) => Some(Err(MatchError::Abandoned)),
        }
    }

    /// Take the outcome if it is already there.
    pub fn try_take(&self) -> Option<Result<R>> {
        match self.rx.try_recv() {
            Ok(outcome) => Some(outcome),
            Err(oneshot::TryRecvError::Empty) => None,
            Err(oneshot::TryRecvError::Disconnected) => Some(Err(MatchError::Abandoned)),
        }
    }
}

#[cfg(feature = "async")]
impl<R> std::future::Future for Completion<R> {
    type Output = Result<R>;

    fn poll(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Self::Output> {
        std::future::Future::poll(std::pin::Pin::new(&mut self.rx), cx)
            .map(|received| received.unwrap_or(Err(MatchError::Abandoned)))
    }
}
