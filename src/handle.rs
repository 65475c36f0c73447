use std::{
    future::Future,
    pin::Pin,
    task::{Context, Poll},
};

use futures::FutureExt;
use tokio::sync::oneshot;

use crate::error::Error;

type Outcome<R, E> = Result<R, Error<E>>;

/// A queued job together with the sending half of its [`JobHandle`].
pub(crate) struct PendingJob<J, R, E: std::error::Error + 'static> {
    job: J,
    tx: oneshot::Sender<Outcome<R, E>>,
}

impl<J, R, E: std::error::Error + 'static> PendingJob<J, R, E> {
    pub(crate) fn new(job: J) -> (Self, JobHandle<R, E>) {
        let (tx, rx) = oneshot::channel();

        (PendingJob { job, tx }, JobHandle { rx })
    }

    pub(crate) fn into_parts(self) -> (J, Settle<R, E>) {
        (self.job, Settle { tx: self.tx })
    }

    pub(crate) fn abandon(self) {
        let _ = self.tx.send(Err(Error::Abandoned));
    }
}

/// Settles exactly one job; consumed on use.
pub(crate) struct Settle<R, E: std::error::Error + 'static> {
    tx: oneshot::Sender<Outcome<R, E>>,
}

impl<R, E: std::error::Error + 'static> Settle<R, E> {
    #[inline]
    pub(crate) fn send(self, outcome: Outcome<R, E>) {
        // submitter dropped its handle
        let _ = self.tx.send(outcome);
    }

    pub(crate) fn fail_all(batch: Vec<Self>, err: Error<E>) {
        for settle in batch {
            settle.send(Err(err.clone()));
        }
    }
}

/// Result of a single submitted job.
///
/// Resolves once the batch containing the job has been processed. If the job
/// is dropped without being processed (abandoning forced shutdown, or the
/// batcher itself was dropped) it resolves to [`Error::Abandoned`]. Jobs left
/// in the queue by a plain [`force_shutdown`](crate::MicroBatcher::force_shutdown)
/// never resolve.
#[must_use = "the job result is only observable through its handle"]
pub struct JobHandle<R, E: std::error::Error + 'static> {
    rx: oneshot::Receiver<Outcome<R, E>>,
}

impl<R, E: std::error::Error + 'static> JobHandle<R, E> {
    /// Non-blocking check. `None` while the job is still pending.
    ///
    /// Once this returns `Some`, the outcome has been taken and the handle
    /// must not be awaited.
    pub fn try_outcome(&mut self) -> Option<Result<R, Error<E>>> {
        match self.rx.try_recv() {
            Ok(outcome) => Some(outcome),
            Err(oneshot::error::TryRecvError::Empty) => None,
            Err(oneshot::error::TryRecvError::Closed) => Some(Err(Error::Abandoned)),
        }
    }
}

impl<R, E: std::error::Error + 'static> Future for JobHandle<R, E> {
    type Output = Result<R, Error<E>>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match self.rx.poll_unpin(cx) {
            Poll::Ready(Ok(outcome)) => Poll::Ready(outcome),
            Poll::Ready(Err(_)) => Poll::Ready(Err(Error::Abandoned)),
            Poll::Pending => Poll::Pending,
        }
    }
}
