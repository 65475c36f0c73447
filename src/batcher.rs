use std::{collections::VecDeque, mem, panic::AssertUnwindSafe, sync::Arc, time::Duration};

use futures::FutureExt;
use parking_lot::Mutex;
use tokio::runtime::Handle;

use crate::{
    builder::MicroBatcherBuilder,
    config::MicroBatcherConfig,
    error::{BuildError, Error, ShutdownTimeout},
    handle::{JobHandle, PendingJob, Settle},
    handler::AsyncBatchHandler,
    timer::Ticker,
};

type Pending<J, H> =
    PendingJob<J, <H as AsyncBatchHandler<J>>::Output, <H as AsyncBatchHandler<J>>::Error>;

#[derive(Debug, Clone, Copy)]
enum Trigger {
    Size,
    Tick,
    Drain,
}

impl Trigger {
    /// Queue depth this trigger needs before it takes a batch. Only a live
    /// shutdown lowers it, so a drain task outliving its shutdown behaves
    /// like a size trigger.
    fn min_len(self, batch_size: usize) -> usize {
        match self {
            Trigger::Size | Trigger::Drain => batch_size,
            Trigger::Tick => 1,
        }
    }

    /// Drain requests queue up for the flight slot instead of giving up.
    fn waits_for_flight(self) -> bool {
        matches!(self, Trigger::Drain)
    }
}

struct QueueState<P> {
    jobs: VecDeque<P>,
    // a batch taken from `jobs` is with the handler
    processing: bool,
    // number of graceful shutdowns currently draining
    draining: usize,
}

/// Keeps the queue in draining mode for as long as it lives.
struct DrainGuard<'a, P> {
    state: &'a Mutex<QueueState<P>>,
}

impl<'a, P> DrainGuard<'a, P> {
    fn new(state: &'a Mutex<QueueState<P>>) -> Self {
        state.lock().draining += 1;
        Self { state }
    }
}

impl<P> Drop for DrainGuard<'_, P> {
    fn drop(&mut self) {
        self.state.lock().draining -= 1;
    }
}

struct Shared<J, H>
where
    J: Send + 'static,
    H: AsyncBatchHandler<J>,
{
    handler: H,
    batch_size: usize,
    state: Mutex<QueueState<Pending<J, H>>>,
    // held for the whole handler invocation of a batch
    flight: tokio::sync::Mutex<()>,
}

impl<J, H> Shared<J, H>
where
    J: Send + 'static,
    H: AsyncBatchHandler<J>,
{
    /// Returns `true` when a full batch is waiting.
    fn push(&self, pending: Pending<J, H>) -> bool {
        let mut state = self.state.lock();
        state.jobs.push_back(pending);
        state.jobs.len() >= self.batch_size
    }

    fn len(&self) -> usize {
        self.state.lock().jobs.len()
    }

    fn has_full_batch(&self) -> bool {
        self.len() >= self.batch_size
    }

    fn is_draining(&self) -> bool {
        self.state.lock().draining > 0
    }

    fn take_batch(&self, min_len: usize) -> Option<Vec<Pending<J, H>>> {
        let mut state = self.state.lock();
        if state.jobs.is_empty() || (state.draining == 0 && state.jobs.len() < min_len) {
            return None;
        }

        let n = state.jobs.len().min(self.batch_size);
        state.processing = true;
        Some(state.jobs.drain(..n).collect())
    }

    /// Marks the current batch done and tells whether to take another one.
    fn finish_batch(&self) -> bool {
        let mut state = self.state.lock();
        state.processing = false;
        state.jobs.len() >= self.batch_size || (state.draining > 0 && !state.jobs.is_empty())
    }

    fn abandon_queued(&self) -> usize {
        let jobs = mem::take(&mut self.state.lock().jobs);
        let count = jobs.len();
        for pending in jobs {
            pending.abandon();
        }

        count
    }

    /// Flush entry point for every trigger.
    ///
    /// Outside of shutdown a size or timer request that finds a batch in
    /// flight is dropped; the runner re-checks the queue after every batch
    /// and after giving up the flight slot, so a full batch is never
    /// stranded.
    async fn request_flush(self: Arc<Self>, trigger: Trigger) {
        loop {
            let flight = if trigger.waits_for_flight() || self.is_draining() {
                self.flight.lock().await
            } else {
                match self.flight.try_lock() {
                    Ok(flight) => flight,
                    Err(_) => {
                        log::trace!("{:?} flush skipped, batch already in flight", trigger);
                        return;
                    }
                }
            };

            self.flush_backlog(trigger).await;
            drop(flight);

            if !self.has_full_batch() {
                return;
            }
        }
    }

    /// Processes one batch if the trigger's depth is met, then keeps going
    /// while a full batch is waiting (or anything at all while draining).
    /// Caller must hold the flight slot.
    async fn flush_backlog(&self, trigger: Trigger) {
        let mut min_len = trigger.min_len(self.batch_size);

        while let Some(batch) = self.take_batch(min_len) {
            self.run_batch(batch).await;

            if !self.finish_batch() {
                break;
            }
            min_len = self.batch_size;
        }
    }

    async fn run_batch(&self, batch: Vec<Pending<J, H>>) {
        let (jobs, settles): (Vec<J>, Vec<_>) =
            batch.into_iter().map(PendingJob::into_parts).unzip();
        let expected = jobs.len();

        log::trace!("dispatching batch of {} jobs", expected);

        let resp = AssertUnwindSafe(self.handler.process(jobs))
            .catch_unwind()
            .await;

        match resp {
            Ok(Ok(results)) if results.len() == expected => {
                for (settle, result) in settles.into_iter().zip(results) {
                    settle.send(Ok(result));
                }
            }

            Ok(Ok(results)) => {
                let got = results.len();
                log::error!(
                    "AsyncBatchHandler returned {} results for a batch of {} jobs",
                    got,
                    expected
                );

                Settle::fail_all(settles, Error::ResultCountMismatch { expected, got });
            }

            Ok(Err(err)) => {
                log::error!("AsyncBatchHandler error: {err}");
                Settle::fail_all(settles, Error::Handler(Arc::new(err)));
            }

            Err(_) => {
                log::error!("AsyncBatchHandler panicked on a batch of {} jobs", expected);
                Settle::fail_all(settles, Error::HandlerPanicked);
            }
        }
    }
}

/// Collects individually submitted jobs into batches for an
/// [`AsyncBatchHandler`].
///
/// A batch is dispatched when `batch_size` jobs are queued or when the
/// `batch_interval` timer fires, whichever comes first. At most one batch is
/// processed at a time and batches are taken from the queue in strict FIFO
/// order.
///
/// The batcher must be created inside a Tokio runtime. It keeps a handle to
/// that runtime, so [`submit`](Self::submit) may be called from any thread.
pub struct MicroBatcher<J, H>
where
    J: Send + 'static,
    H: AsyncBatchHandler<J>,
{
    shared: Arc<Shared<J, H>>,
    ticker: Ticker,
    runtime: Handle,
    config: MicroBatcherConfig,
}

impl<J, H> MicroBatcher<J, H>
where
    J: Send + 'static,
    H: AsyncBatchHandler<J>,
{
    /// Creates the batcher and starts its flush timer.
    pub fn new(handler: H, config: MicroBatcherConfig) -> Result<Self, BuildError> {
        config.validate()?;
        let runtime = Handle::try_current().map_err(|_| BuildError::NoRuntime)?;

        let shared = Arc::new(Shared {
            handler,
            batch_size: config.batch_size,
            state: Mutex::new(QueueState {
                jobs: VecDeque::new(),
                processing: false,
                draining: 0,
            }),
            flight: tokio::sync::Mutex::new(()),
        });

        let weak = Arc::downgrade(&shared);
        let ticker = Ticker::start(&runtime, config.batch_interval, move || {
            match weak.upgrade() {
                Some(shared) => {
                    tokio::spawn(shared.request_flush(Trigger::Tick));
                    true
                }
                None => false,
            }
        });

        Ok(Self {
            shared,
            ticker,
            runtime,
            config,
        })
    }

    pub fn builder(handler: H) -> MicroBatcherBuilder<J, H> {
        MicroBatcherBuilder::new(handler)
    }

    /// Queues `job` and returns immediately.
    ///
    /// The returned handle resolves with the job's own result once its batch
    /// has been processed. Jobs submitted after a shutdown are still accepted;
    /// without the timer they are flushed by a full batch or another
    /// [`shutdown`](Self::shutdown).
    pub fn submit(&self, job: J) -> JobHandle<H::Output, H::Error> {
        let (pending, handle) = PendingJob::new(job);

        if self.shared.push(pending) {
            self.runtime
                .spawn(self.shared.clone().request_flush(Trigger::Size));
        }

        handle
    }

    /// Stops the timer and processes everything still queued, one batch at a
    /// time.
    ///
    /// Returns once every job submitted before the call has settled. There is
    /// no bound on how long this takes if the handler hangs; see
    /// [`shutdown_timeout`](Self::shutdown_timeout).
    pub async fn shutdown(&self) {
        let _draining = DrainGuard::new(&self.shared.state);
        self.ticker.stop();

        log::debug!("MicroBatcher shutting down, {} jobs queued", self.len());

        // The drain runs as its own task so that an abandoned wait never
        // cancels a batch halfway through the handler.
        let shared = self.shared.clone();
        if let Err(err) = self.runtime.spawn(shared.request_flush(Trigger::Drain)).await {
            log::error!("MicroBatcher drain task failed: {err}");
        }

        log::debug!("MicroBatcher drained");
    }

    /// [`shutdown`](Self::shutdown) with a deadline.
    ///
    /// On timeout the batch in flight still completes, but jobs that are
    /// still queued stay queued.
    pub async fn shutdown_timeout(&self, timeout: Duration) -> Result<(), ShutdownTimeout> {
        match tokio::time::timeout(timeout, self.shutdown()).await {
            Ok(()) => Ok(()),
            Err(_) => {
                let remaining = self.len();
                log::warn!(
                    "MicroBatcher shutdown timed out after {:?}, {} jobs still queued",
                    timeout,
                    remaining
                );

                Err(ShutdownTimeout { remaining })
            }
        }
    }

    /// Stops the timer and nothing else.
    ///
    /// Queued jobs are not processed and their handles never resolve, unless
    /// [`MicroBatcherConfig::abandon_on_force_shutdown`] is set, in which case
    /// they resolve to [`Error::Abandoned`]. A batch already in flight is
    /// never interrupted.
    pub fn force_shutdown(&self) {
        self.ticker.stop();

        if self.config.abandon_on_force_shutdown {
            let abandoned = self.shared.abandon_queued();
            if abandoned > 0 {
                log::warn!("MicroBatcher force shutdown abandoned {} jobs", abandoned);
            }
        } else {
            let left = self.len();
            if left > 0 {
                log::warn!(
                    "MicroBatcher force shutdown left {} jobs queued, their handles will not resolve",
                    left
                );
            }
        }
    }

    /// Number of queued jobs, not counting a batch in flight.
    pub fn len(&self) -> usize {
        self.shared.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// `true` while the handler is working on a batch.
    pub fn is_processing(&self) -> bool {
        self.shared.state.lock().processing
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shared.is_draining()
    }

    /// `false` once either shutdown has stopped the timer, or when the
    /// interval is zero.
    pub fn is_timer_running(&self) -> bool {
        self.ticker.is_running()
    }

    pub fn config(&self) -> &MicroBatcherConfig {
        &self.config
    }
}
