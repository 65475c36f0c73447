use std::{future::Future, sync::Arc};

use async_trait::async_trait;

/// Processes a whole batch of jobs at once.
///
/// `process` must return exactly one result per job, in the order the jobs
/// were given. Returning `Err` fails every job of the batch with that error.
#[async_trait]
pub trait AsyncBatchHandler<J: Send + 'static>: Send + Sync + 'static {
    type Output: Send + 'static;
    type Error: std::error::Error + Send + Sync + 'static;

    async fn process(&self, jobs: Vec<J>) -> Result<Vec<Self::Output>, Self::Error>;
}

/// Blocking twin of [`AsyncBatchHandler`]. Wrap it in [`Blocking`] to use it
/// with a [`MicroBatcher`](crate::MicroBatcher).
pub trait BatchHandler<J>: Send + Sync + 'static {
    type Output: Send + 'static;
    type Error: std::error::Error + Send + Sync + 'static;

    fn process(&self, jobs: Vec<J>) -> Result<Vec<Self::Output>, Self::Error>;
}

#[async_trait]
impl<J, H> AsyncBatchHandler<J> for Arc<H>
where
    J: Send + 'static,
    H: AsyncBatchHandler<J>,
{
    type Output = H::Output;
    type Error = H::Error;

    async fn process(&self, jobs: Vec<J>) -> Result<Vec<Self::Output>, Self::Error> {
        AsyncBatchHandler::process(&**self, jobs).await
    }
}

/// Runs a [`BatchHandler`] on the Tokio blocking pool.
pub struct Blocking<H> {
    inner: Arc<H>,
}

impl<H> Blocking<H> {
    pub fn new(handler: H) -> Self {
        Self {
            inner: Arc::new(handler),
        }
    }

    pub fn get_ref(&self) -> &H {
        &self.inner
    }
}

#[async_trait]
impl<J, H> AsyncBatchHandler<J> for Blocking<H>
where
    J: Send + 'static,
    H: BatchHandler<J>,
{
    type Output = H::Output;
    type Error = H::Error;

    async fn process(&self, jobs: Vec<J>) -> Result<Vec<Self::Output>, Self::Error> {
        let handler = self.inner.clone();

        match tokio::task::spawn_blocking(move || BatchHandler::process(&*handler, jobs)).await {
            Ok(resp) => resp,
            Err(err) => match err.try_into_panic() {
                Ok(payload) => std::panic::resume_unwind(payload),
                Err(err) => panic!("blocking batch handler did not complete: {err}"),
            },
        }
    }
}

/// Handler built from an async closure, see [`handler_fn`].
pub struct FnHandler<F> {
    f: F,
}

/// Turns `Fn(Vec<J>) -> impl Future<Output = Result<Vec<R>, E>>` into an
/// [`AsyncBatchHandler`].
///
/// ```rust,ignore
/// let batcher = MicroBatcher::new(
///     handler_fn(|jobs: Vec<u32>| async move {
///         Ok::<_, Infallible>(jobs.into_iter().map(|x| x * 2).collect())
///     }),
///     MicroBatcherConfig::default(),
/// )?;
/// ```
pub fn handler_fn<F>(f: F) -> FnHandler<F> {
    FnHandler { f }
}

#[async_trait]
impl<J, F, Fut, R, E> AsyncBatchHandler<J> for FnHandler<F>
where
    J: Send + 'static,
    F: Fn(Vec<J>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Vec<R>, E>> + Send + 'static,
    R: Send + 'static,
    E: std::error::Error + Send + Sync + 'static,
{
    type Output = R;
    type Error = E;

    async fn process(&self, jobs: Vec<J>) -> Result<Vec<R>, E> {
        (self.f)(jobs).await
    }
}
