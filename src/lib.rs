//! Micro-batching of individually submitted jobs.
//!
//! A [`MicroBatcher`] accepts jobs one at a time through
//! [`submit`](MicroBatcher::submit), queues them, and hands them to an
//! [`AsyncBatchHandler`] in batches. A batch is dispatched as soon as
//! `batch_size` jobs are waiting, or when the `batch_interval` timer fires,
//! whichever happens first. Every job gets its own [`JobHandle`] which resolves
//! with that job's result once its batch has been processed.
//!
//! Only one batch is ever in flight. New jobs keep queueing while the handler
//! works, and the runner keeps going while a full batch is waiting.
//!
//! ```rust,ignore
//! let batcher = MicroBatcher::builder(MyHandler::new())
//!     .batch_size(32)
//!     .batch_interval(Duration::from_millis(50))
//!     .build()?;
//!
//! let result = batcher.submit(job).await?;
//!
//! batcher.shutdown().await;
//! ```
//!
//! [`shutdown`](MicroBatcher::shutdown) drains everything still queued and
//! returns once every submitted job has settled.
//! [`force_shutdown`](MicroBatcher::force_shutdown) only stops the timer and
//! leaves queued jobs unsettled.

mod batcher;
mod builder;
pub mod config;
pub mod error;
mod handle;
pub mod handler;
mod timer;

pub use batcher::MicroBatcher;
pub use builder::MicroBatcherBuilder;
pub use config::MicroBatcherConfig;
pub use error::{BuildError, Error, ShutdownTimeout};
pub use handle::JobHandle;
pub use handler::{handler_fn, AsyncBatchHandler, BatchHandler, Blocking, FnHandler};
