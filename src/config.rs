use std::time::Duration;

use serde_derive::{Deserialize, Serialize};

use crate::error::BuildError;

/// Configuration of a [`MicroBatcher`](crate::MicroBatcher).
///
/// # Example
///
/// ```rust,ignore
/// let batcher = MicroBatcher::new(handler, MicroBatcherConfig {
///     batch_size: 50,
///     ..Default::default()
/// })?;
/// ```
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MicroBatcherConfig {
    /// Number of jobs per batch.
    ///
    /// A batch is dispatched as soon as this many jobs are queued. Must be at
    /// least 1. Default: 8
    pub batch_size: usize,

    /// Period of the flush timer.
    ///
    /// Every tick dispatches whatever is queued, up to `batch_size` jobs.
    /// `Duration::ZERO` disables the timer, so only full batches and shutdown
    /// flush. Default: 100ms
    pub batch_interval: Duration,

    /// If true, [`force_shutdown`](crate::MicroBatcher::force_shutdown) settles
    /// every queued job with [`Error::Abandoned`](crate::Error::Abandoned)
    /// instead of leaving it pending forever.
    ///
    /// Default: false
    pub abandon_on_force_shutdown: bool,
}

impl Default for MicroBatcherConfig {
    fn default() -> Self {
        Self {
            batch_size: 8,
            batch_interval: Duration::from_millis(100),
            abandon_on_force_shutdown: false,
        }
    }
}

impl MicroBatcherConfig {
    pub fn new(batch_size: usize, batch_interval: Duration) -> Self {
        Self {
            batch_size,
            batch_interval,
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<(), BuildError> {
        if self.batch_size == 0 {
            return Err(BuildError::ZeroBatchSize);
        }

        Ok(())
    }
}
