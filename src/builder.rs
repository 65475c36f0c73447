use std::{marker::PhantomData, time::Duration};

use crate::{
    config::MicroBatcherConfig, error::BuildError, handler::AsyncBatchHandler, MicroBatcher,
};

/// Builder returned by [`MicroBatcher::builder`].
#[must_use]
pub struct MicroBatcherBuilder<J, H> {
    handler: H,
    config: MicroBatcherConfig,
    _m: PhantomData<fn(J)>,
}

impl<J, H> MicroBatcherBuilder<J, H>
where
    J: Send + 'static,
    H: AsyncBatchHandler<J>,
{
    pub(crate) fn new(handler: H) -> Self {
        Self {
            handler,
            config: MicroBatcherConfig::default(),
            _m: PhantomData,
        }
    }

    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.config.batch_size = batch_size;
        self
    }

    pub fn batch_interval(mut self, batch_interval: Duration) -> Self {
        self.config.batch_interval = batch_interval;
        self
    }

    pub fn abandon_on_force_shutdown(mut self, abandon: bool) -> Self {
        self.config.abandon_on_force_shutdown = abandon;
        self
    }

    /// Replaces every setting made so far.
    pub fn config(mut self, config: MicroBatcherConfig) -> Self {
        self.config = config;
        self
    }

    /// Must be called from within a Tokio runtime; the flush timer starts here.
    pub fn build(self) -> Result<MicroBatcher<J, H>, BuildError> {
        MicroBatcher::new(self.handler, self.config)
    }
}
