use std::time::Duration;

use parking_lot::Mutex;
use tokio::{
    runtime::Handle,
    task::JoinHandle,
    time::{self, Instant, MissedTickBehavior},
};

/// Periodic flush trigger owned by one batcher.
///
/// The first tick fires one full period after start. Stopping is idempotent
/// and also happens on drop.
pub(crate) struct Ticker {
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Ticker {
    /// Spawns the tick loop. `on_tick` returning `false` ends the loop.
    /// A zero `period` starts nothing.
    pub(crate) fn start<F>(runtime: &Handle, period: Duration, mut on_tick: F) -> Self
    where
        F: FnMut() -> bool + Send + 'static,
    {
        if period.is_zero() {
            log::debug!("batch interval is zero, flush timer disabled");
            return Self {
                task: Mutex::new(None),
            };
        }

        let task = runtime.spawn(async move {
            let mut interval = time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                interval.tick().await;

                if !on_tick() {
                    break;
                }
            }
        });

        log::debug!("flush timer started with period {:?}", period);

        Self {
            task: Mutex::new(Some(task)),
        }
    }

    /// Returns `true` if this call stopped a running timer.
    pub(crate) fn stop(&self) -> bool {
        match self.task.lock().take() {
            Some(task) => {
                task.abort();
                log::debug!("flush timer stopped");
                true
            }
            None => false,
        }
    }

    pub(crate) fn is_running(&self) -> bool {
        self.task.lock().as_ref().map_or(false, |t| !t.is_finished())
    }
}

impl Drop for Ticker {
    fn drop(&mut self) {
        self.stop();
    }
}
