use std::{
    convert::Infallible,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use microbatch::{AsyncBatchHandler, MicroBatcher, MicroBatcherConfig, ShutdownTimeout};
use parking_lot::Mutex;
use tokio::{sync::Notify, time::sleep};

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

struct TmpReceiver {
    batches: Arc<Mutex<Vec<Vec<&'static str>>>>,
}

#[async_trait]
impl AsyncBatchHandler<&'static str> for TmpReceiver {
    type Output = &'static str;
    type Error = Infallible;

    async fn process(&self, jobs: Vec<&'static str>) -> Result<Vec<&'static str>, Self::Error> {
        self.batches.lock().push(jobs.clone());

        Ok(jobs)
    }
}

fn batcher(
    config: MicroBatcherConfig,
) -> (
    MicroBatcher<&'static str, TmpReceiver>,
    Arc<Mutex<Vec<Vec<&'static str>>>>,
) {
    let batches = Arc::new(Mutex::new(Vec::new()));
    let b = MicroBatcher::new(
        TmpReceiver {
            batches: batches.clone(),
        },
        config,
    )
    .unwrap();

    (b, batches)
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_processes_remaining_jobs() {
    init_logger();

    let (b, batches) = batcher(MicroBatcherConfig::new(2, Duration::from_secs(10)));

    let jobs = vec![b.submit("apple"), b.submit("banana"), b.submit("cherry")];

    sleep(Duration::from_millis(100)).await;
    b.shutdown().await;

    assert_eq!(
        batches.lock().as_slice(),
        &[vec!["apple", "banana"], vec!["cherry"]]
    );
    assert!(!b.is_shutting_down());

    let results = futures::future::join_all(jobs).await;
    assert_eq!(
        results.into_iter().map(Result::unwrap).collect::<Vec<_>>(),
        ["apple", "banana", "cherry"]
    );
}

#[tokio::test]
async fn test_shutdown_right_after_submit() {
    init_logger();

    let (b, batches) = batcher(MicroBatcherConfig::new(2, Duration::from_secs(10)));

    let mut jobs = vec![b.submit("apple"), b.submit("banana"), b.submit("cherry")];
    b.shutdown().await;

    // every job settled by the time shutdown returns
    for job in jobs.iter_mut() {
        assert!(job.try_outcome().unwrap().is_ok());
    }
    assert_eq!(
        batches.lock().as_slice(),
        &[vec!["apple", "banana"], vec!["cherry"]]
    );
}

#[tokio::test]
async fn test_shutdown_when_batch_size_not_met() {
    init_logger();

    let (b, batches) = batcher(MicroBatcherConfig::new(1000, Duration::from_secs(10)));

    let job = b.submit("apple");

    sleep(Duration::from_millis(100)).await;
    b.shutdown().await;

    assert_eq!(batches.lock().as_slice(), &[vec!["apple"]]);
    assert_eq!(job.await.unwrap(), "apple");
}

#[tokio::test]
async fn test_shutdown_is_idempotent() {
    init_logger();

    let (b, batches) = batcher(MicroBatcherConfig::new(3, Duration::from_millis(100)));

    b.shutdown().await;
    b.shutdown().await;
    b.force_shutdown();
    b.force_shutdown();
    b.shutdown().await;

    assert!(batches.lock().is_empty());
    assert!(b.is_empty());
}

#[tokio::test]
async fn test_concurrent_shutdowns() {
    init_logger();

    let (b, batches) = batcher(MicroBatcherConfig::new(2, Duration::from_secs(10)));

    let jobs = ["a", "b", "c", "d", "e"]
        .iter()
        .map(|j| b.submit(*j))
        .collect::<Vec<_>>();

    tokio::join!(b.shutdown(), b.shutdown());

    assert!(!b.is_shutting_down());
    assert!(b.is_empty());
    assert_eq!(
        batches.lock().concat(),
        vec!["a", "b", "c", "d", "e"]
    );
    for job in futures::future::join_all(jobs).await {
        assert!(job.is_ok());
    }
}

#[tokio::test(start_paused = true)]
async fn test_force_shutdown_ignores_queue() {
    init_logger();

    let (b, batches) = batcher(MicroBatcherConfig::new(10, Duration::from_secs(10)));

    let mut jobs = vec![b.submit("apple"), b.submit("banana"), b.submit("cherry")];

    sleep(Duration::from_millis(100)).await;
    b.force_shutdown();
    assert!(!b.is_timer_running());

    // well past the old interval, nothing ever ran
    sleep(Duration::from_secs(60)).await;

    assert!(batches.lock().is_empty());
    assert_eq!(b.len(), 3);
    assert!(jobs.iter_mut().all(|j| j.try_outcome().is_none()));
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_after_force_shutdown_still_drains() {
    init_logger();

    let (b, batches) = batcher(MicroBatcherConfig::new(10, Duration::from_secs(10)));

    let jobs = vec![b.submit("apple"), b.submit("banana")];

    b.force_shutdown();
    b.shutdown().await;

    assert_eq!(batches.lock().as_slice(), &[vec!["apple", "banana"]]);
    for job in futures::future::join_all(jobs).await {
        assert!(job.is_ok());
    }
}

#[tokio::test(start_paused = true)]
async fn test_force_shutdown_abandons_when_configured() {
    init_logger();

    let (b, batches) = batcher(MicroBatcherConfig {
        abandon_on_force_shutdown: true,
        ..MicroBatcherConfig::new(10, Duration::from_secs(10))
    });

    let jobs = vec![b.submit("apple"), b.submit("banana"), b.submit("cherry")];

    b.force_shutdown();

    assert!(b.is_empty());
    for job in futures::future::join_all(jobs).await {
        assert!(job.unwrap_err().is_abandoned());
    }

    b.shutdown().await;
    assert!(batches.lock().is_empty());
}

#[tokio::test]
async fn test_dropping_batcher_abandons_queue() {
    init_logger();

    let (b, batches) = batcher(MicroBatcherConfig::new(10, Duration::from_secs(10)));

    let job = b.submit("apple");
    drop(b);

    assert!(job.await.unwrap_err().is_abandoned());
    assert!(batches.lock().is_empty());
}

struct Stuck;

#[async_trait]
impl AsyncBatchHandler<&'static str> for Stuck {
    type Output = ();
    type Error = Infallible;

    async fn process(&self, _jobs: Vec<&'static str>) -> Result<Vec<()>, Self::Error> {
        futures::future::pending().await
    }
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_timeout_with_stuck_handler() {
    init_logger();

    let b = MicroBatcher::new(Stuck, MicroBatcherConfig::new(1, Duration::from_secs(10))).unwrap();

    let mut first = b.submit("apple");
    let mut second = b.submit("banana");

    let err = b
        .shutdown_timeout(Duration::from_secs(1))
        .await
        .unwrap_err();

    // "apple" is stuck in the handler, "banana" never left the queue
    assert_eq!(err, ShutdownTimeout { remaining: 1 });
    assert!(b.is_processing());
    assert!(!b.is_shutting_down());
    assert!(first.try_outcome().is_none());
    assert!(second.try_outcome().is_none());
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_timeout_completes_in_time() {
    init_logger();

    let (b, batches) = batcher(MicroBatcherConfig::new(10, Duration::from_secs(10)));

    let job = b.submit("apple");

    b.shutdown_timeout(Duration::from_secs(1)).await.unwrap();

    assert_eq!(job.await.unwrap(), "apple");
    assert_eq!(batches.lock().len(), 1);
}

/// Holds its first batch until the gate is opened.
struct Gated {
    batches: Arc<Mutex<Vec<Vec<u32>>>>,
    gate: Arc<Notify>,
    opened: AtomicBool,
}

#[async_trait]
impl AsyncBatchHandler<u32> for Gated {
    type Output = u32;
    type Error = Infallible;

    async fn process(&self, jobs: Vec<u32>) -> Result<Vec<u32>, Self::Error> {
        if !self.opened.swap(true, Ordering::SeqCst) {
            self.gate.notified().await;
        }

        self.batches.lock().push(jobs.clone());
        Ok(jobs)
    }
}

fn gated(
    batch_size: usize,
) -> (
    MicroBatcher<u32, Gated>,
    Arc<Mutex<Vec<Vec<u32>>>>,
    Arc<Notify>,
) {
    let batches = Arc::new(Mutex::new(Vec::new()));
    let gate = Arc::new(Notify::new());
    let b = MicroBatcher::new(
        Gated {
            batches: batches.clone(),
            gate: gate.clone(),
            opened: AtomicBool::new(false),
        },
        MicroBatcherConfig::new(batch_size, Duration::from_secs(10)),
    )
    .unwrap();

    (b, batches, gate)
}

#[tokio::test(start_paused = true)]
async fn test_timed_out_shutdown_leaves_queue_alone() {
    init_logger();

    let (b, batches, gate) = gated(3);

    let first = vec![b.submit(1), b.submit(2), b.submit(3)];
    let mut fourth = b.submit(4);

    let err = b
        .shutdown_timeout(Duration::from_secs(1))
        .await
        .unwrap_err();
    assert_eq!(err, ShutdownTimeout { remaining: 1 });
    assert!(!b.is_shutting_down());

    gate.notify_one();
    for job in futures::future::join_all(first).await {
        assert!(job.is_ok());
    }
    sleep(Duration::from_millis(10)).await;

    // the leftover drain task found no shutdown to serve
    assert_eq!(batches.lock().as_slice(), &[vec![1, 2, 3]]);
    assert_eq!(b.len(), 1);
    assert!(fourth.try_outcome().is_none());

    b.shutdown().await;
    assert_eq!(fourth.await.unwrap(), 4);
    assert_eq!(batches.lock().as_slice(), &[vec![1, 2, 3], vec![4]]);
}

#[tokio::test(start_paused = true)]
async fn test_full_batch_after_timed_out_shutdown() {
    init_logger();

    let (b, batches, gate) = gated(3);

    // the shutdown drain picks this one up and gets stuck on it
    let first = b.submit(1);
    let err = b
        .shutdown_timeout(Duration::from_secs(1))
        .await
        .unwrap_err();
    assert_eq!(err, ShutdownTimeout { remaining: 0 });
    assert!(b.is_processing());
    assert!(!b.is_timer_running());

    // a full batch lands while the slot is taken, plus one extra job
    let full = vec![b.submit(2), b.submit(3), b.submit(4)];
    let mut fifth = b.submit(5);

    gate.notify_one();
    assert_eq!(first.await.unwrap(), 1);
    for job in futures::future::join_all(full).await {
        assert!(job.is_ok());
    }
    sleep(Duration::from_millis(10)).await;

    assert_eq!(batches.lock().as_slice(), &[vec![1], vec![2, 3, 4]]);
    assert!(!b.is_processing());
    assert_eq!(b.len(), 1);
    assert!(fifth.try_outcome().is_none());

    b.force_shutdown();
    b.shutdown().await;
    assert_eq!(fifth.await.unwrap(), 5);
}
