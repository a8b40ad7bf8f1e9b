use super::*;
use crate::cursor::MemoryCursor;
use crate::lifecycle::{Lease, Lifecycle, RefCountedHandle};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_test::assert_err;

/// Serves the same batches to every job.
struct Batches {
    batches: Vec<Vec<u32>>,
    fail_on: Option<usize>,
    opens: AtomicUsize,
    releases: Arc<AtomicUsize>,
}

impl Batches {
    fn new(items: impl IntoIterator<Item = u32>, batch_size: usize) -> Self {
        let items: Vec<u32> = items.into_iter().collect();
        Self::from_batches(items.chunks(batch_size).map(|c| c.to_vec()).collect())
    }

    fn from_batches(batches: Vec<Vec<u32>>) -> Self {
        Self {
            batches,
            fail_on: None,
            opens: AtomicUsize::new(0),
            releases: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn failing_on(mut self, round_trip: usize) -> Self {
        self.fail_on = Some(round_trip);
        self
    }

    fn releases(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CursorSource for Batches {
    type Cursor = MemoryCursor<u32>;

    async fn open_cursor(&self) -> Result<MemoryCursor<u32>> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        let cursor = MemoryCursor::from_batches(self.batches.clone())
            .with_release_counter(Arc::clone(&self.releases));
        Ok(match self.fail_on {
            Some(n) => cursor.fail_on_round_trip(n),
            None => cursor,
        })
    }
}

#[tokio::test]
async fn test_each_series_visits_in_order_once() {
    let source = Batches::new(1..=5, 2);
    let seen = Mutex::new(Vec::new());

    StreamConsumer::new(&source)
        .each_series(|item| {
            seen.lock().unwrap().push(item);
            async { Ok::<_, BoxError>(()) }
        })
        .await
        .unwrap();

    assert_eq!(*seen.lock().unwrap(), vec![1, 2, 3, 4, 5]);
    assert_eq!(source.releases(), 1);
}

#[tokio::test]
async fn test_to_array_on_empty_stream() {
    let source = Batches::new(std::iter::empty(), 10);
    let items = StreamConsumer::new(&source).to_array().await.unwrap();
    assert!(items.is_empty());
    assert_eq!(source.releases(), 1);
}

#[tokio::test]
async fn test_to_array_skips_empty_batches() {
    let source = Batches::from_batches(vec![vec![1], vec![], vec![2, 3]]);
    let items = StreamConsumer::new(&source).to_array().await.unwrap();
    assert_eq!(items, vec![1, 2, 3]);
}

#[tokio::test]
async fn test_each_series_stops_on_third_failure() {
    let source = Batches::new(1..=10, 4);
    let calls = AtomicUsize::new(0);

    let err = StreamConsumer::new(&source)
        .each_series(|item| {
            calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if item == 3 {
                    Err("third item rejected")
                } else {
                    Ok(())
                }
            }
        })
        .await
        .unwrap_err();

    assert!(matches!(err, MniamError::Stream(StreamError::ItemFailed(_))));
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(source.releases(), 1);
}

#[tokio::test]
async fn test_to_array_matches_each_series() {
    let source = Batches::new((0..97).map(|n| n * 3), 10);

    let materialized = StreamConsumer::new(&source).to_array().await.unwrap();
    let collected = Mutex::new(Vec::new());
    StreamConsumer::new(&source)
        .each_series(|item| {
            collected.lock().unwrap().push(item);
            async { Ok::<_, BoxError>(()) }
        })
        .await
        .unwrap();

    assert_eq!(materialized, collected.into_inner().unwrap());
    assert_eq!(source.releases(), 2);
}

#[tokio::test]
async fn test_to_array_fetch_failure_discards_partial_results() {
    let source = Batches::new(1..=9, 3).failing_on(2);
    let err = assert_err!(StreamConsumer::new(&source).to_array().await);
    assert!(matches!(err, MniamError::Stream(StreamError::ReadFailed(_))));
    assert_eq!(source.releases(), 1);
}

#[tokio::test]
async fn test_each_limit_rejects_zero_before_opening() {
    let source = Batches::new(1..=3, 3);
    let err = assert_err!(
        StreamConsumer::new(&source)
            .each_limit(0, |_| async { Ok::<_, BoxError>(()) })
            .await
    );
    assert!(matches!(
        err,
        MniamError::Precondition(PreconditionError::InvalidLimit(0))
    ));
    assert_eq!(source.opens.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_each_limit_bounds_concurrency() {
    const LIMIT: usize = 7;
    let source = Batches::new(0..421, 33);
    let active = AtomicUsize::new(0);
    let peak = AtomicUsize::new(0);
    let seen = Mutex::new(HashSet::new());

    StreamConsumer::new(&source)
        .each_limit(LIMIT, |item| {
            let active = &active;
            let peak = &peak;
            let seen = &seen;
            async move {
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(1)).await;
                active.fetch_sub(1, Ordering::SeqCst);
                assert!(seen.lock().unwrap().insert(item));
                Ok::<_, BoxError>(())
            }
        })
        .await
        .unwrap();

    assert_eq!(peak.load(Ordering::SeqCst), LIMIT);
    assert_eq!(seen.lock().unwrap().len(), 421);
    assert_eq!(source.releases(), 1);
}

#[tokio::test]
async fn test_each_limit_finishes_batch_before_fetching_next() {
    const BATCH: u32 = 10;
    let source = Batches::new(0..40, BATCH as usize);
    let finished = AtomicUsize::new(0);
    let violated = AtomicBool::new(false);

    StreamConsumer::new(&source)
        .each_limit(3, |item| {
            let finished = &finished;
            let violated = &violated;
            async move {
                let batch_start = (item / BATCH * BATCH) as usize;
                if finished.load(Ordering::SeqCst) < batch_start {
                    violated.store(true, Ordering::SeqCst);
                }
                tokio::task::yield_now().await;
                finished.fetch_add(1, Ordering::SeqCst);
                Ok::<_, BoxError>(())
            }
        })
        .await
        .unwrap();

    assert!(!violated.load(Ordering::SeqCst));
    assert_eq!(finished.load(Ordering::SeqCst), 40);
}

#[tokio::test]
async fn test_each_limit_stops_dispatch_after_failure() {
    const LIMIT: usize = 4;
    let source = Batches::new(0..100, 100);
    let started = AtomicUsize::new(0);
    let finished = AtomicUsize::new(0);

    let err = StreamConsumer::new(&source)
        .each_limit(LIMIT, |item| {
            let started = &started;
            let finished = &finished;
            async move {
                started.fetch_add(1, Ordering::SeqCst);
                tokio::task::yield_now().await;
                if item == 5 {
                    return Err("item 5 rejected");
                }
                finished.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        })
        .await
        .unwrap_err();

    assert!(matches!(err, MniamError::Stream(StreamError::ItemFailed(_))));
    let started = started.load(Ordering::SeqCst);
    assert!(started <= 6 + LIMIT, "dispatched {started} items after failure");
    // Everything already dispatched ran to completion.
    assert_eq!(finished.load(Ordering::SeqCst), started - 1);
    assert_eq!(source.releases(), 1);
}

#[tokio::test]
async fn test_cancelled_before_start() {
    let source = Batches::new(1..=5, 5);
    let token = CancellationToken::new();
    token.cancel();

    let err = assert_err!(
        StreamConsumer::new(&source)
            .with_cancellation(token)
            .to_array()
            .await
    );
    assert!(err.is_cancelled());
    assert_eq!(source.releases(), 1);
}

#[tokio::test]
async fn test_cancel_mid_stream_under_each_series() {
    let source = Batches::new(1..=10, 4);
    let token = CancellationToken::new();
    let calls = AtomicUsize::new(0);

    let err = assert_err!(
        StreamConsumer::new(&source)
            .with_cancellation(token.clone())
            .each_series(|item| {
                calls.fetch_add(1, Ordering::SeqCst);
                if item == 3 {
                    token.cancel();
                }
                async { Ok::<_, BoxError>(()) }
            })
            .await
    );
    assert!(err.is_cancelled());
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(source.releases(), 1);
}

#[tokio::test]
async fn test_cancel_during_each_limit_drops_in_flight() {
    let source = Batches::new(0..50, 50);
    let token = CancellationToken::new();
    let finished = AtomicUsize::new(0);

    let consumer = StreamConsumer::new(&source).with_cancellation(token.clone());
    let run = consumer.each_limit(5, |_| {
        let finished = &finished;
        async move {
            tokio::time::sleep(Duration::from_secs(60)).await;
            finished.fetch_add(1, Ordering::SeqCst);
            Ok::<_, BoxError>(())
        }
    });
    let cancel = async {
        tokio::time::sleep(Duration::from_millis(10)).await;
        token.cancel();
    };

    let (outcome, ()) = tokio::join!(run, cancel);
    assert!(outcome.unwrap_err().is_cancelled());
    assert_eq!(finished.load(Ordering::SeqCst), 0);
    assert_eq!(source.releases(), 1);
}

/* ---------- sources backed by a reference-counted handle ---------- */

#[derive(Default)]
struct Counts {
    opens: AtomicUsize,
    closes: AtomicUsize,
}

struct SlowOpen(Arc<Counts>);

#[async_trait]
impl Lifecycle for SlowOpen {
    type Resource = ();

    fn name(&self) -> &str {
        "numbers"
    }

    async fn open(&self) -> Result<()> {
        self.0.opens.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(5)).await;
        Ok(())
    }

    fn close(&self, _resource: ()) {
        self.0.closes.fetch_add(1, Ordering::SeqCst);
    }
}

struct LeasedCursor {
    inner: MemoryCursor<u32>,
    lease: Option<Lease<SlowOpen>>,
}

#[async_trait]
impl BatchCursor for LeasedCursor {
    type Item = u32;

    async fn has_more(&mut self) -> Result<bool> {
        self.inner.has_more().await
    }

    fn read_buffered_batch(&mut self) -> Vec<u32> {
        self.inner.read_buffered_batch()
    }

    fn release(&mut self) {
        self.inner.release();
        self.lease = None;
    }
}

struct LeasedSource {
    handle: Arc<RefCountedHandle<SlowOpen>>,
}

#[async_trait]
impl CursorSource for LeasedSource {
    type Cursor = LeasedCursor;

    async fn open_cursor(&self) -> Result<LeasedCursor> {
        let lease = self.handle.lease().await?;
        Ok(LeasedCursor {
            inner: MemoryCursor::new(0..25, 10),
            lease: Some(lease),
        })
    }
}

#[tokio::test]
async fn test_concurrent_jobs_share_one_open_and_release_it() {
    let counts = Arc::new(Counts::default());
    let source = LeasedSource {
        handle: Arc::new(RefCountedHandle::new(SlowOpen(Arc::clone(&counts)))),
    };
    let consumer = StreamConsumer::new(&source);

    let (a, b) = tokio::join!(consumer.to_array(), consumer.to_array());
    assert_eq!(a.unwrap().len(), 25);
    assert_eq!(b.unwrap().len(), 25);

    assert_eq!(counts.opens.load(Ordering::SeqCst), 1);
    assert_eq!(counts.closes.load(Ordering::SeqCst), 1);
    assert_eq!(source.handle.holder_count(), 0);
}

#[tokio::test]
async fn test_failed_job_returns_its_lease() {
    let counts = Arc::new(Counts::default());
    let source = LeasedSource {
        handle: Arc::new(RefCountedHandle::new(SlowOpen(Arc::clone(&counts)))),
    };

    let err = StreamConsumer::new(&source)
        .each_series(|_| async { Err("nope") })
        .await
        .unwrap_err();
    assert!(matches!(err, MniamError::Stream(StreamError::ItemFailed(_))));
    assert_eq!(source.handle.holder_count(), 0);
    assert_eq!(counts.closes.load(Ordering::SeqCst), 1);
}
