//! In-memory batch cursor
//!
//! Serves pre-built batches, one per round trip. Useful wherever a
//! deterministic stream is needed: replaying cached results, or exercising
//! consumers without a server. A fetch failure can be injected at a given
//! round trip, and effective releases are counted.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;

use super::BatchCursor;
use crate::error::{MniamError, Result};

/// Batch cursor over in-memory batches.
#[derive(Debug)]
pub struct MemoryCursor<T> {
    batches: VecDeque<Vec<T>>,
    buffered: Vec<T>,
    round_trips: usize,
    fail_on: Option<usize>,
    released: bool,
    releases: Arc<AtomicUsize>,
}

impl<T: Send> MemoryCursor<T> {
    /// Split `items` into batches of `batch_size`.
    pub fn new(items: impl IntoIterator<Item = T>, batch_size: usize) -> Self {
        let batch_size = batch_size.max(1);
        let mut batches = Vec::new();
        let mut current = Vec::with_capacity(batch_size);
        for item in items {
            current.push(item);
            if current.len() == batch_size {
                batches.push(std::mem::replace(
                    &mut current,
                    Vec::with_capacity(batch_size),
                ));
            }
        }
        if !current.is_empty() {
            batches.push(current);
        }
        Self::from_batches(batches)
    }

    /// Serve exactly these batches, in order. Empty batches are kept.
    pub fn from_batches(batches: impl IntoIterator<Item = Vec<T>>) -> Self {
        Self {
            batches: batches.into_iter().collect(),
            buffered: Vec::new(),
            round_trips: 0,
            fail_on: None,
            released: false,
            releases: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Fail the `n`th round trip (1-based).
    pub fn fail_on_round_trip(mut self, n: usize) -> Self {
        self.fail_on = Some(n);
        self
    }

    /// Share the release counter with an observer.
    pub fn with_release_counter(mut self, counter: Arc<AtomicUsize>) -> Self {
        self.releases = counter;
        self
    }

    /// Counter of effective releases (zero or one).
    pub fn release_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.releases)
    }

    /// Round trips performed so far.
    pub fn round_trips(&self) -> usize {
        self.round_trips
    }
}

#[async_trait]
impl<T: Send> BatchCursor for MemoryCursor<T> {
    type Item = T;

    async fn has_more(&mut self) -> Result<bool> {
        if !self.buffered.is_empty() {
            return Ok(true);
        }
        if self.released {
            return Ok(false);
        }

        self.round_trips += 1;
        tokio::task::yield_now().await;
        if self.fail_on == Some(self.round_trips) {
            return Err(MniamError::Generic(format!(
                "simulated failure on round trip {}",
                self.round_trips
            )));
        }

        match self.batches.pop_front() {
            Some(batch) => {
                self.buffered = batch;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn read_buffered_batch(&mut self) -> Vec<T> {
        std::mem::take(&mut self.buffered)
    }

    fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        self.batches.clear();
        self.buffered.clear();
        self.releases.fetch_add(1, Ordering::SeqCst);
    }
}
