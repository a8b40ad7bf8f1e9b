//! Stream consumption strategies
//!
//! A [`StreamConsumer`] drains the cursor produced by a [`CursorSource`]
//! using one of three strategies:
//! - [`to_array`](StreamConsumer::to_array): materialize everything, in order
//! - [`each_series`](StreamConsumer::each_series): one callback at a time, in order
//! - [`each_limit`](StreamConsumer::each_limit): up to `limit` callbacks at once,
//!   one buffered batch at a time
//!
//! Each invocation is a consumption job that owns its cursor and releases it
//! exactly once, whichever way the job ends.

use std::future::Future;

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::FuturesUnordered;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::cursor::BatchCursor;
use crate::error::{BoxError, MniamError, PreconditionError, Result, StreamError};

mod job;

use job::ConsumptionJob;
pub use job::JobState;

/// Something that can open a fresh cursor per consumption job.
#[async_trait]
pub trait CursorSource: Send + Sync {
    /// Cursor type handed to the consumer
    type Cursor: BatchCursor;

    /// Open a new cursor, resolving any shared handle it depends on.
    async fn open_cursor(&self) -> Result<Self::Cursor>;
}

/// Item type produced by a source's cursor.
pub type ItemOf<S> = <<S as CursorSource>::Cursor as BatchCursor>::Item;

/// Runs consumption strategies against a [`CursorSource`].
pub struct StreamConsumer<'a, S> {
    source: &'a S,
    cancel_token: CancellationToken,
}

impl<'a, S: CursorSource> StreamConsumer<'a, S> {
    /// Create a consumer for `source`.
    pub fn new(source: &'a S) -> Self {
        Self {
            source,
            cancel_token: CancellationToken::new(),
        }
    }

    /// Set cancellation token for this consumer
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel_token = token;
        self
    }

    /// Read the whole stream into memory, preserving order.
    ///
    /// # Returns
    /// * `Result<Vec<Item>>` - All items, or `StreamError::ReadFailed` (partial results discarded)
    pub async fn to_array(&self) -> Result<Vec<ItemOf<S>>> {
        let mut job = self.start("toArray").await?;
        let mut items = Vec::new();

        while let Some(batch) = job.next_batch(&self.cancel_token).await? {
            job.record(batch.len());
            items.extend(batch);
        }

        job.complete();
        Ok(items)
    }

    /// Process items one at a time in delivery order.
    ///
    /// The next item is not visited until the callback for the current one
    /// completes. The first callback error stops the job.
    ///
    /// # Arguments
    /// * `on_item` - Async callback invoked once per item
    ///
    /// # Returns
    /// * `Result<()>` - `StreamError::ItemFailed` wraps the first callback error
    pub async fn each_series<F, Fut, E>(&self, mut on_item: F) -> Result<()>
    where
        F: FnMut(ItemOf<S>) -> Fut,
        Fut: Future<Output = std::result::Result<(), E>>,
        E: Into<BoxError>,
    {
        let mut job = self.start("eachSeries").await?;

        while let Some(batch) = job.next_batch(&self.cancel_token).await? {
            for item in batch {
                if self.cancel_token.is_cancelled() {
                    return Err(job.fail(StreamError::Cancelled.into()));
                }
                if let Err(e) = on_item(item).await {
                    return Err(job.fail(MniamError::item_failed(e)));
                }
                job.record(1);
            }
        }

        job.complete();
        Ok(())
    }

    /// Process items with at most `limit` callbacks running concurrently.
    ///
    /// Each buffered batch is fully processed before the next one is fetched,
    /// so batch order is preserved but order within a batch is not. After the
    /// first callback error no new item is dispatched; callbacks already
    /// running are allowed to finish and their results are discarded.
    ///
    /// # Arguments
    /// * `limit` - Maximum concurrent callbacks, at least 1
    /// * `on_item` - Async callback invoked once per item
    ///
    /// # Returns
    /// * `Result<()>` - `PreconditionError::InvalidLimit` if `limit` is 0, or the first failure
    pub async fn each_limit<F, Fut, E>(&self, limit: usize, mut on_item: F) -> Result<()>
    where
        F: FnMut(ItemOf<S>) -> Fut,
        Fut: Future<Output = std::result::Result<(), E>>,
        E: Into<BoxError>,
    {
        if limit == 0 {
            return Err(PreconditionError::InvalidLimit(limit).into());
        }

        let mut job = self.start("eachLimit").await?;

        while let Some(batch) = job.next_batch(&self.cancel_token).await? {
            let len = batch.len();
            debug!("Dispatching {} buffered items with limit {}", len, limit);
            if let Err(e) = self.dispatch(batch, limit, &mut on_item).await {
                return Err(job.fail(e));
            }
            job.record(len);
        }

        job.complete();
        Ok(())
    }

    /// Run one batch through a pool of `limit` concurrent callbacks.
    async fn dispatch<F, Fut, E>(
        &self,
        batch: Vec<ItemOf<S>>,
        limit: usize,
        on_item: &mut F,
    ) -> Result<()>
    where
        F: FnMut(ItemOf<S>) -> Fut,
        Fut: Future<Output = std::result::Result<(), E>>,
        E: Into<BoxError>,
    {
        let mut pending = batch.into_iter();
        let mut in_flight = FuturesUnordered::new();
        let mut failure: Option<MniamError> = None;

        loop {
            if failure.is_none() {
                while in_flight.len() < limit {
                    let Some(item) = pending.next() else { break };
                    in_flight.push(on_item(item));
                }
            }

            let outcome = tokio::select! {
                biased;
                _ = self.cancel_token.cancelled() => {
                    // In-flight callbacks are dropped here.
                    return Err(StreamError::Cancelled.into());
                }
                outcome = in_flight.next() => outcome,
            };

            match outcome {
                Some(Ok(())) => {}
                Some(Err(e)) => {
                    if failure.is_none() {
                        let e = MniamError::item_failed(e);
                        debug!(
                            "Item failed, draining {} in-flight items: {}",
                            in_flight.len(),
                            e
                        );
                        failure = Some(e);
                    }
                }
                None => break,
            }
        }

        match failure {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    async fn start(&self, strategy: &'static str) -> Result<ConsumptionJob<S::Cursor>> {
        let mut job = ConsumptionJob::created(strategy);
        job.transition(JobState::AcquiringCursor);
        let cursor = match self.source.open_cursor().await {
            Ok(cursor) => cursor,
            Err(e) => return Err(job.fail(e)),
        };
        Ok(job.draining(cursor))
    }
}

#[cfg(test)]
mod tests;
