//! Consumption job bookkeeping
//!
//! A job owns exactly one cursor. Releasing it happens in `Drop`, so every
//! exit path (completion, error, cancellation, early return, panic) closes
//! the cursor once.

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};
use uuid::Uuid;

use crate::cursor::BatchCursor;
use crate::error::{MniamError, Result, StreamError};

/// Lifecycle of a consumption job.
///
/// `Created → AcquiringCursor → Draining → {Completed | Failed} → Released`.
/// `Released` is terminal and reachable from every other state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Created,
    AcquiringCursor,
    Draining,
    Completed,
    Failed,
    Released,
}

pub(super) struct ConsumptionJob<C: BatchCursor> {
    id: Uuid,
    strategy: &'static str,
    state: JobState,
    cursor: Option<C>,
    batches: u64,
    items: u64,
}

impl<C: BatchCursor> ConsumptionJob<C> {
    pub(super) fn created(strategy: &'static str) -> Self {
        let job = Self {
            id: Uuid::new_v4(),
            strategy,
            state: JobState::Created,
            cursor: None,
            batches: 0,
            items: 0,
        };
        trace!("[{}] {} job created", job.id, strategy);
        job
    }

    pub(super) fn transition(&mut self, state: JobState) {
        trace!("[{}] {:?} -> {:?}", self.id, self.state, state);
        self.state = state;
    }

    pub(super) fn draining(mut self, cursor: C) -> Self {
        self.cursor = Some(cursor);
        self.transition(JobState::Draining);
        self
    }

    /// Fetch the next buffered batch.
    ///
    /// Returns `None` once the cursor reports no more data. A batch may be
    /// empty when the cursor had nothing buffered after a round trip.
    pub(super) async fn next_batch(
        &mut self,
        cancel_token: &CancellationToken,
    ) -> Result<Option<Vec<C::Item>>> {
        if cancel_token.is_cancelled() {
            return Err(self.fail(StreamError::Cancelled.into()));
        }
        let Some(cursor) = self.cursor.as_mut() else {
            return Ok(None);
        };

        let fetched = tokio::select! {
            biased;
            _ = cancel_token.cancelled() => None,
            more = cursor.has_more() => Some(more),
        };

        match fetched {
            None => Err(self.fail(StreamError::Cancelled.into())),
            Some(Err(e)) => Err(self.fail(MniamError::stream_read(e))),
            Some(Ok(false)) => Ok(None),
            Some(Ok(true)) => {
                let batch = cursor.read_buffered_batch();
                self.batches += 1;
                trace!("[{}] batch {} with {} items", self.id, self.batches, batch.len());
                Ok(Some(batch))
            }
        }
    }

    pub(super) fn record(&mut self, items: usize) {
        self.items += items as u64;
    }

    pub(super) fn complete(&mut self) {
        self.transition(JobState::Completed);
        debug!(
            "[{}] {} completed: {} items in {} batches",
            self.id, self.strategy, self.items, self.batches
        );
    }

    pub(super) fn fail(&mut self, err: MniamError) -> MniamError {
        self.transition(JobState::Failed);
        debug!(
            "[{}] {} failed after {} items: {}",
            self.id, self.strategy, self.items, err
        );
        err
    }
}

impl<C: BatchCursor> Drop for ConsumptionJob<C> {
    fn drop(&mut self) {
        if let Some(mut cursor) = self.cursor.take() {
            cursor.release();
        }
        if self.state == JobState::Draining {
            info!("[{}] {} abandoned while draining", self.id, self.strategy);
        }
        self.transition(JobState::Released);
    }
}
