//! Batch-buffered cursors
//!
//! A [`BatchCursor`] is a remote, paginated result stream. Consumers ask
//! whether more data exists (which may cost a round trip), then take whatever
//! that round trip left in local memory. Two implementations are provided:
//! - [`MongoBatchCursor`]: wraps a driver cursor from `find` or `aggregate`
//! - [`MemoryCursor`]: deterministic in-memory batches

use async_trait::async_trait;

use crate::error::Result;

mod memory;
mod mongo;

pub use memory::MemoryCursor;
pub use mongo::MongoBatchCursor;

/// Paginated result stream with an explicit local buffer.
#[async_trait]
pub trait BatchCursor: Send {
    /// Item type produced by the stream
    type Item: Send;

    /// Suspend until the store reports whether more data exists.
    ///
    /// May trigger a network round trip that refills the local buffer.
    async fn has_more(&mut self) -> Result<bool>;

    /// Take the items already buffered in local memory, without a round trip.
    ///
    /// May be empty even when [`has_more`](Self::has_more) returned `true`;
    /// callers then ask `has_more` again.
    fn read_buffered_batch(&mut self) -> Vec<Self::Item>;

    /// Close the cursor. Idempotent: only the first call has effect.
    fn release(&mut self);
}
