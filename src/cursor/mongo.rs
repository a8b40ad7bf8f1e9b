//! Driver-backed batch cursor
//!
//! Wraps a `mongodb::Cursor` produced by `find` or `aggregate`. Each
//! `has_more` call pulls up to `batch_size` documents into the local buffer,
//! which with a matching server-side batch size is one `getMore` round trip.

use async_trait::async_trait;
use futures::TryStreamExt;
use mongodb::Cursor;
use mongodb::bson::Document;
use tracing::{debug, info};

use super::BatchCursor;
use crate::error::Result;
use crate::lifecycle::{Lease, Lifecycle};

/// Batch cursor over a MongoDB cursor.
///
/// Holds a [`Lease`] on the handle the cursor was opened from, so the
/// collection stays open until the cursor is released.
pub struct MongoBatchCursor<L: Lifecycle> {
    cursor: Option<Cursor<Document>>,
    lease: Option<Lease<L>>,
    buffer: Vec<Document>,
    batch_size: u32,
    total_fetched: u64,
    query_type: &'static str,
    exhausted: bool,
}

impl<L: Lifecycle> MongoBatchCursor<L> {
    /// Create a new batch cursor
    ///
    /// # Arguments
    /// * `cursor` - MongoDB cursor from a find or aggregate operation
    /// * `batch_size` - Number of documents to buffer per round trip
    /// * `query_type` - Type of query for logging ("Find" or "Aggregate")
    /// * `lease` - Reference on the source collection, dropped on release
    pub fn new(
        cursor: Cursor<Document>,
        batch_size: u32,
        query_type: &'static str,
        lease: Lease<L>,
    ) -> Self {
        Self {
            cursor: Some(cursor),
            lease: Some(lease),
            buffer: Vec::new(),
            batch_size: batch_size.max(1),
            total_fetched: 0,
            query_type,
            exhausted: false,
        }
    }
}

#[async_trait]
impl<L: Lifecycle> BatchCursor for MongoBatchCursor<L> {
    type Item = Document;

    async fn has_more(&mut self) -> Result<bool> {
        if !self.buffer.is_empty() {
            return Ok(true);
        }
        if self.exhausted {
            return Ok(false);
        }
        let Some(cursor) = self.cursor.as_mut() else {
            return Ok(false);
        };

        for _ in 0..self.batch_size {
            match cursor.try_next().await? {
                Some(doc) => self.buffer.push(doc),
                None => {
                    self.exhausted = true;
                    break;
                }
            }
        }

        if self.buffer.is_empty() {
            debug!(
                "{} cursor exhausted after {} documents",
                self.query_type, self.total_fetched
            );
            return Ok(false);
        }

        self.total_fetched += self.buffer.len() as u64;
        debug!(
            "Buffered {} documents (total: {})",
            self.buffer.len(),
            self.total_fetched
        );
        Ok(true)
    }

    fn read_buffered_batch(&mut self) -> Vec<Document> {
        std::mem::take(&mut self.buffer)
    }

    fn release(&mut self) {
        if self.cursor.is_none() && self.lease.is_none() {
            return;
        }
        // Dropping the driver cursor kills it server-side if it is still open.
        self.cursor = None;
        self.buffer.clear();
        self.lease = None;
        info!(
            "Closed {} cursor after fetching {} documents",
            self.query_type, self.total_fetched
        );
    }
}

impl<L: Lifecycle> Drop for MongoBatchCursor<L> {
    fn drop(&mut self) {
        if self.cursor.is_some() {
            debug!("{} cursor dropped without explicit release", self.query_type);
            self.release();
        }
    }
}
