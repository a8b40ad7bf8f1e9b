//! Find query builder

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use mongodb::bson::{Bson, Document};
use mongodb::options::FindOptions;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

use super::CollectionLifecycle;
use crate::consumer::{CursorSource, StreamConsumer};
use crate::cursor::MongoBatchCursor;
use crate::error::{BoxError, PreconditionError, Result};
use crate::lifecycle::RefCountedHandle;

/// Find query on a collection.
///
/// Nothing is sent until a consumption method runs. Every consumption opens
/// its own server cursor, so a query can be consumed more than once.
pub struct Query {
    handle: Arc<RefCountedHandle<CollectionLifecycle>>,
    filter: Document,
    options: FindOptions,
    batch_size: u32,
    cancel_token: CancellationToken,
}

impl Query {
    pub(super) fn new(
        handle: Arc<RefCountedHandle<CollectionLifecycle>>,
        filter: Document,
        batch_size: u32,
    ) -> Self {
        Self {
            handle,
            filter,
            options: FindOptions::default(),
            batch_size,
            cancel_token: CancellationToken::new(),
        }
    }

    /// Fields to return
    pub fn fields(mut self, projection: Document) -> Self {
        self.options.projection = Some(projection);
        self
    }

    /// Replace the driver options wholesale
    ///
    /// Batch size and comment are still set per cursor.
    pub fn options(mut self, options: FindOptions) -> Self {
        self.options = options;
        self
    }

    pub fn sort(mut self, sort: Document) -> Self {
        self.options.sort = Some(sort);
        self
    }

    pub fn limit(mut self, limit: i64) -> Self {
        self.options.limit = Some(limit);
        self
    }

    pub fn skip(mut self, skip: u64) -> Self {
        self.options.skip = Some(skip);
        self
    }

    /// Documents per round trip, at least 1
    pub fn batch_size(mut self, batch_size: u32) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Cancel consumption when `token` fires
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel_token = token;
        self
    }

    /// Read all matching documents, in order
    pub async fn to_array(&self) -> Result<Vec<Document>> {
        self.consumer().to_array().await
    }

    /// Visit matching documents one at a time, in order
    pub async fn each_series<F, Fut, E>(&self, on_item: F) -> Result<()>
    where
        F: FnMut(Document) -> Fut,
        Fut: Future<Output = std::result::Result<(), E>>,
        E: Into<BoxError>,
    {
        self.consumer().each_series(on_item).await
    }

    /// Visit matching documents with at most `limit` callbacks in flight
    pub async fn each_limit<F, Fut, E>(&self, limit: usize, on_item: F) -> Result<()>
    where
        F: FnMut(Document) -> Fut,
        Fut: Future<Output = std::result::Result<(), E>>,
        E: Into<BoxError>,
    {
        self.consumer().each_limit(limit, on_item).await
    }

    fn consumer(&self) -> StreamConsumer<'_, Self> {
        StreamConsumer::new(self).with_cancellation(self.cancel_token.clone())
    }

    fn cursor_options(&self) -> Result<FindOptions> {
        if self.batch_size == 0 {
            return Err(PreconditionError::InvalidBatchSize(self.batch_size).into());
        }
        let mut options = self.options.clone();
        options.batch_size = Some(self.batch_size);
        options.comment = Some(Bson::String(format!("mniam-{}", Uuid::new_v4())));
        Ok(options)
    }
}

#[async_trait]
impl CursorSource for Query {
    type Cursor = MongoBatchCursor<CollectionLifecycle>;

    async fn open_cursor(&self) -> Result<Self::Cursor> {
        let options = self.cursor_options()?;
        let collection = self.handle.lease().await?;
        debug!(
            "Opening find cursor on '{}' with filter: {:?}",
            collection.name(),
            self.filter
        );

        let cursor = collection
            .find(self.filter.clone())
            .with_options(options)
            .await?;
        Ok(MongoBatchCursor::new(cursor, self.batch_size, "Find", collection))
    }
}

#[cfg(test)]
mod tests {
    use mongodb::bson::doc;

    use crate::collection::CollectionSpec;
    use crate::config::Config;
    use crate::database::Database;

    fn query() -> super::Query {
        Database::new("mongodb://localhost:27017/test", &Config::default())
            .collection(CollectionSpec::new("items"))
            .query(doc! { "active": true })
    }

    #[test]
    fn test_builder_sets_find_options() {
        let query = query()
            .fields(doc! { "sku": 1 })
            .sort(doc! { "_id": -1 })
            .limit(5)
            .skip(10)
            .batch_size(2);
        let options = query.cursor_options().unwrap();
        assert_eq!(options.projection, Some(doc! { "sku": 1 }));
        assert_eq!(options.sort, Some(doc! { "_id": -1 }));
        assert_eq!(options.limit, Some(5));
        assert_eq!(options.skip, Some(10));
        assert_eq!(options.batch_size, Some(2));
    }

    #[test]
    fn test_each_cursor_gets_its_own_comment() {
        let query = query();
        let first = query.cursor_options().unwrap().comment;
        let second = query.cursor_options().unwrap().comment;

        let Some(mongodb::bson::Bson::String(first)) = first else {
            panic!("comment missing");
        };
        assert!(first.starts_with("mniam-"));
        assert_ne!(Some(mongodb::bson::Bson::String(first)), second);
    }

    #[test]
    fn test_replacing_options_keeps_batch_size() {
        let mut options = mongodb::options::FindOptions::default();
        options.batch_size = Some(1000);
        options.limit = Some(3);
        let options = query().options(options).batch_size(9).cursor_options().unwrap();
        assert_eq!(options.batch_size, Some(9));
        assert_eq!(options.limit, Some(3));
    }
}
