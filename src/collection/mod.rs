//! Collections with their own lifecycle
//!
//! A [`Collection`] opens on first use: it takes a reference on its
//! database, then ensures the declared indexes. It holds that database
//! reference until the last user of the collection closes it.
//!
//! Every operation below leases the collection for its own duration. Call
//! [`Collection::open`] to keep it (and the database) open between calls.

use std::future::{Future, IntoFuture};
use std::sync::Arc;

use async_trait::async_trait;
use futures::TryStreamExt;
use futures::future::try_join_all;
use mongodb::IndexModel;
use mongodb::bson::{Document, doc};
use mongodb::options::{
    BulkWriteOptions, CollectionOptions, FindOneAndDeleteOptions, FindOneAndReplaceOptions,
    FindOneAndUpdateOptions, ReplaceOptions, ReturnDocument, UpdateOptions, WriteConcern,
};
use mongodb::results::{DeleteResult, InsertManyResult, UpdateResult};
use tracing::{debug, info, warn};

use crate::database::DatabaseLifecycle;
use crate::error::{BoxError, Result};
use crate::lifecycle::{Lease, Lifecycle, RefCountedHandle};

mod aggregate;
mod query;
mod write;

pub use aggregate::Aggregate;
pub use query::Query;
pub use write::{BulkOperation, BulkWriteSummary};

/// Declaration of a collection: name, indexes, default batch size, write concern.
#[derive(Debug, Clone)]
pub struct CollectionSpec {
    pub name: String,
    pub indexes: Vec<IndexModel>,
    pub batch_size: Option<u32>,
    pub write_concern: Option<WriteConcern>,
}

impl CollectionSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            indexes: Vec::new(),
            batch_size: None,
            write_concern: None,
        }
    }

    /// Declare an index ensured when the collection opens
    pub fn index(mut self, keys: Document) -> Self {
        self.indexes.push(IndexModel::builder().keys(keys).build());
        self
    }

    /// Declare an index with full options
    pub fn index_model(mut self, model: IndexModel) -> Self {
        self.indexes.push(model);
        self
    }

    /// Default batch size for queries on this collection
    pub fn batch_size(mut self, batch_size: u32) -> Self {
        self.batch_size = Some(batch_size);
        self
    }

    /// Write concern applied to every write on this collection
    pub fn write_concern(mut self, write_concern: WriteConcern) -> Self {
        self.write_concern = Some(write_concern);
        self
    }
}

/// Opens a collection on top of a database reference.
pub struct CollectionLifecycle {
    name: String,
    indexes: Vec<IndexModel>,
    write_concern: Option<WriteConcern>,
    database: Arc<RefCountedHandle<DatabaseLifecycle>>,
}

#[async_trait]
impl Lifecycle for CollectionLifecycle {
    type Resource = mongodb::Collection<Document>;

    fn name(&self) -> &str {
        &self.name
    }

    async fn open(&self) -> Result<Self::Resource> {
        let database = self.database.lease().await?;
        let options = CollectionOptions::builder()
            .write_concern(self.write_concern.clone())
            .build();
        let collection = database
            .database()
            .collection_with_options::<Document>(&self.name, options);

        if !self.indexes.is_empty() {
            debug!("Ensuring {} indexes on '{}'", self.indexes.len(), self.name);
            try_join_all(
                self.indexes
                    .iter()
                    .cloned()
                    .map(|index| collection.create_index(index).into_future()),
            )
            .await?;
        }

        // The database reference is returned in `close`.
        database.detach();
        info!("Opened collection '{}'", self.name);
        Ok(collection)
    }

    fn close(&self, _collection: Self::Resource) {
        debug!("Closing collection '{}'", self.name);
        if let Err(e) = self.database.release() {
            warn!("Failed to release database for '{}': {}", self.name, e);
        }
    }
}

/// Shared handle on one collection.
///
/// Cloning is cheap; clones share the same reference count.
#[derive(Clone)]
pub struct Collection {
    name: String,
    handle: Arc<RefCountedHandle<CollectionLifecycle>>,
    batch_size: u32,
}

impl Collection {
    pub(crate) fn new(
        spec: CollectionSpec,
        database: Arc<RefCountedHandle<DatabaseLifecycle>>,
        default_batch_size: u32,
    ) -> Self {
        let lifecycle = CollectionLifecycle {
            name: spec.name.clone(),
            indexes: spec.indexes,
            write_concern: spec.write_concern,
            database,
        };
        Self {
            name: spec.name,
            handle: Arc::new(RefCountedHandle::new(lifecycle)),
            batch_size: spec.batch_size.unwrap_or(default_batch_size),
        }
    }

    /// Collection name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the collection is currently open
    pub fn is_open(&self) -> bool {
        self.handle.is_open()
    }

    /// References currently held on the collection
    pub fn holder_count(&self) -> usize {
        self.handle.holder_count()
    }

    /// Take a reference, opening the collection if needed
    ///
    /// Must be balanced by [`close`](Self::close).
    pub async fn open(&self) -> Result<mongodb::Collection<Document>> {
        self.handle.acquire().await
    }

    /// Drop a reference taken by [`open`](Self::open)
    pub fn close(&self) -> Result<()> {
        self.handle.release()
    }

    /// Start a find query
    pub fn query(&self, filter: Document) -> Query {
        Query::new(Arc::clone(&self.handle), filter, self.batch_size)
    }

    /// Start an aggregation
    pub fn aggregate(&self, pipeline: Vec<Document>) -> Aggregate {
        Aggregate::new(Arc::clone(&self.handle), pipeline, self.batch_size)
    }

    /// All documents matching `filter`
    ///
    /// # Arguments
    /// * `filter` - Query filter
    /// * `projection` - Optional field selection
    pub async fn find(
        &self,
        filter: Document,
        projection: Option<Document>,
    ) -> Result<Vec<Document>> {
        let mut query = self.query(filter);
        if let Some(projection) = projection {
            query = query.fields(projection);
        }
        query.to_array().await
    }

    /// Visit every matching document in order, one at a time
    pub async fn for_each<F, Fut, E>(&self, filter: Document, on_item: F) -> Result<()>
    where
        F: FnMut(Document) -> Fut,
        Fut: Future<Output = std::result::Result<(), E>>,
        E: Into<BoxError>,
    {
        self.query(filter).each_series(on_item).await
    }

    /// Visit every matching document with at most `limit` callbacks in flight
    pub async fn each_limit<F, Fut, E>(
        &self,
        filter: Document,
        limit: usize,
        on_item: F,
    ) -> Result<()>
    where
        F: FnMut(Document) -> Fut,
        Fut: Future<Output = std::result::Result<(), E>>,
        E: Into<BoxError>,
    {
        self.query(filter).each_limit(limit, on_item).await
    }

    /// First document matching `filter`, if any
    pub async fn find_one(&self, filter: Document) -> Result<Option<Document>> {
        let collection = self.lease().await?;
        Ok(collection.find_one(filter).await?)
    }

    /// Update the first matching document and return it
    ///
    /// Unless `options` says otherwise, the document is returned after the
    /// update and matches are ordered by ascending `_id`.
    pub async fn find_one_and_update(
        &self,
        filter: Document,
        update: Document,
        options: Option<FindOneAndUpdateOptions>,
    ) -> Result<Option<Document>> {
        let mut options = options.unwrap_or_default();
        options.return_document.get_or_insert(ReturnDocument::After);
        options.sort.get_or_insert_with(|| doc! { "_id": 1 });

        let collection = self.lease().await?;
        let document = collection
            .find_one_and_update(filter, update)
            .with_options(options)
            .await?;
        debug!(
            "findOneAndUpdate on '{}' {}",
            self.name,
            if document.is_some() { "matched" } else { "matched nothing" }
        );
        Ok(document)
    }

    /// Replace the first matching document and return it
    ///
    /// The driver default applies: the document is returned as it was before
    /// the replacement unless `options` asks for the new one.
    pub async fn find_one_and_replace(
        &self,
        filter: Document,
        replacement: Document,
        options: Option<FindOneAndReplaceOptions>,
    ) -> Result<Option<Document>> {
        let collection = self.lease().await?;
        Ok(collection
            .find_one_and_replace(filter, replacement)
            .with_options(options)
            .await?)
    }

    /// Delete the first matching document and return it
    pub async fn find_one_and_delete(
        &self,
        filter: Document,
        options: Option<FindOneAndDeleteOptions>,
    ) -> Result<Option<Document>> {
        let collection = self.lease().await?;
        Ok(collection
            .find_one_and_delete(filter)
            .with_options(options)
            .await?)
    }

    /// Insert a document and return it as stored, including `_id`
    pub async fn insert_one(&self, mut document: Document) -> Result<Document> {
        let collection = self.lease().await?;
        let result = collection.insert_one(&document).await?;
        if !document.contains_key("_id") {
            document.insert("_id", result.inserted_id);
        }
        Ok(document)
    }

    /// Insert several documents
    pub async fn insert_many(&self, documents: Vec<Document>) -> Result<InsertManyResult> {
        let collection = self.lease().await?;
        Ok(collection.insert_many(documents).await?)
    }

    /// Update the first matching document
    pub async fn update_one(
        &self,
        filter: Document,
        update: Document,
        options: Option<UpdateOptions>,
    ) -> Result<UpdateResult> {
        let collection = self.lease().await?;
        Ok(collection
            .update_one(filter, update)
            .with_options(options)
            .await?)
    }

    /// Update every matching document
    pub async fn update_many(
        &self,
        filter: Document,
        update: Document,
        options: Option<UpdateOptions>,
    ) -> Result<UpdateResult> {
        let collection = self.lease().await?;
        Ok(collection
            .update_many(filter, update)
            .with_options(options)
            .await?)
    }

    /// Replace the first matching document
    pub async fn replace_one(
        &self,
        filter: Document,
        replacement: Document,
        options: Option<ReplaceOptions>,
    ) -> Result<UpdateResult> {
        let collection = self.lease().await?;
        Ok(collection
            .replace_one(filter, replacement)
            .with_options(options)
            .await?)
    }

    /// Run several writes against this collection in one batch
    ///
    /// An empty batch returns zero counts without opening the collection.
    /// Uses the collection's write concern unless `options` sets one.
    pub async fn bulk_write(
        &self,
        operations: Vec<BulkOperation>,
        options: Option<BulkWriteOptions>,
    ) -> Result<BulkWriteSummary> {
        if operations.is_empty() {
            return Ok(BulkWriteSummary::default());
        }

        let collection = self.lease().await?;
        let mut options = options.unwrap_or_default();
        if options.write_concern.is_none() {
            options.write_concern = collection.write_concern().cloned();
        }

        let namespace = collection.namespace();
        let models: Vec<_> = operations
            .into_iter()
            .map(|operation| operation.into_model(namespace.clone()))
            .collect();
        debug!("bulkWrite of {} operations on '{}'", models.len(), self.name);

        let result = collection
            .client()
            .bulk_write(models)
            .with_options(options)
            .await?;
        Ok(result.into())
    }

    /// Delete the first matching document
    pub async fn delete_one(&self, filter: Document) -> Result<DeleteResult> {
        let collection = self.lease().await?;
        Ok(collection.delete_one(filter).await?)
    }

    /// Delete every matching document
    pub async fn delete_many(&self, filter: Document) -> Result<DeleteResult> {
        let collection = self.lease().await?;
        Ok(collection.delete_many(filter).await?)
    }

    /// Drop the collection
    pub async fn drop(&self) -> Result<()> {
        let collection = self.lease().await?;
        info!("Dropping collection '{}'", self.name);
        (*collection).drop().await?;
        Ok(())
    }

    /// Indexes currently defined on the collection
    pub async fn index_information(&self) -> Result<Vec<IndexModel>> {
        let collection = self.lease().await?;
        let indexes = collection.list_indexes().await?.try_collect().await?;
        Ok(indexes)
    }

    async fn lease(&self) -> Result<Lease<CollectionLifecycle>> {
        self.handle.lease().await
    }
}

#[cfg(test)]
mod tests;
