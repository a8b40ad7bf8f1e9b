//! Aggregation pipeline builder

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use mongodb::bson::{Bson, Document};
use mongodb::options::AggregateOptions;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

use super::CollectionLifecycle;
use crate::consumer::{CursorSource, StreamConsumer};
use crate::cursor::MongoBatchCursor;
use crate::error::{BoxError, PreconditionError, Result};
use crate::lifecycle::RefCountedHandle;

/// Aggregation on a collection.
///
/// Stages can be given up front or appended with the stage helpers:
///
/// ```no_run
/// # use mniam::bson::doc;
/// # async fn demo(orders: mniam::Collection) -> mniam::Result<()> {
/// let totals = orders
///     .aggregate(vec![])
///     .r#match(doc! { "status": "paid" })
///     .group(doc! { "_id": "$customer", "total": { "$sum": "$amount" } })
///     .sort(doc! { "total": -1 })
///     .to_array()
///     .await?;
/// # Ok(())
/// # }
/// ```
pub struct Aggregate {
    handle: Arc<RefCountedHandle<CollectionLifecycle>>,
    pipeline: Vec<Document>,
    options: AggregateOptions,
    batch_size: u32,
    cancel_token: CancellationToken,
}

impl Aggregate {
    pub(super) fn new(
        handle: Arc<RefCountedHandle<CollectionLifecycle>>,
        pipeline: Vec<Document>,
        batch_size: u32,
    ) -> Self {
        Self {
            handle,
            pipeline,
            options: AggregateOptions::default(),
            batch_size,
            cancel_token: CancellationToken::new(),
        }
    }

    /// Append raw stages
    pub fn pipeline(mut self, stages: impl IntoIterator<Item = Document>) -> Self {
        self.pipeline.extend(stages);
        self
    }

    /// Append `{ "$<name>": spec }`
    pub fn stage(mut self, name: &str, spec: impl Into<Bson>) -> Self {
        let mut stage = Document::new();
        stage.insert(format!("${name}"), spec.into());
        self.pipeline.push(stage);
        self
    }

    /// Replace the driver options wholesale
    ///
    /// Batch size and comment are still set per cursor.
    pub fn options(mut self, options: AggregateOptions) -> Self {
        self.options = options;
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

    /// Stages accumulated so far
    pub fn stages(&self) -> &[Document] {
        &self.pipeline
    }

    /// Read all results, in order
    pub async fn to_array(&self) -> Result<Vec<Document>> {
        self.consumer().to_array().await
    }

    /// Visit results one at a time, in order
    pub async fn each_series<F, Fut, E>(&self, on_item: F) -> Result<()>
    where
        F: FnMut(Document) -> Fut,
        Fut: Future<Output = std::result::Result<(), E>>,
        E: Into<BoxError>,
    {
        self.consumer().each_series(on_item).await
    }

    /// Visit results with at most `limit` callbacks in flight
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

    fn cursor_options(&self) -> Result<AggregateOptions> {
        if self.batch_size == 0 {
            return Err(PreconditionError::InvalidBatchSize(self.batch_size).into());
        }
        let mut options = self.options.clone();
        options.batch_size = Some(self.batch_size);
        options.comment = Some(Bson::String(format!("mniam-{}", Uuid::new_v4())));
        Ok(options)
    }
}

macro_rules! stage_helpers {
    ($($method:ident => $stage:literal),* $(,)?) => {
        impl Aggregate {
            $(
                #[doc = concat!("Append a `$", $stage, "` stage")]
                pub fn $method(self, spec: impl Into<Bson>) -> Self {
                    self.stage($stage, spec)
                }
            )*
        }
    };
}

stage_helpers! {
    add_fields => "addFields",
    bucket => "bucket",
    bucket_auto => "bucketAuto",
    coll_stats => "collStats",
    count => "count",
    facet => "facet",
    geo_near => "geoNear",
    graph_lookup => "graphLookup",
    group => "group",
    index_stats => "indexStats",
    limit => "limit",
    lookup => "lookup",
    r#match => "match",
    out => "out",
    project => "project",
    redact => "redact",
    replace_root => "replaceRoot",
    sample => "sample",
    skip => "skip",
    sort => "sort",
    sort_by_count => "sortByCount",
    unwind => "unwind",
}

#[async_trait]
impl CursorSource for Aggregate {
    type Cursor = MongoBatchCursor<CollectionLifecycle>;

    async fn open_cursor(&self) -> Result<Self::Cursor> {
        let options = self.cursor_options()?;
        let collection = self.handle.lease().await?;
        debug!(
            "Opening aggregate cursor on '{}' with {} stages",
            collection.name(),
            self.pipeline.len()
        );

        let cursor = collection
            .aggregate(self.pipeline.clone())
            .with_options(options)
            .await?;
        Ok(MongoBatchCursor::new(cursor, self.batch_size, "Aggregate", collection))
    }
}
