//! Bulk writes
//!
//! A [`BulkOperation`] names one write against the collection it is sent
//! through; the namespace is filled in when the batch is submitted.

use mongodb::Namespace;
use mongodb::bson::Document;
use mongodb::options::{
    DeleteManyModel, DeleteOneModel, InsertOneModel, ReplaceOneModel, UpdateManyModel,
    UpdateOneModel, WriteModel,
};
use mongodb::results::SummaryBulkWriteResult;

/// One write in a bulk batch.
#[derive(Debug, Clone, PartialEq)]
pub enum BulkOperation {
    InsertOne(Document),
    UpdateOne { filter: Document, update: Document },
    UpdateMany { filter: Document, update: Document },
    ReplaceOne { filter: Document, replacement: Document },
    DeleteOne(Document),
    DeleteMany(Document),
}

impl BulkOperation {
    /// Driver model targeting `namespace`
    pub(crate) fn into_model(self, namespace: Namespace) -> WriteModel {
        match self {
            BulkOperation::InsertOne(document) => InsertOneModel::builder()
                .namespace(namespace)
                .document(document)
                .build()
                .into(),
            BulkOperation::UpdateOne { filter, update } => UpdateOneModel::builder()
                .namespace(namespace)
                .filter(filter)
                .update(update)
                .build()
                .into(),
            BulkOperation::UpdateMany { filter, update } => UpdateManyModel::builder()
                .namespace(namespace)
                .filter(filter)
                .update(update)
                .build()
                .into(),
            BulkOperation::ReplaceOne {
                filter,
                replacement,
            } => ReplaceOneModel::builder()
                .namespace(namespace)
                .filter(filter)
                .replacement(replacement)
                .build()
                .into(),
            BulkOperation::DeleteOne(filter) => DeleteOneModel::builder()
                .namespace(namespace)
                .filter(filter)
                .build()
                .into(),
            BulkOperation::DeleteMany(filter) => DeleteManyModel::builder()
                .namespace(namespace)
                .filter(filter)
                .build()
                .into(),
        }
    }
}

/// Counts reported for a bulk batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BulkWriteSummary {
    pub inserted: i64,
    pub matched: i64,
    pub modified: i64,
    pub upserted: i64,
    pub deleted: i64,
}

impl From<SummaryBulkWriteResult> for BulkWriteSummary {
    fn from(result: SummaryBulkWriteResult) -> Self {
        Self {
            inserted: result.inserted_count,
            matched: result.matched_count,
            modified: result.modified_count,
            upserted: result.upserted_count,
            deleted: result.deleted_count,
        }
    }
}
