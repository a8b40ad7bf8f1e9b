use super::*;
use crate::config::Config;
use crate::database::Database;
use crate::error::{MniamError, PreconditionError};
use mongodb::options::{Acknowledgment, WriteConcern};

// No server is needed: these exercise everything up to the first round trip.

fn unreachable_database() -> Database {
    Database::new("definitely-not-mongodb", &Config::default())
}

fn items(db: &Database) -> Collection {
    db.collection(
        CollectionSpec::new("items")
            .index(doc! { "sku": 1 })
            .index(doc! { "created": -1 }),
    )
}

#[test]
fn test_spec_builder() {
    let spec = CollectionSpec::new("orders")
        .index(doc! { "customer": 1 })
        .batch_size(25);
    assert_eq!(spec.name, "orders");
    assert_eq!(spec.indexes.len(), 1);
    assert_eq!(spec.batch_size, Some(25));
    assert!(spec.write_concern.is_none());

    let spec = spec.write_concern(WriteConcern::majority());
    assert_eq!(
        spec.write_concern.and_then(|concern| concern.w),
        Some(Acknowledgment::Majority)
    );
}

#[test]
fn test_batch_size_defaults_to_cursor_config() {
    let mut config = Config::default();
    config.cursor.batch_size = 40;
    let db = Database::new("mongodb://localhost:27017/test", &config);

    assert_eq!(db.collection(CollectionSpec::new("a")).batch_size, 40);
    assert_eq!(
        db.collection(CollectionSpec::new("b").batch_size(7)).batch_size,
        7
    );
}

#[tokio::test]
async fn test_failed_open_returns_database_reference() {
    let db = unreachable_database();
    let items = items(&db);

    let err = items.open().await.unwrap_err();
    assert!(err.is_initialization());
    assert_eq!(items.holder_count(), 0);
    assert_eq!(db.holder_count(), 0);
    assert!(!items.is_open());
}

#[tokio::test]
async fn test_operations_surface_initialization_errors() {
    let db = unreachable_database();
    let items = items(&db);

    assert!(items.find_one(doc! {}).await.unwrap_err().is_initialization());
    assert!(items.find(doc! {}, None).await.unwrap_err().is_initialization());
    assert!(
        items
            .insert_one(doc! { "sku": "A-1" })
            .await
            .unwrap_err()
            .is_initialization()
    );
    assert_eq!(db.holder_count(), 0);
}

#[tokio::test]
async fn test_zero_batch_size_is_rejected_before_opening() {
    let db = unreachable_database();
    let items = items(&db);

    let err = items.query(doc! {}).batch_size(0).to_array().await.unwrap_err();
    assert!(matches!(
        err,
        MniamError::Precondition(PreconditionError::InvalidBatchSize(0))
    ));

    let err = items.aggregate(vec![]).batch_size(0).to_array().await.unwrap_err();
    assert!(matches!(
        err,
        MniamError::Precondition(PreconditionError::InvalidBatchSize(0))
    ));
    assert_eq!(items.holder_count(), 0);
}

#[tokio::test]
async fn test_zero_limit_is_rejected_before_opening() {
    let db = unreachable_database();
    let items = items(&db);

    let err = items
        .each_limit(doc! {}, 0, |_| async { Ok::<_, BoxError>(()) })
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        MniamError::Precondition(PreconditionError::InvalidLimit(0))
    ));
}

#[test]
fn test_stage_helpers() {
    let db = unreachable_database();
    let orders = db.collection(CollectionSpec::new("orders"));

    let aggregate = orders
        .aggregate(vec![doc! { "$match": { "status": "paid" } }])
        .group(doc! { "_id": "$customer", "total": { "$sum": "$amount" } })
        .sort(doc! { "total": -1 })
        .limit(10)
        .replace_root(doc! { "newRoot": "$_id" })
        .r#match(doc! { "total": { "$gt": 0 } });

    let stages: Vec<String> = aggregate
        .stages()
        .iter()
        .filter_map(|stage| stage.keys().next().cloned())
        .collect();
    assert_eq!(
        stages,
        ["$match", "$group", "$sort", "$limit", "$replaceRoot", "$match"]
    );
    assert_eq!(aggregate.stages()[3], doc! { "$limit": 10 });
}

#[tokio::test]
async fn test_empty_bulk_write_does_not_open() {
    let db = unreachable_database();
    let items = items(&db);

    let summary = items.bulk_write(Vec::new(), None).await.unwrap();
    assert_eq!(summary, BulkWriteSummary::default());
    assert!(!items.is_open());
    assert_eq!(db.holder_count(), 0);
}

#[tokio::test]
async fn test_write_operations_surface_initialization_errors() {
    let db = unreachable_database();
    let items = items(&db);

    let replaced = items
        .find_one_and_replace(doc! { "sku": "A-1" }, doc! { "sku": "A-2" }, None)
        .await;
    assert!(replaced.unwrap_err().is_initialization());

    let deleted = items.find_one_and_delete(doc! { "sku": "A-1" }, None).await;
    assert!(deleted.unwrap_err().is_initialization());

    let upsert = UpdateOptions::builder().upsert(true).build();
    let updated = items
        .update_one(doc! { "sku": "A-1" }, doc! { "$set": { "stock": 3 } }, Some(upsert))
        .await;
    assert!(updated.unwrap_err().is_initialization());

    let bulk = items
        .bulk_write(
            vec![
                BulkOperation::InsertOne(doc! { "sku": "C-3" }),
                BulkOperation::UpdateMany {
                    filter: doc! {},
                    update: doc! { "$inc": { "stock": 1 } },
                },
            ],
            None,
        )
        .await;
    assert!(bulk.unwrap_err().is_initialization());

    assert_eq!(items.holder_count(), 0);
    assert_eq!(db.holder_count(), 0);
}
