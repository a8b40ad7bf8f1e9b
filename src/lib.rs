//! mniam
//!
//! Lazily opened, reference-counted MongoDB handles and cursor consumption
//! with backpressure.
//!
//! # Modules
//!
//! - `lifecycle`: single-flight open and reference-counted handles
//! - `database`: lazily connected database handle
//! - `collection`: collections, find queries and aggregations
//! - `cursor`: batch cursors (driver-backed and in-memory)
//! - `consumer`: `to_array`, `each_series` and `each_limit`
//! - `config`: Configuration management
//! - `error`: Error types and handling
//! - `cli`: Command-line interface and argument parsing
//!
//! # Example
//!
//! ```no_run
//! use mniam::bson::doc;
//! use mniam::{CollectionSpec, Config, Database};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let db = Database::new("mongodb://localhost:27017/shop", &Config::default());
//!     let orders = db.collection(CollectionSpec::new("orders").index(doc! { "customer": 1 }));
//!
//!     orders
//!         .query(doc! { "status": "paid" })
//!         .each_limit(8, |order| async move {
//!             println!("{}", order.get_object_id("_id")?);
//!             Ok::<_, mniam::error::BoxError>(())
//!         })
//!         .await?;
//!     Ok(())
//! }
//! ```

pub mod cli;
pub mod collection;
pub mod config;
pub mod consumer;
pub mod cursor;
pub mod database;
pub mod error;
pub mod lifecycle;

pub use mongodb::bson;

// Re-export commonly used types
pub use collection::{Aggregate, BulkOperation, BulkWriteSummary, Collection, CollectionSpec, Query};
pub use config::Config;
pub use consumer::{CursorSource, StreamConsumer};
pub use cursor::{BatchCursor, MemoryCursor};
pub use database::Database;
pub use error::{MniamError, Result};
pub use lifecycle::{Lease, Lifecycle, RefCountedHandle};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Get library version string
///
/// # Returns
/// * `&str` - Version string
pub fn version() -> &'static str {
    VERSION
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!version().is_empty());
    }
}
