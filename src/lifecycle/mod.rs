//! Lazy, shared resource lifecycles
//!
//! This module provides the building blocks used by the database and
//! collection handles:
//! - [`SingleFlight`]: at most one open attempt in flight, failures not cached
//! - [`RefCountedHandle`]: open on first acquire, close on last release
//! - [`Lease`]: RAII reference on a handle
//!
//! The resource-specific part (how to open, how to close) is supplied by a
//! [`Lifecycle`] implementation.

use async_trait::async_trait;

use crate::error::Result;

mod handle;
mod single_flight;

pub use handle::{Lease, RefCountedHandle};
pub use single_flight::SingleFlight;

/// Open/close behaviour of a shared resource.
#[async_trait]
pub trait Lifecycle: Send + Sync + 'static {
    /// The shared resource; cloned out to every holder.
    type Resource: Clone + Send + Sync + 'static;

    /// Name used in logs and error messages.
    fn name(&self) -> &str;

    /// Establish the resource. May be slow and may fail.
    async fn open(&self) -> Result<Self::Resource>;

    /// Tear the resource down after the last holder released it.
    fn close(&self, resource: Self::Resource);
}
