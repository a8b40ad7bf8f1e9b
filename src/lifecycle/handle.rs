//! Reference-counted lazy handle.
//!
//! A [`RefCountedHandle`] opens its resource on the first `acquire`, shares it
//! between all holders, and tears it down when the last holder releases it.

use std::ops::Deref;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, warn};

use super::Lifecycle;
use super::single_flight::SingleFlight;
use crate::error::{PreconditionError, Result};

/// Lazily opened resource shared by reference count.
pub struct RefCountedHandle<L: Lifecycle> {
    lifecycle: Arc<L>,
    flight: SingleFlight<L::Resource>,
    holders: Mutex<Holders>,
}

/// References on a handle.
///
/// Only `committed` references can be released by callers. The resource is
/// torn down once both counts reach zero.
#[derive(Debug, Default)]
struct Holders {
    committed: usize,
    pending: usize,
}

impl Holders {
    fn is_idle(&self) -> bool {
        self.committed == 0 && self.pending == 0
    }
}

impl<L: Lifecycle> RefCountedHandle<L> {
    /// Create an unopened handle.
    pub fn new(lifecycle: L) -> Self {
        let lifecycle = Arc::new(lifecycle);
        let opener = Arc::clone(&lifecycle);
        let flight = SingleFlight::new(move || {
            let lifecycle = Arc::clone(&opener);
            async move { lifecycle.open().await }
        });

        Self {
            lifecycle,
            flight,
            holders: Mutex::new(Holders::default()),
        }
    }

    /// Take a reference on the resource, opening it if necessary.
    ///
    /// Every successful `acquire` must be balanced by one [`release`](Self::release).
    /// A failed or abandoned acquire does not keep its reference.
    ///
    /// # Returns
    /// * `Result<L::Resource>` - The shared resource, or `MniamError::Initialization`
    pub async fn acquire(&self) -> Result<L::Resource> {
        let reservation = Reservation::new(self);
        let resource = self.flight.run().await?;
        reservation.commit();
        Ok(resource)
    }

    /// Drop one reference; the last one tears the resource down.
    ///
    /// Acquires that have not completed yet do not count as references.
    ///
    /// # Returns
    /// * `Err(MniamError::Precondition)` - No completed acquire is outstanding
    pub fn release(&self) -> Result<()> {
        let resource = {
            let mut holders = self.holders();
            if holders.committed == 0 {
                return Err(PreconditionError::UnbalancedRelease {
                    handle: self.lifecycle.name().to_string(),
                }
                .into());
            }
            holders.committed -= 1;
            debug!(
                "Releasing {} ({} holders left, {} opening)",
                self.lifecycle.name(),
                holders.committed,
                holders.pending
            );
            self.teardown_if_idle(&holders)
        };

        self.close(resource);
        Ok(())
    }

    /// Acquire a reference wrapped in a guard that releases it on drop.
    pub async fn lease(self: &Arc<Self>) -> Result<Lease<L>> {
        let resource = self.acquire().await?;
        Ok(Lease {
            handle: Arc::clone(self),
            resource,
            detached: false,
        })
    }

    /// Number of references currently held.
    pub fn holder_count(&self) -> usize {
        self.holders().committed
    }

    /// Whether the resource is open and cached.
    pub fn is_open(&self) -> bool {
        self.flight.is_ready()
    }

    /// Name of the managed resource, for diagnostics.
    pub fn name(&self) -> &str {
        self.lifecycle.name()
    }

    /// Reset under the count lock so a concurrent acquire starts a fresh cycle.
    fn teardown_if_idle(&self, holders: &Holders) -> Option<L::Resource> {
        if holders.is_idle() {
            self.flight.reset()
        } else {
            None
        }
    }

    fn close(&self, resource: Option<L::Resource>) {
        if let Some(resource) = resource {
            debug!("Closing {}", self.lifecycle.name());
            self.lifecycle.close(resource);
        }
    }

    fn holders(&self) -> MutexGuard<'_, Holders> {
        self.holders.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Pending reference for the duration of an `acquire` call.
///
/// Committing turns it into a releasable reference. Dropped uncommitted when
/// the open fails or the acquiring future is dropped.
struct Reservation<'a, L: Lifecycle> {
    handle: &'a RefCountedHandle<L>,
    committed: bool,
}

impl<'a, L: Lifecycle> Reservation<'a, L> {
    fn new(handle: &'a RefCountedHandle<L>) -> Self {
        let mut holders = handle.holders();
        holders.pending += 1;
        debug!(
            "Opening {} ({} holders, {} opening)",
            handle.lifecycle.name(),
            holders.committed,
            holders.pending
        );
        drop(holders);
        Self {
            handle,
            committed: false,
        }
    }

    fn commit(mut self) {
        let mut holders = self.handle.holders();
        holders.pending -= 1;
        holders.committed += 1;
        self.committed = true;
    }
}

impl<L: Lifecycle> Drop for Reservation<'_, L> {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        let resource = {
            let mut holders = self.handle.holders();
            holders.pending -= 1;
            self.handle.teardown_if_idle(&holders)
        };
        self.handle.close(resource);
    }
}

/// One held reference on a [`RefCountedHandle`], released on drop.
pub struct Lease<L: Lifecycle> {
    handle: Arc<RefCountedHandle<L>>,
    resource: L::Resource,
    detached: bool,
}

impl<L: Lifecycle> Lease<L> {
    /// Keep the reference past this guard.
    ///
    /// The caller becomes responsible for a matching
    /// [`RefCountedHandle::release`].
    pub fn detach(mut self) -> L::Resource {
        self.detached = true;
        self.resource.clone()
    }

    /// The handle this lease belongs to.
    pub fn handle(&self) -> &Arc<RefCountedHandle<L>> {
        &self.handle
    }
}

impl<L: Lifecycle> Deref for Lease<L> {
    type Target = L::Resource;

    fn deref(&self) -> &Self::Target {
        &self.resource
    }
}

impl<L: Lifecycle> Drop for Lease<L> {
    fn drop(&mut self) {
        if self.detached {
            return;
        }
        if let Err(e) = self.handle.release() {
            warn!("Failed to release lease on {}: {}", self.handle.name(), e);
        }
    }
}
