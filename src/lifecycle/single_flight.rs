//! Single-flight lazy initialization.
//!
//! [`SingleFlight`] memoizes one asynchronous setup operation. Callers that
//! arrive while an attempt is running join it and observe the same outcome.
//! A successful value is cached until [`SingleFlight::reset`]; a failure
//! clears the slot so the next caller starts a fresh attempt.

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::future::{BoxFuture, FutureExt, Shared};
use tracing::{debug, trace};

use crate::error::{MniamError, Result};

type Outcome<T> = std::result::Result<T, Arc<MniamError>>;
type Attempt<T> = Shared<BoxFuture<'static, Outcome<T>>>;
type Operation<T> = Box<dyn Fn() -> BoxFuture<'static, Result<T>> + Send + Sync>;

enum Slot<T> {
    Empty,
    Pending { attempt: u64, future: Attempt<T> },
    Ready(T),
}

struct State<T> {
    slot: Slot<T>,
    /// Monotonic attempt counter; a settled outcome only applies to its own attempt.
    attempts: u64,
}

/// Memoized asynchronous initializer that never caches failures.
pub struct SingleFlight<T> {
    operation: Operation<T>,
    state: Mutex<State<T>>,
}

impl<T> SingleFlight<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Create an initializer around `operation`.
    ///
    /// The operation is not invoked until the first call to [`run`](Self::run).
    pub fn new<F, Fut>(operation: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        Self {
            operation: Box::new(move || operation().boxed()),
            state: Mutex::new(State {
                slot: Slot::Empty,
                attempts: 0,
            }),
        }
    }

    /// Resolve the value, starting or joining an attempt as needed.
    ///
    /// # Returns
    /// * `Ok(T)` - The cached value, or the outcome of the attempt this call joined
    /// * `Err(MniamError::Initialization)` - The joined attempt failed
    pub async fn run(&self) -> Result<T> {
        let (attempt, future) = {
            let mut state = self.lock();
            Self::settle_finished(&mut state);
            match &state.slot {
                Slot::Ready(value) => return Ok(value.clone()),
                Slot::Pending { attempt, future } => {
                    trace!("Joining initialization attempt {}", attempt);
                    (*attempt, future.clone())
                }
                Slot::Empty => {
                    state.attempts += 1;
                    let attempt = state.attempts;
                    debug!("Starting initialization attempt {}", attempt);
                    let future = (self.operation)()
                        .map(|outcome| outcome.map_err(Arc::new))
                        .boxed()
                        .shared();
                    state.slot = Slot::Pending {
                        attempt,
                        future: future.clone(),
                    };
                    (attempt, future)
                }
            }
        };

        let outcome = future.await;
        self.settle(attempt, &outcome);
        outcome.map_err(MniamError::Initialization)
    }

    /// Drop any pending attempt or cached value and return to the empty state.
    ///
    /// # Returns
    /// * `Option<T>` - The cached value, if one was ready, so the caller can tear it down
    pub fn reset(&self) -> Option<T> {
        let mut state = self.lock();
        match std::mem::replace(&mut state.slot, Slot::Empty) {
            Slot::Ready(value) => Some(value),
            Slot::Pending { attempt, .. } => {
                debug!("Abandoning initialization attempt {}", attempt);
                None
            }
            Slot::Empty => None,
        }
    }

    /// Whether a value is cached.
    pub fn is_ready(&self) -> bool {
        matches!(self.lock().slot, Slot::Ready(_))
    }

    /// Whether an attempt is outstanding.
    pub fn is_pending(&self) -> bool {
        matches!(self.lock().slot, Slot::Pending { .. })
    }

    fn settle(&self, attempt: u64, outcome: &Outcome<T>) {
        let mut state = self.lock();
        let current = matches!(
            state.slot,
            Slot::Pending { attempt: pending, .. } if pending == attempt
        );
        if !current {
            return;
        }
        state.slot = match outcome {
            Ok(value) => Slot::Ready(value.clone()),
            Err(err) => {
                debug!("Initialization attempt {} failed: {}", attempt, err);
                Slot::Empty
            }
        };
    }

    /// Apply the outcome of a pending attempt that already completed but whose
    /// callers have not settled it yet.
    fn settle_finished(state: &mut State<T>) {
        let finished = match &state.slot {
            Slot::Pending { attempt, future } => future.peek().map(|o| (*attempt, o.clone())),
            _ => None,
        };
        match finished {
            Some((_, Ok(value))) => state.slot = Slot::Ready(value),
            Some((attempt, Err(err))) => {
                debug!("Discarding failed initialization attempt {}: {}", attempt, err);
                state.slot = Slot::Empty;
            }
            None => {}
        }
    }

    fn lock(&self) -> MutexGuard<'_, State<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
