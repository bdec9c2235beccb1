//! Request coalescing
//!
//! When several callers ask for the same key at once, only ONE operation is
//! started and its result is broadcast to every waiter. The operation runs
//! on its own task, so it completes even if every waiter goes away, and its
//! registry slot is released on completion whether it succeeded, failed or
//! panicked.

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::types::{Result, SyncError};

/// Information about an in-flight operation
struct InFlight<T> {
    sender: broadcast::Sender<T>,
    started_at: Instant,
}

/// Per-key in-flight registry
pub struct RequestCoalescer<T> {
    name: &'static str,
    in_flight: Arc<DashMap<String, InFlight<T>>>,
}

impl<T> RequestCoalescer<T>
where
    T: Clone + Send + 'static,
{
    /// `name` only labels log lines
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            in_flight: Arc::new(DashMap::new()),
        }
    }

    /// Join the pending operation for `key`, or start `make()` as the new one.
    ///
    /// `make` is only called when no operation is pending. Returns an
    /// `Internal` error if the operation panicked before producing a value.
    pub async fn run<F, Fut>(&self, key: &str, make: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T> + Send + 'static,
    {
        let mut receiver = match self.in_flight.entry(key.to_string()) {
            Entry::Occupied(existing) => {
                debug!(
                    coalescer = self.name,
                    key,
                    waited_ms = existing.get().started_at.elapsed().as_millis() as u64,
                    "Coalescing with in-flight operation"
                );
                existing.get().sender.subscribe()
            }
            Entry::Vacant(slot) => {
                let (sender, receiver) = broadcast::channel(1);
                slot.insert(InFlight {
                    sender: sender.clone(),
                    started_at: Instant::now(),
                });
                self.spawn_leader(key, sender, make());
                receiver
            }
        };

        receiver.recv().await.map_err(|_| {
            warn!(coalescer = self.name, key, "In-flight operation ended without a result");
            SyncError::Internal(format!("{} operation for {} aborted", self.name, key))
        })
    }

    fn spawn_leader<Fut>(&self, key: &str, sender: broadcast::Sender<T>, work: Fut)
    where
        Fut: Future<Output = T> + Send + 'static,
    {
        let guard = SlotGuard {
            name: self.name,
            key: key.to_string(),
            in_flight: Arc::clone(&self.in_flight),
        };
        tokio::spawn(async move {
            let value = work.await;
            // Release the slot before broadcasting so a caller arriving after
            // completion starts a fresh operation instead of a dead channel.
            drop(guard);
            let _ = sender.send(value);
        });
    }

    /// Whether an operation for `key` is pending
    pub fn is_in_flight(&self, key: &str) -> bool {
        self.in_flight.contains_key(key)
    }

    /// Number of pending operations
    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }
}

/// Removes the registry slot when the leader finishes or unwinds
struct SlotGuard<T> {
    name: &'static str,
    key: String,
    in_flight: Arc<DashMap<String, InFlight<T>>>,
}

impl<T> Drop for SlotGuard<T> {
    fn drop(&mut self) {
        if let Some((_, entry)) = self.in_flight.remove(&self.key) {
            debug!(
                coalescer = self.name,
                key = %self.key,
                elapsed_ms = entry.started_at.elapsed().as_millis() as u64,
                "In-flight operation completed"
            );
        }
    }
}
