//! Bounded fan-out of independent units of work
//!
//! A [`TaskGroup`] spawns units onto the tokio runtime while holding at most
//! `capacity` of them in flight. A permit is acquired *before* each unit is
//! spawned and released when the unit finishes, so the dispatcher waits
//! whenever the group is full. [`TaskGroup::join`] waits for every unit.
//!
//! Each unit is tagged with a key. A unit that panics is reported at join
//! time under its key instead of tearing down its siblings.

use futures::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

/// A unit panicked before producing a value
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitPanic {
    pub message: String,
}

impl std::fmt::Display for UnitPanic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "unit panicked: {}", self.message)
    }
}

pub struct TaskGroup<K, T> {
    semaphore: Arc<Semaphore>,
    capacity: usize,
    tasks: JoinSet<(K, std::result::Result<T, UnitPanic>)>,
}

impl<K, T> TaskGroup<K, T>
where
    K: Send + 'static,
    T: Send + 'static,
{
    /// Create a group allowing `capacity` concurrent units (at least one)
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
            tasks: JoinSet::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Units spawned and not yet finished
    pub fn in_flight(&self) -> usize {
        self.capacity - self.semaphore.available_permits()
    }

    /// Wait for a free slot, then spawn `unit` tagged with `key`
    pub async fn spawn<F>(&mut self, key: K, unit: F)
    where
        F: Future<Output = T> + Send + 'static,
    {
        // The semaphore is never closed, so acquiring only fails if that changes.
        let permit = self.semaphore.clone().acquire_owned().await.ok();

        self.tasks.spawn(async move {
            let _permit = permit;
            let outcome = AssertUnwindSafe(unit)
                .catch_unwind()
                .await
                .map_err(|payload| UnitPanic {
                    message: panic_message(payload.as_ref()),
                });
            (key, outcome)
        });
    }

    /// Wait for every spawned unit and return their outcomes in completion order
    pub async fn join(mut self) -> Vec<(K, std::result::Result<T, UnitPanic>)> {
        let mut results = Vec::with_capacity(self.tasks.len());

        while let Some(joined) = self.tasks.join_next().await {
            match joined {
                Ok(result) => results.push(result),
                // Only reachable if the runtime cancels the task during shutdown
                Err(e) => tracing::error!("task group unit did not complete: {}", e),
            }
        }

        results
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_every_unit_is_joined() {
        let mut group = TaskGroup::new(3);
        for i in 0..20u32 {
            group.spawn(i, async move { i * 2 }).await;
        }

        let mut results: Vec<(u32, u32)> = group
            .join()
            .await
            .into_iter()
            .map(|(k, v)| (k, v.unwrap()))
            .collect();
        results.sort();

        assert_eq!(results.len(), 20);
        assert!(results.iter().all(|(k, v)| *v == k * 2));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_capacity_bounds_concurrency() {
        let in_flight = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let mut group = TaskGroup::new(10);
        for i in 0..50 {
            let in_flight = in_flight.clone();
            let max_seen = max_seen.clone();
            group
                .spawn(i, async move {
                    let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                    max_seen.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    in_flight.fetch_sub(1, Ordering::SeqCst);
                })
                .await;
        }

        assert_eq!(group.join().await.len(), 50);
        let max = max_seen.load(Ordering::SeqCst);
        assert!(max <= 10, "saw {} concurrent units", max);
        assert!(max > 1, "units never overlapped");
    }

    #[tokio::test]
    async fn test_panicking_unit_does_not_affect_siblings() {
        let mut group = TaskGroup::new(2);
        group.spawn("ok-1", async { 1 }).await;
        group
            .spawn("boom", async {
                if true {
                    panic!("adapter exploded");
                }
                0
            })
            .await;
        group.spawn("ok-2", async { 2 }).await;

        let results = group.join().await;
        assert_eq!(results.len(), 3);

        for (key, outcome) in results {
            match key {
                "boom" => assert_eq!(outcome.unwrap_err().message, "adapter exploded"),
                _ => assert!(outcome.is_ok()),
            }
        }
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        let group: TaskGroup<(), ()> = TaskGroup::new(0);
        assert_eq!(group.capacity(), 1);
        assert_eq!(group.in_flight(), 0);
    }
}
