//! Bounded fan-out for per-paper external calls.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Runs one async call per item with a concurrency limit and a stage deadline.
#[derive(Debug, Clone, Copy)]
pub struct TaskPool {
    limit: usize,
    deadline: Duration,
}

impl TaskPool {
    pub fn new(limit: usize, deadline: Duration) -> Self {
        Self {
            limit: limit.max(1),
            deadline,
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Apply `f` to every item; results come back indexed like `items`.
    ///
    /// Each task owns its item. When the stage deadline passes, outstanding
    /// tasks are aborted and their slots stay `None`, as do slots of tasks
    /// that panicked.
    pub async fn run<T, R, F, Fut>(&self, stage: &str, items: Vec<T>, f: F) -> Vec<Option<R>>
    where
        T: Send + 'static,
        R: Send + 'static,
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = R> + Send + 'static,
    {
        let total = items.len();
        let mut results: Vec<Option<R>> = (0..total).map(|_| None).collect();
        if total == 0 {
            return results;
        }

        let f = Arc::new(f);
        let semaphore = Arc::new(Semaphore::new(self.limit));
        let mut set = JoinSet::new();

        for (idx, item) in items.into_iter().enumerate() {
            let f = Arc::clone(&f);
            let sem = Arc::clone(&semaphore);
            set.spawn(async move {
                let Ok(_permit) = sem.acquire_owned().await else {
                    return (idx, None);
                };
                (idx, Some(f(item).await))
            });
        }

        let deadline = Instant::now() + self.deadline;
        loop {
            match tokio::time::timeout_at(deadline, set.join_next()).await {
                Ok(Some(Ok((idx, value)))) => results[idx] = value,
                Ok(Some(Err(e))) => warn!(stage, error = %e, "task failed to complete"),
                Ok(None) => break,
                Err(_) => {
                    warn!(stage, outstanding = set.len(), "stage deadline reached, aborting tasks");
                    set.abort_all();
                    break;
                }
            }
        }

        let completed = results.iter().filter(|r| r.is_some()).count();
        debug!(stage, total, completed, "pool drained");
        results
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[tokio::test]
    async fn results_keep_input_order() {
        let pool = TaskPool::new(3, Duration::from_secs(5));
        let out = pool
            .run("order", vec![30u64, 10, 20], |ms| async move {
                tokio::time::sleep(Duration::from_millis(ms)).await;
                ms * 2
            })
            .await;
        assert_eq!(out, vec![Some(60), Some(20), Some(40)]);
    }

    #[tokio::test]
    async fn concurrency_never_exceeds_limit() {
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let pool = TaskPool::new(2, Duration::from_secs(5));

        let (f_in, f_peak) = (in_flight.clone(), peak.clone());
        pool.run("limit", (0..8).collect::<Vec<_>>(), move |_| {
            let (in_flight, peak) = (f_in.clone(), f_peak.clone());
            async move {
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10)).await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
            }
        })
        .await;

        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn deadline_leaves_slow_items_empty() {
        let pool = TaskPool::new(4, Duration::from_millis(100));
        let out = pool
            .run("deadline", vec![0u64, 10_000], |ms| async move {
                tokio::time::sleep(Duration::from_millis(ms)).await;
                ms
            })
            .await;
        assert_eq!(out, vec![Some(0), None]);
    }

    #[tokio::test]
    async fn empty_input() {
        let pool = TaskPool::new(2, Duration::from_secs(1));
        let out: Vec<Option<u8>> = pool.run("empty", Vec::<u8>::new(), |x| async move { x }).await;
        assert!(out.is_empty());
    }
}
