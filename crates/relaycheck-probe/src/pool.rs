//! Bounded task scheduler with an admission window.
//!
//! At most `limit` tasks run at once. A new task is admitted the moment a
//! running one finishes, so a slow probe never holds back the rest of a
//! "batch". Tasks run on the tokio runtime via a [`JoinSet`]; their outputs
//! are handed back to the caller instead of being written into shared
//! state.

use std::collections::BTreeSet;
use std::future::Future;

use tokio::task::JoinSet;
use tracing::{debug, error};

/// Outputs of a bounded run.
#[derive(Debug)]
pub struct BatchReport<T> {
    /// `(input index, output)` in completion order.
    pub completed: Vec<(usize, T)>,
    /// Input indices of tasks that panicked or were cancelled.
    pub failed: Vec<usize>,
}

impl<T> Default for BatchReport<T> {
    fn default() -> Self {
        Self {
            completed: Vec::new(),
            failed: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BoundedScheduler {
    limit: usize,
}

impl BoundedScheduler {
    /// A limit of zero is treated as one.
    pub fn new(limit: usize) -> Self {
        Self {
            limit: limit.max(1),
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Run every task, keeping at most `limit` in flight, and wait for all
    /// of them to finish.
    pub async fn run_all<I, F, Fut, T>(&self, tasks: I) -> BatchReport<T>
    where
        I: IntoIterator<Item = F>,
        F: FnOnce() -> Fut,
        Fut: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let mut queue = tasks.into_iter().enumerate();
        let mut running = JoinSet::new();
        // Indices admitted but not yet reported back.
        let mut outstanding = BTreeSet::new();
        let mut report = BatchReport::default();

        loop {
            while running.len() < self.limit {
                let Some((index, task)) = queue.next() else {
                    break;
                };
                let fut = task();
                outstanding.insert(index);
                running.spawn(async move { (index, fut.await) });
                debug!(index, in_flight = running.len(), "task admitted");
            }

            match running.join_next().await {
                Some(Ok((index, output))) => {
                    outstanding.remove(&index);
                    report.completed.push((index, output));
                }
                Some(Err(e)) => {
                    error!(error = %e, "task aborted");
                }
                None => break,
            }
        }

        // Whatever was admitted but never reported back did not complete.
        report.failed.extend(outstanding);
        report
    }
}
