//! Structured fan-out over concurrent tasks
//!
//! Results are collected by submission index, never by completion order.
//! The first failing member aborts every sibling still in flight.

use crate::error::PipelineError;
use crate::Result;
use std::future::Future;
use tokio::task::JoinSet;
use tracing::warn;

pub struct TaskGroup<T> {
    tasks: JoinSet<(usize, Result<T>)>,
    submitted: usize,
}

impl<T: Send + 'static> TaskGroup<T> {
    pub fn new() -> Self {
        Self {
            tasks: JoinSet::new(),
            submitted: 0,
        }
    }

    pub fn spawn<F>(&mut self, task: F)
    where
        F: Future<Output = Result<T>> + Send + 'static,
    {
        let index = self.submitted;
        self.submitted += 1;
        self.tasks.spawn(async move { (index, task.await) });
    }

    pub fn len(&self) -> usize {
        self.submitted
    }

    pub fn is_empty(&self) -> bool {
        self.submitted == 0
    }

    /// Await every member. All-or-nothing: on the first error the
    /// remaining members are aborted and that error is returned.
    pub async fn join_all(mut self) -> Result<Vec<T>> {
        let mut slots: Vec<Option<T>> = (0..self.submitted).map(|_| None).collect();

        while let Some(joined) = self.tasks.join_next().await {
            match joined {
                Ok((index, Ok(value))) => slots[index] = Some(value),
                Ok((index, Err(e))) => {
                    warn!(task = index, error = %e, "Task failed, cancelling siblings");
                    self.tasks.abort_all();
                    return Err(e);
                }
                Err(join_error) => {
                    warn!(error = %join_error, "Task panicked or was cancelled");
                    self.tasks.abort_all();
                    return Err(PipelineError::TaskError(join_error.to_string()));
                }
            }
        }

        Ok(slots.into_iter().flatten().collect())
    }
}

impl<T: Send + 'static> Default for TaskGroup<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    fn group_should_panic() -> bool {
        true
    }

    #[tokio::test]
    async fn test_results_follow_submission_order() {
        let mut group = TaskGroup::new();
        for (i, delay) in [40u64, 5, 20].into_iter().enumerate() {
            group.spawn(async move {
                tokio::time::sleep(Duration::from_millis(delay)).await;
                Ok::<_, PipelineError>(i)
            });
        }

        assert_eq!(group.len(), 3);
        assert_eq!(group.join_all().await.unwrap(), vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn test_failure_cancels_siblings() {
        let finished = Arc::new(AtomicBool::new(false));
        let mut group = TaskGroup::new();

        let flag = finished.clone();
        group.spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            flag.store(true, Ordering::SeqCst);
            Ok::<_, PipelineError>("slow")
        });
        group.spawn(async { Err::<&str, _>(PipelineError::CatalogError("unreachable".to_string())) });

        let result = group.join_all().await;
        assert!(matches!(result, Err(PipelineError::CatalogError(_))));

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(!finished.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_panicking_member_is_a_task_error() {
        let mut group: TaskGroup<u8> = TaskGroup::new();
        group.spawn(async {
            if group_should_panic() {
                panic!("boom");
            }
            Ok::<u8, PipelineError>(0)
        });

        let result = group.join_all().await;
        assert!(matches!(result, Err(PipelineError::TaskError(_))));
    }

    #[tokio::test]
    async fn test_empty_group() {
        let group: TaskGroup<u8> = TaskGroup::default();
        assert!(group.is_empty());
        assert!(group.join_all().await.unwrap().is_empty());
    }
}
