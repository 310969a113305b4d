//! Executor trait definition

use std::future::Future;

use async_trait::async_trait;

use super::types::TaskId;

/// Performs the actual work for one task
///
/// `Ok(())` marks the task succeeded. Any error marks it failed and puts the
/// identifier in the queue's failed-task memo.
#[async_trait]
pub trait TaskExecutor: Send + Sync {
    async fn execute(&self, task_id: &TaskId) -> eyre::Result<()>;
}

/// Closures taking the task identifier are executors
#[async_trait]
impl<F, Fut> TaskExecutor for F
where
    F: Fn(TaskId) -> Fut + Send + Sync,
    Fut: Future<Output = eyre::Result<()>> + Send + 'static,
{
    async fn execute(&self, task_id: &TaskId) -> eyre::Result<()> {
        (self)(task_id.clone()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_closure_executor() {
        let executor = |id: TaskId| async move {
            if id.as_str() == "bad" {
                eyre::bail!("task {} reverted", id);
            }
            Ok(())
        };

        assert!(executor.execute(&TaskId::from("good")).await.is_ok());
        let err = executor.execute(&TaskId::from("bad")).await.unwrap_err();
        assert_eq!(err.to_string(), "task bad reverted");
    }

    #[tokio::test]
    async fn test_executor_as_trait_object() {
        let executor: Arc<dyn TaskExecutor> = Arc::new(|_id: TaskId| async { Ok::<(), eyre::Report>(()) });
        assert!(executor.execute(&TaskId::from("x")).await.is_ok());
    }
}
