use crate::prelude::*;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;

pub const DEFAULT_DEADLINE: Duration = Duration::from_secs(30);

/// Runs appends and prunes on the executor and gives up on them after `deadline`, so a hung
/// database connection can't pile up tasks forever. The resulting [`TaskError::Timeout`] is
/// recoverable, so an outer [`RetryingSink`](super::RetryingSink) tries again.
pub struct TimeoutSink {
    inner: Arc<dyn Sink>,
    deadline: Duration,
    executor: BackgroundTaskExecutor,
}

impl TimeoutSink {
    pub fn new(inner: Arc<dyn Sink>, deadline: Duration, executor: BackgroundTaskExecutor) -> Self {
        Self {
            inner,
            deadline,
            executor,
        }
    }
}

#[async_trait]
impl Sink for TimeoutSink {
    async fn init(&self) -> Result<()> {
        self.inner.init().await
    }

    async fn append(&self, data: &RenogyData, sampled_at: DateTime<Utc>) -> Result<()> {
        let inner = self.inner.clone();
        let data = data.clone();
        self.executor
            .run(&format!("append to {}", inner), self.deadline, async move {
                inner.append(&data, sampled_at).await
            })
            .await
    }

    async fn delete_records_older_than(&self, days: u32) -> Result<()> {
        let inner = self.inner.clone();
        self.executor
            .run(
                &format!("delete from {}", inner),
                self.deadline,
                async move { inner.delete_records_older_than(days).await },
            )
            .await
    }

    async fn close(&self) -> Result<()> {
        self.inner.close().await
    }

    fn is_recoverable(&self, err: &anyhow::Error) -> bool {
        // our own deadline, whatever the inner sink thinks of it
        let timed_out = err.chain().any(|cause| {
            matches!(
                cause.downcast_ref::<TaskError>(),
                Some(TaskError::Timeout { .. })
            )
        });
        timed_out || self.inner.is_recoverable(err)
    }
}

impl std::fmt::Display for TimeoutSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "TimeoutSink({}, deadline={:?})", self.inner, self.deadline)
    }
}
