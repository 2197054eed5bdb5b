use crate::prelude::*;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;

pub const DEFAULT_TIMES: u32 = 5;
pub const DEFAULT_BACKOFF: Duration = Duration::from_secs(15);

/// Retries failed appends and prunes up to `times` times, sleeping `backoff` in between,
/// as long as the inner sink considers the failure recoverable.
pub struct RetryingSink {
    inner: Box<dyn Sink>,
    times: u32,
    backoff: Duration,
}

impl RetryingSink {
    pub fn new(inner: Box<dyn Sink>, times: u32, backoff: Duration) -> Self {
        Self {
            inner,
            times,
            backoff,
        }
    }

    async fn retry<'a, F>(&'a self, what: &str, op: F) -> Result<()>
    where
        F: Fn() -> futures::future::BoxFuture<'a, Result<()>>,
    {
        let mut retries = self.times;
        loop {
            match op().await {
                Ok(()) => return Ok(()),
                Err(err) if retries > 0 && self.inner.is_recoverable(&err) => {
                    warn!(
                        "{}: {} failed, retrying in {:?}: {:?}",
                        self.inner, what, self.backoff, err
                    );
                    tokio::time::sleep(self.backoff).await;
                    retries -= 1;
                    info!("{}: retrying {}", self.inner, what);
                }
                Err(err) => return Err(err),
            }
        }
    }
}

#[async_trait]
impl Sink for RetryingSink {
    async fn init(&self) -> Result<()> {
        self.inner.init().await
    }

    async fn append(&self, data: &RenogyData, sampled_at: DateTime<Utc>) -> Result<()> {
        self.retry("append", || self.inner.append(data, sampled_at))
            .await
    }

    async fn delete_records_older_than(&self, days: u32) -> Result<()> {
        self.retry("delete_records_older_than", || {
            self.inner.delete_records_older_than(days)
        })
        .await
    }

    async fn close(&self) -> Result<()> {
        self.inner.close().await
    }

    fn is_recoverable(&self, err: &anyhow::Error) -> bool {
        self.inner.is_recoverable(err)
    }
}

impl std::fmt::Display for RetryingSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "RetryingSink({}, times={}, backoff={:?})",
            self.inner, self.times, self.backoff
        )
    }
}
