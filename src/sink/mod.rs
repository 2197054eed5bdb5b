pub mod csv_file;
pub mod database;
pub mod influx;
pub mod retry;
pub mod timeout;

use crate::prelude::*;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

pub use self::csv_file::{CsvSink, StdoutCsvSink};
pub use self::database::DatabaseSink;
pub use self::influx::{InfluxFailure, InfluxSink};
pub use self::retry::RetryingSink;
pub use self::timeout::TimeoutSink;

/// Somewhere to persist samples. Implementations use interior mutability, since the same sink
/// is shared between the sampling loop and the background tasks.
#[async_trait]
pub trait Sink: Send + Sync + std::fmt::Display {
    /// Prepares the sink, e.g. creates a CSV file with a header or the database table.
    async fn init(&self) -> Result<()>;

    async fn append(&self, data: &RenogyData, sampled_at: DateTime<Utc>) -> Result<()>;

    async fn delete_records_older_than(&self, days: u32) -> Result<()>;

    async fn close(&self) -> Result<()> {
        Ok(())
    }

    /// Whether a failure of [`append`](Self::append) or
    /// [`delete_records_older_than`](Self::delete_records_older_than) is worth retrying.
    fn is_recoverable(&self, err: &anyhow::Error) -> bool {
        is_recoverable(err)
    }
}

#[async_trait]
impl<T: Sink + ?Sized> Sink for Arc<T> {
    async fn init(&self) -> Result<()> {
        (**self).init().await
    }

    async fn append(&self, data: &RenogyData, sampled_at: DateTime<Utc>) -> Result<()> {
        (**self).append(data, sampled_at).await
    }

    async fn delete_records_older_than(&self, days: u32) -> Result<()> {
        (**self).delete_records_older_than(days).await
    }

    async fn close(&self) -> Result<()> {
        (**self).close().await
    }

    fn is_recoverable(&self, err: &anyhow::Error) -> bool {
        (**self).is_recoverable(err)
    }
}

/// Default failure classification: network hiccups and timeouts are recoverable, anything
/// else is fatal. Walks the whole error chain.
pub fn is_recoverable(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        if let Some(io) = cause.downcast_ref::<std::io::Error>() {
            return matches!(
                io.kind(),
                std::io::ErrorKind::ConnectionRefused
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::TimedOut
            );
        }
        if let Some(http) = cause.downcast_ref::<reqwest::Error>() {
            return http.is_connect() || http.is_timeout();
        }
        if let Some(task) = cause.downcast_ref::<TaskError>() {
            return matches!(task, TaskError::Timeout { .. });
        }
        if let Some(failure) = cause.downcast_ref::<InfluxFailure>() {
            return failure.is_timeout();
        }
        false
    })
}

/// Fans every call out to all sinks, in order.
#[derive(Default)]
pub struct CompositeSink {
    sinks: Vec<Box<dyn Sink>>,
}

impl CompositeSink {
    pub fn new(sinks: Vec<Box<dyn Sink>>) -> Self {
        Self { sinks }
    }

    pub fn push(&mut self, sink: Box<dyn Sink>) {
        self.sinks.push(sink);
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }
}

#[async_trait]
impl Sink for CompositeSink {
    async fn init(&self) -> Result<()> {
        for sink in &self.sinks {
            sink.init().await?;
        }
        Ok(())
    }

    async fn append(&self, data: &RenogyData, sampled_at: DateTime<Utc>) -> Result<()> {
        for sink in &self.sinks {
            sink.append(data, sampled_at).await?;
        }
        Ok(())
    }

    async fn delete_records_older_than(&self, days: u32) -> Result<()> {
        info!("deleting records older than {} days", days);
        for sink in &self.sinks {
            sink.delete_records_older_than(days).await?;
        }
        info!("deleted old records");
        Ok(())
    }

    /// Closes every sink even if some fail.
    async fn close(&self) -> Result<()> {
        for sink in &self.sinks {
            if let Err(err) = sink.close().await {
                warn!("failed to close {}: {:?}", sink, err);
            }
        }
        debug!("closed {}", self);
        Ok(())
    }
}

impl std::fmt::Display for CompositeSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let sinks: Vec<String> = self.sinks.iter().map(|s| s.to_string()).collect();
        write!(f, "CompositeSink([{}])", sinks.join(", "))
    }
}
