use crate::prelude::*;

use chrono::{DateTime, Local, TimeZone};
use std::time::Duration;

/// Every day at local midnight.
pub const PRUNE_CRON: &str = "0 0 * * *";
const PRUNE_DEADLINE: Duration = Duration::from_secs(3600);

/// Prunes old records from the sinks once a day.
pub struct Scheduler {
    config: ConfigWrapper,
    sink: Arc<dyn Sink>,
    executor: BackgroundTaskExecutor,
}

impl Scheduler {
    pub fn new(config: ConfigWrapper, sink: Arc<dyn Sink>, executor: BackgroundTaskExecutor) -> Self {
        Self {
            config,
            sink,
            executor,
        }
    }

    pub fn next_run<TZ: TimeZone>(cron: &str, now: &DateTime<TZ>) -> Result<DateTime<TZ>> {
        cron_parser::parse(cron, now).map_err(|err| anyhow!("bad cron expression {}: {:?}", cron, err))
    }

    /// Hands one prune job to the executor.
    pub fn prune(&self) {
        let sink = self.sink.clone();
        let days = self.config.prune_log();
        self.executor.submit("prune old records", PRUNE_DEADLINE, async move {
            info!("pruning records older than {} days", days);
            sink.delete_records_older_than(days).await
        });
    }

    pub async fn start(&self, mut shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        loop {
            let now = Local::now();
            let next = Self::next_run(PRUNE_CRON, &now)?;
            let wait = (next - now).to_std().unwrap_or(Duration::ZERO);
            debug!("next prune at {} (in {:?})", next, wait);

            tokio::select! {
                _ = tokio::time::sleep(wait) => self.prune(),
                _ = shutdown_rx.recv() => {
                    info!("scheduler exiting");
                    return Ok(());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{FixedOffset, Timelike};

    #[test]
    fn next_run_is_the_following_midnight() -> Result<()> {
        let tz = FixedOffset::east_opt(3600).unwrap();
        let now = tz.with_ymd_and_hms(2023, 3, 1, 10, 15, 0).unwrap();
        let next = Scheduler::next_run(PRUNE_CRON, &now)?;
        assert_eq!(next, tz.with_ymd_and_hms(2023, 3, 2, 0, 0, 0).unwrap());
        assert_eq!(next.hour(), 0);
        Ok(())
    }

    #[test]
    fn rejects_garbage() {
        let now = Local::now();
        assert!(Scheduler::next_run("not a cron", &now).is_err());
    }
}
