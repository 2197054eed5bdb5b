use crate::prelude::*;
use crate::state_file::StateFileWriter;

use std::sync::Mutex;
use std::time::Duration;
use tokio::time::MissedTickBehavior;

pub type SharedClient = Arc<tokio::sync::Mutex<Box<dyn RenogyClient>>>;

#[derive(Debug, Default, Clone)]
pub struct SampleStats {
    pub polls: u64,
    pub poll_failures: u64,
    pub timeouts: u64,
    pub protocol_errors: u64,
    pub state_file_errors: u64,
    pub appends: u64,
    pub append_failures: u64,
    pub last_error: Option<String>,
}

impl SampleStats {
    pub fn print_summary(&self) {
        info!("Sample Statistics:");
        info!("  Polls: {}", self.polls);
        info!("  Poll failures: {}", self.poll_failures);
        info!("    Timeouts: {}", self.timeouts);
        info!("    Protocol errors: {}", self.protocol_errors);
        info!("  State file errors: {}", self.state_file_errors);
        info!("  Sinks:");
        info!("    Appends: {}", self.appends);
        info!("    Failures: {}", self.append_failures);
        if let Some(err) = &self.last_error {
            info!("  Last error: {}", err);
        }
    }
}

/// The sampling loop: polls the device every `poll_interval`, overwrites the state file and
/// hands the sample to the sinks in the background.
pub struct Coordinator {
    config: ConfigWrapper,
    client: SharedClient,
    sink: Arc<dyn Sink>,
    executor: BackgroundTaskExecutor,
    state_file: StateFileWriter,
    system_info: Option<SystemInfo>,
    pub stats: Arc<Mutex<SampleStats>>,
}

impl Coordinator {
    pub fn new(
        config: ConfigWrapper,
        client: SharedClient,
        sink: Arc<dyn Sink>,
        executor: BackgroundTaskExecutor,
    ) -> Result<Self> {
        let state_file = StateFileWriter::new(&config.state_file())?;

        Ok(Self {
            config,
            client,
            sink,
            executor,
            state_file,
            system_info: None,
            stats: Arc::new(Mutex::new(SampleStats::default())),
        })
    }

    pub fn stats(&self) -> SampleStats {
        self.stats.lock().map(|s| s.clone()).unwrap_or_default()
    }

    /// Budget for one background append, covering every retry of the sink stack.
    fn append_deadline(&self) -> Duration {
        let retry = self.config.retry();
        self.config
            .sink_timeout()
            .saturating_add(retry.backoff())
            .saturating_mul(retry.times().saturating_add(1))
    }

    pub async fn start(&mut self, mut shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        {
            let mut client = self.client.lock().await;
            info!("accessing solar controller via {}", client);
            match client.get_system_info().await {
                Ok(info) => {
                    info!("solar controller: {:?}", info);
                    self.system_info = Some(info);
                }
                Err(err) => warn!("failed to read system info, will retry: {}", err),
            }
        }

        self.sink.init().await?;
        if let Err(err) = self
            .sink
            .delete_records_older_than(self.config.prune_log())
            .await
        {
            error!("failed to prune old records: {:?}", err);
        }

        info!(
            "polling every {:?}; writing status to {}, appending data to {}",
            self.config.poll_interval(),
            self.state_file.path().display(),
            self.sink
        );

        let mut interval = tokio::time::interval(self.config.poll_interval());
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = interval.tick() => self.poll().await,
                _ = shutdown_rx.recv() => break,
            }
        }

        info!("coordinator exiting");
        Ok(())
    }

    /// One tick of the loop. Failures are logged and counted; the loop never stops on them.
    pub async fn poll(&mut self) {
        self.executor.cleanup();

        debug!("getting all data");
        let result = {
            let mut client = self.client.lock().await;
            client.get_all_data(self.system_info.as_ref()).await
        };
        let sampled_at = Utils::utc();

        let data = match result {
            Ok(data) => data,
            Err(err) => {
                warn!("poll failed: {}", err);
                if let Ok(mut stats) = self.stats.lock() {
                    stats.polls += 1;
                    stats.poll_failures += 1;
                    if err.is_timeout() {
                        stats.timeouts += 1;
                    } else if err.is_protocol() {
                        stats.protocol_errors += 1;
                    }
                    stats.last_error = Some(err.to_string());
                }
                return;
            }
        };

        if let Ok(mut stats) = self.stats.lock() {
            stats.polls += 1;
        }
        if self.system_info.is_none() {
            self.system_info = Some(data.system_info.clone());
        }

        debug!("writing data to {}", self.state_file.path().display());
        if let Err(err) = self.state_file.write(&data).await {
            warn!("{:?}", err);
            if let Ok(mut stats) = self.stats.lock() {
                stats.state_file_errors += 1;
            }
        }

        // a slow sink must not delay the next poll
        let sink = self.sink.clone();
        let stats = self.stats.clone();
        self.executor
            .submit("append", self.append_deadline(), async move {
                debug!("logging data to {}", sink);
                let result = sink.append(&data, sampled_at).await;
                if let Ok(mut stats) = stats.lock() {
                    match &result {
                        Ok(()) => stats.appends += 1,
                        Err(err) => {
                            stats.append_failures += 1;
                            stats.last_error = Some(err.to_string());
                        }
                    }
                }
                result
            });
    }

    pub async fn stop(&self) {
        self.client.lock().await.close().await;
        // let in-flight appends finish before the sinks go away
        self.executor.close().await;
        if let Err(err) = self.sink.close().await {
            warn!("failed to close {}: {:?}", self.sink, err);
        }
        self.stats().print_summary();
    }
}
