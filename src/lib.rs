pub mod config;
pub mod coordinator;
pub mod error;
pub mod executor;
pub mod options;
pub mod prelude;
pub mod renogy;
pub mod scheduler;
pub mod sink;
pub mod state_file;
pub mod utils;

const CARGO_PKG_VERSION: &str = env!("CARGO_PKG_VERSION");

use crate::coordinator::Coordinator;
use crate::options::Options;
use crate::prelude::*;
use crate::renogy::dummy::DummyRenogyClient;
use crate::renogy::fix_daily_stats::FixDailyStatsClient;
use crate::renogy::io::SerialPortOpener;
use crate::renogy::retry_on_timeout::RetryOnTimeoutClient;
use crate::scheduler::Scheduler;
use crate::sink::{
    CompositeSink, CsvSink, DatabaseSink, InfluxSink, RetryingSink, StdoutCsvSink, TimeoutSink,
};

use std::time::Duration;

pub fn init_logging(level: &str) {
    use std::io::Write;

    if let Err(err) = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format(|buf, record| {
            writeln!(
                buf,
                "[{} {} {}] {}",
                chrono::Local::now().format("%Y-%m-%dT%H:%M:%S%.3f"),
                record.level(),
                record.module_path().unwrap_or(""),
                record.args()
            )
        })
        .write_style(env_logger::WriteStyle::Never)
        .try_init()
    {
        eprintln!("failed to initialise logging: {}", err);
    }
}

/// The serial stack: reopen on timeout, then fix the daily counters on top.
pub fn build_client(config: &ConfigWrapper) -> Result<Box<dyn RenogyClient>> {
    if config.is_dummy() {
        info!("using dummy solar controller");
        return Ok(Box::new(DummyRenogyClient::new()));
    }

    let opener = SerialPortOpener::new(&config.device(), config.baud_rate());
    let client = RetryOnTimeoutClient::new(Box::new(opener), config.timeout(), config.device_address())?;

    Ok(Box::new(FixDailyStatsClient::new(client)))
}

// build_sink {{{
fn guard(sink: Arc<dyn Sink>, config: &ConfigWrapper, executor: &BackgroundTaskExecutor) -> Box<dyn Sink> {
    let retry = config.retry();
    let timeout = TimeoutSink::new(sink, config.sink_timeout(), executor.clone());

    Box::new(RetryingSink::new(Box::new(timeout), retry.times(), retry.backoff()))
}

/// Every enabled sink, each behind its own timeout and retry. Without any configured sink
/// the samples are printed to stdout as CSV.
pub fn build_sink(config: &ConfigWrapper, executor: &BackgroundTaskExecutor) -> Result<CompositeSink> {
    let mut composite = CompositeSink::new(Vec::new());

    if let Some(csv) = config.csv() {
        composite.push(guard(Arc::new(CsvSink::new(csv.path(), csv.utc())), config, executor));
    }

    if let Some(stdout) = config.stdout() {
        composite.push(guard(Arc::new(StdoutCsvSink::new(stdout.utc())), config, executor));
    }

    for database in config.enabled_databases() {
        composite.push(guard(Arc::new(DatabaseSink::new(database)), config, executor));
    }

    if let Some(influx) = config.influx() {
        composite.push(guard(Arc::new(InfluxSink::new(influx)?), config, executor));
    }

    if composite.is_empty() {
        info!("no sinks configured, printing samples to stdout");
        composite.push(guard(Arc::new(StdoutCsvSink::new(false)), config, executor));
    }

    Ok(composite)
} // }}}

/// `--status`: one full read, pretty JSON on stdout.
pub async fn print_status(config: &ConfigWrapper) -> Result<()> {
    let mut client = build_client(config)?;
    let result = client.get_all_data(None).await;
    client.close().await;

    println!("{}", result?.to_json(true)?);
    Ok(())
}

pub async fn app(shutdown_tx: broadcast::Sender<()>, config: ConfigWrapper) -> Result<()> {
    let executor = BackgroundTaskExecutor::new();

    let client = Arc::new(tokio::sync::Mutex::new(build_client(&config)?));
    let sink: Arc<dyn Sink> = Arc::new(build_sink(&config, &executor)?);

    let scheduler = Scheduler::new(config.clone(), sink.clone(), executor.clone());
    let scheduler_rx = shutdown_tx.subscribe();
    let scheduler_handle = tokio::spawn(async move {
        if let Err(err) = scheduler.start(scheduler_rx).await {
            error!("scheduler failed: {:?}", err);
        }
    });

    let mut coordinator = Coordinator::new(config, client, sink, executor)?;
    let result = coordinator.start(shutdown_tx.subscribe()).await;
    if let Err(err) = &result {
        error!("coordinator failed: {:?}", err);
        let _ = shutdown_tx.send(());
    }

    coordinator.stop().await;
    if let Err(err) = scheduler_handle.await {
        error!("error waiting for scheduler: {}", err);
    }

    info!("shutdown complete");
    result
}

pub async fn run(options: Options) -> Result<()> {
    let config = ConfigWrapper::new(options.config_file.clone())?;

    init_logging(&config.loglevel());
    info!("renogy-bridge {} starting with {}", CARGO_PKG_VERSION, options.config_file);
    config.log_summary();

    if options.status {
        return print_status(&config).await;
    }

    let (shutdown_tx, _) = broadcast::channel(1);

    let ctrl_c_tx = shutdown_tx.clone();
    tokio::spawn(async move {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!("failed to listen for ctrl+c: {}", err);
        }
        info!("ctrl+c received, shutting down");
        let _ = ctrl_c_tx.send(());
    });

    if let Some(secs) = options.runtime {
        let runtime_tx = shutdown_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(secs)).await;
            info!("runtime of {}s elapsed, shutting down", secs);
            let _ = runtime_tx.send(());
        });
    }

    app(shutdown_tx, config).await
}
