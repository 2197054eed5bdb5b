pub use crate::config::{self, Config, ConfigWrapper};
pub use crate::error::{RenogyError, TaskError};
pub use crate::executor::BackgroundTaskExecutor;
pub use crate::renogy::{
    self,
    packet::{
        ChargingState, ControllerFault, DailyStats, HistoricalData, PowerStatus, ProductType,
        RenogyData, RenogyStatus, SystemInfo,
    },
    RenogyClient,
};
pub use crate::sink::{self, Sink};
pub use crate::utils::Utils;

pub use anyhow::{anyhow, bail, Error, Result};
pub use log::{debug, error, info, trace, warn};
pub use std::str::FromStr;
pub use std::sync::Arc;
pub use tokio::sync::broadcast;
