pub mod dummy;
pub mod fix_daily_stats;
pub mod io;
pub mod modbus;
pub mod packet;
pub mod retry_on_timeout;

use crate::prelude::*;

use async_trait::async_trait;

/// Pulls data out of a Renogy device. Not safe for concurrent exchanges; callers serialize
/// access (the coordinator keeps the client behind a mutex).
#[async_trait]
pub trait RenogyClient: Send + std::fmt::Display {
    async fn get_system_info(&mut self) -> Result<SystemInfo, RenogyError>;

    /// Retrieves everything in one go. [`SystemInfo`] is usually fetched once and cached;
    /// pass it as `cached_system_info` to skip those reads.
    async fn get_all_data(
        &mut self,
        cached_system_info: Option<&SystemInfo>,
    ) -> Result<RenogyData, RenogyError>;

    async fn close(&mut self) {}
}

#[async_trait]
impl<T: RenogyClient + ?Sized> RenogyClient for Box<T> {
    async fn get_system_info(&mut self) -> Result<SystemInfo, RenogyError> {
        (**self).get_system_info().await
    }

    async fn get_all_data(
        &mut self,
        cached_system_info: Option<&SystemInfo>,
    ) -> Result<RenogyData, RenogyError> {
        (**self).get_all_data(cached_system_info).await
    }

    async fn close(&mut self) {
        (**self).close().await
    }
}
