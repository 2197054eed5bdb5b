use crate::prelude::*;
use crate::renogy::io::{Io, IoOpener};
use crate::renogy::modbus::RenogyModbusClient;

use async_trait::async_trait;
use std::time::Duration;

type ModbusClient = RenogyModbusClient<Box<dyn Io>>;

/// Keeps one pipe open for the whole life of the client, but throws it away on timeout; a
/// serial port that timed out once tends to keep timing out until it's reopened.
///
/// Failed reads are never retried here. The sampling loop calls again on its next tick anyway.
pub struct RetryOnTimeoutClient {
    opener: Box<dyn IoOpener>,
    timeout: Duration,
    device_address: u8,
    client: Option<ModbusClient>,
}

impl RetryOnTimeoutClient {
    pub fn new(opener: Box<dyn IoOpener>, timeout: Duration, device_address: u8) -> Result<Self> {
        if !(0x01..=0xf7).contains(&device_address) {
            bail!("invalid device address {}", device_address);
        }

        Ok(Self {
            opener,
            timeout,
            device_address,
            client: None,
        })
    }

    pub fn is_open(&self) -> bool {
        self.client.is_some()
    }

    async fn connect(&mut self) -> Result<&mut ModbusClient, RenogyError> {
        let client = match self.client.take() {
            Some(client) => client,
            None => {
                let mut io = self.opener.open().await?;
                io.drain_quietly().await;
                RenogyModbusClient::new(io, self.timeout, self.device_address)
                    .map_err(|err| RenogyError::Protocol(err.to_string()))?
            }
        };

        Ok(self.client.insert(client))
    }

    async fn mitigate<T>(&mut self, result: Result<T, RenogyError>) -> Result<T, RenogyError> {
        match result {
            Err(err) if err.is_timeout() => {
                warn!("{}: caught {}, closing the pipe", self, err);
                self.client = None;
                Err(err)
            }
            Err(err) if err.is_protocol() => {
                // leftover bytes would desync the next response
                warn!("{}: caught {}, draining the pipe", self, err);
                if let Some(client) = self.client.as_mut() {
                    client.io_mut().drain_quietly().await;
                }
                Err(err)
            }
            other => other,
        }
    }
}

#[async_trait]
impl RenogyClient for RetryOnTimeoutClient {
    async fn get_system_info(&mut self) -> Result<SystemInfo, RenogyError> {
        let result = match self.connect().await {
            Ok(client) => client.get_system_info().await,
            Err(err) => Err(err),
        };
        self.mitigate(result).await
    }

    async fn get_all_data(
        &mut self,
        cached_system_info: Option<&SystemInfo>,
    ) -> Result<RenogyData, RenogyError> {
        let result = match self.connect().await {
            Ok(client) => client.get_all_data(cached_system_info).await,
            Err(err) => Err(err),
        };
        self.mitigate(result).await
    }

    async fn close(&mut self) {
        if self.client.take().is_some() {
            info!("{}: closed", self);
        }
    }
}

impl std::fmt::Display for RetryOnTimeoutClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "RetryOnTimeoutClient({})", self.opener)
    }
}
