use crate::prelude::*;
use crate::renogy::io::Io;

use async_trait::async_trait;
use bytes::{BufMut, BytesMut};
use std::time::Duration;

pub const COMMAND_READ_REGISTER: u8 = 0x03;
const ERROR_FLAG: u8 = 0x80;
const MAX_DATA_LENGTH: usize = 0xfa;

// register map {{{
pub const REGISTER_SYSTEM_RATINGS: u16 = 0x000a;
pub const REGISTER_PRODUCT_MODEL: u16 = 0x000c;
pub const REGISTER_VERSIONS: u16 = 0x0014;
pub const REGISTER_SERIAL_NUMBER: u16 = 0x0018;
pub const REGISTER_POWER_STATUS: u16 = 0x0100;
pub const REGISTER_DAILY_STATS: u16 = 0x010b;
pub const REGISTER_HISTORICAL_DATA: u16 = 0x0115;
pub const REGISTER_STATUS: u16 = 0x0120;
// }}}

/// Talks the register protocol over `io`. Does not own the connection lifecycle; see
/// [`crate::renogy::retry_on_timeout::RetryOnTimeoutClient`] for that.
#[derive(Debug)]
pub struct RenogyModbusClient<I: Io> {
    io: I,
    timeout: Duration,
    device_address: u8,
}

impl<I: Io> RenogyModbusClient<I> {
    /// `device_address` must be 0x01..=0xF7; 0x00 is the broadcast address to which
    /// all slaves respond without replying.
    pub fn new(io: I, timeout: Duration, device_address: u8) -> Result<Self> {
        if !(0x01..=0xf7).contains(&device_address) {
            bail!(
                "{}: device address must be 0x01..0xf7, 0x00 is a broadcast address",
                device_address
            );
        }
        Ok(Self {
            io,
            timeout,
            device_address,
        })
    }

    pub fn io(&self) -> &I {
        &self.io
    }

    pub fn io_mut(&mut self) -> &mut I {
        &mut self.io
    }

    pub fn into_io(self) -> I {
        self.io
    }

    /// Builds the 8-byte "read holding registers" request.
    pub fn request_frame(device_address: u8, start_address: u16, words: u16) -> Vec<u8> {
        let mut frame = BytesMut::with_capacity(8);
        frame.put_u8(device_address);
        frame.put_u8(COMMAND_READ_REGISTER);
        frame.put_u16(start_address);
        frame.put_u16(words);
        let crc = Utils::crc16(&frame);
        frame.put_u16_le(crc);
        frame.to_vec()
    }

    fn verify_crc(header: &[u8], data: &[u8], crc: &[u8]) -> Result<(), RenogyError> {
        let mut frame = Vec::with_capacity(header.len() + data.len());
        frame.extend_from_slice(header);
        frame.extend_from_slice(data);
        let expected = Utils::crc16(&frame);
        let actual = u16::from_le_bytes([crc[0], crc[1]]);
        if expected != actual {
            return Err(RenogyError::Checksum { expected, actual });
        }
        Ok(())
    }

    /// Performs one register read and returns the data payload.
    pub async fn read_register(
        &mut self,
        start_address: u16,
        byte_count: usize,
    ) -> Result<Vec<u8>, RenogyError> {
        if start_address > 0x1000 {
            return Err(RenogyError::Protocol(format!(
                "{}: start address must be 0..0x1000",
                start_address
            )));
        }
        let words = byte_count / 2;
        if byte_count % 2 != 0 || !(0x01..=0x7d).contains(&words) {
            return Err(RenogyError::Protocol(format!(
                "{}: byte count must be even and map to 0x0001..0x007D words",
                byte_count
            )));
        }

        let request = Self::request_frame(self.device_address, start_address, words as u16);
        self.io.write(&request, self.timeout).await?;

        let header = self.io.read(3, self.timeout).await?;
        if header[0] != self.device_address {
            return Err(RenogyError::Protocol(format!(
                "{:x}: invalid response: expected device address {} but got {}",
                start_address, self.device_address, header[0]
            )));
        }

        if header[1] == COMMAND_READ_REGISTER | ERROR_FLAG {
            // the third byte is the error code; verify the frame before trusting it
            let crc = self.io.read(2, self.timeout).await?;
            Self::verify_crc(&header, &[], &crc)?;
            return Err(RenogyError::Device { code: header[2] });
        }

        if header[1] != COMMAND_READ_REGISTER {
            return Err(RenogyError::Protocol(format!(
                "{:x}: unexpected response code: expected {} but got {}",
                start_address, COMMAND_READ_REGISTER, header[1]
            )));
        }

        let data_length = header[2] as usize;
        if data_length != byte_count {
            return Err(RenogyError::Protocol(format!(
                "{:x}: the call was expected to return {} bytes but got {}",
                start_address, byte_count, data_length
            )));
        }
        if !(1..=MAX_DATA_LENGTH).contains(&data_length) {
            return Err(RenogyError::Protocol(format!(
                "{:x}: data length must be 0x01..0xFA but was {}",
                start_address, data_length
            )));
        }

        let data = self.io.read(data_length, self.timeout).await?;
        let crc = self.io.read(2, self.timeout).await?;
        Self::verify_crc(&header, &data, &crc)?;

        Ok(data)
    }

    pub async fn get_power_status(&mut self) -> Result<PowerStatus, RenogyError> {
        debug!("getting power status");
        let data = self.read_register(REGISTER_POWER_STATUS, 20).await?;
        PowerStatus::decode(&data)
    }

    pub async fn get_daily_stats(&mut self) -> Result<DailyStats, RenogyError> {
        debug!("getting daily stats");
        let data = self.read_register(REGISTER_DAILY_STATS, 20).await?;
        DailyStats::decode(&data)
    }

    pub async fn get_historical_data(&mut self) -> Result<HistoricalData, RenogyError> {
        debug!("getting historical data");
        let data = self.read_register(REGISTER_HISTORICAL_DATA, 22).await?;
        HistoricalData::decode(&data)
    }

    pub async fn get_status(&mut self) -> Result<RenogyStatus, RenogyError> {
        debug!("getting status");
        let data = self.read_register(REGISTER_STATUS, 6).await?;
        RenogyStatus::decode(&data)
    }
}

#[async_trait]
impl<I: Io> RenogyClient for RenogyModbusClient<I> {
    async fn get_system_info(&mut self) -> Result<SystemInfo, RenogyError> {
        debug!("getting system info");
        let ratings = self.read_register(REGISTER_SYSTEM_RATINGS, 4).await?;
        let model = self.read_register(REGISTER_PRODUCT_MODEL, 16).await?;
        let versions = self.read_register(REGISTER_VERSIONS, 8).await?;
        let serial = self.read_register(REGISTER_SERIAL_NUMBER, 4).await?;
        SystemInfo::decode(&ratings, &model, &versions, &serial)
    }

    async fn get_all_data(
        &mut self,
        cached_system_info: Option<&SystemInfo>,
    ) -> Result<RenogyData, RenogyError> {
        let system_info = match cached_system_info {
            Some(info) => info.clone(),
            None => self.get_system_info().await?,
        };

        Ok(RenogyData {
            system_info,
            power_status: self.get_power_status().await?,
            daily_stats: self.get_daily_stats().await?,
            historical_data: self.get_historical_data().await?,
            status: self.get_status().await?,
        })
    }
}

impl<I: Io> std::fmt::Display for RenogyModbusClient<I> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "RenogyModbusClient(io={:?}, device_address={})",
            self.io, self.device_address
        )
    }
}
