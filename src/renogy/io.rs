use crate::prelude::*;

use async_trait::async_trait;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_serial::{SerialPortBuilderExt, SerialStream};

pub const DEFAULT_BAUD_RATE: u32 = 9600;
const DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

/// A blocking-style byte pipe. A timeout is always reported as [`RenogyError::Timeout`],
/// never as a generic I/O error.
///
/// A zero timeout waits forever.
#[async_trait]
pub trait Io: Send + std::fmt::Debug {
    /// Reads exactly `bytes` bytes.
    async fn read(&mut self, bytes: usize, timeout: Duration) -> Result<Vec<u8>, RenogyError>;

    /// Writes all of `bytes`.
    async fn write(&mut self, bytes: &[u8], timeout: Duration) -> Result<(), RenogyError>;

    /// Reads and discards everything until the pipe stays silent for `timeout`.
    async fn drain(&mut self, timeout: Duration) -> Result<(), RenogyError> {
        loop {
            match self.read(128, timeout).await {
                Ok(_) => continue,
                Err(RenogyError::Timeout(_)) => return Ok(()),
                Err(err) => return Err(err),
            }
        }
    }

    async fn drain_quietly(&mut self) {
        debug!("draining {:?}", self);
        if let Err(err) = self.drain(DRAIN_TIMEOUT).await {
            warn!("failed to drain {:?}: {}", self, err);
        }
    }
}

#[async_trait]
impl<T: Io + ?Sized> Io for Box<T> {
    async fn read(&mut self, bytes: usize, timeout: Duration) -> Result<Vec<u8>, RenogyError> {
        (**self).read(bytes, timeout).await
    }

    async fn write(&mut self, bytes: &[u8], timeout: Duration) -> Result<(), RenogyError> {
        (**self).write(bytes, timeout).await
    }
}

/// Opens and configures a fresh [`Io`]; used by the reconnecting client each time the
/// previous pipe was dropped.
#[async_trait]
pub trait IoOpener: Send + Sync + std::fmt::Display {
    async fn open(&self) -> Result<Box<dyn Io>, RenogyError>;
}

// SerialPortIo {{{
pub struct SerialPortIo {
    path: String,
    port: SerialStream,
}

impl std::fmt::Debug for SerialPortIo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SerialPortIo({})", self.path)
    }
}

impl SerialPortIo {
    /// Opens `path` as 8N1 without flow control.
    pub fn open(path: &str, baud_rate: u32) -> Result<Self, RenogyError> {
        let port = tokio_serial::new(path, baud_rate)
            .data_bits(tokio_serial::DataBits::Eight)
            .parity(tokio_serial::Parity::None)
            .stop_bits(tokio_serial::StopBits::One)
            .flow_control(tokio_serial::FlowControl::None)
            .open_native_async()
            .map_err(|err| {
                RenogyError::Io(std::io::Error::other(format!(
                    "failed to open serial port {}: {}",
                    path, err
                )))
            })?;

        info!("opened serial port {} @{} baud", path, baud_rate);

        Ok(Self {
            path: path.to_string(),
            port,
        })
    }
}

#[async_trait]
impl Io for SerialPortIo {
    async fn read(&mut self, bytes: usize, timeout: Duration) -> Result<Vec<u8>, RenogyError> {
        let mut buf = vec![0u8; bytes];
        if bytes == 0 {
            return Ok(buf);
        }

        let result = if timeout.is_zero() {
            self.port.read_exact(&mut buf).await
        } else {
            match tokio::time::timeout(timeout, self.port.read_exact(&mut buf)).await {
                Ok(result) => result,
                Err(_) => {
                    return Err(RenogyError::Timeout(format!(
                        "{}: timeout reading data; expected to read {} bytes within {:?}",
                        self.path, bytes, timeout
                    )))
                }
            }
        };

        match result {
            Ok(_) => {
                trace!("{} RX: {}", self.path, Utils::to_hex(&buf));
                Ok(buf)
            }
            Err(err) if err.kind() == std::io::ErrorKind::TimedOut => {
                Err(RenogyError::Timeout(format!("{}: {}", self.path, err)))
            }
            Err(err) => Err(RenogyError::Io(err)),
        }
    }

    async fn write(&mut self, bytes: &[u8], timeout: Duration) -> Result<(), RenogyError> {
        trace!("{} TX: {}", self.path, Utils::to_hex(bytes));

        let port = &mut self.port;
        let write = async move {
            port.write_all(bytes).await?;
            port.flush().await
        };

        let result = if timeout.is_zero() {
            write.await
        } else {
            match tokio::time::timeout(timeout, write).await {
                Ok(result) => result,
                Err(_) => {
                    return Err(RenogyError::Timeout(format!(
                        "{}: timeout writing {} bytes within {:?}",
                        self.path,
                        bytes.len(),
                        timeout
                    )))
                }
            }
        };

        match result {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::TimedOut => {
                Err(RenogyError::Timeout(format!("{}: {}", self.path, err)))
            }
            Err(err) => Err(RenogyError::Io(err)),
        }
    }
}

pub struct SerialPortOpener {
    path: String,
    baud_rate: u32,
}

impl SerialPortOpener {
    pub fn new(path: &str, baud_rate: u32) -> Self {
        Self {
            path: path.to_string(),
            baud_rate,
        }
    }
}

impl std::fmt::Display for SerialPortOpener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.path)
    }
}

#[async_trait]
impl IoOpener for SerialPortOpener {
    async fn open(&self) -> Result<Box<dyn Io>, RenogyError> {
        Ok(Box::new(SerialPortIo::open(&self.path, self.baud_rate)?))
    }
} // }}}
