use std::time::Duration;
use thiserror::Error;

/// Failure of a single register exchange with the device.
///
/// `Timeout` is the only variant the transport layer treats as a broken link; everything
/// else means the link is fine but this particular exchange went wrong.
#[derive(Debug, Error)]
pub enum RenogyError {
    #[error("{0}")]
    Protocol(String),

    #[error("0x{code:x}: {}", RenogyError::describe_code(*code))]
    Device { code: u8 },

    #[error("Checksum mismatch: expected {expected:x} but got {actual:x}")]
    Checksum { expected: u16, actual: u16 },

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl RenogyError {
    /// Maps the status byte of an exception response to its documented cause.
    pub fn describe_code(code: u8) -> &'static str {
        match code {
            0x01 => "Function code not supported",
            0x02 => "PDU start address is not correct or PDU start address + data length",
            0x03 => "Data length in reading or writing register is too large",
            0x04 => "Client fails to read or write register",
            0x05 => "Data check code sent by server is not correct",
            _ => "Unknown",
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, RenogyError::Timeout(_))
    }

    /// The exchange failed but the link is assumed healthy.
    pub fn is_protocol(&self) -> bool {
        matches!(
            self,
            RenogyError::Protocol(_) | RenogyError::Device { .. } | RenogyError::Checksum { .. }
        )
    }
}

/// Failures reported by the background executor itself, as opposed to failures of the task body.
#[derive(Debug, Error)]
pub enum TaskError {
    #[error("task '{name}' did not finish within {deadline:?} and was cancelled")]
    Timeout { name: String, deadline: Duration },

    #[error("task '{name}' was cancelled")]
    Cancelled { name: String },

    #[error("task '{name}' panicked")]
    Panicked { name: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_error_message_names_the_code() {
        let err = RenogyError::Device { code: 0x02 };
        assert_eq!(
            err.to_string(),
            "0x2: PDU start address is not correct or PDU start address + data length"
        );
        assert!(err.is_protocol());
        assert!(!err.is_timeout());
    }

    #[test]
    fn unknown_device_code() {
        assert_eq!(RenogyError::Device { code: 0x42 }.to_string(), "0x42: Unknown");
    }

    #[test]
    fn checksum_message_carries_both_values() {
        let err = RenogyError::Checksum { expected: 0x4bb2, actual: 0x1234 };
        assert_eq!(err.to_string(), "Checksum mismatch: expected 4bb2 but got 1234");
    }
}
