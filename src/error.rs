use thiserror::Error;
use uuid::Uuid;

/// Errors that can occur when talking to a blood-pressure cuff
#[derive(Error, Debug)]
pub enum CuffError {
    /// Bluetooth Low Energy related errors
    #[error("BLE error: {0}")]
    Ble(#[from] btleplug::Error),

    /// No Bluetooth adapter, or the cuff is not known to the adapter
    #[error("Blood-pressure cuff not found")]
    DeviceNotFound,

    /// Device connection failed
    #[error("Failed to connect to device: {0}")]
    ConnectionFailed(String),

    /// The transport reported success but the link is not actually up
    #[error("Connection verification failed for {address}")]
    ConnectionVerificationFailed {
        /// Transport identity of the device
        address: String,
    },

    /// Device disconnected unexpectedly
    #[error("Device disconnected")]
    Disconnected,

    /// Operation timeout
    #[error("Operation timed out after {timeout_ms}ms")]
    Timeout {
        /// Timeout duration in milliseconds
        timeout_ms: u64,
    },

    /// A required GATT characteristic is missing
    #[error("Characteristic {0} not found")]
    CharacteristicNotFound(Uuid),

    /// A required GATT descriptor is missing
    #[error("Descriptor {descriptor} not found on characteristic {characteristic}")]
    DescriptorNotFound {
        /// Owning characteristic
        characteristic: Uuid,
        /// Missing descriptor
        descriptor: Uuid,
    },

    /// A revision string characteristic did not hold UTF-8
    #[error("Invalid version string: {0}")]
    InvalidVersionString(#[from] std::string::FromUtf8Error),

    /// The monitor has been stopped and will not run again
    #[error("Monitor stopped")]
    Stopped,
}

/// Result type for cuff operations
pub type Result<T> = std::result::Result<T, CuffError>;

impl CuffError {
    /// Check if this error indicates a connection issue
    #[must_use]
    pub const fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::Ble(_)
                | Self::ConnectionFailed(_)
                | Self::ConnectionVerificationFailed { .. }
                | Self::Disconnected
                | Self::DeviceNotFound
        )
    }

    /// Check if the session cycle can recover from this error by backing off
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        !matches!(self, Self::Stopped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        let connection_error = CuffError::ConnectionVerificationFailed {
            address: "AA:BB:CC:DD:EE:FF".to_string(),
        };
        assert!(connection_error.is_connection_error());
        assert!(connection_error.is_recoverable());

        let timeout_error = CuffError::Timeout { timeout_ms: 10_000 };
        assert!(!timeout_error.is_connection_error());
        assert!(timeout_error.is_recoverable());

        let stopped = CuffError::Stopped;
        assert!(!stopped.is_connection_error());
        assert!(!stopped.is_recoverable());
    }

    #[test]
    fn test_error_display() {
        let error = CuffError::ConnectionVerificationFailed {
            address: "AA:BB:CC:DD:EE:FF".to_string(),
        };
        let error_string = format!("{error}");
        assert!(error_string.contains("Connection verification failed"));
        assert!(error_string.contains("AA:BB:CC:DD:EE:FF"));

        let error = CuffError::Timeout { timeout_ms: 250 };
        assert_eq!(error.to_string(), "Operation timed out after 250ms");
    }

    #[test]
    fn test_utf8_error_conversion() {
        let err = String::from_utf8(vec![0xFF, 0xFE]).unwrap_err();
        let error: CuffError = err.into();
        assert!(matches!(error, CuffError::InvalidVersionString(_)));
    }
}
