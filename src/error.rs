use thiserror::Error;

/// Errors that can occur while monitoring posture through a TurtlUp device
#[derive(Error, Debug)]
pub enum TurtlUpError {
    /// Bluetooth Low Energy related errors
    #[error("BLE error: {0}")]
    Ble(#[from] btleplug::Error),

    /// No matching device was found during scanning
    #[error("Device discovery failed: {0}")]
    Discovery(String),

    /// Transport connection could not be established
    #[error("Failed to connect to device: {0}")]
    Connect(String),

    /// Service or characteristic missing on the connected device
    #[error("Service resolution failed: {0}")]
    ServiceResolution(String),

    /// Write to the command characteristic failed
    #[error("Write failed: {0}")]
    Write(String),

    /// Notification payload could not be decoded into a frame
    #[error("Failed to decode frame: {0}")]
    Decode(String),

    /// Device dropped the connection without being asked to
    #[error("Transport connection lost")]
    TransportLost,

    /// Operation requires an established connection
    #[error("Not connected to a device")]
    NotConnected,

    /// No frame has been received yet
    #[error("No IMU frame received yet")]
    NoFrame,

    /// Invalid configuration or command parameters
    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),
}

/// Result type for TurtlUp operations
pub type Result<T> = std::result::Result<T, TurtlUpError>;

impl TurtlUpError {
    /// Check if this error indicates a connection issue
    #[must_use]
    pub const fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::Ble(_)
                | Self::Discovery(_)
                | Self::Connect(_)
                | Self::ServiceResolution(_)
                | Self::TransportLost
        )
    }

    /// Check if this error leaves the session usable
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Decode(_) | Self::Write(_) | Self::NoFrame | Self::NotConnected
        )
    }
}
