use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr, time::SystemTime};

use crate::error::{Result, TurtlUpError};

/// One accelerometer reading at one instant
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ImuSample {
    /// Acceleration along X
    pub ax: f64,
    /// Acceleration along Y
    pub ay: f64,
    /// Acceleration along Z
    pub az: f64,
}

impl ImuSample {
    /// Create a new sample
    #[must_use]
    pub const fn new(ax: f64, ay: f64, az: f64) -> Self {
        Self { ax, ay, az }
    }

    /// Largest per-axis absolute difference to `other`
    #[must_use]
    pub fn max_deviation(&self, other: &Self) -> f64 {
        (self.ax - other.ax)
            .abs()
            .max((self.ay - other.ay).abs())
            .max((self.az - other.az).abs())
    }
}

/// A decoded notification: an ordered group of samples captured together
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImuFrame {
    /// Unique identifier derived from the capture time
    pub id: String,
    /// When the notification carrying this frame arrived
    pub captured_at: SystemTime,
    /// Samples in device order, possibly empty
    pub samples: Vec<ImuSample>,
}

impl ImuFrame {
    /// Create a frame captured now
    #[must_use]
    pub fn new(id: impl Into<String>, samples: Vec<ImuSample>) -> Self {
        Self {
            id: id.into(),
            captured_at: SystemTime::now(),
            samples,
        }
    }

    /// First sample of the frame, if any
    #[must_use]
    pub fn first_sample(&self) -> Option<&ImuSample> {
        self.samples.first()
    }
}

/// Session connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    /// No connection, initial state
    Disconnected,
    /// Discovery and connection in progress
    Connecting,
    /// Connected and streaming
    Connected,
    /// Caller-initiated teardown in progress
    Disconnecting,
    /// A transport failure occurred, cleanup pending
    Error,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "Disconnected"),
            Self::Connecting => write!(f, "Connecting"),
            Self::Connected => write!(f, "Connected"),
            Self::Disconnecting => write!(f, "Disconnecting"),
            Self::Error => write!(f, "Error"),
        }
    }
}

/// Why the session last left the Connected state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DisconnectReason {
    /// The caller asked to disconnect
    Requested,
    /// The device dropped the connection
    Lost,
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Requested => write!(f, "requested"),
            Self::Lost => write!(f, "connection lost"),
        }
    }
}

/// Posture verdict for a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PostureClassification {
    /// No reference, no frame, or nothing to compare
    #[default]
    Unknown,
    /// Within threshold of the reference on every axis
    Good,
    /// Some axis exceeds the threshold
    Bad,
}

impl fmt::Display for PostureClassification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unknown => write!(f, "Unknown"),
            Self::Good => write!(f, "Good"),
            Self::Bad => write!(f, "Bad"),
        }
    }
}

/// How the device should alert the wearer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NotificationMode {
    /// Vibration only
    Vibration,
    /// App notification only
    App,
    /// Vibration and app notification
    Both,
}

impl fmt::Display for NotificationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Vibration => write!(f, "vibration"),
            Self::App => write!(f, "app"),
            Self::Both => write!(f, "both"),
        }
    }
}

impl FromStr for NotificationMode {
    type Err = TurtlUpError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "vibration" => Ok(Self::Vibration),
            "app" => Ok(Self::App),
            "both" => Ok(Self::Both),
            other => Err(TurtlUpError::InvalidParameters(format!(
                "Unknown notification mode: {other}"
            ))),
        }
    }
}

/// Which samples of a frame are compared against the reference
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ComparisonPolicy {
    /// Compare sample 0 of each frame only
    #[default]
    FirstSample,
    /// Compare samples pairwise over the shorter of the two frames
    AllSamples,
}

/// Connection parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionParams {
    /// Advertised name to look for, matched exactly or as a prefix
    pub device_name: String,
    /// How long to scan before giving up, in milliseconds
    pub scan_timeout_ms: u64,
    /// Interval between peripheral list checks while scanning
    pub scan_poll_ms: u64,
    /// Connection timeout in milliseconds
    pub connect_timeout_ms: u64,
    /// Timeout for a single acknowledged write
    pub write_timeout_ms: u64,
}

impl Default for ConnectionParams {
    fn default() -> Self {
        Self {
            device_name: crate::TURTLUP_DEVICE_NAME.to_string(),
            scan_timeout_ms: 10_000,
            scan_poll_ms: 250,
            connect_timeout_ms: 30_000,
            write_timeout_ms: 3_000,
        }
    }
}

/// Classification and history settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Maximum per-axis deviation still considered good posture
    pub threshold: f64,
    /// Number of classifications kept for statistics
    pub history_capacity: usize,
    /// Which samples are compared against the reference
    pub comparison: ComparisonPolicy,
    /// Send a vibration cue on bad posture
    pub feedback_enabled: bool,
    /// Buffered events per subscriber before lagging
    pub event_capacity: usize,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            threshold: 4.0,
            history_capacity: 100,
            comparison: ComparisonPolicy::FirstSample,
            feedback_enabled: true,
            event_capacity: 256,
        }
    }
}

impl MonitorConfig {
    /// Check the configuration for values the monitor cannot work with
    ///
    /// # Errors
    ///
    /// Returns [`TurtlUpError::InvalidParameters`] for a negative or non-finite
    /// threshold, or a zero capacity.
    pub fn validate(&self) -> Result<()> {
        if !self.threshold.is_finite() || self.threshold < 0.0 {
            return Err(TurtlUpError::InvalidParameters(format!(
                "threshold must be a finite, non-negative number, got {}",
                self.threshold
            )));
        }
        if self.history_capacity == 0 {
            return Err(TurtlUpError::InvalidParameters(
                "history capacity must be at least 1".to_string(),
            ));
        }
        if self.event_capacity == 0 {
            return Err(TurtlUpError::InvalidParameters(
                "event capacity must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
