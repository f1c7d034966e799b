#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(rust_2018_idioms)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

//! # TurtlUp
//!
//! Posture monitoring for the TurtlUp wearable over Bluetooth Low Energy.
//!
//! The device streams accelerometer frames as JSON text notifications. This
//! crate connects to it, decodes each notification into an [`ImuFrame`],
//! compares it against a reference posture captured by the wearer, keeps a
//! bounded history of good/bad verdicts and sends a vibration cue back to the
//! device whenever posture is bad.
//!
//! ## Device Protocol
//!
//! - **Discovery**: advertised name `TurtlUp` (exact or prefix match)
//! - **Notify characteristic**: UTF-8 JSON `{"data":[{"ax":..,"ay":..,"az":..}, ...]}`
//! - **Write characteristic**: UTF-8 text commands `CALIBRATE`,
//!   `MODE:<vibration|app|both>` and `VIBRATE`
//!
//! ## Quick Start
//!
//! ```no_run
//! use turtlup::{ConnectionParams, MonitorConfig, MonitorEvent, PostureMonitor};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let monitor =
//!         PostureMonitor::with_ble(ConnectionParams::default(), MonitorConfig::default()).await?;
//!     let mut events = monitor.subscribe();
//!
//!     monitor.connect().await?;
//!
//!     while let Ok(event) = events.recv().await {
//!         match event {
//!             MonitorEvent::ImuFrame(_) if monitor.reference().await.is_none() => {
//!                 // Sit up straight first: the first frame becomes the baseline.
//!                 monitor.capture_reference().await?;
//!             }
//!             MonitorEvent::HistoryChanged(stats) => println!("{stats}"),
//!             MonitorEvent::Disconnected { .. } => break,
//!             _ => {}
//!         }
//!     }
//!
//!     Ok(())
//! }
//! ```

/// Bluetooth Low Energy transport
pub mod ble;
/// Reference comparison and posture classification
pub mod classifier;
/// Error types and handling
pub mod error;
/// Vibration cues on bad posture
pub mod feedback;
/// Bounded classification history and statistics
pub mod history;
/// Session orchestration and public monitoring interface
pub mod monitor;
/// Device commands and notification decoding
pub mod protocol;
/// Connection lifecycle state machine
pub mod session;
/// Posture state: current frame, reference and history
pub mod tracker;
/// Transport abstraction over the wireless peripheral
pub mod transport;
/// Type definitions and data structures
pub mod types;

// Re-export the main types for convenient usage
pub use ble::BleTransport;
pub use error::{Result, TurtlUpError};
pub use history::HistoryStats;
pub use monitor::{MonitorEvent, PostureMonitor};
pub use protocol::Command;
pub use transport::{Transport, TransportEvent};
pub use types::{
    ComparisonPolicy, ConnectionParams, ConnectionState, DisconnectReason, ImuFrame, ImuSample,
    MonitorConfig, NotificationMode, PostureClassification,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Advertised device name used for discovery
pub const TURTLUP_DEVICE_NAME: &str = "TurtlUp";

/// TurtlUp vendor-specific GATT service UUID
pub const TURTLUP_SERVICE_UUID: &str = "12345678-1234-1234-1234-123456789abc";

/// Write characteristic UUID for app-to-device text commands
pub const TURTLUP_WRITE_CHAR_UUID: &str = "ef015678-1234-1234-1234-abcdef123456";

/// Notify characteristic UUID for device-to-app IMU frames
pub const TURTLUP_NOTIFY_CHAR_UUID: &str = "abcd1234-1234-1234-1234-abcdef123456";
