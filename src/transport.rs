use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};

use crate::error::Result;

/// Inbound traffic from a connected device
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// Raw notification payload from the notify characteristic
    Data(Bytes),
    /// The device dropped the connection without a caller-initiated disconnect
    Lost,
}

/// Connect/write/notify capability over a wireless peripheral
///
/// Implementations own the resolved service and characteristic handles. A
/// successful [`Transport::connect`] returns the receiving half of the inbound
/// event channel; it closes after [`Transport::disconnect`] and does not emit
/// [`TransportEvent::Lost`] for a caller-initiated teardown.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Discover a device matching `name_filter`, connect, resolve the service
    /// and both characteristics, and subscribe to notifications
    ///
    /// # Errors
    ///
    /// Returns [`crate::TurtlUpError::Discovery`], [`crate::TurtlUpError::Connect`]
    /// or [`crate::TurtlUpError::ServiceResolution`] depending on which step failed.
    async fn connect(&self, name_filter: &str) -> Result<mpsc::UnboundedReceiver<TransportEvent>>;

    /// Write bytes to the write characteristic
    ///
    /// Writes are serialized: a write does not start before the previous one
    /// has been acknowledged or has failed.
    ///
    /// # Errors
    ///
    /// Returns [`crate::TurtlUpError::Write`] if nothing is connected or the
    /// write is rejected.
    async fn write(&self, data: &[u8]) -> Result<()>;

    /// Tear down the connection and clear resolved handles; idempotent
    ///
    /// # Errors
    ///
    /// Returns [`crate::TurtlUpError::Ble`] if the underlying disconnect fails.
    /// Handles are cleared regardless.
    async fn disconnect(&self) -> Result<()>;
}

/// Shared write path that lets one write reach the transport at a time
///
/// Commands from the caller and vibration cues from the feedback worker go
/// through the same writer, so they are ordered even over transports that do
/// not serialize writes themselves.
pub struct SerialWriter<T: Transport> {
    transport: Arc<T>,
    turn: Mutex<()>,
}

impl<T: Transport> SerialWriter<T> {
    /// Wrap `transport`
    #[must_use]
    pub fn new(transport: Arc<T>) -> Self {
        Self {
            transport,
            turn: Mutex::new(()),
        }
    }

    /// Write `data` once every earlier write has completed
    ///
    /// # Errors
    ///
    /// Propagates the error of [`Transport::write`].
    pub async fn write(&self, data: &[u8]) -> Result<()> {
        let _turn = self.turn.lock().await;
        self.transport.write(data).await
    }
}
