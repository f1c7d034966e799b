use async_trait::async_trait;
use btleplug::{
    api::{
        BDAddr, Central, CentralEvent, Characteristic, Manager as _, Peripheral as _, ScanFilter,
        WriteType,
    },
    platform::{Adapter, Manager, Peripheral},
};
use bytes::Bytes;
use futures::stream::StreamExt;
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::{
    sync::{mpsc, Mutex},
    task::JoinHandle,
    time::{timeout, Instant},
};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    error::{Result, TurtlUpError},
    transport::{Transport, TransportEvent},
    types::ConnectionParams,
    TURTLUP_NOTIFY_CHAR_UUID, TURTLUP_SERVICE_UUID, TURTLUP_WRITE_CHAR_UUID,
};

/// Check an advertised name against the discovery filter
///
/// Accepts an exact match or a name that starts with the filter.
#[must_use]
pub fn matches_device_name(advertised: &str, filter: &str) -> bool {
    advertised == filter || advertised.starts_with(filter)
}

fn parse_uuid(value: &str, what: &str) -> Result<Uuid> {
    Uuid::parse_str(value)
        .map_err(|e| TurtlUpError::ServiceResolution(format!("Invalid {what} UUID: {e}")))
}

/// BLE transport for TurtlUp devices built on `btleplug`
pub struct BleTransport {
    manager: Manager,
    params: ConnectionParams,
    link: Mutex<Option<BleLink>>,
}

/// Resolved handles for one live connection
struct BleLink {
    peripheral: Peripheral,
    write_char: Characteristic,
    pump: JoinHandle<()>,
    closing: Arc<AtomicBool>,
}

impl BleTransport {
    /// Create a new BLE transport
    ///
    /// # Errors
    ///
    /// Returns [`TurtlUpError::Ble`] if the Bluetooth manager cannot be initialized.
    pub async fn new(params: ConnectionParams) -> Result<Self> {
        let manager = Manager::new().await?;

        Ok(Self {
            manager,
            params,
            link: Mutex::new(None),
        })
    }

    /// Address of the connected device, if any
    pub async fn address(&self) -> Option<BDAddr> {
        self.link
            .lock()
            .await
            .as_ref()
            .map(|link| link.peripheral.address())
    }

    /// Scan until a peripheral advertising a matching name shows up
    async fn discover(&self, central: &Adapter, name_filter: &str) -> Result<Peripheral> {
        info!("Scanning for device named {name_filter:?}...");

        central
            .start_scan(ScanFilter::default())
            .await
            .map_err(|e| TurtlUpError::Discovery(format!("Failed to start scan: {e}")))?;

        let deadline = Instant::now() + Duration::from_millis(self.params.scan_timeout_ms);
        let found = loop {
            if let Some(peripheral) = Self::find_matching(central, name_filter).await? {
                break Some(peripheral);
            }
            if Instant::now() >= deadline {
                break None;
            }
            tokio::time::sleep(Duration::from_millis(self.params.scan_poll_ms)).await;
        };

        if let Err(e) = central.stop_scan().await {
            warn!("Failed to stop scan: {e}");
        }

        found.ok_or_else(|| {
            TurtlUpError::Discovery(format!(
                "No device named {name_filter:?} found within {}ms",
                self.params.scan_timeout_ms
            ))
        })
    }

    async fn find_matching(central: &Adapter, name_filter: &str) -> Result<Option<Peripheral>> {
        let peripherals = central
            .peripherals()
            .await
            .map_err(|e| TurtlUpError::Discovery(e.to_string()))?;

        for peripheral in peripherals {
            if let Ok(Some(properties)) = peripheral.properties().await {
                if let Some(name) = &properties.local_name {
                    if matches_device_name(name, name_filter) {
                        info!("Found device: {name} ({})", properties.address);
                        return Ok(Some(peripheral));
                    }
                }
            }
        }

        Ok(None)
    }

    /// Resolve the service and both characteristics on a connected peripheral
    async fn resolve(peripheral: &Peripheral) -> Result<(Characteristic, Characteristic)> {
        peripheral
            .discover_services()
            .await
            .map_err(|e| TurtlUpError::ServiceResolution(format!("Service discovery failed: {e}")))?;

        let service_uuid = parse_uuid(TURTLUP_SERVICE_UUID, "service")?;
        let write_uuid = parse_uuid(TURTLUP_WRITE_CHAR_UUID, "write characteristic")?;
        let notify_uuid = parse_uuid(TURTLUP_NOTIFY_CHAR_UUID, "notify characteristic")?;

        let services = peripheral.services();
        let service = services
            .iter()
            .find(|s| s.uuid == service_uuid)
            .ok_or_else(|| {
                TurtlUpError::ServiceResolution("TurtlUp service not found".to_string())
            })?;

        let write_char = service
            .characteristics
            .iter()
            .find(|c| c.uuid == write_uuid)
            .ok_or_else(|| {
                TurtlUpError::ServiceResolution("Write characteristic not found".to_string())
            })?
            .clone();

        let notify_char = service
            .characteristics
            .iter()
            .find(|c| c.uuid == notify_uuid)
            .ok_or_else(|| {
                TurtlUpError::ServiceResolution("Notify characteristic not found".to_string())
            })?
            .clone();

        Ok((write_char, notify_char))
    }
}

#[async_trait]
impl Transport for BleTransport {
    async fn connect(&self, name_filter: &str) -> Result<mpsc::UnboundedReceiver<TransportEvent>> {
        let mut link = self.link.lock().await;
        if let Some(stale) = link.take() {
            debug!("Replacing stale link before connecting");
            if let Err(e) = stale.close().await {
                warn!("Failed to close stale link: {e}");
            }
        }

        let adapters = self.manager.adapters().await.map_err(adapter_error)?;
        let central = adapters
            .into_iter()
            .next()
            .ok_or_else(|| TurtlUpError::Discovery("No Bluetooth adapter available".to_string()))?;

        let peripheral = self.discover(&central, name_filter).await?;

        timeout(
            Duration::from_millis(self.params.connect_timeout_ms),
            peripheral.connect(),
        )
        .await
        .map_err(|_| {
            TurtlUpError::Connect(format!(
                "Connection timed out after {}ms",
                self.params.connect_timeout_ms
            ))
        })?
        .map_err(|e| TurtlUpError::Connect(e.to_string()))?;

        let (write_char, notify_char) = match Self::resolve(&peripheral).await {
            Ok(chars) => chars,
            Err(e) => {
                release(&peripheral).await;
                return Err(e);
            }
        };

        let subscribed = async {
            let notifications = peripheral.notifications().await?;
            let central_events = central.events().await?;
            peripheral.subscribe(&notify_char).await?;
            Ok::<_, btleplug::Error>((notifications, central_events))
        }
        .await;
        let (notifications, central_events) = match subscribed {
            Ok(streams) => streams,
            Err(e) => {
                release(&peripheral).await;
                return Err(TurtlUpError::ServiceResolution(format!(
                    "Failed to subscribe to notifications: {e}"
                )));
            }
        };

        let (sender, receiver) = mpsc::unbounded_channel();
        let closing = Arc::new(AtomicBool::new(false));
        let pump = tokio::spawn(pump_notifications(
            peripheral.clone(),
            notify_char.uuid,
            notifications,
            central_events,
            sender,
            closing.clone(),
        ));

        info!("Connected to TurtlUp at {}", peripheral.address());

        *link = Some(BleLink {
            peripheral,
            write_char,
            pump,
            closing,
        });

        Ok(receiver)
    }

    async fn write(&self, data: &[u8]) -> Result<()> {
        // Held across the acknowledged write so writes never overlap.
        let link = self.link.lock().await;
        let link = link
            .as_ref()
            .ok_or_else(|| TurtlUpError::Write("Write characteristic not resolved".to_string()))?;

        debug!("Writing {:?}", String::from_utf8_lossy(data));

        timeout(
            Duration::from_millis(self.params.write_timeout_ms),
            link.peripheral
                .write(&link.write_char, data, WriteType::WithResponse),
        )
        .await
        .map_err(|_| {
            TurtlUpError::Write(format!(
                "Write timed out after {}ms",
                self.params.write_timeout_ms
            ))
        })?
        .map_err(|e| TurtlUpError::Write(e.to_string()))
    }

    async fn disconnect(&self) -> Result<()> {
        let link = self.link.lock().await.take();
        match link {
            Some(link) => {
                info!("Disconnecting from {}", link.peripheral.address());
                link.close().await
            }
            None => Ok(()),
        }
    }
}

/// Failing to reach the host adapter means nothing can be discovered
fn adapter_error(e: btleplug::Error) -> TurtlUpError {
    TurtlUpError::Discovery(format!("Failed to list adapters: {e}"))
}

/// Drop a half-set-up connection after a failed connect step
async fn release(peripheral: &Peripheral) {
    if let Err(e) = peripheral.disconnect().await {
        warn!("Failed to release {} after a failed connect: {e}", peripheral.address());
    }
}

impl BleLink {
    async fn close(self) -> Result<()> {
        self.closing.store(true, Ordering::SeqCst);
        self.pump.abort();
        self.peripheral.disconnect().await?;
        Ok(())
    }
}

/// Forward notifications until the link closes, then report an unexpected drop
async fn pump_notifications(
    peripheral: Peripheral,
    notify_uuid: Uuid,
    mut notifications: std::pin::Pin<
        Box<dyn futures::Stream<Item = btleplug::api::ValueNotification> + Send>,
    >,
    mut central_events: std::pin::Pin<Box<dyn futures::Stream<Item = CentralEvent> + Send>>,
    sender: mpsc::UnboundedSender<TransportEvent>,
    closing: Arc<AtomicBool>,
) {
    let peripheral_id = peripheral.id();
    let mut watching_central = true;

    loop {
        tokio::select! {
            notification = notifications.next() => match notification {
                Some(n) if n.uuid == notify_uuid => {
                    if sender.send(TransportEvent::Data(Bytes::from(n.value))).is_err() {
                        return;
                    }
                }
                Some(_) => {}
                None => break,
            },
            event = central_events.next(), if watching_central => match event {
                Some(CentralEvent::DeviceDisconnected(id)) if id == peripheral_id => break,
                Some(_) => {}
                None => watching_central = false,
            },
        }
    }

    if !closing.load(Ordering::SeqCst) {
        warn!("Device {} dropped the connection", peripheral.address());
        let _ = sender.send(TransportEvent::Lost);
    }
}
