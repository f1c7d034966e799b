use std::{env, time::Duration};
use tokio::time::sleep;
use tracing::{error, info};
use turtlup::{ConnectionParams, MonitorConfig, NotificationMode, PostureMonitor, Result};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt::init();

    let mode: NotificationMode = env::args()
        .nth(1)
        .as_deref()
        .unwrap_or("both")
        .parse()?;

    info!("⚙️  TurtlUp Device Settings Example");

    let monitor =
        PostureMonitor::with_ble(ConnectionParams::default(), MonitorConfig::default()).await?;

    if let Err(e) = monitor.connect().await {
        error!("❌ Failed to connect to device: {}", e);
        return Err(e);
    }

    info!("🔔 Setting notification mode to {}", mode);
    monitor.set_notification_mode(mode).await?;

    info!("📐 Asking the device to calibrate; hold your ideal posture");
    monitor.request_device_calibration().await?;
    sleep(Duration::from_secs(3)).await;

    monitor.disconnect().await?;
    info!("✅ Done");
    Ok(())
}
