use std::time::Duration;
use tokio::time::interval;
use tracing::{error, info, warn};
use turtlup::{
    ConnectionParams, MonitorConfig, MonitorEvent, PostureClassification, PostureMonitor, Result,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt::init();

    info!("🐢 TurtlUp Posture Monitor Example");
    info!("Searching for TurtlUp devices...");

    let monitor =
        PostureMonitor::with_ble(ConnectionParams::default(), MonitorConfig::default()).await?;
    let mut events = monitor.subscribe();

    if let Err(e) = monitor.connect().await {
        error!("❌ Failed to connect to device: {}", e);
        return Err(e);
    }
    match monitor.device_address().await {
        Some(address) => info!("✅ Connected to {}", address),
        None => info!("✅ Connected"),
    }
    info!("Sit up straight: the first frame received becomes your reference posture");

    let mut report = interval(Duration::from_secs(10));

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(MonitorEvent::ImuFrame(_)) if monitor.reference().await.is_none() => {
                    match monitor.capture_reference().await {
                        Ok(reference) => info!("📐 Reference captured from {}", reference.id),
                        Err(e) => warn!("Could not capture reference: {}", e),
                    }
                }
                Ok(MonitorEvent::Classification(PostureClassification::Bad)) => {
                    println!("⚠️  Bad posture - straighten up!");
                }
                Ok(MonitorEvent::Classification(PostureClassification::Good)) => {
                    println!("✅ Good posture");
                }
                Ok(MonitorEvent::Disconnected { reason }) => {
                    warn!("❌ Device disconnected ({})", reason);
                    break;
                }
                Ok(_) => {}
                Err(e) => {
                    warn!("Event stream interrupted: {}", e);
                }
            },
            _ = report.tick() => {
                let elapsed = monitor.connected_for().await.unwrap_or_default();
                println!(
                    "\n📊 {:02}:{:02}  {}",
                    elapsed.as_secs() / 60,
                    elapsed.as_secs() % 60,
                    monitor.stats().await
                );
            }
            _ = tokio::signal::ctrl_c() => {
                info!("🔌 Disconnecting...");
                if let Err(e) = monitor.disconnect().await {
                    error!("❌ Failed to disconnect: {}", e);
                }
                break;
            }
        }
    }

    println!("\n📊 Final Session Summary:");
    println!("  {}", monitor.stats().await);
    Ok(())
}
