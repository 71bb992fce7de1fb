use std::time::Duration;
use tokio::time::interval;
use tracing::{error, info};
use desklink::{BleTransport, DeskConfig, DeskService, Result};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt::init();

    info!("📊 desklink Status Monitor Example");

    let config = DeskConfig::from_env()?;
    let transport = BleTransport::new(&config).await?;
    let desk = DeskService::start(transport, &config).await;

    if let Err(e) = desk.connect().await {
        error!("❌ Failed to connect to desk: {}", e);
        return Err(e);
    }
    info!("✅ Connected to {}", config.address);
    info!("Move the desk with its hand switch; press Ctrl+C to stop monitoring");

    let mut ticker = interval(Duration::from_millis(500));
    let mut last_height = None;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = ticker.tick() => {
                let state = desk.get_state().await;
                if state.current_height_mm != last_height {
                    last_height = state.current_height_mm;
                    info!(
                        "📏 {}mm (speed {:?}, {})",
                        last_height.unwrap_or_default(),
                        state.speed,
                        state.connection_status
                    );
                }
                if !desk.is_connected().await {
                    error!("❌ Link lost: {:?}", state.last_error);
                    break;
                }
            }
        }
    }

    desk.shutdown().await;
    info!("👋 Monitor stopped");
    Ok(())
}
