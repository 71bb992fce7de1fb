use tracing::{info, warn};
use desklink::{BleTransport, DeskConfig, DeskService, Result};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt::init();

    info!("🔖 desklink Presets Example");

    let config = DeskConfig::from_env()?;
    let transport = BleTransport::new(&config).await?;
    let desk = DeskService::start(transport, &config).await;
    let presets = desk.presets();

    for preset in presets.list().await.values() {
        info!("  {:10} {}mm", preset.name, preset.height_mm);
    }

    presets.create("Reading", 1150).await?;
    presets.update("Reading", 1120).await?;

    // Names are unique
    if let Err(e) = presets.create("Standing", 1200).await {
        warn!("⚠️ {}", e);
    }

    let outcome = desk.apply_preset("Reading").await?;
    info!("✅ Recalling 'Reading': {:?}", outcome);
    info!("Active preset: {:?}", desk.get_state().await.active_preset);

    presets.delete("Reading").await?;
    info!("Presets left: {:?}", presets.list().await.keys().collect::<Vec<_>>());

    desk.shutdown().await;
    Ok(())
}
