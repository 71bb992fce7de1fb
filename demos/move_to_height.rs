use std::time::Duration;
use tokio::time::{interval, timeout};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use desklink::{BleTransport, DeskConfig, DeskService, MovePhase, Result};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging, RUST_LOG=desklink=debug for command traces
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("🪑 desklink Move To Height Example");

    let target_mm: i32 = std::env::args()
        .nth(1)
        .and_then(|arg| arg.parse().ok())
        .unwrap_or(1050);

    let config = DeskConfig::from_env()?;
    info!("Desk {} ({}..={}mm)", config.address, config.bounds.min_mm, config.bounds.max_mm);

    let transport = BleTransport::new(&config).await?;
    let desk = DeskService::start(transport, &config).await;

    info!("⬆️ Moving to {}mm...", target_mm);
    match desk.set_height(target_mm).await {
        Ok(outcome) => info!("✅ Move accepted: {:?}", outcome),
        Err(e) => {
            error!("❌ Failed to start move: {}", e);
            desk.shutdown().await;
            return Err(e);
        }
    }

    // Watch the move until the control loop settles
    let mut ticker = interval(Duration::from_millis(250));
    let settled = timeout(Duration::from_secs(30), async {
        loop {
            ticker.tick().await;
            let state = desk.get_state().await;
            if let Some(height_mm) = state.current_height_mm {
                info!("📏 {}mm ({})", height_mm, state.phase);
            }
            if matches!(state.phase, MovePhase::Idle | MovePhase::Error) {
                return state;
            }
        }
    })
    .await;

    match settled {
        Ok(state) if state.phase == MovePhase::Idle => {
            info!("✅ Desk stopped at {:?}mm", state.current_height_mm);
        }
        Ok(state) => {
            warn!("⚠️ Move ended in error: {:?}", state.last_error);
        }
        Err(_) => {
            warn!("⚠️ Desk still moving after 30s, stopping");
            desk.stop().await?;
        }
    }

    desk.shutdown().await;
    info!("🏁 Example completed");
    Ok(())
}
