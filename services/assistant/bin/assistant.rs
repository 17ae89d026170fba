//! Main Entrypoint for the Kemet Assistant worker
//!
//! This binary is responsible for:
//! 1. Loading configuration and the persona.
//! 2. Initializing logging.
//! 3. Building the vehicle gateway (live or mock) and the tool set.
//! 4. Running one realtime session until it closes or Ctrl+C arrives.

use anyhow::Context;
use kemet_assistant::{config::Config, persona};
use kemet_core::{gateway::VehicleGateway, session::SessionOrchestrator, tools::VehicleTools};
use kemet_realtime::WebSocketTransport;
use std::sync::Arc;
use tracing::{error, info};

/// Resolves on `Ctrl+C`. If the handler cannot be installed the session
/// only ends on its own.
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to install Ctrl+C handler");
        std::future::pending::<()>().await;
    }
    info!("Received shutdown signal. Closing session...");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // --- 1. Load Configuration ---
    let config = Config::from_env().context("Failed to load configuration")?;

    // --- 2. Initialize Logging ---
    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
        .init();
    info!(
        provider = %config.realtime.provider,
        persona = %config.persona,
        "Configuration loaded. Starting Kemet Assistant..."
    );

    let persona = persona::load(
        config.persona,
        config.persona_path.as_deref(),
        config.voice.as_deref(),
    )
    .context("Failed to load persona")?;

    // --- 3. Vehicle Gateway and Tools ---
    let gateway = VehicleGateway::from_credentials(config.backend);
    info!(mode = ?gateway.mode(), "Vehicle gateway ready.");
    let tools = VehicleTools::new(Arc::new(gateway), config.vehicle_id);
    info!(vehicle_id = tools.vehicle_id(), "Vehicle tools ready.");

    // --- 4. Run the Session ---
    let transport = Arc::new(WebSocketTransport::new(config.realtime));
    let report = SessionOrchestrator::new(persona, tools, transport)
        .run(shutdown_signal())
        .await
        .context("Session failed")?;

    info!(
        reason = %report.close_reason,
        events = report.events_observed,
        "Session ended."
    );
    Ok(())
}
