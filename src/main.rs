use tokio::signal;
use tracing_subscriber::EnvFilter;

use fleet_gateway::config::GatewayConfig;
use fleet_gateway::core::gateway::{Dispatcher, Gateway};
use fleet_gateway::error::GatewayError;

#[tokio::main]
async fn main() -> Result<(), GatewayError> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // Load configuration from the environment
    let config = GatewayConfig::from_env();

    tracing::info!(
        backends = config.backends.len(),
        "starting fleet gateway on {}:{}",
        config.server.host,
        config.server.port
    );

    // Build the dispatcher; route-to-backend references are validated here
    let gateway = Dispatcher::from_config(config)?;

    // Start the server
    gateway.start().await?;
    tracing::info!("fleet gateway started successfully");

    // Wait for Ctrl+C
    signal::ctrl_c()
        .await
        .map_err(|e| GatewayError::InternalError(format!("failed to listen for ctrl-c: {}", e)))?;
    tracing::info!("shutdown signal received, stopping fleet gateway");

    // Stop the gateway
    gateway.stop().await?;
    tracing::info!("fleet gateway stopped");

    Ok(())
}
