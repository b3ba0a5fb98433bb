//! HTTP gateway binary
//!
//! Forwards REST calls to the store service until Ctrl+C

use clap::Parser;
use kvgate::{cli::GatewayArgs, logging, Gateway, GatewayConfig, Result};
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    logging::init_tracing();
    let config = GatewayConfig::from(GatewayArgs::parse());

    let gateway = Arc::new(Gateway::new(config));

    let gateway_clone = Arc::clone(&gateway);
    tokio::spawn(async move {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "failed to listen for Ctrl+C");
            return;
        }

        info!("received Ctrl+C, initiating graceful shutdown");
        if let Err(e) = gateway_clone.shutdown() {
            error!(error = %e, "failed to initiate shutdown");
        }
    });

    gateway.run().await?;

    Ok(())
}
