//! Store service binary
//!
//! Serves the RPC protocol until Ctrl+C

use clap::Parser;
use kvgate::{cli::ServerArgs, logging, Result, RpcServer, ServerConfig, StoreService};
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    logging::init_tracing();
    let config = ServerConfig::from(ServerArgs::parse());

    let server = Arc::new(RpcServer::new(config, StoreService::new()));

    let server_clone = Arc::clone(&server);
    tokio::spawn(async move {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "failed to listen for Ctrl+C");
            return;
        }

        info!("received Ctrl+C, initiating graceful shutdown");
        if let Err(e) = server_clone.shutdown() {
            error!(error = %e, "failed to initiate shutdown");
        }
    });

    server.run().await?;

    Ok(())
}
