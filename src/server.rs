//! TCP server hosting the store service
//!
//! One tokio task per connection, frames handled in order on each connection,
//! and a broadcast channel for graceful shutdown.

use crate::{
    error::{KvError, Result},
    protocol::{read_request, Reply, Status, StatusCode, DEFAULT_MAX_VALUE_LEN},
    service::StoreService,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::{
    io::{AsyncWrite, AsyncWriteExt, BufReader},
    net::{TcpListener, TcpStream},
    sync::{broadcast, Semaphore},
};
use tracing::{debug, error, info, warn};

/// RPC server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: String,
    pub max_connections: usize,
    pub max_value_len: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:50051".to_string(),
            max_connections: 1024,
            max_value_len: DEFAULT_MAX_VALUE_LEN,
        }
    }
}

pub struct RpcServer {
    config: ServerConfig,
    service: StoreService,
    connections: Arc<Semaphore>,
    shutdown_tx: broadcast::Sender<()>,
}

impl RpcServer {
    pub fn new(config: ServerConfig, service: StoreService) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        let connections = Arc::new(Semaphore::new(config.max_connections));
        Self {
            config,
            service,
            connections,
            shutdown_tx,
        }
    }

    pub fn service(&self) -> &StoreService {
        &self.service
    }

    /// Bind the configured address and serve until shutdown
    pub async fn run(&self) -> Result<()> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        self.serve(listener).await
    }

    /// Serve connections from an already bound listener until shutdown
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        let local_addr = listener.local_addr()?;
        info!(addr = %local_addr, "rpc server listening");

        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => self.spawn_connection(stream, addr),
                        Err(e) => {
                            error!(error = %e, "failed to accept connection");
                        }
                    }
                }

                _ = shutdown_rx.recv() => {
                    info!("shutdown signal received, stopping rpc server");
                    break;
                }
            }
        }

        info!("rpc server stopped");
        Ok(())
    }

    fn spawn_connection(&self, mut stream: TcpStream, addr: SocketAddr) {
        let Ok(permit) = Arc::clone(&self.connections).try_acquire_owned() else {
            warn!(peer = %addr, limit = self.config.max_connections, "connection limit reached");
            tokio::spawn(async move {
                let reply = Reply::Error(Status::new(
                    StatusCode::Unavailable,
                    "too many connections",
                ));
                let _ = stream.write_all(&reply.to_bytes()).await;
                let _ = stream.shutdown().await;
            });
            return;
        };

        debug!(peer = %addr, "client connected");
        let service = self.service.clone();
        let shutdown_rx = self.shutdown_tx.subscribe();
        let max_value_len = self.config.max_value_len;

        tokio::spawn(async move {
            if let Err(e) = Self::handle_client(stream, service, max_value_len, shutdown_rx).await
            {
                warn!(peer = %addr, error = %e, "connection closed with error");
            }
            debug!(peer = %addr, "client disconnected");
            drop(permit);
        });
    }

    /// Serve frames from one connection until it closes or shutdown fires
    async fn handle_client(
        mut stream: TcpStream,
        service: StoreService,
        max_value_len: usize,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) -> Result<()> {
        let (reader, mut writer) = stream.split();
        let mut reader = BufReader::new(reader);

        loop {
            tokio::select! {
                result = read_request(&mut reader, max_value_len) => {
                    match result {
                        Ok(None) => break,
                        Ok(Some(request)) => {
                            let reply = service.handle(request).await;
                            Self::write_reply(&mut writer, &reply).await?;
                        }
                        Err(KvError::Io(e)) => return Err(KvError::Io(e)),
                        Err(e) => {
                            let reply = Reply::Error(Status::from(&e));
                            Self::write_reply(&mut writer, &reply).await?;
                            if !e.is_recoverable() {
                                return Err(e);
                            }
                        }
                    }
                }

                _ = shutdown_rx.recv() => {
                    debug!("closing client connection for shutdown");
                    break;
                }
            }
        }

        Ok(())
    }

    async fn write_reply<W>(writer: &mut W, reply: &Reply) -> Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        writer.write_all(&reply.to_bytes()).await?;
        writer.flush().await?;
        Ok(())
    }

    /// Trigger graceful shutdown
    pub fn shutdown(&self) -> Result<()> {
        self.shutdown_tx
            .send(())
            .map_err(|_| KvError::Server("Failed to send shutdown signal".to_string()))?;
        Ok(())
    }
}
