//! Backends the gateway can forward store operations to

use crate::client::Client;
use crate::error::{KvError, Result};
use crate::protocol::{
    validate_key, DeleteRequest, DeleteResponse, Reply, Request, RetrieveRequest,
    RetrieveResponse, StoreRequest, StoreResponse,
};
use crate::service::StoreService;
use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;

/// Store operations as seen from the gateway
#[async_trait]
pub trait Backend: Send + Sync + 'static {
    async fn store(&self, req: StoreRequest) -> Result<StoreResponse>;

    async fn retrieve(&self, req: RetrieveRequest) -> Result<RetrieveResponse>;

    async fn delete(&self, req: DeleteRequest) -> Result<DeleteResponse>;
}

/// Calls the service directly, without a network hop
#[async_trait]
impl Backend for StoreService {
    async fn store(&self, req: StoreRequest) -> Result<StoreResponse> {
        StoreService::store(self, req).await
    }

    async fn retrieve(&self, req: RetrieveRequest) -> Result<RetrieveResponse> {
        StoreService::retrieve(self, req).await
    }

    async fn delete(&self, req: DeleteRequest) -> Result<DeleteResponse> {
        StoreService::delete(self, req).await
    }
}

/// Forwards calls to a remote store service over pooled connections
///
/// A connection goes back to the pool after any call that ended with a decoded
/// reply, error replies included. If the transport fails, or the call future is
/// dropped by a timeout, the connection is discarded, so a late reply can never
/// be read by the next caller.
///
/// Idle connections are checked before reuse. A pooled connection the server
/// closed before reading the request is replaced by one fresh dial; requests
/// that reached the server are never sent twice.
pub struct RpcBackend {
    addr: String,
    idle: Mutex<Vec<Client>>,
    max_idle: usize,
}

impl RpcBackend {
    pub fn new(addr: impl Into<String>, max_idle: usize) -> Self {
        Self {
            addr: addr.into(),
            idle: Mutex::new(Vec::new()),
            max_idle,
        }
    }

    /// Number of connections currently parked in the pool
    pub async fn idle_connections(&self) -> usize {
        self.idle.lock().await.len()
    }

    async fn dial(&self) -> Result<Client> {
        debug!(addr = %self.addr, "dialing store service");
        Client::connect(&self.addr).await
    }

    /// Take a live idle connection, or dial; the flag tells whether it was pooled
    async fn checkout(&self) -> Result<(Client, bool)> {
        let mut idle = self.idle.lock().await;
        while let Some(client) = idle.pop() {
            if client.is_reusable() {
                return Ok((client, true));
            }
            debug!(addr = %self.addr, "discarding closed idle connection");
        }
        drop(idle);
        Ok((self.dial().await?, false))
    }

    async fn checkin(&self, client: Client) {
        let mut idle = self.idle.lock().await;
        if idle.len() < self.max_idle {
            idle.push(client);
        }
    }

    /// Run one request, keeping the connection whenever a reply was decoded
    async fn call(&self, request: Request) -> Result<Reply> {
        validate_key(request.key())?;

        let (mut client, pooled) = self.checkout().await?;
        let reply = match client.call(&request).await {
            Err(KvError::ConnectionClosed) if pooled => {
                debug!(addr = %self.addr, "pooled connection was closed, redialing");
                client = self.dial().await?;
                client.call(&request).await?
            }
            result => result?,
        };
        self.checkin(client).await;

        match reply {
            Reply::Error(status) => Err(status.into()),
            reply => Ok(reply),
        }
    }
}

fn unexpected(op: &str, reply: Reply) -> KvError {
    KvError::Protocol(format!("Unexpected response for {}: {:?}", op, reply))
}

#[async_trait]
impl Backend for RpcBackend {
    async fn store(&self, req: StoreRequest) -> Result<StoreResponse> {
        match self.call(Request::Store(req)).await? {
            Reply::Success(success) => Ok(StoreResponse { success }),
            other => Err(unexpected("STORE", other)),
        }
    }

    async fn retrieve(&self, req: RetrieveRequest) -> Result<RetrieveResponse> {
        match self.call(Request::Retrieve(req)).await? {
            Reply::Retrieved(response) => Ok(response),
            other => Err(unexpected("RETRIEVE", other)),
        }
    }

    async fn delete(&self, req: DeleteRequest) -> Result<DeleteResponse> {
        match self.call(Request::Delete(req)).await? {
            Reply::Success(success) => Ok(DeleteResponse { success }),
            other => Err(unexpected("DELETE", other)),
        }
    }
}
