//! Store operations exposed as request/response RPCs
//!
//! Absence of a key is reported as data (`found = false`, `success = false`).
//! Only `delete_strict` turns it into a `NotFound` error, for callers that want
//! the absence signalled through the status code instead.

use crate::error::{KvError, Result};
use crate::protocol::{
    validate_key, DeleteRequest, DeleteResponse, Reply, Request, RetrieveRequest,
    RetrieveResponse, Status, StoreRequest, StoreResponse,
};
use crate::store::{MemoryStore, Store};
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Clone, Default)]
pub struct StoreService {
    store: Arc<MemoryStore>,
}

impl StoreService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Service over a store seeded with `entries`
    pub fn with_entries<I>(entries: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        Self::from_store(Arc::new(MemoryStore::with_entries(entries)))
    }

    pub fn from_store(store: Arc<MemoryStore>) -> Self {
        Self { store }
    }

    /// The backing store
    pub fn store_handle(&self) -> &Arc<MemoryStore> {
        &self.store
    }

    pub async fn store(&self, req: StoreRequest) -> Result<StoreResponse> {
        validate_key(&req.key)?;
        debug!(key = %req.key, len = req.value.len(), "store");
        self.store.set(req.key, req.value).await?;
        Ok(StoreResponse { success: true })
    }

    pub async fn retrieve(&self, req: RetrieveRequest) -> Result<RetrieveResponse> {
        validate_key(&req.key)?;
        let response = match self.store.get(&req.key).await? {
            Some(value) => RetrieveResponse { value, found: true },
            None => RetrieveResponse::default(),
        };
        debug!(key = %req.key, found = response.found, "retrieve");
        Ok(response)
    }

    pub async fn delete(&self, req: DeleteRequest) -> Result<DeleteResponse> {
        validate_key(&req.key)?;
        let existed = self.store.delete(&req.key).await?;
        debug!(key = %req.key, existed, "delete");
        Ok(DeleteResponse { success: existed })
    }

    /// Like [`delete`](Self::delete), but an absent key is a `NotFound` error
    pub async fn delete_strict(&self, req: DeleteRequest) -> Result<DeleteResponse> {
        let key = req.key.clone();
        let response = self.delete(req).await?;
        if !response.success {
            return Err(KvError::NotFound(format!("key '{}' not found", key)));
        }
        Ok(response)
    }

    /// Execute a decoded request, folding failures into an error reply
    pub async fn handle(&self, request: Request) -> Reply {
        let result = match request {
            Request::Store(req) => self.store(req).await.map(|r| Reply::Success(r.success)),
            Request::Retrieve(req) => self.retrieve(req).await.map(Reply::Retrieved),
            Request::Delete(req) => self.delete(req).await.map(|r| Reply::Success(r.success)),
            Request::DeleteStrict(req) => self
                .delete_strict(req)
                .await
                .map(|r| Reply::Success(r.success)),
        };
        result.unwrap_or_else(|err| {
            if !matches!(err, KvError::NotFound(_)) {
                warn!(error = %err, "request failed");
            }
            Reply::Error(Status::from(&err))
        })
    }
}
