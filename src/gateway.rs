//! HTTP gateway translating REST calls into store service calls
//!
//! `POST|GET|DELETE /kv/:key`. Every backend call is bounded by the configured
//! timeout, and dropping the handler future (client went away) abandons it.

use crate::backend::{Backend, RpcBackend};
use crate::error::{KvError, Result};
use crate::protocol::{
    DeleteRequest, RetrieveRequest, StoreRequest, DEFAULT_MAX_VALUE_LEN,
};
use axum::{
    body::Bytes,
    extract::{rejection::BytesRejection, DefaultBodyLimit, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

/// Gateway configuration
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub bind_addr: String,
    pub upstream_addr: String,
    pub rpc_timeout: Duration,
    pub max_idle_connections: usize,
    /// Largest value accepted by `POST /kv/:key`, in bytes after JSON decoding
    pub max_value_len: usize,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8080".to_string(),
            upstream_addr: "127.0.0.1:50051".to_string(),
            rpc_timeout: Duration::from_secs(1),
            max_idle_connections: 16,
            max_value_len: DEFAULT_MAX_VALUE_LEN,
        }
    }
}

/// Body of `POST /kv/:key`
#[derive(Debug, Deserialize)]
pub struct StoreBody {
    pub value: String,
}

/// JSON body of every gateway response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ApiResponse {
    fn ok(key: String, message: String) -> Self {
        Self {
            success: true,
            key: Some(key),
            value: None,
            message: Some(message),
        }
    }

    fn found(key: String, value: String) -> Self {
        Self {
            success: true,
            key: Some(key),
            value: Some(value),
            message: None,
        }
    }

    fn not_found(key: String) -> Self {
        Self {
            success: false,
            key: Some(key),
            value: None,
            message: Some("not found".to_string()),
        }
    }

    fn failure(message: String) -> Self {
        Self {
            success: false,
            key: None,
            value: None,
            message: Some(message),
        }
    }
}

/// Failures a handler can return, all rendered as an [`ApiResponse`]
#[derive(Debug)]
pub enum ApiError {
    /// The backend call failed or rejected the request
    Kv(KvError),
    /// The HTTP request body could not be accepted
    Body { status: StatusCode, message: String },
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            // Only the caller's own input maps to 4xx. A malformed or oversized
            // reply from the upstream is a gateway-side fault.
            ApiError::Kv(KvError::InvalidRequest(_)) => StatusCode::BAD_REQUEST,
            ApiError::Kv(KvError::NotFound(_)) => StatusCode::NOT_FOUND,
            ApiError::Kv(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Body { status, .. } => *status,
        }
    }
}

impl From<KvError> for ApiError {
    fn from(err: KvError) -> Self {
        ApiError::Kv(err)
    }
}

impl From<BytesRejection> for ApiError {
    fn from(rejection: BytesRejection) -> Self {
        ApiError::Body {
            status: rejection.status(),
            message: format!("request body: {}", rejection.body_text()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match self {
            ApiError::Kv(err) => {
                if status.is_server_error() {
                    error!(error = %err, "backend call failed");
                }
                err.to_string()
            }
            ApiError::Body { message, .. } => message,
        };
        (status, Json(ApiResponse::failure(message))).into_response()
    }
}

type ApiResult = std::result::Result<(StatusCode, Json<ApiResponse>), ApiError>;

/// Request body limit for a given value limit
///
/// JSON escaping can grow a value up to six times (`\u0000`), plus the
/// surrounding object. The decoded value is checked exactly in the handler.
pub fn body_limit(max_value_len: usize) -> usize {
    max_value_len.saturating_mul(6).saturating_add(4096)
}

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    backend: Arc<dyn Backend>,
    rpc_timeout: Duration,
    max_value_len: usize,
}

impl AppState {
    pub fn new(backend: Arc<dyn Backend>, rpc_timeout: Duration) -> Self {
        Self {
            backend,
            rpc_timeout,
            max_value_len: DEFAULT_MAX_VALUE_LEN,
        }
    }

    pub fn with_max_value_len(mut self, max_value_len: usize) -> Self {
        self.max_value_len = max_value_len;
        self
    }

    /// Run a backend call under the configured deadline
    async fn call<T, F>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        match tokio::time::timeout(self.rpc_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(KvError::Timeout(self.rpc_timeout)),
        }
    }
}

pub fn router(state: AppState) -> Router {
    let limit = body_limit(state.max_value_len);
    Router::new()
        .route(
            "/kv/:key",
            post(store_value).get(retrieve_value).delete(delete_value),
        )
        .layer(DefaultBodyLimit::max(limit))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn store_value(
    State(state): State<AppState>,
    Path(key): Path<String>,
    body: std::result::Result<Bytes, BytesRejection>,
) -> ApiResult {
    let body: StoreBody = serde_json::from_slice(&body?)
        .map_err(|e| KvError::InvalidRequest(format!("request body: {}", e)))?;
    if body.value.len() > state.max_value_len {
        return Err(ApiError::Body {
            status: StatusCode::PAYLOAD_TOO_LARGE,
            message: format!(
                "value of {} bytes exceeds limit of {} bytes",
                body.value.len(),
                state.max_value_len
            ),
        });
    }

    let req = StoreRequest {
        key: key.clone(),
        value: body.value,
    };
    let response = state.call(state.backend.store(req)).await?;
    if !response.success {
        return Err(KvError::Internal(format!("store of key '{}' was rejected", key)).into());
    }

    let message = format!("key '{}' stored", key);
    Ok((StatusCode::OK, Json(ApiResponse::ok(key, message))))
}

async fn retrieve_value(State(state): State<AppState>, Path(key): Path<String>) -> ApiResult {
    let req = RetrieveRequest { key: key.clone() };
    let response = state.call(state.backend.retrieve(req)).await?;

    if response.found {
        Ok((StatusCode::OK, Json(ApiResponse::found(key, response.value))))
    } else {
        Ok((StatusCode::NOT_FOUND, Json(ApiResponse::not_found(key))))
    }
}

async fn delete_value(State(state): State<AppState>, Path(key): Path<String>) -> ApiResult {
    let req = DeleteRequest { key: key.clone() };
    let response = state.call(state.backend.delete(req)).await?;

    if response.success {
        let message = format!("key '{}' deleted", key);
        Ok((StatusCode::OK, Json(ApiResponse::ok(key, message))))
    } else {
        Ok((StatusCode::NOT_FOUND, Json(ApiResponse::not_found(key))))
    }
}

/// HTTP gateway server
pub struct Gateway {
    config: GatewayConfig,
    state: AppState,
    shutdown_tx: broadcast::Sender<()>,
}

impl Gateway {
    /// Gateway forwarding to the configured upstream store service
    pub fn new(config: GatewayConfig) -> Self {
        let backend = Arc::new(RpcBackend::new(
            config.upstream_addr.clone(),
            config.max_idle_connections,
        ));
        Self::with_backend(config, backend)
    }

    pub fn with_backend(config: GatewayConfig, backend: Arc<dyn Backend>) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        let state =
            AppState::new(backend, config.rpc_timeout).with_max_value_len(config.max_value_len);
        Self {
            config,
            state,
            shutdown_tx,
        }
    }

    pub fn router(&self) -> Router {
        router(self.state.clone())
    }

    /// Bind the configured address and serve until shutdown
    pub async fn run(&self) -> Result<()> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        self.serve(listener).await
    }

    /// Serve HTTP from an already bound listener until shutdown
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        let local_addr = listener.local_addr()?;
        info!(
            addr = %local_addr,
            upstream = %self.config.upstream_addr,
            timeout_ms = self.config.rpc_timeout.as_millis() as u64,
            "gateway listening"
        );

        let mut shutdown_rx = self.shutdown_tx.subscribe();
        axum::serve(listener, self.router())
            .with_graceful_shutdown(async move {
                if shutdown_rx.recv().await.is_err() {
                    warn!("gateway shutdown channel closed");
                }
                info!("shutdown signal received, stopping gateway");
            })
            .await?;

        info!("gateway stopped");
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
