//! kvgate - an in-memory key-value store behind an RPC service and an HTTP gateway
//!
//! - `StoreService` serves Store/Retrieve/Delete over a line-oriented TCP protocol
//! - `Gateway` maps `POST|GET|DELETE /kv/:key` onto those calls with a bounded timeout
//! - `MemoryStore` holds the mapping behind a shared-read/exclusive-write lock

pub mod backend;
pub mod cli;
pub mod client;
pub mod error;
pub mod gateway;
pub mod logging;
pub mod protocol;
pub mod server;
pub mod service;
pub mod store;

pub use backend::{Backend, RpcBackend};
pub use client::Client;
pub use error::{KvError, Result};
pub use gateway::{Gateway, GatewayConfig};
pub use protocol::{Reply, Request};
pub use server::{RpcServer, ServerConfig};
pub use service::StoreService;
pub use store::{MemoryStore, Store};
