//! Command-line and environment configuration for the binaries

use crate::gateway::GatewayConfig;
use crate::protocol::DEFAULT_MAX_VALUE_LEN;
use crate::server::ServerConfig;
use clap::{Args, Parser, Subcommand};
use std::time::Duration;

/// Run the store service over TCP
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct ServerArgs {
    /// Address the RPC listener binds to
    #[arg(long, env = "KVGATE_RPC_ADDR", default_value = "127.0.0.1:50051")]
    pub listen: String,

    /// Connections served at once; extra connections are refused
    #[arg(long, default_value_t = 1024)]
    pub max_connections: usize,

    /// Largest value accepted in a single frame, in bytes
    #[arg(long, default_value_t = DEFAULT_MAX_VALUE_LEN)]
    pub max_value_len: usize,
}

impl From<ServerArgs> for ServerConfig {
    fn from(args: ServerArgs) -> Self {
        Self {
            bind_addr: args.listen,
            max_connections: args.max_connections,
            max_value_len: args.max_value_len,
        }
    }
}

/// Run the HTTP gateway in front of a store service
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct GatewayArgs {
    /// Address the HTTP listener binds to
    #[arg(long, env = "KVGATE_HTTP_ADDR", default_value = "127.0.0.1:8080")]
    pub listen: String,

    /// Address of the store service
    #[arg(long, env = "KVGATE_UPSTREAM_ADDR", default_value = "127.0.0.1:50051")]
    pub upstream: String,

    /// Deadline for each call to the store service, in milliseconds
    #[arg(long, env = "KVGATE_RPC_TIMEOUT_MS", default_value_t = 1000)]
    pub timeout_ms: u64,

    /// Idle upstream connections kept for reuse
    #[arg(long, default_value_t = 16)]
    pub max_idle_connections: usize,

    /// Largest value accepted by `POST /kv/:key`, in bytes
    #[arg(long, default_value_t = DEFAULT_MAX_VALUE_LEN)]
    pub max_value_len: usize,
}

impl From<GatewayArgs> for GatewayConfig {
    fn from(args: GatewayArgs) -> Self {
        Self {
            bind_addr: args.listen,
            upstream_addr: args.upstream,
            rpc_timeout: Duration::from_millis(args.timeout_ms),
            max_idle_connections: args.max_idle_connections,
            max_value_len: args.max_value_len,
        }
    }
}

/// Talk to a store service from the command line
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct ClientArgs {
    /// Address of the store service
    #[arg(long, env = "KVGATE_RPC_ADDR", default_value = "127.0.0.1:50051")]
    pub server: String,

    #[command(subcommand)]
    pub command: ClientCommand,
}

#[derive(Subcommand, Debug)]
pub enum ClientCommand {
    /// Set a key to a value
    Store { key: String, value: String },
    /// Print the value of a key
    Retrieve { key: String },
    /// Remove a key
    Delete(DeleteArgs),
}

#[derive(Args, Debug)]
pub struct DeleteArgs {
    pub key: String,

    /// Fail with a not-found error instead of reporting success=false
    #[arg(long)]
    pub strict: bool,
}
