//! Integration tests for kvgate
//!
//! Runs the store service and the gateway on ephemeral ports and talks to
//! them over real sockets.

use kvgate::gateway::ApiResponse;
use kvgate::{Client, Gateway, GatewayConfig, KvError, RpcServer, ServerConfig, StoreService};
use reqwest::StatusCode;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;

/// Start a store service on an ephemeral port
async fn start_rpc_server() -> (Arc<RpcServer>, String) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    let server = Arc::new(RpcServer::new(ServerConfig::default(), StoreService::new()));
    let serving = Arc::clone(&server);
    tokio::spawn(async move {
        let _ = serving.serve(listener).await;
    });
    (server, addr)
}

/// Start a gateway forwarding to `upstream`, returning its base URL
async fn start_gateway(upstream: &str, rpc_timeout: Duration) -> (Arc<Gateway>, String) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base_url = format!("http://{}", listener.local_addr().unwrap());
    let config = GatewayConfig {
        upstream_addr: upstream.to_string(),
        rpc_timeout,
        ..GatewayConfig::default()
    };
    let gateway = Arc::new(Gateway::new(config));
    let serving = Arc::clone(&gateway);
    tokio::spawn(async move {
        let _ = serving.serve(listener).await;
    });
    (gateway, base_url)
}

async fn body(response: reqwest::Response) -> ApiResponse {
    response.json::<ApiResponse>().await.unwrap()
}

#[tokio::test]
async fn test_basic_operations() {
    let (_server, addr) = start_rpc_server().await;
    let mut client = Client::connect(&addr).await.unwrap();

    assert!(client.store("test_key", "test_value").await.unwrap().success);

    let got = client.retrieve("test_key").await.unwrap();
    assert!(got.found);
    assert_eq!(got.value, "test_value");

    let got = client.retrieve("nonexistent").await.unwrap();
    assert!(!got.found);
    assert_eq!(got.value, "");

    assert!(client.delete("test_key").await.unwrap().success);
    assert!(!client.delete("test_key").await.unwrap().success);
    assert!(!client.retrieve("test_key").await.unwrap().found);

    client.close().await.unwrap();
}

#[tokio::test]
async fn test_delete_strict_over_the_wire() {
    let (_server, addr) = start_rpc_server().await;
    let mut client = Client::connect(&addr).await.unwrap();

    client.store("k", "v").await.unwrap();
    assert!(client.delete_strict("k").await.unwrap().success);

    let err = client.delete_strict("k").await.unwrap_err();
    assert!(matches!(err, KvError::NotFound(_)));

    // the connection stays usable after an error reply
    assert!(client.store("k", "again").await.unwrap().success);
}

#[tokio::test]
async fn test_concurrent_clients() {
    let (_server, addr) = start_rpc_server().await;

    let num_clients = 10;
    let ops_per_client = 100;
    let mut handles = Vec::new();

    for client_id in 0..num_clients {
        let addr = addr.clone();
        let handle = tokio::spawn(async move {
            let mut client = Client::connect(&addr).await.unwrap();

            for i in 0..ops_per_client {
                let key = format!("client_{}_key_{}", client_id, i);
                let value = format!("client_{}_value_{}", client_id, i);

                client.store(&key, &value).await.unwrap();

                let retrieved = client.retrieve(&key).await.unwrap();
                assert_eq!(retrieved.value, value);

                if i % 2 == 0 {
                    assert!(client.delete(&key).await.unwrap().success);
                }
            }

            client.close().await.unwrap();
        });
        handles.push(handle);
    }

    for handle in handles {
        handle.await.unwrap();
    }
}

#[tokio::test]
async fn test_concurrent_writers_same_key() {
    let (_server, addr) = start_rpc_server().await;
    let values: Vec<String> = (0..16).map(|i| format!("writer-{}", i)).collect();

    let handles: Vec<_> = values
        .iter()
        .cloned()
        .map(|value| {
            let addr = addr.clone();
            tokio::spawn(async move {
                let mut client = Client::connect(&addr).await.unwrap();
                client.store("shared", &value).await.unwrap();
            })
        })
        .collect();
    for handle in handles {
        handle.await.unwrap();
    }

    let mut client = Client::connect(&addr).await.unwrap();
    let got = client.retrieve("shared").await.unwrap();
    assert!(values.contains(&got.value));
}

#[tokio::test]
async fn test_large_and_special_values() {
    let (_server, addr) = start_rpc_server().await;
    let mut client = Client::connect(&addr).await.unwrap();

    let large_value = "x".repeat(1024 * 1024);
    client.store("large_key", &large_value).await.unwrap();
    assert_eq!(client.retrieve("large_key").await.unwrap().value, large_value);

    let special_key = "key_with_特殊字符_and_émojis_🚀";
    let special_value = "value_with_newlines\nand\ttabs\rand_quotes\"'";
    client.store(special_key, special_value).await.unwrap();
    assert_eq!(client.retrieve(special_key).await.unwrap().value, special_value);
}

#[tokio::test]
async fn test_invalid_key_rejected_before_sending() {
    let (_server, addr) = start_rpc_server().await;
    let mut client = Client::connect(&addr).await.unwrap();

    let err = client.store("bad key", "v").await.unwrap_err();
    assert!(matches!(err, KvError::InvalidRequest(_)));
    assert!(client.store("good_key", "v").await.unwrap().success);
}

#[tokio::test]
async fn test_connect_to_missing_server() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    drop(listener);

    let result = Client::connect(&addr).await;
    assert!(result.is_err());
}

#[tokio::test]
async fn test_gateway_end_to_end() {
    let (_server, upstream) = start_rpc_server().await;
    let (_gateway, base) = start_gateway(&upstream, Duration::from_secs(1)).await;
    let http = reqwest::Client::new();
    let url = format!("{}/kv/foo", base);

    let res = http
        .post(&url)
        .json(&serde_json::json!({ "value": "bar" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert!(body(res).await.success);

    let res = http.get(&url).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let got = body(res).await;
    assert_eq!(got.key.as_deref(), Some("foo"));
    assert_eq!(got.value.as_deref(), Some("bar"));

    let res = http.delete(&url).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert!(body(res).await.success);

    let res = http.get(&url).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
    assert!(!body(res).await.success);

    let res = http.get(format!("{}/kv/missing", base)).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
    let got = body(res).await;
    assert!(!got.success);
    assert_eq!(got.message.as_deref(), Some("not found"));
}

#[tokio::test]
async fn test_gateway_bad_body() {
    let (_server, upstream) = start_rpc_server().await;
    let (_gateway, base) = start_gateway(&upstream, Duration::from_secs(1)).await;

    let res = reqwest::Client::new()
        .post(format!("{}/kv/foo", base))
        .body("{\"value\":")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    assert!(!body(res).await.success);
}

#[tokio::test]
async fn test_gateway_times_out_on_silent_upstream() {
    // accepts connections but never answers
    let silent = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let upstream = silent.local_addr().unwrap().to_string();
    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((stream, _)) = silent.accept().await {
            held.push(stream);
        }
    });

    let (_gateway, base) = start_gateway(&upstream, Duration::from_millis(200)).await;

    let started = Instant::now();
    let res = reqwest::Client::new()
        .get(format!("{}/kv/anything", base))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert!(!body(res).await.success);
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[tokio::test]
async fn test_gateway_upstream_down() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let upstream = listener.local_addr().unwrap().to_string();
    drop(listener);

    let (_gateway, base) = start_gateway(&upstream, Duration::from_secs(1)).await;
    let res = reqwest::Client::new()
        .delete(format!("{}/kv/foo", base))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
}

#[tokio::test]
async fn test_gateway_reuses_upstream_connections() {
    let (_server, upstream) = start_rpc_server().await;
    let backend = Arc::new(kvgate::RpcBackend::new(upstream, 4));
    let gateway = Gateway::with_backend(GatewayConfig::default(), backend.clone());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());
    let gateway = Arc::new(gateway);
    let serving = Arc::clone(&gateway);
    tokio::spawn(async move {
        let _ = serving.serve(listener).await;
    });

    let http = reqwest::Client::new();
    for i in 0..5 {
        let res = http
            .post(format!("{}/kv/k{}", base, i))
            .json(&serde_json::json!({ "value": "v" }))
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
    }
    assert_eq!(backend.idle_connections().await, 1);

    gateway.shutdown().unwrap();
}

#[tokio::test]
async fn test_gateway_garbage_upstream_is_server_error() {
    // answers every connection with a line that is not a reply
    let garbage = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let upstream = garbage.local_addr().unwrap().to_string();
    tokio::spawn(async move {
        while let Ok((mut stream, _)) = garbage.accept().await {
            tokio::spawn(async move {
                use tokio::io::{AsyncReadExt, AsyncWriteExt};
                let mut buf = [0u8; 1024];
                let _ = stream.read(&mut buf).await;
                let _ = stream.write_all(b"GARBAGE\r\n").await;
                let _ = stream.read(&mut buf).await;
            });
        }
    });

    let (_gateway, base) = start_gateway(&upstream, Duration::from_secs(1)).await;
    let res = reqwest::Client::new()
        .get(format!("{}/kv/foo", base))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert!(!body(res).await.success);
}

#[tokio::test]
async fn test_gateway_survives_upstream_restart() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let upstream = listener.local_addr().unwrap().to_string();
    let first = Arc::new(RpcServer::new(ServerConfig::default(), StoreService::new()));
    let serving = Arc::clone(&first);
    let first_task = tokio::spawn(async move { serving.serve(listener).await });

    let (_gateway, base) = start_gateway(&upstream, Duration::from_secs(1)).await;
    let http = reqwest::Client::new();
    let url = format!("{}/kv/foo", base);

    let res = http.get(&url).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);

    // Restart the store service on the same address
    first.shutdown().unwrap();
    first_task.await.unwrap().unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    let listener = TcpListener::bind(&upstream).await.unwrap();
    let second = Arc::new(RpcServer::new(ServerConfig::default(), StoreService::new()));
    let serving = Arc::clone(&second);
    tokio::spawn(async move {
        let _ = serving.serve(listener).await;
    });

    // The pooled connection to the old server is not used
    let res = http.get(&url).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
    assert_eq!(body(res).await.message.as_deref(), Some("not found"));

    let res = http
        .post(&url)
        .json(&serde_json::json!({ "value": "bar" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_gateway_large_value_end_to_end() {
    let (_server, upstream) = start_rpc_server().await;
    let (_gateway, base) = start_gateway(&upstream, Duration::from_secs(5)).await;
    let http = reqwest::Client::new();
    let url = format!("{}/kv/big", base);
    let value = "z".repeat(3 * 1024 * 1024);

    let res = http
        .post(&url)
        .json(&serde_json::json!({ "value": value }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let res = http.get(&url).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(body(res).await.value.as_deref(), Some(value.as_str()));
}
