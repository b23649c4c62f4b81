//! Exercises the orchestrator's `/gateway/bot` path against a mock HTTP
//! server, covering the session-budget plumbing it feeds into identify.

use std::{convert::Infallible, net::SocketAddr};

use hyper::{
    service::{make_service_fn, service_fn},
    Body, Response, Server,
};
use speedcord_gateway::{ClientBuilder, ErrorType, Intents};

async fn spawn_gateway_bot_server(remaining: u32, max_concurrency: u32) -> SocketAddr {
    let make_service = make_service_fn(move |_conn| async move {
        Ok::<_, Infallible>(service_fn(move |_req| async move {
            let body = serde_json::json!({
                "url": "wss://gateway.example.invalid",
                "shards": 3,
                "session_start_limit": {
                    "remaining": remaining,
                    "reset_after": 5000,
                    "max_concurrency": max_concurrency,
                },
            })
            .to_string();
            Ok::<_, Infallible>(Response::new(Body::from(body)))
        }))
    });

    let server = Server::bind(&"127.0.0.1:0".parse().unwrap()).serve(make_service);
    let addr = server.local_addr();
    tokio::spawn(server);
    addr
}

#[tokio::test]
async fn get_gateway_reports_recommended_shard_count_and_budget() {
    let addr = spawn_gateway_bot_server(16, 2).await;
    let client = ClientBuilder::new()
        .token("tok")
        .intents(Intents::GUILDS)
        .http_base_url(format!("http://{addr}"))
        .build()
        .unwrap();

    let info = client.get_gateway().await.unwrap();
    assert_eq!(info.url, "wss://gateway.example.invalid");
    assert_eq!(info.recommended_shard_count, 3);
    assert_eq!(info.remaining, 16);
    assert_eq!(info.max_concurrency, 2);
}

#[tokio::test]
async fn exhausted_session_budget_is_a_connections_exceeded_error() {
    let addr = spawn_gateway_bot_server(0, 1).await;
    let client = ClientBuilder::new()
        .token("tok")
        .intents(Intents::GUILDS)
        .http_base_url(format!("http://{addr}"))
        .build()
        .unwrap();

    let error = client.get_gateway().await.unwrap_err();
    assert!(matches!(error.kind(), ErrorType::ConnectionsExceeded));
}
