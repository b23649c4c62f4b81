//! End-to-end exercises of the request pipeline against a local mock server:
//! bucket-exhaustion waits, 429 retry-after, and non-2xx classification.

use std::{
    convert::Infallible,
    net::SocketAddr,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Instant,
};

use hyper::{
    service::{make_service_fn, service_fn},
    Body, Request, Response, Server,
};
use speedcord_http::{Client, Method, Route};

async fn spawn_mock(
    handler: impl Fn(usize) -> Response<Body> + Send + Sync + 'static,
) -> (SocketAddr, tokio::task::JoinHandle<()>) {
    let handler = Arc::new(handler);
    let counter = Arc::new(AtomicUsize::new(0));

    let make_svc = make_service_fn(move |_conn| {
        let handler = Arc::clone(&handler);
        let counter = Arc::clone(&counter);
        async move {
            Ok::<_, Infallible>(service_fn(move |_req: Request<Body>| {
                let handler = Arc::clone(&handler);
                let counter = Arc::clone(&counter);
                async move {
                    let call = counter.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, Infallible>(handler(call))
                }
            }))
        }
    });

    let server = Server::bind(&([127, 0, 0, 1], 0).into()).serve(make_svc);
    let addr = server.local_addr();
    let handle = tokio::spawn(async move {
        let _ = server.await;
    });
    (addr, handle)
}

#[tokio::test]
async fn second_call_waits_for_bucket_reset_after() {
    let (addr, _server) = spawn_mock(|call| {
        if call == 0 {
            Response::builder()
                .status(200)
                .header("x-ratelimit-remaining", "0")
                .header("x-ratelimit-reset-after", "1.0")
                .body(Body::from("{}"))
                .unwrap()
        } else {
            Response::builder().status(200).body(Body::from("{}")).unwrap()
        }
    })
    .await;

    let client = Client::builder("token").base_url(format!("http://{}", addr)).build();
    let route = Route::new(Method::Get, "/ping");

    let start = Instant::now();
    client.request(&route, None, None, None).await.unwrap();
    client.request(&route, None, None, None).await.unwrap();
    let elapsed = start.elapsed();

    assert!(
        elapsed.as_millis() >= 950,
        "second call should not complete before the bucket resets, elapsed={:?}",
        elapsed
    );
}

#[tokio::test]
async fn rate_limited_request_retries_and_succeeds_within_budget() {
    let (addr, _server) = spawn_mock(|call| {
        if call == 0 {
            Response::builder()
                .status(429)
                .body(Body::from(r#"{"message":"limited","retry_after":0.2}"#))
                .unwrap()
        } else {
            Response::builder().status(200).body(Body::from(r#"{"ok":true}"#)).unwrap()
        }
    })
    .await;

    let client = Client::builder("token").base_url(format!("http://{}", addr)).build();
    let route = Route::new(Method::Get, "/ping");

    let start = Instant::now();
    let response = client.request(&route, None, None, None).await.unwrap();
    let elapsed = start.elapsed();

    assert_eq!(response.body, br#"{"ok":true}"#);
    assert!(elapsed.as_millis() >= 190, "should have waited for retry_after");
}

#[tokio::test]
async fn http_error_statuses_are_classified() {
    let (addr, _server) = spawn_mock(|_call| Response::builder().status(404).body(Body::from("nope")).unwrap()).await;

    let client = Client::builder("token").base_url(format!("http://{}", addr)).build();
    let route = Route::new(Method::Get, "/missing");

    let error = client.request(&route, None, None, None).await.unwrap_err();
    assert!(matches!(error.kind(), speedcord_http::ErrorType::NotFound { .. }));
}
