//! The REST client: signed requests, header merging, and the global-lock +
//! bucket-lock + 429-retry pipeline.

use std::{sync::Arc, time::Duration};

use hyper::{
    body,
    client::{Client as HyperClient, HttpConnector},
    header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION, USER_AGENT},
    Body, Request, Response, StatusCode,
};
use hyper_rustls::HttpsConnector;
use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};
use serde::de::DeserializeOwned;
use tokio::time::sleep;

use crate::{
    error::{Error, ErrorType, Result},
    ratelimiting::{headers::parse_429_body, BucketGuard, BucketTable, GlobalLock, RatelimitHeaders},
    routing::Route,
};

/// Discord's HTTPS API base.
pub const BASE_URL: &str = "https://discord.com/api/v8";

/// The fixed retry budget for 429 responses.
const MAX_RETRIES: u8 = 3;

const AUDIT_REASON_ENCODE_SET: &AsciiSet = &CONTROLS.add(b'%').add(b'"').add(b'#').add(b'<').add(b'>');

/// Signed HTTPS client for Discord's REST API.
///
/// Cheaply cloneable: internally wraps its hyper client, lock table, and
/// global lock in an `Arc`, so cloning shares state rather than duplicating it.
#[derive(Clone, Debug)]
pub struct Client {
    inner: Arc<State>,
}

#[derive(Debug)]
struct State {
    http: HyperClient<HttpsConnector<HttpConnector>, Body>,
    base_url: String,
    token: Box<str>,
    user_agent: Box<str>,
    timeout: Duration,
    global: GlobalLock,
    buckets: BucketTable,
}

/// The default per-request timeout.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// A response together with its body, already buffered. Returned by
/// [`Client::request`] so callers don't each have to drain the hyper body.
#[derive(Debug)]
pub struct ApiResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl ApiResponse {
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        deserialize_body(&self.body)
    }
}

impl Client {
    /// Builds a client for `token`, talking to the default Discord API base.
    pub fn new(token: impl Into<String>) -> Self {
        ClientBuilder::new(token).build()
    }

    /// Starts a [`ClientBuilder`].
    pub fn builder(token: impl Into<String>) -> ClientBuilder {
        ClientBuilder::new(token)
    }

    /// Issues a request against `route`, following the ratelimit pipeline:
    /// global wait, bucket acquire, send, classify, retry-on-429.
    pub async fn request(
        &self,
        route: &Route,
        body: Option<Vec<u8>>,
        extra_headers: Option<HeaderMap>,
        audit_reason: Option<&str>,
    ) -> Result<ApiResponse> {
        let bucket = route.bucket();
        let mut last_error = None;
        // Carries the bucket guard from a 429 retry into the next iteration
        // instead of releasing and re-acquiring it, so a request that was
        // already queued for this bucket doesn't lose its place to one that
        // arrived later.
        let mut carried_guard = None;

        for _ in 0..MAX_RETRIES {
            self.inner.global.wait().await;

            let guard = match carried_guard.take() {
                Some(guard) => guard,
                None => self.inner.buckets.acquire(&bucket).await,
            };

            let request = self.build_request(route, body.clone(), extra_headers.clone(), audit_reason)?;
            let response = tokio::time::timeout(self.inner.timeout, self.inner.http.request(request))
                .await
                .map_err(|_| Error::new(ErrorType::RequestError))?
                .map_err(|source| Error::with_source(ErrorType::RequestError, source))?;

            let status = response.status();
            let (parts, response_body) = response.into_parts();
            let bytes = body::to_bytes(response_body)
                .await
                .map_err(|source| Error::with_source(ErrorType::RequestError, source))?
                .to_vec();

            if status == StatusCode::TOO_MANY_REQUESTS {
                let retry = self.handle_429(&bucket, &bytes, guard).await;
                last_error = Some(Error::new(ErrorType::Response {
                    body: bytes,
                    status,
                }));
                match retry {
                    Ok(guard) => {
                        carried_guard = Some(guard);
                        continue;
                    }
                    Err(error) => return Err(error),
                }
            }

            self.handle_ratelimit_headers(&bucket, &parts.headers, guard)?;

            return match classify_status(status, bytes) {
                Ok(body) => Ok(ApiResponse {
                    status,
                    headers: parts.headers,
                    body,
                }),
                Err(error) => Err(error),
            };
        }

        Err(last_error.unwrap_or_else(|| Error::new(ErrorType::RetriesExhausted)))
    }

    /// Fetches `GET /gateway/bot`, the only route this crate calls directly.
    pub async fn get_gateway_bot(&self) -> Result<GatewayBot> {
        let route = Route::new(crate::routing::Method::Get, "/gateway/bot");
        let response = self.request(&route, None, None, None).await?;
        let bot: GatewayBot = response.json()?;

        if bot.session_start_limit.remaining == 0 {
            return Err(Error::new(ErrorType::ConnectionsExceeded));
        }

        Ok(bot)
    }

    /// Waits out a 429 and returns the bucket guard for the caller to retry
    /// with, rather than releasing it -- a request already queued for this
    /// bucket keeps its place instead of racing a later arrival for the lock.
    async fn handle_429(&self, bucket: &str, bytes: &[u8], guard: BucketGuard) -> Result<BucketGuard> {
        let value: serde_json::Value = serde_json::from_slice(bytes).map_err(|_| Error::new(ErrorType::Json))?;
        let exceeded = parse_429_body(&value);
        let retry_after = exceeded.map_or(Duration::from_secs(1), |e| Duration::from_millis(e.retry_after_ms));
        let is_global = exceeded.map_or(false, |e| e.is_global);

        if is_global {
            tracing::warn!(bucket, ?retry_after, "global ratelimit hit (429)");
            let (guard, ()) = guard.release_during(self.inner.global.clear_for(retry_after)).await;
            Ok(guard)
        } else {
            tracing::warn!(bucket, ?retry_after, "bucket ratelimit hit (429)");
            sleep(retry_after).await;
            Ok(guard)
        }
    }

    fn handle_ratelimit_headers(&self, bucket: &str, headers: &HeaderMap, guard: BucketGuard) -> Result<()> {
        let pairs = headers.iter().map(|(name, value)| (name.as_str(), value.as_bytes()));
        let ratelimit = RatelimitHeaders::from_pairs(pairs)?;

        if ratelimit.remaining == Some(0) {
            let reset_after = Duration::from_millis(ratelimit.reset_after_ms.unwrap_or(0));
            tracing::debug!(bucket, ?reset_after, "bucket exhausted");
            guard.defer(reset_after);
        } else {
            drop(guard);
        }

        Ok(())
    }

    fn build_request(
        &self,
        route: &Route,
        body: Option<Vec<u8>>,
        extra_headers: Option<HeaderMap>,
        audit_reason: Option<&str>,
    ) -> Result<Request<Body>> {
        let uri = format!("{}{}", self.inner.base_url, route.path());

        let mut builder = Request::builder()
            .method(hyper::Method::from(route.method()))
            .uri(uri)
            .header(AUTHORIZATION, self.auth_header()?)
            .header(USER_AGENT, self.inner.user_agent.as_ref())
            .header("x-ratelimit-precision", "millisecond");

        if let Some(reason) = audit_reason {
            if !reason.is_empty() {
                let encoded = utf8_percent_encode(reason, AUDIT_REASON_ENCODE_SET).to_string();
                let value = HeaderValue::from_str(&encoded)
                    .map_err(|source| Error::with_source(ErrorType::BuildingRequest, source))?;
                builder = builder.header(HeaderName::from_static("x-audit-log-reason"), value);
            }
        }

        if let Some(headers) = extra_headers {
            if let Some(map) = builder.headers_mut() {
                for (name, value) in headers {
                    if let Some(name) = name {
                        map.insert(name, value);
                    }
                }
            }
        }

        let body = match body {
            Some(bytes) => {
                builder = builder.header("content-type", "application/json");
                Body::from(bytes)
            }
            None => Body::empty(),
        };

        builder
            .body(body)
            .map_err(|source| Error::with_source(ErrorType::BuildingRequest, source))
    }

    fn auth_header(&self) -> Result<HeaderValue> {
        HeaderValue::from_str(&format!("Bot {}", self.inner.token))
            .map_err(|source| Error::with_source(ErrorType::BuildingRequest, source))
    }
}

fn classify_status(status: StatusCode, body: Vec<u8>) -> Result<Vec<u8>> {
    match status {
        StatusCode::UNAUTHORIZED => Err(Error::new(ErrorType::Unauthorized)),
        StatusCode::FORBIDDEN => Err(Error::new(ErrorType::Forbidden { body })),
        StatusCode::NOT_FOUND => Err(Error::new(ErrorType::NotFound { body })),
        status if status.as_u16() >= 300 => Err(Error::new(ErrorType::Response { body, status })),
        _ => Ok(body),
    }
}

/// Builder for [`Client`]: required fields as constructor arguments,
/// optional ones as setters.
#[derive(Debug)]
pub struct ClientBuilder {
    token: String,
    base_url: String,
    timeout: Duration,
}

impl ClientBuilder {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            base_url: BASE_URL.to_owned(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Overrides the API base URL. Intended for pointing the client at a
    /// local mock server in tests.
    #[must_use]
    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Overrides the per-request timeout (default 10 seconds).
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn build(self) -> Client {
        let connector = hyper_rustls::HttpsConnectorBuilder::new()
            .with_native_roots()
            .https_or_http()
            .enable_http1()
            .enable_http2()
            .build();
        let http = HyperClient::builder().build(connector);

        let user_agent = format!(
            "DiscordBot (https://github.com/speedcord-rs/speedcord {}) {}/rustc hyper/0.14",
            env!("CARGO_PKG_VERSION"),
            std::env::consts::OS,
        );

        Client {
            inner: Arc::new(State {
                http,
                base_url: self.base_url,
                token: self.token.into_boxed_str(),
                user_agent: user_agent.into_boxed_str(),
                timeout: self.timeout,
                global: GlobalLock::new(),
                buckets: BucketTable::new(),
            }),
        }
    }
}

/// The result of `GET /gateway/bot`.
#[derive(Clone, Debug, serde::Deserialize)]
pub struct GatewayBot {
    pub url: String,
    pub shards: u32,
    pub session_start_limit: SessionStartLimit,
}

/// The `session_start_limit` object embedded in [`GatewayBot`].
#[derive(Clone, Copy, Debug, serde::Deserialize)]
pub struct SessionStartLimit {
    pub remaining: u32,
    pub reset_after: u64,
    pub max_concurrency: u32,
}

pub(crate) fn deserialize_body<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    serde_json::from_slice(bytes).map_err(|source| Error::with_source(ErrorType::Json, source))
}
