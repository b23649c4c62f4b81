//! Discovers the gateway URL and session budget, spawns shards under an
//! identify admission controller, and owns the listener-registration
//! surface and fatal-error propagation.

use std::{
    sync::{
        atomic::{AtomicBool, AtomicU32, Ordering},
        Arc,
    },
    time::Duration,
};

use speedcord_http::Client as HttpClient;
use speedcord_ratelimiter::TimesPer;
use tokio::sync::{Mutex, Notify, OnceCell};

use crate::{
    dispatch::{EventDispatcher, Handler, OpcodeDispatcher},
    error::{Error, ErrorType, Result},
    frame,
    intents::Intents,
    shard::Shard,
};

struct SessionBudget {
    remaining: u32,
    reset_after_ms: u64,
    max_concurrency: u32,
}

/// The result of `GET /gateway/bot`, unpacked into the pieces the
/// orchestrator needs.
#[derive(Clone, Debug)]
pub struct GatewayInfo {
    pub url: String,
    pub recommended_shard_count: u32,
    pub remaining: u32,
    pub reset_after_ms: u64,
    pub max_concurrency: u32,
}

/// A key passed to [`Client::listen`]: either a raw gateway opcode or an
/// event name, routed to the matching dispatcher.
pub enum ListenKey {
    Opcode(u8),
    Event(String),
}

impl From<u8> for ListenKey {
    fn from(opcode: u8) -> Self {
        Self::Opcode(opcode)
    }
}

impl From<&str> for ListenKey {
    fn from(event_name: &str) -> Self {
        Self::Event(event_name.to_owned())
    }
}

impl From<String> for ListenKey {
    fn from(event_name: String) -> Self {
        Self::Event(event_name)
    }
}

/// Orchestrates a bot identity across some number of [`Shard`]s.
///
/// Exclusively owns the HTTP client, the dispatch registries, and the live
/// shard list; every `Shard` holds an `Arc` back to its `Client` so shard
/// tasks can call back in (to refresh the gateway URL, to pass through the
/// identify admission limiter) for as long as the shard itself is alive.
pub struct Client {
    token: String,
    intents: Intents,
    http: HttpClient,
    opcode_dispatcher: OpcodeDispatcher,
    event_dispatcher: EventDispatcher,
    shards: Mutex<Vec<Arc<Shard>>>,
    shard_count: Option<u32>,
    shard_ids: Option<Vec<u32>>,
    current_shard_count: AtomicU32,
    budget: Mutex<Option<SessionBudget>>,
    identify_limiter: OnceCell<TimesPer>,
    admission: Mutex<()>,
    fatal: Mutex<Option<Error>>,
    connected: Notify,
    exit: Notify,
    closed: AtomicBool,
    default_handler_registered: AtomicBool,
}

impl Client {
    /// Starts a [`ClientBuilder`] for `token` and `intents`.
    pub fn builder(token: impl Into<String>, intents: Intents) -> ClientBuilder {
        ClientBuilder::new().token(token).intents(intents)
    }

    /// Builds a client with no shard-count/shard-id overrides and no
    /// request-timeout override.
    pub fn new(token: impl Into<String>, intents: Intents) -> Result<Arc<Self>> {
        Self::builder(token, intents).build()
    }

    /// Registers `handler` for `key`, an opcode or an event name.
    pub async fn listen(&self, key: impl Into<ListenKey>, handler: Handler) {
        match key.into() {
            ListenKey::Opcode(opcode) => self.opcode_dispatcher.register(opcode, handler).await,
            ListenKey::Event(name) => self.event_dispatcher.register(name, handler).await,
        }
    }

    /// Issues an arbitrary REST request through the shared rate-limited
    /// HTTP client, so callers that need a resource this library doesn't
    /// model can still reach it directly.
    pub fn http(&self) -> &HttpClient {
        &self.http
    }

    /// Fetches `GET /gateway/bot` and records the returned session budget.
    /// Surfaces an exhausted session-start budget as
    /// [`ErrorType::ConnectionsExceeded`] rather than the generic
    /// [`ErrorType::Http`] every other REST failure maps to.
    pub async fn get_gateway(&self) -> Result<GatewayInfo> {
        let bot = self.http.get_gateway_bot().await.map_err(|error| {
            if matches!(error.kind(), speedcord_http::ErrorType::ConnectionsExceeded) {
                Error::new(ErrorType::ConnectionsExceeded)
            } else {
                Error::from(error)
            }
        })?;
        let info = GatewayInfo {
            url: bot.url,
            recommended_shard_count: bot.shards,
            remaining: bot.session_start_limit.remaining,
            reset_after_ms: bot.session_start_limit.reset_after,
            max_concurrency: bot.session_start_limit.max_concurrency,
        };

        *self.budget.lock().await = Some(SessionBudget {
            remaining: info.remaining,
            reset_after_ms: info.reset_after_ms,
            max_concurrency: info.max_concurrency,
        });

        Ok(info)
    }

    /// Fetches the gateway URL and budget, then spawns one shard per
    /// configured (or recommended) shard id.
    async fn spawn_shards(self: &Arc<Self>) -> Result<()> {
        let info = self.get_gateway().await?;
        let shard_count = self.shard_count.unwrap_or(info.recommended_shard_count).max(1);
        self.current_shard_count.store(shard_count, Ordering::SeqCst);

        let ids: Vec<u32> = match &self.shard_ids {
            Some(ids) => ids.clone(),
            None => (0..shard_count).collect(),
        };

        let mut shards = Vec::with_capacity(ids.len());
        for id in ids {
            let shard = Shard::new(id, Arc::clone(self));
            shard.register_builtin_handlers().await;
            shards.push(shard);
        }

        let shards = self.connect_all(shards).await?;
        self.shards.lock().await.extend(shards);
        Ok(())
    }

    /// Connects each of `shards` concurrently, admission into identify still
    /// being paced by [`Client::admit_identify`]. Connects don't block each
    /// other the way a plain sequential loop would, so startup time is
    /// bounded by the identify admission windows rather than by shard count
    /// times a single connect's latency.
    ///
    /// If any shard fails to connect, the others that did are closed and the
    /// first error is returned.
    async fn connect_all(self: &Arc<Self>, shards: Vec<Arc<Shard>>) -> Result<Vec<Arc<Shard>>> {
        let mut tasks = tokio::task::JoinSet::new();
        for shard in shards {
            tasks.spawn(async move { shard.connect().await.map(|()| shard) });
        }

        let mut connected = Vec::new();
        while let Some(result) = tasks.join_next().await {
            match result.map_err(|source| Error::with_source(ErrorType::GatewayUnavailable, source))? {
                Ok(shard) => connected.push(shard),
                Err(error) => {
                    tasks.abort_all();
                    for shard in &connected {
                        shard.close().await;
                    }
                    return Err(error);
                }
            }
        }

        Ok(connected)
    }

    /// Connects (or reconnects) the configured shard set without blocking
    /// on shutdown. `run` calls this, then waits for `exit`.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        if !self.default_handler_registered.swap(true, Ordering::SeqCst) {
            self.register_default_dispatch_handler().await;
        }

        self.spawn_shards().await?;
        self.connected.notify_one();
        Ok(())
    }

    /// Drives the client until [`Client::close`] is called or a fatal
    /// error is recorded, then re-raises that error.
    pub async fn run(self: &Arc<Self>) -> Result<()> {
        self.start().await?;

        if !self.closed.load(Ordering::SeqCst) {
            self.exit.notified().await;
        }

        self.close().await;

        match self.fatal.lock().await.take() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    /// Clears `connected`, fires `exit`, and closes every shard's socket.
    /// Idempotent: closing an already-closed client is a no-op.
    pub async fn close(self: &Arc<Self>) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.exit.notify_one();

        let shards = self.shards.lock().await;
        for shard in shards.iter() {
            shard.close().await;
        }
    }

    /// Records `error` on the fatal slot (first error wins) and closes the
    /// client.
    pub(crate) async fn fatal(self: &Arc<Self>, error: Error) {
        let mut fatal_guard = self.fatal.lock().await;
        if fatal_guard.is_none() {
            tracing::error!(%error, "fatal gateway error, shutting down");
            *fatal_guard = Some(error);
        }
        drop(fatal_guard);
        self.close().await;
    }

    /// Spawns a fresh shard set at the recommended shard count, closes the
    /// old one, and swaps. Refuses if the user pinned shard ids, since
    /// those can't be resized automatically.
    pub(crate) async fn rescale_shards(self: &Arc<Self>) {
        if self.shard_ids.is_some() {
            self.fatal(Error::new(ErrorType::InvalidShardCount)).await;
            return;
        }

        let info = match self.get_gateway().await {
            Ok(info) => info,
            Err(error) => {
                self.fatal(error).await;
                return;
            }
        };

        let new_count = info.recommended_shard_count.max(1);
        tracing::info!(new_count, "rescaling shard set");

        let mut new_shards = Vec::with_capacity(new_count as usize);
        for id in 0..new_count {
            let shard = Shard::new(id, Arc::clone(self));
            shard.register_builtin_handlers().await;
            new_shards.push(shard);
        }

        let mut shards_guard = self.shards.lock().await;
        for shard in shards_guard.drain(..) {
            shard.close().await;
        }
        self.current_shard_count.store(new_count, Ordering::SeqCst);

        match self.connect_all(new_shards).await {
            Ok(shards) => *shards_guard = shards,
            Err(error) => {
                drop(shards_guard);
                self.fatal(error).await;
            }
        }
    }

    /// Waits for admission into the identify budget for `shard_id`: first
    /// the session-start budget (refreshed from the API when exhausted or
    /// running low), then the `TimesPer(max_concurrency, 5)` limiter.
    pub(crate) async fn admit_identify(self: &Arc<Self>, shard_id: u32) -> Result<()> {
        let _admission_guard = self.admission.lock().await;

        loop {
            let mut budget_guard = self.budget.lock().await;
            if budget_guard.is_none() {
                drop(budget_guard);
                self.get_gateway().await?;
                continue;
            }

            let budget = budget_guard.as_mut().expect("checked above");
            if budget.remaining == 0 {
                let reset_after = Duration::from_millis(budget.reset_after_ms);
                drop(budget_guard);
                tracing::info!(shard = shard_id, ?reset_after, "identify budget exhausted, waiting for reset");
                tokio::time::sleep(reset_after).await;
                self.get_gateway().await?;
                continue;
            }

            budget.remaining -= 1;
            if budget.remaining <= 1 {
                let reset_after = Duration::from_millis(budget.reset_after_ms);
                drop(budget_guard);
                tracing::debug!(shard = shard_id, ?reset_after, "identify budget nearly exhausted, prefetching reset");
                tokio::time::sleep(reset_after).await;
                self.get_gateway().await?;
            }
            break;
        }

        let limiter = self.identify_limiter().await?;
        limiter.trigger().await;
        Ok(())
    }

    async fn identify_limiter(&self) -> Result<&TimesPer> {
        self.identify_limiter
            .get_or_try_init(|| async {
                let max_concurrency = self.budget.lock().await.as_ref().map_or(1, |budget| budget.max_concurrency.max(1));
                Ok::<_, Error>(TimesPer::new(max_concurrency, 5))
            })
            .await
    }

    async fn register_default_dispatch_handler(self: &Arc<Self>) {
        let this = Arc::clone(self);
        self.opcode_dispatcher
            .register(
                0,
                Arc::new(move |frame, shard| {
                    let this = Arc::clone(&this);
                    Box::pin(async move {
                        frame::default_dispatch_handler(frame, shard, &this.event_dispatcher).await;
                    })
                }),
            )
            .await;
    }

    pub(crate) fn opcode_dispatcher(&self) -> &OpcodeDispatcher {
        &self.opcode_dispatcher
    }

    pub(crate) fn event_dispatcher(&self) -> &EventDispatcher {
        &self.event_dispatcher
    }

    pub(crate) fn token(&self) -> &str {
        &self.token
    }

    pub(crate) fn intents(&self) -> Intents {
        self.intents
    }

    pub(crate) fn current_shard_count(&self) -> u32 {
        self.current_shard_count.load(Ordering::SeqCst)
    }

    pub(crate) fn shard_ids_pinned(&self) -> bool {
        self.shard_ids.is_some()
    }

    #[cfg(test)]
    pub(crate) fn new_for_test() -> Arc<Self> {
        Arc::new(Self {
            token: "test-token".to_owned(),
            intents: Intents::empty(),
            http: HttpClient::new("test-token"),
            opcode_dispatcher: OpcodeDispatcher::new(),
            event_dispatcher: EventDispatcher::new(),
            shards: Mutex::new(Vec::new()),
            shard_count: None,
            shard_ids: None,
            current_shard_count: AtomicU32::new(0),
            budget: Mutex::new(None),
            identify_limiter: OnceCell::new(),
            admission: Mutex::new(()),
            fatal: Mutex::new(None),
            connected: Notify::new(),
            exit: Notify::new(),
            closed: AtomicBool::new(false),
            default_handler_registered: AtomicBool::new(true),
        })
    }
}

/// Builds a [`Client`] through the usual optional-setters-then-`build` shape.
pub struct ClientBuilder {
    token: Option<String>,
    intents: Intents,
    shard_count: Option<u32>,
    shard_ids: Option<Vec<u32>>,
    http_base_url: Option<String>,
    request_timeout: Option<Duration>,
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ClientBuilder {
    pub fn new() -> Self {
        Self {
            token: None,
            intents: Intents::empty(),
            shard_count: None,
            shard_ids: None,
            http_base_url: None,
            request_timeout: None,
        }
    }

    #[must_use]
    pub fn token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    #[must_use]
    pub fn intents(mut self, intents: Intents) -> Self {
        self.intents = intents;
        self
    }

    /// Pins the total shard count. Without this, `start`/`run` use the
    /// count Discord recommends from `/gateway/bot`.
    #[must_use]
    pub fn shard_count(mut self, shard_count: u32) -> Self {
        self.shard_count = Some(shard_count);
        self
    }

    /// Pins the exact set of shard ids this process runs. Requires
    /// [`ClientBuilder::shard_count`] to also be set; `build` rejects the
    /// combination otherwise.
    #[must_use]
    pub fn shard_ids(mut self, shard_ids: impl Into<Vec<u32>>) -> Self {
        self.shard_ids = Some(shard_ids.into());
        self
    }

    /// Overrides the REST API base URL. Intended for pointing the client
    /// at a local mock server in tests.
    #[must_use]
    pub fn http_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.http_base_url = Some(base_url.into());
        self
    }

    /// Overrides the per-request HTTP timeout (default set by
    /// `speedcord-http`).
    #[must_use]
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    pub fn build(self) -> Result<Arc<Client>> {
        let token = self.token.ok_or_else(|| {
            Error::new(ErrorType::UsageError {
                message: "a token is required to build a client",
            })
        })?;

        if self.shard_ids.is_some() && self.shard_count.is_none() {
            return Err(Error::new(ErrorType::UsageError {
                message: "shard_ids was set without shard_count",
            }));
        }

        let mut http_builder = HttpClient::builder(token.clone());
        if let Some(base_url) = self.http_base_url {
            http_builder = http_builder.base_url(base_url);
        }
        if let Some(timeout) = self.request_timeout {
            http_builder = http_builder.timeout(timeout);
        }

        Ok(Arc::new(Client {
            token,
            intents: self.intents,
            http: http_builder.build(),
            opcode_dispatcher: OpcodeDispatcher::new(),
            event_dispatcher: EventDispatcher::new(),
            shards: Mutex::new(Vec::new()),
            shard_count: self.shard_count,
            shard_ids: self.shard_ids,
            current_shard_count: AtomicU32::new(0),
            budget: Mutex::new(None),
            identify_limiter: OnceCell::new(),
            admission: Mutex::new(()),
            fatal: Mutex::new(None),
            connected: Notify::new(),
            exit: Notify::new(),
            closed: AtomicBool::new(false),
            default_handler_registered: AtomicBool::new(false),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shard_ids_without_shard_count_is_a_usage_error() {
        let error = ClientBuilder::new().token("t").shard_ids(vec![0, 1]).build().unwrap_err();
        assert!(matches!(error.kind(), ErrorType::UsageError { .. }));
    }

    #[test]
    fn missing_token_is_a_usage_error() {
        let error = ClientBuilder::new().build().unwrap_err();
        assert!(matches!(error.kind(), ErrorType::UsageError { .. }));
    }

    #[tokio::test]
    async fn listen_routes_opcodes_and_events_by_key_type() {
        let client = Client::new_for_test();
        let opcode_hits = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let event_hits = Arc::new(std::sync::atomic::AtomicUsize::new(0));

        let opcode_hits_clone = Arc::clone(&opcode_hits);
        client
            .listen(
                11u8,
                Arc::new(move |_data, _shard| {
                    let hits = Arc::clone(&opcode_hits_clone);
                    Box::pin(async move {
                        hits.fetch_add(1, Ordering::SeqCst);
                    })
                }),
            )
            .await;

        let event_hits_clone = Arc::clone(&event_hits);
        client
            .listen(
                "MESSAGE_CREATE",
                Arc::new(move |_data, _shard| {
                    let hits = Arc::clone(&event_hits_clone);
                    Box::pin(async move {
                        hits.fetch_add(1, Ordering::SeqCst);
                    })
                }),
            )
            .await;

        let shard = crate::shard::tests::dummy_shard(0);
        client.opcode_dispatcher.dispatch(11, serde_json::Value::Null, Arc::clone(&shard)).await;
        client.event_dispatcher.dispatch("MESSAGE_CREATE", serde_json::Value::Null, shard).await;
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(opcode_hits.load(Ordering::SeqCst), 1);
        assert_eq!(event_hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let client = Client::new_for_test();
        client.close().await;
        client.close().await;
        assert!(client.closed.load(Ordering::SeqCst));
    }
}
