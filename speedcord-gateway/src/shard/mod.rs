//! A single gateway shard: one WebSocket connection, its own send-rate
//! limiter, and its own identify/resume/heartbeat state machine.

pub mod close;
pub mod payload;

use std::sync::{
    atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering},
    Arc,
};

use futures_util::{
    stream::{SplitSink, SplitStream},
    SinkExt, StreamExt,
};
use serde_json::Value;
use tokio::{
    net::TcpStream,
    sync::{Mutex, Notify},
};
use tokio_tungstenite::{
    connect_async,
    tungstenite::{protocol::CloseFrame, Message},
    MaybeTlsStream, WebSocketStream,
};

use crate::{
    client::Client,
    error::{Error, ErrorType, Result},
};
use close::CloseAction;

mod heartbeat;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;

/// One shard's connection to the gateway.
///
/// A `Shard` is inactive (not yet `READY`) from construction until its
/// built-in `READY` handler fires; while inactive its read loop routes
/// connection-protocol opcodes directly instead of through the shared
/// dispatcher, so user listeners never observe a half-identified shard.
pub struct Shard {
    pub id: u32,
    client: Arc<Client>,
    gateway_url: Mutex<Option<String>>,
    sink: Mutex<Option<WsSink>>,
    pub(crate) connected: AtomicBool,
    ready_notify: Notify,
    pub(crate) is_ready: AtomicBool,
    pub(crate) active: AtomicBool,
    is_closing: AtomicBool,
    pub(crate) session_id: Mutex<Option<String>>,
    pub(crate) last_event_sequence: AtomicU64,
    heartbeat_interval_ms: AtomicU64,
    heartbeat_count: Mutex<Option<u64>>,
    received_heartbeat_ack: AtomicBool,
    failed_heartbeats: AtomicU32,
    send_limiter: speedcord_ratelimiter::TimesPer,
}

impl Shard {
    pub(crate) fn new(id: u32, client: Arc<Client>) -> Arc<Self> {
        Arc::new(Self {
            id,
            client,
            gateway_url: Mutex::new(None),
            sink: Mutex::new(None),
            connected: AtomicBool::new(false),
            ready_notify: Notify::new(),
            is_ready: AtomicBool::new(false),
            active: AtomicBool::new(false),
            is_closing: AtomicBool::new(false),
            session_id: Mutex::new(None),
            last_event_sequence: AtomicU64::new(0),
            heartbeat_interval_ms: AtomicU64::new(0),
            heartbeat_count: Mutex::new(None),
            received_heartbeat_ack: AtomicBool::new(true),
            failed_heartbeats: AtomicU32::new(0),
            send_limiter: speedcord_ratelimiter::TimesPer::new(120, 60),
        })
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Registers the built-in HELLO/HEARTBEAT_ACK/INVALID_SESSION opcode
    /// handlers and the READY event handler on the client's shared
    /// dispatchers. Every handler ignores frames addressed to other shards.
    pub(crate) async fn register_builtin_handlers(self: &Arc<Self>) {
        let opcodes = self.client.opcode_dispatcher();
        let events = self.client.event_dispatcher();

        let this = Arc::clone(self);
        opcodes
            .register(
                10,
                Arc::new(move |frame, origin| {
                    let this = Arc::clone(&this);
                    Box::pin(async move { this.handle_hello(&frame, &origin).await })
                }),
            )
            .await;

        let this = Arc::clone(self);
        opcodes
            .register(
                11,
                Arc::new(move |frame, origin| {
                    let this = Arc::clone(&this);
                    Box::pin(async move { this.handle_heartbeat_ack(&frame, &origin).await })
                }),
            )
            .await;

        let this = Arc::clone(self);
        opcodes
            .register(
                9,
                Arc::new(move |frame, origin| {
                    let this = Arc::clone(&this);
                    Box::pin(async move { this.handle_invalid_session(&frame, &origin).await })
                }),
            )
            .await;

        let this = Arc::clone(self);
        events
            .register(
                "READY",
                Arc::new(move |data, origin| {
                    let this = Arc::clone(&this);
                    Box::pin(async move { this.handle_ready(&data, &origin).await })
                }),
            )
            .await;
    }

    async fn handle_hello(self: &Arc<Self>, frame: &Value, origin: &Arc<Shard>) {
        if origin.id != self.id {
            return;
        }
        let interval_ms = frame.pointer("/d/heartbeat_interval").and_then(Value::as_u64).unwrap_or(0);
        self.heartbeat_interval_ms.store(interval_ms, Ordering::SeqCst);
        self.received_heartbeat_ack.store(true, Ordering::SeqCst);

        let this = Arc::clone(self);
        tokio::spawn(async move { this.heartbeat_loop().await });
        tracing::debug!(shard = self.id, interval_ms, "received HELLO, heartbeat loop started");
    }

    async fn handle_heartbeat_ack(self: &Arc<Self>, _frame: &Value, origin: &Arc<Shard>) {
        if origin.id != self.id {
            return;
        }
        self.received_heartbeat_ack.store(true, Ordering::SeqCst);
        self.failed_heartbeats.store(0, Ordering::SeqCst);
    }

    async fn handle_invalid_session(self: &Arc<Self>, frame: &Value, origin: &Arc<Shard>) {
        if origin.id != self.id {
            return;
        }
        let resumable = frame.get("d").and_then(Value::as_bool).unwrap_or(false);
        tracing::warn!(shard = self.id, resumable, "received INVALID_SESSION");
        if !resumable {
            *self.session_id.lock().await = None;
            self.last_event_sequence.store(0, Ordering::SeqCst);
        }

        let this = Arc::clone(self);
        tokio::spawn(async move {
            this.close().await;
            if let Err(error) = this.connect().await {
                tracing::error!(shard = this.id, %error, "failed to reconnect after INVALID_SESSION");
            }
        });
    }

    async fn handle_ready(self: &Arc<Self>, data: &Value, origin: &Arc<Shard>) {
        if origin.id != self.id {
            return;
        }
        if let Some(session_id) = data.get("session_id").and_then(Value::as_str) {
            *self.session_id.lock().await = Some(session_id.to_owned());
        }
        self.is_ready.store(true, Ordering::SeqCst);
        self.active.store(true, Ordering::SeqCst);
        self.ready_notify.notify_one();
        tracing::info!(shard = self.id, "shard is ready");
    }

    pub(crate) async fn wait_ready(&self) {
        if self.is_ready.load(Ordering::SeqCst) {
            return;
        }
        self.ready_notify.notified().await;
    }

    fn last_sequence(&self) -> Option<u64> {
        match self.last_event_sequence.load(Ordering::SeqCst) {
            0 => None,
            sequence => Some(sequence),
        }
    }

    /// Connects (or reconnects) this shard: resolves a gateway URL if none
    /// is cached, opens the WebSocket, spawns the read loop, then either
    /// IDENTIFYs or RESUMEs depending on whether a session is cached.
    pub async fn connect(self: &Arc<Self>) -> Result<()> {
        self.close().await;

        loop {
            let gateway_url = self.resolve_gateway_url().await?;
            let connect_url = build_connect_url(&gateway_url)?;

            match connect_async(connect_url).await {
                Ok((stream, _response)) => {
                    let (sink, read_half) = stream.split();
                    *self.sink.lock().await = Some(sink);
                    self.connected.store(true, Ordering::SeqCst);
                    // A new socket is live: re-arm the close-code classifier for
                    // its read loop. Must not clear this any earlier than here --
                    // the read loop belonging to whatever socket `close()` just
                    // tore down is a separate task and may not have noticed the
                    // close yet.
                    self.is_closing.store(false, Ordering::SeqCst);

                    let this = Arc::clone(self);
                    tokio::spawn(async move { this.read_loop(read_half).await });
                    break;
                }
                Err(error) if is_timeout(&error) => {
                    tracing::warn!(shard = self.id, "gateway connect timed out, dropping cached url");
                    *self.gateway_url.lock().await = None;
                    continue;
                }
                Err(error) => {
                    return Err(Error::with_source(ErrorType::GatewayUnavailable, error));
                }
            }
        }

        self.client.admit_identify(self.id).await?;

        let session_id = self.session_id.lock().await.clone();
        match session_id {
            Some(session_id) => self.resume(&session_id).await,
            None => self.identify().await,
        }
    }

    async fn resolve_gateway_url(self: &Arc<Self>) -> Result<String> {
        if let Some(cached) = self.gateway_url.lock().await.clone() {
            return Ok(cached);
        }
        let gateway = self.client.http().get_gateway_bot().await?;
        *self.gateway_url.lock().await = Some(gateway.url.clone());
        Ok(gateway.url)
    }

    async fn identify(self: &Arc<Self>) -> Result<()> {
        let total = self.client.current_shard_count();
        let payload = payload::identify(self.client.token(), self.client.intents(), self.id, total);
        self.send_json(&payload).await
    }

    async fn resume(self: &Arc<Self>, session_id: &str) -> Result<()> {
        let payload = payload::resume(self.client.token(), session_id, self.last_sequence());
        self.send_json(&payload).await
    }

    /// Sends a frame, subject to this shard's 120-per-60s send limiter.
    pub(crate) async fn send_json(&self, value: &impl serde::Serialize) -> Result<()> {
        self.send_limiter.trigger().await;

        let text = serde_json::to_string(value).map_err(|source| Error::with_source(ErrorType::Serialization, source))?;

        let mut sink_guard = self.sink.lock().await;
        let Some(sink) = sink_guard.as_mut() else {
            return Err(Error::new(ErrorType::GatewayClosed));
        };

        sink.send(Message::Text(text))
            .await
            .map_err(|source| Error::with_source(ErrorType::GatewayClosed, source))
    }

    /// Closes the socket, if one is open, and resets connection/readiness
    /// state. Sets `is_closing` so the read loop of the socket being torn
    /// down doesn't treat its own exit as a disconnect needing reconnection.
    ///
    /// The read loop runs in its own task and may not observe the closed
    /// socket until well after this function returns, so `is_closing` is
    /// left set rather than reset here -- it is only cleared once `connect`
    /// has a new socket in place for it to protect instead.
    pub async fn close(self: &Arc<Self>) {
        let mut sink_guard = self.sink.lock().await;
        if let Some(mut sink) = sink_guard.take() {
            self.is_closing.store(true, Ordering::SeqCst);
            let _ = sink.close().await;
        }
        drop(sink_guard);

        self.connected.store(false, Ordering::SeqCst);
        self.is_ready.store(false, Ordering::SeqCst);
        self.active.store(false, Ordering::SeqCst);
    }

    async fn read_loop(self: Arc<Self>, mut stream: SplitStream<WsStream>) {
        let mut close_code = None;

        while let Some(message) = stream.next().await {
            match message {
                Ok(Message::Text(text)) => self.handle_text_frame(&text).await,
                Ok(Message::Close(frame)) => {
                    close_code = frame.map(close_code_of);
                    tracing::warn!(shard = self.id, ?close_code, "gateway socket closing");
                    break;
                }
                Ok(_) => {}
                Err(error) => {
                    tracing::warn!(shard = self.id, %error, "websocket read error");
                    break;
                }
            }
        }

        self.connected.store(false, Ordering::SeqCst);
        if !self.is_closing.load(Ordering::SeqCst) {
            self.on_disconnect(close_code).await;
        }
    }

    async fn handle_text_frame(self: &Arc<Self>, text: &str) {
        let frame: Value = match serde_json::from_str(text) {
            Ok(frame) => frame,
            Err(error) => {
                tracing::warn!(shard = self.id, %error, "could not decode gateway frame");
                return;
            }
        };

        if self.active.load(Ordering::SeqCst) {
            let opcode_dispatcher = self.client.opcode_dispatcher();
            crate::frame::on_receive(frame, Arc::clone(self), opcode_dispatcher).await;
        } else {
            self.route_while_inactive(frame).await;
        }
    }

    /// Routes a frame while the shard hasn't received `READY` yet: stores
    /// the sequence and calls the relevant built-in handler directly,
    /// bypassing the shared dispatcher.
    async fn route_while_inactive(self: &Arc<Self>, frame: Value) {
        if let Some(sequence) = frame.get("s").and_then(Value::as_u64) {
            self.last_event_sequence.store(sequence, Ordering::SeqCst);
        }

        match frame.get("op").and_then(Value::as_u64) {
            Some(9) => self.handle_invalid_session(&frame, self).await,
            Some(10) => self.handle_hello(&frame, self).await,
            Some(11) => self.handle_heartbeat_ack(&frame, self).await,
            Some(0) if frame.get("t").and_then(Value::as_str) == Some("READY") => {
                let data = frame.get("d").cloned().unwrap_or(Value::Null);
                self.handle_ready(&data, self).await;
            }
            _ => {}
        }
    }

    async fn on_disconnect(self: &Arc<Self>, close_code: Option<u16>) {
        let pinned = self.client.shard_ids_pinned();
        let plan = close::classify_close_code(close_code, pinned);

        if !plan.save_session {
            *self.session_id.lock().await = None;
            self.last_event_sequence.store(0, Ordering::SeqCst);
        }
        if !plan.save_gateway_url {
            *self.gateway_url.lock().await = None;
        }

        match plan.action {
            CloseAction::Fatal(kind) => {
                self.client.fatal(Error::new(kind)).await;
            }
            CloseAction::Rescale => {
                tracing::info!(shard = self.id, "gateway asked for a different shard count, rescaling");
                self.client.rescale_shards().await;
            }
            CloseAction::Reconnect => {
                tracing::info!(shard = self.id, ?close_code, "reconnecting");
                if let Err(error) = self.connect().await {
                    tracing::error!(shard = self.id, %error, "failed to reconnect");
                    self.client.fatal(error).await;
                }
            }
        }
    }
}

fn build_connect_url(gateway_url: &str) -> Result<String> {
    let mut url = url::Url::parse(gateway_url).map_err(|source| Error::with_source(ErrorType::GatewayUnavailable, source))?;
    url.query_pairs_mut().append_pair("v", "10").append_pair("encoding", "json");
    Ok(url.to_string())
}

fn is_timeout(error: &tokio_tungstenite::tungstenite::Error) -> bool {
    matches!(
        error,
        tokio_tungstenite::tungstenite::Error::Io(io_error) if io_error.kind() == std::io::ErrorKind::TimedOut
    )
}

fn close_code_of(frame: CloseFrame<'_>) -> u16 {
    frame.code.into()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub fn dummy_shard(id: u32) -> Arc<Shard> {
        Shard::new(id, Client::new_for_test())
    }

    #[tokio::test]
    async fn starts_inactive_and_disconnected() {
        let shard = dummy_shard(0);
        assert!(!shard.is_connected());
        assert!(!shard.is_active());
        assert_eq!(shard.last_sequence(), None);
    }

    #[tokio::test]
    async fn send_json_without_a_socket_fails_with_gateway_closed() {
        let shard = dummy_shard(0);
        let error = shard.send_json(&payload::heartbeat(None)).await.unwrap_err();
        assert!(matches!(error.kind(), ErrorType::GatewayClosed));
    }
}
