//! Two symmetric handler registries, keyed by opcode and by event name.

use std::{collections::HashMap, future::Future, pin::Pin, sync::Arc};

use tokio::sync::Mutex;

use crate::shard::Shard;

/// An opcode or event-name handler: `async fn(data: serde_json::Value, shard: Arc<Shard>)`.
pub type Handler = Arc<dyn Fn(serde_json::Value, Arc<Shard>) -> BoxFuture + Send + Sync>;

type BoxFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Dispatches inbound frames to handlers registered by raw opcode.
///
/// Built-in handlers for opcodes 9/10/11 are registered by each [`Shard`]
/// when it is constructed; user code registers additional opcode handlers
/// through [`crate::client::Client::listen`].
#[derive(Clone, Default)]
pub struct OpcodeDispatcher {
    handlers: Arc<Mutex<HashMap<u8, Vec<Handler>>>>,
}

impl OpcodeDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `handler` to the list registered for `opcode`.
    pub async fn register(&self, opcode: u8, handler: Handler) {
        self.handlers.lock().await.entry(opcode).or_default().push(handler);
    }

    /// Spawns one independent task per handler registered for `opcode`.
    /// Unknown opcodes spawn nothing. Does not block on any handler.
    pub async fn dispatch(&self, opcode: u8, data: serde_json::Value, shard: Arc<Shard>) {
        let handlers = self.handlers.lock().await;
        let Some(registered) = handlers.get(&opcode) else {
            return;
        };

        for handler in registered.clone() {
            let data = data.clone();
            let shard = Arc::clone(&shard);
            tokio::spawn(async move { handler(data, shard).await });
        }
    }
}

/// Dispatches `DISPATCH` (op 0) frames to handlers registered by event name.
///
/// Event names are normalized to upper case on both register and dispatch.
#[derive(Clone, Default)]
pub struct EventDispatcher {
    handlers: Arc<Mutex<HashMap<String, Vec<Handler>>>>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, event_name: impl Into<String>, handler: Handler) {
        let event_name = event_name.into().to_uppercase();
        self.handlers.lock().await.entry(event_name).or_default().push(handler);
    }

    pub async fn dispatch(&self, event_name: &str, data: serde_json::Value, shard: Arc<Shard>) {
        let event_name = event_name.to_uppercase();
        let handlers = self.handlers.lock().await;
        let Some(registered) = handlers.get(&event_name) else {
            return;
        };

        for handler in registered.clone() {
            let data = data.clone();
            let shard = Arc::clone(&shard);
            tokio::spawn(async move { handler(data, shard).await });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_handler(counter: Arc<AtomicUsize>) -> Handler {
        Arc::new(move |_data, _shard| {
            let counter = Arc::clone(&counter);
            Box::pin(async move {
                counter.fetch_add(1, Ordering::SeqCst);
            })
        })
    }

    #[tokio::test]
    async fn unknown_opcode_dispatches_to_nothing() {
        let dispatcher = OpcodeDispatcher::new();
        let counter = Arc::new(AtomicUsize::new(0));
        dispatcher.register(0, counting_handler(Arc::clone(&counter))).await;

        dispatcher.dispatch(99, serde_json::Value::Null, test_shard()).await;
        tokio::task::yield_now().await;
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn registration_order_is_preserved_and_all_handlers_run() {
        let dispatcher = EventDispatcher::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        for i in 0..3 {
            let order = Arc::clone(&order);
            let handler: Handler = Arc::new(move |_data, _shard| {
                let order = Arc::clone(&order);
                Box::pin(async move {
                    order.lock().await.push(i);
                })
            });
            dispatcher.register("ready", handler).await;
        }

        dispatcher.dispatch("READY", serde_json::Value::Null, test_shard()).await;
        // Let the spawned tasks run.
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;

        let mut seen = order.lock().await.clone();
        seen.sort_unstable();
        assert_eq!(seen, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn event_names_are_normalized_to_upper_case() {
        let dispatcher = EventDispatcher::new();
        let counter = Arc::new(AtomicUsize::new(0));
        dispatcher.register("message_create", counting_handler(Arc::clone(&counter))).await;

        dispatcher.dispatch("MESSAGE_CREATE", serde_json::Value::Null, test_shard()).await;
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    fn test_shard() -> Arc<Shard> {
        crate::shard::tests::dummy_shard(0)
    }
}
