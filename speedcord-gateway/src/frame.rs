//! Decodes one inbound gateway frame, updates the shard's last-seen
//! sequence, and routes it to the opcode dispatcher.

use std::sync::{atomic::Ordering, Arc};

use serde_json::Value;

use crate::{dispatch::OpcodeDispatcher, shard::Shard};

/// Handles one decoded `{"op": int, "d": any, "s": int|null, "t": string|null}`
/// frame for `shard`.
///
/// This is only invoked once a shard is [`Shard::is_active`] -- while a
/// shard is still identifying/resuming, its read loop instead routes
/// connection-protocol opcodes directly (see `Shard::route_while_inactive`),
/// bypassing the shared dispatcher entirely so user listeners never observe
/// a not-yet-ready shard.
pub async fn on_receive(frame: Value, shard: Arc<Shard>, opcode_dispatcher: &OpcodeDispatcher) {
    if let Some(sequence) = frame.get("s").and_then(Value::as_u64) {
        shard.last_event_sequence.store(sequence, Ordering::SeqCst);
    }

    let Some(op) = frame.get("op").and_then(Value::as_u64) else {
        tracing::warn!(shard = shard.id, "frame missing an \"op\" field, ignoring");
        return;
    };

    let Ok(op) = u8::try_from(op) else {
        tracing::warn!(shard = shard.id, op, "opcode out of range, ignoring");
        return;
    };

    opcode_dispatcher.dispatch(op, frame, shard).await;
}

/// The default handler for opcode 0 (DISPATCH): forwards `(t, d, shard)` to
/// the event-name dispatcher. Registered once by [`crate::client::Client`]
/// at construction time.
pub async fn default_dispatch_handler(
    frame: Value,
    shard: Arc<Shard>,
    event_dispatcher: &crate::dispatch::EventDispatcher,
) {
    let Some(event_name) = frame.get("t").and_then(Value::as_str) else {
        return;
    };
    let data = frame.get("d").cloned().unwrap_or(Value::Null);
    event_dispatcher.dispatch(event_name, data, shard).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::Handler;
    use std::sync::atomic::{AtomicUsize, Ordering as StdOrdering};

    #[tokio::test]
    async fn stores_max_non_null_sequence_seen() {
        let shard = crate::shard::tests::dummy_shard(0);
        let dispatcher = OpcodeDispatcher::new();

        on_receive(serde_json::json!({"op": 11, "d": null, "s": 5, "t": null}), Arc::clone(&shard), &dispatcher)
            .await;
        assert_eq!(shard.last_event_sequence.load(StdOrdering::SeqCst), 5);

        on_receive(serde_json::json!({"op": 11, "d": null, "s": null, "t": null}), Arc::clone(&shard), &dispatcher)
            .await;
        assert_eq!(shard.last_event_sequence.load(StdOrdering::SeqCst), 5);

        on_receive(serde_json::json!({"op": 11, "d": null, "s": 42, "t": null}), Arc::clone(&shard), &dispatcher)
            .await;
        assert_eq!(shard.last_event_sequence.load(StdOrdering::SeqCst), 42);
    }

    #[tokio::test]
    async fn routes_by_opcode_to_registered_handlers() {
        let shard = crate::shard::tests::dummy_shard(0);
        let dispatcher = OpcodeDispatcher::new();
        let hits = Arc::new(AtomicUsize::new(0));

        let hits_clone = Arc::clone(&hits);
        let handler: Handler = Arc::new(move |_data, _shard| {
            let hits = Arc::clone(&hits_clone);
            Box::pin(async move {
                hits.fetch_add(1, StdOrdering::SeqCst);
            })
        });
        dispatcher.register(11, handler).await;

        on_receive(serde_json::json!({"op": 11, "d": null, "s": null, "t": null}), shard, &dispatcher).await;
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        assert_eq!(hits.load(StdOrdering::SeqCst), 1);
    }
}
