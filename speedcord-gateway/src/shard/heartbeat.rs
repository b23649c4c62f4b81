//! The per-shard heartbeat loop started from the built-in HELLO handler.
//! Runs until the socket drops or a new session replaces this one.

use std::{sync::atomic::Ordering, time::Duration};

use super::{payload, Shard};

impl Shard {
    pub(crate) async fn heartbeat_loop(self: std::sync::Arc<Self>) {
        self.wait_ready().await;
        let session_at_start = self.session_id.lock().await.clone();

        loop {
            if !self.connected.load(Ordering::SeqCst) {
                break;
            }
            if *self.session_id.lock().await != session_at_start {
                break;
            }

            if !self.received_heartbeat_ack.load(Ordering::SeqCst) {
                let failed = self.failed_heartbeats.fetch_add(1, Ordering::SeqCst) + 1;
                tracing::warn!(shard = self.id, failed, "gateway did not ack the last heartbeat");
                if failed > 2 {
                    tracing::warn!(shard = self.id, "gateway stopped responding, reconnecting");
                    self.close().await;
                    *self.gateway_url.lock().await = None;
                    if let Err(error) = self.connect().await {
                        tracing::error!(shard = self.id, %error, "failed to reconnect after missed heartbeats");
                        self.client.fatal(error).await;
                    }
                    return;
                }
            }

            let mut count_guard = self.heartbeat_count.lock().await;
            let sequence = *count_guard;
            *count_guard = Some(sequence.map_or(0, |n| n + 1));
            drop(count_guard);

            self.received_heartbeat_ack.store(false, Ordering::SeqCst);
            if let Err(error) = self.send_json(&payload::heartbeat(sequence)).await {
                tracing::warn!(shard = self.id, %error, "failed to send heartbeat");
                break;
            }

            let interval_ms = self.heartbeat_interval_ms.load(Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(interval_ms)).await;
        }
    }
}
