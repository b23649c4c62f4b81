//! A fixed-window rate limiter: "at most `times` events per `per` seconds".
//!
//! Used by `speedcord-gateway` in two places: the identify admission
//! controller (`TimesPer(max_concurrency, 5)`) and each shard's send-side
//! throttle (`TimesPer(120, 60)`).

use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

#[derive(Debug)]
struct State {
    left: u32,
    reset_at: Instant,
}

/// Gates callers so that no more than `times` of them pass through per
/// rolling window of `per` seconds.
///
/// The window starts on first use and rolls forward every time it is found
/// to be expired, rather than ticking on a fixed wall-clock boundary.
#[derive(Debug)]
pub struct TimesPer {
    times: u32,
    per: Duration,
    state: Mutex<State>,
}

impl TimesPer {
    /// Creates a limiter allowing `times` triggers per `per` seconds.
    pub fn new(times: u32, per: u64) -> Self {
        let per = Duration::from_secs(per);
        Self {
            times,
            per,
            state: Mutex::new(State {
                left: times,
                reset_at: Instant::now() + per,
            }),
        }
    }

    /// Waits until the caller is permitted to perform one unit of work,
    /// then consumes one slot from the current window.
    ///
    /// Held across the wait is this limiter's internal mutex, so a second
    /// caller arriving while the first is asleep on an exhausted window
    /// queues behind it rather than racing it past the reset.
    pub async fn trigger(&self) {
        let mut state = self.state.lock().await;
        loop {
            let now = Instant::now();
            if now >= state.reset_at {
                state.left = self.times;
                state.reset_at = now + self.per;
            }

            if state.left == 0 {
                let wait_until = state.reset_at;
                tracing::debug!(?wait_until, "rate limit window exhausted, waiting");
                tokio::time::sleep_until(wait_until).await;
                continue;
            }

            state.left -= 1;
            return;
        }
    }

    /// The number of triggers remaining in the current window, without
    /// consuming one or waiting. Intended for diagnostics only: another
    /// caller may consume the remaining budget before you act on this value.
    pub async fn remaining(&self) -> u32 {
        let state = self.state.lock().await;
        if Instant::now() >= state.reset_at {
            self.times
        } else {
            state.left
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration as StdDuration;

    static_assertions::assert_impl_all!(TimesPer: Send, Sync);

    #[tokio::test(start_paused = true)]
    async fn allows_burst_up_to_limit() {
        let limiter = TimesPer::new(3, 60);
        for _ in 0..3 {
            limiter.trigger().await;
        }
        assert_eq!(limiter.remaining().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn blocks_until_window_resets() {
        let limiter = Arc::new(TimesPer::new(1, 5));
        limiter.trigger().await;
        assert_eq!(limiter.remaining().await, 0);

        let waiter = tokio::spawn({
            let limiter = Arc::clone(&limiter);
            async move {
                limiter.trigger().await;
            }
        });

        tokio::time::sleep(StdDuration::from_millis(100)).await;
        assert!(!waiter.is_finished());

        tokio::time::advance(StdDuration::from_secs(5)).await;
        waiter.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn decrements_on_every_successful_trigger() {
        // Regression test for a bug where `trigger()` never decremented
        // the remaining count, making the limit unenforceable.
        let limiter = TimesPer::new(2, 60);
        limiter.trigger().await;
        assert_eq!(limiter.remaining().await, 1);
        limiter.trigger().await;
        assert_eq!(limiter.remaining().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn window_rolls_forward_independently_of_wall_clock_boundaries() {
        let limiter = TimesPer::new(1, 10);
        limiter.trigger().await;
        tokio::time::advance(StdDuration::from_secs(10)).await;
        // second window should now be available without any further wait
        limiter.trigger().await;
        assert_eq!(limiter.remaining().await, 0);
    }
}
