use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Epoch-seconds clock backed by the tokio monotonic clock, so paused-time
/// tests advance it together with the timers.
#[derive(Clone)]
pub struct Clock {
    epoch_base: u64,
    started: Instant,
}

impl Clock {
    pub fn new() -> Self {
        let epoch_base = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        Self {
            epoch_base,
            started: Instant::now(),
        }
    }

    /// Whole seconds since the epoch.
    pub fn now(&self) -> u64 {
        self.epoch_base + self.started.elapsed().as_secs()
    }

    pub fn now_ms(&self) -> u64 {
        self.epoch_base * 1000 + self.started.elapsed().as_millis() as u64
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle to a scheduled one-shot timer.
///
/// The `fired` flag is the arbiter of the cancellation race: whoever wins the
/// compare-and-swap decides. If `cancel` returns true the callback has not
/// run and never will; if it returns false the callback was already committed
/// to execution and may still be running.
pub struct TimerHandle {
    fired: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

impl TimerHandle {
    pub fn cancel(&self) -> bool {
        let won = self
            .fired
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok();
        if won {
            self.task.abort();
        }
        won
    }
}

pub struct TickerHandle {
    task: JoinHandle<()>,
}

impl TickerHandle {
    pub fn stop(&self) {
        self.task.abort();
    }
}

/// Spawns cancellable one-shot timers and periodic tickers on the runtime.
#[derive(Clone, Default)]
pub struct TimerService;

impl TimerService {
    pub fn new() -> Self {
        Self
    }

    /// Run `fut` once after `delay` unless the handle is cancelled first.
    pub fn schedule<F>(&self, delay: Duration, fut: F) -> TimerHandle
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let fired = Arc::new(AtomicBool::new(false));
        let flag = fired.clone();
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if flag
                .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                fut.await;
            }
        });
        TimerHandle { fired, task }
    }

    /// Run `f` every `interval` until the ticker is stopped.
    pub fn every<F, Fut>(&self, interval: Duration, f: F) -> TickerHandle
    where
        F: Fn() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send,
    {
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick of a tokio interval completes immediately.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                f().await;
            }
        });
        TickerHandle { task }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    #[tokio::test(start_paused = true)]
    async fn timer_fires_after_delay() {
        let timers = TimerService::new();
        let hits = Arc::new(AtomicU32::new(0));
        let h = hits.clone();
        let _handle = timers.schedule(Duration::from_secs(5), async move {
            h.fetch_add(1, Ordering::SeqCst);
        });

        tokio::time::sleep(Duration::from_secs(4)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_before_fire_wins() {
        let timers = TimerService::new();
        let hits = Arc::new(AtomicU32::new(0));
        let h = hits.clone();
        let handle = timers.schedule(Duration::from_secs(5), async move {
            h.fetch_add(1, Ordering::SeqCst);
        });

        assert!(handle.cancel());
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 0);

        // Second cancel reports the timer as already resolved.
        assert!(!handle.cancel());
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_after_fire_returns_false() {
        let timers = TimerService::new();
        let hits = Arc::new(AtomicU32::new(0));
        let h = hits.clone();
        let handle = timers.schedule(Duration::from_secs(1), async move {
            h.fetch_add(1, Ordering::SeqCst);
        });

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert!(!handle.cancel());
    }

    #[tokio::test(start_paused = true)]
    async fn clock_advances_with_paused_time() {
        let clock = Clock::new();
        let t0 = clock.now();
        tokio::time::sleep(Duration::from_secs(301)).await;
        assert_eq!(clock.now() - t0, 301);
    }

    #[tokio::test(start_paused = true)]
    async fn ticker_runs_until_stopped() {
        let timers = TimerService::new();
        let hits = Arc::new(AtomicU32::new(0));
        let h = hits.clone();
        let ticker = timers.every(Duration::from_secs(10), move || {
            let h = h.clone();
            async move {
                h.fetch_add(1, Ordering::SeqCst);
            }
        });

        tokio::time::sleep(Duration::from_secs(35)).await;
        let seen = hits.load(Ordering::SeqCst);
        assert!(seen >= 3);

        ticker.stop();
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(hits.load(Ordering::SeqCst), seen);
    }
}
