//! Capped exponential backoff and the single pending retry timer.

use rand::Rng;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::task::JoinHandle;

/// Backoff parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    pub base: Duration,
    pub cap: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(1000),
            cap: Duration::from_millis(60_000),
        }
    }
}

impl Backoff {
    /// The exponential term alone: `base * 2^retry_count`, saturating.
    pub fn exponential(&self, retry_count: u32) -> Duration {
        let factor = 1u32.checked_shl(retry_count).unwrap_or(u32::MAX);
        self.base.saturating_mul(factor)
    }

    /// `min(base * 2^retry_count + jitter, cap)` with `jitter` in `[0, base)`.
    pub fn delay_with_jitter(&self, retry_count: u32, jitter: Duration) -> Duration {
        self.exponential(retry_count)
            .saturating_add(jitter.min(self.base))
            .min(self.cap)
    }

    /// Delay for the given retry count with fresh random jitter.
    pub fn delay(&self, retry_count: u32) -> Duration {
        let base_ms = self.base.as_millis() as u64;
        let jitter = if base_ms == 0 {
            Duration::ZERO
        } else {
            Duration::from_millis(rand::rng().random_range(0..base_ms))
        };
        self.delay_with_jitter(retry_count, jitter)
    }
}

struct Armed {
    generation: u64,
    handle: JoinHandle<()>,
}

#[derive(Default)]
struct SlotState {
    generation: u64,
    armed: Option<Armed>,
}

/// Holds at most one pending retry timer.
///
/// Arming a new timer cancels the previous one. Cancelling is safe when
/// nothing is armed.
pub struct RetryScheduler {
    backoff: Backoff,
    slot: Arc<Mutex<SlotState>>,
}

impl RetryScheduler {
    pub fn new(backoff: Backoff) -> Self {
        Self {
            backoff,
            slot: Arc::new(Mutex::new(SlotState::default())),
        }
    }

    pub fn backoff(&self) -> Backoff {
        self.backoff
    }

    fn lock(&self) -> MutexGuard<'_, SlotState> {
        self.slot.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Arms the timer for `retry_count`, replacing any armed timer. When it
    /// fires, `on_fire` runs. Returns the chosen delay.
    ///
    /// Must be called from within a tokio runtime.
    pub fn schedule<F, Fut>(&self, retry_count: u32, on_fire: F) -> Duration
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let delay = self.backoff.delay(retry_count);
        let mut state = self.lock();

        if let Some(previous) = state.armed.take() {
            previous.handle.abort();
        }

        state.generation += 1;
        let generation = state.generation;
        let slot = self.slot.clone();

        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            {
                // Disarm before running so a reschedule from inside `on_fire`
                // does not abort this task.
                let mut state = slot.lock().unwrap_or_else(|e| e.into_inner());
                if state.armed.as_ref().map(|a| a.generation) == Some(generation) {
                    state.armed = None;
                }
            }
            on_fire().await;
        });

        state.armed = Some(Armed { generation, handle });
        tracing::debug!("Retry armed in {:?} (retry {})", delay, retry_count);
        delay
    }

    /// Cancels the armed timer, if any.
    pub fn cancel(&self) {
        if let Some(armed) = self.lock().armed.take() {
            armed.handle.abort();
            tracing::debug!("Retry timer cancelled");
        }
    }

    pub fn is_armed(&self) -> bool {
        self.lock().armed.is_some()
    }
}

impl Drop for RetryScheduler {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    type BoxedFire = std::pin::Pin<Box<dyn Future<Output = ()> + Send>>;

    fn counter() -> (Arc<AtomicUsize>, impl Fn() -> BoxedFire + Clone + Send + 'static) {
        let fired = Arc::new(AtomicUsize::new(0));
        let f = fired.clone();
        (fired, move || -> BoxedFire {
            let f = f.clone();
            Box::pin(async move {
                f.fetch_add(1, Ordering::SeqCst);
            })
        })
    }

    #[test]
    fn test_delay_formula() {
        let backoff = Backoff::default();
        assert_eq!(backoff.delay_with_jitter(0, Duration::ZERO), Duration::from_millis(1000));
        assert_eq!(backoff.delay_with_jitter(1, Duration::from_millis(250)), Duration::from_millis(2250));
        assert_eq!(backoff.delay_with_jitter(3, Duration::ZERO), Duration::from_millis(8000));
    }

    #[test]
    fn test_delay_is_capped() {
        let backoff = Backoff::default();
        assert_eq!(backoff.delay_with_jitter(6, Duration::from_millis(999)), Duration::from_secs(60));
        assert_eq!(backoff.delay(40), Duration::from_secs(60));
        assert_eq!(backoff.delay(u32::MAX), Duration::from_secs(60));
    }

    #[test]
    fn test_jitter_stays_within_base() {
        let backoff = Backoff::default();
        for retry in 0..5 {
            let delay = backoff.delay(retry);
            let floor = backoff.exponential(retry);
            assert!(delay >= floor);
            assert!(delay < floor + backoff.base);
        }
    }

    #[test]
    fn test_backoff_is_monotonic_before_cap() {
        let backoff = Backoff {
            base: Duration::from_millis(1000),
            cap: Duration::MAX,
        };
        for r1 in 0..20 {
            for r2 in (r1 + 1)..20 {
                assert!(backoff.exponential(r2) >= backoff.exponential(r1));
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_fires_once() {
        let scheduler = RetryScheduler::new(Backoff::default());
        let (fired, on_fire) = counter();

        scheduler.schedule(0, on_fire);
        assert!(scheduler.is_armed());

        tokio::time::sleep(Duration::from_millis(2001)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(!scheduler.is_armed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reschedule_replaces_pending_timer() {
        let scheduler = RetryScheduler::new(Backoff::default());
        let (fired, on_fire) = counter();

        scheduler.schedule(4, on_fire.clone());
        scheduler.schedule(0, on_fire);

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel() {
        let scheduler = RetryScheduler::new(Backoff::default());
        let (fired, on_fire) = counter();

        scheduler.cancel();
        scheduler.schedule(0, on_fire);
        scheduler.cancel();
        scheduler.cancel();

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert!(!scheduler.is_armed());
    }
}
