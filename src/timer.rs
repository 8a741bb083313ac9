//! Session countdown timer
//!
//! [`SessionTimer`] counts down from a duration in whole seconds, publishes the
//! remaining time for live display, and invokes its callback exactly once when
//! the countdown reaches zero. Calling [`SessionTimer::set_timer`] again
//! replaces the running countdown; the previous polling task is cancelled, not
//! merely ignored.
//!
//! The timer must be used from within a Tokio runtime because each countdown
//! runs on a spawned polling task.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Default recomputation interval for the remaining time.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Callback invoked when a countdown expires.
pub type TimerCallback = Arc<dyn Fn() + Send + Sync + 'static>;

/// Snapshot of a countdown
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerState {
    /// When the countdown was (re)started
    pub start: Instant,
    /// Configured duration in seconds
    pub total_secs: u64,
    /// Seconds left, never negative
    pub remaining_secs: u64,
    /// False once the callback has fired or the countdown was cancelled
    pub running: bool,
}

/// Countdown timer with a single expiry callback
///
/// # Examples
///
/// ```no_run
/// use std::sync::Arc;
/// use avatalk::timer::SessionTimer;
///
/// # #[tokio::main]
/// # async fn main() {
/// let timer = SessionTimer::new(Arc::new(|| println!("time is up")));
/// timer.set_timer(300);
/// let mut remaining = timer.subscribe();
/// while remaining.changed().await.is_ok() {
///     println!("{:?}", *remaining.borrow());
/// }
/// # }
/// ```
pub struct SessionTimer {
    callback: TimerCallback,
    poll_interval: Duration,
    state: Arc<Mutex<Option<TimerState>>>,
    remaining_tx: watch::Sender<Option<u64>>,
    active: Mutex<Option<CancellationToken>>,
}

impl std::fmt::Debug for SessionTimer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionTimer")
            .field("poll_interval", &self.poll_interval)
            .field("state", &self.snapshot())
            .finish_non_exhaustive()
    }
}

impl SessionTimer {
    /// Create a timer polling at [`DEFAULT_POLL_INTERVAL`]
    pub fn new(callback: TimerCallback) -> Self {
        Self::with_poll_interval(callback, DEFAULT_POLL_INTERVAL)
    }

    /// Create a timer with a custom polling interval
    ///
    /// # Arguments
    ///
    /// * `callback` - Invoked once per countdown when it reaches zero
    /// * `poll_interval` - How often the remaining time is recomputed
    pub fn with_poll_interval(callback: TimerCallback, poll_interval: Duration) -> Self {
        let (remaining_tx, _) = watch::channel(None);
        Self {
            callback,
            poll_interval,
            state: Arc::new(Mutex::new(None)),
            remaining_tx,
            active: Mutex::new(None),
        }
    }

    /// Start a countdown of `duration_secs`, replacing any running one
    ///
    /// A duration of zero expires on the first poll tick.
    pub fn set_timer(&self, duration_secs: u64) {
        let token = CancellationToken::new();
        {
            let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(previous) = active.replace(token.clone()) {
                previous.cancel();
            }
        }

        let start = Instant::now();
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = Some(TimerState {
            start,
            total_secs: duration_secs,
            remaining_secs: duration_secs,
            running: true,
        });
        self.remaining_tx.send_replace(Some(duration_secs));
        tracing::debug!(duration_secs, "Session timer started");

        let state = Arc::clone(&self.state);
        let remaining_tx = self.remaining_tx.clone();
        let callback = Arc::clone(&self.callback);
        let poll_interval = self.poll_interval;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(poll_interval);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                let expired = {
                    let mut guard = state.lock().unwrap_or_else(PoisonError::into_inner);
                    if token.is_cancelled() {
                        break;
                    }
                    let Some(current) = guard.as_mut() else {
                        break;
                    };
                    let elapsed = current.start.elapsed().as_secs();
                    let remaining = current.total_secs.saturating_sub(elapsed);
                    if remaining != current.remaining_secs {
                        current.remaining_secs = remaining;
                        remaining_tx.send_replace(Some(remaining));
                    }
                    if remaining == 0 && current.running {
                        current.running = false;
                        true
                    } else {
                        false
                    }
                };

                if expired {
                    tracing::info!("Session timer expired");
                    callback();
                    break;
                }
            }
        });
    }

    /// Stop the running countdown without invoking the callback
    pub fn cancel(&self) {
        if let Some(token) = self
            .active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            token.cancel();
        }
        if let Some(current) = self
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_mut()
        {
            current.running = false;
        }
    }

    /// Seconds left on the current countdown, `None` before the first `set_timer`
    pub fn remaining(&self) -> Option<u64> {
        self.snapshot().map(|s| s.remaining_secs)
    }

    /// Whether a countdown is in progress
    pub fn is_running(&self) -> bool {
        self.snapshot().map(|s| s.running).unwrap_or(false)
    }

    /// Current countdown state
    pub fn snapshot(&self) -> Option<TimerState> {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Watch channel carrying the remaining seconds on every change
    pub fn subscribe(&self) -> watch::Receiver<Option<u64>> {
        self.remaining_tx.subscribe()
    }
}

impl Drop for SessionTimer {
    fn drop(&mut self) {
        if let Some(token) = self
            .active
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            token.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_timer() -> (SessionTimer, Arc<AtomicUsize>) {
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);
        let timer = SessionTimer::new(Arc::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        (timer, fired)
    }

    async fn advance(ms: u64) {
        tokio::time::sleep(Duration::from_millis(ms)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_fires_exactly_once_after_duration() {
        let (timer, fired) = counting_timer();
        timer.set_timer(5);
        assert_eq!(timer.remaining(), Some(5));
        assert!(timer.is_running());

        advance(4_500).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        advance(1_000).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(timer.remaining(), Some(0));
        assert!(!timer.is_running());

        advance(10_000).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_remaining_is_monotonically_non_increasing() {
        let (timer, _fired) = counting_timer();
        timer.set_timer(5);

        let mut last = u64::MAX;
        for _ in 0..24 {
            advance(250).await;
            let now = timer.remaining().unwrap();
            assert!(now <= last, "remaining went up: {} -> {}", last, now);
            last = now;
        }
        assert_eq!(last, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_new_timer_supersedes_previous_countdown() {
        let (timer, fired) = counting_timer();
        timer.set_timer(5);
        advance(1_000).await;
        timer.set_timer(3);

        // New countdown expires at t=4s, the old one would have at t=5s.
        advance(3_500).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);

        advance(5_000).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_longer_timer_cancels_earlier_expiry() {
        let (timer, fired) = counting_timer();
        timer.set_timer(5);
        advance(2_000).await;
        timer.set_timer(10);

        advance(4_000).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        advance(6_500).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_duration_fires_promptly() {
        let (timer, fired) = counting_timer();
        timer.set_timer(0);
        advance(10).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(!timer.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_prevents_callback() {
        let (timer, fired) = counting_timer();
        timer.set_timer(2);
        advance(500).await;
        timer.cancel();

        advance(5_000).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert!(!timer.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_subscribe_observes_countdown() {
        let (timer, _fired) = counting_timer();
        let mut rx = timer.subscribe();
        assert_eq!(*rx.borrow(), None);

        timer.set_timer(2);
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow_and_update(), Some(2));

        advance(2_500).await;
        assert_eq!(*rx.borrow(), Some(0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_can_be_rearmed_after_expiry() {
        let (timer, fired) = counting_timer();
        timer.set_timer(1);
        advance(1_500).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);

        timer.set_timer(1);
        advance(1_500).await;
        assert_eq!(fired.load(Ordering::SeqCst), 2);
    }
}
