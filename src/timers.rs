//! Timer plumbing for heartbeats, boot retries, status debounce and meter
//! sampling.
//!
//! [`TimerHandle`] is a restartable slot for one background timer task.
//! Scheduling replaces whatever was armed before, so callers never have to
//! track task handles themselves. Tests drive these with tokio's paused
//! clock.

use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Timelike, Utc};
use tokio::task::JoinHandle;

/// A single re-armable timer.
#[derive(Debug, Default)]
pub struct TimerHandle {
    task: Mutex<Option<JoinHandle<()>>>,
}

impl TimerHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancel the armed timer, if any.
    pub fn stop(&self) {
        if let Some(task) = self.task.lock().unwrap().take() {
            task.abort();
        }
    }

    fn arm(&self, task: JoinHandle<()>) {
        let mut slot = self.task.lock().unwrap();
        if let Some(old) = slot.replace(task) {
            old.abort();
        }
    }

    /// Fire `f` once after `delay`, replacing any armed timer.
    pub fn schedule_once<F, Fut>(&self, delay: Duration, f: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send,
    {
        self.arm(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            f().await;
        }));
    }

    /// Fire `f` every `period`, first tick one period from now.
    pub fn schedule_interval<F, Fut>(&self, period: Duration, f: F)
    where
        F: Fn() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send,
    {
        self.arm(tokio::spawn(async move {
            loop {
                tokio::time::sleep(period).await;
                f().await;
            }
        }));
    }

    /// Fire `f` at irregular instants: `next_delay` is evaluated before each
    /// wait and returning `None` ends the schedule. Used for clock-aligned
    /// sampling, where every boundary is recomputed from wall time.
    pub fn schedule_repeating_with<N, F, Fut>(&self, next_delay: N, f: F)
    where
        N: Fn() -> Option<Duration> + Send + 'static,
        F: Fn() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send,
    {
        self.arm(tokio::spawn(async move {
            while let Some(delay) = next_delay() {
                tokio::time::sleep(delay).await;
                f().await;
            }
        }));
    }
}

impl Drop for TimerHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Time until the next `interval`-aligned boundary past midnight UTC.
///
/// Returns `None` when the interval is zero (feature disabled).
pub fn next_clock_aligned_delay(now: DateTime<Utc>, interval_s: u32) -> Option<Duration> {
    if interval_s == 0 {
        return None;
    }
    let seconds_since_midnight = u64::from(now.num_seconds_from_midnight());
    let interval = u64::from(interval_s);
    let next_boundary = (seconds_since_midnight / interval + 1) * interval;
    Some(Duration::from_secs(next_boundary - seconds_since_midnight))
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    use chrono::TimeZone;

    use super::*;

    #[test]
    fn clock_aligned_boundary_math() {
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 10).unwrap();
        assert_eq!(
            next_clock_aligned_delay(now, 900),
            Some(Duration::from_secs(890))
        );

        // exactly on a boundary: the next one is a full interval away
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 0, 15, 0).unwrap();
        assert_eq!(
            next_clock_aligned_delay(now, 900),
            Some(Duration::from_secs(900))
        );

        // disabled
        assert_eq!(next_clock_aligned_delay(now, 0), None);
    }

    #[tokio::test(start_paused = true)]
    async fn interval_fires_and_rearming_replaces() {
        let count = Arc::new(AtomicU32::new(0));
        let timer = TimerHandle::new();

        let c = count.clone();
        timer.schedule_interval(Duration::from_secs(10), move || {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
            }
        });

        tokio::time::sleep(Duration::from_secs(35)).await;
        assert_eq!(count.load(Ordering::SeqCst), 3);

        // re-arming resets the schedule
        let c = count.clone();
        timer.schedule_interval(Duration::from_secs(100), move || {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
            }
        });
        tokio::time::sleep(Duration::from_secs(50)).await;
        assert_eq!(count.load(Ordering::SeqCst), 3);

        timer.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn stop_cancels_pending_once() {
        let count = Arc::new(AtomicU32::new(0));
        let timer = TimerHandle::new();

        let c = count.clone();
        timer.schedule_once(Duration::from_secs(5), move || async move {
            c.fetch_add(1, Ordering::SeqCst);
        });
        timer.stop();

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }
}
