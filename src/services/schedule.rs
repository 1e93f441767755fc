use std::{
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use chrono::Utc;
use tokio::{runtime::Handle, sync::watch, task::JoinHandle, time::Instant};
use tracing::info;

pub const MIN_CHECK_IN_INTERVAL: Duration = Duration::from_secs(5);
pub const MAX_CHECK_IN_INTERVAL: Duration = Duration::from_secs(10 * 60);

/// Capability to temporarily shorten the owner's check-in interval.
pub trait CheckInAccelerator: Send + Sync {
    /// Uses `interval` in place of the normal check-in interval until `duration` has elapsed.
    fn set_check_in_interval_override(&self, interval: Duration, duration: Duration);

    /// Same as [`set_check_in_interval_override`](Self::set_check_in_interval_override) for
    /// the loop that forwards distributed query results. Owners without one ignore it.
    fn set_forwarding_interval_override(&self, _interval: Duration, _duration: Duration) {}
}

#[derive(Clone, Copy)]
struct IntervalOverride {
    interval: Duration,
    expires_at: Instant,
}

struct ScheduleInner {
    base: Duration,
    active: Mutex<Option<IntervalOverride>>,
    // publishes the end of the active override; replaced by each new override
    expiry: Mutex<Option<JoinHandle<()>>>,
    changed: watch::Sender<Duration>,
}

impl ScheduleInner {
    fn current(&self) -> Duration {
        let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        match *active {
            Some(entry) if entry.expires_at > Instant::now() => entry.interval,
            Some(_) => {
                *active = None;
                self.base
            }
            None => self.base,
        }
    }

    fn publish(&self) {
        let current = self.current();
        self.changed.send_if_modified(|value| {
            if *value == current {
                return false;
            }
            *value = current;
            true
        });
    }
}

/// Holds the owner's check-in interval and any temporary override of it.
///
/// Overrides decay lazily: `current_interval` falls back to the base once the override has
/// expired, and subscribers are notified both when an override starts and when it ends.
#[derive(Clone)]
pub struct CheckInSchedule {
    inner: Arc<ScheduleInner>,
}

impl CheckInSchedule {
    pub fn new(base: Duration) -> Self {
        let base = clamp_interval(base);
        let (changed, _) = watch::channel(base);
        Self {
            inner: Arc::new(ScheduleInner {
                base,
                active: Mutex::new(None),
                expiry: Mutex::new(None),
                changed,
            }),
        }
    }

    pub fn base_interval(&self) -> Duration {
        self.inner.base
    }

    pub fn current_interval(&self) -> Duration {
        self.inner.current()
    }

    pub fn subscribe(&self) -> watch::Receiver<Duration> {
        self.inner.changed.subscribe()
    }
}

impl CheckInAccelerator for CheckInSchedule {
    fn set_check_in_interval_override(&self, interval: Duration, duration: Duration) {
        let interval = clamp_interval(interval);
        let expires_at = Instant::now() + duration;

        *self
            .inner
            .active
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(IntervalOverride {
            interval,
            expires_at,
        });

        let wall_expiry = chrono::Duration::from_std(duration)
            .map(|remaining| (Utc::now() + remaining).to_rfc3339())
            .unwrap_or_default();
        info!(
            interval = ?interval,
            duration = ?duration,
            expires_at = %wall_expiry,
            "overriding check-in interval"
        );

        self.inner.publish();

        let Ok(runtime) = Handle::try_current() else {
            return;
        };
        let mut expiry = self
            .inner
            .expiry
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(previous) = expiry.take() {
            previous.abort();
        }
        let inner = Arc::clone(&self.inner);
        *expiry = Some(runtime.spawn(async move {
            tokio::time::sleep_until(expires_at).await;
            inner.publish();
        }));
    }
}

fn clamp_interval(interval: Duration) -> Duration {
    interval.clamp(MIN_CHECK_IN_INTERVAL, MAX_CHECK_IN_INTERVAL)
}
