//! Per-minute throttle gate
//!
//! Fixed (not sliding) 60 second windows. [`ThrottleGate::admit`] reserves a
//! slot and hands back a [`Permit`]:
//! - [`Permit::commit`] once the request has been handed to the transport,
//!   which charges the slot to the current window;
//! - dropping the permit uncommitted releases the slot, so a send that could
//!   not even be built does not consume quota.
//!
//! Reserved and committed slots are counted together, so concurrent in-flight
//! sends can never push a window past its limit. The window counter, reserved
//! count and reset all share one mutex.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;

use crate::config::MAX_THROTTLE_PER_MINUTE;
use crate::error::{Error, Result};

/// Length of a throttle window
pub const WINDOW: Duration = Duration::from_secs(60);

/// Current usage of the window
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Usage {
    /// Sends charged to this window
    pub used: u32,
    /// Sends admitted but not yet dispatched
    pub reserved: u32,
    /// Sends allowed per window
    pub limit: u32,
}

impl Usage {
    pub fn is_open(&self) -> bool {
        self.used + self.reserved < self.limit
    }
}

#[derive(Debug)]
pub struct ThrottleGate {
    window: Mutex<Usage>,
}

impl ThrottleGate {
    /// Create a gate. A limit above the ceiling falls back to the ceiling.
    pub fn new(limit: u32) -> Arc<Self> {
        Arc::new(Self {
            window: Mutex::new(Usage {
                limit: limit.min(MAX_THROTTLE_PER_MINUTE),
                ..Usage::default()
            }),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Usage> {
        self.window.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Change the limit. Values above 20 are ignored and `false` is returned.
    pub fn set_limit(&self, limit: u32) -> bool {
        if limit > MAX_THROTTLE_PER_MINUTE {
            return false;
        }
        self.lock().limit = limit;
        true
    }

    pub fn usage(&self) -> Usage {
        *self.lock()
    }

    /// Reserve a slot in the current window.
    pub fn admit(self: &Arc<Self>) -> Result<Permit> {
        let mut window = self.lock();
        if !window.is_open() {
            return Err(Error::Throttled {
                used: window.used + window.reserved,
                limit: window.limit,
            });
        }
        window.reserved += 1;
        Ok(Permit {
            gate: Arc::clone(self),
            settled: false,
        })
    }

    /// Start a new window. Reserved slots carry over.
    pub fn reset_window(&self) {
        let mut window = self.lock();
        if window.used > 0 {
            tracing::trace!(used = window.used, limit = window.limit, "Throttle window reset");
        }
        window.used = 0;
    }

    /// Reset the window every `period` on `handle`.
    ///
    /// The task holds only a weak reference and exits once the gate is gone.
    pub fn spawn_reset_timer(
        self: &Arc<Self>,
        handle: &Handle,
        period: Duration,
    ) -> JoinHandle<()> {
        let gate: Weak<Self> = Arc::downgrade(self);
        handle.spawn(async move {
            let start = tokio::time::Instant::now() + period;
            let mut ticker = tokio::time::interval_at(start, period);
            loop {
                ticker.tick().await;
                match gate.upgrade() {
                    Some(gate) => gate.reset_window(),
                    None => break,
                }
            }
        })
    }

    fn settle(&self, commit: bool) {
        let mut window = self.lock();
        window.reserved = window.reserved.saturating_sub(1);
        if commit {
            window.used += 1;
        }
    }
}

/// A reserved throttle slot
#[derive(Debug)]
pub struct Permit {
    gate: Arc<ThrottleGate>,
    settled: bool,
}

impl Permit {
    /// Charge the slot to the current window.
    pub fn commit(mut self) {
        self.settled = true;
        self.gate.settle(true);
    }
}

impl Drop for Permit {
    fn drop(&mut self) {
        if !self.settled {
            self.gate.settle(false);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_admit_until_limit() {
        let gate = ThrottleGate::new(10);
        for _ in 0..10 {
            gate.admit().unwrap().commit();
        }

        let err = gate.admit().unwrap_err();
        assert!(matches!(err, Error::Throttled { used: 10, limit: 10 }));
        assert_eq!(err.to_string(), "requests throttled (10/10)");
    }

    #[test]
    fn test_reserved_slots_count_against_limit() {
        let gate = ThrottleGate::new(2);
        let a = gate.admit().unwrap();
        let b = gate.admit().unwrap();
        assert!(gate.admit().is_err());

        a.commit();
        drop(b);
        assert_eq!(
            gate.usage(),
            Usage {
                used: 1,
                reserved: 0,
                limit: 2
            }
        );
        assert!(gate.admit().is_ok());
    }

    #[test]
    fn test_released_permit_does_not_consume_quota() {
        let gate = ThrottleGate::new(1);
        drop(gate.admit().unwrap());
        drop(gate.admit().unwrap());
        assert_eq!(gate.usage().used, 0);
        gate.admit().unwrap().commit();
        assert!(gate.admit().is_err());
    }

    #[test]
    fn test_set_limit_ceiling() {
        let gate = ThrottleGate::new(10);
        assert!(!gate.set_limit(21));
        assert_eq!(gate.usage().limit, 10);
        assert!(gate.set_limit(20));
        assert_eq!(gate.usage().limit, 20);
        assert!(gate.set_limit(0));
        assert!(gate.admit().is_err());

        assert_eq!(ThrottleGate::new(50).usage().limit, 20);
    }

    #[test]
    fn test_reset_window() {
        let gate = ThrottleGate::new(1);
        gate.admit().unwrap().commit();
        assert!(gate.admit().is_err());

        gate.reset_window();
        assert!(gate.admit().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_resets_every_window() {
        let gate = ThrottleGate::new(10);
        let timer = gate.spawn_reset_timer(&Handle::current(), WINDOW);

        for _ in 0..10 {
            gate.admit().unwrap().commit();
        }
        assert!(gate.admit().is_err());

        tokio::time::sleep(WINDOW / 2).await;
        assert!(gate.admit().is_err(), "no reset before the window ends");

        tokio::time::sleep(WINDOW / 2 + Duration::from_millis(10)).await;
        assert_eq!(gate.usage().used, 0);
        gate.admit().unwrap().commit();

        // resets again even when the window was not full
        tokio::time::sleep(WINDOW).await;
        assert_eq!(gate.usage().used, 0);

        timer.abort();
    }
}
