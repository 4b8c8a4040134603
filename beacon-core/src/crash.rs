//! Crash capture and replay bookkeeping
//!
//! A panic hook persists one [`PendingCrash`] synchronously before the
//! process goes down. The next time a crash binding or user binding is made,
//! the client replays it as a regular event and deletes it only after the
//! server acknowledged that exact record (matched by `id`).
//!
//! ```text
//! Unarmed --bind_crash--> Armed --panic--> Captured
//!     Captured --replay--> ReplayedPendingAck --200/201--> Cleared
//!                          ReplayedPendingAck --restart--> replay again
//! ```

use std::any::Any;
use std::panic::Location;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::db::KeyValueStore;
use crate::error::Result;

/// Storage key for the pending crash record
pub const CRASH_KEY: &str = "beacon.ingest.crash";

/// Delay between persisting a crash and forcing the process down
pub const ABORT_GRACE: Duration = Duration::from_millis(200);

static HOOK_INSTALLED: AtomicBool = AtomicBool::new(false);

/// The single crash record awaiting replay
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingCrash {
    pub id: Uuid,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub captured_at: DateTime<Utc>,
    /// Replays started for this record
    #[serde(default)]
    pub attempts: u32,
}

impl PendingCrash {
    pub fn new(name: impl Into<String>, reason: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            reason,
            captured_at: Utc::now(),
            attempts: 0,
        }
    }

    /// Build a record from a panic payload and location.
    pub fn from_panic(payload: &(dyn Any + Send), location: Option<&Location<'_>>) -> Self {
        let reason = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned());
        let name = match location {
            Some(loc) => format!("panic at {}:{}", loc.file(), loc.line()),
            None => "panic".to_string(),
        };
        Self::new(name, reason)
    }

    /// Description used for the replay event
    pub fn description(&self) -> String {
        format!("Crash Detected {}", self.name)
    }

    /// Metadata attached to the replay event
    pub fn metadata(&self) -> Value {
        json!({
            "name": self.name,
            "reason": self.reason,
            "captured_at": self.captured_at.to_rfc3339(),
            "attempts": self.attempts,
        })
    }

    /// Copy with the attempt counter advanced
    pub fn next_attempt(&self) -> Self {
        Self {
            attempts: self.attempts.saturating_add(1),
            ..self.clone()
        }
    }
}

/// Typed access to the pending crash record in a [`KeyValueStore`]
#[derive(Clone)]
pub struct CrashStore {
    store: Arc<dyn KeyValueStore>,
}

impl CrashStore {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// Read the pending record. An unreadable record is discarded.
    pub fn load(&self) -> Result<Option<PendingCrash>> {
        let Some(raw) = self.store.get(CRASH_KEY)? else {
            return Ok(None);
        };
        match serde_json::from_str(&raw) {
            Ok(record) => Ok(Some(record)),
            Err(e) => {
                tracing::warn!(error = %e, "Discarding unreadable crash record");
                self.store.remove(CRASH_KEY)?;
                Ok(None)
            }
        }
    }

    pub fn save(&self, record: &PendingCrash) -> Result<()> {
        let raw = serde_json::to_string(record)?;
        self.store.set(CRASH_KEY, &raw)
    }

    /// Delete the pending record only if it is the one identified by `id`.
    ///
    /// Returns whether a record was deleted.
    pub fn clear_if(&self, id: Uuid) -> Result<bool> {
        match self.load()? {
            Some(record) if record.id == id => {
                self.store.remove(CRASH_KEY)?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    pub fn clear(&self) -> Result<()> {
        self.store.remove(CRASH_KEY)
    }
}

impl std::fmt::Debug for CrashStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CrashStore").finish_non_exhaustive()
    }
}

/// Install the process-wide panic hook. Only the first call installs;
/// later calls return `false`.
///
/// The hook persists the crash, runs the previously installed hook, and then
/// (when `abort_after` is set) aborts the process after the grace period so a
/// panic on a background thread still ends the process.
///
/// Panics are recorded before unwinding starts, so one that is later caught
/// by `catch_unwind` or a tokio task boundary still leaves a pending record.
pub fn install_panic_hook(store: CrashStore, abort_after: Option<Duration>) -> bool {
    if HOOK_INSTALLED.swap(true, Ordering::SeqCst) {
        return false;
    }

    let previous = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let record = PendingCrash::from_panic(info.payload(), info.location());
        // Nothing may stop termination from here on, including storage errors.
        let _ = store.save(&record);

        previous(info);

        if let Some(grace) = abort_after {
            let _ = std::thread::Builder::new()
                .name("beacon-crash-abort".to_string())
                .spawn(move || {
                    std::thread::sleep(grace);
                    std::process::abort();
                });
        }
    }));

    tracing::debug!("Crash capture armed");
    true
}

/// True once [`install_panic_hook`] has run in this process
pub fn hook_installed() -> bool {
    HOOK_INSTALLED.load(Ordering::SeqCst)
}
