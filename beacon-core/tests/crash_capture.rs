//! Panic hook capture
//!
//! The hook is process-wide, so this file holds a single test.

use std::sync::Arc;

use beacon_core::crash::{hook_installed, install_panic_hook, CrashStore};
use beacon_core::db::SqliteStore;

#[test]
fn test_panic_is_persisted_before_unwinding() {
    let dir = tempfile::tempdir().unwrap();
    let store = SqliteStore::open(&dir.path().join("state.db")).unwrap();
    let crashes = CrashStore::new(Arc::new(store.clone()));

    assert!(!hook_installed());
    assert!(install_panic_hook(crashes.clone(), None));
    assert!(hook_installed());
    // second install is a no-op
    assert!(!install_panic_hook(crashes.clone(), None));

    let result = std::panic::catch_unwind(|| {
        panic!("disk quota exceeded");
    });
    assert!(result.is_err());

    // a fresh handle on the same file sees the record
    let reopened = CrashStore::new(Arc::new(SqliteStore::open(store.path()).unwrap()));
    let record = reopened.load().unwrap().expect("crash record persisted");
    assert_eq!(record.reason.as_deref(), Some("disk quota exceeded"));
    assert!(record.name.contains("crash_capture.rs"));
    assert_eq!(record.attempts, 0);

    // a later panic replaces the single pending record
    let _ = std::panic::catch_unwind(|| panic!("second"));
    let latest = reopened.load().unwrap().unwrap();
    assert_eq!(latest.reason.as_deref(), Some("second"));
    assert_ne!(latest.id, record.id);
}
