//! Process-wide client context
//!
//! Holds the user identity and traits merged into every event, plus the
//! settings callers toggle at runtime. One [`ContextStore`] lives inside each
//! [`crate::Beacon`] handle; every access goes through a single mutex and no
//! guard is ever held across an await point.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Error, Result};

/// Trait key holding the user identifier
pub const USER_ID_TRAIT: &str = "UserID";
const NAME_TRAIT: &str = "Name";
const EMAIL_TRAIT: &str = "Email";

/// What happens to an error-class diagnostic while debugging is on
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FatalPolicy {
    /// Errors are not surfaced
    #[default]
    None,
    /// Errors are logged
    Log,
    /// Errors are logged and the process is aborted
    Fatal,
}

/// Environment reported by the ingestion server
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Development,
    #[default]
    Production,
}

impl Environment {
    /// True when the server flagged this client as a test client
    pub fn is_testing(&self) -> bool {
        matches!(self, Environment::Development)
    }
}

/// Secondary notification destination type
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelKind {
    Slack,
}

/// Secondary notification destination attached to an event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Channel {
    #[serde(rename = "type")]
    pub kind: ChannelKind,
    pub id: String,
}

impl Channel {
    pub fn new(kind: ChannelKind, id: impl Into<String>) -> Self {
        Self {
            kind,
            id: id.into(),
        }
    }

    pub fn slack(id: impl Into<String>) -> Self {
        Self::new(ChannelKind::Slack, id)
    }

    /// Wire form: `{"<kind>": "<id>"}`
    pub fn to_map(&self) -> BTreeMap<ChannelKind, String> {
        BTreeMap::from([(self.kind, self.id.clone())])
    }
}

/// Event name (and channel) used when replaying a captured crash
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrashBinding {
    pub event: String,
    pub channel: Option<Channel>,
}

/// Snapshot of the settings diagnostics depend on
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiagnosticSettings {
    pub debug: bool,
    pub fatal_policy: FatalPolicy,
    pub environment: Environment,
}

#[derive(Debug, Default)]
struct ContextState {
    user_traits: Map<String, Value>,
    debug: bool,
    disabled: bool,
    environment: Environment,
    fatal_policy: FatalPolicy,
    crash_binding: Option<CrashBinding>,
}

/// Mutable client context shared by all caller threads
#[derive(Debug, Default)]
pub struct ContextStore {
    state: Mutex<ContextState>,
}

impl ContextStore {
    pub fn new() -> Self {
        Self::default()
    }

    // A panic while holding the guard must not take telemetry down with it.
    fn lock(&self) -> MutexGuard<'_, ContextState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record the current user.
    ///
    /// Identity fields are always written. Metadata must serialize to an
    /// object; its top-level keys are stored lowercased. Non-object metadata
    /// is rejected with [`Error::Schema`] after the identity fields are stored.
    pub fn set_user(
        &self,
        id: &str,
        name: Option<&str>,
        email: Option<&str>,
        metadata: Option<Value>,
    ) -> Result<()> {
        let mut state = self.lock();

        if let Some(name) = name {
            state
                .user_traits
                .insert(NAME_TRAIT.to_string(), Value::String(name.to_string()));
        }
        if let Some(email) = email {
            state
                .user_traits
                .insert(EMAIL_TRAIT.to_string(), Value::String(email.to_string()));
        }
        state
            .user_traits
            .insert(USER_ID_TRAIT.to_string(), Value::String(id.to_string()));

        match metadata {
            None => Ok(()),
            Some(Value::Object(fields)) => {
                for (key, value) in fields {
                    state.user_traits.insert(key.to_lowercase(), value);
                }
                Ok(())
            }
            Some(other) => Err(Error::Schema(format!(
                "user metadata must be an object, got {}",
                value_kind(&other)
            ))),
        }
    }

    /// Copy of the current user traits
    pub fn user_traits(&self) -> Map<String, Value> {
        self.lock().user_traits.clone()
    }

    /// The `UserID` trait, if a user was set
    pub fn user_id(&self) -> Option<Value> {
        self.lock().user_traits.get(USER_ID_TRAIT).cloned()
    }

    pub fn set_debug(&self, enabled: bool, policy: FatalPolicy) {
        let mut state = self.lock();
        state.debug = enabled;
        state.fatal_policy = policy;
    }

    pub fn set_disabled(&self, disabled: bool) {
        self.lock().disabled = disabled;
    }

    pub fn is_disabled(&self) -> bool {
        self.lock().disabled
    }

    pub fn environment(&self) -> Environment {
        self.lock().environment
    }

    pub fn set_environment(&self, environment: Environment) {
        self.lock().environment = environment;
    }

    pub fn bind_crash(&self, binding: CrashBinding) {
        self.lock().crash_binding = Some(binding);
    }

    pub fn crash_binding(&self) -> Option<CrashBinding> {
        self.lock().crash_binding.clone()
    }

    pub fn diagnostic_settings(&self) -> DiagnosticSettings {
        let state = self.lock();
        DiagnosticSettings {
            debug: state.debug,
            fatal_policy: state.fatal_policy,
            environment: state.environment,
        }
    }
}

/// Short name of a JSON value's type, for error messages
pub(crate) fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_set_user_writes_identity_traits() {
        let ctx = ContextStore::new();
        ctx.set_user("u1", Some("Ada"), Some("ada@example.com"), None)
            .unwrap();

        let traits = ctx.user_traits();
        assert_eq!(traits["UserID"], "u1");
        assert_eq!(traits["Name"], "Ada");
        assert_eq!(traits["Email"], "ada@example.com");
        assert_eq!(ctx.user_id(), Some(json!("u1")));
    }

    #[test]
    fn test_set_user_lowercases_metadata_keys() {
        let ctx = ContextStore::new();
        ctx.set_user("u1", None, None, Some(json!({"Plan": "pro", "SEATS": 3})))
            .unwrap();

        let traits = ctx.user_traits();
        assert_eq!(traits["plan"], "pro");
        assert_eq!(traits["seats"], 3);
        assert!(!traits.contains_key("Plan"));
        assert!(!traits.contains_key("Name"));
    }

    #[test]
    fn test_set_user_last_write_wins() {
        let ctx = ContextStore::new();
        ctx.set_user("u1", Some("Ada"), None, Some(json!({"plan": "free"})))
            .unwrap();
        ctx.set_user("u2", None, None, Some(json!({"plan": "pro"})))
            .unwrap();

        let traits = ctx.user_traits();
        assert_eq!(traits["UserID"], "u2");
        assert_eq!(traits["Name"], "Ada");
        assert_eq!(traits["plan"], "pro");
    }

    #[test]
    fn test_set_user_rejects_scalar_metadata() {
        let ctx = ContextStore::new();
        let err = ctx
            .set_user("u1", None, None, Some(json!(["a", "b"])))
            .unwrap_err();

        assert!(matches!(err, Error::Schema(_)));
        // identity still recorded
        assert_eq!(ctx.user_id(), Some(json!("u1")));
    }

    #[test]
    fn test_defaults() {
        let ctx = ContextStore::new();
        assert!(!ctx.is_disabled());
        assert_eq!(ctx.environment(), Environment::Production);
        assert!(ctx.crash_binding().is_none());
        assert_eq!(ctx.diagnostic_settings(), DiagnosticSettings::default());
    }

    #[test]
    fn test_channel_wire_form() {
        let channel = Channel::slack("C123");
        let value = serde_json::to_value(channel.to_map()).unwrap();
        assert_eq!(value, json!({"slack": "C123"}));
    }
}
