//! The caller-facing handle
//!
//! A [`Beacon`] owns everything one telemetry client needs: the context, the
//! throttle gate, the delivery channel, the crash store and a small tokio
//! runtime that performs the network sends. Every caller operation returns
//! immediately; failures are reported through [`crate::diagnostics`].
//!
//! ```no_run
//! use beacon_core::{Beacon, Channel, Config, EventOptions};
//! use serde_json::json;
//!
//! let beacon = Beacon::new(Config::load()?)?;
//! beacon.bind_crash("app.crash", Some(Channel::slack("C123")));
//! beacon.set_user("u-42", Some("Ada"), None, Some(json!({"plan": "pro"})));
//! beacon.ingest(
//!     "order.created",
//!     "Order placed",
//!     EventOptions::new().metadata(&json!({"amount": 42})).tag("checkout"),
//! );
//! # Ok::<(), beacon_core::Error>(())
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::runtime::{Handle, Runtime};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::config::{Config, MAX_THROTTLE_PER_MINUTE};
use crate::context::{Channel, ContextStore, CrashBinding, Environment, FatalPolicy};
use crate::crash::{self, CrashStore, PendingCrash, ABORT_GRACE};
use crate::db::{KeyValueStore, SqliteStore};
use crate::delivery::{
    Delivery, DeliveryStats, HttpTransport, OutboundRequest, StatsCounters, Transport,
};
use crate::diagnostics;
use crate::error::{Error, Result};
use crate::event::{compose, ComposeContext, EventOptions};
use crate::system::{HostFacts, SystemFactProvider};
use crate::throttle::{ThrottleGate, Usage, WINDOW};

/// Builder for a [`Beacon`] with replaceable collaborators
pub struct BeaconBuilder {
    config: Config,
    facts: Option<Box<dyn SystemFactProvider>>,
    transport: Option<Arc<dyn Transport>>,
    store: Option<Arc<dyn KeyValueStore>>,
    runtime_handle: Option<Handle>,
}

impl BeaconBuilder {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            facts: None,
            transport: None,
            store: None,
            runtime_handle: None,
        }
    }

    /// Use these facts instead of detecting them from the host.
    pub fn facts(mut self, facts: impl SystemFactProvider + 'static) -> Self {
        self.facts = Some(Box::new(facts));
        self
    }

    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Keep the pending crash record in `store` instead of the SQLite file.
    pub fn store(mut self, store: Arc<dyn KeyValueStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Spawn sends on an existing runtime instead of owning one.
    ///
    /// [`Beacon::wait_idle`] cannot be used from inside that runtime; await
    /// [`Beacon::idle`] there instead.
    pub fn runtime_handle(mut self, handle: Handle) -> Self {
        self.runtime_handle = Some(handle);
        self
    }

    pub fn build(self) -> Result<Beacon> {
        let config = self.config;

        let (runtime, handle) = match self.runtime_handle {
            Some(handle) => (None, handle),
            None => {
                let runtime = tokio::runtime::Builder::new_multi_thread()
                    .worker_threads(1)
                    .thread_name("beacon-delivery")
                    .enable_all()
                    .build()
                    .map_err(|e| Error::Runtime(format!("failed to create runtime: {}", e)))?;
                let handle = runtime.handle().clone();
                (Some(runtime), handle)
            }
        };

        let transport = match self.transport {
            Some(transport) => transport,
            None => Arc::new(HttpTransport::new()?),
        };
        let store = match self.store {
            Some(store) => store,
            None => Arc::new(SqliteStore::open(&config.crash.resolved_store_path())?),
        };
        let facts = self.facts.unwrap_or_else(|| {
            Box::new(HostFacts::detect(
                config.ingest.app_version.clone(),
                config.system.clone(),
            ))
        });

        if config.ingest.throttle_per_minute > MAX_THROTTLE_PER_MINUTE {
            tracing::debug!(
                requested = config.ingest.throttle_per_minute,
                "Throttle clamped to {}",
                MAX_THROTTLE_PER_MINUTE
            );
        }
        let gate = ThrottleGate::new(config.ingest.throttle_per_minute);
        let reset_timer = gate.spawn_reset_timer(&handle, WINDOW);

        let (in_flight, _) = watch::channel(0usize);

        let inner = Arc::new(Inner {
            context: ContextStore::new(),
            gate,
            crashes: CrashStore::new(store),
            delivery: Delivery::new(&config.ingest, transport),
            stats: StatsCounters::default(),
            in_flight,
            facts,
            replaying: AtomicBool::new(false),
            max_replay_attempts: config.crash.max_replay_attempts,
            abort_on_crash: config.crash.abort_on_crash,
            capture_panics: config.crash.capture_panics,
        });

        tracing::debug!(
            endpoint = inner.delivery.endpoint(),
            project = ?inner.delivery.project(),
            "Beacon ready"
        );

        Ok(Beacon {
            inner,
            handle,
            reset_timer,
            runtime,
        })
    }
}

/// Telemetry client handle. `Send + Sync`; share it behind an `Arc`.
pub struct Beacon {
    inner: Arc<Inner>,
    handle: Handle,
    reset_timer: JoinHandle<()>,
    runtime: Option<Runtime>,
}

impl Beacon {
    /// Build a client with host facts, HTTP delivery and the SQLite crash store.
    pub fn new(config: Config) -> Result<Self> {
        BeaconBuilder::new(config).build()
    }

    pub fn builder(config: Config) -> BeaconBuilder {
        BeaconBuilder::new(config)
    }

    /// Toggle verbose diagnostics and the policy for error-class diagnostics.
    pub fn set_debug(&self, enabled: bool, policy: FatalPolicy) {
        self.inner.context.set_debug(enabled, policy);
    }

    /// Record the current user, then replay a pending crash if one is bound.
    ///
    /// `metadata` must be a JSON object; its keys are merged (lowercased)
    /// into the user traits. Anything else is reported and ignored.
    pub fn set_user(
        &self,
        id: &str,
        name: Option<&str>,
        email: Option<&str>,
        metadata: Option<Value>,
    ) {
        if let Err(e) = self.inner.context.set_user(id, name, email, metadata) {
            diagnostics::report(&self.inner.context, 422, &e.to_string());
        }
        self.inner.replay_pending(&self.handle);
    }

    /// Change the per-minute limit. Values above 20 are ignored.
    pub fn set_throttle(&self, limit: u32) -> bool {
        let accepted = self.inner.gate.set_limit(limit);
        if !accepted {
            tracing::debug!(limit, "Throttle above {} ignored", MAX_THROTTLE_PER_MINUTE);
        }
        accepted
    }

    /// While disabled, [`Beacon::ingest`] does nothing.
    pub fn set_disabled(&self, disabled: bool) {
        self.inner.context.set_disabled(disabled);
    }

    /// Register the event used to report crashes and arm crash capture.
    ///
    /// The panic hook is installed once per process; later calls only change
    /// the binding. A crash captured by a previous run is replayed right away.
    pub fn bind_crash(&self, event: impl Into<String>, channel: Option<Channel>) {
        self.inner.context.bind_crash(CrashBinding {
            event: event.into(),
            channel,
        });

        if self.inner.capture_panics {
            let abort_after = self.inner.abort_on_crash.then_some(ABORT_GRACE);
            crash::install_panic_hook(self.inner.crashes.clone(), abort_after);
        }

        self.inner.replay_pending(&self.handle);
    }

    /// Compose an event and send it in the background.
    pub fn ingest(&self, event: impl AsRef<str>, description: &str, options: EventOptions) {
        if self.inner.context.is_disabled() {
            return;
        }
        self.inner
            .dispatch(&self.handle, event.as_ref(), description, options, None);
    }

    /// Replay the pending crash record now. Returns whether a send was started.
    pub fn replay_pending(&self) -> bool {
        self.inner.replay_pending(&self.handle)
    }

    pub fn pending_crash(&self) -> Result<Option<PendingCrash>> {
        self.inner.crashes.load()
    }

    pub fn clear_pending_crash(&self) -> Result<()> {
        self.inner.crashes.clear()
    }

    /// Environment last reported by the server
    pub fn environment(&self) -> Environment {
        self.inner.context.environment()
    }

    pub fn stats(&self) -> DeliveryStats {
        self.inner.stats.snapshot()
    }

    pub fn usage(&self) -> Usage {
        self.inner.gate.usage()
    }

    /// Start a new throttle window without waiting for the timer.
    pub fn reset_throttle_window(&self) {
        self.inner.gate.reset_window();
    }

    /// Block until every started send has completed or `timeout` elapses.
    ///
    /// Returns `true` when idle. Must not be called from an async context.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let inner = Arc::clone(&self.inner);
        self.handle
            .block_on(async move { tokio::time::timeout(timeout, inner.idle()).await })
            .is_ok()
    }

    /// Wait until every started send has completed.
    pub async fn idle(&self) {
        self.inner.idle().await;
    }
}

impl Drop for Beacon {
    fn drop(&mut self) {
        self.reset_timer.abort();
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}

impl std::fmt::Debug for Beacon {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Beacon")
            .field("endpoint", &self.inner.delivery.endpoint())
            .field("project", &self.inner.delivery.project())
            .field("stats", &self.inner.stats.snapshot())
            .finish_non_exhaustive()
    }
}

struct Inner {
    context: ContextStore,
    gate: Arc<ThrottleGate>,
    crashes: CrashStore,
    delivery: Delivery,
    stats: StatsCounters,
    in_flight: watch::Sender<usize>,
    facts: Box<dyn SystemFactProvider>,
    /// Set while a crash replay is between dispatch and completion
    replaying: AtomicBool,
    max_replay_attempts: u32,
    abort_on_crash: bool,
    capture_panics: bool,
}

impl Inner {
    /// Compose, admit and spawn one send. Returns whether it was spawned.
    ///
    /// `replay` is the crash record this send reports. Its advanced attempt
    /// counter is persisted only once the send holds a committed slot.
    fn dispatch(
        self: &Arc<Self>,
        handle: &Handle,
        name: &str,
        description: &str,
        options: EventOptions,
        replay: Option<&PendingCrash>,
    ) -> bool {
        let project = self.delivery.project();
        if project.is_none() {
            diagnostics::report_error(
                &self.context,
                &Error::ConfigurationMissing("project is not configured".to_string()),
            );
        }

        let traits = self.context.user_traits();
        let facts = self.facts.facts();
        let record = match compose(
            name,
            description,
            options,
            ComposeContext {
                project,
                user_traits: &traits,
                facts: &facts,
            },
        ) {
            Ok(record) => record,
            Err(e) => {
                self.stats.dropped();
                diagnostics::report_error(&self.context, &e);
                return false;
            }
        };

        let permit = match self.gate.admit() {
            Ok(permit) => permit,
            Err(e) => {
                self.stats.throttled();
                diagnostics::report_error(&self.context, &e);
                return false;
            }
        };

        // A request that cannot be built drops the permit, releasing its slot.
        let request = match self.delivery.build_request(&record) {
            Ok(request) => request,
            Err(e) => {
                self.stats.dropped();
                diagnostics::report_error(&self.context, &e);
                return false;
            }
        };

        if self.context.diagnostic_settings().debug {
            tracing::debug!(
                event = name,
                payload = %String::from_utf8_lossy(&request.body),
                "Payload Sent"
            );
        }

        self.in_flight.send_modify(|n| *n += 1);
        let guard = InFlight(Arc::clone(self));
        permit.commit();
        self.stats.dispatched();

        if let Some(record) = replay {
            if let Err(e) = self.crashes.save(record) {
                tracing::warn!(error = %e, "Failed to record crash replay attempt");
            }
        }
        let replay = replay.map(|record| record.id);

        let inner = Arc::clone(self);
        handle.spawn(async move {
            inner.complete(request, replay).await;
            drop(guard);
        });
        true
    }

    async fn complete(&self, request: OutboundRequest, replay: Option<Uuid>) {
        match self.delivery.send(request).await {
            Ok(completion) => {
                if let Some(environment) = completion.environment() {
                    self.context.set_environment(environment);
                }
                match completion.outcome(self.delivery.project()) {
                    Ok(()) => {
                        self.stats.delivered();
                        diagnostics::report(&self.context, completion.status, "Ingest Stored");
                        if let Some(id) = replay {
                            match self.crashes.clear_if(id) {
                                Ok(true) => tracing::debug!(%id, "Pending crash acknowledged"),
                                Ok(false) => {}
                                Err(e) => {
                                    tracing::warn!(error = %e, "Failed to clear pending crash")
                                }
                            }
                        }
                    }
                    Err(e) => {
                        self.stats.failed();
                        diagnostics::report_error(&self.context, &e);
                    }
                }
            }
            Err(e) => {
                self.stats.failed();
                diagnostics::report_error(&self.context, &e);
            }
        }

        if replay.is_some() {
            self.replaying.store(false, Ordering::SeqCst);
        }
    }

    /// Replay the pending crash record through the normal send path.
    fn replay_pending(self: &Arc<Self>, handle: &Handle) -> bool {
        let Some(binding) = self.context.crash_binding() else {
            return false;
        };
        if self.context.is_disabled() {
            return false;
        }
        if self.replaying.swap(true, Ordering::SeqCst) {
            tracing::debug!("Crash replay already in flight");
            return false;
        }

        let started = self.start_replay(handle, binding);
        if !started {
            self.replaying.store(false, Ordering::SeqCst);
        }
        started
    }

    fn start_replay(self: &Arc<Self>, handle: &Handle, binding: CrashBinding) -> bool {
        let record = match self.crashes.load() {
            Ok(Some(record)) => record,
            Ok(None) => return false,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to read pending crash");
                return false;
            }
        };

        if record.attempts >= self.max_replay_attempts {
            tracing::warn!(
                name = %record.name,
                attempts = record.attempts,
                "Discarding pending crash after too many replays"
            );
            if let Err(e) = self.crashes.clear() {
                tracing::warn!(error = %e, "Failed to discard pending crash");
            }
            return false;
        }

        if !self.delivery.has_api_key() {
            diagnostics::report_error(
                &self.context,
                &Error::ConfigurationMissing(
                    "API key is missing, crash replay skipped".to_string(),
                ),
            );
            return false;
        }

        // Throttled or undeliverable replays leave the stored counter alone.
        let record = record.next_attempt();
        let mut options = EventOptions::new().metadata(&record.metadata());
        if let Some(channel) = binding.channel {
            options = options.channel(channel);
        }
        let started = self.dispatch(
            handle,
            &binding.event,
            &record.description(),
            options,
            Some(&record),
        );

        if started {
            diagnostics::report(
                &self.context,
                500,
                &format!("Crash Previously Detected '{}'", record.name),
            );
        }
        started
    }

    async fn idle(&self) {
        let mut rx = self.in_flight.subscribe();
        // The sender lives in `self`, so the channel cannot close here.
        let _ = rx.wait_for(|n| *n == 0).await;
    }
}

/// Counts a spawned send until its completion has been processed
struct InFlight(Arc<Inner>);

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.in_flight.send_modify(|n| *n = n.saturating_sub(1));
    }
}
