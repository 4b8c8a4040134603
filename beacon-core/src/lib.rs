//! # beacon-core
//!
//! Client-side telemetry pipeline.
//!
//! This library provides:
//! - Event composition from user traits, host facts and call-site metadata
//! - A per-minute throttle with a fixed 60 second window
//! - Fire-and-forget delivery to an HTTP ingestion endpoint
//! - Crash capture through a panic hook, with replay on the next launch
//! - Configuration management and logging infrastructure
//!
//! ## Flow
//!
//! ```text
//! ingest -> compose (context + facts) -> throttle -> spawn send -> response
//!                                                         |
//!                              environment hint <---------+---> clear replayed crash
//! ```
//!
//! ## Example
//!
//! ```rust,no_run
//! use beacon_core::{Beacon, Config, EventOptions, FatalPolicy};
//!
//! let beacon = Beacon::new(Config::load()?)?;
//! beacon.set_debug(true, FatalPolicy::Log);
//! beacon.bind_crash("app.crash", None);
//! beacon.ingest("signup", "A user signed up", EventOptions::new().tag("web"));
//! # Ok::<(), beacon_core::Error>(())
//! ```

// Re-export commonly used items at the crate root
pub use client::{Beacon, BeaconBuilder};
pub use config::Config;
pub use context::{Channel, ChannelKind, Environment, FatalPolicy};
pub use crash::PendingCrash;
pub use delivery::{DeliveryStats, Transport};
pub use error::{Error, Result};
pub use event::{EventOptions, EventRecord};
pub use system::{SystemFactProvider, SystemFacts};

// Public modules
pub mod client;
pub mod config;
pub mod context;
pub mod crash;
pub mod db;
pub mod delivery;
pub mod diagnostics;
pub mod error;
pub mod event;
pub mod logging;
pub mod system;
pub mod throttle;
