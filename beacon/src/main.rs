//! beacon - command-line companion for the beacon telemetry client
//!
//! This tool provides commands for:
//! - Checking ingest configuration and pending-crash state
//! - Sending a single event and waiting for the server's answer
//! - Inspecting, replaying and clearing the pending crash record
//!
//! Uses XDG Base Directory specification for file locations:
//! - Crash store: $XDG_DATA_HOME/beacon/state.db (~/.local/share/beacon/state.db)
//! - Config: $XDG_CONFIG_HOME/beacon/config.toml (~/.config/beacon/config.toml)
//! - Logs: $XDG_STATE_HOME/beacon/beacon.log

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use beacon_core::crash::CrashStore;
use beacon_core::db::SqliteStore;
use beacon_core::{Beacon, Channel, Config, EventOptions, FatalPolicy};
use clap::{Parser, Subcommand};
use serde_json::Value;

#[derive(Parser)]
#[command(name = "beacon")]
#[command(about = "Send telemetry events and manage crash replay")]
#[command(version)]
struct Args {
    /// Write a log file to the XDG state directory
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Show ingest configuration and pending-crash state
    Status,

    /// Send one event and wait for delivery
    Send {
        /// Event name, e.g. "order.created"
        event: String,

        /// Human-readable description
        description: String,

        /// Extra tag (repeatable)
        #[arg(short, long = "tag")]
        tags: Vec<String>,

        /// Metadata as a JSON object
        #[arg(short, long)]
        meta: Option<String>,

        /// Slack channel to notify
        #[arg(short, long)]
        channel: Option<String>,

        /// User id attached to the event
        #[arg(short, long)]
        user: Option<String>,

        /// Seconds to wait for the server
        #[arg(long, default_value_t = 30)]
        wait: u64,
    },

    /// Show the pending crash record
    Pending,

    /// Replay the pending crash record as the given event
    Replay {
        /// Event name used for the crash report
        event: String,

        /// Slack channel to notify
        #[arg(short, long)]
        channel: Option<String>,

        /// Seconds to wait for the server
        #[arg(long, default_value_t = 30)]
        wait: u64,
    },

    /// Delete the pending crash record
    Clear,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = Config::load().context("failed to load configuration")?;
    // The CLI never arms the panic hook; it only replays what the host app captured.
    config.crash.capture_panics = false;

    let _log_guard = if args.verbose {
        Some(beacon_core::logging::init(&config.logging).context("failed to initialize logging")?)
    } else {
        None
    };

    match args.command {
        Command::Status => cmd_status(&config),
        Command::Send {
            event,
            description,
            tags,
            meta,
            channel,
            user,
            wait,
        } => cmd_send(
            config,
            SendArgs {
                event,
                description,
                tags,
                meta,
                channel,
                user,
                wait: Duration::from_secs(wait),
            },
        ),
        Command::Pending => cmd_pending(&config),
        Command::Replay {
            event,
            channel,
            wait,
        } => cmd_replay(config, event, channel, Duration::from_secs(wait)),
        Command::Clear => cmd_clear(&config),
    }
}

fn crash_store(config: &Config) -> Result<CrashStore> {
    let path = config.crash.resolved_store_path();
    let store = SqliteStore::open(&path)
        .with_context(|| format!("failed to open crash store at {}", path.display()))?;
    Ok(CrashStore::new(Arc::new(store)))
}

fn cmd_status(config: &Config) -> Result<()> {
    println!("Beacon Configuration");
    println!("====================");
    println!();

    let ingest = &config.ingest;
    println!("Endpoint:        {}", ingest.endpoint);
    println!(
        "Project:         {}",
        ingest.resolved_project().as_deref().unwrap_or("<not set>")
    );
    println!(
        "API Key:         {}",
        if ingest.resolved_api_key().is_some() {
            "<set>"
        } else {
            "<not set>"
        }
    );
    println!("Throttle:        {}/min", ingest.throttle_per_minute);
    println!("Timeout:         {}s", ingest.timeout_secs);
    println!(
        "Crash Store:     {}",
        config.crash.resolved_store_path().display()
    );
    println!("Max Replays:     {}", config.crash.max_replay_attempts);
    println!("Log Dir:         {}", Config::state_dir().display());

    println!();
    if ingest.resolved_api_key().is_some() && ingest.resolved_project().is_some() {
        println!("Status: Ready to send");
    } else {
        println!("Status: Not ready (missing required configuration)");
        println!();
        println!("Set them in {} or the environment:", Config::config_path().display());
        println!();
        println!("  [ingest]");
        println!("  api_key = \"en_live_xxxxxxxxxxxx\"");
        println!("  project = \"my-app\"");
    }

    println!();
    match crash_store(config)?.load()? {
        Some(record) => println!(
            "Pending Crash:   {} (attempts: {}, run 'replay' to send)",
            record.name, record.attempts
        ),
        None => println!("Pending Crash:   none"),
    }

    Ok(())
}

struct SendArgs {
    event: String,
    description: String,
    tags: Vec<String>,
    meta: Option<String>,
    channel: Option<String>,
    user: Option<String>,
    wait: Duration,
}

fn cmd_send(config: Config, args: SendArgs) -> Result<()> {
    if config.ingest.resolved_api_key().is_none() {
        bail!("API key is not configured. Run 'status' for details.");
    }

    let mut options = EventOptions::new().tags(args.tags);
    if let Some(raw) = &args.meta {
        let meta: Value = serde_json::from_str(raw).context("--meta is not valid JSON")?;
        if !meta.is_object() {
            bail!("--meta must be a JSON object");
        }
        options = options.metadata(&meta);
    }
    if let Some(channel) = args.channel {
        options = options.channel(Channel::slack(channel));
    }

    let beacon = Beacon::new(config).context("failed to create client")?;
    beacon.set_debug(true, FatalPolicy::Log);
    if let Some(user) = &args.user {
        beacon.set_user(user, None, None, None);
    }

    beacon.ingest(&args.event, &args.description, options);
    if !beacon.wait_idle(args.wait) {
        bail!("timed out after {}s waiting for the server", args.wait.as_secs());
    }

    let stats = beacon.stats();
    tracing::debug!(?stats, "Send finished");
    if stats.delivered == 0 {
        bail!(
            "event '{}' was not delivered (throttled: {}, dropped: {}, failed: {})",
            args.event,
            stats.throttled,
            stats.dropped,
            stats.failed
        );
    }

    println!("Delivered '{}'", args.event);
    println!("Environment:     {:?}", beacon.environment());
    Ok(())
}

fn cmd_pending(config: &Config) -> Result<()> {
    let Some(record) = crash_store(config)?.load()? else {
        println!("No pending crash");
        return Ok(());
    };

    println!("Pending Crash");
    println!("=============");
    println!();
    println!("ID:              {}", record.id);
    println!("Name:            {}", record.name);
    println!(
        "Reason:          {}",
        record.reason.as_deref().unwrap_or("<unknown>")
    );
    println!("Captured At:     {}", record.captured_at.to_rfc3339());
    println!(
        "Attempts:        {}/{}",
        record.attempts, config.crash.max_replay_attempts
    );
    Ok(())
}

fn cmd_replay(
    config: Config,
    event: String,
    channel: Option<String>,
    wait: Duration,
) -> Result<()> {
    if config.ingest.resolved_api_key().is_none() {
        bail!("API key is not configured. Run 'status' for details.");
    }
    let max_attempts = config.crash.max_replay_attempts;

    let beacon = Beacon::new(config).context("failed to create client")?;
    let Some(record) = beacon.pending_crash()? else {
        println!("No pending crash");
        return Ok(());
    };

    beacon.set_debug(true, FatalPolicy::Log);
    println!("Replaying '{}' as {}...", record.name, event);
    beacon.bind_crash(event, channel.map(Channel::slack));

    if !beacon.wait_idle(wait) {
        bail!("timed out after {}s waiting for the server", wait.as_secs());
    }

    if beacon.stats().dispatched == 0 {
        if record.attempts >= max_attempts {
            println!("Record discarded after {} replay attempts", record.attempts);
            return Ok(());
        }
        bail!("crash report was not sent");
    }

    match beacon.pending_crash()? {
        None => println!("Crash report delivered; record cleared"),
        Some(left) if left.id == record.id => bail!(
            "crash report not acknowledged (attempt {}/{}); record kept",
            left.attempts,
            max_attempts
        ),
        Some(_) => println!("Crash report delivered; a newer crash is pending"),
    }
    Ok(())
}

fn cmd_clear(config: &Config) -> Result<()> {
    let crashes = crash_store(config)?;
    if crashes.load()?.is_none() {
        println!("No pending crash");
        return Ok(());
    }
    crashes.clear()?;
    println!("Pending crash cleared");
    Ok(())
}
