//! altshift daemon
//!
//! Grabs keyboards and pointers and rewrites left-Alt shortcuts into Ctrl
//! chords according to the profile of the focused application.

use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use altshift_config::LogLevel;
use altshift_daemon::hook::{HookOptions, Hooks, HotplugEvent, HotplugMonitor};
use altshift_daemon::niri::{run_focus_tracker, FocusTracker};
use altshift_daemon::special::{NiriWindowOps, SpecialWorker, WindowOps};
use altshift_daemon::store::{MappingStore, ProfileWatcher, RetryPolicy};
use anyhow::{anyhow, Context, Result};
use clap::Parser;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

/// How often the hook health is checked
const HEALTH_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Parser, Debug)]
#[command(name = "altshiftd")]
#[command(about = "Alt-to-Ctrl shortcut translation daemon")]
struct Args {
    /// Path to settings file
    #[arg(short, long, default_value = "~/.config/altshift/config.kdl")]
    config: String,

    /// Log level, overrides the settings file (RUST_LOG wins over both)
    #[arg(short, long)]
    log_level: Option<LogLevel>,

    /// Start with translation disabled
    #[arg(long)]
    disabled: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Expand tilde in config path
    let config_path: PathBuf = shellexpand::tilde(&args.config).into_owned().into();

    // Settings are read before tracing starts so their log level applies
    let settings = altshift_config::parse_settings(&config_path);
    let level = args
        .log_level
        .or_else(|| settings.as_ref().ok().map(|s| s.log_level))
        .unwrap_or_default();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_filter())),
        )
        .init();

    let settings = settings
        .with_context(|| format!("Failed to load settings from {}", config_path.display()))?;
    tracing::info!("Loaded settings from {}", config_path.display());

    let profiles_dir: PathBuf = shellexpand::tilde(&settings.profiles_dir.to_string_lossy())
        .into_owned()
        .into();

    // Reload problems never stop the daemon, they end up here
    let (error_tx, mut error_rx) = mpsc::unbounded_channel::<String>();
    let error_log = tokio::spawn(async move {
        while let Some(message) = error_rx.recv().await {
            tracing::warn!("{}", message);
        }
    });

    let store = Arc::new(
        MappingStore::open(&profiles_dir, Some(error_tx))
            .context("Cannot start without a profile directory")?,
    );
    let policy = RetryPolicy::from_settings(&settings);

    match tokio::task::block_in_place(|| store.reload_with_retry(&policy)) {
        Ok(report) => {
            let snapshot = store.snapshot();
            tracing::info!(
                "Loaded {} profile(s) from {}: {} process table(s), {} fallback mapping(s)",
                report.loaded,
                profiles_dir.display(),
                snapshot.process_count(),
                snapshot.fallback().len()
            );
        }
        Err(e) => tracing::warn!("Initial profile load incomplete: {}", e),
    }

    let watcher = match ProfileWatcher::spawn(Arc::clone(&store), policy, settings.debounce) {
        Ok(watcher) => Some(watcher),
        Err(e) => {
            tracing::warn!("Profile hot reload unavailable: {}", e);
            None
        }
    };

    let focus = Arc::new(FocusTracker::new());
    let focus_task = tokio::spawn(run_focus_tracker(Arc::clone(&focus)));

    let special = SpecialWorker::spawn(|| {
        let ops = NiriWindowOps::new()?;
        Ok(Box::new(ops) as Box<dyn WindowOps>)
    })
    .context("Failed to start special action worker")?;

    let hooks = Hooks::new(
        Arc::clone(&store),
        focus,
        Some(special.sender()),
        settings.enabled && !args.disabled,
        HookOptions {
            mouse_swap: settings.mouse_swap,
            mouse_watchdog: settings.mouse_watchdog,
        },
    );
    let hooks = Arc::new(Mutex::new(hooks));

    tokio::task::block_in_place(|| lock(&hooks)?.install().map_err(anyhow::Error::from))
        .context("Failed to install input hooks")?;

    let (hotplug_tx, hotplug_rx) = mpsc::unbounded_channel();
    let hotplug = match tokio::task::block_in_place(|| HotplugMonitor::spawn(hotplug_tx)) {
        Ok(monitor) => Some(monitor),
        Err(e) => {
            tracing::warn!("Device hotplug unavailable, new devices wait for a reinstall: {}", e);
            None
        }
    };
    let hotplug_task = tokio::spawn(apply_hotplug(Arc::clone(&hooks), hotplug_rx));

    // reinstall-after-secs 0 turns the health monitor off
    let health = (!settings.reinstall_after.is_zero())
        .then(|| tokio::spawn(health_monitor(Arc::clone(&hooks), settings.reinstall_after)));

    tracing::info!("altshift daemon running");

    shutdown_signal().await?;

    tracing::info!("Shutting down...");

    focus_task.abort();
    hotplug_task.abort();
    let _ = hotplug_task.await;
    drop(hotplug);
    if let Some(health) = health {
        health.abort();
        let _ = health.await;
    }
    tokio::task::block_in_place(|| -> Result<()> {
        lock(&hooks)?.uninstall();
        Ok(())
    })?;

    // The hooks hold special-action senders; the worker goes after them
    drop(hooks);
    drop(special);
    drop(watcher);
    drop(store);
    let _ = error_log.await;

    Ok(())
}

fn lock(hooks: &Mutex<Hooks>) -> Result<MutexGuard<'_, Hooks>> {
    hooks.lock().map_err(|_| anyhow!("hook state poisoned"))
}

/// Grab devices as they are plugged in
async fn apply_hotplug(hooks: Arc<Mutex<Hooks>>, mut events: mpsc::UnboundedReceiver<HotplugEvent>) {
    while let Some(event) = events.recv().await {
        let hooks = Arc::clone(&hooks);
        let result = tokio::task::spawn_blocking(move || -> Result<()> {
            lock(&hooks)?.handle_hotplug(&event);
            Ok(())
        })
        .await;

        match result {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::error!("Hotplug handling failed: {:#}", e),
            Err(e) => tracing::error!("Hotplug task failed: {}", e),
        }
    }
}

/// Reinstall the hooks when the keyboard thread died or input went quiet
async fn health_monitor(hooks: Arc<Mutex<Hooks>>, reinstall_after: Duration) {
    let mut interval = tokio::time::interval(HEALTH_INTERVAL.min(reinstall_after));
    // The first tick completes immediately
    interval.tick().await;

    loop {
        interval.tick().await;

        let hooks = Arc::clone(&hooks);
        let result = tokio::task::spawn_blocking(move || -> Result<bool> {
            let mut hooks = lock(&hooks)?;
            if !hooks.needs_reinstall(reinstall_after) {
                return Ok(false);
            }
            tracing::warn!(
                last_event_age = ?hooks.last_event_age(),
                "Input hooks look dead, reinstalling"
            );
            hooks.reinstall()?;
            Ok(true)
        })
        .await;

        match result {
            Ok(Ok(true)) => tracing::info!("Input hooks reinstalled"),
            Ok(Ok(false)) => {}
            Ok(Err(e)) => tracing::error!("Hook reinstall failed: {:#}", e),
            Err(e) => tracing::error!("Health check task failed: {}", e),
        }
    }
}

async fn shutdown_signal() -> Result<()> {
    let mut terminate = signal(SignalKind::terminate()).context("Failed to listen for SIGTERM")?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => result.context("Failed to listen for Ctrl+C")?,
        _ = terminate.recv() => {}
    }
    Ok(())
}
