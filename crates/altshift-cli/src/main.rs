//! altshift CLI
//!
//! Profile validation and shortcut helpers for altshift.

use std::path::{Path, PathBuf};
use std::sync::mpsc;

use altshift_config::{format_trigger, key_name, key_names, SpecialAction, TriggerKey};
use altshift_daemon::event_value;
use altshift_daemon::hook::{enumerate_devices, DeviceKind};
use altshift_daemon::modifiers::{is_modifier, ModifierTracker};
use altshift_daemon::store::MappingStore;
use clap::{Parser, Subcommand};
use evdev::{InputEventKind, Key};
use miette::IntoDiagnostic;

#[derive(Parser, Debug)]
#[command(name = "altshift")]
#[command(about = "Alt-to-Ctrl shortcut translation tool")]
#[command(version)]
struct Cli {
    /// Path to settings file
    #[arg(short, long, default_value = "~/.config/altshift/config.kdl")]
    config: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Validate the settings file and every profile
    Validate {
        /// Profile directory (overrides the settings file)
        #[arg(short, long)]
        profiles: Option<PathBuf>,
    },

    /// List the key names accepted in triggers and actions
    Keys,

    /// List available input devices
    Devices,

    /// Print the trigger for each Alt chord pressed (stop the daemon first)
    Record {
        /// Stop after this many chords
        #[arg(short = 'n', long, default_value_t = 1)]
        count: usize,
    },
}

fn main() -> miette::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();

    // Expand tilde in config path
    let config_path: PathBuf = shellexpand::tilde(&cli.config).into_owned().into();

    match cli.command {
        Commands::Validate { profiles } => cmd_validate(&config_path, profiles),
        Commands::Keys => cmd_keys(),
        Commands::Devices => cmd_devices(),
        Commands::Record { count } => cmd_record(count),
    }
}

fn cmd_validate(config_path: &Path, profiles: Option<PathBuf>) -> miette::Result<()> {
    println!("Validating settings: {}", config_path.display());

    let settings = altshift_config::parse_settings(config_path).map_err(miette::Report::new)?;
    println!("Settings are valid!");
    println!("  Log level: {}", settings.log_level.as_filter());
    println!("  Enabled: {}", settings.enabled);
    println!("  Mouse swap: {}", settings.mouse_swap);

    let dir = profiles.unwrap_or(settings.profiles_dir);
    let dir: PathBuf = shellexpand::tilde(&dir.to_string_lossy()).into_owned().into();
    println!("\nValidating profiles: {}", dir.display());

    let store = MappingStore::open(&dir, None).into_diagnostic()?;
    let report = store.reload().into_diagnostic()?;
    let snapshot = store.snapshot();

    println!("  Profiles loaded: {}", report.loaded);
    println!("  Process tables: {}", snapshot.process_count());
    println!("  Fallback mappings: {}", snapshot.fallback().len());

    let problems = report.messages();
    if problems.is_empty() {
        println!("Profiles are valid!");
        return Ok(());
    }

    println!("\nProblems:");
    for problem in &problems {
        println!("  - {}", problem);
    }
    Err(miette::miette!("{} problem(s) found", problems.len()))
}

fn cmd_keys() -> miette::Result<()> {
    println!("Modifiers: Alt, Shift, Ctrl (alias Control)");
    let specials: Vec<String> = SpecialAction::ALL.iter().map(ToString::to_string).collect();
    println!("Special actions: {}", specials.join(", "));
    println!("\nKeys:");

    let names: Vec<&str> = key_names().collect();
    for row in names.chunks(8) {
        println!("  {}", row.join("  "));
    }
    Ok(())
}

fn cmd_devices() -> miette::Result<()> {
    println!("Available input devices:\n");

    for info in enumerate_devices().into_diagnostic()? {
        let device_type = if info.is_virtual() {
            "altshift".to_string()
        } else {
            info.kind.map_or_else(|| "other".to_string(), |kind| kind.to_string())
        };

        println!("  {} [{}]", info.name, device_type);
        println!("    Path: {}", info.path.display());
        println!("    ID: {}", info.vendor_product());
        println!();
    }

    Ok(())
}

fn cmd_record(count: usize) -> miette::Result<()> {
    let (tx, rx) = mpsc::channel::<(Key, i32)>();
    let mut readers = 0;

    for info in enumerate_devices().into_diagnostic()? {
        if info.is_virtual() || info.kind != Some(DeviceKind::Keyboard) {
            continue;
        }
        let mut device = match evdev::Device::open(&info.path) {
            Ok(device) => device,
            Err(e) => {
                tracing::warn!("Could not open {}: {}", info.path.display(), e);
                continue;
            }
        };

        let tx = tx.clone();
        std::thread::spawn(move || loop {
            let events = match device.fetch_events() {
                Ok(events) => events,
                Err(e) => {
                    tracing::warn!("Stopped reading '{}': {}", info.name, e);
                    return;
                }
            };
            for event in events {
                if let InputEventKind::Key(key) = event.kind() {
                    if tx.send((key, event.value())).is_err() {
                        return;
                    }
                }
            }
        });
        readers += 1;
    }
    drop(tx);

    if readers == 0 {
        return Err(miette::miette!(
            "No keyboard could be opened (is the user in the 'input' group?)"
        ));
    }

    println!("Press Alt chords to record, Esc to stop.");

    let tracker = ModifierTracker::new();
    let mut recorded = 0;

    for (key, value) in rx {
        tracker.record(key, value);
        if value != event_value::PRESS || is_modifier(key) {
            continue;
        }
        if key == Key::KEY_ESC && !tracker.primary_down() {
            break;
        }

        let Some(name) = key_name(key) else {
            println!("  {:?} has no name in the shortcut grammar", key);
            continue;
        };

        if !tracker.primary_down() {
            println!("  {} (hold left Alt to record a trigger)", name);
            continue;
        }

        let trigger = TriggerKey::new(tracker.secondary_flags(), key);
        println!("{}", format_trigger(&trigger));
        recorded += 1;
        if recorded >= count {
            break;
        }
    }

    Ok(())
}
