use clap::Parser;
use color_eyre::{eyre::bail, eyre::eyre, Result};
use joypad_mapper::config::{EngineSettings, APP_NAME};
use joypad_mapper::control::{self, instance, signals, ControlSignal, Instance};
use joypad_mapper::daemon::Daemon;
use joypad_mapper::device::{hotplug, DeviceRegistry, EvdevBackend};
use joypad_mapper::layout::{LayoutError, LayoutManager, LayoutStore};
use joypad_mapper::output::{LogSink, OutputInjector, OutputSink, UinputSink};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

const HOTPLUG_BUFFER: usize = 16;

/// Maps joystick buttons, axes and hats to keyboard and mouse input
#[derive(Debug, Parser)]
#[command(name = APP_NAME, version, about)]
struct Cli {
    /// Directory to scan for joystick device nodes
    #[arg(short, long, value_name = "PATH")]
    device: Option<PathBuf>,

    /// Ask the running instance to rescan devices
    #[arg(short, long)]
    update: bool,

    /// Log output events instead of injecting them
    #[arg(long)]
    dry_run: bool,

    /// Where layouts and preferences are stored
    #[arg(long, value_name = "PATH")]
    settings_dir: Option<PathBuf>,

    /// More logging, repeat for trace output
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Layout to load, in this or the running instance
    layout: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    setup(cli.verbose)?;

    let mut settings = EngineSettings::default();
    if let Some(dir) = &cli.device {
        if !dir.is_dir() {
            bail!("{} is not a directory", dir.display());
        }
        settings.device_dir = dir.clone();
    }
    if let Some(dir) = &cli.settings_dir {
        settings.settings_dir = dir.clone();
    }

    let store = LayoutStore::new(&settings.settings_dir);
    // picked up by whichever instance ends up loading
    let pointer = match &cli.layout {
        Some(name) => store.set_last_used(name).await,
        None => Ok(()),
    };

    let lock = match instance::acquire(&settings.instance_lock)? {
        Instance::Primary(lock) => lock,
        Instance::Running { pid } => {
            check_pointer(pointer, false)?;
            return signal_running(pid, &cli);
        }
    };
    debug!("Holding {}", lock.path().display());
    check_pointer(pointer, true)?;

    run_primary(settings, store, cli.dry_run, cli.layout).await
}

/// A failed pointer write only matters when another instance has to read it;
/// the primary loads the requested layout directly
fn check_pointer(pointer: Result<(), LayoutError>, primary: bool) -> Result<()> {
    match pointer {
        Err(e) if primary => {
            warn!("Could not record requested layout: {}", e);
            Ok(())
        }
        other => Ok(other?),
    }
}

/// Second invocation: forwards the request and exits
fn signal_running(pid: i32, cli: &Cli) -> Result<()> {
    if cli.update {
        signals::deliver(pid, ControlSignal::RescanDevices)?;
    }
    if cli.layout.is_some() {
        signals::deliver(pid, ControlSignal::ReloadLayout)?;
    }
    if !cli.update && cli.layout.is_none() {
        bail!(
            "{} is already running (pid {}); pass a layout name or --update",
            APP_NAME,
            pid
        );
    }
    Ok(())
}

async fn run_primary(
    settings: EngineSettings,
    store: LayoutStore,
    dry_run: bool,
    layout: Option<String>,
) -> Result<()> {
    let injector = OutputInjector::shared(output_sink(dry_run));
    let registry = DeviceRegistry::new(Arc::new(EvdevBackend::new()), &settings.device_dir);
    let (mut manager, exits) = LayoutManager::new(registry, store, injector, &settings).await;

    let cancel = CancellationToken::new();
    let (control_tx, control_rx) = control::channel();
    let signal_task = signals::install(control_tx, cancel.clone())?;

    let (hotplug_tx, hotplug_rx) = mpsc::channel(HOTPLUG_BUFFER);
    let hotplug = match hotplug::spawn_monitor(hotplug_tx, cancel.clone()) {
        Ok(_) => Some(hotplug_rx),
        Err(e) => {
            warn!("Hot-plug monitoring unavailable, use --update to rescan: {}", e);
            None
        }
    };

    if let Err(e) = manager.update_joy_devs().await {
        warn!("Initial device scan failed: {}", e);
    }
    let loaded = match &layout {
        Some(name) => manager.load(name).await.map(|_| ()),
        None => manager.load_last().await.map(|_| ()),
    };
    if let Err(e) = loaded {
        warn!("Starting without a layout: {}", e);
    }

    tokio::spawn(shutdown_on_signal(cancel.clone()));

    Daemon::new(manager, control_rx, exits, hotplug, cancel.clone())
        .run()
        .await;
    cancel.cancel();
    signal_task
        .await
        .map_err(|e| eyre!("Signal bridge failed: {}", e))?;
    info!("{} exited", APP_NAME);
    Ok(())
}

fn output_sink(dry_run: bool) -> Box<dyn OutputSink> {
    if dry_run {
        info!("Dry run, output is only logged");
        return Box::new(LogSink);
    }
    match UinputSink::new(APP_NAME) {
        Ok(sink) => Box::new(sink),
        Err(e) => {
            error!("No virtual input device, output is only logged: {}", e);
            Box::new(LogSink)
        }
    }
}

async fn shutdown_on_signal(cancel: CancellationToken) {
    let mut terminate = match signal(SignalKind::terminate()) {
        Ok(terminate) => terminate,
        Err(e) => {
            warn!("Cannot listen for SIGTERM: {}", e);
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
            return;
        }
    };
    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("Interrupted"),
        _ = terminate.recv() => info!("Terminated"),
        _ = cancel.cancelled() => return,
    }
    cancel.cancel();
}

fn setup(verbosity: u8) -> Result<()> {
    if std::env::var("RUST_LIB_BACKTRACE").is_err() {
        std::env::set_var("RUST_LIB_BACKTRACE", "0")
    }
    color_eyre::install()?;
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "info")
    }
    setup_logging_env(match verbosity {
        0 => Level::INFO,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    });
    Ok(())
}

fn setup_logging_env(level: Level) {
    FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .pretty()
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_flags_and_layout() {
        let cli = Cli::try_parse_from(["joypad-mapper", "-u", "-vv", "-d", "/tmp", "racing"]).unwrap();
        assert!(cli.update);
        assert_eq!(cli.verbose, 2);
        assert_eq!(cli.device, Some(PathBuf::from("/tmp")));
        assert_eq!(cli.layout.as_deref(), Some("racing"));
        assert!(!cli.dry_run);
    }

    #[test]
    fn unwritable_pointer_is_fatal_only_for_second_instance() {
        let failed = || {
            Err(LayoutError::StorageWrite {
                path: PathBuf::from("/nonexistent/layout"),
                source: std::io::Error::from(std::io::ErrorKind::PermissionDenied),
            })
        };
        assert!(check_pointer(failed(), true).is_ok());
        assert!(check_pointer(failed(), false).is_err());
        assert!(check_pointer(Ok(()), false).is_ok());
    }

    #[test]
    fn second_instance_needs_a_request() {
        let cli = Cli::try_parse_from(["joypad-mapper"]).unwrap();
        assert!(signal_running(std::process::id() as i32, &cli).is_err());
    }
}
