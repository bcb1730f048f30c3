use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use adb_console_lib::app::adb::client::AdbCliBridge;
use adb_console_lib::app::adb::device_tracking::AdbDeviceMonitor;
use adb_console_lib::app::config::{
    config_path, load_config, load_config_from_path, save_config_to_path, ConsoleConfig,
};
use adb_console_lib::app::console::{Console, ConsoleExit, TerminalPrompt};
use adb_console_lib::app::error::LifecycleError;
use adb_console_lib::app::guard::default_lock_path;
use adb_console_lib::app::lifecycle::{LifecycleOptions, ProcessLifecycle};
use adb_console_lib::app::logging::init_logging;
use adb_console_lib::app::models::Endpoint;
use adb_console_lib::app::registry::DeviceRegistry;
use tracing::{error, info, warn};

const EXIT_OK: i32 = 0;
const EXIT_IO: i32 = 1;
const EXIT_FATAL: i32 = 2;
const EXIT_INTERRUPTED: i32 = 130;

/// Grace period for the first tracker snapshot before the no-devices advisory.
const INITIAL_SNAPSHOT_WAIT: Duration = Duration::from_millis(750);

const USAGE: &str = "Usage: adb-console [--config PATH] [--adb PATH] [--write-config]\n\n  --config PATH    read settings from PATH instead of ~/.adb_console_config.json\n  --adb PATH       use this adb executable instead of searching ./adb\n  --write-config   save the effective settings to the config path and exit\n  -h, --help       show this help";

#[derive(Debug, Clone, Default)]
struct Args {
    config: Option<PathBuf>,
    adb: Option<String>,
    write_config: bool,
    help: bool,
}

fn parse_args() -> Result<Args, String> {
    let mut args = Args::default();
    let mut it = std::env::args().skip(1);
    while let Some(arg) = it.next() {
        match arg.as_str() {
            "--config" => {
                let value = it
                    .next()
                    .ok_or_else(|| "--config requires a value".to_string())?;
                args.config = Some(PathBuf::from(value));
            }
            "--adb" => {
                args.adb = it
                    .next()
                    .map(|v| v.trim().to_string())
                    .filter(|v| !v.is_empty());
                if args.adb.is_none() {
                    return Err("--adb requires a value".to_string());
                }
            }
            "--write-config" => {
                args.write_config = true;
            }
            "-h" | "--help" => {
                args.help = true;
            }
            other => return Err(format!("Unknown arg: {other}")),
        }
    }
    Ok(args)
}

fn load(args: &Args) -> Result<ConsoleConfig, LifecycleError> {
    let mut config = match &args.config {
        Some(path) => load_config_from_path(path),
        None => load_config(),
    }
    .map_err(LifecycleError::Config)?;
    if let Some(adb) = &args.adb {
        config.bridge.adb_path = adb.clone();
    }
    Ok(config)
}

fn wait_for_first_snapshot(registry: &DeviceRegistry, limit: Duration) {
    let deadline = Instant::now() + limit;
    while registry.is_empty() && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(50));
    }
}

fn run(config: ConsoleConfig) -> i32 {
    let base_dir = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    let endpoint = Endpoint::new(config.bridge.host.clone(), config.bridge.port);
    let bridge = Arc::new(AdbCliBridge::new(endpoint, &config.command));
    let monitor = AdbDeviceMonitor::new(Arc::clone(&bridge));
    let shell_timeout = Duration::from_secs(config.command.shell_timeout_minutes.saturating_mul(60));
    let options = LifecycleOptions {
        lock_path: default_lock_path(),
        base_dir,
        config,
    };
    let lifecycle = Arc::new(ProcessLifecycle::new(options, bridge, Box::new(monitor)));

    let on_interrupt = Arc::clone(&lifecycle);
    if let Err(err) = ctrlc::set_handler(move || {
        let _ = crossterm::terminal::disable_raw_mode();
        warn!("interrupted; shutting down");
        on_interrupt.dispose();
        std::process::exit(EXIT_INTERRUPTED);
    }) {
        warn!(error = %err, "failed to install interrupt handler");
    }

    if let Err(err) = lifecycle.start() {
        eprintln!("{err}");
        return EXIT_FATAL;
    }

    wait_for_first_snapshot(lifecycle.registry(), INITIAL_SNAPSHOT_WAIT);
    let coordinator = lifecycle.coordinator();
    let stdout = io::stdout();
    let mut console = Console::new(&coordinator, TerminalPrompt, stdout.lock(), shell_timeout);

    let outcome = console.print_startup_advisory().and_then(|_| console.run());
    drop(console);
    let code = match outcome {
        Ok(ConsoleExit::Quit) => EXIT_OK,
        Ok(ConsoleExit::Interrupted) => EXIT_INTERRUPTED,
        Err(err) => {
            error!(error = %err, "console input failed");
            EXIT_IO
        }
    };

    lifecycle.dispose();
    info!(code, "adb-console exiting");
    code
}

fn main() {
    let args = match parse_args() {
        Ok(v) => v,
        Err(msg) => {
            eprintln!("{msg}\n\n{USAGE}");
            std::process::exit(EXIT_FATAL);
        }
    };
    if args.help {
        println!("{USAGE}");
        return;
    }

    let config = match load(&args) {
        Ok(cfg) => cfg,
        Err(err) => {
            eprintln!("{err}");
            std::process::exit(EXIT_FATAL);
        }
    };
    init_logging(&config.logging.log_level);

    if args.write_config {
        let path = args.config.clone().unwrap_or_else(config_path);
        match save_config_to_path(&config, &path) {
            Ok(()) => {
                println!("Settings written to {}", path.display());
                return;
            }
            Err(err) => {
                eprintln!("{err}");
                std::process::exit(EXIT_FATAL);
            }
        }
    }

    std::process::exit(run(config));
}
