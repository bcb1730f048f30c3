use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::app::adb::apps::{parse_package_manager_result, parse_pm_list_packages_output};
use crate::app::adb::runner::{run_command_cancellable, run_command_with_timeout, CommandOutput};
use crate::app::bridge::BridgeClient;
use crate::app::cancel::CancellationToken;
use crate::app::config::CommandSettings;
use crate::app::error::AppError;
use crate::app::models::{Device, Endpoint};

const SERVER_TIMEOUT: Duration = Duration::from_secs(30);
const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// `BridgeClient` backed by the `adb` executable.
pub struct AdbCliBridge {
    program: RwLock<Option<PathBuf>>,
    endpoint: Endpoint,
    connected: AtomicBool,
    package_timeout: Duration,
    install_timeout: Duration,
}

impl AdbCliBridge {
    pub fn new(endpoint: Endpoint, settings: &CommandSettings) -> Self {
        Self {
            program: RwLock::new(None),
            endpoint,
            connected: AtomicBool::new(false),
            package_timeout: Duration::from_secs(settings.package_timeout_seconds.max(1)),
            install_timeout: Duration::from_secs(settings.install_timeout_seconds.max(1)),
        }
    }

    /// Executable recorded by `start_server`.
    pub fn program(&self, trace_id: &str) -> Result<String, AppError> {
        let guard = self
            .program
            .read()
            .map_err(|_| AppError::system("adb program lock poisoned", trace_id))?;
        guard
            .as_ref()
            .map(|path| path.to_string_lossy().to_string())
            .ok_or_else(|| AppError::validation("adb server has not been started", trace_id))
    }

    /// Arguments that point adb at the configured server endpoint.
    pub fn server_args(&self, rest: &[&str]) -> Vec<String> {
        let mut args = vec![
            "-H".to_string(),
            self.endpoint.host.clone(),
            "-P".to_string(),
            self.endpoint.port.to_string(),
        ];
        args.extend(rest.iter().map(|item| item.to_string()));
        args
    }

    fn device_args(&self, serial: &str, rest: &[&str]) -> Vec<String> {
        let mut args = self.server_args(&["-s", serial]);
        args.extend(rest.iter().map(|item| item.to_string()));
        args
    }

    fn ensure_connected(&self, trace_id: &str) -> Result<String, AppError> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(AppError::validation("adb client is not connected", trace_id));
        }
        self.program(trace_id)
    }

    fn run(&self, args: &[String], timeout: Duration, trace_id: &str) -> Result<CommandOutput, AppError> {
        let program = self.ensure_connected(trace_id)?;
        run_command_with_timeout(&program, args, timeout, trace_id)
    }
}

/// adb reports transport-level problems (device gone, protocol fault) on
/// stderr with an `error:` or `adb:` prefix.
fn transport_error(output: &CommandOutput) -> Option<String> {
    if output.succeeded() {
        return None;
    }
    let stderr = output.stderr.trim();
    let lower = stderr.to_lowercase();
    if lower.starts_with("error:") || lower.starts_with("adb:") {
        Some(stderr.to_string())
    } else {
        None
    }
}

/// Streamed installs print progress on stdout and the `Failure [...]` line on
/// stderr, so both are classified. A non-zero exit is never a success.
fn package_manager_outcome(output: &CommandOutput) -> Result<(), String> {
    let text = format!("{}\n{}", output.stdout, output.stderr);
    parse_package_manager_result(&text)?;
    if !output.succeeded() {
        return Err("UNKNOWN_ERROR".to_string());
    }
    Ok(())
}

impl BridgeClient for AdbCliBridge {
    fn start_server(&self, adb_program: &Path, restart_existing: bool, trace_id: &str) -> Result<bool, AppError> {
        {
            let mut guard = self
                .program
                .write()
                .map_err(|_| AppError::system("adb program lock poisoned", trace_id))?;
            *guard = Some(adb_program.to_path_buf());
        }
        let program = adb_program.to_string_lossy().to_string();

        if restart_existing {
            let output = run_command_with_timeout(
                &program,
                &self.server_args(&["kill-server"]),
                SERVER_TIMEOUT,
                trace_id,
            )?;
            debug!(trace_id = %trace_id, exit_code = ?output.exit_code, "stale adb server cleanup");
        }

        let output = run_command_with_timeout(
            &program,
            &self.server_args(&["start-server"]),
            SERVER_TIMEOUT,
            trace_id,
        )?;
        if !output.succeeded() {
            return Err(AppError::dependency(
                format!("adb start-server failed: {}", output.combined().trim()),
                trace_id,
            ));
        }
        info!(trace_id = %trace_id, endpoint = %self.endpoint, "adb server started");
        Ok(true)
    }

    fn kill_server(&self, trace_id: &str) -> Result<(), AppError> {
        let program = self.program(trace_id)?;
        let output = run_command_with_timeout(
            &program,
            &self.server_args(&["kill-server"]),
            SERVER_TIMEOUT,
            trace_id,
        )?;
        if !output.succeeded() {
            // Nothing listening is fine at shutdown.
            debug!(trace_id = %trace_id, stderr = %output.stderr.trim(), "adb kill-server returned non-zero");
        }
        Ok(())
    }

    fn connect(&self, endpoint: &Endpoint, trace_id: &str) -> Result<(), AppError> {
        if endpoint != &self.endpoint {
            return Err(AppError::validation(
                format!("adb client is bound to {}, not {endpoint}", self.endpoint),
                trace_id,
            ));
        }
        let program = self.program(trace_id)?;
        let output = run_command_with_timeout(
            &program,
            &self.server_args(&["devices"]),
            PROBE_TIMEOUT,
            trace_id,
        )?;
        if !output.succeeded() {
            return Err(AppError::dependency(
                format!("adb server at {endpoint} is not reachable: {}", output.combined().trim()),
                trace_id,
            ));
        }
        self.connected.store(true, Ordering::SeqCst);
        info!(trace_id = %trace_id, endpoint = %endpoint, "adb client connected");
        Ok(())
    }

    fn disconnect(&self, endpoint: &Endpoint, trace_id: &str) -> Result<(), AppError> {
        if self.connected.swap(false, Ordering::SeqCst) {
            info!(trace_id = %trace_id, endpoint = %endpoint, "adb client disconnected");
        }
        Ok(())
    }

    fn list_packages(&self, device: &Device, trace_id: &str) -> Result<BTreeMap<String, String>, AppError> {
        let args = self.device_args(&device.serial, &["shell", "pm", "list", "packages", "-f"]);
        let output = self.run(&args, self.package_timeout, trace_id)?;
        if !output.succeeded() {
            return Err(AppError::dependency(
                format!("List packages failed: {}", output.combined().trim()),
                trace_id,
            ));
        }
        Ok(parse_pm_list_packages_output(&output.stdout))
    }

    fn install(&self, device: &Device, apk_path: &Path, reinstall: bool, trace_id: &str) -> Result<(), AppError> {
        let apk = apk_path.to_string_lossy().to_string();
        let mut rest = vec!["install"];
        if reinstall {
            rest.push("-r");
        }
        rest.push(&apk);
        let args = self.device_args(&device.serial, &rest);
        let output = self.run(&args, self.install_timeout, trace_id)?;
        package_manager_outcome(&output).map_err(|code| {
            AppError::dependency(format!("Install failed: {code}"), trace_id)
        })
    }

    fn uninstall(&self, device: &Device, package_name: &str, trace_id: &str) -> Result<(), AppError> {
        let args = self.device_args(&device.serial, &["uninstall", package_name]);
        let output = self.run(&args, self.package_timeout, trace_id)?;
        package_manager_outcome(&output).map_err(|code| {
            AppError::dependency(format!("Uninstall failed: {code}"), trace_id)
        })
    }

    fn execute_remote_command(
        &self,
        command: &str,
        device: &Device,
        token: &CancellationToken,
        trace_id: &str,
    ) -> Result<String, AppError> {
        let program = self.ensure_connected(trace_id)?;
        let args = self.device_args(&device.serial, &["shell", command]);
        let output = run_command_cancellable(&program, &args, token, trace_id)?;
        if let Some(error) = transport_error(&output) {
            warn!(trace_id = %trace_id, serial = %device.serial, error = %error, "adb shell transport failure");
            return Err(AppError::dependency(error, trace_id));
        }
        let mut text = output.stdout;
        text.push_str(&output.stderr);
        Ok(text)
    }
}
