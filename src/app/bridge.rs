//! Seams to the debug-bridge collaborator.
//!
//! The console core only talks to adb through these traits; `app::adb` holds
//! the implementation that drives the `adb` executable.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::mpsc::SyncSender;

use crate::app::cancel::CancellationToken;
use crate::app::error::AppError;
use crate::app::models::{Device, DeviceEvent, Endpoint};

pub trait BridgeClient: Send + Sync {
    /// Starts the bridge server from `adb_program`, restarting a running one
    /// when `restart_existing` is set.
    fn start_server(&self, adb_program: &Path, restart_existing: bool, trace_id: &str) -> Result<bool, AppError>;

    fn kill_server(&self, trace_id: &str) -> Result<(), AppError>;

    fn connect(&self, endpoint: &Endpoint, trace_id: &str) -> Result<(), AppError>;

    fn disconnect(&self, endpoint: &Endpoint, trace_id: &str) -> Result<(), AppError>;

    fn list_packages(&self, device: &Device, trace_id: &str) -> Result<BTreeMap<String, String>, AppError>;

    fn install(&self, device: &Device, apk_path: &Path, reinstall: bool, trace_id: &str) -> Result<(), AppError>;

    fn uninstall(&self, device: &Device, package_name: &str, trace_id: &str) -> Result<(), AppError>;

    /// Runs `command` on the device and returns the captured output. Must
    /// return promptly with an `ERR_CANCELLED` error once `token` fires.
    fn execute_remote_command(
        &self,
        command: &str,
        device: &Device,
        token: &CancellationToken,
        trace_id: &str,
    ) -> Result<String, AppError>;
}

/// Background watcher that pushes device notifications into `sink` from its
/// own pump thread, in the order it observes them.
pub trait DeviceMonitor: Send {
    fn start(&mut self, sink: SyncSender<DeviceEvent>, trace_id: &str) -> Result<(), AppError>;

    fn stop(&mut self);

    fn is_running(&self) -> bool;
}
