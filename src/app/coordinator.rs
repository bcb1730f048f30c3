use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use tracing::{error, info, warn};
use uuid::Uuid;

use crate::app::bridge::BridgeClient;
use crate::app::cancel::CancellationToken;
use crate::app::models::Device;
use crate::app::registry::DeviceRegistry;

pub const NO_DEVICES_ADVISORY: &str = "No devices found.";

pub fn new_trace_id() -> String {
    Uuid::new_v4().to_string()
}

/// User-facing device operations. Every failure is converted to `None` or
/// `false` here so one bad command never ends the session.
pub struct CommandCoordinator {
    registry: Arc<DeviceRegistry>,
    bridge: Arc<dyn BridgeClient>,
    reinstall: bool,
}

impl CommandCoordinator {
    pub fn new(registry: Arc<DeviceRegistry>, bridge: Arc<dyn BridgeClient>, reinstall: bool) -> Self {
        Self {
            registry,
            bridge,
            reinstall,
        }
    }

    pub fn registry(&self) -> &Arc<DeviceRegistry> {
        &self.registry
    }

    /// Advises on an empty registry but never refuses: a device may attach
    /// mid-session.
    fn resolve(&self, serial: Option<&str>, trace_id: &str) -> Option<Device> {
        if self.registry.is_empty() {
            warn!(trace_id = %trace_id, "{NO_DEVICES_ADVISORY}");
        }
        let serial = serial.map(str::trim).filter(|value| !value.is_empty())?;
        let device = self.registry.find_by_serial(serial);
        if device.is_none() {
            warn!(trace_id = %trace_id, serial = %serial, "device is not connected");
        }
        device
    }

    pub fn list_packages(&self, serial: Option<&str>) -> Option<BTreeMap<String, String>> {
        let trace_id = new_trace_id();
        let device = self.resolve(serial, &trace_id)?;
        match self.bridge.list_packages(&device, &trace_id) {
            Ok(packages) => {
                info!(trace_id = %trace_id, serial = %device.serial, count = packages.len(), "listed packages");
                Some(packages)
            }
            Err(err) => {
                error!(trace_id = %trace_id, serial = %device.serial, code = %err.code, error = %err.error, "list packages failed");
                None
            }
        }
    }

    pub fn install_package(&self, serial: Option<&str>, apk_path: &str) -> bool {
        let trace_id = new_trace_id();
        let Some(device) = self.resolve(serial, &trace_id) else {
            return false;
        };
        let apk_path = apk_path.trim();
        if apk_path.is_empty() {
            return false;
        }
        match self
            .bridge
            .install(&device, Path::new(apk_path), self.reinstall, &trace_id)
        {
            Ok(()) => {
                info!(trace_id = %trace_id, serial = %device.serial, apk = %apk_path, "package installed");
                true
            }
            Err(err) => {
                error!(trace_id = %trace_id, serial = %device.serial, code = %err.code, error = %err.error, "install failed");
                false
            }
        }
    }

    pub fn uninstall_package(&self, serial: Option<&str>, package_name: &str) -> bool {
        let trace_id = new_trace_id();
        let Some(device) = self.resolve(serial, &trace_id) else {
            return false;
        };
        let package_name = package_name.trim();
        if package_name.is_empty() {
            return false;
        }
        match self.bridge.uninstall(&device, package_name, &trace_id) {
            Ok(()) => {
                info!(trace_id = %trace_id, serial = %device.serial, package = %package_name, "package uninstalled");
                true
            }
            Err(err) => {
                error!(trace_id = %trace_id, serial = %device.serial, code = %err.code, error = %err.error, "uninstall failed");
                false
            }
        }
    }

    pub fn execute_command(
        &self,
        serial: Option<&str>,
        command: &str,
        token: &CancellationToken,
    ) -> Option<String> {
        let trace_id = new_trace_id();
        let device = self.resolve(serial, &trace_id)?;
        let command = command.trim();
        if command.is_empty() {
            return None;
        }
        if token.is_cancelled() {
            warn!(trace_id = %trace_id, serial = %device.serial, "command cancelled before dispatch");
            return None;
        }
        match self
            .bridge
            .execute_remote_command(command, &device, token, &trace_id)
        {
            Ok(output) => Some(output),
            Err(err) if err.is_cancelled() => {
                warn!(trace_id = %trace_id, serial = %device.serial, error = %err.error, "command abandoned");
                None
            }
            Err(err) => {
                error!(trace_id = %trace_id, serial = %device.serial, code = %err.code, error = %err.error, "command failed");
                None
            }
        }
    }
}
