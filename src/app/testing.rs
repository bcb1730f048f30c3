//! In-memory collaborators shared by the unit tests.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::SyncSender;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::app::bridge::{BridgeClient, DeviceMonitor};
use crate::app::cancel::CancellationToken;
use crate::app::error::AppError;
use crate::app::models::{Device, DeviceEvent, Endpoint};

#[derive(Default)]
pub struct FakeBridge {
    pub calls: Mutex<Vec<String>>,
    pub packages: Mutex<BTreeMap<String, String>>,
    pub fail_with: Mutex<Option<AppError>>,
    /// When set, `execute_remote_command` waits for the token instead of returning.
    pub block_shell: AtomicBool,
    pub shell_output: Mutex<String>,
}

impl FakeBridge {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().expect("calls").clone()
    }

    pub fn fail_next(&self, err: AppError) {
        *self.fail_with.lock().expect("fail") = Some(err);
    }

    fn record(&self, call: String) -> Result<(), AppError> {
        self.calls.lock().expect("calls").push(call);
        match self.fail_with.lock().expect("fail").take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

impl BridgeClient for FakeBridge {
    fn start_server(&self, adb_program: &Path, restart_existing: bool, _trace_id: &str) -> Result<bool, AppError> {
        self.record(format!("start_server:{}:{restart_existing}", adb_program.display()))?;
        Ok(true)
    }

    fn kill_server(&self, _trace_id: &str) -> Result<(), AppError> {
        self.record("kill_server".to_string())
    }

    fn connect(&self, endpoint: &Endpoint, _trace_id: &str) -> Result<(), AppError> {
        self.record(format!("connect:{endpoint}"))
    }

    fn disconnect(&self, endpoint: &Endpoint, _trace_id: &str) -> Result<(), AppError> {
        self.record(format!("disconnect:{endpoint}"))
    }

    fn list_packages(&self, device: &Device, _trace_id: &str) -> Result<BTreeMap<String, String>, AppError> {
        self.record(format!("list_packages:{}", device.serial))?;
        Ok(self.packages.lock().expect("packages").clone())
    }

    fn install(&self, device: &Device, apk_path: &Path, reinstall: bool, _trace_id: &str) -> Result<(), AppError> {
        self.record(format!("install:{}:{}:{reinstall}", device.serial, apk_path.display()))
    }

    fn uninstall(&self, device: &Device, package_name: &str, _trace_id: &str) -> Result<(), AppError> {
        self.record(format!("uninstall:{}:{package_name}", device.serial))
    }

    fn execute_remote_command(
        &self,
        command: &str,
        device: &Device,
        token: &CancellationToken,
        trace_id: &str,
    ) -> Result<String, AppError> {
        self.record(format!("shell:{}:{command}", device.serial))?;
        if self.block_shell.load(Ordering::SeqCst) {
            while !token.is_cancelled() {
                std::thread::sleep(Duration::from_millis(10));
            }
            return Err(AppError::cancelled("Command cancelled", trace_id));
        }
        Ok(self.shell_output.lock().expect("output").clone())
    }
}

/// Monitor that replays a fixed list of events when started.
pub struct ScriptedMonitor {
    pub events: Vec<DeviceEvent>,
    pub log: Arc<Mutex<Vec<String>>>,
    running: bool,
    sink: Option<SyncSender<DeviceEvent>>,
}

impl ScriptedMonitor {
    pub fn new(events: Vec<DeviceEvent>, log: Arc<Mutex<Vec<String>>>) -> Self {
        Self {
            events,
            log,
            running: false,
            sink: None,
        }
    }
}

impl DeviceMonitor for ScriptedMonitor {
    fn start(&mut self, sink: SyncSender<DeviceEvent>, _trace_id: &str) -> Result<(), AppError> {
        self.log.lock().expect("log").push("monitor_start".to_string());
        for event in self.events.drain(..) {
            sink.send(event)
                .map_err(|_| AppError::system("event sink closed", "test"))?;
        }
        self.sink = Some(sink);
        self.running = true;
        Ok(())
    }

    fn stop(&mut self) {
        if self.running {
            self.log.lock().expect("log").push("monitor_stop".to_string());
        }
        self.running = false;
        self.sink = None;
    }

    fn is_running(&self) -> bool {
        self.running
    }
}
