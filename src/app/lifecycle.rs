use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::sync_channel;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tracing::{error, info, warn};

use crate::app::adb::locator::resolve_adb_program;
use crate::app::bridge::{BridgeClient, DeviceMonitor};
use crate::app::config::ConsoleConfig;
use crate::app::coordinator::{new_trace_id, CommandCoordinator};
use crate::app::dispatcher::DeviceEventDispatcher;
use crate::app::error::LifecycleError;
use crate::app::guard::SingleInstanceGuard;
use crate::app::models::Endpoint;
use crate::app::registry::DeviceRegistry;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LifecycleState {
    Uninitialized,
    GuardAcquired,
    ServerStarted,
    ClientConnected,
    MonitorRunning,
    Disposed,
}

impl LifecycleState {
    pub fn name(&self) -> &'static str {
        match self {
            LifecycleState::Uninitialized => "Uninitialized",
            LifecycleState::GuardAcquired => "GuardAcquired",
            LifecycleState::ServerStarted => "ServerStarted",
            LifecycleState::ClientConnected => "ClientConnected",
            LifecycleState::MonitorRunning => "MonitorRunning",
            LifecycleState::Disposed => "Disposed",
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone)]
pub struct LifecycleOptions {
    pub lock_path: PathBuf,
    /// Directory searched for the bridge files.
    pub base_dir: PathBuf,
    pub config: ConsoleConfig,
}

impl LifecycleOptions {
    fn guard_wait(&self) -> Duration {
        Duration::from_secs(self.config.guard.wait_seconds)
    }
}

struct Inner {
    state: LifecycleState,
    guard: Option<SingleInstanceGuard>,
    monitor: Box<dyn DeviceMonitor>,
    dispatcher: DeviceEventDispatcher,
}

/// Owns the bridge session from guard acquisition to teardown.
///
/// Shared through `Arc` between the console loop and the interrupt handler;
/// `dispose` runs the teardown exactly once no matter who calls it first.
pub struct ProcessLifecycle {
    options: LifecycleOptions,
    endpoint: Endpoint,
    bridge: Arc<dyn BridgeClient>,
    registry: Arc<DeviceRegistry>,
    inner: Mutex<Inner>,
    disposed: AtomicBool,
}

impl ProcessLifecycle {
    pub fn new(
        options: LifecycleOptions,
        bridge: Arc<dyn BridgeClient>,
        monitor: Box<dyn DeviceMonitor>,
    ) -> Self {
        let registry = Arc::new(DeviceRegistry::new());
        let endpoint = Endpoint::new(options.config.bridge.host.clone(), options.config.bridge.port);
        Self {
            endpoint,
            bridge,
            inner: Mutex::new(Inner {
                state: LifecycleState::Uninitialized,
                guard: None,
                monitor,
                dispatcher: DeviceEventDispatcher::new(Arc::clone(&registry)),
            }),
            registry,
            options,
            disposed: AtomicBool::new(false),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn expect_state(inner: &Inner, expected: LifecycleState, target: LifecycleState) -> Result<(), LifecycleError> {
        if inner.state != expected {
            return Err(LifecycleError::InvalidTransition {
                from: inner.state.name(),
                to: target.name(),
            });
        }
        Ok(())
    }

    pub fn state(&self) -> LifecycleState {
        self.lock().state
    }

    pub fn registry(&self) -> &Arc<DeviceRegistry> {
        &self.registry
    }

    pub fn coordinator(&self) -> CommandCoordinator {
        CommandCoordinator::new(
            Arc::clone(&self.registry),
            Arc::clone(&self.bridge),
            self.options.config.command.reinstall,
        )
    }

    /// The wait happens outside `inner` so an interrupt can dispose meanwhile;
    /// a guard won after disposal is released straight away.
    pub fn acquire_guard(&self) -> Result<(), LifecycleError> {
        Self::expect_state(&self.lock(), LifecycleState::Uninitialized, LifecycleState::GuardAcquired)?;
        let guard = SingleInstanceGuard::acquire(&self.options.lock_path, self.options.guard_wait())?;

        let mut inner = self.lock();
        if let Err(err) = Self::expect_state(&inner, LifecycleState::Uninitialized, LifecycleState::GuardAcquired) {
            drop(inner);
            guard.release();
            return Err(err);
        }
        inner.guard = Some(guard);
        inner.state = LifecycleState::GuardAcquired;
        Ok(())
    }

    pub fn start_server(&self) -> Result<(), LifecycleError> {
        let mut inner = self.lock();
        Self::expect_state(&inner, LifecycleState::GuardAcquired, LifecycleState::ServerStarted)?;
        let trace_id = new_trace_id();
        let bridge_settings = &self.options.config.bridge;
        let program = resolve_adb_program(bridge_settings, &self.options.base_dir)?;
        let started = self
            .bridge
            .start_server(&program, bridge_settings.kill_stale_server, &trace_id)
            .map_err(LifecycleError::ServerStart)?;
        info!(trace_id = %trace_id, program = %program.display(), started, "adb server ready");
        inner.state = LifecycleState::ServerStarted;
        Ok(())
    }

    pub fn connect_client(&self) -> Result<(), LifecycleError> {
        let mut inner = self.lock();
        Self::expect_state(&inner, LifecycleState::ServerStarted, LifecycleState::ClientConnected)?;
        let trace_id = new_trace_id();
        self.bridge
            .connect(&self.endpoint, &trace_id)
            .map_err(LifecycleError::Connect)?;
        inner.state = LifecycleState::ClientConnected;
        Ok(())
    }

    pub fn start_monitor(&self) -> Result<(), LifecycleError> {
        let mut inner = self.lock();
        Self::expect_state(&inner, LifecycleState::ClientConnected, LifecycleState::MonitorRunning)?;
        let trace_id = new_trace_id();
        let (sender, receiver) = sync_channel(self.options.config.monitor.channel_capacity);
        inner
            .dispatcher
            .start(receiver, &trace_id)
            .map_err(LifecycleError::Monitor)?;
        if let Err(err) = inner.monitor.start(sender, &trace_id) {
            inner.dispatcher.stop();
            return Err(LifecycleError::Monitor(err));
        }
        inner.state = LifecycleState::MonitorRunning;
        Ok(())
    }

    /// Runs every startup step in order. On failure whatever was acquired is
    /// torn down before the error is returned.
    pub fn start(&self) -> Result<(), LifecycleError> {
        let result = self
            .acquire_guard()
            .and_then(|_| self.start_server())
            .and_then(|_| self.connect_client())
            .and_then(|_| self.start_monitor());
        if let Err(err) = &result {
            error!(error = %err, "startup failed");
            self.dispose();
        }
        result
    }

    /// Stops the monitor, disconnects the client, then releases the guard.
    /// Returns true only for the call that performed the teardown.
    pub fn dispose(&self) -> bool {
        if self
            .disposed
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return false;
        }

        let trace_id = new_trace_id();
        let mut inner = self.lock();
        let reached = inner.state;

        if reached >= LifecycleState::ClientConnected {
            inner.monitor.stop();
            inner.dispatcher.stop();
            if let Err(err) = self.bridge.disconnect(&self.endpoint, &trace_id) {
                warn!(trace_id = %trace_id, error = %err, "disconnect failed during shutdown");
            }
        }
        if reached >= LifecycleState::ServerStarted && self.options.config.bridge.kill_server_on_exit {
            if let Err(err) = self.bridge.kill_server(&trace_id) {
                warn!(trace_id = %trace_id, error = %err, "kill-server failed during shutdown");
            }
        }
        if let Some(guard) = inner.guard.take() {
            guard.release();
        }

        inner.state = LifecycleState::Disposed;
        info!(trace_id = %trace_id, from = %reached, "shutdown complete");
        true
    }
}

impl Drop for ProcessLifecycle {
    fn drop(&mut self) {
        self.dispose();
    }
}
