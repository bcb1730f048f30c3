use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, warn};

use crate::app::error::AppError;
use crate::app::models::DeviceEvent;
use crate::app::registry::DeviceRegistry;

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Applies one event to the registry. Each event maps to exactly one mutation.
pub fn apply_event(registry: &DeviceRegistry, event: DeviceEvent) {
    match event {
        DeviceEvent::Connected(device) => {
            registry.upsert_on_connect(device);
        }
        DeviceEvent::Changed(device) => {
            registry.replace_on_change(device);
        }
        DeviceEvent::Disconnected(serial) => {
            registry.remove_on_disconnect(&serial);
        }
    }
}

struct Worker {
    stop_flag: Arc<AtomicBool>,
    join: JoinHandle<()>,
}

/// Single consumer of the monitor channel; the only writer of the registry.
pub struct DeviceEventDispatcher {
    registry: Arc<DeviceRegistry>,
    worker: Option<Worker>,
}

impl DeviceEventDispatcher {
    pub fn new(registry: Arc<DeviceRegistry>) -> Self {
        Self {
            registry,
            worker: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.worker
            .as_ref()
            .map(|worker| !worker.join.is_finished())
            .unwrap_or(false)
    }

    pub fn start(&mut self, events: Receiver<DeviceEvent>, trace_id: &str) -> Result<(), AppError> {
        if self.worker.is_some() {
            return Err(AppError::validation("Device event dispatcher already running", trace_id));
        }
        let stop_flag = Arc::new(AtomicBool::new(false));
        let stop_thread = Arc::clone(&stop_flag);
        let registry = Arc::clone(&self.registry);
        let trace_id = trace_id.to_string();

        let join = thread::spawn(move || loop {
            if stop_thread.load(Ordering::Relaxed) {
                break;
            }
            match events.recv_timeout(POLL_INTERVAL) {
                Ok(event) => {
                    debug!(trace_id = %trace_id, serial = %event.serial(), kind = event.kind(), "dispatching device event");
                    apply_event(&registry, event);
                }
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => {
                    debug!(trace_id = %trace_id, "device event channel closed");
                    break;
                }
            }
        });

        self.worker = Some(Worker { stop_flag, join });
        Ok(())
    }

    pub fn stop(&mut self) {
        let Some(worker) = self.worker.take() else {
            return;
        };
        worker.stop_flag.store(true, Ordering::Relaxed);
        if worker.join.join().is_err() {
            warn!("device event dispatcher thread panicked");
        }
    }
}

impl Drop for DeviceEventDispatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::models::{Device, DeviceState};
    use std::sync::mpsc::sync_channel;
    use std::time::Instant;

    fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(10));
        }
        condition()
    }

    #[test]
    fn applies_events_in_arrival_order() {
        let registry = Arc::new(DeviceRegistry::new());
        let mut dispatcher = DeviceEventDispatcher::new(Arc::clone(&registry));
        let (tx, rx) = sync_channel(8);
        dispatcher.start(rx, "trace-order").expect("start");

        tx.send(DeviceEvent::Connected(Device::new("SN1", DeviceState::Online))).expect("send");
        tx.send(DeviceEvent::Connected(Device::new("SN2", DeviceState::Online))).expect("send");
        tx.send(DeviceEvent::Changed(Device::new("SN2", DeviceState::Unauthorized))).expect("send");
        tx.send(DeviceEvent::Disconnected("SN1".to_string())).expect("send");
        drop(tx);

        assert!(wait_until(|| !dispatcher.is_running()));
        let snapshot = registry.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].serial, "SN2");
        assert_eq!(snapshot[0].state, DeviceState::Unauthorized);
        dispatcher.stop();
    }

    #[test]
    fn stop_without_start_is_noop() {
        let mut dispatcher = DeviceEventDispatcher::new(Arc::new(DeviceRegistry::new()));
        dispatcher.stop();
        assert!(!dispatcher.is_running());
    }

    #[test]
    fn rejects_second_start() {
        let mut dispatcher = DeviceEventDispatcher::new(Arc::new(DeviceRegistry::new()));
        let (_tx, rx) = sync_channel(1);
        dispatcher.start(rx, "trace-a").expect("start");
        let (_tx2, rx2) = sync_channel(1);
        let err = dispatcher.start(rx2, "trace-b").expect_err("expected rejection");
        assert_eq!(err.code, "ERR_VALIDATION");
        dispatcher.stop();
        assert!(!dispatcher.is_running());
    }

    #[test]
    fn stop_returns_while_senders_are_alive() {
        let mut dispatcher = DeviceEventDispatcher::new(Arc::new(DeviceRegistry::new()));
        let (tx, rx) = sync_channel::<DeviceEvent>(1);
        dispatcher.start(rx, "trace-stop").expect("start");
        let start = Instant::now();
        dispatcher.stop();
        assert!(start.elapsed() < Duration::from_secs(2));
        drop(tx);
    }
}
