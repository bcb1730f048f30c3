use std::io::BufRead;
use std::process::{Child, ChildStderr, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::SyncSender;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::app::adb::client::AdbCliBridge;
use crate::app::adb::track_devices::{diff_snapshots, TrackDevicesStreamParser};
use crate::app::bridge::DeviceMonitor;
use crate::app::error::AppError;
use crate::app::models::{Device, DeviceEvent};

const BACKOFF_START_MS: u64 = 200;
const BACKOFF_MAX_MS: u64 = 5_000;

struct TrackerHandle {
    stop_flag: Arc<AtomicBool>,
    child: Arc<Mutex<Option<Child>>>,
    join: JoinHandle<()>,
}

impl TrackerHandle {
    fn stop(self) {
        self.stop_flag.store(true, Ordering::Relaxed);
        kill_child(&self.child);
        let _ = self.join.join();
    }
}

/// `DeviceMonitor` that follows `adb track-devices -l` and turns each
/// snapshot change into connect/disconnect/change notifications.
pub struct AdbDeviceMonitor {
    bridge: Arc<AdbCliBridge>,
    handle: Option<TrackerHandle>,
}

impl AdbDeviceMonitor {
    pub fn new(bridge: Arc<AdbCliBridge>) -> Self {
        Self {
            bridge,
            handle: None,
        }
    }
}

impl DeviceMonitor for AdbDeviceMonitor {
    fn start(&mut self, sink: SyncSender<DeviceEvent>, trace_id: &str) -> Result<(), AppError> {
        if self.handle.is_some() {
            return Ok(());
        }
        let program = self.bridge.program(trace_id)?;
        let primary = self.bridge.server_args(&["track-devices", "-l"]);
        let fallback = self.bridge.server_args(&["track-devices"]);
        self.handle = Some(start_tracker(program, primary, fallback, sink, trace_id.to_string()));
        info!(trace_id = %trace_id, "device monitor started");
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.stop();
            info!("device monitor stopped");
        }
    }

    fn is_running(&self) -> bool {
        self.handle
            .as_ref()
            .map(|handle| !handle.join.is_finished())
            .unwrap_or(false)
    }
}

impl Drop for AdbDeviceMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}

fn kill_child(slot: &Arc<Mutex<Option<Child>>>) {
    if let Ok(mut guard) = slot.lock() {
        if let Some(mut child) = guard.take() {
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}

fn spawn_tracker(program: &str, args: &[String], trace_id: &str) -> Option<Child> {
    match Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
    {
        Ok(child) => Some(child),
        Err(err) => {
            warn!(trace_id = %trace_id, error = %err, "failed to spawn adb device tracker");
            None
        }
    }
}

/// Polls for the exit status without holding the slot lock across a blocking wait.
fn reap_child(slot: &Arc<Mutex<Option<Child>>>) -> Option<i32> {
    let deadline = Instant::now() + Duration::from_secs(1);
    loop {
        let status = {
            let mut guard = slot.lock().ok()?;
            let child = guard.as_mut()?;
            child.try_wait().ok().flatten()
        };
        if let Some(status) = status {
            return status.code();
        }
        if Instant::now() >= deadline {
            return None;
        }
        thread::sleep(Duration::from_millis(50));
    }
}

fn report_stderr(stderr: ChildStderr, trace_id: String) -> JoinHandle<()> {
    thread::spawn(move || {
        let reader = std::io::BufReader::new(stderr);
        let mut reported = false;
        for line in reader.lines() {
            let Ok(line) = line else {
                break;
            };
            if reported || line.trim().is_empty() {
                continue;
            }
            reported = true;
            warn!(trace_id = %trace_id, stderr = %line, "adb device tracker stderr");
        }
    })
}

/// Sends every event; returns false once the receiving side is gone.
fn publish(sink: &SyncSender<DeviceEvent>, events: Vec<DeviceEvent>, trace_id: &str) -> bool {
    for event in events {
        debug!(trace_id = %trace_id, serial = %event.serial(), kind = event.kind(), "device event");
        if sink.send(event).is_err() {
            return false;
        }
    }
    true
}

fn start_tracker(
    program: String,
    args_primary: Vec<String>,
    args_fallback: Vec<String>,
    sink: SyncSender<DeviceEvent>,
    trace_id: String,
) -> TrackerHandle {
    let stop_flag = Arc::new(AtomicBool::new(false));
    let child_slot: Arc<Mutex<Option<Child>>> = Arc::new(Mutex::new(None));
    let stop_thread = Arc::clone(&stop_flag);
    let child_thread = Arc::clone(&child_slot);

    let join = thread::spawn(move || {
        let mut known: Vec<Device> = Vec::new();
        let mut backoff_ms = BACKOFF_START_MS;
        let mut use_fallback = false;

        loop {
            if stop_thread.load(Ordering::Relaxed) {
                return;
            }

            let args = if use_fallback { &args_fallback } else { &args_primary };
            let Some(mut child) = spawn_tracker(&program, args, &trace_id) else {
                thread::sleep(Duration::from_millis(backoff_ms));
                backoff_ms = (backoff_ms * 2).min(BACKOFF_MAX_MS);
                continue;
            };

            let stdout = child.stdout.take();
            let stderr_join = child
                .stderr
                .take()
                .map(|stderr| report_stderr(stderr, trace_id.clone()));
            let started = Instant::now();
            {
                let mut guard = match child_thread.lock() {
                    Ok(guard) => guard,
                    Err(_) => {
                        let _ = child.kill();
                        return;
                    }
                };
                *guard = Some(child);
            }
            // stop() may have run between the flag check and storing the child.
            if stop_thread.load(Ordering::Relaxed) {
                kill_child(&child_thread);
                return;
            }

            let Some(stdout) = stdout else {
                kill_child(&child_thread);
                return;
            };

            let reader = std::io::BufReader::new(stdout);
            let mut parser = TrackDevicesStreamParser::new();
            let mut saw_output = false;
            for line in reader.lines() {
                if stop_thread.load(Ordering::Relaxed) {
                    break;
                }
                let line = match line {
                    Ok(line) => line,
                    Err(err) => {
                        warn!(trace_id = %trace_id, error = %err, "failed to read adb device tracker stdout");
                        break;
                    }
                };
                saw_output = true;
                if let Some(snapshot) = parser.push_line(&line) {
                    let events = diff_snapshots(&known, &snapshot);
                    known = snapshot;
                    if !publish(&sink, events, &trace_id) {
                        kill_child(&child_thread);
                        return;
                    }
                    // Successful snapshot: reset backoff for the next unexpected exit.
                    backoff_ms = BACKOFF_START_MS;
                }
            }

            if let Some(snapshot) = parser.flush() {
                let events = diff_snapshots(&known, &snapshot);
                known = snapshot;
                if !publish(&sink, events, &trace_id) {
                    kill_child(&child_thread);
                    return;
                }
            }

            let exit_code = reap_child(&child_thread);
            kill_child(&child_thread);
            if let Some(join) = stderr_join {
                let _ = join.join();
            }

            if stop_thread.load(Ordering::Relaxed) {
                return;
            }

            // If `-l` is unsupported, adb exits quickly with a non-zero code and no output.
            if !use_fallback
                && !saw_output
                && exit_code.unwrap_or_default() != 0
                && started.elapsed() < Duration::from_secs(1)
            {
                warn!(trace_id = %trace_id, "adb track-devices -l exited quickly; retrying without -l");
                use_fallback = true;
                continue;
            }

            warn!(trace_id = %trace_id, exit_code = ?exit_code, "adb device tracker exited");
            // Unexpected exit: bounded exponential backoff restart.
            thread::sleep(Duration::from_millis(backoff_ms));
            backoff_ms = (backoff_ms * 2).min(BACKOFF_MAX_MS);
        }
    });

    TrackerHandle {
        stop_flag,
        child: child_slot,
        join,
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::app::models::DeviceState;
    use std::sync::mpsc::sync_channel;

    fn script_tracker(script: &str, sink: SyncSender<DeviceEvent>) -> TrackerHandle {
        let args = vec!["-c".to_string(), script.to_string()];
        start_tracker(
            "sh".to_string(),
            args.clone(),
            args,
            sink,
            "trace-tracker".to_string(),
        )
    }

    #[test]
    fn publishes_diffed_events_from_stream() {
        let (tx, rx) = sync_channel(16);
        let handle = script_tracker(
            "printf 'List of devices attached\\nSN1 device model:Pixel\\n\\n'; \
             printf 'List of devices attached\\nSN1 unauthorized model:Pixel\\nSN2 device\\n\\n'; \
             printf 'List of devices attached\\nSN2 device\\n\\n'; exec sleep 30",
            tx,
        );

        let mut events = Vec::new();
        while events.len() < 4 {
            let event = rx
                .recv_timeout(Duration::from_secs(10))
                .expect("expected tracker event");
            events.push(event);
        }
        handle.stop();

        assert!(matches!(&events[0], DeviceEvent::Connected(d) if d.serial == "SN1"));
        assert!(matches!(
            &events[1],
            DeviceEvent::Changed(d) if d.serial == "SN1" && d.state == DeviceState::Unauthorized
        ));
        assert!(matches!(&events[2], DeviceEvent::Connected(d) if d.serial == "SN2"));
        assert_eq!(events[3], DeviceEvent::Disconnected("SN1".to_string()));
    }

    #[test]
    fn stop_returns_while_tracker_is_blocked() {
        let (tx, _rx) = sync_channel(16);
        let handle = script_tracker("exec sleep 30", tx);
        thread::sleep(Duration::from_millis(100));
        let start = Instant::now();
        handle.stop();
        assert!(start.elapsed() < Duration::from_secs(10));
    }
}
