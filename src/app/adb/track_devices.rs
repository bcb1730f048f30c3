use crate::app::adb::parse::parse_adb_devices;
use crate::app::models::{Device, DeviceEvent};

const DEVICES_HEADER: &str = "List of devices attached";

/// Splits the endless `adb track-devices` stream into device snapshots.
///
/// A frame opens at the header line and closes at a blank line or at the
/// next header. Repeated identical frames are reported once.
#[derive(Debug, Default)]
pub struct TrackDevicesStreamParser {
    frame: Option<Vec<String>>,
    last_emitted: Option<Vec<String>>,
}

impl TrackDevicesStreamParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_line(&mut self, line: &str) -> Option<Vec<Device>> {
        let line = line.trim_end_matches(['\r', '\n']);
        if line.contains(DEVICES_HEADER) {
            let closed = self.flush();
            self.frame = Some(Vec::new());
            return closed;
        }
        if self.frame.is_none() {
            return None;
        }
        if line.trim().is_empty() {
            return self.flush();
        }
        if let Some(frame) = self.frame.as_mut() {
            frame.push(line.to_string());
        }
        None
    }

    /// Emits the open frame unless it matches the previous emission.
    pub fn flush(&mut self) -> Option<Vec<Device>> {
        let frame = self.frame.as_ref()?;
        if self.last_emitted.as_ref() == Some(frame) {
            return None;
        }
        self.last_emitted = Some(frame.clone());
        Some(parse_adb_devices(&frame.join("\n")))
    }
}

/// Turns two consecutive snapshots into notifications: disconnects for
/// vanished serials first, then connects and changes in `next` order.
pub fn diff_snapshots(previous: &[Device], next: &[Device]) -> Vec<DeviceEvent> {
    let mut events = Vec::new();
    for old in previous {
        if !next.iter().any(|device| device.serial == old.serial) {
            events.push(DeviceEvent::Disconnected(old.serial.clone()));
        }
    }
    for device in next {
        match previous.iter().find(|old| old.serial == device.serial) {
            None => events.push(DeviceEvent::Connected(device.clone())),
            Some(old) if old.differs_from(device) => {
                events.push(DeviceEvent::Changed(device.clone()))
            }
            Some(_) => {}
        }
    }
    events
}
