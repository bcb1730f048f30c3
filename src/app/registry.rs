use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::{debug, info};

use crate::app::models::Device;

/// Ordered set of reachable devices, unique by serial.
///
/// Every read and write goes through one lock so size and contents are never
/// observed mid-mutation. Lock poisoning is recovered from: each mutation
/// leaves the vector valid before it can panic.
#[derive(Debug, Default)]
pub struct DeviceRegistry {
    devices: RwLock<Vec<Device>>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, Vec<Device>> {
        self.devices
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Vec<Device>> {
        self.devices
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Appends `device` unless its serial is already known. Returns whether it
    /// was added.
    pub fn upsert_on_connect(&self, device: Device) -> bool {
        if device.is_null() {
            return false;
        }
        let mut devices = self.write();
        if devices.iter().any(|known| known.serial == device.serial) {
            debug!(serial = %device.serial, "duplicate connect notification ignored");
            return false;
        }
        info!(serial = %device.serial, state = %device.state, "device connected");
        devices.push(device);
        true
    }

    /// Replaces the entry with the same serial in place. An unknown serial is
    /// a lost update and is dropped.
    pub fn replace_on_change(&self, device: Device) -> bool {
        if device.is_null() {
            return false;
        }
        let mut devices = self.write();
        match devices.iter_mut().find(|known| known.serial == device.serial) {
            Some(slot) => {
                info!(serial = %device.serial, state = %device.state, "device changed");
                *slot = device;
                true
            }
            None => {
                debug!(serial = %device.serial, "change for unknown device ignored");
                false
            }
        }
    }

    /// Removes every entry with `serial` and returns how many went.
    pub fn remove_on_disconnect(&self, serial: &str) -> usize {
        if serial.trim().is_empty() {
            return 0;
        }
        let mut devices = self.write();
        let before = devices.len();
        devices.retain(|known| known.serial != serial);
        let removed = before - devices.len();
        info!(serial = %serial, removed, "device disconnected");
        removed
    }

    pub fn snapshot(&self) -> Vec<Device> {
        self.read().clone()
    }

    pub fn find_by_serial(&self, serial: &str) -> Option<Device> {
        if serial.trim().is_empty() {
            return None;
        }
        self.read()
            .iter()
            .find(|device| device.serial == serial)
            .cloned()
    }

    /// 1-based lookup for the console's device picker; 0 is never valid.
    pub fn device_at(&self, index: usize) -> Option<Device> {
        let position = index.checked_sub(1)?;
        self.read().get(position).cloned()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }
}
