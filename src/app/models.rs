use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum DeviceState {
    Online,
    Offline,
    Unauthorized,
    Authorizing,
    Connecting,
    Bootloader,
    Recovery,
    Sideload,
    Host,
    NoPermissions,
    Unknown(String),
}

impl DeviceState {
    /// Maps the state word printed by `adb devices`.
    pub fn from_adb(value: &str) -> Self {
        match value.trim().to_lowercase().as_str() {
            "device" | "online" => DeviceState::Online,
            "offline" => DeviceState::Offline,
            "unauthorized" => DeviceState::Unauthorized,
            "authorizing" => DeviceState::Authorizing,
            "connecting" => DeviceState::Connecting,
            "bootloader" => DeviceState::Bootloader,
            "recovery" => DeviceState::Recovery,
            "sideload" => DeviceState::Sideload,
            "host" => DeviceState::Host,
            "no permissions" | "no" => DeviceState::NoPermissions,
            other => DeviceState::Unknown(other.to_string()),
        }
    }
}

impl fmt::Display for DeviceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            DeviceState::Online => "Online",
            DeviceState::Offline => "Offline",
            DeviceState::Unauthorized => "Unauthorized",
            DeviceState::Authorizing => "Authorizing",
            DeviceState::Connecting => "Connecting",
            DeviceState::Bootloader => "Bootloader",
            DeviceState::Recovery => "Recovery",
            DeviceState::Sideload => "Sideload",
            DeviceState::Host => "Host",
            DeviceState::NoPermissions => "NoPermissions",
            DeviceState::Unknown(raw) => return write!(f, "Unknown({raw})"),
        };
        f.write_str(label)
    }
}

/// Point-in-time description of a device as last reported by the monitor.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Device {
    pub serial: String,
    pub state: DeviceState,
    pub name: String,
    pub model: Option<String>,
    pub product: Option<String>,
    pub transport_id: Option<String>,
}

impl Device {
    pub fn new(serial: impl Into<String>, state: DeviceState) -> Self {
        let serial = serial.into();
        Self {
            name: serial.clone(),
            serial,
            state,
            model: None,
            product: None,
            transport_id: None,
        }
    }

    /// A blank serial is how a missing payload shows up from the monitor.
    pub fn is_null(&self) -> bool {
        self.serial.trim().is_empty()
    }

    /// True when the visible attributes differ (transport ids churn on reconnect).
    pub fn differs_from(&self, other: &Device) -> bool {
        self.state != other.state || self.name != other.name
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceEvent {
    Connected(Device),
    Disconnected(String),
    Changed(Device),
}

impl DeviceEvent {
    pub fn serial(&self) -> &str {
        match self {
            DeviceEvent::Connected(device) | DeviceEvent::Changed(device) => &device.serial,
            DeviceEvent::Disconnected(serial) => serial,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            DeviceEvent::Connected(_) => "connected",
            DeviceEvent::Disconnected(_) => "disconnected",
            DeviceEvent::Changed(_) => "changed",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_adb_state_words() {
        assert_eq!(DeviceState::from_adb("device"), DeviceState::Online);
        assert_eq!(DeviceState::from_adb("unauthorized"), DeviceState::Unauthorized);
        assert_eq!(DeviceState::from_adb("no permissions"), DeviceState::NoPermissions);
        assert_eq!(
            DeviceState::from_adb("rescue"),
            DeviceState::Unknown("rescue".to_string())
        );
    }

    #[test]
    fn blank_serial_is_null_payload() {
        assert!(Device::new("  ", DeviceState::Online).is_null());
        assert!(!Device::new("SN1", DeviceState::Online).is_null());
    }

    #[test]
    fn differs_ignores_transport_id() {
        let mut a = Device::new("SN1", DeviceState::Online);
        let mut b = a.clone();
        b.transport_id = Some("7".to_string());
        assert!(!a.differs_from(&b));
        a.state = DeviceState::Offline;
        assert!(a.differs_from(&b));
    }
}
