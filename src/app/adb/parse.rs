use crate::app::models::{Device, DeviceState};

/// Parses `adb devices -l` (or one `track-devices -l` snapshot) into devices.
pub fn parse_adb_devices(output: &str) -> Vec<Device> {
    output
        .lines()
        .filter(|line| !line.trim().is_empty())
        .filter(|line| !line.trim_start().starts_with('*'))
        .filter(|line| !line.to_lowercase().contains("list of devices"))
        .filter_map(|line| {
            let tokens: Vec<&str> = line.split_whitespace().collect();
            if tokens.len() < 2 {
                return None;
            }
            let mut device = Device::new(tokens[0], DeviceState::from_adb(tokens[1]));
            let mut hardware = None;
            for token in tokens.iter().skip(2) {
                if let Some(value) = token.strip_prefix("model:") {
                    device.model = Some(value.to_string());
                } else if let Some(value) = token.strip_prefix("product:") {
                    device.product = Some(value.to_string());
                } else if let Some(value) = token.strip_prefix("device:") {
                    hardware = Some(value.to_string());
                } else if let Some(value) = token.strip_prefix("transport_id:") {
                    device.transport_id = Some(value.to_string());
                }
            }
            device.name = device
                .model
                .clone()
                .or_else(|| device.product.clone())
                .or(hardware)
                .unwrap_or_else(|| device.serial.clone());
            Some(device)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_long_listing() {
        let output = "List of devices attached\n\
            0123456789ABCDEF       device usb:1-1 product:panther model:Pixel_7 device:panther transport_id:1\n\
            emulator-5554          offline transport_id:2\n";
        let devices = parse_adb_devices(output);
        assert_eq!(devices.len(), 2);
        assert_eq!(devices[0].serial, "0123456789ABCDEF");
        assert_eq!(devices[0].state, DeviceState::Online);
        assert_eq!(devices[0].name, "Pixel_7");
        assert_eq!(devices[0].transport_id.as_deref(), Some("1"));
        assert_eq!(devices[1].state, DeviceState::Offline);
        assert_eq!(devices[1].name, "emulator-5554");
    }

    #[test]
    fn skips_daemon_noise_and_header() {
        let output = "* daemon not running; starting now at tcp:5037\n\
            * daemon started successfully\n\
            List of devices attached\n\
            R58M unauthorized usb:1-2 transport_id:3\n";
        let devices = parse_adb_devices(output);
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].state, DeviceState::Unauthorized);
    }

    #[test]
    fn falls_back_to_product_for_name() {
        let devices = parse_adb_devices("SN1 recovery product:sargo\n");
        assert_eq!(devices[0].name, "sargo");
        assert_eq!(devices[0].state, DeviceState::Recovery);
    }
}
