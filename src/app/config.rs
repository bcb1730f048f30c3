use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::app::error::AppError;

pub const DEFAULT_ADB_SERVER_PORT: u16 = 5037;

const MAX_GUARD_WAIT_SECONDS: u64 = 60 * 60;
const MAX_SHELL_TIMEOUT_MINUTES: u64 = 24 * 60;
const MAX_COMMAND_TIMEOUT_SECONDS: u64 = 60 * 60;
const MAX_CHANNEL_CAPACITY: usize = 4096;

fn default_required_files() -> Vec<String> {
    if cfg!(windows) {
        vec![
            "adb.exe".to_string(),
            "AdbWinApi.dll".to_string(),
            "AdbWinUsbApi.dll".to_string(),
        ]
    } else {
        vec!["adb".to_string()]
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BridgeSettings {
    pub directory_name: String,
    pub required_files: Vec<String>,
    pub adb_path: String,
    pub host: String,
    pub port: u16,
    pub kill_stale_server: bool,
    pub kill_server_on_exit: bool,
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self {
            directory_name: "adb".to_string(),
            required_files: default_required_files(),
            adb_path: String::new(),
            host: "127.0.0.1".to_string(),
            port: DEFAULT_ADB_SERVER_PORT,
            kill_stale_server: true,
            kill_server_on_exit: true,
        }
    }
}

impl BridgeSettings {
    /// Name of the executable inside the bridge directory.
    pub fn executable_name(&self) -> &str {
        self.required_files
            .first()
            .map(|name| name.as_str())
            .unwrap_or("adb")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GuardSettings {
    pub wait_seconds: u64,
}

impl Default for GuardSettings {
    fn default() -> Self {
        Self { wait_seconds: 60 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CommandSettings {
    pub shell_timeout_minutes: u64,
    pub package_timeout_seconds: u64,
    pub install_timeout_seconds: u64,
    pub reinstall: bool,
}

impl Default for CommandSettings {
    fn default() -> Self {
        Self {
            shell_timeout_minutes: 10,
            package_timeout_seconds: 30,
            install_timeout_seconds: 180,
            reinstall: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MonitorSettings {
    pub channel_capacity: usize,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            channel_capacity: 64,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingSettings {
    pub log_level: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ConsoleConfig {
    #[serde(default)]
    pub bridge: BridgeSettings,
    #[serde(default)]
    pub guard: GuardSettings,
    #[serde(default)]
    pub command: CommandSettings,
    #[serde(default)]
    pub monitor: MonitorSettings,
    #[serde(default)]
    pub logging: LoggingSettings,
}

pub fn config_path() -> PathBuf {
    if let Ok(path) = std::env::var("ADB_CONSOLE_CONFIG_PATH") {
        return PathBuf::from(path);
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".adb_console_config.json")
}

pub fn load_config() -> Result<ConsoleConfig, AppError> {
    load_config_from_path(&config_path())
}

pub fn load_config_from_path(path: &Path) -> Result<ConsoleConfig, AppError> {
    if !path.exists() {
        return Ok(ConsoleConfig::default());
    }
    let raw = fs::read_to_string(path)
        .map_err(|err| AppError::system(format!("Failed to read config: {err}"), ""))?;
    let config: ConsoleConfig = serde_json::from_str(&raw)
        .map_err(|err| AppError::validation(format!("Failed to parse config: {err}"), ""))?;
    Ok(validate_config(config))
}

pub fn save_config_to_path(config: &ConsoleConfig, path: &Path) -> Result<(), AppError> {
    if let Some(parent) = path.parent() {
        let _ = fs::create_dir_all(parent);
    }
    let payload = serde_json::to_string_pretty(config)
        .map_err(|err| AppError::system(format!("Failed to serialize config: {err}"), ""))?;
    fs::write(path, payload)
        .map_err(|err| AppError::system(format!("Failed to write config: {err}"), ""))?;
    Ok(())
}

fn validate_config(mut config: ConsoleConfig) -> ConsoleConfig {
    let defaults = ConsoleConfig::default();
    if config.bridge.directory_name.trim().is_empty() {
        config.bridge.directory_name = defaults.bridge.directory_name;
    }
    config
        .bridge
        .required_files
        .retain(|name| !name.trim().is_empty());
    if config.bridge.required_files.is_empty() {
        config.bridge.required_files = defaults.bridge.required_files;
    }
    if config.bridge.host.trim().is_empty() {
        config.bridge.host = defaults.bridge.host;
    }
    if config.bridge.port == 0 {
        config.bridge.port = DEFAULT_ADB_SERVER_PORT;
    }
    if config.guard.wait_seconds == 0 {
        config.guard.wait_seconds = defaults.guard.wait_seconds;
    }
    config.guard.wait_seconds = config.guard.wait_seconds.min(MAX_GUARD_WAIT_SECONDS);
    if config.command.shell_timeout_minutes == 0 {
        config.command.shell_timeout_minutes = defaults.command.shell_timeout_minutes;
    }
    config.command.shell_timeout_minutes = config
        .command
        .shell_timeout_minutes
        .min(MAX_SHELL_TIMEOUT_MINUTES);
    if config.command.package_timeout_seconds == 0 {
        config.command.package_timeout_seconds = defaults.command.package_timeout_seconds;
    }
    config.command.package_timeout_seconds = config
        .command
        .package_timeout_seconds
        .min(MAX_COMMAND_TIMEOUT_SECONDS);
    if config.command.install_timeout_seconds == 0 {
        config.command.install_timeout_seconds = defaults.command.install_timeout_seconds;
    }
    config.command.install_timeout_seconds = config
        .command
        .install_timeout_seconds
        .min(MAX_COMMAND_TIMEOUT_SECONDS);
    if config.monitor.channel_capacity == 0 {
        config.monitor.channel_capacity = defaults.monitor.channel_capacity;
    }
    config.monitor.channel_capacity = config.monitor.channel_capacity.min(MAX_CHANNEL_CAPACITY);
    if config.logging.log_level.trim().is_empty() {
        config.logging.log_level = defaults.logging.log_level;
    }
    config
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn missing_file_yields_defaults() {
        let tmp = TempDir::new().expect("tmp");
        let config = load_config_from_path(&tmp.path().join("absent.json")).expect("load");
        assert_eq!(config, ConsoleConfig::default());
        assert_eq!(config.bridge.port, 5037);
        assert_eq!(config.guard.wait_seconds, 60);
        assert_eq!(config.command.shell_timeout_minutes, 10);
    }

    #[test]
    fn partial_file_keeps_section_defaults() {
        let tmp = TempDir::new().expect("tmp");
        let path = tmp.path().join("config.json");
        fs::write(&path, r#"{ "guard": { "wait_seconds": 5 } }"#).expect("write");
        let config = load_config_from_path(&path).expect("load");
        assert_eq!(config.guard.wait_seconds, 5);
        assert_eq!(config.bridge, BridgeSettings::default());
    }

    #[test]
    fn clamps_invalid_values() {
        let mut config = ConsoleConfig::default();
        config.bridge.port = 0;
        config.bridge.required_files = vec![" ".to_string()];
        config.guard.wait_seconds = 0;
        config.command.shell_timeout_minutes = 0;
        config.monitor.channel_capacity = 0;
        let validated = validate_config(config);
        assert_eq!(validated.bridge.port, DEFAULT_ADB_SERVER_PORT);
        assert_eq!(validated.bridge.required_files, default_required_files());
        assert_eq!(validated.guard.wait_seconds, 60);
        assert_eq!(validated.command.shell_timeout_minutes, 10);
        assert_eq!(validated.monitor.channel_capacity, 64);
    }

    #[test]
    fn clamps_oversized_values() {
        let mut config = ConsoleConfig::default();
        config.guard.wait_seconds = u64::MAX;
        config.command.shell_timeout_minutes = u64::MAX;
        config.command.package_timeout_seconds = u64::MAX;
        config.command.install_timeout_seconds = u64::MAX;
        config.monitor.channel_capacity = usize::MAX;
        let validated = validate_config(config);
        assert_eq!(validated.guard.wait_seconds, MAX_GUARD_WAIT_SECONDS);
        assert_eq!(validated.command.shell_timeout_minutes, MAX_SHELL_TIMEOUT_MINUTES);
        assert_eq!(validated.command.package_timeout_seconds, MAX_COMMAND_TIMEOUT_SECONDS);
        assert_eq!(validated.command.install_timeout_seconds, MAX_COMMAND_TIMEOUT_SECONDS);
        assert_eq!(validated.monitor.channel_capacity, MAX_CHANNEL_CAPACITY);
    }

    #[test]
    fn oversized_values_in_file_load_clamped() {
        let tmp = TempDir::new().expect("tmp");
        let path = tmp.path().join("config.json");
        fs::write(
            &path,
            r#"{ "guard": { "wait_seconds": 18446744073709551615 }, "monitor": { "channel_capacity": 1000000000 } }"#,
        )
        .expect("write");
        let config = load_config_from_path(&path).expect("load");
        assert_eq!(config.guard.wait_seconds, MAX_GUARD_WAIT_SECONDS);
        assert_eq!(config.monitor.channel_capacity, MAX_CHANNEL_CAPACITY);
    }

    #[test]
    fn rejects_malformed_json() {
        let tmp = TempDir::new().expect("tmp");
        let path = tmp.path().join("config.json");
        fs::write(&path, "{ not json").expect("write");
        let err = load_config_from_path(&path).expect_err("expected parse error");
        assert_eq!(err.code, "ERR_VALIDATION");
    }

    #[test]
    fn save_then_load_preserves_values() {
        let tmp = TempDir::new().expect("tmp");
        let path = tmp.path().join("nested").join("config.json");
        let mut config = ConsoleConfig::default();
        config.bridge.adb_path = "/opt/platform-tools/adb".to_string();
        save_config_to_path(&config, &path).expect("save");
        assert_eq!(load_config_from_path(&path).expect("load"), config);
    }
}
