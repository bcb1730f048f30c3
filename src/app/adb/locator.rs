use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::app::config::BridgeSettings;
use crate::app::error::LifecycleError;

pub fn normalize_command_path(value: &str) -> String {
    let trimmed = value.trim();
    if let Some(inner) = trimmed
        .strip_prefix('"')
        .and_then(|candidate| candidate.strip_suffix('"'))
    {
        return inner.trim().to_string();
    }
    if let Some(inner) = trimmed
        .strip_prefix('\'')
        .and_then(|candidate| candidate.strip_suffix('\''))
    {
        return inner.trim().to_string();
    }
    trimmed.to_string()
}

pub fn validate_adb_program(program: &Path) -> Result<(), String> {
    if program.as_os_str().is_empty() {
        return Err("ADB command is empty".to_string());
    }
    if program.is_dir() {
        return Err("ADB path must point to an executable file".to_string());
    }
    if !program.exists() {
        return Err("ADB executable not found at the configured path".to_string());
    }
    Ok(())
}

/// Looks for a direct subdirectory of `base` named `dir_name` (case-insensitive)
/// that holds every file in `required_files`.
pub fn find_bridge_directory(base: &Path, dir_name: &str, required_files: &[String]) -> Option<PathBuf> {
    let entries = fs::read_dir(base).ok()?;
    for entry in entries.flatten() {
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        let matches_name = path
            .file_name()
            .and_then(|name| name.to_str())
            .map(|name| name.eq_ignore_ascii_case(dir_name))
            .unwrap_or(false);
        if !matches_name {
            continue;
        }
        if contains_required_files(&path, required_files) {
            return Some(path);
        }
        debug!(dir = %path.display(), "bridge directory is missing required files");
    }
    None
}

fn contains_required_files(dir: &Path, required_files: &[String]) -> bool {
    let Ok(entries) = fs::read_dir(dir) else {
        return false;
    };
    let present = entries
        .flatten()
        .filter(|entry| entry.path().is_file())
        .filter_map(|entry| entry.file_name().to_str().map(|name| name.to_string()))
        .collect::<Vec<_>>();
    let found = required_files
        .iter()
        .filter(|required| present.iter().any(|name| name.eq_ignore_ascii_case(required)))
        .count();
    found == required_files.len()
}

/// Resolves the adb executable: an explicit path wins, otherwise the bridge
/// directory under `base` is searched.
pub fn resolve_adb_program(settings: &BridgeSettings, base: &Path) -> Result<PathBuf, LifecycleError> {
    let explicit = normalize_command_path(&settings.adb_path);
    if !explicit.is_empty() {
        let program = PathBuf::from(explicit);
        return match validate_adb_program(&program) {
            Ok(()) => Ok(program),
            Err(reason) => {
                debug!(path = %program.display(), reason = %reason, "configured adb path rejected");
                Err(LifecycleError::BridgeFilesNotFound { searched: program })
            }
        };
    }

    let dir = find_bridge_directory(base, &settings.directory_name, &settings.required_files)
        .ok_or_else(|| LifecycleError::BridgeFilesNotFound {
            searched: base.join(&settings.directory_name),
        })?;
    let program = dir.join(settings.executable_name());
    info!(path = %program.display(), "adb found");
    Ok(program)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn files(names: &[&str]) -> Vec<String> {
        names.iter().map(|name| name.to_string()).collect()
    }

    fn touch(dir: &Path, name: &str) {
        fs::write(dir.join(name), b"").expect("touch");
    }

    #[test]
    fn strips_wrapping_quotes() {
        assert_eq!(
            normalize_command_path("  \"/opt/android/platform-tools/adb\"  "),
            "/opt/android/platform-tools/adb"
        );
        assert_eq!(
            normalize_command_path("  '/opt/android/platform-tools/adb'  "),
            "/opt/android/platform-tools/adb"
        );
    }

    #[test]
    fn validates_nonexistent_path() {
        let err = validate_adb_program(Path::new("/this/path/should/not/exist/adb")).unwrap_err();
        assert!(err.to_lowercase().contains("not found"));
    }

    #[test]
    fn finds_directory_with_every_required_file() {
        let tmp = TempDir::new().expect("tmp");
        let dir = tmp.path().join("ADB");
        fs::create_dir(&dir).expect("mkdir");
        for name in ["adb.exe", "AdbWinApi.dll", "AdbWinUsbApi.dll"] {
            touch(&dir, name);
        }
        let found = find_bridge_directory(
            tmp.path(),
            "adb",
            &files(&["adb.exe", "AdbWinApi.dll", "AdbWinUsbApi.dll"]),
        );
        assert_eq!(found, Some(dir));
    }

    #[test]
    fn rejects_directory_missing_a_file() {
        let tmp = TempDir::new().expect("tmp");
        let dir = tmp.path().join("adb");
        fs::create_dir(&dir).expect("mkdir");
        touch(&dir, "adb.exe");
        touch(&dir, "AdbWinApi.dll");
        let found = find_bridge_directory(
            tmp.path(),
            "adb",
            &files(&["adb.exe", "AdbWinApi.dll", "AdbWinUsbApi.dll"]),
        );
        assert_eq!(found, None);
    }

    #[test]
    fn resolve_reports_files_not_found() {
        let tmp = TempDir::new().expect("tmp");
        let settings = BridgeSettings::default();
        let err = resolve_adb_program(&settings, tmp.path()).expect_err("expected missing");
        assert!(matches!(err, LifecycleError::BridgeFilesNotFound { .. }));
    }

    #[test]
    fn resolve_uses_executable_inside_directory() {
        let tmp = TempDir::new().expect("tmp");
        let dir = tmp.path().join("adb");
        fs::create_dir(&dir).expect("mkdir");
        touch(&dir, "adb");
        let settings = BridgeSettings {
            required_files: files(&["adb"]),
            ..BridgeSettings::default()
        };
        let program = resolve_adb_program(&settings, tmp.path()).expect("resolve");
        assert_eq!(program, dir.join("adb"));
    }

    #[test]
    fn explicit_path_skips_directory_search() {
        let tmp = TempDir::new().expect("tmp");
        touch(tmp.path(), "my-adb");
        let settings = BridgeSettings {
            adb_path: format!("\"{}\"", tmp.path().join("my-adb").display()),
            ..BridgeSettings::default()
        };
        let program = resolve_adb_program(&settings, Path::new("/nonexistent")).expect("resolve");
        assert_eq!(program, tmp.path().join("my-adb"));
    }
}
