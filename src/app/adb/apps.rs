use std::collections::BTreeMap;
use std::sync::OnceLock;

use regex::Regex;

/// Parses `pm list packages -f` into `package name -> apk path`.
///
/// Lines without a path (plain `pm list packages`) map to an empty path.
pub fn parse_pm_list_packages_output(output: &str) -> BTreeMap<String, String> {
    let mut packages = BTreeMap::new();
    for raw in output.lines() {
        let line = raw.trim();
        if line.is_empty() {
            continue;
        }
        let payload = line.strip_prefix("package:").unwrap_or(line);
        match payload.rsplit_once('=') {
            Some((apk_path, pkg)) => {
                let pkg = pkg.trim();
                if pkg.is_empty() {
                    continue;
                }
                packages.insert(pkg.to_string(), apk_path.trim().to_string());
            }
            None => {
                packages.insert(payload.to_string(), String::new());
            }
        }
    }
    packages
}

fn failure_regex() -> &'static Regex {
    static FAILURE: OnceLock<Regex> = OnceLock::new();
    FAILURE.get_or_init(|| {
        Regex::new(r"Failure\s*\[([A-Z_]+)[^\]]*\]").expect("failure regex should compile")
    })
}

/// Interprets the text printed by `adb install` / `adb uninstall`.
///
/// Returns the package-manager failure code (e.g. `INSTALL_FAILED_OLDER_SDK`)
/// on failure.
pub fn parse_package_manager_result(output: &str) -> Result<(), String> {
    if let Some(caps) = failure_regex().captures(output) {
        return Err(caps[1].to_string());
    }
    let upper = output.to_uppercase();
    if upper.contains("FAILURE") || upper.contains("ERROR:") {
        return Err("UNKNOWN_ERROR".to_string());
    }
    if upper.contains("SUCCESS") {
        return Ok(());
    }
    Err("UNKNOWN_ERROR".to_string())
}
