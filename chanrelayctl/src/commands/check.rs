use std::fmt;
use std::fs;
use std::path::Path;
use std::process::{Command, Stdio};

use serde::Serialize;

use chanrelay_core::channel::ChannelRegistry;
use chanrelay_core::config::RelayConfig;

use crate::DisplayFallback;

#[derive(Debug, Serialize)]
pub struct CheckEntry {
    pub name: String,
    pub status: CheckStatus,
    pub detail: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckStatus {
    Ok,
    Warn,
    Error,
}

impl fmt::Display for CheckStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            CheckStatus::Ok => "OK",
            CheckStatus::Warn => "WARN",
            CheckStatus::Error => "ERROR",
        };
        write!(f, "{label}")
    }
}

impl CheckEntry {
    fn ok(name: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::new(name, CheckStatus::Ok, detail)
    }

    fn warn(name: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::new(name, CheckStatus::Warn, detail)
    }

    fn error(name: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::new(name, CheckStatus::Error, detail)
    }

    fn new(name: impl Into<String>, status: CheckStatus, detail: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status,
            detail: detail.into(),
        }
    }
}

impl DisplayFallback for Vec<CheckEntry> {
    fn display(&self) -> String {
        self.iter()
            .map(|entry| format!("[{}] {}: {}", entry.status, entry.name, entry.detail))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

pub fn has_errors(entries: &[CheckEntry]) -> bool {
    entries
        .iter()
        .any(|entry| entry.status == CheckStatus::Error)
}

/// Validates everything `serve` needs without binding or spawning anything
/// long-lived.
pub fn run_checks(config_path: &Path, config: &RelayConfig) -> Vec<CheckEntry> {
    vec![
        CheckEntry::ok("config", config_path.display().to_string()),
        check_channels(&config.channels_file()),
        check_output_root(&config.output_root()),
        check_binary(&config.ffmpeg.binary),
    ]
}

fn check_channels(path: &Path) -> CheckEntry {
    if !path.exists() {
        return CheckEntry::warn(
            "channels",
            format!("{} not found; starting with no channels", path.display()),
        );
    }
    match ChannelRegistry::open(path) {
        Ok(registry) if registry.is_empty() => {
            CheckEntry::warn("channels", format!("{} lists no channels", path.display()))
        }
        Ok(registry) => CheckEntry::ok(
            "channels",
            format!("{} channel(s): {}", registry.len(), registry.ids().join(", ")),
        ),
        Err(err) => CheckEntry::error("channels", err.to_string()),
    }
}

fn check_output_root(path: &Path) -> CheckEntry {
    match fs::metadata(path) {
        Ok(meta) if meta.is_dir() => CheckEntry::ok("output_root", path.display().to_string()),
        Ok(_) => CheckEntry::error(
            "output_root",
            format!("{} is not a directory", path.display()),
        ),
        Err(_) => {
            let parent_exists = path
                .parent()
                .map(|parent| parent.as_os_str().is_empty() || parent.is_dir())
                .unwrap_or(false);
            if parent_exists {
                CheckEntry::ok(
                    "output_root",
                    format!("{} will be created", path.display()),
                )
            } else {
                CheckEntry::warn(
                    "output_root",
                    format!("{} and its parent do not exist yet", path.display()),
                )
            }
        }
    }
}

fn check_binary(binary: &str) -> CheckEntry {
    let output = Command::new(binary)
        .arg("-version")
        .stdin(Stdio::null())
        .stderr(Stdio::null())
        .output();
    match output {
        Ok(output) if output.status.success() => {
            let version = String::from_utf8_lossy(&output.stdout)
                .lines()
                .next()
                .unwrap_or_default()
                .trim()
                .to_string();
            CheckEntry::ok("ffmpeg", version)
        }
        Ok(output) => CheckEntry::error(
            "ffmpeg",
            format!("{binary} -version exited with {:?}", output.status.code()),
        ),
        Err(err) => CheckEntry::error("ffmpeg", format!("{binary}: {err}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_binary_is_an_error() {
        let entry = check_binary("chanrelay-no-such-binary");
        assert_eq!(entry.status, CheckStatus::Error);
        assert!(has_errors(&[entry]));
    }

    #[test]
    fn output_root_under_existing_parent_is_fine() {
        let dir = tempfile::TempDir::new().unwrap();
        let entry = check_output_root(&dir.path().join("hls"));
        assert_eq!(entry.status, CheckStatus::Ok);

        let file = dir.path().join("file");
        fs::write(&file, b"x").unwrap();
        assert_eq!(check_output_root(&file).status, CheckStatus::Error);
    }
}
