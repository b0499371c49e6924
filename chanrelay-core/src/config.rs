use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::channel::ChannelsFile;
use crate::error::{ConfigError, Result};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct RelayConfig {
    #[serde(default)]
    pub server: ServerSection,
    pub paths: PathsSection,
    #[serde(default)]
    pub supervisor: SupervisorSection,
    #[serde(default)]
    pub ffmpeg: FfmpegSection,
    /// Directory the config was loaded from; relative paths resolve against it.
    #[serde(skip)]
    pub base_dir: PathBuf,
}

impl RelayConfig {
    pub fn resolve_path<P: AsRef<Path>>(&self, candidate: P) -> PathBuf {
        let path = candidate.as_ref();
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_dir.join(path)
        }
    }

    pub fn output_root(&self) -> PathBuf {
        self.resolve_path(&self.paths.output_root)
    }

    pub fn channels_file(&self) -> PathBuf {
        self.resolve_path(&self.paths.channels_file)
    }

    pub fn validate(&self) -> Result<()> {
        if self.supervisor.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "supervisor.poll_interval_ms",
                reason: "must be greater than zero".into(),
            });
        }
        if self.supervisor.interactive_timeout_seconds > self.supervisor.long_poll_timeout_seconds
        {
            return Err(ConfigError::Invalid {
                field: "supervisor.interactive_timeout_seconds",
                reason: "must not exceed long_poll_timeout_seconds".into(),
            });
        }
        if self.ffmpeg.segment_extension.is_empty()
            || self.ffmpeg.segment_extension.contains(['.', '/', '\\'])
        {
            return Err(ConfigError::Invalid {
                field: "ffmpeg.segment_extension",
                reason: format!("'{}' is not a bare extension", self.ffmpeg.segment_extension),
            });
        }
        if self.ffmpeg.playlist_name.is_empty() || self.ffmpeg.playlist_name.contains(['/', '\\'])
        {
            return Err(ConfigError::Invalid {
                field: "ffmpeg.playlist_name",
                reason: format!("'{}' is not a plain file name", self.ffmpeg.playlist_name),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerSection {
    pub bind_address: String,
    pub port: u16,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: 8000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PathsSection {
    pub output_root: String,
    #[serde(default = "default_channels_file")]
    pub channels_file: String,
}

fn default_channels_file() -> String {
    "channels.toml".to_string()
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SupervisorSection {
    pub interactive_timeout_seconds: u64,
    pub long_poll_timeout_seconds: u64,
    pub poll_interval_ms: u64,
    pub termination_grace_seconds: u64,
    pub stderr_tail_bytes: usize,
}

impl Default for SupervisorSection {
    fn default() -> Self {
        Self {
            interactive_timeout_seconds: 15,
            long_poll_timeout_seconds: 300,
            poll_interval_ms: 1000,
            termination_grace_seconds: 5,
            stderr_tail_bytes: 1000,
        }
    }
}

impl SupervisorSection {
    pub fn interactive_timeout(&self) -> Duration {
        Duration::from_secs(self.interactive_timeout_seconds)
    }

    pub fn long_poll_timeout(&self) -> Duration {
        Duration::from_secs(self.long_poll_timeout_seconds)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn termination_grace(&self) -> Duration {
        Duration::from_secs(self.termination_grace_seconds)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct FfmpegSection {
    pub binary: String,
    pub log_level: String,
    pub hls_time: u32,
    pub hls_list_size: u32,
    pub playlist_name: String,
    pub segment_extension: String,
    pub extra_input_args: Vec<String>,
}

impl Default for FfmpegSection {
    fn default() -> Self {
        Self {
            binary: "ffmpeg".to_string(),
            log_level: "warning".to_string(),
            hls_time: 4,
            hls_list_size: 6,
            playlist_name: "index.m3u8".to_string(),
            segment_extension: "ts".to_string(),
            extra_input_args: Vec::new(),
        }
    }
}

pub fn load_relay_config<P: AsRef<Path>>(path: P) -> Result<RelayConfig> {
    let path = path.as_ref();
    let mut config: RelayConfig = load_toml(path)?;
    config.base_dir = path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    config.validate()?;
    Ok(config)
}

pub fn load_channels_file<P: AsRef<Path>>(path: P) -> Result<ChannelsFile> {
    let path = path.as_ref();
    if !path.exists() {
        return Ok(ChannelsFile::default());
    }
    load_toml(path)
}

pub fn save_channels_file<P: AsRef<Path>>(path: P, file: &ChannelsFile) -> Result<()> {
    let path = path.as_ref();
    let content = toml::to_string_pretty(file).map_err(|source| ConfigError::Serialize {
        source,
        path: path.to_path_buf(),
    })?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|source| ConfigError::Io {
            source,
            path: parent.to_path_buf(),
        })?;
    }
    // unique per write
    let staging = path.with_extension(format!("toml.{}.tmp", Uuid::new_v4().simple()));
    std::fs::write(&staging, content).map_err(|source| ConfigError::Io {
        source,
        path: staging.clone(),
    })?;
    std::fs::rename(&staging, path).map_err(|source| {
        let _ = std::fs::remove_file(&staging);
        ConfigError::Io {
            source,
            path: path.to_path_buf(),
        }
    })
}

fn load_toml<T, P>(path: P) -> Result<T>
where
    T: DeserializeOwned,
    P: AsRef<Path>,
{
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        source,
        path: path.to_path_buf(),
    })?;
    toml::from_str(&content).map_err(|source| ConfigError::Parse {
        source,
        path: path.to_path_buf(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_fixture_configs() {
        let dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("../configs");
        let config = load_relay_config(dir.join("chanrelay.toml")).expect("config should parse");
        assert_eq!(config.server.port, 8000);
        assert_eq!(config.supervisor.interactive_timeout(), Duration::from_secs(15));
        assert_eq!(config.supervisor.long_poll_timeout(), Duration::from_secs(300));
        assert_eq!(config.ffmpeg.playlist_name, "index.m3u8");
        assert!(config.channels_file().ends_with("channels.toml"));

        let channels = load_channels_file(config.channels_file()).expect("channels should parse");
        assert!(channels.channels.iter().any(|channel| channel.id == "btvld"));
    }

    #[test]
    fn missing_channels_file_is_empty() {
        let dir = tempfile::TempDir::new().unwrap();
        let file = load_channels_file(dir.path().join("absent.toml")).unwrap();
        assert!(file.channels.is_empty());
    }

    #[test]
    fn rejects_dotted_segment_extension() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("chanrelay.toml");
        std::fs::write(
            &path,
            "[paths]\noutput_root = \"out\"\n[ffmpeg]\nsegment_extension = \".ts\"\n",
        )
        .unwrap();
        let err = load_relay_config(&path).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                field: "ffmpeg.segment_extension",
                ..
            }
        ));
    }

    #[test]
    fn relative_paths_resolve_against_config_dir() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("chanrelay.toml");
        std::fs::write(&path, "[paths]\noutput_root = \"hls\"\n").unwrap();
        let config = load_relay_config(&path).unwrap();
        assert_eq!(config.output_root(), dir.path().join("hls"));
        assert_eq!(config.channels_file(), dir.path().join("channels.toml"));
        assert_eq!(config.supervisor.stderr_tail_bytes, 1000);
    }
}
