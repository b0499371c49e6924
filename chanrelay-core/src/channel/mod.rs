mod registry;

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

pub use registry::ChannelRegistry;

const MAX_CHANNEL_ID_LEN: usize = 64;

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("invalid channel id '{0}': use 1-64 ascii letters, digits, '-' or '_'")]
    InvalidId(String),
    #[error("invalid source url for channel {id}: {reason}")]
    InvalidSource { id: String, reason: String },
    #[error("invalid profile for channel {id}: {reason}")]
    InvalidProfile { id: String, reason: String },
    #[error("channel already registered: {0}")]
    Duplicate(String),
    #[error("channel not registered: {0}")]
    NotFound(String),
    #[error("failed to persist channels: {0}")]
    Persist(#[from] crate::error::ConfigError),
}

pub type ChannelResult<T> = Result<T, ChannelError>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Channel {
    pub id: String,
    pub source_url: String,
    #[serde(default)]
    pub profile: ProcessingProfile,
}

impl Channel {
    pub fn new(id: impl Into<String>, source_url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            source_url: source_url.into(),
            profile: ProcessingProfile::Copy,
        }
    }

    pub fn with_profile(mut self, profile: ProcessingProfile) -> Self {
        self.profile = profile;
        self
    }

    pub fn validate(&self) -> ChannelResult<()> {
        validate_channel_id(&self.id)?;
        let url = Url::parse(&self.source_url).map_err(|err| ChannelError::InvalidSource {
            id: self.id.clone(),
            reason: err.to_string(),
        })?;
        if url.cannot_be_a_base() {
            return Err(ChannelError::InvalidSource {
                id: self.id.clone(),
                reason: format!("'{}' is not a stream location", self.source_url),
            });
        }
        if let ProcessingProfile::Transcode(params) = &self.profile {
            if let Some(resolution) = &params.resolution {
                if parse_resolution(resolution).is_none() {
                    return Err(ChannelError::InvalidProfile {
                        id: self.id.clone(),
                        reason: format!("resolution '{resolution}' must look like 1280x720"),
                    });
                }
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum ProcessingProfile {
    /// Remux the upstream as-is.
    #[default]
    Copy,
    Transcode(TranscodeParams),
}

impl fmt::Display for ProcessingProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessingProfile::Copy => write!(f, "copy"),
            ProcessingProfile::Transcode(params) => {
                write!(f, "transcode({}", params.video_codec)?;
                if let Some(resolution) = &params.resolution {
                    write!(f, " {resolution}")?;
                }
                if params.watermark.is_some() || params.logo.is_some() {
                    write!(f, " +overlay")?;
                }
                write!(f, ")")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TranscodeParams {
    pub video_codec: String,
    pub preset: String,
    pub tune: Option<String>,
    pub resolution: Option<String>,
    pub watermark: Option<String>,
    pub logo: Option<PathBuf>,
    pub audio_codec: String,
    pub audio_sample_rate: u32,
    pub audio_channels: u8,
}

impl Default for TranscodeParams {
    fn default() -> Self {
        Self {
            video_codec: "libx264".to_string(),
            preset: "veryfast".to_string(),
            tune: Some("zerolatency".to_string()),
            resolution: None,
            watermark: None,
            logo: None,
            audio_codec: "aac".to_string(),
            audio_sample_rate: 44100,
            audio_channels: 2,
        }
    }
}

/// On-disk shape of the channels file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChannelsFile {
    #[serde(default)]
    pub channels: Vec<Channel>,
}

pub fn validate_channel_id(id: &str) -> ChannelResult<()> {
    let valid = !id.is_empty()
        && id.len() <= MAX_CHANNEL_ID_LEN
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(())
    } else {
        Err(ChannelError::InvalidId(id.to_string()))
    }
}

pub fn parse_resolution(value: &str) -> Option<(u32, u32)> {
    let (width, height) = value.trim().split_once(['x', 'X'])?;
    let width = width.parse::<u32>().ok().filter(|w| *w > 0)?;
    let height = height.parse::<u32>().ok().filter(|h| *h > 0)?;
    Some((width, height))
}
