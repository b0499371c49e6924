use std::path::{Path, PathBuf};

use clap::{Args, Subcommand};
use serde::Serialize;

use chanrelay_core::channel::{Channel, ChannelRegistry, ProcessingProfile, TranscodeParams};

use crate::{DisplayFallback, Result};

/// Edits the channels file. A running server picks changes up on restart;
/// use the admin API for live changes.
#[derive(Subcommand, Debug, Clone)]
pub enum ChannelsCommands {
    /// List registered channels
    List,
    /// Register a channel
    Add(ChannelAddArgs),
    /// Unregister a channel
    Remove {
        /// Channel identifier
        id: String,
    },
}

#[derive(Args, Debug, Clone)]
pub struct ChannelAddArgs {
    /// Channel identifier, used in URLs and as the output directory name
    pub id: String,
    /// Upstream source URL
    pub source_url: String,
    /// Re-encode instead of remuxing
    #[arg(long)]
    pub transcode: bool,
    /// Output resolution, e.g. 854x480
    #[arg(long, requires = "transcode")]
    pub resolution: Option<String>,
    /// Text burned into the bottom-right corner
    #[arg(long, requires = "transcode")]
    pub watermark: Option<String>,
    /// Image overlaid in the top-right corner
    #[arg(long, requires = "transcode")]
    pub logo: Option<PathBuf>,
    #[arg(long, requires = "transcode")]
    pub video_codec: Option<String>,
    #[arg(long, requires = "transcode")]
    pub preset: Option<String>,
}

impl ChannelAddArgs {
    pub fn to_channel(&self) -> Channel {
        let channel = Channel::new(self.id.clone(), self.source_url.clone());
        if !self.transcode {
            return channel;
        }
        let defaults = TranscodeParams::default();
        let params = TranscodeParams {
            video_codec: self.video_codec.clone().unwrap_or(defaults.video_codec),
            preset: self.preset.clone().unwrap_or(defaults.preset),
            resolution: self.resolution.clone(),
            watermark: self.watermark.clone(),
            logo: self.logo.clone(),
            ..TranscodeParams::default()
        };
        channel.with_profile(ProcessingProfile::Transcode(params))
    }
}

#[derive(Debug, Serialize)]
pub struct ChannelList {
    pub path: PathBuf,
    pub channels: Vec<Channel>,
}

impl DisplayFallback for ChannelList {
    fn display(&self) -> String {
        if self.channels.is_empty() {
            return format!("no channels in {}", self.path.display());
        }
        self.channels
            .iter()
            .map(|channel| {
                format!(
                    "{} | {} | {}",
                    channel.id, channel.profile, channel.source_url
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[derive(Debug, Serialize)]
pub struct ChannelChange {
    pub action: &'static str,
    pub channel: Channel,
}

impl DisplayFallback for ChannelChange {
    fn display(&self) -> String {
        format!(
            "{} {} ({})",
            self.action, self.channel.id, self.channel.profile
        )
    }
}

pub fn list(path: &Path) -> Result<ChannelList> {
    let registry = ChannelRegistry::open(path)?;
    Ok(ChannelList {
        path: path.to_path_buf(),
        channels: registry.list(),
    })
}

pub fn add(path: &Path, args: &ChannelAddArgs) -> Result<ChannelChange> {
    let registry = ChannelRegistry::open(path)?;
    let channel = args.to_channel();
    registry.add(channel.clone())?;
    Ok(ChannelChange {
        action: "added",
        channel,
    })
}

pub fn remove(path: &Path, id: &str) -> Result<ChannelChange> {
    let registry = ChannelRegistry::open(path)?;
    let channel = registry.remove(id)?;
    Ok(ChannelChange {
        action: "removed",
        channel,
    })
}
