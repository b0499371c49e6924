use std::path::Path;

use tokio::process::Command;

use crate::channel::{parse_resolution, Channel, ProcessingProfile, TranscodeParams};
use crate::config::FfmpegSection;

/// Produces the backing-process command for a channel.
pub trait CommandBuilder: Send + Sync {
    fn build(&self, channel: &Channel, output_dir: &Path) -> Command;

    /// Human readable form of the command, for logs and admin output.
    fn describe(&self, channel: &Channel, output_dir: &Path) -> String {
        let command = self.build(channel, output_dir);
        let std = command.as_std();
        let mut parts = vec![std.get_program().to_string_lossy().to_string()];
        parts.extend(std.get_args().map(|arg| arg.to_string_lossy().to_string()));
        parts.join(" ")
    }
}

#[derive(Debug, Clone)]
pub struct FfmpegCommandBuilder {
    config: FfmpegSection,
}

impl FfmpegCommandBuilder {
    pub fn new(config: FfmpegSection) -> Self {
        Self { config }
    }

    pub fn args(&self, channel: &Channel, output_dir: &Path) -> Vec<String> {
        let mut args = vec![
            "-hide_banner".to_string(),
            "-loglevel".to_string(),
            self.config.log_level.clone(),
            "-nostdin".to_string(),
        ];
        args.extend(self.config.extra_input_args.iter().cloned());
        args.push("-i".to_string());
        args.push(channel.source_url.clone());

        match &channel.profile {
            ProcessingProfile::Copy => {
                args.push("-c".to_string());
                args.push("copy".to_string());
            }
            ProcessingProfile::Transcode(params) => {
                if let Some(logo) = &params.logo {
                    args.push("-i".to_string());
                    args.push(logo.to_string_lossy().to_string());
                }
                self.push_transcode_args(&mut args, params);
            }
        }

        let segment_pattern = output_dir.join(format!("seg_%05d.{}", self.config.segment_extension));
        args.extend([
            "-f".to_string(),
            "hls".to_string(),
            "-hls_time".to_string(),
            self.config.hls_time.to_string(),
            "-hls_list_size".to_string(),
            self.config.hls_list_size.to_string(),
            "-hls_flags".to_string(),
            "delete_segments+omit_endlist".to_string(),
            "-hls_base_url".to_string(),
            "segment/".to_string(),
            "-hls_segment_filename".to_string(),
            segment_pattern.to_string_lossy().to_string(),
            output_dir
                .join(&self.config.playlist_name)
                .to_string_lossy()
                .to_string(),
        ]);
        args
    }

    fn push_transcode_args(&self, args: &mut Vec<String>, params: &TranscodeParams) {
        let mut video_filters = Vec::new();
        if let Some((width, height)) = params.resolution.as_deref().and_then(parse_resolution) {
            video_filters.push(format!("scale={width}:{height}"));
        }
        if let Some(text) = &params.watermark {
            video_filters.push(format!(
                "drawtext=text='{}':fontcolor=white@0.8:fontsize=h/24:x=w-tw-10:y=h-th-10",
                escape_drawtext(text)
            ));
        }

        if params.logo.is_some() {
            let mut graph = String::from("[0:v]");
            if video_filters.is_empty() {
                graph.push_str("null");
            } else {
                graph.push_str(&video_filters.join(","));
            }
            graph.push_str("[base];[base][1:v]overlay=W-w-10:10[vout]");
            args.extend([
                "-filter_complex".to_string(),
                graph,
                "-map".to_string(),
                "[vout]".to_string(),
                "-map".to_string(),
                "0:a?".to_string(),
            ]);
        } else if !video_filters.is_empty() {
            args.push("-vf".to_string());
            args.push(video_filters.join(","));
        }

        args.push("-c:v".to_string());
        args.push(params.video_codec.clone());
        args.push("-preset".to_string());
        args.push(params.preset.clone());
        if let Some(tune) = &params.tune {
            args.push("-tune".to_string());
            args.push(tune.clone());
        }
        args.extend([
            "-c:a".to_string(),
            params.audio_codec.clone(),
            "-ar".to_string(),
            params.audio_sample_rate.to_string(),
            "-ac".to_string(),
            params.audio_channels.to_string(),
        ]);
    }
}

impl CommandBuilder for FfmpegCommandBuilder {
    fn build(&self, channel: &Channel, output_dir: &Path) -> Command {
        let mut command = Command::new(&self.config.binary);
        command.args(self.args(channel, output_dir));
        command.env("LC_ALL", "C");
        command
    }
}

fn escape_drawtext(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '\\' | '\'' | ':' | '%' | ',' | ';' | '[' | ']' => {
                escaped.push('\\');
                escaped.push(c);
            }
            _ => escaped.push(c),
        }
    }
    escaped
}
