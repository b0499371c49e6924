#![allow(dead_code)]

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tempfile::TempDir;
use tokio::process::Command;

use chanrelay_core::channel::{Channel, ChannelRegistry};
use chanrelay_core::supervisor::{CommandBuilder, ProcessSupervisor, SupervisorSettings};
use chanrelay_core::watcher::{ArtifactWatcher, WatchSettings};

/// Writes a playlist and one segment after a short delay, then idles.
pub const READY_SCRIPT: &str = r#"sleep 0.3
printf 'media' > "$OUTPUT_DIR/seg_00000.ts"
printf '#EXTM3U\n#EXT-X-TARGETDURATION:1\n#EXTINF:1.0,\nsegment/seg_00000.ts\n' > "$OUTPUT_DIR/index.m3u8.tmp"
mv "$OUTPUT_DIR/index.m3u8.tmp" "$OUTPUT_DIR/index.m3u8"
exec sleep 30"#;

/// Like `READY_SCRIPT`, but ignores SIGTERM.
pub const STUBBORN_READY_SCRIPT: &str = r#"trap '' TERM
printf 'oldmedia' > "$OUTPUT_DIR/seg_00000.ts"
printf '#EXTM3U\n#EXT-X-TARGETDURATION:1\n#EXTINF:1.0,\nsegment/seg_00000.ts\n' > "$OUTPUT_DIR/index.m3u8.tmp"
mv "$OUTPUT_DIR/index.m3u8.tmp" "$OUTPUT_DIR/index.m3u8"
while true; do sleep 0.1; done"#;

pub const FAILING_SCRIPT: &str = r#"echo "Connection refused" >&2
exit 1"#;

pub const HANGING_SCRIPT: &str = "exec sleep 30";

pub const STUBBORN_SCRIPT: &str = r#"trap '' TERM
while true; do sleep 0.1; done"#;

/// Runs a shell script per channel with `OUTPUT_DIR` pointing at the
/// session's directory.
#[derive(Debug, Default)]
pub struct ScriptBuilder {
    scripts: Mutex<HashMap<String, String>>,
}

impl ScriptBuilder {
    pub fn set(&self, channel_id: &str, script: &str) {
        self.scripts
            .lock()
            .insert(channel_id.to_string(), script.to_string());
    }
}

impl CommandBuilder for ScriptBuilder {
    fn build(&self, channel: &Channel, output_dir: &Path) -> Command {
        let script = self
            .scripts
            .lock()
            .get(&channel.id)
            .cloned()
            .unwrap_or_else(|| FAILING_SCRIPT.to_string());
        let mut command = Command::new("sh");
        command.arg("-c").arg(script).env("OUTPUT_DIR", output_dir);
        command
    }
}

pub fn fast_watch() -> WatchSettings {
    WatchSettings {
        poll_interval: Duration::from_millis(50),
        interactive_timeout: Duration::from_secs(3),
        long_poll_timeout: Duration::from_secs(6),
    }
}

pub struct Harness {
    pub dir: TempDir,
    pub builder: Arc<ScriptBuilder>,
    pub supervisor: Arc<ProcessSupervisor>,
}

impl Harness {
    pub fn new(channels: &[(&str, &str)]) -> Self {
        let dir = TempDir::new().unwrap();
        let builder = Arc::new(ScriptBuilder::default());
        let registry = ChannelRegistry::from_channels(channels.iter().map(|(id, script)| {
            builder.set(id, script);
            Channel::new(*id, format!("https://example.com/{id}/playlist.m3u8"))
        }))
        .unwrap();

        let mut settings = SupervisorSettings::new(dir.path().join("hls"));
        settings.termination_grace = Duration::from_millis(500);
        let supervisor = Arc::new(ProcessSupervisor::new(
            Arc::new(registry),
            settings,
            Some(builder.clone() as Arc<dyn CommandBuilder>),
        ));
        Self {
            dir,
            builder,
            supervisor,
        }
    }

    pub fn watcher(&self, settings: WatchSettings) -> ArtifactWatcher {
        ArtifactWatcher::new(self.supervisor.clone(), settings)
    }

    pub fn output_root(&self) -> PathBuf {
        self.supervisor.output_root().to_path_buf()
    }
}
