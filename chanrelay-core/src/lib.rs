pub mod artifacts;
pub mod channel;
pub mod config;
pub mod error;
pub mod http;
pub mod lifecycle;
pub mod supervisor;
pub mod watcher;

pub use artifacts::{is_segment_name, ArtifactError, ArtifactResult, ArtifactServer};
pub use channel::{
    Channel, ChannelError, ChannelRegistry, ChannelResult, ChannelsFile, ProcessingProfile,
    TranscodeParams,
};
pub use config::{
    load_channels_file, load_relay_config, save_channels_file, FfmpegSection, PathsSection,
    RelayConfig, ServerSection, SupervisorSection,
};
pub use error::{ConfigError, Result};
pub use http::{create_router, ApiError, ApiResult, AppState};
pub use lifecycle::{wait_for_signal, LifecycleManager, ShutdownReport};
pub use supervisor::{
    CommandBuilder, FfmpegCommandBuilder, ProcessExit, ProcessHandle, ProcessSupervisor,
    Session, SessionSnapshot, SessionStatus, SupervisorError, SupervisorResult,
    SupervisorSettings, TerminateOutcome,
};
pub use watcher::{ArtifactWatcher, WaitPolicy, WatchError, WatchResult, WatchSettings};
