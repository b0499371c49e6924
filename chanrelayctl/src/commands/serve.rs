use std::path::PathBuf;
use std::sync::Arc;

use clap::Args;
use serde::Serialize;
use tokio::net::TcpListener;
use tracing::info;

use chanrelay_core::channel::ChannelRegistry;
use chanrelay_core::config::RelayConfig;
use chanrelay_core::http::{self, AppState};
use chanrelay_core::lifecycle::ShutdownReport;
use chanrelay_core::supervisor::{ProcessSupervisor, SupervisorSettings};
use chanrelay_core::watcher::WatchSettings;

use crate::{DisplayFallback, Result};

/// Runs the HTTP relay until Ctrl-C or SIGTERM.
#[derive(Args, Debug, Clone, Default)]
pub struct ServeArgs {
    /// Address to bind (overrides server.bind_address)
    #[arg(long)]
    pub bind: Option<String>,
    /// Port to listen on (overrides server.port)
    #[arg(long, env = "PORT")]
    pub port: Option<u16>,
    /// Root directory for per-channel HLS output (overrides paths.output_root)
    #[arg(long)]
    pub output_root: Option<PathBuf>,
}

#[derive(Debug, Serialize)]
pub struct ServeSummary {
    pub address: String,
    pub channels: usize,
    pub shutdown: ShutdownReport,
}

impl DisplayFallback for ServeSummary {
    fn display(&self) -> String {
        format!(
            "served {} channel(s) on {}; stopped {} session(s) ({} forced), output root removed: {}",
            self.channels,
            self.address,
            self.shutdown.stopped,
            self.shutdown.forced,
            self.shutdown.output_root_removed
        )
    }
}

pub fn supervisor_settings(config: &RelayConfig, args: &ServeArgs) -> SupervisorSettings {
    let mut settings = SupervisorSettings::from_config(config);
    if let Some(root) = &args.output_root {
        settings.output_root = root.clone();
    }
    settings
}

pub fn listen_address(config: &RelayConfig, args: &ServeArgs) -> (String, u16) {
    let bind = args
        .bind
        .clone()
        .unwrap_or_else(|| config.server.bind_address.clone());
    (bind, args.port.unwrap_or(config.server.port))
}

pub fn serve(config: &RelayConfig, args: &ServeArgs) -> Result<ServeSummary> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(serve_async(config, args))
}

async fn serve_async(config: &RelayConfig, args: &ServeArgs) -> Result<ServeSummary> {
    let registry = Arc::new(ChannelRegistry::open(config.channels_file())?);
    let channels = registry.len();
    let settings = supervisor_settings(config, args);
    info!(
        output_root = %settings.output_root.display(),
        channels,
        ffmpeg = %settings.ffmpeg.binary,
        "starting relay"
    );
    let supervisor = Arc::new(ProcessSupervisor::new(registry, settings, None));
    let state = AppState::new(supervisor, WatchSettings::from_section(&config.supervisor));
    let lifecycle = state.lifecycle.clone();

    let (bind, port) = listen_address(config, args);
    let listener = TcpListener::bind((bind.as_str(), port)).await?;
    let address = listener
        .local_addr()
        .map(|addr| addr.to_string())
        .unwrap_or_else(|_| format!("{bind}:{port}"));

    let served = http::serve(listener, state).await;
    // covers the error path too, where the signal never fired
    let shutdown = lifecycle.shutdown().await;
    served?;
    Ok(ServeSummary {
        address,
        channels,
        shutdown,
    })
}
