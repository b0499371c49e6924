pub mod commands;

use std::path::PathBuf;

use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::Shell;
use serde::Serialize;
use thiserror::Error;
use tracing_subscriber::EnvFilter;

use chanrelay_core::config::{load_relay_config, RelayConfig};

use crate::commands::{check, channels, serve, ChannelsCommands, ServeArgs};

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("config error: {0}")]
    Config(#[from] chanrelay_core::ConfigError),
    #[error("channel error: {0}")]
    Channel(#[from] chanrelay_core::ChannelError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("{0}")]
    CheckFailed(String),
}

#[derive(Parser, Debug)]
#[command(author, version, about = "On-demand HLS relay for upstream live channels", long_about = None)]
pub struct Cli {
    /// Path to chanrelay.toml
    #[arg(long, default_value = "configs/chanrelay.toml")]
    pub config: PathBuf,
    /// Alternate channels file (overrides paths.channels_file)
    #[arg(long)]
    pub channels_file: Option<PathBuf>,
    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the HTTP relay
    Serve(ServeArgs),
    /// Manage the channels file
    #[command(subcommand)]
    Channels(ChannelsCommands),
    /// Validate configuration, channels and the ffmpeg binary
    Check,
    /// Print shell completions
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

/// `RUST_LOG` wins; otherwise info for everything.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}

pub fn run(cli: Cli) -> Result<()> {
    if let Commands::Completions { shell } = &cli.command {
        let mut command = Cli::command();
        let bin_name = command.get_name().to_string();
        clap_complete::generate(*shell, &mut command, bin_name, &mut std::io::stdout());
        return Ok(());
    }

    let context = AppContext::new(&cli)?;
    match &cli.command {
        Commands::Serve(args) => {
            let summary = serve::serve(&context.config, args)?;
            render(&summary, cli.format)?;
        }
        Commands::Channels(ChannelsCommands::List) => {
            let list = channels::list(&context.channels_file)?;
            render(&list, cli.format)?;
        }
        Commands::Channels(ChannelsCommands::Add(args)) => {
            let change = channels::add(&context.channels_file, args)?;
            render(&change, cli.format)?;
        }
        Commands::Channels(ChannelsCommands::Remove { id }) => {
            let change = channels::remove(&context.channels_file, id)?;
            render(&change, cli.format)?;
        }
        Commands::Check => {
            let report = check::run_checks(&context.config_path, &context.config);
            render(&report, cli.format)?;
            if check::has_errors(&report) {
                return Err(AppError::CheckFailed(
                    "one or more checks failed".to_string(),
                ));
            }
        }
        Commands::Completions { .. } => {}
    }

    Ok(())
}

fn render<T>(value: &T, format: OutputFormat) -> Result<()>
where
    T: Serialize + DisplayFallback,
{
    match format {
        OutputFormat::Text => {
            println!("{}", value.display());
            Ok(())
        }
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(value)?;
            println!("{}", json);
            Ok(())
        }
    }
}

pub(crate) trait DisplayFallback {
    fn display(&self) -> String;
}

#[derive(Debug)]
struct AppContext {
    config: RelayConfig,
    config_path: PathBuf,
    channels_file: PathBuf,
}

impl AppContext {
    fn new(cli: &Cli) -> Result<Self> {
        let config_path = cli.config.clone();
        let mut config = load_relay_config(&config_path)?;
        if let Some(path) = &cli.channels_file {
            config.paths.channels_file = path.to_string_lossy().to_string();
        }
        let channels_file = config.channels_file();
        Ok(Self {
            config,
            config_path,
            channels_file,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::Path;

    use super::*;
    use crate::commands::ChannelAddArgs;
    use chanrelay_core::channel::ProcessingProfile;
    use tempfile::TempDir;

    fn fixture(name: &str) -> PathBuf {
        Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("../configs")
            .join(name)
    }

    fn prepare_test_context(command: Commands) -> (TempDir, Cli, AppContext) {
        let temp = TempDir::new().unwrap();
        let configs_dir = temp.path().join("configs");
        fs::create_dir_all(&configs_dir).unwrap();
        fs::copy(fixture("chanrelay.toml"), configs_dir.join("chanrelay.toml")).unwrap();
        fs::copy(fixture("channels.toml"), configs_dir.join("channels.toml")).unwrap();

        let cli = Cli {
            config: configs_dir.join("chanrelay.toml"),
            channels_file: None,
            format: OutputFormat::Json,
            command,
        };
        let context = AppContext::new(&cli).unwrap();
        (temp, cli, context)
    }

    #[test]
    fn channels_file_resolves_next_to_config() {
        let (temp, _cli, context) = prepare_test_context(Commands::Check);
        assert_eq!(
            context.channels_file,
            temp.path().join("configs").join("channels.toml")
        );
        let list = channels::list(&context.channels_file).unwrap();
        let ids: Vec<_> = list.channels.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["btvld", "vtv3"]);
        assert!(matches!(
            list.channels[1].profile,
            ProcessingProfile::Transcode(_)
        ));
    }

    #[test]
    fn add_and_remove_rewrite_the_channels_file() {
        let (_temp, _cli, context) = prepare_test_context(Commands::Check);
        let args = ChannelAddArgs {
            id: "news".into(),
            source_url: "https://example.com/news/playlist.m3u8".into(),
            transcode: true,
            resolution: Some("1280x720".into()),
            watermark: None,
            logo: None,
            video_codec: None,
            preset: Some("fast".into()),
        };
        let change = channels::add(&context.channels_file, &args).unwrap();
        assert_eq!(change.action, "added");

        let list = channels::list(&context.channels_file).unwrap();
        let added = list
            .channels
            .iter()
            .find(|channel| channel.id == "news")
            .unwrap();
        match &added.profile {
            ProcessingProfile::Transcode(params) => {
                assert_eq!(params.preset, "fast");
                assert_eq!(params.video_codec, "libx264");
                assert_eq!(params.resolution.as_deref(), Some("1280x720"));
            }
            other => panic!("unexpected profile {other}"),
        }

        assert!(matches!(
            channels::add(&context.channels_file, &args),
            Err(AppError::Channel(_))
        ));
        channels::remove(&context.channels_file, "news").unwrap();
        assert!(channels::remove(&context.channels_file, "news").is_err());
    }

    #[test]
    fn check_flags_missing_ffmpeg() {
        let (_temp, _cli, mut context) = prepare_test_context(Commands::Check);
        context.config.ffmpeg.binary = "chanrelay-no-such-binary".into();
        let report = check::run_checks(&context.config_path, &context.config);
        let channels = report.iter().find(|entry| entry.name == "channels").unwrap();
        assert_eq!(channels.status, check::CheckStatus::Ok);
        assert!(check::has_errors(&report));
    }

    #[test]
    fn serve_overrides_take_precedence() {
        let (_temp, _cli, context) = prepare_test_context(Commands::Check);
        let args = ServeArgs {
            bind: Some("127.0.0.1".into()),
            port: Some(9100),
            output_root: Some(PathBuf::from("/tmp/chanrelay-test")),
        };
        assert_eq!(
            serve::listen_address(&context.config, &args),
            ("127.0.0.1".to_string(), 9100)
        );
        assert_eq!(
            serve::supervisor_settings(&context.config, &args).output_root,
            PathBuf::from("/tmp/chanrelay-test")
        );
        assert_eq!(
            serve::listen_address(&context.config, &ServeArgs::default()),
            ("0.0.0.0".to_string(), 8000)
        );
    }

    #[test]
    fn cli_parses_nested_commands() {
        let cli = Cli::try_parse_from([
            "chanrelayctl",
            "--format",
            "json",
            "channels",
            "add",
            "vtv3",
            "https://example.com/vtv3.m3u8",
            "--transcode",
            "--resolution",
            "854x480",
        ])
        .unwrap();
        assert!(matches!(
            cli.command,
            Commands::Channels(ChannelsCommands::Add(ref args)) if args.transcode
        ));
        assert!(Cli::try_parse_from([
            "chanrelayctl",
            "channels",
            "add",
            "vtv3",
            "https://example.com/vtv3.m3u8",
            "--resolution",
            "854x480",
        ])
        .is_err());
    }
}
