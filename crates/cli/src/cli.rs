//! CLI argument definitions using clap.

use clap::{Parser, Subcommand, ValueEnum};
use contracts::{PolicyFlag, TransportKind};
use std::path::PathBuf;

/// tracksync - correlate tracking frames, stereo images and planar surfaces
#[derive(Parser, Debug)]
#[command(
    name = "tracksync",
    author,
    version,
    about = "Tracking service connection and frame correlation",
    long_about = "Connects to a tracking service transport, correlates tracking data, \n\
                  stereo images and planar surfaces into ordered frames, and \n\
                  dispatches connection notifications to configured sinks."
)]
pub struct Cli {
    /// Increase logging verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true, env = "TRACKSYNC_VERBOSE")]
    pub verbose: u8,

    /// Suppress all output except warnings and errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Log output format
    #[arg(
        long,
        value_enum,
        default_value = "pretty",
        global = true,
        env = "TRACKSYNC_LOG_FORMAT"
    )]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Default filter level derived from `-v` / `-q`
    pub fn log_level(&self) -> &'static str {
        if self.quiet {
            return "warn";
        }
        match self.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    }
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a connection and print statistics at the end
    Run(RunArgs),

    /// Validate configuration file without running
    Validate(ValidateArgs),

    /// Display configuration information
    Info(InfoArgs),
}

/// Arguments for the `run` command
#[derive(Parser, Debug, Clone)]
pub struct RunArgs {
    /// Path to configuration file (TOML or JSON)
    #[arg(
        short,
        long,
        default_value = "tracksync.toml",
        env = "TRACKSYNC_CONFIG"
    )]
    pub config: PathBuf,

    /// Override the transport kind from configuration
    #[arg(long, value_enum, env = "TRACKSYNC_TRANSPORT")]
    pub transport: Option<TransportArg>,

    /// Capture file to replay (implies `--transport replay`)
    #[arg(long, env = "TRACKSYNC_REPLAY")]
    pub replay: Option<PathBuf>,

    /// Replay speed multiplier
    #[arg(long, env = "TRACKSYNC_REPLAY_SPEED")]
    pub replay_speed: Option<f64>,

    /// Restart the capture when it ends
    #[arg(long)]
    pub replay_loop: bool,

    /// Request an additional policy (repeatable)
    #[arg(long = "policy", value_enum)]
    pub policies: Vec<PolicyArg>,

    /// Stop after this many released frames (0 = unlimited)
    #[arg(long, default_value = "0", env = "TRACKSYNC_MAX_FRAMES")]
    pub max_frames: u64,

    /// Run timeout in seconds (0 = no timeout)
    #[arg(long, default_value = "0", env = "TRACKSYNC_TIMEOUT")]
    pub timeout: u64,

    /// Validate configuration and exit without connecting
    #[arg(long)]
    pub dry_run: bool,

    /// Notification channel capacity between the poll thread and sinks
    #[arg(long, default_value = "1024", env = "TRACKSYNC_BUFFER_SIZE")]
    pub buffer_size: usize,

    /// Metrics server port (0 = disabled)
    #[arg(long, default_value = "9000", env = "TRACKSYNC_METRICS_PORT")]
    pub metrics_port: u16,
}

/// Arguments for the `validate` command
#[derive(Parser, Debug)]
pub struct ValidateArgs {
    /// Path to configuration file to validate
    #[arg(short, long, default_value = "tracksync.toml")]
    pub config: PathBuf,

    /// Output validation result as JSON
    #[arg(long)]
    pub json: bool,
}

/// Arguments for the `info` command
#[derive(Parser, Debug)]
pub struct InfoArgs {
    /// Path to configuration file
    #[arg(short, long, default_value = "tracksync.toml")]
    pub config: PathBuf,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,

    /// Show connection buffer settings
    #[arg(long)]
    pub buffers: bool,

    /// Show sink configuration
    #[arg(long)]
    pub sinks: bool,
}

/// Log output format
#[derive(ValueEnum, Clone, Copy, Debug, Default)]
pub enum LogFormat {
    /// JSON structured logging
    Json,
    /// Human-readable pretty format
    #[default]
    Pretty,
    /// Compact single-line format
    Compact,
}

impl From<LogFormat> for observability::LogFormat {
    fn from(format: LogFormat) -> Self {
        match format {
            LogFormat::Json => Self::Json,
            LogFormat::Pretty => Self::Pretty,
            LogFormat::Compact => Self::Compact,
        }
    }
}

/// Transport selectable on the command line
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransportArg {
    Mock,
    Replay,
}

impl From<TransportArg> for TransportKind {
    fn from(arg: TransportArg) -> Self {
        match arg {
            TransportArg::Mock => Self::Mock,
            TransportArg::Replay => Self::Replay,
        }
    }
}

/// Policy selectable on the command line
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum PolicyArg {
    BackgroundFrames,
    Images,
    OptimizeHmd,
    AllowPauseResume,
    RawImages,
    TrackedQuads,
}

impl From<PolicyArg> for PolicyFlag {
    fn from(arg: PolicyArg) -> Self {
        match arg {
            PolicyArg::BackgroundFrames => Self::BackgroundFrames,
            PolicyArg::Images => Self::Images,
            PolicyArg::OptimizeHmd => Self::OptimizeHmd,
            PolicyArg::AllowPauseResume => Self::AllowPauseResume,
            PolicyArg::RawImages => Self::RawImages,
            PolicyArg::TrackedQuads => Self::TrackedQuads,
        }
    }
}
