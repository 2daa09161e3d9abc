use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser};

use crate::config::Timings;
use crate::telemetry::logging::{LogConfig, LogLevel};

#[derive(Parser, Debug)]
#[command(
    name = "marquee",
    about = "Live preview sessions for sandbox-built web projects",
    version
)]
pub struct Cli {
    /// Project directory to load and watch for preview.
    #[arg(value_name = "PROJECT_DIR", default_value = ".")]
    pub project_dir: PathBuf,

    #[arg(
        long,
        env = "MARQUEE_SANDBOX_URL",
        default_value = "http://127.0.0.1:8700",
        help = "Base URL of the sandbox runtime service"
    )]
    pub sandbox_url: String,

    #[arg(
        long,
        env = "MARQUEE_SANDBOX_TOKEN",
        hide_env_values = true,
        help = "Bearer token for the sandbox service"
    )]
    pub sandbox_token: Option<String>,

    #[arg(
        long,
        env = "MARQUEE_PROJECT_ID",
        help = "Stable project identifier (defaults to a random id per run)"
    )]
    pub project_id: Option<String>,

    #[arg(long, help = "Skip the remote runtime tier and preview locally")]
    pub no_runtime: bool,

    #[arg(
        long,
        value_name = "PATH",
        help = "Write rendered preview documents to this file"
    )]
    pub out: Option<PathBuf>,

    #[arg(long, help = "Emit machine-readable JSON events instead of text")]
    pub json: bool,

    #[command(flatten)]
    pub logging: LoggingArgs,

    #[command(flatten)]
    pub tuning: TuningArgs,
}

#[derive(Args, Debug, Clone)]
pub struct LoggingArgs {
    #[arg(
        long = "log-level",
        value_enum,
        env = "MARQUEE_LOG_LEVEL",
        default_value_t = LogLevel::Warn,
        help = "Logging verbosity"
    )]
    pub log_level: LogLevel,

    #[arg(
        long = "log-file",
        value_name = "PATH",
        env = "MARQUEE_LOG_FILE",
        help = "Append logs to this file instead of stderr"
    )]
    pub log_file: Option<PathBuf>,
}

impl LoggingArgs {
    pub fn to_config(&self) -> LogConfig {
        LogConfig {
            level: self.log_level,
            file: self.log_file.clone(),
        }
    }
}

/// Interval overrides. Anything left unset keeps the built-in default.
#[derive(Args, Debug, Clone, Default)]
pub struct TuningArgs {
    #[arg(
        long = "debounce-ms",
        env = "MARQUEE_DEBOUNCE_MS",
        value_name = "MS",
        help = "Quiet window for coalescing edits before patching"
    )]
    pub debounce_ms: Option<u64>,

    #[arg(
        long = "keepalive-secs",
        env = "MARQUEE_KEEPALIVE_SECS",
        value_name = "SECS",
        help = "Interval between keepalive pings"
    )]
    pub keepalive_secs: Option<u64>,

    #[arg(
        long = "log-poll-secs",
        env = "MARQUEE_LOG_POLL_SECS",
        value_name = "SECS",
        help = "Interval between remote log fetches"
    )]
    pub log_poll_secs: Option<u64>,

    #[arg(
        long = "runtime-timeout-secs",
        env = "MARQUEE_RUNTIME_TIMEOUT_SECS",
        value_name = "SECS",
        help = "How long the runtime tier may take to produce a preview URL"
    )]
    pub runtime_timeout_secs: Option<u64>,

    #[arg(
        long = "bundler-timeout-secs",
        env = "MARQUEE_BUNDLER_TIMEOUT_SECS",
        value_name = "SECS",
        help = "How long the local bundler may run per render"
    )]
    pub bundler_timeout_secs: Option<u64>,

    #[arg(
        long = "cooldown-secs",
        env = "MARQUEE_COOLDOWN_SECS",
        value_name = "SECS",
        help = "Wait after a downgrade before probing better tiers"
    )]
    pub cooldown_secs: Option<u64>,

    #[arg(
        long = "start-retry-ms",
        env = "MARQUEE_START_RETRY_MS",
        value_name = "MS",
        help = "Backoff before the single session-start retry"
    )]
    pub start_retry_ms: Option<u64>,
}

impl TuningArgs {
    pub fn to_timings(&self) -> Timings {
        let mut timings = Timings::default();
        if let Some(ms) = self.debounce_ms {
            timings.debounce = Duration::from_millis(ms);
        }
        if let Some(secs) = self.keepalive_secs {
            timings.keepalive_interval = Duration::from_secs(secs);
        }
        if let Some(secs) = self.log_poll_secs {
            timings.log_poll_interval = Duration::from_secs(secs);
        }
        if let Some(secs) = self.runtime_timeout_secs {
            timings.runtime_start_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = self.bundler_timeout_secs {
            timings.bundler_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = self.cooldown_secs {
            timings.repromote_cooldown = Duration::from_secs(secs);
        }
        if let Some(ms) = self.start_retry_ms {
            timings.start_retry_backoff = Duration::from_millis(ms);
        }
        timings
    }
}
