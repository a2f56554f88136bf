//! Tracing setup for the `offloading` binary.
//!
//! Every event this crate emits uses a target under [`LOG_TARGET_ROOT`], so the default filter
//! only has to name that root. `RUST_LOG` replaces the default filter when it parses.

use std::env;
use std::io::IsTerminal;
use std::sync::OnceLock;

use tracing_subscriber::{EnvFilter, fmt};

/// Common prefix of the crate's event targets (`offload.entries`, `offload.metadata`, ...).
pub const LOG_TARGET_ROOT: &str = "offload";

const FORMAT_ENV: &str = "OFFLOAD_LOG_FORMAT";
const LEVEL_ENV: &str = "OFFLOAD_LOG_LEVEL";

/// Output format for log events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Resolves to text.
    Auto,
    Text,
    Json,
}

impl LogFormat {
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "auto" => Some(Self::Auto),
            "text" | "plain" => Some(Self::Text),
            "json" => Some(Self::Json),
            _ => None,
        }
    }
}

/// Verbosity applied to the crate's targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "error" | "err" => Some(Self::Error),
            "warn" | "warning" => Some(Self::Warn),
            "info" => Some(Self::Info),
            "debug" => Some(Self::Debug),
            "trace" | "verbose" => Some(Self::Trace),
            _ => None,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

/// Resolved log configuration handed to [`init_logging`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogOptions {
    pub format: LogFormat,
    pub level: LogLevel,
}

impl LogOptions {
    pub const DEFAULT: Self = Self {
        format: LogFormat::Auto,
        level: LogLevel::Warn,
    };

    /// `EnvFilter` directive enabling the crate's targets at `level` and nothing else.
    #[must_use]
    pub fn filter_directive(&self) -> String {
        format!("{LOG_TARGET_ROOT}={}", self.level.as_str())
    }

    fn with_env(self, format: Option<&str>, level: Option<&str>) -> Self {
        Self {
            format: format.and_then(LogFormat::parse).unwrap_or(self.format),
            level: level.and_then(LogLevel::parse).unwrap_or(self.level),
        }
    }
}

impl Default for LogOptions {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Log flags gathered from the command line; unset flags fall back to the environment.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LogSettings {
    pub format: Option<LogFormat>,
    pub level: Option<LogLevel>,
}

impl LogSettings {
    /// Layer these flags over `OFFLOAD_LOG_FORMAT`/`OFFLOAD_LOG_LEVEL` and the defaults.
    #[must_use]
    pub fn merged_with_env(self) -> LogOptions {
        let format = env::var(FORMAT_ENV).ok();
        let level = env::var(LEVEL_ENV).ok();
        self.merged_over(LogOptions::DEFAULT.with_env(format.as_deref(), level.as_deref()))
    }

    fn merged_over(self, base: LogOptions) -> LogOptions {
        LogOptions {
            format: self.format.unwrap_or(base.format),
            level: self.level.unwrap_or(base.level),
        }
    }
}

/// Install the process-wide subscriber on stderr. Later calls are no-ops.
pub fn init_logging(options: &LogOptions) {
    static INITIALISED: OnceLock<()> = OnceLock::new();

    let _ = INITIALISED.get_or_init(|| {
        let use_ansi = env::var_os("NO_COLOR").is_none() && std::io::stderr().is_terminal();
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(options.filter_directive()));
        let builder = fmt::fmt()
            .with_env_filter(filter)
            .with_ansi(use_ansi)
            .with_writer(std::io::stderr)
            .with_target(true);

        // Fails only when the embedding program already installed a subscriber.
        let _ = match options.format {
            LogFormat::Json => tracing::subscriber::set_global_default(builder.json().finish()),
            LogFormat::Auto | LogFormat::Text => {
                tracing::subscriber::set_global_default(builder.compact().finish())
            }
        };
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_and_levels_parse_case_insensitively() {
        assert_eq!(LogFormat::parse("plain"), Some(LogFormat::Text));
        assert_eq!(LogFormat::parse("JSON"), Some(LogFormat::Json));
        assert_eq!(LogFormat::parse("yaml"), None);

        assert_eq!(LogLevel::parse("warning"), Some(LogLevel::Warn));
        assert_eq!(LogLevel::parse("INFO"), Some(LogLevel::Info));
        assert_eq!(LogLevel::parse("verbose"), Some(LogLevel::Trace));
        assert_eq!(LogLevel::parse("loud"), None);
    }

    #[test]
    fn environment_values_apply_only_when_valid() {
        let options = LogOptions::DEFAULT.with_env(Some("json"), Some("debug"));
        assert_eq!(options.format, LogFormat::Json);
        assert_eq!(options.level, LogLevel::Debug);

        let untouched = LogOptions::DEFAULT.with_env(Some("yaml"), Some("loud"));
        assert_eq!(untouched, LogOptions::DEFAULT);
    }

    #[test]
    fn command_line_flags_win_over_environment() {
        let env = LogOptions::DEFAULT.with_env(Some("text"), Some("info"));
        let merged = LogSettings {
            format: Some(LogFormat::Json),
            level: None,
        }
        .merged_over(env);

        assert_eq!(merged.format, LogFormat::Json);
        assert_eq!(merged.level, LogLevel::Info);
    }

    #[test]
    fn default_filter_names_the_crate_root_target() {
        let options = LogOptions {
            level: LogLevel::Debug,
            ..LogOptions::DEFAULT
        };
        assert_eq!(options.filter_directive(), "offload=debug");
        assert_eq!(LogOptions::DEFAULT.filter_directive(), "offload=warn");
    }
}
