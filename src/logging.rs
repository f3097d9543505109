//! Tracing setup.
//!
//! Every event goes to stdout in compact form. A second, plain-text layer mirrors events to
//! disk according to `DOCPIPE_LOG_FILE`:
//!
//! - unset: a daily-rotated file under `logs/` (`logs/docpipe.log.YYYY-MM-DD`)
//! - `off` / `none`: no file layer
//! - anything else: append to that path
//!
//! `RUST_LOG` controls filtering and defaults to `info`.
use std::path::PathBuf;
use std::sync::OnceLock;

use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

static LOG_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

const LOG_FILE_ENV: &str = "DOCPIPE_LOG_FILE";
const ROTATING_DIR: &str = "logs";
const ROTATING_PREFIX: &str = "docpipe.log";

/// Where file logs are written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogFileTarget {
    /// Only stdout.
    Disabled,
    /// Append to a single file.
    Append(PathBuf),
    /// Rotate daily inside a directory.
    Daily {
        /// Directory holding the rotated files.
        directory: PathBuf,
        /// File name prefix; the date is appended.
        prefix: String,
    },
}

impl LogFileTarget {
    /// Interpret the value of `DOCPIPE_LOG_FILE`.
    pub fn from_setting(value: Option<&str>) -> Self {
        match value.map(str::trim) {
            None | Some("") => Self::Daily {
                directory: PathBuf::from(ROTATING_DIR),
                prefix: ROTATING_PREFIX.into(),
            },
            Some(setting) if matches!(setting.to_ascii_lowercase().as_str(), "off" | "none") => {
                Self::Disabled
            }
            Some(path) => Self::Append(PathBuf::from(path)),
        }
    }

    fn writer(&self) -> std::io::Result<Option<NonBlocking>> {
        let (writer, guard) = match self {
            Self::Disabled => return Ok(None),
            Self::Append(path) => {
                let file = std::fs::OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)?;
                tracing_appender::non_blocking(file)
            }
            Self::Daily { directory, prefix } => {
                std::fs::create_dir_all(directory)?;
                tracing_appender::non_blocking(tracing_appender::rolling::daily(
                    directory, prefix,
                ))
            }
        };
        // Only the first subscriber install keeps its guard; later writers are never used.
        let _ = LOG_GUARD.set(guard);
        Ok(Some(writer))
    }
}

/// Install the global subscriber. Call once, after configuration is loaded.
pub fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let stdout_layer = fmt::layer().with_target(false).compact();

    let target = LogFileTarget::from_setting(std::env::var(LOG_FILE_ENV).ok().as_deref());
    let file_layer = match target.writer() {
        Ok(writer) => writer.map(|writer| {
            fmt::layer()
                .with_writer(writer)
                .with_target(true)
                .with_ansi(false)
                .compact()
        }),
        Err(err) => {
            // The subscriber is not installed yet, so this is the only way to surface it.
            eprintln!("File logging disabled ({target:?}): {err}");
            None
        }
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(stdout_layer)
        .with(file_layer)
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unset_setting_rotates_daily_under_logs() {
        assert_eq!(
            LogFileTarget::from_setting(None),
            LogFileTarget::Daily {
                directory: PathBuf::from("logs"),
                prefix: "docpipe.log".into(),
            }
        );
        assert_eq!(
            LogFileTarget::from_setting(Some("  ")),
            LogFileTarget::from_setting(None)
        );
    }

    #[test]
    fn off_disables_file_logging() {
        assert_eq!(LogFileTarget::from_setting(Some("off")), LogFileTarget::Disabled);
        assert_eq!(LogFileTarget::from_setting(Some("NONE")), LogFileTarget::Disabled);
    }

    #[test]
    fn explicit_path_is_appended_to() {
        assert_eq!(
            LogFileTarget::from_setting(Some("/var/log/docpipe.log")),
            LogFileTarget::Append(PathBuf::from("/var/log/docpipe.log"))
        );
    }
}
