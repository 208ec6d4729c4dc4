//! Tracing setup: colored console output plus daily-rotated log files

use tracing::warn;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{Builder as RollingBuilder, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::LogConfig;

const LOG_FILE_PREFIX: &str = "rawsend";
const MAX_LOG_FILES: usize = 3;

/// Keeps the file writer alive; drop it last so buffered lines reach disk
pub struct LogGuard {
    _file: Option<WorkerGuard>,
}

/// Install the global subscriber. `RUST_LOG` overrides the configured level.
pub fn init(config: &LogConfig) -> LogGuard {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(&config.level)));

    let json = config.format.eq_ignore_ascii_case("json");
    let pretty_layer = (!json).then(|| fmt::layer().with_target(false));
    let json_layer = json.then(|| fmt::layer().json());

    let (file_layer, guard, file_error) = match file_writer(config) {
        Ok((writer, guard)) => (
            Some(fmt::layer().with_ansi(false).with_writer(writer)),
            Some(guard),
            None,
        ),
        Err(e) => (None, None, Some(e)),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(pretty_layer)
        .with(json_layer)
        .with(file_layer)
        .init();

    if let Some(e) = file_error {
        warn!(
            "File logging disabled ({}): {}",
            config.dir.display(),
            e
        );
    }

    LogGuard { _file: guard }
}

fn file_writer(
    config: &LogConfig,
) -> Result<(tracing_appender::non_blocking::NonBlocking, WorkerGuard), String> {
    std::fs::create_dir_all(&config.dir).map_err(|e| e.to_string())?;

    let appender = RollingBuilder::new()
        .rotation(Rotation::DAILY)
        .filename_prefix(LOG_FILE_PREFIX)
        .filename_suffix("log")
        .max_log_files(MAX_LOG_FILES)
        .build(&config.dir)
        .map_err(|e| e.to_string())?;

    Ok(tracing_appender::non_blocking(appender))
}

/// Our crate at the configured level, dependencies at warn
fn default_directive(level: &str) -> String {
    let level = match level.trim().to_ascii_lowercase().as_str() {
        l @ ("trace" | "debug" | "info" | "warn" | "error" | "off") => l.to_string(),
        _ => "info".to_string(),
    };
    format!("warn,rawsend={}", level)
}
