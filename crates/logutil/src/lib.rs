//! Utilities for logging.

use tracing::Level;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::fmt::MakeWriter;

/// Environment variable used to override the filter directives.
pub const LOG_FILTER_ENV: &str = "RUST_LOG";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    HumanReadable,
    Compact,
    Json,
}

/// Map a `-v` count to a level.
pub fn verbosity_to_level(verbosity: u8) -> Level {
    match verbosity {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    }
}

/// Install the global subscriber.
///
/// `RUST_LOG` takes precedence over `level` when set. Worker processes must
/// pass a stderr writer since their stdout carries the group channel.
///
/// Does nothing if a global subscriber is already installed.
pub fn configure_global_logger<W>(level: Level, format: LogFormat, writer: W)
where
    W: for<'a> MakeWriter<'a> + Send + Sync + 'static,
{
    let env_filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::from_level(level).into())
        .with_env_var(LOG_FILTER_ENV)
        .from_env_lossy();

    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(writer)
        .with_thread_names(true);

    let _ = match format {
        LogFormat::HumanReadable => builder.with_file(true).with_line_number(true).try_init(),
        LogFormat::Compact => builder.compact().try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
}

/// Logging for unit tests, captured by the test harness.
pub fn init_test() {
    let env_filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::DEBUG.into())
        .from_env_lossy();

    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter(env_filter)
        .with_file(true)
        .with_line_number(true)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verbosity_levels() {
        assert_eq!(Level::WARN, verbosity_to_level(0));
        assert_eq!(Level::INFO, verbosity_to_level(1));
        assert_eq!(Level::DEBUG, verbosity_to_level(2));
        assert_eq!(Level::TRACE, verbosity_to_level(9));
    }

    #[test]
    fn init_twice_is_fine() {
        init_test();
        init_test();
    }
}
