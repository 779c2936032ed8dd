use std::env;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::EnvFilter;

use crate::config::{DEFAULT_LOG_FILTER, LOG_DIR_ENV, LOG_ENV, LOG_FORMAT_ENV};

const LOG_FILE_PREFIX: &str = "claims.log";

/// Installs the global subscriber.
///
/// Output goes to stderr unless `CLAIMS_LOG_DIR` is set, in which case a
/// daily rolling file under that directory is used instead. The returned
/// guard flushes the file writer on drop and must outlive all logging.
pub fn init_logging() -> Option<WorkerGuard> {
    let _ = tracing_log::LogTracer::init();

    let filter = EnvFilter::try_from_env(LOG_ENV)
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let json = env::var(LOG_FORMAT_ENV)
        .map(|v| v.trim().eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let (writer, guard) = match env::var_os(LOG_DIR_ENV).filter(|dir| !dir.is_empty()) {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (non_blocking, guard) = tracing_appender::non_blocking(appender);
            (BoxMakeWriter::new(non_blocking), Some(guard))
        }
        None => (BoxMakeWriter::new(std::io::stderr), None),
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_target(true)
        .with_timer(UtcTime::rfc_3339());
    let _ = if json {
        builder.json().try_init()
    } else {
        builder.with_ansi(false).try_init()
    };

    guard
}
