use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::time::ChronoLocal;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

use crate::config::Config;

const DEFAULT_FILTER: &str = "info,serenity=error,songbird=error";
const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Logs to stdout and to a file rotated daily in `config.log_dir`.
///
/// The returned guard flushes the file writer and must live until exit.
pub fn install_tracing(config: &Config) -> WorkerGuard {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let appender = tracing_appender::rolling::daily(&config.log_dir, &config.log_file);
    let (writer, guard) = tracing_appender::non_blocking(appender);

    let console = fmt::layer()
        .with_timer(ChronoLocal::new(TIME_FORMAT.to_string()))
        .with_target(true);
    let file = fmt::layer()
        .with_timer(ChronoLocal::new(TIME_FORMAT.to_string()))
        .with_ansi(false)
        .with_line_number(true)
        .with_writer(writer);

    tracing_subscriber::registry()
        .with(filter)
        .with(console)
        .with(file)
        .init();

    guard
}
