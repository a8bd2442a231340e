use std::str::FromStr;
use std::sync::{Mutex, Once};

use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::fmt::Layer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::Registry;

use crate::utils::config::LoggingConfig;

const LOG_LEVEL_ENV: &str = "POI_LOG_LEVEL";

/// Install the global subscriber; keep the returned guards alive for the process lifetime
pub fn init_logging(config: &LoggingConfig) -> Vec<WorkerGuard> {
    let mut guards = vec![];

    let log_level = std::env::var(LOG_LEVEL_ENV).unwrap_or_else(|_| config.level.clone());
    let log_level = Level::from_str(log_level.as_str()).unwrap_or(Level::INFO);

    let (stderr_write, stderr_guard) = tracing_appender::non_blocking(std::io::stderr());
    let stderr_layer = Layer::new()
        .with_writer(stderr_write.with_max_level(log_level))
        .with_target(false);
    guards.push(stderr_guard);

    let file_layer = config.log_file.as_ref().map(|path| {
        let path = std::path::Path::new(path);
        let directory = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or(std::path::Path::new("."));
        let file_name = path.file_name().map(|f| f.to_os_string()).unwrap_or_else(|| "poi-engine.log".into());
        let (file_write, file_guard) = tracing_appender::non_blocking(tracing_appender::rolling::never(directory, file_name));
        guards.push(file_guard);
        Layer::new()
            .with_writer(file_write.with_max_level(log_level))
            .with_ansi(false)
            .with_file(true)
            .with_line_number(true)
            .with_thread_ids(true)
    });

    let subscriber = Registry::default().with(stderr_layer).with(file_layer);
    // A subscriber may already be installed by the host
    let _ = tracing::subscriber::set_global_default(subscriber);

    guards
}

static TEST_LOG_GUARDS: Mutex<Option<Vec<WorkerGuard>>> = Mutex::new(None);

/// Install logging once for a test binary
pub fn init_test_logging() {
    static START: Once = Once::new();

    START.call_once(|| {
        let guards = init_logging(&LoggingConfig::default());
        if let Ok(mut slot) = TEST_LOG_GUARDS.lock() {
            *slot = Some(guards);
        }
    });
}
