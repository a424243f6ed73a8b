use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::modules::paths::get_data_dir;

const LOG_FILE_PREFIX: &str = "proxy.log";

// RFC3339 timestamps in local time
struct LocalTimer;

impl fmt::time::FormatTime for LocalTimer {
    fn format_time(&self, w: &mut fmt::format::Writer<'_>) -> std::fmt::Result {
        write!(w, "{}", chrono::Local::now().to_rfc3339())
    }
}

/// Initialize logging to the console and to `<data dir>/logs/proxy.log.<date>`.
///
/// `RUST_LOG` overrides the default `info` filter. The returned guard
/// flushes the file writer on drop and must live as long as the process;
/// `None` means the log directory was unusable and only the console is
/// written.
pub fn init_logger() -> Option<WorkerGuard> {
    let _ = tracing_log::LogTracer::init();

    let (file_layer, guard) = match get_data_dir().and_then(|dir| {
        let logs = dir.join("logs");
        std::fs::create_dir_all(&logs)
            .map(|_| logs)
            .map_err(|e| format!("Failed to create log directory: {}", e))
    }) {
        Ok(dir) => {
            let (writer, guard) =
                tracing_appender::non_blocking(tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX));
            let layer = fmt::Layer::new()
                .with_writer(writer)
                .with_ansi(false)
                .with_timer(LocalTimer);
            (Some(layer), Some(guard))
        }
        Err(e) => {
            eprintln!("File logging disabled: {}", e);
            (None, None)
        }
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::Layer::new().with_target(false).with_timer(LocalTimer))
        .with(file_layer)
        .try_init();

    guard
}
