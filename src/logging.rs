use crate::config::LoggingConfig;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Install the global subscriber. Keep the returned guard alive until exit.
pub fn init_logging(config: &LoggingConfig) -> WorkerGuard {
    let (non_blocking, guard) = tracing_appender::non_blocking(std::io::stdout());

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter_directive(&config.level)));

    let registry = tracing_subscriber::registry().with(filter);

    if is_json(&config.encoding) {
        let layer = fmt::layer()
            .json()
            .with_target(true) // Keep target in JSON for structured queries
            .with_current_span(true)
            .with_writer(non_blocking)
            .with_ansi(false);
        registry.with(layer).init();
    } else {
        let layer = fmt::layer()
            .with_target(false)
            .with_writer(non_blocking)
            .with_ansi(true);
        registry.with(layer).init();
    }

    guard
}

fn is_json(encoding: &str) -> bool {
    encoding.eq_ignore_ascii_case("json")
}

/// Unknown levels fall back to `info` so a typo never silences the service.
fn filter_directive(level: &str) -> String {
    match level.to_ascii_lowercase().as_str() {
        l @ ("trace" | "debug" | "info" | "warn" | "error" | "off") => {
            format!("{l},sqlx=warn,hyper=warn")
        }
        _ => "info,sqlx=warn,hyper=warn".to_string(),
    }
}
