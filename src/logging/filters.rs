use tracing_subscriber::EnvFilter;

use crate::logging::config::LoggingConfig;

/// Уровень, если ни `RUST_LOG`, ни конфигурация не дают рабочий фильтр.
const FALLBACK: &str = "info";

/// Фильтр событий. Порядок источников: `RUST_LOG`, директива из
/// конфигурации, [`FALLBACK`].
pub(crate) fn env_filter(config: &LoggingConfig) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(config.build_filter_directive()))
        .unwrap_or_else(|err| {
            eprintln!("gaugebus: unusable log filter ({err}), using {FALLBACK}");
            EnvFilter::new(FALLBACK)
        })
}
