//! Структурированное логирование через `tracing`.
//!
//! Шина только пишет события. Подписчик ставит приложение, например через
//! [`init_logging`]; цели событий совпадают с путями модулей
//! (`gaugebus::bus`, `gaugebus::pubsub::dispatch`, ...), по ним удобно
//! фильтровать.

pub mod config;
mod filters;
pub mod handle;
pub mod sinks;

pub use config::{ConsoleConfig, FileConfig, LogFormat, LoggingConfig, LoggingError};
pub use handle::{LoggingHandle, LoggingStats};
use sinks::BoxedLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Ставит глобальный подписчик: фильтр, консоль и (если включён) файл.
///
/// Переменные `GAUGEBUS_LOG_*` применяются поверх `config`. Второй вызов в
/// процессе возвращает [`LoggingError::Init`].
pub fn init_logging(mut config: LoggingConfig) -> Result<LoggingHandle, LoggingError> {
    config.apply_env_overrides();
    config.validate()?;

    let console = config.console.enabled.then(|| sinks::console::layer(&config));
    let (file, file_guard) = if config.file.enabled {
        let (layer, guard) = sinks::file::layer(&config)?;
        (Some(layer), Some(guard))
    } else {
        (None, None)
    };
    let layers: Vec<BoxedLayer> = console.into_iter().chain(file).collect();

    tracing_subscriber::registry()
        .with(layers)
        .with(filters::env_filter(&config))
        .try_init()
        .map_err(|e| LoggingError::Init(e.to_string()))?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        level = %config.level,
        format = ?config.format,
        console = config.console.enabled,
        file_dir = ?config.file.enabled.then_some(&config.file.dir),
        "gaugebus logging ready"
    );

    Ok(LoggingHandle::new(file_guard))
}
