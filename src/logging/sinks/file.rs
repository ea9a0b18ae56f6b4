use tracing_appender::{non_blocking::WorkerGuard, rolling};

use super::{fmt_layer, BoxedLayer, Fields};
use crate::logging::config::{LoggingConfig, LoggingError};

/// Слой записи в `dir/prefix.YYYY-MM-DD` через фоновый поток.
///
/// Пока жив возвращённый [`WorkerGuard`], события доходят до диска; при его
/// удалении очередь сбрасывается.
pub fn layer(config: &LoggingConfig) -> Result<(BoxedLayer, WorkerGuard), LoggingError> {
    config.ensure_log_dir()?;
    let (writer, guard) =
        tracing_appender::non_blocking(rolling::daily(&config.file.dir, &config.file.prefix));

    // В файле всегда видно, какой поток писал: диспетчер или поток приложения.
    let fields = Fields {
        target: true,
        thread_names: true,
        line_numbers: false,
    };
    Ok((fmt_layer(config.file.format, fields, false, writer), guard))
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tracing_subscriber::{prelude::*, Registry};

    use super::*;
    use crate::logging::config::LogFormat;

    /// Тест проверяет, что каталог создаётся, а JSON-событие с топиком
    /// оказывается в файле после удаления guard.
    #[test]
    fn test_file_layer_writes_events() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = LoggingConfig::default();
        cfg.file.enabled = true;
        cfg.file.dir = dir.path().join("nested");
        cfg.file.prefix = "bus.log".into();
        cfg.file.format = LogFormat::Json;

        let (layer, guard) = layer(&cfg).unwrap();
        tracing::subscriber::with_default(Registry::default().with(layer), || {
            tracing::info!(topic = "u/js220/0001/s/i", "value retained");
        });
        drop(guard);

        let entries: Vec<_> = fs::read_dir(&cfg.file.dir)
            .unwrap()
            .map(|e| e.unwrap().path())
            .collect();
        assert_eq!(entries.len(), 1);
        let text = fs::read_to_string(&entries[0]).unwrap();
        assert!(text.contains("\"message\":\"value retained\""));
        assert!(text.contains("u/js220/0001/s/i"));
    }
}
