use std::{
    sync::atomic::{AtomicU64, Ordering},
    time::{Duration, Instant},
};

use tracing_appender::non_blocking::WorkerGuard;

/// Сколько может занимать сброс файла при завершении без предупреждения.
const SLOW_SHUTDOWN: Duration = Duration::from_secs(5);

/// Владелец ресурсов логирования, возвращается из
/// [`init_logging`](super::init_logging).
///
/// Держит guard фонового writer'а `tracing-appender`. Его нужно хранить
/// до конца работы приложения и завершать через [`shutdown`](Self::shutdown),
/// иначе хвост файла может потеряться при аварийном выходе.
#[derive(Debug)]
pub struct LoggingHandle {
    file_guard: Option<WorkerGuard>,
    flushes: AtomicU64,
}

/// Снимок состояния логирования.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoggingStats {
    pub flushes: u64,
    pub file_enabled: bool,
}

////////////////////////////////////////////////////////////////////////////////
// Собственные методы
////////////////////////////////////////////////////////////////////////////////

impl LoggingHandle {
    pub(crate) fn new(file_guard: Option<WorkerGuard>) -> Self {
        Self {
            file_guard,
            flushes: AtomicU64::new(0),
        }
    }

    /// Отмечает точку сброса. Фоновый writer пишет сам; счётчик нужен,
    /// чтобы видеть в логе, как часто приложение об этом просит.
    pub fn flush(&self) {
        let n = self.flushes.fetch_add(1, Ordering::Relaxed) + 1;
        tracing::debug!(flushes = n, "log flush requested");
    }

    pub fn stats(&self) -> LoggingStats {
        LoggingStats {
            flushes: self.flushes.load(Ordering::Relaxed),
            file_enabled: self.file_guard.is_some(),
        }
    }

    /// Сбрасывает файловый writer и возвращает итоговый снимок.
    pub fn shutdown(mut self) -> LoggingStats {
        let stats = self.stats();
        tracing::info!(flushes = stats.flushes, "logging shutdown");

        let started = Instant::now();
        drop(self.file_guard.take());
        let took = started.elapsed();
        if took > SLOW_SHUTDOWN {
            tracing::warn!(took_ms = took.as_millis() as u64, "slow log file flush");
        }
        stats
    }
}

impl Drop for LoggingHandle {
    fn drop(&mut self) {
        if self.file_guard.is_some() {
            eprintln!("gaugebus: LoggingHandle dropped without shutdown(), flushing log file");
        }
    }
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;

    /// Тест проверяет счётчик сбросов и итоговый снимок при завершении.
    #[test]
    fn test_flush_count_and_shutdown() {
        let handle = LoggingHandle::new(None);
        assert_eq!(
            handle.stats(),
            LoggingStats {
                flushes: 0,
                file_enabled: false
            }
        );
        handle.flush();
        handle.flush();
        assert_eq!(handle.stats().flushes, 2);

        let last = handle.shutdown();
        assert_eq!(last.flushes, 2);
        assert!(!last.file_enabled);
    }

    /// Тест проверяет, что handle с файловым guard сообщает об этом.
    #[test]
    fn test_file_guard_reported() {
        let (_writer, guard) = tracing_appender::non_blocking(std::io::sink());
        let handle = LoggingHandle::new(Some(guard));
        assert!(handle.stats().file_enabled);
        assert!(handle.shutdown().file_enabled);
    }
}
