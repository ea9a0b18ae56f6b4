//! Настройки шины.
//!
//! - [`BusConfig`]: таймауты, размеры буферов пула и имя потока диспетчера.
//! - [`Settings`]: полная конфигурация процесса (шина и логирование),
//!   загружаемая через crate `config`.

pub mod settings;

use std::time::Duration;

use config::ConfigError;
use serde::{Deserialize, Serialize};

pub use settings::Settings;

use crate::message::{CONTROL_PAYLOAD_SIZE, STREAM_PAYLOAD_SIZE};

/// Параметры шины.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    /// Таймаут по умолчанию для блокирующих вызовов, мс.
    pub default_timeout_ms: u64,
    /// Таймаут запроса значения, если вызывающий передал ноль, мс.
    pub query_timeout_ms: u64,
    /// Наибольший интервал ожидания потока диспетчера, мс.
    pub max_poll_interval_ms: u64,
    /// Встроенный буфер управляющих конвертов, байт.
    pub control_payload_size: usize,
    /// Встроенный буфер потоковых конвертов, байт.
    pub stream_payload_size: usize,
    /// Управляющих буферов, выделяемых при запуске.
    pub pool_prealloc_control: usize,
    /// Потоковых буферов, выделяемых при запуске.
    pub pool_prealloc_stream: usize,
    /// Имя потока диспетчера.
    pub thread_name: String,
    /// Сколько ждать завершения потока диспетчера при остановке, мс.
    pub shutdown_timeout_ms: u64,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            default_timeout_ms: 1000,
            query_timeout_ms: 1000,
            max_poll_interval_ms: 1000,
            control_payload_size: CONTROL_PAYLOAD_SIZE,
            stream_payload_size: STREAM_PAYLOAD_SIZE,
            pool_prealloc_control: 16,
            pool_prealloc_stream: 0,
            thread_name: "gaugebus-dispatch".to_string(),
            shutdown_timeout_ms: 5000,
        }
    }
}

impl BusConfig {
    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }

    pub fn query_timeout(&self) -> Duration {
        Duration::from_millis(self.query_timeout_ms)
    }

    pub fn max_poll_interval(&self) -> Duration {
        Duration::from_millis(self.max_poll_interval_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    /// Отклоняет нулевые интервалы и размеры.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let checks = [
            ("default_timeout_ms", self.default_timeout_ms == 0),
            ("query_timeout_ms", self.query_timeout_ms == 0),
            ("max_poll_interval_ms", self.max_poll_interval_ms == 0),
            ("control_payload_size", self.control_payload_size == 0),
            ("stream_payload_size", self.stream_payload_size == 0),
            ("shutdown_timeout_ms", self.shutdown_timeout_ms == 0),
        ];
        if let Some((name, _)) = checks.iter().find(|(_, zero)| *zero) {
            return Err(ConfigError::Message(format!("{name} must be greater than zero")));
        }
        if self.stream_payload_size < self.control_payload_size {
            return Err(ConfigError::Message(
                "stream_payload_size must not be smaller than control_payload_size".to_string(),
            ));
        }
        if self.thread_name.is_empty() {
            return Err(ConfigError::Message("thread_name must not be empty".to_string()));
        }
        Ok(())
    }
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;

    /// Тест проверяет значения по умолчанию.
    #[test]
    fn test_defaults() {
        let cfg = BusConfig::default();
        assert_eq!(cfg.default_timeout(), Duration::from_secs(1));
        assert_eq!(cfg.max_poll_interval(), Duration::from_secs(1));
        assert_eq!(cfg.control_payload_size, 1024);
        assert_eq!(cfg.stream_payload_size, 48 + 65536);
        assert!(cfg.validate().is_ok());
    }

    /// Тест проверяет, что нулевые значения отклоняются.
    #[test]
    fn test_validate_rejects_zero() {
        let cfg = BusConfig {
            max_poll_interval_ms: 0,
            ..Default::default()
        };
        let err = cfg.validate().unwrap_err().to_string();
        assert!(err.contains("max_poll_interval_ms"), "{err}");

        let cfg = BusConfig {
            stream_payload_size: 16,
            ..Default::default()
        };
        assert!(cfg.validate().is_err());
    }
}
