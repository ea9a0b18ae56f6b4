use std::{env, fs, io, path::PathBuf, str::FromStr};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Формат вывода событий.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    Pretty,
    #[default]
    Compact,
}

impl FromStr for LogFormat {
    type Err = LoggingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "pretty" => Ok(Self::Pretty),
            "compact" => Ok(Self::Compact),
            other => Err(LoggingError::InvalidFormat(other.to_string())),
        }
    }
}

/// Ошибки настройки логирования.
#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("invalid log level: {0}")]
    InvalidLevel(String),
    #[error("invalid log format: {0}")]
    InvalidFormat(String),
    #[error("log file prefix must not be empty")]
    EmptyFilePrefix,
    #[error("failed to prepare log directory: {0}")]
    Io(#[from] io::Error),
    #[error("failed to install subscriber: {0}")]
    Init(String),
}

/// Настройки консольного вывода.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsoleConfig {
    pub enabled: bool,
    pub with_ansi: bool,
    pub with_target: bool,
    pub with_thread_names: bool,
    pub with_line_numbers: bool,
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            with_ansi: true,
            with_target: true,
            with_thread_names: true,
            with_line_numbers: false,
        }
    }
}

/// Настройки записи в файл с ежедневной ротацией.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    pub enabled: bool,
    pub dir: PathBuf,
    pub prefix: String,
    pub format: LogFormat,
}

impl Default for FileConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            dir: PathBuf::from("logs"),
            prefix: "gaugebus.log".to_string(),
            format: LogFormat::Json,
        }
    }
}

/// Конфигурация логирования.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Базовый уровень: `trace`, `debug`, `info`, `warn`, `error`.
    pub level: String,
    pub format: LogFormat,
    /// Дополнительные директивы фильтра, например `gaugebus::pubsub=trace`.
    pub directives: Vec<String>,
    pub console: ConsoleConfig,
    pub file: FileConfig,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Compact,
            directives: Vec::new(),
            console: ConsoleConfig::default(),
            file: FileConfig::default(),
        }
    }
}

////////////////////////////////////////////////////////////////////////////////
// Собственные методы
////////////////////////////////////////////////////////////////////////////////

impl LoggingConfig {
    /// Применяет `GAUGEBUS_LOG_LEVEL`, `GAUGEBUS_LOG_FORMAT` и
    /// `GAUGEBUS_LOG_DIR`. Последняя также включает запись в файл.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(level) = env::var("GAUGEBUS_LOG_LEVEL") {
            self.level = level;
        }
        if let Ok(format) = env::var("GAUGEBUS_LOG_FORMAT") {
            match format.parse() {
                Ok(format) => self.format = format,
                Err(err) => eprintln!("ignoring GAUGEBUS_LOG_FORMAT: {err}"),
            }
        }
        if let Ok(dir) = env::var("GAUGEBUS_LOG_DIR") {
            self.file.dir = PathBuf::from(dir);
            self.file.enabled = true;
        }
    }

    pub fn validate(&self) -> Result<(), LoggingError> {
        tracing::Level::from_str(&self.level)
            .map_err(|_| LoggingError::InvalidLevel(self.level.clone()))?;
        if self.file.enabled && self.file.prefix.is_empty() {
            return Err(LoggingError::EmptyFilePrefix);
        }
        Ok(())
    }

    /// Создаёт каталог для файлов журнала, если запись в файл включена.
    pub fn ensure_log_dir(&self) -> Result<(), LoggingError> {
        if self.file.enabled {
            fs::create_dir_all(&self.file.dir)?;
        }
        Ok(())
    }

    /// Директива для `EnvFilter`: уровень плюс дополнительные директивы.
    pub fn build_filter_directive(&self) -> String {
        let mut parts = Vec::with_capacity(self.directives.len() + 1);
        parts.push(self.level.to_ascii_lowercase());
        parts.extend(self.directives.iter().cloned());
        parts.join(",")
    }
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use serial_test::serial;

    use super::*;

    /// Тест проверяет сборку директивы фильтра.
    #[test]
    fn test_build_filter_directive() {
        let cfg = LoggingConfig {
            level: "WARN".into(),
            directives: vec!["gaugebus::pubsub=trace".into()],
            ..Default::default()
        };
        assert_eq!(cfg.build_filter_directive(), "warn,gaugebus::pubsub=trace");
    }

    /// Тест проверяет проверку уровня и префикса файла.
    #[test]
    fn test_validate() {
        assert!(LoggingConfig::default().validate().is_ok());
        let cfg = LoggingConfig {
            level: "loud".into(),
            ..Default::default()
        };
        assert!(matches!(cfg.validate(), Err(LoggingError::InvalidLevel(_))));

        let mut cfg = LoggingConfig::default();
        cfg.file.enabled = true;
        cfg.file.prefix.clear();
        assert!(matches!(cfg.validate(), Err(LoggingError::EmptyFilePrefix)));
    }

    /// Тест проверяет разбор формата.
    #[test]
    fn test_format_from_str() {
        assert_eq!("JSON".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert_eq!("pretty".parse::<LogFormat>().unwrap(), LogFormat::Pretty);
        assert!("xml".parse::<LogFormat>().is_err());
    }

    /// Тест проверяет переопределения из переменных окружения.
    #[test]
    #[serial]
    fn test_env_overrides() {
        let dir = tempfile::tempdir().unwrap();
        env::set_var("GAUGEBUS_LOG_LEVEL", "debug");
        env::set_var("GAUGEBUS_LOG_FORMAT", "json");
        env::set_var("GAUGEBUS_LOG_DIR", dir.path());
        let mut cfg = LoggingConfig::default();
        cfg.apply_env_overrides();
        env::remove_var("GAUGEBUS_LOG_LEVEL");
        env::remove_var("GAUGEBUS_LOG_FORMAT");
        env::remove_var("GAUGEBUS_LOG_DIR");

        assert_eq!(cfg.level, "debug");
        assert_eq!(cfg.format, LogFormat::Json);
        assert!(cfg.file.enabled);
        assert_eq!(cfg.file.dir, dir.path());
        assert!(cfg.ensure_log_dir().is_ok());
    }
}
