use std::path::Path;

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};

use super::BusConfig;
use crate::logging::LoggingConfig;

/// Префикс переменных окружения: `GAUGEBUS_BUS__DEFAULT_TIMEOUT_MS=250`.
pub const ENV_PREFIX: &str = "GAUGEBUS";

/// Полная конфигурация процесса.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub bus: BusConfig,
    pub logging: LoggingConfig,
}

impl Settings {
    /// Загружает конфигурацию: значения по умолчанию, затем необязательный
    /// `gaugebus.toml` в рабочем каталоге, затем переменные окружения.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(Path::new("gaugebus.toml"))
    }

    /// То же, что [`Settings::load`], но с явным путём к файлу.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let cfg = Config::builder()
            // Значения по умолчанию
            .add_source(Config::try_from(&Settings::default())?)
            .add_source(File::from(path).required(false))
            // Переменные окружения с префиксом GAUGEBUS_
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let settings: Settings = cfg.try_deserialize()?;
        settings.bus.validate()?;
        Ok(settings)
    }
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use std::{env, io::Write};

    use serial_test::serial;

    use super::*;
    use crate::logging::LogFormat;

    /// Тест проверяет загрузку без файла: получаются значения по умолчанию.
    #[test]
    #[serial]
    fn test_load_defaults_without_file() {
        let settings = Settings::load_from(Path::new("/nonexistent/gaugebus.toml")).unwrap();
        assert_eq!(settings.bus, BusConfig::default());
    }

    /// Тест проверяет, что значения из файла перекрывают значения по
    /// умолчанию.
    #[test]
    #[serial]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "[bus]\ndefault_timeout_ms = 250\nthread_name = \"bus-test\"\n\n[logging]\nlevel = \"debug\"\nformat = \"json\""
        )
        .unwrap();
        let settings = Settings::load_from(file.path()).unwrap();
        assert_eq!(settings.bus.default_timeout_ms, 250);
        assert_eq!(settings.bus.thread_name, "bus-test");
        assert_eq!(settings.bus.query_timeout_ms, 1000);
        assert_eq!(settings.logging.level, "debug");
        assert_eq!(settings.logging.format, LogFormat::Json);
    }

    /// Тест проверяет переопределение через переменные окружения.
    #[test]
    #[serial]
    fn test_env_override() {
        env::set_var("GAUGEBUS_BUS__MAX_POLL_INTERVAL_MS", "50");
        let settings = Settings::load_from(Path::new("/nonexistent/gaugebus.toml"));
        env::remove_var("GAUGEBUS_BUS__MAX_POLL_INTERVAL_MS");
        assert_eq!(settings.unwrap().bus.max_poll_interval_ms, 50);
    }

    /// Тест проверяет, что некорректные значения отклоняются при загрузке.
    #[test]
    #[serial]
    fn test_invalid_value_rejected() {
        env::set_var("GAUGEBUS_BUS__DEFAULT_TIMEOUT_MS", "0");
        let result = Settings::load_from(Path::new("/nonexistent/gaugebus.toml"));
        env::remove_var("GAUGEBUS_BUS__DEFAULT_TIMEOUT_MS");
        assert!(result.is_err());
    }
}
