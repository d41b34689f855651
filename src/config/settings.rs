use std::path::Path;

use serde::{Deserialize, Serialize};

use config::{Config, ConfigError, Environment, File};

use crate::{logging::LoggingConfig, pubsub::CompilerKind};

/// Префикс переменных окружения: `TOPICBUS_BROKER__FILTER_COMPILER=query`.
pub const ENV_PREFIX: &str = "TOPICBUS";

/// Настройки брокера.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    /// Стратегия компиляции дескрипторов фильтров.
    pub filter_compiler: CompilerKind,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub broker: BrokerConfig,
    pub logging: LoggingConfig,
}

impl Settings {
    /// Загружает настройки: значения по умолчанию, затем файл (если
    /// указан), затем переменные окружения с префиксом `TOPICBUS_`.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        Self::load_with_env(
            path,
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__"),
        )
    }

    pub fn load_with_env(
        path: Option<&Path>,
        env: Environment,
    ) -> Result<Self, ConfigError> {
        let defaults = LoggingConfig::default();
        let mut builder = Config::builder()
            // Добавляем значения по умолчанию
            .set_default("broker.filter_compiler", "predicate_only")?
            .set_default("logging.level", defaults.level)?
            .set_default("logging.format", defaults.format.as_ref())?
            .set_default("logging.ansi", defaults.ansi)?;

        if let Some(path) = path {
            builder = builder.add_source(File::from(path).required(true));
        }

        // Десериализуем конфигурацию в нашу структуру
        builder.add_source(env).build()?.try_deserialize()
    }
}
