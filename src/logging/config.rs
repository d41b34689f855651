use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, EnumString};

/// Формат вывода логов.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, EnumString, AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Compact,
    Pretty,
    Json,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Директива фильтра: уровень (`info`) или список
    /// `target=level` через запятую. `RUST_LOG` имеет приоритет.
    pub level: String,
    pub format: LogFormat,
    pub ansi: bool,
    pub with_target: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Compact,
            ansi: true,
            with_target: true,
        }
    }
}

impl LoggingConfig {
    pub fn build_filter_directive(&self) -> String {
        let level = self.level.trim();
        if level.is_empty() {
            "info".to_string()
        } else {
            level.to_string()
        }
    }
}
