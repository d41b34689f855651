use tracing_subscriber::EnvFilter;

use crate::logging::config::LoggingConfig;

/// Фильтр из `RUST_LOG`, а если переменная не задана — из конфигурации.
pub fn build_filter_from_config(config: &LoggingConfig) -> EnvFilter {
    let directive = config.build_filter_directive();

    match EnvFilter::try_from_default_env() {
        Ok(env_filter) => env_filter,
        Err(_) => match EnvFilter::try_new(&directive) {
            Ok(filter) => filter,
            Err(e) => {
                eprintln!(
                    "Invalid log filter directive from config ('{directive}'): {e}; falling back to 'info'"
                );
                EnvFilter::new("info")
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Тест проверяет, что некорректная директива не приводит к панике.
    #[test]
    fn test_invalid_directive_falls_back() {
        let cfg = LoggingConfig {
            level: "topicbus=notalevel".into(),
            ..Default::default()
        };
        let _filter = build_filter_from_config(&cfg);
    }

    #[test]
    fn test_valid_directive() {
        let cfg = LoggingConfig {
            level: "topicbus=debug,warn".into(),
            ..Default::default()
        };
        let _filter = build_filter_from_config(&cfg);
    }
}
