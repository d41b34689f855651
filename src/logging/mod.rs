pub mod config;
mod filters;
mod formatter;

pub use config::{LogFormat, LoggingConfig};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Инициализация логирования с конфигурацией.
///
/// Повторный вызов возвращает ошибку: глобальный subscriber уже
/// установлен.
pub fn init_logging(config: &LoggingConfig) -> Result<(), Box<dyn std::error::Error>> {
    let env_filter = filters::build_filter_from_config(config);
    let layer = formatter::build_formatter_from_config(config);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(layer)
        .try_init()?;

    tracing::debug!(
        version = env!("CARGO_PKG_VERSION"),
        log_level = %config.level,
        format = config.format.as_ref(),
        "Logging system initialized"
    );
    Ok(())
}
