use std::io::{self, Stderr};

use tracing_subscriber::layer::Layer as LayerTrait;
use tracing_subscriber::{fmt, registry::LookupSpan};

use crate::logging::config::{LogFormat, LoggingConfig};

/// Слой `fmt` по конфигурации. Конкретный тип формата стирается в
/// boxed trait-объект. Логи идут в stderr, stdout остаётся для вывода CLI.
pub fn build_formatter_from_config<S>(config: &LoggingConfig) -> Box<dyn LayerTrait<S> + Send + Sync>
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
{
    let writer: fn() -> Stderr = io::stderr;

    match config.format {
        LogFormat::Json => {
            let layer = fmt::layer()
                .event_format(fmt::format().json().with_current_span(true))
                .with_writer(writer)
                .with_ansi(false)
                .with_target(config.with_target);
            Box::new(layer)
        }
        LogFormat::Pretty => {
            let layer = fmt::layer()
                .event_format(fmt::format().pretty())
                .with_writer(writer)
                .with_ansi(config.ansi)
                .with_target(config.with_target);
            Box::new(layer)
        }
        LogFormat::Compact => {
            let layer = fmt::layer()
                .event_format(fmt::format().compact())
                .with_writer(writer)
                .with_ansi(config.ansi)
                .with_target(config.with_target);
            Box::new(layer)
        }
    }
}

#[cfg(test)]
mod tests {
    use tracing::debug;
    use tracing_subscriber::{prelude::*, registry::Registry};

    use super::*;

    /// Тест проверяет, что слой любого формата регистрируется и пишет без
    /// паники.
    #[test]
    fn test_every_format_builds() {
        for format in [LogFormat::Compact, LogFormat::Pretty, LogFormat::Json] {
            let cfg = LoggingConfig {
                format,
                ansi: false,
                ..Default::default()
            };
            let subscriber = Registry::default().with(build_formatter_from_config(&cfg));
            tracing::subscriber::with_default(subscriber, || {
                debug!(format = format.as_ref(), "formatter smoke test");
            });
        }
    }
}
