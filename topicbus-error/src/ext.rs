use std::error::Error;

use crate::{LogLevel, StatusCode};

/// Расширение для ошибок шины (object-safe).
///
/// Даёт каждой ошибке статус-код, сообщение для пользователя CLI и
/// рекомендуемый уровень логирования.
pub trait ErrorExt: Error + Send + Sync + 'static {
    /// Статус ошибки. По умолчанию [`StatusCode::Internal`].
    fn status_code(&self) -> StatusCode {
        StatusCode::Internal
    }

    /// Сообщение для пользователя.
    ///
    /// Для внутренних ошибок детали скрываются.
    fn client_message(&self) -> String {
        match self.status_code() {
            StatusCode::Unknown | StatusCode::Internal => "internal error".to_string(),
            _ => self.to_string(),
        }
    }

    /// Уровень логирования, выводимый из статус-кода.
    fn log_level(&self) -> LogLevel {
        self.status_code().log_level()
    }
}
