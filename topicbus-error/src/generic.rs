use thiserror::Error;

use crate::{ErrorExt, StatusCode};

/// Ошибка с произвольным кодом и сообщением.
///
/// Используется макросами [`bail!`](crate::bail) и [`ensure!`](crate::ensure),
/// когда отдельный тип ошибки не нужен.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct GenericError {
    code: StatusCode,
    message: String,
}

impl GenericError {
    pub fn new(
        code: StatusCode,
        message: impl Into<String>,
    ) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl ErrorExt for GenericError {
    fn status_code(&self) -> StatusCode {
        self.code
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generic_error_carries_code() {
        let e = GenericError::new(StatusCode::InvalidCommand, "unknown command: FOO");
        assert_eq!(e.status_code(), StatusCode::InvalidCommand);
        assert_eq!(e.to_string(), "unknown command: FOO");
        assert_eq!(e.message(), "unknown command: FOO");
    }
}
