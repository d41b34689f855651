use thiserror::Error;
use topicbus_error::{ErrorExt, StatusCode};

pub type PubSubResult<T> = Result<T, PubSubError>;

/// Ошибки шины.
///
/// Все ошибки синхронны и означают неверное использование API: внутри
/// библиотеки они не повторяются и не подавляются.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PubSubError {
    #[error("invalid topic: {topic:?}")]
    InvalidTopic { topic: String },

    #[error("unknown event: {name:?}")]
    UnknownEvent { name: String },

    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("sandbox has been destroyed")]
    Detached,
}

impl PubSubError {
    pub(crate) fn invalid_topic(topic: &str) -> Self {
        PubSubError::InvalidTopic {
            topic: topic.to_string(),
        }
    }

    pub(crate) fn unknown_event(name: &str) -> Self {
        PubSubError::UnknownEvent {
            name: name.to_string(),
        }
    }
}

impl ErrorExt for PubSubError {
    fn status_code(&self) -> StatusCode {
        match self {
            PubSubError::InvalidTopic { .. } => StatusCode::InvalidTopic,
            PubSubError::UnknownEvent { .. } => StatusCode::UnknownEvent,
            PubSubError::InvalidConfiguration(_) => StatusCode::InvalidConfiguration,
            PubSubError::Detached => StatusCode::Detached,
        }
    }
}

#[cfg(test)]
mod tests {
    use topicbus_error::StackError;

    use super::*;

    #[test]
    fn test_display() {
        assert_eq!(
            PubSubError::invalid_topic("a..b").to_string(),
            "invalid topic: \"a..b\""
        );
        assert_eq!(
            PubSubError::unknown_event("bogus").to_string(),
            "unknown event: \"bogus\""
        );
        assert_eq!(
            PubSubError::InvalidConfiguration("limit must be positive".into()).to_string(),
            "invalid configuration: limit must be positive"
        );
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(
            PubSubError::invalid_topic("").status_code(),
            StatusCode::InvalidTopic
        );
        assert_eq!(
            PubSubError::unknown_event("x").status_code(),
            StatusCode::UnknownEvent
        );
        assert_eq!(PubSubError::Detached.status_code(), StatusCode::Detached);
        assert!(PubSubError::InvalidConfiguration(String::new())
            .status_code()
            .is_usage_error());
    }

    /// Тест проверяет, что ошибка шины оборачивается в `StackError` с
    /// тем же кодом и сообщением.
    #[test]
    fn test_into_stack_error() {
        let stack: StackError = PubSubError::invalid_topic("a.").into();
        assert_eq!(stack.status_code(), StatusCode::InvalidTopic);
        assert_eq!(stack.client_message(), "invalid topic: \"a.\"");
    }
}
