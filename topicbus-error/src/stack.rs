use std::{fmt, panic::Location, sync::Arc};

use crate::{ErrorExt, LogLevel, StatusCode};

/// Ошибка с цепочкой контекстов.
///
/// Контексты добавляются по мере подъёма ошибки по стеку вызовов, каждый
/// запоминает место вызова.
#[derive(Clone)]
pub struct StackError {
    inner: Arc<dyn ErrorExt>,
    contexts: Vec<ErrorContext>,
}

/// Один уровень контекста.
#[derive(Debug, Clone)]
pub struct ErrorContext {
    pub message: String,
    pub location: &'static Location<'static>,
}

impl StackError {
    pub fn new<E: ErrorExt>(err: E) -> Self {
        Self {
            inner: Arc::new(err),
            contexts: Vec::new(),
        }
    }

    /// Добавляет контекст к ошибке.
    #[track_caller]
    pub fn context(
        mut self,
        msg: impl Into<String>,
    ) -> Self {
        self.contexts.push(ErrorContext {
            message: msg.into(),
            location: Location::caller(),
        });
        self
    }

    pub fn status_code(&self) -> StatusCode {
        self.inner.status_code()
    }

    pub fn client_message(&self) -> String {
        self.inner.client_message()
    }

    pub fn log_level(&self) -> LogLevel {
        self.inner.log_level()
    }

    pub fn contexts(&self) -> &[ErrorContext] {
        &self.contexts
    }
}

impl fmt::Debug for StackError {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        let locations: Vec<String> = self
            .contexts
            .iter()
            .map(|c| format!("{} ({}:{})", c.message, c.location.file(), c.location.line()))
            .collect();
        f.debug_struct("StackError")
            .field("inner", &self.inner.to_string())
            .field("status_code", &self.status_code())
            .field("contexts", &locations)
            .finish()
    }
}

impl fmt::Display for StackError {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        // Внешний контекст первым: "exec script → SUB → invalid topic".
        for ctx in self.contexts.iter().rev() {
            write!(f, "{} → ", ctx.message)?;
        }
        write!(f, "{}", self.inner)
    }
}

impl std::error::Error for StackError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(self.inner.as_ref())
    }
}

impl<E: ErrorExt> From<E> for StackError {
    fn from(e: E) -> Self {
        StackError::new(e)
    }
}
