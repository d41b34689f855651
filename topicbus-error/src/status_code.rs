use std::fmt;

use num_enum::TryFromPrimitive;
#[cfg(feature = "serde_repr")]
use serde_repr::{Deserialize_repr, Serialize_repr};
#[cfg(feature = "strum")]
use strum_macros::{AsRefStr, EnumIter};

/// Коды статуса для категоризации ошибок шины.
///
/// # Диапазоны:
/// - 0xxx: Успех
/// - 1xxx: Общие ошибки
/// - 2xxx: Ошибки топиков и подписок
/// - 3xxx: Ошибки конфигурации
/// - 6xxx: Ввод/вывод (только CLI)
/// - 8xxx: Разбор команд и данных (только CLI)
///
/// `num_enum::TryFromPrimitive` даёт `TryFrom<u32>`, опционально `strum`
/// (`AsRefStr`/`EnumIter`) и `serde_repr` для числовой сериализации.
#[cfg_attr(feature = "strum", derive(AsRefStr, EnumIter))]
#[cfg_attr(feature = "serde_repr", derive(Serialize_repr, Deserialize_repr))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
#[repr(u32)]
#[non_exhaustive]
pub enum StatusCode {
    // === 0xxx: Успех ===
    Success = 0,

    // === 1xxx: Общие ошибки ===
    Unknown = 1000,
    Internal = 1001,
    InvalidArgs = 1002,
    Unsupported = 1003,

    // === 2xxx: Топики и подписки ===
    InvalidTopic = 2000,
    UnknownEvent = 2001,
    SubscriptionNotFound = 2002,
    Detached = 2003,

    // === 3xxx: Конфигурация ===
    InvalidConfiguration = 3000,
    InvalidFilter = 3001,
    InvalidLimit = 3002,

    // === 6xxx: Ввод/вывод ===
    Io = 6000,

    // === 8xxx: Разбор ===
    InvalidCommand = 8000,
    InvalidJson = 8001,
    ParseError = 8002,
}

/// Рекомендуемый уровень логирования для ошибки.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

////////////////////////////////////////////////////////////////////////////////
// Собственные методы
////////////////////////////////////////////////////////////////////////////////

impl StatusCode {
    /// Числовое представление кода статуса.
    pub const fn code(self) -> u32 {
        self as u32
    }

    /// Ошибка вызывающего кода: неверный топик, событие или настройка.
    ///
    /// Все такие ошибки считаются ошибками программиста и не повторяются.
    pub fn is_usage_error(&self) -> bool {
        let c = self.code();
        (2000..=3999).contains(&c) || matches!(self, Self::InvalidArgs)
    }

    /// Рекомендуемый уровень логирования для данного кода.
    pub fn log_level(&self) -> LogLevel {
        match self {
            Self::Success => LogLevel::Trace,
            Self::SubscriptionNotFound | Self::Detached => LogLevel::Debug,
            Self::InvalidTopic
            | Self::UnknownEvent
            | Self::InvalidArgs
            | Self::InvalidCommand
            | Self::InvalidJson
            | Self::ParseError => LogLevel::Info,
            Self::Internal | Self::Unknown => LogLevel::Error,
            _ => LogLevel::Warn,
        }
    }
}

////////////////////////////////////////////////////////////////////////////////
// Общие реализации трейтов для StatusCode
////////////////////////////////////////////////////////////////////////////////

impl From<StatusCode> for u32 {
    fn from(c: StatusCode) -> Self {
        c.code()
    }
}

impl fmt::Display for StatusCode {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        #[cfg(feature = "strum")]
        {
            write!(f, "{} ({})", self.as_ref(), self.code())
        }
        #[cfg(not(feature = "strum"))]
        {
            write!(f, "{:?} ({})", self, self.code())
        }
    }
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////
