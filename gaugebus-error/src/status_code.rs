use std::fmt;

use num_enum::TryFromPrimitive;
#[cfg(feature = "serde_repr")]
use serde_repr::{Deserialize_repr, Serialize_repr};
#[cfg(feature = "strum")]
use strum_macros::{AsRefStr, EnumIter};

/// Коды статуса шины.
///
/// Закрытое перечисление: каждая операция шины, каждый код возврата
/// устройства и каждый ответ подписчика выражаются одним из этих значений.
/// Числовые значения стабильны и передаются в конвертах `topic#` как `i32`,
/// `0` означает успех.
///
/// # Реализация:
/// - `num_enum::TryFromPrimitive` даёт нативную реализацию `TryFrom<i32>`.
/// - опционально: `strum` для `AsRefStr`/`EnumIter` (feature = "strum").
/// - опционально: `serde_repr` для сериализации в виде числового значения
///   (feature = "serde_repr").
#[cfg_attr(feature = "strum", derive(AsRefStr, EnumIter))]
#[cfg_attr(feature = "serde_repr", derive(Serialize_repr, Deserialize_repr))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, TryFromPrimitive)]
#[repr(i32)]
pub enum StatusCode {
    Success = 0,
    Unspecified = 1,
    NotEnoughMemory = 2,
    NotSupported = 3,
    Io = 4,
    ParameterInvalid = 5,
    InvalidReturnCondition = 6,
    InvalidContext = 7,
    InvalidMessageLength = 8,
    MessageIntegrity = 9,
    SyntaxError = 10,
    TimedOut = 11,
    Full = 12,
    Empty = 13,
    TooSmall = 14,
    TooBig = 15,
    NotFound = 16,
    AlreadyExists = 17,
    Permissions = 18,
    Busy = 19,
    Unavailable = 20,
    InUse = 21,
    Closed = 22,
    Sequence = 23,
    Aborted = 24,
    Synchronization = 25,
}

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
    pub const fn code(self) -> i32 {
        self as i32
    }

    /// Пытается получить вариант `StatusCode` из `i32`.
    ///
    /// Использует `TryFrom<i32>` из `num_enum`; возвращает `None`, если
    /// значение не соответствует ни одному варианту.
    pub fn from_i32(v: i32) -> Option<Self> {
        Self::try_from(v).ok()
    }

    /// Как [`StatusCode::from_i32`], но неизвестные коды сводятся к
    /// `Unspecified`.
    pub fn from_i32_lossy(v: i32) -> Self {
        Self::from_i32(v).unwrap_or(Self::Unspecified)
    }

    /// Вернёт `true`, если переданный `code` означает успешный результат.
    pub fn is_success(code: i32) -> bool {
        Self::Success as i32 == code
    }

    /// Короткое имя кода в стиле `NOT_FOUND`.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Success => "SUCCESS",
            Self::Unspecified => "UNSPECIFIED",
            Self::NotEnoughMemory => "NOT_ENOUGH_MEMORY",
            Self::NotSupported => "NOT_SUPPORTED",
            Self::Io => "IO",
            Self::ParameterInvalid => "PARAMETER_INVALID",
            Self::InvalidReturnCondition => "INVALID_RETURN_CONDITION",
            Self::InvalidContext => "INVALID_CONTEXT",
            Self::InvalidMessageLength => "INVALID_MESSAGE_LENGTH",
            Self::MessageIntegrity => "MESSAGE_INTEGRITY",
            Self::SyntaxError => "SYNTAX_ERROR",
            Self::TimedOut => "TIMED_OUT",
            Self::Full => "FULL",
            Self::Empty => "EMPTY",
            Self::TooSmall => "TOO_SMALL",
            Self::TooBig => "TOO_BIG",
            Self::NotFound => "NOT_FOUND",
            Self::AlreadyExists => "ALREADY_EXISTS",
            Self::Permissions => "PERMISSIONS",
            Self::Busy => "BUSY",
            Self::Unavailable => "UNAVAILABLE",
            Self::InUse => "IN_USE",
            Self::Closed => "CLOSED",
            Self::Sequence => "SEQUENCE",
            Self::Aborted => "ABORTED",
            Self::Synchronization => "SYNCHRONIZATION",
        }
    }

    /// Человекочитаемое описание кода.
    pub const fn description(self) -> &'static str {
        match self {
            Self::Success => "Success (no error)",
            Self::Unspecified => "Unspecified error",
            Self::NotEnoughMemory => "Insufficient memory to complete the operation",
            Self::NotSupported => "Operation is not supported",
            Self::Io => "Input/output error",
            Self::ParameterInvalid => "The parameter value is invalid",
            Self::InvalidReturnCondition => "The function return condition is invalid",
            Self::InvalidContext => "The context is invalid",
            Self::InvalidMessageLength => "The message length is invalid",
            Self::MessageIntegrity => "The message integrity check failed",
            Self::SyntaxError => "A syntax error was detected",
            Self::TimedOut => "The operation did not complete in time",
            Self::Full => "The target of the operation is full",
            Self::Empty => "The target of the operation is empty",
            Self::TooSmall => "The target of the operation is too small",
            Self::TooBig => "The target of the operation is too big",
            Self::NotFound => "The requested resource was not found",
            Self::AlreadyExists => "The requested resource already exists",
            Self::Permissions => "Insufficient permissions to perform the operation",
            Self::Busy => "The requested resource is currently busy",
            Self::Unavailable => "The requested resource is currently unavailable",
            Self::InUse => "The requested resource is currently in use",
            Self::Closed => "The requested resource is currently closed",
            Self::Sequence => "The requested operation was out of sequence",
            Self::Aborted => "The requested operation was previously aborted",
            Self::Synchronization => "The target is not synchronized with the originator",
        }
    }

    /// Возвращает `true`, если операцию с этим кодом имеет смысл повторить.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::TimedOut | Self::Busy | Self::Unavailable | Self::InUse | Self::Full
        )
    }

    /// Требуется ли логировать как критическую ошибку.
    pub fn is_critical(&self) -> bool {
        matches!(
            self,
            Self::NotEnoughMemory | Self::MessageIntegrity | Self::Synchronization
        )
    }

    /// Рекомендуемый уровень логирования для данного кода.
    pub fn log_level(&self) -> LogLevel {
        match self {
            Self::Success => LogLevel::Trace,
            Self::NotFound | Self::AlreadyExists | Self::Empty => LogLevel::Debug,
            Self::ParameterInvalid
            | Self::SyntaxError
            | Self::TooSmall
            | Self::TooBig
            | Self::NotSupported
            | Self::Closed => LogLevel::Info,
            Self::NotEnoughMemory | Self::MessageIntegrity | Self::Synchronization => {
                LogLevel::Error
            }
            _ => LogLevel::Warn,
        }
    }
}

////////////////////////////////////////////////////////////////////////////////
// Общие реализации трейтов для StatusCode
////////////////////////////////////////////////////////////////////////////////

impl From<StatusCode> for i32 {
    fn from(c: StatusCode) -> Self {
        c.code()
    }
}

impl fmt::Display for StatusCode {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        // Если включён feature "strum", используем имя варианта (AsRefStr).
        // Иначе: Debug-имя.
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
