/// Выходит из функции с `Err(StackError)`.
///
/// - `bail!(err)`: любая ошибка, которая конвертируется в `StackError`;
/// - `bail!(code, "текст")` и `bail!(code, "шаблон {}", arg)`: `GenericError`
///   с указанным [`StatusCode`](crate::StatusCode).
///
/// ```ignore
/// fn check_level(level: &str) -> GaugeResult<()> {
///     if level.len() > 7 {
///         bail!(StatusCode::ParameterInvalid, "level {level:?} is longer than 7 bytes");
///     }
///     Ok(())
/// }
/// ```
#[macro_export]
macro_rules! bail {
    ($err:expr $(,)?) => {
        return ::core::result::Result::Err($crate::StackError::from($err))
    };
    ($code:expr, $($fmt:tt)+) => {
        return ::core::result::Result::Err($crate::StackError::new(
            $crate::GenericError::new($code, format!($($fmt)+)),
        ))
    };
}

/// `bail!`, если условие ложно. Формы аргументов те же.
///
/// ```ignore
/// ensure!(!topic.is_empty(), StatusCode::ParameterInvalid, "root topic has no value");
/// ensure!(len <= max, BusError::PayloadTooBig { topic, len, max });
/// ```
#[macro_export]
macro_rules! ensure {
    ($cond:expr, $($rest:tt)+) => {
        if !($cond) {
            $crate::bail!($($rest)+);
        }
    };
}

/// Пометки для `Result` с любой ошибкой, которая становится `StackError`.
pub trait ResultExt<T> {
    /// Превращает ошибку в `StackError` и добавляет пометку.
    fn context(
        self,
        message: impl Into<String>,
    ) -> crate::GaugeResult<T>;

    /// То же, но текст строится только при ошибке.
    fn with_context<M, F>(
        self,
        message: F,
    ) -> crate::GaugeResult<T>
    where
        M: Into<String>,
        F: FnOnce() -> M;
}

impl<T, E: Into<crate::StackError>> ResultExt<T> for Result<T, E> {
    #[track_caller]
    fn context(
        self,
        message: impl Into<String>,
    ) -> crate::GaugeResult<T> {
        match self {
            Ok(v) => Ok(v),
            Err(e) => Err(e.into().context(message)),
        }
    }

    #[track_caller]
    fn with_context<M, F>(
        self,
        message: F,
    ) -> crate::GaugeResult<T>
    where
        M: Into<String>,
        F: FnOnce() -> M,
    {
        match self {
            Ok(v) => Ok(v),
            Err(e) => Err(e.into().context(message())),
        }
    }
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////
