use std::{error::Error, fmt, panic::Location, sync::Arc};

use crate::{ErrorExt, LogLevel, StatusCode};

/// Ошибка, которую возвращают все операции шины.
///
/// Внутри лежит исходная ошибка (она определяет код статуса) и список
/// пометок, добавленных по пути наверх. Клонирование дешёвое: исходная
/// ошибка разделяется через `Arc`, поэтому одну и ту же ошибку можно отдать
/// и ожидающему вызову, и в лог.
#[derive(Clone)]
pub struct StackError {
    source: Arc<dyn ErrorExt>,
    frames: Vec<Frame>,
}

/// Пометка, добавленная через [`StackError::context`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub message: String,
    pub location: &'static Location<'static>,
}

impl fmt::Display for Frame {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(
            f,
            "{} at {}:{}",
            self.message,
            self.location.file(),
            self.location.line()
        )
    }
}

////////////////////////////////////////////////////////////////////////////////
// Собственные методы
////////////////////////////////////////////////////////////////////////////////

impl StackError {
    pub fn new<E: ErrorExt>(err: E) -> Self {
        Self {
            source: Arc::new(err),
            frames: Vec::new(),
        }
    }

    /// Дописывает пометку с местом вызова.
    #[track_caller]
    pub fn context(
        mut self,
        message: impl Into<String>,
    ) -> Self {
        self.frames.push(Frame {
            message: message.into(),
            location: Location::caller(),
        });
        self
    }

    pub fn status_code(&self) -> StatusCode {
        self.source.status_code()
    }

    /// Числовой код, как он передаётся в конвертах `topic#`.
    pub fn code(&self) -> i32 {
        self.source.return_code()
    }

    pub fn client_message(&self) -> String {
        self.source.client_message()
    }

    /// Исходная ошибка без пометок.
    pub fn root(&self) -> &dyn ErrorExt {
        &*self.source
    }

    /// Пометки в порядке добавления: от самой глубокой к самой внешней.
    pub fn contexts(&self) -> &[Frame] {
        &self.frames
    }

    pub fn metrics_tags(&self) -> Vec<(&'static str, String)> {
        self.source.metrics_tags()
    }

    pub fn downcast_ref<T: ErrorExt>(&self) -> Option<&T> {
        self.source.as_any().downcast_ref()
    }

    /// Уровень, с которым ошибку стоит писать в лог.
    pub fn log_level(&self) -> LogLevel {
        self.status_code().log_level()
    }

    /// Имеет ли смысл повторить вызов (например, после `TimedOut`).
    pub fn is_retryable(&self) -> bool {
        self.status_code().is_retryable()
    }
}

////////////////////////////////////////////////////////////////////////////////
// Общие реализации трейтов для StackError
////////////////////////////////////////////////////////////////////////////////

impl fmt::Debug for StackError {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        let frames: Vec<String> = self.frames.iter().map(Frame::to_string).collect();
        f.debug_struct("StackError")
            .field("status", &self.status_code())
            .field("source", &format_args!("{}", self.source))
            .field("frames", &frames)
            .finish()
    }
}

impl fmt::Display for StackError {
    /// Внешние пометки идут первыми: `apply settings: publish a/b: timed out`.
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        for frame in self.frames.iter().rev() {
            write!(f, "{}: ", frame.message)?;
        }
        fmt::Display::fmt(&self.source, f)
    }
}

impl Error for StackError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        let root: &(dyn Error + 'static) = &*self.source;
        Some(root)
    }
}

impl<E: ErrorExt> From<E> for StackError {
    fn from(err: E) -> Self {
        Self::new(err)
    }
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////
