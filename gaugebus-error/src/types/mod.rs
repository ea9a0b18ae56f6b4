mod bus;
mod topic;

use std::{any::Any, io};

pub use bus::BusError;
use thiserror::Error;
pub use topic::TopicError;

use crate::{ErrorExt, GaugeResult, StackError, StatusCode};

/// Ошибка с произвольным кодом и текстом: для мест, где отдельный тип не
/// нужен (`bail!(code, "...")`, код возврата от устройства с пояснением).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
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
}

impl ErrorExt for GenericError {
    fn status_code(&self) -> StatusCode {
        self.code
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

fn io_status(kind: io::ErrorKind) -> StatusCode {
    use io::ErrorKind as K;
    match kind {
        K::NotFound => StatusCode::NotFound,
        K::PermissionDenied => StatusCode::Permissions,
        K::AlreadyExists => StatusCode::AlreadyExists,
        K::TimedOut | K::WouldBlock => StatusCode::TimedOut,
        K::InvalidInput | K::InvalidData => StatusCode::ParameterInvalid,
        K::UnexpectedEof => StatusCode::InvalidMessageLength,
        K::BrokenPipe | K::ConnectionReset | K::ConnectionAborted => StatusCode::Closed,
        K::OutOfMemory => StatusCode::NotEnoughMemory,
        _ => StatusCode::Io,
    }
}

impl From<io::Error> for StackError {
    fn from(err: io::Error) -> Self {
        GenericError::new(io_status(err.kind()), err.to_string()).into()
    }
}

impl From<std::str::Utf8Error> for StackError {
    fn from(err: std::str::Utf8Error) -> Self {
        GenericError::new(StatusCode::SyntaxError, format!("payload is not UTF-8: {err}")).into()
    }
}

/// Превращает код из конверта `topic#` в результат: `0` значит успех,
/// остальное становится [`BusError::ReturnCode`].
pub fn check_return_code(
    topic: &str,
    code: i32,
) -> GaugeResult<()> {
    if StatusCode::is_success(code) {
        return Ok(());
    }
    Err(BusError::ReturnCode {
        topic: topic.to_owned(),
        code,
    }
    .into())
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////
