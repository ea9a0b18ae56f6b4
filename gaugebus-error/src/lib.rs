//! Коды статуса и ошибки шины gaugebus.
//!
//! Каждая ошибка сводится к [`StatusCode`]: это же число уходит в конверты
//! `topic#` и возвращается из синхронных вызовов.

mod ext;
mod macros;
mod stack;
mod status_code;
pub mod types;

pub use ext::ErrorExt;
pub use macros::ResultExt;
pub use stack::{Frame, StackError};
pub use status_code::{LogLevel, StatusCode};
pub use types::{check_return_code, BusError, GenericError, TopicError};

/// Результат любой операции шины.
pub type GaugeResult<T> = Result<T, StackError>;
