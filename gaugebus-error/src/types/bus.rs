use std::any::Any;

use thiserror::Error;

use crate::{ErrorExt, StatusCode};

/// Ошибки синхронных операций шины.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BusError {
    /// Шина остановлена.
    #[error("bus is closed")]
    Closed,
    /// Ответ `topic#` не пришёл до дедлайна.
    #[error("timed out waiting for {topic}")]
    TimedOut { topic: String },
    /// Ожидание прервано остановкой шины.
    #[error("wait for {topic} aborted by shutdown")]
    Aborted { topic: String },
    /// Получатель ответил ненулевым кодом возврата.
    #[error("{topic} returned {code}")]
    ReturnCode { topic: String, code: i32 },
    /// Блокирующий вызов из потока диспетчера.
    #[error("blocking call on {topic} from the dispatch thread")]
    InvalidContext { topic: String },
    /// Данные значения больше наибольшего класса пула.
    #[error("payload of {topic} is {len} bytes, limit {max}")]
    PayloadTooBig {
        topic: String,
        len: usize,
        max: usize,
    },
}

impl BusError {
    /// Топик, к которому относится ошибка, если он есть.
    pub fn topic(&self) -> Option<&str> {
        match self {
            Self::TimedOut { topic }
            | Self::Aborted { topic }
            | Self::ReturnCode { topic, .. }
            | Self::InvalidContext { topic }
            | Self::PayloadTooBig { topic, .. } => Some(topic),
            Self::Closed => None,
        }
    }
}

impl ErrorExt for BusError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::Closed => StatusCode::Closed,
            Self::TimedOut { .. } => StatusCode::TimedOut,
            Self::Aborted { .. } => StatusCode::Aborted,
            Self::ReturnCode { code, .. } => StatusCode::from_i32_lossy(*code),
            Self::InvalidContext { .. } => StatusCode::InvalidContext,
            Self::PayloadTooBig { .. } => StatusCode::NotEnoughMemory,
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn metrics_tags(&self) -> Vec<(&'static str, String)> {
        let mut tags = vec![
            ("error_type", "bus".to_string()),
            ("status_code", self.status_code().name().to_string()),
        ];
        if let Some(topic) = self.topic() {
            tags.push(("topic", topic.to_string()));
        }
        if let Self::ReturnCode { code, .. } = self {
            tags.push(("return_code", code.to_string()));
        }
        tags
    }
}
