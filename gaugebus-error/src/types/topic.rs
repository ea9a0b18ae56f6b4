use std::any::Any;

use thiserror::Error;

use crate::{ErrorExt, StatusCode};

/// Ошибки разбора и построения имён топиков.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TopicError {
    /// Топик длиннее допустимого.
    #[error("topic '{topic}' is {len} bytes, max {max}")]
    TooLong {
        topic: String,
        len: usize,
        max: usize,
    },
    /// Один из уровней длиннее допустимого.
    #[error("segment '{segment}' is {len} bytes, max {max}")]
    SegmentTooLong {
        segment: String,
        len: usize,
        max: usize,
    },
    /// Пустой уровень (`a//b`, `/a`).
    #[error("empty segment in topic '{topic}'")]
    EmptySegment { topic: String },
    /// Зарезервированный символ внутри уровня.
    #[error("reserved character '{ch}' in topic '{topic}'")]
    ReservedChar { topic: String, ch: char },
}

impl ErrorExt for TopicError {
    fn status_code(&self) -> StatusCode {
        StatusCode::ParameterInvalid
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn metrics_tags(&self) -> Vec<(&'static str, String)> {
        let mut tags = vec![
            ("error_type", "topic".to_string()),
            ("status_code", self.status_code().name().to_string()),
        ];

        match self {
            Self::TooLong { len, .. } | Self::SegmentTooLong { len, .. } => {
                tags.push(("length", len.to_string()));
            }
            Self::ReservedChar { ch, .. } => {
                tags.push(("char", ch.to_string()));
            }
            Self::EmptySegment { .. } => {}
        }

        tags
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topic_error_is_parameter_invalid() {
        let err = TopicError::SegmentTooLong {
            segment: "abcdefgh".to_string(),
            len: 8,
            max: 7,
        };
        assert_eq!(err.status_code(), StatusCode::ParameterInvalid);
        assert!(err.to_string().contains("abcdefgh"));
        assert!(err.metrics_tags().iter().any(|(k, v)| *k == "length" && v == "8"));
    }

    #[test]
    fn test_reserved_char_message() {
        let err = TopicError::ReservedChar {
            topic: "a/b?c".to_string(),
            ch: '?',
        };
        assert_eq!(err.to_string(), "reserved character '?' in topic 'a/b?c'");
    }
}
