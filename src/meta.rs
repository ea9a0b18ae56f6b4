//! Проверка и приведение значений по метаданным топика.
//!
//! Метаданные: JSON-объект вида
//!
//! ```json
//! {"dtype": "u8", "brief": "Mode", "default": 2,
//!  "options": [[0, "off"], [1, "on", "enable"]], "range": [0, 10]}
//! ```
//!
//! Первый элемент каждого списка в `options`: каноническое значение,
//! остальные: его псевдонимы. `range` задаёт включительные границы.

use gaugebus_error::StatusCode;
use serde::Deserialize;
use tracing::debug;

use crate::message::{Value, ValueRef, ValueType};

/// Проверка значения по метаданным.
///
/// `Ok(None)`: значение принято без изменений, `Ok(Some(v))`: принято
/// после приведения к `v`, `Err(code)`: отклонено.
pub trait MetaValidator: Send {
    fn validate(
        &self,
        meta: &str,
        value: ValueRef<'_>,
    ) -> Result<Option<Value>, StatusCode>;
}

/// Проверка по JSON-метаданным через `serde_json`.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonMetaValidator;

#[derive(Debug, Deserialize)]
struct MetaDoc {
    #[serde(default)]
    dtype: Option<String>,
    #[serde(default)]
    default: Option<serde_json::Value>,
    #[serde(default)]
    options: Option<Vec<serde_json::Value>>,
    #[serde(default)]
    range: Option<Vec<f64>>,
}

impl MetaDoc {
    fn parse(meta: &str) -> Result<Self, StatusCode> {
        serde_json::from_str(meta).map_err(|err| {
            debug!(%err, "metadata parse failed");
            StatusCode::ParameterInvalid
        })
    }

    fn dtype(&self) -> Option<&str> {
        self.dtype.as_deref()
    }

    /// Канонические значения вместе с псевдонимами.
    fn option_entries(&self) -> Vec<Vec<Value>> {
        self.options
            .iter()
            .flatten()
            .map(|entry| match entry {
                serde_json::Value::Array(items) => items.iter().map(Value::from_json).collect(),
                single => vec![Value::from_json(single)],
            })
            .filter(|entry: &Vec<Value>| !entry.is_empty())
            .collect()
    }
}

////////////////////////////////////////////////////////////////////////////////
// Собственные методы
////////////////////////////////////////////////////////////////////////////////

impl JsonMetaValidator {
    pub fn new() -> Self {
        Self
    }
}

/// Проверяет, что метаданные: корректный JSON-объект.
pub fn syntax_check(meta: &str) -> Result<(), StatusCode> {
    MetaDoc::parse(meta).map(|_| ())
}

/// Тип значения из поля `dtype`. `None`, если поле отсутствует или тип не
/// приводится (`obj`, `none` и т.п.).
pub fn dtype(meta: &str) -> Result<Option<ValueType>, StatusCode> {
    Ok(MetaDoc::parse(meta)?
        .dtype()
        .and_then(ValueType::from_dtype))
}

/// Значение по умолчанию, приведённое к `dtype`. `None`, если его нет.
pub fn default_value(meta: &str) -> Result<Option<Value>, StatusCode> {
    let doc = MetaDoc::parse(meta)?;
    let Some(default) = doc.default.as_ref() else {
        return Ok(None);
    };
    let value = Value::from_json(default);
    match doc.dtype() {
        Some(dtype) => coerce(dtype, value.view()).map(Some),
        None => Ok(Some(value)),
    }
}

fn coerce(
    dtype: &str,
    value: ValueRef<'_>,
) -> Result<Value, StatusCode> {
    if dtype == "bool" {
        return value.to_bool().map(Value::from);
    }
    match ValueType::from_dtype(dtype) {
        Some(ty) => value.as_type(ty),
        None => Ok(value.to_value()),
    }
}

fn matches_option(
    candidate: ValueRef<'_>,
    option: &Value,
) -> bool {
    match (candidate, option.view()) {
        (ValueRef::Str(a), ValueRef::Str(b)) => a == b,
        (a, b) => a.equiv(&b),
    }
}

fn lookup_option(
    entries: &[Vec<Value>],
    candidate: ValueRef<'_>,
) -> Option<Value> {
    entries
        .iter()
        .find(|entry| entry.iter().any(|opt| matches_option(candidate, opt)))
        .and_then(|entry| entry.first().cloned())
}

impl MetaValidator for JsonMetaValidator {
    fn validate(
        &self,
        meta: &str,
        value: ValueRef<'_>,
    ) -> Result<Option<Value>, StatusCode> {
        let doc = MetaDoc::parse(meta)?;
        let dtype = doc.dtype().unwrap_or("");
        let entries = doc.option_entries();

        let result = if entries.is_empty() {
            coerce(dtype, value)?
        } else {
            let canonical = match lookup_option(&entries, value) {
                Some(v) => v,
                None => {
                    let coerced = coerce(dtype, value)?;
                    lookup_option(&entries, coerced.view()).ok_or(StatusCode::ParameterInvalid)?
                }
            };
            coerce(dtype, canonical.view())?
        };

        if let Some(range) = doc.range.as_deref() {
            if let ([min, max, ..], Some(v)) = (range, result.view().as_f64()) {
                if v < *min || v > *max {
                    debug!(value = v, min, max, "value outside of range");
                    return Err(StatusCode::ParameterInvalid);
                }
            }
        }

        if result.view() == value {
            Ok(None)
        } else {
            Ok(Some(result))
        }
    }
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;

    const META1: &str = r#"{
        "dtype": "u8",
        "brief": "Number selection.",
        "default": 2,
        "options": [
            [0, "zero"],
            [1, "one"],
            [2, "two"],
            [3, "three", "_3_"],
            [4, "four"]
        ]
    }"#;

    const META_NO_DEFAULT: &str = r#"{"dtype": "u8", "brief": "Number selection."}"#;

    const META_RANGE: &str = r#"{"dtype": "i32", "range": [-5, 5], "default": 0}"#;

    fn validate(
        meta: &str,
        value: ValueRef<'_>,
    ) -> Result<Option<Value>, StatusCode> {
        JsonMetaValidator::new().validate(meta, value)
    }

    /// Тест проверяет разбор типа и значения по умолчанию.
    #[test]
    fn test_dtype_and_default() {
        assert_eq!(syntax_check(META1), Ok(()));
        assert_eq!(dtype(META1), Ok(Some(ValueType::U8)));
        assert_eq!(default_value(META1), Ok(Some(Value::U8(2))));
        assert_eq!(default_value(META_NO_DEFAULT), Ok(None));
        assert_eq!(syntax_check("{not json"), Err(StatusCode::ParameterInvalid));
    }

    /// Тест проверяет, что допустимое значение принимается без изменений.
    #[test]
    fn test_valid_value_unchanged() {
        assert_eq!(validate(META1, ValueRef::U8(3)), Ok(None));
    }

    /// Тест проверяет приведение псевдонимов и строк к каноническому
    /// значению.
    #[test]
    fn test_option_aliases() {
        assert_eq!(validate(META1, ValueRef::Str("three")), Ok(Some(Value::U8(3))));
        assert_eq!(validate(META1, ValueRef::Str("_3_")), Ok(Some(Value::U8(3))));
        assert_eq!(validate(META1, ValueRef::Str("2")), Ok(Some(Value::U8(2))));
        assert_eq!(validate(META1, ValueRef::U32(4)), Ok(Some(Value::U8(4))));
    }

    /// Тест проверяет отказ для значения вне списка вариантов.
    #[test]
    fn test_invalid_option() {
        assert_eq!(
            validate(META1, ValueRef::Str("__invalid__")),
            Err(StatusCode::ParameterInvalid)
        );
        assert_eq!(validate(META1, ValueRef::U8(9)), Err(StatusCode::ParameterInvalid));
    }

    /// Тест проверяет включительные границы диапазона.
    #[test]
    fn test_range_is_inclusive() {
        assert_eq!(validate(META_RANGE, ValueRef::I32(5)), Ok(None));
        assert_eq!(validate(META_RANGE, ValueRef::I32(-5)), Ok(None));
        assert_eq!(validate(META_RANGE, ValueRef::U8(6)), Err(StatusCode::ParameterInvalid));
        assert_eq!(validate(META_RANGE, ValueRef::I64(-2)), Ok(Some(Value::I32(-2))));
    }

    /// Тест проверяет логический тип.
    #[test]
    fn test_bool_dtype() {
        let meta = r#"{"dtype": "bool"}"#;
        assert_eq!(validate(meta, ValueRef::Str("on")), Ok(Some(Value::U8(1))));
        assert_eq!(validate(meta, ValueRef::U8(0)), Ok(None));
        assert_eq!(validate(meta, ValueRef::Bin(&[1])), Err(StatusCode::ParameterInvalid));
    }

    /// Тест проверяет, что типы без приведения пропускают значение как есть.
    #[test]
    fn test_untyped_meta_accepts_anything() {
        let meta = r#"{"dtype": "obj"}"#;
        assert_eq!(validate(meta, ValueRef::Json("{\"a\":1}")), Ok(None));
        assert_eq!(validate(r#"{"dtype": "str"}"#, ValueRef::Str("x")), Ok(None));
    }
}
