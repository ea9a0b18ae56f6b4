//! Типизированное значение топика.
//!
//! [`Value`] владеет своими данными: `Cow::Borrowed` означает константу со
//! статическим временем жизни, `Cow::Owned` означает данные в куче.
//! [`ValueRef`] является заимствованным представлением, которое возвращает
//! конверт.

use std::{borrow::Cow, fmt};

use bitflags::bitflags;
use gaugebus_error::StatusCode;

bitflags! {
    /// Флаги значения в конверте.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ValueFlags: u8 {
        /// Значение сохраняется в дереве топиков.
        const RETAIN = 1;
        /// Данные указателя: константа со статическим временем жизни.
        const CONST = 2;
    }
}

impl ValueFlags {
    /// Короткая метка флагов: `"   "`, `".R "`, `".C "` или `".RC"`.
    pub fn label(self) -> &'static str {
        match (
            self.contains(Self::RETAIN),
            self.contains(Self::CONST),
        ) {
            (false, false) => "   ",
            (true, false) => ".R ",
            (false, true) => ".C ",
            (true, true) => ".RC",
        }
    }
}

/// Тип значения.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueType {
    Null,
    Str,
    Json,
    Bin,
    F32,
    F64,
    U8,
    U16,
    U32,
    U64,
    I8,
    I16,
    I32,
    I64,
}

impl ValueType {
    /// Трёхсимвольное имя типа.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Null => "nul",
            Self::Str => "str",
            Self::Json => "jsn",
            Self::Bin => "bin",
            Self::F32 => "f32",
            Self::F64 => "f64",
            Self::U8 => " u8",
            Self::U16 => "u16",
            Self::U32 => "u32",
            Self::U64 => "u64",
            Self::I8 => " i8",
            Self::I16 => "i16",
            Self::I32 => "i32",
            Self::I64 => "i64",
        }
    }

    /// Строка, JSON или бинарные данные.
    pub const fn is_pointer(self) -> bool {
        matches!(self, Self::Str | Self::Json | Self::Bin)
    }

    pub const fn is_integer(self) -> bool {
        matches!(
            self,
            Self::U8 | Self::U16 | Self::U32 | Self::U64 | Self::I8 | Self::I16 | Self::I32 | Self::I64
        )
    }

    pub const fn is_float(self) -> bool {
        matches!(self, Self::F32 | Self::F64)
    }

    /// Тип по строке `dtype` из метаданных. `bool` хранится как `u8`.
    pub fn from_dtype(dtype: &str) -> Option<Self> {
        Some(match dtype {
            "u8" | "bool" => Self::U8,
            "u16" => Self::U16,
            "u32" => Self::U32,
            "u64" => Self::U64,
            "i8" => Self::I8,
            "i16" => Self::I16,
            "i32" => Self::I32,
            "i64" => Self::I64,
            "f32" => Self::F32,
            "f64" => Self::F64,
            "str" => Self::Str,
            "json" => Self::Json,
            "bin" => Self::Bin,
            _ => return None,
        })
    }
}

/// Значение с собственными данными.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    #[default]
    Null,
    Str(Cow<'static, str>),
    Json(Cow<'static, str>),
    Bin(Cow<'static, [u8]>),
    F32(f32),
    F64(f64),
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    I8(i8),
    I16(i16),
    I32(i32),
    I64(i64),
}

/// Заимствованное значение.
///
/// Производное `PartialEq` сравнивает тип и содержимое байт в байт, числа с
/// плавающей точкой: оператором `==`.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum ValueRef<'a> {
    #[default]
    Null,
    Str(&'a str),
    Json(&'a str),
    Bin(&'a [u8]),
    F32(f32),
    F64(f64),
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    I8(i8),
    I16(i16),
    I32(i32),
    I64(i64),
}

////////////////////////////////////////////////////////////////////////////////
// Собственные методы Value
////////////////////////////////////////////////////////////////////////////////

impl Value {
    /// JSON-документ из строки.
    pub fn json(s: impl Into<Cow<'static, str>>) -> Self {
        Self::Json(s.into())
    }

    pub fn view(&self) -> ValueRef<'_> {
        match self {
            Self::Null => ValueRef::Null,
            Self::Str(s) => ValueRef::Str(s),
            Self::Json(s) => ValueRef::Json(s),
            Self::Bin(b) => ValueRef::Bin(b),
            Self::F32(v) => ValueRef::F32(*v),
            Self::F64(v) => ValueRef::F64(*v),
            Self::U8(v) => ValueRef::U8(*v),
            Self::U16(v) => ValueRef::U16(*v),
            Self::U32(v) => ValueRef::U32(*v),
            Self::U64(v) => ValueRef::U64(*v),
            Self::I8(v) => ValueRef::I8(*v),
            Self::I16(v) => ValueRef::I16(*v),
            Self::I32(v) => ValueRef::I32(*v),
            Self::I64(v) => ValueRef::I64(*v),
        }
    }

    pub fn value_type(&self) -> ValueType {
        self.view().value_type()
    }

    /// `true` для строк и бинарных данных со статическим временем жизни.
    pub fn is_const(&self) -> bool {
        matches!(
            self,
            Self::Str(Cow::Borrowed(_)) | Self::Json(Cow::Borrowed(_)) | Self::Bin(Cow::Borrowed(_))
        )
    }

    /// Значение кода возврата, если это `i32`.
    pub fn as_return_code(&self) -> Option<i32> {
        match self {
            Self::I32(v) => Some(*v),
            _ => None,
        }
    }

    pub fn to_bool(&self) -> Result<bool, StatusCode> {
        self.view().to_bool()
    }

    pub fn as_type(
        &self,
        ty: ValueType,
    ) -> Result<Value, StatusCode> {
        self.view().as_type(ty)
    }

    /// Значение из JSON-скаляра. Массивы и объекты становятся `Json`.
    pub fn from_json(v: &serde_json::Value) -> Value {
        match v {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::U8(u8::from(*b)),
            serde_json::Value::Number(n) => {
                if let Some(u) = n.as_u64() {
                    Value::U64(u)
                } else if let Some(i) = n.as_i64() {
                    Value::I64(i)
                } else {
                    Value::F64(n.as_f64().unwrap_or(f64::NAN))
                }
            }
            serde_json::Value::String(s) => Value::Str(Cow::Owned(s.clone())),
            other => Value::Json(Cow::Owned(other.to_string())),
        }
    }
}

////////////////////////////////////////////////////////////////////////////////
// Собственные методы ValueRef
////////////////////////////////////////////////////////////////////////////////

impl<'a> ValueRef<'a> {
    pub fn value_type(&self) -> ValueType {
        match self {
            Self::Null => ValueType::Null,
            Self::Str(_) => ValueType::Str,
            Self::Json(_) => ValueType::Json,
            Self::Bin(_) => ValueType::Bin,
            Self::F32(_) => ValueType::F32,
            Self::F64(_) => ValueType::F64,
            Self::U8(_) => ValueType::U8,
            Self::U16(_) => ValueType::U16,
            Self::U32(_) => ValueType::U32,
            Self::U64(_) => ValueType::U64,
            Self::I8(_) => ValueType::I8,
            Self::I16(_) => ValueType::I16,
            Self::I32(_) => ValueType::I32,
            Self::I64(_) => ValueType::I64,
        }
    }

    /// Копия значения с собственными данными.
    pub fn to_value(&self) -> Value {
        match *self {
            Self::Null => Value::Null,
            Self::Str(s) => Value::Str(Cow::Owned(s.to_owned())),
            Self::Json(s) => Value::Json(Cow::Owned(s.to_owned())),
            Self::Bin(b) => Value::Bin(Cow::Owned(b.to_vec())),
            Self::F32(v) => Value::F32(v),
            Self::F64(v) => Value::F64(v),
            Self::U8(v) => Value::U8(v),
            Self::U16(v) => Value::U16(v),
            Self::U32(v) => Value::U32(v),
            Self::U64(v) => Value::U64(v),
            Self::I8(v) => Value::I8(v),
            Self::I16(v) => Value::I16(v),
            Self::I32(v) => Value::I32(v),
            Self::I64(v) => Value::I64(v),
        }
    }

    /// Байты строки, JSON или бинарных данных.
    pub fn as_bytes(&self) -> Option<&'a [u8]> {
        match *self {
            Self::Str(s) | Self::Json(s) => Some(s.as_bytes()),
            Self::Bin(b) => Some(b),
            _ => None,
        }
    }

    /// Расширяет числа до 64 бит: беззнаковые до `u64`, знаковые до `i64`,
    /// `f32` до `f64`. Остальные типы не меняются.
    pub fn widen(&self) -> ValueRef<'a> {
        match *self {
            Self::U8(v) => Self::U64(v.into()),
            Self::U16(v) => Self::U64(v.into()),
            Self::U32(v) => Self::U64(v.into()),
            Self::I8(v) => Self::I64(v.into()),
            Self::I16(v) => Self::I64(v.into()),
            Self::I32(v) => Self::I64(v.into()),
            Self::F32(v) => Self::F64(v.into()),
            other => other,
        }
    }

    /// Равенство после расширения. `u64` и `i64` равны, если знаковое
    /// значение неотрицательно и совпадает.
    pub fn equiv(
        &self,
        other: &ValueRef<'_>,
    ) -> bool {
        match (self.widen(), other.widen()) {
            (Self::U64(a), ValueRef::I64(b)) | (Self::I64(b), ValueRef::U64(a)) => {
                b >= 0 && a == b as u64
            }
            (a, b) => a == b,
        }
    }

    /// Интерпретация значения как логического.
    pub fn to_bool(&self) -> Result<bool, StatusCode> {
        match *self {
            Self::Str(s) | Self::Json(s) => parse_bool(s),
            Self::F32(v) => Ok(v != 0.0),
            Self::F64(v) => Ok(v != 0.0),
            Self::Null | Self::Bin(_) => Err(StatusCode::ParameterInvalid),
            other => Ok(other.integer().is_some_and(|v| v != 0)),
        }
    }

    /// Преобразует значение к типу `ty` с проверкой диапазона.
    ///
    /// Строки с числами разбираются; дробные числа в целые округляются.
    pub fn as_type(
        &self,
        ty: ValueType,
    ) -> Result<Value, StatusCode> {
        if self.value_type() == ty {
            return Ok(self.to_value());
        }
        match ty {
            ValueType::Null => Err(StatusCode::ParameterInvalid),
            ValueType::Str => match *self {
                Self::Json(s) => Ok(Value::Str(Cow::Owned(s.to_owned()))),
                _ => Err(StatusCode::ParameterInvalid),
            },
            ValueType::Json => match *self {
                Self::Str(s) => Ok(Value::Json(Cow::Owned(s.to_owned()))),
                _ => Err(StatusCode::ParameterInvalid),
            },
            ValueType::Bin => Err(StatusCode::ParameterInvalid),
            ValueType::F32 => self.float().map(|v| Value::F32(v as f32)),
            ValueType::F64 => self.float().map(Value::F64),
            _ => integer_as(self.integer_lossy()?, ty),
        }
    }

    fn integer(&self) -> Option<i128> {
        match *self {
            Self::U8(v) => Some(v.into()),
            Self::U16(v) => Some(v.into()),
            Self::U32(v) => Some(v.into()),
            Self::U64(v) => Some(v.into()),
            Self::I8(v) => Some(v.into()),
            Self::I16(v) => Some(v.into()),
            Self::I32(v) => Some(v.into()),
            Self::I64(v) => Some(v.into()),
            _ => None,
        }
    }

    fn integer_lossy(&self) -> Result<i128, StatusCode> {
        if let Some(v) = self.integer() {
            return Ok(v);
        }
        let f = match *self {
            Self::Str(s) => {
                let s = s.trim();
                if let Ok(v) = parse_int(s) {
                    return Ok(v);
                }
                s.parse::<f64>().map_err(|_| StatusCode::ParameterInvalid)?
            }
            Self::F32(v) => v.into(),
            Self::F64(v) => v,
            _ => return Err(StatusCode::ParameterInvalid),
        };
        if !f.is_finite() {
            return Err(StatusCode::ParameterInvalid);
        }
        Ok(f.round() as i128)
    }

    fn float(&self) -> Result<f64, StatusCode> {
        match *self {
            Self::F32(v) => Ok(v.into()),
            Self::F64(v) => Ok(v),
            Self::Str(s) => s.trim().parse().map_err(|_| StatusCode::ParameterInvalid),
            other => other
                .integer()
                .map(|v| v as f64)
                .ok_or(StatusCode::ParameterInvalid),
        }
    }

    /// Значение как `f64`, если это число.
    pub fn as_f64(&self) -> Option<f64> {
        match self.value_type() {
            ValueType::F32 | ValueType::F64 => self.float().ok(),
            ty if ty.is_integer() => self.integer().map(|v| v as f64),
            _ => None,
        }
    }
}

fn parse_bool(s: &str) -> Result<bool, StatusCode> {
    match s.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "on" | "yes" | "enable" | "enabled" => Ok(true),
        "0" | "false" | "off" | "no" | "disable" | "disabled" => Ok(false),
        _ => Err(StatusCode::ParameterInvalid),
    }
}

fn parse_int(s: &str) -> Result<i128, StatusCode> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => i128::from_str_radix(hex, 16),
        None => s.parse::<i128>(),
    };
    parsed.map_err(|_| StatusCode::ParameterInvalid)
}

fn integer_as(
    v: i128,
    ty: ValueType,
) -> Result<Value, StatusCode> {
    let invalid = |_| StatusCode::ParameterInvalid;
    Ok(match ty {
        ValueType::U8 => Value::U8(v.try_into().map_err(invalid)?),
        ValueType::U16 => Value::U16(v.try_into().map_err(invalid)?),
        ValueType::U32 => Value::U32(v.try_into().map_err(invalid)?),
        ValueType::U64 => Value::U64(v.try_into().map_err(invalid)?),
        ValueType::I8 => Value::I8(v.try_into().map_err(invalid)?),
        ValueType::I16 => Value::I16(v.try_into().map_err(invalid)?),
        ValueType::I32 => Value::I32(v.try_into().map_err(invalid)?),
        ValueType::I64 => Value::I64(v.try_into().map_err(invalid)?),
        _ => return Err(StatusCode::ParameterInvalid),
    })
}

////////////////////////////////////////////////////////////////////////////////
// Общие реализации трейтов
////////////////////////////////////////////////////////////////////////////////

impl fmt::Display for ValueRef<'_> {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        match self {
            Self::Null => f.write_str("null"),
            Self::Str(s) => f.write_str(s),
            Self::Json(s) => f.write_str(s),
            Self::Bin(b) => write!(f, "<{} bytes>", b.len()),
            Self::F32(v) => write!(f, "{v}"),
            Self::F64(v) => write!(f, "{v}"),
            Self::U8(v) => write!(f, "{v}"),
            Self::U16(v) => write!(f, "{v}"),
            Self::U32(v) => write!(f, "{v}"),
            Self::U64(v) => write!(f, "{v}"),
            Self::I8(v) => write!(f, "{v}"),
            Self::I16(v) => write!(f, "{v}"),
            Self::I32(v) => write!(f, "{v}"),
            Self::I64(v) => write!(f, "{v}"),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        self.view().fmt(f)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::U8(u8::from(v))
    }
}

impl From<&'static str> for Value {
    fn from(v: &'static str) -> Self {
        Value::Str(Cow::Borrowed(v))
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(Cow::Owned(v))
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Bin(Cow::Owned(v))
    }
}

impl From<&'static [u8]> for Value {
    fn from(v: &'static [u8]) -> Self {
        Value::Bin(Cow::Borrowed(v))
    }
}

impl From<()> for Value {
    fn from(_: ()) -> Self {
        Value::Null
    }
}

impl From<ValueRef<'_>> for Value {
    fn from(v: ValueRef<'_>) -> Self {
        v.to_value()
    }
}

macro_rules! impl_from_number {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for Value {
                fn from(v: $ty) -> Self {
                    Value::$variant(v)
                }
            }
        )*
    };
}

impl_from_number! {
    f32 => F32,
    f64 => F64,
    u8 => U8,
    u16 => U16,
    u32 => U32,
    u64 => U64,
    i8 => I8,
    i16 => I16,
    i32 => I32,
    i64 => I64,
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    /// Тест проверяет, что сравнение учитывает тип и содержимое.
    #[test]
    fn test_eq_is_type_and_bytes() {
        assert_eq!(ValueRef::U32(5), ValueRef::U32(5));
        assert_ne!(ValueRef::U32(5), ValueRef::U16(5));
        assert_ne!(ValueRef::Str("a"), ValueRef::Json("a"));
        assert_eq!(ValueRef::Bin(&[1, 2]), ValueRef::Bin(&[1, 2]));
        assert_eq!(Value::from("x"), Value::from("x".to_string()));
    }

    /// Тест проверяет эквивалентность после расширения.
    #[test]
    fn test_equiv() {
        assert!(ValueRef::U8(7).equiv(&ValueRef::U64(7)));
        assert!(ValueRef::I8(7).equiv(&ValueRef::U32(7)));
        assert!(!ValueRef::I8(-1).equiv(&ValueRef::U64(u64::MAX)));
        assert!(ValueRef::F32(0.5).equiv(&ValueRef::F64(0.5)));
        assert!(!ValueRef::F64(1.0).equiv(&ValueRef::U8(1)));
    }

    /// Тест проверяет преобразование типов с проверкой диапазона.
    #[rstest]
    #[case(ValueRef::U32(200), ValueType::U8, Some(Value::U8(200)))]
    #[case(ValueRef::U32(300), ValueType::U8, None)]
    #[case(ValueRef::I32(-1), ValueType::U16, None)]
    #[case(ValueRef::Str("42"), ValueType::I16, Some(Value::I16(42)))]
    #[case(ValueRef::Str("0x10"), ValueType::U8, Some(Value::U8(16)))]
    #[case(ValueRef::Str("abc"), ValueType::U8, None)]
    #[case(ValueRef::F64(2.6), ValueType::I32, Some(Value::I32(3)))]
    #[case(ValueRef::U8(3), ValueType::F64, Some(Value::F64(3.0)))]
    #[case(ValueRef::Str("1.5"), ValueType::F32, Some(Value::F32(1.5)))]
    #[case(ValueRef::Str("{}"), ValueType::Json, Some(Value::json("{}")))]
    #[case(ValueRef::Bin(&[1]), ValueType::U8, None)]
    fn test_as_type(
        #[case] src: ValueRef<'static>,
        #[case] ty: ValueType,
        #[case] expected: Option<Value>,
    ) {
        assert_eq!(src.as_type(ty).ok(), expected);
    }

    /// Тест проверяет разбор логических значений.
    #[test]
    fn test_to_bool() {
        assert_eq!(ValueRef::Str("ON").to_bool(), Ok(true));
        assert_eq!(ValueRef::Str("disable").to_bool(), Ok(false));
        assert_eq!(ValueRef::U16(0).to_bool(), Ok(false));
        assert_eq!(ValueRef::I64(-3).to_bool(), Ok(true));
        assert_eq!(ValueRef::Str("maybe").to_bool(), Err(StatusCode::ParameterInvalid));
        assert_eq!(ValueRef::Bin(&[]).to_bool(), Err(StatusCode::ParameterInvalid));
    }

    /// Тест проверяет имена типов и метки флагов.
    #[test]
    fn test_type_names_and_flag_labels() {
        assert_eq!(ValueType::U8.name(), " u8");
        assert_eq!(ValueType::Json.name(), "jsn");
        assert_eq!(ValueFlags::RETAIN.label(), ".R ");
        assert_eq!((ValueFlags::RETAIN | ValueFlags::CONST).label(), ".RC");
        assert_eq!(ValueFlags::empty().label(), "   ");
    }

    /// Тест проверяет, что заимствованные строки считаются константами.
    #[test]
    fn test_const_detection() {
        assert!(Value::from("static").is_const());
        assert!(!Value::from(String::from("heap")).is_const());
        assert!(!Value::U8(1).is_const());
    }

    /// Тест проверяет преобразование JSON-скаляров.
    #[test]
    fn test_from_json() {
        assert_eq!(Value::from_json(&serde_json::json!(3)), Value::U64(3));
        assert_eq!(Value::from_json(&serde_json::json!(-3)), Value::I64(-3));
        assert_eq!(Value::from_json(&serde_json::json!(0.25)), Value::F64(0.25));
        assert_eq!(Value::from_json(&serde_json::json!(true)), Value::U8(1));
        assert_eq!(Value::from_json(&serde_json::json!("on")), Value::from("on".to_string()));
        assert_eq!(Value::from_json(&serde_json::json!([1, 2])), Value::json("[1,2]"));
    }
}
