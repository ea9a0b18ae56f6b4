//! Имена топиков.
//!
//! Топик: путь из уровней, разделённых `/`. Первый уровень `_` задаёт
//! локальные команды шины, `@`: команды драйвера. Уровень, начинающийся с
//! `!`, обозначает действие и никогда не сохраняется. Последний символ может
//! быть одним из служебных суффиксов (`%`, `$`, `&`, `?`, `#`).

use std::{fmt, str::FromStr};

use gaugebus_error::TopicError;

/// Размер буфера топика в байтах, включая суффикс и терминатор.
pub const TOPIC_LENGTH_MAX: usize = 64;
/// Размер буфера одного уровня, включая терминатор.
pub const TOPIC_LENGTH_PER_LEVEL: usize = 8;
/// Максимальная длина строки топика вместе с суффиксом.
pub const TOPIC_STR_MAX: usize = TOPIC_LENGTH_MAX - 1;
/// Максимальная длина пути без суффикса.
pub const TOPIC_PATH_MAX: usize = TOPIC_LENGTH_MAX - 2;
/// Максимальная длина одного уровня.
pub const SEGMENT_MAX: usize = TOPIC_LENGTH_PER_LEVEL - 1;

/// Первый уровень локальных команд шины.
pub const LOCAL_PREFIX: char = '_';
/// Первый уровень команд драйвера.
pub const DRIVER_PREFIX: char = '@';
/// Первый символ уровня-действия.
pub const ACTION_PREFIX: char = '!';

const RESERVED: &[char] = &['/', '?', '#', '$', '\'', '"', '\\', '`', '&', '@', '%'];

/// Служебный суффикс топика.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TopicSuffix {
    /// `%`: запрос метаданных.
    MetadataReq,
    /// `$`: метаданные (JSON).
    MetadataRsp,
    /// `&`: запрос значения.
    QueryReq,
    /// `?`: ответ на запрос значения.
    QueryRsp,
    /// `#`: код возврата (`i32`, `0`: успех).
    ReturnCode,
}

impl TopicSuffix {
    pub const fn as_char(self) -> char {
        match self {
            Self::MetadataReq => '%',
            Self::MetadataRsp => '$',
            Self::QueryReq => '&',
            Self::QueryRsp => '?',
            Self::ReturnCode => '#',
        }
    }

    pub fn from_char(c: char) -> Option<Self> {
        match c {
            '%' => Some(Self::MetadataReq),
            '$' => Some(Self::MetadataRsp),
            '&' => Some(Self::QueryReq),
            '?' => Some(Self::QueryRsp),
            '#' => Some(Self::ReturnCode),
            _ => None,
        }
    }
}

/// Проверенное имя топика.
///
/// Хранит строку вместе с суффиксом (если он есть). Путь без суффикса
/// всегда короче [`TOPIC_PATH_MAX`], поэтому любой суффикс можно добавить
/// без повторной проверки.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Topic {
    raw: String,
}

////////////////////////////////////////////////////////////////////////////////
// Собственные методы
////////////////////////////////////////////////////////////////////////////////

impl Topic {
    /// Корневой топик `""`.
    pub fn root() -> Self {
        Self::default()
    }

    /// Разбирает и проверяет строку топика.
    ///
    /// Одиночный завершающий `/` отбрасывается (`"@/"` → `"@"`).
    pub fn parse(s: &str) -> Result<Self, TopicError> {
        let s = s.strip_suffix('/').unwrap_or(s);
        if s.len() > TOPIC_STR_MAX {
            return Err(TopicError::TooLong {
                topic: s.to_string(),
                len: s.len(),
                max: TOPIC_STR_MAX,
            });
        }
        let (path, _) = split_suffix(s);
        if path.len() > TOPIC_PATH_MAX {
            return Err(TopicError::TooLong {
                topic: s.to_string(),
                len: path.len(),
                max: TOPIC_PATH_MAX,
            });
        }
        if !path.is_empty() {
            for (idx, segment) in path.split('/').enumerate() {
                validate_segment(s, idx, segment)?;
            }
        }
        Ok(Self { raw: s.to_string() })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn len(&self) -> usize {
        self.raw.len()
    }

    pub fn is_empty(&self) -> bool {
        self.raw.is_empty()
    }

    /// Корень дерева: пустой путь без суффикса.
    pub fn is_root(&self) -> bool {
        self.raw.is_empty()
    }

    pub fn suffix(&self) -> Option<TopicSuffix> {
        split_suffix(&self.raw).1
    }

    /// Путь без суффикса.
    pub fn path(&self) -> &str {
        split_suffix(&self.raw).0
    }

    /// Тот же путь с заданным суффиксом (прежний суффикс заменяется).
    pub fn with_suffix(
        &self,
        suffix: TopicSuffix,
    ) -> Topic {
        let mut raw = String::with_capacity(self.path().len() + 1);
        raw.push_str(self.path());
        raw.push(suffix.as_char());
        Topic { raw }
    }

    /// Тот же путь без суффикса.
    pub fn without_suffix(&self) -> Topic {
        Topic {
            raw: self.path().to_string(),
        }
    }

    /// Добавляет уровень в конец пути. Суффикс, если он был, отбрасывается.
    pub fn join(
        &self,
        segment: &str,
    ) -> Result<Topic, TopicError> {
        let path = self.path();
        if path.is_empty() {
            Topic::parse(segment)
        } else {
            Topic::parse(&format!("{path}/{segment}"))
        }
    }

    /// Путь без последнего уровня; `None` для корня.
    pub fn parent(&self) -> Option<Topic> {
        let path = self.path();
        if path.is_empty() {
            return None;
        }
        let raw = match path.rfind('/') {
            Some(idx) => path[..idx].to_string(),
            None => String::new(),
        };
        Some(Topic { raw })
    }

    /// Уровни пути (без суффикса). У корня уровней нет.
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.path().split('/').filter(|s| !s.is_empty())
    }

    /// Последний уровень пути; пустая строка для корня.
    pub fn last_segment(&self) -> &str {
        let path = self.path();
        match path.rfind('/') {
            Some(idx) => &path[idx + 1..],
            None => path,
        }
    }

    /// Локальная команда шины (`_/...`).
    pub fn is_local(&self) -> bool {
        self.raw.starts_with(LOCAL_PREFIX)
    }

    /// Команда драйвера (`@/...`).
    pub fn is_driver(&self) -> bool {
        self.raw.starts_with(DRIVER_PREFIX)
    }

    /// Действие: последний уровень начинается с `!`.
    pub fn is_action(&self) -> bool {
        self.last_segment().starts_with(ACTION_PREFIX)
    }

    /// Префикс устройства `{backend}/{model}/{serial}`.
    ///
    /// Возвращает `None` для команд и для путей короче трёх уровней.
    pub fn device_prefix(&self) -> Option<&str> {
        if self.is_local() || self.is_driver() {
            return None;
        }
        let path = self.path();
        let mut separators = 0;
        for (idx, ch) in path.char_indices() {
            if ch == '/' {
                separators += 1;
                if separators == 3 {
                    return Some(&path[..idx]);
                }
            }
        }
        (separators == 2).then_some(path)
    }

    /// `true`, если путь совпадает с `prefix` или лежит под ним.
    pub fn starts_with_topic(
        &self,
        prefix: &Topic,
    ) -> bool {
        let path = self.path();
        let prefix = prefix.path();
        if prefix.is_empty() || path == prefix {
            return true;
        }
        path.len() > prefix.len() && path.starts_with(prefix) && path.as_bytes()[prefix.len()] == b'/'
    }
}

fn split_suffix(s: &str) -> (&str, Option<TopicSuffix>) {
    match s.chars().last().and_then(TopicSuffix::from_char) {
        Some(suffix) => (&s[..s.len() - 1], Some(suffix)),
        None => (s, None),
    }
}

fn validate_segment(
    topic: &str,
    idx: usize,
    segment: &str,
) -> Result<(), TopicError> {
    if segment.is_empty() {
        return Err(TopicError::EmptySegment {
            topic: topic.to_string(),
        });
    }
    if segment.len() > SEGMENT_MAX {
        return Err(TopicError::SegmentTooLong {
            segment: segment.to_string(),
            len: segment.len(),
            max: SEGMENT_MAX,
        });
    }
    if idx == 0 && segment.len() == 1 && segment.starts_with(DRIVER_PREFIX) {
        return Ok(());
    }
    match segment.chars().find(|c| RESERVED.contains(c)) {
        Some(ch) => Err(TopicError::ReservedChar {
            topic: topic.to_string(),
            ch,
        }),
        None => Ok(()),
    }
}

////////////////////////////////////////////////////////////////////////////////
// Общие реализации трейтов для Topic
////////////////////////////////////////////////////////////////////////////////

impl fmt::Display for Topic {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl AsRef<str> for Topic {
    fn as_ref(&self) -> &str {
        &self.raw
    }
}

impl FromStr for Topic {
    type Err = TopicError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Topic::parse(s)
    }
}

impl TryFrom<&str> for Topic {
    type Error = TopicError;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        Topic::parse(s)
    }
}

impl PartialEq<str> for Topic {
    fn eq(
        &self,
        other: &str,
    ) -> bool {
        self.raw == other
    }
}

impl PartialEq<&str> for Topic {
    fn eq(
        &self,
        other: &&str,
    ) -> bool {
        self.raw == *other
    }
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////
