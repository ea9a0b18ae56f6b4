use std::{fmt, sync::Arc};

use super::{
    pool::{PoolBuffer, SizeClass},
    value::{Value, ValueFlags, ValueRef},
};
use crate::{
    pubsub::{MsgQueue, PendingCall, SubscriberId, SubscriberRef, Subscription},
    topic::Topic,
};

/// Конверт: единица передачи по шине.
///
/// Строки, JSON и бинарные данные, помещающиеся во встроенный буфер,
/// копируются в него. Более крупные данные остаются в куче внутри
/// [`Value`], константы со статическим временем жизни хранятся как ссылка с
/// флагом [`ValueFlags::CONST`]. Буфер возвращается в пул при `Drop`.
pub struct Envelope {
    topic: Topic,
    payload: Payload,
    flags: ValueFlags,
    /// Код операции, заданный приложением.
    pub op: u8,
    /// Тег, заданный приложением.
    pub app: u8,
    origin: Option<SubscriberId>,
    call: Option<PendingCall>,
    control: Option<Control>,
    buffer: PoolBuffer,
}

enum Payload {
    Value(Value),
    Inline { kind: InlineKind, len: usize },
}

#[derive(Clone, Copy)]
enum InlineKind {
    Str,
    Json,
    Bin,
}

/// Данные локальных команд и команд драйвера.
pub(crate) enum Control {
    Subscribe {
        topic: Topic,
        subscription: Subscription,
    },
    Unsubscribe {
        topic: Topic,
        subscriber: SubscriberRef,
    },
    UnsubscribeAll {
        subscriber: SubscriberRef,
    },
    Query {
        topic: Topic,
    },
    DeviceAdd {
        prefix: Topic,
        commands: Arc<MsgQueue>,
    },
}

////////////////////////////////////////////////////////////////////////////////
// Собственные методы
////////////////////////////////////////////////////////////////////////////////

impl Envelope {
    pub(crate) fn with_buffer(
        topic: Topic,
        buffer: PoolBuffer,
    ) -> Self {
        Self {
            topic,
            payload: Payload::Value(Value::Null),
            flags: ValueFlags::empty(),
            op: 0,
            app: 0,
            origin: None,
            call: None,
            control: None,
            buffer,
        }
    }

    pub fn topic(&self) -> &Topic {
        &self.topic
    }

    pub fn set_topic(
        &mut self,
        topic: Topic,
    ) {
        self.topic = topic;
    }

    /// Текущее значение, заимствованное у конверта.
    pub fn value(&self) -> ValueRef<'_> {
        match &self.payload {
            Payload::Value(v) => v.view(),
            Payload::Inline { kind, len } => inline_value(*kind, &self.buffer[..*len]),
        }
    }

    /// Заменяет значение. Прежние данные освобождаются.
    pub fn set_value(
        &mut self,
        value: impl Into<Value>,
    ) {
        let value = value.into();
        if value.is_const() {
            self.flags.insert(ValueFlags::CONST);
            self.payload = Payload::Value(value);
            return;
        }
        self.flags.remove(ValueFlags::CONST);
        if !self.store_inline(value.view()) {
            self.payload = Payload::Value(value);
        }
    }

    /// Копирует заимствованное значение в конверт.
    pub fn copy_value(
        &mut self,
        value: ValueRef<'_>,
    ) {
        self.flags.remove(ValueFlags::CONST);
        if !self.store_inline(value) {
            self.payload = Payload::Value(value.to_value());
        }
    }

    /// Забирает значение, оставляя `Null`.
    pub fn take_value(&mut self) -> Value {
        let value = match std::mem::replace(&mut self.payload, Payload::Value(Value::Null)) {
            Payload::Value(v) => v,
            Payload::Inline { kind, len } => inline_value(kind, &self.buffer[..len]).to_value(),
        };
        self.buffer.clear();
        self.flags.remove(ValueFlags::CONST);
        value
    }

    fn store_inline(
        &mut self,
        value: ValueRef<'_>,
    ) -> bool {
        let kind = match value {
            ValueRef::Str(_) => InlineKind::Str,
            ValueRef::Json(_) => InlineKind::Json,
            ValueRef::Bin(_) => InlineKind::Bin,
            _ => return false,
        };
        let Some(bytes) = value.as_bytes() else {
            return false;
        };
        if bytes.len() > self.buffer.limit() {
            return false;
        }
        self.buffer.clear();
        self.buffer.extend_from_slice(bytes);
        self.payload = Payload::Inline {
            kind,
            len: bytes.len(),
        };
        true
    }

    /// `true`, если данные лежат во встроенном буфере.
    pub fn is_inline(&self) -> bool {
        matches!(self.payload, Payload::Inline { .. })
    }

    pub fn flags(&self) -> ValueFlags {
        self.flags
    }

    /// Заменяет флаги. [`ValueFlags::CONST`] определяется значением и здесь
    /// не меняется.
    pub fn set_flags(
        &mut self,
        flags: ValueFlags,
    ) {
        let is_const = self.flags.contains(ValueFlags::CONST);
        self.flags = flags - ValueFlags::CONST;
        self.flags.set(ValueFlags::CONST, is_const);
    }

    pub fn is_retained(&self) -> bool {
        self.flags.contains(ValueFlags::RETAIN)
    }

    pub fn size_class(&self) -> SizeClass {
        self.buffer.class()
    }

    /// Подписчик, отправивший конверт. Ему конверт не доставляется.
    pub fn origin(&self) -> Option<SubscriberId> {
        self.origin
    }

    pub fn set_origin(
        &mut self,
        origin: Option<SubscriberId>,
    ) {
        self.origin = origin;
    }

    pub(crate) fn set_call(
        &mut self,
        call: PendingCall,
    ) {
        self.call = Some(call);
    }

    pub(crate) fn take_call(&mut self) -> Option<PendingCall> {
        self.call.take()
    }

    pub(crate) fn set_control(
        &mut self,
        control: Control,
    ) {
        self.control = Some(control);
    }

    pub(crate) fn take_control(&mut self) -> Option<Control> {
        self.control.take()
    }

    /// Краткое описание значения, например `"u32.R  5"`.
    pub fn describe(&self) -> String {
        let value = self.value();
        format!(
            "{}{} {}",
            value.value_type().name(),
            self.flags.label(),
            value
        )
    }
}

fn inline_value(
    kind: InlineKind,
    bytes: &[u8],
) -> ValueRef<'_> {
    match kind {
        InlineKind::Str => ValueRef::Str(std::str::from_utf8(bytes).unwrap_or_default()),
        InlineKind::Json => ValueRef::Json(std::str::from_utf8(bytes).unwrap_or_default()),
        InlineKind::Bin => ValueRef::Bin(bytes),
    }
}

////////////////////////////////////////////////////////////////////////////////
// Общие реализации трейтов для Envelope
////////////////////////////////////////////////////////////////////////////////

/// Глубокая копия: топик, значение, флаги и теги приложения. Копия берёт
/// новый буфер того же класса и освобождается независимо от источника.
/// Ожидающий вызов, отправитель и данные команд не копируются.
impl Clone for Envelope {
    fn clone(&self) -> Self {
        let mut env = Envelope::with_buffer(self.topic.clone(), self.buffer.sibling());
        env.op = self.op;
        env.app = self.app;
        match &self.payload {
            Payload::Value(v) => env.payload = Payload::Value(v.clone()),
            Payload::Inline { .. } => env.copy_value(self.value()),
        }
        env.flags = self.flags;
        env
    }
}

impl fmt::Debug for Envelope {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("Envelope")
            .field("topic", &self.topic.as_str())
            .field("value", &self.describe())
            .field("class", &self.buffer.class())
            .finish()
    }
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use std::borrow::Cow;

    use super::*;
    use crate::message::EnvelopePool;

    fn topic(s: &str) -> Topic {
        Topic::parse(s).unwrap()
    }

    /// Тест проверяет, что короткие строки копируются во встроенный буфер.
    #[test]
    fn test_small_string_is_inline() {
        let pool = EnvelopePool::new();
        let mut env = pool.alloc();
        env.set_value(String::from("hello"));
        assert!(env.is_inline());
        assert_eq!(env.value(), ValueRef::Str("hello"));
        assert!(!env.flags().contains(ValueFlags::CONST));
    }

    /// Тест проверяет, что крупные данные остаются в куче.
    #[test]
    fn test_large_binary_stays_on_heap() {
        let pool = EnvelopePool::with_sizes(8, 16, 0, 0);
        let mut env = pool.alloc();
        env.set_value(vec![7u8; 32]);
        assert!(!env.is_inline());
        assert_eq!(env.value(), ValueRef::Bin(&[7u8; 32]));
    }

    /// Тест проверяет, что статическая строка помечается как константа.
    #[test]
    fn test_static_value_is_const() {
        let pool = EnvelopePool::new();
        let mut env = pool.alloc();
        env.set_value("constant");
        assert!(env.flags().contains(ValueFlags::CONST));
        assert!(!env.is_inline());
        env.set_value(5u32);
        assert!(!env.flags().contains(ValueFlags::CONST));
    }

    /// Тест проверяет, что копия независима от источника.
    #[test]
    fn test_clone_is_independent() {
        let pool = EnvelopePool::new();
        let mut src = pool.alloc();
        src.set_topic(topic("a/b"));
        src.set_value(Value::Json(Cow::Owned("{\"x\":1}".into())));
        src.set_flags(ValueFlags::RETAIN);
        src.op = 3;

        let copy = src.clone();
        src.set_value(1u8);
        drop(src);

        assert_eq!(copy.topic(), &topic("a/b"));
        assert_eq!(copy.value(), ValueRef::Json("{\"x\":1}"));
        assert!(copy.is_inline());
        assert!(copy.is_retained());
        assert_eq!(copy.op, 3);
        assert_eq!(pool.stats().control.released, 1);
    }

    /// Тест проверяет, что `set_flags` не трогает флаг константы.
    #[test]
    fn test_set_flags_preserves_const() {
        let pool = EnvelopePool::new();
        let mut env = pool.alloc();
        env.set_value("c");
        env.set_flags(ValueFlags::RETAIN);
        assert_eq!(env.flags(), ValueFlags::RETAIN | ValueFlags::CONST);
        env.set_flags(ValueFlags::empty() | ValueFlags::CONST);
        assert_eq!(env.flags(), ValueFlags::CONST);
    }

    /// Тест проверяет извлечение значения из конверта.
    #[test]
    fn test_take_value() {
        let pool = EnvelopePool::new();
        let mut env = pool.alloc();
        env.set_value(String::from("abc"));
        assert_eq!(env.take_value(), Value::from(String::from("abc")));
        assert_eq!(env.value(), ValueRef::Null);
    }

    /// Тест проверяет краткое описание значения.
    #[test]
    fn test_describe() {
        let pool = EnvelopePool::new();
        let mut env = pool.alloc();
        env.set_value(5u32);
        env.set_flags(ValueFlags::RETAIN);
        assert_eq!(env.describe(), "u32.R  5");
    }
}
