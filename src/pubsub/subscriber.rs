use std::{fmt, sync::Arc};

use bitflags::bitflags;
use gaugebus_error::StatusCode;

use crate::{
    message::{Envelope, ValueRef},
    topic::Topic,
};

bitflags! {
    /// Какие классы сообщений получает подписчик.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct SubscribeFlags: u8 {
        /// Повтор сохранённых значений при подписке.
        const RETAIN = 1 << 0;
        /// Обычные публикации.
        const PUB = 1 << 1;
        /// Запросы метаданных (`%`).
        const METADATA_REQ = 1 << 2;
        /// Метаданные (`$`).
        const METADATA_RSP = 1 << 3;
        /// Запросы значений (`&`).
        const QUERY_REQ = 1 << 4;
        /// Ответы на запросы значений (`?`).
        const QUERY_RSP = 1 << 5;
        /// Коды возврата (`#`).
        const RETURN_CODE = 1 << 6;
    }
}

/// Класс доставки конверта.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeliveryClass {
    Publish,
    MetadataReq,
    Metadata,
    QueryReq,
    QueryRsp,
    ReturnCode,
}

impl DeliveryClass {
    /// Флаг подписки, включающий этот класс.
    pub const fn flag(self) -> SubscribeFlags {
        match self {
            Self::Publish => SubscribeFlags::PUB,
            Self::MetadataReq => SubscribeFlags::METADATA_REQ,
            Self::Metadata => SubscribeFlags::METADATA_RSP,
            Self::QueryReq => SubscribeFlags::QUERY_REQ,
            Self::QueryRsp => SubscribeFlags::QUERY_RSP,
            Self::ReturnCode => SubscribeFlags::RETURN_CODE,
        }
    }
}

/// Получатель конвертов.
///
/// Вызывается только из потока диспетчера. Ошибка подписчика не прерывает
/// доставку остальным: первая ошибка становится кодом возврата публикации.
pub trait Subscriber: Send + Sync {
    fn on_message(
        &self,
        envelope: &Envelope,
    ) -> Result<(), StatusCode>;
}

/// Соглашение о вызове подписчика.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubscriberKind {
    /// Получает конверт целиком.
    Internal,
    /// Получает только топик и значение.
    External,
}

/// Идентичность подписчика: сам обработчик вместе с контекстом и вид
/// вызова. Флаги подписки в идентичность не входят.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId {
    addr: usize,
    kind: SubscriberKind,
}

/// Ссылка на подписчика. Клоны разделяют идентичность.
#[derive(Clone)]
pub struct SubscriberRef {
    inner: Arc<dyn Subscriber>,
    kind: SubscriberKind,
}

/// Подписка на узле дерева.
#[derive(Clone, Debug)]
pub struct Subscription {
    pub subscriber: SubscriberRef,
    pub flags: SubscribeFlags,
}

struct FnSubscriber<F>(F);

impl<F> Subscriber for FnSubscriber<F>
where
    F: Fn(&Envelope) -> Result<(), StatusCode> + Send + Sync,
{
    fn on_message(
        &self,
        envelope: &Envelope,
    ) -> Result<(), StatusCode> {
        (self.0)(envelope)
    }
}

struct ExternalSubscriber<F>(F);

impl<F> Subscriber for ExternalSubscriber<F>
where
    F: Fn(&Topic, ValueRef<'_>) + Send + Sync,
{
    fn on_message(
        &self,
        envelope: &Envelope,
    ) -> Result<(), StatusCode> {
        (self.0)(envelope.topic(), envelope.value());
        Ok(())
    }
}

////////////////////////////////////////////////////////////////////////////////
// Собственные методы
////////////////////////////////////////////////////////////////////////////////

impl SubscriberRef {
    /// Подписчик, получающий конверт целиком.
    pub fn internal(subscriber: Arc<dyn Subscriber>) -> Self {
        Self {
            inner: subscriber,
            kind: SubscriberKind::Internal,
        }
    }

    /// Замыкание, получающее конверт целиком.
    pub fn from_fn<F>(f: F) -> Self
    where
        F: Fn(&Envelope) -> Result<(), StatusCode> + Send + Sync + 'static,
    {
        Self::internal(Arc::new(FnSubscriber(f)))
    }

    /// Замыкание, получающее только топик и значение.
    pub fn external<F>(f: F) -> Self
    where
        F: Fn(&Topic, ValueRef<'_>) + Send + Sync + 'static,
    {
        Self {
            inner: Arc::new(ExternalSubscriber(f)),
            kind: SubscriberKind::External,
        }
    }

    pub fn id(&self) -> SubscriberId {
        SubscriberId {
            addr: Arc::as_ptr(&self.inner) as *const () as usize,
            kind: self.kind,
        }
    }

    pub fn kind(&self) -> SubscriberKind {
        self.kind
    }

    /// Совпадение идентичностей.
    pub fn same(
        &self,
        other: &SubscriberRef,
    ) -> bool {
        self.id() == other.id()
    }

    pub fn deliver(
        &self,
        envelope: &Envelope,
    ) -> Result<(), StatusCode> {
        self.inner.on_message(envelope)
    }
}

impl Subscription {
    pub fn new(
        subscriber: SubscriberRef,
        flags: SubscribeFlags,
    ) -> Self {
        Self { subscriber, flags }
    }

    pub fn accepts(
        &self,
        class: DeliveryClass,
    ) -> bool {
        self.flags.contains(class.flag())
    }
}

////////////////////////////////////////////////////////////////////////////////
// Общие реализации трейтов для SubscriberRef
////////////////////////////////////////////////////////////////////////////////

impl fmt::Debug for SubscriberRef {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("SubscriberRef")
            .field("id", &self.id())
            .finish()
    }
}

impl PartialEq for SubscriberRef {
    fn eq(
        &self,
        other: &Self,
    ) -> bool {
        self.same(other)
    }
}

impl Eq for SubscriberRef {}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////
