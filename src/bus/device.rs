//! Точка подключения бэкендов: регистрация устройств и обмен конвертами с
//! ними.
//!
//! Бэкенд регистрирует устройство по префиксу `{backend}/{model}/{serial}`
//! и получает [`DevicePort`] с очередью команд. Поток диспетчера
//! подписывает на префикс пересылающего подписчика, который кладёт копии
//! адресованных устройству конвертов в эту очередь. Значения от устройства
//! бэкенд отправляет обратно через [`Backend`].

use std::{sync::Arc, time::Duration};

use gaugebus_error::{BusError, GaugeResult, StatusCode};
use tracing::{debug, info};

use super::{BusShared, DEVICE_ADD, DEVICE_REMOVE};
use crate::{
    message::{Control, Envelope, EnvelopePool, Value, ValueFlags},
    pubsub::{MsgQueue, SubscribeFlags, SubscriberRef},
    topic::{Topic, TopicSuffix},
};

/// Флаги пересылающего подписчика устройства.
pub(crate) const FORWARD_FLAGS: SubscribeFlags = SubscribeFlags::PUB
    .union(SubscribeFlags::METADATA_REQ)
    .union(SubscribeFlags::QUERY_REQ);

/// Сторона бэкенда: регистрация устройств и публикация их значений.
#[derive(Clone)]
pub struct Backend {
    shared: Arc<BusShared>,
}

/// Очередь команд одного устройства.
pub struct DevicePort {
    prefix: Topic,
    commands: Arc<MsgQueue>,
}

/// Зарегистрированное устройство.
pub(crate) struct Device {
    pub(crate) prefix: Topic,
    pub(crate) commands: Arc<MsgQueue>,
    pub(crate) forwarder: SubscriberRef,
}

/// Устройства в порядке регистрации.
#[derive(Default)]
pub(crate) struct DeviceRegistry {
    devices: Vec<Device>,
}

////////////////////////////////////////////////////////////////////////////////
// Собственные методы Backend
////////////////////////////////////////////////////////////////////////////////

impl Backend {
    pub(crate) fn new(shared: Arc<BusShared>) -> Self {
        Self { shared }
    }

    pub fn pool(&self) -> &EnvelopePool {
        &self.shared.pool
    }

    /// Регистрирует устройство. Префикс должен состоять ровно из трёх
    /// уровней.
    pub fn add_device(
        &self,
        prefix: &str,
    ) -> GaugeResult<DevicePort> {
        let prefix = device_prefix(prefix)?;
        let commands = Arc::new(MsgQueue::new());
        let mut env = self.shared.pool.envelope(
            Topic::parse(DEVICE_ADD)?,
            Value::from(prefix.as_str().to_string()),
            ValueFlags::empty(),
        );
        env.set_control(Control::DeviceAdd {
            prefix: prefix.clone(),
            commands: Arc::clone(&commands),
        });
        self.send(env)?;
        info!(prefix = %prefix, "device add requested");
        Ok(DevicePort { prefix, commands })
    }

    /// Снимает устройство с регистрации.
    pub fn remove_device(
        &self,
        prefix: &str,
    ) -> GaugeResult<()> {
        let prefix = device_prefix(prefix)?;
        let env = self.shared.pool.envelope(
            Topic::parse(DEVICE_REMOVE)?,
            Value::from(prefix.as_str().to_string()),
            ValueFlags::empty(),
        );
        self.send(env)
    }

    /// Публикует значение от имени устройства.
    pub fn publish(
        &self,
        topic: &str,
        value: impl Into<Value>,
        flags: ValueFlags,
    ) -> GaugeResult<()> {
        let env = self.shared.pool.envelope(Topic::parse(topic)?, value, flags);
        self.send(env)
    }

    /// Публикует код возврата `{topic}#` в ответ на команду.
    pub fn publish_return_code(
        &self,
        topic: &Topic,
        code: i32,
    ) -> GaugeResult<()> {
        let env = self.shared.pool.envelope(
            topic.with_suffix(TopicSuffix::ReturnCode),
            code,
            ValueFlags::empty(),
        );
        self.send(env)
    }

    /// Отправляет готовый конверт в поток диспетчера.
    pub fn send(
        &self,
        envelope: Envelope,
    ) -> GaugeResult<()> {
        if self.shared.is_closed() {
            return Err(BusError::Closed.into());
        }
        self.shared.check_payload(&envelope)?;
        self.shared
            .backend
            .push(envelope)
            .map_err(|_| BusError::Closed.into())
    }
}

fn device_prefix(prefix: &str) -> GaugeResult<Topic> {
    let topic = Topic::parse(prefix)?;
    gaugebus_error::ensure!(
        topic.suffix().is_none() && topic.device_prefix() == Some(topic.path()),
        StatusCode::ParameterInvalid,
        "not a device prefix: {}",
        prefix
    );
    Ok(topic)
}

////////////////////////////////////////////////////////////////////////////////
// Собственные методы DevicePort
////////////////////////////////////////////////////////////////////////////////

impl DevicePort {
    pub fn prefix(&self) -> &Topic {
        &self.prefix
    }

    /// Следующая команда, если она уже есть.
    pub fn try_recv(&self) -> Option<Envelope> {
        self.commands.pop()
    }

    /// Ждёт команду не дольше `timeout`. `None` также после снятия
    /// устройства с регистрации и опустошения очереди.
    pub fn recv_timeout(
        &self,
        timeout: Duration,
    ) -> Option<Envelope> {
        self.commands.pop_timeout(timeout)
    }

    /// `true` после снятия устройства с регистрации или остановки шины.
    pub fn is_closed(&self) -> bool {
        self.commands.is_closed()
    }
}

////////////////////////////////////////////////////////////////////////////////
// Собственные методы DeviceRegistry
////////////////////////////////////////////////////////////////////////////////

impl DeviceRegistry {
    /// Регистрирует устройство и возвращает его пересылающего подписчика.
    /// `None`, если префикс уже занят.
    pub(crate) fn add(
        &mut self,
        prefix: Topic,
        commands: Arc<MsgQueue>,
    ) -> Option<SubscriberRef> {
        if self.get(prefix.as_str()).is_some() {
            return None;
        }
        let forwarder = {
            let commands = Arc::clone(&commands);
            SubscriberRef::from_fn(move |env| {
                commands.push(env.clone()).map_err(|_| StatusCode::Closed)
            })
        };
        self.devices.push(Device {
            prefix,
            commands,
            forwarder: forwarder.clone(),
        });
        Some(forwarder)
    }

    pub(crate) fn remove(
        &mut self,
        prefix: &str,
    ) -> Option<Device> {
        let pos = self.devices.iter().position(|d| d.prefix.as_str() == prefix)?;
        let device = self.devices.remove(pos);
        device.commands.close();
        debug!(prefix, "device command queue closed");
        Some(device)
    }

    pub(crate) fn get(
        &self,
        prefix: &str,
    ) -> Option<&Device> {
        self.devices.iter().find(|d| d.prefix.as_str() == prefix)
    }

    /// Устройство, которому принадлежит топик.
    pub(crate) fn owner(
        &self,
        topic: &Topic,
    ) -> Option<&Device> {
        topic.device_prefix().and_then(|prefix| self.get(prefix))
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &Device> {
        self.devices.iter()
    }

    /// Префиксы через запятую для `@/list`.
    pub(crate) fn list(&self) -> String {
        self.devices
            .iter()
            .map(|d| d.prefix.as_str())
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Закрывает очереди всех устройств и очищает реестр.
    pub(crate) fn clear(&mut self) -> usize {
        let count = self.devices.len();
        for device in self.devices.drain(..) {
            device.commands.close();
        }
        count
    }
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////
