//! Поток диспетчера.
//!
//! Единственный владелец дерева топиков, подписок, таблицы ожидающих
//! вызовов и реестра устройств. Цикл: забрать всё из очереди бэкендов,
//! затем всё из очереди команд (в порядке поступления), обработать,
//! истечь просроченные вызовы и уснуть до ближайшего дедлайна, но не
//! дольше интервала опроса.

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use gaugebus_error::StatusCode;
use tracing::{debug, info, trace, warn};

use super::{
    device::{DeviceRegistry, FORWARD_FLAGS},
    BusShared, DEVICE_ADD, DEVICE_LIST, DEVICE_REMOVE, DRIVER_VERSION, FINALIZE, QUERY, SUBSCRIBE,
    UNSUBSCRIBE, UNSUBSCRIBE_ALL,
};
use crate::{
    message::{Control, Envelope, Value, ValueFlags, ValueRef},
    meta::{self, JsonMetaValidator, MetaValidator},
    pubsub::{
        CallOutcome, DeliveryClass, NodeId, PendingCalls, SubscribeFlags, Subscription, TopicTree,
    },
    topic::{Topic, TopicSuffix},
};

/// Результат обработки конверта из очереди команд.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Exit,
}

pub(crate) struct Engine {
    shared: Arc<BusShared>,
    tree: TopicTree,
    calls: PendingCalls,
    devices: DeviceRegistry,
    validator: Box<dyn MetaValidator>,
}

////////////////////////////////////////////////////////////////////////////////
// Собственные методы
////////////////////////////////////////////////////////////////////////////////

impl Engine {
    pub(crate) fn new(shared: Arc<BusShared>) -> Self {
        Self {
            shared,
            tree: TopicTree::new(),
            calls: PendingCalls::new(),
            devices: DeviceRegistry::default(),
            validator: Box::new(JsonMetaValidator::new()),
        }
    }

    /// Главный цикл. Возвращается после `@/!final`.
    pub(crate) fn run(mut self) {
        info!("dispatch loop started");
        self.publish_driver_topics();

        let max_poll = self.shared.config.max_poll_interval();
        loop {
            for env in self.shared.backend.drain() {
                self.handle_backend(env);
            }

            let mut flow = Flow::Continue;
            let mut commands = self.shared.commands.drain().into_iter();
            for env in commands.by_ref() {
                flow = self.handle_command(env);
                if flow == Flow::Exit {
                    break;
                }
            }
            // всё, что пришло после @/!final, прерывается при разборе
            drop(commands);

            let now = Instant::now();
            let expired = self.calls.expire_due(now);
            if expired > 0 {
                debug!(expired, "pending calls timed out");
            }
            if flow == Flow::Exit {
                break;
            }

            let wait = self
                .calls
                .next_deadline()
                .map_or(max_poll, |deadline| deadline.saturating_duration_since(now))
                .min(max_poll);
            self.shared.signal.wait_timeout(wait.max(Duration::from_millis(1)));
        }

        self.finalize();
    }

    fn publish_driver_topics(&mut self) {
        for (topic, value) in [
            (DRIVER_VERSION, Value::U32(driver_version())),
            (DEVICE_LIST, Value::from(String::new())),
        ] {
            match Topic::parse(topic) {
                Ok(topic) => {
                    let env = self.shared.pool.envelope(topic, value, ValueFlags::RETAIN);
                    let _ = self.process(env);
                }
                Err(err) => warn!(%err, "invalid driver topic"),
            }
        }
    }

    ////////////////////////////////////////////////////////////////////////////
    // Очередь команд
    ////////////////////////////////////////////////////////////////////////////

    fn handle_command(
        &mut self,
        mut env: Envelope,
    ) -> Flow {
        let topic = env.topic().clone();
        if topic == FINALIZE {
            info!("finalize requested");
            return Flow::Exit;
        }
        let call = env.take_call();

        if topic.is_local() {
            let result = self.local_command(&topic, &mut env);
            let code = result.as_ref().map_or_else(|c| c.code(), |_| 0);
            self.emit_return_code(&topic, code);
            if let Some(call) = call {
                call.resolve(match result {
                    Ok(Some(value)) => CallOutcome::with_value(value),
                    Ok(None) => CallOutcome::code(0),
                    Err(status) => CallOutcome::status(status),
                });
            }
            return Flow::Continue;
        }

        match call {
            // код возврата пришлёт устройство
            Some(call) if self.device_acknowledges(&topic) => {
                self.calls.register(call);
                let _ = self.process(env);
            }
            Some(call) => {
                let code = self.process(env).map_or_else(|c| c.code(), |_| 0);
                call.resolve(CallOutcome::code(code));
            }
            None => {
                let _ = self.process(env);
            }
        }
        Flow::Continue
    }

    /// Устройство отвечает `topic#` только на то, что получает его
    /// пересылающий подписчик: значения, `%` и `&`. Остальное шина
    /// подтверждает сама.
    fn device_acknowledges(
        &self,
        topic: &Topic,
    ) -> bool {
        matches!(
            topic.suffix(),
            None | Some(TopicSuffix::MetadataReq | TopicSuffix::QueryReq)
        ) && self.devices.owner(topic).is_some()
    }

    fn local_command(
        &mut self,
        topic: &Topic,
        env: &mut Envelope,
    ) -> Result<Option<Value>, StatusCode> {
        let control = env.take_control();
        match (topic.as_str(), control) {
            (SUBSCRIBE, Some(Control::Subscribe { topic, subscription })) => {
                self.subscribe(&topic, subscription).map(|_| None)
            }
            (UNSUBSCRIBE, Some(Control::Unsubscribe { topic, subscriber })) => {
                let node = self.tree.find(topic.path()).ok_or(StatusCode::NotFound)?;
                match self.tree.remove(node, subscriber.id()) {
                    0 => Err(StatusCode::NotFound),
                    _ => Ok(None),
                }
            }
            (UNSUBSCRIBE_ALL, Some(Control::UnsubscribeAll { subscriber })) => {
                let removed = self.tree.remove_subtree(self.tree.root(), subscriber.id());
                debug!(removed, "unsubscribed from all topics");
                Ok(None)
            }
            (QUERY, Some(Control::Query { topic })) => self.query(&topic).map(Some),
            (SUBSCRIBE | UNSUBSCRIBE | UNSUBSCRIBE_ALL | QUERY, _) => {
                warn!(topic = %topic, "local command without payload");
                Err(StatusCode::ParameterInvalid)
            }
            (other, _) => {
                warn!(topic = other, "unsupported local command");
                Err(StatusCode::NotSupported)
            }
        }
    }

    fn subscribe(
        &mut self,
        topic: &Topic,
        subscription: Subscription,
    ) -> Result<(), StatusCode> {
        let node = self
            .tree
            .find_or_create(topic.path())
            .map_err(|_| StatusCode::ParameterInvalid)?;
        debug!(topic = %topic, flags = ?subscription.flags, "subscribe");
        self.tree.add_subscription(node, subscription.clone());
        if subscription.flags.contains(SubscribeFlags::RETAIN) {
            self.replay_devices(topic, &subscription);
            self.tree.replay(node, &subscription);
        }
        Ok(())
    }

    /// Новому подписчику на `""`, `@` или `@/!add` повторяются добавления
    /// уже известных устройств.
    fn replay_devices(
        &self,
        topic: &Topic,
        subscription: &Subscription,
    ) {
        if !matches!(topic.path(), "" | "@" | DEVICE_ADD) {
            return;
        }
        let Ok(add) = Topic::parse(DEVICE_ADD) else {
            return;
        };
        for device in self.devices.iter() {
            let env = self.shared.pool.envelope(
                add.clone(),
                Value::from(device.prefix.as_str().to_string()),
                ValueFlags::empty(),
            );
            if let Err(code) = subscription.subscriber.deliver(&env) {
                warn!(prefix = %device.prefix, %code, "subscriber rejected device replay");
            }
        }
    }

    fn query(
        &self,
        topic: &Topic,
    ) -> Result<Value, StatusCode> {
        let node = self.tree.find(topic.path()).ok_or(StatusCode::NotFound)?;
        let stored = match topic.suffix() {
            Some(TopicSuffix::MetadataReq | TopicSuffix::MetadataRsp) => self.tree.metadata(node),
            _ => self.tree.value(node),
        };
        let value = stored.map_or(Value::Null, |env| env.value().to_value());
        debug!(topic = %topic, value = %value, "query");
        Ok(value)
    }

    ////////////////////////////////////////////////////////////////////////////
    // Очередь бэкендов
    ////////////////////////////////////////////////////////////////////////////

    fn handle_backend(
        &mut self,
        mut env: Envelope,
    ) {
        let topic = env.topic().clone();
        if topic.is_driver() {
            match topic.as_str() {
                DEVICE_ADD => self.device_add(env),
                DEVICE_REMOVE => self.device_remove(env),
                other => warn!(topic = other, "unhandled backend command"),
            }
            return;
        }
        match self.devices.owner(&topic) {
            Some(device) => env.set_origin(Some(device.forwarder.id())),
            None => debug!(topic = %topic, "no device match"),
        }
        let _ = self.process(env);
    }

    fn device_add(
        &mut self,
        mut env: Envelope,
    ) {
        let Some(Control::DeviceAdd { prefix, commands }) = env.take_control() else {
            warn!("device add without registration payload");
            return;
        };
        let Some(forwarder) = self.devices.add(prefix.clone(), commands) else {
            warn!(prefix = %prefix, "device already registered");
            return;
        };
        info!(prefix = %prefix, "device added");
        match self.tree.find_or_create(prefix.path()) {
            Ok(node) => self
                .tree
                .add_subscription(node, Subscription::new(forwarder, FORWARD_FLAGS)),
            Err(err) => warn!(%err, "device prefix rejected by topic tree"),
        }
        env.set_flags(ValueFlags::empty());
        let _ = self.process(env);
        self.publish_device_list();
    }

    fn device_remove(
        &mut self,
        env: Envelope,
    ) {
        let prefix = match env.value() {
            ValueRef::Str(prefix) => prefix.to_string(),
            other => {
                warn!(value = %other, "device remove without prefix");
                return;
            }
        };
        let Some(device) = self.devices.remove(&prefix) else {
            warn!(prefix = %prefix, "device remove, but not found");
            return;
        };
        if let Some(node) = self.tree.find(device.prefix.path()) {
            self.tree.remove(node, device.forwarder.id());
        }
        info!(prefix = %prefix, "device removed");
        let _ = self.process(env);
        self.publish_device_list();
    }

    fn publish_device_list(&mut self) {
        let Ok(topic) = Topic::parse(DEVICE_LIST) else {
            return;
        };
        let env = self
            .shared
            .pool
            .envelope(topic, Value::from(self.devices.list()), ValueFlags::RETAIN);
        let _ = self.process(env);
    }

    ////////////////////////////////////////////////////////////////////////////
    // Обработка публикаций
    ////////////////////////////////////////////////////////////////////////////

    /// Обрабатывает одну публикацию. `Err` несёт код, который получит
    /// вызывающий.
    fn process(
        &mut self,
        env: Envelope,
    ) -> Result<(), StatusCode> {
        let topic = env.topic().clone();
        if topic.path().ends_with("!data") {
            trace!(topic = %topic, "process");
        } else {
            debug!(topic = %topic, value = %env.describe(), "process");
        }

        if topic.path().is_empty() {
            warn!(topic = %topic, "publish to root not allowed");
            return Err(StatusCode::NotSupported);
        }
        let node = self
            .tree
            .find_or_create(topic.path())
            .map_err(|_| StatusCode::ParameterInvalid)?;

        match topic.suffix() {
            Some(TopicSuffix::MetadataRsp) => self.publish_metadata(node, env),
            Some(TopicSuffix::ReturnCode) => {
                self.publish_return_code(node, env);
                Ok(())
            }
            Some(TopicSuffix::MetadataReq) => self.tree.deliver(node, &env, DeliveryClass::MetadataReq),
            Some(TopicSuffix::QueryReq) => self.tree.deliver(node, &env, DeliveryClass::QueryReq),
            Some(TopicSuffix::QueryRsp) => self.tree.deliver(node, &env, DeliveryClass::QueryRsp),
            None => self.publish_value(node, env),
        }
    }

    fn publish_metadata(
        &mut self,
        node: NodeId,
        env: Envelope,
    ) -> Result<(), StatusCode> {
        let checked = match env.value() {
            ValueRef::Str(doc) | ValueRef::Json(doc) => meta::syntax_check(doc),
            _ => Err(StatusCode::ParameterInvalid),
        };
        if let Err(code) = checked {
            warn!(topic = %env.topic(), "invalid metadata document");
            return Err(code);
        }
        self.tree.set_metadata(node, env);
        match self.tree.metadata(node) {
            Some(meta) => self.tree.deliver(node, meta, DeliveryClass::Metadata),
            None => Ok(()),
        }
    }

    fn publish_return_code(
        &mut self,
        node: NodeId,
        env: Envelope,
    ) {
        match env.value() {
            ValueRef::I32(code) => {
                if !self.calls.complete(env.topic().as_str(), CallOutcome::code(code)) {
                    trace!(topic = %env.topic(), "return code without pending call");
                }
            }
            other => warn!(topic = %env.topic(), value = %other, "return code is not i32"),
        }
        let _ = self.tree.deliver(node, &env, DeliveryClass::ReturnCode);
    }

    /// Проверка по метаданным, подавление дубликатов, сохранение и
    /// доставка.
    fn publish_value(
        &mut self,
        node: NodeId,
        mut env: Envelope,
    ) -> Result<(), StatusCode> {
        let topic = env.topic().clone();

        if let Some(meta_env) = self.tree.metadata(node) {
            let verdict = match meta_env.value() {
                ValueRef::Str(doc) | ValueRef::Json(doc) => self.validator.validate(doc, env.value()),
                _ => Ok(None),
            };
            match verdict {
                Ok(None) => {}
                Ok(Some(coerced)) => env.set_value(coerced),
                Err(code) => {
                    warn!(topic = %topic, value = %env.value(), %code, "validation failed");
                    self.emit_return_code(&topic, code.code());
                    return Err(code);
                }
            }
        }

        if self.tree.value(node).is_some_and(|prev| prev.value() == env.value()) {
            debug!(topic = %topic, "dedup");
            self.emit_return_code(&topic, 0);
            return Ok(());
        }

        let unretained = self.tree.set_retained(node, env);
        let result = match unretained.as_ref().or_else(|| self.tree.value(node)) {
            Some(env) => self.tree.deliver(node, env, DeliveryClass::Publish),
            None => Ok(()),
        };
        if let Err(code) = result {
            self.emit_return_code(&topic, code.code());
        }
        result
    }

    /// Код возврата `{topic}#`: завершает ожидающий вызов и доставляется
    /// подписчикам кодов возврата.
    fn emit_return_code(
        &mut self,
        topic: &Topic,
        code: i32,
    ) {
        let rc_topic = topic.with_suffix(TopicSuffix::ReturnCode);
        self.calls.complete(rc_topic.as_str(), CallOutcome::code(code));
        let Ok(node) = self.tree.find_or_create(topic.path()) else {
            warn!(topic = %topic, "return code for invalid topic");
            return;
        };
        let env = self.shared.pool.envelope(rc_topic, code, ValueFlags::empty());
        if let Err(status) = self.tree.deliver(node, &env, DeliveryClass::ReturnCode) {
            debug!(topic = %env.topic(), %status, "return code subscriber failed");
        }
    }

    ////////////////////////////////////////////////////////////////////////////
    // Завершение
    ////////////////////////////////////////////////////////////////////////////

    fn finalize(mut self) {
        let devices = self.devices.clear();
        self.shared.commands.close();
        self.shared.backend.close();
        // конверты с ожидающими вызовами прерывают их при удалении
        let dropped = self.shared.commands.drain().len() + self.shared.backend.drain().len();
        let aborted = self.calls.abort_all();
        let nodes = self.tree.len();
        self.tree.finalize();
        self.shared.pool.close();
        info!(devices, dropped, aborted, nodes, "dispatch loop finished");
    }
}

/// Версия драйвера `major << 24 | minor << 16 | patch`.
pub(crate) fn driver_version() -> u32 {
    let part = |s: &str| s.parse::<u32>().unwrap_or(0);
    (part(env!("CARGO_PKG_VERSION_MAJOR")) & 0xff) << 24
        | (part(env!("CARGO_PKG_VERSION_MINOR")) & 0xff) << 16
        | (part(env!("CARGO_PKG_VERSION_PATCH")) & 0xffff)
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use parking_lot::Mutex;

    use super::*;
    use crate::{
        bus::BusShared,
        config::BusConfig,
        pubsub::{CallSlot, PendingCall, SubscriberRef},
    };

    type Log = Arc<Mutex<Vec<String>>>;

    fn engine() -> Engine {
        Engine::new(Arc::new(BusShared::new(BusConfig::default())))
    }

    fn recorder(log: &Log) -> SubscriberRef {
        let log = Arc::clone(log);
        SubscriberRef::from_fn(move |env| {
            log.lock().push(format!("{}={}", env.topic(), env.value()));
            Ok(())
        })
    }

    fn publish(
        engine: &mut Engine,
        topic: &str,
        value: impl Into<Value>,
    ) -> Result<(), StatusCode> {
        let env = engine
            .shared
            .pool
            .envelope(Topic::parse(topic).unwrap(), value, ValueFlags::RETAIN);
        engine.process(env)
    }

    fn subscribe(
        engine: &mut Engine,
        topic: &str,
        sub: &SubscriberRef,
        flags: SubscribeFlags,
    ) {
        engine
            .subscribe(&Topic::parse(topic).unwrap(), Subscription::new(sub.clone(), flags))
            .unwrap();
    }

    /// Тест проверяет, что повторная публикация того же значения
    /// подтверждается без повторной доставки.
    #[test]
    fn test_dedup_does_not_redeliver() {
        let mut engine = engine();
        let log: Log = Default::default();
        subscribe(&mut engine, "a", &recorder(&log), SubscribeFlags::PUB);
        assert_eq!(publish(&mut engine, "a/b", 5u32), Ok(()));
        assert_eq!(publish(&mut engine, "a/b", 5u32), Ok(()));
        assert_eq!(publish(&mut engine, "a/b", 6u32), Ok(()));
        assert_eq!(*log.lock(), vec!["a/b=5", "a/b=6"]);
    }

    /// Тест проверяет приведение значения по метаданным и отказ с кодом
    /// возврата.
    #[test]
    fn test_metadata_validation() {
        let mut engine = engine();
        let log: Log = Default::default();
        subscribe(
            &mut engine,
            "",
            &recorder(&log),
            SubscribeFlags::PUB | SubscribeFlags::RETURN_CODE,
        );
        let meta = r#"{"dtype": "u8", "options": [[0, "off"], [1, "on"]]}"#;
        assert_eq!(publish(&mut engine, "d/mode$", Value::json(meta)), Ok(()));
        assert_eq!(publish(&mut engine, "d/mode", "on"), Ok(()));
        assert_eq!(
            publish(&mut engine, "d/mode", "bogus"),
            Err(StatusCode::ParameterInvalid)
        );
        let node = engine.tree.find("d/mode").unwrap();
        assert_eq!(engine.tree.value(node).unwrap().value(), ValueRef::U8(1));
        assert_eq!(
            *log.lock(),
            vec![
                "d/mode=1".to_string(),
                format!("d/mode#={}", StatusCode::ParameterInvalid.code()),
            ]
        );
    }

    /// Тест проверяет, что некорректные метаданные отклоняются и не
    /// сохраняются.
    #[test]
    fn test_invalid_metadata_rejected() {
        let mut engine = engine();
        assert_eq!(
            publish(&mut engine, "d/x$", Value::json("{broken")),
            Err(StatusCode::ParameterInvalid)
        );
        let node = engine.tree.find("d/x").unwrap();
        assert!(engine.tree.metadata(node).is_none());
    }

    /// Тест проверяет, что код возврата завершает ожидающий вызов.
    #[test]
    fn test_return_code_completes_call() {
        let mut engine = engine();
        let slot = CallSlot::new();
        engine.calls.register(PendingCall::new(
            "u/js220/0001/s/i#",
            Instant::now() + Duration::from_secs(5),
            Arc::clone(&slot),
        ));
        assert_eq!(
            publish(&mut engine, "u/js220/0001/s/i#", StatusCode::Busy.code()),
            Ok(())
        );
        assert_eq!(
            slot.wait_until(Instant::now()),
            Some(CallOutcome::status(StatusCode::Busy))
        );
        assert!(engine.calls.is_empty());
    }

    /// Тест проверяет публикацию в корень и неизвестную локальную команду.
    #[test]
    fn test_root_and_unknown_local_command() {
        let mut engine = engine();
        assert_eq!(publish(&mut engine, "", 1u8), Err(StatusCode::NotSupported));

        let mut env = engine.shared.pool.alloc();
        env.set_topic(Topic::parse("_/!nope").unwrap());
        assert_eq!(
            engine.local_command(&Topic::parse("_/!nope").unwrap(), &mut env),
            Err(StatusCode::NotSupported)
        );
    }

    /// Тест проверяет запрос значения и метаданных.
    #[test]
    fn test_query_value_and_metadata() {
        let mut engine = engine();
        publish(&mut engine, "a/b", 7i64).unwrap();
        publish(&mut engine, "a/b$", Value::json("{\"dtype\": \"i64\"}")).unwrap();
        let q = |engine: &Engine, t: &str| engine.query(&Topic::parse(t).unwrap());
        assert_eq!(q(&engine, "a/b"), Ok(Value::I64(7)));
        assert_eq!(q(&engine, "a/b&"), Ok(Value::I64(7)));
        assert_eq!(q(&engine, "a/b%"), Ok(Value::json("{\"dtype\": \"i64\"}")));
        assert_eq!(q(&engine, "a"), Ok(Value::Null));
        assert_eq!(q(&engine, "a/z"), Err(StatusCode::NotFound));
    }

    /// Тест проверяет регистрацию устройства: пересылка команд, подавление
    /// эха, список устройств и повтор добавлений новому подписчику.
    #[test]
    fn test_device_lifecycle() {
        let mut engine = engine();
        engine.publish_driver_topics();
        let queue = Arc::new(crate::pubsub::MsgQueue::new());
        let mut add = engine.shared.pool.envelope(
            Topic::parse(DEVICE_ADD).unwrap(),
            "u/js220/0001",
            ValueFlags::empty(),
        );
        add.set_control(Control::DeviceAdd {
            prefix: Topic::parse("u/js220/0001").unwrap(),
            commands: Arc::clone(&queue),
        });
        engine.handle_backend(add);

        let list = engine.query(&Topic::parse(DEVICE_LIST).unwrap()).unwrap();
        assert_eq!(list, Value::from("u/js220/0001"));

        // команда приложения уходит устройству
        publish(&mut engine, "u/js220/0001/s/i/ctrl", 1u8).unwrap();
        assert_eq!(queue.pop().unwrap().topic(), "u/js220/0001/s/i/ctrl");

        // значение от устройства не возвращается ему же
        let update = engine.shared.pool.envelope(
            Topic::parse("u/js220/0001/s/v/range").unwrap(),
            3u8,
            ValueFlags::RETAIN,
        );
        engine.handle_backend(update);
        assert!(queue.is_empty());

        let log: Log = Default::default();
        subscribe(
            &mut engine,
            "@",
            &recorder(&log),
            SubscribeFlags::RETAIN | SubscribeFlags::PUB,
        );
        assert_eq!(log.lock()[0], "@/!add=u/js220/0001");

        let remove = engine.shared.pool.envelope(
            Topic::parse(DEVICE_REMOVE).unwrap(),
            "u/js220/0001",
            ValueFlags::empty(),
        );
        engine.handle_backend(remove);
        assert!(queue.is_closed());
        let list = engine.query(&Topic::parse(DEVICE_LIST).unwrap()).unwrap();
        assert_eq!(list, Value::from(""));
    }

    /// Тест проверяет кодирование версии драйвера.
    #[test]
    fn test_driver_version_layout() {
        let v = driver_version();
        assert_eq!(v >> 24, env!("CARGO_PKG_VERSION_MAJOR").parse::<u32>().unwrap());
        assert_eq!((v >> 16) & 0xff, env!("CARGO_PKG_VERSION_MINOR").parse::<u32>().unwrap());
    }
}
