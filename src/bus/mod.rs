//! Шина: жизненный цикл потока диспетчера и API приложения.
//!
//! [`Bus`] создаёт поток диспетчера и отдаёт ему конверты через очередь
//! команд. Блокирующие вызовы (`publish` с таймаутом, `query`, `subscribe`)
//! ждут код возврата `{topic}#` через таблицу ожидающих вызовов. Бэкенды
//! получают свою сторону через [`Bus::backend`].

mod device;
mod engine;

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread::{self, JoinHandle, ThreadId},
    time::{Duration, Instant},
};

pub use device::{Backend, DevicePort};
use gaugebus_error::{check_return_code, BusError, GaugeResult, GenericError, StatusCode};
use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::{
    config::BusConfig,
    message::{Control, Envelope, EnvelopePool, Value, ValueFlags},
    pubsub::{
        CallOutcome, CallSlot, MsgQueue, PendingCall, Signal, SubscribeFlags, SubscriberRef,
        Subscription,
    },
    topic::{Topic, TopicSuffix},
};

/// Подписка.
pub const SUBSCRIBE: &str = "_/!sub";
/// Отписка от одного топика.
pub const UNSUBSCRIBE: &str = "_/!unsub";
/// Отписка от всех топиков.
pub const UNSUBSCRIBE_ALL: &str = "_/!unsub+";
/// Запрос сохранённого значения.
pub const QUERY: &str = "_/!query";
/// Регистрация устройства бэкендом.
pub const DEVICE_ADD: &str = "@/!add";
/// Снятие устройства с регистрации.
pub const DEVICE_REMOVE: &str = "@/!remove";
/// Список зарегистрированных устройств через запятую.
pub const DEVICE_LIST: &str = "@/list";
/// Версия драйвера.
pub const DRIVER_VERSION: &str = "@/version";
/// Завершение потока диспетчера.
pub const FINALIZE: &str = "@/!final";

/// Запас сверх дедлайна на один цикл опроса диспетчера.
const WAIT_GRACE: Duration = Duration::from_millis(100);

/// Состояние, разделяемое потоком диспетчера, приложением и бэкендами.
pub(crate) struct BusShared {
    pub(crate) config: BusConfig,
    pub(crate) pool: EnvelopePool,
    pub(crate) signal: Arc<Signal>,
    /// Публикации и команды приложения.
    pub(crate) commands: MsgQueue,
    /// Конверты от бэкендов.
    pub(crate) backend: MsgQueue,
    closed: AtomicBool,
    dispatch_thread: OnceCell<ThreadId>,
    finished: Arc<CallSlot>,
}

impl BusShared {
    pub(crate) fn new(config: BusConfig) -> Self {
        let signal = Arc::new(Signal::new());
        let pool = EnvelopePool::with_sizes(
            config.control_payload_size,
            config.stream_payload_size,
            config.pool_prealloc_control,
            config.pool_prealloc_stream,
        );
        Self {
            pool,
            commands: MsgQueue::with_signal(Arc::clone(&signal)),
            backend: MsgQueue::with_signal(Arc::clone(&signal)),
            signal,
            closed: AtomicBool::new(false),
            dispatch_thread: OnceCell::new(),
            finished: CallSlot::new(),
            config,
        }
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Данные значения не должны превышать наибольший класс пула.
    pub(crate) fn check_payload(
        &self,
        env: &Envelope,
    ) -> GaugeResult<()> {
        let len = env.value().as_bytes().map_or(0, <[u8]>::len);
        let max = self.config.stream_payload_size;
        if len > max {
            return Err(BusError::PayloadTooBig {
                topic: env.topic().to_string(),
                len,
                max,
            }
            .into());
        }
        Ok(())
    }

    fn on_dispatch_thread(&self) -> bool {
        self.dispatch_thread.get() == Some(&thread::current().id())
    }
}

/// Отмечает завершение потока диспетчера, в том числе при панике.
struct FinishGuard(Arc<CallSlot>);

impl Drop for FinishGuard {
    fn drop(&mut self) {
        let status = if thread::panicking() {
            StatusCode::Aborted
        } else {
            StatusCode::Success
        };
        self.0.resolve(CallOutcome::status(status));
    }
}

/// Буфер запроса: скаляр или область заданной вместимости для строк, JSON и
/// бинарных данных.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryBuffer {
    capacity: Option<usize>,
    value: Value,
}

impl QueryBuffer {
    /// Буфер для числовых значений.
    pub fn scalar() -> Self {
        Self {
            capacity: None,
            value: Value::Null,
        }
    }

    /// Буфер для значений с данными длиной не больше `capacity` байт.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity: Some(capacity),
            value: Value::Null,
        }
    }

    pub fn capacity(&self) -> Option<usize> {
        self.capacity
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    pub fn into_value(self) -> Value {
        self.value
    }

    fn fill(
        &mut self,
        value: Value,
    ) -> Result<(), StatusCode> {
        match (self.capacity, value.view().as_bytes()) {
            (None, Some(_)) => return Err(StatusCode::SyntaxError),
            (Some(cap), Some(bytes)) if bytes.len() > cap => return Err(StatusCode::TooSmall),
            _ => {}
        }
        self.value = value;
        Ok(())
    }
}

/// Шина сообщений.
///
/// Владеет потоком диспетчера. [`Bus::shutdown`] (или `Drop`) завершает
/// поток, прерывает ожидающие вызовы и закрывает пул.
pub struct Bus {
    shared: Arc<BusShared>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

////////////////////////////////////////////////////////////////////////////////
// Собственные методы
////////////////////////////////////////////////////////////////////////////////

impl Bus {
    /// Создаёт шину и запускает поток диспетчера.
    pub fn new(config: BusConfig) -> GaugeResult<Self> {
        config
            .validate()
            .map_err(|e| GenericError::new(StatusCode::ParameterInvalid, e.to_string()))?;
        let thread_name = config.thread_name.clone();
        let shared = Arc::new(BusShared::new(config));

        let handle = {
            let shared = Arc::clone(&shared);
            thread::Builder::new().name(thread_name).spawn(move || {
                let _done = FinishGuard(Arc::clone(&shared.finished));
                let _ = shared.dispatch_thread.set(thread::current().id());
                engine::Engine::new(shared).run();
            })?
        };
        info!(version = env!("CARGO_PKG_VERSION"), "bus started");

        Ok(Self {
            shared,
            thread: Mutex::new(Some(handle)),
        })
    }

    pub fn config(&self) -> &BusConfig {
        &self.shared.config
    }

    pub fn pool(&self) -> &EnvelopePool {
        &self.shared.pool
    }

    /// Сторона бэкендов для регистрации устройств.
    pub fn backend(&self) -> Backend {
        Backend::new(Arc::clone(&self.shared))
    }

    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }

    /// Публикует сохраняемое значение. Нулевой `timeout` не ждёт
    /// подтверждения.
    pub fn publish(
        &self,
        topic: &str,
        value: impl Into<Value>,
        timeout: Duration,
    ) -> GaugeResult<()> {
        self.publish_with_flags(topic, value, ValueFlags::RETAIN, timeout)
    }

    pub fn publish_with_flags(
        &self,
        topic: &str,
        value: impl Into<Value>,
        flags: ValueFlags,
        timeout: Duration,
    ) -> GaugeResult<()> {
        let env = self.shared.pool.envelope(Topic::parse(topic)?, value, flags);
        self.call(env, timeout).map(|_| ())
    }

    /// Отправляет готовый конверт.
    pub fn publish_envelope(
        &self,
        envelope: Envelope,
        timeout: Duration,
    ) -> GaugeResult<()> {
        self.call(envelope, timeout).map(|_| ())
    }

    /// Сохранённое значение топика. `t%` и `t$` возвращают метаданные,
    /// отсутствующее значение: `Value::Null`. Нулевой `timeout` заменяется
    /// таймаутом запроса из конфигурации.
    pub fn query(
        &self,
        topic: &str,
        timeout: Duration,
    ) -> GaugeResult<Value> {
        let target = Topic::parse(topic)?;
        gaugebus_error::ensure!(
            !target.path().is_empty(),
            StatusCode::ParameterInvalid,
            "cannot query the root topic"
        );
        let timeout = if timeout.is_zero() {
            self.shared.config.query_timeout()
        } else {
            timeout
        };
        let mut env = self.shared.pool.envelope(
            Topic::parse(QUERY)?,
            Value::from(target.as_str().to_string()),
            ValueFlags::empty(),
        );
        env.set_control(Control::Query { topic: target });
        Ok(self.call(env, timeout)?.value.unwrap_or_default())
    }

    /// Запрос в буфер вызывающего: `TooSmall`, если данные не помещаются,
    /// `SyntaxError` для строк и бинарных данных в скалярном буфере.
    pub fn query_into(
        &self,
        topic: &str,
        buffer: &mut QueryBuffer,
        timeout: Duration,
    ) -> GaugeResult<()> {
        let value = self.query(topic, timeout)?;
        buffer.fill(value).map_err(|code| {
            GenericError::new(code, format!("query buffer cannot hold value of {topic}")).into()
        })
    }

    /// Подписывает `subscriber` на поддерево `topic`. С флагом `RETAIN`
    /// сохранённые значения повторяются до возврата из вызова.
    pub fn subscribe(
        &self,
        topic: &str,
        flags: SubscribeFlags,
        subscriber: &SubscriberRef,
        timeout: Duration,
    ) -> GaugeResult<()> {
        let target = Topic::parse(topic)?;
        let mut env = self.shared.pool.envelope(
            Topic::parse(SUBSCRIBE)?,
            Value::from(target.as_str().to_string()),
            ValueFlags::empty(),
        );
        env.set_control(Control::Subscribe {
            topic: target,
            subscription: Subscription::new(subscriber.clone(), flags),
        });
        self.call(env, timeout).map(|_| ())
    }

    /// Снимает подписки `subscriber` с одного топика. `NotFound`, если их
    /// не было.
    pub fn unsubscribe(
        &self,
        topic: &str,
        subscriber: &SubscriberRef,
        timeout: Duration,
    ) -> GaugeResult<()> {
        let target = Topic::parse(topic)?;
        let mut env = self.shared.pool.envelope(
            Topic::parse(UNSUBSCRIBE)?,
            Value::from(target.as_str().to_string()),
            ValueFlags::empty(),
        );
        env.set_control(Control::Unsubscribe {
            topic: target,
            subscriber: subscriber.clone(),
        });
        self.call(env, timeout).map(|_| ())
    }

    /// Снимает все подписки `subscriber` во всём дереве.
    pub fn unsubscribe_all(
        &self,
        subscriber: &SubscriberRef,
        timeout: Duration,
    ) -> GaugeResult<()> {
        let mut env = self.shared.pool.alloc();
        env.set_topic(Topic::parse(UNSUBSCRIBE_ALL)?);
        env.set_control(Control::UnsubscribeAll {
            subscriber: subscriber.clone(),
        });
        self.call(env, timeout).map(|_| ())
    }

    /// Останавливает поток диспетчера. Повторный вызов ничего не делает.
    pub fn shutdown(&self) -> GaugeResult<()> {
        if self.shared.on_dispatch_thread() {
            return Err(BusError::InvalidContext {
                topic: FINALIZE.to_string(),
            }
            .into());
        }
        if self.shared.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        info!("bus shutdown requested");

        let mut env = self.shared.pool.alloc();
        env.set_topic(Topic::parse(FINALIZE)?);
        if self.shared.commands.push(env).is_err() {
            warn!("command queue already closed");
        }

        let deadline = Instant::now() + self.shared.config.shutdown_timeout();
        let handle = self.thread.lock().take();
        match self.shared.finished.wait_until(deadline) {
            Some(_) => {
                if let Some(handle) = handle {
                    if handle.join().is_err() {
                        warn!("dispatch thread panicked");
                    }
                }
                info!("bus stopped");
                Ok(())
            }
            None => {
                warn!(
                    timeout_ms = self.shared.config.shutdown_timeout_ms,
                    "dispatch thread did not stop in time, detaching"
                );
                Err(BusError::TimedOut {
                    topic: FINALIZE.to_string(),
                }
                .into())
            }
        }
    }

    /// Отправляет конверт и ждёт его код возврата.
    fn call(
        &self,
        mut env: Envelope,
        timeout: Duration,
    ) -> GaugeResult<CallOutcome> {
        if self.shared.is_closed() {
            return Err(BusError::Closed.into());
        }
        self.shared.check_payload(&env)?;
        if timeout.is_zero() {
            self.shared
                .commands
                .push(env)
                .map_err(|_| BusError::Closed)?;
            return Ok(CallOutcome::code(0));
        }

        let topic = env.topic().as_str().to_string();
        if self.shared.on_dispatch_thread() {
            return Err(BusError::InvalidContext { topic }.into());
        }

        let slot = CallSlot::new();
        let deadline = Instant::now() + timeout;
        let rc_topic = env.topic().with_suffix(TopicSuffix::ReturnCode);
        env.set_call(PendingCall::new(rc_topic.as_str(), deadline, Arc::clone(&slot)));
        self.shared
            .commands
            .push(env)
            .map_err(|_| BusError::Closed)?;

        let wait = deadline + self.shared.config.max_poll_interval() + WAIT_GRACE;
        let Some(outcome) = slot.wait_until(wait) else {
            debug!(topic = %topic, "call not resolved by dispatcher");
            return Err(BusError::TimedOut { topic }.into());
        };
        match StatusCode::from_i32(outcome.code) {
            Some(StatusCode::TimedOut) => Err(BusError::TimedOut { topic }.into()),
            Some(StatusCode::Aborted) => Err(BusError::Aborted { topic }.into()),
            _ => {
                check_return_code(&topic, outcome.code)?;
                Ok(outcome)
            }
        }
    }
}

////////////////////////////////////////////////////////////////////////////////
// Общие реализации трейтов
////////////////////////////////////////////////////////////////////////////////

impl Drop for Bus {
    fn drop(&mut self) {
        if let Err(err) = self.shutdown() {
            warn!(%err, "bus shutdown on drop failed");
        }
    }
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////
