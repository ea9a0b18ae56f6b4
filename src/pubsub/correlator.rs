//! Сопоставление публикаций с их кодами возврата.
//!
//! Вызывающий поток создаёт [`PendingCall`] и ждёт на своём [`CallSlot`].
//! Поток диспетчера держит ожидающие вызовы в [`PendingCalls`]: куча
//! дедлайнов для выбора ближайшего истечения и индекс по топику для
//! завершения по приходу `topic#`. Записи, удалённые из индекса, остаются в
//! куче и пропускаются при извлечении.

use std::{
    cmp::Reverse,
    collections::{BinaryHeap, HashMap},
    sync::Arc,
    time::Instant,
};

use gaugebus_error::StatusCode;
use parking_lot::{Condvar, Mutex};
use tracing::{debug, trace};

use crate::message::Value;

/// Результат ожидающего вызова.
#[derive(Debug, Clone, PartialEq)]
pub struct CallOutcome {
    /// Код возврата, `0`: успех.
    pub code: i32,
    /// Значение ответа (для запросов).
    pub value: Option<Value>,
}

impl CallOutcome {
    pub fn code(code: i32) -> Self {
        Self { code, value: None }
    }

    pub fn status(status: StatusCode) -> Self {
        Self::code(status.code())
    }

    pub fn with_value(value: Value) -> Self {
        Self {
            code: 0,
            value: Some(value),
        }
    }
}

/// Ячейка результата, на которой ждёт вызывающий поток. Сохраняется только
/// первый результат.
#[derive(Default)]
pub struct CallSlot {
    outcome: Mutex<Option<CallOutcome>>,
    cond: Condvar,
}

impl CallSlot {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Записывает результат, если его ещё нет. Возвращает `true`, если
    /// запись состоялась.
    pub fn resolve(
        &self,
        outcome: CallOutcome,
    ) -> bool {
        let mut slot = self.outcome.lock();
        if slot.is_some() {
            return false;
        }
        *slot = Some(outcome);
        self.cond.notify_all();
        true
    }

    pub fn is_resolved(&self) -> bool {
        self.outcome.lock().is_some()
    }

    /// Ждёт результат до `deadline`. `None`, если его так и не было.
    pub fn wait_until(
        &self,
        deadline: Instant,
    ) -> Option<CallOutcome> {
        let mut slot = self.outcome.lock();
        while slot.is_none() {
            if self.cond.wait_until(&mut slot, deadline).timed_out() {
                break;
            }
        }
        slot.clone()
    }
}

/// Запись ожидающего вызова. Если запись уничтожена без результата,
/// вызов завершается как прерванный.
pub struct PendingCall {
    topic: String,
    deadline: Instant,
    slot: Arc<CallSlot>,
}

impl PendingCall {
    /// `topic`: ожидаемый топик кода возврата (`{topic}#`).
    pub fn new(
        topic: impl Into<String>,
        deadline: Instant,
        slot: Arc<CallSlot>,
    ) -> Self {
        Self {
            topic: topic.into(),
            deadline,
            slot,
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    pub fn resolve(
        self,
        outcome: CallOutcome,
    ) {
        self.slot.resolve(outcome);
    }
}

impl Drop for PendingCall {
    fn drop(&mut self) {
        if self.slot.resolve(CallOutcome::status(StatusCode::Aborted)) {
            debug!(topic = %self.topic, "pending call dropped unresolved");
        }
    }
}

impl std::fmt::Debug for PendingCall {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("PendingCall")
            .field("topic", &self.topic)
            .field("deadline", &self.deadline)
            .finish()
    }
}

/// Таблица ожидающих вызовов, упорядоченная по дедлайну.
#[derive(Default)]
pub struct PendingCalls {
    seq: u64,
    queue: BinaryHeap<Reverse<(Instant, u64)>>,
    calls: HashMap<u64, PendingCall>,
    by_topic: HashMap<String, Vec<u64>>,
}

////////////////////////////////////////////////////////////////////////////////
// Собственные методы PendingCalls
////////////////////////////////////////////////////////////////////////////////

impl PendingCalls {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        call: PendingCall,
    ) {
        self.seq += 1;
        let id = self.seq;
        trace!(topic = %call.topic, id, "pending call registered");
        self.queue.push(Reverse((call.deadline, id)));
        self.by_topic.entry(call.topic.clone()).or_default().push(id);
        self.calls.insert(id, call);
    }

    /// Завершает вызов, ждущий `topic`, с ближайшим дедлайном. Возвращает
    /// `false`, если никто не ждёт.
    pub fn complete(
        &mut self,
        topic: &str,
        outcome: CallOutcome,
    ) -> bool {
        let Some(ids) = self.by_topic.get_mut(topic) else {
            return false;
        };
        let calls = &self.calls;
        let Some(pos) = ids
            .iter()
            .enumerate()
            .filter_map(|(pos, id)| calls.get(id).map(|c| (pos, c.deadline)))
            .min_by_key(|&(_, deadline)| deadline)
            .map(|(pos, _)| pos)
        else {
            return false;
        };
        let id = ids.remove(pos);
        if ids.is_empty() {
            self.by_topic.remove(topic);
        }
        match self.calls.remove(&id) {
            Some(call) => {
                call.resolve(outcome);
                true
            }
            None => false,
        }
    }

    /// Завершает с `TimedOut` все вызовы с дедлайном не позже `now`.
    /// Возвращает их число.
    pub fn expire_due(
        &mut self,
        now: Instant,
    ) -> usize {
        let mut expired = 0;
        while let Some(Reverse((deadline, id))) = self.queue.peek().copied() {
            if deadline > now {
                break;
            }
            self.queue.pop();
            if let Some(call) = self.take(id) {
                debug!(topic = %call.topic, "pending call timed out");
                call.resolve(CallOutcome::status(StatusCode::TimedOut));
                expired += 1;
            }
        }
        expired
    }

    /// Завершает с `Aborted` все вызовы.
    pub fn abort_all(&mut self) -> usize {
        let count = self.calls.len();
        self.queue.clear();
        self.by_topic.clear();
        for (_, call) in self.calls.drain() {
            call.resolve(CallOutcome::status(StatusCode::Aborted));
        }
        count
    }

    /// Ближайший дедлайн среди ожидающих вызовов.
    pub fn next_deadline(&mut self) -> Option<Instant> {
        while let Some(Reverse((deadline, id))) = self.queue.peek().copied() {
            if self.calls.contains_key(&id) {
                return Some(deadline);
            }
            self.queue.pop();
        }
        None
    }

    pub fn len(&self) -> usize {
        self.calls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    fn take(
        &mut self,
        id: u64,
    ) -> Option<PendingCall> {
        let call = self.calls.remove(&id)?;
        if let Some(ids) = self.by_topic.get_mut(&call.topic) {
            ids.retain(|&other| other != id);
            if ids.is_empty() {
                self.by_topic.remove(&call.topic);
            }
        }
        Some(call)
    }
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////
