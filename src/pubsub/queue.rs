//! Потокобезопасная очередь конвертов.
//!
//! FIFO под мьютексом плюс сигнал пробуждения. Несколько очередей могут
//! разделять один [`Signal`], тогда ожидающий поток просыпается при
//! появлении данных в любой из них.

use std::{
    collections::VecDeque,
    sync::Arc,
    time::{Duration, Instant},
};

use parking_lot::{Condvar, Mutex};

use crate::message::Envelope;

/// Сигнал пробуждения. Уведомление запоминается до следующего ожидания,
/// поэтому не теряется, если пришло раньше.
#[derive(Default)]
pub struct Signal {
    pending: Mutex<bool>,
    cond: Condvar,
}

impl Signal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notify(&self) {
        let mut pending = self.pending.lock();
        *pending = true;
        self.cond.notify_all();
    }

    /// Ждёт уведомления не дольше `timeout` и сбрасывает его. Возвращает
    /// `true`, если уведомление было.
    pub fn wait_timeout(
        &self,
        timeout: Duration,
    ) -> bool {
        let mut pending = self.pending.lock();
        if !*pending {
            self.cond.wait_for(&mut pending, timeout);
        }
        std::mem::replace(&mut *pending, false)
    }
}

#[derive(Default)]
struct QueueState {
    items: VecDeque<Envelope>,
    closed: bool,
}

/// Очередь конвертов между потоками.
pub struct MsgQueue {
    state: Mutex<QueueState>,
    signal: Arc<Signal>,
}

////////////////////////////////////////////////////////////////////////////////
// Собственные методы
////////////////////////////////////////////////////////////////////////////////

impl MsgQueue {
    pub fn new() -> Self {
        Self::with_signal(Arc::new(Signal::new()))
    }

    /// Очередь, уведомляющая общий сигнал.
    pub fn with_signal(signal: Arc<Signal>) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            signal,
        }
    }

    pub fn signal(&self) -> &Arc<Signal> {
        &self.signal
    }

    /// Добавляет конверт в конец. Закрытая очередь возвращает его обратно.
    pub fn push(
        &self,
        envelope: Envelope,
    ) -> Result<(), Envelope> {
        {
            let mut state = self.state.lock();
            if state.closed {
                return Err(envelope);
            }
            state.items.push_back(envelope);
        }
        self.signal.notify();
        Ok(())
    }

    pub fn pop(&self) -> Option<Envelope> {
        self.state.lock().items.pop_front()
    }

    /// Забирает всё содержимое одним захватом блокировки.
    pub fn drain(&self) -> VecDeque<Envelope> {
        std::mem::take(&mut self.state.lock().items)
    }

    /// Ждёт конверт не дольше `timeout`. Для закрытой пустой очереди сразу
    /// возвращает `None`.
    pub fn pop_timeout(
        &self,
        timeout: Duration,
    ) -> Option<Envelope> {
        let deadline = Instant::now() + timeout;
        loop {
            {
                let mut state = self.state.lock();
                if let Some(env) = state.items.pop_front() {
                    return Some(env);
                }
                if state.closed {
                    return None;
                }
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            self.signal.wait_timeout(deadline - now);
        }
    }

    /// Закрывает очередь для новых конвертов. Уже добавленные остаются
    /// доступны.
    pub fn close(&self) {
        self.state.lock().closed = true;
        self.signal.notify();
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    pub fn len(&self) -> usize {
        self.state.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().items.is_empty()
    }
}

impl Default for MsgQueue {
    fn default() -> Self {
        Self::new()
    }
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////
