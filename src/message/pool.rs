//! Пул буферов конвертов с двумя классами размера.
//!
//! Буфер возвращается в свой список свободных при `Drop`. После
//! [`EnvelopePool::close`] буферы освобождаются сразу.

use std::{
    ops::{Deref, DerefMut},
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
};

use parking_lot::Mutex;
use tracing::debug;

use super::{Envelope, Value, ValueFlags};
use crate::topic::Topic;

/// Размер встроенного буфера управляющих сообщений.
pub const CONTROL_PAYLOAD_SIZE: usize = 1024;
/// Заголовок потокового блока данных.
pub const STREAM_HEADER_SIZE: usize = 48;
/// Размер встроенного буфера потоковых сообщений.
pub const STREAM_PAYLOAD_SIZE: usize = STREAM_HEADER_SIZE + 65536;

/// Класс размера буфера.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SizeClass {
    Control,
    Stream,
}

/// Счётчики одного класса размера.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClassStats {
    /// Новые выделения памяти.
    pub allocated: u64,
    /// Выдачи из списка свободных.
    pub reused: u64,
    /// Возвраты в пул или освобождения.
    pub released: u64,
    /// Буферов в списке свободных сейчас.
    pub free: usize,
}

/// Снимок статистики пула.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub control: ClassStats,
    pub stream: ClassStats,
}

#[derive(Default)]
struct ClassCounters {
    allocated: AtomicU64,
    reused: AtomicU64,
    released: AtomicU64,
}

struct FreeList {
    capacity: usize,
    buffers: Mutex<Vec<Vec<u8>>>,
    counters: ClassCounters,
}

impl FreeList {
    fn new(
        capacity: usize,
        prealloc: usize,
    ) -> Self {
        let buffers = (0..prealloc).map(|_| Vec::with_capacity(capacity)).collect();
        Self {
            capacity,
            buffers: Mutex::new(buffers),
            counters: ClassCounters::default(),
        }
    }

    fn take(&self) -> Vec<u8> {
        match self.buffers.lock().pop() {
            Some(buf) => {
                self.counters.reused.fetch_add(1, Ordering::Relaxed);
                buf
            }
            None => {
                self.counters.allocated.fetch_add(1, Ordering::Relaxed);
                Vec::with_capacity(self.capacity)
            }
        }
    }

    fn stats(&self) -> ClassStats {
        ClassStats {
            allocated: self.counters.allocated.load(Ordering::Relaxed),
            reused: self.counters.reused.load(Ordering::Relaxed),
            released: self.counters.released.load(Ordering::Relaxed),
            free: self.buffers.lock().len(),
        }
    }
}

struct PoolShared {
    control: FreeList,
    stream: FreeList,
    closing: AtomicBool,
}

impl PoolShared {
    fn list(
        &self,
        class: SizeClass,
    ) -> &FreeList {
        match class {
            SizeClass::Control => &self.control,
            SizeClass::Stream => &self.stream,
        }
    }
}

/// Пул буферов. Клонирование дешёвое: все копии разделяют одни списки.
#[derive(Clone)]
pub struct EnvelopePool {
    shared: Arc<PoolShared>,
}

/// Встроенный буфер конверта, взятый из пула.
pub struct PoolBuffer {
    data: Vec<u8>,
    class: SizeClass,
    pool: Arc<PoolShared>,
}

////////////////////////////////////////////////////////////////////////////////
// Собственные методы
////////////////////////////////////////////////////////////////////////////////

impl EnvelopePool {
    pub fn new() -> Self {
        Self::with_sizes(CONTROL_PAYLOAD_SIZE, STREAM_PAYLOAD_SIZE, 0, 0)
    }

    /// Пул с заданными размерами классов и числом заранее выделенных
    /// буферов.
    pub fn with_sizes(
        control_size: usize,
        stream_size: usize,
        prealloc_control: usize,
        prealloc_stream: usize,
    ) -> Self {
        Self {
            shared: Arc::new(PoolShared {
                control: FreeList::new(control_size, prealloc_control),
                stream: FreeList::new(stream_size, prealloc_stream),
                closing: AtomicBool::new(false),
            }),
        }
    }

    /// Пустой управляющий конверт для корневого топика.
    pub fn alloc(&self) -> Envelope {
        Envelope::with_buffer(Topic::root(), self.buffer(SizeClass::Control))
    }

    /// Пустой потоковый конверт для `topic`.
    pub fn alloc_stream(
        &self,
        topic: Topic,
    ) -> Envelope {
        Envelope::with_buffer(topic, self.buffer(SizeClass::Stream))
    }

    /// Конверт класса, в который помещаются `len` байт данных. Данные
    /// крупнее потокового буфера всё равно хранятся в куче, поэтому для них
    /// берётся управляющий буфер.
    pub fn alloc_for(
        &self,
        topic: Topic,
        len: usize,
    ) -> Envelope {
        let class = if len > self.shared.control.capacity && len <= self.shared.stream.capacity {
            SizeClass::Stream
        } else {
            SizeClass::Control
        };
        Envelope::with_buffer(topic, self.buffer(class))
    }

    /// Готовый конверт со значением и флагами.
    pub fn envelope(
        &self,
        topic: Topic,
        value: impl Into<Value>,
        flags: ValueFlags,
    ) -> Envelope {
        let value = value.into();
        let len = value.view().as_bytes().map_or(0, <[u8]>::len);
        let mut env = self.alloc_for(topic, len);
        env.set_value(value);
        env.set_flags(flags);
        env
    }

    pub(crate) fn buffer(
        &self,
        class: SizeClass,
    ) -> PoolBuffer {
        PoolBuffer {
            data: self.shared.list(class).take(),
            class,
            pool: Arc::clone(&self.shared),
        }
    }

    /// Вместимость встроенного буфера класса.
    pub fn capacity(
        &self,
        class: SizeClass,
    ) -> usize {
        self.shared.list(class).capacity
    }

    /// Переводит пул в режим немедленного освобождения и очищает списки
    /// свободных.
    pub fn close(&self) {
        self.shared.closing.store(true, Ordering::Release);
        let control = std::mem::take(&mut *self.shared.control.buffers.lock());
        let stream = std::mem::take(&mut *self.shared.stream.buffers.lock());
        debug!(
            control = control.len(),
            stream = stream.len(),
            "envelope pool closed"
        );
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closing.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            control: self.shared.control.stats(),
            stream: self.shared.stream.stats(),
        }
    }
}

impl PoolBuffer {
    pub fn class(&self) -> SizeClass {
        self.class
    }

    /// Вместимость по классу размера.
    pub fn limit(&self) -> usize {
        self.pool.list(self.class).capacity
    }

    /// Новый буфер того же класса из того же пула.
    pub fn sibling(&self) -> PoolBuffer {
        PoolBuffer {
            data: self.pool.list(self.class).take(),
            class: self.class,
            pool: Arc::clone(&self.pool),
        }
    }
}

////////////////////////////////////////////////////////////////////////////////
// Общие реализации трейтов
////////////////////////////////////////////////////////////////////////////////

impl Default for EnvelopePool {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EnvelopePool {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("EnvelopePool")
            .field("stats", &self.stats())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl std::fmt::Debug for PoolBuffer {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("PoolBuffer")
            .field("class", &self.class)
            .field("len", &self.data.len())
            .finish()
    }
}

impl Deref for PoolBuffer {
    type Target = Vec<u8>;

    fn deref(&self) -> &Self::Target {
        &self.data
    }
}

impl DerefMut for PoolBuffer {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.data
    }
}

impl Drop for PoolBuffer {
    fn drop(&mut self) {
        let list = self.pool.list(self.class);
        list.counters.released.fetch_add(1, Ordering::Relaxed);
        if self.pool.closing.load(Ordering::Acquire) {
            return;
        }
        let mut data = std::mem::take(&mut self.data);
        data.clear();
        list.buffers.lock().push(data);
    }
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////
