//! Ядро publish–subscribe.
//!
//! - `tree`: дерево топиков с сохранёнными значениями и метаданными.
//! - `dispatch`: доставка с всплытием, повтор сохранённых значений, отписка.
//! - `subscriber`: трейт подписчика, идентичность и флаги подписки.
//! - `correlator`: ожидающие вызовы и их дедлайны.
//! - `queue`: очередь конвертов между потоками.

pub mod correlator;
mod dispatch;
pub mod queue;
pub mod subscriber;
pub mod tree;

pub use correlator::*;
pub use queue::*;
pub use subscriber::*;
pub use tree::{NodeId, TopicTree};
