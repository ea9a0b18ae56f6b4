//! Сообщения шины: типизированные значения, конверты и пул буферов.
//!
//! - `value`: значение топика и его заимствованное представление.
//! - `envelope`: конверт с топиком, значением и данными маршрутизации.
//! - `pool`: списки свободных буферов двух классов размера.

pub mod envelope;
pub mod pool;
pub mod value;

pub(crate) use envelope::Control;
pub use envelope::Envelope;
pub use pool::*;
pub use value::*;
