//! Per-chat accumulation of plain messages that become the parameters of
//! the next command.
//!
//! - [`Accumulator`]: bounded FIFO buffer per chat, one lock per chat
//! - [`AccumulatorManager`]: feedback wording, extraction, display formatting

pub mod accumulator;
pub mod manager;

pub use {accumulator::Accumulator, manager::AccumulatorManager};
