//! Shared types, error definitions, and utilities used across all catmandu crates.

pub mod error;
pub mod types;

pub use {
    error::{Error, FromMessage, Result},
    types::{ChatId, InboundMessage, OutboundReply, Sender},
};
