//! Route inbound chat text.
//!
//! Every message is one of:
//! 1. a system command managing the chat's accumulator (`/clear_accumulator`,
//!    `/show_accumulator`, `/accumulator_status`)
//! 2. a handler command, `/<handler>_<tool> [text]` or the legacy
//!    `/<tool> [text]`, which consumes the accumulated messages
//! 3. plain text, which is accumulated
//!
//! Each routed message can also be appended to a daily chat log.

pub mod chat_log;
pub mod command;
pub mod invoker;
pub mod router;

pub use {
    chat_log::{ChatLogEntry, ChatLogger, MessageKind},
    command::{ParsedCommand, SystemCommand, parse},
    invoker::HandlerInvoker,
    router::{CommandRouter, GENERIC_FAILURE, NO_OUTPUT},
};
