//! Classification of chat text into commands and plain messages.

pub const COMMAND_SIGIL: char = '/';

/// Built-in commands that act on the chat's accumulator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SystemCommand {
    ClearAccumulator,
    ShowAccumulator,
    AccumulatorStatus,
}

impl SystemCommand {
    pub const ALL: [Self; 3] = [
        Self::ClearAccumulator,
        Self::ShowAccumulator,
        Self::AccumulatorStatus,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::ClearAccumulator => "clear_accumulator",
            Self::ShowAccumulator => "show_accumulator",
            Self::AccumulatorStatus => "accumulator_status",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.name() == name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParsedCommand<'a> {
    System(SystemCommand),
    Handler {
        /// The command as typed, without the sigil.
        full_command: &'a str,
        /// `None` for the legacy bare `/<tool>` form.
        handler: Option<&'a str>,
        tool: &'a str,
        /// Everything after the first whitespace following the command.
        trailing: &'a str,
    },
    PlainText(&'a str),
}

/// Classify `text`.
///
/// A handler command is split on its first `_`, so handler names cannot
/// contain one; everything after it belongs to the tool name.
pub fn parse(text: &str) -> ParsedCommand<'_> {
    let Some(body) = text.strip_prefix(COMMAND_SIGIL) else {
        return ParsedCommand::PlainText(text);
    };

    let (full_command, trailing) = body
        .split_once(char::is_whitespace)
        .unwrap_or((body, ""));

    if let Some(system) = SystemCommand::from_name(full_command) {
        return ParsedCommand::System(system);
    }

    let (handler, tool) = match full_command.split_once('_') {
        Some((handler, tool)) if !handler.is_empty() => (Some(handler), tool),
        Some((_, tool)) => (None, tool),
        None => (None, full_command),
    };

    ParsedCommand::Handler {
        full_command,
        handler,
        tool,
        trailing,
    }
}
