//! Mention-driven operator commands.

pub mod cursor;
pub mod dispatcher;
pub mod listener;
pub mod parser;
pub mod rotation;
pub mod table;

pub use cursor::MentionCursor;
pub use dispatcher::{CommandOutcome, Dispatcher};
pub use listener::CommandLoop;
pub use parser::{parse_command, parse_user_arg, ParsedCommand, DEFAULT_COMMAND};
pub use rotation::{BroadcastCooldown, OnCallRotation};
pub use table::{CommandKind, CommandSpec, CommandTable, Scope, COMMANDS};
