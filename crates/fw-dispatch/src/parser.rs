//! Command grammar: `@<bot> <command> [argument]`.

use fw_core::{UserId, UserQuery};

/// Name of the no-op command everything malformed maps to.
pub const DEFAULT_COMMAND: &str = "default";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParsedCommand<'a> {
    pub name: &'a str,
    /// Everything after the command name, trimmed. Empty when absent.
    pub arg: &'a str,
}

impl<'a> ParsedCommand<'a> {
    fn default_command() -> Self {
        Self { name: DEFAULT_COMMAND, arg: "" }
    }

    /// Whitespace separated argument words.
    pub fn words(&self) -> impl Iterator<Item = &'a str> {
        self.arg.split_whitespace()
    }
}

/// Splits mention text into command name and argument. The text must start
/// with an at-mention; the token right after it is the command.
pub fn parse_command(text: &str) -> ParsedCommand<'_> {
    let text = text.trim();
    if !text.starts_with('@') {
        return ParsedCommand::default_command();
    }

    let Some((_mention, rest)) = text.split_once(char::is_whitespace) else {
        return ParsedCommand::default_command();
    };

    let rest = rest.trim_start();
    let (name, arg) = match rest.split_once(char::is_whitespace) {
        Some((name, arg)) => (name, arg.trim()),
        None => (rest, ""),
    };

    if name.is_empty() {
        return ParsedCommand::default_command();
    }
    ParsedCommand { name, arg }
}

/// `#123#` is a platform uid, `/123/` a user id, anything else a user name.
pub fn parse_user_arg(arg: &str) -> Option<UserQuery> {
    let arg = arg.trim();
    if arg.is_empty() {
        return None;
    }

    if let Some(uid) = between(arg, '#') {
        return Some(UserQuery::PlatformUid(uid));
    }
    if let Some(id) = between(arg, '/') {
        return Some(UserQuery::Id(UserId(id)));
    }
    Some(UserQuery::Name(arg.to_string()))
}

/// The number between the first and last `sign`, if that is all digits.
fn between(arg: &str, sign: char) -> Option<u64> {
    let first = arg.find(sign)?;
    let last = arg.rfind(sign)?;
    if last <= first {
        return None;
    }
    let inner = &arg[first + sign.len_utf8()..last];
    if inner.is_empty() || !inner.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    inner.parse().ok()
}
