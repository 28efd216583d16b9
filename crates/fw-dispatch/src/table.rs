//! The command surface, declared once.

use fw_core::PermissionTier;
use std::collections::HashMap;

/// Where a command may be issued relative to the forum's control thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    Any,
    ControlOnly,
    OutsideControl,
}

impl Scope {
    /// A forum without a control thread only runs `Any` and `OutsideControl` commands.
    pub fn permits(self, thread: u64, control: Option<u64>) -> bool {
        match self {
            Scope::Any => true,
            Scope::ControlOnly => control == Some(thread),
            Scope::OutsideControl => control != Some(thread),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    Ping,
    /// Delete the mentioned content's parent, banning its author for `days` when non-zero.
    Drop { days: u32 },
    /// Drop for 10 days and blacklist the author in the record store.
    ExDrop,
    Hide,
    Unhide,
    TmpHide,
    TmpUnhide,
    Block { days: u32 },
    Unblock,
    ForumBlacklist,
    ForumUnblacklist,
    /// Fixed target tier, or `None` to read it from the second argument.
    SetTier(Option<PermissionTier>),
    ImageBan,
    ImageUnban,
    Register,
    Broadcast,
    Noop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandSpec {
    pub name: &'static str,
    pub min_tier: PermissionTier,
    pub scope: Scope,
    pub kind: CommandKind,
}

const fn spec(name: &'static str, min_tier: PermissionTier, scope: Scope, kind: CommandKind) -> CommandSpec {
    CommandSpec { name, min_tier, scope, kind }
}

use CommandKind as K;
use PermissionTier::{Neutral, Tier1, Tier2, Tier3};
use Scope::{Any, ControlOnly, OutsideControl};

pub const COMMANDS: &[CommandSpec] = &[
    spec("ping", Tier1, Any, K::Ping),
    spec("delete", Tier2, OutsideControl, K::Drop { days: 0 }),
    spec("drop", Tier2, OutsideControl, K::Drop { days: 10 }),
    spec("drop3", Tier2, OutsideControl, K::Drop { days: 3 }),
    spec("drop1", Tier2, OutsideControl, K::Drop { days: 1 }),
    spec("exdrop", Tier3, OutsideControl, K::ExDrop),
    spec("hide", Tier2, OutsideControl, K::Hide),
    spec("unhide", Tier2, OutsideControl, K::Unhide),
    spec("tmphide", Tier2, OutsideControl, K::TmpHide),
    spec("tmpunhide", Tier2, ControlOnly, K::TmpUnhide),
    spec("block", Tier2, ControlOnly, K::Block { days: 10 }),
    spec("block3", Tier2, ControlOnly, K::Block { days: 3 }),
    spec("block1", Tier2, ControlOnly, K::Block { days: 1 }),
    spec("unblock", Tier2, ControlOnly, K::Unblock),
    spec("tb_black", Tier3, ControlOnly, K::ForumBlacklist),
    spec("tb_reset", Tier3, ControlOnly, K::ForumUnblacklist),
    spec("white", Tier3, ControlOnly, K::SetTier(Some(Tier1))),
    spec("reset", Tier3, ControlOnly, K::SetTier(Some(Neutral))),
    spec("black", Tier3, ControlOnly, K::SetTier(Some(PermissionTier::Blacklisted))),
    spec("set", Tier3, ControlOnly, K::SetTier(None)),
    spec("img_ban", Tier3, OutsideControl, K::ImageBan),
    spec("img_unban", Tier3, OutsideControl, K::ImageUnban),
    spec("register", Tier2, Any, K::Register),
    spec("holyshit", Neutral, Any, K::Broadcast),
];

/// Unknown names land here. Nobody can run it; it does nothing anyway.
pub const NOOP: CommandSpec = spec(crate::parser::DEFAULT_COMMAND, Tier3, ControlOnly, K::Noop);

pub struct CommandTable {
    by_name: HashMap<&'static str, &'static CommandSpec>,
}

impl CommandTable {
    pub fn new() -> Self {
        Self { by_name: COMMANDS.iter().map(|c| (c.name, c)).collect() }
    }

    pub fn lookup(&self, name: &str) -> &'static CommandSpec {
        self.by_name.get(name).copied().unwrap_or(&NOOP)
    }
}

impl Default for CommandTable {
    fn default() -> Self {
        Self::new()
    }
}
