use bitflags::bitflags;
use std::fmt;
use std::str::FromStr;

use crate::error::{ShellError, ShellResult};
use crate::identity::{Ident, Principal};

bitflags! {
    /// One rwx triple.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Perm: u16 {
        const READ    = 0o4;
        const WRITE   = 0o2;
        const EXECUTE = 0o1;
    }
}

/// What a permission check is asked about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    Read,
    Write,
    Execute,
    Owner,
    Group,
}

impl Action {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Write => "write",
            Self::Execute => "execute",
            Self::Owner => "owner",
            Self::Group => "group",
        }
    }

    const fn perm(self) -> Perm {
        match self {
            Self::Read => Perm::READ,
            Self::Write => Perm::WRITE,
            Self::Execute | Self::Owner | Self::Group => Perm::EXECUTE,
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Action {
    type Err = ShellError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "read" => Ok(Self::Read),
            "write" => Ok(Self::Write),
            "execute" => Ok(Self::Execute),
            "owner" => Ok(Self::Owner),
            "group" => Ok(Self::Group),
            other => Err(ShellError::internal(format!(
                "ValueError: action must be read, write, execute, owner or group, not {other}"
            ))),
        }
    }
}

/// Unix-style permission attached to every filesystem node.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Mode {
    pub value: u16,
    pub owner: Ident,
    pub group: Ident,
}

impl Mode {
    #[must_use]
    pub fn new(value: u16, owner: impl Into<Ident>, group: impl Into<Ident>) -> Self {
        Self {
            value: value & 0o777,
            owner: owner.into(),
            group: group.into(),
        }
    }

    /// `0o775 root:root`, the mode of the root directory.
    #[must_use]
    pub fn root() -> Self {
        Self::new(0o775, Ident::root(), Ident::root())
    }

    /// Triple for owner (0), group (1) or others (2).
    #[must_use]
    pub const fn triple(&self, class: usize) -> Perm {
        let shift = 6 - 3 * (class as u16 % 3);
        Perm::from_bits_truncate((self.value >> shift) & 0o7)
    }

    pub fn set_value(&mut self, value: u16) {
        self.value = value & 0o777;
    }

    /// `owner:group rwxr-x---`
    #[must_use]
    pub fn info(&self) -> String {
        format!("{}:{} {self}", self.owner, self.group)
    }

    /// Exactly one triple is consulted: the owner's when the principal is the
    /// owner, the group's when it belongs to the group, otherwise the others'.
    #[must_use]
    pub fn allows(&self, principal: &Principal, action: Action) -> bool {
        if principal.is_root() {
            return true;
        }
        match action {
            Action::Owner => return principal.id == self.owner,
            Action::Group => return principal.in_group(&self.group),
            _ => {}
        }

        let class = if principal.id == self.owner {
            0
        } else if principal.in_group(&self.group) {
            1
        } else {
            2
        };
        self.triple(class).contains(action.perm())
    }

    /// Like [`Mode::allows`] but fails with a `PermissionDenied` naming `file`.
    pub fn check(&self, principal: &Principal, action: Action, file: &str) -> ShellResult<()> {
        if self.allows(principal, action) {
            Ok(())
        } else {
            Err(ShellError::permission_denied(
                action.as_str(),
                file,
                self.info(),
            ))
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for class in 0..3 {
            let perm = self.triple(class);
            f.write_str(if perm.contains(Perm::READ) { "r" } else { "-" })?;
            f.write_str(if perm.contains(Perm::WRITE) { "w" } else { "-" })?;
            f.write_str(if perm.contains(Perm::EXECUTE) { "x" } else { "-" })?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mode() -> Mode {
        Mode::new(0o640, 1u64, 2u64)
    }

    #[test]
    fn renders_rwx() {
        assert_eq!(mode().to_string(), "rw-r-----");
        assert_eq!(Mode::root().to_string(), "rwxrwxr-x");
        assert_eq!(mode().info(), "1:2 rw-r-----");
    }

    #[test]
    fn owner_uses_owner_triple() {
        let owner = Principal::new(1u64);
        assert!(mode().allows(&owner, Action::Read));
        assert!(mode().allows(&owner, Action::Write));
        assert!(!mode().allows(&owner, Action::Execute));
    }

    #[test]
    fn group_member_reads_but_cannot_write() {
        let member = Principal::new(5u64).with_group(2u64);
        assert!(mode().allows(&member, Action::Read));
        assert!(!mode().allows(&member, Action::Write));
    }

    #[test]
    fn stranger_is_denied() {
        let stranger = Principal::new(9u64);
        assert!(!mode().allows(&stranger, Action::Read));
        let err = mode()
            .check(&stranger, Action::Write, "notes")
            .unwrap_err();
        assert!(err.is_permission_denied());
        assert_eq!(
            err.to_string(),
            "Permission 'write' denied: notes [1:2 rw-r-----]"
        );
    }

    #[test]
    fn owner_and_group_actions() {
        let owner = Principal::new(1u64);
        let member = Principal::new(5u64).with_group(2u64);
        assert!(mode().allows(&owner, Action::Owner));
        assert!(mode().allows(&member, Action::Group));
        assert!(!mode().allows(&member, Action::Owner));
        assert!(!mode().allows(&owner, Action::Group));
    }

    #[test]
    fn root_bypasses_checks() {
        let root = Principal::new(Ident::root()).with_group(Ident::root());
        assert!(Mode::new(0o000, 1u64, 2u64).allows(&root, Action::Write));
    }

    #[test]
    fn owner_triple_wins_over_group() {
        // owner has no rights, group has all: the owner is still denied
        let m = Mode::new(0o070, 1u64, 2u64);
        let owner = Principal::new(1u64).with_group(2u64);
        assert!(!m.allows(&owner, Action::Read));
    }

    #[test]
    fn parses_actions() {
        assert_eq!("write".parse::<Action>().unwrap(), Action::Write);
        assert!("fly".parse::<Action>().is_err());
    }
}
