use cli9_sdk::ScopeKind;
use std::fmt;
use std::sync::Arc;

use crate::node::{Inode, Node, ROOT_INODE};

/// What a path segment points at: a durable node by inode, or an ephemeral
/// node held directly.
#[derive(Debug, Clone)]
pub enum Target {
    Stored(Inode),
    Ephemeral(Arc<Node>),
}

impl Target {
    #[must_use]
    pub const fn inode(&self) -> Option<Inode> {
        match self {
            Self::Stored(inode) => Some(*inode),
            Self::Ephemeral(_) => None,
        }
    }
}

impl PartialEq for Target {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Stored(a), Self::Stored(b)) => a == b,
            (Self::Ephemeral(a), Self::Ephemeral(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

/// Route from the root to a node: one `(name, target)` pair per segment.
///
/// A path is also the handle through which the VFS addresses a node, since
/// ephemeral nodes only exist relative to where they were produced.
#[derive(Debug, Clone, PartialEq)]
pub struct Path {
    parts: Vec<(String, Target)>,
}

impl Default for Path {
    fn default() -> Self {
        Self::root()
    }
}

impl Path {
    #[must_use]
    pub fn root() -> Self {
        Self {
            parts: vec![(String::new(), Target::Stored(ROOT_INODE))],
        }
    }

    #[must_use]
    pub fn join(&self, name: impl Into<String>, target: Target) -> Self {
        let mut parts = self.parts.clone();
        parts.push((name.into(), target));
        Self { parts }
    }

    /// Same location, pointing at a different node.
    #[must_use]
    pub fn replaced(&self, target: Target) -> Self {
        let mut parts = self.parts.clone();
        if let Some(last) = parts.last_mut() {
            last.1 = target;
        }
        Self { parts }
    }

    /// The containing directory; the root is its own parent.
    #[must_use]
    pub fn parent(&self) -> Self {
        if self.parts.len() <= 1 {
            return self.clone();
        }
        Self {
            parts: self.parts[..self.parts.len() - 1].to_vec(),
        }
    }

    #[must_use]
    pub fn target(&self) -> &Target {
        // never empty: every path starts at the root
        &self.parts[self.parts.len() - 1].1
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.parts[self.parts.len() - 1].0
    }

    #[must_use]
    pub fn depth(&self) -> usize {
        self.parts.len() - 1
    }

    #[must_use]
    pub fn is_root(&self) -> bool {
        self.parts.len() == 1
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.parts.iter().map(|(name, _)| name.as_str())
    }

    #[must_use]
    pub fn contains(&self, target: &Target) -> bool {
        self.parts.iter().any(|(_, t)| t == target)
    }

    #[must_use]
    pub fn absolute(&self) -> String {
        self.to_string()
    }

    /// Rendered from the last segment named `name` (or the whole path).
    #[must_use]
    pub fn relative(&self, name: &str) -> String {
        match self.parts.iter().rposition(|(n, _)| n == name) {
            Some(index) if index > 0 => self.parts[index..]
                .iter()
                .map(|(n, _)| n.as_str())
                .collect::<Vec<_>>()
                .join("/"),
            _ => self.to_string(),
        }
    }

    /// Home-relative rendering used by prompts: `/home/user/docs` is
    /// `~/docs` in a user scope. Paths outside `/home` render unchanged.
    #[must_use]
    pub fn short(&self, scope: ScopeKind) -> String {
        let full = self.to_string();
        let Some(rest) = full.strip_prefix("/home/") else {
            return full;
        };
        let rest = match scope {
            ScopeKind::User => rest.strip_prefix("user").unwrap_or(rest),
            ScopeKind::Guild => rest.strip_prefix("guild").unwrap_or(rest),
            ScopeKind::Default => rest,
        };
        format!("~{rest}")
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_root() {
            return f.write_str("/");
        }
        let joined = self.names().collect::<Vec<_>>().join("/");
        f.write_str(&joined)
    }
}

/// Split on `sep` unless escaped with a backslash.
#[must_use]
pub fn split_unescaped(text: &str, sep: char) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut escaped = false;
    for c in text.chars() {
        if escaped {
            if c != sep {
                current.push('\\');
            }
            current.push(c);
            escaped = false;
        } else if c == '\\' {
            escaped = true;
        } else if c == sep {
            parts.push(std::mem::take(&mut current));
        } else {
            current.push(c);
        }
    }
    if escaped {
        current.push('\\');
    }
    parts.push(current);
    parts
}

#[cfg(test)]
mod tests {
    use super::*;

    fn docs() -> Path {
        Path::root()
            .join("home", Target::Stored(2))
            .join("user", Target::Stored(100))
            .join("docs", Target::Stored(10_000))
    }

    #[test]
    fn renders_absolute() {
        assert_eq!(Path::root().to_string(), "/");
        assert_eq!(docs().to_string(), "/home/user/docs");
        assert_eq!(docs().parent().to_string(), "/home/user");
        assert_eq!(Path::root().parent(), Path::root());
    }

    #[test]
    fn renders_short_and_relative() {
        assert_eq!(docs().short(ScopeKind::User), "~/docs");
        assert_eq!(docs().short(ScopeKind::Guild), "~user/docs");
        let bin = Path::root().join("bin", Target::Stored(3));
        assert_eq!(bin.short(ScopeKind::User), "/bin");
        assert_ne!(bin.short(ScopeKind::User), docs().short(ScopeKind::User));
        assert_eq!(Path::root().short(ScopeKind::User), "/");
        assert_eq!(docs().relative("user"), "user/docs");
        assert_eq!(docs().relative("missing"), "/home/user/docs");
    }

    #[test]
    fn splits_respecting_escapes() {
        assert_eq!(split_unescaped("a/b\\/c/d", '/'), vec!["a", "b/c", "d"]);
        assert_eq!(split_unescaped("/x", '/'), vec!["", "x"]);
        assert_eq!(split_unescaped("%a%b", '%'), vec!["", "a", "b"]);
        assert_eq!(split_unescaped("a\\.b", '/'), vec!["a\\.b"]);
    }
}
