use bytes::Bytes;
use cli9_sdk::{Mode, Value};
use std::fmt;
use std::sync::Arc;

use crate::path::{Path, Target};
use crate::producer::Producer;

pub type Inode = u64;

/// Inode of the root directory.
pub const ROOT_INODE: Inode = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kind {
    File,
    Directory,
    Link,
    Home,
    Root,
    Generator,
    GeneratedFile,
    GeneratedDirectory,
    NetworkFile,
    NetworkDirectory,
    Filter,
    HomePointer,
    Command,
}

impl Kind {
    #[must_use]
    pub const fn tag(self) -> &'static str {
        match self {
            Self::File => "file",
            Self::Directory => "directory",
            Self::Link => "link",
            Self::Home => "home",
            Self::Root => "root",
            Self::Generator => "generator",
            Self::GeneratedFile => "generated_file",
            Self::GeneratedDirectory => "generated_directory",
            Self::NetworkFile => "network_file",
            Self::NetworkDirectory => "network_directory",
            Self::Filter => "filter",
            Self::HomePointer => "home_pointer",
            Self::Command => "command",
        }
    }

    #[must_use]
    pub fn from_tag(tag: &str) -> Option<Self> {
        Some(match tag {
            "file" => Self::File,
            "directory" => Self::Directory,
            "link" => Self::Link,
            "home" => Self::Home,
            "root" => Self::Root,
            "generator" => Self::Generator,
            "generated_file" => Self::GeneratedFile,
            "generated_directory" => Self::GeneratedDirectory,
            "network_file" => Self::NetworkFile,
            "network_directory" => Self::NetworkDirectory,
            "filter" => Self::Filter,
            "home_pointer" => Self::HomePointer,
            "command" => Self::Command,
            _ => return None,
        })
    }

    /// Kinds that can be selected into.
    #[must_use]
    pub const fn is_directory(self) -> bool {
        matches!(
            self,
            Self::Directory
                | Self::Home
                | Self::Root
                | Self::Generator
                | Self::GeneratedDirectory
                | Self::NetworkDirectory
                | Self::Filter
                | Self::HomePointer
        )
    }

    #[must_use]
    pub const fn is_file(self) -> bool {
        matches!(
            self,
            Self::File | Self::GeneratedFile | Self::NetworkFile | Self::Command
        )
    }

    /// Snapshots produced by a generator; never persisted, never writable.
    #[must_use]
    pub const fn is_generated(self) -> bool {
        matches!(
            self,
            Self::GeneratedFile | Self::GeneratedDirectory | Self::Command | Self::Filter
        )
    }

    /// The kind a generator turns a requested kind into.
    #[must_use]
    pub const fn generated(self) -> Self {
        match self {
            Self::File => Self::GeneratedFile,
            Self::Directory => Self::GeneratedDirectory,
            other => other,
        }
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Payload of a file-like node.
#[derive(Debug, Clone, PartialEq)]
pub enum Content {
    Text(String),
    Bytes(Bytes),
    Bool(bool),
    /// A registered command, as listed under `/bin`.
    Command { name: String, help: String },
    /// Structured value exposed by a generator.
    Value(Value),
}

impl Content {
    /// Size counted against the file size limit.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Text(s) => s.len(),
            Self::Bytes(b) => b.len(),
            _ => 0,
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// What `read` hands back.
    #[must_use]
    pub fn to_value(&self) -> Value {
        match self {
            Self::Text(s) => Value::str(s.clone()),
            Self::Bytes(b) => Value::Bytes(b.clone()),
            Self::Bool(b) => Value::str(if *b { "true" } else { "false" }),
            Self::Command { help, .. } => Value::str(help.clone()),
            Self::Value(v) => v.clone(),
        }
    }

    /// Append with a newline separator; mixed payloads fall back to text.
    #[must_use]
    pub fn appended(&self, other: &Self) -> Self {
        match (self, other) {
            (Self::Bytes(a), Self::Bytes(b)) => {
                let mut joined = Vec::with_capacity(a.len() + b.len() + 1);
                joined.extend_from_slice(a);
                joined.push(b'\n');
                joined.extend_from_slice(b);
                Self::Bytes(Bytes::from(joined))
            }
            (a, b) => Self::Text(format!("{}\n{}", a.to_value(), b.to_value())),
        }
    }
}

impl From<&str> for Content {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for Content {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<Bytes> for Content {
    fn from(b: Bytes) -> Self {
        Self::Bytes(b)
    }
}

impl From<Value> for Content {
    fn from(value: Value) -> Self {
        match value {
            Value::Str(s) => Self::Text(s),
            Value::Bytes(b) => Self::Bytes(b),
            Value::Bool(b) => Self::Bool(b),
            other => Self::Value(other),
        }
    }
}

/// Kind-specific state of a node.
#[derive(Clone)]
pub enum Body {
    /// Regular, generated and command files.
    File(Content),
    /// Location of a network file.
    Url(String),
    /// Ordered `name -> child` table of directory-like nodes.
    Entries(Vec<(String, Target)>),
    /// Path a soft link points at.
    Link(String),
    Generator(Arc<dyn Producer>),
    /// Names a filter view keeps from the directory it was applied to.
    Filter { files: Vec<String>, prev: Path },
    HomePointer,
}

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::File(content) => f.debug_tuple("File").field(content).finish(),
            Self::Url(url) => f.debug_tuple("Url").field(url).finish(),
            Self::Entries(entries) => f
                .debug_list()
                .entries(entries.iter().map(|(name, _)| name))
                .finish(),
            Self::Link(target) => f.debug_tuple("Link").field(target).finish(),
            Self::Generator(_) => f.write_str("Generator"),
            Self::Filter { files, .. } => f.debug_struct("Filter").field("files", files).finish(),
            Self::HomePointer => f.write_str("HomePointer"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Node {
    pub name: String,
    /// Zero for ephemeral nodes.
    pub inode: Inode,
    pub kind: Kind,
    pub mode: Mode,
    /// Inodes of the directories linking to this node.
    pub refs: Vec<Inode>,
    pub body: Body,
}

impl Node {
    #[must_use]
    pub fn new(kind: Kind, name: impl Into<String>, mode: Mode, body: Body) -> Self {
        Self {
            name: name.into(),
            inode: 0,
            kind,
            mode,
            refs: Vec::new(),
            body,
        }
    }

    #[must_use]
    pub fn file(name: impl Into<String>, mode: Mode, content: impl Into<Content>) -> Self {
        Self::new(Kind::File, name, mode, Body::File(content.into()))
    }

    #[must_use]
    pub fn directory(name: impl Into<String>, mode: Mode) -> Self {
        Self::new(Kind::Directory, name, mode, Body::Entries(Vec::new()))
    }

    #[must_use]
    pub fn generator(name: impl Into<String>, mode: Mode, producer: Arc<dyn Producer>) -> Self {
        Self::new(Kind::Generator, name, mode, Body::Generator(producer))
    }

    #[must_use]
    pub fn network_file(name: impl Into<String>, mode: Mode, url: impl Into<String>) -> Self {
        Self::new(Kind::NetworkFile, name, mode, Body::Url(url.into()))
    }

    #[must_use]
    pub fn with_inode(mut self, inode: Inode) -> Self {
        self.inode = inode;
        self
    }

    #[must_use]
    pub const fn is_ephemeral(&self) -> bool {
        self.inode == 0
    }

    #[must_use]
    pub fn entries(&self) -> Option<&[(String, Target)]> {
        match &self.body {
            Body::Entries(entries) => Some(entries),
            _ => None,
        }
    }

    #[must_use]
    pub fn entry(&self, name: &str) -> Option<&Target> {
        self.entries()?
            .iter()
            .find_map(|(n, target)| (n == name).then_some(target))
    }

    #[must_use]
    pub fn has_entries(&self) -> bool {
        self.entries().is_some_and(|e| !e.is_empty())
    }

    #[must_use]
    pub const fn content(&self) -> Option<&Content> {
        match &self.body {
            Body::File(content) => Some(content),
            _ => None,
        }
    }

    /// One entry per link, so a directory holding two names for the same
    /// node appears twice.
    pub fn add_reference(&mut self, inode: Inode) {
        self.refs.push(inode);
    }

    pub fn remove_reference(&mut self, inode: Inode) {
        if let Some(index) = self.refs.iter().position(|r| *r == inode) {
            self.refs.remove(index);
        }
    }
}
