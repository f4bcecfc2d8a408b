use std::fmt;

/// Identity of a file owner, a file group, or a capability group.
///
/// Platform objects are addressed by numeric snowflake ids, while system
/// groups (`root`, `any`, `admin`, ...) are addressed by name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(untagged))]
pub enum Ident {
    Id(u64),
    Name(String),
}

impl Ident {
    #[must_use]
    pub fn name(name: impl Into<String>) -> Self {
        Self::Name(name.into())
    }

    #[must_use]
    pub fn root() -> Self {
        Self::Name("root".to_string())
    }

    #[must_use]
    pub const fn as_id(&self) -> Option<u64> {
        match self {
            Self::Id(id) => Some(*id),
            Self::Name(_) => None,
        }
    }
}

impl fmt::Display for Ident {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Id(id) => write!(f, "{id}"),
            Self::Name(name) => f.write_str(name),
        }
    }
}

impl From<u64> for Ident {
    fn from(id: u64) -> Self {
        Self::Id(id)
    }
}

impl From<&str> for Ident {
    fn from(name: &str) -> Self {
        name.parse::<u64>()
            .map_or_else(|_| Self::Name(name.to_string()), Self::Id)
    }
}

/// Which state table an invocation works against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum ScopeKind {
    User,
    Guild,
    Default,
}

impl ScopeKind {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Guild => "guild",
            Self::Default => "default",
        }
    }
}

impl fmt::Display for ScopeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The acting identity permission checks are evaluated against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub id: Ident,
    pub groups: Vec<Ident>,
}

impl Principal {
    #[must_use]
    pub fn new(id: impl Into<Ident>) -> Self {
        Self {
            id: id.into(),
            groups: vec![Ident::name("any")],
        }
    }

    #[must_use]
    pub fn with_group(mut self, group: impl Into<Ident>) -> Self {
        let group = group.into();
        if !self.groups.contains(&group) {
            self.groups.push(group);
        }
        self
    }

    #[must_use]
    pub fn in_group(&self, group: &Ident) -> bool {
        self.groups.contains(group)
    }

    #[must_use]
    pub fn in_named_group(&self, name: &str) -> bool {
        self.groups
            .iter()
            .any(|g| matches!(g, Ident::Name(n) if n == name))
    }

    #[must_use]
    pub fn is_root(&self) -> bool {
        self.in_named_group("root")
    }
}

/// Identity of one invocation: who is acting, from where, and in which scope.
///
/// Supplied by the chat gateway for every incoming event; the local console
/// builds one from its configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller {
    pub principal: Principal,
    pub user: Option<u64>,
    pub guild: Option<u64>,
    pub channel: Option<u64>,
    pub message: Option<u64>,
    pub scope: ScopeKind,
}

impl Caller {
    /// A user acting in a direct conversation.
    #[must_use]
    pub fn user(id: u64) -> Self {
        Self {
            principal: Principal::new(id).with_group("user").with_group(id),
            user: Some(id),
            guild: None,
            channel: None,
            message: None,
            scope: ScopeKind::User,
        }
    }

    /// A member of a guild acting inside it.
    #[must_use]
    pub fn member(user: u64, guild: u64) -> Self {
        Self {
            principal: Principal::new(user)
                .with_group("user")
                .with_group("member")
                .with_group(user),
            user: Some(user),
            guild: Some(guild),
            channel: None,
            message: None,
            scope: ScopeKind::User,
        }
    }

    /// The guild itself, e.g. for scheduled jobs and autostart scripts.
    #[must_use]
    pub fn guild(id: u64) -> Self {
        Self {
            principal: Principal::new(id)
                .with_group(id)
                .with_group("guild")
                .with_group("moderator")
                .with_group("admin"),
            user: None,
            guild: Some(id),
            channel: None,
            message: None,
            scope: ScopeKind::Guild,
        }
    }

    /// Internal actor holding the `root` group.
    #[must_use]
    pub fn system() -> Self {
        Self {
            principal: Principal::new(Ident::root()).with_group(Ident::root()),
            user: None,
            guild: None,
            channel: None,
            message: None,
            scope: ScopeKind::Default,
        }
    }

    #[must_use]
    pub fn with_group(mut self, group: impl Into<Ident>) -> Self {
        self.principal = self.principal.with_group(group);
        self
    }

    #[must_use]
    pub fn with_channel(mut self, channel: u64) -> Self {
        self.channel = Some(channel);
        self
    }

    #[must_use]
    pub fn with_message(mut self, message: u64) -> Self {
        self.message = Some(message);
        self
    }

    #[must_use]
    pub fn with_scope(mut self, scope: ScopeKind) -> Self {
        self.scope = scope;
        self
    }

    /// Id of the object owning the active scope.
    #[must_use]
    pub const fn scope_id(&self) -> Option<u64> {
        match self.scope {
            ScopeKind::User => self.user,
            ScopeKind::Guild => self.guild,
            ScopeKind::Default => None,
        }
    }
}
