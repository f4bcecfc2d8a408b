use cli9_sdk::{Action, Caller, Mode, ShellError, ShellResult, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use crate::node::{Body, Content, Inode, Kind, Node, ROOT_INODE};
use crate::path::{Path, Target};
use crate::producer::{EmptyGraph, ObjectGraph};
use crate::store::{InodeRecord, MemoryStore, NodeStore, Record};

/// First inode of the private (bootstrap) range.
const FIRST_PRIVATE_INODE: Inode = 2;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Limits {
    pub max_file_size: usize,
    /// Inodes at or above this are user-created and persisted.
    pub public_inode_start: Inode,
    pub network_timeout: Duration,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_file_size: 8 * 1024 * 1024,
            public_inode_start: 10_000,
            network_timeout: Duration::from_secs(10),
        }
    }
}

/// Root-held inode allocator: a free list plus one counter per range.
#[derive(Debug)]
struct Allocator {
    free: Vec<Inode>,
    next_public: Inode,
    next_private: Inode,
    public_start: Inode,
}

impl Allocator {
    fn new(record: InodeRecord, public_start: Inode) -> Self {
        Self {
            free: record.free,
            next_public: record.next.unwrap_or(public_start).max(public_start),
            next_private: FIRST_PRIVATE_INODE,
            public_start,
        }
    }

    fn create_inode(&mut self, public: bool) -> Inode {
        let start = self.public_start;
        let lowest = self
            .free
            .iter()
            .copied()
            .filter(|i| (*i >= start) == public)
            .min();
        if let Some(inode) = lowest {
            self.free.retain(|i| *i != inode);
            return inode;
        }
        let counter = if public {
            &mut self.next_public
        } else {
            &mut self.next_private
        };
        let inode = *counter;
        *counter += 1;
        inode
    }

    /// Return an inode to the free list if this allocator handed it out.
    fn release(&mut self, inode: Inode) -> bool {
        let allocated = if inode >= self.public_start {
            inode < self.next_public
        } else {
            (FIRST_PRIVATE_INODE..self.next_private).contains(&inode)
        };
        if allocated && !self.free.contains(&inode) {
            self.free.push(inode);
            return true;
        }
        false
    }

    fn record(&self) -> InodeRecord {
        InodeRecord {
            free: self.free.clone(),
            next: Some(self.next_public),
        }
    }
}

/// What executing a node amounts to.
#[derive(Debug, Clone, PartialEq)]
pub enum Executable {
    Script { text: String, path: String },
    Command(String),
    /// Executing a directory makes it the current one.
    Directory(Path),
    /// A `true` file.
    Nothing,
}

pub struct VfsBuilder {
    store: Arc<dyn NodeStore>,
    graph: Arc<dyn ObjectGraph>,
    limits: Limits,
}

impl VfsBuilder {
    #[must_use]
    pub fn store(mut self, store: Arc<dyn NodeStore>) -> Self {
        self.store = store;
        self
    }

    #[must_use]
    pub fn graph(mut self, graph: Arc<dyn ObjectGraph>) -> Self {
        self.graph = graph;
        self
    }

    #[must_use]
    pub fn limits(mut self, limits: Limits) -> Self {
        self.limits = limits;
        self
    }

    /// Load the allocator state and create the root directory.
    pub async fn build(self) -> ShellResult<Arc<Vfs>> {
        let record = self.store.load_inodes().await?;
        let root = Node::new(
            Kind::Root,
            "",
            Mode::root(),
            Body::Entries(Vec::new()),
        )
        .with_inode(ROOT_INODE);

        let http = reqwest::Client::builder()
            .timeout(self.limits.network_timeout)
            .build()
            .map_err(|e| ShellError::internal(format!("http client: {e}")))?;

        let mut nodes = HashMap::new();
        nodes.insert(ROOT_INODE, Arc::new(root));

        Ok(Arc::new(Vfs {
            nodes: RwLock::new(nodes),
            allocator: Mutex::new(Allocator::new(record, self.limits.public_inode_start)),
            store: self.store,
            graph: self.graph,
            limits: self.limits,
            http,
        }))
    }
}

/// Inode-addressed filesystem mixing durable and generated nodes.
///
/// Durable nodes live in an arena keyed by inode, backed by a [`NodeStore`]
/// for the public range. Locks are never held across an await.
pub struct Vfs {
    nodes: RwLock<HashMap<Inode, Arc<Node>>>,
    allocator: Mutex<Allocator>,
    store: Arc<dyn NodeStore>,
    graph: Arc<dyn ObjectGraph>,
    limits: Limits,
    http: reqwest::Client,
}

fn read_only(path: &Path, node: &Node) -> ShellError {
    ShellError::permission_denied("write", path.to_string(), node.mode.info())
}

fn check(node: &Node, caller: &Caller, action: Action, path: &Path) -> ShellResult<()> {
    node.mode.check(&caller.principal, action, &path.to_string())
}

impl Vfs {
    #[must_use]
    pub fn builder() -> VfsBuilder {
        VfsBuilder {
            store: Arc::new(MemoryStore::new()),
            graph: Arc::new(EmptyGraph),
            limits: Limits::default(),
        }
    }

    #[must_use]
    pub fn root(&self) -> Path {
        Path::root()
    }

    #[must_use]
    pub const fn limits(&self) -> &Limits {
        &self.limits
    }

    #[must_use]
    pub fn graph(&self) -> &dyn ObjectGraph {
        self.graph.as_ref()
    }

    pub(crate) const fn http(&self) -> &reqwest::Client {
        &self.http
    }

    fn read_nodes(&self) -> RwLockReadGuard<'_, HashMap<Inode, Arc<Node>>> {
        self.nodes.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_nodes(&self) -> RwLockWriteGuard<'_, HashMap<Inode, Arc<Node>>> {
        self.nodes.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn allocator(&self) -> std::sync::MutexGuard<'_, Allocator> {
        self.allocator.lock().unwrap_or_else(PoisonError::into_inner)
    }

    const fn is_public(&self, inode: Inode) -> bool {
        inode >= self.limits.public_inode_start
    }

    /// Durable node by inode, loading it from the store on first use.
    pub async fn fetch(&self, inode: Inode) -> ShellResult<Arc<Node>> {
        if let Some(node) = self.read_nodes().get(&inode) {
            return Ok(Arc::clone(node));
        }
        if !self.is_public(inode) {
            return Err(ShellError::no_file_found(inode.to_string()));
        }
        let record = self
            .store
            .load(inode)
            .await?
            .ok_or_else(|| ShellError::no_file_found(inode.to_string()))?;
        let node = Arc::new(record.into_node()?);
        let mut nodes = self.write_nodes();
        Ok(Arc::clone(nodes.entry(inode).or_insert(node)))
    }

    /// The node a path points at.
    pub async fn node(&self, path: &Path) -> ShellResult<Arc<Node>> {
        match path.target() {
            Target::Stored(inode) => self.fetch(*inode).await,
            Target::Ephemeral(node) => Ok(Arc::clone(node)),
        }
    }

    /// Mutate a loaded durable node in place.
    fn update<R>(&self, inode: Inode, f: impl FnOnce(&mut Node) -> R) -> ShellResult<R> {
        let mut nodes = self.write_nodes();
        let node = nodes
            .get_mut(&inode)
            .ok_or_else(|| ShellError::no_file_found(inode.to_string()))?;
        Ok(f(Arc::make_mut(node)))
    }

    /// Write a durable node through to the store.
    async fn persist(&self, inode: Inode) -> ShellResult<()> {
        if !self.is_public(inode) {
            return Ok(());
        }
        let Some(node) = self.read_nodes().get(&inode).cloned() else {
            return Ok(());
        };
        if node.kind.is_generated() {
            return Ok(());
        }
        let Some(record) = Record::from_node(&node) else {
            return Ok(());
        };
        self.store.save(&record).await.inspect_err(|e| {
            tracing::warn!(inode, error = %e, "failed to persist node");
        })
    }

    async fn persist_root(&self) -> ShellResult<()> {
        let record = self.allocator().record();
        self.store.save_inodes(&record).await.inspect_err(|e| {
            tracing::warn!(error = %e, "failed to persist inode allocator");
        })
    }

    /// Follow soft links until a non-link node is reached.
    pub async fn deref(&self, path: &Path, caller: &Caller) -> ShellResult<(Path, Arc<Node>)> {
        let mut path = path.clone();
        let mut node = self.node(&path).await?;
        for _ in 0..8 {
            let Body::Link(target) = &node.body else {
                return Ok((path, node));
            };
            let target = target.clone();
            path = Box::pin(self.resolve(&target, &path.parent(), caller)).await?;
            node = self.node(&path).await?;
        }
        Err(ShellError::shell(format!("Too many levels of links: {path}")))
    }

    /// Select one entry of a directory-like node.
    pub async fn select(&self, dir: &Path, name: &str, caller: &Caller) -> ShellResult<Path> {
        let (dir, node) = self.deref(dir, caller).await?;
        if !node.kind.is_directory() {
            return Err(ShellError::not_a_directory(dir.to_string()));
        }
        check(&node, caller, Action::Read, &dir)?;

        match name {
            "" | "." => return Ok(dir),
            ".." => return Ok(dir.parent()),
            "/" => return Ok(Path::root()),
            "~" => return self.home(caller.scope.as_str(), caller).await,
            _ => {}
        }
        if let Some(scope) = name.strip_prefix('~') {
            return self.home(scope, caller).await;
        }
        if name.starts_with('%') {
            return Box::pin(crate::filter::apply(self, &dir, name, caller)).await;
        }

        match &node.body {
            Body::Entries(_) => match node.entry(name) {
                Some(Target::Stored(inode)) => {
                    let inode = *inode;
                    self.fetch(inode).await?;
                    Ok(dir.join(name, Target::Stored(inode)))
                }
                Some(target) => Ok(dir.join(name, target.clone())),
                None => Err(ShellError::no_file_found(name)),
            },
            Body::Generator(_) if name == ".cache" => self.cache(&dir, caller).await,
            Body::Generator(_) => {
                let produced = self.produce(&node, caller, Some(name)).await?;
                produced
                    .into_iter()
                    .find(|n| n.name == name)
                    .map(|n| dir.join(name, Target::Ephemeral(Arc::new(n))))
                    .ok_or_else(|| ShellError::no_file_found(name))
            }
            Body::Filter { files, prev } => {
                if !files.iter().any(|f| f == name) {
                    return Err(ShellError::no_file_found(name));
                }
                if name.contains('/') {
                    Box::pin(self.resolve(name, prev, caller)).await
                } else {
                    Box::pin(self.select(prev, name, caller)).await
                }
            }
            Body::HomePointer => self.select_home(&dir, &node, name, caller).await,
            _ => Err(ShellError::not_a_directory(dir.to_string())),
        }
    }

    async fn produce(
        &self,
        generator: &Node,
        caller: &Caller,
        name: Option<&str>,
    ) -> ShellResult<Vec<Node>> {
        let Body::Generator(producer) = &generator.body else {
            return Ok(Vec::new());
        };
        let mut nodes = producer.produce(self, caller, generator, name).await?;
        for node in &mut nodes {
            node.kind = node.kind.generated();
            node.inode = 0;
        }
        Ok(nodes)
    }

    /// Snapshot every child of a generator into a generated directory.
    pub async fn cache(&self, generator: &Path, caller: &Caller) -> ShellResult<Path> {
        let node = self.node(generator).await?;
        check(&node, caller, Action::Read, generator)?;
        let entries = self
            .produce(&node, caller, None)
            .await?
            .into_iter()
            .map(|n| (n.name.clone(), Target::Ephemeral(Arc::new(n))))
            .collect();
        let snapshot = Node::new(
            Kind::GeneratedDirectory,
            node.name.clone(),
            node.mode.clone(),
            Body::Entries(entries),
        );
        Ok(generator.replaced(Target::Ephemeral(Arc::new(snapshot))))
    }

    /// Home directory of `scope` (`user`, `guild` or a numeric id).
    pub async fn home(&self, scope: &str, caller: &Caller) -> ShellResult<Path> {
        let pointer = Box::pin(self.select(&Path::root(), "home", caller)).await?;
        Box::pin(self.select(&pointer, scope, caller)).await
    }

    async fn select_home(
        &self,
        pointer: &Path,
        node: &Node,
        name: &str,
        caller: &Caller,
    ) -> ShellResult<Path> {
        let (id, name) = match name {
            "user" => (caller.user, name.to_string()),
            "guild" => (caller.guild, name.to_string()),
            other => match other.parse::<u64>() {
                Ok(id) => (Some(id), id.to_string()),
                Err(_) => (None, other.to_string()),
            },
        };
        let Some(id) = id.filter(|id| id.to_string().len() >= 17) else {
            return Err(ShellError::no_file_found(name));
        };

        match self.fetch(id).await {
            Ok(_) => return Ok(pointer.join(name, Target::Stored(id))),
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e),
        }

        let mut home = Node::new(
            Kind::Home,
            name.clone(),
            Mode::new(0o770, id, id),
            Body::Entries(Vec::new()),
        )
        .with_inode(id);
        home.add_reference(node.inode);
        self.write_nodes().entry(id).or_insert_with(|| Arc::new(home));
        self.persist(id).await?;
        tracing::debug!(id, "created home directory");
        Ok(pointer.join(name, Target::Stored(id)))
    }

    /// Names listed by a directory-like node.
    pub async fn names(&self, path: &Path, caller: &Caller) -> ShellResult<Vec<String>> {
        let (path, node) = self.deref(path, caller).await?;
        check(&node, caller, Action::Read, &path)?;
        match &node.body {
            Body::Entries(entries) => Ok(entries.iter().map(|(n, _)| n.clone()).collect()),
            Body::Generator(_) => {
                let mut names: Vec<String> = self
                    .produce(&node, caller, None)
                    .await?
                    .into_iter()
                    .map(|n| n.name)
                    .collect();
                names.push(".cache".to_string());
                Ok(names)
            }
            Body::Filter { files, .. } => Ok(files.clone()),
            Body::HomePointer => Ok([("user", caller.user), ("guild", caller.guild)]
                .into_iter()
                .filter_map(|(name, id)| id.map(|_| name.to_string()))
                .collect()),
            _ => Err(ShellError::not_a_directory(path.to_string())),
        }
    }

    /// Access node contents: file payloads, or entry names for directories.
    pub async fn read(&self, path: &Path, caller: &Caller) -> ShellResult<Value> {
        let (path, node) = self.deref(path, caller).await?;
        check(&node, caller, Action::Read, &path)?;
        match &node.body {
            Body::File(content) => Ok(content.to_value()),
            Body::Url(url) => crate::network::fetch(self.http(), url).await.map(Value::Bytes),
            _ => Ok(Value::List(
                self.names(&path, caller)
                    .await?
                    .into_iter()
                    .map(Value::Str)
                    .collect(),
            )),
        }
    }

    /// Paths of every child of a directory-like node.
    pub async fn list(&self, path: &Path, caller: &Caller) -> ShellResult<Vec<Path>> {
        let (path, node) = self.deref(path, caller).await?;
        check(&node, caller, Action::Read, &path)?;
        match &node.body {
            Body::Entries(entries) => Ok(entries
                .iter()
                .map(|(name, target)| path.join(name.clone(), target.clone()))
                .collect()),
            Body::Generator(_) => Ok(self
                .produce(&node, caller, None)
                .await?
                .into_iter()
                .map(|n| path.join(n.name.clone(), Target::Ephemeral(Arc::new(n))))
                .collect()),
            Body::Filter { files, prev } => {
                let all = Box::pin(self.list(prev, caller)).await?;
                Ok(all
                    .into_iter()
                    .filter(|p| files.iter().any(|f| f == p.name()))
                    .collect())
            }
            Body::HomePointer => {
                let mut homes = Vec::new();
                for scope in self.names(&path, caller).await? {
                    homes.push(self.select(&path, &scope, caller).await?);
                }
                Ok(homes)
            }
            _ => Err(ShellError::not_a_directory(path.to_string())),
        }
    }

    /// Create `node` as `name` inside `dir`; its mode defaults to the
    /// directory's.
    pub async fn create(
        &self,
        dir: &Path,
        name: &str,
        mut node: Node,
        mode: Option<Mode>,
        caller: &Caller,
    ) -> ShellResult<Path> {
        let (dir, parent) = self.deref(dir, caller).await?;
        if !parent.kind.is_directory() {
            return Err(ShellError::not_a_directory(dir.to_string()));
        }
        if parent.kind.is_generated()
            || matches!(parent.body, Body::Generator(_) | Body::HomePointer)
            || parent.is_ephemeral()
        {
            return Err(read_only(&dir, &parent));
        }
        check(&parent, caller, Action::Write, &dir)?;
        if name.is_empty() || name.contains('/') || name == "." || name == ".." {
            return Err(ShellError::shell(format!("Invalid file name: {name:?}")));
        }
        if let Some(content) = node.content() {
            if content.len() > self.limits.max_file_size {
                return Err(ShellError::file_size(content.len(), self.limits.max_file_size));
            }
        }

        node.name = name.to_string();
        node.mode = mode.unwrap_or_else(|| parent.mode.clone());
        let public = self.is_public(parent.inode);

        let inode = {
            let mut nodes = self.write_nodes();
            let parent_entry = nodes
                .get_mut(&parent.inode)
                .ok_or_else(|| ShellError::no_file_found(dir.to_string()))?;
            if parent_entry.entry(name).is_some() {
                return Err(ShellError::file_exists(name));
            }
            let inode = self.allocator().create_inode(public);
            if let Body::Entries(entries) = &mut Arc::make_mut(parent_entry).body {
                entries.push((name.to_string(), Target::Stored(inode)));
            }
            node.inode = inode;
            node.refs = vec![parent.inode];
            nodes.insert(inode, Arc::new(node));
            inode
        };
        tracing::debug!(inode, name, public, "allocated inode");

        self.persist(inode).await?;
        self.persist(parent.inode).await?;
        if public {
            self.persist_root().await?;
        }
        Ok(dir.join(name, Target::Stored(inode)))
    }

    /// Replace or append to a file's content.
    pub async fn write(
        &self,
        path: &Path,
        content: Content,
        replace: bool,
        caller: &Caller,
    ) -> ShellResult<()> {
        let (path, node) = self.deref(path, caller).await?;
        if node.kind.is_generated() || node.is_ephemeral() {
            return Err(read_only(&path, &node));
        }
        if !node.kind.is_file() {
            return Err(ShellError::not_a_file(path.to_string()));
        }
        check(&node, caller, Action::Write, &path)?;

        let body = match &node.body {
            Body::File(existing) => {
                let new = if replace {
                    content
                } else {
                    existing.appended(&content)
                };
                if new.len() > self.limits.max_file_size {
                    return Err(ShellError::file_size(new.len(), self.limits.max_file_size));
                }
                Body::File(new)
            }
            Body::Url(_) => Body::Url(content.to_value().to_string()),
            _ => return Err(ShellError::not_a_file(path.to_string())),
        };
        self.update(node.inode, |n| n.body = body)?;
        self.persist(node.inode).await
    }

    /// Unlink `name` from `dir`; nodes left without references are deleted,
    /// cascading into directories when `recursive`. Returns removed paths.
    pub async fn remove(
        &self,
        dir: &Path,
        name: &str,
        recursive: bool,
        caller: &Caller,
    ) -> ShellResult<Vec<String>> {
        let (dir, parent) = self.deref(dir, caller).await?;
        if parent.kind.is_generated()
            || matches!(parent.body, Body::Generator(_) | Body::HomePointer)
            || parent.is_ephemeral()
        {
            return Err(read_only(&dir, &parent));
        }
        check(&parent, caller, Action::Write, &dir)?;

        let inode = match parent.entry(name) {
            Some(Target::Stored(inode)) => *inode,
            Some(Target::Ephemeral(_)) => return Err(read_only(&dir, &parent)),
            None => return Err(ShellError::no_file_found(name)),
        };
        let child = self.fetch(inode).await?;
        let child_path = dir.join(name, Target::Stored(inode));
        if child.kind.is_directory() && child.has_entries() && !recursive {
            return Err(ShellError::non_empty_directory(child_path.to_string()));
        }

        self.update(parent.inode, |n| {
            if let Body::Entries(entries) = &mut n.body {
                entries.retain(|(n, _)| n != name);
            }
        })?;
        self.update(inode, |n| n.remove_reference(parent.inode))?;

        let removed = self.delete(&child_path, inode, recursive).await?;
        self.persist(parent.inode).await?;
        if !removed.is_empty() {
            self.persist_root().await?;
        }
        Ok(removed)
    }

    async fn delete(&self, path: &Path, inode: Inode, recursive: bool) -> ShellResult<Vec<String>> {
        let node = self.fetch(inode).await?;
        if !node.refs.is_empty() {
            self.persist(inode).await?;
            return Ok(Vec::new());
        }

        let mut removed = Vec::new();
        if recursive {
            for (name, target) in node.entries().unwrap_or_default() {
                let Target::Stored(child) = target else {
                    continue;
                };
                self.fetch(*child).await?;
                self.update(*child, |n| n.remove_reference(inode))?;
                let child_path = path.join(name.clone(), target.clone());
                removed.extend(Box::pin(self.delete(&child_path, *child, recursive)).await?);
            }
        }

        self.write_nodes().remove(&inode);
        let released = self.allocator().release(inode);
        if self.is_public(inode) {
            self.store.remove(inode).await?;
        }
        tracing::debug!(inode, released, "freed inode");
        removed.push(path.to_string());
        Ok(removed)
    }

    /// Set the permission bits; requires the `group` action.
    pub async fn chmod(&self, path: &Path, value: u16, caller: &Caller) -> ShellResult<()> {
        let node = self.node(path).await?;
        if node.is_ephemeral() {
            return Err(read_only(path, &node));
        }
        check(&node, caller, Action::Group, path)?;
        self.update(node.inode, |n| n.mode.set_value(value))?;
        self.persist(node.inode).await
    }

    /// Add another directory entry for a durable node.
    pub async fn hard_link(
        &self,
        source: &Path,
        dir: &Path,
        name: &str,
        caller: &Caller,
    ) -> ShellResult<Path> {
        let (source, node) = self.deref(source, caller).await?;
        let (dir, parent) = self.deref(dir, caller).await?;
        if node.is_ephemeral() {
            return Err(read_only(&source, &node));
        }
        if parent.entries().is_none() || parent.is_ephemeral() || parent.kind.is_generated() {
            return Err(read_only(&dir, &parent));
        }
        check(&node, caller, Action::Read, &source)?;
        check(&parent, caller, Action::Write, &dir)?;
        if parent.entry(name).is_some() {
            return Err(ShellError::file_exists(name));
        }

        self.update(parent.inode, |n| {
            if let Body::Entries(entries) = &mut n.body {
                entries.push((name.to_string(), Target::Stored(node.inode)));
            }
        })?;
        self.update(node.inode, |n| n.add_reference(parent.inode))?;
        self.persist(parent.inode).await?;
        self.persist(node.inode).await?;
        Ok(dir.join(name, Target::Stored(node.inode)))
    }

    /// Create a soft link to `target`, resolved relative to `dir` on use.
    pub async fn symlink(
        &self,
        dir: &Path,
        name: &str,
        target: &str,
        caller: &Caller,
    ) -> ShellResult<Path> {
        let node = Node::new(Kind::Link, name, Mode::root(), Body::Link(target.to_string()));
        self.create(dir, name, node, None, caller).await
    }

    /// File payload in a form that can be stored in a new durable file.
    async fn durable_content(&self, node: &Node) -> ShellResult<Content> {
        Ok(match &node.body {
            Body::File(Content::Command { name, .. }) => Content::Text(format!("{name} \"$@\"")),
            Body::File(Content::Value(value)) => Content::Text(value.to_string()),
            Body::File(content) => content.clone(),
            Body::Url(url) => Content::Bytes(crate::network::fetch(self.http(), url).await?),
            _ => Content::Text(String::new()),
        })
    }

    /// Copy a node into `dest`. Files copied onto a file overwrite it;
    /// directories are copied recursively.
    pub async fn copy(
        &self,
        source: &Path,
        dest: &Path,
        name: Option<&str>,
        caller: &Caller,
    ) -> ShellResult<Path> {
        let (source, node) = self.deref(source, caller).await?;
        check(&node, caller, Action::Read, &source)?;
        let (dest, dest_node) = self.deref(dest, caller).await?;
        let name = name.unwrap_or_else(|| source.name()).to_string();

        if node.kind.is_file() {
            let content = self.durable_content(&node).await?;
            if dest_node.kind.is_file() {
                self.write(&dest, content, true, caller).await?;
                return Ok(dest);
            }
            return match self
                .create(&dest, &name, Node::file(&name, Mode::root(), content.clone()), None, caller)
                .await
            {
                Err(ShellError::FileExists(_)) => {
                    let existing = self.select(&dest, &name, caller).await?;
                    self.write(&existing, content, true, caller).await?;
                    Ok(existing)
                }
                other => other,
            };
        }

        if let Some(inode) = source.target().inode() {
            if dest.contains(&Target::Stored(inode)) {
                return Err(ShellError::shell(format!("Cannot copy '{source}' into itself")));
            }
        }
        let copied = match self
            .create(&dest, &name, Node::directory(&name, Mode::root()), None, caller)
            .await
        {
            Err(ShellError::FileExists(_)) => self.select(&dest, &name, caller).await?,
            other => other?,
        };
        for child in self.list(&source, caller).await? {
            Box::pin(self.copy(&child, &copied, None, caller)).await?;
        }
        Ok(copied)
    }

    /// Move a node into `dest` under `name`. Durable nodes are relinked and
    /// keep their inode; generated ones are copied.
    pub async fn rename(
        &self,
        source: &Path,
        dest: &Path,
        name: Option<&str>,
        caller: &Caller,
    ) -> ShellResult<Path> {
        let node = self.node(source).await?;
        let parent_path = source.parent();
        let parent = self.node(&parent_path).await?;
        let (dest, dest_node) = self.deref(dest, caller).await?;
        let name = name.unwrap_or_else(|| source.name()).to_string();

        let relinkable = !node.is_ephemeral()
            && !parent.is_ephemeral()
            && parent.entries().is_some()
            && dest_node.entries().is_some()
            && !dest_node.is_ephemeral()
            && !dest_node.kind.is_generated();
        if !relinkable {
            let copied = self.copy(source, &dest, Some(&name), caller).await?;
            if !parent.is_ephemeral() && parent.entries().is_some() {
                self.remove(&parent_path, source.name(), true, caller).await?;
            }
            return Ok(copied);
        }

        if dest.contains(&Target::Stored(node.inode)) {
            return Err(ShellError::shell(format!("Cannot move '{source}' into itself")));
        }
        check(&parent, caller, Action::Write, &parent_path)?;
        check(&dest_node, caller, Action::Write, &dest)?;

        if let Some(existing) = dest_node.entry(&name) {
            if existing.inode() == Some(node.inode) {
                return Ok(dest.join(name, existing.clone()));
            }
            let replaced = self.select(&dest, &name, caller).await?;
            if self.node(&replaced).await?.kind.is_directory() || node.kind.is_directory() {
                return Err(ShellError::file_exists(name));
            }
            self.remove(&dest, &name, false, caller).await?;
        }

        self.update(dest_node.inode, |n| {
            if let Body::Entries(entries) = &mut n.body {
                entries.push((name.clone(), Target::Stored(node.inode)));
            }
        })?;
        self.update(parent.inode, |n| {
            if let Body::Entries(entries) = &mut n.body {
                entries.retain(|(n, _)| n != source.name());
            }
        })?;
        self.update(node.inode, |n| {
            n.remove_reference(parent.inode);
            n.add_reference(dest_node.inode);
        })?;
        self.persist(dest_node.inode).await?;
        self.persist(parent.inode).await?;
        self.persist(node.inode).await?;
        Ok(dest.join(name, Target::Stored(node.inode)))
    }

    /// Byte size of a node's content. With `efficient`, kinds whose size
    /// needs a fetch or a producer run report `None`.
    pub async fn size(&self, path: &Path, efficient: bool, caller: &Caller) -> ShellResult<Option<usize>> {
        let node = self.node(path).await?;
        if efficient
            && matches!(
                node.kind,
                Kind::Generator | Kind::NetworkFile | Kind::NetworkDirectory | Kind::HomePointer
            )
        {
            return Ok(None);
        }
        Ok(Some(match self.read(path, caller).await? {
            Value::Str(s) => s.len(),
            Value::Bytes(b) => b.len(),
            Value::Int(i) => {
                let bits = 64 - i.unsigned_abs().leading_zeros() as usize;
                bits.div_ceil(8)
            }
            Value::List(items) => items.len(),
            _ => 0,
        }))
    }

    /// What running the node means; requires the `execute` action.
    pub async fn executable(&self, path: &Path, caller: &Caller) -> ShellResult<Executable> {
        let (path, node) = self.deref(path, caller).await?;
        check(&node, caller, Action::Execute, &path)?;
        if node.kind.is_directory() {
            return Ok(Executable::Directory(path));
        }
        match &node.body {
            Body::File(Content::Text(text)) => Ok(Executable::Script {
                text: text.clone(),
                path: path.to_string(),
            }),
            Body::File(Content::Command { name, .. }) => Ok(Executable::Command(name.clone())),
            Body::File(Content::Bool(true)) => Ok(Executable::Nothing),
            Body::File(Content::Bool(false)) => Err(ShellError::False),
            _ => Err(ShellError::not_an_executable(path.to_string())),
        }
    }

    /// Replace the content of a file, creating it when missing.
    pub async fn write_path(
        &self,
        path: &str,
        start: &Path,
        content: Content,
        replace: bool,
        caller: &Caller,
    ) -> ShellResult<Path> {
        let options = crate::resolve::Resolve {
            create: true,
            directory: Some(false),
            last_name: false,
        };
        let (file, _) = self.resolve_with(path, start, &options, caller).await?;
        self.write(&file, content, replace, caller).await?;
        Ok(file)
    }

    /// Inodes currently free for reuse, lowest first.
    #[must_use]
    pub fn free_inodes(&self) -> Vec<Inode> {
        let mut free = self.allocator().free.clone();
        free.sort_unstable();
        free
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolve::Resolve;
    use bytes::Bytes;

    const USER: u64 = 111_111_111_111_111_111;
    const OTHER: u64 = 333_333_333_333_333_333;

    async fn vfs() -> Arc<Vfs> {
        let vfs = Vfs::builder().build().await.unwrap();
        crate::bootstrap::mount(&vfs, crate::bootstrap::Bootstrap::default())
            .await
            .unwrap();
        vfs
    }

    async fn home(vfs: &Vfs, caller: &Caller) -> Path {
        vfs.home("user", caller).await.unwrap()
    }

    #[tokio::test]
    async fn create_then_select_round_trips() {
        let vfs = vfs().await;
        let caller = Caller::user(USER);
        let home = home(&vfs, &caller).await;
        let created = vfs
            .create(&home, "notes", Node::file("", Mode::root(), "hi"), None, &caller)
            .await
            .unwrap();
        let selected = vfs.select(&home, "notes", &caller).await.unwrap();
        assert_eq!(created.target(), selected.target());
        assert_eq!(vfs.read(&selected, &caller).await.unwrap(), Value::str("hi"));
        assert!(selected.target().inode().unwrap() >= 10_000);
        assert_eq!(selected.to_string(), "/home/user/notes");

        let err = vfs
            .create(&home, "notes", Node::file("", Mode::root(), ""), None, &caller)
            .await
            .unwrap_err();
        assert_eq!(err, ShellError::file_exists("notes"));
    }

    #[tokio::test]
    async fn homes_are_private_to_their_owner() {
        let vfs = vfs().await;
        let owner = Caller::user(USER);
        let stranger = Caller::user(OTHER);
        let home = home(&vfs, &owner).await;
        vfs.create(&home, "secret", Node::file("", Mode::root(), "x"), None, &owner)
            .await
            .unwrap();
        let err = vfs
            .select(&home, "secret", &stranger)
            .await
            .unwrap_err();
        assert!(err.is_permission_denied());
        assert!(vfs.home("123", &owner).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn removing_last_reference_deletes() {
        let vfs = vfs().await;
        let caller = Caller::user(USER);
        let home = home(&vfs, &caller).await;
        let file = vfs
            .create(&home, "a", Node::file("", Mode::root(), "x"), None, &caller)
            .await
            .unwrap();
        let inode = file.target().inode().unwrap();
        let removed = vfs.remove(&home, "a", false, &caller).await.unwrap();
        assert_eq!(removed, vec!["/home/user/a".to_string()]);
        assert!(vfs.fetch(inode).await.unwrap_err().is_not_found());
        assert_eq!(vfs.free_inodes(), vec![inode]);
    }

    #[tokio::test]
    async fn recursive_removal_frees_subtree() {
        let vfs = vfs().await;
        let caller = Caller::user(USER);
        let home = home(&vfs, &caller).await;
        let dir = vfs
            .create(&home, "d", Node::directory("", Mode::root()), None, &caller)
            .await
            .unwrap();
        let sub = vfs
            .create(&dir, "sub", Node::directory("", Mode::root()), None, &caller)
            .await
            .unwrap();
        vfs.create(&sub, "f", Node::file("", Mode::root(), "x"), None, &caller)
            .await
            .unwrap();

        let err = vfs.remove(&home, "d", false, &caller).await.unwrap_err();
        assert!(matches!(err, ShellError::NonEmptyDirectory(_)));

        let removed = vfs.remove(&home, "d", true, &caller).await.unwrap();
        assert_eq!(removed.len(), 3);
        assert_eq!(vfs.free_inodes().len(), 3);

        // freed inodes are reused lowest first
        let again = vfs
            .create(&home, "e", Node::file("", Mode::root(), ""), None, &caller)
            .await
            .unwrap();
        assert_eq!(again.target().inode(), Some(10_000));
    }

    #[tokio::test]
    async fn hard_links_keep_node_alive() {
        let vfs = vfs().await;
        let caller = Caller::user(USER);
        let home = home(&vfs, &caller).await;
        let file = vfs
            .create(&home, "a", Node::file("", Mode::root(), "x"), None, &caller)
            .await
            .unwrap();
        vfs.hard_link(&file, &home, "b", &caller).await.unwrap();
        assert!(vfs.remove(&home, "a", false, &caller).await.unwrap().is_empty());
        let b = vfs.select(&home, "b", &caller).await.unwrap();
        assert_eq!(vfs.read(&b, &caller).await.unwrap(), Value::str("x"));
    }

    #[tokio::test]
    async fn writes_respect_size_limit() {
        let vfs = Vfs::builder()
            .limits(Limits {
                max_file_size: 4,
                ..Limits::default()
            })
            .build()
            .await
            .unwrap();
        crate::bootstrap::mount(&vfs, crate::bootstrap::Bootstrap::default())
            .await
            .unwrap();
        let caller = Caller::user(USER);
        let home = home(&vfs, &caller).await;
        let file = vfs
            .create(&home, "f", Node::file("", Mode::root(), "abc"), None, &caller)
            .await
            .unwrap();
        let err = vfs.write(&file, "de".into(), false, &caller).await.unwrap_err();
        assert!(matches!(err, ShellError::FileSize { .. }));
        vfs.write(&file, "de".into(), true, &caller).await.unwrap();
        assert_eq!(vfs.read(&file, &caller).await.unwrap(), Value::str("de"));
    }

    #[tokio::test]
    async fn generated_nodes_are_read_only() {
        let vfs = vfs().await;
        let caller = Caller::system();
        let current = vfs.select(&Path::root(), "current", &caller).await.unwrap();
        let user = vfs.select(&current, "user", &caller).await.unwrap();
        let err = vfs
            .create(&user, "x", Node::file("", Mode::root(), ""), None, &caller)
            .await
            .unwrap_err();
        assert!(err.is_permission_denied());
    }

    #[tokio::test]
    async fn chmod_needs_group_membership() {
        let vfs = vfs().await;
        let owner = Caller::user(USER);
        let home = home(&vfs, &owner).await;
        let file = vfs
            .create(&home, "f", Node::file("", Mode::root(), ""), None, &owner)
            .await
            .unwrap();
        vfs.chmod(&file, 0o640, &owner).await.unwrap();
        assert_eq!(vfs.node(&file).await.unwrap().mode.value, 0o640);
        let stranger = Caller::user(OTHER);
        assert!(vfs.chmod(&file, 0o777, &stranger).await.unwrap_err().is_permission_denied());
    }

    #[tokio::test]
    async fn copy_and_rename() {
        let vfs = vfs().await;
        let caller = Caller::user(USER);
        let home = home(&vfs, &caller).await;
        let dir = vfs
            .create(&home, "d", Node::directory("", Mode::root()), None, &caller)
            .await
            .unwrap();
        let file = vfs
            .create(&home, "f", Node::file("", Mode::root(), "body"), None, &caller)
            .await
            .unwrap();

        let copy = vfs.copy(&file, &dir, None, &caller).await.unwrap();
        assert_eq!(copy.to_string(), "/home/user/d/f");
        assert_ne!(copy.target(), file.target());

        let inode = file.target().inode();
        let moved = vfs.rename(&file, &dir, Some("g"), &caller).await.unwrap();
        assert_eq!(moved.target().inode(), inode);
        assert!(vfs.select(&home, "f", &caller).await.is_err());

        let tree = vfs.copy(&dir, &home, Some("d2"), &caller).await.unwrap();
        assert_eq!(
            vfs.names(&tree, &caller).await.unwrap(),
            vec!["f".to_string(), "g".to_string()]
        );
        assert!(vfs.rename(&dir, &dir, None, &caller).await.is_err());
    }

    #[tokio::test]
    async fn executables() {
        let vfs = vfs().await;
        let caller = Caller::user(USER);
        let home = home(&vfs, &caller).await;
        let options = Resolve {
            create: true,
            ..Resolve::default()
        };
        let (script, _) = vfs.resolve_with("run", &home, &options, &caller).await.unwrap();
        vfs.write(&script, "echo hi".into(), true, &caller).await.unwrap();
        assert_eq!(
            vfs.executable(&script, &caller).await.unwrap(),
            Executable::Script {
                text: "echo hi".into(),
                path: "/home/user/run".into()
            }
        );
        vfs.write(&script, Content::Bool(false), true, &caller).await.unwrap();
        assert_eq!(vfs.executable(&script, &caller).await.unwrap_err(), ShellError::False);
        vfs.write(&script, Content::Bytes(Bytes::from_static(b"\x00")), true, &caller)
            .await
            .unwrap();
        assert!(matches!(
            vfs.executable(&script, &caller).await.unwrap_err(),
            ShellError::NotAnExecutable(_)
        ));
        assert_eq!(
            vfs.executable(&home, &caller).await.unwrap(),
            Executable::Directory(home.clone())
        );
    }

    #[tokio::test]
    async fn durable_nodes_survive_a_restart() {
        let store: Arc<dyn NodeStore> = Arc::new(MemoryStore::new());
        let caller = Caller::user(USER);
        {
            let vfs = Vfs::builder().store(Arc::clone(&store)).build().await.unwrap();
            crate::bootstrap::mount(&vfs, crate::bootstrap::Bootstrap::default())
                .await
                .unwrap();
            let home = home(&vfs, &caller).await;
            vfs.create(&home, "keep", Node::file("", Mode::root(), "1"), None, &caller)
                .await
                .unwrap();
        }
        let vfs = Vfs::builder().store(store).build().await.unwrap();
        crate::bootstrap::mount(&vfs, crate::bootstrap::Bootstrap::default())
            .await
            .unwrap();
        let home = home(&vfs, &caller).await;
        let keep = vfs.select(&home, "keep", &caller).await.unwrap();
        assert_eq!(vfs.read(&keep, &caller).await.unwrap(), Value::str("1"));
        let next = vfs
            .create(&home, "more", Node::file("", Mode::root(), ""), None, &caller)
            .await
            .unwrap();
        assert_eq!(next.target().inode(), Some(10_001));
    }

    #[tokio::test]
    async fn soft_links_are_followed() {
        let vfs = vfs().await;
        let caller = Caller::user(USER);
        let home = home(&vfs, &caller).await;
        vfs.create(&home, "real", Node::file("", Mode::root(), "data"), None, &caller)
            .await
            .unwrap();
        let link = vfs.symlink(&home, "alias", "real", &caller).await.unwrap();
        assert_eq!(vfs.read(&link, &caller).await.unwrap(), Value::str("data"));
        assert_eq!(vfs.node(&link).await.unwrap().kind, Kind::Link);
    }
}
