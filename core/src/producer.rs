//! Generators: directories whose children are produced on every read from
//! a live object graph.

use async_trait::async_trait;
use cli9_sdk::{Caller, Ident, Mode, ShellResult, Value};
use std::sync::Arc;

use crate::node::{Body, Content, Kind, Node};
use crate::vfs::Vfs;

/// Yields the transient children of a generator node.
///
/// `name` is the entry being looked up, if any; producers that can only
/// answer lookups (like `/get`) return nothing when it is `None`.
#[async_trait]
pub trait Producer: Send + Sync {
    async fn produce(
        &self,
        vfs: &Vfs,
        caller: &Caller,
        parent: &Node,
        name: Option<&str>,
    ) -> ShellResult<Vec<Node>>;
}

/// A platform object (user, guild, channel, message, ...) as seen by the VFS.
#[derive(Debug, Clone, PartialEq)]
pub struct Object {
    pub kind: String,
    pub id: Option<u64>,
    pub guild: Option<u64>,
    pub label: String,
    pub image_url: Option<String>,
    pub fields: Vec<(String, Field)>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Field {
    Value(Value),
    Object(Object),
    List(Vec<Object>),
}

impl Object {
    #[must_use]
    pub fn new(kind: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            id: None,
            guild: None,
            label: label.into(),
            image_url: None,
            fields: Vec::new(),
        }
    }

    #[must_use]
    pub const fn with_id(mut self, id: u64) -> Self {
        self.id = Some(id);
        self
    }

    #[must_use]
    pub const fn with_guild(mut self, guild: u64) -> Self {
        self.guild = Some(guild);
        self
    }

    #[must_use]
    pub fn with_image(mut self, url: impl Into<String>) -> Self {
        self.image_url = Some(url.into());
        self
    }

    #[must_use]
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.push((name.into(), Field::Value(value.into())));
        self
    }

    #[must_use]
    pub fn with_object(mut self, name: impl Into<String>, object: Self) -> Self {
        self.fields.push((name.into(), Field::Object(object)));
        self
    }

    #[must_use]
    pub fn with_list(mut self, name: impl Into<String>, objects: Vec<Self>) -> Self {
        self.fields.push((name.into(), Field::List(objects)));
        self
    }

    /// `0o755`, owned by the object itself and grouped by its guild.
    #[must_use]
    pub fn mode(&self) -> Mode {
        let owner = self.id.map_or_else(|| Ident::name("any"), Ident::Id);
        let group = self.guild.map_or_else(|| owner.clone(), Ident::Id);
        Mode::new(0o755, owner, group)
    }

    fn type_name(&self) -> &str {
        match self.kind.as_str() {
            "colour" => "color",
            other => other,
        }
    }
}

/// Source of the objects generators project.
#[async_trait]
pub trait ObjectGraph: Send + Sync {
    /// The invocation's own `user`, `guild`, `channel` or `message`.
    async fn current(&self, caller: &Caller, role: &str) -> Option<Object>;

    async fn fetch(&self, caller: &Caller, id: &str) -> Option<Object>;

    async fn find(&self, caller: &Caller, name: &str) -> Vec<Object>;
}

/// Graph with no objects at all.
#[derive(Debug, Default)]
pub struct EmptyGraph;

#[async_trait]
impl ObjectGraph for EmptyGraph {
    async fn current(&self, _caller: &Caller, _role: &str) -> Option<Object> {
        None
    }

    async fn fetch(&self, _caller: &Caller, _id: &str) -> Option<Object> {
        None
    }

    async fn find(&self, _caller: &Caller, _name: &str) -> Vec<Object> {
        Vec::new()
    }
}

/// Fixed set of objects, looked up by id and by label.
#[derive(Debug, Default)]
pub struct StaticGraph {
    objects: Vec<Object>,
}

impl StaticGraph {
    #[must_use]
    pub const fn new(objects: Vec<Object>) -> Self {
        Self { objects }
    }

    fn by_id(&self, id: Option<u64>) -> Option<Object> {
        let id = id?;
        self.objects.iter().find(|o| o.id == Some(id)).cloned()
    }
}

#[async_trait]
impl ObjectGraph for StaticGraph {
    async fn current(&self, caller: &Caller, role: &str) -> Option<Object> {
        let id = match role {
            "user" => caller.user,
            "guild" => caller.guild,
            "channel" => caller.channel,
            "message" => caller.message,
            _ => None,
        };
        self.by_id(id)
    }

    async fn fetch(&self, _caller: &Caller, id: &str) -> Option<Object> {
        self.by_id(id.parse().ok())
    }

    async fn find(&self, _caller: &Caller, name: &str) -> Vec<Object> {
        let needle = name.to_lowercase();
        self.objects
            .iter()
            .filter(|o| o.label.to_lowercase().contains(&needle))
            .cloned()
            .collect()
    }
}

fn generated_file(name: impl Into<String>, mode: &Mode, content: impl Into<Content>) -> Node {
    Node::new(
        Kind::GeneratedFile,
        name,
        mode.clone(),
        Body::File(content.into()),
    )
}

/// `name`, or `name (n)` when already taken.
fn unique_name(name: &str, taken: &mut Vec<String>) -> String {
    let base = name.replace('/', "_");
    let mut candidate = base.clone();
    let mut number = 1;
    while taken.contains(&candidate) {
        candidate = format!("{base} ({number})");
        number += 1;
    }
    taken.push(candidate.clone());
    candidate
}

/// Attributes of one object, plus `.type`, `.id`, `.str` and image files.
#[derive(Debug)]
pub struct ObjectProducer {
    object: Object,
}

impl ObjectProducer {
    #[must_use]
    pub const fn new(object: Object) -> Self {
        Self { object }
    }

    fn nodes(object: &Object) -> Vec<Node> {
        let mode = object.mode();
        let mut nodes = Vec::with_capacity(object.fields.len() + 4);

        for (name, field) in &object.fields {
            let node = match field {
                Field::Value(Value::Null) => continue,
                Field::Value(value) => generated_file(name.clone(), &mode, value.clone()),
                Field::Object(inner) => Node::generator(
                    name.clone(),
                    inner.mode(),
                    Arc::new(Self::new(inner.clone())),
                ),
                Field::List(items) => {
                    Node::generator(name.clone(), mode.clone(), Arc::new(ListProducer::new(items.clone())))
                }
            };
            nodes.push(node);
        }

        nodes.push(generated_file(".type", &mode, object.type_name()));
        if let Some(id) = object.id {
            nodes.push(generated_file(".id", &mode, id.to_string()));
        }
        nodes.push(generated_file(".str", &mode, object.label.clone()));

        if let Some(url) = &object.image_url {
            nodes.push(generated_file(".image_url", &mode, url.clone()));
            let filename = url.rsplit('/').next().unwrap_or(url);
            let ext = filename
                .rsplit_once('.')
                .map_or("png", |(_, ext)| ext.split('?').next().unwrap_or("png"));
            nodes.push(Node::network_file(format!(".image.{ext}"), mode.clone(), url.clone()));
            if ext == "gif" {
                nodes.push(Node::network_file(
                    ".image.png",
                    mode.clone(),
                    url.replacen(".gif", ".png", 1),
                ));
            }
        }
        nodes
    }
}

#[async_trait]
impl Producer for ObjectProducer {
    async fn produce(
        &self,
        _vfs: &Vfs,
        _caller: &Caller,
        _parent: &Node,
        _name: Option<&str>,
    ) -> ShellResult<Vec<Node>> {
        Ok(Self::nodes(&self.object))
    }
}

/// One generator per object, named by label, plus `.type` and `.count`.
#[derive(Debug)]
pub struct ListProducer {
    objects: Vec<Object>,
}

impl ListProducer {
    #[must_use]
    pub const fn new(objects: Vec<Object>) -> Self {
        Self { objects }
    }
}

#[async_trait]
impl Producer for ListProducer {
    async fn produce(
        &self,
        _vfs: &Vfs,
        _caller: &Caller,
        parent: &Node,
        _name: Option<&str>,
    ) -> ShellResult<Vec<Node>> {
        let mut taken = Vec::new();
        let mut nodes: Vec<Node> = self
            .objects
            .iter()
            .map(|object| {
                Node::generator(
                    unique_name(&object.label, &mut taken),
                    object.mode(),
                    Arc::new(ObjectProducer::new(object.clone())),
                )
            })
            .collect();
        nodes.push(generated_file(".type", &parent.mode, "list"));
        nodes.push(generated_file(
            ".count",
            &parent.mode,
            Value::Int(i64::try_from(self.objects.len()).unwrap_or(i64::MAX)),
        ));
        Ok(nodes)
    }
}

/// The invocation's own object in `role`, e.g. `/current/user`.
#[derive(Debug)]
pub struct CurrentProducer {
    role: String,
}

impl CurrentProducer {
    #[must_use]
    pub fn new(role: impl Into<String>) -> Self {
        Self { role: role.into() }
    }
}

#[async_trait]
impl Producer for CurrentProducer {
    async fn produce(
        &self,
        vfs: &Vfs,
        caller: &Caller,
        _parent: &Node,
        _name: Option<&str>,
    ) -> ShellResult<Vec<Node>> {
        Ok(vfs
            .graph()
            .current(caller, &self.role)
            .await
            .map(|object| ObjectProducer::nodes(&object))
            .unwrap_or_default())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lookup {
    /// `/get/<id>`: the object with that id.
    Id,
    /// `/find/<name>`: every object whose label matches.
    Name,
}

/// Answers lookups only; listing it yields nothing.
#[derive(Debug)]
pub struct LookupProducer {
    by: Lookup,
}

impl LookupProducer {
    #[must_use]
    pub const fn new(by: Lookup) -> Self {
        Self { by }
    }
}

#[async_trait]
impl Producer for LookupProducer {
    async fn produce(
        &self,
        vfs: &Vfs,
        caller: &Caller,
        parent: &Node,
        name: Option<&str>,
    ) -> ShellResult<Vec<Node>> {
        let Some(name) = name else {
            return Ok(Vec::new());
        };
        let node = match self.by {
            Lookup::Id => {
                let Some(object) = vfs.graph().fetch(caller, name).await else {
                    return Ok(Vec::new());
                };
                Node::generator(name, object.mode(), Arc::new(ObjectProducer::new(object)))
            }
            Lookup::Name => {
                let found = vfs.graph().find(caller, name).await;
                Node::generator(name, parent.mode.clone(), Arc::new(ListProducer::new(found)))
            }
        };
        Ok(vec![node])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alice() -> Object {
        Object::new("user", "alice")
            .with_id(111_111_111_111_111_111)
            .with_guild(222_222_222_222_222_222)
            .with_field("bot", false)
            .with_field("missing", Value::Null)
            .with_image("https://cdn.example/avatars/a.gif?size=64")
    }

    #[test]
    fn object_nodes_include_dot_files() {
        let nodes = ObjectProducer::nodes(&alice());
        let names: Vec<&str> = nodes.iter().map(|n| n.name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "bot",
                ".type",
                ".id",
                ".str",
                ".image_url",
                ".image.gif",
                ".image.png"
            ]
        );
        assert_eq!(nodes[0].kind, Kind::GeneratedFile);
        assert_eq!(nodes[5].kind, Kind::NetworkFile);
        assert_eq!(nodes[0].mode.to_string(), "rwxr-xr-x");
        assert_eq!(nodes[0].mode.group, Ident::Id(222_222_222_222_222_222));
    }

    #[test]
    fn unique_names_get_suffixes() {
        let mut taken = Vec::new();
        assert_eq!(unique_name("a", &mut taken), "a");
        assert_eq!(unique_name("a", &mut taken), "a (1)");
        assert_eq!(unique_name("a", &mut taken), "a (2)");
        assert_eq!(unique_name("x/y", &mut taken), "x_y");
    }

    #[tokio::test]
    async fn static_graph_resolves_current_objects() {
        let graph = StaticGraph::new(vec![alice()]);
        let caller = Caller::user(111_111_111_111_111_111);
        assert_eq!(graph.current(&caller, "user").await, Some(alice()));
        assert!(graph.current(&caller, "guild").await.is_none());
        assert_eq!(graph.find(&caller, "ALI").await.len(), 1);
        assert!(graph.fetch(&caller, "nope").await.is_none());
    }
}
