//! Persistence of durable nodes.
//!
//! Records are JSON documents keyed by inode; the root's allocator state is
//! kept under inode 0.

use async_trait::async_trait;
use bytes::Bytes;
use cli9_sdk::{Mode, ShellError, ShellResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::RwLock;

use crate::node::{Body, Content, Inode, Kind, Node};
use crate::path::Target;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StoredContent {
    Bool(bool),
    Text(String),
    Bytes(Vec<u8>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub kind: String,
    pub name: String,
    pub inode: Inode,
    pub mode: Mode,
    pub refs: Vec<Inode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<StoredContent>,
    #[serde(default, skip_serializing_if = "Option::is_none", with = "ordered")]
    pub files: Option<Vec<(String, Inode)>>,
}

/// Allocator state persisted by the root.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InodeRecord {
    pub free: Vec<Inode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next: Option<Inode>,
}

impl Record {
    /// `None` for nodes that are never persisted.
    #[must_use]
    pub fn from_node(node: &Node) -> Option<Self> {
        let mut record = Self {
            kind: node.kind.tag().to_string(),
            name: node.name.clone(),
            inode: node.inode,
            mode: node.mode.clone(),
            refs: node.refs.clone(),
            content: None,
            files: None,
        };
        match &node.body {
            Body::File(Content::Text(s)) => record.content = Some(StoredContent::Text(s.clone())),
            Body::File(Content::Bytes(b)) => record.content = Some(StoredContent::Bytes(b.to_vec())),
            Body::File(Content::Bool(b)) => record.content = Some(StoredContent::Bool(*b)),
            Body::Url(url) | Body::Link(url) => record.content = Some(StoredContent::Text(url.clone())),
            Body::Entries(entries) => {
                record.files = Some(
                    entries
                        .iter()
                        .filter_map(|(name, target)| Some((name.clone(), target.inode()?)))
                        .collect(),
                );
            }
            _ => return None,
        }
        Some(record)
    }

    pub fn into_node(self) -> ShellResult<Node> {
        let kind = Kind::from_tag(&self.kind)
            .ok_or_else(|| ShellError::internal(format!("unknown node kind in store: {}", self.kind)))?;
        let body = match kind {
            Kind::File => Body::File(match self.content {
                Some(StoredContent::Text(s)) => Content::Text(s),
                Some(StoredContent::Bytes(b)) => Content::Bytes(Bytes::from(b)),
                Some(StoredContent::Bool(b)) => Content::Bool(b),
                None => Content::Text(String::new()),
            }),
            Kind::NetworkFile | Kind::Link => {
                let text = match self.content {
                    Some(StoredContent::Text(s)) => s,
                    _ => String::new(),
                };
                if kind == Kind::Link {
                    Body::Link(text)
                } else {
                    Body::Url(text)
                }
            }
            Kind::Directory | Kind::Home | Kind::NetworkDirectory => Body::Entries(
                self.files
                    .unwrap_or_default()
                    .into_iter()
                    .map(|(name, inode)| (name, Target::Stored(inode)))
                    .collect(),
            ),
            other => {
                return Err(ShellError::internal(format!(
                    "node kind {other} cannot be restored from the store"
                )))
            }
        };
        Ok(Node {
            name: self.name,
            inode: self.inode,
            kind,
            mode: self.mode,
            refs: self.refs,
            body,
        })
    }
}

/// Serializes an ordered list of pairs as a JSON object, keeping order.
mod ordered {
    use serde::de::{MapAccess, Visitor};
    use serde::ser::SerializeMap;
    use serde::{Deserializer, Serializer};
    use std::fmt;

    use crate::node::Inode;

    #[allow(clippy::ref_option)]
    pub fn serialize<S: Serializer>(
        files: &Option<Vec<(String, Inode)>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        let files = files.as_deref().unwrap_or_default();
        let mut map = serializer.serialize_map(Some(files.len()))?;
        for (name, inode) in files {
            map.serialize_entry(name, inode)?;
        }
        map.end()
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Vec<(String, Inode)>>, D::Error> {
        struct FilesVisitor;

        impl<'de> Visitor<'de> for FilesVisitor {
            type Value = Option<Vec<(String, Inode)>>;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map of file names to inodes")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
                let mut files = Vec::with_capacity(access.size_hint().unwrap_or(0));
                while let Some((name, inode)) = access.next_entry::<String, Inode>()? {
                    files.push((name, inode));
                }
                Ok(Some(files))
            }
        }

        deserializer.deserialize_map(FilesVisitor)
    }
}

/// Key-value backing store for durable nodes.
#[async_trait]
pub trait NodeStore: Send + Sync {
    async fn load(&self, inode: Inode) -> ShellResult<Option<Record>>;

    async fn save(&self, record: &Record) -> ShellResult<()>;

    async fn remove(&self, inode: Inode) -> ShellResult<()>;

    async fn load_inodes(&self) -> ShellResult<InodeRecord>;

    async fn save_inodes(&self, record: &InodeRecord) -> ShellResult<()>;
}

/// In-process store keeping each record as serialized JSON.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: RwLock<HashMap<Inode, String>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn contains(&self, inode: Inode) -> bool {
        self.records
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .contains_key(&inode)
    }

    fn put(&self, key: Inode, json: String) {
        self.records
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .insert(key, json);
    }

    fn get(&self, key: Inode) -> Option<String> {
        self.records
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(&key)
            .cloned()
    }
}

fn encode_error(e: &serde_json::Error) -> ShellError {
    ShellError::internal(format!("store: {e}"))
}

#[async_trait]
impl NodeStore for MemoryStore {
    async fn load(&self, inode: Inode) -> ShellResult<Option<Record>> {
        self.get(inode)
            .map(|json| serde_json::from_str(&json).map_err(|e| encode_error(&e)))
            .transpose()
    }

    async fn save(&self, record: &Record) -> ShellResult<()> {
        let json = serde_json::to_string(record).map_err(|e| encode_error(&e))?;
        self.put(record.inode, json);
        Ok(())
    }

    async fn remove(&self, inode: Inode) -> ShellResult<()> {
        self.records
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .remove(&inode);
        Ok(())
    }

    async fn load_inodes(&self) -> ShellResult<InodeRecord> {
        match self.get(0) {
            Some(json) => serde_json::from_str(&json).map_err(|e| encode_error(&e)),
            None => Ok(InodeRecord::default()),
        }
    }

    async fn save_inodes(&self, record: &InodeRecord) -> ShellResult<()> {
        let json = serde_json::to_string(record).map_err(|e| encode_error(&e))?;
        self.put(0, json);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cli9_sdk::Ident;

    fn directory() -> Node {
        let mut node = Node::directory("docs", Mode::new(0o770, 7u64, 7u64)).with_inode(10_001);
        node.refs.push(10_000);
        node.body = Body::Entries(vec![
            ("zeta".into(), Target::Stored(10_003)),
            ("alpha".into(), Target::Stored(10_002)),
        ]);
        node
    }

    #[test]
    fn record_keeps_entry_order() {
        let record = Record::from_node(&directory()).unwrap();
        let json = serde_json::to_string(&record).unwrap();
        assert!(json.contains(r#""files":{"zeta":10003,"alpha":10002}"#));
        let back: Record = serde_json::from_str(&json).unwrap();
        assert_eq!(back, record);
        let node = back.into_node().unwrap();
        assert_eq!(node.entries().unwrap()[0].0, "zeta");
        assert_eq!(node.mode.owner, Ident::Id(7));
    }

    #[test]
    fn generated_nodes_are_not_recorded() {
        let mut node = Node::file("x", Mode::root(), "text");
        node.kind = Kind::GeneratedFile;
        node.body = Body::HomePointer;
        assert!(Record::from_node(&node).is_none());
    }

    #[tokio::test]
    async fn memory_store_round_trips() {
        let store = MemoryStore::new();
        let file = Node::file("notes", Mode::new(0o640, 1u64, 2u64), "hello").with_inode(10_000);
        store.save(&Record::from_node(&file).unwrap()).await.unwrap();
        let loaded = store.load(10_000).await.unwrap().unwrap().into_node().unwrap();
        assert_eq!(loaded.content(), Some(&Content::Text("hello".into())));
        assert!(store.load(10_001).await.unwrap().is_none());

        store
            .save_inodes(&InodeRecord { free: vec![10_004], next: Some(10_010) })
            .await
            .unwrap();
        assert_eq!(store.load_inodes().await.unwrap().next, Some(10_010));

        store.remove(10_000).await.unwrap();
        assert!(!store.contains(10_000));
    }
}
