#![allow(missing_docs)]

pub mod bootstrap;
pub mod filter;
pub mod network;
pub mod node;
pub mod path;
pub mod producer;
pub mod resolve;
pub mod store;
pub mod vfs;

pub use cli9_sdk;
pub use bootstrap::{mount, read_scripts_dir, Bootstrap};
pub use node::{Body, Content, Inode, Kind, Node, ROOT_INODE};
pub use path::{split_unescaped, Path, Target};
pub use producer::{
    CurrentProducer, EmptyGraph, Field, ListProducer, Lookup, LookupProducer, Object,
    ObjectGraph, ObjectProducer, Producer, StaticGraph,
};
pub use resolve::Resolve;
pub use store::{InodeRecord, MemoryStore, NodeStore, Record, StoredContent};
pub use vfs::{Executable, Limits, Vfs, VfsBuilder};
