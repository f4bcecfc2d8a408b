//! cli9 - Scriptable shell over an inode-addressed virtual filesystem
//!
//! This crate provides:
//! - A shell dialect with pipelines, lists, redirects, loops and functions
//! - `[ ... ]` expressions for tests, arithmetic and file queries
//! - Per-user and per-guild scopes with exported variables, aliases and a
//!   process table
//! - A command registry with the `base` package built in

pub mod argparse;
pub mod ast;
pub mod builtins;
pub mod context;
pub mod eval;
pub mod expr;
pub mod grammar;
pub mod lexer;
pub mod normalize;
pub mod registry;
pub mod scope;
pub mod shell;

pub use context::Context;
pub use normalize::parse_script;
pub use registry::{Command, Package, Registry};
pub use scope::{Heard, Listener, ProcessInfo, ProcessKind, Scope, ScopeKey};
pub use shell::{Invocation, Shell, ShellBuilder, RC_FILE};
