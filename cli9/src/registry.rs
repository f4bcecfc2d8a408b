//! Command registry.
//!
//! Commands come in packages. The registry maps every name and alias to
//! one command instance and can be rebuilt from its packages at runtime.
//! `/bin` lists the registry through [`BinProducer`].

use async_trait::async_trait;
use clap::ArgMatches;
use cli9_core::{Body, Content, Kind, Node, Producer, Vfs};
use cli9_sdk::{Caller, Ident, Mode, ShellError, ShellResult, Value, ValueStream};
use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{info, warn};

use crate::argparse;
use crate::context::Context;

/// A shell command.
///
/// Arguments are declared on a [`clap::Command`] and parsed before
/// [`Command::run`] is called. Errors returned from `run` become values in
/// the output unless they are `break`, `continue` or `return`.
#[async_trait]
pub trait Command: Send + Sync {
    fn name(&self) -> &'static str;

    /// Capability group a caller needs.
    fn group(&self) -> &'static str {
        "any"
    }

    fn aliases(&self) -> &'static [&'static str] {
        &[]
    }

    fn description(&self) -> &'static str;

    fn usage(&self) -> Option<&'static str> {
        None
    }

    fn epilog(&self) -> Option<&'static str> {
        None
    }

    fn arguments(&self, parser: clap::Command) -> clap::Command {
        parser
    }

    async fn run(
        &self,
        ctx: &mut Context,
        args: &ArgMatches,
        stdin: Option<ValueStream>,
    ) -> ShellResult<ValueStream>;
}

/// A named set of commands.
#[derive(Clone, Copy)]
pub struct Package {
    pub name: &'static str,
    pub commands: fn() -> Vec<Arc<dyn Command>>,
}

impl std::fmt::Debug for Package {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Package").field("name", &self.name).finish()
    }
}

#[derive(Default)]
struct Table {
    commands: BTreeMap<String, Arc<dyn Command>>,
    aliases: BTreeMap<String, String>,
}

impl Table {
    fn build(packages: &[Package]) -> Self {
        let mut table = Self::default();
        for package in packages {
            for command in (package.commands)() {
                let name = command.name().to_string();
                if table.commands.contains_key(&name) {
                    warn!(command = %name, package = package.name, "command registered twice");
                }
                for alias in command.aliases() {
                    table.aliases.insert((*alias).to_string(), name.clone());
                }
                table.commands.insert(name, command);
            }
        }
        table
    }
}

pub struct Registry {
    packages: Vec<Package>,
    table: RwLock<Table>,
}

#[derive(Default)]
pub struct RegistryBuilder {
    packages: Vec<Package>,
}

impl RegistryBuilder {
    #[must_use]
    pub fn package(mut self, package: Package) -> Self {
        self.packages.push(package);
        self
    }

    #[must_use]
    pub fn build(self) -> Registry {
        let table = Table::build(&self.packages);
        info!(
            packages = self.packages.len(),
            commands = table.commands.len(),
            "command registry built"
        );
        Registry {
            packages: self.packages,
            table: RwLock::new(table),
        }
    }
}

impl Registry {
    #[must_use]
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    /// Command registered as `name` or under an alias.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<dyn Command>> {
        let table = self.table.read().unwrap_or_else(PoisonError::into_inner);
        let name = table.aliases.get(name).map_or(name, String::as_str);
        table.commands.get(name).cloned()
    }

    /// Every command, sorted by name.
    #[must_use]
    pub fn commands(&self) -> Vec<Arc<dyn Command>> {
        let table = self.table.read().unwrap_or_else(PoisonError::into_inner);
        table.commands.values().cloned().collect()
    }

    #[must_use]
    pub fn names(&self) -> Vec<String> {
        let table = self.table.read().unwrap_or_else(PoisonError::into_inner);
        table.commands.keys().cloned().collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.table
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .commands
            .len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Rebuild every command from its package.
    pub fn reload(&self) -> usize {
        let table = Table::build(&self.packages);
        let count = table.commands.len();
        *self.table.write().unwrap_or_else(PoisonError::into_inner) = table;
        info!(commands = count, "command registry reloaded");
        count
    }
}

/// Check the caller's group, parse arguments, then run.
pub async fn execute(
    command: &dyn Command,
    ctx: &mut Context,
    args: &[String],
    stdin: Option<ValueStream>,
) -> ShellResult<ValueStream> {
    let group = Ident::from(command.group());
    let principal = &ctx.caller.principal;
    if !principal.in_group(&group) && !principal.is_root() {
        return Err(ShellError::command_permission(command.name(), command.group()));
    }
    let matches = match argparse::parse(command, args)? {
        argparse::Parsed::Matches(matches) => matches,
        argparse::Parsed::Help(text) => return Ok(ValueStream::single(Value::Str(text))),
    };
    tracing::debug!(command = command.name(), args = args.len(), "running command");
    command.run(ctx, &matches, stdin).await
}

/// Children of `/bin`: one command file per registered command.
pub struct BinProducer {
    registry: Arc<Registry>,
}

impl BinProducer {
    #[must_use]
    pub const fn new(registry: Arc<Registry>) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl Producer for BinProducer {
    async fn produce(
        &self,
        _vfs: &Vfs,
        _caller: &Caller,
        _parent: &Node,
        name: Option<&str>,
    ) -> ShellResult<Vec<Node>> {
        let commands = match name {
            Some(name) => self.registry.get(name).into_iter().collect(),
            None => self.registry.commands(),
        };
        Ok(commands
            .into_iter()
            .map(|command| {
                let group = command.group();
                let mode = if group == "any" {
                    Mode::new(0o555, Ident::root(), Ident::root())
                } else {
                    Mode::new(0o550, Ident::root(), Ident::from(group))
                };
                let name = name.unwrap_or_else(|| command.name());
                Node::new(
                    Kind::Command,
                    name,
                    mode,
                    Body::File(Content::Command {
                        name: command.name().to_string(),
                        help: command.description().to_string(),
                    }),
                )
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Hello;

    #[async_trait]
    impl Command for Hello {
        fn name(&self) -> &'static str {
            "hello"
        }

        fn aliases(&self) -> &'static [&'static str] {
            &["hi"]
        }

        fn description(&self) -> &'static str {
            "say hello"
        }

        async fn run(
            &self,
            _ctx: &mut Context,
            _args: &ArgMatches,
            _stdin: Option<ValueStream>,
        ) -> ShellResult<ValueStream> {
            Ok(ValueStream::single(Value::str("hello")))
        }
    }

    fn hello() -> Vec<Arc<dyn Command>> {
        vec![Arc::new(Hello)]
    }

    #[test]
    fn test_lookup_by_alias() {
        let registry = Registry::builder()
            .package(Package {
                name: "test",
                commands: hello,
            })
            .build();
        assert_eq!(registry.names(), vec!["hello"]);
        assert_eq!(registry.get("hi").map(|c| c.name()), Some("hello"));
        assert!(registry.get("bye").is_none());
        assert_eq!(registry.reload(), 1);
    }

    #[tokio::test]
    async fn test_bin_lists_commands() {
        let registry = Arc::new(
            Registry::builder()
                .package(Package {
                    name: "test",
                    commands: hello,
                })
                .build(),
        );
        let vfs = Vfs::builder().build().await.unwrap();
        let parent = Node::directory("bin", Mode::root());
        let producer = BinProducer::new(registry);
        let nodes = producer
            .produce(&vfs, &Caller::system(), &parent, None)
            .await
            .unwrap();
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].kind, Kind::Command);
        assert_eq!(nodes[0].mode.value, 0o555);
    }
}
