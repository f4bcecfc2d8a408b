//! Shell state and invocation driver
//!
//! A [`Shell`] owns the filesystem, the command registry and one [`Scope`]
//! per user, guild and the default table. Every incoming text becomes an
//! invocation: a task registered in its scope's process table so `ps` can
//! list it and `kill` can cancel it.

use cli9_config::Cli9Config;
use cli9_core::{mount, read_scripts_dir, Bootstrap, Limits, NodeStore, ObjectGraph, Vfs};
use cli9_sdk::{Caller, ShellError, ShellResult, Value, ValueStream};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::builtins;
use crate::context::Context;
use crate::eval::{run_script, run_text};
use crate::normalize::ScriptCache;
use crate::registry::{BinProducer, Package, Registry};
use crate::scope::{Heard, Scope, ScopeKey};

/// Name of the script every scope runs before its first invocation.
pub const RC_FILE: &str = ".clirc";

const DEFAULT_RC: &str = "alias ll='ls -l'\n";

pub struct Shell {
    config: Cli9Config,
    vfs: Arc<Vfs>,
    registry: Arc<Registry>,
    scripts: ScriptCache,
    scopes: Mutex<HashMap<ScopeKey, Arc<Scope>>>,
}

#[derive(Default)]
pub struct ShellBuilder {
    config: Option<Cli9Config>,
    graph: Option<Arc<dyn ObjectGraph>>,
    store: Option<Arc<dyn NodeStore>>,
    packages: Vec<Package>,
    scripts: Vec<(String, String)>,
}

impl ShellBuilder {
    #[must_use]
    pub fn config(mut self, config: Cli9Config) -> Self {
        self.config = Some(config);
        self
    }

    /// Object graph behind `/current`, `/get` and `/find`.
    #[must_use]
    pub fn graph(mut self, graph: Arc<dyn ObjectGraph>) -> Self {
        self.graph = Some(graph);
        self
    }

    #[must_use]
    pub fn store(mut self, store: Arc<dyn NodeStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Commands registered next to the base package.
    #[must_use]
    pub fn package(mut self, package: Package) -> Self {
        self.packages.push(package);
        self
    }

    /// A file placed under `/scripts`.
    #[must_use]
    pub fn script(mut self, name: impl Into<String>, text: impl Into<String>) -> Self {
        self.scripts.push((name.into(), text.into()));
        self
    }

    pub async fn build(self) -> ShellResult<Arc<Shell>> {
        let config = self.config.unwrap_or_default();

        let registry = self
            .packages
            .into_iter()
            .fold(Registry::builder().package(builtins::base()), |builder, package| {
                builder.package(package)
            });
        let registry = Arc::new(registry.build());

        let limits = Limits {
            max_file_size: config.limits.max_file_size,
            public_inode_start: config.filesystem.public_inode_start,
            network_timeout: Duration::from_secs(config.filesystem.network_timeout_secs),
        };
        let mut vfs = Vfs::builder().limits(limits);
        if let Some(graph) = self.graph {
            vfs = vfs.graph(graph);
        }
        if let Some(store) = self.store {
            vfs = vfs.store(store);
        }
        let vfs = vfs.build().await?;

        let mut scripts = match config.filesystem.scripts_path() {
            Some(dir) => read_scripts_dir(&dir).await?,
            None => Vec::new(),
        };
        scripts.extend(self.scripts);
        if !scripts.iter().any(|(name, _)| name == RC_FILE) {
            scripts.push((RC_FILE.to_string(), DEFAULT_RC.to_string()));
        }
        mount(
            &vfs,
            Bootstrap {
                bin: Some(Arc::new(BinProducer::new(Arc::clone(&registry)))),
                scripts,
            },
        )
        .await?;

        info!(commands = registry.len(), "shell ready");
        let cache = ScriptCache::new(config.limits.script_cache_entries);
        Ok(Arc::new(Shell {
            config,
            vfs,
            registry,
            scripts: cache,
            scopes: Mutex::new(HashMap::new()),
        }))
    }
}

/// A running top-level invocation.
pub struct Invocation {
    pub pid: u64,
    scope: Arc<Scope>,
    task: JoinHandle<ValueStream>,
}

impl Invocation {
    /// Result of the invocation; a killed one yields nothing.
    pub async fn wait(self) -> ValueStream {
        match self.task.await {
            Ok(stream) => stream,
            Err(error) if error.is_cancelled() => {
                debug!(pid = self.pid, "invocation cancelled");
                ValueStream::new()
            }
            Err(error) => {
                self.scope.processes().remove(self.pid);
                warn!(pid = self.pid, %error, "invocation panicked");
                ValueStream::from(ShellError::internal(error.to_string()))
            }
        }
    }
}

fn label(text: &str) -> String {
    text.lines().next().unwrap_or_default().trim().to_string()
}

impl Shell {
    #[must_use]
    pub fn builder() -> ShellBuilder {
        ShellBuilder::default()
    }

    #[must_use]
    pub const fn config(&self) -> &Cli9Config {
        &self.config
    }

    #[must_use]
    pub const fn vfs(&self) -> &Arc<Vfs> {
        &self.vfs
    }

    #[must_use]
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    #[must_use]
    pub const fn scripts(&self) -> &ScriptCache {
        &self.scripts
    }

    /// The state table for `key`, created on first use.
    #[must_use]
    pub fn scope(&self, key: ScopeKey) -> Arc<Scope> {
        let mut scopes = self.scopes.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(scopes.entry(key).or_insert_with(|| Arc::new(Scope::new(key))))
    }

    /// Grant `root` to configured ids.
    fn authorize(&self, caller: Caller) -> Caller {
        match caller.user {
            Some(id) if self.config.shell.root_ids.contains(&id) => {
                caller.with_group(cli9_sdk::Ident::root())
            }
            _ => caller,
        }
    }

    /// A fresh invocation context for `caller`.
    #[must_use]
    pub fn context(self: &Arc<Self>, caller: Caller) -> Context {
        let caller = self.authorize(caller);
        let scope = self.scope(ScopeKey::of(&caller));
        let fallback = ScopeKey::fallback(&caller).map(|key| self.scope(key));
        Context::new(Arc::clone(self), caller, scope, fallback)
    }

    /// Start running `text` as a top-level invocation.
    pub fn spawn(self: &Arc<Self>, caller: Caller, text: &str) -> Invocation {
        let mut ctx = self.context(caller);
        let scope = Arc::clone(ctx.scope());
        let pid = scope.processes().append_event(&label(text));
        ctx.pid = Some(pid);

        let shell = Arc::clone(self);
        let text = text.to_string();
        let task = tokio::spawn(async move {
            let result = shell.invoke(&mut ctx, &text).await;
            ctx.scope().processes().remove(pid);
            result
        });
        scope.processes().attach(pid, task.abort_handle());
        debug!(pid, scope = ?scope.key(), "invocation started");
        Invocation { pid, scope, task }
    }

    /// Run `text` to completion.
    pub async fn execute(self: &Arc<Self>, caller: Caller, text: &str) -> ValueStream {
        self.spawn(caller, text).wait().await
    }

    async fn invoke(&self, ctx: &mut Context, text: &str) -> ValueStream {
        self.setup(ctx).await;
        if let Some(result) = Self::offer(ctx, text).await {
            return result;
        }
        let script = match self.scripts.parse(text) {
            Ok(script) => script,
            Err(error) => return ValueStream::from(error),
        };
        let Some(secs) = self.config.limits.invocation_timeout_secs else {
            return run_script(&script.nodes, ctx).await;
        };
        match tokio::time::timeout(Duration::from_secs(secs), run_script(&script.nodes, ctx)).await {
            Ok(stream) => stream,
            Err(_) => {
                warn!(pid = ?ctx.pid, secs, "invocation timed out");
                ValueStream::from(ShellError::limit_exceeded(format!("{secs}s"), "timeout"))
            }
        }
    }

    /// First invocation in a scope: move to its home and run its rc file.
    async fn setup(&self, ctx: &mut Context) {
        let scope = Arc::clone(ctx.scope());
        scope
            .ready()
            .get_or_init(move || async move {
                let kind = ctx.scope().key().kind();
                let home = self.vfs.home(kind.as_str(), &ctx.caller).await.ok();
                ctx.set_directory(home.clone().unwrap_or_else(|| self.vfs.root()));

                let own = match &home {
                    Some(home) => self.vfs.select(home, RC_FILE, &ctx.caller).await.ok(),
                    None => None,
                };
                let rc = match own {
                    Some(path) => Some(path),
                    None => ctx.resolve(&format!("/scripts/{RC_FILE}")).await.ok(),
                };
                if let Some(path) = rc {
                    match self.vfs.read(&path, &ctx.caller).await {
                        Ok(Value::Str(text)) => {
                            let outcome = run_text(ctx, &text, None).await;
                            debug!(scope = ?ctx.scope().key(), ok = outcome.is_ok(), "ran rc file");
                        }
                        Ok(_) => {}
                        Err(error) => debug!(%error, "rc file unreadable"),
                    }
                }
                ctx.clear_temporaries();
            })
            .await;
    }

    /// Hand `text` to the scope's listeners before it runs as a script.
    async fn offer(ctx: &mut Context, text: &str) -> Option<ValueStream> {
        for (pid, listener) in ctx.scope().processes().listeners() {
            match listener.hear(ctx, text).await {
                Ok(Heard::Ignored) => {}
                Ok(Heard::Handled(stream)) => return Some(stream),
                Ok(Heard::Finished(stream)) => {
                    ctx.scope().processes().remove(pid);
                    return Some(stream);
                }
                Err(error) => {
                    ctx.scope().processes().remove(pid);
                    return Some(ValueStream::from(error));
                }
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const USER: u64 = 111_111_111_111_111_111;

    #[tokio::test]
    async fn test_execute_echo() {
        let shell = Shell::builder().build().await.unwrap();
        let result = shell.execute(Caller::user(USER), "echo hello").await;
        assert_eq!(result.text(), "hello");
    }

    #[tokio::test]
    async fn test_setup_moves_to_home_and_runs_rc() {
        let shell = Shell::builder().build().await.unwrap();
        let result = shell.execute(Caller::user(USER), "pwd; alias").await;
        assert_eq!(result.text(), "/home/user\nll='ls -l'");
    }

    #[tokio::test]
    async fn test_finished_invocation_leaves_process_table() {
        let shell = Shell::builder().build().await.unwrap();
        let caller = Caller::user(USER);
        shell.execute(caller.clone(), "true").await;
        assert!(shell.scope(ScopeKey::of(&caller)).processes().is_empty());
    }

    #[tokio::test]
    async fn test_root_ids_get_root_group() {
        let mut config = Cli9Config::default();
        config.shell.root_ids = vec![USER];
        let shell = Shell::builder().config(config).build().await.unwrap();
        let ctx = shell.context(Caller::user(USER));
        assert!(ctx.caller.principal.is_root());
    }

    #[tokio::test]
    async fn test_timeout_injects_error() {
        let mut config = Cli9Config::default();
        config.limits.invocation_timeout_secs = Some(1);
        let shell = Shell::builder().config(config).build().await.unwrap();
        let result = shell.execute(Caller::user(USER), "sleep 5").await;
        assert!(matches!(
            result.errors().next(),
            Some(ShellError::LimitExceeded { .. })
        ));
    }
}
