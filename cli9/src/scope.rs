//! Persistent per-user and per-guild shell state.
//!
//! A [`Scope`] outlives invocations: exported variables, functions,
//! aliases, the working directory and the process table live here. Each
//! invocation works on its own [`Context`] holding a handle to one scope.

use async_trait::async_trait;
use cli9_core::Path;
use cli9_sdk::{Caller, ScopeKind, ShellError, ShellResult, Value, ValueStream};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::OnceCell;
use tokio::task::AbortHandle;

use crate::ast::Wrapper;
use crate::context::Context;

/// A user-defined shell function.
#[derive(Debug)]
pub struct Function {
    pub name: String,
    /// The `{ ... }` group run on every call.
    pub body: Wrapper,
}

/// An alias and its pre-parsed expansion.
#[derive(Debug)]
pub struct Alias {
    pub text: String,
    pub nodes: Vec<Wrapper>,
}

/// Which state table a caller works against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ScopeKey {
    User(u64),
    Guild(u64),
    Default,
}

impl ScopeKey {
    #[must_use]
    pub const fn of(caller: &Caller) -> Self {
        match (caller.scope, caller.user, caller.guild) {
            (ScopeKind::User, Some(user), _) => Self::User(user),
            (ScopeKind::Guild, _, Some(guild)) => Self::Guild(guild),
            _ => Self::Default,
        }
    }

    /// The guild table consulted after a user table misses.
    #[must_use]
    pub const fn fallback(caller: &Caller) -> Option<Self> {
        match (caller.scope, caller.guild) {
            (ScopeKind::User, Some(guild)) => Some(Self::Guild(guild)),
            _ => None,
        }
    }

    #[must_use]
    pub const fn kind(self) -> ScopeKind {
        match self {
            Self::User(_) => ScopeKind::User,
            Self::Guild(_) => ScopeKind::Guild,
            Self::Default => ScopeKind::Default,
        }
    }
}

#[derive(Debug)]
struct State {
    variables: HashMap<String, Value>,
    functions: HashMap<String, Arc<Function>>,
    aliases: BTreeMap<String, Arc<Alias>>,
    command_args: Vec<String>,
    directory: Option<Path>,
    skip_top_priority: bool,
}

impl Default for State {
    fn default() -> Self {
        Self {
            variables: HashMap::new(),
            functions: HashMap::new(),
            aliases: BTreeMap::new(),
            command_args: vec!["cli".to_string()],
            directory: None,
            skip_top_priority: false,
        }
    }
}

pub struct Scope {
    key: ScopeKey,
    state: Mutex<State>,
    processes: ProcessTable,
    ready: OnceCell<()>,
}

impl std::fmt::Debug for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scope")
            .field("key", &self.key)
            .field("processes", &self.processes.len())
            .finish_non_exhaustive()
    }
}

impl Scope {
    #[must_use]
    pub fn new(key: ScopeKey) -> Self {
        Self {
            key,
            state: Mutex::new(State::default()),
            processes: ProcessTable::new(),
            ready: OnceCell::new(),
        }
    }

    #[must_use]
    pub const fn key(&self) -> ScopeKey {
        self.key
    }

    #[must_use]
    pub const fn processes(&self) -> &ProcessTable {
        &self.processes
    }

    pub(crate) const fn ready(&self) -> &OnceCell<()> {
        &self.ready
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[must_use]
    pub fn variable(&self, name: &str) -> Option<Value> {
        self.state().variables.get(name).cloned()
    }

    pub fn set_variable(&self, name: &str, value: Value) {
        self.state().variables.insert(name.to_string(), value);
    }

    pub fn remove_variable(&self, name: &str) -> Option<Value> {
        self.state().variables.remove(name)
    }

    #[must_use]
    pub fn variables(&self) -> BTreeMap<String, Value> {
        self.state()
            .variables
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    #[must_use]
    pub fn function(&self, name: &str) -> Option<Arc<Function>> {
        self.state().functions.get(name).cloned()
    }

    pub fn set_function(&self, name: &str, function: Arc<Function>) {
        self.state().functions.insert(name.to_string(), function);
    }

    pub fn remove_function(&self, name: &str) -> Option<Arc<Function>> {
        self.state().functions.remove(name)
    }

    #[must_use]
    pub fn alias(&self, name: &str) -> Option<Arc<Alias>> {
        self.state().aliases.get(name).cloned()
    }

    pub fn set_alias(&self, name: &str, alias: Arc<Alias>) {
        self.state().aliases.insert(name.to_string(), alias);
    }

    pub fn remove_alias(&self, name: &str) -> Option<Arc<Alias>> {
        self.state().aliases.remove(name)
    }

    /// `(name, text)` of every alias, sorted by name.
    #[must_use]
    pub fn aliases(&self) -> Vec<(String, String)> {
        self.state()
            .aliases
            .iter()
            .map(|(name, alias)| (name.clone(), alias.text.clone()))
            .collect()
    }

    #[must_use]
    pub fn command_args(&self) -> Vec<String> {
        self.state().command_args.clone()
    }

    /// Install new positional arguments, handing back the previous ones.
    pub fn swap_command_args(&self, args: Vec<String>) -> Vec<String> {
        std::mem::replace(&mut self.state().command_args, args)
    }

    #[must_use]
    pub fn directory(&self) -> Option<Path> {
        self.state().directory.clone()
    }

    pub fn set_directory(&self, path: Path) {
        self.state().directory = Some(path);
    }

    #[must_use]
    pub fn skip_top_priority(&self) -> bool {
        self.state().skip_top_priority
    }

    pub fn set_skip_top_priority(&self, skip: bool) {
        self.state().skip_top_priority = skip;
    }

    /// Forget exported variables, functions and aliases.
    pub fn clear(&self) {
        let mut state = self.state();
        state.variables.clear();
        state.functions.clear();
        state.aliases.clear();
    }
}

/// What a pending `read` does with the next input of its scope.
pub enum Heard {
    /// Not for this listener; the input runs as a script.
    Ignored,
    /// Consumed; the listener stays registered.
    Handled(ValueStream),
    /// Consumed; the listener is removed.
    Finished(ValueStream),
}

/// A process that intercepts the next inputs of its scope.
#[async_trait]
pub trait Listener: Send + Sync {
    async fn hear(&self, ctx: &mut Context, text: &str) -> ShellResult<Heard>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessKind {
    /// A running invocation.
    Event,
    /// A timer started by `schedule`; survives a scope reset.
    Schedule,
    /// A listener waiting for input.
    Redirect,
}

/// Snapshot of one process table entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessInfo {
    pub pid: u64,
    pub label: String,
    pub kind: ProcessKind,
}

struct Process {
    label: String,
    kind: ProcessKind,
    abort: Option<AbortHandle>,
    listener: Option<Arc<dyn Listener>>,
}

/// Processes of one scope, keyed by a pid that starts at 1 and only grows.
pub struct ProcessTable {
    next: AtomicU64,
    entries: Mutex<BTreeMap<u64, Process>>,
}

impl ProcessTable {
    fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
            entries: Mutex::new(BTreeMap::new()),
        }
    }

    fn entries(&self) -> MutexGuard<'_, BTreeMap<u64, Process>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn insert(&self, label: &str, kind: ProcessKind, listener: Option<Arc<dyn Listener>>) -> u64 {
        let pid = self.next.fetch_add(1, Ordering::Relaxed);
        self.entries().insert(
            pid,
            Process {
                label: label.to_string(),
                kind,
                abort: None,
                listener,
            },
        );
        tracing::trace!(pid, label, ?kind, "process started");
        pid
    }

    pub fn append_event(&self, label: &str) -> u64 {
        self.insert(label, ProcessKind::Event, None)
    }

    pub fn add_schedule(&self, label: &str) -> u64 {
        self.insert(label, ProcessKind::Schedule, None)
    }

    pub fn add_redirect(&self, label: &str, listener: Arc<dyn Listener>) -> u64 {
        self.insert(label, ProcessKind::Redirect, Some(listener))
    }

    /// Attach the task running `pid`, so `kill` can cancel it. A process
    /// that already finished is left alone.
    pub fn attach(&self, pid: u64, abort: AbortHandle) {
        if let Some(process) = self.entries().get_mut(&pid) {
            process.abort = Some(abort);
        }
    }

    pub fn remove(&self, pid: u64) -> bool {
        self.entries().remove(&pid).is_some()
    }

    #[must_use]
    pub fn list(&self) -> Vec<ProcessInfo> {
        self.entries()
            .iter()
            .map(|(pid, p)| ProcessInfo {
                pid: *pid,
                label: p.label.clone(),
                kind: p.kind,
            })
            .collect()
    }

    /// Registered listeners, oldest first.
    #[must_use]
    pub fn listeners(&self) -> Vec<(u64, Arc<dyn Listener>)> {
        self.entries()
            .iter()
            .filter_map(|(pid, p)| p.listener.clone().map(|l| (*pid, l)))
            .collect()
    }

    /// Remove `pid` and cancel its task.
    pub fn kill(&self, pid: u64) -> ShellResult<ProcessInfo> {
        let process = self
            .entries()
            .remove(&pid)
            .ok_or(ShellError::NoProcessFound(pid))?;
        if let Some(abort) = &process.abort {
            abort.abort();
        }
        tracing::debug!(pid, label = %process.label, "process killed");
        Ok(ProcessInfo {
            pid,
            label: process.label,
            kind: process.kind,
        })
    }

    /// Kill everything except schedules and `keep`, returning the killed
    /// pids.
    pub fn reset(&self, keep: Option<u64>) -> Vec<u64> {
        let doomed: Vec<u64> = self
            .entries()
            .iter()
            .filter(|(pid, p)| p.kind != ProcessKind::Schedule && Some(**pid) != keep)
            .map(|(pid, _)| *pid)
            .collect();
        doomed
            .into_iter()
            .filter(|pid| self.kill(*pid).is_ok())
            .collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scope_key_of_caller() {
        let member = Caller::member(111_111_111_111_111_111, 222_222_222_222_222_222);
        assert_eq!(ScopeKey::of(&member), ScopeKey::User(111_111_111_111_111_111));
        assert_eq!(
            ScopeKey::fallback(&member),
            Some(ScopeKey::Guild(222_222_222_222_222_222))
        );
        assert_eq!(ScopeKey::of(&Caller::system()), ScopeKey::Default);
        assert_eq!(ScopeKey::fallback(&Caller::user(5)), None);
    }

    #[test]
    fn test_command_args_swap() {
        let scope = Scope::new(ScopeKey::Default);
        assert_eq!(scope.command_args(), vec!["cli"]);
        let previous = scope.swap_command_args(vec!["echo".into(), "a".into()]);
        assert_eq!(previous, vec!["cli"]);
        assert_eq!(scope.command_args(), vec!["echo", "a"]);
    }

    #[test]
    fn test_clear_forgets_definitions() {
        let scope = Scope::new(ScopeKey::Default);
        scope.set_variable("x", Value::str("1"));
        scope.set_alias(
            "ll",
            Arc::new(Alias {
                text: "ls -l".into(),
                nodes: Vec::new(),
            }),
        );
        scope.clear();
        assert_eq!(scope.variable("x"), None);
        assert!(scope.aliases().is_empty());
        assert_eq!(scope.command_args(), vec!["cli"]);
    }

    #[test]
    fn test_pids_increase() {
        let table = ProcessTable::new();
        let first = table.append_event("echo a");
        let second = table.add_schedule("sleep 10");
        assert_eq!((first, second), (1, 2));
        assert!(table.remove(first));
        assert_eq!(table.append_event("echo b"), 3);
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_kill_unknown_pid() {
        let table = ProcessTable::new();
        assert_eq!(table.kill(7).unwrap_err(), ShellError::NoProcessFound(7));
    }

    #[test]
    fn test_reset_keeps_schedules() {
        let table = ProcessTable::new();
        table.append_event("a");
        let schedule = table.add_schedule("b");
        table.append_event("c");
        assert_eq!(table.reset(None), vec![1, 3]);
        let left = table.list();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].pid, schedule);
        assert_eq!(left[0].kind, ProcessKind::Schedule);
    }
}
