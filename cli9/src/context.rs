//! State of one invocation.

use cli9_core::{Path, Resolve, Vfs};
use cli9_sdk::{Caller, ShellError, ShellResult, Value};
use std::collections::HashMap;
use std::sync::Arc;

use crate::scope::{Alias, Function, Scope};
use crate::shell::Shell;

/// Names computed from the invocation; they cannot be assigned.
const SPECIAL: &[&str] = &[
    "_args", "@", "#", "_groups", "_pid", "_event", "_user", "_guild", "_channel", "_scope",
];

/// Everything one running script sees: who runs it, the scope it works
/// against, and the temporaries that vanish when it ends.
pub struct Context {
    shell: Arc<Shell>,
    pub caller: Caller,
    scope: Arc<Scope>,
    /// Guild scope consulted when a user scope has no entry.
    fallback: Option<Arc<Scope>>,
    pub pid: Option<u64>,
    /// What started the invocation: `message`, `console`, `schedule`, ...
    pub event: String,
    variables: HashMap<String, Value>,
    functions: HashMap<String, Arc<Function>>,
    /// Aliases currently being expanded.
    pub used_aliases: Vec<String>,
    /// Fatal command errors abort the running script.
    pub strict: bool,
    /// Scripts and functions entered; positional arguments are only
    /// replaced by top-level commands.
    pub nested: usize,
}

impl Context {
    #[must_use]
    pub fn new(
        shell: Arc<Shell>,
        caller: Caller,
        scope: Arc<Scope>,
        fallback: Option<Arc<Scope>>,
    ) -> Self {
        Self {
            shell,
            caller,
            scope,
            fallback,
            pid: None,
            event: "message".to_string(),
            variables: HashMap::new(),
            functions: HashMap::new(),
            used_aliases: Vec::new(),
            strict: false,
            nested: 0,
        }
    }

    /// A context for a background task: same scope and temporaries, no
    /// process of its own yet.
    #[must_use]
    pub fn fork(&self, event: &str) -> Self {
        Self {
            shell: Arc::clone(&self.shell),
            caller: self.caller.clone(),
            scope: Arc::clone(&self.scope),
            fallback: self.fallback.clone(),
            pid: None,
            event: event.to_string(),
            variables: self.variables.clone(),
            functions: self.functions.clone(),
            used_aliases: Vec::new(),
            strict: false,
            nested: 0,
        }
    }

    #[must_use]
    pub const fn shell(&self) -> &Arc<Shell> {
        &self.shell
    }

    #[must_use]
    pub const fn scope(&self) -> &Arc<Scope> {
        &self.scope
    }

    #[must_use]
    pub fn vfs(&self) -> &Arc<Vfs> {
        self.shell.vfs()
    }

    #[must_use]
    pub fn is_reserved(name: &str) -> bool {
        SPECIAL.contains(&name) || name.parse::<usize>().is_ok()
    }

    fn special(&self, name: &str) -> Option<Value> {
        let id = |id: Option<u64>| id.map_or_else(|| Value::str(""), |id| Value::str(id.to_string()));
        Some(match name {
            "_args" => Value::List(self.scope.command_args().into_iter().map(Value::Str).collect()),
            "@" => Value::Str(self.scope.command_args().get(1..).unwrap_or_default().join(" ")),
            "#" => Value::Int(
                i64::try_from(self.scope.command_args().len().saturating_sub(1)).unwrap_or(i64::MAX),
            ),
            "_groups" => Value::List(
                self.caller
                    .principal
                    .groups
                    .iter()
                    .map(|g| Value::Str(g.to_string()))
                    .collect(),
            ),
            "_pid" => self
                .pid
                .and_then(|pid| i64::try_from(pid).ok())
                .map_or(Value::Null, Value::Int),
            "_event" => Value::str(self.event.clone()),
            "_user" => id(self.caller.user),
            "_guild" => id(self.caller.guild),
            "_channel" => id(self.caller.channel),
            "_scope" => Value::str(self.scope.key().kind().as_str()),
            _ => return None,
        })
    }

    /// A variable if it is defined: temporaries, then exported (own scope,
    /// then the guild's), then the special and positional names.
    #[must_use]
    pub fn lookup(&self, name: &str) -> Option<Value> {
        if let Some(value) = self.variables.get(name) {
            return Some(value.clone());
        }
        if let Some(value) = self.scope.variable(name) {
            return Some(value);
        }
        if let Some(value) = self.fallback.as_ref().and_then(|s| s.variable(name)) {
            return Some(value);
        }
        if let Some(value) = self.special(name) {
            return Some(value);
        }
        let index: usize = name.parse().ok()?;
        self.scope.command_args().get(index).cloned().map(Value::Str)
    }

    /// Value of `$name`; undefined names are empty.
    #[must_use]
    pub fn variable(&self, name: &str) -> Value {
        self.lookup(name).unwrap_or_else(|| Value::str(""))
    }

    pub fn set_variable(&mut self, name: &str, value: Value, export: bool) -> ShellResult<()> {
        if Self::is_reserved(name) {
            return Err(ShellError::reserved_variable(name));
        }
        if export {
            self.scope.set_variable(name, value);
        } else {
            self.variables.insert(name.to_string(), value);
        }
        Ok(())
    }

    /// `name+=value`: append to an existing value.
    pub fn edit_variable(&mut self, name: &str, value: Value, export: bool) -> ShellResult<()> {
        let previous = self
            .lookup(name)
            .ok_or_else(|| ShellError::undefined_variable(name))?;
        let combined = match previous {
            Value::List(mut items) => {
                items.push(value);
                Value::List(items)
            }
            Value::Int(a) => match value.as_int() {
                Some(b) => Value::Int(a.saturating_add(b)),
                None => Value::Str(format!("{a}{value}")),
            },
            other => Value::Str(format!("{other}{value}")),
        };
        self.set_variable(name, combined, export)
    }

    pub fn remove_variable(&mut self, name: &str, export: bool) -> Option<Value> {
        if export {
            self.scope.remove_variable(name)
        } else {
            self.variables.remove(name)
        }
    }

    /// Temporaries as `(name, value)`, sorted by name.
    #[must_use]
    pub fn temporaries(&self) -> Vec<(String, Value)> {
        let mut vars: Vec<(String, Value)> = self
            .variables
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        vars.sort_by(|a, b| a.0.cmp(&b.0));
        vars
    }

    #[must_use]
    pub fn function(&self, name: &str) -> Option<Arc<Function>> {
        self.functions
            .get(name)
            .cloned()
            .or_else(|| self.scope.function(name))
            .or_else(|| self.fallback.as_ref().and_then(|s| s.function(name)))
    }

    pub fn set_function(&mut self, function: Arc<Function>, export: bool) {
        let name = function.name.clone();
        if export {
            self.scope.set_function(&name, function);
        } else {
            self.functions.insert(name, function);
        }
    }

    pub fn remove_function(&mut self, name: &str, export: bool) -> Option<Arc<Function>> {
        if export {
            self.scope.remove_function(name)
        } else {
            self.functions.remove(name)
        }
    }

    /// An alias not already being expanded.
    #[must_use]
    pub fn alias(&self, name: &str) -> Option<Arc<Alias>> {
        if self.used_aliases.iter().any(|used| used == name) {
            return None;
        }
        self.scope
            .alias(name)
            .or_else(|| self.fallback.as_ref().and_then(|s| s.alias(name)))
    }

    /// Step into a function, script or `exec`, failing past `max_nesting`.
    pub fn enter(&mut self) -> ShellResult<()> {
        let limit = self.shell.config().limits.max_nesting;
        if self.nested >= limit {
            return Err(ShellError::limit_exceeded(limit, "maximum recursion"));
        }
        self.nested += 1;
        Ok(())
    }

    pub fn leave(&mut self) {
        self.nested = self.nested.saturating_sub(1);
    }

    pub fn clear_temporaries(&mut self) {
        self.variables.clear();
        self.functions.clear();
    }

    #[must_use]
    pub fn directory(&self) -> Path {
        self.scope.directory().unwrap_or_else(Path::root)
    }

    pub fn set_directory(&self, path: Path) {
        self.scope.set_directory(path);
    }

    /// Resolve `path` against the working directory.
    pub async fn resolve(&self, path: &str) -> ShellResult<Path> {
        self.vfs()
            .resolve(path, &self.directory(), &self.caller)
            .await
    }

    pub async fn resolve_with(
        &self,
        path: &str,
        options: &Resolve,
    ) -> ShellResult<(Path, Option<String>)> {
        self.vfs()
            .resolve_with(path, &self.directory(), options, &self.caller)
            .await
    }
}
