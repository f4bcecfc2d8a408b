//! The `base` package: booleans, keywords, processes, variables and
//! files.

mod booleans;
mod files;
mod keywords;
mod processes;
mod variables;

use cli9_sdk::{Value, ValueStream};
use std::sync::Arc;
use tokio::task::AbortHandle;

use crate::registry::{Command, Package};
use crate::scope::Scope;

fn commands() -> Vec<Arc<dyn Command>> {
    vec![
        Arc::new(booleans::True),
        Arc::new(booleans::False),
        Arc::new(booleans::Null),
        Arc::new(booleans::Rand),
        Arc::new(keywords::Echo),
        Arc::new(keywords::Pass),
        Arc::new(keywords::Break),
        Arc::new(keywords::Continue),
        Arc::new(keywords::Return),
        Arc::new(keywords::Try),
        Arc::new(keywords::Exec),
        Arc::new(keywords::Commands),
        Arc::new(processes::Ps),
        Arc::new(processes::Kill),
        Arc::new(processes::Sleep),
        Arc::new(processes::Schedule),
        Arc::new(processes::State),
        Arc::new(variables::Export),
        Arc::new(variables::Unset),
        Arc::new(variables::Alias),
        Arc::new(variables::Unalias),
        Arc::new(variables::Read),
        Arc::new(files::Cd),
        Arc::new(files::Pwd),
        Arc::new(files::Ls),
        Arc::new(files::Cat),
        Arc::new(files::Mkdir),
        Arc::new(files::Touch),
        Arc::new(files::Write),
        Arc::new(files::Rm),
        Arc::new(files::Chmod),
        Arc::new(files::Cp),
        Arc::new(files::Mv),
        Arc::new(files::Ln),
    ]
}

/// Commands every shell starts with.
#[must_use]
pub const fn base() -> Package {
    Package {
        name: "base",
        commands,
    }
}

fn text(text: impl Into<String>) -> ValueStream {
    ValueStream::single(Value::Str(text.into()))
}

fn lines<I, S>(lines: I) -> ValueStream
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let joined: Vec<String> = lines.into_iter().map(|l| l.as_ref().to_string()).collect();
    if joined.is_empty() {
        return ValueStream::new();
    }
    text(joined.join("\n"))
}

/// Quote a name the way listings show it.
fn quoted(text: &str) -> String {
    if text.contains('\'') && !text.contains('"') {
        format!("\"{text}\"")
    } else {
        format!("'{}'", text.replace('\'', "\\'"))
    }
}

/// A process table entry held for as long as a command waits on it.
/// Dropping it removes the entry and cancels the attached task.
struct Registration {
    scope: Arc<Scope>,
    pid: u64,
    abort: Option<AbortHandle>,
}

impl Registration {
    fn new(scope: &Arc<Scope>, pid: u64) -> Self {
        Self {
            scope: Arc::clone(scope),
            pid,
            abort: None,
        }
    }

    fn attach(&mut self, abort: AbortHandle) {
        self.scope.processes().attach(self.pid, abort.clone());
        self.abort = Some(abort);
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        if let Some(abort) = &self.abort {
            abort.abort();
        }
        self.scope.processes().remove(self.pid);
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::context::Context;
    use crate::scope::ScopeKey;
    use crate::shell::Shell;
    use cli9_sdk::Caller;

    pub(crate) async fn context() -> Context {
        let shell = Shell::builder().build().await.unwrap();
        let caller = Caller::user(222_222_222_222_222_222);
        let scope = shell.scope(ScopeKey::of(&caller));
        Context::new(shell, caller, scope, None)
    }

    pub(crate) async fn run(ctx: &mut Context, text: &str) -> ValueStream {
        crate::eval::run_text(ctx, text, None).await.unwrap()
    }

    #[test]
    fn test_quoted() {
        assert_eq!(quoted("a b"), "'a b'");
        assert_eq!(quoted("it's"), "\"it's\"");
        assert_eq!(quoted("'\""), "'\\'\"'");
    }

    #[test]
    fn test_base_has_no_duplicate_names() {
        let names: Vec<&str> = commands().iter().map(|c| c.name()).collect();
        let mut sorted = names.clone();
        sorted.sort_unstable();
        sorted.dedup();
        assert_eq!(sorted.len(), names.len());
    }
}
