use cli9::{Shell, ScopeKey};
use cli9_sdk::Caller;
use rustyline::completion::{Completer, Pair};
use rustyline::highlight::Highlighter;
use rustyline::hint::Hinter;
use rustyline::validate::Validator;
use rustyline::{Context, Helper};
use std::borrow::Cow;
use std::sync::Arc;

/// Completes command names, aliases and paths of the shell's filesystem.
pub struct Cli9Helper {
    shell: Arc<Shell>,
    caller: Caller,
    runtime: tokio::runtime::Handle,
}

impl Cli9Helper {
    pub const fn new(shell: Arc<Shell>, caller: Caller, runtime: tokio::runtime::Handle) -> Self {
        Self {
            shell,
            caller,
            runtime,
        }
    }

    fn commands(&self, word: &str) -> Vec<String> {
        let scope = self.shell.scope(ScopeKey::of(&self.caller));
        let mut names: Vec<String> = self
            .shell
            .registry()
            .names()
            .into_iter()
            .chain(scope.aliases().into_iter().map(|(name, _)| name))
            .filter(|name| name.starts_with(word))
            .collect();
        names.sort();
        names.dedup();
        names
    }

    /// Entries of `dir` starting with `partial`; directories end in `/`.
    fn paths(&self, dir: &str, partial: &str) -> Vec<String> {
        let ctx = self.shell.context(self.caller.clone());
        self.runtime.block_on(async {
            let Ok(dir) = ctx.resolve(if dir.is_empty() { "." } else { dir }).await else {
                return Vec::new();
            };
            let Ok(children) = ctx.vfs().list(&dir, &ctx.caller).await else {
                return Vec::new();
            };
            let mut names = Vec::new();
            for child in children {
                let name = child.name();
                if !name.starts_with(partial) {
                    continue;
                }
                let is_dir = ctx
                    .vfs()
                    .deref(&child, &ctx.caller)
                    .await
                    .is_ok_and(|(_, node)| node.kind.is_directory());
                names.push(if is_dir { format!("{name}/") } else { name.to_string() });
            }
            names
        })
    }
}

impl Completer for Cli9Helper {
    type Candidate = Pair;

    fn complete(
        &self,
        line: &str,
        pos: usize,
        _ctx: &Context<'_>,
    ) -> rustyline::Result<(usize, Vec<Pair>)> {
        let line_to_cursor = &line[..pos];
        let (start, word) = find_word_start(line_to_cursor);
        let is_first_word = !line_to_cursor[..start].contains(|c: char| !c.is_whitespace());

        let mut completions = Vec::new();
        if is_first_word && !word.contains('/') {
            completions.extend(self.commands(word).into_iter().map(|name| Pair {
                display: name.clone(),
                replacement: name,
            }));
        }

        if word.contains('/') || !is_first_word {
            let (dir, partial) = match word.rfind('/') {
                Some(0) => ("/", &word[1..]),
                Some(slash) => (&word[..slash], &word[slash + 1..]),
                None => ("", word),
            };
            let prefix = word.rfind('/').map_or("", |slash| &word[..=slash]);
            completions.extend(self.paths(dir, partial).into_iter().map(|name| Pair {
                replacement: format!("{prefix}{name}"),
                display: name,
            }));
        }

        Ok((start, completions))
    }
}

fn find_word_start(line: &str) -> (usize, &str) {
    let mut start = line.len();
    for (i, c) in line.char_indices().rev() {
        if c.is_whitespace() || matches!(c, ';' | '|' | '&' | '>' | '<') {
            break;
        }
        start = i;
    }
    (start, &line[start..])
}

impl Hinter for Cli9Helper {
    type Hint = String;

    fn hint(&self, _line: &str, _pos: usize, _ctx: &Context<'_>) -> Option<String> {
        None
    }
}

impl Highlighter for Cli9Helper {
    fn highlight_hint<'h>(&self, hint: &'h str) -> Cow<'h, str> {
        Cow::Borrowed(hint)
    }
}

impl Validator for Cli9Helper {}

impl Helper for Cli9Helper {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_word_start() {
        assert_eq!(find_word_start("echo a | ca"), (9, "ca"));
        assert_eq!(find_word_start("ls /bin/e"), (3, "/bin/e"));
        assert_eq!(find_word_start(""), (0, ""));
    }
}
