use async_trait::async_trait;
use clap::{Arg, ArgMatches};
use cli9_core::Resolve;
use cli9_sdk::{ShellError, ShellResult, Value, ValueStream};

use super::{lines, text};
use crate::argparse::{flag, many, one, positional, required_stdin, rest, switch};
use crate::context::Context;
use crate::eval::{run_text, Unwind};
use crate::registry::Command;

fn unescape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some('0') => out.push('\0'),
            Some(other) => {
                if other != '\\' {
                    out.push('\\');
                }
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}

/// Run `code` with fatal errors aborting it; `return` ends it normally.
async fn run_strict(
    ctx: &mut Context,
    code: &str,
    stdin: Option<ValueStream>,
) -> Result<ValueStream, Unwind> {
    let saved = std::mem::replace(&mut ctx.strict, true);
    let outcome = run_text(ctx, code, stdin).await;
    ctx.strict = saved;
    outcome
}

pub struct Echo;

#[async_trait]
impl Command for Echo {
    fn name(&self) -> &'static str {
        "echo"
    }

    fn description(&self) -> &'static str {
        "Print the arguments, separated by spaces."
    }

    fn arguments(&self, parser: clap::Command) -> clap::Command {
        parser
            .arg(switch("escapes", 'e', "Interpret backslash escapes"))
            .arg(rest("text"))
    }

    async fn run(
        &self,
        _ctx: &mut Context,
        args: &ArgMatches,
        _stdin: Option<ValueStream>,
    ) -> ShellResult<ValueStream> {
        let joined = many(args, "text").join(" ");
        if flag(args, "escapes") {
            Ok(text(unescape(&joined)))
        } else {
            Ok(text(joined))
        }
    }
}

pub struct Pass;

#[async_trait]
impl Command for Pass {
    fn name(&self) -> &'static str {
        "pass"
    }

    fn description(&self) -> &'static str {
        "Do nothing."
    }

    async fn run(
        &self,
        _ctx: &mut Context,
        _args: &ArgMatches,
        _stdin: Option<ValueStream>,
    ) -> ShellResult<ValueStream> {
        Ok(ValueStream::new())
    }
}

pub struct Break;

#[async_trait]
impl Command for Break {
    fn name(&self) -> &'static str {
        "break"
    }

    fn description(&self) -> &'static str {
        "Leave the innermost loop."
    }

    async fn run(
        &self,
        _ctx: &mut Context,
        _args: &ArgMatches,
        _stdin: Option<ValueStream>,
    ) -> ShellResult<ValueStream> {
        Err(ShellError::Break)
    }
}

pub struct Continue;

#[async_trait]
impl Command for Continue {
    fn name(&self) -> &'static str {
        "continue"
    }

    fn description(&self) -> &'static str {
        "Skip to the next loop iteration."
    }

    async fn run(
        &self,
        _ctx: &mut Context,
        _args: &ArgMatches,
        _stdin: Option<ValueStream>,
    ) -> ShellResult<ValueStream> {
        Err(ShellError::Continue)
    }
}

pub struct Return;

#[async_trait]
impl Command for Return {
    fn name(&self) -> &'static str {
        "return"
    }

    fn description(&self) -> &'static str {
        "Leave the function or script with the given value, or the input."
    }

    fn arguments(&self, parser: clap::Command) -> clap::Command {
        parser.arg(rest("value"))
    }

    async fn run(
        &self,
        _ctx: &mut Context,
        args: &ArgMatches,
        stdin: Option<ValueStream>,
    ) -> ShellResult<ValueStream> {
        let value = many(args, "value");
        let stream = if value.is_empty() {
            stdin.unwrap_or_default()
        } else {
            text(value.join(" "))
        };
        Err(ShellError::Return(stream))
    }
}

pub struct Try;

#[async_trait]
impl Command for Try {
    fn name(&self) -> &'static str {
        "try"
    }

    fn description(&self) -> &'static str {
        "Run a command; on any error give back the input instead."
    }

    fn usage(&self) -> Option<&'static str> {
        Some("try COMMAND...")
    }

    fn arguments(&self, parser: clap::Command) -> clap::Command {
        parser.arg(rest("command").required(true))
    }

    async fn run(
        &self,
        ctx: &mut Context,
        args: &ArgMatches,
        stdin: Option<ValueStream>,
    ) -> ShellResult<ValueStream> {
        let code = many(args, "command").join(" ");
        match run_strict(ctx, &code, stdin.clone()).await {
            Ok(result) if !result.has_errors() => Ok(result),
            _ => Ok(stdin.unwrap_or_default()),
        }
    }
}

pub struct Exec;

#[async_trait]
impl Command for Exec {
    fn name(&self) -> &'static str {
        "exec"
    }

    fn aliases(&self) -> &'static [&'static str] {
        &["cli"]
    }

    fn description(&self) -> &'static str {
        "Run code from an option, a file or the input."
    }

    fn epilog(&self) -> Option<&'static str> {
        Some("Fatal errors stop the code; `return` ends it with a value.")
    }

    fn arguments(&self, parser: clap::Command) -> clap::Command {
        parser
            .arg(
                Arg::new("code")
                    .short('c')
                    .long("code")
                    .help("Code to run")
                    .conflicts_with("file"),
            )
            .arg(positional("file").help("Script to read the code from"))
    }

    async fn run(
        &self,
        ctx: &mut Context,
        args: &ArgMatches,
        stdin: Option<ValueStream>,
    ) -> ShellResult<ValueStream> {
        let (code, stdin) = if let Some(code) = one(args, "code") {
            (code, stdin)
        } else if let Some(file) = one(args, "file") {
            let options = Resolve {
                directory: Some(false),
                ..Resolve::default()
            };
            let (path, _) = ctx.resolve_with(&file, &options).await?;
            let content = ctx.vfs().read(&path, &ctx.caller).await?;
            (content.to_string(), stdin)
        } else {
            (required_stdin(self.name(), stdin)?.text(), None)
        };
        match run_strict(ctx, &code, stdin).await {
            Ok(result) | Err(Unwind::Return(result)) => Ok(result),
            Err(other) => Err(ShellError::from(other)),
        }
    }
}

pub struct Commands;

#[async_trait]
impl Command for Commands {
    fn name(&self) -> &'static str {
        "commands"
    }

    fn description(&self) -> &'static str {
        "List the registered commands."
    }

    fn arguments(&self, parser: clap::Command) -> clap::Command {
        parser.arg(switch("long", 'l', "Show descriptions"))
    }

    async fn run(
        &self,
        ctx: &mut Context,
        args: &ArgMatches,
        _stdin: Option<ValueStream>,
    ) -> ShellResult<ValueStream> {
        let commands = ctx.shell().registry().commands();
        if flag(args, "long") {
            Ok(lines(
                commands
                    .iter()
                    .map(|c| format!("{}: {}", c.name(), c.description())),
            ))
        } else {
            Ok(ValueStream::single(Value::List(
                commands.iter().map(|c| Value::str(c.name())).collect(),
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builtins::tests::{context, run};

    #[test]
    fn test_unescape() {
        assert_eq!(unescape(r"a\nb\tc"), "a\nb\tc");
        assert_eq!(unescape(r"\\n"), r"\n");
        assert_eq!(unescape(r"\q"), r"\q");
    }

    #[tokio::test]
    async fn test_echo() {
        let mut ctx = context().await;
        assert_eq!(run(&mut ctx, "echo a  b").await.text(), "a b");
        assert_eq!(run(&mut ctx, r"echo -e 'x\ny'").await.text(), "x\ny");
        assert_eq!(run(&mut ctx, "echo x | echo y").await.text(), "y");
    }

    #[tokio::test]
    async fn test_try_falls_back_to_input() {
        let mut ctx = context().await;
        assert_eq!(run(&mut ctx, "echo fallback | try cat /nope").await.text(), "fallback");
        assert_eq!(run(&mut ctx, "try echo fine").await.text(), "fine");
    }

    #[tokio::test]
    async fn test_exec_code_and_stdin() {
        let mut ctx = context().await;
        assert_eq!(run(&mut ctx, "exec -c 'echo a; return b; echo c'").await.text(), "a\nb");
        assert_eq!(run(&mut ctx, "echo 'echo piped' | exec").await.text(), "piped");
        let out = run(&mut ctx, "exec -c 'cat /nope; echo after'").await;
        assert!(out.has_errors());
        assert!(!out.text().contains("after"));
    }

    #[tokio::test]
    async fn test_commands_lists_registry() {
        let mut ctx = context().await;
        let out = run(&mut ctx, "commands").await;
        let Some(Value::List(names)) = out.last() else {
            panic!("expected a list");
        };
        assert!(names.contains(&Value::str("echo")));
    }
}
