use async_trait::async_trait;
use clap::{Arg, ArgAction, ArgMatches};
use cli9_sdk::{ShellError, ShellResult, Value, ValueStream};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::debug;

use super::{lines, quoted, text, Registration};
use crate::argparse::{flag, int, many, one, positional, switch};
use crate::context::Context;
use crate::eval::parse_alias;
use crate::registry::Command;
use crate::scope::{self, Heard, Listener};

fn names(id: &'static str) -> Arg {
    Arg::new(id).action(ArgAction::Append).num_args(0..)
}

fn valid_name(name: &str) -> bool {
    !name.is_empty() && name.chars().all(|c| c.is_alphanumeric() || c == '_')
}

/// `name=value` or `name+=value`; the flag is set for `+=`.
fn assignment<'a>(command: &str, word: &'a str) -> ShellResult<Option<(&'a str, &'a str, bool)>> {
    let Some((name, value)) = word.split_once('=') else {
        return Ok(None);
    };
    let (name, append) = match name.strip_suffix('+') {
        Some(name) => (name, true),
        None => (name, false),
    };
    if !valid_name(name) {
        return Err(ShellError::argparse(command, format!("invalid name: '{name}'")));
    }
    Ok(Some((name, value, append)))
}

pub struct Export;

#[async_trait]
impl Command for Export {
    fn name(&self) -> &'static str {
        "export"
    }

    fn description(&self) -> &'static str {
        "Make variables or functions outlive the invocation."
    }

    fn usage(&self) -> Option<&'static str> {
        Some("export [-t] [-f] NAME[=VALUE]...")
    }

    fn epilog(&self) -> Option<&'static str> {
        Some("Without names, lists the exported variables.")
    }

    fn arguments(&self, parser: clap::Command) -> clap::Command {
        parser
            .arg(switch("temporary", 't', "Turn exported names back into temporaries"))
            .arg(switch("function", 'f', "Names are functions"))
            .arg(names("names"))
    }

    async fn run(
        &self,
        ctx: &mut Context,
        args: &ArgMatches,
        _stdin: Option<ValueStream>,
    ) -> ShellResult<ValueStream> {
        let export = !flag(args, "temporary");
        let functions = flag(args, "function");
        let words = many(args, "names");
        if words.is_empty() {
            let variables = ctx.scope().variables();
            return Ok(lines(variables.iter().map(|(k, v)| format!("{k}={}", quoted(&v.to_string())))));
        }
        for word in &words {
            if let Some((name, value, append)) = assignment(self.name(), word)? {
                let value = Value::str(value);
                if append {
                    ctx.edit_variable(name, value, export)?;
                } else {
                    ctx.set_variable(name, value, export)?;
                }
                continue;
            }
            if functions {
                let function = ctx
                    .remove_function(word, !export)
                    .ok_or_else(|| ShellError::command(self.name(), format!("{word}: no such function")))?;
                ctx.set_function(function, export);
            } else {
                let value = ctx
                    .remove_variable(word, !export)
                    .ok_or_else(|| ShellError::undefined_variable(word.as_str()))?;
                ctx.set_variable(word, value, export)?;
            }
        }
        Ok(ValueStream::new())
    }
}

pub struct Unset;

#[async_trait]
impl Command for Unset {
    fn name(&self) -> &'static str {
        "unset"
    }

    fn description(&self) -> &'static str {
        "Forget variables or functions."
    }

    fn arguments(&self, parser: clap::Command) -> clap::Command {
        parser
            .arg(switch("temporary", 't', "Forget temporaries instead of exported names"))
            .arg(switch("function", 'f', "Names are functions"))
            .arg(names("names").required(true))
    }

    async fn run(
        &self,
        ctx: &mut Context,
        args: &ArgMatches,
        _stdin: Option<ValueStream>,
    ) -> ShellResult<ValueStream> {
        let export = !flag(args, "temporary");
        let functions = flag(args, "function");
        for name in many(args, "names") {
            let removed = if functions {
                ctx.remove_function(&name, export).is_some()
            } else {
                ctx.remove_variable(&name, export).is_some()
            };
            if !removed {
                debug!(name = %name, export, "nothing to unset");
            }
        }
        Ok(ValueStream::new())
    }
}

pub struct Alias;

#[async_trait]
impl Command for Alias {
    fn name(&self) -> &'static str {
        "alias"
    }

    fn description(&self) -> &'static str {
        "Define aliases, or list them."
    }

    fn usage(&self) -> Option<&'static str> {
        Some("alias [NAME=TEXT]...")
    }

    fn epilog(&self) -> Option<&'static str> {
        Some("An empty TEXT removes the alias.")
    }

    fn arguments(&self, parser: clap::Command) -> clap::Command {
        parser.arg(names("pairs"))
    }

    async fn run(
        &self,
        ctx: &mut Context,
        args: &ArgMatches,
        _stdin: Option<ValueStream>,
    ) -> ShellResult<ValueStream> {
        let pairs = many(args, "pairs");
        if pairs.is_empty() {
            let aliases = ctx.scope().aliases();
            return Ok(lines(aliases.iter().map(|(name, body)| format!("{name}={}", quoted(body)))));
        }
        for pair in &pairs {
            let Some((name, body)) = pair.split_once('=') else {
                return Err(ShellError::argparse(self.name(), format!("expected NAME=TEXT, got '{pair}'")));
            };
            if !valid_name(name) {
                return Err(ShellError::argparse(self.name(), format!("invalid name: '{name}'")));
            }
            if body.trim().is_empty() {
                ctx.scope().remove_alias(name);
                continue;
            }
            let nodes = parse_alias(body)?;
            ctx.scope().set_alias(
                name,
                Arc::new(scope::Alias {
                    text: body.to_string(),
                    nodes,
                }),
            );
        }
        Ok(ValueStream::new())
    }
}

pub struct Unalias;

#[async_trait]
impl Command for Unalias {
    fn name(&self) -> &'static str {
        "unalias"
    }

    fn description(&self) -> &'static str {
        "Remove aliases."
    }

    fn arguments(&self, parser: clap::Command) -> clap::Command {
        parser.arg(names("names").required(true))
    }

    async fn run(
        &self,
        ctx: &mut Context,
        args: &ArgMatches,
        _stdin: Option<ValueStream>,
    ) -> ShellResult<ValueStream> {
        for name in many(args, "names") {
            if ctx.scope().remove_alias(&name).is_none() {
                return Err(ShellError::command(self.name(), format!("{name}: not found")));
            }
        }
        Ok(ValueStream::new())
    }
}

/// Hands the next input of the scope to a waiting `read`.
struct Reader {
    reply: Mutex<Option<oneshot::Sender<String>>>,
}

#[async_trait]
impl Listener for Reader {
    async fn hear(&self, _ctx: &mut Context, text: &str) -> ShellResult<Heard> {
        let reply = self.reply.lock().unwrap_or_else(PoisonError::into_inner).take();
        if reply.is_some_and(|reply| reply.send(text.to_string()).is_ok()) {
            Ok(Heard::Finished(ValueStream::new()))
        } else {
            Ok(Heard::Ignored)
        }
    }
}

pub struct Read;

#[async_trait]
impl Command for Read {
    fn name(&self) -> &'static str {
        "read"
    }

    fn description(&self) -> &'static str {
        "Wait for the next input of this scope."
    }

    fn epilog(&self) -> Option<&'static str> {
        Some("With NAME the input is stored in a temporary variable. A timeout of 0 waits forever.")
    }

    fn arguments(&self, parser: clap::Command) -> clap::Command {
        parser
            .arg(
                Arg::new("timeout")
                    .short('t')
                    .long("timeout")
                    .default_value("60")
                    .help("Seconds to wait"),
            )
            .arg(positional("name"))
    }

    async fn run(
        &self,
        ctx: &mut Context,
        args: &ArgMatches,
        _stdin: Option<ValueStream>,
    ) -> ShellResult<ValueStream> {
        let timeout = int(args, self.name(), "timeout")?.unwrap_or(60);
        let name = one(args, "name");
        if let Some(name) = &name {
            if Context::is_reserved(name) {
                return Err(ShellError::reserved_variable(name.as_str()));
            }
        }

        let (tx, rx) = oneshot::channel();
        let reader = Arc::new(Reader {
            reply: Mutex::new(Some(tx)),
        });
        let pid = ctx.scope().processes().add_redirect("read", reader);
        let _registration = Registration::new(ctx.scope(), pid);

        let received = match u64::try_from(timeout) {
            Ok(secs) if secs > 0 => match tokio::time::timeout(Duration::from_secs(secs), rx).await {
                Ok(received) => received.ok(),
                Err(_) => {
                    debug!(pid, secs, "read timed out");
                    None
                }
            },
            _ => rx.await.ok(),
        };
        let Some(input) = received else {
            return Ok(ValueStream::new());
        };
        match name {
            Some(name) => {
                ctx.set_variable(&name, Value::Str(input), false)?;
                Ok(ValueStream::new())
            }
            None => Ok(text(input)),
        }
    }
}
