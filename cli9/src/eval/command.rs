//! Simple commands: redirects, dispatch and error settlement.

use cli9_core::{Content, Executable, Resolve};
use cli9_sdk::{Data, ShellError, Value, ValueStream};

use super::control::call_function;
use super::words::{assign, expand, stream_text};
use super::{run_sequence, Flow, Unwind};
use crate::ast::{Wrapper, WrapperKind};
use crate::context::Context;
use crate::grammar::RedirectOp;
use crate::normalize::shebang;
use crate::registry::{self, Command};
use crate::scope::{Alias, Function};

/// What a command error turns into: keywords unwind, fatal errors abort a
/// strict script, everything else is a value in the output.
fn settle(ctx: &Context, error: ShellError) -> Flow<ValueStream> {
    if error.is_keyword() {
        return Err(Unwind::from(error));
    }
    if ctx.strict && error.is_fatal() {
        return Err(Unwind::Return(ValueStream::from(error)));
    }
    Ok(ValueStream::from(error))
}

async fn read_input(op: RedirectOp, target: String, ctx: &Context) -> Flow<ValueStream> {
    match op {
        RedirectOp::Input => {
            let options = Resolve {
                directory: Some(false),
                ..Resolve::default()
            };
            let (path, _) = ctx.resolve_with(&target, &options).await.map_err(Unwind::Error)?;
            let value = ctx.vfs().read(&path, &ctx.caller).await.map_err(Unwind::Error)?;
            Ok(ValueStream::single(value))
        }
        _ => Ok(ValueStream::single(Value::Str(target))),
    }
}

async fn write_output(
    op: RedirectOp,
    target: &str,
    output: &ValueStream,
    ctx: &Context,
) -> Result<(), ShellError> {
    let content = match output.as_data() {
        Data::Text(text) => Content::Text(text),
        Data::Bytes(bytes) => Content::Bytes(bytes),
    };
    ctx.vfs()
        .write_path(
            target,
            &ctx.directory(),
            content,
            op == RedirectOp::Output,
            &ctx.caller,
        )
        .await
        .map(|_| ())
}

pub(super) async fn command(
    node: &Wrapper,
    parts: &[Wrapper],
    ctx: &mut Context,
    stdin: Option<ValueStream>,
) -> Flow<ValueStream> {
    let mut args = Vec::new();
    let mut stdin = stdin;
    let mut output: Option<(RedirectOp, String)> = None;
    for part in parts {
        match &part.kind {
            WrapperKind::Assignment(word) => assign(word, ctx).await?,
            WrapperKind::Redirect { op, target } => {
                let target = stream_text(target, ctx).await?;
                if op.is_input() {
                    stdin = Some(read_input(*op, target, ctx).await?);
                } else {
                    output = Some((*op, target));
                }
            }
            WrapperKind::Word(word) => args.extend(expand(word, ctx).await?),
            _ => args.push(part.evaluate(ctx, None).await?.text()),
        }
    }

    if args.is_empty() {
        return match (output, stdin) {
            (Some((op, target)), Some(input)) => {
                match write_output(op, &target, &input, ctx).await {
                    Ok(()) => Ok(ValueStream::new()),
                    Err(error) => settle(ctx, error),
                }
            }
            (_, stdin) => Ok(stdin.unwrap_or_default()),
        };
    }

    let top = node.depth == 0 && ctx.nested == 0 && !ctx.scope().skip_top_priority();
    let previous = top.then(|| ctx.scope().swap_command_args(args.clone()));
    let name = args.remove(0);
    let outcome = invoke(ctx, &name, args, stdin).await;
    if let Some(previous) = previous {
        ctx.scope().swap_command_args(previous);
    }

    let result = outcome?;
    match output {
        Some((op, target)) => match write_output(op, &target, &result, ctx).await {
            Ok(()) => Ok(result.into_iter().filter(Value::is_error).collect()),
            Err(error) => settle(ctx, error),
        },
        None => Ok(result),
    }
}

/// Dispatch `name`: a path, a function, an alias or a registered command.
pub async fn invoke(
    ctx: &mut Context,
    name: &str,
    args: Vec<String>,
    stdin: Option<ValueStream>,
) -> Flow<ValueStream> {
    if name.contains('/') {
        return execute_path(ctx, name, args, stdin).await;
    }
    if let Some(function) = ctx.function(name) {
        return call_function(&function, args, stdin, ctx).await;
    }
    if let Some(alias) = ctx.alias(name) {
        return expand_alias(ctx, name, &alias, args, stdin).await;
    }
    match ctx.shell().registry().get(name) {
        Some(command) => run_command(ctx, command.as_ref(), args, stdin).await,
        None => Ok(ValueStream::from(ShellError::unknown_command(name))),
    }
}

async fn run_command(
    ctx: &mut Context,
    command: &dyn Command,
    args: Vec<String>,
    stdin: Option<ValueStream>,
) -> Flow<ValueStream> {
    match registry::execute(command, ctx, &args, stdin).await {
        Ok(stream) => Ok(stream),
        Err(error) => settle(ctx, error),
    }
}

/// Leftover arguments are appended to the last command of the expansion.
fn append_args(node: &mut Wrapper, args: &[String]) {
    match &mut node.kind {
        WrapperKind::Command(parts) => {
            let depth = node.depth + 1;
            parts.extend(args.iter().map(|arg| Wrapper::literal_word(arg, depth)));
        }
        WrapperKind::List(parts) | WrapperKind::Pipeline(parts) | WrapperKind::Compound(parts) => {
            let last = parts.iter_mut().rev().find(|part| {
                !matches!(
                    part.kind,
                    WrapperKind::Operator(_) | WrapperKind::Pipe | WrapperKind::ReservedWord(_)
                )
            });
            if let Some(last) = last {
                append_args(last, args);
            }
        }
        _ => {}
    }
}

async fn expand_alias(
    ctx: &mut Context,
    name: &str,
    alias: &Alias,
    args: Vec<String>,
    stdin: Option<ValueStream>,
) -> Flow<ValueStream> {
    let limit = ctx.shell().config().limits.max_alias_depth;
    if ctx.used_aliases.len() >= limit {
        return Ok(ValueStream::from(ShellError::limit_exceeded(limit, "alias depth")));
    }
    let mut nodes = alias.nodes.clone();
    if !args.is_empty() {
        if let Some(last) = nodes.last_mut() {
            append_args(last, &args);
        }
    }

    ctx.used_aliases.push(name.to_string());
    let nodes: Vec<&Wrapper> = nodes.iter().collect();
    let outcome = run_sequence(&nodes, ctx, stdin).await;
    ctx.used_aliases.pop();
    outcome
}

/// Run a script file's text with `$0` set to its path.
async fn run_file(
    ctx: &mut Context,
    text: &str,
    path: &str,
    args: Vec<String>,
    stdin: Option<ValueStream>,
) -> Flow<ValueStream> {
    if let Some(line) = shebang(text, path) {
        let mut line = line;
        for arg in &args {
            line.push(' ');
            line.push_str(arg);
        }
        return run_text(ctx, &line, stdin).await;
    }
    let script = match ctx.shell().scripts().parse(text) {
        Ok(script) => script,
        Err(ShellError::NoCommand) => return Ok(ValueStream::new()),
        Err(error) => return settle(ctx, error),
    };
    let function = Function {
        name: path.to_string(),
        body: Wrapper {
            span: 0..text.chars().count(),
            text: text.to_string(),
            depth: 0,
            kind: WrapperKind::Compound(script.nodes.clone()),
        },
    };
    call_function(&function, args, stdin, ctx).await
}

/// Execute the node at `path`: scripts run, command files dispatch,
/// directories become the working directory.
pub async fn execute_path(
    ctx: &mut Context,
    path: &str,
    args: Vec<String>,
    stdin: Option<ValueStream>,
) -> Flow<ValueStream> {
    let resolved = match ctx.resolve(path).await {
        Ok(resolved) => resolved,
        Err(error) => return settle(ctx, error),
    };
    let executable = match ctx.vfs().executable(&resolved, &ctx.caller).await {
        Ok(executable) => executable,
        Err(error) => return settle(ctx, error),
    };
    match executable {
        Executable::Script { text, path } => run_file(ctx, &text, &path, args, stdin).await,
        Executable::Command(name) => match ctx.shell().registry().get(&name) {
            Some(command) => run_command(ctx, command.as_ref(), args, stdin).await,
            None => Ok(ValueStream::from(ShellError::unknown_command(name))),
        },
        Executable::Directory(dir) => {
            ctx.set_directory(dir);
            Ok(ValueStream::new())
        }
        Executable::Nothing => Ok(ValueStream::new()),
    }
}

/// Parse and run `text` inside the current invocation, as `exec -c` and
/// the expression `exec()` do.
pub async fn run_text(
    ctx: &mut Context,
    text: &str,
    stdin: Option<ValueStream>,
) -> Flow<ValueStream> {
    let script = match ctx.shell().scripts().parse(text) {
        Ok(script) => script,
        Err(ShellError::NoCommand) => return Ok(stdin.unwrap_or_default()),
        Err(error) => return settle(ctx, error),
    };
    ctx.enter()?;
    let nodes: Vec<&Wrapper> = script.nodes.iter().collect();
    let outcome = run_sequence(&nodes, ctx, stdin).await;
    ctx.leave();
    outcome
}

/// Parse an alias body once, when it is defined.
pub fn parse_alias(text: &str) -> Result<Vec<Wrapper>, ShellError> {
    let text = crate::normalize::normalize(text)?;
    crate::normalize::parse_fragment(&text, 1)
}
