//! Lists, pipelines, conditionals, loops and functions.

use cli9_sdk::{ShellError, Value, ValueStream};
use std::sync::Arc;

use super::words::{expand_one, expand_typed};
use super::{push_error, Flow, Unwind};
use crate::ast::{Wrapper, WrapperKind};
use crate::context::Context;
use crate::scope::Function;

/// Whether the element after `op` runs, given what the previous one left.
fn proceeds(op: &str, last: Option<&Value>) -> bool {
    let failed = last.is_some_and(Value::is_failure);
    match op {
        "&&" => !failed,
        "||" => failed,
        _ => !matches!(last, Some(Value::Error(ShellError::Return(_)))),
    }
}

pub(super) async fn list(parts: &[Wrapper], ctx: &mut Context) -> Flow<ValueStream> {
    let mut result = ValueStream::new();
    let mut skip = false;
    for part in parts {
        if let WrapperKind::Operator(op) = &part.kind {
            skip = !proceeds(op, result.last());
            continue;
        }
        if std::mem::take(&mut skip) {
            continue;
        }
        match part.evaluate(ctx, None).await {
            Ok(stream) => result.extend(stream),
            Err(Unwind::Error(error)) => push_error(&mut result, error),
            Err(signal) => return Err(signal.prepend(result)),
        }
    }
    Ok(result)
}

/// Each stage receives the whole output of the one before as its input.
pub(super) async fn pipeline(
    parts: &[Wrapper],
    ctx: &mut Context,
    stdin: Option<ValueStream>,
) -> Flow<ValueStream> {
    let mut result = ValueStream::new();
    let mut input = stdin;
    for part in parts {
        if matches!(part.kind, WrapperKind::Pipe) {
            input = Some(result.pop());
            continue;
        }
        match part.evaluate(ctx, input.take()).await {
            Ok(stream) => result.extend(stream),
            Err(Unwind::Error(error)) => push_error(&mut result, error),
            Err(signal) => return Err(signal.prepend(result)),
        }
    }
    Ok(result)
}

/// Run a condition; it holds when it produced no errors.
async fn condition(node: &Wrapper, ctx: &mut Context) -> Flow<(bool, ValueStream)> {
    match node.evaluate(ctx, None).await {
        Ok(stream) => Ok((!stream.has_errors(), stream)),
        Err(Unwind::Error(_)) => Ok((false, ValueStream::new())),
        Err(signal) => Err(signal),
    }
}

/// Output of a condition that is kept: everything but the errors.
fn visible(stream: ValueStream) -> ValueStream {
    stream.into_iter().filter(|v| !v.is_error()).collect()
}

pub(super) async fn if_clause(parts: &[Wrapper], ctx: &mut Context) -> Flow<ValueStream> {
    let mut result = ValueStream::new();
    let mut index = 0;
    while index < parts.len() {
        let keyword = parts[index].reserved_word().unwrap_or_default();
        match keyword {
            "if" | "elif" => {
                let (Some(test), Some(action)) = (parts.get(index + 1), parts.get(index + 3)) else {
                    break;
                };
                let (holds, output) = condition(test, ctx)
                    .await
                    .map_err(|signal| signal.prepend(result.clone()))?;
                result.extend(visible(output));
                if holds {
                    return match action.evaluate(ctx, None).await {
                        Ok(stream) => {
                            result.extend(stream);
                            Ok(result)
                        }
                        Err(signal) => Err(signal.prepend(result)),
                    };
                }
                index += 4;
            }
            "else" => {
                let Some(action) = parts.get(index + 1) else {
                    break;
                };
                return match action.evaluate(ctx, None).await {
                    Ok(stream) => {
                        result.extend(stream);
                        Ok(result)
                    }
                    Err(signal) => Err(signal.prepend(result)),
                };
            }
            _ => index += 1,
        }
    }
    Ok(result)
}

pub(super) async fn for_clause(parts: &[Wrapper], ctx: &mut Context) -> Flow<ValueStream> {
    let Some(WrapperKind::Word(name)) = parts.get(1).map(|p| &p.kind) else {
        return Err(Unwind::Error(ShellError::parsing("for: missing variable name")));
    };
    let name = expand_one(name, ctx).await?;

    let mut items = Vec::new();
    let mut body = None;
    let mut in_items = false;
    let mut listed = false;
    for part in &parts[2..] {
        match (&part.kind, part.reserved_word()) {
            (_, Some("in")) => (in_items, listed) = (true, true),
            (_, Some("do")) => in_items = false,
            (_, Some(_)) => {}
            (WrapperKind::Word(word), None) if in_items => items.extend(expand_typed(word, ctx).await?),
            _ => body = Some(part),
        }
    }
    let Some(body) = body else {
        return Ok(ValueStream::new());
    };
    if !listed {
        items = ctx.scope().command_args().into_iter().skip(1).map(Value::Str).collect();
    }

    let mut result = ValueStream::new();
    for item in items {
        let value = match item {
            Value::Int(_) | Value::Str(_) => item,
            other => Value::Str(other.to_string()),
        };
        ctx.set_variable(&name, value, false).map_err(Unwind::Error)?;
        match body.evaluate(ctx, None).await {
            Ok(stream) => result.extend(stream),
            Err(Unwind::Break(partial)) => {
                result.extend(partial);
                break;
            }
            Err(Unwind::Continue(partial)) => result.extend(partial),
            Err(Unwind::Error(error)) => push_error(&mut result, error),
            Err(signal) => return Err(signal.prepend(result)),
        }
    }
    Ok(result)
}

/// `while` runs while the condition holds, `until` while it fails.
pub(super) async fn loop_clause(parts: &[Wrapper], ctx: &mut Context) -> Flow<ValueStream> {
    let (Some(keyword), Some(test), Some(body)) = (
        parts.first().and_then(Wrapper::reserved_word),
        parts.get(1),
        parts.get(3),
    ) else {
        return Err(Unwind::Error(ShellError::parsing("loop: malformed clause")));
    };
    let until = keyword == "until";
    let limit = ctx.shell().config().limits.max_iterations;

    let mut result = ValueStream::new();
    let mut iterations = 0;
    loop {
        let (holds, output) = condition(test, ctx)
            .await
            .map_err(|signal| signal.prepend(result.clone()))?;
        result.extend(visible(output));
        if holds == until {
            break;
        }
        if iterations >= limit {
            return Err(Unwind::Error(ShellError::limit_exceeded(limit, "maximum repeatings")));
        }
        iterations += 1;
        match body.evaluate(ctx, None).await {
            Ok(stream) => result.extend(stream),
            Err(Unwind::Break(partial)) => {
                result.extend(partial);
                break;
            }
            Err(Unwind::Continue(partial)) => result.extend(partial),
            Err(Unwind::Error(error)) => push_error(&mut result, error),
            Err(signal) => return Err(signal.prepend(result)),
        }
    }
    Ok(result)
}

pub(super) async fn define_function(parts: &[Wrapper], ctx: &mut Context) -> Flow<ValueStream> {
    let name = parts.iter().find_map(|p| match &p.kind {
        WrapperKind::Word(word) => word.as_literal(),
        _ => None,
    });
    let body = parts
        .iter()
        .rev()
        .find(|p| matches!(p.kind, WrapperKind::Compound(_)));
    let (Some(name), Some(body)) = (name, body) else {
        return Err(Unwind::Error(ShellError::parsing("function: missing name or body")));
    };
    tracing::trace!(%name, "function defined");
    ctx.set_function(
        Arc::new(Function {
            name,
            body: body.clone(),
        }),
        false,
    );
    Ok(ValueStream::new())
}

/// Call a function: `$0` is its name, `$1`.. its arguments and `$_stdin`
/// its input, all restored afterwards.
pub(super) async fn call_function(
    function: &Function,
    args: Vec<String>,
    stdin: Option<ValueStream>,
    ctx: &mut Context,
) -> Flow<ValueStream> {
    ctx.enter()?;
    let mut argv = Vec::with_capacity(args.len() + 1);
    argv.push(function.name.clone());
    argv.extend(args);
    let previous_args = ctx.scope().swap_command_args(argv);
    let previous_stdin = ctx.remove_variable("_stdin", false);
    let input = stdin.map_or(Value::Null, |s| Value::List(s.into_items()));
    // `_stdin` is never reserved
    let _ = ctx.set_variable("_stdin", input, false);

    let outcome = function.body.evaluate(ctx, None).await;
    ctx.leave();

    ctx.scope().swap_command_args(previous_args);
    ctx.remove_variable("_stdin", false);
    if let Some(previous) = previous_stdin {
        let _ = ctx.set_variable("_stdin", previous, false);
    }

    match outcome {
        Ok(stream) | Err(Unwind::Return(stream)) => Ok(stream),
        Err(Unwind::Error(error)) => Ok(ValueStream::from(error)),
        Err(signal) => Err(signal),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operators() {
        let failed = Value::List(vec![Value::Error(ShellError::False)]);
        let fine = Value::List(vec![Value::str("a")]);
        assert!(proceeds("&&", Some(&fine)));
        assert!(!proceeds("&&", Some(&failed)));
        assert!(proceeds("||", Some(&failed)));
        assert!(!proceeds("||", Some(&fine)));
        assert!(proceeds(";", Some(&failed)));
        assert!(proceeds("&&", None));
        assert!(!proceeds(
            ";",
            Some(&Value::Error(ShellError::Return(ValueStream::new())))
        ));
    }
}
