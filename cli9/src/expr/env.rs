//! Name resolution and evaluation.
//!
//! A bare name is looked up, in order, as a context variable, a builtin, a
//! converter, `exec`/`file`, or a registered command. Anything else is its
//! own text, so `[ $kind == file ]` compares against the string `file`.

use cli9_core::Resolve;
use cli9_sdk::{Action, ShellError, ShellResult, Value, ValueStream};
use std::collections::BTreeMap;

use super::convert::{convert, CONVERTERS};
use super::ops::{self, BUILTINS};
use super::parser::Expr;
use crate::context::Context;
use crate::eval::{invoke, run_text, Eval};

#[derive(Debug, Clone)]
enum Func {
    Builtin(&'static str),
    Converter(&'static str),
    Command(String),
    Exec,
    File,
    Method(Box<Value>, String),
}

impl Func {
    fn name(&self) -> String {
        match self {
            Self::Builtin(name) | Self::Converter(name) => (*name).to_string(),
            Self::Command(name) | Self::Method(_, name) => name.clone(),
            Self::Exec => "exec".to_string(),
            Self::File => "file".to_string(),
        }
    }
}

/// An evaluated sub-expression. File queries stay pending until they are
/// used, so `file('x').size` can pick the action first.
#[derive(Debug, Clone)]
enum Obj {
    Value(Value),
    Func(Func),
    File { path: String, action: Option<String> },
}

fn resolve(name: &str, ctx: &Context) -> Obj {
    if let Some(value) = ctx.lookup(name) {
        return Obj::Value(value);
    }
    if let Some(builtin) = BUILTINS.iter().find(|b| **b == name) {
        return Obj::Func(Func::Builtin(builtin));
    }
    if let Some(converter) = CONVERTERS.iter().find(|c| **c == name) {
        return Obj::Func(Func::Converter(converter));
    }
    match name {
        "exec" => Obj::Func(Func::Exec),
        "file" => Obj::Func(Func::File),
        _ if ctx.shell().registry().get(name).is_some() => {
            Obj::Func(Func::Command(name.to_string()))
        }
        _ => Obj::Value(Value::str(name)),
    }
}

/// Evaluate `expr` to a plain value.
pub(super) async fn evaluate(expr: &Expr, ctx: &mut Context) -> ShellResult<Value> {
    value(expr, ctx).await
}

async fn value(expr: &Expr, ctx: &mut Context) -> ShellResult<Value> {
    let obj = eval(expr, ctx).await?;
    force(obj, ctx).await
}

async fn force(obj: Obj, ctx: &mut Context) -> ShellResult<Value> {
    match obj {
        Obj::Value(value) => Ok(value),
        Obj::Func(func) => Ok(Value::Str(func.name())),
        Obj::File { path, action } => Ok(query(ctx, &path, action.as_deref()).await),
    }
}

fn eval<'a>(expr: &'a Expr, ctx: &'a mut Context) -> Eval<'a, ShellResult<Obj>> {
    Box::pin(async move {
        match expr {
            Expr::Literal(literal) => Ok(Obj::Value(literal.clone())),
            Expr::List(items) => {
                let mut values = Vec::with_capacity(items.len());
                for item in items {
                    values.push(value(item, ctx).await?);
                }
                Ok(Obj::Value(Value::List(values)))
            }
            Expr::Dict(pairs) => {
                let mut map = BTreeMap::new();
                for (key, item) in pairs {
                    let key = value(key, ctx).await?.to_string();
                    map.insert(key, value(item, ctx).await?);
                }
                Ok(Obj::Value(Value::Map(map)))
            }
            Expr::Name(name) => Ok(resolve(name, ctx)),
            Expr::Variable(name) => Ok(Obj::Value(ctx.variable(name))),
            Expr::Attr(target, attr) => match eval(target, ctx).await? {
                Obj::File { path, action: None } => Ok(Obj::File {
                    path,
                    action: Some(attr.clone()),
                }),
                other => {
                    let target = force(other, ctx).await?;
                    let field = match &target {
                        Value::Map(map) | Value::Embed(map) => map.get(attr).cloned(),
                        _ => None,
                    };
                    Ok(field.map_or_else(
                        || Obj::Func(Func::Method(Box::new(target), attr.clone())),
                        Obj::Value,
                    ))
                }
            },
            Expr::Index(target, index) => {
                let target = value(target, ctx).await?;
                let found = match value(index, ctx).await? {
                    Value::Int(i) => target.index_int(i)?,
                    other => target.index(&other.to_string())?,
                };
                Ok(Obj::Value(found))
            }
            Expr::Call { func, args, kwargs } => call(func, args, kwargs, ctx).await,
            Expr::Unary(op, operand) => {
                let operand = value(operand, ctx).await?;
                ops::unary(*op, &operand).map(Obj::Value)
            }
            Expr::Binary(op, lhs, rhs) => {
                let lhs = value(lhs, ctx).await?;
                let rhs = value(rhs, ctx).await?;
                let max_len = ctx.shell().config().limits.max_file_size;
                ops::binary(*op, &lhs, &rhs, max_len).map(Obj::Value)
            }
            Expr::Compare(first, rest) => {
                let mut left = value(first, ctx).await?;
                for (op, right) in rest {
                    let right = value(right, ctx).await?;
                    if !ops::compare(*op, &left, &right)? {
                        return Ok(Obj::Value(Value::Bool(false)));
                    }
                    left = right;
                }
                Ok(Obj::Value(Value::Bool(true)))
            }
            Expr::And(lhs, rhs) => {
                let lhs = value(lhs, ctx).await?;
                if lhs.is_truthy() {
                    eval(rhs, ctx).await
                } else {
                    Ok(Obj::Value(lhs))
                }
            }
            Expr::Or(lhs, rhs) => {
                let lhs = value(lhs, ctx).await?;
                if lhs.is_truthy() {
                    Ok(Obj::Value(lhs))
                } else {
                    eval(rhs, ctx).await
                }
            }
        }
    })
}

async fn call(
    func: &Expr,
    args: &[Expr],
    kwargs: &[(String, Expr)],
    ctx: &mut Context,
) -> ShellResult<Obj> {
    let callee = eval(func, ctx).await?;
    let mut values = Vec::with_capacity(args.len());
    for arg in args {
        values.push(value(arg, ctx).await?);
    }
    let mut named = Vec::with_capacity(kwargs.len());
    for (name, arg) in kwargs {
        named.push((name.as_str(), value(arg, ctx).await?));
    }
    let argument = |index: usize, name: &str| {
        values.get(index).cloned().or_else(|| {
            named
                .iter()
                .find(|(key, _)| *key == name)
                .map(|(_, value)| value.clone())
        })
    };

    let func = match callee {
        Obj::Func(func) => func,
        Obj::Value(name) if matches!(func, Expr::Name(_)) => {
            return Err(ShellError::internal(format!(
                "NameError: name '{name}' is not defined"
            )));
        }
        other => {
            let target = force(other, ctx).await?;
            return Err(ShellError::internal(format!(
                "TypeError: '{}' object is not callable",
                target.type_name()
            )));
        }
    };

    match func {
        Func::Builtin(name) => ops::builtin(name, &values).map(Obj::Value),
        Func::Converter(name) => convert(name, &values).map(Obj::Value),
        Func::Method(target, name) => ops::method(&target, &name, &values).map(Obj::Value),
        Func::File => {
            let path = argument(0, "path")
                .ok_or_else(|| ShellError::internal("TypeError: file() missing argument 'path'"))?;
            Ok(Obj::File {
                path: path.to_string(),
                action: argument(1, "action").map(|action| action.to_string()),
            })
        }
        Func::Exec | Func::Command(_) => {
            let text = argument(0, "string").map(|s| s.to_string()).unwrap_or_default();
            let stdin = argument(1, "stdin").map(|input| match input {
                Value::List(items) => items.into_iter().collect(),
                other => ValueStream::single(other),
            });
            let outcome = match func {
                Func::Command(name) => invoke(ctx, &name, split_words(&text)?, stdin).await,
                _ => run_text(ctx, &text, stdin).await,
            };
            outcome.map(collapse).map(Obj::Value).map_err(ShellError::from)
        }
    }
}

/// Control flow escaping a command call keeps unwinding.
/// A command's output as one value: its first error, `True` for no
/// output, the single value, or a list.
fn collapse(stream: ValueStream) -> Value {
    if let Some(error) = stream.errors().next() {
        return Value::Error(error.clone());
    }
    let mut items = stream.into_items();
    match items.len() {
        0 => Value::Bool(true),
        1 => items.remove(0),
        _ => Value::List(items),
    }
}

/// Split command text into words, honoring quotes and backslashes.
fn split_words(text: &str) -> ShellResult<Vec<String>> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut in_word = false;
    let mut quote: Option<char> = None;
    let mut chars = text.chars();
    while let Some(c) = chars.next() {
        match (quote, c) {
            (Some(open), c) if c == open => quote = None,
            (Some('"') | None, '\\') => {
                if let Some(next) = chars.next() {
                    current.push(next);
                }
                in_word = true;
            }
            (Some(_), c) => current.push(c),
            (None, '\'' | '"') => {
                quote = Some(c);
                in_word = true;
            }
            (None, c) if c.is_whitespace() => {
                if in_word {
                    words.push(std::mem::take(&mut current));
                    in_word = false;
                }
            }
            (None, c) => {
                current.push(c);
                in_word = true;
            }
        }
    }
    if quote.is_some() {
        return Err(ShellError::parsing("No closing quotation"));
    }
    if in_word {
        words.push(current);
    }
    Ok(words)
}

/// Answer `file(path, action)`. Failures are values, and a path that does
/// not exist is simply `False` when only existence was asked.
async fn query(ctx: &Context, path: &str, action: Option<&str>) -> Value {
    let options = Resolve {
        directory: match action {
            Some("directory-like") => Some(true),
            Some("file-like") => Some(false),
            _ => None,
        },
        ..Resolve::default()
    };
    let resolved = match ctx.resolve_with(path, &options).await {
        Ok((resolved, _)) => resolved,
        Err(error) if error.is_not_found() && matches!(action, None | Some("exists")) => {
            return Value::Bool(false);
        }
        Err(error) => return Value::Error(error),
    };
    let (resolved, node) = match ctx.vfs().deref(&resolved, &ctx.caller).await {
        Ok(found) => found,
        Err(error) => return Value::Error(error),
    };
    let permission = |action| Value::Bool(node.mode.allows(&ctx.caller.principal, action));
    match action {
        Some("read") => permission(Action::Read),
        Some("write") => permission(Action::Write),
        Some("execute") => permission(Action::Execute),
        Some("owner") => Value::Str(node.mode.owner.to_string()),
        Some("group") => Value::Str(node.mode.group.to_string()),
        Some("kind") => Value::str(node.kind.tag()),
        Some("size") => match ctx.vfs().size(&resolved, false, &ctx.caller).await {
            Ok(Some(size)) => Value::Int(i64::try_from(size).unwrap_or(i64::MAX)),
            Ok(None) => Value::Null,
            Err(error) => Value::Error(error),
        },
        Some("content") => ctx
            .vfs()
            .read(&resolved, &ctx.caller)
            .await
            .unwrap_or_else(Value::Error),
        _ => Value::Bool(true),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_words() {
        assert_eq!(
            split_words(r#"-a 'b c' "d \"e\"" f\ g"#).unwrap(),
            vec!["-a", "b c", "d \"e\"", "f g"]
        );
        assert_eq!(split_words("  ").unwrap(), Vec::<String>::new());
        assert_eq!(split_words("''").unwrap(), vec![""]);
        assert!(split_words("'open").is_err());
    }

    #[test]
    fn test_collapse() {
        assert_eq!(collapse(ValueStream::new()), Value::Bool(true));
        assert_eq!(collapse(ValueStream::single(Value::Int(1))), Value::Int(1));
        let mut stream = ValueStream::single(Value::str("a"));
        stream.push(Value::Error(ShellError::False));
        assert_eq!(collapse(stream), Value::Error(ShellError::False));
    }
}
