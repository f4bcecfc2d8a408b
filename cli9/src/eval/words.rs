//! Word expansion and assignments.

use cli9_sdk::{Segment, ShellError, Value, ValueStream};
use regex::Regex;
use std::sync::LazyLock;

use super::{run_block, Flow, Unwind};
use crate::ast::{Piece, WordNode, Wrapper, WrapperKind};
use crate::context::Context;

static ASSIGNMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)^(.+?)(\+?=)(.*)$").unwrap());

/// How a value reads inside a word.
#[must_use]
pub fn word_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn select(value: &Value, index: &str) -> Result<Value, ShellError> {
    if index.contains(':') {
        Segment::parse(index)?.get(value)
    } else {
        value.index(index)
    }
}

/// Value of one expansion: a parameter, a substitution or a tilde.
pub(super) async fn expansion(node: &Wrapper, ctx: &mut Context) -> Flow<Value> {
    match &node.kind {
        WrapperKind::Parameter { name, indexes } => {
            let mut value = ctx.variable(name);
            for index in indexes {
                value = select(&value, index).map_err(Unwind::Error)?;
            }
            Ok(value)
        }
        WrapperKind::Substitution(nodes) => {
            let stream = run_block(nodes, ctx).await?;
            Ok(Value::List(
                stream
                    .into_items()
                    .into_iter()
                    .filter(|v| !v.is_error() && !v.is_rich())
                    .collect(),
            ))
        }
        WrapperKind::Tilde(text) => Ok(Value::str(text.clone())),
        _ => Ok(Value::str(node.text.clone())),
    }
}

async fn text(word: &WordNode, ctx: &mut Context) -> Flow<String> {
    let mut out = String::new();
    for piece in &word.pieces {
        match piece {
            Piece::Text(text) => out.push_str(text),
            Piece::Expansion(node) => out.push_str(&word_text(&expansion(node, ctx).await?)),
        }
    }
    Ok(out)
}

/// Expand a word into zero or more arguments.
pub(super) async fn expand(word: &WordNode, ctx: &mut Context) -> Flow<Vec<String>> {
    let text = text(word, ctx).await?;
    if word.split {
        Ok(text.split_whitespace().map(str::to_string).collect())
    } else {
        Ok(vec![text])
    }
}

/// Expand a word into exactly one string.
pub(super) async fn expand_one(word: &WordNode, ctx: &mut Context) -> Flow<String> {
    text(word, ctx).await
}

/// Expand a word keeping value types, as `for` iterates them: a lone
/// expansion yielding a list gives its items and a range gives its values.
pub(super) async fn expand_typed(word: &WordNode, ctx: &mut Context) -> Flow<Vec<Value>> {
    if let Some(node) = word.sole_expansion() {
        if let Value::List(items) = expansion(node, ctx).await? {
            return Ok(items);
        }
    }
    let mut values = Vec::new();
    for arg in expand(word, ctx).await? {
        if Segment::is_range(&arg) {
            values.extend(Segment::parse(&arg).map_err(Unwind::Error)?.values());
        } else {
            values.push(Value::Str(arg));
        }
    }
    Ok(values)
}

/// `name=value` and `name+=value` bind temporaries.
pub(super) async fn assign(word: &WordNode, ctx: &mut Context) -> Flow<()> {
    let text = expand_one(word, ctx).await?;
    let caps = ASSIGNMENT
        .captures(&text)
        .ok_or_else(|| Unwind::Error(ShellError::parsing(format!("Invalid assignment: {text}"))))?;
    let name = caps[1].to_string();
    let value = Value::Str(caps[3].replace("\\n", "\n"));
    let outcome = if &caps[2] == "+=" {
        ctx.edit_variable(&name, value, false)
    } else {
        ctx.set_variable(&name, value, false)
    };
    outcome.map_err(Unwind::Error)
}

/// Input for a command from a redirect target word.
pub(super) async fn stream_text(word: &Wrapper, ctx: &mut Context) -> Flow<String> {
    match &word.kind {
        WrapperKind::Word(node) => expand_one(node, ctx).await,
        _ => word
            .evaluate(ctx, None)
            .await
            .map(|stream: ValueStream| stream.text()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_word_text_of_null_is_empty() {
        assert_eq!(word_text(&Value::Null), "");
        assert_eq!(word_text(&Value::List(vec![Value::Int(1), Value::Int(2)])), "1\n2");
    }

    #[test]
    fn test_assignment_pattern() {
        let caps = ASSIGNMENT.captures("x+=a=b").unwrap();
        assert_eq!((&caps[1], &caps[2], &caps[3]), ("x", "+=", "a=b"));
        let caps = ASSIGNMENT.captures("x=\nline").unwrap();
        assert_eq!(&caps[3], "\nline");
    }

    #[test]
    fn test_select_slices_and_keys() {
        let list = Value::List(vec![Value::Int(1), Value::Int(2), Value::Int(3)]);
        assert_eq!(select(&list, "-1").unwrap(), Value::Int(3));
        assert_eq!(
            select(&list, "0:2").unwrap(),
            Value::List(vec![Value::Int(1), Value::Int(2)])
        );
        assert!(select(&Value::str("ab"), "x").is_err());
    }
}
