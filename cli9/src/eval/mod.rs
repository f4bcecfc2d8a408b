//! Evaluator for cli9 scripts
//!
//! Every [`Wrapper`] evaluates to a [`ValueStream`]. Errors are values:
//! they are pushed into the stream and the script goes on. Only control
//! flow (`break`, `continue`, `return`) and evaluation failures travel
//! up as an [`Unwind`], carrying whatever output was produced before.

mod command;
mod control;
mod words;

use cli9_sdk::{ShellError, Value, ValueStream};
use std::future::Future;
use std::pin::Pin;
use tracing::warn;

use crate::ast::{Wrapper, WrapperKind};
use crate::context::Context;

pub use command::{execute_path, invoke, parse_alias, run_text};
pub use words::word_text;

/// Non-local exit from an evaluation.
#[derive(Debug, Clone, PartialEq)]
pub enum Unwind {
    Break(ValueStream),
    Continue(ValueStream),
    Return(ValueStream),
    /// A failure outside any command, e.g. a bad index or a missing
    /// redirect target. Becomes a value at the nearest list or pipeline.
    Error(ShellError),
}

impl Unwind {
    /// Put output produced before the unwind in front of its payload.
    #[must_use]
    pub fn prepend(self, partial: ValueStream) -> Self {
        let merge = |mut payload: ValueStream| {
            payload.prepend(partial);
            payload
        };
        match self {
            Self::Break(s) => Self::Break(merge(s)),
            Self::Continue(s) => Self::Continue(merge(s)),
            Self::Return(s) => Self::Return(merge(s)),
            Self::Error(e) => Self::Error(e),
        }
    }
}

impl From<ShellError> for Unwind {
    fn from(error: ShellError) -> Self {
        match error {
            ShellError::Break => Self::Break(ValueStream::new()),
            ShellError::Continue => Self::Continue(ValueStream::new()),
            ShellError::Return(stream) => Self::Return(stream),
            other => Self::Error(other),
        }
    }
}

impl From<Unwind> for ShellError {
    fn from(unwind: Unwind) -> Self {
        match unwind {
            Unwind::Break(_) => Self::Break,
            Unwind::Continue(_) => Self::Continue,
            Unwind::Return(stream) => Self::Return(stream),
            Unwind::Error(error) => error,
        }
    }
}

pub type Flow<T> = Result<T, Unwind>;

/// Boxed future for recursive evaluation.
pub type Eval<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Push an error produced outside any command.
fn push_error(result: &mut ValueStream, error: ShellError) {
    if matches!(error, ShellError::Internal(_)) {
        warn!(error = %error, "internal error during evaluation");
    }
    result.push(Value::Error(error));
}

impl Wrapper {
    pub fn evaluate<'a>(
        &'a self,
        ctx: &'a mut Context,
        stdin: Option<ValueStream>,
    ) -> Eval<'a, Flow<ValueStream>> {
        Box::pin(self.evaluate_inner(ctx, stdin))
    }

    async fn evaluate_inner(
        &self,
        ctx: &mut Context,
        stdin: Option<ValueStream>,
    ) -> Flow<ValueStream> {
        match &self.kind {
            WrapperKind::List(parts) => control::list(parts, ctx).await,
            WrapperKind::Pipeline(parts) => control::pipeline(parts, ctx, stdin).await,
            WrapperKind::Command(parts) => command::command(self, parts, ctx, stdin).await,
            WrapperKind::Compound(parts) => {
                let body: Vec<&Wrapper> = parts.iter().filter(|p| p.reserved_word().is_none()).collect();
                run_sequence(&body, ctx, stdin).await
            }
            WrapperKind::If(parts) => control::if_clause(parts, ctx).await,
            WrapperKind::For(parts) => control::for_clause(parts, ctx).await,
            WrapperKind::Loop(parts) => control::loop_clause(parts, ctx).await,
            WrapperKind::Function(parts) => control::define_function(parts, ctx).await,
            WrapperKind::Expression(expression) => expression.evaluate(ctx).await,
            WrapperKind::Word(word) | WrapperKind::Assignment(word) => Ok(ValueStream::single(
                Value::Str(words::expand_one(word, ctx).await?),
            )),
            WrapperKind::Parameter { .. } | WrapperKind::Tilde(_) | WrapperKind::Substitution(_) => {
                Ok(ValueStream::single(words::expansion(self, ctx).await?))
            }
            WrapperKind::Redirect { .. }
            | WrapperKind::Operator(_)
            | WrapperKind::Pipe
            | WrapperKind::ReservedWord(_) => Ok(ValueStream::new()),
        }
    }
}

/// Evaluate nodes one after another. Failures become values; control
/// flow stops the sequence. The first node receives `stdin`.
pub async fn run_sequence(
    nodes: &[&Wrapper],
    ctx: &mut Context,
    stdin: Option<ValueStream>,
) -> Flow<ValueStream> {
    let mut result = ValueStream::new();
    let mut stdin = stdin;
    for node in nodes {
        match node.evaluate(ctx, stdin.take()).await {
            Ok(stream) => result.extend(stream),
            Err(Unwind::Error(error)) => push_error(&mut result, error),
            Err(signal) => return Err(signal.prepend(result)),
        }
    }
    Ok(result)
}

pub async fn run_block(nodes: &[Wrapper], ctx: &mut Context) -> Flow<ValueStream> {
    let nodes: Vec<&Wrapper> = nodes.iter().collect();
    run_sequence(&nodes, ctx, None).await
}

/// Run a whole script. `return` ends it early with its payload; a stray
/// `break` or `continue` ends it with an ignorable error.
pub async fn run_script(nodes: &[Wrapper], ctx: &mut Context) -> ValueStream {
    match run_block(nodes, ctx).await {
        Ok(stream) | Err(Unwind::Return(stream)) => stream,
        Err(Unwind::Break(mut stream)) => {
            stream.push(Value::Error(ShellError::Break));
            stream
        }
        Err(Unwind::Continue(mut stream)) => {
            stream.push(Value::Error(ShellError::Continue));
            stream
        }
        Err(Unwind::Error(error)) => {
            let mut stream = ValueStream::new();
            push_error(&mut stream, error);
            stream
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keyword_errors_become_signals() {
        assert_eq!(Unwind::from(ShellError::Break), Unwind::Break(ValueStream::new()));
        let payload = ValueStream::single(Value::str("x"));
        assert_eq!(
            Unwind::from(ShellError::Return(payload.clone())),
            Unwind::Return(payload)
        );
        assert_eq!(
            Unwind::from(ShellError::False),
            Unwind::Error(ShellError::False)
        );
    }

    #[test]
    fn test_prepend_keeps_partial_output() {
        let partial = ValueStream::single(Value::str("before"));
        let Unwind::Return(stream) =
            Unwind::Return(ValueStream::single(Value::str("after"))).prepend(partial)
        else {
            panic!("expected return");
        };
        assert_eq!(stream.text(), "before\nafter");
    }
}
