//! The `[ ... ]` expression language.
//!
//! An expression either tests its value (a falsy value is a
//! [`ShellError::False`]), returns it (`[ return ... ]`) or returns its
//! own text unevaluated (`[ expr ... ]`).

mod convert;
mod env;
mod ops;
mod parser;

use chumsky::Parser;
use cli9_sdk::{ShellError, ShellResult, Value, ValueStream};

use crate::context::Context;
use crate::eval::{Flow, Unwind};

pub use convert::type_of;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Output {
    Test,
    Value,
    Text,
}

#[derive(Debug, Clone)]
pub struct Expression {
    output: Output,
    source: String,
    ast: Option<parser::Expr>,
}

/// `text` without the leading `word`, which must end at whitespace.
fn prefix<'a>(text: &'a str, word: &str) -> Option<&'a str> {
    text.strip_prefix(word)
        .filter(|rest| rest.is_empty() || rest.starts_with(char::is_whitespace))
        .map(str::trim_start)
}

fn unescape(text: &str) -> String {
    ["(", ")", "<", ">", "|", "&", ";"]
        .iter()
        .fold(text.to_string(), |text, c| text.replace(&format!("\\{c}"), c))
}

impl Expression {
    /// Parse the text between `[` and `]`.
    pub fn parse(text: &str) -> ShellResult<Self> {
        let mut text = text.trim();
        let mut output = Output::Test;
        if let Some(rest) = prefix(text, "return") {
            output = Output::Value;
            text = rest;
        } else if let Some(rest) = prefix(text, "expr") {
            output = Output::Text;
            text = rest;
        }
        if let Some(rest) = prefix(text, "from") {
            text = rest
                .strip_prefix('\'')
                .and_then(|inner| inner.strip_suffix('\''))
                .ok_or_else(|| {
                    ShellError::parsing(format!(
                        "From-expression <{rest}> has no opening or closing single 'quotation marks'."
                    ))
                })?
                .trim();
        }
        let source = unescape(text);
        let ast = match output {
            Output::Text => None,
            Output::Test | Output::Value => {
                let ast = parser::parser().parse(source.as_str()).map_err(|errors| {
                    let reason = errors
                        .first()
                        .map_or_else(|| "unexpected input".to_string(), ToString::to_string);
                    ShellError::parsing(format!("Invalid expression <{source}>: {reason}"))
                })?;
                Some(ast)
            }
        };
        Ok(Self {
            output,
            source,
            ast,
        })
    }

    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }

    pub async fn evaluate(&self, ctx: &mut Context) -> Flow<ValueStream> {
        let Some(ast) = &self.ast else {
            return Ok(ValueStream::single(Value::Str(self.source.clone())));
        };
        let value = env::evaluate(ast, ctx).await.map_err(Unwind::from)?;
        match (self.output, value) {
            (Output::Value, value) => Ok(ValueStream::single(value)),
            (_, Value::Error(error)) => Err(Unwind::Error(error)),
            (_, value) if !value.is_truthy() => Err(Unwind::Error(ShellError::False)),
            _ => Ok(ValueStream::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scope::ScopeKey;
    use crate::shell::Shell;
    use cli9_sdk::Caller;

    async fn context() -> Context {
        let shell = Shell::builder().build().await.unwrap();
        let caller = Caller::user(111_111_111_111_111_111);
        let scope = shell.scope(ScopeKey::of(&caller));
        Context::new(shell, caller, scope, None)
    }

    async fn run(text: &str, ctx: &mut Context) -> Flow<ValueStream> {
        Expression::parse(text).unwrap().evaluate(ctx).await
    }

    #[test]
    fn test_prefixes() {
        assert_eq!(Expression::parse("return 1").unwrap().output, Output::Value);
        assert_eq!(Expression::parse("returned").unwrap().output, Output::Test);
        let text = Expression::parse("expr a ( b").unwrap();
        assert_eq!(text.output, Output::Text);
        assert_eq!(text.source(), "a ( b");
        assert_eq!(Expression::parse("from ' 1 < 2 '").unwrap().source(), "1 < 2");
        assert!(matches!(
            Expression::parse("from 1 < 2"),
            Err(ShellError::Parsing(_))
        ));
        assert_eq!(Expression::parse(r"\(1 \< 2\)").unwrap().source(), "(1 < 2)");
    }

    #[tokio::test]
    async fn test_truth_and_values() {
        let mut ctx = context().await;
        assert_eq!(run("1 < 2", &mut ctx).await.unwrap(), ValueStream::new());
        assert_eq!(
            run("1 > 2", &mut ctx).await.unwrap_err(),
            Unwind::Error(ShellError::False)
        );
        assert_eq!(run("return 7 // 2", &mut ctx).await.unwrap().text(), "3");
        assert_eq!(run("expr 1 +", &mut ctx).await.unwrap().text(), "1 +");
    }

    #[tokio::test]
    async fn test_names_resolve_to_variables_and_converters() {
        let mut ctx = context().await;
        ctx.set_variable("n", Value::str("41"), false).unwrap();
        assert_eq!(run("return int(n) + 1", &mut ctx).await.unwrap().text(), "42");
        assert_eq!(run("return $n == 41", &mut ctx).await.unwrap().text(), "true");
        assert_eq!(run("return type('<#123456789012345678>')", &mut ctx).await.unwrap().text(), "channel");
        assert_eq!(run("return unknown", &mut ctx).await.unwrap().text(), "unknown");
    }

    #[tokio::test]
    async fn test_commands_and_files() {
        let mut ctx = context().await;
        ctx.set_directory(ctx.vfs().root());
        assert_eq!(run("return echo('a b')", &mut ctx).await.unwrap().text(), "a b");
        assert_eq!(run("return exec('echo x | echo y')", &mut ctx).await.unwrap().text(), "y");
        assert!(run("file('/bin')", &mut ctx).await.is_ok());
        assert_eq!(
            run("file('/nope')", &mut ctx).await.unwrap_err(),
            Unwind::Error(ShellError::False)
        );
        assert_eq!(run("return file('/bin').kind", &mut ctx).await.unwrap().text(), "generator");
        assert!(run("file('/bin', 'file-like')", &mut ctx).await.is_err());
        assert_eq!(
            run("return file('/scripts/.clirc').content", &mut ctx).await.unwrap().text(),
            "alias ll='ls -l'\n"
        );
    }
}
