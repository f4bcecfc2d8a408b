use async_trait::async_trait;
use clap::ArgMatches;
use cli9_sdk::{ShellError, ShellResult, ValueStream};

use crate::context::Context;
use crate::registry::Command;

pub struct True;

#[async_trait]
impl Command for True {
    fn name(&self) -> &'static str {
        "true"
    }

    fn description(&self) -> &'static str {
        "Do nothing, successfully."
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

pub struct False;

#[async_trait]
impl Command for False {
    fn name(&self) -> &'static str {
        "false"
    }

    fn description(&self) -> &'static str {
        "Do nothing, unsuccessfully."
    }

    async fn run(
        &self,
        _ctx: &mut Context,
        _args: &ArgMatches,
        _stdin: Option<ValueStream>,
    ) -> ShellResult<ValueStream> {
        Err(ShellError::False)
    }
}

pub struct Null;

#[async_trait]
impl Command for Null {
    fn name(&self) -> &'static str {
        "null"
    }

    fn description(&self) -> &'static str {
        "Swallow the input; fail when there is none."
    }

    async fn run(
        &self,
        _ctx: &mut Context,
        _args: &ArgMatches,
        stdin: Option<ValueStream>,
    ) -> ShellResult<ValueStream> {
        match stdin {
            Some(input) if !input.is_empty() => Ok(ValueStream::new()),
            _ => Err(ShellError::Null),
        }
    }
}

pub struct Rand;

#[async_trait]
impl Command for Rand {
    fn name(&self) -> &'static str {
        "rand"
    }

    fn description(&self) -> &'static str {
        "Succeed or fail at random."
    }

    async fn run(
        &self,
        _ctx: &mut Context,
        _args: &ArgMatches,
        _stdin: Option<ValueStream>,
    ) -> ShellResult<ValueStream> {
        if rand::random::<bool>() {
            Ok(ValueStream::new())
        } else {
            Err(ShellError::False)
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::builtins::tests::{context, run};
    use cli9_sdk::ShellError;

    #[tokio::test]
    async fn test_true_and_false() {
        let mut ctx = context().await;
        assert!(run(&mut ctx, "true").await.is_empty());
        let out = run(&mut ctx, "false").await;
        assert_eq!(out.errors().next(), Some(&ShellError::False));
    }

    #[tokio::test]
    async fn test_null_needs_input() {
        let mut ctx = context().await;
        assert!(run(&mut ctx, "echo x | null").await.is_empty());
        let out = run(&mut ctx, "null").await;
        assert_eq!(out.errors().next(), Some(&ShellError::Null));
    }

    #[tokio::test]
    async fn test_rand_settles_either_way() {
        let mut ctx = context().await;
        let out = run(&mut ctx, "rand").await;
        assert!(out.is_empty() || out.errors().next() == Some(&ShellError::False));
    }
}
