use async_trait::async_trait;
use clap::{Arg, ArgMatches};
use cli9_sdk::{ShellError, ShellResult, ValueStream};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use super::{lines, text, Registration};
use crate::argparse::{flag, int, many, one, positional, required, rest, switch};
use crate::context::Context;
use crate::eval::{run_text, Unwind};
use crate::registry::Command;

/// `1.5`, `30s`, `2m`, `1h`, `1d` or `250ms`.
fn parse_duration(text: &str) -> Option<Duration> {
    let text = text.trim();
    let (number, scale) = if let Some(n) = text.strip_suffix("ms") {
        (n, 0.001)
    } else if let Some(n) = text.strip_suffix('s') {
        (n, 1.0)
    } else if let Some(n) = text.strip_suffix('m') {
        (n, 60.0)
    } else if let Some(n) = text.strip_suffix('h') {
        (n, 3600.0)
    } else if let Some(n) = text.strip_suffix('d') {
        (n, 86400.0)
    } else {
        (text, 1.0)
    };
    let secs: f64 = number.parse().ok()?;
    Duration::try_from_secs_f64(secs * scale).ok()
}

fn total_duration(command: &str, times: &[String]) -> ShellResult<Duration> {
    times.iter().try_fold(Duration::ZERO, |total, time| {
        parse_duration(time)
            .map(|d| total.saturating_add(d))
            .ok_or_else(|| ShellError::argparse(command, format!("invalid time value: '{time}'")))
    })
}

pub struct Ps;

#[async_trait]
impl Command for Ps {
    fn name(&self) -> &'static str {
        "ps"
    }

    fn description(&self) -> &'static str {
        "List the running processes of this scope."
    }

    async fn run(
        &self,
        ctx: &mut Context,
        _args: &ArgMatches,
        _stdin: Option<ValueStream>,
    ) -> ShellResult<ValueStream> {
        let processes = ctx.scope().processes().list();
        Ok(lines(processes.iter().map(|p| format!("{}: {}", p.pid, p.label))))
    }
}

pub struct Kill;

#[async_trait]
impl Command for Kill {
    fn name(&self) -> &'static str {
        "kill"
    }

    fn description(&self) -> &'static str {
        "Cancel a process by its id."
    }

    fn arguments(&self, parser: clap::Command) -> clap::Command {
        parser.arg(positional("pid").required(true))
    }

    async fn run(
        &self,
        ctx: &mut Context,
        args: &ArgMatches,
        _stdin: Option<ValueStream>,
    ) -> ShellResult<ValueStream> {
        let pid = int(args, self.name(), "pid")?.unwrap_or_default();
        let pid = u64::try_from(pid).map_err(|_| ShellError::NoProcessFound(0))?;
        let killed = ctx.scope().processes().kill(pid)?;
        Ok(text(format!("Process killed: [{}] {}", killed.pid, killed.label)))
    }
}

pub struct Sleep;

#[async_trait]
impl Command for Sleep {
    fn name(&self) -> &'static str {
        "sleep"
    }

    fn description(&self) -> &'static str {
        "Wait for the sum of the given times."
    }

    fn epilog(&self) -> Option<&'static str> {
        Some("Times are seconds, optionally suffixed with ms, s, m, h or d.")
    }

    fn arguments(&self, parser: clap::Command) -> clap::Command {
        parser.arg(
            Arg::new("time")
                .num_args(1..)
                .action(clap::ArgAction::Append)
                .required(true),
        )
    }

    async fn run(
        &self,
        ctx: &mut Context,
        args: &ArgMatches,
        _stdin: Option<ValueStream>,
    ) -> ShellResult<ValueStream> {
        let times = many(args, "time");
        let duration = total_duration(self.name(), &times)?;
        let scope = ctx.scope();
        let pid = scope.processes().append_event(&format!("sleep {}", times.join(" ")));
        let mut registration = Registration::new(scope, pid);
        let timer = tokio::spawn(tokio::time::sleep(duration));
        registration.attach(timer.abort_handle());
        match timer.await {
            Ok(()) => Ok(ValueStream::new()),
            Err(error) if error.is_cancelled() => {
                debug!(pid, "sleep killed");
                Ok(ValueStream::new())
            }
            Err(error) => Err(ShellError::internal(error.to_string())),
        }
    }
}

pub struct Schedule;

#[async_trait]
impl Command for Schedule {
    fn name(&self) -> &'static str {
        "schedule"
    }

    fn description(&self) -> &'static str {
        "Run code after a delay, in the background."
    }

    fn epilog(&self) -> Option<&'static str> {
        Some("Scheduled code survives `state -r`; only `kill` cancels it.")
    }

    fn arguments(&self, parser: clap::Command) -> clap::Command {
        parser
            .arg(positional("time").required(true))
            .arg(Arg::new("code").short('c').long("code").help("Code to run"))
            .arg(switch("wait", 'w', "Wait for the code and return its output"))
            .arg(rest("command"))
    }

    async fn run(
        &self,
        ctx: &mut Context,
        args: &ArgMatches,
        stdin: Option<ValueStream>,
    ) -> ShellResult<ValueStream> {
        let delay = total_duration(self.name(), &[required(args, self.name(), "time")?])?;
        let command = many(args, "command");
        let code = match (one(args, "code"), stdin) {
            (Some(code), _) => code,
            (None, _) if !command.is_empty() => command.join(" "),
            (None, Some(input)) => input.text(),
            (None, None) => return Err(ShellError::missing_argument(self.name(), "command")),
        };

        let scope = Arc::clone(ctx.scope());
        let pid = scope.processes().add_schedule(&code);
        let mut job = ctx.fork("schedule");
        job.pid = Some(pid);
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let result = match run_text(&mut job, &code, None).await {
                Ok(stream) | Err(Unwind::Return(stream)) => stream,
                Err(other) => ValueStream::from(ShellError::from(other)),
            };
            info!(pid, output = %result.render(), "scheduled job finished");
            job.scope().processes().remove(pid);
            result
        });
        scope.processes().attach(pid, task.abort_handle());

        if !flag(args, "wait") {
            return Ok(ValueStream::new());
        }
        match task.await {
            Ok(result) => Ok(result),
            Err(error) if error.is_cancelled() => Ok(ValueStream::new()),
            Err(error) => {
                scope.processes().remove(pid);
                Err(ShellError::internal(error.to_string()))
            }
        }
    }
}

pub struct State;

#[async_trait]
impl Command for State {
    fn name(&self) -> &'static str {
        "state"
    }

    fn description(&self) -> &'static str {
        "Show, clear or reset the state of this scope."
    }

    fn arguments(&self, parser: clap::Command) -> clap::Command {
        parser
            .arg(switch("clear", 'c', "Forget variables, functions and aliases"))
            .arg(switch("reset", 'r', "Kill every process except scheduled ones"))
    }

    async fn run(
        &self,
        ctx: &mut Context,
        args: &ArgMatches,
        _stdin: Option<ValueStream>,
    ) -> ShellResult<ValueStream> {
        let mut report = Vec::new();
        if flag(args, "clear") {
            ctx.scope().clear();
            ctx.clear_temporaries();
            report.push("State cleared".to_string());
        }
        if flag(args, "reset") {
            let killed = ctx.scope().processes().reset(ctx.pid);
            info!(scope = ?ctx.scope().key(), killed = killed.len(), "scope reset");
            report.push(format!("Processes killed: {}", killed.len()));
        }
        if report.is_empty() {
            let scope = ctx.scope();
            report.push(format!(
                "{}: {} variables, {} aliases, {} processes",
                scope.key().kind().as_str(),
                scope.variables().len(),
                scope.aliases().len(),
                scope.processes().len()
            ));
        }
        Ok(lines(report))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builtins::tests::{context, run};
    use cli9_sdk::{Caller, Value};

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("2"), Some(Duration::from_secs(2)));
        assert_eq!(parse_duration("1.5s"), Some(Duration::from_millis(1500)));
        assert_eq!(parse_duration("2m"), Some(Duration::from_secs(120)));
        assert_eq!(parse_duration("250ms"), Some(Duration::from_millis(250)));
        assert_eq!(parse_duration("-1"), None);
        assert_eq!(parse_duration("soon"), None);
    }

    #[tokio::test]
    async fn test_sleep_registers_and_unregisters() {
        let mut ctx = context().await;
        let scope = Arc::clone(ctx.scope());
        let out = run(&mut ctx, "sleep 10ms 10ms").await;
        assert!(out.is_empty());
        assert!(scope.processes().is_empty());
        let bad = run(&mut ctx, "sleep later").await;
        assert!(matches!(bad.errors().next(), Some(ShellError::Argparse { .. })));
    }

    #[tokio::test]
    async fn test_kill_running_invocation() {
        let ctx = context().await;
        let shell = Arc::clone(ctx.shell());
        let caller = Caller::user(222_222_222_222_222_222);
        let sleeper = shell.spawn(caller.clone(), "sleep 30");
        tokio::time::sleep(Duration::from_millis(50)).await;

        let listing = shell.execute(caller.clone(), "ps").await.text();
        assert!(listing.contains(&format!("{}: sleep 30", sleeper.pid)));

        let out = shell.execute(caller.clone(), &format!("kill {}", sleeper.pid)).await;
        assert_eq!(out.text(), format!("Process killed: [{}] sleep 30", sleeper.pid));
        assert!(sleeper.wait().await.is_empty());

        let missing = shell.execute(caller, "kill 9999").await;
        assert_eq!(missing.errors().next(), Some(&ShellError::NoProcessFound(9999)));
    }

    #[tokio::test]
    async fn test_schedule_runs_in_background() {
        let mut ctx = context().await;
        let scope = Arc::clone(ctx.scope());
        assert!(run(&mut ctx, "schedule 20ms -c 'export later=yes'").await.is_empty());
        assert_eq!(scope.processes().list().len(), 1);
        assert!(scope.variable("later").is_none());
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(scope.variable("later"), Some(Value::str("yes")));
        assert!(scope.processes().is_empty());

        assert_eq!(run(&mut ctx, "schedule -w 0 echo now").await.text(), "now");
    }

    #[tokio::test]
    async fn test_reset_spares_schedules() {
        let mut ctx = context().await;
        let scope = Arc::clone(ctx.scope());
        run(&mut ctx, "schedule 1h echo never").await;
        scope.processes().append_event("stuck");
        let out = run(&mut ctx, "state -r").await;
        assert_eq!(out.text(), "Processes killed: 1");
        assert_eq!(scope.processes().len(), 1);
    }

    #[tokio::test]
    async fn test_state_clear() {
        let mut ctx = context().await;
        run(&mut ctx, "export a=1; alias x='echo x'").await;
        assert_eq!(run(&mut ctx, "state").await.text(), "user: 1 variables, 1 aliases, 0 processes");
        run(&mut ctx, "state -c").await;
        assert!(ctx.scope().variable("a").is_none());
        assert!(ctx.scope().aliases().is_empty());
    }
}
