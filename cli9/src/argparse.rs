//! Argument parsing for registered commands.
//!
//! Commands declare their arguments on a [`clap::Command`]. Parse failures
//! turn into [`ShellError::Argparse`] so they travel as values like every
//! other command error.

use clap::error::{ContextKind, ContextValue, ErrorKind};
use clap::{Arg, ArgAction, ArgMatches, ColorChoice};
use cli9_sdk::{ShellError, ShellResult, ValueStream};

use crate::registry::Command;

/// Outcome of parsing a command line.
#[derive(Debug)]
pub enum Parsed {
    Matches(ArgMatches),
    /// `-h`/`--help` was given; the rendered help text.
    Help(String),
}

/// The parser a command's arguments are declared on.
#[must_use]
pub fn parser(command: &dyn Command) -> clap::Command {
    let mut parser = clap::Command::new(command.name())
        .no_binary_name(true)
        .disable_help_flag(true)
        .disable_version_flag(true)
        .color(ColorChoice::Never)
        .about(command.description())
        .arg(
            Arg::new("help")
                .short('h')
                .long("help")
                .action(ArgAction::SetTrue)
                .help("Show this help"),
        );
    if let Some(usage) = command.usage() {
        parser = parser.override_usage(usage);
    }
    if let Some(epilog) = command.epilog() {
        parser = parser.after_help(epilog);
    }
    command.arguments(parser)
}

fn asks_help(args: &[String]) -> bool {
    args.iter().any(|arg| arg == "-h" || arg == "--help")
}

fn convert(command: &str, error: &clap::Error) -> ShellError {
    if error.kind() == ErrorKind::MissingRequiredArgument {
        let name = match error.get(ContextKind::InvalidArg) {
            Some(ContextValue::Strings(names)) => names.first().cloned(),
            Some(ContextValue::String(name)) => Some(name.clone()),
            _ => None,
        };
        if let Some(name) = name {
            return ShellError::missing_argument(command, name);
        }
    }
    let rendered = error.render().to_string();
    let line = rendered.lines().next().unwrap_or_default();
    ShellError::argparse(command, line.trim_start_matches("error: ").trim())
}

/// Parse `args` for `command`.
pub fn parse(command: &dyn Command, args: &[String]) -> ShellResult<Parsed> {
    let mut parser = parser(command);
    match parser.try_get_matches_from_mut(args) {
        Ok(matches) if flag(&matches, "help") => {
            Ok(Parsed::Help(parser.render_help().to_string()))
        }
        Ok(matches) => Ok(Parsed::Matches(matches)),
        Err(_) if asks_help(args) => Ok(Parsed::Help(parser.render_help().to_string())),
        Err(error) => Err(convert(command.name(), &error)),
    }
}

/// Positional argument.
#[must_use]
pub fn positional(id: &'static str) -> Arg {
    Arg::new(id).action(ArgAction::Set).allow_negative_numbers(true)
}

/// Every remaining word, dashes included.
#[must_use]
pub fn rest(id: &'static str) -> Arg {
    Arg::new(id)
        .action(ArgAction::Append)
        .num_args(0..)
        .trailing_var_arg(true)
        .allow_hyphen_values(true)
}

/// Boolean switch.
#[must_use]
pub fn switch(id: &'static str, short: char, help: &'static str) -> Arg {
    Arg::new(id).short(short).action(ArgAction::SetTrue).help(help)
}

#[must_use]
pub fn flag(matches: &ArgMatches, id: &str) -> bool {
    matches
        .try_get_one::<bool>(id)
        .ok()
        .flatten()
        .copied()
        .unwrap_or(false)
}

#[must_use]
pub fn one(matches: &ArgMatches, id: &str) -> Option<String> {
    matches.try_get_one::<String>(id).ok().flatten().cloned()
}

#[must_use]
pub fn many(matches: &ArgMatches, id: &str) -> Vec<String> {
    matches
        .try_get_many::<String>(id)
        .ok()
        .flatten()
        .map(|values| values.cloned().collect())
        .unwrap_or_default()
}

pub fn required(matches: &ArgMatches, command: &str, id: &str) -> ShellResult<String> {
    one(matches, id).ok_or_else(|| ShellError::missing_argument(command, id))
}

/// Integer argument; a value that is not a number is an argument error.
pub fn int(matches: &ArgMatches, command: &str, id: &str) -> ShellResult<Option<i64>> {
    one(matches, id)
        .map(|text| {
            text.trim()
                .parse::<i64>()
                .map_err(|_| ShellError::argparse(command, format!("{id}: invalid int value: '{text}'")))
        })
        .transpose()
}

pub fn required_stdin(command: &str, stdin: Option<ValueStream>) -> ShellResult<ValueStream> {
    stdin.ok_or_else(|| ShellError::missing_stdin(command))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Context;
    use async_trait::async_trait;

    struct Greet;

    #[async_trait]
    impl Command for Greet {
        fn name(&self) -> &'static str {
            "greet"
        }

        fn description(&self) -> &'static str {
            "greet someone"
        }

        fn arguments(&self, parser: clap::Command) -> clap::Command {
            parser
                .arg(switch("loud", 'l', "shout"))
                .arg(positional("name").required(true))
                .arg(rest("extra"))
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

    fn args(words: &[&str]) -> Vec<String> {
        words.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn test_parse_flags_and_rest() {
        let Parsed::Matches(matches) = parse(&Greet, &args(&["-l", "bob", "a", "-b"])).unwrap()
        else {
            panic!("expected matches");
        };
        assert!(flag(&matches, "loud"));
        assert_eq!(one(&matches, "name").as_deref(), Some("bob"));
        assert_eq!(many(&matches, "extra"), vec!["a", "-b"]);
    }

    #[test]
    fn test_help_wins_over_missing_argument() {
        let Parsed::Help(text) = parse(&Greet, &args(&["--help"])).unwrap() else {
            panic!("expected help");
        };
        assert!(text.contains("greet someone"));
    }

    #[test]
    fn test_missing_argument() {
        let err = parse(&Greet, &[]).unwrap_err();
        assert!(matches!(err, ShellError::MissingRequiredArgument { .. }));
    }

    #[test]
    fn test_unknown_flag_is_argparse_error() {
        let err = parse(&Greet, &args(&["--nope", "bob"])).unwrap_err();
        assert!(matches!(err, ShellError::Argparse { .. }));
    }
}
