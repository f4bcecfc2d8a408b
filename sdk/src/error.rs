use thiserror::Error;

use crate::stream::ValueStream;

/// Every failure the interpreter and the VFS can report.
///
/// Errors are ordinary values: evaluators push them into the result stream
/// and only the top-level driver decides how they are shown. `Display` is
/// the bare message; [`ShellError::render`] adds the "Error occured ..."
/// header used for user-facing output.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ShellError {
    #[error("No command passed")]
    NoCommand,

    #[error("False")]
    False,

    #[error("Null")]
    Null,

    #[error("break")]
    Break,

    #[error("continue")]
    Continue,

    #[error("return")]
    Return(ValueStream),

    #[error("No such file or directory: {0}")]
    NoFileFound(String),

    #[error("File already exists: {0}")]
    FileExists(String),

    #[error("Permission '{action}' denied: {file} [{mode}]")]
    PermissionDenied {
        action: String,
        file: String,
        mode: String,
    },

    #[error("Directory is not empty: {0}")]
    NonEmptyDirectory(String),

    #[error("Not a directory: {0}")]
    NotADirectory(String),

    #[error("Not a regular file: {0}")]
    NotAFile(String),

    #[error("Not an executable file: {0}")]
    NotAnExecutable(String),

    #[error("Max file size exceeded: {size} (out of {limit})")]
    FileSize { size: String, limit: String },

    #[error("{0}")]
    Parsing(String),

    #[error("{message}")]
    Argparse { command: String, message: String },

    #[error("Command not found: {0}")]
    UnknownCommand(String),

    #[error("Command unavailable: {0}")]
    UnavailableCommand(String),

    #[error("Missing '{group}' group that is required to execute command.")]
    CommandPermission { command: String, group: String },

    #[error("Positional argument missing: {name}")]
    MissingRequiredArgument { command: String, name: String },

    #[error("Required flag missing: {name}")]
    MissingRequiredOption { command: String, name: String },

    #[error("Stdin missing")]
    MissingRequiredStdin { command: String },

    #[error("Unknown variable: {0}")]
    UndefinedVariable(String),

    #[error("Reserved variable: {0}")]
    ReservedVariable(String),

    #[error("{0}")]
    Shell(String),

    #[error("Limitation exceeded: {limit} ({description})")]
    LimitExceeded { limit: String, description: String },

    #[error("{message}")]
    Command { command: String, message: String },

    #[error("Cannot convert value into {kind}")]
    Conversion { command: String, kind: String },

    #[error("{0}")]
    Internal(String),

    #[error("Process not found: {0}")]
    NoProcessFound(u64),
}

impl ShellError {
    /// Errors that never reach the end user: empty input, boolean results and
    /// the loop/function control keywords.
    #[must_use]
    pub const fn is_ignorable(&self) -> bool {
        matches!(
            self,
            Self::NoCommand | Self::False | Self::Null | Self::Break | Self::Continue | Self::Return(_)
        )
    }

    #[must_use]
    pub const fn is_keyword(&self) -> bool {
        matches!(self, Self::Break | Self::Continue | Self::Return(_))
    }

    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        !self.is_ignorable()
    }

    #[must_use]
    pub const fn is_filesystem(&self) -> bool {
        matches!(
            self,
            Self::NoFileFound(_)
                | Self::FileExists(_)
                | Self::PermissionDenied { .. }
                | Self::NonEmptyDirectory(_)
                | Self::NotADirectory(_)
                | Self::NotAFile(_)
                | Self::NotAnExecutable(_)
                | Self::FileSize { .. }
        )
    }

    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NoFileFound(_))
    }

    #[must_use]
    pub const fn is_permission_denied(&self) -> bool {
        matches!(self, Self::PermissionDenied { .. })
    }

    /// Where the error happened, as `(when, what)`; `None` renders the bare
    /// message.
    #[must_use]
    pub fn point(&self) -> Option<(&'static str, String)> {
        let point = match self {
            Self::False | Self::Null | Self::Break | Self::Continue | Self::Return(_) => {
                return None;
            }
            Self::NoCommand | Self::Parsing(_) => ("while", "parsing".to_string()),
            _ if self.is_filesystem() => ("while", "working with filesystem".to_string()),
            Self::Argparse { command, .. } | Self::CommandPermission { command, .. } => {
                ("before", format!("'{command}' was executed"))
            }
            Self::MissingRequiredArgument { command, .. }
            | Self::MissingRequiredOption { command, .. }
            | Self::MissingRequiredStdin { command } => {
                ("before", format!("executing command '{command}'"))
            }
            Self::Shell(_) => ("during", "shell execution".to_string()),
            Self::LimitExceeded { .. } => ("during", "command execution".to_string()),
            Self::Command { command, .. } | Self::Conversion { command, .. } => {
                ("during", format!("'{command}' execution"))
            }
            Self::NoProcessFound(_) => ("while", "working with processes".to_string()),
            _ => ("during", "execution".to_string()),
        };
        Some(point)
    }

    /// User-facing text: a header naming where it happened, then the message
    /// indented by two spaces per line.
    #[must_use]
    pub fn render(&self) -> String {
        let message = self.to_string();
        let Some((kind, point)) = self.point() else {
            return message;
        };
        let body = message
            .trim()
            .lines()
            .map(|line| format!("  {line}"))
            .collect::<Vec<_>>()
            .join("\n");
        format!("Error occured {kind} {point}:\n{body}")
    }

    #[must_use]
    pub fn no_file_found(name: impl Into<String>) -> Self {
        Self::NoFileFound(name.into())
    }

    #[must_use]
    pub fn file_exists(name: impl Into<String>) -> Self {
        Self::FileExists(name.into())
    }

    #[must_use]
    pub fn permission_denied(
        action: impl Into<String>,
        file: impl Into<String>,
        mode: impl Into<String>,
    ) -> Self {
        Self::PermissionDenied {
            action: action.into(),
            file: file.into(),
            mode: mode.into(),
        }
    }

    #[must_use]
    pub fn non_empty_directory(name: impl Into<String>) -> Self {
        Self::NonEmptyDirectory(name.into())
    }

    #[must_use]
    pub fn not_a_directory(name: impl Into<String>) -> Self {
        Self::NotADirectory(name.into())
    }

    #[must_use]
    pub fn not_a_file(name: impl Into<String>) -> Self {
        Self::NotAFile(name.into())
    }

    #[must_use]
    pub fn not_an_executable(name: impl Into<String>) -> Self {
        Self::NotAnExecutable(name.into())
    }

    /// `size` and `limit` are byte counts, rendered human-readable.
    #[must_use]
    pub fn file_size(size: usize, limit: usize) -> Self {
        Self::FileSize {
            size: human_bytes(size),
            limit: human_bytes(limit),
        }
    }

    #[must_use]
    pub fn parsing(message: impl Into<String>) -> Self {
        Self::Parsing(message.into())
    }

    #[must_use]
    pub fn argparse(command: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Argparse {
            command: command.into(),
            message: message.into(),
        }
    }

    #[must_use]
    pub fn unknown_command(name: impl Into<String>) -> Self {
        Self::UnknownCommand(name.into())
    }

    #[must_use]
    pub fn command_permission(command: impl Into<String>, group: impl Into<String>) -> Self {
        Self::CommandPermission {
            command: command.into(),
            group: group.into(),
        }
    }

    #[must_use]
    pub fn missing_argument(command: impl Into<String>, name: impl Into<String>) -> Self {
        Self::MissingRequiredArgument {
            command: command.into(),
            name: name.into(),
        }
    }

    #[must_use]
    pub fn missing_option(command: impl Into<String>, name: impl Into<String>) -> Self {
        Self::MissingRequiredOption {
            command: command.into(),
            name: name.into(),
        }
    }

    #[must_use]
    pub fn missing_stdin(command: impl Into<String>) -> Self {
        Self::MissingRequiredStdin {
            command: command.into(),
        }
    }

    #[must_use]
    pub fn undefined_variable(name: impl Into<String>) -> Self {
        Self::UndefinedVariable(name.into())
    }

    #[must_use]
    pub fn reserved_variable(name: impl Into<String>) -> Self {
        Self::ReservedVariable(name.into())
    }

    #[must_use]
    pub fn shell(message: impl Into<String>) -> Self {
        Self::Shell(message.into())
    }

    #[must_use]
    pub fn limit_exceeded(limit: impl ToString, description: impl Into<String>) -> Self {
        Self::LimitExceeded {
            limit: limit.to_string(),
            description: description.into(),
        }
    }

    #[must_use]
    pub fn command(command: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Command {
            command: command.into(),
            message: message.into(),
        }
    }

    #[must_use]
    pub fn conversion(command: impl Into<String>, kind: impl Into<String>) -> Self {
        Self::Conversion {
            command: command.into(),
            kind: kind.into(),
        }
    }

    #[must_use]
    pub fn internal(reason: impl Into<String>) -> Self {
        Self::Internal(reason.into())
    }
}

impl From<std::io::Error> for ShellError {
    fn from(err: std::io::Error) -> Self {
        Self::Internal(format!("IOError: {err}"))
    }
}

pub type ShellResult<T> = Result<T, ShellError>;

/// `1536` -> `1.5KB`, `8388608` -> `8.0MB`.
#[must_use]
pub fn human_bytes(units: usize) -> String {
    const NAMES: [&str; 7] = ["B", "KB", "MB", "GB", "TB", "PB", "EB"];
    if units == 0 {
        return "0.0B".to_string();
    }
    #[allow(clippy::cast_precision_loss)]
    let mut value = units as f64;
    let mut index = 0;
    while value >= 1024.0 && index < NAMES.len() - 1 {
        value /= 1024.0;
        index += 1;
    }
    let rounded = (value * 100.0).round() / 100.0;
    let mut text = format!("{rounded}");
    if !text.contains('.') {
        text.push_str(".0");
    }
    format!("{text}{}", NAMES[index])
}
