//! Shared vocabulary of the cli9 shell and its virtual filesystem.
//!
//! Commands exchange [`ValueStream`]s of [`Value`]s. Failures are
//! [`ShellError`]s, which travel through those streams like any other value.
//! Every filesystem node carries a [`Mode`] checked against the [`Caller`]'s
//! [`Principal`].

mod error;
mod getter;
mod identity;
mod mode;
mod stream;
mod value;

pub use error::{human_bytes, ShellError, ShellResult};
pub use getter::{record, Getter, Matcher, Pointer, Segment};
pub use identity::{Caller, Ident, Principal, ScopeKind};
pub use mode::{Action, Mode, Perm};
pub use stream::{Data, ValueStream};
pub use value::{Attachment, Value};
