use bytes::Bytes;
use std::collections::BTreeMap;
use std::fmt;

use crate::error::ShellError;
use crate::getter::Getter;

/// A named binary payload, e.g. an uploaded file or a rendered image.
#[derive(Debug, Clone, PartialEq)]
pub struct Attachment {
    pub name: String,
    pub data: Bytes,
}

/// One element of a result stream.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Bytes(Bytes),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
    Attachment(Attachment),
    Embed(BTreeMap<String, Value>),
    Error(ShellError),
    Getter(Getter),
}

impl Value {
    #[must_use]
    pub fn str(s: impl Into<String>) -> Self {
        Self::Str(s.into())
    }

    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    #[must_use]
    pub const fn as_error(&self) -> Option<&ShellError> {
        match self {
            Self::Error(err) => Some(err),
            _ => None,
        }
    }

    #[must_use]
    pub const fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }

    /// True for an error, or a list carrying an error one level down.
    #[must_use]
    pub fn is_failure(&self) -> bool {
        match self {
            Self::Error(_) => true,
            Self::List(items) => items.iter().any(Self::is_error),
            _ => false,
        }
    }

    /// Values that are shown as attachments or embeds rather than text.
    #[must_use]
    pub const fn is_rich(&self) -> bool {
        matches!(self, Self::Bytes(_) | Self::Attachment(_) | Self::Embed(_))
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            Self::Bool(b) => Some(i64::from(*b)),
            Self::Str(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Truthiness: empty containers, zero, `false`, null and errors are false.
    #[must_use]
    pub fn is_truthy(&self) -> bool {
        match self {
            Self::Null | Self::Error(_) => false,
            Self::Bool(b) => *b,
            Self::Int(i) => *i != 0,
            Self::Float(f) => *f != 0.0,
            Self::Str(s) => !s.is_empty(),
            Self::Bytes(b) => !b.is_empty(),
            Self::List(items) => !items.is_empty(),
            Self::Map(map) => !map.is_empty(),
            Self::Attachment(_) | Self::Embed(_) | Self::Getter(_) => true,
        }
    }

    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Str(_) => "str",
            Self::Bytes(_) => "bytes",
            Self::List(_) => "list",
            Self::Map(_) => "dict",
            Self::Attachment(_) => "attachment",
            Self::Embed(_) => "embed",
            Self::Error(_) => "error",
            Self::Getter(_) => "getter",
        }
    }

    /// Index a string, list or map with a textual key.
    pub fn index(&self, key: &str) -> Result<Self, ShellError> {
        match self {
            Self::Map(map) | Self::Embed(map) => map
                .get(key)
                .cloned()
                .ok_or_else(|| ShellError::internal(format!("KeyError: {key}"))),
            Self::Str(_) | Self::List(_) | Self::Bytes(_) => {
                let index: i64 = key.trim().parse().map_err(|_| {
                    ShellError::internal(format!(
                        "TypeError: {} indices must be integers, not {key:?}",
                        self.type_name()
                    ))
                })?;
                self.index_int(index)
            }
            other => Err(ShellError::internal(format!(
                "TypeError: '{}' object is not subscriptable",
                other.type_name()
            ))),
        }
    }

    /// Python-style integer index, negative values count from the end.
    pub fn index_int(&self, index: i64) -> Result<Self, ShellError> {
        let out_of_range = || ShellError::internal(format!("IndexError: {} index out of range", self.type_name()));
        match self {
            Self::Str(s) => {
                let chars: Vec<char> = s.chars().collect();
                let at = normalize_index(index, chars.len()).ok_or_else(out_of_range)?;
                Ok(Self::Str(chars[at].to_string()))
            }
            Self::List(items) => {
                let at = normalize_index(index, items.len()).ok_or_else(out_of_range)?;
                Ok(items[at].clone())
            }
            Self::Bytes(bytes) => {
                let at = normalize_index(index, bytes.len()).ok_or_else(out_of_range)?;
                Ok(Self::Int(i64::from(bytes[at])))
            }
            _ => self.index(&index.to_string()),
        }
    }
}

pub(crate) fn normalize_index(index: i64, len: usize) -> Option<usize> {
    let len = i64::try_from(len).ok()?;
    let at = if index < 0 { len + index } else { index };
    if (0..len).contains(&at) {
        usize::try_from(at).ok()
    } else {
        None
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("null"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(x) if x.fract() == 0.0 && x.is_finite() => write!(f, "{x:.1}"),
            Self::Float(x) => write!(f, "{x}"),
            Self::Str(s) => f.write_str(s),
            Self::Bytes(b) => f.write_str(&String::from_utf8_lossy(b)),
            Self::List(items) => {
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str("\n")?;
                    }
                    write!(f, "{item}")?;
                }
                Ok(())
            }
            Self::Map(map) => {
                f.write_str("{")?;
                for (i, (key, value)) in map.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{key:?}: {value}")?;
                }
                f.write_str("}")
            }
            Self::Attachment(a) => f.write_str(&a.name),
            Self::Embed(map) => match map.get("title") {
                Some(title) => write!(f, "<embed {title}>"),
                None => f.write_str("<embed>"),
            },
            Self::Error(err) => write!(f, "{err}"),
            Self::Getter(getter) => write!(f, "{getter}"),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::Str(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<Bytes> for Value {
    fn from(b: Bytes) -> Self {
        Self::Bytes(b)
    }
}

impl From<ShellError> for Value {
    fn from(err: ShellError) -> Self {
        Self::Error(err)
    }
}

impl From<Getter> for Value {
    fn from(getter: Getter) -> Self {
        Self::Getter(getter)
    }
}

impl<T: Into<Self>> From<Vec<T>> for Value {
    fn from(items: Vec<T>) -> Self {
        Self::List(items.into_iter().map(Into::into).collect())
    }
}
