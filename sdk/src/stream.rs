use bytes::{Bytes, BytesMut};

use crate::error::ShellError;
use crate::getter::Getter;
use crate::value::{Attachment, Value};

/// Ordered, heterogeneous stream of values: the shell's standard output.
///
/// Pushing a list or another stream flattens exactly one level. The most
/// recently pushed top-level item is remembered as [`ValueStream::last`]
/// (a pushed stream is remembered as a list of its items) so that `&&` and
/// `||` can look at what the previous element produced.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValueStream {
    items: Vec<Value>,
    last: Option<Box<Value>>,
}

/// Payload written to a redirect target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Data {
    Text(String),
    Bytes(Bytes),
}

impl ValueStream {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            items: Vec::new(),
            last: None,
        }
    }

    #[must_use]
    pub fn single(value: impl Into<Value>) -> Self {
        let mut stream = Self::new();
        stream.push(value.into());
        stream
    }

    /// Append one value; lists are flattened one level and nulls skipped.
    pub fn push(&mut self, value: Value) {
        match value {
            Value::Null => return,
            Value::List(ref items) => {
                self.items
                    .extend(items.iter().filter(|v| !v.is_null()).cloned());
            }
            ref other => self.items.push(other.clone()),
        }
        self.last = Some(Box::new(value));
    }

    /// Append every item of `other`, remembering it as a whole as `last`.
    pub fn extend(&mut self, other: Self) {
        let items = other.items;
        self.items.extend(items.iter().cloned());
        self.last = Some(Box::new(Value::List(items)));
    }

    /// Prepend one value, flattening lists one level.
    pub fn insert(&mut self, value: Value) {
        match value {
            Value::Null => return,
            Value::List(ref items) => {
                let front: Vec<Value> = items.iter().filter(|v| !v.is_null()).cloned().collect();
                self.items.splice(0..0, front);
            }
            ref other => self.items.insert(0, other.clone()),
        }
        self.last = Some(Box::new(value));
    }

    /// Prepend every item of `other`.
    pub fn prepend(&mut self, other: Self) {
        let items = other.items;
        self.items.splice(0..0, items.iter().cloned());
        self.last = Some(Box::new(Value::List(items)));
    }

    /// Drain everything into a new stream, leaving this one empty.
    #[must_use]
    pub fn pop(&mut self) -> Self {
        let items = std::mem::take(&mut self.items);
        self.last = None;
        Self {
            last: Some(Box::new(Value::List(items.clone()))),
            items,
        }
    }

    #[must_use]
    pub fn last(&self) -> Option<&Value> {
        self.last.as_deref()
    }

    #[must_use]
    pub fn items(&self) -> &[Value] {
        &self.items
    }

    #[must_use]
    pub fn into_items(self) -> Vec<Value> {
        self.items
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Value> {
        self.items.iter()
    }

    pub fn errors(&self) -> impl Iterator<Item = &ShellError> {
        self.items.iter().filter_map(Value::as_error)
    }

    pub fn non_errors(&self) -> impl Iterator<Item = &Value> {
        self.items.iter().filter(|v| !v.is_error())
    }

    pub fn getters(&self) -> impl Iterator<Item = &Getter> {
        self.items.iter().filter_map(|v| match v {
            Value::Getter(g) => Some(g),
            _ => None,
        })
    }

    pub fn bytes(&self) -> impl Iterator<Item = &Bytes> {
        self.items.iter().filter_map(|v| match v {
            Value::Bytes(b) => Some(b),
            _ => None,
        })
    }

    pub fn embeds(&self) -> impl Iterator<Item = &Value> {
        self.items.iter().filter(|v| matches!(v, Value::Embed(_)))
    }

    pub fn files(&self) -> impl Iterator<Item = &Attachment> {
        self.items.iter().filter_map(|v| match v {
            Value::Attachment(a) => Some(a),
            _ => None,
        })
    }

    #[must_use]
    pub fn has_errors(&self) -> bool {
        self.items.iter().any(Value::is_error)
    }

    /// First keyword error (break/continue/return) sitting at the end.
    #[must_use]
    pub fn last_keyword_error(&self) -> Option<&ShellError> {
        match self.last.as_deref() {
            Some(Value::Error(err)) if err.is_keyword() => Some(err),
            _ => None,
        }
    }

    /// Text shown to the user: non-rich values joined by newlines, errors
    /// rendered with their header and ignorable errors skipped.
    #[must_use]
    pub fn render(&self) -> String {
        self.items
            .iter()
            .filter(|v| !v.is_rich())
            .filter_map(|v| match v {
                Value::Error(err) if err.is_ignorable() => None,
                Value::Error(err) => Some(err.render()),
                other => Some(other.to_string()),
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Plain text of all non-error, non-rich values, as substituted into
    /// words and written to files.
    #[must_use]
    pub fn text(&self) -> String {
        self.items
            .iter()
            .filter(|v| !v.is_error() && !v.is_rich())
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Bytes when the stream carries any, otherwise its text.
    #[must_use]
    pub fn as_data(&self) -> Data {
        let mut buf = BytesMut::new();
        let mut any = false;
        for chunk in self.bytes() {
            buf.extend_from_slice(chunk);
            any = true;
        }
        if any {
            Data::Bytes(buf.freeze())
        } else {
            Data::Text(self.text())
        }
    }
}

impl From<Value> for ValueStream {
    fn from(value: Value) -> Self {
        Self::single(value)
    }
}

impl From<ShellError> for ValueStream {
    fn from(err: ShellError) -> Self {
        Self::single(Value::Error(err))
    }
}

impl FromIterator<Value> for ValueStream {
    fn from_iter<I: IntoIterator<Item = Value>>(iter: I) -> Self {
        let mut stream = Self::new();
        for value in iter {
            stream.push(value);
        }
        stream
    }
}

impl IntoIterator for ValueStream {
    type Item = Value;
    type IntoIter = std::vec::IntoIter<Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.into_iter()
    }
}

impl<'a> IntoIterator for &'a ValueStream {
    type Item = &'a Value;
    type IntoIter = std::slice::Iter<'a, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_flattens_one_level() {
        let mut stream = ValueStream::new();
        stream.push(Value::from(vec![
            Value::str("a"),
            Value::from(vec!["b", "c"]),
        ]));
        assert_eq!(stream.len(), 2);
        assert_eq!(stream.items()[1], Value::from(vec!["b", "c"]));
    }

    #[test]
    fn null_is_skipped_and_keeps_last() {
        let mut stream = ValueStream::single("a");
        stream.push(Value::Null);
        assert_eq!(stream.len(), 1);
        assert_eq!(stream.last(), Some(&Value::str("a")));
    }

    #[test]
    fn extend_remembers_the_whole_stream() {
        let mut stream = ValueStream::new();
        stream.extend(ValueStream::from(ShellError::False));
        assert!(stream.last().unwrap().is_failure());
        stream.extend(ValueStream::new());
        assert!(!stream.last().unwrap().is_failure());
    }

    #[test]
    fn pop_drains() {
        let mut stream: ValueStream = vec![Value::str("a"), Value::str("b")].into_iter().collect();
        let drained = stream.pop();
        assert!(stream.is_empty());
        assert_eq!(drained.len(), 2);
    }

    #[test]
    fn insert_prepends() {
        let mut stream = ValueStream::single("b");
        stream.insert(Value::str("a"));
        assert_eq!(stream.text(), "a\nb");
        stream.prepend(ValueStream::single("0"));
        assert_eq!(stream.text(), "0\na\nb");
    }

    #[test]
    fn render_hides_ignorable_errors() {
        let mut stream = ValueStream::single("ok");
        stream.push(ShellError::False.into());
        stream.push(ShellError::unknown_command("nope").into());
        assert_eq!(
            stream.render(),
            "ok\nError occured during execution:\n  Command not found: nope"
        );
        assert_eq!(stream.errors().count(), 2);
        assert_eq!(stream.text(), "ok");
    }

    #[test]
    fn as_data_prefers_bytes() {
        let mut stream = ValueStream::single("text");
        assert_eq!(stream.as_data(), Data::Text("text".into()));
        stream.push(Value::Bytes(Bytes::from_static(b"\x00\x01")));
        assert_eq!(stream.as_data(), Data::Bytes(Bytes::from_static(b"\x00\x01")));
    }

    #[test]
    fn keyword_error_at_end() {
        let mut stream = ValueStream::single("a");
        assert!(stream.last_keyword_error().is_none());
        stream.push(ShellError::Break.into());
        assert_eq!(stream.last_keyword_error(), Some(&ShellError::Break));
    }

    #[test]
    fn return_payload_nests_a_stream() {
        let payload = ValueStream::single("inner");
        let mut stream = ValueStream::single("outer");
        stream.push(ShellError::Return(payload.clone()).into());
        assert_eq!(stream.last_keyword_error(), Some(&ShellError::Return(payload)));
        let Some(Value::Error(ShellError::Return(inner))) = stream.last() else {
            panic!("expected a return signal");
        };
        assert_eq!(inner.last(), Some(&Value::str("inner")));
    }
}
