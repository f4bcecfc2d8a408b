//! Lenses over composite values.
//!
//! `get` never mutates its target; `place`, `pop` and `insert` do.

use rand::seq::SliceRandom;
use rand::Rng;
use std::collections::BTreeMap;
use std::fmt;

use crate::error::{ShellError, ShellResult};
use crate::value::{normalize_index, Value};

#[derive(Debug, Clone, PartialEq)]
pub enum Getter {
    Segment(Segment),
    Pointer(Pointer),
    Matcher(Matcher),
}

impl Getter {
    pub fn get(&self, target: &Value) -> ShellResult<Value> {
        match self {
            Self::Segment(s) => s.get(target),
            Self::Pointer(p) => p.get(target),
            Self::Matcher(m) => m.get(target),
        }
    }

    pub fn place(&self, target: &mut Value, value: Value) -> ShellResult<()> {
        match self {
            Self::Segment(s) => s.place(target, value),
            Self::Pointer(p) => p.place(target, value),
            Self::Matcher(_) => Err(read_only()),
        }
    }

    pub fn pop(&self, target: &mut Value) -> ShellResult<Value> {
        match self {
            Self::Segment(s) => s.pop(target),
            Self::Pointer(p) => p.pop(target),
            Self::Matcher(_) => Err(read_only()),
        }
    }

    pub fn insert(&self, target: &mut Value, value: Value) -> ShellResult<()> {
        match self {
            Self::Segment(s) => s.insert(target, value),
            Self::Pointer(p) => p.place(target, value),
            Self::Matcher(_) => Err(read_only()),
        }
    }

    /// A random element of the lens's own domain.
    #[must_use]
    pub fn random(&self) -> Value {
        match self {
            Self::Segment(s) => s.random(),
            Self::Pointer(p) => p
                .keys
                .choose(&mut rand::thread_rng())
                .map_or(Value::Null, |k| Value::str(k.clone())),
            Self::Matcher(m) => m
                .pairs
                .choose(&mut rand::thread_rng())
                .map_or(Value::Null, |(k, v)| {
                    Value::List(vec![Value::str(k.clone()), v.clone()])
                }),
        }
    }
}

impl fmt::Display for Getter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Segment(s) => write!(f, "{s}"),
            Self::Pointer(p) => f.write_str(&p.keys.join("\n")),
            Self::Matcher(m) => {
                let lines: Vec<String> = m.pairs.iter().map(|(k, v)| format!("{k}={v:?}")).collect();
                f.write_str(&lines.join("\n"))
            }
        }
    }
}

fn read_only() -> ShellError {
    ShellError::internal("NotImplementedError: matcher cannot modify values")
}

fn index_error() -> ShellError {
    ShellError::internal("IndexError: index out of range")
}

fn type_error(value: &Value) -> ShellError {
    ShellError::internal(format!(
        "TypeError: '{}' object is not subscriptable",
        value.type_name()
    ))
}

/// Integer or character range with Python slice semantics.
///
/// A segment with only `stop` set is a plain index. Iterating a segment walks
/// `start..=stop` by `step`, yielding characters when either bound was given
/// as a character.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub start: Option<i64>,
    pub stop: Option<i64>,
    pub step: Option<i64>,
    pub chars: bool,
}

impl Segment {
    #[must_use]
    pub const fn index(index: i64) -> Self {
        Self {
            start: None,
            stop: Some(index),
            step: None,
            chars: false,
        }
    }

    #[must_use]
    pub const fn range(start: i64, stop: i64, step: Option<i64>) -> Self {
        Self {
            start: Some(start),
            stop: Some(stop),
            step,
            chars: false,
        }
    }

    /// Parse `stop`, `start:stop` or `start:stop:step`; empty start means 0.
    pub fn parse(text: &str) -> ShellResult<Self> {
        let invalid = || ShellError::internal(format!("ValueError: improper segment {text:?}"));
        if text.is_empty() {
            return Err(invalid());
        }
        let parts: Vec<&str> = text.split(':').collect();
        if parts.len() > 3 {
            return Err(invalid());
        }

        let mut chars = false;
        let mut bound = |part: &str| -> ShellResult<Option<i64>> {
            if part.is_empty() {
                return Ok(None);
            }
            if let Ok(n) = part.parse::<i64>() {
                return Ok(Some(n));
            }
            let mut it = part.chars();
            match (it.next(), it.next()) {
                (Some(c), None) => {
                    chars = true;
                    Ok(Some(i64::from(u32::from(c))))
                }
                _ => Err(invalid()),
            }
        };

        if parts.len() == 1 {
            let stop = bound(parts[0])?;
            return Ok(Self {
                start: None,
                stop,
                step: None,
                chars,
            });
        }

        let start = bound(parts[0])?.or(Some(0));
        let stop = bound(parts[1])?;
        let step = match parts.get(2) {
            Some(s) if !s.is_empty() => Some(s.parse::<i64>().map_err(|_| invalid())?),
            _ => None,
        };
        if step == Some(0) {
            return Err(ShellError::internal("ValueError: slice step cannot be zero"));
        }
        Ok(Self {
            start,
            stop,
            step,
            chars,
        })
    }

    /// Whether `text` looks like a range (`1:5`, `a:e`, `0:10:2`).
    #[must_use]
    pub fn is_range(text: &str) -> bool {
        text.contains(':') && Self::parse(text).is_ok_and(|s| s.stop.is_some())
    }

    fn render_bound(&self, n: i64) -> String {
        if self.chars {
            u32::try_from(n)
                .ok()
                .and_then(char::from_u32)
                .map_or_else(|| n.to_string(), |c| c.to_string())
        } else {
            n.to_string()
        }
    }

    fn element(&self, n: i64) -> Value {
        if self.chars {
            Value::str(self.render_bound(n))
        } else {
            Value::Int(n)
        }
    }

    /// Inclusive walk from start to stop.
    #[must_use]
    pub fn values(&self) -> Vec<Value> {
        let start = self.start.unwrap_or(0);
        let Some(stop) = self.stop else {
            return Vec::new();
        };
        let step = self.step.unwrap_or(1);
        let mut out = Vec::new();
        let mut n = start;
        if step > 0 {
            while n <= stop {
                out.push(self.element(n));
                n += step;
            }
        } else if step < 0 {
            while n >= stop {
                out.push(self.element(n));
                n += step;
            }
        }
        out
    }

    #[must_use]
    pub fn random(&self) -> Value {
        let values = self.values();
        if values.is_empty() {
            return Value::Null;
        }
        let at = rand::thread_rng().gen_range(0..values.len());
        values[at].clone()
    }

    const fn is_single(&self) -> bool {
        self.start.is_none()
    }

    /// Positions selected by the slice over a sequence of `len` items.
    fn positions(&self, len: usize) -> Vec<usize> {
        let Ok(n) = i64::try_from(len) else {
            return Vec::new();
        };
        let step = self.step.unwrap_or(1);
        let clamp = |v: i64, lo: i64, hi: i64| v.max(lo).min(hi);
        let resolve = |v: i64| if v < 0 { v + n } else { v };

        let mut out = Vec::new();
        if step > 0 {
            let start = self.start.map_or(0, |s| clamp(resolve(s), 0, n));
            let stop = self.stop.map_or(n, |s| clamp(resolve(s), 0, n));
            let mut i = start;
            while i < stop {
                out.extend(usize::try_from(i).ok());
                i += step;
            }
        } else {
            let start = self.start.map_or(n - 1, |s| clamp(resolve(s), -1, n - 1));
            let stop = self.stop.map_or(-1, |s| clamp(resolve(s), -1, n - 1));
            let mut i = start;
            while i > stop {
                out.extend(usize::try_from(i).ok());
                i += step;
            }
        }
        out
    }

    pub fn get(&self, target: &Value) -> ShellResult<Value> {
        if self.is_single() {
            return target.index_int(self.stop.unwrap_or(0));
        }
        match target {
            Value::List(items) => Ok(Value::List(
                self.positions(items.len())
                    .into_iter()
                    .map(|i| items[i].clone())
                    .collect(),
            )),
            Value::Str(s) => {
                let chars: Vec<char> = s.chars().collect();
                Ok(Value::Str(
                    self.positions(chars.len()).into_iter().map(|i| chars[i]).collect(),
                ))
            }
            Value::Bytes(b) => Ok(Value::Bytes(
                self.positions(b.len()).into_iter().map(|i| b[i]).collect::<Vec<u8>>().into(),
            )),
            other => Err(type_error(other)),
        }
    }

    pub fn place(&self, target: &mut Value, value: Value) -> ShellResult<()> {
        let Value::List(items) = target else {
            return Err(type_error(target));
        };
        if self.is_single() {
            let at = normalize_index(self.stop.unwrap_or(0), items.len()).ok_or_else(index_error)?;
            items[at] = value;
            return Ok(());
        }
        let positions = self.positions(items.len());
        let replacement = match value {
            Value::List(values) => values,
            other => vec![other],
        };
        if self.step.unwrap_or(1) == 1 {
            let start = positions.first().copied().unwrap_or_else(|| {
                self.start
                    .and_then(|s| usize::try_from(s.max(0)).ok())
                    .unwrap_or(0)
                    .min(items.len())
            });
            let end = positions.last().map_or(start, |last| last + 1);
            items.splice(start..end, replacement);
            return Ok(());
        }
        if positions.len() != replacement.len() {
            return Err(ShellError::internal(format!(
                "ValueError: attempt to assign sequence of size {} to extended slice of size {}",
                replacement.len(),
                positions.len()
            )));
        }
        for (at, v) in positions.into_iter().zip(replacement) {
            items[at] = v;
        }
        Ok(())
    }

    pub fn pop(&self, target: &mut Value) -> ShellResult<Value> {
        let Value::List(items) = target else {
            return Err(type_error(target));
        };
        if self.is_single() {
            let at = normalize_index(self.stop.unwrap_or(0), items.len()).ok_or_else(index_error)?;
            return Ok(items.remove(at));
        }
        let mut positions = self.positions(items.len());
        positions.sort_unstable();
        let mut taken = Vec::with_capacity(positions.len());
        for at in positions.into_iter().rev() {
            taken.push(items.remove(at));
        }
        taken.reverse();
        Ok(Value::List(taken))
    }

    pub fn insert(&self, target: &mut Value, value: Value) -> ShellResult<()> {
        let Value::List(items) = target else {
            return Err(type_error(target));
        };
        let index = if self.is_single() { self.stop } else { self.start }.unwrap_or(0);
        let len = i64::try_from(items.len()).unwrap_or(i64::MAX);
        let at = if index < 0 { (len + index).max(0) } else { index.min(len) };
        items.insert(usize::try_from(at).unwrap_or(0), value);
        Ok(())
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let stop = self.stop.map(|s| self.render_bound(s)).unwrap_or_default();
        match self.start {
            Some(start) => write!(
                f,
                "{}:{stop}:{}",
                self.render_bound(start),
                self.step.unwrap_or(1)
            ),
            None => f.write_str(&stop),
        }
    }
}

/// Ordered key path; with `reverse` every hop looks a key up by its value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pointer {
    pub keys: Vec<String>,
    pub reverse: bool,
}

impl Pointer {
    #[must_use]
    pub fn new<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            keys: keys.into_iter().map(Into::into).collect(),
            reverse: false,
        }
    }

    #[must_use]
    pub const fn reversed(mut self) -> Self {
        self.reverse = true;
        self
    }

    fn inverted(value: &Value) -> Value {
        match value {
            Value::List(items) => Value::Map(
                items
                    .iter()
                    .enumerate()
                    .map(|(i, v)| (v.to_string(), Value::Int(i64::try_from(i).unwrap_or(i64::MAX))))
                    .collect(),
            ),
            Value::Map(map) => Value::Map(
                map.iter()
                    .map(|(k, v)| (v.to_string(), Value::str(k.clone())))
                    .collect(),
            ),
            other => other.clone(),
        }
    }

    fn hop(&self, current: &Value, key: &str) -> ShellResult<Value> {
        if self.reverse {
            Self::inverted(current).index(key)
        } else {
            current.index(key)
        }
    }

    pub fn get(&self, target: &Value) -> ShellResult<Value> {
        let mut current = target.clone();
        for key in &self.keys {
            current = self.hop(&current, key)?;
        }
        Ok(current)
    }

    fn parent_mut<'a>(&self, target: &'a mut Value) -> ShellResult<&'a mut Value> {
        let mut current = target;
        for key in self.keys.iter().take(self.keys.len().saturating_sub(1)) {
            current = child_mut(current, key)?;
        }
        Ok(current)
    }

    pub fn place(&self, target: &mut Value, value: Value) -> ShellResult<()> {
        let Some(last) = self.keys.last() else {
            *target = value;
            return Ok(());
        };
        match self.parent_mut(target)? {
            Value::Map(map) => {
                map.insert(last.clone(), value);
                Ok(())
            }
            Value::List(items) => {
                let index: i64 = last.parse().map_err(|_| index_error())?;
                let at = normalize_index(index, items.len()).ok_or_else(index_error)?;
                items[at] = value;
                Ok(())
            }
            other => Err(type_error(other)),
        }
    }

    pub fn pop(&self, target: &mut Value) -> ShellResult<Value> {
        let Some(last) = self.keys.last() else {
            return Ok(std::mem::take(target));
        };
        match self.parent_mut(target)? {
            Value::Map(map) => map
                .remove(last)
                .ok_or_else(|| ShellError::internal(format!("KeyError: {last}"))),
            Value::List(items) => {
                let index: i64 = last.parse().map_err(|_| index_error())?;
                let at = normalize_index(index, items.len()).ok_or_else(index_error)?;
                Ok(items.remove(at))
            }
            other => Err(type_error(other)),
        }
    }
}

fn child_mut<'a>(value: &'a mut Value, key: &str) -> ShellResult<&'a mut Value> {
    match value {
        Value::Map(map) => map
            .get_mut(key)
            .ok_or_else(|| ShellError::internal(format!("KeyError: {key}"))),
        Value::List(items) => {
            let index: i64 = key.parse().map_err(|_| index_error())?;
            let at = normalize_index(index, items.len()).ok_or_else(index_error)?;
            Ok(&mut items[at])
        }
        other => Err(type_error(other)),
    }
}

/// Predicate over a list of keyed records.
#[derive(Debug, Clone, PartialEq)]
pub struct Matcher {
    pub pairs: Vec<(String, Value)>,
    /// Return the first match instead of a filtered list.
    pub single: bool,
    /// Every pair must match (`all`) rather than at least one.
    pub all: bool,
    /// Index of the record to fall back on when nothing matches.
    pub fallback: Option<usize>,
}

impl Matcher {
    #[must_use]
    pub const fn new(pairs: Vec<(String, Value)>) -> Self {
        Self {
            pairs,
            single: false,
            all: true,
            fallback: None,
        }
    }

    #[must_use]
    pub const fn single(mut self) -> Self {
        self.single = true;
        self
    }

    #[must_use]
    pub const fn any(mut self) -> Self {
        self.all = false;
        self
    }

    #[must_use]
    pub const fn with_fallback(mut self, index: usize) -> Self {
        self.fallback = Some(index);
        self
    }

    #[must_use]
    pub fn check(&self, record: &Value) -> bool {
        let hit = |(key, expected): &(String, Value)| {
            record.index(key).is_ok_and(|actual| loosely_equal(&actual, expected))
        };
        if self.all {
            self.pairs.iter().all(hit)
        } else {
            self.pairs.iter().any(hit)
        }
    }

    pub fn get(&self, target: &Value) -> ShellResult<Value> {
        let Value::List(records) = target else {
            return Err(type_error(target));
        };
        let mut total = Vec::new();
        for record in records {
            if self.check(record) {
                if self.single {
                    return Ok(record.clone());
                }
                total.push(record.clone());
            }
        }

        if total.is_empty() {
            if let Some(index) = self.fallback {
                let fallback = records.get(index).cloned().ok_or_else(index_error)?;
                return Ok(if self.single {
                    fallback
                } else {
                    Value::List(vec![fallback])
                });
            }
        }

        Ok(if self.single {
            Value::Null
        } else {
            Value::List(total)
        })
    }
}

fn loosely_equal(actual: &Value, expected: &Value) -> bool {
    actual == expected || actual.to_string() == expected.to_string()
}

/// Build a map value from string pairs.
#[must_use]
pub fn record<I, K, V>(pairs: I) -> Value
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<Value>,
{
    Value::Map(
        pairs
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect::<BTreeMap<_, _>>(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn list(items: &[i64]) -> Value {
        Value::List(items.iter().copied().map(Value::Int).collect())
    }

    #[test]
    fn segment_parses() {
        assert_eq!(Segment::parse("3").unwrap(), Segment::index(3));
        assert_eq!(Segment::parse(":2").unwrap(), Segment::range(0, 2, None));
        assert_eq!(Segment::parse("1:9:2").unwrap(), Segment::range(1, 9, Some(2)));
        assert!(Segment::parse("a:e").unwrap().chars);
        assert!(Segment::parse("").is_err());
        assert!(Segment::parse("1:2:3:4").is_err());
        assert!(Segment::is_range("1:5"));
        assert!(!Segment::is_range("hello"));
    }

    #[test]
    fn segment_iterates_inclusively() {
        let values = Segment::parse("1:5").unwrap().values();
        assert_eq!(values, (1..=5).map(Value::Int).collect::<Vec<_>>());
        let letters = Segment::parse("a:c").unwrap().values();
        assert_eq!(letters, vec![Value::str("a"), Value::str("b"), Value::str("c")]);
    }

    #[test]
    fn segment_slices_like_python() {
        let data = list(&[0, 1, 2, 3, 4]);
        assert_eq!(Segment::parse("0:2").unwrap().get(&data).unwrap(), list(&[0, 1]));
        assert_eq!(Segment::parse("-1").unwrap().get(&data).unwrap(), Value::Int(4));
        assert_eq!(
            Segment::range(4, 0, Some(-2)).get(&data).unwrap(),
            list(&[4, 2])
        );
        assert_eq!(
            Segment::parse("1:3").unwrap().get(&Value::str("hello")).unwrap(),
            Value::str("el")
        );
    }

    #[test]
    fn segment_mutates() {
        let mut data = list(&[0, 1, 2, 3]);
        Segment::parse("1:3").unwrap().place(&mut data, Value::Int(9)).unwrap();
        assert_eq!(data, list(&[0, 9, 3]));
        let popped = Segment::index(0).pop(&mut data).unwrap();
        assert_eq!(popped, Value::Int(0));
        Segment::index(1).insert(&mut data, Value::Int(5)).unwrap();
        assert_eq!(data, list(&[9, 5, 3]));
    }

    #[test]
    fn pointer_walks_and_reverses() {
        let data = record([("a", record([("b", Value::Int(1))]))]);
        assert_eq!(Pointer::new(["a", "b"]).get(&data).unwrap(), Value::Int(1));

        let colors = Value::from(vec!["red", "green"]);
        assert_eq!(
            Pointer::new(["green"]).reversed().get(&colors).unwrap(),
            Value::Int(1)
        );
    }

    #[test]
    fn pointer_mutates() {
        let mut data = record([("a", record([("b", Value::Int(1))]))]);
        Pointer::new(["a", "c"]).place(&mut data, Value::Int(2)).unwrap();
        assert_eq!(Pointer::new(["a", "c"]).get(&data).unwrap(), Value::Int(2));
        assert_eq!(Pointer::new(["a", "b"]).pop(&mut data).unwrap(), Value::Int(1));
        assert!(Pointer::new(["a", "b"]).get(&data).is_err());
    }

    #[test]
    fn matcher_filters_records() {
        let records = Value::List(vec![
            record([("kind", "cat"), ("name", "tom")]),
            record([("kind", "dog"), ("name", "rex")]),
            record([("kind", "cat"), ("name", "kit")]),
        ]);
        let cats = Matcher::new(vec![("kind".into(), Value::str("cat"))]);
        let Value::List(found) = cats.get(&records).unwrap() else {
            panic!("expected list");
        };
        assert_eq!(found.len(), 2);

        let first = cats.clone().single().get(&records).unwrap();
        assert_eq!(first.index("name").unwrap(), Value::str("tom"));

        let none = Matcher::new(vec![("kind".into(), Value::str("cow"))]).with_fallback(1);
        assert_eq!(none.get(&records).unwrap(), Value::List(vec![records.index_int(1).unwrap()]));

        let mut target = records;
        assert!(Getter::Matcher(cats).pop(&mut target).is_err());
    }
}
