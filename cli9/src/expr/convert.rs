//! Converters callable from expressions: `int`, `str`, `json`, `type`, ...

use bytes::Bytes;
use cli9_sdk::{ShellError, ShellResult, Value};
use regex::Regex;
use std::collections::BTreeMap;
use std::sync::LazyLock;

pub const CONVERTERS: &[&str] = &[
    "int", "str", "float", "bool", "list", "dict", "json", "type", "re", "ord", "chr", "null",
    "bytes",
];

static ID: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\d{17,19}$").unwrap());
static INT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[-+]?\d+$").unwrap());
static FLOAT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[-+]?(\d*\.\d+|\d+\.)$").unwrap());
static USER: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^<@!?\d{17,19}>$").unwrap());
static CHANNEL: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^<#\d{17,19}>$").unwrap());
static ROLE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^<@?&\d{17,19}>$").unwrap());
static EMOJI: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^<a?:\w+:\d{17,19}>$").unwrap());
static URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^<?((?:https?|ftp)://[^\s/$.?#].[^\s]*[^>\s])>?$").unwrap()
});
static COLOR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(#|0x)(?:[0-9a-fA-F]{3}){1,2}$").unwrap());

/// Classify a value; strings are classified by what they look like.
#[must_use]
pub fn type_of(value: &Value) -> &'static str {
    let text = match value {
        Value::Str(text) => text,
        Value::Int(i) if (17..=19).contains(&i.unsigned_abs().to_string().len()) => return "id",
        other => return other.type_name(),
    };
    let patterns: [(&'static str, &LazyLock<Regex>); 9] = [
        ("id", &ID),
        ("int", &INT),
        ("float", &FLOAT),
        ("user", &USER),
        ("channel", &CHANNEL),
        ("role", &ROLE),
        ("emoji", &EMOJI),
        ("url", &URL),
        ("color", &COLOR),
    ];
    if text.is_empty() {
        return "null";
    }
    if text.trim().is_empty() {
        return "whitespace";
    }
    patterns
        .iter()
        .find(|(_, pattern)| pattern.is_match(text))
        .map_or("string", |(name, _)| name)
}

fn fail(kind: &str) -> ShellError {
    ShellError::conversion(kind, kind)
}

fn from_json(json: serde_json::Value) -> Value {
    match json {
        serde_json::Value::Null => Value::Null,
        serde_json::Value::Bool(b) => Value::Bool(b),
        serde_json::Value::Number(n) => n
            .as_i64()
            .map(Value::Int)
            .or_else(|| n.as_f64().map(Value::Float))
            .unwrap_or(Value::Null),
        serde_json::Value::String(s) => Value::Str(s),
        serde_json::Value::Array(items) => Value::List(items.into_iter().map(from_json).collect()),
        serde_json::Value::Object(map) => {
            Value::Map(map.into_iter().map(|(k, v)| (k, from_json(v))).collect())
        }
    }
}

fn to_int(value: &Value) -> ShellResult<Value> {
    #[allow(clippy::cast_possible_truncation)]
    match value {
        Value::Float(f) if f.is_finite() => Ok(Value::Int(f.trunc() as i64)),
        other => other.as_int().map(Value::Int).ok_or_else(|| fail("int")),
    }
}

fn to_float(value: &Value) -> ShellResult<Value> {
    #[allow(clippy::cast_precision_loss)]
    match value {
        Value::Float(f) => Ok(Value::Float(*f)),
        Value::Int(i) => Ok(Value::Float(*i as f64)),
        Value::Bool(b) => Ok(Value::Float(f64::from(u8::from(*b)))),
        Value::Str(s) => s.trim().parse().map(Value::Float).map_err(|_| fail("float")),
        _ => Err(fail("float")),
    }
}

fn to_list(value: &Value) -> ShellResult<Value> {
    Ok(Value::List(match value {
        Value::Null => Vec::new(),
        Value::List(items) => items.clone(),
        Value::Str(s) => s.chars().map(|c| Value::Str(c.to_string())).collect(),
        Value::Bytes(b) => b.iter().map(|byte| Value::Int(i64::from(*byte))).collect(),
        Value::Map(map) => map.keys().cloned().map(Value::Str).collect(),
        _ => return Err(fail("list")),
    }))
}

fn to_dict(value: &Value) -> ShellResult<Value> {
    match value {
        Value::Null => Ok(Value::Map(BTreeMap::new())),
        Value::Map(map) => Ok(Value::Map(map.clone())),
        Value::List(pairs) => pairs
            .iter()
            .map(|pair| match pair {
                Value::List(kv) if kv.len() == 2 => Ok((kv[0].to_string(), kv[1].clone())),
                _ => Err(fail("dict")),
            })
            .collect::<ShellResult<BTreeMap<_, _>>>()
            .map(Value::Map),
        _ => Err(fail("dict")),
    }
}

fn single<'a>(name: &str, args: &'a [Value]) -> ShellResult<&'a Value> {
    match args {
        [value] => Ok(value),
        _ => Err(ShellError::internal(format!(
            "TypeError: {name}() takes exactly one argument ({} given)",
            args.len()
        ))),
    }
}

/// Apply converter `name` to `args`.
pub fn convert(name: &str, args: &[Value]) -> ShellResult<Value> {
    match name {
        "null" => Ok(Value::Null),
        "str" if args.is_empty() => Ok(Value::str("")),
        "list" if args.is_empty() => Ok(Value::List(Vec::new())),
        "dict" if args.is_empty() => Ok(Value::Map(BTreeMap::new())),
        "re" => {
            let [pattern, text] = args else {
                return Err(ShellError::internal("TypeError: re() takes a pattern and a string"));
            };
            let pattern = Regex::new(&format!("^(?:{pattern})"))
                .map_err(|e| ShellError::internal(format!("re.error: {e}")))?;
            Ok(pattern
                .find(&text.to_string())
                .map_or(Value::Null, |m| Value::str(m.as_str())))
        }
        _ => {
            let value = single(name, args)?;
            match name {
                "int" => to_int(value),
                "str" => Ok(Value::Str(value.to_string())),
                "float" => to_float(value),
                "bool" => Ok(Value::Bool(value.is_truthy())),
                "list" => to_list(value),
                "dict" => to_dict(value),
                "json" => serde_json::from_str(&value.to_string())
                    .map(from_json)
                    .map_err(|e| ShellError::internal(format!("JSONDecodeError: {e}"))),
                "type" => Ok(Value::str(type_of(value))),
                "ord" => {
                    let text = value.to_string();
                    let mut chars = text.chars();
                    match (chars.next(), chars.next()) {
                        (Some(c), None) => Ok(Value::Int(i64::from(u32::from(c)))),
                        _ => Err(fail("ord")),
                    }
                }
                "chr" => value
                    .as_int()
                    .and_then(|i| u32::try_from(i).ok())
                    .and_then(char::from_u32)
                    .map(|c| Value::Str(c.to_string()))
                    .ok_or_else(|| fail("chr")),
                "bytes" => match value {
                    Value::Bytes(b) => Ok(Value::Bytes(b.clone())),
                    Value::List(items) => items
                        .iter()
                        .map(|i| i.as_int().and_then(|i| u8::try_from(i).ok()).ok_or_else(|| fail("bytes")))
                        .collect::<ShellResult<Vec<u8>>>()
                        .map(|b| Value::Bytes(Bytes::from(b))),
                    other => Ok(Value::Bytes(Bytes::from(other.to_string().into_bytes()))),
                },
                other => Err(ShellError::internal(format!("NameError: name '{other}' is not defined"))),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_patterns() {
        let cases = [
            ("", "null"),
            ("  ", "whitespace"),
            ("123456789012345678", "id"),
            ("-12", "int"),
            ("1.5", "float"),
            ("<@!123456789012345678>", "user"),
            ("<#123456789012345678>", "channel"),
            ("<a:wave:123456789012345678>", "emoji"),
            ("https://example.com/x", "url"),
            ("#ff00aa", "color"),
            ("hello", "string"),
        ];
        for (text, expected) in cases {
            assert_eq!(type_of(&Value::str(text)), expected, "{text:?}");
        }
        assert_eq!(type_of(&Value::Int(3)), "int");
        assert_eq!(type_of(&Value::Null), "null");
    }

    #[test]
    fn test_numeric_converters() {
        assert_eq!(convert("int", &[Value::str(" 42 ")]).unwrap(), Value::Int(42));
        assert_eq!(convert("int", &[Value::Float(2.9)]).unwrap(), Value::Int(2));
        assert!(matches!(
            convert("int", &[Value::str("x")]),
            Err(ShellError::Conversion { .. })
        ));
        assert_eq!(convert("float", &[Value::Int(2)]).unwrap(), Value::Float(2.0));
    }

    #[test]
    fn test_json_and_re() {
        let value = convert("json", &[Value::str(r#"{"a": [1, 2.5, null]}"#)]).unwrap();
        assert_eq!(
            value.index("a").unwrap(),
            Value::List(vec![Value::Int(1), Value::Float(2.5), Value::Null])
        );
        assert_eq!(
            convert("re", &[Value::str(r"\d+"), Value::str("12ab")]).unwrap(),
            Value::str("12")
        );
        assert_eq!(
            convert("re", &[Value::str(r"\d+"), Value::str("ab12")]).unwrap(),
            Value::Null
        );
    }

    #[test]
    fn test_characters() {
        assert_eq!(convert("ord", &[Value::str("a")]).unwrap(), Value::Int(97));
        assert_eq!(convert("chr", &[Value::Int(98)]).unwrap(), Value::str("b"));
        assert_eq!(
            convert("list", &[Value::str("ab")]).unwrap(),
            Value::List(vec![Value::str("a"), Value::str("b")])
        );
    }
}
