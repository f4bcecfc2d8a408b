//! Operators, builtins and methods on expression values.
//!
//! Shell variables are strings, so numeric operators accept numeric text:
//! `$count + 1` adds when `$count` is `"3"`. Two strings still concatenate.

use cli9_sdk::{ShellError, ShellResult, Value};
use std::cmp::Ordering;

use super::parser::{BinOp, CmpOp, UnaryOp};

pub const BUILTINS: &[&str] = &["all", "any", "contains", "len"];

#[derive(Debug, Clone, Copy)]
enum Num {
    Int(i64),
    Float(f64),
}

impl Num {
    #[allow(clippy::cast_precision_loss)]
    const fn float(self) -> f64 {
        match self {
            Self::Int(i) => i as f64,
            Self::Float(f) => f,
        }
    }

    const fn value(self) -> Value {
        match self {
            Self::Int(i) => Value::Int(i),
            Self::Float(f) => Value::Float(f),
        }
    }
}

fn numeric(value: &Value) -> Option<Num> {
    match value {
        Value::Int(i) => Some(Num::Int(*i)),
        Value::Bool(b) => Some(Num::Int(i64::from(*b))),
        Value::Float(f) => Some(Num::Float(*f)),
        Value::Str(s) => {
            let s = s.trim();
            s.parse()
                .map(Num::Int)
                .ok()
                .or_else(|| s.parse().ok().filter(|f: &f64| f.is_finite()).map(Num::Float))
        }
        _ => None,
    }
}

fn type_error(op: &str, a: &Value, b: &Value) -> ShellError {
    ShellError::internal(format!(
        "TypeError: unsupported operand type(s) for {op}: '{}' and '{}'",
        a.type_name(),
        b.type_name()
    ))
}

fn overflow() -> ShellError {
    ShellError::internal("OverflowError: integer result out of range")
}

fn zero_division() -> ShellError {
    ShellError::internal("ZeroDivisionError: division by zero")
}

/// Floor division and modulo with the sign of the divisor.
fn floor_div_mod(a: i64, b: i64) -> ShellResult<(i64, i64)> {
    if b == 0 {
        return Err(zero_division());
    }
    let mut quotient = a.checked_div(b).ok_or_else(overflow)?;
    let mut remainder = a.checked_rem(b).ok_or_else(overflow)?;
    if remainder != 0 && ((remainder < 0) != (b < 0)) {
        quotient -= 1;
        remainder += b;
    }
    Ok((quotient, remainder))
}

fn arithmetic(op: BinOp, a: Num, b: Num) -> ShellResult<Value> {
    if let (Num::Int(x), Num::Int(y)) = (a, b) {
        let result = match op {
            BinOp::Add => x.checked_add(y),
            BinOp::Sub => x.checked_sub(y),
            BinOp::Mul => x.checked_mul(y),
            BinOp::FloorDiv => Some(floor_div_mod(x, y)?.0),
            BinOp::Mod => Some(floor_div_mod(x, y)?.1),
            BinOp::Div => None,
        };
        if op != BinOp::Div {
            return result.map(Value::Int).ok_or_else(overflow);
        }
    }
    let (x, y) = (a.float(), b.float());
    if y == 0.0 && matches!(op, BinOp::Div | BinOp::FloorDiv | BinOp::Mod) {
        return Err(zero_division());
    }
    Ok(Num::Float(match op {
        BinOp::Add => x + y,
        BinOp::Sub => x - y,
        BinOp::Mul => x * y,
        BinOp::Div => x / y,
        BinOp::FloorDiv => (x / y).floor(),
        BinOp::Mod => x - y * (x / y).floor(),
    })
    .value())
}

/// Length of `len` units repeated `times` times, refused past `max_len`.
fn repeated_len(len: usize, times: i64, max_len: usize) -> ShellResult<usize> {
    let times = usize::try_from(times).unwrap_or(0);
    len.checked_mul(times)
        .filter(|total| *total <= max_len)
        .ok_or_else(|| ShellError::limit_exceeded(max_len, "maximum result size"))
}

fn repeat<T: Clone>(items: &[T], total: usize) -> Vec<T> {
    items.iter().cloned().cycle().take(total).collect()
}

/// Apply a binary operator; string and list results longer than `max_len`
/// are refused before they are built.
pub fn binary(op: BinOp, a: &Value, b: &Value, max_len: usize) -> ShellResult<Value> {
    let symbol = match op {
        BinOp::Add => "+",
        BinOp::Sub => "-",
        BinOp::Mul => "*",
        BinOp::Div => "/",
        BinOp::FloorDiv => "//",
        BinOp::Mod => "%",
    };
    match (op, a, b) {
        (BinOp::Add, Value::Str(x), Value::Str(y)) => return Ok(Value::Str(format!("{x}{y}"))),
        (BinOp::Add, Value::List(x), Value::List(y)) => {
            return Ok(Value::List(x.iter().chain(y).cloned().collect()));
        }
        _ => {}
    }
    if let (Some(x), Some(y)) = (numeric(a), numeric(b)) {
        return arithmetic(op, x, y);
    }
    match (op, a, b) {
        (BinOp::Add, Value::Str(x), other) => Ok(Value::Str(format!("{x}{other}"))),
        (BinOp::Add, other, Value::Str(y)) => Ok(Value::Str(format!("{other}{y}"))),
        (BinOp::Mul, Value::Str(s), n) | (BinOp::Mul, n, Value::Str(s)) => match n.as_int() {
            Some(times) => {
                repeated_len(s.len(), times, max_len)?;
                Ok(Value::Str(s.repeat(usize::try_from(times).unwrap_or(0))))
            }
            None => Err(type_error(symbol, a, b)),
        },
        (BinOp::Mul, Value::List(items), n) | (BinOp::Mul, n, Value::List(items)) => {
            match n.as_int() {
                Some(times) => {
                    let total = repeated_len(items.len(), times, max_len)?;
                    Ok(Value::List(repeat(items, total)))
                }
                None => Err(type_error(symbol, a, b)),
            }
        }
        _ => Err(type_error(symbol, a, b)),
    }
}

pub fn unary(op: UnaryOp, value: &Value) -> ShellResult<Value> {
    match op {
        UnaryOp::Not => Ok(Value::Bool(!value.is_truthy())),
        UnaryOp::Neg => match numeric(value) {
            Some(Num::Int(i)) => i.checked_neg().map(Value::Int).ok_or_else(overflow),
            Some(Num::Float(f)) => Ok(Value::Float(-f)),
            None => Err(ShellError::internal(format!(
                "TypeError: bad operand type for unary -: '{}'",
                value.type_name()
            ))),
        },
    }
}

/// Equality that treats numeric text as a number.
#[must_use]
pub fn loose_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::List(x), Value::List(y)) => {
            x.len() == y.len() && x.iter().zip(y).all(|(x, y)| loose_eq(x, y))
        }
        _ => match (numeric(a), numeric(b)) {
            #[allow(clippy::float_cmp)]
            (Some(x), Some(y)) => match (x, y) {
                (Num::Int(x), Num::Int(y)) => x == y,
                _ => x.float() == y.float(),
            },
            _ => a == b,
        },
    }
}

fn order(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Str(x), Value::Str(y)) if numeric(a).is_none() || numeric(b).is_none() => {
            Some(x.cmp(y))
        }
        (Value::List(x), Value::List(y)) => {
            for (x, y) in x.iter().zip(y) {
                match order(x, y)? {
                    Ordering::Equal => {}
                    other => return Some(other),
                }
            }
            Some(x.len().cmp(&y.len()))
        }
        _ => {
            let (x, y) = (numeric(a)?, numeric(b)?);
            match (x, y) {
                (Num::Int(x), Num::Int(y)) => Some(x.cmp(&y)),
                _ => x.float().partial_cmp(&y.float()),
            }
        }
    }
}

/// `item in container`
pub fn contains(container: &Value, item: &Value) -> ShellResult<bool> {
    match container {
        Value::Str(text) => Ok(text.contains(&item.to_string())),
        Value::List(items) => Ok(items.iter().any(|x| loose_eq(x, item))),
        Value::Map(map) | Value::Embed(map) => Ok(map.contains_key(&item.to_string())),
        Value::Bytes(bytes) => Ok(item
            .as_int()
            .and_then(|i| u8::try_from(i).ok())
            .is_some_and(|byte| bytes.contains(&byte))),
        other => Err(ShellError::internal(format!(
            "TypeError: argument of type '{}' is not iterable",
            other.type_name()
        ))),
    }
}

pub fn compare(op: CmpOp, a: &Value, b: &Value) -> ShellResult<bool> {
    let ordered = |symbol: &str, test: fn(Ordering) -> bool| {
        order(a, b).map(test).ok_or_else(|| {
            ShellError::internal(format!(
                "TypeError: '{symbol}' not supported between instances of '{}' and '{}'",
                a.type_name(),
                b.type_name()
            ))
        })
    };
    match op {
        CmpOp::Eq => Ok(loose_eq(a, b)),
        CmpOp::Ne => Ok(!loose_eq(a, b)),
        CmpOp::Lt => ordered("<", Ordering::is_lt),
        CmpOp::Le => ordered("<=", Ordering::is_le),
        CmpOp::Gt => ordered(">", Ordering::is_gt),
        CmpOp::Ge => ordered(">=", Ordering::is_ge),
        CmpOp::In => contains(b, a),
        CmpOp::NotIn => contains(b, a).map(|found| !found),
        CmpOp::Is => Ok(a == b),
        CmpOp::IsNot => Ok(a != b),
    }
}

#[must_use]
pub fn length(value: &Value) -> Option<usize> {
    match value {
        Value::Str(s) => Some(s.chars().count()),
        Value::Bytes(b) => Some(b.len()),
        Value::List(items) => Some(items.len()),
        Value::Map(map) | Value::Embed(map) => Some(map.len()),
        _ => None,
    }
}

/// `all`, `any`, `contains` and `len`.
pub fn builtin(name: &str, args: &[Value]) -> ShellResult<Value> {
    match name {
        "all" => Ok(args
            .iter()
            .find(|arg| !arg.is_truthy())
            .cloned()
            .unwrap_or(Value::Bool(true))),
        "any" => Ok(args
            .iter()
            .find(|arg| arg.is_truthy())
            .cloned()
            .unwrap_or(Value::Bool(false))),
        "contains" => match args {
            [item, container] => Ok(if contains(container, item)? {
                item.clone()
            } else {
                Value::Bool(false)
            }),
            _ => Err(ShellError::internal("TypeError: contains() takes an item and a container")),
        },
        "len" => match args {
            [value] => length(value)
                .and_then(|len| i64::try_from(len).ok())
                .map(Value::Int)
                .ok_or_else(|| {
                    ShellError::internal(format!(
                        "TypeError: object of type '{}' has no len()",
                        value.type_name()
                    ))
                }),
            _ => Err(ShellError::internal("TypeError: len() takes exactly one argument")),
        },
        other => Err(ShellError::internal(format!("NameError: name '{other}' is not defined"))),
    }
}

fn text_arg(args: &[Value], index: usize) -> Option<String> {
    args.get(index).map(ToString::to_string)
}

fn count(n: usize) -> Value {
    Value::Int(i64::try_from(n).unwrap_or(i64::MAX))
}

/// `value.name(args)`
pub fn method(value: &Value, name: &str, args: &[Value]) -> ShellResult<Value> {
    let missing = || {
        ShellError::internal(format!(
            "AttributeError: '{}' object has no attribute '{name}'",
            value.type_name()
        ))
    };
    match value {
        Value::Str(s) => Ok(match name {
            "lower" => Value::str(s.to_lowercase()),
            "upper" => Value::str(s.to_uppercase()),
            "strip" => Value::str(s.trim()),
            "split" => Value::List(match text_arg(args, 0) {
                Some(sep) if !sep.is_empty() => s.split(sep.as_str()).map(Value::str).collect(),
                _ => s.split_whitespace().map(Value::str).collect(),
            }),
            "startswith" => Value::Bool(s.starts_with(&text_arg(args, 0).unwrap_or_default())),
            "endswith" => Value::Bool(s.ends_with(&text_arg(args, 0).unwrap_or_default())),
            "replace" => match (text_arg(args, 0), text_arg(args, 1)) {
                (Some(from), Some(to)) => Value::Str(s.replace(&from, &to)),
                _ => return Err(ShellError::internal("TypeError: replace() takes two arguments")),
            },
            "join" => match args.first() {
                Some(Value::List(items)) => Value::Str(
                    items.iter().map(ToString::to_string).collect::<Vec<_>>().join(s),
                ),
                _ => return Err(ShellError::internal("TypeError: join() takes a list")),
            },
            "count" => count(s.matches(&text_arg(args, 0).unwrap_or_default()).count()),
            "find" => s
                .find(&text_arg(args, 0).unwrap_or_default())
                .map_or(Value::Int(-1), |at| count(s[..at].chars().count())),
            "isdigit" => Value::Bool(!s.is_empty() && s.chars().all(|c| c.is_ascii_digit())),
            _ => return Err(missing()),
        }),
        Value::Map(map) => Ok(match name {
            "keys" => Value::List(map.keys().cloned().map(Value::Str).collect()),
            "values" => Value::List(map.values().cloned().collect()),
            "get" => text_arg(args, 0)
                .and_then(|key| map.get(&key).cloned())
                .or_else(|| args.get(1).cloned())
                .unwrap_or(Value::Null),
            _ => return Err(missing()),
        }),
        Value::List(items) => match name {
            "count" => Ok(count(
                items
                    .iter()
                    .filter(|x| args.first().is_some_and(|arg| loose_eq(x, arg)))
                    .count(),
            )),
            "index" => items
                .iter()
                .position(|x| args.first().is_some_and(|arg| loose_eq(x, arg)))
                .map(count)
                .ok_or_else(|| ShellError::internal("ValueError: value is not in list")),
            _ => Err(missing()),
        },
        _ => Err(missing()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn binary(op: BinOp, a: &Value, b: &Value) -> ShellResult<Value> {
        super::binary(op, a, b, 1024)
    }

    #[test]
    fn test_numeric_text_is_a_number() {
        assert_eq!(binary(BinOp::Add, &Value::str("3"), &Value::Int(1)).unwrap(), Value::Int(4));
        assert_eq!(binary(BinOp::Add, &Value::str("3"), &Value::str("1")).unwrap(), Value::str("31"));
        assert!(loose_eq(&Value::str("2"), &Value::Float(2.0)));
        assert!(compare(CmpOp::Lt, &Value::str("9"), &Value::str("10")).unwrap());
        assert!(compare(CmpOp::Lt, &Value::str("b"), &Value::str("a")).is_ok_and(|lt| !lt));
    }

    #[test]
    fn test_floor_semantics() {
        assert_eq!(binary(BinOp::FloorDiv, &Value::Int(-7), &Value::Int(2)).unwrap(), Value::Int(-4));
        assert_eq!(binary(BinOp::Mod, &Value::Int(-7), &Value::Int(2)).unwrap(), Value::Int(1));
        assert_eq!(binary(BinOp::Div, &Value::Int(7), &Value::Int(2)).unwrap(), Value::Float(3.5));
        assert!(binary(BinOp::Div, &Value::Int(1), &Value::Int(0)).is_err());
    }

    #[test]
    fn test_repeat_and_concat() {
        assert_eq!(binary(BinOp::Mul, &Value::str("ab"), &Value::Int(2)).unwrap(), Value::str("abab"));
        assert_eq!(
            binary(BinOp::Add, &Value::List(vec![Value::Int(1)]), &Value::List(vec![Value::Int(2)]))
                .unwrap(),
            Value::List(vec![Value::Int(1), Value::Int(2)])
        );
        assert!(binary(BinOp::Sub, &Value::str("a"), &Value::Int(1)).is_err());
        assert_eq!(binary(BinOp::Mul, &Value::str("ab"), &Value::Int(-3)).unwrap(), Value::str(""));
    }

    #[test]
    fn test_repeat_is_bounded() {
        let huge = Value::Int(i64::MAX);
        assert!(matches!(
            binary(BinOp::Mul, &Value::str("a"), &huge),
            Err(ShellError::LimitExceeded { .. })
        ));
        assert!(matches!(
            binary(BinOp::Mul, &huge, &Value::List(vec![Value::Int(1), Value::Int(2)])),
            Err(ShellError::LimitExceeded { .. })
        ));
        assert!(matches!(
            binary(BinOp::Mul, &Value::str("ab"), &Value::Int(513)),
            Err(ShellError::LimitExceeded { .. })
        ));
        assert_eq!(
            binary(BinOp::Mul, &Value::str("ab"), &Value::Int(512)).unwrap(),
            Value::Str("ab".repeat(512))
        );
    }

    #[test]
    fn test_membership_and_identity() {
        let list = Value::List(vec![Value::Int(1), Value::str("x")]);
        assert!(compare(CmpOp::In, &Value::str("1"), &list).unwrap());
        assert!(compare(CmpOp::NotIn, &Value::str("y"), &list).unwrap());
        assert!(compare(CmpOp::In, &Value::str("ell"), &Value::str("hello")).unwrap());
        assert!(!compare(CmpOp::Is, &Value::str("1"), &Value::Int(1)).unwrap());
        assert!(compare(CmpOp::In, &Value::Int(1), &Value::Int(2)).is_err());
    }

    #[test]
    fn test_builtins_and_methods() {
        assert_eq!(builtin("len", &[Value::str("héllo")]).unwrap(), Value::Int(5));
        assert_eq!(
            builtin("all", &[Value::Int(1), Value::str("")]).unwrap(),
            Value::str("")
        );
        assert_eq!(builtin("any", &[Value::Null, Value::Int(3)]).unwrap(), Value::Int(3));
        assert_eq!(
            builtin("contains", &[Value::str("a"), Value::str("cat")]).unwrap(),
            Value::str("a")
        );
        assert_eq!(
            method(&Value::str("a,b"), "split", &[Value::str(",")]).unwrap(),
            Value::List(vec![Value::str("a"), Value::str("b")])
        );
        assert_eq!(method(&Value::str("Hi"), "upper", &[]).unwrap(), Value::str("HI"));
        assert!(method(&Value::Int(1), "upper", &[]).is_err());
    }
}
