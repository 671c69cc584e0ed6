//! Script value semantics over `serde_json::Value`.
//!
//! Integers are `i64` with checked arithmetic, floats must stay finite, and
//! dict keys are always strings. Rendering follows Python's `str`/`repr`.

use std::cmp::Ordering;

use serde_json::{Number, Value};

use super::ast::{BinOp, UnaryOp};
use crate::error::{Error, Result};

/// Upper bound on the length of any string or list a script can build.
pub const MAX_SEQUENCE_LEN: usize = 1_000_000;

pub(crate) fn type_error(message: impl std::fmt::Display) -> Error {
    Error::script(format!("TypeError: {}", message))
}

pub(crate) fn value_error(message: impl std::fmt::Display) -> Error {
    Error::script(format!("ValueError: {}", message))
}

fn zero_division(message: &str) -> Error {
    Error::script(format!("ZeroDivisionError: {}", message))
}

fn overflow() -> Error {
    Error::script("OverflowError: integer overflow")
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Num {
    Int(i64),
    Float(f64),
}

impl Num {
    pub fn as_f64(self) -> f64 {
        match self {
            Self::Int(i) => i as f64,
            Self::Float(f) => f,
        }
    }

    pub fn into_value(self) -> Result<Value> {
        match self {
            Self::Int(i) => Ok(Value::from(i)),
            Self::Float(f) => float(f),
        }
    }
}

/// Numeric view of a value; booleans count as 0 and 1.
pub fn num(value: &Value) -> Option<Num> {
    match value {
        Value::Bool(b) => Some(Num::Int(i64::from(*b))),
        Value::Number(n) => match n.as_i64() {
            Some(i) => Some(Num::Int(i)),
            None => n.as_f64().map(Num::Float),
        },
        _ => None,
    }
}

/// Wrap a float, rejecting NaN and infinities.
pub fn float(f: f64) -> Result<Value> {
    Number::from_f64(f)
        .map(Value::Number)
        .ok_or_else(|| Error::script("OverflowError: numerical result out of range"))
}

pub fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "NoneType",
        Value::Bool(_) => "bool",
        Value::Number(n) if n.is_f64() => "float",
        Value::Number(_) => "int",
        Value::String(_) => "str",
        Value::Array(_) => "list",
        Value::Object(_) => "dict",
    }
}

pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(_) => num(value).is_some_and(|n| n.as_f64() != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

/// Integer argument, accepting booleans.
pub fn as_int(value: &Value, what: &str) -> Result<i64> {
    match num(value) {
        Some(Num::Int(i)) => Ok(i),
        _ => Err(type_error(format!(
            "{} must be an integer, not '{}'",
            what,
            type_name(value)
        ))),
    }
}

fn format_float(f: f64) -> String {
    if f.fract() == 0.0 && f.abs() < 1e16 {
        format!("{:.1}", f)
    } else {
        format!("{}", f)
    }
}

fn quote(s: &str) -> String {
    let q = if s.contains('\'') && !s.contains('"') {
        '"'
    } else {
        '\''
    };
    let mut out = String::with_capacity(s.len() + 2);
    out.push(q);
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            c if c == q => {
                out.push('\\');
                out.push(c);
            }
            c => out.push(c),
        }
    }
    out.push(q);
    out
}

/// `repr()` of a value.
pub fn repr(value: &Value) -> String {
    match value {
        Value::Null => "None".to_string(),
        Value::Bool(true) => "True".to_string(),
        Value::Bool(false) => "False".to_string(),
        Value::Number(n) => match n.as_i64() {
            Some(i) => i.to_string(),
            None => format_float(n.as_f64().unwrap_or(0.0)),
        },
        Value::String(s) => quote(s),
        Value::Array(items) => {
            let inner: Vec<String> = items.iter().map(repr).collect();
            format!("[{}]", inner.join(", "))
        }
        Value::Object(map) => {
            let inner: Vec<String> = map
                .iter()
                .map(|(k, v)| format!("{}: {}", quote(k), repr(v)))
                .collect();
            format!("{{{}}}", inner.join(", "))
        }
    }
}

/// `str()` of a value.
pub fn to_str(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => repr(other),
    }
}

/// Equality with `1 == 1.0 == True` semantics.
pub fn equals(a: &Value, b: &Value) -> bool {
    if let (Some(x), Some(y)) = (num(a), num(b)) {
        return match (x, y) {
            (Num::Int(x), Num::Int(y)) => x == y,
            _ => x.as_f64() == y.as_f64(),
        };
    }
    match (a, b) {
        (Value::Null, Value::Null) => true,
        (Value::String(x), Value::String(y)) => x == y,
        (Value::Array(x), Value::Array(y)) => {
            x.len() == y.len() && x.iter().zip(y).all(|(a, b)| equals(a, b))
        }
        (Value::Object(x), Value::Object(y)) => {
            x.len() == y.len()
                && x
                    .iter()
                    .all(|(k, v)| y.get(k).is_some_and(|other| equals(v, other)))
        }
        _ => false,
    }
}

/// Ordering for `<`, `sorted`, `min`, and `max`.
pub fn compare(a: &Value, b: &Value) -> Result<Ordering> {
    if let (Some(x), Some(y)) = (num(a), num(b)) {
        return match (x, y) {
            (Num::Int(x), Num::Int(y)) => Ok(x.cmp(&y)),
            _ => x
                .as_f64()
                .partial_cmp(&y.as_f64())
                .ok_or_else(|| type_error("cannot order NaN")),
        };
    }
    match (a, b) {
        (Value::String(x), Value::String(y)) => Ok(x.cmp(y)),
        (Value::Array(x), Value::Array(y)) => {
            for (a, b) in x.iter().zip(y) {
                let ord = compare(a, b)?;
                if ord != Ordering::Equal {
                    return Ok(ord);
                }
            }
            Ok(x.len().cmp(&y.len()))
        }
        _ => Err(type_error(format!(
            "'<' not supported between instances of '{}' and '{}'",
            type_name(a),
            type_name(b)
        ))),
    }
}

/// `item in container`.
pub fn contains(container: &Value, item: &Value) -> Result<bool> {
    match (container, item) {
        (Value::String(hay), Value::String(needle)) => Ok(hay.contains(needle.as_str())),
        (Value::String(_), other) => Err(type_error(format!(
            "'in <string>' requires string as left operand, not {}",
            type_name(other)
        ))),
        (Value::Array(items), item) => Ok(items.iter().any(|v| equals(v, item))),
        (Value::Object(map), Value::String(key)) => Ok(map.contains_key(key)),
        (Value::Object(_), _) => Ok(false),
        (other, _) => Err(type_error(format!(
            "argument of type '{}' is not iterable",
            type_name(other)
        ))),
    }
}

/// Items produced by `for x in value`.
pub fn iterate(value: &Value) -> Result<Vec<Value>> {
    match value {
        Value::Array(items) => Ok(items.clone()),
        Value::String(s) => Ok(s.chars().map(|c| Value::String(c.to_string())).collect()),
        Value::Object(map) => Ok(map.keys().cloned().map(Value::String).collect()),
        other => Err(type_error(format!(
            "'{}' object is not iterable",
            type_name(other)
        ))),
    }
}

pub(crate) fn check_len(len: usize) -> Result<()> {
    if len > MAX_SEQUENCE_LEN {
        return Err(Error::script(format!(
            "MemoryError: sequence longer than {} items",
            MAX_SEQUENCE_LEN
        )));
    }
    Ok(())
}

/// Deepest list and dict nesting a script value may reach.
pub const MAX_DEPTH: usize = 100;

/// Fails when `value` nests more than `limit` containers deep.
pub(crate) fn check_depth(value: &Value, limit: usize) -> Result<()> {
    if nests_deeper(value, limit) {
        return Err(Error::script(format!(
            "RecursionError: values nested more than {} levels deep",
            MAX_DEPTH
        )));
    }
    Ok(())
}

fn nests_deeper(value: &Value, limit: usize) -> bool {
    match value {
        Value::Array(items) => limit == 0 || items.iter().any(|v| nests_deeper(v, limit - 1)),
        Value::Object(map) => limit == 0 || map.values().any(|v| nests_deeper(v, limit - 1)),
        _ => false,
    }
}

/// Resolve a possibly negative index against `len`.
pub fn normalize_index(len: usize, index: i64) -> Option<usize> {
    let len = i64::try_from(len).ok()?;
    let resolved = if index < 0 { index + len } else { index };
    if (0..len).contains(&resolved) {
        usize::try_from(resolved).ok()
    } else {
        None
    }
}

/// `container[index]`.
pub fn subscript(container: &Value, index: &Value) -> Result<Value> {
    match container {
        Value::Array(items) => {
            let i = as_int(index, "list indices")?;
            normalize_index(items.len(), i)
                .map(|i| items[i].clone())
                .ok_or_else(|| Error::script("IndexError: list index out of range"))
        }
        Value::String(s) => {
            let i = as_int(index, "string indices")?;
            let chars: Vec<char> = s.chars().collect();
            normalize_index(chars.len(), i)
                .map(|i| Value::String(chars[i].to_string()))
                .ok_or_else(|| Error::script("IndexError: string index out of range"))
        }
        Value::Object(map) => match index {
            Value::String(key) => map
                .get(key)
                .cloned()
                .ok_or_else(|| Error::script(format!("KeyError: {}", repr(index)))),
            other => Err(Error::script(format!("KeyError: {}", repr(other)))),
        },
        other => Err(type_error(format!(
            "'{}' object is not subscriptable",
            type_name(other)
        ))),
    }
}

fn slice_bounds(len: usize, lower: Option<i64>, upper: Option<i64>) -> (usize, usize) {
    let len = len as i64;
    let clamp = |i: i64| -> i64 {
        let i = if i < 0 { i + len } else { i };
        i.clamp(0, len)
    };
    let lo = lower.map(clamp).unwrap_or(0);
    let hi = upper.map(clamp).unwrap_or(len);
    (lo as usize, hi.max(lo) as usize)
}

/// `value[lower:upper]` with Python's clamping.
pub fn slice(value: &Value, lower: Option<i64>, upper: Option<i64>) -> Result<Value> {
    match value {
        Value::Array(items) => {
            let (lo, hi) = slice_bounds(items.len(), lower, upper);
            Ok(Value::Array(items[lo..hi].to_vec()))
        }
        Value::String(s) => {
            let chars: Vec<char> = s.chars().collect();
            let (lo, hi) = slice_bounds(chars.len(), lower, upper);
            Ok(Value::String(chars[lo..hi].iter().collect()))
        }
        other => Err(type_error(format!(
            "'{}' object is not subscriptable",
            type_name(other)
        ))),
    }
}

pub fn unary(op: UnaryOp, operand: &Value) -> Result<Value> {
    match op {
        UnaryOp::Not => Ok(Value::Bool(!truthy(operand))),
        UnaryOp::Neg => match num(operand) {
            Some(Num::Int(i)) => i.checked_neg().map(Value::from).ok_or_else(overflow),
            Some(Num::Float(f)) => float(-f),
            None => Err(type_error(format!(
                "bad operand type for unary -: '{}'",
                type_name(operand)
            ))),
        },
        UnaryOp::Pos => match num(operand) {
            Some(n) => n.into_value(),
            None => Err(type_error(format!(
                "bad operand type for unary +: '{}'",
                type_name(operand)
            ))),
        },
    }
}

fn repeat<T: Clone>(items: &[T], times: i64) -> Result<Vec<T>> {
    let times = usize::try_from(times).unwrap_or(0);
    check_len(items.len().saturating_mul(times))?;
    let mut out = Vec::with_capacity(items.len() * times);
    for _ in 0..times {
        out.extend_from_slice(items);
    }
    Ok(out)
}

pub fn binary(op: BinOp, left: &Value, right: &Value) -> Result<Value> {
    match (op, left, right) {
        (BinOp::Add, Value::String(a), Value::String(b)) => {
            check_len(a.len() + b.len())?;
            Ok(Value::String(format!("{}{}", a, b)))
        }
        (BinOp::Add, Value::Array(a), Value::Array(b)) => {
            check_len(a.len() + b.len())?;
            Ok(Value::Array(a.iter().chain(b).cloned().collect()))
        }
        (BinOp::Mul, Value::String(s), n) | (BinOp::Mul, n, Value::String(s))
            if matches!(num(n), Some(Num::Int(_))) =>
        {
            let chars: Vec<char> = s.chars().collect();
            let times = as_int(n, "repeat count")?;
            Ok(Value::String(repeat(&chars, times)?.into_iter().collect()))
        }
        (BinOp::Mul, Value::Array(items), n) | (BinOp::Mul, n, Value::Array(items))
            if matches!(num(n), Some(Num::Int(_))) =>
        {
            let times = as_int(n, "repeat count")?;
            Ok(Value::Array(repeat(items, times)?))
        }
        _ => arithmetic(op, left, right),
    }
}

fn arithmetic(op: BinOp, left: &Value, right: &Value) -> Result<Value> {
    let (Some(x), Some(y)) = (num(left), num(right)) else {
        return Err(type_error(format!(
            "unsupported operand type(s) for {}: '{}' and '{}'",
            op.symbol(),
            type_name(left),
            type_name(right)
        )));
    };
    match (x, y) {
        (Num::Int(x), Num::Int(y)) => int_op(op, x, y),
        _ => float_op(op, x.as_f64(), y.as_f64()),
    }
}

fn int_op(op: BinOp, x: i64, y: i64) -> Result<Value> {
    let result = match op {
        BinOp::Add => x.checked_add(y),
        BinOp::Sub => x.checked_sub(y),
        BinOp::Mul => x.checked_mul(y),
        BinOp::Div => {
            if y == 0 {
                return Err(zero_division("division by zero"));
            }
            return float(x as f64 / y as f64);
        }
        BinOp::FloorDiv => {
            if y == 0 {
                return Err(zero_division("integer division or modulo by zero"));
            }
            x.checked_div(y).map(|q| {
                if x % y != 0 && ((x < 0) != (y < 0)) {
                    q - 1
                } else {
                    q
                }
            })
        }
        BinOp::Mod => {
            if y == 0 {
                return Err(zero_division("integer division or modulo by zero"));
            }
            x.checked_rem(y)
                .map(|r| if r != 0 && ((r < 0) != (y < 0)) { r + y } else { r })
        }
        BinOp::Pow => {
            if y < 0 {
                return float_op(op, x as f64, y as f64);
            }
            u32::try_from(y).ok().and_then(|e| x.checked_pow(e))
        }
    };
    result.map(Value::from).ok_or_else(overflow)
}

fn float_op(op: BinOp, x: f64, y: f64) -> Result<Value> {
    let result = match op {
        BinOp::Add => x + y,
        BinOp::Sub => x - y,
        BinOp::Mul => x * y,
        BinOp::Div => {
            if y == 0.0 {
                return Err(zero_division("float division by zero"));
            }
            x / y
        }
        BinOp::FloorDiv => {
            if y == 0.0 {
                return Err(zero_division("float floor division by zero"));
            }
            (x / y).floor()
        }
        BinOp::Mod => {
            if y == 0.0 {
                return Err(zero_division("float modulo"));
            }
            let r = x % y;
            if r != 0.0 && ((r < 0.0) != (y < 0.0)) {
                r + y
            } else {
                r
            }
        }
        BinOp::Pow => {
            if x == 0.0 && y < 0.0 {
                return Err(zero_division("0.0 cannot be raised to a negative power"));
            }
            x.powf(y)
        }
    };
    float(result)
}

/// Parsed `[[fill]align][0][width][,][.precision][type]`.
#[derive(Debug, Default)]
struct FormatSpec {
    fill: Option<char>,
    align: Option<char>,
    width: usize,
    grouping: bool,
    precision: Option<usize>,
    kind: Option<char>,
}

fn parse_spec(spec: &str) -> Result<FormatSpec> {
    let chars: Vec<char> = spec.chars().collect();
    let mut out = FormatSpec::default();
    let mut i = 0;

    let is_align = |c: char| matches!(c, '<' | '>' | '^');
    if chars.len() >= 2 && is_align(chars[1]) {
        out.fill = Some(chars[0]);
        out.align = Some(chars[1]);
        i = 2;
    } else if chars.first().is_some_and(|c| is_align(*c)) {
        out.align = Some(chars[0]);
        i = 1;
    }
    if chars.get(i) == Some(&'0') && out.align.is_none() {
        out.fill = Some('0');
        out.align = Some('>');
        i += 1;
    }

    let digits = |i: &mut usize| -> Option<usize> {
        let start = *i;
        while chars.get(*i).is_some_and(|c| c.is_ascii_digit()) {
            *i += 1;
        }
        chars[start..*i].iter().collect::<String>().parse().ok()
    };

    out.width = digits(&mut i).unwrap_or(0);
    if chars.get(i) == Some(&',') {
        out.grouping = true;
        i += 1;
    }
    if chars.get(i) == Some(&'.') {
        i += 1;
        out.precision = Some(
            digits(&mut i).ok_or_else(|| value_error("Format specifier missing precision"))?,
        );
    }
    if let Some(c) = chars.get(i) {
        out.kind = Some(*c);
        i += 1;
    }
    if i != chars.len() {
        return Err(value_error(format!("Invalid format specifier '{}'", spec)));
    }
    Ok(out)
}

fn group_thousands(number: &str) -> String {
    let (sign, rest) = match number.strip_prefix('-') {
        Some(rest) => ("-", rest),
        None => ("", number),
    };
    let (int_part, frac) = match rest.find('.') {
        Some(dot) => rest.split_at(dot),
        None => (rest, ""),
    };
    let mut grouped = String::new();
    for (i, c) in int_part.chars().enumerate() {
        if i > 0 && (int_part.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(c);
    }
    format!("{}{}{}", sign, grouped, frac)
}

/// Render `value` under an f-string format spec.
pub fn format_with_spec(value: &Value, spec: &str) -> Result<String> {
    let spec = parse_spec(spec)?;
    let number = num(value).filter(|_| !value.is_boolean() || spec.kind.is_some());

    let body = match (spec.kind, number) {
        (Some('f') | Some('F'), Some(n)) => format!("{:.*}", spec.precision.unwrap_or(6), n.as_f64()),
        (Some('%'), Some(n)) => format!("{:.*}%", spec.precision.unwrap_or(6), n.as_f64() * 100.0),
        (Some('d'), Some(Num::Int(i))) => i.to_string(),
        (None, Some(Num::Float(f))) if spec.precision.is_some() => {
            format!("{:.*}", spec.precision.unwrap_or(6), f)
        }
        (None, Some(_)) => to_str(value),
        (Some('s') | None, _) => {
            let s = to_str(value);
            match spec.precision {
                Some(p) => s.chars().take(p).collect(),
                None => s,
            }
        }
        (Some(kind), _) => {
            return Err(value_error(format!(
                "Unknown format code '{}' for object of type '{}'",
                kind,
                type_name(value)
            )))
        }
    };
    let body = if spec.grouping && number.is_some() {
        group_thousands(&body)
    } else {
        body
    };

    let len = body.chars().count();
    if len >= spec.width {
        return Ok(body);
    }
    let pad = spec.width - len;
    let fill = spec.fill.unwrap_or(' ');
    let align = spec
        .align
        .unwrap_or(if number.is_some() { '>' } else { '<' });
    let padding = |n: usize| fill.to_string().repeat(n);
    Ok(match align {
        '>' => format!("{}{}", padding(pad), body),
        '^' => format!("{}{}{}", padding(pad / 2), body, padding(pad - pad / 2)),
        _ => format!("{}{}", body, padding(pad)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_check_depth() {
        assert!(check_depth(&json!(1), 0).is_ok());
        assert!(check_depth(&json!([]), 0).is_err());
        assert!(check_depth(&json!([[1], {"k": [2]}]), 3).is_ok());
        assert!(check_depth(&json!([[1], {"k": [2]}]), 2).is_err());

        let mut deep = json!(0);
        for _ in 0..MAX_DEPTH + 1 {
            deep = json!([deep]);
        }
        let err = check_depth(&deep, MAX_DEPTH).unwrap_err();
        assert!(err.to_string().contains("RecursionError"), "{}", err);
    }

    #[test]
    fn test_repr_and_str() {
        assert_eq!(repr(&json!(null)), "None");
        assert_eq!(repr(&json!(true)), "True");
        assert_eq!(repr(&json!(2.0)), "2.0");
        assert_eq!(repr(&json!(0.25)), "0.25");
        assert_eq!(repr(&json!(["a", 1])), "['a', 1]");
        assert_eq!(repr(&json!({"k": "it's"})), "{'k': \"it's\"}");
        assert_eq!(to_str(&json!("plain")), "plain");
    }

    #[test]
    fn test_truthiness() {
        for v in [json!(null), json!(0), json!(0.0), json!(""), json!([]), json!({})] {
            assert!(!truthy(&v), "{:?}", v);
        }
        for v in [json!(1), json!("x"), json!([0]), json!({"a": null})] {
            assert!(truthy(&v), "{:?}", v);
        }
    }

    #[test]
    fn test_numeric_semantics() {
        assert_eq!(binary(BinOp::Div, &json!(7), &json!(2)).unwrap(), json!(3.5));
        assert_eq!(binary(BinOp::FloorDiv, &json!(-7), &json!(2)).unwrap(), json!(-4));
        assert_eq!(binary(BinOp::Mod, &json!(-7), &json!(3)).unwrap(), json!(2));
        assert_eq!(binary(BinOp::Pow, &json!(2), &json!(10)).unwrap(), json!(1024));
        assert_eq!(binary(BinOp::Add, &json!(1), &json!(0.5)).unwrap(), json!(1.5));
        assert_eq!(binary(BinOp::Add, &json!(true), &json!(1)).unwrap(), json!(2));

        assert!(binary(BinOp::Div, &json!(1), &json!(0)).is_err());
        assert!(binary(BinOp::Mul, &json!(i64::MAX), &json!(2)).is_err());
        assert!(binary(BinOp::Add, &json!("a"), &json!(1)).is_err());
    }

    #[test]
    fn test_sequence_operators() {
        assert_eq!(binary(BinOp::Add, &json!("ab"), &json!("c")).unwrap(), json!("abc"));
        assert_eq!(binary(BinOp::Mul, &json!(3), &json!("-")).unwrap(), json!("---"));
        assert_eq!(binary(BinOp::Add, &json!([1]), &json!([2])).unwrap(), json!([1, 2]));
        assert!(binary(BinOp::Mul, &json!("x"), &json!(10_000_000)).is_err());
    }

    #[test]
    fn test_equality_and_ordering() {
        assert!(equals(&json!(1), &json!(1.0)));
        assert!(equals(&json!({"a": [1]}), &json!({"a": [1.0]})));
        assert!(!equals(&json!("1"), &json!(1)));
        assert_eq!(compare(&json!([1, 2]), &json!([1, 3])).unwrap(), Ordering::Less);
        assert!(compare(&json!("a"), &json!(1)).is_err());
    }

    #[test]
    fn test_indexing_and_slicing() {
        let list = json!([10, 20, 30]);
        assert_eq!(subscript(&list, &json!(-1)).unwrap(), json!(30));
        assert!(subscript(&list, &json!(3)).is_err());
        assert_eq!(slice(&list, Some(1), None).unwrap(), json!([20, 30]));
        assert_eq!(slice(&json!("hello"), None, Some(-2)).unwrap(), json!("hel"));
        assert_eq!(slice(&list, Some(5), Some(1)).unwrap(), json!([]));

        let err = subscript(&json!({"a": 1}), &json!("b")).unwrap_err();
        assert!(err.to_string().contains("KeyError: 'b'"));
    }

    #[test]
    fn test_membership() {
        assert!(contains(&json!("dark mode"), &json!("dark")).unwrap());
        assert!(contains(&json!([1, 2]), &json!(2.0)).unwrap());
        assert!(contains(&json!({"k": 1}), &json!("k")).unwrap());
        assert!(contains(&json!(5), &json!(1)).is_err());
    }

    #[test]
    fn test_format_spec() {
        assert_eq!(format_with_spec(&json!(0.756), ".2f").unwrap(), "0.76");
        assert_eq!(format_with_spec(&json!(0.5), ".0%").unwrap(), "50%");
        assert_eq!(format_with_spec(&json!(1234567), ",").unwrap(), "1,234,567");
        assert_eq!(format_with_spec(&json!(7), "03").unwrap(), "007");
        assert_eq!(format_with_spec(&json!("ab"), ">4").unwrap(), "  ab");
        assert_eq!(format_with_spec(&json!("ab"), "*^6").unwrap(), "**ab**");
        assert!(format_with_spec(&json!("ab"), "d").is_err());
    }
}
