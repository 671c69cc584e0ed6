//! Builtin functions and value methods available to scripts.
//!
//! `sorted`, `min`, `max`, and `print` need the interpreter (key functions,
//! captured output) and are finished there; the rest live here.

use std::cmp::Ordering;

use serde_json::{Map, Value};

use super::value::{
    self, as_int, check_len, compare, equals, float, iterate, num, to_str, truthy, type_error,
    type_name, value_error, Num,
};
use crate::error::{Error, Result};

/// Builtin function names.
pub const BUILTINS: &[&str] = &[
    "len", "str", "int", "float", "bool", "abs", "min", "max", "sum", "sorted", "range", "list",
    "dict", "round", "any", "all", "enumerate", "zip", "print", "reversed", "tuple", "repr",
];

/// Call arguments after evaluation.
#[derive(Debug, Default)]
pub struct Args {
    pub positional: Vec<Value>,
    pub keywords: Vec<(String, Value)>,
}

impl Args {
    pub fn new(positional: Vec<Value>, keywords: Vec<(String, Value)>) -> Self {
        Self {
            positional,
            keywords,
        }
    }

    /// Remove and return keyword `name`.
    pub fn take_keyword(&mut self, name: &str) -> Option<Value> {
        let pos = self.keywords.iter().position(|(k, _)| k == name)?;
        Some(self.keywords.remove(pos).1)
    }

    /// Positional `index`, falling back to keyword `name`.
    pub fn take(&mut self, index: usize, name: &str) -> Option<Value> {
        if index < self.positional.len() {
            return Some(std::mem::replace(&mut self.positional[index], Value::Null));
        }
        self.take_keyword(name)
    }

    /// Reject leftover keywords and check the positional count.
    pub fn check(&self, func: &str, min: usize, max: usize) -> Result<()> {
        if let Some((name, _)) = self.keywords.first() {
            return Err(type_error(format!(
                "{}() got an unexpected keyword argument '{}'",
                func, name
            )));
        }
        let n = self.positional.len();
        if n < min || n > max {
            let expected = if min == max {
                format!("exactly {}", min)
            } else if n < min {
                format!("at least {}", min)
            } else {
                format!("at most {}", max)
            };
            return Err(type_error(format!(
                "{}() takes {} argument{} ({} given)",
                func,
                expected,
                if min == max && min == 1 { "" } else { "s" },
                n
            )));
        }
        Ok(())
    }
}

fn arg(args: &Args, index: usize) -> &Value {
    args.positional.get(index).unwrap_or(&Value::Null)
}

fn string_arg<'v>(value: &'v Value, func: &str) -> Result<&'v str> {
    value.as_str().ok_or_else(|| {
        type_error(format!(
            "{}() argument must be str, not '{}'",
            func,
            type_name(value)
        ))
    })
}

/// Call a builtin other than `sorted`, `min`, `max`, and `print`.
pub fn call_builtin(name: &str, mut args: Args, max_range: usize) -> Result<Value> {
    match name {
        "len" => {
            args.check(name, 1, 1)?;
            let n = match arg(&args, 0) {
                Value::String(s) => s.chars().count(),
                Value::Array(items) => items.len(),
                Value::Object(map) => map.len(),
                other => {
                    return Err(type_error(format!(
                        "object of type '{}' has no len()",
                        type_name(other)
                    )))
                }
            };
            Ok(Value::from(n))
        }
        "str" => {
            args.check(name, 0, 1)?;
            Ok(Value::String(
                args.positional.first().map(to_str).unwrap_or_default(),
            ))
        }
        "repr" => {
            args.check(name, 1, 1)?;
            Ok(Value::String(value::repr(arg(&args, 0))))
        }
        "int" => {
            args.check(name, 0, 1)?;
            args.positional.first().map_or(Ok(Value::from(0)), to_int)
        }
        "float" => {
            args.check(name, 0, 1)?;
            args.positional.first().map_or(float(0.0), to_float)
        }
        "bool" => {
            args.check(name, 0, 1)?;
            Ok(Value::Bool(args.positional.first().is_some_and(truthy)))
        }
        "abs" => {
            args.check(name, 1, 1)?;
            match num(arg(&args, 0)) {
                Some(Num::Int(i)) => i
                    .checked_abs()
                    .map(Value::from)
                    .ok_or_else(|| Error::script("OverflowError: integer overflow")),
                Some(Num::Float(f)) => float(f.abs()),
                None => Err(type_error(format!(
                    "bad operand type for abs(): '{}'",
                    type_name(arg(&args, 0))
                ))),
            }
        }
        "sum" => {
            let start = args.take(1, "start").unwrap_or(Value::from(0));
            args.positional.truncate(1);
            args.check(name, 1, 1)?;
            iterate(arg(&args, 0))?
                .iter()
                .try_fold(start, |acc, item| {
                    if num(item).is_none() {
                        return Err(type_error(format!(
                            "unsupported operand type(s) for +: 'int' and '{}'",
                            type_name(item)
                        )));
                    }
                    value::binary(super::ast::BinOp::Add, &acc, item)
                })
        }
        "round" => {
            let digits = args.take(1, "ndigits");
            args.positional.truncate(1);
            args.check(name, 1, 1)?;
            round(arg(&args, 0), digits.as_ref())
        }
        "range" => {
            args.check(name, 1, 3)?;
            range(&args.positional, max_range)
        }
        "any" => {
            args.check(name, 1, 1)?;
            Ok(Value::Bool(iterate(arg(&args, 0))?.iter().any(truthy)))
        }
        "all" => {
            args.check(name, 1, 1)?;
            Ok(Value::Bool(iterate(arg(&args, 0))?.iter().all(truthy)))
        }
        "list" | "tuple" => {
            args.check(name, 0, 1)?;
            match args.positional.first() {
                Some(v) => Ok(Value::Array(iterate(v)?)),
                None => Ok(Value::Array(Vec::new())),
            }
        }
        "reversed" => {
            args.check(name, 1, 1)?;
            let mut items = iterate(arg(&args, 0))?;
            items.reverse();
            Ok(Value::Array(items))
        }
        "dict" => {
            let keywords = std::mem::take(&mut args.keywords);
            args.check(name, 0, 1)?;
            let mut map = match args.positional.first() {
                None => Map::new(),
                Some(Value::Object(map)) => map.clone(),
                Some(other) => pairs_to_map(other)?,
            };
            map.extend(keywords);
            Ok(Value::Object(map))
        }
        "enumerate" => {
            let start = match args.take(1, "start") {
                Some(v) => as_int(&v, "enumerate() start")?,
                None => 0,
            };
            args.positional.truncate(1);
            args.check(name, 1, 1)?;
            let items = iterate(arg(&args, 0))?;
            let mut out = Vec::with_capacity(items.len());
            for (i, item) in items.into_iter().enumerate() {
                let index = i64::try_from(i)
                    .ok()
                    .and_then(|i| i.checked_add(start))
                    .ok_or_else(|| Error::script("OverflowError: integer overflow"))?;
                out.push(Value::Array(vec![Value::from(index), item]));
            }
            Ok(Value::Array(out))
        }
        "zip" => {
            args.check(name, 0, usize::MAX)?;
            let columns = args
                .positional
                .iter()
                .map(iterate)
                .collect::<Result<Vec<_>>>()?;
            let len = columns.iter().map(Vec::len).min().unwrap_or(0);
            Ok(Value::Array(
                (0..len)
                    .map(|i| Value::Array(columns.iter().map(|c| c[i].clone()).collect()))
                    .collect(),
            ))
        }
        other => Err(Error::script(format!(
            "NameError: name '{}' is not defined",
            other
        ))),
    }
}

fn to_int(value: &Value) -> Result<Value> {
    match value {
        Value::String(s) => s
            .trim()
            .replace('_', "")
            .parse::<i64>()
            .map(Value::from)
            .map_err(|_| {
                value_error(format!(
                    "invalid literal for int() with base 10: {}",
                    value::repr(value)
                ))
            }),
        other => match num(other) {
            Some(Num::Int(i)) => Ok(Value::from(i)),
            Some(Num::Float(f)) => {
                let truncated = f.trunc();
                if truncated.abs() >= 9.2e18 {
                    return Err(Error::script(
                        "OverflowError: float too large to convert to int",
                    ));
                }
                Ok(Value::from(truncated as i64))
            }
            None => Err(type_error(format!(
                "int() argument must be a string or a number, not '{}'",
                type_name(other)
            ))),
        },
    }
}

fn to_float(value: &Value) -> Result<Value> {
    match value {
        Value::String(s) => {
            let parsed = s.trim().parse::<f64>().map_err(|_| {
                value_error(format!(
                    "could not convert string to float: {}",
                    value::repr(value)
                ))
            })?;
            float(parsed)
        }
        other => match num(other) {
            Some(n) => float(n.as_f64()),
            None => Err(type_error(format!(
                "float() argument must be a string or a number, not '{}'",
                type_name(other)
            ))),
        },
    }
}

fn round(value: &Value, digits: Option<&Value>) -> Result<Value> {
    let digits = match digits {
        None | Some(Value::Null) => None,
        Some(d) => Some(as_int(d, "ndigits")?),
    };
    match (num(value), digits) {
        (Some(Num::Int(i)), _) => Ok(Value::from(i)),
        (Some(Num::Float(f)), None) => to_int(&float(f.round_ties_even())?),
        (Some(Num::Float(f)), Some(d)) => {
            let d = i32::try_from(d.clamp(-308, 308)).unwrap_or(0);
            let factor = 10f64.powi(d);
            float((f * factor).round_ties_even() / factor)
        }
        (None, _) => Err(type_error(format!(
            "type {} doesn't define __round__ method",
            type_name(value)
        ))),
    }
}

fn range(positional: &[Value], max_range: usize) -> Result<Value> {
    let ints = positional
        .iter()
        .map(|v| as_int(v, "range() argument"))
        .collect::<Result<Vec<_>>>()?;
    let (start, stop, step) = match ints.as_slice() {
        [stop] => (0, *stop, 1),
        [start, stop] => (*start, *stop, 1),
        [start, stop, step] => (*start, *stop, *step),
        _ => return Err(type_error("range expected at most 3 arguments")),
    };
    if step == 0 {
        return Err(value_error("range() arg 3 must not be zero"));
    }

    let span = if step > 0 {
        i128::from(stop) - i128::from(start)
    } else {
        i128::from(start) - i128::from(stop)
    };
    let step_abs = i128::from(step).abs();
    let count = if span <= 0 {
        0
    } else {
        (span + step_abs - 1) / step_abs
    };
    if count > max_range as i128 {
        return Err(value_error(format!(
            "range() of {} items exceeds the limit of {}",
            count, max_range
        )));
    }

    let mut out = Vec::with_capacity(count as usize);
    let mut current = i128::from(start);
    for _ in 0..count {
        out.push(Value::from(current as i64));
        current += i128::from(step);
    }
    Ok(Value::Array(out))
}

fn pairs_to_map(value: &Value) -> Result<Map<String, Value>> {
    let mut map = Map::new();
    for pair in iterate(value)? {
        match pair {
            Value::Array(kv) if kv.len() == 2 => {
                let mut kv = kv.into_iter();
                let (Some(Value::String(k)), Some(v)) = (kv.next(), kv.next()) else {
                    return Err(type_error("dict keys must be strings"));
                };
                map.insert(k, v);
            }
            _ => {
                return Err(value_error(
                    "dictionary update sequence element must be a pair",
                ))
            }
        }
    }
    Ok(map)
}

/// Stable sort of `items` by precomputed `keys`.
pub fn sort_by_keys(items: Vec<Value>, keys: Vec<Value>, reverse: bool) -> Result<Vec<Value>> {
    let mut paired: Vec<(Value, Value)> = keys.into_iter().zip(items).collect();
    let mut failure = None;
    paired.sort_by(|(a, _), (b, _)| {
        let ord = compare(a, b).unwrap_or_else(|e| {
            failure.get_or_insert(e);
            Ordering::Equal
        });
        if reverse {
            ord.reverse()
        } else {
            ord
        }
    });
    match failure {
        Some(e) => Err(e),
        None => Ok(paired.into_iter().map(|(_, item)| item).collect()),
    }
}

/// Index of the first smallest (or largest) key.
pub fn extreme_index(keys: &[Value], largest: bool) -> Result<Option<usize>> {
    let mut best: Option<usize> = None;
    for (i, key) in keys.iter().enumerate() {
        match best {
            None => best = Some(i),
            Some(b) => {
                let ord = compare(key, &keys[b])?;
                let better = if largest {
                    ord == Ordering::Greater
                } else {
                    ord == Ordering::Less
                };
                if better {
                    best = Some(i);
                }
            }
        }
    }
    Ok(best)
}

fn no_attribute(receiver: &Value, name: &str) -> Error {
    Error::script(format!(
        "AttributeError: '{}' object has no attribute '{}'",
        type_name(receiver),
        name
    ))
}

/// Call method `name` on `receiver`, mutating it in place where the method
/// does.
pub fn call_method(receiver: &mut Value, name: &str, args: Args) -> Result<Value> {
    match receiver {
        Value::String(s) => string_method(s, name, args),
        Value::Array(items) => list_method(items, name, args),
        Value::Object(map) => dict_method(map, name, args),
        other => Err(no_attribute(other, name)),
    }
}

fn prefix_list(value: &Value, func: &str) -> Result<Vec<String>> {
    match value {
        Value::String(s) => Ok(vec![s.clone()]),
        Value::Array(items) => items
            .iter()
            .map(|v| string_arg(v, func).map(str::to_string))
            .collect(),
        other => Err(type_error(format!(
            "{} first arg must be str or a tuple of str, not {}",
            func,
            type_name(other)
        ))),
    }
}

fn string_method(s: &str, name: &str, mut args: Args) -> Result<Value> {
    let text = |t: String| Ok(Value::String(t));
    match name {
        "lower" => {
            args.check(name, 0, 0)?;
            text(s.to_lowercase())
        }
        "upper" => {
            args.check(name, 0, 0)?;
            text(s.to_uppercase())
        }
        "title" => {
            args.check(name, 0, 0)?;
            let mut out = String::with_capacity(s.len());
            let mut start = true;
            for c in s.chars() {
                if c.is_alphabetic() {
                    if start {
                        out.extend(c.to_uppercase());
                    } else {
                        out.extend(c.to_lowercase());
                    }
                    start = false;
                } else {
                    out.push(c);
                    start = true;
                }
            }
            text(out)
        }
        "capitalize" => {
            args.check(name, 0, 0)?;
            let mut chars = s.chars();
            let out = match chars.next() {
                Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
                None => String::new(),
            };
            text(out)
        }
        "strip" | "lstrip" | "rstrip" => {
            args.check(name, 0, 1)?;
            let chars: Option<Vec<char>> = match args.positional.first() {
                None | Some(Value::Null) => None,
                Some(v) => Some(string_arg(v, name)?.chars().collect()),
            };
            let matches = |c: char| match &chars {
                Some(set) => set.contains(&c),
                None => c.is_whitespace(),
            };
            text(match name {
                "strip" => s.trim_matches(matches).to_string(),
                "lstrip" => s.trim_start_matches(matches).to_string(),
                _ => s.trim_end_matches(matches).to_string(),
            })
        }
        "split" => {
            let sep = args.take(0, "sep").filter(|v| !v.is_null());
            let maxsplit = match args.take(1, "maxsplit") {
                Some(v) => as_int(&v, "maxsplit")?,
                None => -1,
            };
            args.positional.truncate(0);
            args.check(name, 0, 0)?;
            let limit = usize::try_from(maxsplit).ok();
            let parts: Vec<String> = match &sep {
                Some(sep) => {
                    let sep = string_arg(sep, name)?;
                    if sep.is_empty() {
                        return Err(value_error("empty separator"));
                    }
                    match limit {
                        Some(n) => s.splitn(n + 1, sep).map(str::to_string).collect(),
                        None => s.split(sep).map(str::to_string).collect(),
                    }
                }
                None => {
                    let words: Vec<&str> = s.split_whitespace().collect();
                    match limit {
                        Some(n) if n < words.len() => {
                            let mut out: Vec<String> =
                                words[..n].iter().map(|w| w.to_string()).collect();
                            let mut rest = s.trim_start();
                            for _ in 0..n {
                                rest = rest
                                    .trim_start()
                                    .split_once(char::is_whitespace)
                                    .map(|(_, r)| r)
                                    .unwrap_or("");
                            }
                            out.push(rest.trim_start().to_string());
                            out
                        }
                        _ => words.into_iter().map(str::to_string).collect(),
                    }
                }
            };
            Ok(Value::Array(parts.into_iter().map(Value::String).collect()))
        }
        "splitlines" => {
            args.check(name, 0, 0)?;
            Ok(Value::Array(
                s.lines().map(|l| Value::String(l.to_string())).collect(),
            ))
        }
        "join" => {
            args.check(name, 1, 1)?;
            let items = iterate(arg(&args, 0))?;
            let parts = items
                .iter()
                .map(|v| {
                    v.as_str().map(str::to_string).ok_or_else(|| {
                        type_error(format!(
                            "sequence item: expected str instance, {} found",
                            type_name(v)
                        ))
                    })
                })
                .collect::<Result<Vec<_>>>()?;
            let joined = parts.join(s);
            check_len(joined.len())?;
            text(joined)
        }
        "startswith" | "endswith" => {
            args.check(name, 1, 1)?;
            let prefixes = prefix_list(arg(&args, 0), name)?;
            let hit = prefixes.iter().any(|p| {
                if name == "startswith" {
                    s.starts_with(p.as_str())
                } else {
                    s.ends_with(p.as_str())
                }
            });
            Ok(Value::Bool(hit))
        }
        "replace" => {
            args.check(name, 2, 2)?;
            let old = string_arg(arg(&args, 0), name)?;
            let new = string_arg(arg(&args, 1), name)?;
            let replaced = s.replace(old, new);
            check_len(replaced.len())?;
            text(replaced)
        }
        "find" => {
            args.check(name, 1, 1)?;
            let needle = string_arg(arg(&args, 0), name)?;
            let index = s
                .find(needle)
                .map(|byte| s[..byte].chars().count() as i64)
                .unwrap_or(-1);
            Ok(Value::from(index))
        }
        "count" => {
            args.check(name, 1, 1)?;
            let needle = string_arg(arg(&args, 0), name)?;
            let n = if needle.is_empty() {
                s.chars().count() + 1
            } else {
                s.matches(needle).count()
            };
            Ok(Value::from(n))
        }
        "isdigit" => {
            args.check(name, 0, 0)?;
            Ok(Value::Bool(
                !s.is_empty() && s.chars().all(|c| c.is_ascii_digit()),
            ))
        }
        _ => Err(no_attribute(&Value::String(String::new()), name)),
    }
}

fn list_method(items: &mut Vec<Value>, name: &str, mut args: Args) -> Result<Value> {
    match name {
        "append" => {
            args.check(name, 1, 1)?;
            check_len(items.len() + 1)?;
            items.push(args.positional.remove(0));
            Ok(Value::Null)
        }
        "extend" => {
            args.check(name, 1, 1)?;
            let more = iterate(arg(&args, 0))?;
            check_len(items.len() + more.len())?;
            items.extend(more);
            Ok(Value::Null)
        }
        "insert" => {
            args.check(name, 2, 2)?;
            check_len(items.len() + 1)?;
            let index = as_int(arg(&args, 0), "insert index")?;
            let len = items.len() as i64;
            let at = if index < 0 { (index + len).max(0) } else { index.min(len) };
            items.insert(at as usize, args.positional.remove(1));
            Ok(Value::Null)
        }
        "pop" => {
            args.check(name, 0, 1)?;
            if items.is_empty() {
                return Err(Error::script("IndexError: pop from empty list"));
            }
            let index = match args.positional.first() {
                Some(v) => as_int(v, "pop index")?,
                None => -1,
            };
            let at = value::normalize_index(items.len(), index)
                .ok_or_else(|| Error::script("IndexError: pop index out of range"))?;
            Ok(items.remove(at))
        }
        "remove" => {
            args.check(name, 1, 1)?;
            let target = arg(&args, 0);
            let at = items
                .iter()
                .position(|v| equals(v, target))
                .ok_or_else(|| value_error("list.remove(x): x not in list"))?;
            items.remove(at);
            Ok(Value::Null)
        }
        "index" => {
            args.check(name, 1, 1)?;
            let target = arg(&args, 0);
            items
                .iter()
                .position(|v| equals(v, target))
                .map(Value::from)
                .ok_or_else(|| value_error(format!("{} is not in list", value::repr(target))))
        }
        "count" => {
            args.check(name, 1, 1)?;
            let target = arg(&args, 0);
            Ok(Value::from(items.iter().filter(|v| equals(v, target)).count()))
        }
        "copy" => {
            args.check(name, 0, 0)?;
            Ok(Value::Array(items.clone()))
        }
        "reverse" => {
            args.check(name, 0, 0)?;
            items.reverse();
            Ok(Value::Null)
        }
        "clear" => {
            args.check(name, 0, 0)?;
            items.clear();
            Ok(Value::Null)
        }
        "sort" => {
            let reverse = args.take_keyword("reverse").is_some_and(|v| truthy(&v));
            args.check(name, 0, 0)?;
            *items = sort_by_keys(items.clone(), items.clone(), reverse)?;
            Ok(Value::Null)
        }
        _ => Err(no_attribute(&Value::Array(Vec::new()), name)),
    }
}

fn dict_method(map: &mut Map<String, Value>, name: &str, mut args: Args) -> Result<Value> {
    let key_of = |v: &Value| -> Option<String> { v.as_str().map(str::to_string) };
    match name {
        "get" => {
            args.check(name, 1, 2)?;
            let default = args.positional.get(1).cloned().unwrap_or(Value::Null);
            Ok(key_of(arg(&args, 0))
                .and_then(|k| map.get(&k).cloned())
                .unwrap_or(default))
        }
        "keys" => {
            args.check(name, 0, 0)?;
            Ok(Value::Array(map.keys().cloned().map(Value::String).collect()))
        }
        "values" => {
            args.check(name, 0, 0)?;
            Ok(Value::Array(map.values().cloned().collect()))
        }
        "items" => {
            args.check(name, 0, 0)?;
            Ok(Value::Array(
                map.iter()
                    .map(|(k, v)| Value::Array(vec![Value::String(k.clone()), v.clone()]))
                    .collect(),
            ))
        }
        "update" => {
            let keywords = std::mem::take(&mut args.keywords);
            args.check(name, 0, 1)?;
            match args.positional.first() {
                None => {}
                Some(Value::Object(other)) => map.extend(other.clone()),
                Some(other) => map.extend(pairs_to_map(other)?),
            }
            map.extend(keywords);
            check_len(map.len())?;
            Ok(Value::Null)
        }
        "pop" => {
            args.check(name, 1, 2)?;
            let key = arg(&args, 0);
            match key_of(key).and_then(|k| map.remove(&k)) {
                Some(v) => Ok(v),
                None => args
                    .positional
                    .get(1)
                    .cloned()
                    .ok_or_else(|| Error::script(format!("KeyError: {}", value::repr(key)))),
            }
        }
        "setdefault" => {
            args.check(name, 1, 2)?;
            let key = key_of(arg(&args, 0)).ok_or_else(|| type_error("dict keys must be strings"))?;
            let default = args.positional.get(1).cloned().unwrap_or(Value::Null);
            Ok(map.entry(key).or_insert(default).clone())
        }
        "copy" => {
            args.check(name, 0, 0)?;
            Ok(Value::Object(map.clone()))
        }
        "clear" => {
            args.check(name, 0, 0)?;
            map.clear();
            Ok(Value::Null)
        }
        _ => Err(no_attribute(&Value::Object(Map::new()), name)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn call(name: &str, positional: Vec<Value>) -> Result<Value> {
        call_builtin(name, Args::new(positional, Vec::new()), 1000)
    }

    fn method(receiver: Value, name: &str, positional: Vec<Value>) -> (Value, Result<Value>) {
        let mut receiver = receiver;
        let out = call_method(&mut receiver, name, Args::new(positional, Vec::new()));
        (receiver, out)
    }

    #[test]
    fn test_conversions() {
        assert_eq!(call("int", vec![json!(" 42 ")]).unwrap(), json!(42));
        assert_eq!(call("int", vec![json!(-3.9)]).unwrap(), json!(-3));
        assert_eq!(call("float", vec![json!("2.5")]).unwrap(), json!(2.5));
        assert_eq!(call("str", vec![json!([1, "a"])]).unwrap(), json!("[1, 'a']"));
        assert_eq!(call("bool", vec![json!("")]).unwrap(), json!(false));
        assert!(call("int", vec![json!("x")]).is_err());
    }

    #[test]
    fn test_round_half_even() {
        assert_eq!(call("round", vec![json!(2.5)]).unwrap(), json!(2));
        assert_eq!(call("round", vec![json!(3.5)]).unwrap(), json!(4));
        assert_eq!(
            call("round", vec![json!(0.756), json!(2)]).unwrap(),
            json!(0.76)
        );
    }

    #[test]
    fn test_range_bounds() {
        assert_eq!(call("range", vec![json!(3)]).unwrap(), json!([0, 1, 2]));
        assert_eq!(
            call("range", vec![json!(5), json!(0), json!(-2)]).unwrap(),
            json!([5, 3, 1])
        );
        assert!(call("range", vec![json!(1001)]).is_err());
        assert!(call("range", vec![json!(0), json!(5), json!(0)]).is_err());
    }

    #[test]
    fn test_iterable_builtins() {
        assert_eq!(
            call("enumerate", vec![json!(["a", "b"])]).unwrap(),
            json!([[0, "a"], [1, "b"]])
        );
        assert_eq!(
            call("zip", vec![json!([1, 2, 3]), json!(["x", "y"])]).unwrap(),
            json!([[1, "x"], [2, "y"]])
        );
        assert_eq!(call("sum", vec![json!([0.5, 1, 2])]).unwrap(), json!(3.5));
        assert_eq!(call("any", vec![json!([0, "", 3])]).unwrap(), json!(true));
        assert_eq!(call("all", vec![json!([])]).unwrap(), json!(true));
        assert_eq!(
            call("dict", vec![json!([["a", 1], ["b", 2]])]).unwrap(),
            json!({"a": 1, "b": 2})
        );
        assert!(call("len", vec![json!(3)]).is_err());
        assert!(call("sum", vec![json!(["a"])]).is_err());
    }

    #[test]
    fn test_arity_messages() {
        let err = call("len", vec![]).unwrap_err();
        assert!(err.to_string().contains("len() takes exactly 1 argument (0 given)"));
    }

    #[test]
    fn test_string_methods() {
        let (_, out) = method(json!("  Dark Mode "), "strip", vec![]);
        assert_eq!(out.unwrap(), json!("Dark Mode"));

        let (_, out) = method(json!("a,b,,c"), "split", vec![json!(",")]);
        assert_eq!(out.unwrap(), json!(["a", "b", "", "c"]));

        let (_, out) = method(json!(" one  two three "), "split", vec![]);
        assert_eq!(out.unwrap(), json!(["one", "two", "three"]));

        let (_, out) = method(json!(", "), "join", vec![json!(["x", "y"])]);
        assert_eq!(out.unwrap(), json!("x, y"));

        let (_, out) = method(json!("report.md"), "endswith", vec![json!([".txt", ".md"])]);
        assert_eq!(out.unwrap(), json!(true));

        let (_, out) = method(json!("héllo"), "find", vec![json!("l")]);
        assert_eq!(out.unwrap(), json!(2));

        let (_, out) = method(json!("x"), "nope", vec![]);
        assert!(out
            .unwrap_err()
            .to_string()
            .contains("'str' object has no attribute 'nope'"));
    }

    #[test]
    fn test_split_maxsplit() {
        let mut receiver = json!("a b  c d");
        let out = call_method(
            &mut receiver,
            "split",
            Args::new(vec![], vec![("maxsplit".into(), json!(1))]),
        )
        .unwrap();
        assert_eq!(out, json!(["a", "b  c d"]));
    }

    #[test]
    fn test_list_methods_mutate() {
        let (list, _) = method(json!([1]), "append", vec![json!(2)]);
        assert_eq!(list, json!([1, 2]));

        let (list, out) = method(json!([1, 2, 3]), "pop", vec![]);
        assert_eq!(out.unwrap(), json!(3));
        assert_eq!(list, json!([1, 2]));

        let (list, _) = method(json!([3, 1, 2]), "sort", vec![]);
        assert_eq!(list, json!([1, 2, 3]));

        let (_, out) = method(json!([]), "pop", vec![]);
        assert!(out.is_err());
    }

    #[test]
    fn test_dict_methods() {
        let (_, out) = method(json!({"a": 1}), "get", vec![json!("b"), json!(0)]);
        assert_eq!(out.unwrap(), json!(0));

        let (_, out) = method(json!({"b": 2, "a": 1}), "items", vec![]);
        assert_eq!(out.unwrap(), json!([["a", 1], ["b", 2]]));

        let (map, _) = method(json!({"a": 1}), "update", vec![json!({"b": 2})]);
        assert_eq!(map, json!({"a": 1, "b": 2}));

        let (map, out) = method(json!({}), "setdefault", vec![json!("k"), json!([])]);
        assert_eq!(out.unwrap(), json!([]));
        assert_eq!(map, json!({"k": []}));
    }

    #[test]
    fn test_sort_and_extremes() {
        let sorted = sort_by_keys(
            vec![json!("b"), json!("a"), json!("c")],
            vec![json!(2), json!(1), json!(2)],
            true,
        )
        .unwrap();
        assert_eq!(sorted, vec![json!("b"), json!("c"), json!("a")]);

        assert_eq!(
            extreme_index(&[json!(3), json!(7), json!(7)], true).unwrap(),
            Some(1)
        );
        assert_eq!(extreme_index(&[], false).unwrap(), None);
        assert!(sort_by_keys(vec![json!(1), json!("a")], vec![json!(1), json!("a")], false).is_err());
    }
}
