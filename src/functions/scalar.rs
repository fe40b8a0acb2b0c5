//! Scalar builtin functions.
//!
//! Each builtin is a plain function over evaluated argument values. Null
//! handling follows the language rules: most functions propagate null
//! rather than erroring, while genuine type mismatches fail evaluation.

use rand::Rng;

use crate::error::{Error, Result};
use crate::value::{Record, Value};

/// First non-null argument, or null.
pub fn coalesce(args: &[Value]) -> Result<Value> {
    if args.is_empty() {
        return Err(Error::Eval("coalesce() requires at least one argument".into()));
    }
    Ok(args
        .iter()
        .find(|v| !v.is_null())
        .cloned()
        .unwrap_or(Value::Null))
}

/// First element of a list; null for null or empty input.
pub fn head(args: &[Value]) -> Result<Value> {
    match &args[0] {
        Value::Null => Ok(Value::Null),
        Value::List(l) => Ok(l.first().cloned().unwrap_or(Value::Null)),
        _ => Err(Error::Eval("head() expects a list".into())),
    }
}

/// Everything after the first element.
pub fn tail(args: &[Value]) -> Result<Value> {
    match &args[0] {
        Value::Null => Ok(Value::Null),
        Value::List(l) => Ok(Value::List(l.iter().skip(1).cloned().collect())),
        _ => Err(Error::Eval("tail() expects a list".into())),
    }
}

/// Last element of a list; null for null or empty input.
pub fn last(args: &[Value]) -> Result<Value> {
    match &args[0] {
        Value::Null => Ok(Value::Null),
        Value::List(l) => Ok(l.last().cloned().unwrap_or(Value::Null)),
        _ => Err(Error::Eval("last() expects a list".into())),
    }
}

/// Keys of a map, in insertion order.
pub fn keys(args: &[Value]) -> Result<Value> {
    match &args[0] {
        Value::Null => Ok(Value::Null),
        Value::Map(m) => Ok(Value::List(
            m.keys().map(|k| Value::String(k.clone())).collect(),
        )),
        _ => Err(Error::Eval("keys() expects a map".into())),
    }
}

/// Whether a map is shaped like a relationship match record.
fn is_relationship_record(m: &Record) -> bool {
    ["type", "startNode", "endNode", "properties"]
        .iter()
        .all(|k| m.contains_key(*k))
}

/// Properties of a node, relationship, or plain map. Internal identifiers
/// are excluded for nodes; relationship records expose their property map.
pub fn properties(args: &[Value]) -> Result<Value> {
    match &args[0] {
        Value::Null => Ok(Value::Null),
        Value::Map(m) => {
            if is_relationship_record(m) {
                return Ok(m.get("properties").cloned().unwrap_or(Value::Null));
            }
            if m.contains_key("id") {
                return Ok(Value::Map(
                    m.iter()
                        .filter(|(k, _)| k.as_str() != "id")
                        .map(|(k, v)| (k.clone(), v.clone()))
                        .collect(),
                ));
            }
            Ok(Value::Map(m.clone()))
        }
        _ => Err(Error::Eval(
            "properties() expects a node, relationship, or map".into(),
        )),
    }
}

/// Identity of a node (its `id` column) or relationship (its type).
pub fn id(args: &[Value]) -> Result<Value> {
    match &args[0] {
        Value::Null => Ok(Value::Null),
        Value::Map(m) => {
            if is_relationship_record(m) {
                return Ok(m.get("type").cloned().unwrap_or(Value::Null));
            }
            m.get("id")
                .cloned()
                .ok_or_else(|| Error::Eval("id() expects a node or relationship".into()))
        }
        _ => Err(Error::Eval("id() expects a node or relationship".into())),
    }
}

/// Element identity; aligned with `id()` for virtual records.
pub fn element_id(args: &[Value]) -> Result<Value> {
    id(args)
}

/// Node records of a path (every path element that is not shaped like a
/// relationship record).
pub fn nodes(args: &[Value]) -> Result<Value> {
    match &args[0] {
        Value::Null => Ok(Value::List(Vec::new())),
        Value::List(path) => Ok(Value::List(
            path.iter()
                .filter(|v| matches!(v, Value::Map(m) if !is_relationship_record(m)))
                .cloned()
                .collect(),
        )),
        _ => Err(Error::Eval("nodes() expects a path (array)".into())),
    }
}

/// Relationship records of a path.
pub fn relationships(args: &[Value]) -> Result<Value> {
    match &args[0] {
        Value::Null => Ok(Value::List(Vec::new())),
        Value::List(path) => Ok(Value::List(
            path.iter()
                .filter(|v| matches!(v, Value::Map(m) if is_relationship_record(m)))
                .cloned()
                .collect(),
        )),
        _ => Err(Error::Eval("relationships() expects a path (array)".into())),
    }
}

/// Inclusive integer range.
pub fn range(args: &[Value]) -> Result<Value> {
    let (start, end) = match (args[0].as_integer(), args[1].as_integer()) {
        (Some(a), Some(b)) => (a, b),
        _ => return Err(Error::Eval("range() expects integer bounds".into())),
    };
    Ok(Value::List((start..=end).map(Value::Int).collect()))
}

/// Element count of a list, character count of a string, entry count of a
/// map.
pub fn size(args: &[Value]) -> Result<Value> {
    match &args[0] {
        Value::Null => Ok(Value::Null),
        Value::List(l) => Ok(Value::Int(l.len() as i64)),
        Value::String(s) => Ok(Value::Int(s.chars().count() as i64)),
        Value::Map(m) => Ok(Value::Int(m.len() as i64)),
        other => Err(Error::Eval(format!(
            "size() expects a list, string, or map, got {}",
            other.type_name()
        ))),
    }
}

/// Uniform random float in `[0, 1)`.
pub fn rand_value(_args: &[Value]) -> Result<Value> {
    Ok(Value::Float(rand::thread_rng().gen::<f64>()))
}

/// Round to the nearest integer (halves away from zero).
pub fn round(args: &[Value]) -> Result<Value> {
    match &args[0] {
        Value::Null => Ok(Value::Null),
        v => match v.as_number() {
            Some(n) => Ok(Value::Int(n.round() as i64)),
            None => Err(Error::Eval("round() expects a number".into())),
        },
    }
}

/// Split a string on a separator.
pub fn split(args: &[Value]) -> Result<Value> {
    match (&args[0], &args[1]) {
        (Value::Null, _) => Ok(Value::Null),
        (Value::String(s), Value::String(sep)) => Ok(Value::List(
            s.split(sep.as_str())
                .map(|p| Value::String(p.to_string()))
                .collect(),
        )),
        _ => Err(Error::Eval("split() expects two strings".into())),
    }
}

/// Replace every occurrence of a substring.
pub fn replace(args: &[Value]) -> Result<Value> {
    match (&args[0], &args[1], &args[2]) {
        (Value::Null, _, _) => Ok(Value::Null),
        (Value::String(s), Value::String(from), Value::String(to)) => {
            Ok(Value::String(s.replace(from.as_str(), to)))
        }
        _ => Err(Error::Eval("replace() expects three strings".into())),
    }
}

/// Strip leading and trailing whitespace.
pub fn trim(args: &[Value]) -> Result<Value> {
    match &args[0] {
        Value::Null => Ok(Value::Null),
        Value::String(s) => Ok(Value::String(s.trim().to_string())),
        _ => Err(Error::Eval("trim() expects a string".into())),
    }
}

/// Zero-based substring with optional length; indexes clamp to the string.
pub fn substring(args: &[Value]) -> Result<Value> {
    let original = match &args[0] {
        Value::Null => return Ok(Value::Null),
        Value::String(s) => s,
        _ => {
            return Err(Error::Eval(
                "Invalid argument for substring function: expected a string as the first argument"
                    .into(),
            ))
        }
    };
    let start = args[1].as_integer().ok_or_else(|| {
        Error::Eval(
            "Invalid argument for substring function: expected an integer as the second argument"
                .into(),
        )
    })?;
    let chars: Vec<char> = original.chars().collect();
    let start = (start.max(0) as usize).min(chars.len());
    let end = if let Some(len_arg) = args.get(2) {
        let len = len_arg.as_integer().ok_or_else(|| {
            Error::Eval(
                "Invalid argument for substring function: expected an integer as the third argument"
                    .into(),
            )
        })?;
        (start + len.max(0) as usize).min(chars.len())
    } else {
        chars.len()
    };
    Ok(Value::String(chars[start..end].iter().collect()))
}

/// Pretty JSON rendering with three-space indentation.
pub fn stringify(args: &[Value]) -> Result<Value> {
    let json = args[0].to_json();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"   ");
    let mut out = Vec::new();
    let mut serializer = serde_json::Serializer::with_formatter(&mut out, formatter);
    serde::Serialize::serialize(&json, &mut serializer)?;
    Ok(Value::String(String::from_utf8_lossy(&out).into_owned()))
}

/// Parse a JSON string into a value.
pub fn to_json(args: &[Value]) -> Result<Value> {
    match &args[0] {
        Value::Null => Ok(Value::Null),
        Value::String(s) => {
            let parsed: serde_json::Value = serde_json::from_str(s)
                .map_err(|e| Error::Eval(format!("tojson() could not parse input: {e}")))?;
            Ok(Value::from_json(&parsed))
        }
        _ => Err(Error::Eval("tojson() expects a string".into())),
    }
}

/// Human-readable string form; booleans render as true/false, collections
/// as compact JSON.
pub fn to_string(args: &[Value]) -> Result<Value> {
    match &args[0] {
        Value::Null => Ok(Value::Null),
        v => Ok(Value::String(v.to_string())),
    }
}

/// Lower-case a string.
pub fn to_lower(args: &[Value]) -> Result<Value> {
    match &args[0] {
        Value::Null => Ok(Value::Null),
        Value::String(s) => Ok(Value::String(s.to_lowercase())),
        _ => Err(Error::Eval("tolower() expects a string".into())),
    }
}

/// Coerce to a float; unparseable strings yield null.
pub fn to_float(args: &[Value]) -> Result<Value> {
    match &args[0] {
        Value::Null => Ok(Value::Null),
        Value::Int(i) => Ok(Value::Float(*i as f64)),
        Value::Float(f) => Ok(Value::Float(*f)),
        Value::Bool(b) => Ok(Value::Float(if *b { 1.0 } else { 0.0 })),
        Value::String(s) => Ok(s
            .trim()
            .parse::<f64>()
            .map_or(Value::Null, Value::Float)),
        _ => Ok(Value::Null),
    }
}

/// Coerce to an integer (floats truncate); unparseable strings yield null.
pub fn to_integer(args: &[Value]) -> Result<Value> {
    match &args[0] {
        Value::Null => Ok(Value::Null),
        Value::Int(i) => Ok(Value::Int(*i)),
        Value::Float(f) => Ok(Value::Int(*f as i64)),
        Value::Bool(b) => Ok(Value::Int(i64::from(*b))),
        Value::String(s) => {
            let trimmed = s.trim();
            if let Ok(i) = trimmed.parse::<i64>() {
                Ok(Value::Int(i))
            } else if let Ok(f) = trimmed.parse::<f64>() {
                Ok(Value::Int(f as i64))
            } else {
                Ok(Value::Null)
            }
        }
        _ => Ok(Value::Null),
    }
}

/// Join a list of strings with a separator.
pub fn join(args: &[Value]) -> Result<Value> {
    match (&args[0], &args[1]) {
        (Value::Null, _) => Ok(Value::Null),
        (Value::List(items), Value::String(sep)) => {
            let mut parts = Vec::with_capacity(items.len());
            for item in items {
                match item {
                    Value::String(s) => parts.push(s.clone()),
                    other => {
                        return Err(Error::Eval(format!(
                            "join() expects a list of strings, found {}",
                            other.type_name()
                        )))
                    }
                }
            }
            Ok(Value::String(parts.join(sep)))
        }
        _ => Err(Error::Eval("join() expects a list and a separator".into())),
    }
}

/// Type tag of a value.
pub fn type_of(args: &[Value]) -> Result<Value> {
    Ok(Value::String(args[0].type_name().to_string()))
}

/// Normalised Levenshtein distance in `[0, 1]`; 0 means identical.
pub fn string_distance(args: &[Value]) -> Result<Value> {
    let (a, b) = match (&args[0], &args[1]) {
        (Value::String(a), Value::String(b)) => (a, b),
        _ => {
            return Err(Error::Eval(
                "Invalid arguments for string_distance function: both arguments must be strings"
                    .into(),
            ))
        }
    };
    Ok(Value::Float(levenshtein_normalised(a, b)))
}

fn levenshtein_normalised(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let (m, n) = (a.len(), b.len());
    if m == 0 && n == 0 {
        return 0.0;
    }
    let mut prev: Vec<usize> = (0..=n).collect();
    let mut current = vec![0usize; n + 1];
    for i in 1..=m {
        current[0] = i;
        for j in 1..=n {
            let cost = usize::from(a[i - 1] != b[j - 1]);
            current[j] = (prev[j] + 1)
                .min(current[j - 1] + 1)
                .min(prev[j - 1] + cost);
        }
        std::mem::swap(&mut prev, &mut current);
    }
    prev[n] as f64 / m.max(n) as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_coalesce() {
        assert_eq!(
            coalesce(&[Value::Null, Value::Null, Value::from("x")]).unwrap(),
            Value::from("x")
        );
        assert_eq!(coalesce(&[Value::Null]).unwrap(), Value::Null);
    }

    #[test]
    fn test_head_tail_last() {
        let list = Value::List(vec![Value::Int(1), Value::Int(2), Value::Int(3)]);
        assert_eq!(head(std::slice::from_ref(&list)).unwrap(), Value::Int(1));
        assert_eq!(
            tail(std::slice::from_ref(&list)).unwrap(),
            Value::List(vec![Value::Int(2), Value::Int(3)])
        );
        assert_eq!(last(std::slice::from_ref(&list)).unwrap(), Value::Int(3));
        assert_eq!(head(&[Value::List(Vec::new())]).unwrap(), Value::Null);
        assert_eq!(head(&[Value::Null]).unwrap(), Value::Null);
    }

    #[test]
    fn test_range_inclusive() {
        assert_eq!(
            range(&[Value::Int(1), Value::Int(3)]).unwrap(),
            Value::List(vec![Value::Int(1), Value::Int(2), Value::Int(3)])
        );
    }

    #[test]
    fn test_substring_clamps() {
        let s = Value::from("hello");
        assert_eq!(
            substring(&[s.clone(), Value::Int(1), Value::Int(3)]).unwrap(),
            Value::from("ell")
        );
        assert_eq!(
            substring(&[s.clone(), Value::Int(2)]).unwrap(),
            Value::from("llo")
        );
        assert_eq!(
            substring(&[s, Value::Int(1), Value::Int(100)]).unwrap(),
            Value::from("ello")
        );
    }

    #[test]
    fn test_string_distance() {
        let d = string_distance(&[Value::from("kitten"), Value::from("sitting")]).unwrap();
        match d {
            Value::Float(f) => assert!((f - 3.0 / 7.0).abs() < 1e-9),
            other => panic!("expected float, got {other:?}"),
        }
        assert_eq!(
            string_distance(&[Value::from(""), Value::from("abc")]).unwrap(),
            Value::Float(1.0)
        );
        assert_eq!(
            string_distance(&[Value::from(""), Value::from("")]).unwrap(),
            Value::Float(0.0)
        );
    }

    #[test]
    fn test_stringify_indents_with_three_spaces() {
        let mut m = Record::new();
        m.insert("a".to_string(), Value::Int(1));
        let out = stringify(&[Value::Map(m)]).unwrap();
        assert_eq!(out, Value::from("{\n   \"a\": 1\n}"));
    }

    #[test]
    fn test_properties_strips_node_id() {
        let mut m = Record::new();
        m.insert("id".to_string(), Value::Int(1));
        m.insert("name".to_string(), Value::from("Dog"));
        let out = properties(&[Value::Map(m)]).unwrap();
        let mut expected = Record::new();
        expected.insert("name".to_string(), Value::from("Dog"));
        assert_eq!(out, Value::Map(expected));
    }

    #[test]
    fn test_to_integer_conversions() {
        assert_eq!(to_integer(&[Value::from("42")]).unwrap(), Value::Int(42));
        assert_eq!(to_integer(&[Value::Float(3.9)]).unwrap(), Value::Int(3));
        assert_eq!(to_integer(&[Value::Bool(true)]).unwrap(), Value::Int(1));
        assert_eq!(to_integer(&[Value::from("nope")]).unwrap(), Value::Null);
    }
}
