//! # Value Type System
//!
//! Core tagged value for query evaluation: Null, Bool, Int, Float, String,
//! List, Map. Records (result rows, node and relationship data) are ordered
//! maps so that `keys()`, UNION column comparison and aggregation group
//! emission stay deterministic.
//!
//! ## Usage
//!
//! ```rust
//! use flowquery::value::{Record, Value};
//!
//! let mut rec = Record::new();
//! rec.insert("id".to_string(), Value::Int(1));
//! rec.insert("name".to_string(), Value::String("Alice".into()));
//! assert_eq!(rec["name"], Value::String("Alice".into()));
//! ```

use std::cmp::Ordering;
use std::fmt;

use indexmap::IndexMap;

use crate::error::{Error, Result};

/// Ordered column → value mapping. Used both for result rows and for the
/// records backing virtual nodes and relationships.
pub type Record = IndexMap<String, Value>;

/// A dynamically typed query value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    List(Vec<Value>),
    Map(Record),
}

impl Value {
    /// True when the value is `Null`.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Truthiness as used by WHERE, CASE and logical operators: null, false,
    /// zero and empty collections are falsy.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::Float(f) => *f != 0.0,
            Value::String(s) => !s.is_empty(),
            Value::List(l) => !l.is_empty(),
            Value::Map(m) => !m.is_empty(),
        }
    }

    /// Numeric view of the value, coercing booleans to 0/1.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            _ => None,
        }
    }

    /// Integer view, accepting floats with no fractional part.
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::Float(f) if f.fract() == 0.0 => Some(*f as i64),
            Value::Bool(b) => Some(i64::from(*b)),
            _ => None,
        }
    }

    /// One-word tag name, as reported by the `type()` builtin.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Int(_) | Value::Float(_) => "number",
            Value::String(_) => "string",
            Value::List(_) => "array",
            Value::Map(_) => "object",
        }
    }

    /// Canonical JSON rendering with sorted map keys. This is the identity
    /// used by DISTINCT, UNION deduplication and `count(DISTINCT ...)`.
    pub fn canonical(&self) -> String {
        match self {
            Value::Map(m) => {
                let mut keys: Vec<&String> = m.keys().collect();
                keys.sort();
                let mut out = String::from("{");
                for (i, k) in keys.iter().enumerate() {
                    if i > 0 {
                        out.push(',');
                    }
                    out.push_str(&serde_json::to_string(k).unwrap_or_default());
                    out.push(':');
                    out.push_str(&m[*k].canonical());
                }
                out.push('}');
                out
            }
            Value::List(l) => {
                let mut out = String::from("[");
                for (i, v) in l.iter().enumerate() {
                    if i > 0 {
                        out.push(',');
                    }
                    out.push_str(&v.canonical());
                }
                out.push(']');
                out
            }
            other => other.to_json().to_string(),
        }
    }

    /// Convert into a `serde_json` value (map order preserved).
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Int(i) => serde_json::Value::from(*i),
            Value::Float(f) => serde_json::Number::from_f64(*f)
                .map_or(serde_json::Value::Null, serde_json::Value::Number),
            Value::String(s) => serde_json::Value::String(s.clone()),
            Value::List(l) => serde_json::Value::Array(l.iter().map(Value::to_json).collect()),
            Value::Map(m) => {
                let mut obj = serde_json::Map::new();
                for (k, v) in m {
                    obj.insert(k.clone(), v.to_json());
                }
                serde_json::Value::Object(obj)
            }
        }
    }

    /// Build a value from a `serde_json` value. Integral JSON numbers map to
    /// `Int`, everything else numeric to `Float`.
    pub fn from_json(json: &serde_json::Value) -> Value {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(*b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Int(i)
                } else {
                    Value::Float(n.as_f64().unwrap_or(f64::NAN))
                }
            }
            serde_json::Value::String(s) => Value::String(s.clone()),
            serde_json::Value::Array(a) => Value::List(a.iter().map(Value::from_json).collect()),
            serde_json::Value::Object(o) => {
                let mut m = Record::new();
                for (k, v) in o {
                    m.insert(k.clone(), Value::from_json(v));
                }
                Value::Map(m)
            }
        }
    }

    /// Normalise a value for the record boundary: booleans become 1/0, and
    /// the conversion recurses into lists and maps.
    pub fn into_record_form(self) -> Value {
        match self {
            Value::Bool(b) => Value::Int(i64::from(b)),
            Value::List(l) => Value::List(l.into_iter().map(Value::into_record_form).collect()),
            Value::Map(m) => Value::Map(
                m.into_iter()
                    .map(|(k, v)| (k, v.into_record_form()))
                    .collect(),
            ),
            other => other,
        }
    }

    /// `+` with the language's coercions: number+number, string concat,
    /// list concat. Null on either side yields null.
    pub fn add(&self, other: &Value) -> Result<Value> {
        match (self, other) {
            (Value::Null, _) | (_, Value::Null) => Ok(Value::Null),
            (Value::Int(a), Value::Int(b)) => Ok(Value::Int(a + b)),
            (Value::String(a), Value::String(b)) => Ok(Value::String(format!("{a}{b}"))),
            (Value::List(a), Value::List(b)) => {
                let mut out = a.clone();
                out.extend(b.iter().cloned());
                Ok(Value::List(out))
            }
            (a, b) => match (a.as_number(), b.as_number()) {
                (Some(x), Some(y)) => Ok(Value::Float(x + y)),
                _ => Err(Error::Eval(format!(
                    "Cannot add {} and {}",
                    a.type_name(),
                    b.type_name()
                ))),
            },
        }
    }

    /// Numeric `-`.
    pub fn subtract(&self, other: &Value) -> Result<Value> {
        self.numeric_op(other, "subtract", |a, b| a - b, |a, b| a.checked_sub(b))
    }

    /// Numeric `*`.
    pub fn multiply(&self, other: &Value) -> Result<Value> {
        self.numeric_op(other, "multiply", |a, b| a * b, |a, b| a.checked_mul(b))
    }

    /// True division: always a float, like the source language.
    pub fn divide(&self, other: &Value) -> Result<Value> {
        match (self, other) {
            (Value::Null, _) | (_, Value::Null) => Ok(Value::Null),
            (a, b) => match (a.as_number(), b.as_number()) {
                (Some(_), Some(y)) if y == 0.0 => Err(Error::Eval("Division by zero".into())),
                (Some(x), Some(y)) => Ok(Value::Float(x / y)),
                _ => Err(Error::Eval(format!(
                    "Cannot divide {} by {}",
                    a.type_name(),
                    b.type_name()
                ))),
            },
        }
    }

    /// Modulo; integral when both operands are integers.
    pub fn modulo(&self, other: &Value) -> Result<Value> {
        match (self, other) {
            (Value::Null, _) | (_, Value::Null) => Ok(Value::Null),
            (Value::Int(_), Value::Int(0)) => Err(Error::Eval("Division by zero".into())),
            (Value::Int(a), Value::Int(b)) => Ok(Value::Int(a % b)),
            (a, b) => match (a.as_number(), b.as_number()) {
                (Some(_), Some(y)) if y == 0.0 => Err(Error::Eval("Division by zero".into())),
                (Some(x), Some(y)) => Ok(Value::Float(x % y)),
                _ => Err(Error::Eval(format!(
                    "Cannot take {} modulo {}",
                    a.type_name(),
                    b.type_name()
                ))),
            },
        }
    }

    /// Exponentiation; integral for integer base with non-negative integer
    /// exponent, float otherwise.
    pub fn power(&self, other: &Value) -> Result<Value> {
        match (self, other) {
            (Value::Null, _) | (_, Value::Null) => Ok(Value::Null),
            (Value::Int(a), Value::Int(b)) if *b >= 0 && *b <= i64::from(u32::MAX) => a
                .checked_pow(*b as u32)
                .map(Value::Int)
                .ok_or_else(|| Error::Eval("Integer overflow in exponentiation".into())),
            (a, b) => match (a.as_number(), b.as_number()) {
                (Some(x), Some(y)) => Ok(Value::Float(x.powf(y))),
                _ => Err(Error::Eval(format!(
                    "Cannot raise {} to {}",
                    a.type_name(),
                    b.type_name()
                ))),
            },
        }
    }

    /// Unary numeric negation.
    pub fn negate(&self) -> Result<Value> {
        match self {
            Value::Null => Ok(Value::Null),
            Value::Int(i) => Ok(Value::Int(-i)),
            Value::Float(f) => Ok(Value::Float(-f)),
            other => Err(Error::Eval(format!("Cannot negate {}", other.type_name()))),
        }
    }

    fn numeric_op(
        &self,
        other: &Value,
        verb: &str,
        float_op: impl Fn(f64, f64) -> f64,
        int_op: impl Fn(i64, i64) -> Option<i64>,
    ) -> Result<Value> {
        match (self, other) {
            (Value::Null, _) | (_, Value::Null) => Ok(Value::Null),
            (Value::Int(a), Value::Int(b)) => int_op(*a, *b)
                .map(Value::Int)
                .ok_or_else(|| Error::Eval(format!("Integer overflow in {verb}"))),
            (a, b) => match (a.as_number(), b.as_number()) {
                (Some(x), Some(y)) => Ok(Value::Float(float_op(x, y))),
                _ => Err(Error::Eval(format!(
                    "Cannot {verb} {} and {}",
                    a.type_name(),
                    b.type_name()
                ))),
            },
        }
    }
}

/// Structural equality with numeric cross-type comparison (`1 = 1.0`,
/// `true = 1`). Nulls compare equal only to nulls.
pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Null, Value::Null) => true,
        (Value::Null, _) | (_, Value::Null) => false,
        (Value::String(x), Value::String(y)) => x == y,
        (Value::List(x), Value::List(y)) => {
            x.len() == y.len() && x.iter().zip(y).all(|(u, v)| values_equal(u, v))
        }
        (Value::Map(x), Value::Map(y)) => {
            x.len() == y.len()
                && x.iter()
                    .all(|(k, v)| y.get(k).is_some_and(|w| values_equal(v, w)))
        }
        (x, y) => match (x.as_number(), y.as_number()) {
            (Some(u), Some(v)) => u == v,
            _ => false,
        },
    }
}

/// Total ordering over values: null before everything, then numbers (with
/// booleans as 0/1), strings, lists elementwise, maps by canonical form.
/// Used by ORDER BY and by min/max reducers.
pub fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Null, Value::Null) => Ordering::Equal,
        (Value::Null, _) => Ordering::Less,
        (_, Value::Null) => Ordering::Greater,
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::List(x), Value::List(y)) => {
            for (u, v) in x.iter().zip(y.iter()) {
                let ord = compare_values(u, v);
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            x.len().cmp(&y.len())
        }
        (x, y) => match (x.as_number(), y.as_number()) {
            (Some(u), Some(v)) => u.partial_cmp(&v).unwrap_or(Ordering::Equal),
            _ => x.canonical().cmp(&y.canonical()),
        },
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(x) => write!(f, "{x}"),
            Value::String(s) => write!(f, "{s}"),
            other => write!(f, "{}", other.to_json()),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}
