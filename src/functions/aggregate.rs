//! Aggregate reducer elements.
//!
//! An aggregating WITH or RETURN keeps one reducer element per aggregate
//! function per group; the pipeline feeds it one value per input row and
//! reads the result at finish. The same reducers back the inline predicate
//! form (`sum(x IN xs | …)`).

use std::collections::HashSet;

use crate::value::{compare_values, Value};

/// Per-group accumulator produced by an aggregate function.
pub trait Reducer {
    /// Fold one value into the accumulator.
    fn reduce(&mut self, value: Value);

    /// Current aggregate result.
    fn finish(&self) -> Value;
}

/// Build a reducer element for an aggregate function name (already
/// lower-cased). `distinct` only changes behaviour for count and collect.
pub fn make_reducer(name: &str, distinct: bool) -> Box<dyn Reducer> {
    match (name, distinct) {
        ("sum", _) => Box::new(SumReducer::default()),
        ("avg", _) => Box::new(AvgReducer::default()),
        ("min", _) => Box::new(MinMaxReducer::new(false)),
        ("max", _) => Box::new(MinMaxReducer::new(true)),
        ("count", false) => Box::new(CountReducer::default()),
        ("count", true) => Box::new(DistinctCountReducer::default()),
        ("collect", false) => Box::new(CollectReducer::default()),
        ("collect", true) => Box::new(DistinctCollectReducer::default()),
        _ => unreachable!("unregistered aggregate {name}"),
    }
}

/// Sum over the fed values with `+` semantics (numbers add, strings and
/// lists concatenate). Null inputs are skipped; an all-null group sums to
/// null.
#[derive(Default)]
pub struct SumReducer {
    acc: Option<Value>,
}

impl Reducer for SumReducer {
    fn reduce(&mut self, value: Value) {
        if value.is_null() {
            return;
        }
        self.acc = Some(match self.acc.take() {
            None => value,
            // A failing addition poisons the group result to null rather
            // than aborting the whole pipeline mid-aggregation.
            Some(acc) => acc.add(&value).unwrap_or(Value::Null),
        });
    }

    fn finish(&self) -> Value {
        self.acc.clone().unwrap_or(Value::Null)
    }
}

/// Arithmetic mean over numeric inputs; null inputs are skipped.
#[derive(Default)]
pub struct AvgReducer {
    sum: f64,
    count: usize,
}

impl Reducer for AvgReducer {
    fn reduce(&mut self, value: Value) {
        if let Some(n) = value.as_number() {
            self.sum += n;
            self.count += 1;
        }
    }

    fn finish(&self) -> Value {
        if self.count == 0 {
            Value::Null
        } else {
            Value::Float(self.sum / self.count as f64)
        }
    }
}

/// Minimum or maximum under the value ordering; null inputs are skipped.
pub struct MinMaxReducer {
    maximum: bool,
    acc: Option<Value>,
}

impl MinMaxReducer {
    pub fn new(maximum: bool) -> Self {
        MinMaxReducer { maximum, acc: None }
    }
}

impl Reducer for MinMaxReducer {
    fn reduce(&mut self, value: Value) {
        if value.is_null() {
            return;
        }
        match &self.acc {
            None => self.acc = Some(value),
            Some(current) => {
                let ord = compare_values(&value, current);
                let replace = if self.maximum {
                    ord == std::cmp::Ordering::Greater
                } else {
                    ord == std::cmp::Ordering::Less
                };
                if replace {
                    self.acc = Some(value);
                }
            }
        }
    }

    fn finish(&self) -> Value {
        self.acc.clone().unwrap_or(Value::Null)
    }
}

/// Counts every fed value, nulls included.
#[derive(Default)]
pub struct CountReducer {
    count: i64,
}

impl Reducer for CountReducer {
    fn reduce(&mut self, _value: Value) {
        self.count += 1;
    }

    fn finish(&self) -> Value {
        Value::Int(self.count)
    }
}

/// Counts distinct values by canonical JSON form.
#[derive(Default)]
pub struct DistinctCountReducer {
    seen: HashSet<String>,
}

impl Reducer for DistinctCountReducer {
    fn reduce(&mut self, value: Value) {
        self.seen.insert(value.canonical());
    }

    fn finish(&self) -> Value {
        Value::Int(self.seen.len() as i64)
    }
}

/// Collects every fed value into a list, in arrival order.
#[derive(Default)]
pub struct CollectReducer {
    items: Vec<Value>,
}

impl Reducer for CollectReducer {
    fn reduce(&mut self, value: Value) {
        self.items.push(value);
    }

    fn finish(&self) -> Value {
        Value::List(self.items.clone())
    }
}

/// Collects distinct values, keeping first-occurrence order.
#[derive(Default)]
pub struct DistinctCollectReducer {
    seen: HashSet<String>,
    items: Vec<Value>,
}

impl Reducer for DistinctCollectReducer {
    fn reduce(&mut self, value: Value) {
        if self.seen.insert(value.canonical()) {
            self.items.push(value);
        }
    }

    fn finish(&self) -> Value {
        Value::List(self.items.clone())
    }
}
