//! # Expression Evaluator
//!
//! Walks an expression tree against the current row. Operator precedence
//! was already settled by the parser's Shunting-Yard pass, so evaluation
//! is a plain recursive descent: dispatch on the operator and the operand
//! tags, with the coercion rules of the language (string/list `+`, float
//! division, null-tolerant lookups).

use crate::ast::{BinaryOp, Expr, FStringPart, LookupKey, UnaryOp};
use crate::error::{Error, Result};
use crate::graph::evaluate_pattern_expression;
use crate::pipeline::ExecCtx;
use crate::value::{compare_values, values_equal, Record, Value};

/// Expression evaluator bound to an execution context. `agg` carries the
/// per-group reducer results while an aggregating projection is emitted;
/// `locals` holds comprehension/predicate iteration variables.
pub struct Evaluator<'a, 'c> {
    ctx: &'a ExecCtx<'c>,
    agg: Option<&'a [Value]>,
    locals: Vec<(String, Value)>,
}

impl<'a, 'c> Evaluator<'a, 'c> {
    pub fn new(ctx: &'a ExecCtx<'c>) -> Self {
        Evaluator {
            ctx,
            agg: None,
            locals: Vec::new(),
        }
    }

    /// Evaluator for emitting an aggregated projection: aggregate call
    /// sites resolve to their reducer results by slot.
    pub fn with_aggregates(ctx: &'a ExecCtx<'c>, agg: &'a [Value]) -> Self {
        Evaluator {
            ctx,
            agg: Some(agg),
            locals: Vec::new(),
        }
    }

    pub fn eval(&mut self, expr: &Expr, row: &Record) -> Result<Value> {
        match expr {
            Expr::Null => Ok(Value::Null),
            Expr::Bool(b) => Ok(Value::Bool(*b)),
            Expr::Int(i) => Ok(Value::Int(*i)),
            Expr::Float(f) => Ok(Value::Float(*f)),
            Expr::Str(s) => Ok(Value::String(s.clone())),
            Expr::Array(items) => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    out.push(self.eval(item, row)?);
                }
                Ok(Value::List(out))
            }
            Expr::Map(pairs) => {
                let mut out = Record::new();
                for (key, value) in pairs {
                    out.insert(key.clone(), self.eval(value, row)?);
                }
                Ok(Value::Map(out))
            }
            Expr::Reference(name) => self.resolve(name, row),
            Expr::Grouped(inner) => self.eval(inner, row),
            Expr::Unary { op, operand } => {
                let value = self.eval(operand, row)?;
                match op {
                    UnaryOp::Not => Ok(Value::Bool(!value.is_truthy())),
                    UnaryOp::Negate => value.negate(),
                }
            }
            Expr::Binary { op, left, right } => self.eval_binary(*op, left, right, row),
            Expr::Lookup { base, key } => {
                let value = self.eval(base, row)?;
                self.eval_lookup(&value, key, row)
            }
            Expr::Case { branches, fallback } => {
                for (when, then) in branches {
                    if self.eval(when, row)?.is_truthy() {
                        return self.eval(then, row);
                    }
                }
                match fallback {
                    Some(f) => self.eval(f, row),
                    None => Ok(Value::Null),
                }
            }
            Expr::FString(parts) => {
                let mut out = String::new();
                for part in parts {
                    match part {
                        FStringPart::Literal(s) => out.push_str(s),
                        FStringPart::Interpolation(e) => {
                            out.push_str(&self.eval(e, row)?.to_string());
                        }
                    }
                }
                Ok(Value::String(out))
            }
            Expr::ListComprehension {
                var,
                array,
                filter,
                map,
            } => {
                let source = self.eval(array, row)?;
                let Value::List(items) = source else {
                    return Err(Error::Eval("Expected array for list comprehension".into()));
                };
                let mut out = Vec::new();
                for item in items {
                    self.locals.push((var.clone(), item.clone()));
                    let keep = match filter {
                        Some(f) => self.eval(f, row)?.is_truthy(),
                        None => true,
                    };
                    let mapped = if keep {
                        Some(match map {
                            Some(m) => self.eval(m, row)?,
                            None => item,
                        })
                    } else {
                        None
                    };
                    self.locals.pop();
                    if let Some(v) = mapped {
                        out.push(v);
                    }
                }
                Ok(Value::List(out))
            }
            Expr::PredicateReduce {
                function,
                var,
                array,
                map,
                filter,
            } => {
                let source = self.eval(array, row)?;
                let Value::List(items) = source else {
                    return Err(Error::Eval(format!(
                        "Invalid array for {function} function"
                    )));
                };
                let mut reducer = self.ctx.funcs.reducer(function, false)?;
                for item in items {
                    self.locals.push((var.clone(), item.clone()));
                    let keep = match filter {
                        Some(f) => self.eval(f, row)?.is_truthy(),
                        None => true,
                    };
                    let value = if keep {
                        Some(match map {
                            Some(m) => self.eval(m, row)?,
                            None => item,
                        })
                    } else {
                        None
                    };
                    self.locals.pop();
                    if let Some(v) = value {
                        reducer.reduce(v);
                    }
                }
                let result = reducer.finish();
                // An empty inline sum is 0, unlike the grouped aggregate.
                if function == "sum" && result.is_null() {
                    return Ok(Value::Int(0));
                }
                Ok(result)
            }
            Expr::FunctionCall {
                name,
                args,
                agg_slot,
                ..
            } => {
                if let Some(slot) = agg_slot {
                    if let Some(agg) = self.agg {
                        return Ok(agg
                            .get(*slot)
                            .cloned()
                            .unwrap_or(Value::Null));
                    }
                    return Err(Error::Eval(format!(
                        "Aggregate function {name} used outside an aggregating projection"
                    )));
                }
                if self.ctx.funcs.kind(name) == Some(crate::functions::FunctionKind::Aggregate) {
                    return Err(Error::Eval(format!(
                        "Aggregate function {name} used outside an aggregating projection"
                    )));
                }
                let mut values = Vec::with_capacity(args.len());
                for arg in args {
                    values.push(self.eval(arg, row)?);
                }
                self.ctx.funcs.eval_scalar(name, &values)
            }
            Expr::PatternExpression(pattern) => Ok(Value::Bool(evaluate_pattern_expression(
                self.ctx, pattern, row,
            )?)),
        }
    }

    fn resolve(&self, name: &str, row: &Record) -> Result<Value> {
        for (local, value) in self.locals.iter().rev() {
            if local == name {
                return Ok(value.clone());
            }
        }
        row.get(name)
            .cloned()
            .ok_or_else(|| Error::UndefinedIdentifier(name.to_string()))
    }

    fn eval_binary(
        &mut self,
        op: BinaryOp,
        left: &Expr,
        right: &Expr,
        row: &Record,
    ) -> Result<Value> {
        // Logical operators short-circuit.
        match op {
            BinaryOp::And => {
                if !self.eval(left, row)?.is_truthy() {
                    return Ok(Value::Bool(false));
                }
                return Ok(Value::Bool(self.eval(right, row)?.is_truthy()));
            }
            BinaryOp::Or => {
                if self.eval(left, row)?.is_truthy() {
                    return Ok(Value::Bool(true));
                }
                return Ok(Value::Bool(self.eval(right, row)?.is_truthy()));
            }
            _ => {}
        }

        let l = self.eval(left, row)?;
        let r = self.eval(right, row)?;
        match op {
            BinaryOp::Add => l.add(&r),
            BinaryOp::Subtract => l.subtract(&r),
            BinaryOp::Multiply => l.multiply(&r),
            BinaryOp::Divide => l.divide(&r),
            BinaryOp::Modulo => l.modulo(&r),
            BinaryOp::Power => l.power(&r),
            BinaryOp::Equals => Ok(Value::Bool(values_equal(&l, &r))),
            BinaryOp::NotEquals => Ok(Value::Bool(!values_equal(&l, &r))),
            BinaryOp::LessThan => Ok(Value::Bool(
                compare_values(&l, &r) == std::cmp::Ordering::Less,
            )),
            BinaryOp::LessThanOrEqual => Ok(Value::Bool(
                compare_values(&l, &r) != std::cmp::Ordering::Greater,
            )),
            BinaryOp::GreaterThan => Ok(Value::Bool(
                compare_values(&l, &r) == std::cmp::Ordering::Greater,
            )),
            BinaryOp::GreaterThanOrEqual => Ok(Value::Bool(
                compare_values(&l, &r) != std::cmp::Ordering::Less,
            )),
            BinaryOp::Is => Ok(Value::Bool(if r.is_null() {
                l.is_null()
            } else {
                values_equal(&l, &r)
            })),
            BinaryOp::IsNot => Ok(Value::Bool(if r.is_null() {
                !l.is_null()
            } else {
                !values_equal(&l, &r)
            })),
            BinaryOp::In | BinaryOp::NotIn => {
                let Value::List(items) = &r else {
                    return Err(Error::Eval("IN requires a list on the right-hand side".into()));
                };
                let contained = items.iter().any(|item| values_equal(&l, item));
                Ok(Value::Bool(if op == BinaryOp::In {
                    contained
                } else {
                    !contained
                }))
            }
            BinaryOp::Contains
            | BinaryOp::NotContains
            | BinaryOp::StartsWith
            | BinaryOp::NotStartsWith
            | BinaryOp::EndsWith
            | BinaryOp::NotEndsWith => {
                let (Value::String(a), Value::String(b)) = (&l, &r) else {
                    return Err(Error::Eval(format!(
                        "String operator applied to {} and {}",
                        l.type_name(),
                        r.type_name()
                    )));
                };
                let result = match op {
                    BinaryOp::Contains => a.contains(b.as_str()),
                    BinaryOp::NotContains => !a.contains(b.as_str()),
                    BinaryOp::StartsWith => a.starts_with(b.as_str()),
                    BinaryOp::NotStartsWith => !a.starts_with(b.as_str()),
                    BinaryOp::EndsWith => a.ends_with(b.as_str()),
                    _ => !a.ends_with(b.as_str()),
                };
                Ok(Value::Bool(result))
            }
            BinaryOp::And | BinaryOp::Or => unreachable!("handled above"),
        }
    }

    fn eval_lookup(&mut self, base: &Value, key: &LookupKey, row: &Record) -> Result<Value> {
        match key {
            LookupKey::Field(name) => match base {
                Value::Null => Ok(Value::Null),
                Value::Map(m) => Ok(m.get(name).cloned().unwrap_or(Value::Null)),
                other => Err(Error::Eval(format!(
                    "Cannot look up '{name}' on {}",
                    other.type_name()
                ))),
            },
            LookupKey::Index(index) => {
                let idx = self.eval(index, row)?;
                match (base, &idx) {
                    (Value::Null, _) => Ok(Value::Null),
                    (Value::Map(m), Value::String(k)) => {
                        Ok(m.get(k).cloned().unwrap_or(Value::Null))
                    }
                    (Value::List(items), _) => {
                        let Some(i) = idx.as_integer() else {
                            return Err(Error::Eval("List index must be an integer".into()));
                        };
                        let len = items.len() as i64;
                        let i = if i < 0 { i + len } else { i };
                        if i < 0 || i >= len {
                            Ok(Value::Null)
                        } else {
                            Ok(items[i as usize].clone())
                        }
                    }
                    (other, _) => Err(Error::Eval(format!(
                        "Cannot index into {}",
                        other.type_name()
                    ))),
                }
            }
            LookupKey::Slice { start, end } => {
                let start = match start {
                    Some(e) => Some(self.eval(e, row)?),
                    None => None,
                };
                let end = match end {
                    Some(e) => Some(self.eval(e, row)?),
                    None => None,
                };
                match base {
                    Value::Null => Ok(Value::Null),
                    Value::List(items) => {
                        let len = items.len() as i64;
                        let clamp = |v: Option<Value>, default: i64| -> Result<i64> {
                            match v {
                                None => Ok(default),
                                Some(v) => {
                                    let Some(i) = v.as_integer() else {
                                        return Err(Error::Eval(
                                            "Slice bounds must be integers".into(),
                                        ));
                                    };
                                    let i = if i < 0 { i + len } else { i };
                                    Ok(i.clamp(0, len))
                                }
                            }
                        };
                        let lo = clamp(start, 0)?;
                        let hi = clamp(end, len)?;
                        if lo >= hi {
                            Ok(Value::List(Vec::new()))
                        } else {
                            Ok(Value::List(items[lo as usize..hi as usize].to_vec()))
                        }
                    }
                    other => Err(Error::Eval(format!(
                        "Cannot slice {}",
                        other.type_name()
                    ))),
                }
            }
        }
    }
}
