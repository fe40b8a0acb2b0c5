//! # Function Registry
//!
//! Name → function table for everything callable from a query: scalar
//! builtins, aggregate reducers (also usable as inline predicate reducers),
//! and generator functions driven by CALL. Names are case-insensitive;
//! the registry is populated once at construction and only grows when the
//! embedder registers plugin generators.

pub mod aggregate;
pub mod scalar;
pub mod temporal;

use std::collections::HashMap;
use std::rc::Rc;

use crate::error::{Error, Result};
use crate::pipeline::ExecCtx;
use crate::value::Value;

pub use aggregate::Reducer;

/// How a registered function participates in evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FunctionKind {
    Scalar,
    Aggregate,
    Generator,
}

/// Declared parameter count of a function.
#[derive(Debug, Clone, Copy)]
pub enum Arity {
    Exact(usize),
    Between(usize, usize),
    Variadic,
}

impl Arity {
    fn check(&self, name: &str, got: usize) -> Result<()> {
        let ok = match *self {
            Arity::Exact(n) => got == n,
            Arity::Between(lo, hi) => got >= lo && got <= hi,
            Arity::Variadic => true,
        };
        if ok {
            return Ok(());
        }
        let expected = match *self {
            Arity::Exact(n) => n.to_string(),
            Arity::Between(lo, hi) => format!("{lo} or {hi}"),
            Arity::Variadic => unreachable!(),
        };
        Err(Error::Parse(format!(
            "Function {name} expected {expected} parameters, but got {got}"
        )))
    }
}

type ScalarFn = fn(&[Value]) -> Result<Value>;

struct ScalarSpec {
    arity: Arity,
    eval: ScalarFn,
}

struct AggregateSpec {
    supports_distinct: bool,
}

/// A CALL-able generator: yields a sequence of records. The `schema()`
/// builtin and user plugins implement this.
pub trait GeneratorFunction {
    /// Expected parameter count; `None` means variadic.
    fn arity(&self) -> Option<usize> {
        Some(0)
    }

    /// Produce the record sequence. Runs to completion; the pipeline drives
    /// downstream operations once per yielded record.
    fn generate(&self, ctx: &ExecCtx, args: &[Value]) -> Result<Vec<Value>>;
}

/// The function table.
pub struct Registry {
    scalars: HashMap<String, ScalarSpec>,
    aggregates: HashMap<String, AggregateSpec>,
    generators: HashMap<String, Rc<dyn GeneratorFunction>>,
}

impl Registry {
    /// Registry with every builtin registered.
    pub fn with_builtins() -> Self {
        let mut reg = Registry {
            scalars: HashMap::new(),
            aggregates: HashMap::new(),
            generators: HashMap::new(),
        };

        // Scalar builtins
        reg.scalar("coalesce", Arity::Variadic, scalar::coalesce);
        reg.scalar("head", Arity::Exact(1), scalar::head);
        reg.scalar("tail", Arity::Exact(1), scalar::tail);
        reg.scalar("last", Arity::Exact(1), scalar::last);
        reg.scalar("keys", Arity::Exact(1), scalar::keys);
        reg.scalar("properties", Arity::Exact(1), scalar::properties);
        reg.scalar("id", Arity::Exact(1), scalar::id);
        reg.scalar("elementid", Arity::Exact(1), scalar::element_id);
        reg.scalar("nodes", Arity::Exact(1), scalar::nodes);
        reg.scalar("relationships", Arity::Exact(1), scalar::relationships);
        reg.scalar("range", Arity::Exact(2), scalar::range);
        reg.scalar("size", Arity::Exact(1), scalar::size);
        reg.scalar("rand", Arity::Exact(0), scalar::rand_value);
        reg.scalar("round", Arity::Exact(1), scalar::round);
        reg.scalar("split", Arity::Exact(2), scalar::split);
        reg.scalar("replace", Arity::Exact(3), scalar::replace);
        reg.scalar("trim", Arity::Exact(1), scalar::trim);
        reg.scalar("substring", Arity::Between(2, 3), scalar::substring);
        reg.scalar("stringify", Arity::Exact(1), scalar::stringify);
        reg.scalar("tojson", Arity::Exact(1), scalar::to_json);
        reg.scalar("tostring", Arity::Exact(1), scalar::to_string);
        reg.scalar("tolower", Arity::Exact(1), scalar::to_lower);
        reg.scalar("tofloat", Arity::Exact(1), scalar::to_float);
        reg.scalar("tointeger", Arity::Exact(1), scalar::to_integer);
        reg.scalar("join", Arity::Exact(2), scalar::join);
        reg.scalar("type", Arity::Exact(1), scalar::type_of);
        reg.scalar("string_distance", Arity::Exact(2), scalar::string_distance);

        // Temporal builtins
        reg.scalar("date", Arity::Between(0, 1), temporal::date);
        reg.scalar("datetime", Arity::Between(0, 1), temporal::datetime);
        reg.scalar("time", Arity::Between(0, 1), temporal::time);
        reg.scalar("localdatetime", Arity::Between(0, 1), temporal::localdatetime);
        reg.scalar("localtime", Arity::Between(0, 1), temporal::localtime);
        reg.scalar("timestamp", Arity::Exact(0), temporal::timestamp);
        reg.scalar("duration", Arity::Exact(1), temporal::duration);

        // Aggregates (also usable as inline predicate reducers)
        reg.aggregate("sum", false);
        reg.aggregate("avg", false);
        reg.aggregate("min", false);
        reg.aggregate("max", false);
        reg.aggregate("count", true);
        reg.aggregate("collect", true);

        // Generator builtins
        reg.register_generator("schema", Rc::new(crate::database::SchemaFunction));

        reg
    }

    fn scalar(&mut self, name: &str, arity: Arity, eval: ScalarFn) {
        self.scalars.insert(name.to_string(), ScalarSpec { arity, eval });
    }

    fn aggregate(&mut self, name: &str, supports_distinct: bool) {
        self.aggregates
            .insert(name.to_string(), AggregateSpec { supports_distinct });
    }

    /// Register a generator function under `name` (lower-cased). Later
    /// registrations replace earlier ones.
    pub fn register_generator(&mut self, name: &str, function: Rc<dyn GeneratorFunction>) {
        self.generators.insert(name.to_lowercase(), function);
    }

    /// Kind of a registered function, if any. Lookup is case-insensitive.
    pub fn kind(&self, name: &str) -> Option<FunctionKind> {
        let key = name.to_lowercase();
        if self.aggregates.contains_key(&key) {
            Some(FunctionKind::Aggregate)
        } else if self.scalars.contains_key(&key) {
            Some(FunctionKind::Scalar)
        } else if self.generators.contains_key(&key) {
            Some(FunctionKind::Generator)
        } else {
            None
        }
    }

    /// Validate a call's parameter count against the declared arity.
    pub fn check_arity(&self, name: &str, got: usize) -> Result<()> {
        let key = name.to_lowercase();
        if let Some(spec) = self.scalars.get(&key) {
            return spec.arity.check(&key, got);
        }
        if self.aggregates.contains_key(&key) {
            return Arity::Exact(1).check(&key, got);
        }
        if let Some(generator) = self.generators.get(&key) {
            if let Some(expected) = generator.arity() {
                return Arity::Exact(expected).check(&key, got);
            }
            return Ok(());
        }
        Err(Error::Parse(format!("Unknown function: {name}")))
    }

    /// Whether `count(DISTINCT …)`-style modifiers are accepted.
    pub fn supports_distinct(&self, name: &str) -> bool {
        self.aggregates
            .get(&name.to_lowercase())
            .is_some_and(|s| s.supports_distinct)
    }

    /// Evaluate a scalar builtin.
    pub fn eval_scalar(&self, name: &str, args: &[Value]) -> Result<Value> {
        let key = name.to_lowercase();
        let spec = self
            .scalars
            .get(&key)
            .ok_or_else(|| Error::Eval(format!("Unknown function: {name}")))?;
        (spec.eval)(args)
    }

    /// Fresh reducer element for an aggregate function.
    pub fn reducer(&self, name: &str, distinct: bool) -> Result<Box<dyn Reducer>> {
        let key = name.to_lowercase();
        if !self.aggregates.contains_key(&key) {
            return Err(Error::Eval(format!("Unknown aggregate function: {name}")));
        }
        Ok(aggregate::make_reducer(&key, distinct))
    }

    /// Generator function lookup for CALL.
    pub fn generator(&self, name: &str) -> Option<Rc<dyn GeneratorFunction>> {
        self.generators.get(&name.to_lowercase()).cloned()
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::with_builtins()
    }
}
