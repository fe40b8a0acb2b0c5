//! # Operation Pipeline
//!
//! Executes a parsed statement: each operation drives the chain after it
//! once per row it produces. Aggregating WITH/RETURN operations hold rows
//! back, reduce them per group, and flush the groups downstream at finish
//! in first-appearance order. UNION combines independent sub-pipelines.
//!
//! Control flow between operations is a `Flow` value: `Stop` short-circuits
//! upstream enumeration once a downstream LIMIT has spent its budget.

use std::rc::Rc;

use indexmap::IndexMap;

use crate::ast::{
    DeleteTarget, Expr, LoadFormat, Op, Pattern, Pipeline, Projection, SortField, Statement,
    UnionKind,
};
use crate::database::Database;
use crate::error::{Error, Result};
use crate::eval::Evaluator;
use crate::functions::Registry;
use crate::graph::run_patterns;
use crate::loader::RecordLoader;
use crate::value::{compare_values, Record, Value};

/// Downstream control flow of one emission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Stop,
}

/// Everything an operation needs at run time: the session catalog, the
/// function registry, and the loader behind LOAD.
pub struct ExecCtx<'a> {
    pub db: &'a Database,
    pub funcs: &'a Registry,
    pub loader: &'a dyn RecordLoader,
}

/// Run a whole statement against a context and return its result records.
/// Virtual-handle materialisation re-enters this for the stored
/// sub-pipelines.
pub fn run_statement(statement: &Statement, ctx: &ExecCtx) -> Result<Vec<Record>> {
    let mut combined = execute_pipeline(&statement.first, ctx)?;
    for (kind, pipeline) in &statement.unions {
        let rhs = execute_pipeline(pipeline, ctx)?;
        if let (Some(left), Some(right)) = (combined.first(), rhs.first()) {
            let mut left_cols: Vec<&String> = left.keys().collect();
            let mut right_cols: Vec<&String> = right.keys().collect();
            left_cols.sort();
            right_cols.sort();
            if left_cols != right_cols {
                return Err(Error::Eval(
                    "All sub queries in a UNION must have the same return column names".into(),
                ));
            }
        }
        match kind {
            UnionKind::All => combined.extend(rhs),
            UnionKind::Distinct => {
                for row in rhs {
                    let candidate = Value::Map(row.clone()).canonical();
                    let duplicate = combined
                        .iter()
                        .any(|existing| Value::Map(existing.clone()).canonical() == candidate);
                    if !duplicate {
                        combined.push(row);
                    }
                }
            }
        }
    }
    Ok(combined)
}

fn execute_pipeline(pipeline: &Pipeline, ctx: &ExecCtx) -> Result<Vec<Record>> {
    let mut ops = pipeline
        .ops
        .iter()
        .map(OpExec::new)
        .collect::<Result<Vec<_>>>()?;
    let mut row = Record::new();
    run_ops(&mut ops, &mut row, ctx)?;
    finish_ops(&mut ops, ctx)?;
    Ok(take_results(&mut ops))
}

// ---------------------------------------------------------------------------
// Operation execution state
// ---------------------------------------------------------------------------

/// One aggregate call site of a projection list, in reducer-slot order.
struct AggSite<'a> {
    function: &'a str,
    distinct: bool,
    arg: Option<&'a Expr>,
}

fn collect_agg_sites<'a>(projections: &'a [Projection]) -> Vec<AggSite<'a>> {
    let mut sites: Vec<(usize, AggSite<'a>)> = Vec::new();
    for projection in projections {
        projection.expr.walk(&mut |expr| {
            if let Expr::FunctionCall {
                name,
                args,
                distinct,
                agg_slot: Some(slot),
            } = expr
            {
                sites.push((
                    *slot,
                    AggSite {
                        function: name.as_str(),
                        distinct: *distinct,
                        arg: args.first(),
                    },
                ));
            }
        });
    }
    sites.sort_by_key(|(slot, _)| *slot);
    sites.into_iter().map(|(_, site)| site).collect()
}

fn contains_aggregate(expr: &Expr) -> bool {
    let mut found = false;
    expr.walk(&mut |e| {
        if matches!(
            e,
            Expr::FunctionCall {
                agg_slot: Some(_),
                ..
            }
        ) {
            found = true;
        }
    });
    found
}

/// Grouped accumulation state shared by aggregating WITH and RETURN.
struct Aggregator<'a> {
    projections: &'a [Projection],
    sites: Vec<AggSite<'a>>,
    groups: IndexMap<String, Group>,
}

struct Group {
    /// Evaluated values of the non-aggregate projections
    key_values: Vec<Value>,
    /// First input row of the group, used as the scope when emitting
    /// aggregate-bearing projections
    snapshot: Record,
    reducers: Vec<Box<dyn crate::functions::Reducer>>,
}

impl<'a> Aggregator<'a> {
    fn new(projections: &'a [Projection]) -> Self {
        Aggregator {
            projections,
            sites: collect_agg_sites(projections),
            groups: IndexMap::new(),
        }
    }

    fn has_group_key(&self) -> bool {
        self.projections.iter().any(|p| !contains_aggregate(&p.expr))
    }

    fn accumulate(&mut self, row: &Record, ctx: &ExecCtx) -> Result<()> {
        let mut key_values = Vec::with_capacity(self.projections.len());
        let mut key = String::new();
        for projection in self.projections {
            if contains_aggregate(&projection.expr) {
                key_values.push(Value::Null);
            } else {
                let value = Evaluator::new(ctx).eval(&projection.expr, row)?;
                key.push_str(&value.canonical());
                key.push('\u{1f}');
                key_values.push(value);
            }
        }

        if !self.groups.contains_key(&key) {
            let reducers = self
                .sites
                .iter()
                .map(|site| ctx.funcs.reducer(site.function, site.distinct))
                .collect::<Result<Vec<_>>>()?;
            self.groups.insert(
                key.clone(),
                Group {
                    key_values,
                    snapshot: row.clone(),
                    reducers,
                },
            );
        }
        let group = self
            .groups
            .get_mut(&key)
            .expect("group inserted just above");
        for (site, reducer) in self.sites.iter().zip(group.reducers.iter_mut()) {
            let value = match site.arg {
                Some(arg) => Evaluator::new(ctx).eval(arg, row)?,
                None => Value::Null,
            };
            reducer.reduce(value);
        }
        Ok(())
    }

    /// Emit one projected row per group, in first-appearance order. With no
    /// grouping key and no input, a single global group is still emitted
    /// (`collect` of nothing is `[]`, `count` is 0).
    fn emit(&mut self, ctx: &ExecCtx) -> Result<Vec<Record>> {
        if self.groups.is_empty() && !self.has_group_key() {
            let reducers = self
                .sites
                .iter()
                .map(|site| ctx.funcs.reducer(site.function, site.distinct))
                .collect::<Result<Vec<_>>>()?;
            self.groups.insert(
                String::new(),
                Group {
                    key_values: vec![Value::Null; self.projections.len()],
                    snapshot: Record::new(),
                    reducers,
                },
            );
        }

        let mut rows = Vec::with_capacity(self.groups.len());
        for group in self.groups.values() {
            let agg_results: Vec<Value> = group.reducers.iter().map(|r| r.finish()).collect();
            let mut out = Record::new();
            for (i, projection) in self.projections.iter().enumerate() {
                let value = if contains_aggregate(&projection.expr) {
                    Evaluator::with_aggregates(ctx, &agg_results)
                        .eval(&projection.expr, &group.snapshot)?
                } else {
                    group.key_values[i].clone()
                };
                out.insert(projection.alias.clone(), value);
            }
            rows.push(out);
        }
        self.groups.clear();
        Ok(rows)
    }
}

enum OpExec<'a> {
    With {
        projections: &'a [Projection],
        distinct: bool,
        seen: std::collections::HashSet<String>,
        aggregator: Option<Aggregator<'a>>,
    },
    Unwind {
        expr: &'a Expr,
        alias: &'a str,
    },
    Match {
        patterns: &'a [Pattern],
        optional: bool,
    },
    Where {
        expr: &'a Expr,
    },
    Load {
        format: LoadFormat,
        url: &'a Expr,
        post: Option<&'a Expr>,
        headers: Option<&'a Expr>,
        alias: &'a str,
    },
    Call {
        function: &'a str,
        args: &'a [Expr],
        yields: &'a [(String, String)],
        results: Vec<Record>,
    },
    Limit {
        count: usize,
        seen: usize,
    },
    OrderBy,
    Return {
        projections: &'a [Projection],
        distinct: bool,
        filter: Option<&'a Expr>,
        order_by: &'a [SortField],
        limit: Option<usize>,
        aggregator: Option<Aggregator<'a>>,
        seen: std::collections::HashSet<String>,
        sort_keys: Vec<Vec<Value>>,
        results: Vec<Record>,
    },
    CreateNode {
        label: &'a str,
        statement: &'a Statement,
    },
    CreateRelationship {
        rel_type: &'a str,
        from_label: &'a str,
        to_label: &'a str,
        statement: &'a Statement,
    },
    Delete {
        target: &'a DeleteTarget,
    },
}

impl<'a> OpExec<'a> {
    fn new(op: &'a Op) -> Result<Self> {
        Ok(match op {
            Op::With {
                projections,
                distinct,
            } => {
                let aggregating = projections.iter().any(|p| contains_aggregate(&p.expr));
                OpExec::With {
                    projections,
                    distinct: *distinct,
                    seen: std::collections::HashSet::new(),
                    aggregator: aggregating.then(|| Aggregator::new(projections)),
                }
            }
            Op::Unwind { expr, alias } => OpExec::Unwind { expr, alias },
            Op::Match { patterns, optional } => OpExec::Match {
                patterns,
                optional: *optional,
            },
            Op::Where { expr } => OpExec::Where { expr },
            Op::Load {
                format,
                url,
                post,
                headers,
                alias,
            } => OpExec::Load {
                format: *format,
                url,
                post: post.as_ref(),
                headers: headers.as_ref(),
                alias,
            },
            Op::Call {
                function,
                args,
                yields,
            } => OpExec::Call {
                function,
                args,
                yields,
                results: Vec::new(),
            },
            Op::Limit { count } => OpExec::Limit {
                count: *count,
                seen: 0,
            },
            Op::OrderBy { .. } => OpExec::OrderBy,
            Op::Return {
                projections,
                distinct,
                filter,
                order_by,
                limit,
            } => {
                let aggregating = projections.iter().any(|p| contains_aggregate(&p.expr));
                OpExec::Return {
                    projections,
                    distinct: *distinct,
                    filter: filter.as_ref(),
                    order_by,
                    limit: *limit,
                    aggregator: aggregating.then(|| Aggregator::new(projections)),
                    seen: std::collections::HashSet::new(),
                    sort_keys: Vec::new(),
                    results: Vec::new(),
                }
            }
            Op::CreateNode { label, statement } => OpExec::CreateNode { label, statement },
            Op::CreateRelationship {
                rel_type,
                from_label,
                to_label,
                statement,
            } => OpExec::CreateRelationship {
                rel_type,
                from_label,
                to_label,
                statement,
            },
            Op::Delete { target } => OpExec::Delete { target },
        })
    }
}

// ---------------------------------------------------------------------------
// Pipeline drivers
// ---------------------------------------------------------------------------

fn run_ops(ops: &mut [OpExec], row: &mut Record, ctx: &ExecCtx) -> Result<Flow> {
    let Some((head, tail)) = ops.split_first_mut() else {
        return Ok(Flow::Continue);
    };
    match head {
        OpExec::With {
            projections,
            distinct,
            seen,
            aggregator,
        } => {
            if let Some(aggregator) = aggregator {
                aggregator.accumulate(row, ctx)?;
                return Ok(Flow::Continue);
            }
            let mut out = Record::new();
            for projection in projections.iter() {
                let value = Evaluator::new(ctx).eval(&projection.expr, row)?;
                out.insert(projection.alias.clone(), value);
            }
            if *distinct && !seen.insert(Value::Map(out.clone()).canonical()) {
                return Ok(Flow::Continue);
            }
            run_ops(tail, &mut out, ctx)
        }
        OpExec::Unwind { expr, alias } => {
            let source = Evaluator::new(ctx).eval(expr, row)?;
            let Value::List(items) = source else {
                return Err(Error::Eval("Expected array for UNWIND".into()));
            };
            for item in items {
                let mut out = row.clone();
                out.insert((*alias).to_string(), item);
                if run_ops(tail, &mut out, ctx)? == Flow::Stop {
                    return Ok(Flow::Stop);
                }
            }
            Ok(Flow::Continue)
        }
        OpExec::Match { patterns, optional } => {
            let mut matched = false;
            let flow = run_patterns(ctx, patterns, row, &mut |r| {
                matched = true;
                run_ops(tail, r, ctx)
            })?;
            if flow == Flow::Stop {
                return Ok(Flow::Stop);
            }
            if *optional && !matched {
                // Run the tail once with every variable the patterns
                // introduce set to null; variables bound upstream keep
                // their values.
                let mut restores: Vec<(String, Option<Value>)> = Vec::new();
                for pattern in patterns.iter() {
                    for var in pattern.variables() {
                        if row.contains_key(var) {
                            continue;
                        }
                        let old = row.insert(var.to_string(), Value::Null);
                        restores.push((var.to_string(), old));
                    }
                }
                let flow = run_ops(tail, row, ctx)?;
                for (name, old) in restores.into_iter().rev() {
                    match old {
                        Some(v) => {
                            row.insert(name, v);
                        }
                        None => {
                            row.shift_remove(&name);
                        }
                    }
                }
                return Ok(flow);
            }
            Ok(Flow::Continue)
        }
        OpExec::Where { expr } => {
            if Evaluator::new(ctx).eval(expr, row)?.is_truthy() {
                run_ops(tail, row, ctx)
            } else {
                Ok(Flow::Continue)
            }
        }
        OpExec::Load {
            format,
            url,
            post,
            headers,
            alias,
        } => {
            let url = match Evaluator::new(ctx).eval(url, row)? {
                Value::String(s) => s,
                other => {
                    return Err(Error::Load(format!(
                        "LOAD expects a string URL, got {}",
                        other.type_name()
                    )))
                }
            };
            let post = match post {
                Some(expr) => Some(Evaluator::new(ctx).eval(expr, row)?),
                None => None,
            };
            let headers = match headers {
                Some(expr) => Some(Evaluator::new(ctx).eval(expr, row)?),
                None => None,
            };
            let records = ctx
                .loader
                .load(*format, &url, post.as_ref(), headers.as_ref())?;
            for record in records {
                let mut out = row.clone();
                out.insert((*alias).to_string(), record);
                if run_ops(tail, &mut out, ctx)? == Flow::Stop {
                    return Ok(Flow::Stop);
                }
            }
            Ok(Flow::Continue)
        }
        OpExec::Call {
            function,
            args,
            yields,
            results,
        } => {
            let generator = ctx
                .funcs
                .generator(function)
                .ok_or_else(|| Error::Eval(format!("Unknown function: {function}")))?;
            let mut values = Vec::with_capacity(args.len());
            for arg in args.iter() {
                values.push(Evaluator::new(ctx).eval(arg, row)?);
            }
            let records = generator.generate(ctx, &values)?;
            for record in records {
                if yields.is_empty() {
                    // Trailing CALL without YIELD: whole records become rows.
                    match record {
                        Value::Map(m) => results.push(
                            m.into_iter()
                                .map(|(k, v)| (k, v.into_record_form()))
                                .collect(),
                        ),
                        other => {
                            let mut m = Record::new();
                            m.insert("value".into(), other.into_record_form());
                            results.push(m);
                        }
                    }
                    continue;
                }
                let mut out = row.clone();
                for (column, alias) in yields.iter() {
                    let value = match &record {
                        Value::Map(m) => m.get(column).cloned().unwrap_or(Value::Null),
                        _ => Value::Null,
                    };
                    out.insert(alias.clone(), value);
                }
                if tail.is_empty() {
                    results.push(
                        out.into_iter()
                            .map(|(k, v)| (k, v.into_record_form()))
                            .collect(),
                    );
                } else if run_ops(tail, &mut out, ctx)? == Flow::Stop {
                    return Ok(Flow::Stop);
                }
            }
            Ok(Flow::Continue)
        }
        OpExec::Limit { count, seen } => {
            if *seen >= *count {
                return Ok(Flow::Stop);
            }
            *seen += 1;
            let flow = run_ops(tail, row, ctx)?;
            if flow == Flow::Stop {
                return Ok(Flow::Stop);
            }
            // The budget is spent: stop upstream enumeration.
            if *seen >= *count {
                return Ok(Flow::Stop);
            }
            Ok(Flow::Continue)
        }
        OpExec::OrderBy => run_ops(tail, row, ctx),
        OpExec::Return {
            projections,
            distinct,
            filter,
            order_by,
            limit,
            aggregator,
            seen,
            sort_keys,
            results,
        } => {
            if let Some(filter) = filter {
                if !Evaluator::new(ctx).eval(filter, row)?.is_truthy() {
                    return Ok(Flow::Continue);
                }
            }
            if let Some(aggregator) = aggregator {
                aggregator.accumulate(row, ctx)?;
                return Ok(Flow::Continue);
            }
            let mut record = Record::new();
            for projection in projections.iter() {
                let value = Evaluator::new(ctx).eval(&projection.expr, row)?;
                record.insert(projection.alias.clone(), value.into_record_form());
            }
            if *distinct && !seen.insert(Value::Map(record.clone()).canonical()) {
                return Ok(Flow::Continue);
            }
            if order_by.is_empty() {
                if let Some(limit) = limit {
                    if results.len() >= *limit {
                        return Ok(Flow::Stop);
                    }
                }
                results.push(record);
                if let Some(limit) = limit {
                    if results.len() >= *limit {
                        return Ok(Flow::Stop);
                    }
                }
            } else {
                // Capture sort keys while the row scope is live; projected
                // aliases are visible to the sort expressions.
                let mut scope = row.clone();
                for (alias, value) in &record {
                    scope.insert(alias.clone(), value.clone());
                }
                let mut keys = Vec::with_capacity(order_by.len());
                for field in order_by.iter() {
                    keys.push(Evaluator::new(ctx).eval(&field.expr, &scope)?);
                }
                sort_keys.push(keys);
                results.push(record);
            }
            Ok(Flow::Continue)
        }
        OpExec::CreateNode { label, statement } => {
            ctx.db
                .register_node(label, Rc::new(Statement::clone(statement)));
            Ok(Flow::Continue)
        }
        OpExec::CreateRelationship {
            rel_type,
            from_label,
            to_label,
            statement,
        } => {
            ctx.db.register_relationship(
                rel_type,
                from_label,
                to_label,
                Rc::new(Statement::clone(statement)),
            );
            Ok(Flow::Continue)
        }
        OpExec::Delete { target } => {
            ctx.db.delete(target)?;
            Ok(Flow::Continue)
        }
    }
}

/// Propagate finish down the chain; aggregating operations flush their
/// groups downstream here.
fn finish_ops(ops: &mut [OpExec], ctx: &ExecCtx) -> Result<Flow> {
    let Some((head, tail)) = ops.split_first_mut() else {
        return Ok(Flow::Continue);
    };
    match head {
        OpExec::With {
            aggregator: Some(aggregator),
            distinct,
            seen,
            ..
        } => {
            let rows = aggregator.emit(ctx)?;
            for mut out in rows {
                if *distinct && !seen.insert(Value::Map(out.clone()).canonical()) {
                    continue;
                }
                if run_ops(tail, &mut out, ctx)? == Flow::Stop {
                    break;
                }
            }
            finish_ops(tail, ctx)
        }
        OpExec::Return {
            aggregator: Some(aggregator),
            distinct,
            seen,
            results,
            ..
        } => {
            let rows = aggregator.emit(ctx)?;
            for out in rows {
                let record: Record = out
                    .into_iter()
                    .map(|(k, v)| (k, v.into_record_form()))
                    .collect();
                if *distinct && !seen.insert(Value::Map(record.clone()).canonical()) {
                    continue;
                }
                results.push(record);
            }
            Ok(Flow::Continue)
        }
        _ => finish_ops(tail, ctx),
    }
}

/// Pull the final result set out of the last operation.
fn take_results(ops: &mut [OpExec]) -> Vec<Record> {
    let Some(last) = ops.last_mut() else {
        return Vec::new();
    };
    match last {
        OpExec::Return {
            results,
            order_by,
            sort_keys,
            limit,
            ..
        } => {
            let mut records = std::mem::take(results);
            if !order_by.is_empty() {
                let keys = std::mem::take(sort_keys);
                records = sort_records(records, order_by, &keys);
            }
            if let Some(limit) = limit {
                records.truncate(*limit);
            }
            records
        }
        OpExec::Call { results, .. } => std::mem::take(results),
        _ => Vec::new(),
    }
}

/// Stable multi-key sort. Pre-captured per-row keys are used when present
/// for every record; an aggregated RETURN instead resolves each sort field
/// as a projected-alias reference.
fn sort_records(
    records: Vec<Record>,
    order_by: &[SortField],
    captured: &[Vec<Value>],
) -> Vec<Record> {
    let use_captured = captured.len() == records.len();
    let fallback_fields: Vec<Option<&str>> = order_by
        .iter()
        .map(|field| match &field.expr {
            Expr::Reference(name) => Some(name.as_str()),
            _ => None,
        })
        .collect();

    let mut indices: Vec<usize> = (0..records.len()).collect();
    indices.sort_by(|&a, &b| {
        for (f, field) in order_by.iter().enumerate() {
            let (left, right) = if use_captured {
                (&captured[a][f], &captured[b][f])
            } else {
                match fallback_fields[f] {
                    Some(name) => (
                        records[a].get(name).unwrap_or(&Value::Null),
                        records[b].get(name).unwrap_or(&Value::Null),
                    ),
                    None => continue,
                }
            };
            let mut ord = compare_values(left, right);
            if field.descending {
                ord = ord.reverse();
            }
            if ord != std::cmp::Ordering::Equal {
                return ord;
            }
        }
        std::cmp::Ordering::Equal
    });
    indices.into_iter().map(|i| records[i].clone()).collect()
}

// ---------------------------------------------------------------------------
// Runner
// ---------------------------------------------------------------------------

/// Parses and executes one statement. Results are available from
/// [`Runner::results`] after [`Runner::run`].
pub struct Runner {
    statement: Statement,
    db: Rc<Database>,
    funcs: Rc<Registry>,
    loader: Rc<dyn RecordLoader>,
    results: Vec<Record>,
}

impl std::fmt::Debug for Runner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runner")
            .field("statement", &self.statement)
            .field("results", &self.results)
            .finish_non_exhaustive()
    }
}

impl Runner {
    /// Runner with a private session catalog.
    pub fn new(source: &str) -> Result<Self> {
        Self::with_database(source, Rc::new(Database::new()))
    }

    /// Runner sharing an existing session catalog; statements that MATCH
    /// over earlier CREATE VIRTUAL definitions need this.
    pub fn with_database(source: &str, db: Rc<Database>) -> Result<Self> {
        Self::with_parts(
            source,
            db,
            Rc::new(Registry::with_builtins()),
            Rc::new(crate::loader::HttpLoader::new(
                std::time::Duration::from_secs(30),
            )),
        )
    }

    /// Fully explicit construction: session catalog, function registry
    /// (with any plugins registered) and loader.
    pub fn with_parts(
        source: &str,
        db: Rc<Database>,
        funcs: Rc<Registry>,
        loader: Rc<dyn RecordLoader>,
    ) -> Result<Self> {
        let statement = crate::parser::Parser::new(&funcs).parse(source)?;
        Ok(Runner {
            statement,
            db,
            funcs,
            loader,
            results: Vec::new(),
        })
    }

    /// Execute the statement to completion.
    pub fn run(&mut self) -> Result<()> {
        self.results.clear();
        let ctx = ExecCtx {
            db: &self.db,
            funcs: &self.funcs,
            loader: &*self.loader,
        };
        self.results = run_statement(&self.statement, &ctx)?;
        Ok(())
    }

    /// Result records of the last `run`.
    pub fn results(&self) -> &[Record] {
        &self.results
    }

    /// The shared session catalog.
    pub fn database(&self) -> Rc<Database> {
        Rc::clone(&self.db)
    }
}
