//! Pattern traversal engine.
//!
//! Enumerates every binding of a pattern chain against the session's
//! virtual graph: candidate start nodes in record order, relationship
//! records in index order (`right` endpoint tried before `left` for
//! undirected steps), variable-length hops depth-first. Each complete
//! binding is pushed into a sink; `Flow::Stop` from the sink aborts the
//! enumeration (downstream LIMIT exhausted, or an existence test that
//! needs only one witness).
//!
//! Cycle policy: a variable-length step never revisits a node id already
//! on its own match stack (the zero-hop origin included); a fixed-length
//! step that would revisit raises `Circular relationship detected`.

use std::rc::Rc;

use crate::ast::{Direction, NodePattern, Pattern, PatternElement, RelPattern};
use crate::error::{Error, Result};
use crate::eval::Evaluator;
use crate::pipeline::{ExecCtx, Flow};
use crate::value::{values_equal, Record, Value};

use super::data::{NodeData, RelationshipData};

/// Binding consumer; returns `Flow::Stop` to end the enumeration.
pub type Sink<'s> = dyn FnMut(&mut Record) -> Result<Flow> + 's;

/// Enumerate all bindings of `patterns` (nested, in list order) on top of
/// the incoming row, driving `sink` once per binding.
pub fn run_patterns(
    ctx: &ExecCtx,
    patterns: &[Pattern],
    row: &mut Record,
    sink: &mut Sink,
) -> Result<Flow> {
    let runs = patterns
        .iter()
        .map(|pattern| PatternRun::resolve(ctx, pattern))
        .collect::<Result<Vec<_>>>()?;
    let matcher = Matcher { ctx, runs };
    matcher.enum_pattern(0, row, sink)
}

/// Existence test for a pattern inside WHERE/RETURN: true when at least
/// one binding exists. The surrounding row is not mutated.
pub fn evaluate_pattern_expression(
    ctx: &ExecCtx,
    pattern: &Pattern,
    row: &Record,
) -> Result<bool> {
    let mut probe = row.clone();
    let mut found = false;
    run_patterns(ctx, std::slice::from_ref(pattern), &mut probe, &mut |_| {
        found = true;
        Ok(Flow::Stop)
    })?;
    Ok(found)
}

/// One pattern element resolved against the catalog.
enum RunElem<'a> {
    Node {
        pat: &'a NodePattern,
        data: Option<Rc<NodeData>>,
    },
    Rel {
        pat: &'a RelPattern,
        data: Vec<(String, Rc<RelationshipData>)>,
    },
}

struct PatternRun<'a> {
    pattern: &'a Pattern,
    elems: Vec<RunElem<'a>>,
}

impl<'a> PatternRun<'a> {
    fn resolve(ctx: &ExecCtx, pattern: &'a Pattern) -> Result<Self> {
        let mut elems = Vec::with_capacity(pattern.elements.len());
        for element in &pattern.elements {
            match element {
                PatternElement::Node(pat) => {
                    let data = match &pat.label {
                        Some(label) => Some(ctx.db.node_data(label, ctx)?),
                        None => None,
                    };
                    elems.push(RunElem::Node { pat, data });
                }
                PatternElement::Rel(pat) => {
                    if pat.types.is_empty() {
                        return Err(Error::Graph("Relationship has no type".into()));
                    }
                    let mut data = Vec::with_capacity(pat.types.len());
                    for rel_type in &pat.types {
                        data.push((rel_type.clone(), ctx.db.relationship_data(rel_type, ctx)?));
                    }
                    elems.push(RunElem::Rel { pat, data });
                }
            }
        }
        Ok(PatternRun { pattern, elems })
    }
}

/// One traversed edge on a relationship's match stack.
struct RelMatch {
    rel_type: String,
    start: Value,
    props: Record,
    end: Option<Value>,
}

impl RelMatch {
    fn materialise(&self) -> Value {
        let mut rec = Record::new();
        rec.insert("type".into(), Value::String(self.rel_type.clone()));
        rec.insert("startNode".into(), self.start.clone());
        rec.insert("endNode".into(), self.end.clone().unwrap_or(Value::Null));
        rec.insert("properties".into(), Value::Map(self.props.clone()));
        Value::Map(rec)
    }
}

enum PathPiece {
    Node(Value),
    Rel { elem: usize, pos: usize },
}

/// Per-pattern traversal state: one match stack and visited-id list per
/// relationship element, plus the current path.
struct PatternState {
    stacks: Vec<Vec<RelMatch>>,
    visited: Vec<Vec<String>>,
    path: Vec<PathPiece>,
}

impl PatternState {
    fn new(elems: usize) -> Self {
        PatternState {
            stacks: (0..elems).map(|_| Vec::new()).collect(),
            visited: (0..elems).map(|_| Vec::new()).collect(),
            path: Vec::new(),
        }
    }
}

struct Matcher<'a, 'c> {
    ctx: &'a ExecCtx<'c>,
    runs: Vec<PatternRun<'a>>,
}

impl Matcher<'_, '_> {
    fn enum_pattern(&self, p: usize, row: &mut Record, sink: &mut Sink) -> Result<Flow> {
        if p == self.runs.len() {
            return sink(row);
        }
        let mut state = PatternState::new(self.runs[p].elems.len());
        self.match_node(p, 0, None, false, row, &mut state, sink)
    }

    fn node_elem(&self, p: usize, e: usize) -> (&NodePattern, Option<&Rc<NodeData>>) {
        match &self.runs[p].elems[e] {
            RunElem::Node { pat, data } => (pat, data.as_ref()),
            RunElem::Rel { .. } => unreachable!("node position holds a relationship"),
        }
    }

    /// Bind a node element. `required` carries the id a relationship step
    /// arrived with; `zero_hop` marks the no-edge binding of a `*0..`
    /// relationship target.
    fn match_node(
        &self,
        p: usize,
        e: usize,
        required: Option<&Value>,
        zero_hop: bool,
        row: &mut Record,
        state: &mut PatternState,
        sink: &mut Sink,
    ) -> Result<Flow> {
        let (pat, data) = self.node_elem(p, e);

        // An already-bound variable pins the candidate.
        if let Some(var) = &pat.var {
            if let Some(bound) = row.get(var).cloned() {
                if bound.is_null() {
                    return Ok(Flow::Continue);
                }
                let Value::Map(rec) = &bound else {
                    return Ok(Flow::Continue);
                };
                if let Some(req) = required {
                    match rec.get("id") {
                        Some(id) if values_equal(id, req) => {}
                        _ => return Ok(Flow::Continue),
                    }
                }
                if !self.node_props_match(pat, rec, row)? {
                    return Ok(Flow::Continue);
                }
                return self.after_node_bound(p, e, bound, zero_hop, false, row, state, sink);
            }
        }

        match required {
            Some(req) => match data {
                Some(d) => {
                    for &pos in d.find(req) {
                        let rec = d.records()[pos].clone();
                        if !self.node_props_match(pat, &rec, row)? {
                            continue;
                        }
                        let flow = self.after_node_bound(
                            p,
                            e,
                            Value::Map(rec),
                            zero_hop,
                            true,
                            row,
                            state,
                            sink,
                        )?;
                        if flow == Flow::Stop {
                            return Ok(Flow::Stop);
                        }
                    }
                    Ok(Flow::Continue)
                }
                None => {
                    // Anonymous, unlabelled target: bind a synthetic record
                    // carrying just the traversal id.
                    if !pat.props.is_empty() {
                        return Err(Error::Graph("Node does not have property".into()));
                    }
                    let mut rec = Record::new();
                    rec.insert("id".into(), req.clone());
                    self.after_node_bound(p, e, Value::Map(rec), zero_hop, true, row, state, sink)
                }
            },
            None => {
                let d = data.ok_or_else(|| {
                    Error::Graph("Node has no label and no bound variable".into())
                })?;
                for pos in 0..d.records().len() {
                    let rec = d.records()[pos].clone();
                    if !self.node_props_match(pat, &rec, row)? {
                        continue;
                    }
                    let flow = self.after_node_bound(
                        p,
                        e,
                        Value::Map(rec),
                        false,
                        true,
                        row,
                        state,
                        sink,
                    )?;
                    if flow == Flow::Stop {
                        return Ok(Flow::Stop);
                    }
                }
                Ok(Flow::Continue)
            }
        }
    }

    /// Record the bound node in the path, complete the incoming match's
    /// end node, bind the variable, and continue along the chain.
    fn after_node_bound(
        &self,
        p: usize,
        e: usize,
        value: Value,
        zero_hop: bool,
        bind: bool,
        row: &mut Record,
        state: &mut PatternState,
        sink: &mut Sink,
    ) -> Result<Flow> {
        let (pat, _) = self.node_elem(p, e);

        let pushed_path = if zero_hop {
            false
        } else {
            if e > 0 {
                if let Some(current) = state.stacks[e - 1].last_mut() {
                    current.end = Some(value.clone());
                }
            }
            state.path.push(PathPiece::Node(value.clone()));
            true
        };

        let prev = if bind {
            pat.var
                .as_ref()
                .map(|name| (name.clone(), row.insert(name.clone(), value.clone())))
        } else {
            None
        };

        let flow = if e + 1 >= self.runs[p].elems.len() {
            self.emit(p, row, state, sink)
        } else {
            let id = match &value {
                Value::Map(rec) => rec.get("id").cloned(),
                _ => None,
            };
            match id {
                Some(id) => self.traverse_rel(p, e + 1, &id, &value, 0, row, state, sink),
                None => Err(Error::Graph("Node record has no id column".into())),
            }
        };

        if let Some((name, previous)) = prev {
            match previous {
                Some(v) => {
                    row.insert(name, v);
                }
                None => {
                    row.shift_remove(&name);
                }
            }
        }
        if pushed_path {
            state.path.pop();
        }
        flow
    }

    /// Enumerate edges of the relationship element at `rel_idx` starting
    /// from `from_id`, depth-first over hops.
    fn traverse_rel(
        &self,
        p: usize,
        rel_idx: usize,
        from_id: &Value,
        start_record: &Value,
        hop: usize,
        row: &mut Record,
        state: &mut PatternState,
        sink: &mut Sink,
    ) -> Result<Flow> {
        let (pat, data) = match &self.runs[p].elems[rel_idx] {
            RunElem::Rel { pat, data } => (*pat, data),
            RunElem::Node { .. } => unreachable!("relationship position holds a node"),
        };

        if hop == 0 {
            state.visited[rel_idx].clear();
            state.visited[rel_idx].push(from_id.canonical());

            // Zero-hop: the end node binds to the source itself, no edge
            // on the path.
            if pat.hops.variable && pat.hops.min == 0 {
                let flow =
                    self.match_node(p, rel_idx + 1, Some(from_id), true, row, state, sink)?;
                if flow == Flow::Stop {
                    return Ok(Flow::Stop);
                }
            }
        }

        for (declared_type, rel_data) in data {
            let directions: &[Direction] = match pat.direction {
                Direction::Right => &[Direction::Right],
                Direction::Left => &[Direction::Left],
                Direction::Both => &[Direction::Right, Direction::Left],
            };
            for dir in directions {
                let (positions, follow_col) = match dir {
                    Direction::Right => (rel_data.find_by_left(from_id), "right_id"),
                    _ => (rel_data.find_by_right(from_id), "left_id"),
                };
                for &pos in positions {
                    let record = &rel_data.records()[pos];
                    let Some(follow) = record.get(follow_col).cloned() else {
                        continue;
                    };

                    if hop + 1 >= pat.hops.min {
                        if !self.rel_props_match(pat, record, row)? {
                            continue;
                        }
                        let key = follow.canonical();
                        if state.visited[rel_idx].contains(&key) {
                            if pat.hops.variable {
                                continue;
                            }
                            return Err(Error::Graph("Circular relationship detected".into()));
                        }

                        let rel_type = match record.get("_type") {
                            Some(Value::String(t)) => t.clone(),
                            _ => declared_type.clone(),
                        };
                        state.visited[rel_idx].push(key);
                        state.stacks[rel_idx].push(RelMatch {
                            rel_type,
                            start: start_record.clone(),
                            props: RelationshipData::properties(record),
                            end: None,
                        });
                        state.path.push(PathPiece::Rel {
                            elem: rel_idx,
                            pos: state.stacks[rel_idx].len() - 1,
                        });

                        let mut flow =
                            self.match_node(p, rel_idx + 1, Some(&follow), false, row, state, sink)?;

                        if flow == Flow::Continue && hop + 1 < pat.hops.max {
                            let next_start = self.node_record_by_id(p, rel_idx + 1, &follow);
                            flow = self.traverse_rel(
                                p, rel_idx, &follow, &next_start, hop + 1, row, state, sink,
                            )?;
                        }

                        state.path.pop();
                        state.stacks[rel_idx].pop();
                        state.visited[rel_idx].pop();
                        if flow == Flow::Stop {
                            return Ok(Flow::Stop);
                        }
                    } else {
                        // Below the minimum hop count: follow the edge
                        // without emitting a match.
                        let key = follow.canonical();
                        if state.visited[rel_idx].contains(&key) {
                            continue;
                        }
                        state.visited[rel_idx].push(key);
                        let next_start = self.node_record_by_id(p, rel_idx + 1, &follow);
                        let flow = self.traverse_rel(
                            p, rel_idx, &follow, &next_start, hop + 1, row, state, sink,
                        )?;
                        state.visited[rel_idx].pop();
                        if flow == Flow::Stop {
                            return Ok(Flow::Stop);
                        }
                    }
                }
            }
        }
        Ok(Flow::Continue)
    }

    /// Node record of the element at `e` with the given id; synthesises an
    /// id-only record for unlabelled elements.
    fn node_record_by_id(&self, p: usize, e: usize, id: &Value) -> Value {
        if let (_, Some(d)) = self.node_elem(p, e) {
            if let Some(&pos) = d.find(id).first() {
                return Value::Map(d.records()[pos].clone());
            }
        }
        let mut rec = Record::new();
        rec.insert("id".into(), id.clone());
        Value::Map(rec)
    }

    /// All chain elements are bound: materialise relationship and path
    /// variables, then hand off to the next pattern (or the sink).
    fn emit(
        &self,
        p: usize,
        row: &mut Record,
        state: &mut PatternState,
        sink: &mut Sink,
    ) -> Result<Flow> {
        let run = &self.runs[p];
        let mut bindings: Vec<(String, Value)> = Vec::new();
        for (i, elem) in run.elems.iter().enumerate() {
            if let RunElem::Rel { pat, .. } = elem {
                if let Some(var) = &pat.var {
                    bindings.push((var.clone(), stack_value(&state.stacks[i])));
                }
            }
        }
        if let Some(path_var) = &run.pattern.path_var {
            bindings.push((path_var.clone(), self.materialise_path(state)));
        }

        let mut previous: Vec<(String, Option<Value>)> = Vec::with_capacity(bindings.len());
        for (name, value) in bindings {
            let old = row.insert(name.clone(), value);
            previous.push((name, old));
        }

        let flow = self.enum_pattern(p + 1, row, sink);

        for (name, old) in previous.into_iter().rev() {
            match old {
                Some(v) => {
                    row.insert(name, v);
                }
                None => {
                    row.shift_remove(&name);
                }
            }
        }
        flow
    }

    fn materialise_path(&self, state: &PatternState) -> Value {
        Value::List(
            state
                .path
                .iter()
                .map(|piece| match piece {
                    PathPiece::Node(v) => v.clone(),
                    PathPiece::Rel { elem, pos } => state.stacks[*elem][*pos].materialise(),
                })
                .collect(),
        )
    }

    fn node_props_match(
        &self,
        pat: &NodePattern,
        record: &Record,
        row: &Record,
    ) -> Result<bool> {
        for (key, expr) in &pat.props {
            let Some(actual) = record.get(key) else {
                return Err(Error::Graph("Node does not have property".into()));
            };
            let expected = Evaluator::new(self.ctx).eval(expr, row)?;
            if !values_equal(actual, &expected) {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn rel_props_match(&self, pat: &RelPattern, record: &Record, row: &Record) -> Result<bool> {
        for (key, expr) in &pat.props {
            let Some(actual) = record.get(key) else {
                return Err(Error::Graph("Relationship does not have property".into()));
            };
            let expected = Evaluator::new(self.ctx).eval(expr, row)?;
            if !values_equal(actual, &expected) {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

/// Relationship variable value: null with no traversed edge, the single
/// match record for one, a list for more.
fn stack_value(stack: &[RelMatch]) -> Value {
    match stack.len() {
        0 => Value::Null,
        1 => stack[0].materialise(),
        _ => Value::List(stack.iter().map(RelMatch::materialise).collect()),
    }
}
