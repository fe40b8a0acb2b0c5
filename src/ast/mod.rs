//! # AST Types
//!
//! Expression and operation trees produced by the parser. Statements are
//! flat operation lists (the pipeline), optionally combined by UNION into a
//! list of independent sub-pipelines. Expressions are plain enum trees;
//! variable references carry the referenced name and resolve against the
//! runtime row, so the AST itself stays acyclic.

use serde::{Deserialize, Serialize};

/// A parsed statement: the first pipeline plus any UNION'd continuations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Statement {
    pub first: Pipeline,
    pub unions: Vec<(UnionKind, Pipeline)>,
}

/// UNION combination mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnionKind {
    /// `UNION` — deduplicates combined rows
    Distinct,
    /// `UNION ALL` — concatenates
    All,
}

/// An ordered chain of pipeline operations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pipeline {
    pub ops: Vec<Op>,
}

/// One pipeline operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Op {
    With {
        projections: Vec<Projection>,
        distinct: bool,
    },
    Unwind {
        expr: Expr,
        alias: String,
    },
    Match {
        patterns: Vec<Pattern>,
        optional: bool,
    },
    /// Standalone WHERE, filtering rows that flow past it
    Where {
        expr: Expr,
    },
    Load {
        format: LoadFormat,
        url: Expr,
        post: Option<Expr>,
        headers: Option<Expr>,
        alias: String,
    },
    Call {
        function: String,
        args: Vec<Expr>,
        /// `YIELD` columns as (record column, alias) pairs; empty when the
        /// CALL is the last operation and emits whole records.
        yields: Vec<(String, String)>,
    },
    /// Standalone LIMIT: a gate on emissions downstream of itself
    Limit {
        count: usize,
    },
    /// Standalone ORDER BY not attached to a RETURN; passes rows through
    OrderBy {
        fields: Vec<SortField>,
    },
    Return {
        projections: Vec<Projection>,
        distinct: bool,
        filter: Option<Expr>,
        order_by: Vec<SortField>,
        limit: Option<usize>,
    },
    CreateNode {
        label: String,
        statement: Box<Statement>,
    },
    CreateRelationship {
        rel_type: String,
        from_label: String,
        to_label: String,
        statement: Box<Statement>,
    },
    Delete {
        target: DeleteTarget,
    },
}

/// Target of a DELETE operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DeleteTarget {
    Label(String),
    RelType(String),
    /// Bare name: resolved against labels first, then relationship types
    Name(String),
}

/// Payload format of a LOAD operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LoadFormat {
    Json,
    Csv,
    Text,
}

/// A projected expression with its output column name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Projection {
    pub expr: Expr,
    pub alias: String,
}

/// One ORDER BY key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SortField {
    pub expr: Expr,
    pub descending: bool,
}

/// Binary operators, in the evaluator's dispatch order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinaryOp {
    Or,
    And,
    Equals,
    NotEquals,
    LessThan,
    LessThanOrEqual,
    GreaterThan,
    GreaterThanOrEqual,
    Is,
    IsNot,
    In,
    NotIn,
    Contains,
    NotContains,
    StartsWith,
    NotStartsWith,
    EndsWith,
    NotEndsWith,
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulo,
    Power,
}

impl BinaryOp {
    /// Shunting-Yard precedence (higher binds tighter).
    pub fn precedence(self) -> u8 {
        use BinaryOp::*;
        match self {
            Or => 1,
            And => 2,
            Equals | NotEquals | LessThan | LessThanOrEqual | GreaterThan
            | GreaterThanOrEqual | Is | IsNot | In | NotIn | Contains | NotContains
            | StartsWith | NotStartsWith | EndsWith | NotEndsWith => 4,
            Add | Subtract => 5,
            Multiply | Divide | Modulo => 6,
            Power => 7,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnaryOp {
    Not,
    Negate,
}

impl UnaryOp {
    pub fn precedence(self) -> u8 {
        match self {
            UnaryOp::Not => 3,
            UnaryOp::Negate => 8,
        }
    }
}

/// Lookup postfix forms: `.ident`, `[index]`, `[lo:hi]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LookupKey {
    Field(String),
    Index(Box<Expr>),
    Slice {
        start: Option<Box<Expr>>,
        end: Option<Box<Expr>>,
    },
}

/// A chunk of an f-string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FStringPart {
    Literal(String),
    Interpolation(Expr),
}

/// Expression tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expr {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Array(Vec<Expr>),
    /// Associative array literal; keys keep source order
    Map(Vec<(String, Expr)>),
    /// Reference to a variable bound by an earlier operation
    Reference(String),
    /// Scalar or aggregate function call. For aggregates inside a
    /// projection, `agg_slot` is the reducer index assigned at parse time.
    FunctionCall {
        name: String,
        args: Vec<Expr>,
        distinct: bool,
        agg_slot: Option<usize>,
    },
    /// Inline reducer: `sum(x IN xs | expr WHERE cond)`
    PredicateReduce {
        function: String,
        var: String,
        array: Box<Expr>,
        map: Option<Box<Expr>>,
        filter: Option<Box<Expr>>,
    },
    /// `[x IN xs WHERE cond | expr]`
    ListComprehension {
        var: String,
        array: Box<Expr>,
        filter: Option<Box<Expr>>,
        map: Option<Box<Expr>>,
    },
    Lookup {
        base: Box<Expr>,
        key: LookupKey,
    },
    Case {
        branches: Vec<(Expr, Expr)>,
        fallback: Option<Box<Expr>>,
    },
    FString(Vec<FStringPart>),
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    /// Parenthesised sub-expression (kept for faithful re-rendering)
    Grouped(Box<Expr>),
    /// Graph pattern used as a boolean operand in WHERE/RETURN
    PatternExpression(Pattern),
}

impl Expr {
    /// Depth-first walk over this expression and all sub-expressions.
    pub fn walk<'a>(&'a self, visit: &mut impl FnMut(&'a Expr)) {
        visit(self);
        match self {
            Expr::Array(items) => {
                for item in items {
                    item.walk(visit);
                }
            }
            Expr::Map(pairs) => {
                for (_, v) in pairs {
                    v.walk(visit);
                }
            }
            Expr::FunctionCall { args, .. } => {
                for arg in args {
                    arg.walk(visit);
                }
            }
            Expr::PredicateReduce {
                array, map, filter, ..
            } => {
                array.walk(visit);
                if let Some(m) = map {
                    m.walk(visit);
                }
                if let Some(f) = filter {
                    f.walk(visit);
                }
            }
            Expr::ListComprehension {
                array, filter, map, ..
            } => {
                array.walk(visit);
                if let Some(f) = filter {
                    f.walk(visit);
                }
                if let Some(m) = map {
                    m.walk(visit);
                }
            }
            Expr::Lookup { base, key } => {
                base.walk(visit);
                match key {
                    LookupKey::Index(e) => e.walk(visit),
                    LookupKey::Slice { start, end } => {
                        if let Some(s) = start {
                            s.walk(visit);
                        }
                        if let Some(e) = end {
                            e.walk(visit);
                        }
                    }
                    LookupKey::Field(_) => {}
                }
            }
            Expr::Case { branches, fallback } => {
                for (when, then) in branches {
                    when.walk(visit);
                    then.walk(visit);
                }
                if let Some(f) = fallback {
                    f.walk(visit);
                }
            }
            Expr::FString(parts) => {
                for part in parts {
                    if let FStringPart::Interpolation(e) = part {
                        e.walk(visit);
                    }
                }
            }
            Expr::Binary { left, right, .. } => {
                left.walk(visit);
                right.walk(visit);
            }
            Expr::Unary { operand, .. } => operand.walk(visit),
            Expr::Grouped(inner) => inner.walk(visit),
            _ => {}
        }
    }

    /// Mutable depth-first walk, used to assign aggregate reducer slots.
    pub fn walk_mut(&mut self, visit: &mut impl FnMut(&mut Expr)) {
        visit(self);
        match self {
            Expr::Array(items) => {
                for item in items {
                    item.walk_mut(visit);
                }
            }
            Expr::Map(pairs) => {
                for (_, v) in pairs {
                    v.walk_mut(visit);
                }
            }
            Expr::FunctionCall { args, .. } => {
                for arg in args {
                    arg.walk_mut(visit);
                }
            }
            Expr::PredicateReduce {
                array, map, filter, ..
            } => {
                array.walk_mut(visit);
                if let Some(m) = map {
                    m.walk_mut(visit);
                }
                if let Some(f) = filter {
                    f.walk_mut(visit);
                }
            }
            Expr::ListComprehension {
                array, filter, map, ..
            } => {
                array.walk_mut(visit);
                if let Some(f) = filter {
                    f.walk_mut(visit);
                }
                if let Some(m) = map {
                    m.walk_mut(visit);
                }
            }
            Expr::Lookup { base, key } => {
                base.walk_mut(visit);
                match key {
                    LookupKey::Index(e) => e.walk_mut(visit),
                    LookupKey::Slice { start, end } => {
                        if let Some(s) = start {
                            s.walk_mut(visit);
                        }
                        if let Some(e) = end {
                            e.walk_mut(visit);
                        }
                    }
                    LookupKey::Field(_) => {}
                }
            }
            Expr::Case { branches, fallback } => {
                for (when, then) in branches {
                    when.walk_mut(visit);
                    then.walk_mut(visit);
                }
                if let Some(f) = fallback {
                    f.walk_mut(visit);
                }
            }
            Expr::FString(parts) => {
                for part in parts {
                    if let FStringPart::Interpolation(e) = part {
                        e.walk_mut(visit);
                    }
                }
            }
            Expr::Binary { left, right, .. } => {
                left.walk_mut(visit);
                right.walk_mut(visit);
            }
            Expr::Unary { operand, .. } => operand.walk_mut(visit),
            Expr::Grouped(inner) => inner.walk_mut(visit),
            _ => {}
        }
    }
}

// ---------------------------------------------------------------------------
// Graph patterns
// ---------------------------------------------------------------------------

/// Relationship traversal direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Right,
    Left,
    Both,
}

/// Hop bounds of a relationship. A plain relationship is `{1, 1}`; `*` is
/// `{0, unbounded}`; `*n..m` carries the written bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hops {
    pub min: usize,
    pub max: usize,
    /// True when the relationship was written with `*`
    pub variable: bool,
}

impl Default for Hops {
    fn default() -> Self {
        Hops {
            min: 1,
            max: 1,
            variable: false,
        }
    }
}

impl Hops {
    pub const UNBOUNDED: usize = usize::MAX;

    /// Whether more than one hop may be traversed.
    pub fn multi(&self) -> bool {
        self.variable
    }
}

/// A node element of a pattern chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodePattern {
    pub var: Option<String>,
    pub label: Option<String>,
    pub props: Vec<(String, Expr)>,
    /// True when the variable re-uses a binding introduced earlier
    pub is_reference: bool,
}

/// A relationship element of a pattern chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelPattern {
    pub var: Option<String>,
    /// One or more `|`-combined relationship types
    pub types: Vec<String>,
    pub direction: Direction,
    pub hops: Hops,
    pub props: Vec<(String, Expr)>,
    pub is_reference: bool,
}

/// Alternating node / relationship chain. Always starts and ends with a
/// node; `2k+1` elements for `k` relationships.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pattern {
    /// Path variable from `p=(…)`, when given
    pub path_var: Option<String>,
    pub elements: Vec<PatternElement>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PatternElement {
    Node(NodePattern),
    Rel(RelPattern),
}

impl Pattern {
    /// All variables bound by this pattern (path, node and relationship
    /// variables), in chain order.
    pub fn variables(&self) -> Vec<&str> {
        let mut vars: Vec<&str> = Vec::new();
        if let Some(p) = &self.path_var {
            vars.push(p);
        }
        for element in &self.elements {
            let var = match element {
                PatternElement::Node(n) => n.var.as_deref(),
                PatternElement::Rel(r) => r.var.as_deref(),
            };
            if let Some(v) = var {
                vars.push(v);
            }
        }
        vars
    }

    /// Whether any node element references an already-bound variable.
    pub fn has_node_reference(&self) -> bool {
        self.elements.iter().any(|e| match e {
            PatternElement::Node(n) => n.is_reference,
            PatternElement::Rel(_) => false,
        })
    }
}
