//! # Parser
//!
//! Hand-written recursive descent over the filtered token stream, producing
//! the operation pipeline and expression trees. Expressions are assembled
//! with a Shunting-Yard builder (operand stack + operator stack, folding on
//! precedence). The parser state tracks bound variables, an aggregate
//! context for the no-nested-aggregates rule, and a statement-wide RETURN
//! counter.

use std::collections::HashSet;

use crate::ast::{
    BinaryOp, DeleteTarget, Direction, Expr, FStringPart, Hops, LoadFormat, LookupKey,
    NodePattern, Op, Pattern, PatternElement, Pipeline, Projection, RelPattern, SortField,
    Statement, UnaryOp, UnionKind,
};
use crate::error::{Error, Result};
use crate::functions::{FunctionKind, Registry};
use crate::tokenizer::{Token, TokenKind, Tokenizer};

/// Parser over one statement.
pub struct Parser<'r> {
    tokens: Vec<Token>,
    pos: usize,
    registry: &'r Registry,
    /// Variables bound so far in the current pipeline
    variables: HashSet<String>,
    /// Depth of aggregate-function argument parsing (no-nesting rule)
    aggregate_depth: usize,
    /// RETURN operations seen in the current UNION branch
    returns: usize,
}

impl<'r> Parser<'r> {
    pub fn new(registry: &'r Registry) -> Self {
        Parser {
            tokens: Vec::new(),
            pos: 0,
            registry,
            variables: HashSet::new(),
            aggregate_depth: 0,
            returns: 0,
        }
    }

    /// Parse a complete statement (pipelines combined by UNION).
    pub fn parse(mut self, source: &str) -> Result<Statement> {
        self.tokens = Tokenizer::new(source).significant_tokens()?;
        self.pos = 0;
        let first = self.parse_pipeline()?;
        let mut unions = Vec::new();
        while self.peek().is_keyword("UNION") {
            self.advance();
            let kind = if self.peek().is_keyword("ALL") {
                self.advance();
                UnionKind::All
            } else {
                UnionKind::Distinct
            };
            // Each UNION side is an independent sub-pipeline.
            self.variables.clear();
            self.returns = 0;
            unions.push((kind, self.parse_pipeline()?));
        }
        self.expect_eof()?;
        Ok(Statement { first, unions })
    }

    // -- token plumbing ----------------------------------------------------

    fn peek(&self) -> &Token {
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn peek_at(&self, offset: usize) -> &Token {
        &self.tokens[(self.pos + offset).min(self.tokens.len() - 1)]
    }

    fn advance(&mut self) -> Token {
        let token = self.tokens[self.pos.min(self.tokens.len() - 1)].clone();
        if self.pos < self.tokens.len() {
            self.pos += 1;
        }
        token
    }

    fn expect_symbol(&mut self, sym: &str) -> Result<Token> {
        if self.peek().is_symbol(sym) {
            Ok(self.advance())
        } else {
            Err(Error::parse_at(
                format!("Expected '{sym}', found '{}'", self.peek().text),
                self.peek().position,
            ))
        }
    }

    fn expect_keyword(&mut self, kw: &str) -> Result<Token> {
        if self.peek().is_keyword(kw) {
            Ok(self.advance())
        } else {
            Err(Error::parse_at(
                format!("Expected {kw}, found '{}'", self.peek().text),
                self.peek().position,
            ))
        }
    }

    fn expect_eof(&self) -> Result<()> {
        if self.peek().is_eof() {
            Ok(())
        } else {
            Err(Error::parse_at(
                format!("Unexpected token '{}'", self.peek().text),
                self.peek().position,
            ))
        }
    }

    /// Consume an identifier-usable token (identifiers, back-ticked names,
    /// word-shaped keywords) and return its spelling.
    fn expect_identifier(&mut self) -> Result<String> {
        if self.peek().can_be_identifier() {
            let token = self.advance();
            Ok(token.identifier_text().to_string())
        } else {
            Err(Error::parse_at(
                format!("Expected identifier, found '{}'", self.peek().text),
                self.peek().position,
            ))
        }
    }

    // -- pipeline ----------------------------------------------------------

    fn parse_pipeline(&mut self) -> Result<Pipeline> {
        let mut ops: Vec<Op> = Vec::new();
        loop {
            let token = self.peek().clone();
            if token.is_eof() || token.is_symbol("}") || token.is_keyword("UNION") {
                break;
            }

            // WHERE / ORDER BY / LIMIT may trail a RETURN as attachments;
            // any other operation after RETURN is a structural error.
            let attachable = token.is_keyword("WHERE")
                || token.is_keyword("ORDER")
                || token.is_keyword("LIMIT");
            if ops.iter().any(|op| matches!(op, Op::Return { .. })) && !attachable {
                return Err(Error::Parse("Only one RETURN statement is allowed".into()));
            }

            if token.is_keyword("WITH") {
                self.advance();
                ops.push(self.parse_with()?);
            } else if token.is_keyword("UNWIND") {
                self.advance();
                ops.push(self.parse_unwind()?);
            } else if token.is_keyword("OPTIONAL") {
                self.advance();
                self.expect_keyword("MATCH")?;
                ops.push(self.parse_match(true)?);
            } else if token.is_keyword("MATCH") {
                self.advance();
                ops.push(self.parse_match(false)?);
            } else if token.is_keyword("WHERE") {
                self.advance();
                let expr = self.parse_expression()?;
                match ops.last_mut() {
                    Some(Op::Return { filter, .. }) if filter.is_none() => {
                        *filter = Some(expr);
                    }
                    _ => ops.push(Op::Where { expr }),
                }
            } else if token.is_keyword("LOAD") {
                self.advance();
                ops.push(self.parse_load()?);
            } else if token.is_keyword("CALL") {
                self.advance();
                ops.push(self.parse_call()?);
            } else if token.is_keyword("RETURN") {
                self.advance();
                self.returns += 1;
                if self.returns > 1 {
                    return Err(Error::Parse("Only one RETURN statement is allowed".into()));
                }
                ops.push(self.parse_return()?);
            } else if token.is_keyword("LIMIT") {
                self.advance();
                let count = self.parse_limit_count()?;
                match ops.last_mut() {
                    Some(Op::Return { limit, .. }) => *limit = Some(count),
                    _ => ops.push(Op::Limit { count }),
                }
            } else if token.is_keyword("ORDER") {
                self.advance();
                self.expect_keyword("BY")?;
                let fields = self.parse_sort_fields()?;
                match ops.last_mut() {
                    Some(Op::Return { order_by, .. }) => *order_by = fields,
                    _ => ops.push(Op::OrderBy { fields }),
                }
            } else if token.is_keyword("CREATE") {
                self.advance();
                self.expect_keyword("VIRTUAL")?;
                ops.push(self.parse_create_virtual()?);
            } else if token.is_keyword("DELETE") {
                self.advance();
                ops.push(self.parse_delete()?);
            } else {
                return Err(Error::parse_at(
                    format!("Unexpected token '{}'", token.text),
                    token.position,
                ));
            }
        }

        // A CALL anywhere but last must project through YIELD.
        for (i, op) in ops.iter().enumerate() {
            if let Op::Call { yields, .. } = op {
                if yields.is_empty() && i + 1 < ops.len() {
                    return Err(Error::Parse(
                        "CALL operations must have a YIELD clause".into(),
                    ));
                }
            }
        }

        Ok(Pipeline { ops })
    }

    fn parse_limit_count(&mut self) -> Result<usize> {
        let token = self.advance();
        if token.kind == TokenKind::Number {
            if let Ok(n) = token.value.parse::<usize>() {
                return Ok(n);
            }
        }
        Err(Error::parse_at(
            format!("LIMIT expects a non-negative integer, found '{}'", token.text),
            token.position,
        ))
    }

    // -- operations --------------------------------------------------------

    fn parse_with(&mut self) -> Result<Op> {
        let distinct = if self.peek().is_keyword("DISTINCT") {
            self.advance();
            true
        } else {
            false
        };
        let projections = self.parse_projections()?;
        for projection in &projections {
            self.variables.insert(projection.alias.clone());
        }
        Ok(Op::With {
            projections,
            distinct,
        })
    }

    fn parse_unwind(&mut self) -> Result<Op> {
        let expr = self.parse_expression()?;
        let array_like = matches!(
            expr,
            Expr::Array(_)
                | Expr::FunctionCall { .. }
                | Expr::Reference(_)
                | Expr::Lookup { .. }
                | Expr::ListComprehension { .. }
                | Expr::PredicateReduce { .. }
                | Expr::Grouped(_)
        );
        if !array_like {
            return Err(Error::Parse(
                "Expected array, function, reference, or lookup".into(),
            ));
        }
        if !self.peek().is_keyword("AS") {
            return Err(Error::Parse("Expected alias".into()));
        }
        self.advance();
        let alias = self.expect_identifier()?;
        self.variables.insert(alias.clone());
        Ok(Op::Unwind { expr, alias })
    }

    fn parse_match(&mut self, optional: bool) -> Result<Op> {
        let mut patterns = vec![self.parse_pattern(false)?];
        while self.peek().is_symbol(",") {
            self.advance();
            patterns.push(self.parse_pattern(false)?);
        }
        Ok(Op::Match { patterns, optional })
    }

    fn parse_load(&mut self) -> Result<Op> {
        let format = if self.peek().is_keyword("JSON") {
            LoadFormat::Json
        } else if self.peek().is_keyword("CSV") {
            LoadFormat::Csv
        } else if self.peek().is_keyword("TEXT") {
            LoadFormat::Text
        } else {
            return Err(Error::parse_at(
                format!("Expected JSON, CSV or TEXT, found '{}'", self.peek().text),
                self.peek().position,
            ));
        };
        self.advance();
        self.expect_keyword("FROM")?;
        let url = self.parse_expression()?;
        let post = if self.peek().is_keyword("POST") {
            self.advance();
            Some(self.parse_expression()?)
        } else {
            None
        };
        let headers = if self.peek().is_keyword("HEADERS") {
            self.advance();
            Some(self.parse_expression()?)
        } else {
            None
        };
        if !self.peek().is_keyword("AS") {
            return Err(Error::Parse("Expected alias".into()));
        }
        self.advance();
        let alias = self.expect_identifier()?;
        self.variables.insert(alias.clone());
        Ok(Op::Load {
            format,
            url,
            post,
            headers,
            alias,
        })
    }

    fn parse_call(&mut self) -> Result<Op> {
        let function = self.expect_identifier()?.to_lowercase();
        match self.registry.kind(&function) {
            Some(FunctionKind::Generator) => {}
            Some(_) => {
                return Err(Error::Parse(format!(
                    "CALL expects a generator function, but {function} is not one"
                )))
            }
            None => return Err(Error::Parse(format!("Unknown function: {function}"))),
        }
        self.expect_symbol("(")?;
        let mut args = Vec::new();
        if !self.peek().is_symbol(")") {
            loop {
                args.push(self.parse_expression()?);
                if self.peek().is_symbol(",") {
                    self.advance();
                } else {
                    break;
                }
            }
        }
        self.expect_symbol(")")?;
        self.registry.check_arity(&function, args.len())?;

        let mut yields = Vec::new();
        if self.peek().is_keyword("YIELD") {
            self.advance();
            loop {
                let column = self.expect_identifier()?;
                let alias = if self.peek().is_keyword("AS") {
                    self.advance();
                    self.expect_identifier()?
                } else {
                    column.clone()
                };
                self.variables.insert(alias.clone());
                yields.push((column, alias));
                if self.peek().is_symbol(",") {
                    self.advance();
                } else {
                    break;
                }
            }
        }
        Ok(Op::Call {
            function,
            args,
            yields,
        })
    }

    fn parse_return(&mut self) -> Result<Op> {
        let distinct = if self.peek().is_keyword("DISTINCT") {
            self.advance();
            true
        } else {
            false
        };
        let projections = self.parse_projections()?;
        for projection in &projections {
            self.variables.insert(projection.alias.clone());
        }
        Ok(Op::Return {
            projections,
            distinct,
            filter: None,
            order_by: Vec::new(),
            limit: None,
        })
    }

    fn parse_sort_fields(&mut self) -> Result<Vec<SortField>> {
        let mut fields = Vec::new();
        loop {
            let expr = self.parse_expression()?;
            let descending = if self.peek().is_keyword("DESC") {
                self.advance();
                true
            } else if self.peek().is_keyword("ASC") {
                self.advance();
                false
            } else {
                false
            };
            fields.push(SortField { expr, descending });
            if self.peek().is_symbol(",") {
                self.advance();
            } else {
                break;
            }
        }
        Ok(fields)
    }

    fn parse_create_virtual(&mut self) -> Result<Op> {
        self.expect_symbol("(")?;
        self.expect_symbol(":")?;
        let from_label = self.expect_identifier()?;
        self.expect_symbol(")")?;

        // Relationship form: (:L1)-[:T]-(:L2)
        let relationship = if self.peek().is_operator("-") || self.peek().is_operator("<-") {
            self.advance();
            self.expect_symbol("[")?;
            self.expect_symbol(":")?;
            let rel_type = self.expect_identifier()?;
            self.expect_symbol("]")?;
            let closing = self.advance();
            if !(closing.is_operator("-") || closing.is_operator("->")) {
                return Err(Error::parse_at(
                    format!("Expected '-', found '{}'", closing.text),
                    closing.position,
                ));
            }
            self.expect_symbol("(")?;
            self.expect_symbol(":")?;
            let to_label = self.expect_identifier()?;
            self.expect_symbol(")")?;
            Some((rel_type, to_label))
        } else {
            None
        };

        self.expect_keyword("AS")?;
        self.expect_symbol("{")?;

        // The sub-pipeline has its own variable scope and RETURN budget.
        let saved_variables = std::mem::take(&mut self.variables);
        let saved_returns = std::mem::take(&mut self.returns);
        let sub_first = self.parse_pipeline()?;
        let mut sub_unions = Vec::new();
        while self.peek().is_keyword("UNION") {
            self.advance();
            let kind = if self.peek().is_keyword("ALL") {
                self.advance();
                UnionKind::All
            } else {
                UnionKind::Distinct
            };
            self.variables.clear();
            self.returns = 0;
            sub_unions.push((kind, self.parse_pipeline()?));
        }
        self.variables = saved_variables;
        self.returns = saved_returns;
        self.expect_symbol("}")?;

        let statement = Box::new(Statement {
            first: sub_first,
            unions: sub_unions,
        });
        match relationship {
            Some((rel_type, to_label)) => Ok(Op::CreateRelationship {
                rel_type,
                from_label,
                to_label,
                statement,
            }),
            None => Ok(Op::CreateNode {
                label: from_label,
                statement,
            }),
        }
    }

    fn parse_delete(&mut self) -> Result<Op> {
        if self.peek().is_symbol("(") {
            self.advance();
            self.expect_symbol(":")?;
            let label = self.expect_identifier()?;
            self.expect_symbol(")")?;
            return Ok(Op::Delete {
                target: DeleteTarget::Label(label),
            });
        }
        if self.peek().is_symbol("[") {
            self.advance();
            self.expect_symbol(":")?;
            let rel_type = self.expect_identifier()?;
            self.expect_symbol("]")?;
            return Ok(Op::Delete {
                target: DeleteTarget::RelType(rel_type),
            });
        }
        let name = self.expect_identifier()?;
        Ok(Op::Delete {
            target: DeleteTarget::Name(name),
        })
    }

    // -- projections -------------------------------------------------------

    fn parse_projections(&mut self) -> Result<Vec<Projection>> {
        let mut projections = Vec::new();
        let mut unnamed = 0usize;
        loop {
            let expr = self.parse_expression()?;
            let alias = if self.peek().is_keyword("AS") {
                self.advance();
                self.expect_identifier()?
            } else {
                match &expr {
                    Expr::Reference(name) => name.clone(),
                    _ => {
                        unnamed += 1;
                        format!("expr{unnamed}")
                    }
                }
            };
            projections.push(Projection { expr, alias });
            if self.peek().is_symbol(",") {
                self.advance();
            } else {
                break;
            }
        }
        self.assign_aggregate_slots(&mut projections);
        Ok(projections)
    }

    /// Number the aggregate call sites of a projection list; the pipeline
    /// keeps one reducer element per slot per group.
    fn assign_aggregate_slots(&self, projections: &mut [Projection]) {
        let mut slot = 0usize;
        for projection in projections {
            projection.expr.walk_mut(&mut |expr| {
                if let Expr::FunctionCall {
                    name, agg_slot, ..
                } = expr
                {
                    if self.registry.kind(name) == Some(FunctionKind::Aggregate) {
                        *agg_slot = Some(slot);
                        slot += 1;
                    }
                }
            });
        }
    }

    // -- patterns ----------------------------------------------------------

    /// Parse a node-relationship chain. With `expression` set the pattern is
    /// a WHERE/RETURN operand and must reference at least one bound node.
    fn parse_pattern(&mut self, expression: bool) -> Result<Pattern> {
        // p = (...) path variable
        let path_var = if self.peek().can_be_identifier()
            && self.peek_at(1).is_operator("=")
            && self.peek_at(2).is_symbol("(")
        {
            let name = self.expect_identifier()?;
            self.advance(); // '='
            self.variables.insert(name.clone());
            Some(name)
        } else {
            None
        };

        let mut elements = vec![PatternElement::Node(self.parse_node_pattern()?)];
        loop {
            let (has_rel, direction_left) = match () {
                () if self.peek().is_operator("<-") => (true, true),
                () if self.peek().is_operator("-") || self.peek().is_operator("--") => {
                    (true, false)
                }
                () => (false, false),
            };
            if !has_rel {
                break;
            }
            let rel = self.parse_rel_pattern(direction_left)?;
            elements.push(PatternElement::Rel(rel));
            elements.push(PatternElement::Node(self.parse_node_pattern()?));
        }

        let pattern = Pattern { path_var, elements };
        if expression && !pattern.has_node_reference() {
            return Err(Error::Parse(
                "PatternExpression must contain at least one NodeReference".into(),
            ));
        }
        Ok(pattern)
    }

    fn parse_node_pattern(&mut self) -> Result<NodePattern> {
        self.expect_symbol("(")?;
        let var = if self.peek().can_be_identifier()
            && (self.peek_at(1).is_symbol(":")
                || self.peek_at(1).is_symbol(")")
                || self.peek_at(1).is_symbol("{"))
        {
            Some(self.expect_identifier()?)
        } else {
            None
        };
        let label = if self.peek().is_symbol(":") {
            self.advance();
            Some(self.expect_identifier()?)
        } else {
            None
        };
        let props = if self.peek().is_symbol("{") {
            self.parse_property_map()?
        } else {
            Vec::new()
        };
        self.expect_symbol(")")?;

        let is_reference = var
            .as_ref()
            .is_some_and(|name| self.variables.contains(name));
        if let Some(name) = &var {
            self.variables.insert(name.clone());
        }
        Ok(NodePattern {
            var,
            label,
            props,
            is_reference,
        })
    }

    /// Parse the relationship between two nodes. The leading `<-` or `-`
    /// has already been inspected by the caller; this consumes it.
    fn parse_rel_pattern(&mut self, leading_left: bool) -> Result<RelPattern> {
        let lead = self.advance(); // '-', '<-' or '--'
        let bare = lead.is_operator("--");

        let mut var = None;
        let mut types = Vec::new();
        let mut hops = Hops::default();
        let mut props = Vec::new();

        if !bare && self.peek().is_symbol("[") {
            self.advance();
            if self.peek().can_be_identifier()
                && (self.peek_at(1).is_symbol(":")
                    || self.peek_at(1).is_symbol("]")
                    || self.peek_at(1).is_symbol("{"))
            {
                var = Some(self.expect_identifier()?);
            }
            if self.peek().is_symbol(":") {
                self.advance();
                types.push(self.expect_identifier()?);
                while self.peek().is_operator("|") {
                    self.advance();
                    if self.peek().is_symbol(":") {
                        self.advance();
                    }
                    types.push(self.expect_identifier()?);
                }
            }
            if self.peek().is_operator("*") {
                self.advance();
                hops = self.parse_hops()?;
            }
            if self.peek().is_symbol("{") {
                props = self.parse_property_map()?;
            }
            self.expect_symbol("]")?;
        }

        // Closing arrow decides direction together with the opener.
        let direction = if bare {
            // `-->` lexes as `--` followed by `>`
            if self.peek().is_operator(">") {
                self.advance();
                Direction::Right
            } else {
                Direction::Both
            }
        } else {
            let closing = self.advance();
            let trailing_right = if closing.is_operator("->") {
                true
            } else if closing.is_operator("-") || closing.is_operator("--") {
                false
            } else {
                return Err(Error::parse_at(
                    format!("Expected '-' or '->', found '{}'", closing.text),
                    closing.position,
                ));
            };
            match (leading_left, trailing_right) {
                (true, _) => Direction::Left,
                (false, true) => Direction::Right,
                (false, false) => Direction::Both,
            }
        };

        let is_reference = var
            .as_ref()
            .is_some_and(|name| self.variables.contains(name));
        if let Some(name) = &var {
            self.variables.insert(name.clone());
        }
        Ok(RelPattern {
            var,
            types,
            direction,
            hops,
            props,
            is_reference,
        })
    }

    /// Hop bounds after a `*`: `*`, `*n`, `*n..`, `*..m`, `*n..m`.
    fn parse_hops(&mut self) -> Result<Hops> {
        let mut min = 0usize;
        let mut max = Hops::UNBOUNDED;
        let mut exact = false;
        if self.peek().kind == TokenKind::Number {
            let token = self.advance();
            min = token.value.parse::<usize>().map_err(|_| {
                Error::parse_at("Invalid hop count", token.position)
            })?;
            exact = true;
        }
        if self.peek().is_operator("..") {
            self.advance();
            exact = false;
            if self.peek().kind == TokenKind::Number {
                let token = self.advance();
                max = token.value.parse::<usize>().map_err(|_| {
                    Error::parse_at("Invalid hop count", token.position)
                })?;
            }
        } else if exact {
            max = min;
        }
        Ok(Hops {
            min,
            max,
            variable: true,
        })
    }

    fn parse_property_map(&mut self) -> Result<Vec<(String, Expr)>> {
        self.expect_symbol("{")?;
        let mut props = Vec::new();
        if !self.peek().is_symbol("}") {
            loop {
                let key = self.parse_map_key()?;
                self.expect_symbol(":")?;
                let value = self.parse_expression()?;
                props.push((key, value));
                if self.peek().is_symbol(",") {
                    self.advance();
                } else {
                    break;
                }
            }
        }
        self.expect_symbol("}")?;
        Ok(props)
    }

    fn parse_map_key(&mut self) -> Result<String> {
        let token = self.peek().clone();
        if token.kind == TokenKind::Str || token.kind == TokenKind::BacktickIdentifier {
            self.advance();
            return Ok(token.value);
        }
        self.expect_identifier()
    }

    // -- expressions -------------------------------------------------------

    pub(crate) fn parse_expression(&mut self) -> Result<Expr> {
        let mut builder = ExprBuilder::default();
        loop {
            // Prefix unary operators
            while self.peek().is_operator("NOT") && !self.negated_comparison_follows() {
                self.advance();
                builder.push_unary(UnaryOp::Not);
            }
            while self.peek().is_operator("-") {
                self.advance();
                builder.push_unary(UnaryOp::Negate);
            }

            let operand = self.parse_operand()?;
            let operand = self.parse_postfix(operand)?;
            builder.push_operand(operand);

            match self.parse_binary_operator()? {
                Some(op) => builder.push_binary(op)?,
                None => break,
            }
        }
        builder.finish()
    }

    /// `NOT IN`, `NOT CONTAINS`, `NOT STARTS WITH`, `NOT ENDS WITH` use NOT
    /// in operator position; everywhere else NOT is a prefix.
    fn negated_comparison_follows(&self) -> bool {
        let next = self.peek_at(1);
        next.is_keyword("IN")
            || next.is_operator("CONTAINS")
            || next.is_operator("STARTS")
            || next.is_operator("ENDS")
    }

    /// Consume the next binary operator, or return None when the expression
    /// ends here.
    fn parse_binary_operator(&mut self) -> Result<Option<BinaryOp>> {
        let token = self.peek().clone();
        let op = match token.kind {
            TokenKind::Operator => match token.value.as_str() {
                "+" => Some(BinaryOp::Add),
                "-" => Some(BinaryOp::Subtract),
                "*" => Some(BinaryOp::Multiply),
                "/" => Some(BinaryOp::Divide),
                "%" => Some(BinaryOp::Modulo),
                "^" => Some(BinaryOp::Power),
                "=" => Some(BinaryOp::Equals),
                "<>" => Some(BinaryOp::NotEquals),
                "<" => Some(BinaryOp::LessThan),
                "<=" => Some(BinaryOp::LessThanOrEqual),
                ">" => Some(BinaryOp::GreaterThan),
                ">=" => Some(BinaryOp::GreaterThanOrEqual),
                "AND" => Some(BinaryOp::And),
                "OR" => Some(BinaryOp::Or),
                "CONTAINS" => Some(BinaryOp::Contains),
                "IS" => {
                    self.advance();
                    if self.peek().is_operator("NOT") {
                        self.advance();
                        return Ok(Some(BinaryOp::IsNot));
                    }
                    return Ok(Some(BinaryOp::Is));
                }
                "STARTS" => {
                    self.advance();
                    self.expect_keyword("WITH")?;
                    return Ok(Some(BinaryOp::StartsWith));
                }
                "ENDS" => {
                    self.advance();
                    self.expect_keyword("WITH")?;
                    return Ok(Some(BinaryOp::EndsWith));
                }
                _ => None,
            },
            TokenKind::UnaryOperator if token.value == "NOT" => {
                // Operator-position NOT: negated comparison
                self.advance();
                let next = self.advance();
                if next.is_keyword("IN") {
                    return Ok(Some(BinaryOp::NotIn));
                }
                if next.is_operator("CONTAINS") {
                    return Ok(Some(BinaryOp::NotContains));
                }
                if next.is_operator("STARTS") {
                    self.expect_keyword("WITH")?;
                    return Ok(Some(BinaryOp::NotStartsWith));
                }
                if next.is_operator("ENDS") {
                    self.expect_keyword("WITH")?;
                    return Ok(Some(BinaryOp::NotEndsWith));
                }
                return Err(Error::parse_at(
                    format!("Unexpected token '{}' after NOT", next.text),
                    next.position,
                ));
            }
            TokenKind::Keyword if token.value == "IN" => Some(BinaryOp::In),
            _ => None,
        };
        if let Some(op) = op {
            self.advance();
            Ok(Some(op))
        } else {
            Ok(None)
        }
    }

    fn parse_operand(&mut self) -> Result<Expr> {
        let token = self.peek().clone();
        match token.kind {
            TokenKind::Number => {
                self.advance();
                if token.value.contains('.') {
                    token
                        .value
                        .parse::<f64>()
                        .map(Expr::Float)
                        .map_err(|_| Error::parse_at("Invalid number", token.position))
                } else {
                    token
                        .value
                        .parse::<i64>()
                        .map(Expr::Int)
                        .map_err(|_| Error::parse_at("Invalid number", token.position))
                }
            }
            TokenKind::Str => {
                self.advance();
                Ok(Expr::Str(token.value))
            }
            TokenKind::FStr => {
                self.advance();
                self.parse_fstring(&token.value)
            }
            TokenKind::Bool => {
                self.advance();
                Ok(Expr::Bool(token.value == "TRUE"))
            }
            TokenKind::Keyword if token.value == "NULL" => {
                self.advance();
                Ok(Expr::Null)
            }
            TokenKind::Keyword if token.value == "CASE" => {
                self.advance();
                self.parse_case()
            }
            TokenKind::Symbol if token.value == "[" => self.parse_array_or_comprehension(),
            TokenKind::Symbol if token.value == "{" => {
                let pairs = self.parse_property_map()?;
                Ok(Expr::Map(pairs))
            }
            TokenKind::Symbol if token.value == "(" => {
                if self.pattern_follows() {
                    let pattern = self.parse_pattern(true)?;
                    Ok(Expr::PatternExpression(pattern))
                } else {
                    self.advance();
                    let inner = self.parse_expression()?;
                    self.expect_symbol(")")?;
                    Ok(Expr::Grouped(Box::new(inner)))
                }
            }
            _ if token.can_be_identifier() => {
                if self.peek_at(1).is_symbol("(") {
                    self.parse_function_call()
                } else {
                    self.advance();
                    Ok(Expr::Reference(token.identifier_text().to_string()))
                }
            }
            _ => Err(Error::parse_at(
                format!("Unexpected token '{}'", token.text),
                token.position,
            )),
        }
    }

    /// Disambiguate `(` at operand position: a graph pattern starts with
    /// `(ident:Label`, `(:Label`, or `(ident)` followed by a relationship;
    /// anything else is a parenthesised expression.
    fn pattern_follows(&self) -> bool {
        if self.peek_at(1).is_symbol(":") {
            return true;
        }
        if self.peek_at(1).can_be_identifier() {
            if self.peek_at(2).is_symbol(":") {
                return true;
            }
            if self.peek_at(2).is_symbol(")")
                && (self.peek_at(3).is_operator("-")
                    || self.peek_at(3).is_operator("<-")
                    || self.peek_at(3).is_operator("--"))
            {
                return true;
            }
        }
        false
    }

    fn parse_case(&mut self) -> Result<Expr> {
        let mut branches = Vec::new();
        while self.peek().is_keyword("WHEN") {
            self.advance();
            let when = self.parse_expression()?;
            self.expect_keyword("THEN")?;
            let then = self.parse_expression()?;
            branches.push((when, then));
        }
        if branches.is_empty() {
            return Err(Error::Parse("CASE requires at least one WHEN branch".into()));
        }
        let fallback = if self.peek().is_keyword("ELSE") {
            self.advance();
            Some(Box::new(self.parse_expression()?))
        } else {
            None
        };
        self.expect_keyword("END")?;
        Ok(Expr::Case { branches, fallback })
    }

    fn parse_array_or_comprehension(&mut self) -> Result<Expr> {
        // [var IN array ...] is a comprehension, anything else an array.
        if self.peek_at(1).can_be_identifier() && self.peek_at(2).is_keyword("IN") {
            self.advance(); // '['
            let var = self.expect_identifier()?;
            self.advance(); // IN
            self.variables.insert(var.clone());
            let array = Box::new(self.parse_expression()?);
            let (filter, map) = self.parse_comprehension_tail()?;
            self.expect_symbol("]")?;
            return Ok(Expr::ListComprehension {
                var,
                array,
                filter,
                map,
            });
        }
        self.advance(); // '['
        let mut items = Vec::new();
        if !self.peek().is_symbol("]") {
            loop {
                items.push(self.parse_expression()?);
                if self.peek().is_symbol(",") {
                    self.advance();
                } else {
                    break;
                }
            }
        }
        self.expect_symbol("]")?;
        Ok(Expr::Array(items))
    }

    /// `WHERE cond` and `| mapping` in either order, each at most once.
    fn parse_comprehension_tail(&mut self) -> Result<(Option<Box<Expr>>, Option<Box<Expr>>)> {
        let mut filter = None;
        let mut map = None;
        loop {
            if filter.is_none() && self.peek().is_keyword("WHERE") {
                self.advance();
                filter = Some(Box::new(self.parse_expression()?));
            } else if map.is_none() && self.peek().is_operator("|") {
                self.advance();
                map = Some(Box::new(self.parse_expression()?));
            } else {
                break;
            }
        }
        Ok((filter, map))
    }

    fn parse_function_call(&mut self) -> Result<Expr> {
        let name_token = self.advance();
        let name = name_token.identifier_text().to_lowercase();
        self.expect_symbol("(")?;

        let kind = self.registry.kind(&name).ok_or_else(|| {
            Error::parse_at(format!("Unknown function: {name}"), name_token.position)
        })?;

        // Predicate reducer form: fn(v IN array | expr WHERE cond)
        if kind == FunctionKind::Aggregate
            && self.peek().can_be_identifier()
            && self.peek_at(1).is_keyword("IN")
        {
            let var = self.expect_identifier()?;
            self.advance(); // IN
            self.variables.insert(var.clone());
            let array = Box::new(self.parse_expression()?);
            let (filter, map) = self.parse_comprehension_tail()?;
            self.expect_symbol(")")?;
            return Ok(Expr::PredicateReduce {
                function: name,
                var,
                array,
                map,
                filter,
            });
        }

        let distinct = if kind == FunctionKind::Aggregate && self.peek().is_keyword("DISTINCT") {
            self.advance();
            true
        } else {
            false
        };

        if kind == FunctionKind::Aggregate {
            if self.aggregate_depth > 0 {
                return Err(Error::Parse("Aggregate functions cannot be nested".into()));
            }
            self.aggregate_depth += 1;
        }
        let args = self.parse_call_arguments();
        if kind == FunctionKind::Aggregate {
            self.aggregate_depth -= 1;
        }
        let args = args?;
        self.registry.check_arity(&name, args.len())?;

        Ok(Expr::FunctionCall {
            name,
            args,
            distinct,
            agg_slot: None,
        })
    }

    fn parse_call_arguments(&mut self) -> Result<Vec<Expr>> {
        let mut args = Vec::new();
        if !self.peek().is_symbol(")") {
            loop {
                args.push(self.parse_expression()?);
                if self.peek().is_symbol(",") {
                    self.advance();
                } else {
                    break;
                }
            }
        }
        self.expect_symbol(")")?;
        Ok(args)
    }

    fn parse_postfix(&mut self, mut expr: Expr) -> Result<Expr> {
        loop {
            if self.peek().is_symbol(".") && self.peek_at(1).can_be_identifier() {
                self.advance();
                let field = self.expect_identifier()?;
                expr = Expr::Lookup {
                    base: Box::new(expr),
                    key: LookupKey::Field(field),
                };
            } else if self.peek().is_symbol("[") {
                self.advance();
                if self.peek().is_symbol(":") {
                    self.advance();
                    let end = if self.peek().is_symbol("]") {
                        None
                    } else {
                        Some(Box::new(self.parse_expression()?))
                    };
                    self.expect_symbol("]")?;
                    expr = Expr::Lookup {
                        base: Box::new(expr),
                        key: LookupKey::Slice { start: None, end },
                    };
                } else {
                    let first = self.parse_expression()?;
                    if self.peek().is_symbol(":") {
                        self.advance();
                        let end = if self.peek().is_symbol("]") {
                            None
                        } else {
                            Some(Box::new(self.parse_expression()?))
                        };
                        self.expect_symbol("]")?;
                        expr = Expr::Lookup {
                            base: Box::new(expr),
                            key: LookupKey::Slice {
                                start: Some(Box::new(first)),
                                end,
                            },
                        };
                    } else {
                        self.expect_symbol("]")?;
                        expr = Expr::Lookup {
                            base: Box::new(expr),
                            key: LookupKey::Index(Box::new(first)),
                        };
                    }
                }
            } else {
                break;
            }
        }
        Ok(expr)
    }

    /// Split an f-string body into literal chunks and interpolations.
    /// `{{` and `}}` escape to literal braces; interpolation text is parsed
    /// as an expression in the current variable scope.
    fn parse_fstring(&mut self, raw: &str) -> Result<Expr> {
        let chars: Vec<char> = raw.chars().collect();
        let mut parts: Vec<FStringPart> = Vec::new();
        let mut literal = String::new();
        let mut i = 0usize;
        while i < chars.len() {
            match chars[i] {
                '{' if chars.get(i + 1) == Some(&'{') => {
                    literal.push('{');
                    i += 2;
                }
                '}' if chars.get(i + 1) == Some(&'}') => {
                    literal.push('}');
                    i += 2;
                }
                '{' => {
                    if !literal.is_empty() {
                        parts.push(FStringPart::Literal(std::mem::take(&mut literal)));
                    }
                    let mut depth = 1usize;
                    let start = i + 1;
                    let mut end = start;
                    while end < chars.len() && depth > 0 {
                        match chars[end] {
                            '{' => depth += 1,
                            '}' => depth -= 1,
                            _ => {}
                        }
                        if depth > 0 {
                            end += 1;
                        }
                    }
                    if depth != 0 {
                        return Err(Error::Parse("Unterminated f-string interpolation".into()));
                    }
                    let inner: String = chars[start..end].iter().collect();
                    parts.push(FStringPart::Interpolation(self.parse_subexpression(&inner)?));
                    i = end + 1;
                }
                c => {
                    literal.push(c);
                    i += 1;
                }
            }
        }
        if !literal.is_empty() {
            parts.push(FStringPart::Literal(literal));
        }
        Ok(Expr::FString(parts))
    }

    /// Parse embedded expression text (f-string interpolations) with the
    /// current variable scope.
    fn parse_subexpression(&mut self, text: &str) -> Result<Expr> {
        let saved_tokens = std::mem::take(&mut self.tokens);
        let saved_pos = self.pos;
        self.tokens = Tokenizer::new(text).significant_tokens()?;
        self.pos = 0;
        let result = self.parse_expression();
        let at_end = self.peek().is_eof();
        self.tokens = saved_tokens;
        self.pos = saved_pos;
        let expr = result?;
        if !at_end {
            return Err(Error::Parse(format!(
                "Unexpected trailing input in f-string expression: {text}"
            )));
        }
        Ok(expr)
    }
}

// ---------------------------------------------------------------------------
// Shunting-Yard expression builder
// ---------------------------------------------------------------------------

#[derive(Debug)]
enum PendingOp {
    Binary(BinaryOp),
    Unary(UnaryOp),
}

impl PendingOp {
    fn precedence(&self) -> u8 {
        match self {
            PendingOp::Binary(op) => op.precedence(),
            PendingOp::Unary(op) => op.precedence(),
        }
    }
}

/// Operand / operator stack pair. Arriving binary operators fold every
/// stacked operator of greater-or-equal precedence (strictly greater for
/// the right-associative `^`) into sub-trees.
#[derive(Default)]
struct ExprBuilder {
    operands: Vec<Expr>,
    operators: Vec<PendingOp>,
}

impl ExprBuilder {
    fn push_operand(&mut self, expr: Expr) {
        self.operands.push(expr);
    }

    fn push_unary(&mut self, op: UnaryOp) {
        self.operators.push(PendingOp::Unary(op));
    }

    fn push_binary(&mut self, op: BinaryOp) -> Result<()> {
        while let Some(top) = self.operators.last() {
            let fold = if op == BinaryOp::Power {
                top.precedence() > op.precedence()
            } else {
                top.precedence() >= op.precedence()
            };
            if fold {
                self.fold_one()?;
            } else {
                break;
            }
        }
        self.operators.push(PendingOp::Binary(op));
        Ok(())
    }

    fn fold_one(&mut self) -> Result<()> {
        let op = self
            .operators
            .pop()
            .ok_or_else(|| Error::Parse("Malformed expression".into()))?;
        match op {
            PendingOp::Unary(u) => {
                let operand = self
                    .operands
                    .pop()
                    .ok_or_else(|| Error::Parse("Malformed expression".into()))?;
                self.operands.push(Expr::Unary {
                    op: u,
                    operand: Box::new(operand),
                });
            }
            PendingOp::Binary(b) => {
                let right = self
                    .operands
                    .pop()
                    .ok_or_else(|| Error::Parse("Malformed expression".into()))?;
                let left = self
                    .operands
                    .pop()
                    .ok_or_else(|| Error::Parse("Malformed expression".into()))?;
                self.operands.push(Expr::Binary {
                    op: b,
                    left: Box::new(left),
                    right: Box::new(right),
                });
            }
        }
        Ok(())
    }

    fn finish(mut self) -> Result<Expr> {
        while !self.operators.is_empty() {
            self.fold_one()?;
        }
        match (self.operands.pop(), self.operands.is_empty()) {
            (Some(expr), true) => Ok(expr),
            _ => Err(Error::Parse("Malformed expression".into())),
        }
    }
}
