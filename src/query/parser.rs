//! AQL Parser
//!
//! Recursive-descent parser from the token stream into `ast::Query`.
//! Expression precedence, low to high: ternary, `||`, `&&`, equality
//! (`== != LIKE NOT LIKE`), relational (`< <= > >= IN NOT IN`), range, additive,
//! multiplicative, unary, postfix.

use crate::diagnostics::Span;
use crate::error::{ParseError, ParseErrorKind};
use crate::query::ast::*;
use crate::query::token::{Keyword, Operator, Punct, Token, TokenKind};
use smallvec::SmallVec;

pub const DEFAULT_MAX_DEPTH: usize = 128;

type Result<T> = std::result::Result<T, ParseError>;

/// AQL Parser
pub struct AqlParser {
    tokens: Vec<Token>,
    pos: usize,
    next_ref: RefId,
    depth: usize,
    max_depth: usize,
    /// `false` while parsing the document operand of a modification clause,
    /// where a trailing `IN coll` must not be read as the IN operator
    allow_in: bool,
}

impl AqlParser {
    /// Create a parser over a token stream (as produced by the lexer)
    pub fn new(mut tokens: Vec<Token>) -> Self {
        if tokens.last().map_or(true, |t| t.kind != TokenKind::Eof) {
            let end = tokens.last().map(|t| t.span).unwrap_or_default();
            let eof = Span::new(end.end, end.end, end.line.max(1), end.column + end.len() as u32);
            tokens.push(Token::new(TokenKind::Eof, "", eof));
        }
        Self {
            tokens,
            pos: 0,
            next_ref: 0,
            depth: 0,
            max_depth: DEFAULT_MAX_DEPTH,
            allow_in: true,
        }
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    /// Parse a complete query
    pub fn parse(&mut self) -> Result<Query> {
        self.parse_query(false)
    }

    // ========================================================================
    // Query and clauses
    // ========================================================================

    /// query: clause* terminalClause
    fn parse_query(&mut self, nested: bool) -> Result<Query> {
        let start = self.peek().span;
        let mut clauses: Vec<Clause> = Vec::new();

        loop {
            let tok = self.peek().clone();
            let kw = match tok.kind {
                TokenKind::Keyword(kw) if kw.starts_clause() => kw,
                TokenKind::Eof => break,
                TokenKind::Punct(Punct::RParen) if nested => break,
                // end of a subquery passed as a call argument
                TokenKind::Punct(Punct::Comma) if nested => break,
                _ => {
                    let expected = if clauses.last().map_or(false, Clause::is_terminal) {
                        "end of query"
                    } else {
                        "a clause keyword"
                    };
                    return Err(self.unexpected(expected, "query"));
                }
            };

            if let Some(last) = clauses.last() {
                if last.is_terminal() {
                    return Err(self.error(
                        ParseErrorKind::MisplacedClause,
                        tok.span,
                        "query",
                        format!("{} clause after terminal {} clause", kw, last.keyword()),
                    ));
                }
            }

            let clause = match kw {
                Keyword::For => Clause::For(self.parse_for()?),
                Keyword::Let => Clause::Let(self.parse_let()?),
                Keyword::Filter => Clause::Filter(self.parse_filter()?),
                Keyword::Collect => Clause::Collect(self.parse_collect()?),
                Keyword::Sort => Clause::Sort(self.parse_sort()?),
                Keyword::Limit => Clause::Limit(self.parse_limit()?),
                Keyword::Return => Clause::Return(self.parse_return()?),
                Keyword::Insert => Clause::Insert(self.parse_insert()?),
                Keyword::Update => Clause::Update(self.parse_update(Keyword::Update)?),
                Keyword::Replace => Clause::Replace(self.parse_update(Keyword::Replace)?),
                Keyword::Upsert => Clause::Upsert(self.parse_upsert()?),
                Keyword::Remove => Clause::Remove(self.parse_remove()?),
                _ => return Err(self.unexpected("a clause keyword", "query")),
            };
            clauses.push(clause);
        }

        let end = match clauses.last() {
            Some(last) if last.is_terminal() => last.span(),
            _ => {
                return Err(self.error(
                    ParseErrorKind::MisplacedClause,
                    self.peek().span,
                    "query",
                    "query must end with a RETURN or data-modification clause",
                ))
            }
        };

        Ok(Query {
            clauses,
            span: start.merge(end),
        })
    }

    /// forClause: FOR var IN expr | FOR v[, e[, p]] IN traversal
    fn parse_for(&mut self) -> Result<ForClause> {
        let start = self.expect_keyword(Keyword::For, "FOR clause")?.span;

        let mut variables: SmallVec<[Binder; 3]> = SmallVec::new();
        variables.push(self.parse_binder("FOR clause")?);
        while self.try_punct(Punct::Comma) {
            if variables.len() == 3 {
                return Err(self.unexpected("IN", "FOR clause"));
            }
            variables.push(self.parse_binder("FOR clause")?);
        }

        self.expect_keyword(Keyword::In, "FOR clause")?;

        let source = match self.try_parse_traversal()? {
            Some(traversal) => ForSource::Traversal(traversal),
            None => {
                if variables.len() > 1 {
                    return Err(self.error(
                        ParseErrorKind::UnsupportedConstruct,
                        variables[1].span,
                        "FOR clause",
                        "multiple iteration variables are only valid for graph traversals",
                    ));
                }
                ForSource::Expr(self.parse_expression()?)
            }
        };

        Ok(ForClause {
            variables,
            source,
            span: start.merge(self.prev_span()),
        })
    }

    /// traversal: [min[..max]] OUTBOUND|INBOUND|ANY start edgeSource
    ///
    /// Backtracks and returns `None` when the tokens form a plain expression
    /// (e.g. `FOR i IN 1..10`).
    fn try_parse_traversal(&mut self) -> Result<Option<Traversal>> {
        let save = self.pos;
        let start_span = self.peek().span;

        let (min_depth, max_depth) = if self.peek().kind == TokenKind::Number {
            let min = match self.peek().lexeme.parse::<u32>() {
                Ok(n) => n,
                Err(_) => return Ok(None),
            };
            self.advance();
            let max = if self.try_operator(Operator::Range) {
                match self.peek().lexeme.parse::<u32>() {
                    Ok(n) if self.peek().kind == TokenKind::Number => {
                        self.advance();
                        n
                    }
                    _ => {
                        self.pos = save;
                        return Ok(None);
                    }
                }
            } else {
                min
            };
            (min, max)
        } else {
            (1, 1)
        };

        let direction = match self.peek().kind {
            TokenKind::Keyword(Keyword::Outbound) => Direction::Outbound,
            TokenKind::Keyword(Keyword::Inbound) => Direction::Inbound,
            TokenKind::Keyword(Keyword::Any) => Direction::Any,
            _ => {
                self.pos = save;
                return Ok(None);
            }
        };
        self.advance();

        if min_depth > max_depth {
            return Err(self.error(
                ParseErrorKind::UnsupportedConstruct,
                start_span.merge(self.prev_span()),
                "traversal",
                format!(
                    "minimum traversal depth {} exceeds maximum {}",
                    min_depth, max_depth
                ),
            ));
        }

        let start = self.parse_expression()?;
        let edges = self.parse_edge_source()?;

        Ok(Some(Traversal {
            min_depth,
            max_depth,
            direction,
            start,
            edges,
            span: start_span.merge(self.prev_span()),
        }))
    }

    /// Comma-separated edge collections, or `GRAPH name`
    fn parse_edge_source(&mut self) -> Result<EdgeSource> {
        let is_graph = {
            let tok = self.peek();
            tok.kind == TokenKind::Identifier
                && tok.lexeme.eq_ignore_ascii_case("GRAPH")
                && matches!(
                    self.peek_at(1).kind,
                    TokenKind::String | TokenKind::Identifier | TokenKind::BindParam
                )
        };
        if is_graph {
            self.advance();
            let tok = self.advance();
            let name = match tok.kind {
                TokenKind::BindParam => ExprKind::BindParam(tok.lexeme),
                _ => ExprKind::Literal(Literal::String(tok.lexeme)),
            };
            return Ok(EdgeSource::Graph(Expr::new(name, tok.span)));
        }

        let mut collections: SmallVec<[Expr; 2]> = SmallVec::new();
        loop {
            let tok = self.peek().clone();
            let expr = match tok.kind {
                TokenKind::Identifier => {
                    self.advance();
                    let id = self.fresh_ref();
                    Expr::new(
                        ExprKind::Variable(VarRef {
                            name: tok.lexeme,
                            id,
                        }),
                        tok.span,
                    )
                }
                TokenKind::CollectionBindParam => {
                    self.advance();
                    Expr::new(ExprKind::CollectionParam(tok.lexeme), tok.span)
                }
                TokenKind::Keyword(Keyword::Outbound)
                | TokenKind::Keyword(Keyword::Inbound)
                | TokenKind::Keyword(Keyword::Any) => {
                    return Err(self.error(
                        ParseErrorKind::UnsupportedConstruct,
                        tok.span,
                        "traversal",
                        "per-collection traversal directions are not supported",
                    ))
                }
                _ => return Err(self.unexpected("an edge collection", "traversal")),
            };
            collections.push(expr);
            if !self.try_punct(Punct::Comma) {
                break;
            }
        }
        Ok(EdgeSource::Collections(collections))
    }

    /// letClause: LET name = expr
    fn parse_let(&mut self) -> Result<LetClause> {
        let start = self.expect_keyword(Keyword::Let, "LET clause")?.span;
        let binder = self.parse_binder("LET clause")?;
        self.expect_operator(Operator::Assign, "LET clause")?;
        let expr = self.parse_expression()?;
        Ok(LetClause {
            binder,
            span: start.merge(expr.span),
            expr,
        })
    }

    fn parse_filter(&mut self) -> Result<FilterClause> {
        let start = self.expect_keyword(Keyword::Filter, "FILTER clause")?.span;
        let condition = self.parse_expression()?;
        Ok(FilterClause {
            span: start.merge(condition.span),
            condition,
        })
    }

    /// collectClause:
    ///     COLLECT [k = e, ...] [INTO g [= expr] | AGGREGATE a = f(x), ... | WITH COUNT INTO c]
    fn parse_collect(&mut self) -> Result<CollectClause> {
        const CONTEXT: &str = "COLLECT clause";
        let start = self.expect_keyword(Keyword::Collect, CONTEXT)?.span;

        let mut groups = Vec::new();
        if self.peek().kind == TokenKind::Identifier
            && self.peek_at(1).is_operator(Operator::Assign)
        {
            loop {
                let binder = self.parse_binder(CONTEXT)?;
                self.expect_operator(Operator::Assign, CONTEXT)?;
                let expr = self.parse_expression()?;
                groups.push(GroupAssignment { binder, expr });
                if !self.try_punct(Punct::Comma) {
                    break;
                }
            }
        }

        let mut into = None;
        let mut aggregates = Vec::new();
        let mut count_into = None;
        let mut form: Option<&'static str> = None;

        loop {
            let tok = self.peek().clone();
            let this_form = if tok.is_keyword(Keyword::Into) {
                "INTO"
            } else if tok.is_keyword(Keyword::With) {
                "WITH COUNT INTO"
            } else if tok.is_keyword(Keyword::Aggregate) {
                "AGGREGATE"
            } else {
                break;
            };

            if let Some(prev) = form {
                return Err(self.error(
                    ParseErrorKind::UnsupportedConstruct,
                    tok.span,
                    CONTEXT,
                    format!("COLLECT cannot combine {} with {}", prev, this_form),
                ));
            }
            form = Some(this_form);
            self.advance();

            match this_form {
                "INTO" => {
                    let binder = self.parse_binder(CONTEXT)?;
                    let projection = if self.try_operator(Operator::Assign) {
                        Some(self.parse_expression()?)
                    } else {
                        None
                    };
                    into = Some(IntoCapture { binder, projection });
                }
                "WITH COUNT INTO" => {
                    let is_count = {
                        let t = self.peek();
                        t.kind == TokenKind::Identifier && t.lexeme.eq_ignore_ascii_case("COUNT")
                    };
                    if !is_count {
                        return Err(self.unexpected("COUNT", CONTEXT));
                    }
                    self.advance();
                    self.expect_keyword(Keyword::Into, CONTEXT)?;
                    count_into = Some(self.parse_binder(CONTEXT)?);
                }
                _ => loop {
                    let binder = self.parse_binder(CONTEXT)?;
                    self.expect_operator(Operator::Assign, CONTEXT)?;
                    let expr = self.parse_expression()?;
                    match expr.kind {
                        ExprKind::Call { name, args } => aggregates.push(AggregateAssignment {
                            binder,
                            function: name,
                            args,
                            span: expr.span,
                        }),
                        _ => {
                            return Err(self.error(
                                ParseErrorKind::UnsupportedConstruct,
                                expr.span,
                                CONTEXT,
                                "AGGREGATE expects an aggregate function call",
                            ))
                        }
                    }
                    if !self.try_punct(Punct::Comma) {
                        break;
                    }
                },
            }
        }

        if groups.is_empty() && form.is_none() {
            return Err(self.unexpected("a grouping assignment or accumulator", CONTEXT));
        }

        Ok(CollectClause {
            groups,
            into,
            aggregates,
            count_into,
            span: start.merge(self.prev_span()),
        })
    }

    /// sortClause: SORT expr [ASC | DESC], ...
    fn parse_sort(&mut self) -> Result<SortClause> {
        let start = self.expect_keyword(Keyword::Sort, "SORT clause")?.span;
        let mut keys = Vec::new();
        loop {
            let expr = self.parse_expression()?;
            let direction = if self.try_keyword(Keyword::Desc) {
                SortDirection::Desc
            } else {
                self.try_keyword(Keyword::Asc);
                SortDirection::Asc
            };
            keys.push(SortKey { expr, direction });
            if !self.try_punct(Punct::Comma) {
                break;
            }
        }
        Ok(SortClause {
            keys,
            span: start.merge(self.prev_span()),
        })
    }

    /// limitClause: LIMIT count | LIMIT offset, count
    fn parse_limit(&mut self) -> Result<LimitClause> {
        let start = self.expect_keyword(Keyword::Limit, "LIMIT clause")?.span;
        let first = self.parse_expression()?;
        let (offset, count) = if self.try_punct(Punct::Comma) {
            (Some(first), self.parse_expression()?)
        } else {
            (None, first)
        };
        Ok(LimitClause {
            offset,
            span: start.merge(count.span),
            count,
        })
    }

    fn parse_return(&mut self) -> Result<ReturnClause> {
        let start = self.expect_keyword(Keyword::Return, "RETURN clause")?.span;
        let distinct = self.try_keyword(Keyword::Distinct);
        let expr = self.parse_expression()?;
        Ok(ReturnClause {
            distinct,
            span: start.merge(expr.span),
            expr,
        })
    }

    // ========================================================================
    // Modification clauses
    // ========================================================================

    /// insertClause: INSERT doc (INTO | IN) coll
    fn parse_insert(&mut self) -> Result<InsertClause> {
        const CONTEXT: &str = "INSERT clause";
        let start = self.expect_keyword(Keyword::Insert, CONTEXT)?.span;
        let document = self.parse_expression_no_in()?;
        self.expect_in_or_into(CONTEXT)?;
        let collection = self.parse_collection_name(CONTEXT)?;
        Ok(InsertClause {
            document,
            span: start.merge(collection.span()),
            collection,
        })
    }

    /// UPDATE|REPLACE doc IN coll | UPDATE|REPLACE key WITH doc IN coll
    fn parse_update(&mut self, keyword: Keyword) -> Result<UpdateClause> {
        let context = if keyword == Keyword::Update {
            "UPDATE clause"
        } else {
            "REPLACE clause"
        };
        let start = self.expect_keyword(keyword, context)?.span;
        let first = self.parse_expression_no_in()?;
        let (key, document) = if self.try_keyword(Keyword::With) {
            (Some(first), self.parse_expression_no_in()?)
        } else {
            (None, first)
        };
        self.expect_in_or_into(context)?;
        let collection = self.parse_collection_name(context)?;
        Ok(UpdateClause {
            key,
            document,
            span: start.merge(collection.span()),
            collection,
        })
    }

    /// Parsed in full so that lowering can reject it with a span
    fn parse_upsert(&mut self) -> Result<UpsertClause> {
        const CONTEXT: &str = "UPSERT clause";
        let start = self.expect_keyword(Keyword::Upsert, CONTEXT)?.span;
        let search = self.parse_expression_no_in()?;
        self.expect_keyword(Keyword::Insert, CONTEXT)?;
        let insert = self.parse_expression_no_in()?;
        let replace = if self.try_keyword(Keyword::Replace) {
            true
        } else {
            self.expect_keyword(Keyword::Update, CONTEXT)?;
            false
        };
        let update = self.parse_expression_no_in()?;
        self.expect_in_or_into(CONTEXT)?;
        let collection = self.parse_collection_name(CONTEXT)?;
        Ok(UpsertClause {
            search,
            insert,
            update,
            replace,
            span: start.merge(collection.span()),
            collection,
        })
    }

    /// removeClause: REMOVE key (IN | INTO) coll
    fn parse_remove(&mut self) -> Result<RemoveClause> {
        const CONTEXT: &str = "REMOVE clause";
        let start = self.expect_keyword(Keyword::Remove, CONTEXT)?.span;
        let key = self.parse_expression_no_in()?;
        self.expect_in_or_into(CONTEXT)?;
        let collection = self.parse_collection_name(CONTEXT)?;
        Ok(RemoveClause {
            key,
            span: start.merge(collection.span()),
            collection,
        })
    }

    fn expect_in_or_into(&mut self, context: &'static str) -> Result<()> {
        if self.try_keyword(Keyword::In) || self.try_keyword(Keyword::Into) {
            Ok(())
        } else {
            Err(self.unexpected("IN or INTO", context))
        }
    }

    /// Target collection of a modification: a name or `@@name`
    fn parse_collection_name(&mut self, context: &'static str) -> Result<CollectionName> {
        let tok = self.peek().clone();
        match tok.kind {
            TokenKind::Identifier => {
                self.advance();
                Ok(CollectionName::Named {
                    name: tok.lexeme,
                    span: tok.span,
                })
            }
            TokenKind::CollectionBindParam => {
                self.advance();
                Ok(CollectionName::Bind {
                    name: tok.lexeme,
                    span: tok.span,
                })
            }
            _ => Err(self.unexpected("a collection name", context)),
        }
    }

    // ========================================================================
    // Expressions
    // ========================================================================

    /// Full expression; every call counts one nesting level
    pub(crate) fn parse_expression(&mut self) -> Result<Expr> {
        self.enter()?;
        let expr = self.parse_ternary();
        self.leave();
        expr
    }

    /// Expression in which `IN` ends the operand instead of being an operator
    fn parse_expression_no_in(&mut self) -> Result<Expr> {
        let saved = self.allow_in;
        self.allow_in = false;
        let expr = self.parse_expression();
        self.allow_in = saved;
        expr
    }

    /// Bracketed sub-expressions may use IN again
    fn nested<T>(&mut self, f: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        let saved = self.allow_in;
        self.allow_in = true;
        let result = f(self);
        self.allow_in = saved;
        result
    }

    /// ternary: or ['?' [expr] ':' expr]
    fn parse_ternary(&mut self) -> Result<Expr> {
        let condition = self.parse_or()?;
        if !self.try_operator(Operator::Question) {
            return Ok(condition);
        }

        let then = if self.try_operator(Operator::Colon) {
            None
        } else {
            let then = self.parse_expression()?;
            self.expect_operator(Operator::Colon, "ternary expression")?;
            Some(Box::new(then))
        };
        let otherwise = self.parse_expression()?;
        let span = condition.span.merge(otherwise.span);
        Ok(Expr::new(
            ExprKind::Ternary {
                condition: Box::new(condition),
                then,
                otherwise: Box::new(otherwise),
            },
            span,
        ))
    }

    /// Left-associative operator chain. Every operator consumed adds one
    /// level to the tree, so it counts against the nesting limit
    fn parse_chain(
        &mut self,
        operand: fn(&mut Self) -> Result<Expr>,
        operator: fn(&mut Self) -> Option<BinaryOp>,
    ) -> Result<Expr> {
        let depth = self.depth;
        let expr = self.parse_chain_links(operand, operator);
        self.depth = depth;
        expr
    }

    fn parse_chain_links(
        &mut self,
        operand: fn(&mut Self) -> Result<Expr>,
        operator: fn(&mut Self) -> Option<BinaryOp>,
    ) -> Result<Expr> {
        let mut left = operand(self)?;
        while let Some(op) = operator(self) {
            self.enter()?;
            let right = operand(self)?;
            left = binary(op, left, right);
        }
        Ok(left)
    }

    fn parse_or(&mut self) -> Result<Expr> {
        self.parse_chain(Self::parse_and, |p| {
            (p.try_operator(Operator::Or) || p.try_keyword(Keyword::Or)).then_some(BinaryOp::Or)
        })
    }

    fn parse_and(&mut self) -> Result<Expr> {
        self.parse_chain(Self::parse_equality, |p| {
            (p.try_operator(Operator::And) || p.try_keyword(Keyword::And))
                .then_some(BinaryOp::And)
        })
    }

    /// equality: relational (('==' | '!=' | LIKE | NOT LIKE) relational)*
    fn parse_equality(&mut self) -> Result<Expr> {
        self.parse_chain(Self::parse_relational, |p| {
            if p.try_operator(Operator::Eq) {
                Some(BinaryOp::Eq)
            } else if p.try_operator(Operator::Ne) {
                Some(BinaryOp::Ne)
            } else if p.try_keyword(Keyword::Like) {
                Some(BinaryOp::Like)
            } else if p.check_keyword(Keyword::Not) && p.peek_at(1).is_keyword(Keyword::Like) {
                p.advance();
                p.advance();
                Some(BinaryOp::NotLike)
            } else {
                None
            }
        })
    }

    /// IN and NOT IN are only operators while `allow_in` is set
    fn parse_relational(&mut self) -> Result<Expr> {
        self.parse_chain(Self::parse_range, |p| {
            if p.try_operator(Operator::Lt) {
                Some(BinaryOp::Lt)
            } else if p.try_operator(Operator::Le) {
                Some(BinaryOp::Le)
            } else if p.try_operator(Operator::Gt) {
                Some(BinaryOp::Gt)
            } else if p.try_operator(Operator::Ge) {
                Some(BinaryOp::Ge)
            } else if p.allow_in && p.try_keyword(Keyword::In) {
                Some(BinaryOp::In)
            } else if p.allow_in
                && p.check_keyword(Keyword::Not)
                && p.peek_at(1).is_keyword(Keyword::In)
            {
                p.advance();
                p.advance();
                Some(BinaryOp::NotIn)
            } else {
                None
            }
        })
    }

    /// range: additive ['..' additive]
    fn parse_range(&mut self) -> Result<Expr> {
        let start = self.parse_additive()?;
        if !self.try_operator(Operator::Range) {
            return Ok(start);
        }
        let end = self.parse_additive()?;
        let span = start.span.merge(end.span);
        Ok(Expr::new(
            ExprKind::Range {
                start: Box::new(start),
                end: Box::new(end),
            },
            span,
        ))
    }

    fn parse_additive(&mut self) -> Result<Expr> {
        self.parse_chain(Self::parse_multiplicative, |p| {
            if p.try_operator(Operator::Plus) {
                Some(BinaryOp::Add)
            } else if p.try_operator(Operator::Minus) {
                Some(BinaryOp::Sub)
            } else {
                None
            }
        })
    }

    fn parse_multiplicative(&mut self) -> Result<Expr> {
        self.parse_chain(Self::parse_unary, |p| {
            if p.try_operator(Operator::Star) {
                Some(BinaryOp::Mul)
            } else if p.try_operator(Operator::Slash) {
                Some(BinaryOp::Div)
            } else if p.try_operator(Operator::Percent) {
                Some(BinaryOp::Mod)
            } else {
                None
            }
        })
    }

    /// unary: ('!' | NOT | '-' | '+') unary | postfix
    fn parse_unary(&mut self) -> Result<Expr> {
        let tok = self.peek().clone();
        let op = match tok.kind {
            TokenKind::Operator(Operator::Not) | TokenKind::Keyword(Keyword::Not) => UnaryOp::Not,
            TokenKind::Operator(Operator::Minus) => UnaryOp::Negate,
            TokenKind::Operator(Operator::Plus) => UnaryOp::Plus,
            _ => return self.parse_postfix(),
        };
        self.advance();

        self.enter()?;
        let operand = self.parse_unary();
        self.leave();
        let operand = operand?;

        let span = tok.span.merge(operand.span);
        // fold negative numeric literals
        let kind = match (op, operand.kind) {
            (UnaryOp::Negate, ExprKind::Literal(Literal::Integer(i))) => {
                ExprKind::Literal(Literal::Integer(-i))
            }
            (UnaryOp::Negate, ExprKind::Literal(Literal::Float(x))) => {
                ExprKind::Literal(Literal::Float(-x))
            }
            (op, kind) => ExprKind::Unary {
                op,
                operand: Box::new(Expr::new(kind, operand.span)),
            },
        };
        Ok(Expr::new(kind, span))
    }

    /// postfix: primary ('.' name | '[' expr ']' | '[*]')*
    ///
    /// Like operator chains, each access counts one nesting level.
    fn parse_postfix(&mut self) -> Result<Expr> {
        let depth = self.depth;
        let expr = self.parse_postfix_chain();
        self.depth = depth;
        expr
    }

    fn parse_postfix_chain(&mut self) -> Result<Expr> {
        let mut expr = self.parse_primary()?;
        loop {
            if self.check_punct(Punct::Dot) || self.check_punct(Punct::LBracket) {
                self.enter()?;
            }
            if self.try_punct(Punct::Dot) {
                let (property, span) = self.parse_attribute_name()?;
                let span = expr.span.merge(span);
                expr = Expr::new(
                    ExprKind::Member {
                        object: Box::new(expr),
                        property,
                    },
                    span,
                );
            } else if self.check_punct(Punct::LBracket) {
                self.advance();
                let tok = self.peek().clone();
                if tok.is_operator(Operator::Star) {
                    self.advance();
                    if self.check_punct(Punct::RBracket) {
                        let close = self.advance();
                        let span = expr.span.merge(close.span);
                        expr = Expr::new(ExprKind::Expand(Box::new(expr)), span);
                        continue;
                    }
                    return Err(self.error(
                        ParseErrorKind::UnsupportedConstruct,
                        tok.span,
                        "array expansion",
                        concat!(
                            "inline array operators ([* FILTER ...], [* RETURN ...], [**]) ",
                            "are not supported"
                        ),
                    ));
                }
                if tok.is_operator(Operator::Question) {
                    return Err(self.error(
                        ParseErrorKind::UnsupportedConstruct,
                        tok.span,
                        "array expansion",
                        "array question-mark operator [? ...] is not supported",
                    ));
                }
                let index = self.nested(|p| p.parse_expression())?;
                let close = self.expect_punct(Punct::RBracket, "index access")?;
                let span = expr.span.merge(close.span);
                expr = Expr::new(
                    ExprKind::Index {
                        object: Box::new(expr),
                        index: Box::new(index),
                    },
                    span,
                );
            } else {
                break;
            }
        }
        Ok(expr)
    }

    /// Attribute names may be identifiers, keywords, or string literals
    fn parse_attribute_name(&mut self) -> Result<(String, Span)> {
        let tok = self.peek().clone();
        match tok.kind {
            TokenKind::Identifier
            | TokenKind::Keyword(_)
            | TokenKind::Boolean(_)
            | TokenKind::Null
            | TokenKind::String => {
                self.advance();
                Ok((tok.lexeme, tok.span))
            }
            TokenKind::BindParam => Err(self.error(
                ParseErrorKind::UnsupportedConstruct,
                tok.span,
                "member access",
                "dynamic attribute names (`.@name`) are not supported",
            )),
            _ => Err(self.unexpected("an attribute name", "member access")),
        }
    }

    /// Literals, parameters, variables, calls, parenthesized expressions and
    /// subqueries, arrays and objects
    fn parse_primary(&mut self) -> Result<Expr> {
        let tok = self.peek().clone();
        match tok.kind {
            TokenKind::Number => {
                self.advance();
                let literal = parse_number(&tok.lexeme).ok_or_else(|| {
                    self.error(
                        ParseErrorKind::UnexpectedToken,
                        tok.span,
                        "expression",
                        format!("invalid numeric literal {}", tok.lexeme),
                    )
                })?;
                Ok(Expr::new(ExprKind::Literal(literal), tok.span))
            }
            TokenKind::String => {
                self.advance();
                Ok(Expr::new(
                    ExprKind::Literal(Literal::String(tok.lexeme)),
                    tok.span,
                ))
            }
            TokenKind::Boolean(b) => {
                self.advance();
                Ok(Expr::new(ExprKind::Literal(Literal::Bool(b)), tok.span))
            }
            TokenKind::Null => {
                self.advance();
                Ok(Expr::new(ExprKind::Literal(Literal::Null), tok.span))
            }
            TokenKind::BindParam => {
                self.advance();
                Ok(Expr::new(ExprKind::BindParam(tok.lexeme), tok.span))
            }
            TokenKind::CollectionBindParam => {
                self.advance();
                Ok(Expr::new(ExprKind::CollectionParam(tok.lexeme), tok.span))
            }
            TokenKind::Identifier => {
                let next = self.peek_at(1);
                if next.is_punct(Punct::LParen) || next.is_operator(Operator::Scope) {
                    return self.parse_call();
                }
                self.advance();
                let id = self.fresh_ref();
                Ok(Expr::new(
                    ExprKind::Variable(VarRef {
                        name: tok.lexeme,
                        id,
                    }),
                    tok.span,
                ))
            }
            // LIKE(text, pattern) is also a function
            TokenKind::Keyword(Keyword::Like) if self.peek_at(1).is_punct(Punct::LParen) => {
                self.parse_call()
            }
            TokenKind::Punct(Punct::LParen) => {
                let starts_query = match self.peek_at(1).kind {
                    TokenKind::Keyword(kw) => kw.starts_clause(),
                    _ => false,
                };
                self.advance();
                if starts_query {
                    let query = self.nested(|p| p.parse_query(true))?;
                    let close = self.expect_punct(Punct::RParen, "subquery")?;
                    return Ok(Expr::new(
                        ExprKind::Subquery(Box::new(query)),
                        tok.span.merge(close.span),
                    ));
                }
                let mut inner = self.nested(|p| p.parse_expression())?;
                let close = self.expect_punct(Punct::RParen, "parenthesized expression")?;
                inner.span = tok.span.merge(close.span);
                Ok(inner)
            }
            TokenKind::Punct(Punct::LBracket) => self.nested(|p| p.parse_array()),
            TokenKind::Punct(Punct::LBrace) => self.nested(|p| p.parse_object()),
            _ => Err(self.unexpected("an expression", "expression")),
        }
    }

    /// functionCall: name ('::' name)* '(' [expr (',' expr)*] ')'
    fn parse_call(&mut self) -> Result<Expr> {
        let first = self.advance();
        let mut name = first.lexeme;
        while self.try_operator(Operator::Scope) {
            let tok = self.peek().clone();
            match tok.kind {
                TokenKind::Identifier | TokenKind::Keyword(_) => {
                    self.advance();
                    name.push_str("::");
                    name.push_str(&tok.lexeme);
                }
                _ => return Err(self.unexpected("a function name", "function call")),
            }
        }
        self.expect_punct(Punct::LParen, "function call")?;

        let args = self.nested(|p| {
            let mut args = Vec::new();
            if !p.check_punct(Punct::RParen) {
                loop {
                    let starts_query = match p.peek().kind {
                        TokenKind::Keyword(kw) => kw.starts_clause(),
                        _ => false,
                    };
                    if starts_query {
                        args.push(p.parse_bare_subquery()?);
                    } else {
                        args.push(p.parse_expression()?);
                    }
                    if !p.try_punct(Punct::Comma) {
                        break;
                    }
                }
            }
            Ok(args)
        })?;
        let close = self.expect_punct(Punct::RParen, "function call")?;

        Ok(Expr::new(
            ExprKind::Call { name, args },
            first.span.merge(close.span),
        ))
    }

    /// Unparenthesized subquery argument, e.g. `LENGTH(FOR u IN users RETURN 1)`
    fn parse_bare_subquery(&mut self) -> Result<Expr> {
        self.enter()?;
        let query = self.parse_query(true);
        self.leave();
        let query = query?;
        let span = query.span;
        Ok(Expr::new(ExprKind::Subquery(Box::new(query)), span))
    }

    fn parse_array(&mut self) -> Result<Expr> {
        let open = self.expect_punct(Punct::LBracket, "array constructor")?;
        let mut elements = Vec::new();
        loop {
            if self.check_punct(Punct::RBracket) {
                break;
            }
            if self.try_operator(Operator::Spread) {
                elements.push(ArrayElement::Spread(self.parse_expression()?));
            } else {
                elements.push(ArrayElement::Item(self.parse_expression()?));
            }
            if !self.try_punct(Punct::Comma) {
                break;
            }
        }
        let close = self.expect_punct(Punct::RBracket, "array constructor")?;
        Ok(Expr::new(
            ExprKind::Array(elements),
            open.span.merge(close.span),
        ))
    }

    /// objectConstructor: '{' [entry (',' entry)*] '}'
    ///
    /// Entries are `key: value`, shorthand `name`, computed `[expr]: value`
    /// or spread `...expr`.
    fn parse_object(&mut self) -> Result<Expr> {
        const CONTEXT: &str = "object constructor";
        let open = self.expect_punct(Punct::LBrace, CONTEXT)?;
        let mut entries = Vec::new();

        loop {
            if self.check_punct(Punct::RBrace) {
                break;
            }
            let tok = self.peek().clone();
            let entry = match tok.kind {
                TokenKind::Operator(Operator::Spread) => {
                    self.advance();
                    let expr = self.parse_expression()?;
                    ObjectEntry::Spread {
                        span: tok.span.merge(expr.span),
                        expr,
                    }
                }
                TokenKind::Punct(Punct::LBracket) => {
                    self.advance();
                    let key = self.parse_expression()?;
                    self.expect_punct(Punct::RBracket, CONTEXT)?;
                    self.expect_operator(Operator::Colon, CONTEXT)?;
                    let value = self.parse_expression()?;
                    ObjectEntry::Computed {
                        span: tok.span.merge(value.span),
                        key,
                        value,
                    }
                }
                TokenKind::Identifier if !self.peek_at(1).is_operator(Operator::Colon) => {
                    // shorthand `{ name }`
                    self.advance();
                    let id = self.fresh_ref();
                    let value = Expr::new(
                        ExprKind::Variable(VarRef {
                            name: tok.lexeme.clone(),
                            id,
                        }),
                        tok.span,
                    );
                    ObjectEntry::Field {
                        key: tok.lexeme,
                        value,
                        shorthand: true,
                        span: tok.span,
                    }
                }
                TokenKind::Identifier
                | TokenKind::Keyword(_)
                | TokenKind::Boolean(_)
                | TokenKind::Null
                | TokenKind::String => {
                    self.advance();
                    self.expect_operator(Operator::Colon, CONTEXT)?;
                    let value = self.parse_expression()?;
                    ObjectEntry::Field {
                        key: tok.lexeme,
                        span: tok.span.merge(value.span),
                        value,
                        shorthand: false,
                    }
                }
                _ => return Err(self.unexpected("an attribute name", CONTEXT)),
            };
            entries.push(entry);
            if !self.try_punct(Punct::Comma) {
                break;
            }
        }

        let close = self.expect_punct(Punct::RBrace, CONTEXT)?;
        Ok(Expr::new(
            ExprKind::Object(entries),
            open.span.merge(close.span),
        ))
    }

    // ========================================================================
    // Helper functions
    // ========================================================================

    fn peek(&self) -> &Token {
        self.peek_at(0)
    }

    fn peek_at(&self, n: usize) -> &Token {
        let last = self.tokens.len() - 1;
        &self.tokens[(self.pos + n).min(last)]
    }

    fn prev_span(&self) -> Span {
        if self.pos == 0 {
            self.peek().span
        } else {
            self.tokens[self.pos - 1].span
        }
    }

    fn advance(&mut self) -> Token {
        let tok = self.peek().clone();
        if tok.kind != TokenKind::Eof {
            self.pos += 1;
        }
        tok
    }

    fn check_keyword(&self, kw: Keyword) -> bool {
        self.peek().is_keyword(kw)
    }

    fn check_punct(&self, p: Punct) -> bool {
        self.peek().is_punct(p)
    }

    fn try_keyword(&mut self, kw: Keyword) -> bool {
        if self.check_keyword(kw) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn try_operator(&mut self, op: Operator) -> bool {
        if self.peek().is_operator(op) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn try_punct(&mut self, p: Punct) -> bool {
        if self.check_punct(p) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect_keyword(&mut self, kw: Keyword, context: &'static str) -> Result<Token> {
        if self.check_keyword(kw) {
            Ok(self.advance())
        } else {
            Err(self.unexpected(kw.as_str(), context))
        }
    }

    fn expect_operator(&mut self, op: Operator, context: &'static str) -> Result<Token> {
        if self.peek().is_operator(op) {
            Ok(self.advance())
        } else {
            Err(self.unexpected(&format!("`{}`", op.as_str()), context))
        }
    }

    fn expect_punct(&mut self, p: Punct, context: &'static str) -> Result<Token> {
        if self.check_punct(p) {
            Ok(self.advance())
        } else {
            Err(self.unexpected(&format!("`{}`", p.as_char()), context))
        }
    }

    fn parse_binder(&mut self, context: &'static str) -> Result<Binder> {
        let tok = self.peek().clone();
        if tok.kind == TokenKind::Identifier {
            self.advance();
            Ok(Binder {
                name: tok.lexeme,
                span: tok.span,
            })
        } else {
            Err(self.unexpected("a variable name", context))
        }
    }

    fn fresh_ref(&mut self) -> RefId {
        let id = self.next_ref;
        self.next_ref += 1;
        id
    }

    /// Claim one nesting level, failing once `max_depth` is reached
    fn enter(&mut self) -> Result<()> {
        if self.depth >= self.max_depth {
            return Err(self.error(
                ParseErrorKind::UnsupportedConstruct,
                self.peek().span,
                "expression",
                format!("expression nesting exceeds the maximum depth of {}", self.max_depth),
            ));
        }
        self.depth += 1;
        Ok(())
    }

    fn leave(&mut self) {
        self.depth = self.depth.saturating_sub(1);
    }

    /// UnexpectedToken error at the current token
    fn unexpected(&self, expected: &str, context: &'static str) -> ParseError {
        let tok = self.peek();
        ParseError {
            kind: ParseErrorKind::UnexpectedToken,
            span: tok.span,
            found: tok.describe(),
            context,
            message: format!("expected {}, found {}", expected, tok.describe()),
        }
    }

    fn error(
        &self,
        kind: ParseErrorKind,
        span: Span,
        context: &'static str,
        message: impl Into<String>,
    ) -> ParseError {
        ParseError {
            kind,
            span,
            found: self.peek().describe(),
            context,
            message: message.into(),
        }
    }
}

fn binary(op: BinaryOp, left: Expr, right: Expr) -> Expr {
    let span = left.span.merge(right.span);
    Expr::new(
        ExprKind::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        },
        span,
    )
}

fn parse_number(text: &str) -> Option<Literal> {
    if text.contains(|c| matches!(c, '.' | 'e' | 'E')) {
        return text.parse::<f64>().ok().map(Literal::Float);
    }
    match text.parse::<i64>() {
        Ok(i) => Some(Literal::Integer(i)),
        Err(_) => text.parse::<f64>().ok().map(Literal::Float),
    }
}

/// Parse a token stream with the default nesting limit
pub fn parse(tokens: Vec<Token>) -> Result<Query> {
    AqlParser::new(tokens).parse()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::lexer::tokenize;

    fn parse_str(query: &str) -> Result<Query> {
        parse(tokenize(query).unwrap())
    }

    #[test]
    fn test_parse_simple_for() {
        let query = parse_str("FOR u IN users FILTER u.active == true RETURN u.name").unwrap();
        assert_eq!(query.clauses.len(), 3);

        match &query.clauses[0] {
            Clause::For(f) => {
                assert_eq!(f.variables[0].name, "u");
                match &f.source {
                    ForSource::Expr(e) => assert_eq!(e.as_variable().unwrap().name, "users"),
                    _ => panic!("Expected plain FOR"),
                }
            }
            _ => panic!("Expected FOR clause"),
        }
        match &query.clauses[1] {
            Clause::Filter(f) => match &f.condition.kind {
                ExprKind::Binary { op, .. } => assert_eq!(*op, BinaryOp::Eq),
                _ => panic!("Expected binary condition"),
            },
            _ => panic!("Expected FILTER clause"),
        }
        assert!(query.clauses[2].is_terminal());
    }

    #[test]
    fn test_parse_traversal() {
        let query = parse_str("FOR v, e IN 1..2 OUTBOUND \"accounts/1\" transfers RETURN \
            v").unwrap();
        match &query.clauses[0] {
            Clause::For(f) => {
                assert_eq!(f.variables.len(), 2);
                match &f.source {
                    ForSource::Traversal(t) => {
                        assert_eq!((t.min_depth, t.max_depth), (1, 2));
                        assert_eq!(t.direction, Direction::Outbound);
                        match &t.edges {
                            EdgeSource::Collections(c) => assert_eq!(c.len(), 1),
                            _ => panic!("Expected edge collections"),
                        }
                    }
                    _ => panic!("Expected traversal"),
                }
            }
            _ => panic!("Expected FOR clause"),
        }
    }

    #[test]
    fn test_traversal_depth_defaults() {
        let query = parse_str("FOR v IN INBOUND u._id follows, likes RETURN v").unwrap();
        match &query.clauses[0] {
            Clause::For(ForClause {
                source: ForSource::Traversal(t),
                ..
            }) => {
                assert_eq!((t.min_depth, t.max_depth), (1, 1));
                assert_eq!(t.direction, Direction::Inbound);
                match &t.edges {
                    EdgeSource::Collections(c) => assert_eq!(c.len(), 2),
                    _ => panic!("Expected edge collections"),
                }
            }
            _ => panic!("Expected traversal"),
        }

        let query = parse_str("FOR v IN 3 ANY 'a/1' GRAPH 'social' RETURN v").unwrap();
        match &query.clauses[0] {
            Clause::For(ForClause {
                source: ForSource::Traversal(t),
                ..
            }) => {
                assert_eq!((t.min_depth, t.max_depth), (3, 3));
                assert!(matches!(t.edges, EdgeSource::Graph(_)));
            }
            _ => panic!("Expected traversal"),
        }
    }

    #[test]
    fn test_numeric_range_is_not_traversal() {
        let query = parse_str("FOR i IN 1..10 RETURN i").unwrap();
        match &query.clauses[0] {
            Clause::For(f) => match &f.source {
                ForSource::Expr(e) => assert!(matches!(e.kind, ExprKind::Range { .. })),
                _ => panic!("Expected range expression"),
            },
            _ => panic!("Expected FOR clause"),
        }
    }

    #[test]
    fn test_precedence() {
        let query = parse_str("RETURN a || b && c == 1 + 2 * 3").unwrap();
        let expr = match &query.clauses[0] {
            Clause::Return(r) => &r.expr,
            _ => panic!("Expected RETURN"),
        };
        match &expr.kind {
            ExprKind::Binary { op, right, .. } => {
                assert_eq!(*op, BinaryOp::Or);
                match &right.kind {
                    ExprKind::Binary { op, right, .. } => {
                        assert_eq!(*op, BinaryOp::And);
                        match &right.kind {
                            ExprKind::Binary { op, right, .. } => {
                                assert_eq!(*op, BinaryOp::Eq);
                                match &right.kind {
                                    ExprKind::Binary { op, .. } => assert_eq!(*op, BinaryOp::Add),
                                    _ => panic!("Expected addition"),
                                }
                            }
                            _ => panic!("Expected equality"),
                        }
                    }
                    _ => panic!("Expected AND"),
                }
            }
            _ => panic!("Expected OR"),
        }
    }

    #[test]
    fn test_not_in_and_not_like() {
        let query =
            parse_str("FOR u IN users FILTER u.x NOT IN [1, 2] AND u.n NOT LIKE 'a%' RETURN u")
                .unwrap();
        match &query.clauses[1] {
            Clause::Filter(f) => match &f.condition.kind {
                ExprKind::Binary { left, right, .. } => {
                    assert!(matches!(
                        left.kind,
                        ExprKind::Binary {
                            op: BinaryOp::NotIn,
                            ..
                        }
                    ));
                    assert!(matches!(
                        right.kind,
                        ExprKind::Binary {
                            op: BinaryOp::NotLike,
                            ..
                        }
                    ));
                }
                _ => panic!("Expected AND"),
            },
            _ => panic!("Expected FILTER"),
        }
    }

    #[test]
    fn test_ternary_forms() {
        let query = parse_str("RETURN [a ? 1 : 2, b ?: 3]").unwrap();
        match &query.clauses[0] {
            Clause::Return(r) => match &r.expr.kind {
                ExprKind::Array(items) => {
                    assert!(matches!(
                        &items[0],
                        ArrayElement::Item(Expr {
                            kind: ExprKind::Ternary { then: Some(_), .. },
                            ..
                        })
                    ));
                    assert!(matches!(
                        &items[1],
                        ArrayElement::Item(Expr {
                            kind: ExprKind::Ternary { then: None, .. },
                            ..
                        })
                    ));
                }
                _ => panic!("Expected array"),
            },
            _ => panic!("Expected RETURN"),
        }
    }

    #[test]
    fn test_parse_collect_forms() {
        let query =
            parse_str("FOR u IN users COLLECT dept = u.department WITH COUNT INTO cnt RETURN \
                {dept, cnt}")
                .unwrap();
        match &query.clauses[1] {
            Clause::Collect(c) => {
                assert_eq!(c.groups.len(), 1);
                assert_eq!(c.groups[0].binder.name, "dept");
                assert_eq!(c.count_into.as_ref().unwrap().name, "cnt");
            }
            _ => panic!("Expected COLLECT"),
        }

        let query =
            parse_str("FOR u IN users COLLECT AGGREGATE total = SUM(u.x), n = COUNT() RETURN total")
                .unwrap();
        match &query.clauses[1] {
            Clause::Collect(c) => {
                assert!(c.groups.is_empty());
                assert_eq!(c.aggregates.len(), 2);
                assert_eq!(c.aggregates[0].function, "SUM");
            }
            _ => panic!("Expected COLLECT"),
        }
    }

    #[test]
    fn test_collect_forms_are_exclusive() {
        let err = parse_str("FOR u IN users COLLECT k = u.k INTO g WITH COUNT INTO n RETURN k")
            .unwrap_err();
        assert_eq!(err.kind, ParseErrorKind::UnsupportedConstruct);
        assert_eq!(err.context, "COLLECT clause");
    }

    #[test]
    fn test_object_constructor() {
        let query = parse_str("RETURN {a: 1, \"b c\": 2, [k]: 3, d, ...rest, filter: 4,}").unwrap();
        match &query.clauses[0] {
            Clause::Return(r) => match &r.expr.kind {
                ExprKind::Object(entries) => {
                    assert_eq!(entries.len(), 6);
                    assert!(matches!(&entries[1], ObjectEntry::Field { key, .. } if key == "b c"));
                    assert!(matches!(&entries[2], ObjectEntry::Computed { .. }));
                    assert!(matches!(
                        &entries[3],
                        ObjectEntry::Field {
                            shorthand: true,
                            ..
                        }
                    ));
                    assert!(matches!(&entries[4], ObjectEntry::Spread { .. }));
                    assert!(matches!(
                        &entries[5],
                        ObjectEntry::Field { key, .. } if key == "filter"
                    ));
                }
                _ => panic!("Expected object"),
            },
            _ => panic!("Expected RETURN"),
        }
    }

    #[test]
    fn test_namespaced_call_and_subquery() {
        let query =
            parse_str("LET s = (FOR x IN xs RETURN AQL::TO_STRING(x)) RETURN LENGTH(s)").unwrap();
        match &query.clauses[0] {
            Clause::Let(l) => match &l.expr.kind {
                ExprKind::Subquery(q) => match &q.clauses[1] {
                    Clause::Return(r) => {
                        assert!(
                            matches!(
                                &r.expr.kind,
                                ExprKind::Call { name, .. } if name == "AQL::TO_STRING"
                            )
                        )
                    }
                    _ => panic!("Expected RETURN"),
                },
                _ => panic!("Expected subquery"),
            },
            _ => panic!("Expected LET"),
        }
    }

    #[test]
    fn test_modification_clauses() {
        let query = parse_str("FOR u IN users UPDATE u WITH {seen: true} IN users").unwrap();
        match &query.clauses[1] {
            Clause::Update(u) => {
                assert!(u.key.is_some());
                assert!(matches!(u.document.kind, ExprKind::Object(_)));
                assert!(matches!(
                    &u.collection,
                    CollectionName::Named { name, .. } if name == "users"
                ));
            }
            _ => panic!("Expected UPDATE"),
        }

        let query = parse_str("REMOVE 'k1' IN @@coll").unwrap();
        match &query.clauses[0] {
            Clause::Remove(r) => {
                assert!(matches!(
                    &r.collection,
                    CollectionName::Bind { name, .. } if name == "coll"
                ))
            }
            _ => panic!("Expected REMOVE"),
        }

        let query = parse_str("UPSERT {k: 1} INSERT {k: 1} UPDATE {n: 2} IN things").unwrap();
        assert!(matches!(query.clauses[0], Clause::Upsert(_)));
    }

    #[test]
    fn test_missing_terminal() {
        let err = parse_str("FOR u IN users FILTER u.x > 1").unwrap_err();
        assert_eq!(err.kind, ParseErrorKind::MisplacedClause);
    }

    #[test]
    fn test_clause_after_return() {
        let err = parse_str("FOR u IN users RETURN u FILTER u.x").unwrap_err();
        assert_eq!(err.kind, ParseErrorKind::MisplacedClause);
        assert_eq!(err.span.start, 24);
    }

    #[test]
    fn test_unexpected_token() {
        let err = parse_str("FOR u users RETURN u").unwrap_err();
        assert_eq!(err.kind, ParseErrorKind::UnexpectedToken);
        assert_eq!(err.context, "FOR clause");
        assert_eq!(err.found, "identifier `users`");
    }

    #[test]
    fn test_inline_array_operator_unsupported() {
        let err = parse_str("FOR u IN users RETURN u.tags[* FILTER CURRENT != null]").unwrap_err();
        assert_eq!(err.kind, ParseErrorKind::UnsupportedConstruct);

        let query = parse_str("FOR u IN users RETURN u.friends[*].name").unwrap();
        match &query.clauses[1] {
            Clause::Return(r) => match &r.expr.kind {
                ExprKind::Member { object, .. } => {
                    assert!(matches!(object.kind, ExprKind::Expand(_)))
                }
                _ => panic!("Expected member access"),
            },
            _ => panic!("Expected RETURN"),
        }
    }

    #[test]
    fn test_nesting_limit() {
        let deep = format!("RETURN {}1{}", "(".repeat(40), ")".repeat(40));
        let err = AqlParser::new(tokenize(&deep).unwrap())
            .with_max_depth(16)
            .parse()
            .unwrap_err();
        assert_eq!(err.kind, ParseErrorKind::UnsupportedConstruct);

        assert!(AqlParser::new(tokenize(&deep).unwrap()).parse().is_ok());
    }

    #[test]
    fn test_long_operator_chains_are_bounded() {
        let terms: Vec<String> = (0..1000).map(|i| format!("u.a == {}", i)).collect();
        let query = format!("FOR u IN users FILTER {} RETURN u", terms.join(" || "));
        let err = parse_str(&query).unwrap_err();
        assert_eq!(err.kind, ParseErrorKind::UnsupportedConstruct);
        assert!(err.message.contains("maximum depth"), "{}", err.message);

        let sum = format!("RETURN {}", vec!["1"; 2000].join(" + "));
        let err = parse_str(&sum).unwrap_err();
        assert_eq!(err.kind, ParseErrorKind::UnsupportedConstruct);

        let path = format!("FOR u IN users RETURN u{}", ".a".repeat(2000));
        assert!(parse_str(&path).is_err());

        let terms: Vec<String> = (0..100).map(|i| format!("u.a == {}", i)).collect();
        let query = format!("FOR u IN users FILTER {} RETURN u", terms.join(" || "));
        assert!(parse_str(&query).is_ok());
    }

    #[test]
    fn test_bare_subquery_argument() {
        let query = parse_str("RETURN LENGTH(FOR u IN users RETURN 1)").unwrap();
        match &query.clauses[0] {
            Clause::Return(r) => match &r.expr.kind {
                ExprKind::Call { name, args } => {
                    assert_eq!(name, "LENGTH");
                    match &args[0].kind {
                        ExprKind::Subquery(q) => assert_eq!(q.clauses.len(), 2),
                        _ => panic!("Expected subquery argument"),
                    }
                }
                _ => panic!("Expected call"),
            },
            _ => panic!("Expected RETURN"),
        }

        let query =
            parse_str("RETURN MERGE(FOR u IN users RETURN u, FOR o IN orders RETURN o)").unwrap();
        match &query.clauses[0] {
            Clause::Return(r) => match &r.expr.kind {
                ExprKind::Call { args, .. } => {
                    assert_eq!(args.len(), 2);
                    assert!(args.iter().all(|a| matches!(a.kind, ExprKind::Subquery(_))));
                }
                _ => panic!("Expected call"),
            },
            _ => panic!("Expected RETURN"),
        }
    }

    #[test]
    fn test_clause_dispatch() {
        let query = parse_str("FOR u IN users REMOVE u IN users").unwrap();
        assert!(matches!(query.clauses.last(), Some(Clause::Remove(_))));

        let err = parse_str("WITH users RETURN 1").unwrap_err();
        assert_eq!(err.kind, ParseErrorKind::UnexpectedToken);
        assert!(err.message.contains("a clause keyword"), "{}", err.message);
    }

    #[test]
    fn test_negative_literal_folding() {
        let query = parse_str("RETURN -5").unwrap();
        match &query.clauses[0] {
            Clause::Return(r) => {
                assert_eq!(r.expr.kind, ExprKind::Literal(Literal::Integer(-5)))
            }
            _ => panic!("Expected RETURN"),
        }
    }

    #[test]
    fn test_unique_ref_ids() {
        let query = parse_str("FOR u IN users FILTER u.a == u.b RETURN u").unwrap();
        let mut ids = Vec::new();
        fn collect(expr: &Expr, ids: &mut Vec<RefId>) {
            match &expr.kind {
                ExprKind::Variable(v) => ids.push(v.id),
                ExprKind::Member { object, .. } => collect(object, ids),
                ExprKind::Binary { left, right, .. } => {
                    collect(left, ids);
                    collect(right, ids);
                }
                _ => {}
            }
        }
        for clause in &query.clauses {
            match clause {
                Clause::For(f) => {
                    if let ForSource::Expr(e) = &f.source {
                        collect(e, &mut ids)
                    }
                }
                Clause::Filter(f) => collect(&f.condition, &mut ids),
                Clause::Return(r) => collect(&r.expr, &mut ids),
                _ => {}
            }
        }
        let mut dedup = ids.clone();
        dedup.sort();
        dedup.dedup();
        assert_eq!(ids.len(), 4);
        assert_eq!(dedup.len(), 4);
    }
}
