//! AST → pipeline lowering
//!
//! LET bindings are inlined by substitution, FOR clauses become Source/Join
//! stages, and cross-source FILTER conjuncts move into the Join they correlate.
//! Anything without a faithful single-statement rendering is rejected here.

use crate::diagnostics::Span;
use crate::error::LoweringError;
use crate::ir::pipeline::*;
use crate::query::ast::{self, BinaryOp, Clause, ExprKind, ForSource, ObjectEntry};
use crate::query::scope::{BindingId, BindingKind, Resolution};
use std::collections::HashMap;
use tracing::trace;

type Result<T> = std::result::Result<T, LoweringError>;

/// What a binding stands for while lowering later clauses
#[derive(Debug, Clone)]
enum Bound {
    /// Document produced by a source (collection row, traversal vertex or edge)
    Source(String),
    /// Inlined LET value
    Value(Expr),
    GroupKey(Expr),
    Accumulator(Accumulator),
    Capture(Capture),
    Rejected(&'static str),
}

#[derive(Debug, Clone)]
struct Capture {
    alias: String,
    group: u32,
    /// Captured variable names with their lowered values
    members: Vec<(String, Expr)>,
}

#[derive(Default)]
struct QueryState {
    stages: Vec<Stage>,
    /// Document aliases of this query's sources
    aliases: Vec<String>,
    group: Option<u32>,
    limited: bool,
    sorted_before_group: bool,
}

impl QueryState {
    fn source_count(&self) -> usize {
        self.stages
            .iter()
            .filter(|s| matches!(s, Stage::Source(_) | Stage::Join(_)))
            .count()
    }

    fn first_source(&self) -> Option<&Source> {
        self.stages.iter().find_map(|s| match s {
            Stage::Source(src) => Some(src),
            _ => None,
        })
    }

    /// Alias and value of a lone array source
    fn array_source(&self) -> Option<(&str, &Expr)> {
        match self.first_source() {
            Some(Source {
                alias,
                kind: SourceKind::Array(value),
                ..
            }) if self.source_count() == 1 => Some((alias.as_str(), value)),
            _ => None,
        }
    }

    /// A keyed batch modification renders as one `WHERE _key IN` statement
    fn check_keyed_batch(&self, span: Span) -> Result<()> {
        if self
            .stages
            .iter()
            .any(|s| matches!(s, Stage::Filter(_) | Stage::Limit(_)))
        {
            return Err(unsupported(
                span,
                "FILTER or LIMIT before a modification over an array source",
            ));
        }
        Ok(())
    }
}

pub struct Lowerer<'r> {
    resolution: &'r Resolution,
    env: HashMap<BindingId, Bound>,
    next_group: u32,
    /// Accumulators discovered while lowering post-COLLECT expressions
    pending: Vec<Accumulator>,
}

impl<'r> Lowerer<'r> {
    pub fn new(resolution: &'r Resolution) -> Self {
        Self {
            resolution,
            env: HashMap::new(),
            next_group: 0,
            pending: Vec::new(),
        }
    }

    pub fn lower(mut self, query: &ast::Query) -> Result<Pipeline> {
        let pipeline = self.lower_query(query)?;
        trace!(stages = pipeline.stages.len(), "lowering complete");
        Ok(pipeline)
    }

    /// One query level. Subqueries recurse with a fresh `QueryState`.
    fn lower_query(&mut self, query: &ast::Query) -> Result<Pipeline> {
        let mut state = QueryState::default();

        for clause in &query.clauses {
            match clause {
                Clause::For(f) => self.lower_for(f, &mut state)?,
                Clause::Let(l) => {
                    let value = self.lower_expr(&l.expr)?;
                    self.bind(&l.binder, Bound::Value(value));
                }
                Clause::Filter(f) => {
                    if state.limited {
                        return Err(unsupported(f.span, "FILTER after LIMIT"));
                    }
                    let predicate = self.lower_expr(&f.condition)?;
                    state.stages.push(Stage::Filter(Filter { predicate }));
                }
                Clause::Collect(c) => self.lower_collect(c, &mut state)?,
                Clause::Sort(s) => {
                    if state.limited {
                        return Err(unsupported(s.span, "SORT after LIMIT"));
                    }
                    let mut keys = Vec::with_capacity(s.keys.len());
                    for key in &s.keys {
                        keys.push(SortKey {
                            expr: self.lower_expr(&key.expr)?,
                            direction: key.direction,
                        });
                    }
                    if state.group.is_none() {
                        state.sorted_before_group = true;
                    }
                    state.stages.push(Stage::OrderBy(OrderBy { keys }));
                }
                Clause::Limit(l) => {
                    if state.limited {
                        return Err(unsupported(l.span, "second LIMIT"));
                    }
                    let offset = match &l.offset {
                        Some(offset) => Some(self.lower_limit_value(offset)?),
                        None => None,
                    };
                    let count = self.lower_limit_value(&l.count)?;
                    state.stages.push(Stage::Limit(Limit { offset, count }));
                    state.limited = true;
                }
                Clause::Return(r) => {
                    if r.distinct {
                        state.stages.push(Stage::Distinct);
                    }
                    let project = self.lower_projection(&r.expr, state.source_count())?;
                    state.stages.push(Stage::Project(project));
                }
                Clause::Insert(_) | Clause::Update(_) | Clause::Replace(_) | Clause::Remove(_) => {
                    let modify = self.lower_modification(clause, &state)?;
                    state.stages.push(Stage::Modify(modify));
                }
                Clause::Upsert(u) => return Err(unsupported(u.span, "UPSERT")),
            }
            self.flush_pending(&mut state);
        }

        push_join_predicates(&mut state.stages);
        let pipeline = Pipeline::new(state.stages);

        if pipeline.has_traversal() {
            if let Some(src) = pipeline
                .sources()
                .find(|s| matches!(s.kind, SourceKind::Subquery(_) | SourceKind::Array(_)))
            {
                return Err(unsupported(
                    src.span,
                    "subquery or array source combined with a graph traversal",
                ));
            }
        }
        Ok(pipeline)
    }

    // ========================================================================
    // FOR
    // ========================================================================

    /// The first FOR becomes the Source, later ones Joins
    fn lower_for(&mut self, f: &ast::ForClause, state: &mut QueryState) -> Result<()> {
        if state.group.is_some() {
            return Err(unsupported(f.span, "FOR after COLLECT"));
        }
        if state.limited {
            return Err(unsupported(f.span, "FOR after LIMIT"));
        }

        let vertex = &f.variables[0];
        let kind = match &f.source {
            ForSource::Expr(expr) => self.lower_for_source(expr)?,
            ForSource::Traversal(t) => self.lower_traversal(t, f, state)?,
        };

        self.bind(vertex, Bound::Source(vertex.name.clone()));
        if let Some(edge) = f.variables.get(1) {
            self.bind(edge, Bound::Source(edge.name.clone()));
        }
        if let Some(path) = f.variables.get(2) {
            self.bind(path, Bound::Rejected("path variables"));
        }

        let source = Source {
            alias: vertex.name.clone(),
            kind,
            span: f.span,
        };
        state.aliases.push(vertex.name.clone());
        if state.stages.iter().any(|s| matches!(s, Stage::Source(_))) {
            state.stages.push(Stage::Join(Join {
                source,
                predicates: Vec::new(),
            }));
        } else {
            state.stages.push(Stage::Source(source));
        }
        Ok(())
    }

    /// Collection, `@@name`, subquery (inline or LET-bound) or array source
    fn lower_for_source(&mut self, expr: &ast::Expr) -> Result<SourceKind> {
        match &expr.kind {
            ExprKind::Variable(var) if self.resolution.is_collection(var) => Ok(
                SourceKind::Collection(CollectionRef::Named(var.name.clone())),
            ),
            ExprKind::CollectionParam(name) => Ok(SourceKind::Collection(CollectionRef::Bind {
                name: name.clone(),
                span: expr.span,
            })),
            ExprKind::Subquery(query) => {
                Ok(SourceKind::Subquery(Box::new(self.lower_query(query)?)))
            }
            ExprKind::Variable(var) => match self.bound(var) {
                Some(Bound::Value(Expr::Subquery(pipeline))) => {
                    Ok(SourceKind::Subquery(pipeline.clone()))
                }
                Some(Bound::Value(value)) if is_array_value(value) => {
                    Ok(SourceKind::Array(value.clone()))
                }
                _ => Err(unsupported(expr.span, "FOR over a computed expression")),
            },
            ExprKind::BindParam(_) | ExprKind::Array(_) => {
                let value = self.lower_expr(expr)?;
                if is_array_value(&value) {
                    Ok(SourceKind::Array(value))
                } else {
                    Err(unsupported(expr.span, "FOR over a computed expression"))
                }
            }
            _ => Err(unsupported(expr.span, "FOR over a computed expression")),
        }
    }

    fn lower_traversal(
        &mut self,
        t: &ast::Traversal,
        f: &ast::ForClause,
        state: &QueryState,
    ) -> Result<SourceKind> {
        let edge_exprs = match &t.edges {
            ast::EdgeSource::Collections(edges) => edges,
            ast::EdgeSource::Graph(name) => {
                return Err(unsupported(name.span, "named graph traversal"))
            }
        };

        let mut edges = Vec::with_capacity(edge_exprs.len());
        for edge in edge_exprs {
            let collection = match &edge.kind {
                ExprKind::Variable(var) if self.resolution.is_collection(var) => {
                    CollectionRef::Named(var.name.clone())
                }
                ExprKind::CollectionParam(name) => CollectionRef::Bind {
                    name: name.clone(),
                    span: edge.span,
                },
                _ => {
                    return Err(unsupported(
                        edge.span,
                        "edge collection must be a collection name or @@parameter",
                    ))
                }
            };
            edges.push(collection);
        }

        let start = match self.start_alias(&t.start) {
            Some(alias) if state.aliases.contains(&alias) => TraversalStart::Alias(alias),
            Some(_) => {
                return Err(unsupported(
                    t.start.span,
                    "traversal starting from a document of an enclosing query",
                ))
            }
            None => {
                let start = self.lower_expr(&t.start)?;
                if !start.is_constant() {
                    return Err(unsupported(
                        t.start.span,
                        concat!(
                            "traversal start must be a constant, a bind parameter ",
                            "or a prior document variable"
                        ),
                    ));
                }
                TraversalStart::Vertex(start)
            }
        };

        let mut edge_alias = None;
        if let Some(edge) = f.variables.get(1) {
            if self.is_used(edge) {
                if (t.min_depth, t.max_depth) != (1, 1) {
                    return Err(unsupported(
                        edge.span,
                        "edge variable on a variable-depth traversal",
                    ));
                }
                edge_alias = Some(edge.name.clone());
            }
        }
        if let Some(path) = f.variables.get(2) {
            if self.is_used(path) {
                return Err(unsupported(path.span, "path variables"));
            }
        }

        Ok(SourceKind::Traversal(TraversalSource {
            start,
            direction: t.direction,
            min_depth: t.min_depth,
            max_depth: t.max_depth,
            edges,
            edge_alias,
        }))
    }

    /// `u` or `u._id` where `u` is a document variable
    fn start_alias(&self, expr: &ast::Expr) -> Option<String> {
        let var = match &expr.kind {
            ExprKind::Variable(var) => var,
            ExprKind::Member { object, property } if property == "_id" => object.as_variable()?,
            _ => return None,
        };
        match self.bound(var) {
            Some(Bound::Source(alias)) => Some(alias.clone()),
            _ => None,
        }
    }

    // ========================================================================
    // COLLECT
    // ========================================================================

    /// COLLECT becomes a GroupBy stage.
    ///
    /// Keys are bound as group keys and `WITH COUNT`/AGGREGATE outputs as
    /// accumulators. An INTO capture is kept symbolic so that later
    /// `LENGTH(g)` or `g[*].x` can be rewritten into accumulators.
    fn lower_collect(&mut self, c: &ast::CollectClause, state: &mut QueryState) -> Result<()> {
        if state.group.is_some() {
            return Err(unsupported(c.span, "second COLLECT"));
        }
        if state.limited {
            return Err(unsupported(c.span, "COLLECT after LIMIT"));
        }
        if state.sorted_before_group {
            return Err(unsupported(c.span, "SORT before COLLECT"));
        }
        if state.source_count() == 0 {
            return Err(unsupported(c.span, "COLLECT without a FOR source"));
        }

        let group = self.next_group;
        self.next_group += 1;

        let mut keys = Vec::with_capacity(c.groups.len());
        for assignment in &c.groups {
            keys.push(GroupKey {
                alias: assignment.binder.name.clone(),
                expr: self.lower_expr(&assignment.expr)?,
            });
        }

        let mut accumulators = Vec::new();
        for agg in &c.aggregates {
            let function = aggregate_function(&agg.function);
            let argument = match (agg.args.as_slice(), &function) {
                ([], AggregateFunction::Count) => None,
                (_, AggregateFunction::Count) if agg.args.len() == 1 => None,
                ([arg], _) => Some(self.lower_expr(arg)?),
                _ => {
                    return Err(unsupported(
                        agg.span,
                        "aggregate functions take exactly one argument",
                    ))
                }
            };
            accumulators.push(Accumulator {
                alias: agg.binder.name.clone(),
                group,
                function,
                argument,
                span: agg.span,
            });
        }
        if let Some(count) = &c.count_into {
            accumulators.push(Accumulator {
                alias: count.name.clone(),
                group,
                function: AggregateFunction::Count,
                argument: None,
                span: count.span,
            });
        }

        let mut capture = None;
        if let Some(into) = &c.into {
            match &into.projection {
                Some(projection) => accumulators.push(Accumulator {
                    alias: into.binder.name.clone(),
                    group,
                    function: AggregateFunction::Push,
                    argument: Some(self.lower_expr(projection)?),
                    span: into.binder.span,
                }),
                None => {
                    let mut members = Vec::new();
                    for binding in self.resolution.captured_by(c.span) {
                        let value = match (binding.kind, self.env.get(&binding.id)) {
                            (BindingKind::Path, _) => continue,
                            (_, Some(Bound::Source(alias))) => Expr::field(alias),
                            (_, Some(Bound::Value(value))) => value.clone(),
                            _ => continue,
                        };
                        members.push((binding.name.clone(), value));
                    }
                    capture = Some(Capture {
                        alias: into.binder.name.clone(),
                        group,
                        members,
                    });
                }
            }
        }

        for (assignment, key) in c.groups.iter().zip(&keys) {
            let expr = Expr::GroupKey {
                alias: key.alias.clone(),
                group,
                expr: Box::new(key.expr.clone()),
            };
            self.bind(&assignment.binder, Bound::GroupKey(expr));
        }
        let mut binders: Vec<&ast::Binder> = c.aggregates.iter().map(|a| &a.binder).collect();
        binders.extend(c.count_into.iter());
        if let Some(into) = c.into.as_ref().filter(|i| i.projection.is_some()) {
            binders.push(&into.binder);
        }
        for (binder, acc) in binders.into_iter().zip(&accumulators) {
            self.bind(binder, Bound::Accumulator(acc.clone()));
        }
        if let (Some(into), Some(capture)) = (&c.into, capture) {
            self.bind(&into.binder, Bound::Capture(capture));
        }

        state.group = Some(group);
        state.stages.push(Stage::GroupBy(GroupBy {
            id: group,
            keys,
            accumulators,
        }));
        Ok(())
    }

    /// Add accumulators found in the last clause to the open GroupBy
    fn flush_pending(&mut self, state: &mut QueryState) {
        let group = match state.group {
            Some(group) => group,
            None => return,
        };
        let (mine, rest): (Vec<_>, Vec<_>) = std::mem::take(&mut self.pending)
            .into_iter()
            .partition(|acc| acc.group == group);
        self.pending = rest;

        if let Some(Stage::GroupBy(g)) = state
            .stages
            .iter_mut()
            .find(|s| matches!(s, Stage::GroupBy(_)))
        {
            for acc in mine {
                let exists = g
                    .accumulators
                    .iter()
                    .any(|a| a.alias == acc.alias && a.function == acc.function);
                if !exists {
                    g.accumulators.push(acc);
                }
            }
        }
    }

    fn derived_accumulator(
        &mut self,
        alias: String,
        group: u32,
        function: AggregateFunction,
        argument: Option<Expr>,
        span: Span,
    ) -> Expr {
        let acc = Accumulator {
            alias,
            group,
            function,
            argument,
            span,
        };
        self.pending.push(acc.clone());
        Expr::Aggregate(Box::new(acc))
    }

    /// `g[*].u.name`, `g[*].u` or `g[0].u` over an INTO capture
    fn capture_path(&mut self, expr: &ast::Expr) -> Result<Option<Expr>> {
        let mut steps: Vec<&ast::Expr> = Vec::new();
        let mut cursor = expr;
        let root = loop {
            match &cursor.kind {
                ExprKind::Member { object, .. } | ExprKind::Index { object, .. } => {
                    steps.push(cursor);
                    cursor = &**object;
                }
                ExprKind::Expand(inner) => break inner,
                _ => return Ok(None),
            }
        };
        let capture = match root.as_variable().and_then(|v| self.bound(v)) {
            Some(Bound::Capture(capture)) => capture.clone(),
            _ => return Ok(None),
        };
        steps.reverse();

        let (element, rest) = match steps.first().map(|s| &s.kind) {
            Some(ExprKind::Member { property, .. }) => {
                match capture.members.iter().find(|(name, _)| name == property) {
                    Some((_, value)) => (value.clone(), &steps[1..]),
                    None => {
                        return Err(unsupported(
                            expr.span,
                            "INTO capture access must start with a captured variable",
                        ))
                    }
                }
            }
            None if capture.members.len() == 1 => (capture.members[0].1.clone(), &steps[..]),
            _ => {
                return Err(unsupported(
                    expr.span,
                    "INTO capture of multiple variables (deep capture)",
                ))
            }
        };

        let mut value = element;
        for step in rest {
            value = match &step.kind {
                ExprKind::Member { property, .. } => value.member(property),
                ExprKind::Index { index, .. } => {
                    let index = self.lower_expr(index)?;
                    value.push_step(PathStep::Index(Box::new(index)))
                }
                _ => value,
            };
        }

        Ok(Some(self.derived_accumulator(
            capture.alias.clone(),
            capture.group,
            AggregateFunction::Push,
            Some(value),
            expr.span,
        )))
    }

    // ========================================================================
    // RETURN
    // ========================================================================

    /// RETURN or INSERT document as select items; object fields become aliases
    fn lower_projection(&mut self, expr: &ast::Expr, source_count: usize) -> Result<Project> {
        let mut items = Vec::new();

        if let ExprKind::Object(entries) = &expr.kind {
            for entry in entries {
                match entry {
                    ObjectEntry::Field { key, value, .. } => items.push(ProjectItem {
                        expr: self.lower_expr(value)?,
                        alias: Some(key.clone()),
                    }),
                    ObjectEntry::Computed { span, .. } => {
                        return Err(unsupported(*span, "computed object key in a projection"))
                    }
                    ObjectEntry::Spread { expr: inner, span } => {
                        let doc = inner.as_variable().and_then(|v| match self.bound(v) {
                            Some(Bound::Source(alias)) => Some(alias.clone()),
                            _ => None,
                        });
                        match doc {
                            Some(alias) if source_count == 1 => items.push(ProjectItem {
                                expr: Expr::field(&alias),
                                alias: None,
                            }),
                            _ => {
                                return Err(unsupported(
                                    *span,
                                    "object spread outside a single-source projection",
                                ))
                            }
                        }
                    }
                }
            }
            return Ok(Project { items });
        }

        let alias = expr
            .as_variable()
            .and_then(|v| self.resolution.resolve(v))
            .filter(|b| {
                matches!(
                    b.kind,
                    BindingKind::Let
                        | BindingKind::GroupKey
                        | BindingKind::Accumulator
                        | BindingKind::GroupCapture
                )
            })
            .map(|b| b.name.clone());
        items.push(ProjectItem {
            expr: self.lower_expr(expr)?,
            alias,
        });
        Ok(Project { items })
    }

    fn lower_limit_value(&mut self, expr: &ast::Expr) -> Result<Expr> {
        let value = self.lower_expr(expr)?;
        match &value {
            Expr::Literal(ast::Literal::Integer(n)) if *n >= 0 => Ok(value),
            Expr::Param { .. } => Ok(value),
            _ => Err(unsupported(
                expr.span,
                "LIMIT requires non-negative integer literals or bind parameters",
            )),
        }
    }

    // ========================================================================
    // Data modification
    // ========================================================================

    /// INSERT, UPDATE, REPLACE or REMOVE.
    ///
    /// Without a FOR the target is a key. Over an array source the key is
    /// the array element (`_key IN list`). Otherwise the modification
    /// applies to the documents of the single iterated collection.
    fn lower_modification(&mut self, clause: &Clause, state: &QueryState) -> Result<Modify> {
        let span = clause.span();
        if state.group.is_some() {
            return Err(unsupported(span, "data modification after COLLECT"));
        }
        if state
            .stages
            .iter()
            .any(|s| matches!(s, Stage::OrderBy(_) | Stage::Distinct))
        {
            return Err(unsupported(span, "data modification after SORT"));
        }
        let limit_offset = state.stages.iter().any(|s| match s {
            Stage::Limit(l) => l.offset.is_some(),
            _ => false,
        });
        if limit_offset {
            return Err(unsupported(span, "LIMIT offset on a data modification"));
        }
        if state
            .stages
            .iter()
            .any(|s| match s {
                Stage::Source(source) => matches!(source.kind, SourceKind::Traversal(_)),
                Stage::Join(_) => true,
                _ => false,
            })
            && !matches!(clause, Clause::Insert(_))
        {
            return Err(unsupported(
                span,
                "UPDATE, REPLACE and REMOVE require a single collection source",
            ));
        }

        let source_count = state.source_count();
        let collection = match clause {
            Clause::Insert(i) => collection_ref(&i.collection),
            Clause::Update(u) | Clause::Replace(u) => collection_ref(&u.collection),
            Clause::Remove(r) => collection_ref(&r.collection),
            _ => return Err(unsupported(span, "unsupported data modification")),
        };
        let op = match clause {
            Clause::Insert(i) => {
                let content = if source_count == 0 {
                    let document = self.lower_expr(&i.document)?;
                    if !document.is_constant() {
                        return Err(unsupported(i.document.span, "INSERT of a computed document"));
                    }
                    InsertContent::Document(document)
                } else {
                    InsertContent::Select(self.lower_projection(&i.document, source_count)?)
                };
                ModifyOp::Insert(content)
            }
            Clause::Update(u) | Clause::Replace(u) => {
                let replace = matches!(clause, Clause::Replace(_));
                if source_count == 0 {
                    let (key, document) = match &u.key {
                        Some(key) => (self.lower_key(key)?, &u.document),
                        None => (self.key_from_document(&u.document)?, &u.document),
                    };
                    let changes = self.lower_changes(document, replace)?;
                    ModifyOp::Update {
                        key: Some(KeyMatch::Equals(key)),
                        changes,
                    }
                } else if let Some((alias, keys)) = state.array_source() {
                    let targets_key = match &u.key {
                        Some(key) => self.is_key_ref(key, alias),
                        None => find_key_field(&u.document)
                            .map_or(false, |value| self.is_key_ref(value, alias)),
                    };
                    if !targets_key {
                        return Err(unsupported(
                            span,
                            "UPDATE over an array source must use the element as the document key",
                        ));
                    }
                    state.check_keyed_batch(span)?;
                    let changes = self.lower_changes(&u.document, replace)?;
                    if changes_reference(&changes, alias) {
                        return Err(unsupported(
                            u.document.span,
                            "changes that depend on the array element",
                        ));
                    }
                    ModifyOp::Update {
                        key: Some(KeyMatch::AnyOf(keys.clone())),
                        changes,
                    }
                } else {
                    let alias = self.iterated_alias(&collection, state, span)?;
                    let targets_doc = match &u.key {
                        Some(key) => self.is_document_ref(key, &alias),
                        None => self.document_key_targets(&u.document, &alias),
                    };
                    if !targets_doc {
                        return Err(unsupported(
                            span,
                            "UPDATE target must be the iterated document",
                        ));
                    }
                    let changes = self.lower_changes(&u.document, replace)?;
                    ModifyOp::Update { key: None, changes }
                }
            }
            Clause::Remove(r) => {
                if source_count == 0 {
                    let key = self.lower_key(&r.key)?;
                    ModifyOp::Remove {
                        key: Some(KeyMatch::Equals(key)),
                    }
                } else if let Some((alias, keys)) = state.array_source() {
                    let key = find_key_field(&r.key).unwrap_or(&r.key);
                    if !self.is_key_ref(key, alias) {
                        return Err(unsupported(
                            r.key.span,
                            "REMOVE over an array source must use the element as the document key",
                        ));
                    }
                    state.check_keyed_batch(span)?;
                    ModifyOp::Remove {
                        key: Some(KeyMatch::AnyOf(keys.clone())),
                    }
                } else {
                    let alias = self.iterated_alias(&collection, state, span)?;
                    if !self.is_document_ref(&r.key, &alias) {
                        return Err(unsupported(
                            r.key.span,
                            "REMOVE target must be the iterated document",
                        ));
                    }
                    ModifyOp::Remove { key: None }
                }
            }
            _ => return Err(unsupported(span, "unsupported data modification")),
        };
        Ok(Modify {
            collection,
            op,
            span,
        })
    }

    /// Alias of the single collection source, which must be `target`
    fn iterated_alias(
        &self,
        target: &CollectionRef,
        state: &QueryState,
        span: Span,
    ) -> Result<String> {
        match state.first_source() {
            Some(Source {
                alias,
                kind: SourceKind::Collection(collection),
                ..
            }) if collection.same_as(target) => Ok(alias.clone()),
            _ => Err(unsupported(
                span,
                "data modification must target the collection iterated by the FOR source",
            )),
        }
    }

    /// `u`, `u._key` or `u._id` for the document variable `alias`
    fn is_document_ref(&self, expr: &ast::Expr, alias: &str) -> bool {
        let var = match &expr.kind {
            ExprKind::Variable(var) => var,
            ExprKind::Member { object, property } if property == "_key" || property == "_id" => {
                match object.as_variable() {
                    Some(var) => var,
                    None => return false,
                }
            }
            _ => return false,
        };
        matches!(self.bound(var), Some(Bound::Source(a)) if a == alias)
    }

    /// `k` or `k._key` where `k` iterates an array of document keys
    fn is_key_ref(&self, expr: &ast::Expr, alias: &str) -> bool {
        let var = match &expr.kind {
            ExprKind::Variable(var) => var,
            ExprKind::Member { object, property } if property == "_key" => {
                match object.as_variable() {
                    Some(var) => var,
                    None => return false,
                }
            }
            _ => return false,
        };
        matches!(self.bound(var), Some(Bound::Source(a)) if a == alias)
    }

    /// `{_key: u._key, ...}` for the document variable `alias`
    fn document_key_targets(&self, document: &ast::Expr, alias: &str) -> bool {
        match find_key_field(document) {
            Some(value) => self.is_document_ref(value, alias),
            None => false,
        }
    }

    fn lower_key(&mut self, key: &ast::Expr) -> Result<Expr> {
        let key_expr = find_key_field(key).unwrap_or(key);
        let value = self.lower_expr(key_expr)?;
        if !value.is_constant() {
            return Err(unsupported(key.span, "document key must be a constant"));
        }
        Ok(value)
    }

    fn key_from_document(&mut self, document: &ast::Expr) -> Result<Expr> {
        match find_key_field(document) {
            Some(value) => self.lower_key(value),
            None => Err(unsupported(
                document.span,
                "UPDATE without WITH requires a document literal containing _key",
            )),
        }
    }

    /// Literal objects become field assignments; `_key` is never assigned
    fn lower_changes(&mut self, document: &ast::Expr, replace: bool) -> Result<Changes> {
        if let ExprKind::Object(entries) = &document.kind {
            let mut fields = Vec::new();
            let mut literal = true;
            for entry in entries {
                match entry {
                    ObjectEntry::Field { key, value, .. } => {
                        if key != "_key" {
                            fields.push((key.clone(), self.lower_expr(value)?));
                        }
                    }
                    _ => literal = false,
                }
            }
            if literal {
                return Ok(if replace {
                    Changes::Content(Expr::Object(fields))
                } else {
                    Changes::Set(fields)
                });
            }
        }
        let value = self.lower_expr(document)?;
        Ok(if replace {
            Changes::Content(value)
        } else {
            Changes::Merge(value)
        })
    }

    // ========================================================================
    // Expressions
    // ========================================================================

    fn lower_expr(&mut self, expr: &ast::Expr) -> Result<Expr> {
        let lowered = match &expr.kind {
            ExprKind::Literal(lit) => Expr::Literal(lit.clone()),
            ExprKind::Variable(var) => self.lower_variable(var, expr.span)?,
            ExprKind::BindParam(name) => Expr::Param {
                name: name.clone(),
                span: expr.span,
            },
            ExprKind::CollectionParam(_) => {
                return Err(unsupported(
                    expr.span,
                    "collection bind parameter in expression position",
                ))
            }
            ExprKind::Member { object, property } => {
                if let Some(capture) = self.capture_path(expr)? {
                    return Ok(capture);
                }
                self.lower_expr(object)?.member(property)
            }
            ExprKind::Index { object, index } => {
                if let Some(capture) = self.capture_path(expr)? {
                    return Ok(capture);
                }
                let base = self.lower_expr(object)?;
                let index = self.lower_expr(index)?;
                base.push_step(PathStep::Index(Box::new(index)))
            }
            ExprKind::Expand(inner) => {
                if let Some(capture) = self.capture_path(expr)? {
                    return Ok(capture);
                }
                self.lower_expr(inner)?
            }
            ExprKind::Unary { op, operand } => Expr::Unary {
                op: *op,
                operand: Box::new(self.lower_expr(operand)?),
            },
            ExprKind::Binary { op, left, right } => match (&right.kind, op) {
                (ExprKind::Range { start, end }, BinaryOp::In | BinaryOp::NotIn) => {
                    Expr::Between {
                        value: Box::new(self.lower_expr(left)?),
                        low: Box::new(self.lower_expr(start)?),
                        high: Box::new(self.lower_expr(end)?),
                        negated: *op == BinaryOp::NotIn,
                    }
                }
                _ => Expr::Binary {
                    op: *op,
                    left: Box::new(self.lower_expr(left)?),
                    right: Box::new(self.lower_expr(right)?),
                },
            },
            ExprKind::Ternary {
                condition,
                then,
                otherwise,
            } => Expr::Conditional {
                condition: Box::new(self.lower_expr(condition)?),
                then: match then {
                    Some(then) => Some(Box::new(self.lower_expr(then)?)),
                    None => None,
                },
                otherwise: Box::new(self.lower_expr(otherwise)?),
            },
            ExprKind::Range { .. } => {
                return Err(unsupported(
                    expr.span,
                    "range expression outside the right side of IN",
                ))
            }
            ExprKind::Array(elements) => {
                let mut items = Vec::with_capacity(elements.len());
                for element in elements {
                    match element {
                        ast::ArrayElement::Item(e) => items.push(self.lower_expr(e)?),
                        ast::ArrayElement::Spread(e) => {
                            return Err(unsupported(e.span, "array spread"))
                        }
                    }
                }
                Expr::Array(items)
            }
            ExprKind::Object(entries) => {
                let mut fields = Vec::with_capacity(entries.len());
                for entry in entries {
                    match entry {
                        ObjectEntry::Field { key, value, .. } => {
                            fields.push((key.clone(), self.lower_expr(value)?))
                        }
                        ObjectEntry::Computed { span, .. } => {
                            return Err(unsupported(*span, "computed object key"))
                        }
                        ObjectEntry::Spread { span, .. } => {
                            return Err(unsupported(
                                *span,
                                "object spread outside a single-source projection",
                            ))
                        }
                    }
                }
                Expr::Object(fields)
            }
            ExprKind::Call { name, args } => self.lower_call(name, args, expr.span)?,
            ExprKind::Subquery(query) => Expr::Subquery(Box::new(self.lower_query(query)?)),
        };
        Ok(lowered)
    }

    /// Whatever the variable's binding stands for at this point
    fn lower_variable(&mut self, var: &ast::VarRef, span: Span) -> Result<Expr> {
        let bound = match self.bound(var) {
            Some(bound) => bound.clone(),
            None => return Err(unsupported(span, "variable without a lowered binding")),
        };
        match bound {
            Bound::Source(alias) => Ok(Expr::field(&alias)),
            Bound::Value(value) | Bound::GroupKey(value) => Ok(value),
            Bound::Accumulator(acc) => Ok(Expr::Aggregate(Box::new(acc))),
            Bound::Capture(capture) => {
                if capture.members.len() != 1 {
                    return Err(unsupported(
                        span,
                        "INTO capture of multiple variables (deep capture)",
                    ));
                }
                let element = capture.members[0].1.clone();
                Ok(self.derived_accumulator(
                    capture.alias,
                    capture.group,
                    AggregateFunction::Push,
                    Some(element),
                    span,
                ))
            }
            Bound::Rejected(what) => Err(unsupported(span, what)),
        }
    }

    /// Upper-cases the name; `LENGTH(g)` over an INTO capture counts the group
    fn lower_call(&mut self, name: &str, args: &[ast::Expr], span: Span) -> Result<Expr> {
        let upper = name.to_ascii_uppercase();

        // LENGTH(g) / COUNT(g) over an INTO capture counts the group
        if matches!(upper.as_str(), "LENGTH" | "COUNT") && args.len() == 1 {
            if let Some(var) = args[0].as_variable() {
                let target = match self.bound(var) {
                    Some(Bound::Capture(c)) => Some((c.alias.clone(), c.group)),
                    Some(Bound::Accumulator(acc)) if acc.function == AggregateFunction::Push => {
                        Some((acc.alias.clone(), acc.group))
                    }
                    _ => None,
                };
                if let Some((alias, group)) = target {
                    return Ok(self.derived_accumulator(
                        format!("{}_count", alias),
                        group,
                        AggregateFunction::Count,
                        None,
                        span,
                    ));
                }
            }
        }

        let mut lowered = Vec::with_capacity(args.len());
        for arg in args {
            lowered.push(self.lower_expr(arg)?);
        }

        // SUM(g[*].u.x) and friends fold into a direct aggregate over the group
        if lowered.len() == 1 {
            if let Some(function) = scalar_over_group(&upper) {
                if let Expr::Aggregate(acc) = &lowered[0] {
                    if acc.function == AggregateFunction::Push {
                        let argument = match function {
                            AggregateFunction::Count => None,
                            _ => acc.argument.clone(),
                        };
                        let alias = format!("{}_{}", acc.alias, upper.to_ascii_lowercase());
                        let (group, acc_span) = (acc.group, acc.span);
                        self.pending.retain(|p| {
                            !(p.alias == acc.alias
                                && p.span == acc_span
                                && p.function == AggregateFunction::Push)
                        });
                        return Ok(self.derived_accumulator(alias, group, function, argument, span));
                    }
                }
            }
        }

        Ok(Expr::Call {
            name: upper,
            args: lowered,
            span,
        })
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    fn bound(&self, var: &ast::VarRef) -> Option<&Bound> {
        self.resolution
            .resolve(var)
            .and_then(|binding| self.env.get(&binding.id))
    }

    fn bind(&mut self, binder: &ast::Binder, bound: Bound) {
        if let Some(binding) = self.resolution.declaration(binder) {
            self.env.insert(binding.id, bound);
        }
    }

    fn is_used(&self, binder: &ast::Binder) -> bool {
        self.resolution
            .declaration(binder)
            .map_or(false, |b| self.resolution.is_referenced(b.id))
    }
}

fn unsupported(span: Span, what: &str) -> LoweringError {
    LoweringError::unsupported(span, what)
}

fn collection_ref(name: &ast::CollectionName) -> CollectionRef {
    match name {
        ast::CollectionName::Named { name, .. } => CollectionRef::Named(name.clone()),
        ast::CollectionName::Bind { name, span } => CollectionRef::Bind {
            name: name.clone(),
            span: *span,
        },
    }
}

fn changes_reference(changes: &Changes, alias: &str) -> bool {
    let mut found = false;
    let mut check = |e: &Expr| {
        if e.aliases().iter().any(|a| a == alias) {
            found = true;
        }
    };
    match changes {
        Changes::Set(fields) => fields.iter().for_each(|(_, e)| check(e)),
        Changes::Merge(e) | Changes::Content(e) => check(e),
    }
    found
}

/// Bound `@name` parameter or constant array literal
fn is_array_value(expr: &Expr) -> bool {
    match expr {
        Expr::Param { .. } => true,
        Expr::Array(_) => expr.is_constant(),
        _ => false,
    }
}

/// Value of a literal `_key` attribute in an object constructor
fn find_key_field(expr: &ast::Expr) -> Option<&ast::Expr> {
    match &expr.kind {
        ExprKind::Object(entries) => entries.iter().find_map(|entry| match entry {
            ObjectEntry::Field { key, value, .. } if key == "_key" => Some(value),
            _ => None,
        }),
        _ => None,
    }
}

/// Accumulator for a COLLECT ... AGGREGATE function name
pub fn aggregate_function(name: &str) -> AggregateFunction {
    match name.to_ascii_uppercase().as_str() {
        "LENGTH" | "COUNT" => AggregateFunction::Count,
        "SUM" => AggregateFunction::Sum,
        "AVERAGE" | "AVG" => AggregateFunction::Avg,
        "MIN" => AggregateFunction::Min,
        "MAX" => AggregateFunction::Max,
        "COUNT_DISTINCT" | "COUNT_UNIQUE" => AggregateFunction::CountDistinct,
        "UNIQUE" => AggregateFunction::Unique,
        "PUSH" => AggregateFunction::Push,
        other => AggregateFunction::Other(other.to_string()),
    }
}

/// Scalar array functions that fold into a grouped aggregate
fn scalar_over_group(name: &str) -> Option<AggregateFunction> {
    match aggregate_function(name) {
        AggregateFunction::Push | AggregateFunction::Other(_) => None,
        function => Some(function),
    }
}

/// Flatten nested ANDs into conjuncts
fn split_conjuncts(expr: Expr, out: &mut Vec<Expr>) {
    match expr {
        Expr::Binary {
            op: BinaryOp::And,
            left,
            right,
        } => {
            split_conjuncts(*left, out);
            split_conjuncts(*right, out);
        }
        other => out.push(other),
    }
}

fn conjoin(mut exprs: Vec<Expr>) -> Option<Expr> {
    if exprs.is_empty() {
        return None;
    }
    let first = exprs.remove(0);
    Some(exprs.into_iter().fold(first, |acc, e| Expr::Binary {
        op: BinaryOp::And,
        left: Box::new(acc),
        right: Box::new(e),
    }))
}

/// Move pre-COLLECT filter conjuncts that correlate two or more sources into
/// the latest Join they reference.
fn push_join_predicates(stages: &mut Vec<Stage>) {
    let group_pos = stages
        .iter()
        .position(|s| matches!(s, Stage::GroupBy(_)))
        .unwrap_or(stages.len());

    let mut positions: Vec<(usize, String)> = Vec::new();
    for (i, stage) in stages.iter().enumerate() {
        let source = match stage {
            Stage::Source(s) => s,
            Stage::Join(j) => &j.source,
            _ => continue,
        };
        positions.push((i, source.alias.clone()));
        if let SourceKind::Traversal(TraversalSource {
            edge_alias: Some(edge),
            ..
        }) = &source.kind
        {
            positions.push((i, edge.clone()));
        }
    }
    if positions.len() < 2 {
        return;
    }

    let mut moves: Vec<(usize, Expr)> = Vec::new();
    let mut emptied: Vec<usize> = Vec::new();

    for i in 0..group_pos {
        let predicate = match &stages[i] {
            Stage::Filter(f) => f.predicate.clone(),
            _ => continue,
        };
        let mut conjuncts = Vec::new();
        split_conjuncts(predicate, &mut conjuncts);

        let mut keep = Vec::new();
        for conjunct in conjuncts {
            let mut refs: Vec<usize> = conjunct
                .aliases()
                .iter()
                .filter_map(|a| positions.iter().find(|(_, name)| name == a).map(|(p, _)| *p))
                .collect();
            refs.sort_unstable();
            refs.dedup();
            if refs.len() >= 2 {
                let target = refs[refs.len() - 1];
                if target < i && matches!(stages[target], Stage::Join(_)) {
                    moves.push((target, conjunct));
                    continue;
                }
            }
            keep.push(conjunct);
        }

        match conjoin(keep) {
            Some(predicate) => stages[i] = Stage::Filter(Filter { predicate }),
            None => emptied.push(i),
        }
    }

    for (target, predicate) in moves {
        if let Stage::Join(join) = &mut stages[target] {
            join.predicates.push(predicate);
        }
    }
    for i in emptied.into_iter().rev() {
        stages.remove(i);
    }
}

/// Lower a resolved query into a pipeline
pub fn lower(query: &ast::Query, resolution: &Resolution) -> Result<Pipeline> {
    Lowerer::new(resolution).lower(query)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::lexer::tokenize;
    use crate::query::parser::parse;
    use crate::query::scope::resolve;

    fn lower_str(query: &str) -> Result<Pipeline> {
        let query = parse(tokenize(query).unwrap()).unwrap();
        let resolution = resolve(&query).unwrap();
        lower(&query, &resolution)
    }

    #[test]
    fn test_lower_simple_filter() {
        let pipeline = lower_str("FOR u IN users FILTER u.active == true RETURN u.name").unwrap();
        assert_eq!(
            pipeline.to_string(),
            "[Source(users AS u), Filter((u.active == true)), Project(u.name)]"
        );
    }

    #[test]
    fn test_let_is_inlined() {
        let direct = lower_str(
            "FOR u IN users COLLECT dept = u.department WITH COUNT INTO cnt RETURN {dept, cnt}",
        )
        .unwrap();
        let via_let = lower_str(
            "FOR u IN users LET d = u.department COLLECT dept = d WITH COUNT INTO cnt RETURN \
                {dept, cnt}",
        )
        .unwrap();
        assert_eq!(direct.to_string(), via_let.to_string());
    }

    #[test]
    fn test_join_predicate_pushdown() {
        let pipeline = lower_str(
            "FOR u IN users FOR o IN orders FILTER o.user == u._key && o.total > 10 RETURN o",
        )
        .unwrap();
        match &pipeline.stages[1] {
            Stage::Join(j) => {
                assert_eq!(j.source.alias, "o");
                assert_eq!(j.predicates.len(), 1);
                assert_eq!(j.predicates[0].to_string(), "(o.user == u._key)");
            }
            _ => panic!("Expected Join"),
        }
        match &pipeline.stages[2] {
            Stage::Filter(f) => assert_eq!(f.predicate.to_string(), "(o.total > 10)"),
            _ => panic!("Expected residual Filter"),
        }
    }

    #[test]
    fn test_fully_pushed_filter_is_removed() {
        let pipeline =
            lower_str("FOR u IN users FOR o IN orders FILTER o.user == u._key RETURN o").unwrap();
        assert_eq!(pipeline.stages.len(), 3);
        assert!(matches!(pipeline.stages[2], Stage::Project(_)));
    }

    #[test]
    fn test_collect_with_count() {
        let pipeline = lower_str(
            "FOR u IN users COLLECT dept = u.department WITH COUNT INTO cnt RETURN {dept, cnt}",
        )
        .unwrap();
        match &pipeline.stages[1] {
            Stage::GroupBy(g) => {
                assert_eq!(g.keys[0].alias, "dept");
                assert_eq!(g.accumulators[0].function, AggregateFunction::Count);
            }
            _ => panic!("Expected GroupBy"),
        }
        match &pipeline.stages[2] {
            Stage::Project(p) => {
                assert!(matches!(p.items[0].expr, Expr::GroupKey { .. }));
                assert!(matches!(p.items[1].expr, Expr::Aggregate(_)));
                assert_eq!(p.items[1].alias.as_deref(), Some("cnt"));
            }
            _ => panic!("Expected Project"),
        }
    }

    #[test]
    fn test_length_of_capture_becomes_count() {
        let pipeline = lower_str(
            "FOR u IN users COLLECT dept = u.department INTO g RETURN {dept, n: LENGTH(g)}",
        )
        .unwrap();
        let group = pipeline.group_by().unwrap();
        assert_eq!(group.accumulators.len(), 1);
        assert_eq!(group.accumulators[0].function, AggregateFunction::Count);
    }

    #[test]
    fn test_capture_path_becomes_list() {
        let pipeline = lower_str(
            "FOR u IN users COLLECT dept = u.department INTO g RETURN {dept, names: g[*].u.name}",
        )
        .unwrap();
        let group = pipeline.group_by().unwrap();
        assert_eq!(group.accumulators[0].function, AggregateFunction::Push);
        assert_eq!(
            group.accumulators[0].argument.as_ref().unwrap().to_string(),
            "u.name"
        );
    }

    #[test]
    fn test_sum_over_capture_folds() {
        let pipeline = lower_str(
            "FOR o IN orders COLLECT c = o.customer INTO g RETURN {c, total: SUM(g[*].o.amount)}",
        )
        .unwrap();
        let group = pipeline.group_by().unwrap();
        assert_eq!(group.accumulators.len(), 1);
        assert_eq!(group.accumulators[0].function, AggregateFunction::Sum);
    }

    #[test]
    fn test_deep_capture_rejected() {
        let err = lower_str(
            "FOR u IN users FOR o IN orders COLLECT k = u.k INTO g RETURN {k, g}",
        )
        .unwrap_err();
        assert!(err.message.contains("deep capture"));
    }

    #[test]
    fn test_upsert_rejected_with_span() {
        let err = lower_str("UPSERT {k: 1} INSERT {k: 1} UPDATE {n: 2} IN things").unwrap_err();
        assert_eq!(err.message, "UPSERT");
        assert_eq!(err.span.start, 0);
    }

    #[test]
    fn test_traversal_source() {
        let pipeline =
            lower_str("FOR v, e IN 1..2 OUTBOUND \"accounts/1\" transfers RETURN v").unwrap();
        match &pipeline.stages[0] {
            Stage::Source(Source {
                kind: SourceKind::Traversal(t),
                ..
            }) => {
                assert_eq!((t.min_depth, t.max_depth), (1, 2));
                assert!(matches!(t.start, TraversalStart::Vertex(_)));
                assert!(t.edge_alias.is_none());
            }
            _ => panic!("Expected traversal source"),
        }
    }

    #[test]
    fn test_unsupported_constructs() {
        let cases = [
            ("FOR u IN users FOR t IN u.tags RETURN t", "computed expression"),
            ("FOR u IN users FOR t IN [u.a, u.b] RETURN t", "computed expression"),
            ("FOR v IN 1..3 ANY 'a/1' GRAPH 'g' RETURN v", "named graph"),
            ("FOR v, e IN 1..3 OUTBOUND 'a/1' t RETURN e", "variable-depth"),
            ("FOR v, e, p IN OUTBOUND 'a/1' t RETURN p", "path variables"),
            ("FOR u IN users COLLECT k = u.k FOR o IN orders RETURN o", "FOR after COLLECT"),
            ("FOR u IN users LIMIT 5 FILTER u.x RETURN u", "FILTER after LIMIT"),
            ("FOR u IN users LIMIT 5 LIMIT 2 RETURN u", "second LIMIT"),
            ("RETURN 1..3", "range expression"),
            ("FOR u IN users RETURN {[u.k]: 1}", "computed object key"),
            ("FOR u IN users FOR o IN orders RETURN {...u}", "object spread"),
            ("FOR u IN users FOR v IN OUTBOUND u._id foo RETURN UPPER(v.n)", ""),
        ];
        for (query, expected) in cases {
            let result = lower_str(query);
            if expected.is_empty() {
                assert!(result.is_ok(), "{}", query);
                continue;
            }
            let err = result.unwrap_err();
            assert!(err.message.contains(expected), "{}: {}", query, err.message);
        }
    }

    #[test]
    fn test_traversal_start_must_be_constant() {
        let err =
            lower_str("LET s = (FOR a IN accounts RETURN a._id) FOR v IN OUTBOUND s[0] t RETURN v")
                .unwrap_err();
        assert!(err.message.contains("traversal start"));
    }

    #[test]
    fn test_modification_shapes() {
        let pipeline = lower_str("UPDATE {_key: 'k1', name: 'x'} IN users").unwrap();
        match &pipeline.stages[0] {
            Stage::Modify(m) => match &m.op {
                ModifyOp::Update {
                    key: Some(_),
                    changes: Changes::Set(fields),
                } => {
                    assert_eq!(fields.len(), 1);
                    assert_eq!(fields[0].0, "name");
                }
                _ => panic!("Expected keyed UPDATE ... SET"),
            },
            _ => panic!("Expected Modify"),
        }

        let pipeline =
            lower_str("FOR u IN users FILTER u.age < 18 REMOVE u IN users").unwrap();
        assert!(matches!(
            pipeline.stages.last(),
            Some(Stage::Modify(Modify {
                op: ModifyOp::Remove { key: None },
                ..
            }))
        ));

        let err = lower_str("FOR u IN users REMOVE u IN admins").unwrap_err();
        assert!(err.message.contains("iterated"));
    }

    #[test]
    fn test_array_sources() {
        let pipeline = lower_str("FOR w IN @words FILTER w != 'x' RETURN w").unwrap();
        match &pipeline.stages[0] {
            Stage::Source(Source {
                alias,
                kind: SourceKind::Array(Expr::Param { name, .. }),
                ..
            }) => {
                assert_eq!(alias, "w");
                assert_eq!(name, "words");
            }
            _ => panic!("Expected array source over @words"),
        }

        let pipeline = lower_str("LET xs = [1, 2, 3] FOR x IN xs RETURN x * 2").unwrap();
        assert!(matches!(
            &pipeline.stages[0],
            Stage::Source(Source {
                kind: SourceKind::Array(Expr::Array(_)),
                ..
            })
        ));

        let err = lower_str("FOR v IN OUTBOUND 'a/1' t FOR w IN @words RETURN w").unwrap_err();
        assert!(err.message.contains("graph traversal"), "{}", err.message);
    }

    #[test]
    fn test_keyed_batch_modifications() {
        let pipeline = lower_str("FOR id IN @ids UPDATE id WITH {read: true} IN messages").unwrap();
        match pipeline.stages.last() {
            Some(Stage::Modify(Modify {
                op:
                    ModifyOp::Update {
                        key: Some(KeyMatch::AnyOf(Expr::Param { name, .. })),
                        changes: Changes::Set(fields),
                    },
                ..
            })) => {
                assert_eq!(name, "ids");
                assert_eq!(fields[0].0, "read");
            }
            _ => panic!("Expected UPDATE over any of @ids"),
        }

        let pipeline = lower_str("FOR id IN @ids REMOVE {_key: id} IN messages").unwrap();
        assert!(matches!(
            pipeline.stages.last(),
            Some(Stage::Modify(Modify {
                op: ModifyOp::Remove {
                    key: Some(KeyMatch::AnyOf(_))
                },
                ..
            }))
        ));

        let cases = [
            ("FOR id IN @ids UPDATE id WITH {last: id} IN messages", "array element"),
            ("FOR id IN @ids FILTER id != 'x' REMOVE id IN messages", "FILTER or LIMIT"),
            ("FOR id IN @ids UPDATE {flag: 1} IN messages", "document key"),
        ];
        for (query, expected) in cases {
            let err = lower_str(query).unwrap_err();
            assert!(err.message.contains(expected), "{}: {}", query, err.message);
        }
    }
}
