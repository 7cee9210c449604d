//! Pipeline → ArcadeDB SQL
//!
//! One pipeline renders to exactly one statement:
//! - `Modify` terminal → INSERT / UPDATE / DELETE
//! - any traversal source → MATCH (wrapped as a derived table when filters span nodes)
//! - otherwise → SELECT over the source list
//!
//! Field references are rendered relative to the block that owns their source:
//! unqualified for single-source blocks, `alias.` for multi-source blocks and
//! `$parent.$current.` for sources of an enclosing block.

use crate::bind::{BindKind, BindingTable};
use crate::config::TranslatorConfig;
use crate::diagnostics::Span;
use crate::error::{GenerationError, GenerationErrorKind};
use crate::ir::pipeline::*;
use crate::query::ast::{BinaryOp, Direction, Literal, SortDirection, UnaryOp};
use crate::sql::functions::{self, Mapping, Special};
use crate::sql::ident;
use indexmap::{IndexMap, IndexSet};
use serde::Serialize;
use std::collections::HashSet;
use tracing::trace;

type Result<T> = std::result::Result<T, GenerationError>;

// Binding strength of rendered SQL expressions, loosest first
const PREC_OR: u8 = 1;
const PREC_AND: u8 = 2;
const PREC_NOT: u8 = 3;
const PREC_CMP: u8 = 4;
const PREC_ADD: u8 = 5;
const PREC_MUL: u8 = 6;
const PREC_UNARY: u8 = 7;
const PREC_ATOM: u8 = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StatementKind {
    Select,
    Match,
    Insert,
    Update,
    Delete,
}

impl StatementKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StatementKind::Select => "select",
            StatementKind::Match => "match",
            StatementKind::Insert => "insert",
            StatementKind::Update => "update",
            StatementKind::Delete => "delete",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GeneratedStatement {
    pub text: String,
    pub kind: StatementKind,
    /// Named value parameters used by `text`, in binding-table order
    pub parameters: Vec<String>,
}

// ============================================================================
// Blocks and shapes
// ============================================================================

#[derive(Debug, Clone)]
enum AliasRender {
    /// The block's only source: bare attribute names
    This,
    /// Qualified path, e.g. `u` or `j1.u`
    Qualified(String),
}

#[derive(Debug, Default)]
struct Block {
    aliases: IndexMap<String, AliasRender>,
    group: Option<u32>,
    /// Outer block over a grouped derived table: keys and aggregates are columns
    columns: Option<Vec<(Accumulator, String)>>,
}

/// A pipeline flattened into SQL clause slots
#[derive(Default)]
struct Shape<'p> {
    sources: Vec<(&'p Source, Vec<&'p Expr>)>,
    filters: Vec<&'p Expr>,
    group: Option<&'p GroupBy>,
    having: Vec<&'p Expr>,
    order: Vec<&'p SortKey>,
    limit: Option<&'p Limit>,
    distinct: bool,
    project: Option<&'p Project>,
    modify: Option<&'p Modify>,
}

impl<'p> Shape<'p> {
    /// Slot every stage; HAVING holds filters that follow the GroupBy
    fn of(pipeline: &'p Pipeline) -> Self {
        let mut shape = Shape::default();
        let mut orders: Vec<&'p OrderBy> = Vec::new();

        for stage in &pipeline.stages {
            match stage {
                Stage::Source(s) => shape.sources.push((s, Vec::new())),
                Stage::Join(j) => shape
                    .sources
                    .push((&j.source, j.predicates.iter().collect())),
                Stage::Filter(f) => {
                    if shape.group.is_some() {
                        shape.having.push(&f.predicate);
                    } else {
                        shape.filters.push(&f.predicate);
                    }
                }
                Stage::GroupBy(g) => shape.group = Some(g),
                Stage::OrderBy(o) => orders.push(o),
                Stage::Limit(l) => shape.limit = Some(l),
                Stage::Distinct => shape.distinct = true,
                Stage::Project(p) => shape.project = Some(p),
                Stage::Modify(m) => shape.modify = Some(m),
            }
        }

        // A later SORT takes priority; earlier keys only break its ties
        for order in orders.iter().rev() {
            shape.order.extend(order.keys.iter());
        }
        shape
    }

    fn has_traversal(&self) -> bool {
        self.sources
            .iter()
            .any(|(s, _)| matches!(s.kind, SourceKind::Traversal(_)))
    }
}

struct FromItem<'p> {
    text: String,
    name: String,
    /// Source aliases reachable through this item
    members: Vec<String>,
    predicates: Vec<&'p Expr>,
}

// ============================================================================
// Generator
// ============================================================================

pub struct Generator<'a> {
    bindings: &'a BindingTable,
    config: &'a TranslatorConfig,
    blocks: Vec<Block>,
    used_params: IndexSet<String>,
    /// Clause in which aggregates are not allowed
    aggregate_barrier: Option<&'static str>,
    next_join: usize,
    next_anchor: usize,
}

impl<'a> Generator<'a> {
    pub fn new(bindings: &'a BindingTable, config: &'a TranslatorConfig) -> Self {
        Self {
            bindings,
            config,
            blocks: Vec::new(),
            used_params: IndexSet::new(),
            aggregate_barrier: None,
            next_join: 0,
            next_anchor: 0,
        }
    }

    /// Render `pipeline` as one statement.
    ///
    /// Parameters are listed in binding-table order, then any deferred ones
    /// in the order the statement first uses them.
    pub fn generate(mut self, pipeline: &Pipeline) -> Result<GeneratedStatement> {
        self.blocks.push(Block::default());
        let (text, kind) = self.statement(pipeline)?;

        let mut parameters: Vec<String> = self
            .bindings
            .entries()
            .iter()
            .filter(|e| e.kind == BindKind::Value && self.used_params.contains(&e.name))
            .map(|e| e.name.clone())
            .collect();
        for name in &self.used_params {
            if !parameters.contains(name) {
                parameters.push(name.clone());
            }
        }

        trace!(kind = kind.as_str(), len = text.len(), "statement generated");
        Ok(GeneratedStatement {
            text,
            kind,
            parameters,
        })
    }

    /// Statement for the current block; also used for subqueries
    fn statement(&mut self, pipeline: &Pipeline) -> Result<(String, StatementKind)> {
        let shape = Shape::of(pipeline);
        if let Some(modify) = shape.modify {
            return self.modify(&shape, modify);
        }
        if shape.has_traversal() {
            let text = self.match_query(&shape, shape.project, false)?;
            return Ok((text, StatementKind::Match));
        }
        let text = self.select(&shape, shape.project)?;
        Ok((text, StatementKind::Select))
    }

    fn block(&self) -> &Block {
        // generate() pushes the root block before anything renders
        &self.blocks[self.blocks.len() - 1]
    }

    fn block_mut(&mut self) -> &mut Block {
        let last = self.blocks.len() - 1;
        &mut self.blocks[last]
    }

    // ========================================================================
    // SELECT
    // ========================================================================

    /// SELECT over collections, subqueries and unwound arrays.
    ///
    /// Sources beyond `join_nesting_threshold` are folded into nested
    /// derived tables, and field renders are rewritten to follow them.
    fn select(&mut self, shape: &Shape<'_>, project: Option<&Project>) -> Result<String> {
        if shape.sources.is_empty() {
            return self.sourceless_select(shape, project);
        }

        let multi = shape.sources.len() > 1;
        {
            let block = self.block_mut();
            block.aliases.clear();
            for (source, _) in &shape.sources {
                let alias = &source.alias;
                // An unwound array row holds its element under the alias itself
                let render = match (&source.kind, multi) {
                    (SourceKind::Array(_), true) => {
                        AliasRender::Qualified(format!("{}.{}", alias, alias))
                    }
                    (SourceKind::Array(_), false) => AliasRender::Qualified(alias.clone()),
                    (_, true) => AliasRender::Qualified(alias.clone()),
                    (_, false) => AliasRender::This,
                };
                block.aliases.insert(source.alias.clone(), render);
            }
        }

        let mut items: Vec<FromItem<'_>> = Vec::with_capacity(shape.sources.len());
        for (source, predicates) in &shape.sources {
            let text = match &source.kind {
                SourceKind::Collection(c) => self.collection(c)?,
                SourceKind::Subquery(p) => self.subquery(p)?,
                SourceKind::Array(value) => self.unwind(value, &source.alias)?,
                SourceKind::Traversal(_) => return self.match_query(shape, project, false),
            };
            items.push(FromItem {
                text,
                name: source.alias.clone(),
                members: vec![source.alias.clone()],
                predicates: predicates.clone(),
            });
        }

        let threshold = self.config.join_nesting_threshold.max(2);
        while items.len() > threshold {
            self.nest_join(&mut items, threshold)?;
        }

        let from = if multi {
            items
                .iter()
                .map(|i| format!("{} AS {}", i.text, ident::quote(&i.name)))
                .collect::<Vec<_>>()
                .join(", ")
        } else {
            items.first().map(|i| i.text.clone()).unwrap_or_default()
        };

        let mut conditions: Vec<&Expr> = items
            .iter()
            .flat_map(|i| i.predicates.iter().copied())
            .collect();
        conditions.extend(shape.filters.iter().copied());
        self.finish_select(&from, &conditions, shape, project)
    }

    /// `(SELECT :ids AS id UNWIND id)`, one row per array element
    fn unwind(&mut self, value: &Expr, alias: &str) -> Result<String> {
        let value = self.expr_at(value, PREC_ATOM)?;
        let alias = ident::quote(alias);
        Ok(format!("(SELECT {} AS {} UNWIND {})", value, alias, alias))
    }

    /// Wrap the leading FROM items into `(SELECT a, b FROM ...) AS jN`
    fn nest_join<'p>(&mut self, items: &mut Vec<FromItem<'p>>, threshold: usize) -> Result<()> {
        let group: Vec<FromItem<'p>> = items.drain(..threshold).collect();
        self.next_join += 1;
        let name = format!("j{}", self.next_join);

        let predicates: Vec<&Expr> = group
            .iter()
            .flat_map(|i| i.predicates.iter().copied())
            .collect();
        let where_sql = self.conditions(&predicates, Some("WHERE clause"))?;

        let columns: Vec<String> = group.iter().map(|i| ident::quote(&i.name)).collect();
        let from: Vec<String> = group
            .iter()
            .map(|i| format!("{} AS {}", i.text, ident::quote(&i.name)))
            .collect();
        let mut text = format!("(SELECT {} FROM {}", columns.join(", "), from.join(", "));
        if let Some(where_sql) = where_sql {
            text.push_str(" WHERE ");
            text.push_str(&where_sql);
        }
        text.push(')');

        let members: Vec<String> = group.iter().flat_map(|i| i.members.clone()).collect();
        let block = self.block_mut();
        for member in &members {
            if let Some(render) = block.aliases.get_mut(member) {
                let nested = match &*render {
                    AliasRender::Qualified(path) => format!("{}.{}", name, path),
                    AliasRender::This => name.clone(),
                };
                *render = AliasRender::Qualified(nested);
            }
        }

        trace!(join = %name, members = members.len(), "nested join derived table");
        items.insert(
            0,
            FromItem {
                text,
                name,
                members,
                predicates: Vec::new(),
            },
        );
        Ok(())
    }

    /// `RETURN expr` without a FOR
    fn sourceless_select(
        &mut self,
        shape: &Shape<'_>,
        project: Option<&Project>,
    ) -> Result<String> {
        self.block_mut().aliases.clear();

        // RETURN LENGTH(FOR ...) counts the subquery rows directly
        if let Some(project) = project {
            if let [item] = project.items.as_slice() {
                if let Expr::Call { name, args, .. } = &item.expr {
                    if let (true, [Expr::Subquery(inner)]) =
                        (name == "LENGTH" || name == "COUNT", args.as_slice())
                    {
                        let inner = self.subquery(inner)?;
                        let mut sql = String::from("SELECT count(*)");
                        if let Some(alias) = &item.alias {
                            sql.push_str(" AS ");
                            sql.push_str(&ident::quote(alias));
                        }
                        sql.push_str(" FROM ");
                        sql.push_str(&inner);
                        return Ok(sql);
                    }
                }
            }
        }

        let mut sql = String::from("SELECT ");
        if shape.distinct {
            sql.push_str("DISTINCT ");
        }
        sql.push_str(&self.projection(project)?);
        self.tail(&mut sql, shape)?;
        Ok(sql)
    }

    /// Everything after FROM, plus the grouped wrapper when post-COLLECT filters exist
    fn finish_select(
        &mut self,
        from: &str,
        conditions: &[&Expr],
        shape: &Shape<'_>,
        project: Option<&Project>,
    ) -> Result<String> {
        let where_sql = self.conditions(conditions, Some("WHERE clause"))?;
        self.block_mut().group = shape.group.map(|g| g.id);

        if let (Some(group), false) = (shape.group, shape.having.is_empty()) {
            return self.grouped_wrapper(from, where_sql, group, shape, project);
        }

        let mut sql = String::from("SELECT ");
        if shape.distinct {
            sql.push_str("DISTINCT ");
        }
        sql.push_str(&self.projection(project)?);
        sql.push_str(" FROM ");
        sql.push_str(from);
        if let Some(where_sql) = where_sql {
            sql.push_str(" WHERE ");
            sql.push_str(&where_sql);
        }
        if let Some(group) = shape.group {
            if let Some(keys) = self.group_keys(group)? {
                sql.push_str(" GROUP BY ");
                sql.push_str(&keys);
            }
        }
        self.tail(&mut sql, shape)?;
        Ok(sql)
    }

    /// `SELECT ... FROM (SELECT keys, aggregates ... GROUP BY ...) WHERE having`
    fn grouped_wrapper(
        &mut self,
        from: &str,
        where_sql: Option<String>,
        group: &GroupBy,
        shape: &Shape<'_>,
        project: Option<&Project>,
    ) -> Result<String> {
        let mut needed: Vec<Accumulator> = Vec::new();
        for expr in &shape.having {
            collect_aggregates(expr, group.id, &mut needed);
        }
        if let Some(project) = project {
            for item in &project.items {
                collect_aggregates(&item.expr, group.id, &mut needed);
            }
        }
        for key in &shape.order {
            collect_aggregates(&key.expr, group.id, &mut needed);
        }

        let mut taken: HashSet<String> = group.keys.iter().map(|k| k.alias.clone()).collect();
        let mut columns: Vec<(Accumulator, String)> = Vec::with_capacity(needed.len());
        for acc in needed {
            let mut column = acc.alias.clone();
            let mut n = 2;
            while taken.contains(&column) {
                column = format!("{}_{}", acc.alias, n);
                n += 1;
            }
            taken.insert(column.clone());
            columns.push((acc, column));
        }

        let mut inner_items = Vec::new();
        for key in &group.keys {
            let text = self.expr_at(&key.expr, 0)?;
            inner_items.push(aliased(text, &key.alias));
        }
        for (acc, column) in &columns {
            let text = self.accumulator(acc)?;
            inner_items.push(aliased(text, column));
        }

        let mut inner = format!("SELECT {} FROM {}", inner_items.join(", "), from);
        if let Some(where_sql) = where_sql {
            inner.push_str(" WHERE ");
            inner.push_str(&where_sql);
        }
        if let Some(keys) = self.group_keys(group)? {
            inner.push_str(" GROUP BY ");
            inner.push_str(&keys);
        }

        let outer = Block {
            aliases: IndexMap::new(),
            group: Some(group.id),
            columns: Some(columns),
        };
        let saved = std::mem::replace(self.block_mut(), outer);

        let mut sql = String::from("SELECT ");
        if shape.distinct {
            sql.push_str("DISTINCT ");
        }
        sql.push_str(&self.projection(project)?);
        sql.push_str(" FROM (");
        sql.push_str(&inner);
        sql.push(')');
        if let Some(having) = self.conditions(&shape.having, None)? {
            sql.push_str(" WHERE ");
            sql.push_str(&having);
        }
        self.tail(&mut sql, shape)?;

        *self.block_mut() = saved;
        Ok(sql)
    }

    /// Select list; a bare single-source document renders as `*`
    fn projection(&mut self, project: Option<&Project>) -> Result<String> {
        let project = match project {
            Some(p) if !p.items.is_empty() => p,
            _ => return Ok("*".to_string()),
        };

        let mut items = Vec::with_capacity(project.items.len());
        for item in &project.items {
            let whole_document = match (&item.expr, &item.alias) {
                (Expr::Field { alias, path }, None) if path.is_empty() => {
                    matches!(self.lookup(alias), (0, AliasRender::This))
                }
                _ => false,
            };
            if whole_document {
                items.push("*".to_string());
                continue;
            }

            let text = self.expr_at(&item.expr, 0)?;
            items.push(match &item.alias {
                Some(alias) => aliased(text, alias),
                None => text,
            });
        }
        Ok(items.join(", "))
    }

    fn group_keys(&mut self, group: &GroupBy) -> Result<Option<String>> {
        if group.keys.is_empty() {
            return Ok(None);
        }
        let saved = self.aggregate_barrier.replace("GROUP BY clause");
        let mut keys = Vec::with_capacity(group.keys.len());
        for key in &group.keys {
            keys.push(self.expr_at(&key.expr, 0)?);
        }
        self.aggregate_barrier = saved;
        Ok(Some(keys.join(", ")))
    }

    /// ORDER BY, SKIP and LIMIT
    fn tail(&mut self, sql: &mut String, shape: &Shape<'_>) -> Result<()> {
        if !shape.order.is_empty() {
            let mut keys = Vec::with_capacity(shape.order.len());
            for key in &shape.order {
                let direction = match key.direction {
                    SortDirection::Asc => "ASC",
                    SortDirection::Desc => "DESC",
                };
                keys.push(format!("{} {}", self.expr_at(&key.expr, 0)?, direction));
            }
            sql.push_str(" ORDER BY ");
            sql.push_str(&keys.join(", "));
        }
        if let Some(limit) = shape.limit {
            if let Some(offset) = &limit.offset {
                if !matches!(offset, Expr::Literal(Literal::Integer(0))) {
                    sql.push_str(" SKIP ");
                    sql.push_str(&self.expr_at(offset, PREC_ATOM)?);
                }
            }
            sql.push_str(" LIMIT ");
            sql.push_str(&self.expr_at(&limit.count, PREC_ATOM)?);
        }
        Ok(())
    }

    /// AND-joined conditions; `barrier` names the clause when aggregates are not allowed
    fn conditions(
        &mut self,
        exprs: &[&Expr],
        barrier: Option<&'static str>,
    ) -> Result<Option<String>> {
        if exprs.is_empty() {
            return Ok(None);
        }
        let saved = self.aggregate_barrier;
        if barrier.is_some() {
            self.aggregate_barrier = barrier;
        }
        let min = if exprs.len() > 1 { PREC_AND } else { 0 };
        let mut parts = Vec::with_capacity(exprs.len());
        for expr in exprs {
            parts.push(self.expr_at(expr, min)?);
        }
        self.aggregate_barrier = saved;
        Ok(Some(parts.join(" AND ")))
    }

    /// Parenthesized statement in a fresh block, so outer sources render through `$parent`
    fn subquery(&mut self, pipeline: &Pipeline) -> Result<String> {
        self.blocks.push(Block::default());
        let saved = self.aggregate_barrier.take();
        let (text, _) = self.statement(pipeline)?;
        self.aggregate_barrier = saved;
        self.blocks.pop();
        Ok(format!("({})", text))
    }

    // ========================================================================
    // MATCH
    // ========================================================================

    /// MATCH statement for pipelines with traversal sources.
    ///
    /// Single-node conjuncts become `where:` filters on their node. The
    /// rest force a `SELECT ... FROM (MATCH ...)` wrapper, as does
    /// `force_wrap`.
    fn match_query(
        &mut self,
        shape: &Shape<'_>,
        project: Option<&Project>,
        force_wrap: bool,
    ) -> Result<String> {
        let mut nodes: Vec<String> = Vec::new();
        for (source, _) in &shape.sources {
            nodes.push(source.alias.clone());
            if let SourceKind::Traversal(TraversalSource {
                edge_alias: Some(edge),
                ..
            }) = &source.kind
            {
                nodes.push(edge.clone());
            }
        }

        let mut conjuncts: Vec<&Expr> = Vec::new();
        for (_, predicates) in &shape.sources {
            for predicate in predicates {
                split_and(predicate, &mut conjuncts);
            }
        }
        for filter in &shape.filters {
            split_and(filter, &mut conjuncts);
        }

        let mut node_filters: IndexMap<String, Vec<&Expr>> = IndexMap::new();
        let mut residual: Vec<&Expr> = Vec::new();
        for conjunct in conjuncts {
            let aliases = conjunct.aliases();
            match aliases.as_slice() {
                [only] if nodes.contains(only) && !contains_subquery(conjunct) => {
                    node_filters.entry(only.clone()).or_default().push(conjunct)
                }
                _ => residual.push(conjunct),
            }
        }

        let mut patterns = Vec::with_capacity(shape.sources.len());
        for (source, _) in &shape.sources {
            let alias = ident::quote(&source.alias);
            match &source.kind {
                SourceKind::Collection(c) => {
                    let mut parts = vec![
                        format!("type: {}", self.collection(c)?),
                        format!("as: {}", alias),
                    ];
                    if let Some(w) = self.node_where(&source.alias, &node_filters, None)? {
                        parts.push(format!("where: ({})", w));
                    }
                    patterns.push(format!("{{{}}}", parts.join(", ")));
                }
                SourceKind::Traversal(t) => {
                    let origin = match &t.start {
                        TraversalStart::Alias(start) => format!("{{as: {}}}", ident::quote(start)),
                        TraversalStart::Vertex(expr) => self.anchor(expr)?,
                    };
                    let mut edges = Vec::with_capacity(t.edges.len());
                    for edge in &t.edges {
                        edges.push(self.edge_name(edge)?);
                    }
                    let edges = edges.join(", ");
                    let (vertex_step, edge_step, edge_target) = direction_steps(t.direction);

                    let variable_depth = (t.min_depth, t.max_depth) != (1, 1);
                    let mut target = vec![format!("as: {}", alias)];
                    if variable_depth {
                        target.push(format!("while: ($depth < {})", t.max_depth));
                    }
                    let depth_filter = if variable_depth && t.min_depth > 0 {
                        Some(format!("$depth >= {}", t.min_depth))
                    } else {
                        None
                    };
                    if let Some(w) = self.node_where(&source.alias, &node_filters, depth_filter)? {
                        target.push(format!("where: ({})", w));
                    }

                    let step = match &t.edge_alias {
                        Some(edge) => {
                            let mut parts = vec![format!("as: {}", ident::quote(edge))];
                            if let Some(w) = self.node_where(edge, &node_filters, None)? {
                                parts.push(format!("where: ({})", w));
                            }
                            format!(
                                ".{}({}){{{}}}.{}(){{{}}}",
                                edge_step,
                                edges,
                                parts.join(", "),
                                edge_target,
                                target.join(", ")
                            )
                        }
                        None => format!(".{}({}){{{}}}", vertex_step, edges, target.join(", ")),
                    };
                    patterns.push(format!("{}{}", origin, step));
                }
                SourceKind::Subquery(_) | SourceKind::Array(_) => {
                    return Err(GenerationError::new(
                        GenerationErrorKind::UnsupportedSource,
                        Some(source.span),
                        "subquery and array sources cannot be combined with a MATCH traversal",
                    ))
                }
            }
        }
        let match_text = format!("MATCH {}", patterns.join(", "));

        {
            let block = self.block_mut();
            block.aliases.clear();
            for node in &nodes {
                block
                    .aliases
                    .insert(node.clone(), AliasRender::Qualified(node.clone()));
            }
        }

        let wrap = force_wrap || !residual.is_empty() || !shape.having.is_empty();
        if wrap {
            let returned: Vec<String> = nodes.iter().map(|n| ident::quote(n)).collect();
            let from = format!("({} RETURN {})", match_text, returned.join(", "));
            return self.finish_select(&from, &residual, shape, project);
        }

        self.block_mut().group = shape.group.map(|g| g.id);
        let mut sql = match_text;
        sql.push_str(" RETURN ");
        if shape.distinct {
            sql.push_str("DISTINCT ");
        }
        sql.push_str(&self.projection(project)?);
        if let Some(group) = shape.group {
            if let Some(keys) = self.group_keys(group)? {
                sql.push_str(" GROUP BY ");
                sql.push_str(&keys);
            }
        }
        self.tail(&mut sql, shape)?;
        Ok(sql)
    }

    /// Filter text for one MATCH node, with the node itself as `@this`
    fn node_where(
        &mut self,
        alias: &str,
        node_filters: &IndexMap<String, Vec<&Expr>>,
        depth_filter: Option<String>,
    ) -> Result<Option<String>> {
        let mut parts: Vec<String> = depth_filter.into_iter().collect();
        if let Some(filters) = node_filters.get(alias) {
            let mut aliases = IndexMap::new();
            aliases.insert(alias.to_string(), AliasRender::This);
            let node_block = Block {
                aliases,
                group: None,
                columns: None,
            };
            let saved_block = std::mem::replace(self.block_mut(), node_block);
            let saved_barrier = self.aggregate_barrier.replace("MATCH node filter");

            let min = if filters.len() + parts.len() > 1 { PREC_AND } else { 0 };
            for filter in filters {
                parts.push(self.expr_at(filter, min)?);
            }

            self.aggregate_barrier = saved_barrier;
            *self.block_mut() = saved_block;
        }
        if parts.is_empty() {
            Ok(None)
        } else {
            Ok(Some(parts.join(" AND ")))
        }
    }

    /// Root node for a constant traversal start
    fn anchor(&mut self, start: &Expr) -> Result<String> {
        self.next_anchor += 1;
        let name = if self.next_anchor == 1 {
            "_start".to_string()
        } else {
            format!("_start{}", self.next_anchor)
        };

        if let Expr::Literal(Literal::String(id)) = start {
            if let Some((collection, key)) = id.split_once('/') {
                if !collection.is_empty() && !key.is_empty() {
                    return Ok(format!(
                        "{{type: {}, as: {}, where: (_key = {})}}",
                        ident::quote(collection),
                        name,
                        ident::string_literal(key)
                    ));
                }
            }
        }
        let value = self.expr_at(start, PREC_ADD)?;
        Ok(format!("{{as: {}, where: (_id = {})}}", name, value))
    }

    // ========================================================================
    // Data modification
    // ========================================================================

    /// INSERT, UPDATE or DELETE for a `Modify` terminal
    fn modify(&mut self, shape: &Shape<'_>, modify: &Modify) -> Result<(String, StatementKind)> {
        let target = self.collection(&modify.collection)?;

        match &modify.op {
            ModifyOp::Insert(InsertContent::Document(document)) => {
                self.block_mut().aliases.clear();
                let content = self.expr_at(document, PREC_ATOM)?;
                Ok((
                    format!("INSERT INTO {} CONTENT {}", target, content),
                    StatementKind::Insert,
                ))
            }
            ModifyOp::Insert(InsertContent::Select(project)) => {
                let select = if shape.has_traversal() {
                    self.match_query(shape, Some(project), true)?
                } else {
                    self.select(shape, Some(project))?
                };
                Ok((
                    format!("INSERT INTO {} FROM {}", target, select),
                    StatementKind::Insert,
                ))
            }
            ModifyOp::Update { key, changes } => {
                self.scan_block(shape);
                let mut sql = format!("UPDATE {} {}", target, self.changes(changes)?);
                self.modify_filter(&mut sql, shape, key.as_ref())?;
                Ok((sql, StatementKind::Update))
            }
            ModifyOp::Remove { key } => {
                self.scan_block(shape);
                let mut sql = format!("DELETE FROM {}", target);
                self.modify_filter(&mut sql, shape, key.as_ref())?;
                Ok((sql, StatementKind::Delete))
            }
        }
    }

    /// UPDATE and DELETE address the scanned document with bare attributes
    fn scan_block(&mut self, shape: &Shape<'_>) {
        let block = self.block_mut();
        block.aliases.clear();
        for (source, _) in &shape.sources {
            block.aliases.insert(source.alias.clone(), AliasRender::This);
        }
    }

    /// SET, MERGE or CONTENT
    fn changes(&mut self, changes: &Changes) -> Result<String> {
        match changes {
            Changes::Set(fields) if !fields.is_empty() => {
                let mut parts = Vec::with_capacity(fields.len());
                for (name, value) in fields {
                    parts.push(format!("{} = {}", ident::quote(name), self.expr_at(value, 0)?));
                }
                Ok(format!("SET {}", parts.join(", ")))
            }
            Changes::Set(_) => Ok("MERGE {}".to_string()),
            Changes::Merge(value) => Ok(format!("MERGE {}", self.expr_at(value, PREC_ATOM)?)),
            Changes::Content(value) => Ok(format!("CONTENT {}", self.expr_at(value, PREC_ATOM)?)),
        }
    }

    /// `WHERE _key = k` or `WHERE _key IN list` for keyed modifications,
    /// the pipeline filters otherwise
    fn modify_filter(
        &mut self,
        sql: &mut String,
        shape: &Shape<'_>,
        key: Option<&KeyMatch>,
    ) -> Result<()> {
        let where_sql = match key {
            Some(KeyMatch::Equals(key)) => {
                Some(format!("_key = {}", self.expr_at(key, PREC_ADD)?))
            }
            Some(KeyMatch::AnyOf(keys)) => {
                Some(format!("_key IN {}", self.expr_at(keys, PREC_ADD)?))
            }
            None => self.conditions(&shape.filters, Some("WHERE clause"))?,
        };
        if let Some(where_sql) = where_sql {
            sql.push_str(" WHERE ");
            sql.push_str(&where_sql);
        }
        if let Some(limit) = shape.limit {
            sql.push_str(" LIMIT ");
            sql.push_str(&self.expr_at(&limit.count, PREC_ATOM)?);
        }
        Ok(())
    }

    // ========================================================================
    // Identifiers
    // ========================================================================

    fn collection(&self, collection: &CollectionRef) -> Result<String> {
        Ok(ident::quote(&self.collection_name(collection)?))
    }

    fn edge_name(&self, collection: &CollectionRef) -> Result<String> {
        Ok(ident::string_literal(&self.collection_name(collection)?))
    }

    /// Collection name, with `@@name` substituted from the binding table
    fn collection_name(&self, collection: &CollectionRef) -> Result<String> {
        match collection {
            CollectionRef::Named(name) => Ok(name.clone()),
            CollectionRef::Bind { name, span } => match self.bindings.collection(name) {
                Some(value) if ident::is_safe_substitution(value) => Ok(value.to_string()),
                Some(value) => Err(GenerationError::new(
                    GenerationErrorKind::UnsafeIdentifierSubstitution,
                    Some(*span),
                    format!(
                        "value `{}` of `@@{}` is not a safe collection identifier",
                        value, name
                    ),
                )),
                None => Err(GenerationError::new(
                    GenerationErrorKind::UnsafeIdentifierSubstitution,
                    Some(*span),
                    format!("no collection bound for `@@{}`", name),
                )),
            },
        }
    }

    /// Innermost block declaring `alias`, as (levels up, render)
    fn lookup(&self, alias: &str) -> (usize, AliasRender) {
        for (level, block) in self.blocks.iter().rev().enumerate() {
            if let Some(render) = block.aliases.get(alias) {
                return (level, render.clone());
            }
        }
        (0, AliasRender::Qualified(alias.to_string()))
    }

    // ========================================================================
    // Expressions
    // ========================================================================

    /// Render `expr`, parenthesized when it binds looser than `min`
    fn expr_at(&mut self, expr: &Expr, min: u8) -> Result<String> {
        let (text, prec) = self.expr(expr)?;
        if prec < min {
            Ok(format!("({})", text))
        } else {
            Ok(text)
        }
    }

    /// Rendered text with its binding strength
    fn expr(&mut self, expr: &Expr) -> Result<(String, u8)> {
        let rendered = match expr {
            Expr::Literal(lit) => (literal(lit), PREC_ATOM),
            Expr::Param { name, .. } => {
                self.used_params.insert(name.clone());
                (format!("{}{}", self.config.parameter_prefix, name), PREC_ATOM)
            }
            Expr::Field { alias, path } => (self.field(alias, path)?, PREC_ATOM),
            Expr::Access { base, path } => {
                let mut text = self.expr_at(base, PREC_ATOM)?;
                text.push_str(&self.path_suffix(path)?);
                (text, PREC_ATOM)
            }
            Expr::Unary { op, operand } => match op {
                UnaryOp::Not => (
                    format!("NOT {}", self.expr_at(operand, PREC_NOT)?),
                    PREC_NOT,
                ),
                UnaryOp::Negate => {
                    let inner = self.expr_at(operand, PREC_UNARY)?;
                    let sep = if inner.starts_with('-') { " " } else { "" };
                    (format!("-{}{}", sep, inner), PREC_UNARY)
                }
                UnaryOp::Plus => self.expr(operand)?,
            },
            Expr::Binary { op, left, right } => self.binary(*op, left, right)?,
            Expr::Between {
                value,
                low,
                high,
                negated,
            } => {
                let text = format!(
                    "{} BETWEEN {} AND {}",
                    self.expr_at(value, PREC_ADD)?,
                    self.expr_at(low, PREC_ADD)?,
                    self.expr_at(high, PREC_ADD)?
                );
                if *negated {
                    (format!("NOT ({})", text), PREC_NOT)
                } else {
                    (text, PREC_CMP)
                }
            }
            Expr::Conditional {
                condition,
                then,
                otherwise,
            } => {
                let condition = self.expr_at(condition, 0)?;
                let then = match then {
                    Some(then) => self.expr_at(then, 0)?,
                    None => condition.clone(),
                };
                let otherwise = self.expr_at(otherwise, 0)?;
                (format!("if({}, {}, {})", condition, then, otherwise), PREC_ATOM)
            }
            Expr::Array(items) => {
                let mut parts = Vec::with_capacity(items.len());
                for item in items {
                    parts.push(self.expr_at(item, 0)?);
                }
                (format!("[{}]", parts.join(", ")), PREC_ATOM)
            }
            Expr::Object(fields) => {
                let mut parts = Vec::with_capacity(fields.len());
                for (key, value) in fields {
                    let key = serde_json::Value::String(key.clone()).to_string();
                    parts.push(format!("{}: {}", key, self.expr_at(value, 0)?));
                }
                (format!("{{{}}}", parts.join(", ")), PREC_ATOM)
            }
            Expr::Call { name, args, span } => self.call(name, args, *span)?,
            Expr::GroupKey { alias, group, expr } => {
                let block = self.block();
                if block.group != Some(*group) {
                    return Err(GenerationError::new(
                        GenerationErrorKind::UnsupportedAggregatePlacement,
                        None,
                        format!("group key `{}` referenced outside its COLLECT block", alias),
                    ));
                }
                if block.columns.is_some() {
                    (ident::quote(alias), PREC_ATOM)
                } else {
                    self.expr(expr)?
                }
            }
            Expr::Aggregate(acc) => (self.aggregate(acc)?, PREC_ATOM),
            Expr::Subquery(pipeline) => (self.subquery(pipeline)?, PREC_ATOM),
        };
        Ok(rendered)
    }

    fn binary(&mut self, op: BinaryOp, left: &Expr, right: &Expr) -> Result<(String, u8)> {
        if matches!(op, BinaryOp::Eq | BinaryOp::Ne) {
            let subject = if is_null(right) {
                Some(left)
            } else if is_null(left) {
                Some(right)
            } else {
                None
            };
            if let Some(subject) = subject {
                let not = if op == BinaryOp::Ne { "NOT " } else { "" };
                let text = format!("{} IS {}NULL", self.expr_at(subject, PREC_ADD)?, not);
                return Ok((text, PREC_CMP));
            }
        }

        let (symbol, prec) = match op {
            BinaryOp::Or => ("OR", PREC_OR),
            BinaryOp::And => ("AND", PREC_AND),
            BinaryOp::Eq => ("=", PREC_CMP),
            BinaryOp::Ne => ("<>", PREC_CMP),
            BinaryOp::Lt => ("<", PREC_CMP),
            BinaryOp::Le => ("<=", PREC_CMP),
            BinaryOp::Gt => (">", PREC_CMP),
            BinaryOp::Ge => (">=", PREC_CMP),
            BinaryOp::In => ("IN", PREC_CMP),
            BinaryOp::NotIn => ("NOT IN", PREC_CMP),
            BinaryOp::Like => ("LIKE", PREC_CMP),
            BinaryOp::NotLike => ("NOT LIKE", PREC_CMP),
            BinaryOp::Add => ("+", PREC_ADD),
            BinaryOp::Sub => ("-", PREC_ADD),
            BinaryOp::Mul => ("*", PREC_MUL),
            BinaryOp::Div => ("/", PREC_MUL),
            BinaryOp::Mod => ("%", PREC_MUL),
        };
        let (left_min, right_min) = match op {
            BinaryOp::Or | BinaryOp::And | BinaryOp::Add | BinaryOp::Mul => (prec, prec),
            BinaryOp::Sub | BinaryOp::Div | BinaryOp::Mod => (prec, prec + 1),
            _ => (prec + 1, prec + 1),
        };
        let text = format!(
            "{} {} {}",
            self.expr_at(left, left_min)?,
            symbol,
            self.expr_at(right, right_min)?
        );
        Ok((text, prec))
    }

    /// Attribute path relative to the block that owns `alias`
    fn field(&mut self, alias: &str, path: &[PathStep]) -> Result<String> {
        let (level, render) = self.lookup(alias);
        let mut head = String::new();
        if level > 0 {
            head.push_str(&"$parent.".repeat(level));
            head.push_str("$current");
        }
        if let AliasRender::Qualified(qualified) = &render {
            if !head.is_empty() {
                head.push('.');
            }
            let parts: Vec<String> = qualified.split('.').map(ident::quote).collect();
            head.push_str(&parts.join("."));
        }

        if path.is_empty() {
            return Ok(if head.is_empty() { "@this".to_string() } else { head });
        }
        let mut text = head;
        for step in path {
            match step {
                PathStep::Member(name) => {
                    if !text.is_empty() {
                        text.push('.');
                    }
                    text.push_str(&ident::quote(name));
                }
                PathStep::Index(index) => {
                    if text.is_empty() {
                        text.push_str("@this");
                    }
                    text.push('[');
                    text.push_str(&self.expr_at(index, 0)?);
                    text.push(']');
                }
            }
        }
        Ok(text)
    }

    fn path_suffix(&mut self, path: &[PathStep]) -> Result<String> {
        let mut text = String::new();
        for step in path {
            match step {
                PathStep::Member(name) => {
                    text.push('.');
                    text.push_str(&ident::quote(name));
                }
                PathStep::Index(index) => {
                    text.push('[');
                    text.push_str(&self.expr_at(index, 0)?);
                    text.push(']');
                }
            }
        }
        Ok(text)
    }

    /// Aggregate reference: a column of the grouped derived table when
    /// the block reads one, the aggregate call otherwise
    fn aggregate(&mut self, acc: &Accumulator) -> Result<String> {
        if let Some(place) = self.aggregate_barrier {
            return Err(GenerationError::new(
                GenerationErrorKind::UnsupportedAggregatePlacement,
                Some(acc.span),
                format!("aggregate `{}` cannot appear in a {}", acc.alias, place),
            ));
        }
        let block = self.block();
        if block.group != Some(acc.group) {
            return Err(GenerationError::new(
                GenerationErrorKind::UnsupportedAggregatePlacement,
                Some(acc.span),
                format!("aggregate `{}` referenced outside its COLLECT block", acc.alias),
            ));
        }
        if let Some(columns) = &block.columns {
            return columns
                .iter()
                .find(|(c, _)| same_accumulator(c, acc))
                .map(|(_, column)| ident::quote(column))
                .ok_or_else(|| {
                    GenerationError::new(
                        GenerationErrorKind::UnsupportedAggregatePlacement,
                        Some(acc.span),
                        format!("aggregate `{}` is not available after grouping", acc.alias),
                    )
                });
        }
        self.accumulator(acc)
    }

    fn accumulator(&mut self, acc: &Accumulator) -> Result<String> {
        let argument = match &acc.argument {
            Some(arg) => {
                let saved = self.aggregate_barrier.replace("aggregate argument");
                let text = self.expr_at(arg, 0)?;
                self.aggregate_barrier = saved;
                Some(text)
            }
            None => None,
        };
        let require = |arg: Option<String>| {
            arg.ok_or_else(|| {
                GenerationError::new(
                    GenerationErrorKind::UnknownFunction,
                    Some(acc.span),
                    format!("aggregate {} requires an argument", acc.function),
                )
            })
        };

        let text = match &acc.function {
            AggregateFunction::Count => "count(*)".to_string(),
            AggregateFunction::Sum => format!("sum({})", require(argument)?),
            AggregateFunction::Avg => format!("avg({})", require(argument)?),
            AggregateFunction::Min => format!("min({})", require(argument)?),
            AggregateFunction::Max => format!("max({})", require(argument)?),
            AggregateFunction::CountDistinct => format!("set({}).size()", require(argument)?),
            AggregateFunction::Unique => format!("set({})", require(argument)?),
            AggregateFunction::Push => format!("list({})", require(argument)?),
            AggregateFunction::Other(name) => {
                return Err(GenerationError::new(
                    GenerationErrorKind::UnknownFunction,
                    Some(acc.span),
                    format!("unknown aggregate function `{}`", name),
                ))
            }
        };
        Ok(text)
    }

    /// Function call through the mapping table
    fn call(&mut self, name: &str, args: &[Expr], span: Span) -> Result<(String, u8)> {
        let spec = functions::lookup(name).ok_or_else(|| {
            GenerationError::new(
                GenerationErrorKind::UnknownFunction,
                Some(span),
                format!("unknown function `{}`", name),
            )
        })?;
        if !spec.accepts(args.len()) {
            return Err(GenerationError::new(
                GenerationErrorKind::UnknownFunction,
                Some(span),
                format!("function `{}` does not take {} argument(s)", name, args.len()),
            ));
        }

        match spec.mapping {
            Mapping::Rename(target) => {
                let mut parts = Vec::with_capacity(args.len());
                for arg in args {
                    parts.push(self.expr_at(arg, 0)?);
                }
                Ok((format!("{}({})", target, parts.join(", ")), PREC_ATOM))
            }
            Mapping::Method(method) => {
                let (receiver, rest) = split_receiver(name, args, span)?;
                let receiver = self.expr_at(receiver, PREC_ATOM)?;
                let mut parts = Vec::with_capacity(rest.len());
                for arg in rest {
                    parts.push(self.expr_at(arg, 0)?);
                }
                Ok((format!("{}.{}({})", receiver, method, parts.join(", ")), PREC_ATOM))
            }
            Mapping::Special(special) => self.special(special, name, args, span),
        }
    }

    fn special(
        &mut self,
        special: Special,
        name: &str,
        args: &[Expr],
        span: Span,
    ) -> Result<(String, u8)> {
        let (first, rest) = split_receiver(name, args, span)?;
        let rendered = match special {
            Special::Size => match first {
                Expr::Subquery(pipeline) => (
                    format!("(SELECT count(*) FROM {})", self.subquery(pipeline)?),
                    PREC_ATOM,
                ),
                other => (format!("{}.size()", self.expr_at(other, PREC_ATOM)?), PREC_ATOM),
            },
            Special::First => (format!("{}[0]", self.expr_at(first, PREC_ATOM)?), PREC_ATOM),
            Special::Has => match rest {
                [Expr::Literal(Literal::String(attribute))] => {
                    let target = first.clone().member(attribute);
                    (
                        format!("{} IS NOT NULL", self.expr_at(&target, PREC_ADD)?),
                        PREC_CMP,
                    )
                }
                _ => {
                    return Err(GenerationError::new(
                        GenerationErrorKind::UnknownFunction,
                        Some(span),
                        "HAS requires a literal attribute name",
                    ))
                }
            },
            Special::Like => {
                let case_insensitive =
                    matches!(rest.get(1), Some(Expr::Literal(Literal::Bool(true))));
                let mut subject = self.expr_at(first, PREC_ADD)?;
                let mut pattern = match rest.first() {
                    Some(pattern) => self.expr_at(pattern, PREC_ADD)?,
                    None => return Err(arity_error(name, args.len(), span)),
                };
                if case_insensitive {
                    subject = format!("{}.toLowerCase()", wrap_atom(subject));
                    pattern = format!("{}.toLowerCase()", wrap_atom(pattern));
                }
                (format!("{} LIKE {}", subject, pattern), PREC_CMP)
            }
            Special::IsNull => (format!("{} IS NULL", self.expr_at(first, PREC_ADD)?), PREC_CMP),
            Special::RegexTest => {
                let pattern = match rest.first() {
                    Some(pattern) => self.expr_at(pattern, PREC_ADD)?,
                    None => return Err(arity_error(name, args.len(), span)),
                };
                (
                    format!("{} MATCHES {}", self.expr_at(first, PREC_ADD)?, pattern),
                    PREC_CMP,
                )
            }
            Special::Document => match first {
                Expr::Literal(Literal::String(id)) if id.contains('/') => {
                    let (collection, key) = id.split_once('/').unwrap_or((id.as_str(), ""));
                    (
                        format!(
                            "(SELECT FROM {} WHERE _key = {} LIMIT 1)",
                            ident::quote(collection),
                            ident::string_literal(key)
                        ),
                        PREC_ATOM,
                    )
                }
                other => (
                    format!("(SELECT FROM {})", self.expr_at(other, PREC_ATOM)?),
                    PREC_ATOM,
                ),
            },
            Special::Substring => {
                let receiver = self.expr_at(first, PREC_ATOM)?;
                let offset = match rest.first() {
                    Some(offset) => self.expr_at(offset, PREC_MUL)?,
                    None => return Err(arity_error(name, args.len(), span)),
                };
                let text = match rest.get(1) {
                    Some(length) => format!(
                        "{}.substring({}, {} + {})",
                        receiver,
                        offset,
                        offset,
                        self.expr_at(length, PREC_MUL)?
                    ),
                    None => format!("{}.substring({})", receiver, offset),
                };
                (text, PREC_ATOM)
            }
            Special::Contains => {
                let search = match rest.first() {
                    Some(search) => self.expr_at(search, 0)?,
                    None => return Err(arity_error(name, args.len(), span)),
                };
                (
                    format!("{}.indexOf({}) > -1", self.expr_at(first, PREC_ATOM)?, search),
                    PREC_CMP,
                )
            }
            Special::ParseIdentifier => {
                let receiver = self.expr_at(first, PREC_ATOM)?;
                (
                    format!("{}.substring({}.indexOf('/') + 1)", receiver, receiver),
                    PREC_ATOM,
                )
            }
            Special::DateAdd | Special::DateSubtract => {
                let (amount, unit) = match rest {
                    [amount, unit] => (amount, unit),
                    _ => return Err(arity_error(name, args.len(), span)),
                };
                let date = self.expr_at(first, 0)?;
                let unit = self.date_unit(unit)?;
                let mut amount = self.expr_at(amount, PREC_UNARY)?;
                if special == Special::DateSubtract {
                    let sep = if amount.starts_with('-') { " " } else { "" };
                    amount = format!("-{}{}", sep, amount);
                }
                (format!("date_add({}, {}, {})", date, unit, amount), PREC_ATOM)
            }
            Special::DateDiff => {
                let (other, unit) = match rest {
                    [other, unit, ..] => (other, unit),
                    _ => return Err(arity_error(name, args.len(), span)),
                };
                let unit = self.date_unit(unit)?;
                let text = format!(
                    "datediff({}, {}, {})",
                    unit,
                    self.expr_at(first, 0)?,
                    self.expr_at(other, 0)?
                );
                (text, PREC_ATOM)
            }
            Special::DateIso8601 => (
                format!(
                    "{}.format({})",
                    self.expr_at(first, PREC_ATOM)?,
                    ident::string_literal("yyyy-MM-dd'T'HH:mm:ss.SSS'Z'")
                ),
                PREC_ATOM,
            ),
            Special::DatePart(pattern) => (
                format!(
                    "{}.format({}).asInteger()",
                    self.expr_at(first, PREC_ATOM)?,
                    ident::string_literal(pattern)
                ),
                PREC_ATOM,
            ),
        };
        Ok(rendered)
    }

    /// Date units are passed to ArcadeDB lower-cased, e.g. `'day'`
    fn date_unit(&mut self, unit: &Expr) -> Result<String> {
        match unit {
            Expr::Literal(Literal::String(unit)) => {
                Ok(ident::string_literal(&unit.to_ascii_lowercase()))
            }
            other => self.expr_at(other, 0),
        }
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn literal(lit: &Literal) -> String {
    match lit {
        Literal::Null => "null".to_string(),
        Literal::Bool(b) => b.to_string(),
        Literal::Integer(n) => n.to_string(),
        Literal::Float(f) => {
            let text = f.to_string();
            if text.contains(|c| matches!(c, '.' | 'e' | 'E' | 'N' | 'i')) {
                text
            } else {
                format!("{}.0", text)
            }
        }
        Literal::String(s) => ident::string_literal(s),
    }
}

fn is_null(expr: &Expr) -> bool {
    matches!(expr, Expr::Literal(Literal::Null))
}

/// `text AS alias`, or just `text` when it already names the alias
fn aliased(text: String, alias: &str) -> String {
    let alias = ident::quote(alias);
    if text == alias {
        text
    } else {
        format!("{} AS {}", text, alias)
    }
}

fn wrap_atom(text: String) -> String {
    if text.contains(' ') {
        format!("({})", text)
    } else {
        text
    }
}

/// MATCH steps for (vertex hop, edge hop, edge to target vertex)
fn direction_steps(direction: Direction) -> (&'static str, &'static str, &'static str) {
    match direction {
        Direction::Outbound => ("out", "outE", "inV"),
        Direction::Inbound => ("in", "inE", "outV"),
        Direction::Any => ("both", "bothE", "bothV"),
    }
}

/// Flatten nested ANDs into conjuncts
fn split_and<'e>(expr: &'e Expr, out: &mut Vec<&'e Expr>) {
    match expr {
        Expr::Binary {
            op: BinaryOp::And,
            left,
            right,
        } => {
            split_and(left, out);
            split_and(right, out);
        }
        other => out.push(other),
    }
}

fn contains_subquery(expr: &Expr) -> bool {
    let mut found = false;
    expr.visit(&mut |e| {
        if matches!(e, Expr::Subquery(_)) {
            found = true;
        }
    });
    found
}

fn same_accumulator(a: &Accumulator, b: &Accumulator) -> bool {
    a.alias == b.alias && a.group == b.group && a.function == b.function && a.argument == b.argument
}

fn collect_aggregates(expr: &Expr, group: u32, out: &mut Vec<Accumulator>) {
    expr.visit(&mut |e| {
        if let Expr::Aggregate(acc) = e {
            if acc.group == group && !out.iter().any(|o| same_accumulator(o, acc)) {
                out.push((**acc).clone());
            }
        }
    });
}

fn split_receiver<'e>(name: &str, args: &'e [Expr], span: Span) -> Result<(&'e Expr, &'e [Expr])> {
    args.split_first()
        .ok_or_else(|| arity_error(name, args.len(), span))
}

fn arity_error(name: &str, arity: usize, span: Span) -> GenerationError {
    GenerationError::new(
        GenerationErrorKind::UnknownFunction,
        Some(span),
        format!("function `{}` does not take {} argument(s)", name, arity),
    )
}

/// Render a pipeline with its resolved bind variables
pub fn generate(
    pipeline: &Pipeline,
    bindings: &BindingTable,
    config: &TranslatorConfig,
) -> Result<GeneratedStatement> {
    Generator::new(bindings, config).generate(pipeline)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bind::{references, BindVars};
    use crate::ir::lower;
    use crate::query::{parse, resolve, tokenize};
    use serde_json::json;

    fn generate_with(
        query: &str,
        vars: &BindVars,
        config: &TranslatorConfig,
    ) -> Result<GeneratedStatement> {
        let tokens = tokenize(query).unwrap();
        let refs = references(&tokens);
        let ast = parse(tokens).unwrap();
        let resolution = resolve(&ast).unwrap();
        let pipeline = lower(&ast, &resolution).unwrap();
        let table = BindingTable::resolve(&refs, vars, config.allow_deferred_parameters).unwrap();
        generate(&pipeline, &table, config)
    }

    fn sql(query: &str) -> String {
        generate_with(query, &BindVars::new(), &TranslatorConfig::default())
            .unwrap()
            .text
    }

    #[test]
    fn test_simple_select() {
        assert_eq!(
            sql("FOR u IN users FILTER u.active == true RETURN u.name"),
            "SELECT name FROM users WHERE active = true"
        );
        assert_eq!(sql("FOR u IN users RETURN u"), "SELECT * FROM users");
    }

    #[test]
    fn test_group_with_count() {
        assert_eq!(
            sql("FOR u IN users COLLECT dept = u.department WITH COUNT INTO cnt RETURN {dept, \
                cnt}"),
            "SELECT department AS dept, count(*) AS cnt FROM users GROUP BY department"
        );
    }

    #[test]
    fn test_post_group_filter_wraps() {
        assert_eq!(
            sql("FOR u IN users COLLECT dept = u.department WITH COUNT INTO cnt FILTER cnt > 10 \
                RETURN dept"),
            "SELECT dept FROM (SELECT department AS dept, count(*) AS cnt FROM users GROUP BY \
                department) WHERE cnt > 10"
        );
    }

    #[test]
    fn test_aggregates() {
        assert_eq!(
            sql("FOR o IN orders COLLECT c = o.customer AGGREGATE total = SUM(o.amount), n = \
                COUNT_DISTINCT(o.item) RETURN {c, total, n}"),
            "SELECT customer AS c, sum(amount) AS total, set(item).size() AS n FROM orders \
                GROUP BY customer"
        );
        assert_eq!(
            sql("FOR u IN users COLLECT dept = u.department INTO g RETURN {dept, names: \
                g[*].u.name}"),
            "SELECT department AS dept, list(name) AS names FROM users GROUP BY department"
        );
    }

    #[test]
    fn test_traversal_match() {
        assert_eq!(
            sql("FOR v, e IN 1..2 OUTBOUND \"accounts/1\" transfers RETURN v"),
            "MATCH {type: accounts, as: _start, where: (_key = '1')}.out('transfers'){as: v, \
                while: ($depth < 2), where: ($depth >= 1)} RETURN v"
        );
    }

    #[test]
    fn test_traversal_node_filters() {
        assert_eq!(
            sql("FOR u IN users FILTER u.name == 'a' FOR v IN 1..1 OUTBOUND u follows FILTER \
                v.active == true RETURN v.name"),
            "MATCH {type: users, as: u, where: (name = 'a')}, {as: u}.out('follows'){as: v, \
                where: (active = true)} RETURN v.name"
        );
    }

    #[test]
    fn test_traversal_edge_alias() {
        assert_eq!(
            sql("FOR v, e IN OUTBOUND 'accounts/1' transfers FILTER e.amount > 100 RETURN {to: \
                v._key, amount: e.amount}"),
            "MATCH {type: accounts, as: _start, where: (_key = '1')}.outE('transfers'){as: e, \
                where: (amount > 100)}.inV(){as: v} RETURN v._key AS to, e.amount AS amount"
        );
    }

    #[test]
    fn test_traversal_residual_filter_wraps() {
        assert_eq!(
            sql("FOR u IN users FOR v IN OUTBOUND u follows FILTER v.age > u.age RETURN {a: \
                u.name, b: v.name}"),
            "SELECT u.name AS a, v.name AS b FROM (MATCH {type: users, as: u}, {as: \
                u}.out('follows'){as: v} RETURN u, v) WHERE v.age > u.age"
        );
    }

    #[test]
    fn test_join() {
        assert_eq!(
            sql("FOR u IN users FOR o IN orders FILTER o.user == u._key RETURN {name: u.name, \
                total: o.total}"),
            "SELECT u.name AS name, o.total AS total FROM users AS u, orders AS o WHERE o.user \
                = u._key"
        );
    }

    #[test]
    fn test_join_nesting() {
        let config = TranslatorConfig::default().with_join_nesting_threshold(2);
        let stmt = generate_with(
            "FOR x IN xs FOR y IN ys FOR z IN zs FILTER y.x == x._key && z.y == y._key RETURN z.v",
            &BindVars::new(),
            &config,
        )
        .unwrap();
        assert_eq!(
            stmt.text,
            "SELECT z.v FROM (SELECT x, y FROM xs AS x, ys AS y WHERE y.x = x._key) AS j1, zs \
                AS z WHERE z.y = j1.y._key"
        );
    }

    #[test]
    fn test_sort_limit() {
        assert_eq!(
            sql("FOR u IN users SORT u.age DESC LIMIT 5, 10 RETURN u"),
            "SELECT * FROM users ORDER BY age DESC SKIP 5 LIMIT 10"
        );
        assert_eq!(
            sql("FOR u IN users SORT u.name SORT u.age DESC RETURN u._key"),
            "SELECT _key FROM users ORDER BY age DESC, name ASC"
        );
    }

    #[test]
    fn test_expressions() {
        assert_eq!(
            sql("FOR u IN users FILTER u.email != null && u.age IN 18..30 RETURN u._key"),
            "SELECT _key FROM users WHERE email IS NOT NULL AND age BETWEEN 18 AND 30"
        );
        assert_eq!(
            sql("FOR u IN users FILTER u.a == 1 || u.b == 2 && u.c == 3 RETURN u"),
            "SELECT * FROM users WHERE a = 1 OR b = 2 AND c = 3"
        );
        assert_eq!(
            sql("FOR u IN users FILTER (u.a == 1 || u.b == 2) && u.c == 3 RETURN u"),
            "SELECT * FROM users WHERE (a = 1 OR b = 2) AND c = 3"
        );
        assert_eq!(
            sql("FOR u IN users RETURN u.age > 18 ? 'adult' : 'minor'"),
            "SELECT if(age > 18, 'adult', 'minor') FROM users"
        );
        assert_eq!(
            sql("FOR u IN users RETURN {n: LOWER(u.name), c: LENGTH(u.tags), s: 1.0}"),
            "SELECT name.toLowerCase() AS n, tags.size() AS c, 1.0 AS s FROM users"
        );
    }

    #[test]
    fn test_correlated_subquery() {
        assert_eq!(
            sql("FOR u IN users RETURN {name: u.name, orders: (FOR o IN orders FILTER o.user == \
                u._key RETURN o.total)}"),
            "SELECT name, (SELECT total FROM orders WHERE user = $parent.$current._key) AS \
                orders FROM users"
        );
    }

    #[test]
    fn test_length_of_subquery() {
        assert_eq!(
            sql("RETURN LENGTH(FOR u IN users RETURN u)"),
            "SELECT count(*) FROM (SELECT * FROM users)"
        );
        assert_eq!(
            sql("RETURN LENGTH(FOR u IN users RETURN 1)"),
            "SELECT count(*) FROM (SELECT 1 FROM users)"
        );
        assert_eq!(
            sql("LET top = FIRST(FOR o IN orders SORT o.total DESC LIMIT 1 RETURN o.total) \
                RETURN top"),
            "SELECT (SELECT total FROM orders ORDER BY total DESC LIMIT 1)[0] AS top"
        );
    }

    #[test]
    fn test_bind_parameters() {
        let vars = BindVars::new()
            .with_collection("coll", "users")
            .with_value("min", json!(21));
        let stmt = generate_with(
            "FOR u IN @@coll FILTER u.age >= @min RETURN u",
            &vars,
            &TranslatorConfig::default(),
        )
        .unwrap();
        assert_eq!(stmt.text, "SELECT * FROM users WHERE age >= :min");
        assert_eq!(stmt.parameters, vec!["min".to_string()]);
        assert_eq!(stmt.kind, StatementKind::Select);
    }

    #[test]
    fn test_unsafe_collection_substitution() {
        for value in ["users; DELETE FROM x", "my-coll", "a.b", "select"] {
            let vars = BindVars::new().with_collection("coll", value);
            let err =
                generate_with("FOR u IN @@coll RETURN u", &vars, &TranslatorConfig::default())
                    .unwrap_err();
            assert_eq!(
                err.kind,
                GenerationErrorKind::UnsafeIdentifierSubstitution,
                "@@coll = {:?}",
                value
            );
        }
    }

    #[test]
    fn test_unknown_function() {
        let err = generate_with(
            "FOR u IN users RETURN GEO_DISTANCE(u.a, u.b)",
            &BindVars::new(),
            &TranslatorConfig::default(),
        )
        .unwrap_err();
        assert_eq!(err.kind, GenerationErrorKind::UnknownFunction);
    }

    #[test]
    fn test_aggregate_in_subquery_rejected() {
        let err = generate_with(
            "FOR u IN users COLLECT d = u.dept WITH COUNT INTO c RETURN (FOR x IN things FILTER \
                x.n == c RETURN x)",
            &BindVars::new(),
            &TranslatorConfig::default(),
        )
        .unwrap_err();
        assert_eq!(err.kind, GenerationErrorKind::UnsupportedAggregatePlacement);
    }

    #[test]
    fn test_modifications() {
        assert_eq!(
            sql("INSERT {name: 'a', tags: ['x']} INTO users"),
            "INSERT INTO users CONTENT {\"name\": 'a', \"tags\": ['x']}"
        );
        assert_eq!(
            sql("UPDATE {_key: 'k1', name: 'x'} IN users"),
            "UPDATE users SET name = 'x' WHERE _key = 'k1'"
        );
        assert_eq!(
            sql("REPLACE 'k1' WITH {name: 'n'} IN users"),
            "UPDATE users CONTENT {\"name\": 'n'} WHERE _key = 'k1'"
        );
        assert_eq!(sql("REMOVE 'k1' IN users"), "DELETE FROM users WHERE _key = 'k1'");
        assert_eq!(
            sql("FOR u IN users FILTER u.age < 18 REMOVE u IN users"),
            "DELETE FROM users WHERE age < 18"
        );
        assert_eq!(
            sql("FOR u IN users FILTER u.active LIMIT 10 UPDATE u WITH {seen: true} IN users"),
            "UPDATE users SET seen = true WHERE active LIMIT 10"
        );
        assert_eq!(
            sql("FOR u IN users FILTER u.active INSERT {name: u.name} INTO archive"),
            "INSERT INTO archive FROM SELECT name FROM users WHERE active"
        );
    }

    #[test]
    fn test_array_source_unwinds() {
        let vars = BindVars::new()
            .with_value("words", json!(["a", "b"]))
            .with_value("ids", json!(["k1", "k2"]));
        let config = TranslatorConfig::default();
        let cases = [
            (
                "FOR w IN @words FILTER w != 'x' RETURN UPPER(w)",
                "SELECT w.toUpperCase() FROM (SELECT :words AS w UNWIND w) WHERE w <> 'x'",
            ),
            (
                "FOR w IN @words INSERT {word: w} INTO words",
                "INSERT INTO words FROM SELECT w AS word FROM (SELECT :words AS w UNWIND w)",
            ),
            (
                "FOR id IN @ids UPDATE id WITH {read: true} IN messages",
                "UPDATE messages SET read = true WHERE _key IN :ids",
            ),
            (
                "FOR id IN @ids REMOVE {_key: id} IN messages",
                "DELETE FROM messages WHERE _key IN :ids",
            ),
        ];
        for (query, expected) in cases {
            let stmt = generate_with(query, &vars, &config).unwrap();
            assert_eq!(stmt.text, expected, "{}", query);
        }

        assert_eq!(
            sql("FOR x IN [1, 2] RETURN x * 10"),
            "SELECT x * 10 FROM (SELECT [1, 2] AS x UNWIND x)"
        );
        assert_eq!(
            sql("FOR u IN users FOR n IN [1, 2] FILTER u.rank == n RETURN u.name"),
            "SELECT u.name FROM users AS u, (SELECT [1, 2] AS n UNWIND n) AS n WHERE u.rank = n.n"
        );
    }

    #[test]
    fn test_date_functions() {
        let cases = [
            (
                "FOR u IN users FILTER u.created > DATE_SUBTRACT(DATE_NOW(), 1, 'day') RETURN u",
                "SELECT * FROM users WHERE created > date_add(sysdate(), 'day', -1)",
            ),
            (
                "FOR u IN users RETURN DATE_ADD(u.created, 24, 'HOUR')",
                "SELECT date_add(created, 'hour', 24) FROM users",
            ),
            (
                "FOR u IN users RETURN DATE_SUBTRACT(u.created, -2, 'week')",
                "SELECT date_add(created, 'week', - -2) FROM users",
            ),
            (
                "FOR u IN users RETURN DATE_HOUR(u.created)",
                "SELECT created.format('HH').asInteger() FROM users",
            ),
            (
                "FOR u IN users RETURN DATE_DIFF(u.opened, u.closed, 'd')",
                "SELECT datediff('d', opened, closed) FROM users",
            ),
            (
                "FOR u IN users RETURN DATE_ISO8601(u.created)",
                "SELECT created.format('yyyy-MM-dd\\'T\\'HH:mm:ss.SSS\\'Z\\'') FROM users",
            ),
        ];
        for (query, expected) in cases {
            assert_eq!(sql(query), expected, "{}", query);
        }
    }

    #[test]
    fn test_merge_union_rand() {
        assert_eq!(
            sql("FOR u IN users RETURN MERGE(u, {seen: true})"),
            "SELECT @this.merge({\"seen\": true}) FROM users"
        );
        assert_eq!(
            sql("FOR u IN users RETURN UNION(u.tags, u.labels)"),
            "SELECT unionAll(tags, labels) FROM users"
        );
        assert_eq!(sql("RETURN RAND()"), "SELECT rand()");
    }

    #[test]
    fn test_deferred_parameter() {
        let config = TranslatorConfig::default().with_deferred_parameters(true);
        let stmt = generate_with("INSERT @doc INTO users", &BindVars::new(), &config).unwrap();
        assert_eq!(stmt.text, "INSERT INTO users CONTENT :doc");
        assert_eq!(stmt.kind, StatementKind::Insert);
    }
}
