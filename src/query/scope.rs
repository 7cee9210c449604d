//! Scope resolution
//!
//! Walks a parsed query with a chain of frames (one per query/subquery) and binds
//! every variable reference to its declaration. Bare identifiers that appear in
//! FOR-source or edge-collection position and are not bound denote collections.

use crate::diagnostics::Span;
use crate::error::{ScopeError, ScopeErrorKind};
use crate::query::ast::*;
use indexmap::IndexMap;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use tracing::trace;

pub type BindingId = usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum BindingKind {
    Document,
    Edge,
    Path,
    Let,
    GroupKey,
    Accumulator,
    GroupCapture,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Binding {
    pub id: BindingId,
    pub name: String,
    pub kind: BindingKind,
    pub span: Span,
    /// Keyword of the introducing clause
    pub clause: &'static str,
    /// Query nesting depth, 0 for the outermost query
    pub depth: usize,
}

/// Result of scope resolution, keyed by reference id and declaration span
#[derive(Debug, Default)]
pub struct Resolution {
    bindings: Vec<Binding>,
    references: HashMap<RefId, BindingId>,
    declarations: HashMap<Span, BindingId>,
    collections: HashSet<RefId>,
    referenced: HashSet<BindingId>,
    /// Bindings retired by each COLLECT clause, keyed by the clause span
    captures: HashMap<Span, Vec<BindingId>>,
}

impl Resolution {
    pub fn bindings(&self) -> &[Binding] {
        &self.bindings
    }

    pub fn binding(&self, id: BindingId) -> Option<&Binding> {
        self.bindings.get(id)
    }

    /// Binding a variable reference resolves to
    pub fn resolve(&self, var: &VarRef) -> Option<&Binding> {
        self.references
            .get(&var.id)
            .and_then(|id| self.bindings.get(*id))
    }

    /// Binding introduced at a declaration site
    pub fn declaration(&self, binder: &Binder) -> Option<&Binding> {
        self.declarations
            .get(&binder.span)
            .and_then(|id| self.bindings.get(*id))
    }

    /// Whether a bare identifier names a collection
    pub fn is_collection(&self, var: &VarRef) -> bool {
        self.collections.contains(&var.id)
    }

    pub fn is_referenced(&self, id: BindingId) -> bool {
        self.referenced.contains(&id)
    }

    /// Variables an `INTO` capture of the given COLLECT clause would hold
    pub fn captured_by(&self, collect_span: Span) -> Vec<&Binding> {
        self.captures
            .get(&collect_span)
            .map(|ids| ids.iter().filter_map(|id| self.bindings.get(*id)).collect())
            .unwrap_or_default()
    }
}

#[derive(Default)]
struct Frame {
    names: IndexMap<String, BindingId>,
    /// Names that existed in this frame but are no longer visible
    retired: HashSet<String>,
}

pub struct ScopeResolver {
    frames: Vec<Frame>,
    resolution: Resolution,
}

impl Default for ScopeResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl ScopeResolver {
    pub fn new() -> Self {
        Self {
            frames: Vec::new(),
            resolution: Resolution::default(),
        }
    }

    pub fn resolve(mut self, query: &Query) -> Result<Resolution, ScopeError> {
        self.resolve_query(query)?;
        trace!(
            bindings = self.resolution.bindings.len(),
            references = self.resolution.references.len(),
            "scope resolution complete"
        );
        Ok(self.resolution)
    }

    fn resolve_query(&mut self, query: &Query) -> Result<(), ScopeError> {
        self.frames.push(Frame::default());
        for clause in &query.clauses {
            self.resolve_clause(clause)?;
        }
        self.pop_frame();
        Ok(())
    }

    fn resolve_clause(&mut self, clause: &Clause) -> Result<(), ScopeError> {
        match clause {
            Clause::For(f) => {
                match &f.source {
                    ForSource::Expr(expr) => self.resolve_collection_position(expr)?,
                    ForSource::Traversal(t) => {
                        self.resolve_expr(&t.start)?;
                        match &t.edges {
                            EdgeSource::Collections(edges) => {
                                for edge in edges {
                                    self.resolve_collection_position(edge)?;
                                }
                            }
                            EdgeSource::Graph(name) => self.resolve_expr(name)?,
                        }
                    }
                }
                let kinds = [BindingKind::Document, BindingKind::Edge, BindingKind::Path];
                for (binder, kind) in f.variables.iter().zip(kinds) {
                    self.declare(binder, kind, "FOR")?;
                }
            }
            Clause::Let(l) => {
                self.resolve_expr(&l.expr)?;
                self.declare(&l.binder, BindingKind::Let, "LET")?;
            }
            Clause::Filter(f) => self.resolve_expr(&f.condition)?,
            Clause::Collect(c) => {
                for group in &c.groups {
                    self.resolve_expr(&group.expr)?;
                }
                for agg in &c.aggregates {
                    for arg in &agg.args {
                        self.resolve_expr(arg)?;
                    }
                }
                if let Some(projection) = c.into.as_ref().and_then(|i| i.projection.as_ref()) {
                    self.resolve_expr(projection)?;
                }

                self.retire_frame(c.span);

                for group in &c.groups {
                    self.declare(&group.binder, BindingKind::GroupKey, "COLLECT")?;
                }
                for agg in &c.aggregates {
                    self.declare(&agg.binder, BindingKind::Accumulator, "COLLECT")?;
                }
                if let Some(count) = &c.count_into {
                    self.declare(count, BindingKind::Accumulator, "COLLECT")?;
                }
                if let Some(into) = &c.into {
                    self.declare(&into.binder, BindingKind::GroupCapture, "COLLECT")?;
                }
            }
            Clause::Sort(s) => {
                for key in &s.keys {
                    self.resolve_expr(&key.expr)?;
                }
            }
            Clause::Limit(l) => {
                if let Some(offset) = &l.offset {
                    self.resolve_expr(offset)?;
                }
                self.resolve_expr(&l.count)?;
            }
            Clause::Return(r) => self.resolve_expr(&r.expr)?,
            Clause::Insert(i) => self.resolve_expr(&i.document)?,
            Clause::Update(u) | Clause::Replace(u) => {
                if let Some(key) = &u.key {
                    self.resolve_expr(key)?;
                }
                self.resolve_expr(&u.document)?;
            }
            Clause::Upsert(u) => {
                self.resolve_expr(&u.search)?;
                self.resolve_expr(&u.insert)?;
                self.resolve_expr(&u.update)?;
            }
            Clause::Remove(r) => self.resolve_expr(&r.key)?,
        }
        Ok(())
    }

    /// FOR sources and edge collections: an unbound bare name is a collection
    fn resolve_collection_position(&mut self, expr: &Expr) -> Result<(), ScopeError> {
        if let ExprKind::Variable(var) = &expr.kind {
            if self.lookup_visible(&var.name).is_none() {
                self.resolution.collections.insert(var.id);
                return Ok(());
            }
        }
        self.resolve_expr(expr)
    }

    fn resolve_expr(&mut self, expr: &Expr) -> Result<(), ScopeError> {
        match &expr.kind {
            ExprKind::Literal(_) | ExprKind::BindParam(_) | ExprKind::CollectionParam(_) => {}
            ExprKind::Variable(var) => self.resolve_reference(var, expr.span)?,
            ExprKind::Member { object, .. } => self.resolve_expr(object)?,
            ExprKind::Index { object, index } => {
                self.resolve_expr(object)?;
                self.resolve_expr(index)?;
            }
            ExprKind::Expand(inner) => self.resolve_expr(inner)?,
            ExprKind::Unary { operand, .. } => self.resolve_expr(operand)?,
            ExprKind::Binary { left, right, .. } => {
                self.resolve_expr(left)?;
                self.resolve_expr(right)?;
            }
            ExprKind::Ternary {
                condition,
                then,
                otherwise,
            } => {
                self.resolve_expr(condition)?;
                if let Some(then) = then {
                    self.resolve_expr(then)?;
                }
                self.resolve_expr(otherwise)?;
            }
            ExprKind::Range { start, end } => {
                self.resolve_expr(start)?;
                self.resolve_expr(end)?;
            }
            ExprKind::Array(elements) => {
                for element in elements {
                    match element {
                        ArrayElement::Item(e) | ArrayElement::Spread(e) => self.resolve_expr(e)?,
                    }
                }
            }
            ExprKind::Object(entries) => {
                for entry in entries {
                    match entry {
                        ObjectEntry::Field { value, .. } => self.resolve_expr(value)?,
                        ObjectEntry::Computed { key, value, .. } => {
                            self.resolve_expr(key)?;
                            self.resolve_expr(value)?;
                        }
                        ObjectEntry::Spread { expr, .. } => self.resolve_expr(expr)?,
                    }
                }
            }
            ExprKind::Call { args, .. } => {
                for arg in args {
                    self.resolve_expr(arg)?;
                }
            }
            ExprKind::Subquery(query) => self.resolve_query(query)?,
        }
        Ok(())
    }

    fn resolve_reference(&mut self, var: &VarRef, span: Span) -> Result<(), ScopeError> {
        if let Some(id) = self.lookup_visible(&var.name) {
            self.resolution.references.insert(var.id, id);
            self.resolution.referenced.insert(id);
            return Ok(());
        }
        let retired = self
            .frames
            .iter()
            .any(|frame| frame.retired.contains(&var.name));
        let kind = if retired {
            ScopeErrorKind::VariableOutOfScope
        } else {
            ScopeErrorKind::UndefinedVariable
        };
        Err(ScopeError::new(kind, &var.name, span))
    }

    fn lookup_visible(&self, name: &str) -> Option<BindingId> {
        self.frames
            .iter()
            .rev()
            .find_map(|frame| frame.names.get(name).copied())
    }

    fn declare(
        &mut self,
        binder: &Binder,
        kind: BindingKind,
        clause: &'static str,
    ) -> Result<(), ScopeError> {
        let depth = self.frames.len().saturating_sub(1);
        let id = self.resolution.bindings.len();
        let frame = match self.frames.last_mut() {
            Some(frame) => frame,
            None => return Ok(()),
        };
        if frame.names.contains_key(&binder.name) {
            return Err(ScopeError::new(
                ScopeErrorKind::DuplicateBinding,
                &binder.name,
                binder.span,
            ));
        }
        frame.names.insert(binder.name.clone(), id);
        frame.retired.remove(&binder.name);

        self.resolution.bindings.push(Binding {
            id,
            name: binder.name.clone(),
            kind,
            span: binder.span,
            clause,
            depth,
        });
        self.resolution.declarations.insert(binder.span, id);
        Ok(())
    }

    /// COLLECT hides every binding of the current frame
    fn retire_frame(&mut self, collect_span: Span) {
        if let Some(frame) = self.frames.last_mut() {
            let retired: Vec<(String, BindingId)> = frame.names.drain(..).collect();
            let ids = retired.iter().map(|(_, id)| *id).collect();
            frame.retired.extend(retired.into_iter().map(|(name, _)| name));
            self.resolution.captures.insert(collect_span, ids);
        }
    }

    fn pop_frame(&mut self) {
        if let Some(frame) = self.frames.pop() {
            if let Some(parent) = self.frames.last_mut() {
                for name in frame.names.into_keys().chain(frame.retired) {
                    if !parent.names.contains_key(&name) {
                        parent.retired.insert(name);
                    }
                }
            }
        }
    }
}

/// Resolve all variable references of a query
pub fn resolve(query: &Query) -> Result<Resolution, ScopeError> {
    ScopeResolver::new().resolve(query)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::lexer::tokenize;
    use crate::query::parser::parse;

    fn resolve_str(query: &str) -> Result<(Query, Resolution), ScopeError> {
        let query = parse(tokenize(query).unwrap()).unwrap();
        let resolution = resolve(&query)?;
        Ok((query, resolution))
    }

    #[test]
    fn test_collection_vs_variable() {
        let (query, res) = resolve_str("FOR u IN users FILTER u.active RETURN u").unwrap();
        match &query.clauses[0] {
            Clause::For(f) => match &f.source {
                ForSource::Expr(e) => assert!(res.is_collection(e.as_variable().unwrap())),
                _ => panic!("Expected plain FOR"),
            },
            _ => panic!("Expected FOR"),
        }
        match &query.clauses[2] {
            Clause::Return(r) => {
                let binding = res.resolve(r.expr.as_variable().unwrap()).unwrap();
                assert_eq!(binding.name, "u");
                assert_eq!(binding.kind, BindingKind::Document);
            }
            _ => panic!("Expected RETURN"),
        }
    }

    #[test]
    fn test_forward_reference_is_undefined() {
        let err = resolve_str("FILTER x > 1 LET x = 2 RETURN x").unwrap_err();
        assert_eq!(err.kind, ScopeErrorKind::UndefinedVariable);
        assert_eq!(err.name, "x");
    }

    #[test]
    fn test_subquery_bindings_are_invisible_outside() {
        let err = resolve_str("LET s = (FOR inner IN xs RETURN inner) RETURN inner").unwrap_err();
        assert_eq!(err.kind, ScopeErrorKind::VariableOutOfScope);
    }

    #[test]
    fn test_subquery_sees_outer_bindings() {
        let (_, res) =
            resolve_str("FOR c IN cats LET s = (FOR e IN edges FILTER e.c == c._id RETURN e) \
                RETURN s")
                .unwrap();
        let outer = res.bindings().iter().find(|b| b.name == "c").unwrap();
        assert_eq!(outer.depth, 0);
        let inner = res.bindings().iter().find(|b| b.name == "e").unwrap();
        assert_eq!(inner.depth, 1);
        assert!(res.is_referenced(outer.id));
    }

    #[test]
    fn test_collect_retires_bindings() {
        let err = resolve_str("FOR u IN users COLLECT d = u.dept RETURN u").unwrap_err();
        assert_eq!(err.kind, ScopeErrorKind::VariableOutOfScope);
        assert_eq!(err.name, "u");

        let (_, res) =
            resolve_str("FOR u IN users COLLECT d = u.dept WITH COUNT INTO n RETURN {d, \
                n}").unwrap();
        let kinds: Vec<BindingKind> = res.bindings().iter().map(|b| b.kind).collect();
        assert_eq!(
            kinds,
            vec![BindingKind::Document, BindingKind::GroupKey, BindingKind::Accumulator]
        );
    }

    #[test]
    fn test_collect_captures() {
        let (query, res) =
            resolve_str("FOR u IN users LET a = u.age COLLECT d = u.dept INTO g RETURN g").unwrap();
        let names: Vec<&str> = res
            .captured_by(query.clauses[2].span())
            .iter()
            .map(|b| b.name.as_str())
            .collect();
        assert_eq!(names, vec!["u", "a"]);
    }

    #[test]
    fn test_duplicate_binding() {
        let err = resolve_str("FOR u IN users LET u = 1 RETURN u").unwrap_err();
        assert_eq!(err.kind, ScopeErrorKind::DuplicateBinding);

        let err = resolve_str("FOR v, v IN OUTBOUND 'a/1' e RETURN v").unwrap_err();
        assert_eq!(err.kind, ScopeErrorKind::DuplicateBinding);
    }

    #[test]
    fn test_shadowing_in_subquery_allowed() {
        assert!(resolve_str("FOR u IN users RETURN (FOR u IN admins RETURN u)").is_ok());
    }

    #[test]
    fn test_rebinding_after_collect_allowed() {
        assert!(resolve_str("FOR u IN users COLLECT d = u.dept LET u = d RETURN u").is_ok());
    }

    #[test]
    fn test_traversal_edges_are_collections() {
        let (query, res) =
            resolve_str("FOR a IN accounts FOR v IN 1..3 OUTBOUND a transfers RETURN v").unwrap();
        match &query.clauses[1] {
            Clause::For(ForClause {
                source: ForSource::Traversal(t),
                ..
            }) => {
                let start = res.resolve(t.start.as_variable().unwrap()).unwrap();
                assert_eq!(start.name, "a");
                match &t.edges {
                    EdgeSource::Collections(edges) => {
                        assert!(res.is_collection(edges[0].as_variable().unwrap()))
                    }
                    _ => panic!("Expected edge collections"),
                }
            }
            _ => panic!("Expected traversal"),
        }
    }
}
