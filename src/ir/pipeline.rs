//! Relational pipeline IR
//!
//! A `Pipeline` is an ordered list of stages that the generator renders into one
//! SQL statement. Source aliases are the AQL iteration variable names; every
//! expression that reads a document refers to its source through `Expr::Field`.

use crate::diagnostics::Span;
use crate::query::ast::{BinaryOp, Direction, Literal, SortDirection, UnaryOp};
use serde::Serialize;
use std::fmt;

// ============================================================================
// Stages
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Default)]
pub struct Pipeline {
    pub stages: Vec<Stage>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Stage {
    Source(Source),
    Join(Join),
    Filter(Filter),
    GroupBy(GroupBy),
    OrderBy(OrderBy),
    Limit(Limit),
    Distinct,
    Project(Project),
    Modify(Modify),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Source {
    pub alias: String,
    pub kind: SourceKind,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum SourceKind {
    Collection(CollectionRef),
    Subquery(Box<Pipeline>),
    Traversal(TraversalSource),
    /// Constant or bound `@name` array, one row per element
    Array(Expr),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum CollectionRef {
    Named(String),
    /// `@@name`, substituted from the binding table at generation time
    Bind { name: String, span: Span },
}

impl CollectionRef {
    /// Same collection as far as the query text can tell
    pub fn same_as(&self, other: &CollectionRef) -> bool {
        match (self, other) {
            (CollectionRef::Named(a), CollectionRef::Named(b)) => a == b,
            (CollectionRef::Bind { name: a, .. }, CollectionRef::Bind { name: b, .. }) => a == b,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TraversalSource {
    pub start: TraversalStart,
    pub direction: Direction,
    pub min_depth: u32,
    pub max_depth: u32,
    pub edges: Vec<CollectionRef>,
    /// Set only when the edge variable is referenced (fixed depth 1 traversals)
    pub edge_alias: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum TraversalStart {
    /// Constant or bind-parameter vertex id, e.g. `"accounts/1"`
    Vertex(Expr),
    /// A document produced by an earlier source
    Alias(String),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Join {
    pub source: Source,
    /// Correlation predicates with earlier sources
    pub predicates: Vec<Expr>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Filter {
    pub predicate: Expr,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupBy {
    pub id: u32,
    pub keys: Vec<GroupKey>,
    pub accumulators: Vec<Accumulator>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupKey {
    pub alias: String,
    pub expr: Expr,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Accumulator {
    pub alias: String,
    /// Owning `GroupBy::id`
    pub group: u32,
    pub function: AggregateFunction,
    pub argument: Option<Expr>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum AggregateFunction {
    Count,
    Sum,
    Avg,
    Min,
    Max,
    CountDistinct,
    Unique,
    /// INTO captures and PUSH()
    Push,
    /// Name with no known aggregate mapping; rejected by the generator
    Other(String),
}

impl fmt::Display for AggregateFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AggregateFunction::Count => write!(f, "COUNT"),
            AggregateFunction::Sum => write!(f, "SUM"),
            AggregateFunction::Avg => write!(f, "AVG"),
            AggregateFunction::Min => write!(f, "MIN"),
            AggregateFunction::Max => write!(f, "MAX"),
            AggregateFunction::CountDistinct => write!(f, "COUNT_DISTINCT"),
            AggregateFunction::Unique => write!(f, "UNIQUE"),
            AggregateFunction::Push => write!(f, "PUSH"),
            AggregateFunction::Other(name) => write!(f, "{}", name),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrderBy {
    pub keys: Vec<SortKey>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SortKey {
    pub expr: Expr,
    pub direction: SortDirection,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Limit {
    pub offset: Option<Expr>,
    pub count: Expr,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Project {
    pub items: Vec<ProjectItem>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProjectItem {
    pub expr: Expr,
    pub alias: Option<String>,
}

/// Terminal data-modification stage
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Modify {
    pub collection: CollectionRef,
    pub op: ModifyOp,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum ModifyOp {
    Insert(InsertContent),
    /// `key: None` targets the documents selected by the pipeline's filters
    Update {
        key: Option<KeyMatch>,
        changes: Changes,
    },
    Remove {
        key: Option<KeyMatch>,
    },
}

/// Document selection for keyed UPDATE / REPLACE / REMOVE
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum KeyMatch {
    /// `_key = k`
    Equals(Expr),
    /// `_key IN list`, one document per element of an array source
    AnyOf(Expr),
}

impl KeyMatch {
    pub fn expr(&self) -> &Expr {
        match self {
            KeyMatch::Equals(e) | KeyMatch::AnyOf(e) => e,
        }
    }
}

impl fmt::Display for KeyMatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyMatch::Equals(e) => write!(f, "{}", e),
            KeyMatch::AnyOf(e) => write!(f, "ANY {}", e),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum InsertContent {
    Document(Expr),
    /// `INSERT INTO c FROM SELECT ...` over the pipeline's sources
    Select(Project),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Changes {
    Set(Vec<(String, Expr)>),
    Merge(Expr),
    Content(Expr),
}

// ============================================================================
// Expressions
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Expr {
    Literal(Literal),
    Param {
        name: String,
        span: Span,
    },
    /// Attribute path over a source document; an empty path is the document itself
    Field {
        alias: String,
        path: Vec<PathStep>,
    },
    /// Attribute path over a computed value
    Access {
        base: Box<Expr>,
        path: Vec<PathStep>,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    /// `value IN low..high`
    Between {
        value: Box<Expr>,
        low: Box<Expr>,
        high: Box<Expr>,
        negated: bool,
    },
    Conditional {
        condition: Box<Expr>,
        then: Option<Box<Expr>>,
        otherwise: Box<Expr>,
    },
    Array(Vec<Expr>),
    Object(Vec<(String, Expr)>),
    /// Scalar function call; `name` is upper-cased
    Call {
        name: String,
        args: Vec<Expr>,
        span: Span,
    },
    /// Reference to a COLLECT grouping key
    GroupKey {
        alias: String,
        group: u32,
        expr: Box<Expr>,
    },
    Aggregate(Box<Accumulator>),
    Subquery(Box<Pipeline>),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum PathStep {
    Member(String),
    Index(Box<Expr>),
}

impl Expr {
    pub fn field(alias: &str) -> Expr {
        Expr::Field {
            alias: alias.to_string(),
            path: Vec::new(),
        }
    }

    /// Append an attribute step, extending an existing path where possible
    pub fn member(self, name: &str) -> Expr {
        self.push_step(PathStep::Member(name.to_string()))
    }

    pub fn push_step(self, step: PathStep) -> Expr {
        match self {
            Expr::Field { alias, mut path } => {
                path.push(step);
                Expr::Field { alias, path }
            }
            Expr::Access { base, mut path } => {
                path.push(step);
                Expr::Access { base, path }
            }
            other => Expr::Access {
                base: Box::new(other),
                path: vec![step],
            },
        }
    }

    /// Free of document, group and subquery references
    pub fn is_constant(&self) -> bool {
        let mut constant = true;
        self.visit(&mut |e| {
            if matches!(
                e,
                Expr::Field { .. } | Expr::GroupKey { .. } | Expr::Aggregate(_) | Expr::Subquery(_)
            ) {
                constant = false;
            }
        });
        constant
    }

    pub fn contains_aggregate(&self) -> bool {
        let mut found = false;
        self.visit(&mut |e| {
            if matches!(e, Expr::Aggregate(_)) {
                found = true;
            }
        });
        found
    }

    /// Source aliases read by this expression, including inside subqueries,
    /// in first-reference order
    pub fn aliases(&self) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        self.visit_deep(&mut |e| {
            if let Expr::Field { alias, .. } = e {
                if !out.contains(alias) {
                    out.push(alias.clone());
                }
            }
        });
        out
    }

    /// Pre-order walk over this expression, not descending into subqueries
    pub fn visit(&self, f: &mut dyn FnMut(&Expr)) {
        f(self);
        self.for_each_child(&mut |child| child.visit(f));
    }

    /// Pre-order walk that also descends into subquery pipelines
    pub fn visit_deep(&self, f: &mut dyn FnMut(&Expr)) {
        f(self);
        if let Expr::Subquery(pipeline) = self {
            pipeline.visit_exprs(&mut |e| e.visit_deep(f));
            return;
        }
        self.for_each_child(&mut |child| child.visit_deep(f));
    }

    fn for_each_child(&self, f: &mut dyn FnMut(&Expr)) {
        match self {
            Expr::Literal(_) | Expr::Param { .. } | Expr::Subquery(_) => {}
            Expr::Field { path, .. } => visit_path(path, f),
            Expr::Access { base, path } => {
                f(base);
                visit_path(path, f);
            }
            Expr::Unary { operand, .. } => f(operand),
            Expr::Binary { left, right, .. } => {
                f(left);
                f(right);
            }
            Expr::Between {
                value, low, high, ..
            } => {
                f(value);
                f(low);
                f(high);
            }
            Expr::Conditional {
                condition,
                then,
                otherwise,
            } => {
                f(condition);
                if let Some(then) = then {
                    f(then);
                }
                f(otherwise);
            }
            Expr::Array(items) => items.iter().for_each(|e| f(e)),
            Expr::Object(fields) => fields.iter().for_each(|(_, e)| f(e)),
            Expr::Call { args, .. } => args.iter().for_each(|e| f(e)),
            Expr::GroupKey { expr, .. } => f(expr),
            Expr::Aggregate(acc) => {
                if let Some(arg) = &acc.argument {
                    f(arg);
                }
            }
        }
    }
}

fn visit_path(path: &[PathStep], f: &mut dyn FnMut(&Expr)) {
    for step in path {
        if let PathStep::Index(index) = step {
            f(index);
        }
    }
}

impl Pipeline {
    pub fn new(stages: Vec<Stage>) -> Self {
        Self { stages }
    }

    /// Source and Join stages in order
    pub fn sources(&self) -> impl Iterator<Item = &Source> {
        self.stages.iter().filter_map(|stage| match stage {
            Stage::Source(s) => Some(s),
            Stage::Join(j) => Some(&j.source),
            _ => None,
        })
    }

    pub fn has_traversal(&self) -> bool {
        self.sources()
            .any(|s| matches!(s.kind, SourceKind::Traversal(_)))
    }

    pub fn group_by(&self) -> Option<&GroupBy> {
        self.stages.iter().find_map(|stage| match stage {
            Stage::GroupBy(g) => Some(g),
            _ => None,
        })
    }

    /// Visit every top-level expression held by the stages
    pub fn visit_exprs(&self, f: &mut dyn FnMut(&Expr)) {
        for stage in &self.stages {
            match stage {
                Stage::Source(s) => visit_source(s, f),
                Stage::Join(j) => {
                    visit_source(&j.source, f);
                    j.predicates.iter().for_each(|e| f(e));
                }
                Stage::Filter(filter) => f(&filter.predicate),
                Stage::GroupBy(g) => {
                    g.keys.iter().for_each(|k| f(&k.expr));
                    for acc in &g.accumulators {
                        if let Some(arg) = &acc.argument {
                            f(arg);
                        }
                    }
                }
                Stage::OrderBy(o) => o.keys.iter().for_each(|k| f(&k.expr)),
                Stage::Limit(l) => {
                    if let Some(offset) = &l.offset {
                        f(offset);
                    }
                    f(&l.count);
                }
                Stage::Distinct => {}
                Stage::Project(p) => p.items.iter().for_each(|i| f(&i.expr)),
                Stage::Modify(m) => match &m.op {
                    ModifyOp::Insert(InsertContent::Document(e)) => f(e),
                    ModifyOp::Insert(InsertContent::Select(p)) => {
                        p.items.iter().for_each(|i| f(&i.expr))
                    }
                    ModifyOp::Update { key, changes } => {
                        if let Some(key) = key {
                            f(key.expr());
                        }
                        match changes {
                            Changes::Set(fields) => fields.iter().for_each(|(_, e)| f(e)),
                            Changes::Merge(e) | Changes::Content(e) => f(e),
                        }
                    }
                    ModifyOp::Remove { key } => {
                        if let Some(key) = key {
                            f(key.expr());
                        }
                    }
                },
            }
        }
    }
}

fn visit_source(source: &Source, f: &mut dyn FnMut(&Expr)) {
    match &source.kind {
        SourceKind::Subquery(p) => p.visit_exprs(f),
        SourceKind::Traversal(t) => {
            if let TraversalStart::Vertex(e) = &t.start {
                f(e);
            }
        }
        SourceKind::Array(e) => f(e),
        SourceKind::Collection(_) => {}
    }
}

// ============================================================================
// Display (used by `explain`)
// ============================================================================

impl fmt::Display for CollectionRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CollectionRef::Named(name) => write!(f, "{}", name),
            CollectionRef::Bind { name, .. } => write!(f, "@@{}", name),
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            SourceKind::Collection(c) => write!(f, "{} AS {}", c, self.alias),
            SourceKind::Subquery(p) => write!(f, "({}) AS {}", p, self.alias),
            SourceKind::Array(e) => write!(f, "{} AS {}", e, self.alias),
            SourceKind::Traversal(t) => {
                let start = match &t.start {
                    TraversalStart::Vertex(e) => e.to_string(),
                    TraversalStart::Alias(a) => a.clone(),
                };
                let edges: Vec<String> = t.edges.iter().map(|e| e.to_string()).collect();
                write!(
                    f,
                    "{}..{} {} {} [{}] AS {}",
                    t.min_depth,
                    t.max_depth,
                    t.direction,
                    start,
                    edges.join(", "),
                    self.alias
                )?;
                if let Some(edge) = &t.edge_alias {
                    write!(f, ", {}", edge)?;
                }
                Ok(())
            }
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Source(s) => write!(f, "Source({})", s),
            Stage::Join(j) => {
                write!(f, "Join({}", j.source)?;
                if !j.predicates.is_empty() {
                    write!(f, " ON {}", join_exprs(&j.predicates, " && "))?;
                }
                write!(f, ")")
            }
            Stage::Filter(filter) => write!(f, "Filter({})", filter.predicate),
            Stage::GroupBy(g) => {
                let keys: Vec<String> = g
                    .keys
                    .iter()
                    .map(|k| format!("{} = {}", k.alias, k.expr))
                    .collect();
                let accs: Vec<String> = g
                    .accumulators
                    .iter()
                    .map(|a| format!("{} = {}", a.alias, AccumulatorDisplay(a)))
                    .collect();
                write!(f, "GroupBy([{}]; [{}])", keys.join(", "), accs.join(", "))
            }
            Stage::OrderBy(o) => {
                let keys: Vec<String> = o
                    .keys
                    .iter()
                    .map(|k| format!("{} {}", k.expr, k.direction))
                    .collect();
                write!(f, "OrderBy({})", keys.join(", "))
            }
            Stage::Limit(l) => match &l.offset {
                Some(offset) => write!(f, "Limit({}, {})", offset, l.count),
                None => write!(f, "Limit({})", l.count),
            },
            Stage::Distinct => write!(f, "Distinct"),
            Stage::Project(p) => write!(f, "Project({})", ProjectDisplay(p)),
            Stage::Modify(m) => match &m.op {
                ModifyOp::Insert(InsertContent::Document(e)) => {
                    write!(f, "Insert({} INTO {})", e, m.collection)
                }
                ModifyOp::Insert(InsertContent::Select(p)) => {
                    write!(f, "Insert(SELECT {} INTO {})", ProjectDisplay(p), m.collection)
                }
                ModifyOp::Update { key, changes } => {
                    let target = key.as_ref().map_or("<rows>".to_string(), |k| k.to_string());
                    let changes = match changes {
                        Changes::Set(fields) => fields
                            .iter()
                            .map(|(k, v)| format!("{} = {}", k, v))
                            .collect::<Vec<_>>()
                            .join(", "),
                        Changes::Merge(e) => format!("MERGE {}", e),
                        Changes::Content(e) => format!("CONTENT {}", e),
                    };
                    write!(f, "Update({} IN {}: {})", target, m.collection, changes)
                }
                ModifyOp::Remove { key } => {
                    let target = key.as_ref().map_or("<rows>".to_string(), |k| k.to_string());
                    write!(f, "Remove({} IN {})", target, m.collection)
                }
            },
        }
    }
}

impl fmt::Display for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let stages: Vec<String> = self.stages.iter().map(|s| s.to_string()).collect();
        write!(f, "[{}]", stages.join(", "))
    }
}

struct AccumulatorDisplay<'a>(&'a Accumulator);

impl fmt::Display for AccumulatorDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0.argument {
            Some(arg) => write!(f, "{}({})", self.0.function, arg),
            None => write!(f, "{}()", self.0.function),
        }
    }
}

struct ProjectDisplay<'a>(&'a Project);

impl fmt::Display for ProjectDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let items: Vec<String> = self
            .0
            .items
            .iter()
            .map(|item| match &item.alias {
                Some(alias) => format!("{}: {}", alias, item.expr),
                None => item.expr.to_string(),
            })
            .collect();
        write!(f, "{}", items.join(", "))
    }
}

fn join_exprs(exprs: &[Expr], sep: &str) -> String {
    exprs
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join(sep)
}

fn write_path(f: &mut fmt::Formatter<'_>, path: &[PathStep]) -> fmt::Result {
    for step in path {
        match step {
            PathStep::Member(name) => write!(f, ".{}", name)?,
            PathStep::Index(index) => write!(f, "[{}]", index)?,
        }
    }
    Ok(())
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Literal(lit) => write!(f, "{}", lit),
            Expr::Param { name, .. } => write!(f, "@{}", name),
            Expr::Field { alias, path } => {
                write!(f, "{}", alias)?;
                write_path(f, path)
            }
            Expr::Access { base, path } => {
                write!(f, "({})", base)?;
                write_path(f, path)
            }
            Expr::Unary { op, operand } => write!(f, "{}{}", op, operand),
            Expr::Binary { op, left, right } => write!(f, "({} {} {})", left, op, right),
            Expr::Between {
                value,
                low,
                high,
                negated,
            } => {
                let op = if *negated { "NOT IN" } else { "IN" };
                write!(f, "({} {} {}..{})", value, op, low, high)
            }
            Expr::Conditional {
                condition,
                then,
                otherwise,
            } => match then {
                Some(then) => write!(f, "({} ? {} : {})", condition, then, otherwise),
                None => write!(f, "({} ?: {})", condition, otherwise),
            },
            Expr::Array(items) => write!(f, "[{}]", join_exprs(items, ", ")),
            Expr::Object(fields) => {
                let fields: Vec<String> =
                    fields.iter().map(|(k, v)| format!("{}: {}", k, v)).collect();
                write!(f, "{{{}}}", fields.join(", "))
            }
            Expr::Call { name, args, .. } => write!(f, "{}({})", name, join_exprs(args, ", ")),
            Expr::GroupKey { alias, .. } => write!(f, "key:{}", alias),
            Expr::Aggregate(acc) => write!(f, "{}", AccumulatorDisplay(acc)),
            Expr::Subquery(p) => write!(f, "({})", p),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_member_extends_field_path() {
        let expr = Expr::field("u").member("address").member("city");
        match &expr {
            Expr::Field { alias, path } => {
                assert_eq!(alias, "u");
                assert_eq!(path.len(), 2);
            }
            _ => panic!("Expected field"),
        }
        assert_eq!(expr.to_string(), "u.address.city");
    }

    #[test]
    fn test_constant_detection() {
        let constant = Expr::Binary {
            op: BinaryOp::Add,
            left: Box::new(Expr::Literal(Literal::Integer(1))),
            right: Box::new(Expr::Param {
                name: "x".into(),
                span: Span::default(),
            }),
        };
        assert!(constant.is_constant());
        assert!(!Expr::field("u").member("a").is_constant());
    }

    #[test]
    fn test_aliases_include_subqueries() {
        let inner = Pipeline::new(vec![Stage::Filter(Filter {
            predicate: Expr::Binary {
                op: BinaryOp::Eq,
                left: Box::new(Expr::field("e").member("from")),
                right: Box::new(Expr::field("c").member("_id")),
            },
        })]);
        let expr = Expr::Binary {
            op: BinaryOp::And,
            left: Box::new(Expr::field("a").member("x")),
            right: Box::new(Expr::Subquery(Box::new(inner))),
        };
        assert_eq!(expr.aliases(), vec!["a", "e", "c"]);
    }

    #[test]
    fn test_pipeline_display() {
        let pipeline = Pipeline::new(vec![
            Stage::Source(Source {
                alias: "u".into(),
                kind: SourceKind::Collection(CollectionRef::Named("users".into())),
                span: Span::default(),
            }),
            Stage::Filter(Filter {
                predicate: Expr::Binary {
                    op: BinaryOp::Eq,
                    left: Box::new(Expr::field("u").member("active")),
                    right: Box::new(Expr::Literal(Literal::Bool(true))),
                },
            }),
            Stage::Project(Project {
                items: vec![ProjectItem {
                    expr: Expr::field("u").member("name"),
                    alias: None,
                }],
            }),
        ]);
        assert_eq!(
            pipeline.to_string(),
            "[Source(users AS u), Filter((u.active == true)), Project(u.name)]"
        );
    }
}
