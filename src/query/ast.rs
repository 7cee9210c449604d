//! AQL Abstract Syntax Tree
//!
//! A `Query` is an ordered list of clauses ending in exactly one terminal clause
//! (RETURN or a data-modification clause). Every variable reference carries a
//! `RefId`, unique within one parse, which the scope resolver keys its results on.

use crate::diagnostics::Span;
use serde::Serialize;
use smallvec::SmallVec;
use std::fmt;

/// Identity of one variable reference site
pub type RefId = u32;

// ============================================================================
// Query and clauses
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Query {
    pub clauses: Vec<Clause>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Clause {
    For(ForClause),
    Let(LetClause),
    Filter(FilterClause),
    Collect(CollectClause),
    Sort(SortClause),
    Limit(LimitClause),
    Return(ReturnClause),
    Insert(InsertClause),
    Update(UpdateClause),
    Replace(UpdateClause),
    Upsert(UpsertClause),
    Remove(RemoveClause),
}

impl Clause {
    pub fn span(&self) -> Span {
        match self {
            Clause::For(c) => c.span,
            Clause::Let(c) => c.span,
            Clause::Filter(c) => c.span,
            Clause::Collect(c) => c.span,
            Clause::Sort(c) => c.span,
            Clause::Limit(c) => c.span,
            Clause::Return(c) => c.span,
            Clause::Insert(c) => c.span,
            Clause::Update(c) | Clause::Replace(c) => c.span,
            Clause::Upsert(c) => c.span,
            Clause::Remove(c) => c.span,
        }
    }

    pub fn keyword(&self) -> &'static str {
        match self {
            Clause::For(_) => "FOR",
            Clause::Let(_) => "LET",
            Clause::Filter(_) => "FILTER",
            Clause::Collect(_) => "COLLECT",
            Clause::Sort(_) => "SORT",
            Clause::Limit(_) => "LIMIT",
            Clause::Return(_) => "RETURN",
            Clause::Insert(_) => "INSERT",
            Clause::Update(_) => "UPDATE",
            Clause::Replace(_) => "REPLACE",
            Clause::Upsert(_) => "UPSERT",
            Clause::Remove(_) => "REMOVE",
        }
    }

    /// RETURN and the modification clauses end a query
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Clause::Return(_)
                | Clause::Insert(_)
                | Clause::Update(_)
                | Clause::Replace(_)
                | Clause::Upsert(_)
                | Clause::Remove(_)
        )
    }
}

/// A variable declaration site
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Binder {
    pub name: String,
    pub span: Span,
}

/// FOR clause: iteration over a collection/expression, or a graph traversal
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ForClause {
    /// One variable for plain iteration; vertex, edge and path for traversals
    pub variables: SmallVec<[Binder; 3]>,
    pub source: ForSource,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum ForSource {
    Expr(Expr),
    Traversal(Traversal),
}

/// `[min[..max]] OUTBOUND|INBOUND|ANY start edges`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Traversal {
    pub min_depth: u32,
    pub max_depth: u32,
    pub direction: Direction,
    pub start: Expr,
    pub edges: EdgeSource,
    pub span: Span,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Direction {
    Outbound,
    Inbound,
    Any,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Outbound => write!(f, "OUTBOUND"),
            Direction::Inbound => write!(f, "INBOUND"),
            Direction::Any => write!(f, "ANY"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum EdgeSource {
    /// Edge collections: bare identifiers (resolved as collection names) or `@@param`
    Collections(SmallVec<[Expr; 2]>),
    /// `GRAPH name`
    Graph(Expr),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LetClause {
    pub binder: Binder,
    pub expr: Expr,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FilterClause {
    pub condition: Expr,
    pub span: Span,
}

/// COLLECT clause
///
/// At most one of `into`, `aggregates` (non-empty) and `count_into` is set.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CollectClause {
    pub groups: Vec<GroupAssignment>,
    pub into: Option<IntoCapture>,
    pub aggregates: Vec<AggregateAssignment>,
    pub count_into: Option<Binder>,
    pub span: Span,
}

/// `name = expr` in the grouping list
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupAssignment {
    pub binder: Binder,
    pub expr: Expr,
}

/// `INTO g [= projection]`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IntoCapture {
    pub binder: Binder,
    pub projection: Option<Expr>,
}

/// `AGGREGATE name = FUNC(args)`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregateAssignment {
    pub binder: Binder,
    pub function: String,
    pub args: Vec<Expr>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SortClause {
    pub keys: Vec<SortKey>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SortKey {
    pub expr: Expr,
    pub direction: SortDirection,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SortDirection {
    Asc,
    Desc,
}

impl fmt::Display for SortDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SortDirection::Asc => write!(f, "ASC"),
            SortDirection::Desc => write!(f, "DESC"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LimitClause {
    pub offset: Option<Expr>,
    pub count: Expr,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReturnClause {
    pub distinct: bool,
    pub expr: Expr,
    pub span: Span,
}

// ============================================================================
// Modification clauses
// ============================================================================

/// Target collection of a modification clause
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum CollectionName {
    Named { name: String, span: Span },
    /// `@@param`
    Bind { name: String, span: Span },
}

impl CollectionName {
    pub fn span(&self) -> Span {
        match self {
            CollectionName::Named { span, .. } | CollectionName::Bind { span, .. } => *span,
        }
    }
}

impl fmt::Display for CollectionName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CollectionName::Named { name, .. } => write!(f, "{}", name),
            CollectionName::Bind { name, .. } => write!(f, "@@{}", name),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InsertClause {
    pub document: Expr,
    pub collection: CollectionName,
    pub span: Span,
}

/// UPDATE and REPLACE share one shape: `doc IN coll` or `key WITH doc IN coll`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UpdateClause {
    pub key: Option<Expr>,
    pub document: Expr,
    pub collection: CollectionName,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UpsertClause {
    pub search: Expr,
    pub insert: Expr,
    pub update: Expr,
    pub replace: bool,
    pub collection: CollectionName,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RemoveClause {
    pub key: Expr,
    pub collection: CollectionName,
    pub span: Span,
}

// ============================================================================
// Expressions
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Expr {
    pub kind: ExprKind,
    pub span: Span,
}

impl Expr {
    pub fn new(kind: ExprKind, span: Span) -> Self {
        Self { kind, span }
    }

    /// Name of a bare variable reference
    pub fn as_variable(&self) -> Option<&VarRef> {
        match &self.kind {
            ExprKind::Variable(var) => Some(var),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VarRef {
    pub name: String,
    pub id: RefId,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum ExprKind {
    Literal(Literal),
    Variable(VarRef),
    /// `@name`
    BindParam(String),
    /// `@@name`
    CollectionParam(String),
    Member {
        object: Box<Expr>,
        property: String,
    },
    Index {
        object: Box<Expr>,
        index: Box<Expr>,
    },
    /// `expr[*]`
    Expand(Box<Expr>),
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    /// `cond ? a : b`, or the shortcut `cond ?: b` when `then` is `None`
    Ternary {
        condition: Box<Expr>,
        then: Option<Box<Expr>>,
        otherwise: Box<Expr>,
    },
    Range {
        start: Box<Expr>,
        end: Box<Expr>,
    },
    Array(Vec<ArrayElement>),
    Object(Vec<ObjectEntry>),
    /// Function call; namespaced names keep their `::` separators
    Call {
        name: String,
        args: Vec<Expr>,
    },
    Subquery(Box<Query>),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Literal {
    Null,
    Bool(bool),
    Integer(i64),
    Float(f64),
    String(String),
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::Null => write!(f, "null"),
            Literal::Bool(b) => write!(f, "{}", b),
            Literal::Integer(i) => write!(f, "{}", i),
            Literal::Float(x) => write!(f, "{}", x),
            Literal::String(s) => write!(f, "{:?}", s),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum ArrayElement {
    Item(Expr),
    Spread(Expr),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum ObjectEntry {
    /// `key: value`, `"key": value`, or shorthand `key`
    Field {
        key: String,
        value: Expr,
        shorthand: bool,
        span: Span,
    },
    /// `[expr]: value`
    Computed { key: Expr, value: Expr, span: Span },
    /// `...expr`
    Spread { expr: Expr, span: Span },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum UnaryOp {
    Not,
    Negate,
    Plus,
}

impl fmt::Display for UnaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnaryOp::Not => write!(f, "!"),
            UnaryOp::Negate => write!(f, "-"),
            UnaryOp::Plus => write!(f, "+"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum BinaryOp {
    Or,
    And,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    In,
    NotIn,
    Like,
    NotLike,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BinaryOp::Or => "||",
            BinaryOp::And => "&&",
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::In => "IN",
            BinaryOp::NotIn => "NOT IN",
            BinaryOp::Like => "LIKE",
            BinaryOp::NotLike => "NOT LIKE",
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Mod => "%",
        };
        write!(f, "{}", s)
    }
}
