//! 关系型中间表示 (IR)
//!
//! AST 经过作用域解析后降级为有序的管道阶段:
//! Source → Join → Filter → GroupBy → OrderBy → Limit → Distinct → Project / Modify
//!
//! - LET 绑定在降级时被内联替换
//! - 跨数据源的过滤条件下推到对应的 Join
//! - 无法用单条 SQL 语句表达的结构在此阶段报错

pub mod lower;
pub mod pipeline;

// 导出降级入口
pub use lower::{aggregate_function, lower, Lowerer};

// 导出管道类型
pub use pipeline::{
    Accumulator, AggregateFunction, Changes, CollectionRef, Expr, Filter, GroupBy, GroupKey,
    InsertContent, Join, KeyMatch, Limit, Modify, ModifyOp, OrderBy, PathStep, Pipeline, Project,
    ProjectItem, SortKey, Source, SourceKind, Stage, TraversalSource, TraversalStart,
};
