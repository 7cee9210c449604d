//! AQL 查询前端
//!
//! 词法分析 → 语法分析 → 作用域解析
//!
//! 主要特性:
//! - 大小写不敏感关键字、反引号标识符、`@` / `@@` 绑定参数
//! - FOR / LET / FILTER / COLLECT / SORT / LIMIT / RETURN 子句
//! - 图遍历 (OUTBOUND / INBOUND / ANY，深度区间)
//! - INSERT / UPDATE / REPLACE / UPSERT / REMOVE 数据修改子句
//! - 子查询与位置敏感的变量作用域

pub mod ast;
pub mod lexer;
pub mod parser;
pub mod scope;
pub mod token;

// 导出 AST 类型
pub use ast::{
    ArrayElement, BinaryOp, Binder, Clause, CollectClause, CollectionName, Direction,
    EdgeSource, Expr, ExprKind, ForClause, ForSource, Literal, ObjectEntry, Query, RefId,
    SortDirection, Traversal, UnaryOp, VarRef,
};

// 导出词法分析器
pub use lexer::{tokenize, Lexer};
pub use token::{Keyword, Operator, Punct, Token, TokenKind};

// 导出解析器
pub use parser::{parse, AqlParser};

// 导出作用域解析
pub use scope::{resolve, Binding, BindingId, BindingKind, Resolution, ScopeResolver};
