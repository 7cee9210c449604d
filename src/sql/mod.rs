//! ArcadeDB SQL 生成
//!
//! 将关系型流水线 IR 渲染为单条 ArcadeDB SQL 语句:
//! - SELECT / MATCH 查询 (含嵌套派生表与分组包装)
//! - INSERT / UPDATE / DELETE 数据修改
//! - AQL 函数到 ArcadeDB 函数/方法的映射
//! - 标识符与字符串字面量的安全渲染

pub mod functions;
pub mod generator;
pub mod ident;

// 导出生成器
pub use generator::{generate, GeneratedStatement, Generator, StatementKind};

// 导出函数映射
pub use functions::{FunctionSpec, Mapping, Special};
