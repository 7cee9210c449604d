//! aqlbridge - AQL → ArcadeDB SQL 翻译器
//!
//! 将 ArangoDB 查询语言 (AQL) 翻译为单条 ArcadeDB SQL 语句，支持：
//! - FOR / FILTER / LET / COLLECT / SORT / LIMIT / RETURN 查询
//! - 图遍历 (翻译为 MATCH)
//! - INSERT / UPDATE / REPLACE / REMOVE 数据修改
//! - `@` / `@@` 绑定变量与带源码定位的诊断信息

pub mod bind;
pub mod cli;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod ir;
pub mod metrics;
pub mod query;
pub mod sql;
pub mod translator;

// 重导出常用类型
pub use bind::{BindVars, BindingTable};
pub use config::TranslatorConfig;
pub use diagnostics::{Diagnostic, Span};
pub use error::{Error, Result};
pub use ir::Pipeline;
pub use sql::{GeneratedStatement, StatementKind};
pub use translator::{translate, Translation, Translator};

/// 库版本
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
