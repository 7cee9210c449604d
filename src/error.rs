//! 错误类型定义
//!
//! 每个翻译阶段都有自己的错误结构 (kind + span + message)，
//! 顶层的 `Error` 将它们统一包装，流水线在第一个错误处停止。

use crate::diagnostics::{Diagnostic, Span};
use serde::Serialize;
use std::fmt;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

// ============================================================================
// Lexer
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LexErrorKind {
    UnterminatedString,
    UnterminatedComment,
    InvalidNumber,
    InvalidCharacter,
}

impl LexErrorKind {
    pub fn code(&self) -> &'static str {
        match self {
            LexErrorKind::UnterminatedString => "unterminated_string",
            LexErrorKind::UnterminatedComment => "unterminated_comment",
            LexErrorKind::InvalidNumber => "invalid_number",
            LexErrorKind::InvalidCharacter => "invalid_character",
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
#[error("{message} at {span}")]
pub struct LexError {
    pub kind: LexErrorKind,
    pub span: Span,
    pub message: String,
}

impl LexError {
    pub fn new(kind: LexErrorKind, span: Span, message: impl Into<String>) -> Self {
        Self {
            kind,
            span,
            message: message.into(),
        }
    }
}

// ============================================================================
// Parser
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ParseErrorKind {
    UnexpectedToken,
    MisplacedClause,
    UnsupportedConstruct,
}

impl ParseErrorKind {
    pub fn code(&self) -> &'static str {
        match self {
            ParseErrorKind::UnexpectedToken => "unexpected_token",
            ParseErrorKind::MisplacedClause => "misplaced_clause",
            ParseErrorKind::UnsupportedConstruct => "unsupported_construct",
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
#[error("{message} at {span}")]
pub struct ParseError {
    pub kind: ParseErrorKind,
    pub span: Span,
    /// Description of the offending token
    pub found: String,
    /// Production being parsed, e.g. "FOR clause"
    pub context: &'static str,
    pub message: String,
}

// ============================================================================
// Scope resolution
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScopeErrorKind {
    UndefinedVariable,
    VariableOutOfScope,
    DuplicateBinding,
}

impl ScopeErrorKind {
    pub fn code(&self) -> &'static str {
        match self {
            ScopeErrorKind::UndefinedVariable => "undefined_variable",
            ScopeErrorKind::VariableOutOfScope => "variable_out_of_scope",
            ScopeErrorKind::DuplicateBinding => "duplicate_binding",
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
#[error("{message} at {span}")]
pub struct ScopeError {
    pub kind: ScopeErrorKind,
    pub name: String,
    pub span: Span,
    pub message: String,
}

impl ScopeError {
    pub fn new(kind: ScopeErrorKind, name: &str, span: Span) -> Self {
        let message = match kind {
            ScopeErrorKind::UndefinedVariable => format!("undefined variable `{}`", name),
            ScopeErrorKind::VariableOutOfScope => {
                format!("variable `{}` is no longer in scope", name)
            }
            ScopeErrorKind::DuplicateBinding => {
                format!("variable `{}` is already declared in this scope", name)
            }
        };
        Self {
            kind,
            name: name.to_string(),
            span,
            message,
        }
    }
}

// ============================================================================
// IR lowering
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoweringErrorKind {
    UnsupportedConstruct,
}

#[derive(Error, Debug, Clone, PartialEq)]
#[error("unsupported construct: {message} at {span}")]
pub struct LoweringError {
    pub kind: LoweringErrorKind,
    pub span: Span,
    pub message: String,
}

impl LoweringError {
    pub fn unsupported(span: Span, message: impl Into<String>) -> Self {
        Self {
            kind: LoweringErrorKind::UnsupportedConstruct,
            span,
            message: message.into(),
        }
    }
}

// ============================================================================
// Binding resolution
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BindingErrorKind {
    MissingParameter,
    CollectionTypeMismatch,
}

#[derive(Error, Debug, Clone, PartialEq)]
#[error("{message} at {span}")]
pub struct BindingError {
    pub kind: BindingErrorKind,
    pub name: String,
    pub span: Span,
    pub message: String,
}

// ============================================================================
// Generation
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationErrorKind {
    UnsupportedAggregatePlacement,
    UnknownFunction,
    UnsafeIdentifierSubstitution,
    /// Source kind the target statement form cannot host
    UnsupportedSource,
}

impl GenerationErrorKind {
    pub fn code(&self) -> &'static str {
        match self {
            GenerationErrorKind::UnsupportedAggregatePlacement => "unsupported_aggregate_placement",
            GenerationErrorKind::UnknownFunction => "unknown_function",
            GenerationErrorKind::UnsafeIdentifierSubstitution => "unsafe_identifier_substitution",
            GenerationErrorKind::UnsupportedSource => "unsupported_source",
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub struct GenerationError {
    pub kind: GenerationErrorKind,
    pub span: Option<Span>,
    pub message: String,
}

impl GenerationError {
    pub fn new(kind: GenerationErrorKind, span: Option<Span>, message: impl Into<String>) -> Self {
        Self {
            kind,
            span,
            message: message.into(),
        }
    }
}

impl fmt::Display for GenerationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.span {
            Some(span) => write!(f, "{} at {}", self.message, span),
            None => write!(f, "{}", self.message),
        }
    }
}

// ============================================================================
// Top-level error
// ============================================================================

#[derive(Error, Debug)]
pub enum Error {
    #[error("词法错误: {0}")]
    Lex(#[from] LexError),

    #[error("语法错误: {0}")]
    Parse(#[from] ParseError),

    #[error("作用域错误: {0}")]
    Scope(#[from] ScopeError),

    #[error("降级错误: {0}")]
    Lowering(#[from] LoweringError),

    #[error("绑定错误: {0}")]
    Binding(#[from] BindingError),

    #[error("生成错误: {0}")]
    Generation(#[from] GenerationError),

    #[error("配置错误: {0}")]
    Config(String),

    #[error("IO 错误: {0}")]
    Io(#[from] std::io::Error),

    #[error("序列化错误: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Pipeline stage name, used by metrics and diagnostics
    pub fn stage(&self) -> &'static str {
        match self {
            Error::Lex(_) => "lex",
            Error::Parse(_) => "parse",
            Error::Scope(_) => "scope",
            Error::Lowering(_) => "lower",
            Error::Binding(_) => "bind",
            Error::Generation(_) => "generate",
            Error::Config(_) => "config",
            Error::Io(_) => "io",
            Error::Json(_) => "json",
        }
    }

    pub fn span(&self) -> Option<Span> {
        match self {
            Error::Lex(e) => Some(e.span),
            Error::Parse(e) => Some(e.span),
            Error::Scope(e) => Some(e.span),
            Error::Lowering(e) => Some(e.span),
            Error::Binding(e) => Some(e.span),
            Error::Generation(e) => e.span,
            _ => None,
        }
    }

    pub fn diagnostic(&self) -> Diagnostic {
        let diag = match self {
            Error::Lex(e) => Diagnostic::new("lex", e.kind.code(), e.message.clone()),
            Error::Parse(e) => Diagnostic::new("parse", e.kind.code(), e.message.clone())
                .with_context(e.context),
            Error::Scope(e) => Diagnostic::new("scope", e.kind.code(), e.message.clone()),
            Error::Lowering(e) => {
                Diagnostic::new("lower", "unsupported_construct", e.message.clone())
            }
            Error::Binding(e) => {
                let code = match e.kind {
                    BindingErrorKind::MissingParameter => "missing_parameter",
                    BindingErrorKind::CollectionTypeMismatch => "collection_type_mismatch",
                };
                Diagnostic::new("bind", code, e.message.clone())
            }
            Error::Generation(e) => {
                Diagnostic::new("generate", e.kind.code(), e.message.clone())
            }
            Error::Config(msg) => Diagnostic::new("config", "invalid_config", msg.clone()),
            Error::Io(e) => Diagnostic::new("io", "io", e.to_string()),
            Error::Json(e) => Diagnostic::new("json", "json", e.to_string()),
        };
        match self.span() {
            Some(span) => diag.with_span(span),
            None => diag,
        }
    }
}
