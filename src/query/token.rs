//! Token definitions

use crate::diagnostics::Span;
use serde::Serialize;
use std::fmt;

/// Reserved words, matched case-insensitively.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Keyword {
    For,
    In,
    Filter,
    Let,
    Collect,
    Aggregate,
    Into,
    With,
    Sort,
    Asc,
    Desc,
    Limit,
    Return,
    Distinct,
    Insert,
    Update,
    Upsert,
    Replace,
    Remove,
    Outbound,
    Inbound,
    Any,
    And,
    Or,
    Not,
    Like,
}

impl Keyword {
    pub fn lookup(word: &str) -> Option<Keyword> {
        let kw = match word.to_ascii_uppercase().as_str() {
            "FOR" => Keyword::For,
            "IN" => Keyword::In,
            "FILTER" => Keyword::Filter,
            "LET" => Keyword::Let,
            "COLLECT" => Keyword::Collect,
            "AGGREGATE" => Keyword::Aggregate,
            "INTO" => Keyword::Into,
            "WITH" => Keyword::With,
            "SORT" => Keyword::Sort,
            "ASC" => Keyword::Asc,
            "DESC" => Keyword::Desc,
            "LIMIT" => Keyword::Limit,
            "RETURN" => Keyword::Return,
            "DISTINCT" => Keyword::Distinct,
            "INSERT" => Keyword::Insert,
            "UPDATE" => Keyword::Update,
            "UPSERT" => Keyword::Upsert,
            "REPLACE" => Keyword::Replace,
            "REMOVE" => Keyword::Remove,
            "OUTBOUND" => Keyword::Outbound,
            "INBOUND" => Keyword::Inbound,
            "ANY" => Keyword::Any,
            "AND" => Keyword::And,
            "OR" => Keyword::Or,
            "NOT" => Keyword::Not,
            "LIKE" => Keyword::Like,
            _ => return None,
        };
        Some(kw)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Keyword::For => "FOR",
            Keyword::In => "IN",
            Keyword::Filter => "FILTER",
            Keyword::Let => "LET",
            Keyword::Collect => "COLLECT",
            Keyword::Aggregate => "AGGREGATE",
            Keyword::Into => "INTO",
            Keyword::With => "WITH",
            Keyword::Sort => "SORT",
            Keyword::Asc => "ASC",
            Keyword::Desc => "DESC",
            Keyword::Limit => "LIMIT",
            Keyword::Return => "RETURN",
            Keyword::Distinct => "DISTINCT",
            Keyword::Insert => "INSERT",
            Keyword::Update => "UPDATE",
            Keyword::Upsert => "UPSERT",
            Keyword::Replace => "REPLACE",
            Keyword::Remove => "REMOVE",
            Keyword::Outbound => "OUTBOUND",
            Keyword::Inbound => "INBOUND",
            Keyword::Any => "ANY",
            Keyword::And => "AND",
            Keyword::Or => "OR",
            Keyword::Not => "NOT",
            Keyword::Like => "LIKE",
        }
    }

    /// Keywords that start a query clause
    pub fn starts_clause(&self) -> bool {
        matches!(
            self,
            Keyword::For
                | Keyword::Let
                | Keyword::Filter
                | Keyword::Collect
                | Keyword::Sort
                | Keyword::Limit
                | Keyword::Return
                | Keyword::Insert
                | Keyword::Update
                | Keyword::Upsert
                | Keyword::Replace
                | Keyword::Remove
        )
    }

    /// Every keyword, including the literal words, for completion and highlighting
    pub fn all_words() -> &'static [&'static str] {
        &[
            "FOR", "IN", "FILTER", "LET", "COLLECT", "AGGREGATE", "INTO", "WITH", "SORT",
            "ASC", "DESC", "LIMIT", "RETURN", "DISTINCT", "INSERT", "UPDATE", "UPSERT",
            "REPLACE", "REMOVE", "OUTBOUND", "INBOUND", "ANY", "AND", "OR", "NOT", "LIKE",
            "NULL", "TRUE", "FALSE", "GRAPH", "COUNT",
        ]
    }
}

impl fmt::Display for Keyword {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Operator {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
    Not,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Range,
    Question,
    Colon,
    Scope,
    Assign,
    Spread,
}

impl Operator {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operator::Eq => "==",
            Operator::Ne => "!=",
            Operator::Lt => "<",
            Operator::Le => "<=",
            Operator::Gt => ">",
            Operator::Ge => ">=",
            Operator::And => "&&",
            Operator::Or => "||",
            Operator::Not => "!",
            Operator::Plus => "+",
            Operator::Minus => "-",
            Operator::Star => "*",
            Operator::Slash => "/",
            Operator::Percent => "%",
            Operator::Range => "..",
            Operator::Question => "?",
            Operator::Colon => ":",
            Operator::Scope => "::",
            Operator::Assign => "=",
            Operator::Spread => "...",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Punct {
    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    Comma,
    Dot,
}

impl Punct {
    pub fn as_char(&self) -> char {
        match self {
            Punct::LParen => '(',
            Punct::RParen => ')',
            Punct::LBracket => '[',
            Punct::RBracket => ']',
            Punct::LBrace => '{',
            Punct::RBrace => '}',
            Punct::Comma => ',',
            Punct::Dot => '.',
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TokenKind {
    Keyword(Keyword),
    Identifier,
    /// `@name`
    BindParam,
    /// `@@name`
    CollectionBindParam,
    Number,
    String,
    Boolean(bool),
    Null,
    Operator(Operator),
    Punct(Punct),
    Comment,
    Eof,
}

/// A lexical unit. `lexeme` holds decoded text: string contents without quotes or
/// escapes, identifier names without backticks, bind names without `@`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Token {
    pub kind: TokenKind,
    pub lexeme: String,
    pub span: Span,
}

impl Token {
    pub fn new(kind: TokenKind, lexeme: impl Into<String>, span: Span) -> Self {
        Self {
            kind,
            lexeme: lexeme.into(),
            span,
        }
    }

    pub fn is_keyword(&self, kw: Keyword) -> bool {
        self.kind == TokenKind::Keyword(kw)
    }

    pub fn is_operator(&self, op: Operator) -> bool {
        self.kind == TokenKind::Operator(op)
    }

    pub fn is_punct(&self, p: Punct) -> bool {
        self.kind == TokenKind::Punct(p)
    }

    /// Short description used in error messages
    pub fn describe(&self) -> String {
        match self.kind {
            TokenKind::Keyword(kw) => format!("keyword {}", kw),
            TokenKind::Identifier => format!("identifier `{}`", self.lexeme),
            TokenKind::BindParam => format!("bind parameter @{}", self.lexeme),
            TokenKind::CollectionBindParam => format!("bind parameter @@{}", self.lexeme),
            TokenKind::Number => format!("number {}", self.lexeme),
            TokenKind::String => format!("string \"{}\"", self.lexeme),
            TokenKind::Boolean(b) => format!("boolean {}", b),
            TokenKind::Null => "null".to_string(),
            TokenKind::Operator(op) => format!("`{}`", op.as_str()),
            TokenKind::Punct(p) => format!("`{}`", p.as_char()),
            TokenKind::Comment => "comment".to_string(),
            TokenKind::Eof => "end of input".to_string(),
        }
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.describe())
    }
}
