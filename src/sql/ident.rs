//! ArcadeDB identifier rendering

/// Words the ArcadeDB SQL grammar reserves; they must be quoted as identifiers
const RESERVED: &[&str] = &[
    "ALTER", "AND", "AS", "ASC", "BATCH", "BETWEEN", "BREAK", "BUCKET", "BY", "CONTAINS",
    "CONTAINSALL", "CONTAINSANY", "CONTAINSKEY", "CONTAINSTEXT", "CONTAINSVALUE", "CONTENT",
    "COUNT", "CREATE", "DEFAULT", "DELETE", "DESC", "DISTINCT", "DROP", "EXISTS", "EXPLAIN",
    "FALSE", "FETCHPLAN", "FROM", "GROUP", "IF", "IN", "INDEX", "INSERT", "INSTANCEOF", "INTO",
    "IS", "LET", "LIKE", "LIMIT", "LOCK", "MATCH", "MATCHES", "MERGE", "NOT", "NULL", "OR",
    "ORDER", "PROFILE", "REMOVE", "RETURN", "SELECT", "SET", "SKIP", "TIMEOUT", "TRAVERSE",
    "TRUE", "TRUNCATE", "TYPE", "UNSAFE", "UNWIND", "UPDATE", "UPSERT", "VALUES", "WHERE",
    "WHILE", "WITH",
];

pub fn is_reserved(word: &str) -> bool {
    RESERVED.iter().any(|r| r.eq_ignore_ascii_case(word))
}

/// `[A-Za-z_][A-Za-z0-9_]*` and not reserved
pub fn is_plain(name: &str) -> bool {
    let mut chars = name.chars();
    let head = match chars.next() {
        Some(c) => c,
        None => return false,
    };
    (head.is_ascii_alphabetic() || head == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        && !is_reserved(name)
}

/// Render an identifier, backtick-quoting it when needed
pub fn quote(name: &str) -> String {
    if is_plain(name) {
        name.to_string()
    } else {
        format!("`{}`", name.replace('`', "\\`"))
    }
}

/// Collection names substituted from `@@` parameters must render unquoted
pub fn is_safe_substitution(name: &str) -> bool {
    name.len() <= 256 && is_plain(name)
}

/// Single-quoted SQL string literal
pub fn string_literal(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('\'');
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\'' => out.push_str("\\'"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c => out.push(c),
        }
    }
    out.push('\'');
    out
}
