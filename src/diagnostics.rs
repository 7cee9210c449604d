//! 诊断信息
//!
//! 源码位置 (`Span`) 与面向用户的错误诊断 (`Diagnostic`)。
//! 每个阶段的错误都可以转换成诊断，再配合原始查询文本渲染出带插入符的片段。

use serde::{Deserialize, Serialize};
use std::fmt;

/// Location of a token or syntax node in the query text.
///
/// `start`/`end` are byte offsets, `line`/`column` are 1-based and point at `start`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Span {
    pub start: usize,
    pub end: usize,
    pub line: u32,
    pub column: u32,
}

impl Span {
    pub fn new(start: usize, end: usize, line: u32, column: u32) -> Self {
        Self {
            start,
            end,
            line,
            column,
        }
    }

    /// Smallest span covering both `self` and `other`.
    pub fn merge(self, other: Span) -> Span {
        let (first, _) = if self.start <= other.start {
            (self, other)
        } else {
            (other, self)
        };
        Span {
            start: first.start,
            end: self.end.max(other.end),
            line: first.line,
            column: first.column,
        }
    }

    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}, column {}", self.line, self.column)
    }
}

/// A structured, renderable description of one translation failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Diagnostic {
    /// Pipeline stage that failed (`lex`, `parse`, `scope`, `lower`, `bind`, `generate`, ...)
    pub stage: &'static str,
    /// Stable error code, e.g. `unexpected_token`
    pub code: &'static str,
    pub message: String,
    pub span: Option<Span>,
    /// Grammar production being parsed when the error occurred
    pub context: Option<String>,
}

impl Diagnostic {
    pub fn new(stage: &'static str, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            stage,
            code,
            message: message.into(),
            span: None,
            context: None,
        }
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = Some(span);
        self
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    /// Render the diagnostic against the query text it was produced from.
    ///
    /// ```text
    /// error[parse/unexpected_token]: expected IN, found identifier `users`
    ///  --> line 1, column 7
    ///   |
    /// 1 | FOR u users RETURN u
    ///   |       ^^^^^
    ///   = note: while parsing FOR clause
    /// ```
    pub fn render(&self, source: &str) -> String {
        let mut out = format!("error[{}/{}]: {}", self.stage, self.code, self.message);

        if let Some(span) = self.span {
            let line_no = span.line.max(1) as usize;
            let text = source.lines().nth(line_no - 1).unwrap_or("");
            let gutter = line_no.to_string().len();
            let pad = " ".repeat(gutter);

            // 插入符宽度不超过当前行
            let col = (span.column.max(1) as usize - 1).min(text.chars().count());
            let remaining = text.chars().count() - col;
            let width = span.len().clamp(1, remaining.max(1));

            out.push_str(&format!("\n{} --> {}", pad, span));
            out.push_str(&format!("\n{} |", pad));
            out.push_str(&format!("\n{} | {}", line_no, text));
            out.push_str(&format!(
                "\n{} | {}{}",
                pad,
                " ".repeat(col),
                "^".repeat(width)
            ));
        }

        if let Some(context) = &self.context {
            let pad = match self.span {
                Some(span) => " ".repeat(span.line.max(1).to_string().len()),
                None => String::new(),
            };
            out.push_str(&format!("\n{} = note: while parsing {}", pad, context));
        }

        out
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.span {
            Some(span) => write!(f, "{} at {}", self.message, span),
            None => write!(f, "{}", self.message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_span_merge() {
        let a = Span::new(4, 6, 1, 5);
        let b = Span::new(10, 15, 1, 11);
        let merged = b.merge(a);
        assert_eq!(merged.start, 4);
        assert_eq!(merged.end, 15);
        assert_eq!(merged.column, 5);
    }

    #[test]
    fn test_render_caret() {
        let source = "FOR u users RETURN u";
        let diag = Diagnostic::new("parse", "unexpected_token", "expected IN")
            .with_span(Span::new(6, 11, 1, 7))
            .with_context("FOR clause");
        let rendered = diag.render(source);
        let lines: Vec<&str> = rendered.lines().collect();
        assert_eq!(lines[0], "error[parse/unexpected_token]: expected IN");
        assert_eq!(lines[3], "1 | FOR u users RETURN u");
        assert_eq!(lines[4], "  |       ^^^^^");
        assert!(lines[5].contains("while parsing FOR clause"));
    }

    #[test]
    fn test_render_without_span() {
        let diag = Diagnostic::new("bind", "missing_parameter", "missing bind parameter @x");
        assert_eq!(
            diag.render("RETURN @x"),
            "error[bind/missing_parameter]: missing bind parameter @x"
        );
    }

    #[test]
    fn test_render_second_line() {
        let source = "FOR u IN users\nRETURN v";
        let diag = Diagnostic::new("scope", "undefined_variable", "undefined variable `v`")
            .with_span(Span::new(22, 23, 2, 8));
        let rendered = diag.render(source);
        assert!(rendered.contains("2 | RETURN v"));
        assert!(rendered.ends_with("  |        ^"));
    }
}
