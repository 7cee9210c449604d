//! AQL 补全与高亮
//!
//! 基于 rustyline 实现 Tab 补全与语法高亮

use std::borrow::Cow;

use colored::Colorize;
use rustyline::completion::{Completer, Pair};
use rustyline::highlight::Highlighter;
use rustyline::hint::Hinter;
use rustyline::validate::Validator;
use rustyline::{Context, Helper};

use crate::query::{Keyword, Lexer, TokenKind};
use crate::sql::functions;

/// 控制台命令列表
pub const CONSOLE_COMMANDS: &[&str] = &[
    ":help", ":h",
    ":quit", ":q",
    ":exit",
    ":bind",
    ":unbind",
    ":binds",
    ":ir",
    ":json",
    ":stats",
    ":tee",
    ":notee",
    ":clear",
];

/// 子句关键字后常见的后续关键字
fn get_followers(keyword: &str) -> Option<&'static [&'static str]> {
    match keyword {
        "COLLECT" => Some(&["AGGREGATE", "INTO", "WITH"]),
        "WITH" => Some(&["COUNT"]),
        "SORT" => Some(&["ASC", "DESC"]),
        "RETURN" => Some(&["DISTINCT"]),
        "IN" => Some(&["OUTBOUND", "INBOUND", "ANY"]),
        _ => None,
    }
}

/// aqlbridge REPL 辅助器
#[derive(Default)]
pub struct AqlHelper {
    functions: Vec<&'static str>,
}

impl AqlHelper {
    pub fn new() -> Self {
        Self {
            functions: functions::names(),
        }
    }

    /// Candidates for the word under the cursor, keywords first
    fn candidates(&self, word: &str, previous: Option<&str>) -> Vec<Pair> {
        let upper = word.to_uppercase();
        let pair = |s: &str| Pair {
            display: s.to_string(),
            replacement: s.to_string(),
        };

        if let Some(followers) = previous.and_then(get_followers) {
            let matches: Vec<Pair> = followers
                .iter()
                .filter(|kw| kw.starts_with(&upper))
                .map(|kw| pair(kw))
                .collect();
            if !matches.is_empty() {
                return matches;
            }
        }

        Keyword::all_words()
            .iter()
            .chain(self.functions.iter())
            .filter(|kw| kw.starts_with(&upper))
            .map(|kw| pair(kw))
            .collect()
    }
}

impl Completer for AqlHelper {
    type Candidate = Pair;

    fn complete(
        &self,
        line: &str,
        pos: usize,
        _ctx: &Context<'_>,
    ) -> rustyline::Result<(usize, Vec<Pair>)> {
        let line_to_cursor = &line[..pos];

        // 控制台命令
        if line_to_cursor.starts_with(':') && !line_to_cursor.contains(' ') {
            let completions: Vec<Pair> = CONSOLE_COMMANDS
                .iter()
                .filter(|cmd| cmd.starts_with(line_to_cursor))
                .map(|cmd| Pair {
                    display: cmd.to_string(),
                    replacement: cmd.to_string(),
                })
                .collect();
            return Ok((0, completions));
        }

        let start = line_to_cursor
            .rfind(|c: char| !(c.is_ascii_alphanumeric() || c == '_' || c == ':'))
            .map_or(0, |i| i + 1);
        let word = &line_to_cursor[start..];
        let previous = line_to_cursor[..start]
            .split_whitespace()
            .last()
            .map(|w| w.to_uppercase());

        if word.is_empty() {
            let completions = previous
                .as_deref()
                .and_then(get_followers)
                .map(|followers| {
                    followers
                        .iter()
                        .map(|kw| Pair {
                            display: kw.to_string(),
                            replacement: kw.to_string(),
                        })
                        .collect()
                })
                .unwrap_or_default();
            return Ok((pos, completions));
        }

        Ok((start, self.candidates(word, previous.as_deref())))
    }
}

impl Hinter for AqlHelper {
    type Hint = String;
}

impl Highlighter for AqlHelper {
    fn highlight<'l>(&self, line: &'l str, _pos: usize) -> Cow<'l, str> {
        if line.starts_with(':') {
            return Cow::Owned(line.cyan().to_string());
        }
        match highlight_aql(line) {
            Some(text) => Cow::Owned(text),
            None => Cow::Borrowed(line),
        }
    }
}

impl Validator for AqlHelper {}

impl Helper for AqlHelper {}

/// Colour AQL tokens; `None` when the line does not lex
pub fn highlight_aql(line: &str) -> Option<String> {
    let tokens = Lexer::new(line).keep_comments(true).tokenize().ok()?;
    let mut out = String::with_capacity(line.len() * 2);
    let mut cursor = 0;

    for token in &tokens {
        let (start, end) = (token.span.start, token.span.end);
        if start < cursor || end > line.len() {
            continue;
        }
        out.push_str(&line[cursor..start]);
        let text = &line[start..end];
        let painted = match token.kind {
            TokenKind::Keyword(_) => text.blue().bold().to_string(),
            TokenKind::String => text.green().to_string(),
            TokenKind::Number | TokenKind::Boolean(_) | TokenKind::Null => {
                text.magenta().to_string()
            }
            TokenKind::BindParam | TokenKind::CollectionBindParam => text.yellow().to_string(),
            TokenKind::Comment => text.bright_black().to_string(),
            _ => text.to_string(),
        };
        out.push_str(&painted);
        cursor = end;
    }
    out.push_str(&line[cursor..]);
    Some(out)
}
