//! AQL Lexer
//!
//! Converts query text into a token stream terminated by an `Eof` sentinel.
//! Comments are dropped unless the lexer is built with `keep_comments(true)`.

use crate::diagnostics::Span;
use crate::error::{LexError, LexErrorKind};
use crate::query::token::{Keyword, Operator, Punct, Token, TokenKind};

pub struct Lexer<'a> {
    src: &'a str,
    pos: usize,
    line: u32,
    column: u32,
    keep_comments: bool,
}

#[derive(Clone, Copy)]
struct Mark {
    pos: usize,
    line: u32,
    column: u32,
}

impl<'a> Lexer<'a> {
    pub fn new(src: &'a str) -> Self {
        Self {
            src,
            pos: 0,
            line: 1,
            column: 1,
            keep_comments: false,
        }
    }

    /// Emit `Comment` tokens instead of discarding comments
    pub fn keep_comments(mut self, keep: bool) -> Self {
        self.keep_comments = keep;
        self
    }

    pub fn tokenize(mut self) -> Result<Vec<Token>, LexError> {
        let mut tokens = Vec::new();

        loop {
            self.skip_whitespace();
            let mark = self.mark();
            let c = match self.peek() {
                Some(c) => c,
                None => {
                    tokens.push(Token::new(TokenKind::Eof, "", self.span_from(mark)));
                    return Ok(tokens);
                }
            };

            if c == '/' && self.peek_nth(1) == Some('/') {
                let comment = self.line_comment();
                if self.keep_comments {
                    tokens.push(Token::new(TokenKind::Comment, comment, self.span_from(mark)));
                }
                continue;
            }
            if c == '/' && self.peek_nth(1) == Some('*') {
                let comment = self.block_comment(mark)?;
                if self.keep_comments {
                    tokens.push(Token::new(TokenKind::Comment, comment, self.span_from(mark)));
                }
                continue;
            }

            let token = if c.is_ascii_digit() {
                self.number(mark)?
            } else if c == '"' || c == '\'' {
                self.string(mark, c)?
            } else if c == '`' {
                self.quoted_identifier(mark)?
            } else if c == '@' {
                self.bind_parameter(mark)?
            } else if is_ident_start(c) {
                self.word(mark)
            } else {
                self.symbol(mark, c)?
            };
            tokens.push(token);
        }
    }

    // ========================================================================
    // Cursor helpers
    // ========================================================================

    fn peek(&self) -> Option<char> {
        self.src[self.pos..].chars().next()
    }

    fn peek_nth(&self, n: usize) -> Option<char> {
        self.src[self.pos..].chars().nth(n)
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        if c == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(c)
    }

    fn mark(&self) -> Mark {
        Mark {
            pos: self.pos,
            line: self.line,
            column: self.column,
        }
    }

    fn span_from(&self, mark: Mark) -> Span {
        Span::new(mark.pos, self.pos, mark.line, mark.column)
    }

    fn skip_whitespace(&mut self) {
        while let Some(c) = self.peek() {
            if c.is_whitespace() {
                self.bump();
            } else {
                break;
            }
        }
    }

    fn eat_while(&mut self, pred: impl Fn(char) -> bool) {
        while let Some(c) = self.peek() {
            if pred(c) {
                self.bump();
            } else {
                break;
            }
        }
    }

    // ========================================================================
    // Comments
    // ========================================================================

    fn line_comment(&mut self) -> String {
        let start = self.pos;
        self.eat_while(|c| c != '\n');
        self.src[start..self.pos].to_string()
    }

    fn block_comment(&mut self, mark: Mark) -> Result<String, LexError> {
        let start = self.pos;
        self.bump();
        self.bump();
        loop {
            match self.bump() {
                Some('*') if self.peek() == Some('/') => {
                    self.bump();
                    return Ok(self.src[start..self.pos].to_string());
                }
                Some(_) => {}
                None => {
                    return Err(LexError::new(
                        LexErrorKind::UnterminatedComment,
                        self.span_from(mark),
                        "unterminated block comment",
                    ))
                }
            }
        }
    }

    // ========================================================================
    // Literals
    // ========================================================================

    fn number(&mut self, mark: Mark) -> Result<Token, LexError> {
        self.eat_while(|c| c.is_ascii_digit());

        // `1..3` is a range, not a decimal
        if self.peek() == Some('.') && self.peek_nth(1).map_or(false, |c| c.is_ascii_digit()) {
            self.bump();
            self.eat_while(|c| c.is_ascii_digit());
        }

        if matches!(self.peek(), Some('e') | Some('E')) {
            self.bump();
            if matches!(self.peek(), Some('+') | Some('-')) {
                self.bump();
            }
            if !self.peek().map_or(false, |c| c.is_ascii_digit()) {
                self.eat_while(is_ident_char);
                return Err(LexError::new(
                    LexErrorKind::InvalidNumber,
                    self.span_from(mark),
                    format!(
                        "exponent without digits in `{}`",
                        &self.src[mark.pos..self.pos]
                    ),
                ));
            }
            self.eat_while(|c| c.is_ascii_digit());
        }

        if self.peek().map_or(false, is_ident_char) {
            self.eat_while(is_ident_char);
            return Err(LexError::new(
                LexErrorKind::InvalidNumber,
                self.span_from(mark),
                format!("invalid number `{}`", &self.src[mark.pos..self.pos]),
            ));
        }

        let text = &self.src[mark.pos..self.pos];
        Ok(Token::new(TokenKind::Number, text, self.span_from(mark)))
    }

    fn string(&mut self, mark: Mark, quote: char) -> Result<Token, LexError> {
        self.bump();
        let mut value = String::new();

        loop {
            let c = match self.peek() {
                Some(c) => c,
                None => return Err(self.unterminated_string(mark)),
            };
            match c {
                '\n' => return Err(self.unterminated_string(mark)),
                '\\' => {
                    self.bump();
                    let escaped = match self.bump() {
                        Some(e) => e,
                        None => return Err(self.unterminated_string(mark)),
                    };
                    match escaped {
                        'n' => value.push('\n'),
                        't' => value.push('\t'),
                        'r' => value.push('\r'),
                        'b' => value.push('\u{0008}'),
                        'f' => value.push('\u{000C}'),
                        'u' => value.push(self.unicode_escape()?),
                        // unknown escapes keep the escaped character
                        other => value.push(other),
                    }
                }
                c if c == quote => {
                    self.bump();
                    return Ok(Token::new(TokenKind::String, value, self.span_from(mark)));
                }
                c => {
                    self.bump();
                    value.push(c);
                }
            }
        }
    }

    fn unterminated_string(&self, mark: Mark) -> LexError {
        LexError::new(
            LexErrorKind::UnterminatedString,
            self.span_from(mark),
            "unterminated string literal",
        )
    }

    fn hex4(&mut self) -> Result<u32, LexError> {
        let mark = self.mark();
        let mut code = 0u32;
        for _ in 0..4 {
            let digit = self.peek().and_then(|c| c.to_digit(16));
            match digit {
                Some(d) => {
                    self.bump();
                    code = code * 16 + d;
                }
                None => {
                    return Err(LexError::new(
                        LexErrorKind::InvalidCharacter,
                        self.span_from(mark),
                        "invalid \\u escape: expected four hex digits",
                    ))
                }
            }
        }
        Ok(code)
    }

    fn unicode_escape(&mut self) -> Result<char, LexError> {
        let mark = self.mark();
        let high = self.hex4()?;

        // UTF-16 surrogate pair
        if (0xD800..0xDC00).contains(&high)
            && self.peek() == Some('\\')
            && self.peek_nth(1) == Some('u')
        {
            self.bump();
            self.bump();
            let low = self.hex4()?;
            if (0xDC00..0xE000).contains(&low) {
                let code = 0x10000 + ((high - 0xD800) << 10) + (low - 0xDC00);
                if let Some(c) = char::from_u32(code) {
                    return Ok(c);
                }
            }
        }

        char::from_u32(high).ok_or_else(|| {
            LexError::new(
                LexErrorKind::InvalidCharacter,
                self.span_from(mark),
                format!("invalid unicode escape \\u{:04X}", high),
            )
        })
    }

    fn quoted_identifier(&mut self, mark: Mark) -> Result<Token, LexError> {
        self.bump();
        let mut name = String::new();
        loop {
            match self.bump() {
                Some('`') => break,
                Some('\\') if self.peek() == Some('`') => {
                    self.bump();
                    name.push('`');
                }
                Some(c) => name.push(c),
                None => return Err(self.unterminated_string(mark)),
            }
        }
        Ok(Token::new(TokenKind::Identifier, name, self.span_from(mark)))
    }

    fn bind_parameter(&mut self, mark: Mark) -> Result<Token, LexError> {
        self.bump();
        let kind = if self.peek() == Some('@') {
            self.bump();
            TokenKind::CollectionBindParam
        } else {
            TokenKind::BindParam
        };

        if !self.peek().map_or(false, is_ident_char) {
            return Err(LexError::new(
                LexErrorKind::InvalidCharacter,
                self.span_from(mark),
                "expected a bind parameter name after `@`",
            ));
        }
        let start = self.pos;
        self.eat_while(is_ident_char);
        let name = &self.src[start..self.pos];
        Ok(Token::new(kind, name, self.span_from(mark)))
    }

    fn word(&mut self, mark: Mark) -> Token {
        self.eat_while(is_ident_char);
        let text = &self.src[mark.pos..self.pos];
        let span = self.span_from(mark);

        let kind = match text.to_ascii_uppercase().as_str() {
            "TRUE" => TokenKind::Boolean(true),
            "FALSE" => TokenKind::Boolean(false),
            "NULL" => TokenKind::Null,
            _ => match Keyword::lookup(text) {
                Some(kw) => TokenKind::Keyword(kw),
                None => TokenKind::Identifier,
            },
        };
        Token::new(kind, text, span)
    }

    fn symbol(&mut self, mark: Mark, c: char) -> Result<Token, LexError> {
        let next = self.peek_nth(1);
        let (kind, width) = match (c, next) {
            ('.', Some('.')) if self.peek_nth(2) == Some('.') => {
                (TokenKind::Operator(Operator::Spread), 3)
            }
            ('.', Some('.')) => (TokenKind::Operator(Operator::Range), 2),
            ('=', Some('=')) => (TokenKind::Operator(Operator::Eq), 2),
            ('!', Some('=')) => (TokenKind::Operator(Operator::Ne), 2),
            ('<', Some('=')) => (TokenKind::Operator(Operator::Le), 2),
            ('>', Some('=')) => (TokenKind::Operator(Operator::Ge), 2),
            ('&', Some('&')) => (TokenKind::Operator(Operator::And), 2),
            ('|', Some('|')) => (TokenKind::Operator(Operator::Or), 2),
            (':', Some(':')) => (TokenKind::Operator(Operator::Scope), 2),
            ('=', _) => (TokenKind::Operator(Operator::Assign), 1),
            ('<', _) => (TokenKind::Operator(Operator::Lt), 1),
            ('>', _) => (TokenKind::Operator(Operator::Gt), 1),
            ('!', _) => (TokenKind::Operator(Operator::Not), 1),
            ('+', _) => (TokenKind::Operator(Operator::Plus), 1),
            ('-', _) => (TokenKind::Operator(Operator::Minus), 1),
            ('*', _) => (TokenKind::Operator(Operator::Star), 1),
            ('/', _) => (TokenKind::Operator(Operator::Slash), 1),
            ('%', _) => (TokenKind::Operator(Operator::Percent), 1),
            ('?', _) => (TokenKind::Operator(Operator::Question), 1),
            (':', _) => (TokenKind::Operator(Operator::Colon), 1),
            ('(', _) => (TokenKind::Punct(Punct::LParen), 1),
            (')', _) => (TokenKind::Punct(Punct::RParen), 1),
            ('[', _) => (TokenKind::Punct(Punct::LBracket), 1),
            (']', _) => (TokenKind::Punct(Punct::RBracket), 1),
            ('{', _) => (TokenKind::Punct(Punct::LBrace), 1),
            ('}', _) => (TokenKind::Punct(Punct::RBrace), 1),
            (',', _) => (TokenKind::Punct(Punct::Comma), 1),
            ('.', _) => (TokenKind::Punct(Punct::Dot), 1),
            _ => {
                self.bump();
                return Err(LexError::new(
                    LexErrorKind::InvalidCharacter,
                    self.span_from(mark),
                    format!("unexpected character `{}`", c),
                ));
            }
        };

        for _ in 0..width {
            self.bump();
        }
        let text = &self.src[mark.pos..self.pos];
        Ok(Token::new(kind, text, self.span_from(mark)))
    }
}

fn is_ident_start(c: char) -> bool {
    c.is_alphabetic() || c == '_'
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

/// Tokenize a query, discarding comments
pub fn tokenize(source: &str) -> Result<Vec<Token>, LexError> {
    Lexer::new(source).tokenize()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<TokenKind> {
        tokenize(src).unwrap().into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn test_simple_query() {
        let tokens = tokenize("FOR u IN users RETURN u.name").unwrap();
        assert_eq!(tokens.len(), 9);
        assert_eq!(tokens[0].kind, TokenKind::Keyword(Keyword::For));
        assert_eq!(tokens[1].kind, TokenKind::Identifier);
        assert_eq!(tokens[1].lexeme, "u");
        assert_eq!(tokens[6].kind, TokenKind::Punct(Punct::Dot));
        assert_eq!(tokens[8].kind, TokenKind::Eof);
    }

    #[test]
    fn test_keywords_case_insensitive() {
        let tokens = tokenize("for x in xs return x").unwrap();
        assert!(tokens[0].is_keyword(Keyword::For));
        assert!(tokens[2].is_keyword(Keyword::In));
        assert!(tokens[4].is_keyword(Keyword::Return));
        // lexeme keeps the original spelling
        assert_eq!(tokens[0].lexeme, "for");
    }

    #[test]
    fn test_literals() {
        assert_eq!(
            kinds("true FALSE null"),
            vec![
                TokenKind::Boolean(true),
                TokenKind::Boolean(false),
                TokenKind::Null,
                TokenKind::Eof
            ]
        );
    }

    #[test]
    fn test_range_is_not_decimal() {
        let tokens = tokenize("1..3").unwrap();
        assert_eq!(tokens[0].lexeme, "1");
        assert!(tokens[1].is_operator(Operator::Range));
        assert_eq!(tokens[2].lexeme, "3");
    }

    #[test]
    fn test_numbers() {
        let tokens = tokenize("42 3.14 1e10 2.5E-3").unwrap();
        let lexemes: Vec<&str> = tokens.iter().map(|t| t.lexeme.as_str()).collect();
        assert_eq!(lexemes, vec!["42", "3.14", "1e10", "2.5E-3", ""]);
    }

    #[test]
    fn test_invalid_numbers() {
        for src in ["12abc", "1e", "1e+", "0x1F"] {
            let err = tokenize(src).unwrap_err();
            assert_eq!(err.kind, LexErrorKind::InvalidNumber, "{}", src);
        }
    }

    #[test]
    fn test_string_escapes() {
        let tokens = tokenize(r#""a\"b\nA\q" 'it\'s'"#).unwrap();
        assert_eq!(tokens[0].kind, TokenKind::String);
        assert_eq!(tokens[0].lexeme, "a\"b\nAq");
        assert_eq!(tokens[1].lexeme, "it's");
    }

    #[test]
    fn test_surrogate_pair() {
        let tokens = tokenize(r#""\uD83D\uDE00 \u00e9""#).unwrap();
        assert_eq!(tokens[0].lexeme, "\u{1F600} \u{e9}");
    }

    #[test]
    fn test_unterminated_string() {
        let err = tokenize("RETURN \"abc").unwrap_err();
        assert_eq!(err.kind, LexErrorKind::UnterminatedString);
        assert_eq!(err.span.start, 7);

        let err = tokenize("RETURN 'abc\ndef'").unwrap_err();
        assert_eq!(err.kind, LexErrorKind::UnterminatedString);
    }

    #[test]
    fn test_comments() {
        let tokens = tokenize("FOR u IN users // trailing\n/* block\ncomment */ RETURN u").unwrap();
        assert!(tokens.iter().all(|t| t.kind != TokenKind::Comment));
        assert_eq!(tokens.len(), 7);
        // RETURN sits on line 3
        assert_eq!(tokens[4].span.line, 3);

        let kept = Lexer::new("RETURN 1 // note").keep_comments(true).tokenize().unwrap();
        assert_eq!(kept[2].kind, TokenKind::Comment);
        assert_eq!(kept[2].lexeme, "// note");
    }

    #[test]
    fn test_unterminated_comment() {
        let err = tokenize("RETURN 1 /* never closed").unwrap_err();
        assert_eq!(err.kind, LexErrorKind::UnterminatedComment);
        assert_eq!(err.span.start, 9);
    }

    #[test]
    fn test_bind_parameters() {
        let tokens = tokenize("FOR d IN @@coll FILTER d.x == @value").unwrap();
        assert_eq!(tokens[3].kind, TokenKind::CollectionBindParam);
        assert_eq!(tokens[3].lexeme, "coll");
        assert_eq!(tokens[9].kind, TokenKind::BindParam);
        assert_eq!(tokens[9].lexeme, "value");

        let err = tokenize("RETURN @ x").unwrap_err();
        assert_eq!(err.kind, LexErrorKind::InvalidCharacter);
    }

    #[test]
    fn test_operators() {
        let tokens = tokenize("a == b != c <= d && e || !f ... g :: h ?: i").unwrap();
        let ops: Vec<Operator> = tokens
            .iter()
            .filter_map(|t| match t.kind {
                TokenKind::Operator(op) => Some(op),
                _ => None,
            })
            .collect();
        assert_eq!(
            ops,
            vec![
                Operator::Eq,
                Operator::Ne,
                Operator::Le,
                Operator::And,
                Operator::Or,
                Operator::Not,
                Operator::Spread,
                Operator::Scope,
                Operator::Question,
                Operator::Colon
            ]
        );
    }

    #[test]
    fn test_backtick_identifier() {
        let tokens = tokenize("RETURN doc.`first name`").unwrap();
        assert_eq!(tokens[3].kind, TokenKind::Identifier);
        assert_eq!(tokens[3].lexeme, "first name");
    }

    #[test]
    fn test_invalid_character() {
        let err = tokenize("RETURN 1 # 2").unwrap_err();
        assert_eq!(err.kind, LexErrorKind::InvalidCharacter);
        assert_eq!(err.span.column, 10);

        let err = tokenize("RETURN a & b").unwrap_err();
        assert_eq!(err.kind, LexErrorKind::InvalidCharacter);
    }

    #[test]
    fn test_unicode_identifier_spans() {
        let tokens = tokenize("LET größe = 1 RETURN größe").unwrap();
        assert_eq!(tokens[1].lexeme, "größe");
        assert_eq!(tokens[2].span.column, 11);
    }
}
