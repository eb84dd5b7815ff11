//! Lexer for the rill language
//!
//! Converts source code into a stream of tokens. Number lexemes are kept
//! verbatim so `1.2200` reaches the compiler with its precision intact, and
//! string contents keep their `{...}` interpolation segments for the parser
//! to split.

use crate::error::{Error, ErrorKind, Result};
use crate::token::{lookup_keyword, Span, Token, TokenKind};

/// The lexer state
pub struct Lexer<'a> {
    chars: std::iter::Peekable<std::str::CharIndices<'a>>,
    source_len: usize,
    current_pos: usize,
    line: usize,
    column: usize,
}

impl<'a> Lexer<'a> {
    /// Create a new lexer from source code
    pub fn new(source: &'a str) -> Self {
        Self {
            chars: source.char_indices().peekable(),
            source_len: source.len(),
            current_pos: 0,
            line: 1,
            column: 1,
        }
    }

    /// Tokenize the entire source
    pub fn tokenize(&mut self) -> Result<Vec<Token>> {
        let mut tokens = Vec::new();

        while let Some(token) = self.next_token()? {
            tokens.push(token);
        }

        tokens.push(Token::new(
            TokenKind::Eof,
            Span::new(self.current_pos, self.current_pos, self.line, self.column),
        ));

        Ok(tokens)
    }

    /// Get the next token
    fn next_token(&mut self) -> Result<Option<Token>> {
        self.skip_whitespace_and_comments();

        let Some(&(start_pos, ch)) = self.chars.peek() else {
            return Ok(None);
        };

        let start_line = self.line;
        let start_column = self.column;

        let kind = match ch {
            '(' => { self.advance(); TokenKind::LeftParen }
            ')' => { self.advance(); TokenKind::RightParen }
            '{' => { self.advance(); TokenKind::LeftBrace }
            '}' => { self.advance(); TokenKind::RightBrace }
            '[' => { self.advance(); TokenKind::LeftBracket }
            ']' => { self.advance(); TokenKind::RightBracket }
            ',' => { self.advance(); TokenKind::Comma }
            ';' => { self.advance(); TokenKind::Semicolon }
            ':' => { self.advance(); TokenKind::Colon }
            '.' => { self.advance(); TokenKind::Dot }
            '+' => { self.advance(); TokenKind::Plus }
            '-' => { self.advance(); TokenKind::Minus }
            '*' => { self.advance(); TokenKind::Star }
            '/' => { self.advance(); TokenKind::Slash }
            '%' => { self.advance(); TokenKind::Percent }

            '=' => {
                self.advance();
                if self.peek_char() == Some('=') {
                    self.advance();
                    TokenKind::Equal
                } else {
                    TokenKind::Assign
                }
            }
            '!' => {
                self.advance();
                if self.peek_char() == Some('=') {
                    self.advance();
                    TokenKind::NotEqual
                } else {
                    TokenKind::Bang
                }
            }
            '<' => {
                self.advance();
                if self.peek_char() == Some('=') {
                    self.advance();
                    TokenKind::LessEqual
                } else {
                    TokenKind::Less
                }
            }
            '>' => {
                self.advance();
                if self.peek_char() == Some('=') {
                    self.advance();
                    TokenKind::GreaterEqual
                } else {
                    TokenKind::Greater
                }
            }

            // Newlines separate statements
            '\n' => {
                self.advance();
                self.line += 1;
                self.column = 1;
                TokenKind::Newline
            }

            '"' => self.scan_string(start_line, start_column)?,
            '\'' => self.scan_character(start_line, start_column)?,

            c if c.is_ascii_digit() => self.scan_number(),

            c if c.is_alphabetic() || c == '_' => self.scan_identifier(),

            _ => {
                self.advance();
                return Err(Error::new(
                    ErrorKind::UnexpectedCharacter(ch),
                    Some(Span::new(start_pos, self.current_pos, start_line, start_column)),
                ));
            }
        };

        Ok(Some(Token::new(
            kind,
            Span::new(start_pos, self.current_pos, start_line, start_column),
        )))
    }

    fn advance(&mut self) -> Option<char> {
        let (_, ch) = self.chars.next()?;
        self.current_pos += ch.len_utf8();
        self.column += 1;
        Some(ch)
    }

    fn peek_char(&mut self) -> Option<char> {
        self.chars.peek().map(|&(_, c)| c)
    }

    fn skip_whitespace_and_comments(&mut self) {
        loop {
            match self.peek_char() {
                // Newlines are tokens, not whitespace
                Some(' ') | Some('\t') | Some('\r') => {
                    self.advance();
                }
                Some('/') => {
                    let mut lookahead = self.chars.clone();
                    lookahead.next();
                    if lookahead.peek().map(|&(_, c)| c) == Some('/') {
                        while let Some(c) = self.peek_char() {
                            if c == '\n' {
                                break;
                            }
                            self.advance();
                        }
                    } else {
                        return;
                    }
                }
                _ => return,
            }
        }
    }

    fn scan_string(&mut self, line: usize, column: usize) -> Result<TokenKind> {
        self.advance(); // opening quote

        let mut value = String::new();
        loop {
            match self.peek_char() {
                None | Some('\n') => {
                    return Err(Error::new(
                        ErrorKind::UnterminatedString,
                        Some(Span::new(self.current_pos, self.source_len, line, column)),
                    ));
                }
                Some('"') => {
                    self.advance();
                    break;
                }
                Some('\\') => {
                    self.advance();
                    match self.advance() {
                        Some('n') => value.push('\n'),
                        Some('t') => value.push('\t'),
                        Some('"') => value.push('"'),
                        Some('\\') => value.push('\\'),
                        Some(other) => {
                            value.push('\\');
                            value.push(other);
                        }
                        None => {
                            return Err(Error::new(
                                ErrorKind::UnterminatedString,
                                Some(Span::new(self.current_pos, self.source_len, line, column)),
                            ));
                        }
                    }
                }
                Some(c) => {
                    value.push(c);
                    self.advance();
                }
            }
        }

        Ok(TokenKind::Str(value))
    }

    fn scan_character(&mut self, line: usize, column: usize) -> Result<TokenKind> {
        self.advance(); // opening quote

        let ch = match self.peek_char() {
            Some('\'') => {
                self.advance();
                return Err(Error::new(
                    ErrorKind::EmptyCharacter,
                    Some(Span::new(self.current_pos, self.current_pos, line, column)),
                ));
            }
            Some('\\') => {
                self.advance();
                match self.advance() {
                    Some('n') => '\n',
                    Some('t') => '\t',
                    Some('\'') => '\'',
                    Some('\\') => '\\',
                    Some(other) => other,
                    None => {
                        return Err(Error::new(
                            ErrorKind::UnterminatedString,
                            Some(Span::new(self.current_pos, self.source_len, line, column)),
                        ));
                    }
                }
            }
            Some(c) => {
                self.advance();
                c
            }
            None => {
                return Err(Error::new(
                    ErrorKind::UnterminatedString,
                    Some(Span::new(self.current_pos, self.source_len, line, column)),
                ));
            }
        };

        if self.peek_char() != Some('\'') {
            return Err(Error::new(
                ErrorKind::UnterminatedString,
                Some(Span::new(self.current_pos, self.source_len, line, column)),
            ));
        }
        self.advance(); // closing quote

        Ok(TokenKind::Character(ch))
    }

    fn scan_number(&mut self) -> TokenKind {
        let mut lexeme = String::new();

        while let Some(c) = self.peek_char() {
            if c.is_ascii_digit() {
                lexeme.push(c);
                self.advance();
            } else {
                break;
            }
        }

        // A fractional part needs a digit after the dot; `1.foo` lexes as
        // number, dot, identifier.
        if self.peek_char() == Some('.') {
            let mut lookahead = self.chars.clone();
            lookahead.next();
            if lookahead.peek().map_or(false, |&(_, c)| c.is_ascii_digit()) {
                lexeme.push('.');
                self.advance();
                while let Some(c) = self.peek_char() {
                    if c.is_ascii_digit() {
                        lexeme.push(c);
                        self.advance();
                    } else {
                        break;
                    }
                }
            }
        }

        TokenKind::Number(lexeme)
    }

    fn scan_identifier(&mut self) -> TokenKind {
        let mut name = String::new();

        while let Some(c) = self.peek_char() {
            if c.is_alphanumeric() || c == '_' {
                name.push(c);
                self.advance();
            } else {
                break;
            }
        }

        lookup_keyword(&name).unwrap_or(TokenKind::Ident(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        Lexer::new(source)
            .tokenize()
            .expect("tokenize failed")
            .into_iter()
            .map(|t| t.kind)
            .collect()
    }

    #[test]
    fn test_simple_call() {
        assert_eq!(
            kinds(r#"print("hello")"#),
            vec![
                TokenKind::Ident("print".to_string()),
                TokenKind::LeftParen,
                TokenKind::Str("hello".to_string()),
                TokenKind::RightParen,
                TokenKind::Eof,
            ],
        );
    }

    #[test]
    fn test_number_keeps_lexeme() {
        assert_eq!(
            kinds("1.2200"),
            vec![TokenKind::Number("1.2200".to_string()), TokenKind::Eof],
        );
    }

    #[test]
    fn test_operators() {
        assert_eq!(
            kinds("a == b != c <= d"),
            vec![
                TokenKind::Ident("a".to_string()),
                TokenKind::Equal,
                TokenKind::Ident("b".to_string()),
                TokenKind::NotEqual,
                TokenKind::Ident("c".to_string()),
                TokenKind::LessEqual,
                TokenKind::Ident("d".to_string()),
                TokenKind::Eof,
            ],
        );
    }

    #[test]
    fn test_keywords() {
        assert_eq!(
            kinds("func test import true"),
            vec![
                TokenKind::Func,
                TokenKind::Test,
                TokenKind::Import,
                TokenKind::True,
                TokenKind::Eof,
            ],
        );
    }

    #[test]
    fn test_comments_are_skipped() {
        assert_eq!(
            kinds("a // nothing to see here\nb"),
            vec![
                TokenKind::Ident("a".to_string()),
                TokenKind::Newline,
                TokenKind::Ident("b".to_string()),
                TokenKind::Eof,
            ],
        );
    }

    #[test]
    fn test_unterminated_string() {
        let err = Lexer::new("\"oops").tokenize().unwrap_err();
        assert!(matches!(err.kind, ErrorKind::UnterminatedString));
    }

    #[test]
    fn test_empty_character() {
        let err = Lexer::new("''").tokenize().unwrap_err();
        assert!(matches!(err.kind, ErrorKind::EmptyCharacter));
        assert_eq!(err.kind.to_string(), "character literal cannot be empty");
    }

    #[test]
    fn test_character_literal() {
        assert_eq!(
            kinds("'a'"),
            vec![TokenKind::Character('a'), TokenKind::Eof],
        );
    }

    #[test]
    fn test_spans_track_lines() {
        let tokens = Lexer::new("a\nbb").tokenize().expect("tokenize failed");
        assert_eq!(tokens[0].span.line, 1);
        assert_eq!(tokens[2].span.line, 2);
        assert_eq!(tokens[2].span.column, 1);
    }
}
