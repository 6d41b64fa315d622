//! Byte-stream lexer with one-byte lookahead and line tracking.
//!
//! The lexer is total: malformed input never fails, it yields
//! [`TokenKind::Illegal`] tokens that the parser surfaces as errors. Past the
//! end of input it returns [`TokenKind::Eof`] indefinitely.

use crate::token::{Token, TokenKind, lookup_ident};

/// Turns a source string into a token stream, one [`Token`] per call.
pub struct Lexer {
    input: Vec<u8>,
    /// Byte offset of `ch`.
    position: usize,
    /// Byte offset one past `ch`.
    read_position: usize,
    /// Current byte under examination, `0` at end of input.
    ch: u8,
    /// Current line, 1-based.
    line: usize,
}

impl Lexer {
    #[must_use]
    pub fn new(input: &str) -> Self {
        let mut lexer = Self {
            input: input.as_bytes().to_vec(),
            position: 0,
            read_position: 0,
            ch: 0,
            line: 1,
        };
        lexer.read_char();
        lexer
    }

    /// Scans and returns the next token.
    pub fn next_token(&mut self) -> Token {
        self.skip_whitespace();

        let line = self.line;
        let token = match self.ch {
            0 => Token::fixed(TokenKind::Eof, line),
            b'<' => self.two_byte_op(b'=', TokenKind::Lte, TokenKind::Lt, line),
            b'>' => self.two_byte_op(b'=', TokenKind::Gte, TokenKind::Gt, line),
            b'=' => self.two_byte_op(b'=', TokenKind::Eq, TokenKind::Assign, line),
            b'!' => self.two_byte_op(b'=', TokenKind::NotEq, TokenKind::Bang, line),
            b':' => self.two_byte_op(b'=', TokenKind::Define, TokenKind::Colon, line),
            b'(' => Token::fixed(TokenKind::LParen, line),
            b')' => Token::fixed(TokenKind::RParen, line),
            b'{' => Token::fixed(TokenKind::LBrace, line),
            b'}' => Token::fixed(TokenKind::RBrace, line),
            b'[' => Token::fixed(TokenKind::LBracket, line),
            b']' => Token::fixed(TokenKind::RBracket, line),
            b'+' => Token::fixed(TokenKind::Plus, line),
            b'-' => Token::fixed(TokenKind::Minus, line),
            b'*' => Token::fixed(TokenKind::Asterisk, line),
            b'/' => Token::fixed(TokenKind::Slash, line),
            b'%' => Token::fixed(TokenKind::Percent, line),
            b',' => Token::fixed(TokenKind::Comma, line),
            b';' => Token::fixed(TokenKind::Semicolon, line),
            b'.' => Token::fixed(TokenKind::Dot, line),
            b'"' => return self.read_string(line),
            b'#' => return self.read_comment(line),
            ch if is_letter(ch) => {
                let literal = self.read_while(is_ident_char);
                let kind = lookup_ident(&literal);
                return Token::with_literal(kind, line, literal);
            }
            ch if ch.is_ascii_digit() => return self.read_number(line),
            ch => Token::with_literal(TokenKind::Illegal, line, (ch as char).to_string()),
        };
        self.read_char();
        token
    }

    /// Resolves a two-byte operator by peeking at the byte after `ch`.
    fn two_byte_op(&mut self, next: u8, long: TokenKind, short: TokenKind, line: usize) -> Token {
        if self.peek_char() == next {
            self.read_char();
            Token::fixed(long, line)
        } else {
            Token::fixed(short, line)
        }
    }

    /// Reads a string literal. No escape processing: the literal is the raw
    /// bytes between the quotes. An unterminated string yields `Illegal`.
    fn read_string(&mut self, line: usize) -> Token {
        self.read_char(); // opening quote
        let start = self.position;
        while self.ch != b'"' && self.ch != 0 {
            self.read_char();
        }
        let literal = String::from_utf8_lossy(&self.input[start..self.position]).into_owned();
        if self.ch == 0 {
            return Token::with_literal(TokenKind::Illegal, line, literal);
        }
        self.read_char(); // closing quote
        Token::with_literal(TokenKind::String, line, literal)
    }

    /// Reads a `#` comment through end of line. The literal is the text after
    /// the `#`, without the line terminator.
    fn read_comment(&mut self, line: usize) -> Token {
        self.read_char(); // '#'
        let start = self.position;
        while self.ch != b'\n' && self.ch != b'\r' && self.ch != 0 {
            self.read_char();
        }
        let literal = String::from_utf8_lossy(&self.input[start..self.position]).into_owned();
        Token::with_literal(TokenKind::Comment, line, literal)
    }

    /// Reads a numeric literal: a digit run, optionally containing dots.
    /// A run with a `.` is classified `Float`; conversion errors (for example
    /// two dots) surface when the parser converts the literal.
    fn read_number(&mut self, line: usize) -> Token {
        let literal = self.read_while(|ch| ch.is_ascii_digit() || ch == b'.');
        let kind = if literal.contains('.') {
            TokenKind::Float
        } else {
            TokenKind::Int
        };
        Token::with_literal(kind, line, literal)
    }

    fn read_while(&mut self, test: fn(u8) -> bool) -> String {
        let start = self.position;
        while test(self.ch) {
            self.read_char();
        }
        String::from_utf8_lossy(&self.input[start..self.position]).into_owned()
    }

    fn skip_whitespace(&mut self) {
        while matches!(self.ch, b' ' | b'\t' | b'\n' | b'\r') {
            self.read_char();
        }
    }

    fn read_char(&mut self) {
        match self.ch {
            b'\n' => self.line += 1,
            // lone CR counts as a line ending; CRLF counts once via the LF
            b'\r' if self.peek_char() != b'\n' => self.line += 1,
            _ => {}
        }
        self.ch = self.input.get(self.read_position).copied().unwrap_or(0);
        self.position = self.read_position;
        self.read_position += 1;
    }

    fn peek_char(&self) -> u8 {
        self.input.get(self.read_position).copied().unwrap_or(0)
    }
}

fn is_letter(ch: u8) -> bool {
    ch.is_ascii_alphabetic() || ch == b'_'
}

fn is_ident_char(ch: u8) -> bool {
    is_letter(ch) || ch.is_ascii_digit()
}
