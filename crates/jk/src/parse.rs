//! Pratt parser: token stream → AST.
//!
//! The parser keeps a two-token buffer (`cur`, `peek`) and dispatches on the
//! current token kind: a prefix rule starts an expression, infix rules extend
//! it while the next operator binds tighter than the surrounding context.
//!
//! Errors are accumulated, not fatal: a malformed statement is dropped and
//! parsing continues so callers can report every error at once.

use std::fmt;

use crate::{
    ast::{BlockStatement, Expression, FunctionLiteral, Identifier, InfixOp, PrefixOp, Program, Statement},
    lexer::Lexer,
    token::{Precedence, Token, TokenKind},
};

/// A single parse failure with its source line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError {
    pub line: usize,
    pub message: String,
}

impl ParseError {
    fn new(line: usize, message: impl Into<String>) -> Self {
        Self {
            line,
            message: message.into(),
        }
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "parse error at line {}: {}", self.line, self.message)
    }
}

impl std::error::Error for ParseError {}

/// The Pratt parser. Construct with [`Parser::new`], call
/// [`Parser::parse_program`], then check [`Parser::errors`].
pub struct Parser {
    lexer: Lexer,
    cur: Token,
    peek: Token,
    errors: Vec<ParseError>,
}

impl Parser {
    #[must_use]
    pub fn new(lexer: Lexer) -> Self {
        let mut parser = Self {
            lexer,
            cur: Token::fixed(TokenKind::Eof, 0),
            peek: Token::fixed(TokenKind::Eof, 0),
            errors: Vec::new(),
        };
        // fill the two-token buffer
        parser.next_token();
        parser.next_token();
        parser
    }

    /// Parses the whole input. Statements that fail to parse are dropped;
    /// the failures are recorded in [`Parser::errors`].
    pub fn parse_program(&mut self) -> Program {
        let mut program = Program::default();
        while self.cur.kind != TokenKind::Eof {
            if let Some(statement) = self.parse_statement() {
                program.statements.push(statement);
            }
            self.next_token();
        }
        program
    }

    /// The errors accumulated so far.
    #[must_use]
    pub fn errors(&self) -> &[ParseError] {
        &self.errors
    }

    /// Consumes the parser, returning its errors.
    #[must_use]
    pub fn into_errors(self) -> Vec<ParseError> {
        self.errors
    }

    fn next_token(&mut self) {
        let next = self.lexer.next_token();
        self.cur = std::mem::replace(&mut self.peek, next);
    }

    fn cur_is(&self, kind: TokenKind) -> bool {
        self.cur.kind == kind
    }

    fn peek_is(&self, kind: TokenKind) -> bool {
        self.peek.kind == kind
    }

    /// Advances when the next token has the expected kind; records an
    /// "expected X got Y" error otherwise.
    fn expect_peek(&mut self, kind: TokenKind) -> bool {
        if self.peek_is(kind) {
            self.next_token();
            true
        } else {
            self.errors.push(ParseError::new(
                self.cur.line,
                format!("invalid token. expected: {kind} - got: {}", self.peek.kind),
            ));
            false
        }
    }

    fn error(&mut self, message: impl Into<String>) {
        self.errors.push(ParseError::new(self.cur.line, message));
    }

    // ------------------------------------------------------------------
    // statements
    // ------------------------------------------------------------------

    fn parse_statement(&mut self) -> Option<Statement> {
        match self.cur.kind {
            TokenKind::Let => self.parse_let_statement(),
            TokenKind::Return => self.parse_return_statement(),
            TokenKind::Continue => self.parse_continue_statement(),
            TokenKind::Break => self.parse_break_statement(),
            TokenKind::Ident if self.peek_is(TokenKind::Assign) => self.parse_reassign_statement(true),
            TokenKind::Ident if self.peek_is(TokenKind::Define) => self.parse_define_statement(true),
            TokenKind::Func if self.peek_is(TokenKind::Ident) => self.parse_func_statement(),
            _ => self.parse_expression_statement(),
        }
    }

    fn parse_let_statement(&mut self) -> Option<Statement> {
        let token = self.cur.clone();
        if !self.expect_peek(TokenKind::Ident) {
            return None;
        }
        let name = self.cur_identifier();
        if !self.expect_peek(TokenKind::Assign) {
            return None;
        }
        self.next_token();
        let value = self.parse_named_value(&name)?;
        if !self.expect_peek(TokenKind::Semicolon) {
            return None;
        }
        Some(Statement::Let { token, name, value })
    }

    fn parse_define_statement(&mut self, terminated: bool) -> Option<Statement> {
        let name = self.cur_identifier();
        let token = self.peek.clone();
        self.next_token(); // :=
        self.next_token();
        let value = self.parse_named_value(&name)?;
        if terminated && !self.expect_peek(TokenKind::Semicolon) {
            return None;
        }
        Some(Statement::Define { token, name, value })
    }

    fn parse_reassign_statement(&mut self, terminated: bool) -> Option<Statement> {
        let name = self.cur_identifier();
        let token = self.peek.clone();
        self.next_token(); // =
        self.next_token();
        let value = self.parse_expression(Precedence::Lowest)?;
        if terminated && !self.expect_peek(TokenKind::Semicolon) {
            return None;
        }
        Some(Statement::Reassign { token, name, value })
    }

    fn parse_func_statement(&mut self) -> Option<Statement> {
        let token = self.cur.clone();
        if !self.expect_peek(TokenKind::Ident) {
            return None;
        }
        let name = self.cur_identifier();
        let func = self.parse_function_literal(Some(name.value.clone()))?;
        Some(Statement::Func { token, name, func })
    }

    fn parse_return_statement(&mut self) -> Option<Statement> {
        let token = self.cur.clone();
        self.next_token();
        let value = self.parse_expression(Precedence::Lowest)?;
        if self.peek_is(TokenKind::Semicolon) {
            self.next_token();
        }
        Some(Statement::Return { token, value })
    }

    fn parse_continue_statement(&mut self) -> Option<Statement> {
        let token = self.cur.clone();
        if !self.expect_peek(TokenKind::Semicolon) {
            return None;
        }
        Some(Statement::Continue { token })
    }

    fn parse_break_statement(&mut self) -> Option<Statement> {
        let token = self.cur.clone();
        if !self.expect_peek(TokenKind::Semicolon) {
            return None;
        }
        Some(Statement::Break { token })
    }

    fn parse_expression_statement(&mut self) -> Option<Statement> {
        let token = self.cur.clone();
        let expression = self.parse_expression(Precedence::Lowest)?;
        if self.peek_is(TokenKind::Semicolon) {
            self.next_token();
        }
        Some(Statement::Expression { token, expression })
    }

    fn parse_block_statement(&mut self) -> BlockStatement {
        let token = self.cur.clone();
        let mut statements = Vec::new();
        self.next_token();
        while !self.cur_is(TokenKind::RBrace) && !self.cur_is(TokenKind::Eof) {
            if let Some(statement) = self.parse_statement() {
                statements.push(statement);
            }
            self.next_token();
        }
        BlockStatement { token, statements }
    }

    /// Parses a value expression and, when it is a function literal, attaches
    /// the binding name so self-references in the body resolve.
    fn parse_named_value(&mut self, name: &Identifier) -> Option<Expression> {
        let mut value = self.parse_expression(Precedence::Lowest)?;
        if let Expression::Function(func) = &mut value {
            func.name = Some(name.value.clone());
        }
        Some(value)
    }

    // ------------------------------------------------------------------
    // expressions
    // ------------------------------------------------------------------

    fn parse_expression(&mut self, precedence: Precedence) -> Option<Expression> {
        let mut left = self.parse_prefix()?;
        while !self.peek_is(TokenKind::Semicolon) && precedence < self.peek.kind.precedence() {
            self.next_token();
            left = self.parse_infix(left)?;
        }
        Some(left)
    }

    /// Prefix dispatch keyed on the current token kind.
    fn parse_prefix(&mut self) -> Option<Expression> {
        match self.cur.kind {
            TokenKind::Ident => Some(Expression::Identifier(self.cur_identifier())),
            TokenKind::Int => self.parse_integer_literal(),
            TokenKind::Float => self.parse_float_literal(),
            TokenKind::String => Some(Expression::Str {
                token: self.cur.clone(),
                value: self.cur.literal.clone(),
            }),
            TokenKind::True | TokenKind::False => Some(Expression::Boolean {
                token: self.cur.clone(),
                value: self.cur_is(TokenKind::True),
            }),
            TokenKind::Comment => Some(Expression::Comment {
                token: self.cur.clone(),
            }),
            TokenKind::Bang => self.parse_prefix_expression(PrefixOp::Bang),
            TokenKind::Minus => self.parse_prefix_expression(PrefixOp::Minus),
            TokenKind::LParen => self.parse_grouped_expression(),
            TokenKind::LBracket => self.parse_array_literal(),
            TokenKind::LBrace => self.parse_map_literal(),
            TokenKind::If => self.parse_if_expression(),
            TokenKind::While => self.parse_while_expression(),
            TokenKind::For => self.parse_for_expression(),
            TokenKind::Func => self.parse_function_literal(None).map(Expression::Function),
            kind => {
                self.error(format!("no prefix parse function found for token: {kind}"));
                None
            }
        }
    }

    /// Infix dispatch keyed on the current token kind, with `left` already
    /// parsed.
    fn parse_infix(&mut self, left: Expression) -> Option<Expression> {
        match self.cur.kind {
            TokenKind::Plus => self.parse_infix_expression(left, InfixOp::Add),
            TokenKind::Minus => self.parse_infix_expression(left, InfixOp::Sub),
            TokenKind::Asterisk => self.parse_infix_expression(left, InfixOp::Mul),
            TokenKind::Slash => self.parse_infix_expression(left, InfixOp::Div),
            TokenKind::Percent => self.parse_infix_expression(left, InfixOp::Mod),
            TokenKind::Lt => self.parse_infix_expression(left, InfixOp::Lt),
            TokenKind::Gt => self.parse_infix_expression(left, InfixOp::Gt),
            TokenKind::Lte => self.parse_infix_expression(left, InfixOp::Lte),
            TokenKind::Gte => self.parse_infix_expression(left, InfixOp::Gte),
            TokenKind::Eq => self.parse_infix_expression(left, InfixOp::Eq),
            TokenKind::NotEq => self.parse_infix_expression(left, InfixOp::NotEq),
            TokenKind::LParen => self.parse_call_expression(left),
            TokenKind::LBracket => self.parse_index_expression(left),
            kind => {
                self.error(format!("no infix parse function found for token: {kind}"));
                None
            }
        }
    }

    fn parse_prefix_expression(&mut self, op: PrefixOp) -> Option<Expression> {
        let token = self.cur.clone();
        self.next_token();
        let right = Box::new(self.parse_expression(Precedence::Prefix)?);
        Some(Expression::Prefix { token, op, right })
    }

    fn parse_infix_expression(&mut self, left: Expression, op: InfixOp) -> Option<Expression> {
        let token = self.cur.clone();
        let precedence = self.cur.kind.precedence();
        self.next_token();
        let right = Box::new(self.parse_expression(precedence)?);
        Some(Expression::Infix {
            token,
            op,
            left: Box::new(left),
            right,
        })
    }

    fn parse_grouped_expression(&mut self) -> Option<Expression> {
        self.next_token();
        let expression = self.parse_expression(Precedence::Lowest)?;
        if !self.expect_peek(TokenKind::RParen) {
            return None;
        }
        Some(expression)
    }

    fn parse_integer_literal(&mut self) -> Option<Expression> {
        let token = self.cur.clone();
        match token.literal.parse::<i64>() {
            Ok(value) => Some(Expression::Integer { token, value }),
            Err(_) => {
                self.error(format!("could not parse {:?} as integer", token.literal));
                None
            }
        }
    }

    fn parse_float_literal(&mut self) -> Option<Expression> {
        let token = self.cur.clone();
        match token.literal.parse::<f64>() {
            Ok(value) => Some(Expression::Float { token, value }),
            Err(_) => {
                self.error(format!("could not parse {:?} as float", token.literal));
                None
            }
        }
    }

    fn parse_array_literal(&mut self) -> Option<Expression> {
        let token = self.cur.clone();
        let elements = self.parse_expression_list(TokenKind::RBracket)?;
        Some(Expression::Array { token, elements })
    }

    fn parse_map_literal(&mut self) -> Option<Expression> {
        let token = self.cur.clone();
        let mut pairs = Vec::new();
        while !self.peek_is(TokenKind::RBrace) {
            self.next_token();
            let key = self.parse_expression(Precedence::Lowest)?;
            if !self.expect_peek(TokenKind::Colon) {
                return None;
            }
            self.next_token();
            let value = self.parse_expression(Precedence::Lowest)?;
            pairs.push((key, value));
            if !self.peek_is(TokenKind::RBrace) && !self.peek_is(TokenKind::Comma) {
                self.error(format!(
                    "invalid token. expected: {} or {} - got: {}",
                    TokenKind::Comma,
                    TokenKind::RBrace,
                    self.peek.kind
                ));
                return None;
            }
            if self.peek_is(TokenKind::Comma) {
                self.next_token();
            }
        }
        self.next_token();
        Some(Expression::Map { token, pairs })
    }

    fn parse_if_expression(&mut self) -> Option<Expression> {
        let token = self.cur.clone();
        self.next_token();
        let condition = Box::new(self.parse_expression(Precedence::Lowest)?);
        if !self.expect_peek(TokenKind::LBrace) {
            return None;
        }
        let consequence = self.parse_block_statement();

        let mut alternative = None;
        if self.peek_is(TokenKind::Else) {
            self.next_token();
            if !self.expect_peek(TokenKind::LBrace) {
                return None;
            }
            alternative = Some(self.parse_block_statement());
        }

        Some(Expression::If {
            token,
            condition,
            consequence,
            alternative,
        })
    }

    fn parse_while_expression(&mut self) -> Option<Expression> {
        let token = self.cur.clone();
        self.next_token();
        let condition = Box::new(self.parse_expression(Precedence::Lowest)?);
        if !self.expect_peek(TokenKind::LBrace) {
            return None;
        }
        let body = self.parse_block_statement();
        Some(Expression::While { token, condition, body })
    }

    /// `for <init>; <cond>; <post> { body }` where `<init>` is a `let`/`:=`/`=`
    /// statement (with its semicolon) and `<post>` is a `:=`/`=` statement
    /// without one.
    fn parse_for_expression(&mut self) -> Option<Expression> {
        let token = self.cur.clone();
        self.next_token();
        let init = Box::new(self.parse_for_init()?);
        self.next_token();
        let condition = Box::new(self.parse_expression(Precedence::Lowest)?);
        if !self.expect_peek(TokenKind::Semicolon) {
            return None;
        }
        self.next_token();
        let post = Box::new(self.parse_for_post()?);
        if !self.expect_peek(TokenKind::LBrace) {
            return None;
        }
        let body = self.parse_block_statement();
        Some(Expression::For {
            token,
            init,
            condition,
            post,
            body,
        })
    }

    fn parse_for_init(&mut self) -> Option<Statement> {
        match self.cur.kind {
            TokenKind::Let => self.parse_let_statement(),
            TokenKind::Ident if self.peek_is(TokenKind::Define) => self.parse_define_statement(true),
            TokenKind::Ident if self.peek_is(TokenKind::Assign) => self.parse_reassign_statement(true),
            kind => {
                self.error(format!("invalid for-loop initializer starting with: {kind}"));
                None
            }
        }
    }

    fn parse_for_post(&mut self) -> Option<Statement> {
        match self.cur.kind {
            TokenKind::Ident if self.peek_is(TokenKind::Define) => self.parse_define_statement(false),
            TokenKind::Ident if self.peek_is(TokenKind::Assign) => self.parse_reassign_statement(false),
            kind => {
                self.error(format!("invalid for-loop post statement starting with: {kind}"));
                None
            }
        }
    }

    fn parse_function_literal(&mut self, name: Option<String>) -> Option<FunctionLiteral> {
        let token = self.cur.clone();
        if !self.expect_peek(TokenKind::LParen) {
            return None;
        }
        let parameters = self.parse_function_parameters()?;
        if !self.expect_peek(TokenKind::LBrace) {
            return None;
        }
        let body = self.parse_block_statement();
        Some(FunctionLiteral {
            token,
            name,
            parameters,
            body,
        })
    }

    fn parse_function_parameters(&mut self) -> Option<Vec<Identifier>> {
        let mut parameters = Vec::new();
        if self.peek_is(TokenKind::RParen) {
            self.next_token();
            return Some(parameters);
        }

        self.next_token();
        parameters.push(self.expect_cur_identifier()?);
        while self.peek_is(TokenKind::Comma) {
            self.next_token();
            self.next_token();
            parameters.push(self.expect_cur_identifier()?);
        }

        if !self.expect_peek(TokenKind::RParen) {
            return None;
        }
        Some(parameters)
    }

    fn parse_call_expression(&mut self, function: Expression) -> Option<Expression> {
        let token = self.cur.clone();
        let arguments = self.parse_expression_list(TokenKind::RParen)?;
        Some(Expression::Call {
            token,
            function: Box::new(function),
            arguments,
        })
    }

    fn parse_index_expression(&mut self, left: Expression) -> Option<Expression> {
        let token = self.cur.clone();
        self.next_token();
        let index = Box::new(self.parse_expression(Precedence::Lowest)?);
        if !self.expect_peek(TokenKind::RBracket) {
            return None;
        }
        Some(Expression::Index {
            token,
            left: Box::new(left),
            index,
        })
    }

    fn parse_expression_list(&mut self, end: TokenKind) -> Option<Vec<Expression>> {
        let mut list = Vec::new();
        self.next_token();
        if self.cur_is(end) || self.cur_is(TokenKind::Eof) {
            return Some(list);
        }
        list.push(self.parse_expression(Precedence::Lowest)?);
        while self.peek_is(TokenKind::Comma) {
            self.next_token();
            self.next_token();
            list.push(self.parse_expression(Precedence::Lowest)?);
        }
        if !self.expect_peek(end) {
            return None;
        }
        Some(list)
    }

    /// The current token as an [`Identifier`]. Only call when the current
    /// token is known to be an identifier.
    fn cur_identifier(&self) -> Identifier {
        Identifier {
            token: self.cur.clone(),
            value: self.cur.literal.clone(),
        }
    }

    fn expect_cur_identifier(&mut self) -> Option<Identifier> {
        if self.cur_is(TokenKind::Ident) {
            Some(self.cur_identifier())
        } else {
            let kind = self.cur.kind;
            self.error(format!("invalid function parameter. expected: IDENT - got: {kind}"));
            None
        }
    }
}
