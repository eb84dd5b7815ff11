//! Recursive-descent parser for the rill language
//!
//! Consumes the lexer's token stream and produces the AST the compiler
//! lowers. Statements are newline-separated. The parser guarantees
//! syntactic validity only; undefined names and type errors are the
//! compiler's responsibility.

use crate::ast::{
    Argument, AssignTarget, BinaryOp, Constant, Expr, Func, Import, Literal, SourceFile, Stmt,
    Test, UnaryOp,
};
use crate::error::{Error, ErrorKind, Result};
use crate::lexer::Lexer;
use crate::token::{Span, Token, TokenKind};
use crate::types::Type;

/// The parser state
pub struct Parser {
    tokens: Vec<Token>,
    current: usize,
}

impl Parser {
    pub fn new(tokens: Vec<Token>) -> Self {
        Self { tokens, current: 0 }
    }

    /// Parse one source package: imports, constants, functions, tests.
    pub fn parse(&mut self) -> Result<SourceFile> {
        let mut file = SourceFile::default();

        self.skip_newlines();
        while !self.check(&TokenKind::Eof) {
            match self.peek_kind() {
                TokenKind::Import => file.imports.push(self.parse_import()?),
                TokenKind::Func => file.funcs.push(self.parse_func()?),
                TokenKind::Test => file.tests.push(self.parse_test()?),
                TokenKind::Ident(_) => file.constants.push(self.parse_constant()?),
                other => {
                    return Err(Error::new(
                        ErrorKind::UnexpectedToken(other.to_string()),
                        Some(self.peek().span),
                    ));
                }
            }
            self.skip_newlines();
        }

        Ok(file)
    }

    /// Parse a single expression spanning the whole token stream. Used
    /// for the expression segments of interpolated strings.
    pub fn parse_standalone_expression(&mut self) -> Result<Expr> {
        self.skip_newlines();
        let expr = self.parse_expression()?;
        self.skip_newlines();
        if !self.check(&TokenKind::Eof) {
            return Err(Error::new(
                ErrorKind::UnexpectedToken(self.peek_kind().to_string()),
                Some(self.peek().span),
            ));
        }
        Ok(expr)
    }

    // ==================== Declarations ====================

    fn parse_import(&mut self) -> Result<Import> {
        let span = self.peek().span;
        self.advance(); // import

        match self.peek_kind().clone() {
            TokenKind::Str(path) => {
                self.advance();
                Ok(Import { path, span })
            }
            other => Err(Error::new(
                ErrorKind::ExpectedToken("import path".to_string(), format!("'{}'", other)),
                Some(self.peek().span),
            )),
        }
    }

    fn parse_constant(&mut self) -> Result<Constant> {
        let span = self.peek().span;
        let (name, _) = self.expect_ident()?;
        self.expect(TokenKind::Assign)?;
        let value = self.parse_literal_value(&name)?;

        // Anything after the literal on the same line means the
        // initializer was not a literal after all.
        if !self.check(&TokenKind::Newline) && !self.check(&TokenKind::Eof) {
            return Err(Error::new(ErrorKind::InvalidConstant(name), Some(span)));
        }
        Ok(Constant { name, value, span })
    }

    /// Constant initializers must be literals.
    fn parse_literal_value(&mut self, name: &str) -> Result<Literal> {
        let span = self.peek().span;
        match self.peek_kind().clone() {
            TokenKind::Number(lexeme) => {
                self.advance();
                Ok(Literal::number(&lexeme))
            }
            TokenKind::Minus => {
                self.advance();
                match self.peek_kind().clone() {
                    TokenKind::Number(lexeme) => {
                        self.advance();
                        Ok(Literal::number(&format!("-{}", lexeme)))
                    }
                    _ => Err(Error::new(
                        ErrorKind::InvalidConstant(name.to_string()),
                        Some(span),
                    )),
                }
            }
            TokenKind::Str(value) => {
                if value.contains('{') {
                    return Err(Error::new(
                        ErrorKind::InvalidConstant(name.to_string()),
                        Some(span),
                    ));
                }
                self.advance();
                Ok(Literal::string(value))
            }
            TokenKind::Character(c) => {
                self.advance();
                Ok(Literal::Char(c))
            }
            TokenKind::True => {
                self.advance();
                Ok(Literal::Bool(true))
            }
            TokenKind::False => {
                self.advance();
                Ok(Literal::Bool(false))
            }
            _ => Err(Error::new(ErrorKind::InvalidConstant(name.to_string()), Some(span))),
        }
    }

    /// `func Name(a number, b string) (number, number) { ... }`, or an
    /// anonymous `func (a number) number { ... }` literal.
    fn parse_func(&mut self) -> Result<Func> {
        let span = self.peek().span;
        self.advance(); // func

        let name = match self.peek_kind() {
            TokenKind::Ident(_) => self.expect_ident()?.0,
            _ => String::new(),
        };

        self.expect(TokenKind::LeftParen)?;
        let mut arguments = Vec::new();
        self.skip_newlines();
        while !self.check(&TokenKind::RightParen) {
            let (argument_name, _) = self.expect_ident()?;
            let kind = self.parse_type()?;
            arguments.push(Argument { name: argument_name, kind });

            self.skip_newlines();
            if !self.matches(&TokenKind::Comma) {
                break;
            }
            self.skip_newlines();
        }
        self.expect(TokenKind::RightParen)?;

        let returns = self.parse_return_types()?;
        let statements = self.parse_block()?;

        Ok(Func { name, arguments, returns, statements, span })
    }

    fn parse_return_types(&mut self) -> Result<Vec<Type>> {
        // `(a, b)` for multiple returns, a single type, or nothing
        // before the body.
        if self.check(&TokenKind::LeftParen) {
            self.advance();
            let mut returns = Vec::new();
            self.skip_newlines();
            while !self.check(&TokenKind::RightParen) {
                returns.push(self.parse_type()?);
                self.skip_newlines();
                if !self.matches(&TokenKind::Comma) {
                    break;
                }
                self.skip_newlines();
            }
            self.expect(TokenKind::RightParen)?;
            return Ok(returns);
        }

        if self.at_type_start() {
            return Ok(vec![self.parse_type()?]);
        }

        Ok(vec![])
    }

    /// Whether the upcoming tokens start a type, distinguishing a `{}T`
    /// map type from a `{` block.
    fn at_type_start(&self) -> bool {
        match self.peek_kind() {
            TokenKind::Ident(_) | TokenKind::Func => true,
            TokenKind::LeftBracket => {
                matches!(self.peek_kind_at(1), Some(TokenKind::RightBracket))
            }
            TokenKind::LeftBrace => {
                matches!(self.peek_kind_at(1), Some(TokenKind::RightBrace))
                    && self.type_starts_at(2)
            }
            _ => false,
        }
    }

    fn type_starts_at(&self, offset: usize) -> bool {
        matches!(
            self.peek_kind_at(offset),
            Some(TokenKind::Ident(_))
                | Some(TokenKind::Func)
                | Some(TokenKind::LeftBracket)
                | Some(TokenKind::LeftBrace),
        )
    }

    fn parse_type(&mut self) -> Result<Type> {
        let span = self.peek().span;
        match self.peek_kind().clone() {
            TokenKind::Ident(name) => {
                self.advance();
                match name.as_str() {
                    "number" => Ok(Type::Number),
                    "string" => Ok(Type::String),
                    "bool" => Ok(Type::Bool),
                    "char" => Ok(Type::Char),
                    _ => {
                        // A cross-package reference like `pkg.Name` stays
                        // unresolved until the importer's compile pass.
                        if self.matches(&TokenKind::Dot) {
                            let (member, _) = self.expect_ident()?;
                            Ok(Type::unresolved(format!("{}.{}", name, member)))
                        } else {
                            Ok(Type::unresolved(name))
                        }
                    }
                }
            }
            TokenKind::LeftBracket => {
                self.advance();
                self.expect(TokenKind::RightBracket)?;
                Ok(Type::array(self.parse_type()?))
            }
            TokenKind::LeftBrace => {
                self.advance();
                self.expect(TokenKind::RightBrace)?;
                Ok(Type::map(self.parse_type()?))
            }
            TokenKind::Func => {
                self.advance();
                self.expect(TokenKind::LeftParen)?;
                let mut arguments = Vec::new();
                while !self.check(&TokenKind::RightParen) {
                    arguments.push(self.parse_type()?);
                    if !self.matches(&TokenKind::Comma) {
                        break;
                    }
                }
                self.expect(TokenKind::RightParen)?;
                let returns = self.parse_return_types()?;
                Ok(Type::func(arguments, returns))
            }
            other => Err(Error::new(
                ErrorKind::ExpectedToken("type".to_string(), format!("'{}'", other)),
                Some(span),
            )),
        }
    }

    fn parse_test(&mut self) -> Result<Test> {
        let span = self.peek().span;
        self.advance(); // test

        let name = match self.peek_kind().clone() {
            TokenKind::Str(name) => {
                self.advance();
                name
            }
            other => {
                return Err(Error::new(
                    ErrorKind::ExpectedToken("test name".to_string(), format!("'{}'", other)),
                    Some(self.peek().span),
                ));
            }
        };

        let statements = self.parse_block()?;
        Ok(Test { name, statements, span })
    }

    // ==================== Statements ====================

    fn parse_block(&mut self) -> Result<Vec<Stmt>> {
        self.expect(TokenKind::LeftBrace)?;
        self.skip_newlines();

        let mut statements = Vec::new();
        while !self.check(&TokenKind::RightBrace) && !self.check(&TokenKind::Eof) {
            statements.push(self.parse_stmt()?);
            self.skip_newlines();
        }

        self.expect(TokenKind::RightBrace)?;
        Ok(statements)
    }

    fn parse_stmt(&mut self) -> Result<Stmt> {
        match self.peek_kind() {
            TokenKind::Return => {
                let span = self.peek().span;
                self.advance();

                let mut values = Vec::new();
                if !self.check(&TokenKind::Newline)
                    && !self.check(&TokenKind::RightBrace)
                    && !self.check(&TokenKind::Eof)
                {
                    values.push(self.parse_expression()?);
                    while self.matches(&TokenKind::Comma) {
                        self.skip_newlines();
                        values.push(self.parse_expression()?);
                    }
                }
                Ok(Stmt::Return { values, span })
            }
            TokenKind::If => self.parse_if(),
            TokenKind::For => self.parse_for(),
            _ => self.parse_simple_stmt(),
        }
    }

    /// An assignment or a bare expression; also the form allowed in a
    /// `for` clause.
    fn parse_simple_stmt(&mut self) -> Result<Stmt> {
        let span = self.peek().span;
        let expr = self.parse_expression()?;

        if !self.check(&TokenKind::Comma) && !self.check(&TokenKind::Assign) {
            return Ok(Stmt::Expr { expr });
        }

        let mut targets = vec![self.expr_to_target(expr)?];
        while self.matches(&TokenKind::Comma) {
            self.skip_newlines();
            let expr = self.parse_expression()?;
            targets.push(self.expr_to_target(expr)?);
        }

        self.expect(TokenKind::Assign)?;
        self.skip_newlines();

        let mut values = vec![self.parse_expression()?];
        while self.matches(&TokenKind::Comma) {
            self.skip_newlines();
            values.push(self.parse_expression()?);
        }

        Ok(Stmt::Assign { targets, values, span })
    }

    fn expr_to_target(&self, expr: Expr) -> Result<AssignTarget> {
        match expr {
            Expr::Ident { name, span } => Ok(AssignTarget::Ident { name, span }),
            Expr::Key { container, key, span } => Ok(AssignTarget::Index {
                container: *container,
                key: *key,
                span,
            }),
            other => Err(Error::new(
                ErrorKind::InvalidAssignmentTarget,
                Some(other.span()),
            )),
        }
    }

    fn parse_if(&mut self) -> Result<Stmt> {
        let span = self.peek().span;
        self.advance(); // if

        let condition = self.parse_expression()?;
        let then_branch = self.parse_block()?;

        let else_branch = if self.matches(&TokenKind::Else) {
            if self.check(&TokenKind::If) {
                vec![self.parse_if()?]
            } else {
                self.parse_block()?
            }
        } else {
            vec![]
        };

        Ok(Stmt::If { condition, then_branch, else_branch, span })
    }

    fn parse_for(&mut self) -> Result<Stmt> {
        let span = self.peek().span;
        self.advance(); // for

        let first = self.parse_simple_stmt()?;

        // `for init; cond; post { }` or `for cond { }`
        if self.matches(&TokenKind::Semicolon) {
            let condition = self.parse_expression()?;
            self.expect(TokenKind::Semicolon)?;
            let post = self.parse_simple_stmt()?;
            let body = self.parse_block()?;
            return Ok(Stmt::For {
                init: Some(Box::new(first)),
                condition,
                post: Some(Box::new(post)),
                body,
                span,
            });
        }

        let Stmt::Expr { expr: condition } = first else {
            return Err(Error::new(
                ErrorKind::ExpectedExpression("assignment".to_string()),
                Some(span),
            ));
        };
        let body = self.parse_block()?;
        Ok(Stmt::For { init: None, condition, post: None, body, span })
    }

    // ==================== Expressions ====================

    fn parse_expression(&mut self) -> Result<Expr> {
        self.parse_or()
    }

    fn parse_or(&mut self) -> Result<Expr> {
        let mut left = self.parse_and()?;
        while self.check(&TokenKind::Or) {
            let span = self.peek().span;
            self.advance();
            let right = self.parse_and()?;
            left = Expr::Binary {
                left: Box::new(left),
                op: BinaryOp::Or,
                right: Box::new(right),
                span,
            };
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr> {
        let mut left = self.parse_equality()?;
        while self.check(&TokenKind::And) {
            let span = self.peek().span;
            self.advance();
            let right = self.parse_equality()?;
            left = Expr::Binary {
                left: Box::new(left),
                op: BinaryOp::And,
                right: Box::new(right),
                span,
            };
        }
        Ok(left)
    }

    fn parse_equality(&mut self) -> Result<Expr> {
        let mut left = self.parse_comparison()?;
        loop {
            let op = match self.peek_kind() {
                TokenKind::Equal => BinaryOp::Eq,
                TokenKind::NotEqual => BinaryOp::Ne,
                _ => break,
            };
            let span = self.peek().span;
            self.advance();
            let right = self.parse_comparison()?;
            left = Expr::Binary { left: Box::new(left), op, right: Box::new(right), span };
        }
        Ok(left)
    }

    fn parse_comparison(&mut self) -> Result<Expr> {
        let mut left = self.parse_term()?;
        loop {
            let op = match self.peek_kind() {
                TokenKind::Less => BinaryOp::Lt,
                TokenKind::LessEqual => BinaryOp::Le,
                TokenKind::Greater => BinaryOp::Gt,
                TokenKind::GreaterEqual => BinaryOp::Ge,
                _ => break,
            };
            let span = self.peek().span;
            self.advance();
            let right = self.parse_term()?;
            left = Expr::Binary { left: Box::new(left), op, right: Box::new(right), span };
        }
        Ok(left)
    }

    fn parse_term(&mut self) -> Result<Expr> {
        let mut left = self.parse_factor()?;
        loop {
            let op = match self.peek_kind() {
                TokenKind::Plus => BinaryOp::Add,
                TokenKind::Minus => BinaryOp::Sub,
                _ => break,
            };
            let span = self.peek().span;
            self.advance();
            let right = self.parse_factor()?;
            left = Expr::Binary { left: Box::new(left), op, right: Box::new(right), span };
        }
        Ok(left)
    }

    fn parse_factor(&mut self) -> Result<Expr> {
        let mut left = self.parse_unary()?;
        loop {
            let op = match self.peek_kind() {
                TokenKind::Star => BinaryOp::Mul,
                TokenKind::Slash => BinaryOp::Div,
                TokenKind::Percent => BinaryOp::Rem,
                _ => break,
            };
            let span = self.peek().span;
            self.advance();
            let right = self.parse_unary()?;
            left = Expr::Binary { left: Box::new(left), op, right: Box::new(right), span };
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expr> {
        let span = self.peek().span;
        let op = match self.peek_kind() {
            TokenKind::Minus => UnaryOp::Neg,
            TokenKind::Bang => UnaryOp::Not,
            _ => return self.parse_postfix(),
        };
        self.advance();
        let operand = self.parse_unary()?;
        Ok(Expr::Unary { op, operand: Box::new(operand), span })
    }

    fn parse_postfix(&mut self) -> Result<Expr> {
        let mut expr = self.parse_primary()?;

        while self.check(&TokenKind::LeftBracket) {
            let span = self.peek().span;
            self.advance();
            self.skip_newlines();
            let key = self.parse_expression()?;
            self.skip_newlines();
            self.expect(TokenKind::RightBracket)?;
            expr = Expr::Key { container: Box::new(expr), key: Box::new(key), span };
        }

        Ok(expr)
    }

    fn parse_primary(&mut self) -> Result<Expr> {
        let span = self.peek().span;

        match self.peek_kind().clone() {
            TokenKind::Number(lexeme) => {
                self.advance();
                Ok(Expr::Literal { value: Literal::number(&lexeme), span })
            }
            TokenKind::Str(value) => {
                self.advance();
                string_expr(&value, span)
            }
            TokenKind::Character(c) => {
                self.advance();
                Ok(Expr::Literal { value: Literal::Char(c), span })
            }
            TokenKind::True => {
                self.advance();
                Ok(Expr::Literal { value: Literal::Bool(true), span })
            }
            TokenKind::False => {
                self.advance();
                Ok(Expr::Literal { value: Literal::Bool(false), span })
            }

            TokenKind::Ident(name) => {
                self.advance();

                // Package member access or member call: `pkg.Name`.
                if self.check(&TokenKind::Dot) {
                    self.advance();
                    let (member, member_span) = self.expect_ident()?;
                    let full = format!("{}.{}", name, member);
                    if self.check(&TokenKind::LeftParen) {
                        let arguments = self.parse_call_arguments()?;
                        return Ok(Expr::Call { function: full, arguments, span });
                    }
                    return Ok(Expr::Key {
                        container: Box::new(Expr::Ident { name, span }),
                        key: Box::new(Expr::Literal {
                            value: Literal::string(member),
                            span: member_span,
                        }),
                        span,
                    });
                }

                if self.check(&TokenKind::LeftParen) {
                    let arguments = self.parse_call_arguments()?;
                    return Ok(Expr::Call { function: name, arguments, span });
                }

                Ok(Expr::Ident { name, span })
            }

            TokenKind::LeftParen => {
                self.advance();
                self.skip_newlines();
                let expr = self.parse_expression()?;
                self.skip_newlines();
                self.expect(TokenKind::RightParen)?;
                Ok(Expr::Group { expr: Box::new(expr), span })
            }

            TokenKind::LeftBracket => self.parse_array(span),
            TokenKind::LeftBrace => self.parse_map(span),

            TokenKind::Func => {
                let func = self.parse_func()?;
                Ok(Expr::Func { func: Box::new(func), span })
            }

            other => Err(Error::new(
                ErrorKind::ExpectedExpression(format!("'{}'", other)),
                Some(span),
            )),
        }
    }

    fn parse_call_arguments(&mut self) -> Result<Vec<Expr>> {
        self.expect(TokenKind::LeftParen)?;
        self.skip_newlines();

        let mut arguments = Vec::new();
        while !self.check(&TokenKind::RightParen) {
            arguments.push(self.parse_expression()?);
            self.skip_newlines();
            if !self.matches(&TokenKind::Comma) {
                break;
            }
            self.skip_newlines();
        }

        self.expect(TokenKind::RightParen)?;
        Ok(arguments)
    }

    /// `[1, 2]`, or with a declared element type: `[]number [1, 2]`.
    /// A bare `[]` stays untyped and empty for the compiler to reject.
    fn parse_array(&mut self, span: Span) -> Result<Expr> {
        self.advance(); // [

        if self.check(&TokenKind::RightBracket) {
            self.advance();
            if !self.at_type_start() {
                return Ok(Expr::Array { kind: None, elements: vec![], span });
            }
            let kind = self.parse_type()?;
            self.expect(TokenKind::LeftBracket)?;
            let elements = self.parse_array_elements()?;
            return Ok(Expr::Array { kind: Some(kind), elements, span });
        }

        let elements = self.parse_array_elements()?;
        Ok(Expr::Array { kind: None, elements, span })
    }

    fn parse_array_elements(&mut self) -> Result<Vec<Expr>> {
        self.skip_newlines();
        let mut elements = Vec::new();
        while !self.check(&TokenKind::RightBracket) {
            elements.push(self.parse_expression()?);
            self.skip_newlines();
            if !self.matches(&TokenKind::Comma) {
                break;
            }
            self.skip_newlines();
        }
        self.expect(TokenKind::RightBracket)?;
        Ok(elements)
    }

    /// `{"a": 1}`, or with a declared element type: `{}number {"a": 1}`.
    fn parse_map(&mut self, span: Span) -> Result<Expr> {
        self.advance(); // {

        if self.check(&TokenKind::RightBrace) {
            self.advance();
            if !self.at_type_start() {
                return Ok(Expr::Map { kind: None, elements: vec![], span });
            }
            let kind = self.parse_type()?;
            self.expect(TokenKind::LeftBrace)?;
            let elements = self.parse_map_elements()?;
            return Ok(Expr::Map { kind: Some(kind), elements, span });
        }

        let elements = self.parse_map_elements()?;
        Ok(Expr::Map { kind: None, elements, span })
    }

    fn parse_map_elements(&mut self) -> Result<Vec<(Expr, Expr)>> {
        self.skip_newlines();
        let mut elements = Vec::new();
        while !self.check(&TokenKind::RightBrace) {
            let key = self.parse_expression()?;
            self.expect(TokenKind::Colon)?;
            self.skip_newlines();
            let value = self.parse_expression()?;
            elements.push((key, value));

            self.skip_newlines();
            if !self.matches(&TokenKind::Comma) {
                break;
            }
            self.skip_newlines();
        }
        self.expect(TokenKind::RightBrace)?;
        Ok(elements)
    }

    // ==================== Helpers ====================

    fn peek(&self) -> &Token {
        &self.tokens[self.current.min(self.tokens.len() - 1)]
    }

    fn peek_kind(&self) -> &TokenKind {
        &self.peek().kind
    }

    fn peek_kind_at(&self, offset: usize) -> Option<&TokenKind> {
        self.tokens.get(self.current + offset).map(|t| &t.kind)
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if self.current < self.tokens.len() - 1 {
            self.current += 1;
        }
        token
    }

    fn check(&self, kind: &TokenKind) -> bool {
        self.peek_kind() == kind
    }

    fn matches(&mut self, kind: &TokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            return true;
        }
        false
    }

    fn expect(&mut self, kind: TokenKind) -> Result<Token> {
        if self.check(&kind) {
            return Ok(self.advance());
        }
        Err(Error::new(
            ErrorKind::ExpectedToken(
                format!("'{}'", kind),
                format!("'{}'", self.peek_kind()),
            ),
            Some(self.peek().span),
        ))
    }

    fn expect_ident(&mut self) -> Result<(String, Span)> {
        let span = self.peek().span;
        match self.peek_kind().clone() {
            TokenKind::Ident(name) => {
                self.advance();
                Ok((name, span))
            }
            other => Err(Error::new(
                ErrorKind::ExpectedToken("identifier".to_string(), format!("'{}'", other)),
                Some(span),
            )),
        }
    }

    fn skip_newlines(&mut self) {
        while self.check(&TokenKind::Newline) {
            self.advance();
        }
    }
}

/// Split a string literal into an interpolation node when it contains
/// `{...}` segments; each segment is sub-parsed as an expression.
fn string_expr(raw: &str, span: Span) -> Result<Expr> {
    if !raw.contains('{') {
        return Ok(Expr::Literal { value: Literal::string(raw), span });
    }

    let mut parts = Vec::new();
    let mut text = String::new();
    let mut chars = raw.chars();

    while let Some(c) = chars.next() {
        if c != '{' {
            text.push(c);
            continue;
        }

        if !text.is_empty() {
            parts.push(Expr::Literal { value: Literal::string(text.clone()), span });
            text.clear();
        }

        let mut inner = String::new();
        let mut depth = 1;
        loop {
            match chars.next() {
                Some('{') => {
                    depth += 1;
                    inner.push('{');
                }
                Some('}') => {
                    depth -= 1;
                    if depth == 0 {
                        break;
                    }
                    inner.push('}');
                }
                Some(c) => inner.push(c),
                None => {
                    return Err(Error::new(ErrorKind::UnterminatedInterpolation, Some(span)));
                }
            }
        }

        let tokens = Lexer::new(&inner).tokenize()?;
        parts.push(Parser::new(tokens).parse_standalone_expression()?);
    }

    if !text.is_empty() {
        parts.push(Expr::Literal { value: Literal::string(text), span });
    }

    Ok(Expr::Interpolate { parts, span })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_source(source: &str) -> Result<SourceFile> {
        let tokens = Lexer::new(source).tokenize()?;
        Parser::new(tokens).parse()
    }

    fn parse_error(source: &str) -> String {
        parse_source(source).unwrap_err().kind.to_string()
    }

    #[test]
    fn test_empty_func() {
        let file = parse_source("func main() {\n}").expect("parse failed");
        assert_eq!(file.funcs.len(), 1);
        assert_eq!(file.funcs[0].name, "main");
        assert!(file.funcs[0].statements.is_empty());
    }

    #[test]
    fn test_hello_world() {
        let file = parse_source("func main() {print(\"hello world\")}").expect("parse failed");
        let Stmt::Expr { expr: Expr::Call { function, arguments, .. } } =
            &file.funcs[0].statements[0]
        else {
            panic!("expected a call statement");
        };
        assert_eq!(function, "print");
        assert_eq!(arguments.len(), 1);
        assert!(matches!(
            &arguments[0],
            Expr::Literal { value: Literal::Str(s), .. } if s == "hello world",
        ));
    }

    #[test]
    fn test_missing_func_name() {
        assert_eq!(parse_error("func)"), "expecting '(' but found ')'");
    }

    #[test]
    fn test_missing_body() {
        assert_eq!(parse_error("func main ()"), "expecting '{' but found 'end of file'");
    }

    #[test]
    fn test_binary_precedence() {
        let file = parse_source("func main() {\n    x = 1 * 2 - 3\n}").expect("parse failed");
        let Stmt::Assign { values, .. } = &file.funcs[0].statements[0] else {
            panic!("expected assignment");
        };
        // (1 * 2) - 3: multiplication binds tighter.
        let Expr::Binary { left, op: BinaryOp::Sub, .. } = &values[0] else {
            panic!("expected subtraction at the top");
        };
        assert!(matches!(**left, Expr::Binary { op: BinaryOp::Mul, .. }));
    }

    #[test]
    fn test_multi_assign() {
        let file = parse_source("func main() {\n    a, b = 123, \"foo\"\n}").expect("parse failed");
        let Stmt::Assign { targets, values, .. } = &file.funcs[0].statements[0] else {
            panic!("expected assignment");
        };
        assert_eq!(targets.len(), 2);
        assert_eq!(values.len(), 2);
        assert!(matches!(&targets[0], AssignTarget::Ident { name, .. } if name == "a"));
    }

    #[test]
    fn test_index_assignment_target() {
        let file = parse_source("func main() {\n    xs[0] = 5\n}").expect("parse failed");
        let Stmt::Assign { targets, .. } = &file.funcs[0].statements[0] else {
            panic!("expected assignment");
        };
        assert!(matches!(&targets[0], AssignTarget::Index { .. }));
    }

    #[test]
    fn test_invalid_assignment_target() {
        assert_eq!(parse_error("func main() {\n    1 = 2\n}"), "invalid assignment target");
    }

    #[test]
    fn test_signature_with_returns() {
        let file = parse_source("func pair(a number, b string) (number, string) {\n}")
            .expect("parse failed");
        let func = &file.funcs[0];
        assert_eq!(func.arguments.len(), 2);
        assert_eq!(func.arguments[0].kind, Type::Number);
        assert_eq!(func.returns, vec![Type::Number, Type::String]);
    }

    #[test]
    fn test_cross_package_type_stays_unresolved() {
        let file = parse_source("func apply(f lib.Greet) string {\n}").expect("parse failed");
        assert_eq!(
            file.funcs[0].arguments[0].kind,
            Type::unresolved("lib.Greet"),
        );
    }

    #[test]
    fn test_typed_and_untyped_containers() {
        let file = parse_source(
            "func main() {\n    a = [1, 2]\n    b = []number []\n    c = {\"k\": 1}\n    d = {}string {}\n}",
        )
        .expect("parse failed");
        let stmts = &file.funcs[0].statements;

        let Stmt::Assign { values, .. } = &stmts[0] else { panic!() };
        assert!(matches!(&values[0], Expr::Array { kind: None, elements, .. } if elements.len() == 2));

        let Stmt::Assign { values, .. } = &stmts[1] else { panic!() };
        assert!(matches!(&values[0], Expr::Array { kind: Some(Type::Number), elements, .. } if elements.is_empty()));

        let Stmt::Assign { values, .. } = &stmts[2] else { panic!() };
        assert!(matches!(&values[0], Expr::Map { kind: None, elements, .. } if elements.len() == 1));

        let Stmt::Assign { values, .. } = &stmts[3] else { panic!() };
        assert!(matches!(&values[0], Expr::Map { kind: Some(Type::String), elements, .. } if elements.is_empty()));
    }

    #[test]
    fn test_imports_constants_tests() {
        let file = parse_source(
            "import \"demo/util\"\n\nLimit = 10\n\ntest \"adds\" {\n    assert(1 + 1 == 2)\n}",
        )
        .expect("parse failed");
        assert_eq!(file.imports[0].path, "demo/util");
        assert_eq!(file.constants[0].name, "Limit");
        assert_eq!(file.constants[0].value, Literal::number("10"));
        assert_eq!(file.tests[0].name, "adds");
    }

    #[test]
    fn test_constant_must_be_literal() {
        assert_eq!(
            parse_error("Limit = 1 + 2"),
            "constant 'Limit' must be initialized with a literal",
        );
    }

    #[test]
    fn test_function_literal() {
        let file = parse_source("func main() {\n    f = func (x number) number {\n        return x\n    }\n}")
            .expect("parse failed");
        let Stmt::Assign { values, .. } = &file.funcs[0].statements[0] else { panic!() };
        let Expr::Func { func, .. } = &values[0] else { panic!("expected function literal") };
        assert!(func.name.is_empty());
        assert_eq!(func.arguments[0].name, "x");
    }

    #[test]
    fn test_interpolation_splits_parts() {
        let file = parse_source("func main() {\n    s = \"n = {n}!\"\n}").expect("parse failed");
        let Stmt::Assign { values, .. } = &file.funcs[0].statements[0] else { panic!() };
        let Expr::Interpolate { parts, .. } = &values[0] else {
            panic!("expected interpolation");
        };
        assert_eq!(parts.len(), 3);
        assert!(matches!(&parts[1], Expr::Ident { name, .. } if name == "n"));
    }

    #[test]
    fn test_unterminated_interpolation() {
        assert_eq!(
            parse_error("func main() {\n    s = \"n = {n\"\n}"),
            "unterminated interpolation in string",
        );
    }

    #[test]
    fn test_member_access_and_call() {
        let file = parse_source("func main() {\n    x = math.Pi\n    y = math.Abs(1)\n}")
            .expect("parse failed");
        let stmts = &file.funcs[0].statements;

        let Stmt::Assign { values, .. } = &stmts[0] else { panic!() };
        assert!(matches!(&values[0], Expr::Key { .. }));

        let Stmt::Assign { values, .. } = &stmts[1] else { panic!() };
        assert!(matches!(&values[0], Expr::Call { function, .. } if function == "math.Abs"));
    }

    #[test]
    fn test_for_forms() {
        let file = parse_source(
            "func main() {\n    for i = 0; i < 3; i = i + 1 {\n        print(i)\n    }\n    x = true\n    for x {\n        x = false\n    }\n}",
        )
        .expect("parse failed");
        let stmts = &file.funcs[0].statements;
        assert!(matches!(&stmts[0], Stmt::For { init: Some(_), post: Some(_), .. }));
        assert!(matches!(&stmts[2], Stmt::For { init: None, post: None, .. }));
    }

    #[test]
    fn test_if_else_chain() {
        let file = parse_source(
            "func main() {\n    if 1 < 2 {\n        print(\"a\")\n    } else if 2 < 3 {\n        print(\"b\")\n    } else {\n        print(\"c\")\n    }\n}",
        )
        .expect("parse failed");
        let Stmt::If { else_branch, .. } = &file.funcs[0].statements[0] else { panic!() };
        assert!(matches!(&else_branch[0], Stmt::If { .. }));
    }
}
