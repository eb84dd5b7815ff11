//! Error types for the rill language
//!
//! Provides structured error handling with source locations. Compile-time
//! errors are collected into lists by the compiler; runtime errors abort the
//! current call chain.

use crate::token::Span;
use std::fmt;

/// Error kinds in rill
#[derive(Debug, Clone)]
pub enum ErrorKind {
    // Lexer errors
    UnexpectedCharacter(char),
    UnterminatedString,
    EmptyCharacter,

    // Parser errors
    UnexpectedToken(String),
    ExpectedToken(String, String),
    ExpectedExpression(String),
    InvalidAssignmentTarget,
    InvalidConstant(String),
    UnterminatedInterpolation,

    // Compile errors
    UndefinedVariable(String),
    UndefinedFunction(String),
    NotAFunction(String),
    WrongArity(String, usize, usize),
    UnresolvedType(String),
    MissingMember(String, String),
    MapKeyNotString(String),
    CannotInferType(String),
    InvalidOperands(String, String, String),
    CannotIndex(String),
    AssignmentMismatch(usize, usize),
    VoidExpression,

    // Runtime errors
    DivisionByZero,
    IndexOutOfRange(i64, usize),
    KeyNotFound(String),
    TypeMismatch(String, String),
    AssertionFailed,
    StackOverflow,
    RuntimeError(String),

    // Artifact store errors
    PackageNotFound(String),
    IncompatibleArtifact(u32, u32),
    Io(String),
    Encoding(String),
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::UnexpectedCharacter(c) => write!(f, "unexpected character '{}'", c),
            ErrorKind::UnterminatedString => write!(f, "unterminated string"),
            ErrorKind::EmptyCharacter => write!(f, "character literal cannot be empty"),
            ErrorKind::UnexpectedToken(t) => write!(f, "unexpected token '{}'", t),
            ErrorKind::ExpectedToken(expected, got) => {
                write!(f, "expecting {} but found {}", expected, got)
            }
            ErrorKind::ExpectedExpression(got) => {
                write!(f, "expecting expression but found {}", got)
            }
            ErrorKind::InvalidAssignmentTarget => write!(f, "invalid assignment target"),
            ErrorKind::InvalidConstant(name) => {
                write!(f, "constant '{}' must be initialized with a literal", name)
            }
            ErrorKind::UnterminatedInterpolation => {
                write!(f, "unterminated interpolation in string")
            }
            ErrorKind::UndefinedVariable(name) => write!(f, "undefined variable: {}", name),
            ErrorKind::UndefinedFunction(name) => write!(f, "undefined function: {}", name),
            ErrorKind::NotAFunction(name) => write!(f, "'{}' is not a function", name),
            ErrorKind::WrongArity(name, expected, got) => {
                write!(f, "{} expects {} arguments, got {}", name, expected, got)
            }
            ErrorKind::UnresolvedType(name) => write!(f, "unresolved type: {}", name),
            ErrorKind::MissingMember(package, member) => {
                write!(f, "{} does not export '{}'", package, member)
            }
            ErrorKind::MapKeyNotString(kind) => {
                write!(f, "map key must be a string, got {}", kind)
            }
            ErrorKind::CannotInferType(what) => {
                write!(f, "cannot infer element type of empty {}", what)
            }
            ErrorKind::InvalidOperands(op, left, right) => {
                write!(f, "invalid operands for {}: {} and {}", op, left, right)
            }
            ErrorKind::CannotIndex(kind) => write!(f, "cannot index value of type {}", kind),
            ErrorKind::AssignmentMismatch(targets, values) => {
                write!(f, "assignment mismatch: {} targets but {} values", targets, values)
            }
            ErrorKind::VoidExpression => write!(f, "expression has no value"),
            ErrorKind::DivisionByZero => write!(f, "division by zero"),
            ErrorKind::IndexOutOfRange(index, len) => {
                write!(f, "index {} out of range for length {}", index, len)
            }
            ErrorKind::KeyNotFound(key) => write!(f, "key not found: {}", key),
            ErrorKind::TypeMismatch(expected, got) => {
                write!(f, "type mismatch: expected {}, got {}", expected, got)
            }
            ErrorKind::AssertionFailed => write!(f, "assertion failed"),
            ErrorKind::StackOverflow => write!(f, "stack overflow"),
            ErrorKind::RuntimeError(msg) => write!(f, "{}", msg),
            ErrorKind::PackageNotFound(name) => write!(f, "package not found: {}", name),
            ErrorKind::IncompatibleArtifact(found, expected) => {
                write!(f, "incompatible artifact version {} (expected {})", found, expected)
            }
            ErrorKind::Io(msg) => write!(f, "io error: {}", msg),
            ErrorKind::Encoding(msg) => write!(f, "encoding error: {}", msg),
        }
    }
}

/// A rill error with location information
#[derive(Debug, Clone)]
pub struct Error {
    pub kind: ErrorKind,
    pub span: Option<Span>,
    pub source_line: Option<String>,
}

impl Error {
    pub fn new(kind: ErrorKind, span: Option<Span>) -> Self {
        Self {
            kind,
            span,
            source_line: None,
        }
    }

    pub fn with_source(mut self, source: &str) -> Self {
        if let Some(span) = &self.span {
            let lines: Vec<&str> = source.lines().collect();
            if span.line > 0 && span.line <= lines.len() {
                self.source_line = Some(lines[span.line - 1].to_string());
            }
        }
        self
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(span) = &self.span {
            write!(f, "[line {}:{}] error: {}", span.line, span.column, self.kind)?;

            if let Some(ref line) = self.source_line {
                write!(f, "\n  | {}", line)?;
                write!(f, "\n  | {}^", " ".repeat(span.column.saturating_sub(1)))?;
            }
        } else {
            write!(f, "error: {}", self.kind)?;
        }
        Ok(())
    }
}

impl std::error::Error for Error {}

/// Result type for rill operations
pub type Result<T> = std::result::Result<T, Error>;
