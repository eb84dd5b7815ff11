//! Abstract Syntax Tree definitions for rill
//!
//! The parser produces these nodes; the compiler consumes them without
//! mutation. `Literal` doubles as the runtime value the VM moves between
//! registers, which is why it lives here next to the literal expression
//! node, exactly as the artifact format expects it.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::number::Number;
use crate::token::Span;
use crate::types::Type;
use crate::vm::FrameRef;

/// A runtime value. Cloning is deep for arrays and maps, so a copy can
/// never mutate the original through the copy. Function references are a
/// compiled name plus, at runtime only, the frame captured at the point of
/// definition; the captured frame is never serialized.
#[derive(Clone, Serialize, Deserialize)]
pub enum Literal {
    Number(Number),
    Str(String),
    Bool(bool),
    Char(char),

    /// Uniform array of the element type `kind`.
    Array { kind: Type, elements: Vec<Literal> },

    /// String-keyed map with values of the element type `kind`.
    Map {
        kind: Type,
        entries: BTreeMap<String, Literal>,
    },

    /// Reference to a compiled function by its unique name.
    Func {
        kind: Type,
        unique_name: String,
        #[serde(skip)]
        parent: Option<FrameRef>,
    },

    /// A package's exported surface materialized as a value.
    Interface {
        kind: Type,
        members: BTreeMap<String, Literal>,
    },
}

impl Literal {
    pub fn number(s: &str) -> Literal {
        Literal::Number(Number::new(s))
    }

    pub fn string(s: impl Into<String>) -> Literal {
        Literal::Str(s.into())
    }

    pub fn func_ref(kind: Type, unique_name: impl Into<String>) -> Literal {
        Literal::Func {
            kind,
            unique_name: unique_name.into(),
            parent: None,
        }
    }

    /// The type of this value.
    pub fn kind(&self) -> Type {
        match self {
            Literal::Number(_) => Type::Number,
            Literal::Str(_) => Type::String,
            Literal::Bool(_) => Type::Bool,
            Literal::Char(_) => Type::Char,
            Literal::Array { kind, .. } => Type::array(kind.clone()),
            Literal::Map { kind, .. } => Type::map(kind.clone()),
            Literal::Func { kind, .. } => kind.clone(),
            Literal::Interface { kind, .. } => kind.clone(),
        }
    }
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::Number(n) => write!(f, "{}", n),
            Literal::Str(s) => write!(f, "{}", s),
            Literal::Bool(b) => write!(f, "{}", b),
            Literal::Char(c) => write!(f, "{}", c),
            Literal::Array { elements, .. } => {
                let parts: Vec<String> = elements.iter().map(Literal::to_string).collect();
                write!(f, "[{}]", parts.join(", "))
            }
            Literal::Map { entries, .. } => {
                let parts: Vec<String> =
                    entries.iter().map(|(k, v)| format!("{}: {}", k, v)).collect();
                write!(f, "{{{}}}", parts.join(", "))
            }
            Literal::Func { unique_name, .. } => write!(f, "<func {}>", unique_name),
            Literal::Interface { kind, .. } => write!(f, "<package {}>", kind),
        }
    }
}

impl fmt::Debug for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self)
    }
}

// Captured frames are identity, not value; equality ignores them.
impl PartialEq for Literal {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Literal::Number(a), Literal::Number(b)) => a == b,
            (Literal::Str(a), Literal::Str(b)) => a == b,
            (Literal::Bool(a), Literal::Bool(b)) => a == b,
            (Literal::Char(a), Literal::Char(b)) => a == b,
            (
                Literal::Array { kind: ak, elements: ae },
                Literal::Array { kind: bk, elements: be },
            ) => ak == bk && ae == be,
            (
                Literal::Map { kind: ak, entries: ae },
                Literal::Map { kind: bk, entries: be },
            ) => ak == bk && ae == be,
            (
                Literal::Func { kind: ak, unique_name: an, .. },
                Literal::Func { kind: bk, unique_name: bn, .. },
            ) => ak == bk && an == bn,
            (
                Literal::Interface { kind: ak, members: am },
                Literal::Interface { kind: bk, members: bm },
            ) => ak == bk && am == bm,
            _ => false,
        }
    }
}

/// A named, typed function argument.
#[derive(Debug, Clone, PartialEq)]
pub struct Argument {
    pub name: String,
    pub kind: Type,
}

/// A function declaration or literal.
#[derive(Debug, Clone, PartialEq)]
pub struct Func {
    /// Declared name; empty for anonymous function literals.
    pub name: String,
    pub arguments: Vec<Argument>,
    pub returns: Vec<Type>,
    pub statements: Vec<Stmt>,
    pub span: Span,
}

impl Func {
    /// The function's signature type.
    pub fn kind(&self) -> Type {
        Type::func(
            self.arguments.iter().map(|a| a.kind.clone()).collect(),
            self.returns.clone(),
        )
    }
}

/// A package-level constant declaration. Initializers are literals so the
/// compiler can copy the value into any referencing function.
#[derive(Debug, Clone, PartialEq)]
pub struct Constant {
    pub name: String,
    pub value: Literal,
    pub span: Span,
}

/// An import declaration.
#[derive(Debug, Clone, PartialEq)]
pub struct Import {
    pub path: String,
    pub span: Span,
}

/// A test declaration.
#[derive(Debug, Clone, PartialEq)]
pub struct Test {
    pub name: String,
    pub statements: Vec<Stmt>,
    pub span: Span,
}

/// One parsed source package.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SourceFile {
    pub imports: Vec<Import>,
    pub constants: Vec<Constant>,
    pub funcs: Vec<Func>,
    pub tests: Vec<Test>,
}

/// Statement nodes
#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    /// Expression evaluated for its effect, like a bare call.
    Expr { expr: Expr },

    /// `a = 1`, `a, b = f()`, `xs[0] = v`
    Assign {
        targets: Vec<AssignTarget>,
        values: Vec<Expr>,
        span: Span,
    },

    /// `return a, b`
    Return { values: Vec<Expr>, span: Span },

    /// `if cond { } else { }`; else-if chains nest in `else_branch`.
    If {
        condition: Expr,
        then_branch: Vec<Stmt>,
        else_branch: Vec<Stmt>,
        span: Span,
    },

    /// `for cond { }` or `for init; cond; post { }`
    For {
        init: Option<Box<Stmt>>,
        condition: Expr,
        post: Option<Box<Stmt>>,
        body: Vec<Stmt>,
        span: Span,
    },
}

/// Assignment destinations
#[derive(Debug, Clone, PartialEq)]
pub enum AssignTarget {
    Ident { name: String, span: Span },
    Index { container: Expr, key: Expr, span: Span },
}

/// Expression nodes
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// A literal value: 42, "hello", true, 'c'
    Literal { value: Literal, span: Span },

    /// Variable reference
    Ident { name: String, span: Span },

    /// Binary operation: a + b
    Binary {
        left: Box<Expr>,
        op: BinaryOp,
        right: Box<Expr>,
        span: Span,
    },

    /// Unary operation: -x, !b
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
        span: Span,
    },

    /// Call by name: f(x), pkg.F(x)
    Call {
        function: String,
        arguments: Vec<Expr>,
        span: Span,
    },

    /// Grouping: (expr)
    Group { expr: Box<Expr>, span: Span },

    /// Array constructor, optionally with a declared element type.
    Array {
        kind: Option<Type>,
        elements: Vec<Expr>,
        span: Span,
    },

    /// Map constructor, optionally with a declared element type.
    Map {
        kind: Option<Type>,
        elements: Vec<(Expr, Expr)>,
        span: Span,
    },

    /// Function literal (closure definition).
    Func { func: Box<Func>, span: Span },

    /// Indexing or member access: xs[i], m["k"], pkg.Name
    Key {
        container: Box<Expr>,
        key: Box<Expr>,
        span: Span,
    },

    /// String interpolation: "n = {n}"
    Interpolate { parts: Vec<Expr>, span: Span },
}

impl Expr {
    pub fn span(&self) -> Span {
        match self {
            Expr::Literal { span, .. } => *span,
            Expr::Ident { span, .. } => *span,
            Expr::Binary { span, .. } => *span,
            Expr::Unary { span, .. } => *span,
            Expr::Call { span, .. } => *span,
            Expr::Group { span, .. } => *span,
            Expr::Array { span, .. } => *span,
            Expr::Map { span, .. } => *span,
            Expr::Func { span, .. } => *span,
            Expr::Key { span, .. } => *span,
            Expr::Interpolate { span, .. } => *span,
        }
    }
}

/// Binary operators
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BinaryOp {
    Add,       // +
    Sub,       // -
    Mul,       // *
    Div,       // /
    Rem,       // %
    Eq,        // ==
    Ne,        // !=
    Lt,        // <
    Le,        // <=
    Gt,        // >
    Ge,        // >=
    And,       // and
    Or,        // or
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BinaryOp::Add => write!(f, "+"),
            BinaryOp::Sub => write!(f, "-"),
            BinaryOp::Mul => write!(f, "*"),
            BinaryOp::Div => write!(f, "/"),
            BinaryOp::Rem => write!(f, "%"),
            BinaryOp::Eq => write!(f, "=="),
            BinaryOp::Ne => write!(f, "!="),
            BinaryOp::Lt => write!(f, "<"),
            BinaryOp::Le => write!(f, "<="),
            BinaryOp::Gt => write!(f, ">"),
            BinaryOp::Ge => write!(f, ">="),
            BinaryOp::And => write!(f, "and"),
            BinaryOp::Or => write!(f, "or"),
        }
    }
}

/// Unary operators
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UnaryOp {
    Neg, // -
    Not, // !
}

impl fmt::Display for UnaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnaryOp::Neg => write!(f, "-"),
            UnaryOp::Not => write!(f, "!"),
        }
    }
}
