//! AST for the restricted expression sublanguage.
//!
//! Expressions are deliberately small: literals, path references, arithmetic
//! and string concatenation, resolver calls and a handful of builtin helpers.
//! Nothing here ever executes host-language source.

use serde_json::Value;

/// A parsed template: literal text mixed with `${...}` interpolation spans.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Template {
    pub spans: Vec<Span>,
}

impl Template {
    /// The single expression of a bare template (`"${count}"` with no
    /// surrounding text), whose evaluation preserves the referenced value's
    /// original type instead of coercing to a string.
    pub fn as_bare(&self) -> Option<&Expr> {
        match self.spans.as_slice() {
            [Span::Expr(expr)] => Some(expr),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Span {
    Text(String),
    Expr(Expr),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
}

/// Builtin helpers recognized by bare name at call position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Builtin {
    Int,
    Float,
    Bool,
    Json,
    Fresh,
}

impl Builtin {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "int" => Some(Builtin::Int),
            "float" => Some(Builtin::Float),
            "bool" => Some(Builtin::Bool),
            "json" => Some(Builtin::Json),
            "fresh" => Some(Builtin::Fresh),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Builtin::Int => "int",
            Builtin::Float => "float",
            Builtin::Bool => "bool",
            Builtin::Json => "json",
            Builtin::Fresh => "fresh",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Expr {
    Literal(Value),
    /// Dotted property reference. Relative paths resolve against the
    /// expression key's parent; `$.`-prefixed paths against the root.
    Path {
        absolute: bool,
        segments: Vec<String>,
    },
    /// Coercion helper or forced-fresh marker, always unary.
    Builtin { builtin: Builtin, arg: Box<Expr> },
    /// Resolver call by dotted name.
    Call { name: String, args: Vec<Expr> },
    Neg(Box<Expr>),
    Binary {
        op: BinOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
}
