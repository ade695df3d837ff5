// ABOUTME: Expression tree types for the Calc language

use std::fmt;

/// Name given to the zero-argument wrapper around a top-level expression.
pub const ANONYMOUS_FUNCTION_NAME: &str = "__anon_expr";

/// A binary operator of the Calc language.
///
/// `Less` compares and widens the result back to a float, yielding 0.0 or
/// 1.0, so every operator maps doubles to a double.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Pow,
    Less,
}

impl BinaryOp {
    /// The operator as it is spelled in source.
    pub fn symbol(self) -> char {
        match self {
            BinaryOp::Add => '+',
            BinaryOp::Sub => '-',
            BinaryOp::Mul => '*',
            BinaryOp::Div => '/',
            BinaryOp::Pow => '^',
            BinaryOp::Less => '<',
        }
    }

    /// Maps an operator character to its operator, if it is one.
    pub fn from_char(c: char) -> Option<BinaryOp> {
        match c {
            '+' => Some(BinaryOp::Add),
            '-' => Some(BinaryOp::Sub),
            '*' => Some(BinaryOp::Mul),
            '/' => Some(BinaryOp::Div),
            '^' => Some(BinaryOp::Pow),
            '<' => Some(BinaryOp::Less),
            _ => None,
        }
    }
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.symbol())
    }
}

/// An expression node. Every child is owned exclusively by its parent;
/// `clone` deep-copies the whole subtree.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// A numeric literal.
    Number(f64),
    /// A reference to a named value (function parameter or loop variable).
    Variable(String),
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Call {
        callee: String,
        args: Vec<Expr>,
    },
    /// `if cond then a else b`; both branches are mandatory and produce
    /// the expression's value.
    If {
        cond: Box<Expr>,
        then_branch: Box<Expr>,
        else_branch: Box<Expr>,
    },
    /// `for var = start, end [, step] in body`; iterates while `end` is
    /// nonzero and always evaluates to 0.0.
    For {
        var: String,
        start: Box<Expr>,
        end: Box<Expr>,
        step: Option<Box<Expr>>,
        body: Box<Expr>,
    },
}

/// A function signature: its name and ordered formal parameter names.
#[derive(Debug, Clone, PartialEq)]
pub struct Prototype {
    pub name: String,
    pub params: Vec<String>,
}

impl Prototype {
    pub fn new(name: impl Into<String>, params: Vec<String>) -> Self {
        Prototype {
            name: name.into(),
            params,
        }
    }
}

/// A function definition: a prototype plus a body expression. The only
/// names visible in the body are the prototype's parameters (and any
/// `for` variables the body introduces).
#[derive(Debug, Clone, PartialEq)]
pub struct Function {
    pub prototype: Prototype,
    pub body: Expr,
}

impl Function {
    pub fn new(prototype: Prototype, body: Expr) -> Self {
        Function { prototype, body }
    }

    /// Wraps a bare expression in a zero-argument function the driver can
    /// install, invoke once, and discard.
    pub fn anonymous(body: Expr) -> Self {
        Function {
            prototype: Prototype::new(ANONYMOUS_FUNCTION_NAME, Vec::new()),
            body,
        }
    }

    #[allow(dead_code)]
    pub fn is_anonymous(&self) -> bool {
        self.prototype.name == ANONYMOUS_FUNCTION_NAME
    }
}
