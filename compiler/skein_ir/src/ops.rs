//! Operator enums.
//!
//! Each operator family is a small closed enumeration; the evaluator
//! dispatches over these directly.

use std::fmt;

/// Binary arithmetic operators.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    FloorDiv,
    Mod,
}

impl BinOp {
    /// Source-level symbol, used in diagnostics and value names.
    pub const fn as_symbol(self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::FloorDiv => "//",
            BinOp::Mod => "%",
        }
    }
}

impl fmt::Display for BinOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_symbol())
    }
}

/// Unary operators.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub enum UnaryOp {
    Pos,
    Neg,
    Not,
}

impl UnaryOp {
    pub const fn as_symbol(self) -> &'static str {
        match self {
            UnaryOp::Pos => "+",
            UnaryOp::Neg => "-",
            UnaryOp::Not => "not",
        }
    }
}

/// Boolean (short-circuit) operators, evaluated as one multiary operation.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub enum BoolOpKind {
    And,
    Or,
}

impl BoolOpKind {
    pub const fn as_symbol(self) -> &'static str {
        match self {
            BoolOpKind::And => "and",
            BoolOpKind::Or => "or",
        }
    }
}

/// Comparison operators.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub enum CompareOp {
    Eq,
    NotEq,
    Is,
    IsNot,
    Gt,
    GtE,
    Lt,
    LtE,
    In,
    NotIn,
}

impl CompareOp {
    pub const fn as_symbol(self) -> &'static str {
        match self {
            CompareOp::Eq => "==",
            CompareOp::NotEq => "!=",
            CompareOp::Is => "is",
            CompareOp::IsNot => "is not",
            CompareOp::Gt => ">",
            CompareOp::GtE => ">=",
            CompareOp::Lt => "<",
            CompareOp::LtE => "<=",
            CompareOp::In => "in",
            CompareOp::NotIn => "not in",
        }
    }
}
