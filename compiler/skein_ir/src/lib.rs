//! Skein IR - syntax tree types for the skein tracer.
//!
//! This crate contains the input side of the tracer:
//! - `Name` interned identifiers and the `Interner`
//! - `LineInfo` source locations
//! - Operator enums (`BinOp`, `UnaryOp`, `BoolOpKind`, `CompareOp`)
//! - The closed syntax tree (`Module`, `ExprKind`, `StmtKind`, `FuncDef`)
//!   that an external parser/canonicalizer produces
//!
//! The tree is a closed tagged-variant type: every node kind the tracer
//! supports is a variant here, and the evaluator dispatches over it with
//! exhaustive pattern matching. Children are arena indices (`ExprId`,
//! `StmtId`) rather than boxes.
//!
//! The external parser is expected to have desugared early returns into a
//! single trailing `Return` per path before handing a `FuncDef` to the
//! evaluator.

mod ast;
mod interner;
mod line;
mod name;
mod ops;

pub use ast::{
    Expr, ExprId, ExprKind, FuncDef, FuncId, Module, ModuleBuilder, Number, Param, SliceDim, Stmt,
    StmtId, StmtKind, SubscriptKind, WithItem,
};
pub use interner::Interner;
pub use line::LineInfo;
pub use name::Name;
pub use ops::{BinOp, BoolOpKind, CompareOp, UnaryOp};
