//! Skein Shape - symbolic shape algebra.
//!
//! Tensor shapes are sequences of [`ShapeElem`]: a dimension that is either a
//! known integer/float or an unresolved named dimension. Every element also
//! carries a symbolic [`DimExpr`] tree describing how it was computed; the
//! tree is kept even when the numeric value is known so diagnostics can show
//! the derivation.
//!
//! The algebra is deliberately forgiving: an unknown dimension compares equal
//! to anything, and [`unify`] resolves conflicts by erasing confidence rather
//! than failing.

mod dim_expr;
mod elem;

pub use dim_expr::{simplify, DimBinOp, DimExpr, DimUnaryOp, DimValue};
pub use elem::{is_incomplete_shape, unify, unwrap_shape, wrap_shape, Shape, ShapeElem};
