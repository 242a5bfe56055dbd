//! Shape elements and sequence-level operations.

use std::fmt;
use std::ops::{Add, Div, Mul, Sub};

use smallvec::SmallVec;

use crate::dim_expr::{simplify, DimBinOp, DimExpr, DimUnaryOp, DimValue};

/// A tensor shape: a short sequence of dimensions.
pub type Shape = SmallVec<[ShapeElem; 4]>;

/// One symbolic dimension.
///
/// Carries the numeric value when known and always a (simplified) expression
/// tree describing the derivation. The tree survives even when the value is
/// known so mismatch diagnostics can print where a dimension came from.
#[derive(Clone, Debug)]
pub struct ShapeElem {
    value: Option<DimValue>,
    expr: DimExpr,
}

impl ShapeElem {
    /// A known dimension.
    pub fn known(value: impl Into<DimValue>) -> Self {
        let value = value.into();
        ShapeElem {
            value: Some(value),
            expr: DimExpr::Const(value),
        }
    }

    /// An unresolved named dimension.
    pub fn var(name: impl Into<String>) -> Self {
        ShapeElem {
            value: None,
            expr: DimExpr::Var(name.into()),
        }
    }

    /// A fully unknown dimension.
    pub fn unknown() -> Self {
        ShapeElem {
            value: None,
            expr: DimExpr::Var("?".to_owned()),
        }
    }

    pub fn has_value(&self) -> bool {
        self.value.is_some()
    }

    pub fn value(&self) -> Option<DimValue> {
        self.value
    }

    pub fn expr(&self) -> &DimExpr {
        &self.expr
    }

    /// Known integer payload, if this dimension is a known integer.
    pub fn as_int(&self) -> Option<i64> {
        match self.value {
            Some(DimValue::Int(n)) => Some(n),
            _ => None,
        }
    }

    fn binop(&self, other: &ShapeElem, op: DimBinOp) -> ShapeElem {
        let value = match (self.value, other.value) {
            (Some(a), Some(b)) => op.apply(a, b),
            _ => None,
        };
        let expr = simplify(DimExpr::binary(op, self.expr.clone(), other.expr.clone()));
        ShapeElem { value, expr }
    }

    fn unaryop(&self, op: DimUnaryOp) -> ShapeElem {
        // An unknown term stays as-is; applying the operator would not add
        // information and the original derivation is more readable.
        if self.value.is_none() {
            return self.clone();
        }
        let expr = simplify(DimExpr::unary(op, self.expr.clone()));
        ShapeElem {
            value: expr.try_eval(),
            expr,
        }
    }

    pub fn neg(&self) -> ShapeElem {
        self.unaryop(DimUnaryOp::Neg)
    }

    pub fn ceil(&self) -> ShapeElem {
        self.unaryop(DimUnaryOp::Ceil)
    }

    pub fn abs(&self) -> ShapeElem {
        self.unaryop(DimUnaryOp::Abs)
    }

    /// Ordering with the unknown-unifies policy: comparisons against an
    /// unknown dimension are trivially true and never cause a mismatch.
    pub fn lt(&self, other: &ShapeElem) -> bool {
        match (self.value, other.value) {
            (Some(a), Some(b)) => a.as_f64() < b.as_f64(),
            _ => true,
        }
    }

    pub fn gt(&self, other: &ShapeElem) -> bool {
        match (self.value, other.value) {
            (Some(a), Some(b)) => a.as_f64() > b.as_f64(),
            _ => true,
        }
    }

    fn clear_value(&mut self) {
        self.value = None;
    }

    fn inherit_value(&mut self, other: &ShapeElem) {
        if self.value.is_none() {
            self.value = other.value;
        }
    }
}

/// Equality with the unknown-unifies policy: an unknown dimension is equal
/// to anything.
impl PartialEq for ShapeElem {
    fn eq(&self, other: &Self) -> bool {
        match (self.value, other.value) {
            (Some(a), Some(b)) => a == b,
            _ => true,
        }
    }
}

impl PartialEq<i64> for ShapeElem {
    fn eq(&self, other: &i64) -> bool {
        match self.value {
            Some(v) => v == DimValue::Int(*other),
            None => true,
        }
    }
}

impl fmt::Display for ShapeElem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.value, &self.expr) {
            (Some(v), DimExpr::Const(_)) => write!(f, "{v}"),
            (Some(v), expr) => write!(f, "{v} ({expr})"),
            (None, expr) => write!(f, "? ({expr})"),
        }
    }
}

macro_rules! impl_shape_binop {
    ($trait:ident, $method:ident, $op:expr) => {
        impl $trait for &ShapeElem {
            type Output = ShapeElem;
            fn $method(self, rhs: &ShapeElem) -> ShapeElem {
                self.binop(rhs, $op)
            }
        }

        impl $trait<i64> for &ShapeElem {
            type Output = ShapeElem;
            fn $method(self, rhs: i64) -> ShapeElem {
                self.binop(&ShapeElem::known(rhs), $op)
            }
        }
    };
}

impl_shape_binop!(Add, add, DimBinOp::Add);
impl_shape_binop!(Sub, sub, DimBinOp::Sub);
impl_shape_binop!(Mul, mul, DimBinOp::Mul);
impl_shape_binop!(Div, div, DimBinOp::Div);

impl ShapeElem {
    pub fn floor_div(&self, other: &ShapeElem) -> ShapeElem {
        self.binop(other, DimBinOp::FloorDiv)
    }
}

/// Build a shape from plain integers and existing elements.
pub fn wrap_shape<I>(dims: I) -> Shape
where
    I: IntoIterator<Item = ShapeElem>,
{
    dims.into_iter().collect()
}

/// Collapse a shape to concrete integers, substituting 1 for unknowns.
pub fn unwrap_shape(shape: &[ShapeElem]) -> Vec<i64> {
    shape
        .iter()
        .map(|e| match e.value() {
            Some(DimValue::Int(n)) => n,
            Some(DimValue::Float(x)) => x as i64,
            None => 1,
        })
        .collect()
}

/// True if any dimension is unknown.
pub fn is_incomplete_shape(shape: &[ShapeElem]) -> bool {
    shape.iter().any(|e| !e.has_value())
}

/// Merge two shape sequences position-wise.
///
/// A conflict between two known dimensions erases both (confidence is lost
/// rather than raising); a known dimension propagates onto an unknown peer.
/// Unknown dimensions never become known through a conflict, so unification
/// is monotone in the amount of disagreement it tolerates.
pub fn unify(a: &mut [ShapeElem], b: &mut [ShapeElem]) {
    for (ea, eb) in a.iter_mut().zip(b.iter_mut()) {
        if let (Some(va), Some(vb)) = (ea.value(), eb.value()) {
            if va != vb {
                ea.clear_value();
                eb.clear_value();
                continue;
            }
        }
        if ea.value().is_none() {
            ea.inherit_value(eb);
        } else {
            eb.inherit_value(ea);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn known_arithmetic_folds_eagerly() {
        let a = ShapeElem::known(6);
        let b = ShapeElem::known(2);
        assert_eq!((&a + &b).as_int(), Some(8));
        assert_eq!((&a - &b).as_int(), Some(4));
        assert_eq!((&a * &b).as_int(), Some(12));
        assert_eq!(a.floor_div(&b).as_int(), Some(3));
    }

    #[test]
    fn true_division_produces_float() {
        let a = ShapeElem::known(7);
        let b = ShapeElem::known(2);
        assert_eq!((&a / &b).value(), Some(DimValue::Float(3.5)));
    }

    #[test]
    fn unknown_operand_keeps_expression_tree() {
        let x = ShapeElem::var("x");
        let sum = &x + 3;
        assert!(!sum.has_value());
        assert_eq!(sum.expr().to_string(), "x + 3");
    }

    #[test]
    fn identity_operations_simplify_to_the_variable() {
        let x = ShapeElem::var("x");
        assert_eq!((&x + 0).expr(), x.expr());
        assert_eq!((&x - 0).expr(), x.expr());
        assert_eq!((&x * 1).expr(), x.expr());
        assert_eq!((&x / 1).expr(), x.expr());
    }

    #[test]
    fn unknown_compares_equal_to_anything() {
        let x = ShapeElem::var("n");
        let known = ShapeElem::known(4);
        assert_eq!(x, known);
        assert_eq!(known, x);
        assert_eq!(x, 17);
        assert!(x.lt(&known));
        assert!(x.gt(&known));
    }

    #[test]
    fn known_dimensions_compare_by_value() {
        let a = ShapeElem::known(3);
        let b = ShapeElem::known(4);
        assert!(a != b);
        assert!(a.lt(&b));
        assert!(!a.gt(&b));
    }

    #[test]
    fn unify_conflict_erases_both() {
        let mut a = wrap_shape([ShapeElem::known(2), ShapeElem::known(3)]);
        let mut b = wrap_shape([ShapeElem::known(2), ShapeElem::known(5)]);
        unify(&mut a, &mut b);
        assert_eq!(a[0].as_int(), Some(2));
        assert!(!a[1].has_value());
        assert!(!b[1].has_value());
    }

    #[test]
    fn unify_propagates_known_onto_unknown() {
        let mut a = wrap_shape([ShapeElem::var("n")]);
        let mut b = wrap_shape([ShapeElem::known(8)]);
        unify(&mut a, &mut b);
        assert_eq!(a[0].as_int(), Some(8));
        assert_eq!(b[0].as_int(), Some(8));
    }

    #[test]
    fn unify_never_invents_values() {
        let mut a = wrap_shape([ShapeElem::var("n")]);
        let mut b = wrap_shape([ShapeElem::var("m")]);
        unify(&mut a, &mut b);
        assert!(!a[0].has_value());
        assert!(!b[0].has_value());
    }

    #[test]
    fn unwrap_substitutes_one_for_unknown() {
        let shape = wrap_shape([ShapeElem::known(3), ShapeElem::var("n")]);
        assert_eq!(unwrap_shape(&shape), vec![3, 1]);
        assert!(is_incomplete_shape(&shape));
    }
}
