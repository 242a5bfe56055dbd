//! Symbolic dimension expressions and their simplifier.

use std::fmt;

/// Numeric payload of a known dimension.
#[derive(Copy, Clone, PartialEq, Debug)]
pub enum DimValue {
    Int(i64),
    Float(f64),
}

impl DimValue {
    pub fn as_f64(self) -> f64 {
        match self {
            DimValue::Int(n) => n as f64,
            DimValue::Float(x) => x,
        }
    }

    fn is_zero(self) -> bool {
        match self {
            DimValue::Int(n) => n == 0,
            DimValue::Float(x) => x == 0.0,
        }
    }

    fn is_one(self) -> bool {
        match self {
            DimValue::Int(n) => n == 1,
            DimValue::Float(x) => x == 1.0,
        }
    }

    fn is_negative(self) -> bool {
        match self {
            DimValue::Int(n) => n < 0,
            DimValue::Float(x) => x < 0.0,
        }
    }

    fn neg(self) -> DimValue {
        match self {
            DimValue::Int(n) => DimValue::Int(-n),
            DimValue::Float(x) => DimValue::Float(-x),
        }
    }
}

impl From<i64> for DimValue {
    fn from(n: i64) -> Self {
        DimValue::Int(n)
    }
}

impl From<f64> for DimValue {
    fn from(x: f64) -> Self {
        DimValue::Float(x)
    }
}

impl fmt::Display for DimValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DimValue::Int(n) => write!(f, "{n}"),
            DimValue::Float(x) => write!(f, "{x}"),
        }
    }
}

/// Binary operators over dimensions.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub enum DimBinOp {
    Add,
    Sub,
    Mul,
    Div,
    FloorDiv,
}

impl DimBinOp {
    /// Operator priority; same-priority chains are flattened by the
    /// simplifier. Matches the display precedence of the expressions.
    pub const fn priority(self) -> u8 {
        match self {
            DimBinOp::Add | DimBinOp::Sub => 4,
            DimBinOp::Mul | DimBinOp::Div | DimBinOp::FloorDiv => 5,
        }
    }

    pub const fn as_symbol(self) -> &'static str {
        match self {
            DimBinOp::Add => "+",
            DimBinOp::Sub => "-",
            DimBinOp::Mul => "*",
            DimBinOp::Div => "/",
            DimBinOp::FloorDiv => "//",
        }
    }

    pub(crate) fn apply(self, lhs: DimValue, rhs: DimValue) -> Option<DimValue> {
        use DimValue::{Float, Int};
        let result = match (self, lhs, rhs) {
            (DimBinOp::Add, Int(a), Int(b)) => Int(a.checked_add(b)?),
            (DimBinOp::Sub, Int(a), Int(b)) => Int(a.checked_sub(b)?),
            (DimBinOp::Mul, Int(a), Int(b)) => Int(a.checked_mul(b)?),
            // True division always produces a float, as in the host language.
            (DimBinOp::Div, Int(a), Int(b)) => {
                if b == 0 {
                    return None;
                }
                Float(a as f64 / b as f64)
            }
            (DimBinOp::FloorDiv, Int(a), Int(b)) => {
                if b == 0 {
                    return None;
                }
                Int(floor_div(a, b))
            }
            (DimBinOp::Add, a, b) => Float(a.as_f64() + b.as_f64()),
            (DimBinOp::Sub, a, b) => Float(a.as_f64() - b.as_f64()),
            (DimBinOp::Mul, a, b) => Float(a.as_f64() * b.as_f64()),
            (DimBinOp::Div, a, b) => {
                if b.as_f64() == 0.0 {
                    return None;
                }
                Float(a.as_f64() / b.as_f64())
            }
            (DimBinOp::FloorDiv, a, b) => {
                if b.as_f64() == 0.0 {
                    return None;
                }
                Float((a.as_f64() / b.as_f64()).floor())
            }
        };
        Some(result)
    }
}

/// Host-language floor division: rounds toward negative infinity.
fn floor_div(a: i64, b: i64) -> i64 {
    let q = a / b;
    let r = a % b;
    if r != 0 && (r < 0) != (b < 0) {
        q - 1
    } else {
        q
    }
}

/// Unary operators over dimensions.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub enum DimUnaryOp {
    Neg,
    Ceil,
    Abs,
}

impl DimUnaryOp {
    pub const fn as_symbol(self) -> &'static str {
        match self {
            DimUnaryOp::Neg => "-",
            DimUnaryOp::Ceil => "ceil",
            DimUnaryOp::Abs => "abs",
        }
    }

    fn apply(self, term: DimValue) -> DimValue {
        use DimValue::{Float, Int};
        match (self, term) {
            (DimUnaryOp::Neg, v) => v.neg(),
            (DimUnaryOp::Ceil, Int(n)) => Int(n),
            (DimUnaryOp::Ceil, Float(x)) => Int(x.ceil() as i64),
            (DimUnaryOp::Abs, Int(n)) => Int(n.abs()),
            (DimUnaryOp::Abs, Float(x)) => Float(x.abs()),
        }
    }
}

/// Builder-expression tree for a dimension.
#[derive(Clone, PartialEq, Debug)]
pub enum DimExpr {
    Const(DimValue),
    Var(String),
    Unary {
        op: DimUnaryOp,
        term: Box<DimExpr>,
    },
    Binary {
        op: DimBinOp,
        lhs: Box<DimExpr>,
        rhs: Box<DimExpr>,
    },
}

impl DimExpr {
    pub fn binary(op: DimBinOp, lhs: DimExpr, rhs: DimExpr) -> DimExpr {
        DimExpr::Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        }
    }

    pub fn unary(op: DimUnaryOp, term: DimExpr) -> DimExpr {
        DimExpr::Unary {
            op,
            term: Box::new(term),
        }
    }

    /// Evaluate to a numeric value if every leaf is a constant.
    pub fn try_eval(&self) -> Option<DimValue> {
        match self {
            DimExpr::Const(v) => Some(*v),
            DimExpr::Var(_) => None,
            DimExpr::Unary { op, term } => Some(op.apply(term.try_eval()?)),
            DimExpr::Binary { op, lhs, rhs } => op.apply(lhs.try_eval()?, rhs.try_eval()?),
        }
    }

    fn priority(&self) -> u8 {
        match self {
            DimExpr::Const(_) | DimExpr::Var(_) => 7,
            DimExpr::Unary { .. } => 6,
            DimExpr::Binary { op, .. } => op.priority(),
        }
    }
}

impl fmt::Display for DimExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DimExpr::Const(v) => write!(f, "{v}"),
            DimExpr::Var(name) => write!(f, "{name}"),
            DimExpr::Unary { op, term } => write!(f, "{}({})", op.as_symbol(), term),
            DimExpr::Binary { op, lhs, rhs } => {
                let wrap = |e: &DimExpr| e.priority() < op.priority();
                if wrap(lhs) {
                    write!(f, "({lhs})")?;
                } else {
                    write!(f, "{lhs}")?;
                }
                write!(f, " {} ", op.as_symbol())?;
                if wrap(rhs) {
                    write!(f, "({rhs})")
                } else {
                    write!(f, "{rhs}")
                }
            }
        }
    }
}

/// Simplify a dimension expression.
///
/// Rules, applied recursively until a fixed point:
/// - whole-tree constant evaluation
/// - `x + 0`, `x - 0`, `x * 1`, `x / 1`, `x // 1` reduce to `x`
/// - `x + (-c)` becomes `x - c` and `x - (-c)` becomes `x + c`
/// - left-associative same-priority chains `(a op1 b) op2 c` fold the tail
///   `b op2' c` when it evaluates to a constant
///
/// Idempotent: simplifying an already simplified tree returns it unchanged.
pub fn simplify(expr: DimExpr) -> DimExpr {
    if let Some(v) = expr.try_eval() {
        return DimExpr::Const(v);
    }

    match expr {
        DimExpr::Binary { op, lhs, rhs } => simplify_binary(op, *lhs, *rhs),
        DimExpr::Unary { op, term } => DimExpr::unary(op, simplify(*term)),
        other => other,
    }
}

fn simplify_binary(op: DimBinOp, lhs: DimExpr, rhs: DimExpr) -> DimExpr {
    let rhs_val = rhs.try_eval();

    if let Some(v) = rhs_val {
        match op {
            DimBinOp::Add | DimBinOp::Sub if v.is_zero() => return simplify(lhs),
            DimBinOp::Add if v.is_negative() => {
                return simplify(DimExpr::binary(
                    DimBinOp::Sub,
                    lhs,
                    DimExpr::Const(v.neg()),
                ));
            }
            DimBinOp::Sub if v.is_negative() => {
                return simplify(DimExpr::binary(
                    DimBinOp::Add,
                    lhs,
                    DimExpr::Const(v.neg()),
                ));
            }
            DimBinOp::Mul | DimBinOp::Div | DimBinOp::FloorDiv if v.is_one() => {
                return simplify(lhs);
            }
            _ => {}
        }
    }

    // Left-associative flattening: fold the tail of `(a inner_op b) op c`
    // when `b op' c` collapses to a constant.
    if let DimExpr::Binary {
        op: inner_op,
        lhs: inner_lhs,
        rhs: inner_rhs,
    } = &lhs
    {
        if inner_op.priority() == op.priority() {
            let folded_op = match inner_op {
                DimBinOp::Add | DimBinOp::Mul => Some(op),
                DimBinOp::Sub => Some(match op {
                    DimBinOp::Add => DimBinOp::Sub,
                    _ => DimBinOp::Add,
                }),
                _ => None,
            };
            if let Some(folded_op) = folded_op {
                let tail = simplify(DimExpr::binary(
                    folded_op,
                    (**inner_rhs).clone(),
                    rhs.clone(),
                ));
                if matches!(tail, DimExpr::Const(_)) {
                    return simplify(DimExpr::binary(*inner_op, (**inner_lhs).clone(), tail));
                }
            }
        }
    }

    DimExpr::binary(op, simplify(lhs), simplify(rhs))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn var(name: &str) -> DimExpr {
        DimExpr::Var(name.to_owned())
    }

    fn int(n: i64) -> DimExpr {
        DimExpr::Const(DimValue::Int(n))
    }

    #[test]
    fn constant_trees_fold() {
        let expr = DimExpr::binary(DimBinOp::Add, int(3), int(4));
        assert_eq!(simplify(expr), int(7));
    }

    #[test]
    fn additive_identity_reduces() {
        assert_eq!(simplify(DimExpr::binary(DimBinOp::Add, var("x"), int(0))), var("x"));
        assert_eq!(simplify(DimExpr::binary(DimBinOp::Sub, var("x"), int(0))), var("x"));
    }

    #[test]
    fn multiplicative_identity_reduces() {
        assert_eq!(simplify(DimExpr::binary(DimBinOp::Mul, var("x"), int(1))), var("x"));
        assert_eq!(simplify(DimExpr::binary(DimBinOp::Div, var("x"), int(1))), var("x"));
        assert_eq!(
            simplify(DimExpr::binary(DimBinOp::FloorDiv, var("x"), int(1))),
            var("x")
        );
    }

    #[test]
    fn negative_constants_normalize_sign() {
        // x + (-2) => x - 2
        let expr = DimExpr::binary(DimBinOp::Add, var("x"), int(-2));
        assert_eq!(
            simplify(expr),
            DimExpr::binary(DimBinOp::Sub, var("x"), int(2))
        );
        // x - (-2) => x + 2
        let expr = DimExpr::binary(DimBinOp::Sub, var("x"), int(-2));
        assert_eq!(
            simplify(expr),
            DimExpr::binary(DimBinOp::Add, var("x"), int(2))
        );
    }

    #[test]
    fn same_priority_chains_flatten() {
        // (x + 2) - 2 => x
        let expr = DimExpr::binary(
            DimBinOp::Sub,
            DimExpr::binary(DimBinOp::Add, var("x"), int(2)),
            int(2),
        );
        assert_eq!(simplify(expr), var("x"));

        // (x * 4) // 2 => x * 2
        let expr = DimExpr::binary(
            DimBinOp::FloorDiv,
            DimExpr::binary(DimBinOp::Mul, var("x"), int(4)),
            int(2),
        );
        assert_eq!(
            simplify(expr),
            DimExpr::binary(DimBinOp::Mul, var("x"), int(2))
        );
    }

    #[test]
    fn simplify_is_idempotent() {
        let exprs = vec![
            DimExpr::binary(DimBinOp::Add, var("x"), int(0)),
            DimExpr::binary(
                DimBinOp::Sub,
                DimExpr::binary(DimBinOp::Add, var("n"), int(3)),
                int(1),
            ),
            DimExpr::binary(DimBinOp::Mul, var("a"), var("b")),
            DimExpr::unary(DimUnaryOp::Neg, var("x")),
        ];
        for expr in exprs {
            let once = simplify(expr);
            let twice = simplify(once.clone());
            assert_eq!(once, twice);
        }
    }

    #[test]
    fn floor_div_rounds_toward_negative_infinity() {
        assert_eq!(floor_div(7, 2), 3);
        assert_eq!(floor_div(-7, 2), -4);
        assert_eq!(floor_div(7, -2), -4);
        assert_eq!(floor_div(-7, -2), 3);
    }

    #[test]
    fn division_by_zero_does_not_eval() {
        let expr = DimExpr::binary(DimBinOp::Div, int(1), int(0));
        assert_eq!(expr.try_eval(), None);
    }

    #[test]
    fn display_parenthesizes_by_priority() {
        let expr = DimExpr::binary(
            DimBinOp::Mul,
            DimExpr::binary(DimBinOp::Add, var("x"), int(1)),
            int(2),
        );
        assert_eq!(expr.to_string(), "(x + 1) * 2");
    }
}
