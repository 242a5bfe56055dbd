//! Symbolic values.

use std::fmt;

use skein_ir::{ExprId, FuncId, Name, Number};
use skein_shape::Shape;

use crate::env::{FieldId, ObjectId};
use crate::graph::AggregateKind;

/// Element type of numbers and tensors.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub enum Dtype {
    Int32,
    Int64,
    Float32,
    Float64,
}

impl Dtype {
    /// Decode the host language's single-character dtype codes.
    pub fn from_code(code: char) -> Option<Dtype> {
        match code {
            'i' => Some(Dtype::Int32),
            'q' => Some(Dtype::Int64),
            'f' => Some(Dtype::Float32),
            'g' => Some(Dtype::Float64),
            _ => None,
        }
    }

    pub fn is_float(self) -> bool {
        matches!(self, Dtype::Float32 | Dtype::Float64)
    }

    /// Widening promotion for mixed-dtype arithmetic.
    pub fn promote(a: Dtype, b: Dtype) -> Dtype {
        use Dtype::{Float32, Float64, Int32, Int64};
        match (a, b) {
            (Float64, _) | (_, Float64) => Float64,
            (Float32, _) | (_, Float32) => Float32,
            (Int64, _) | (_, Int64) => Int64,
            (Int32, Int32) => Int32,
        }
    }
}

/// Identifier of an opaque operator in the external catalog.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub struct OpId(pub u32);

/// Builtin evaluation rules the call resolver understands directly.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub enum BuiltinFunc {
    Len,
    Range,
    List,
    Print,
    Copy,
    Append,
    GetAttr,
    HasAttr,
    Aggregate(AggregateKind),
    /// Trace directive: records (name, constant args) into the per-trace
    /// flag cache when called inside a `with` header.
    Directive(Name),
}

impl BuiltinFunc {
    pub fn name(self) -> &'static str {
        match self {
            BuiltinFunc::Len => "len",
            BuiltinFunc::Range => "range",
            BuiltinFunc::List => "list",
            BuiltinFunc::Print => "print",
            BuiltinFunc::Copy => "copy",
            BuiltinFunc::Append => "append",
            BuiltinFunc::GetAttr => "getattr",
            BuiltinFunc::HasAttr => "hasattr",
            BuiltinFunc::Aggregate(AggregateKind::Min) => "min",
            BuiltinFunc::Aggregate(AggregateKind::Max) => "max",
            BuiltinFunc::Aggregate(AggregateKind::Sum) => "sum",
            BuiltinFunc::Directive(_) => "directive",
        }
    }
}

/// A user-defined callable: a function definition plus the field it closes
/// over.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub struct UserFunc {
    pub def: FuncId,
    pub field: FieldId,
}

/// A lambda: the expression node that defined it plus the field it closes
/// over.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub struct LambdaFunc {
    pub expr: ExprId,
    pub field: FieldId,
}

/// What a callable value evaluates through.
#[derive(Copy, Clone, PartialEq, Debug)]
pub enum FuncKind {
    Builtin(BuiltinFunc),
    User(UserFunc),
    Lambda(LambdaFunc),
    /// An opaque operator resolved through the external catalog.
    Op(OpId),
}

/// A callable value, possibly bound to a receiver object.
#[derive(Copy, Clone, PartialEq, Debug)]
pub struct FuncValue {
    pub kind: FuncKind,
    /// Receiver for bound methods (`obj.append`).
    pub bound: Option<ObjectId>,
}

impl FuncValue {
    pub fn builtin(builtin: BuiltinFunc) -> Self {
        FuncValue {
            kind: FuncKind::Builtin(builtin),
            bound: None,
        }
    }

    pub fn user(def: FuncId, field: FieldId) -> Self {
        FuncValue {
            kind: FuncKind::User(UserFunc { def, field }),
            bound: None,
        }
    }

    pub fn op(id: OpId) -> Self {
        FuncValue {
            kind: FuncKind::Op(id),
            bound: None,
        }
    }

    pub fn bound_to(mut self, obj: ObjectId) -> Self {
        self.bound = Some(obj);
        self
    }
}

/// Value variants.
///
/// Every variant may carry a compile-time constant payload; values produced
/// by opaque operators or unknown-shaped inputs carry none.
#[derive(Clone, PartialEq, Debug)]
pub enum ValueKind {
    Number {
        constant: Option<Number>,
        dtype: Option<Dtype>,
    },
    Bool {
        constant: Option<bool>,
    },
    Str {
        constant: Option<String>,
    },
    None,
    List {
        /// Element objects when the whole list is compile-time-known.
        items: Option<Vec<ObjectId>>,
        /// Element dtype for typed (tensor-backed) sequences. A list with a
        /// dtype is never unrolled.
        elem_dtype: Option<Dtype>,
    },
    Tuple {
        items: Option<Vec<ObjectId>>,
    },
    Dict {
        /// Field holding the entries, keyed by encoded constant keys.
        entries: Option<FieldId>,
    },
    Tensor {
        shape: Shape,
        dtype: Option<Dtype>,
    },
    Range {
        start: Option<i64>,
        stop: Option<i64>,
        step: Option<i64>,
    },
    Func(FuncValue),
    /// An opaque host object exposing members (a model, a module, ...).
    Instance,
    Unknown,
}

/// One symbolic value: a display name plus the tagged descriptor.
#[derive(Clone, PartialEq, Debug)]
pub struct Value {
    pub name: String,
    pub kind: ValueKind,
    /// Placeholder synthesized by the branch/loop merge for a position no
    /// code actually produced; the serializer materializes these.
    pub dummy: bool,
}

impl Value {
    pub fn new(kind: ValueKind) -> Self {
        Value {
            name: String::new(),
            kind,
            dummy: false,
        }
    }

    pub fn named(name: impl Into<String>, kind: ValueKind) -> Self {
        Value {
            name: name.into(),
            kind,
            dummy: false,
        }
    }

    // Literal constructors.

    pub fn number(constant: Option<Number>) -> Self {
        let dtype = match constant {
            Some(Number::Int(_)) => Some(Dtype::Int64),
            Some(Number::Float(_)) => Some(Dtype::Float64),
            Option::None => Option::None,
        };
        Value::new(ValueKind::Number { constant, dtype })
    }

    pub fn int(n: i64) -> Self {
        Value::number(Some(Number::Int(n)))
    }

    pub fn float(x: f64) -> Self {
        Value::number(Some(Number::Float(x)))
    }

    pub fn bool_value(constant: Option<bool>) -> Self {
        Value::new(ValueKind::Bool { constant })
    }

    pub fn str_value(constant: Option<String>) -> Self {
        Value::new(ValueKind::Str { constant })
    }

    pub fn none() -> Self {
        Value::new(ValueKind::None)
    }

    pub fn unknown() -> Self {
        Value::new(ValueKind::Unknown)
    }

    pub fn list(items: Option<Vec<ObjectId>>) -> Self {
        Value::new(ValueKind::List {
            items,
            elem_dtype: Option::None,
        })
    }

    pub fn tuple(items: Option<Vec<ObjectId>>) -> Self {
        Value::new(ValueKind::Tuple { items })
    }

    pub fn tensor(shape: Shape, dtype: Option<Dtype>) -> Self {
        Value::new(ValueKind::Tensor { shape, dtype })
    }

    pub fn func(func: FuncValue) -> Self {
        Value::new(ValueKind::Func(func))
    }

    pub fn instance() -> Self {
        Value::new(ValueKind::Instance)
    }

    // Constant payload access.

    pub fn has_constant(&self) -> bool {
        match &self.kind {
            ValueKind::Number { constant, .. } => constant.is_some(),
            ValueKind::Bool { constant } => constant.is_some(),
            ValueKind::Str { constant } => constant.is_some(),
            ValueKind::List { items, .. } => items.is_some(),
            ValueKind::Tuple { items } => items.is_some(),
            ValueKind::Range { start, stop, .. } => start.is_some() && stop.is_some(),
            ValueKind::None => true,
            _ => false,
        }
    }

    pub fn as_const_number(&self) -> Option<Number> {
        match &self.kind {
            ValueKind::Number { constant, .. } => *constant,
            _ => Option::None,
        }
    }

    pub fn as_const_int(&self) -> Option<i64> {
        match self.as_const_number()? {
            Number::Int(n) => Some(n),
            Number::Float(_) => Option::None,
        }
    }

    pub fn as_const_bool(&self) -> Option<bool> {
        match &self.kind {
            ValueKind::Bool { constant } => *constant,
            _ => Option::None,
        }
    }

    pub fn as_const_str(&self) -> Option<&str> {
        match &self.kind {
            ValueKind::Str { constant } => constant.as_deref(),
            _ => Option::None,
        }
    }

    pub fn as_const_items(&self) -> Option<&[ObjectId]> {
        match &self.kind {
            ValueKind::List { items, .. } | ValueKind::Tuple { items } => items.as_deref(),
            _ => Option::None,
        }
    }

    pub fn as_func(&self) -> Option<&FuncValue> {
        match &self.kind {
            ValueKind::Func(func) => Some(func),
            _ => Option::None,
        }
    }

    /// True for the placeholder types that never win a branch-merge type
    /// preference (`None` and `Unknown`).
    pub fn is_placeholder_type(&self) -> bool {
        matches!(self.kind, ValueKind::None | ValueKind::Unknown)
    }

    /// True if `self` and `other` are the same variant (type-level match,
    /// ignoring payloads).
    pub fn same_kind(&self, other: &Value) -> bool {
        std::mem::discriminant(&self.kind) == std::mem::discriminant(&other.kind)
    }

    pub fn type_name(&self) -> &'static str {
        match &self.kind {
            ValueKind::Number { .. } => "number",
            ValueKind::Bool { .. } => "bool",
            ValueKind::Str { .. } => "str",
            ValueKind::None => "none",
            ValueKind::List { .. } => "list",
            ValueKind::Tuple { .. } => "tuple",
            ValueKind::Dict { .. } => "dict",
            ValueKind::Tensor { .. } => "tensor",
            ValueKind::Range { .. } => "range",
            ValueKind::Func(_) => "function",
            ValueKind::Instance => "instance",
            ValueKind::Unknown => "unknown",
        }
    }

    /// New value of the same type with no constant payload.
    ///
    /// This is the placeholder factory used by the phi construction: branch
    /// body versions, loop feedback values, and dummy inputs are all
    /// same-typed skeletons of an existing value. Shapes, dtypes and element
    /// types are preserved; constants are not, because the new value stands
    /// for a runtime-fed position.
    pub fn fresh_same_type(&self) -> Value {
        let kind = match &self.kind {
            ValueKind::Number { dtype, .. } => ValueKind::Number {
                constant: Option::None,
                dtype: *dtype,
            },
            ValueKind::Bool { .. } => ValueKind::Bool {
                constant: Option::None,
            },
            ValueKind::Str { .. } => ValueKind::Str {
                constant: Option::None,
            },
            ValueKind::None => ValueKind::None,
            ValueKind::List { elem_dtype, .. } => ValueKind::List {
                items: Option::None,
                elem_dtype: *elem_dtype,
            },
            ValueKind::Tuple { .. } => ValueKind::Tuple {
                items: Option::None,
            },
            ValueKind::Dict { .. } => ValueKind::Dict {
                entries: Option::None,
            },
            ValueKind::Tensor { shape, dtype } => ValueKind::Tensor {
                shape: shape.clone(),
                dtype: *dtype,
            },
            ValueKind::Range { .. } => ValueKind::Range {
                start: Option::None,
                stop: Option::None,
                step: Option::None,
            },
            // Callables and opaque instances are compile-time entities; a
            // same-typed placeholder is the value itself.
            ValueKind::Func(func) => ValueKind::Func(*func),
            ValueKind::Instance => ValueKind::Instance,
            ValueKind::Unknown => ValueKind::Unknown,
        };
        Value {
            name: self.name.clone(),
            kind,
            dummy: false,
        }
    }

    /// Full copy including the constant payload (the `Copy` node's result).
    pub fn copied(&self) -> Value {
        self.clone()
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.name.is_empty() {
            write!(f, "<{}>", self.type_name())
        } else {
            write!(f, "{}<{}>", self.name, self.type_name())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use skein_shape::ShapeElem;

    #[test]
    fn literal_constants_are_exposed() {
        assert_eq!(Value::int(3).as_const_int(), Some(3));
        assert_eq!(Value::bool_value(Some(true)).as_const_bool(), Some(true));
        assert_eq!(
            Value::str_value(Some("hi".into())).as_const_str(),
            Some("hi")
        );
        assert!(Value::none().has_constant());
        assert!(!Value::unknown().has_constant());
    }

    #[test]
    fn fresh_same_type_drops_constants_but_keeps_typing() {
        let fresh = Value::int(7).fresh_same_type();
        assert!(matches!(
            fresh.kind,
            ValueKind::Number {
                constant: None,
                dtype: Some(Dtype::Int64)
            }
        ));

        let shape: Shape = [ShapeElem::known(2), ShapeElem::var("n")]
            .into_iter()
            .collect();
        let tensor = Value::tensor(shape.clone(), Some(Dtype::Float32));
        let fresh = tensor.fresh_same_type();
        let ValueKind::Tensor {
            shape: fresh_shape,
            dtype,
        } = &fresh.kind
        else {
            panic!("expected tensor");
        };
        assert_eq!(dtype, &Some(Dtype::Float32));
        assert_eq!(fresh_shape.len(), shape.len());
    }

    #[test]
    fn copied_keeps_constants() {
        let copy = Value::int(7).copied();
        assert_eq!(copy.as_const_int(), Some(7));
    }

    #[test]
    fn same_kind_compares_variants_only() {
        assert!(Value::int(1).same_kind(&Value::float(2.0)));
        assert!(!Value::int(1).same_kind(&Value::none()));
    }

    #[test]
    fn dtype_promotion_widens() {
        assert_eq!(Dtype::promote(Dtype::Int32, Dtype::Float32), Dtype::Float32);
        assert_eq!(Dtype::promote(Dtype::Int64, Dtype::Int32), Dtype::Int64);
        assert_eq!(
            Dtype::promote(Dtype::Float32, Dtype::Float64),
            Dtype::Float64
        );
    }

    #[test]
    fn dtype_codes_decode() {
        assert_eq!(Dtype::from_code('q'), Some(Dtype::Int64));
        assert_eq!(Dtype::from_code('f'), Some(Dtype::Float32));
        assert_eq!(Dtype::from_code('x'), None);
    }
}
