//! Expression evaluation: operators, containers, subscripts, attributes.
//!
//! Every operation evaluates its operands (possibly emitting nodes), builds
//! a result value, emits one node with the operands as inputs and the result
//! as sole output, and returns an object wrapping the result. Whenever all
//! operands carry compile-time constants the result does too, so downstream
//! control flow can specialize.

use skein_diagnostic::TraceResult;
use skein_graph::{
    AccessMode, AttrRef, BuiltinFunc, Dtype, FieldId, FuncValue, Graph, Node, NodeKind, ObjectId,
    Value, ValueId, ValueKind,
};
use skein_ir::{
    BinOp, BoolOpKind, CompareOp, ExprId, LineInfo, Name, Number, SliceDim, SubscriptKind, UnaryOp,
};
use skein_shape::unify;

use crate::tracer::{Evaluated, Tracer};

/// Largest representable slice bound, used when an upper bound is omitted.
const SLICE_INT_MAX: i64 = i32::MAX as i64;

/// Compile-time truthiness of a value, when decidable.
pub(crate) fn const_truthiness(value: &Value) -> Option<bool> {
    match &value.kind {
        ValueKind::Bool { constant } => *constant,
        ValueKind::Number { constant, .. } => constant.map(|n| match n {
            Number::Int(i) => i != 0,
            Number::Float(f) => f != 0.0,
        }),
        ValueKind::Str { constant } => constant.as_ref().map(|s| !s.is_empty()),
        ValueKind::None => Some(false),
        ValueKind::List { items, .. } | ValueKind::Tuple { items } => {
            items.as_ref().map(|i| !i.is_empty())
        }
        _ => None,
    }
}

/// Floor division with the host language's semantics (round toward
/// negative infinity).
fn py_floor_div(a: i64, b: i64) -> i64 {
    let q = a / b;
    let r = a % b;
    if r != 0 && (r < 0) != (b < 0) {
        q - 1
    } else {
        q
    }
}

/// Modulo with the host language's semantics (result takes the divisor's
/// sign).
fn py_mod(a: i64, b: i64) -> i64 {
    let r = a % b;
    if r != 0 && (r < 0) != (b < 0) {
        r + b
    } else {
        r
    }
}

fn py_fmod(a: f64, b: f64) -> f64 {
    let r = a % b;
    if r != 0.0 && (r < 0.0) != (b < 0.0) {
        r + b
    } else {
        r
    }
}

impl Tracer<'_> {
    // Literals and containers.

    pub(crate) fn eval_tuple(
        &mut self,
        elts: &[ExprId],
        line: LineInfo,
        field: FieldId,
        graph: &mut Graph,
    ) -> TraceResult<Option<Evaluated>> {
        let mut objs = Vec::with_capacity(elts.len());
        let mut values = Vec::with_capacity(elts.len());
        for &elt in elts {
            let ev = self.eval_expr(elt, field, graph)?;
            let Some(obj) = self.try_get_obj(ev.as_ref(), "tuple", line) else {
                self.sink.warn("Unknown tuple element", line);
                return Ok(None);
            };
            values.push(self.env.object_value(obj));
            objs.push(obj);
        }
        let tuple = self.env.add_value(Value::tuple(Some(objs)));
        let mut node = Node::new(
            NodeKind::Generate {
                what: skein_graph::GenerateKind::Tuple,
            },
            values,
            line,
        );
        node.set_outputs(vec![tuple]);
        graph.add_node(node);
        Ok(Some(Evaluated::Obj(self.env.new_object(tuple))))
    }

    pub(crate) fn eval_list(
        &mut self,
        elts: &[ExprId],
        line: LineInfo,
        field: FieldId,
        graph: &mut Graph,
    ) -> TraceResult<Option<Evaluated>> {
        let mut objs = Vec::with_capacity(elts.len());
        let mut values = Vec::with_capacity(elts.len());
        for &elt in elts {
            let ev = self.eval_expr(elt, field, graph)?;
            let Some(obj) = self.try_get_obj(ev.as_ref(), "list", line) else {
                self.sink.warn("Unknown list element", line);
                return Ok(None);
            };
            values.push(self.env.object_value(obj));
            objs.push(obj);
        }
        let list = self.env.add_value(Value::list(Some(objs)));
        let mut node = Node::new(
            NodeKind::Generate {
                what: skein_graph::GenerateKind::List,
            },
            values,
            line,
        );
        node.set_outputs(vec![list]);
        graph.add_node(node);
        Ok(Some(Evaluated::Obj(self.env.new_object(list))))
    }

    /// Dict literals are compile-time containers: entries live in an
    /// internal field keyed by encoded constant keys, and no node is
    /// emitted.
    pub(crate) fn eval_dict(
        &mut self,
        keys: &[ExprId],
        values: &[ExprId],
        line: LineInfo,
        field: FieldId,
        graph: &mut Graph,
    ) -> TraceResult<Option<Evaluated>> {
        let entries = self.env.new_field(None);
        for (&key, &value) in keys.iter().zip(values.iter()) {
            let key_ev = self.eval_expr(key, field, graph)?;
            let value_ev = self.eval_expr(value, field, graph)?;
            let Some(key_obj) = self.try_get_obj(key_ev.as_ref(), "dict", line) else {
                return Ok(None);
            };
            let Some(value_obj) = self.try_get_obj(value_ev.as_ref(), "dict", line) else {
                return Ok(None);
            };
            let key_value = self.env.object_value(key_obj);
            let Some(encoded) = encode_dict_key(self.env.value(key_value)) else {
                self.sink.warn("Dict keys must be compile-time constants", line);
                return Ok(None);
            };
            let name = self.module.intern(&encoded);
            let value_obj = self.rewrap_scalar(value_obj);
            let attr = self.env.resolve(entries, name, AccessMode::Write);
            self.env.bind_attr_quiet(attr, value_obj);
        }
        let dict = Value::new(ValueKind::Dict {
            entries: Some(entries),
        });
        Ok(Some(Evaluated::Obj(self.env.object_of(dict))))
    }

    // Attribute access.

    pub(crate) fn eval_attribute(
        &mut self,
        value: ExprId,
        attr: Name,
        line: LineInfo,
        field: FieldId,
        graph: &mut Graph,
    ) -> TraceResult<Option<Evaluated>> {
        let value_ev = self.eval_expr(value, field, graph)?;
        let Some(obj) = self.try_get_obj(value_ev.as_ref(), "attribute", line) else {
            self.sink.warn(
                format!(
                    "Unknown or disabled attribute \"{}\" is accessed",
                    self.lookup(attr)
                ),
                line,
            );
            return Ok(None);
        };
        match self.resolve_member(obj, attr) {
            Some(member) => Ok(Some(Evaluated::Attr(member))),
            None => {
                self.sink.warn(
                    format!("Attribute \"{}\" is not found", self.lookup(attr)),
                    line,
                );
                Ok(None)
            }
        }
    }

    /// Resolve a member in an object's field, lazily materializing members
    /// the value's origin type exposes (list methods, tensor shape).
    pub(crate) fn resolve_member(&mut self, obj: ObjectId, attr: Name) -> Option<AttrRef> {
        let obj_field = self.env.object_field(obj);
        let member = self.env.resolve(obj_field, attr, AccessMode::Read);
        if self.env.attr_has_obj(member) {
            return Some(member);
        }
        if let Some(materialized) = self.materialize_member(obj, attr) {
            self.env.bind_attr_quiet(member, materialized);
            return Some(member);
        }
        None
    }

    fn materialize_member(&mut self, obj: ObjectId, attr: Name) -> Option<ObjectId> {
        enum Member {
            Append,
            Shape(skein_shape::Shape),
        }

        let member_name = self.lookup(attr);
        let value_id = self.env.object_value(obj);
        let member = match (&self.env.value(value_id).kind, member_name) {
            (ValueKind::List { .. }, "append") => Member::Append,
            (ValueKind::Tensor { shape, .. }, "shape") => Member::Shape(shape.clone()),
            _ => return None,
        };

        match member {
            Member::Append => Some(self.env.object_of(Value::func(
                FuncValue::builtin(BuiltinFunc::Append).bound_to(obj),
            ))),
            Member::Shape(shape) => {
                // The symbolic shape surfaces as a tuple of numbers: known
                // dimensions as constants, unknown ones named after their
                // expression trees.
                let dims: Vec<Value> = shape
                    .iter()
                    .map(|elem| match elem.as_int() {
                        Some(n) => Value::int(n),
                        None => {
                            let mut value = Value::new(ValueKind::Number {
                                constant: None,
                                dtype: Some(Dtype::Int64),
                            });
                            value.name = elem.expr().to_string();
                            value
                        }
                    })
                    .collect();
                let dim_objs: Vec<ObjectId> =
                    dims.into_iter().map(|v| self.env.object_of(v)).collect();
                Some(self.env.object_of(Value::tuple(Some(dim_objs))))
            }
        }
    }

    // Assignment forms.

    pub(crate) fn eval_assign(
        &mut self,
        target: ExprId,
        value: ExprId,
        line: LineInfo,
        field: FieldId,
        graph: &mut Graph,
    ) -> TraceResult<()> {
        let value_ev = self.eval_expr(value, field, graph)?;
        if value_ev.is_none() {
            self.sink
                .warn("It is possible that the assigned value is invalid", line);
            return Ok(());
        }
        let Some(value_obj) = self.try_get_obj(value_ev.as_ref(), "assign", line) else {
            return Ok(());
        };
        let Some(target_ev) = self.eval_target(target, field, graph)? else {
            return Ok(());
        };
        match target_ev {
            Evaluated::Targets(targets) => {
                // a, b = value: requires a compile-time tuple payload.
                let tuple_value = self.env.object_value(value_obj);
                let items = match &self.env.value(tuple_value).kind {
                    ValueKind::Tuple { items: Some(items) } => items.clone(),
                    _ => {
                        return Err(skein_diagnostic::TraceError::UnsupportedTarget { line });
                    }
                };
                if items.len() != targets.len() {
                    return Err(skein_diagnostic::TraceError::UnsupportedTarget { line });
                }
                for (target, item) in targets.into_iter().zip(items.into_iter()) {
                    let Evaluated::Attr(attr) = target else {
                        return Err(skein_diagnostic::TraceError::UnsupportedTarget { line });
                    };
                    let item_value = self.env.object_value(item);
                    graph.add_node(Node::new(NodeKind::Assign, vec![item_value], line));
                    self.env.revise_attr(attr, item);
                }
            }
            Evaluated::Attr(attr) => {
                let assigned = self.rewrap_scalar(value_obj);
                let assigned_value = self.env.object_value(assigned);
                graph.add_node(Node::new(NodeKind::Assign, vec![assigned_value], line));
                self.env.revise_attr(attr, assigned);
            }
            Evaluated::Obj(_) => {
                return Err(skein_diagnostic::TraceError::UnsupportedTarget { line });
            }
        }
        Ok(())
    }

    pub(crate) fn eval_aug_assign(
        &mut self,
        target: ExprId,
        op: BinOp,
        value: ExprId,
        line: LineInfo,
        field: FieldId,
        graph: &mut Graph,
    ) -> TraceResult<()> {
        if op == BinOp::Mod {
            self.sink
                .warn(format!("Unknown binary operator {}", op.as_symbol()), line);
            return Ok(());
        }
        let target_ev = self.eval_expr(target, field, graph)?;
        let value_ev = self.eval_expr(value, field, graph)?;
        let Some(target_value) = self.try_get_value(target_ev.as_ref(), "aug_assign", line) else {
            return Ok(());
        };
        let Some(value_value) = self.try_get_value(value_ev.as_ref(), "aug_assign", line) else {
            return Ok(());
        };

        let mut result = self.binop_result(op, target_value, value_value, line);
        result.name = format!("@A.{}", line.line);
        let out = self.env.add_value(result);
        let mut node = Node::new(
            NodeKind::AugAssign { op },
            vec![target_value, value_value],
            line,
        );
        node.set_outputs(vec![out]);
        graph.add_node(node);

        if let Some(obj) = self.try_get_obj(target_ev.as_ref(), "aug_assign", line) {
            self.env.revise_object(obj, out);
        }
        Ok(())
    }

    // Operators.

    pub(crate) fn eval_bin_op(
        &mut self,
        op: BinOp,
        left: ExprId,
        right: ExprId,
        line: LineInfo,
        field: FieldId,
        graph: &mut Graph,
    ) -> TraceResult<Option<Evaluated>> {
        let left_ev = self.eval_expr(left, field, graph)?;
        let right_ev = self.eval_expr(right, field, graph)?;
        let Some(left_value) = self.try_get_value(left_ev.as_ref(), "binop", line) else {
            return Ok(None);
        };
        let Some(right_value) = self.try_get_value(right_ev.as_ref(), "binop", line) else {
            return Ok(None);
        };

        let mut result = self.binop_result(op, left_value, right_value, line);
        result.name = format!("@B.{}", line.line);
        let out = self.env.add_value(result);
        let mut node = Node::new(NodeKind::BinOp { op }, vec![left_value, right_value], line);
        node.set_outputs(vec![out]);
        graph.add_node(node);
        Ok(Some(Evaluated::Obj(self.env.new_object(out))))
    }

    /// Result typing and constant folding for binary operations.
    pub(crate) fn binop_result(
        &mut self,
        op: BinOp,
        left: ValueId,
        right: ValueId,
        line: LineInfo,
    ) -> Value {
        let lv = self.env.value(left).clone();
        let rv = self.env.value(right).clone();
        match (&lv.kind, &rv.kind) {
            (
                ValueKind::Number {
                    constant: lc,
                    dtype: ld,
                },
                ValueKind::Number {
                    constant: rc,
                    dtype: rd,
                },
            ) => {
                let constant = match (lc, rc) {
                    (Some(a), Some(b)) => self.fold_number(op, *a, *b, line),
                    _ => None,
                };
                let mut dtype = promote_opt(*ld, *rd);
                if op == BinOp::Div {
                    // True division always yields a float.
                    dtype = Some(match dtype {
                        Some(Dtype::Float32) => Dtype::Float32,
                        _ => Dtype::Float64,
                    });
                }
                Value::new(ValueKind::Number { constant, dtype })
            }
            (ValueKind::Str { constant: lc }, ValueKind::Str { constant: rc })
                if op == BinOp::Add =>
            {
                let constant = match (lc, rc) {
                    (Some(a), Some(b)) => Some(format!("{a}{b}")),
                    _ => None,
                };
                Value::str_value(constant)
            }
            (
                ValueKind::List {
                    items: li,
                    elem_dtype: ld,
                },
                ValueKind::List {
                    items: ri,
                    elem_dtype: rd,
                },
            ) if op == BinOp::Add => {
                let items = match (li, ri) {
                    (Some(a), Some(b)) => {
                        let mut merged = a.clone();
                        merged.extend(b.iter().copied());
                        Some(merged)
                    }
                    _ => None,
                };
                let mut value = Value::list(items);
                if let ValueKind::List { elem_dtype, .. } = &mut value.kind {
                    *elem_dtype = promote_opt(*ld, *rd);
                }
                value
            }
            (ValueKind::List { items, elem_dtype }, ValueKind::Number { constant, .. })
            | (ValueKind::Number { constant, .. }, ValueKind::List { items, elem_dtype })
                if op == BinOp::Mul =>
            {
                let repeated = match (items, constant) {
                    (Some(items), Some(Number::Int(n))) if *n >= 0 => {
                        let mut out = Vec::with_capacity(items.len() * (*n as usize));
                        for _ in 0..*n {
                            out.extend(items.iter().copied());
                        }
                        Some(out)
                    }
                    _ => None,
                };
                let mut value = Value::list(repeated);
                if let ValueKind::List { elem_dtype: d, .. } = &mut value.kind {
                    *d = *elem_dtype;
                }
                value
            }
            (
                ValueKind::Tensor {
                    shape: ls,
                    dtype: ld,
                },
                ValueKind::Tensor {
                    shape: rs,
                    dtype: rd,
                },
            ) => {
                let shape = if ls.len() == rs.len() {
                    let mut a = ls.clone();
                    let mut b = rs.clone();
                    unify(&mut a, &mut b);
                    a
                } else if ls.len() > rs.len() {
                    ls.clone()
                } else {
                    rs.clone()
                };
                Value::tensor(shape, promote_opt(*ld, *rd))
            }
            (ValueKind::Tensor { shape, dtype }, ValueKind::Number { dtype: nd, .. })
            | (ValueKind::Number { dtype: nd, .. }, ValueKind::Tensor { shape, dtype }) => {
                Value::tensor(shape.clone(), promote_opt(*dtype, *nd))
            }
            _ => {
                self.sink.warn(
                    format!(
                        "Unknown binary operation between {} and {}",
                        lv.type_name(),
                        rv.type_name()
                    ),
                    line,
                );
                Value::unknown()
            }
        }
    }

    fn fold_number(&mut self, op: BinOp, a: Number, b: Number, line: LineInfo) -> Option<Number> {
        use Number::{Float, Int};
        match (a, b) {
            (Int(x), Int(y)) => match op {
                BinOp::Add => x.checked_add(y).map(Int),
                BinOp::Sub => x.checked_sub(y).map(Int),
                BinOp::Mul => x.checked_mul(y).map(Int),
                BinOp::Div => {
                    if y == 0 {
                        self.sink.warn("Division by zero in constant operands", line);
                        None
                    } else {
                        Some(Float(x as f64 / y as f64))
                    }
                }
                BinOp::FloorDiv => {
                    if y == 0 {
                        self.sink.warn("Division by zero in constant operands", line);
                        None
                    } else {
                        Some(Int(py_floor_div(x, y)))
                    }
                }
                BinOp::Mod => {
                    if y == 0 {
                        self.sink.warn("Division by zero in constant operands", line);
                        None
                    } else {
                        Some(Int(py_mod(x, y)))
                    }
                }
            },
            _ => {
                let (x, y) = (a.as_f64(), b.as_f64());
                match op {
                    BinOp::Add => Some(Float(x + y)),
                    BinOp::Sub => Some(Float(x - y)),
                    BinOp::Mul => Some(Float(x * y)),
                    BinOp::Div | BinOp::FloorDiv | BinOp::Mod if y == 0.0 => {
                        self.sink.warn("Division by zero in constant operands", line);
                        None
                    }
                    BinOp::Div => Some(Float(x / y)),
                    BinOp::FloorDiv => Some(Float((x / y).floor())),
                    BinOp::Mod => Some(Float(py_fmod(x, y))),
                }
            }
        }
    }

    pub(crate) fn eval_unary_op(
        &mut self,
        op: UnaryOp,
        operand: ExprId,
        line: LineInfo,
        field: FieldId,
        graph: &mut Graph,
    ) -> TraceResult<Option<Evaluated>> {
        let operand_ev = self.eval_expr(operand, field, graph)?;
        let Some(operand_value) = self.try_get_value(operand_ev.as_ref(), "unary", line) else {
            return Ok(None);
        };

        let ov = self.env.value(operand_value).clone();
        let mut result = match (op, &ov.kind) {
            (UnaryOp::Pos, _) => ov.copied(),
            (UnaryOp::Neg, ValueKind::Number { constant, dtype }) => {
                let constant = constant.map(|n| match n {
                    Number::Int(i) => Number::Int(-i),
                    Number::Float(f) => Number::Float(-f),
                });
                Value::new(ValueKind::Number {
                    constant,
                    dtype: *dtype,
                })
            }
            (UnaryOp::Neg, ValueKind::Tensor { shape, dtype }) => {
                Value::tensor(shape.clone(), *dtype)
            }
            (UnaryOp::Not, _) => Value::bool_value(const_truthiness(&ov).map(|b| !b)),
            _ => {
                self.sink.warn(
                    format!(
                        "Unknown unary operation {} on {}",
                        op.as_symbol(),
                        ov.type_name()
                    ),
                    line,
                );
                Value::unknown()
            }
        };
        result.name = format!("@U.{}", line.line);
        let out = self.env.add_value(result);
        let mut node = Node::new(NodeKind::UnaryOp { op }, vec![operand_value], line);
        node.set_outputs(vec![out]);
        graph.add_node(node);
        Ok(Some(Evaluated::Obj(self.env.new_object(out))))
    }

    pub(crate) fn eval_bool_op(
        &mut self,
        op: BoolOpKind,
        values: &[ExprId],
        line: LineInfo,
        field: FieldId,
        graph: &mut Graph,
    ) -> TraceResult<Option<Evaluated>> {
        let mut operand_values = Vec::with_capacity(values.len());
        for &value in values {
            let ev = self.eval_expr(value, field, graph)?;
            let Some(value_id) = self.try_get_value(ev.as_ref(), "multiary", line) else {
                return Ok(None);
            };
            operand_values.push(value_id);
        }

        let mut folded = Some(match op {
            BoolOpKind::And => true,
            BoolOpKind::Or => false,
        });
        for &value_id in &operand_values {
            match (folded, const_truthiness(self.env.value(value_id))) {
                (Some(acc), Some(truth)) => {
                    folded = Some(match op {
                        BoolOpKind::And => acc && truth,
                        BoolOpKind::Or => acc || truth,
                    });
                }
                _ => {
                    folded = None;
                    break;
                }
            }
        }

        let mut result = Value::bool_value(folded);
        result.name = format!("@M.{}", line.line);
        let out = self.env.add_value(result);
        let mut node = Node::new(NodeKind::MultiaryOp { op }, operand_values, line);
        node.set_outputs(vec![out]);
        graph.add_node(node);
        Ok(Some(Evaluated::Obj(self.env.new_object(out))))
    }

    pub(crate) fn eval_compare(
        &mut self,
        op: CompareOp,
        left: ExprId,
        right: ExprId,
        line: LineInfo,
        field: FieldId,
        graph: &mut Graph,
    ) -> TraceResult<Option<Evaluated>> {
        let left_ev = self.eval_expr(left, field, graph)?;
        let right_ev = self.eval_expr(right, field, graph)?;
        let Some(left_value) = self.try_get_value_allow_none(left_ev.as_ref(), "compare", line)
        else {
            return Ok(None);
        };
        let Some(right_value) = self.try_get_value_allow_none(right_ev.as_ref(), "compare", line)
        else {
            return Ok(None);
        };

        let folded = self.fold_compare(op, left_value, right_value);
        let mut result = Value::bool_value(folded);
        result.name = format!("@{line}");
        let out = self.env.add_value(result);
        let mut node = Node::new(
            NodeKind::Compare { op },
            vec![left_value, right_value],
            line,
        );
        node.set_outputs(vec![out]);
        graph.add_node(node);
        Ok(Some(Evaluated::Obj(self.env.new_object(out))))
    }

    fn fold_compare(&self, op: CompareOp, left: ValueId, right: ValueId) -> Option<bool> {
        match op {
            CompareOp::Eq | CompareOp::Is => self.const_eq(left, right),
            CompareOp::NotEq | CompareOp::IsNot => self.const_eq(left, right).map(|b| !b),
            CompareOp::Gt => self.const_cmp(left, right).map(std::cmp::Ordering::is_gt),
            CompareOp::GtE => self.const_cmp(left, right).map(std::cmp::Ordering::is_ge),
            CompareOp::Lt => self.const_cmp(left, right).map(std::cmp::Ordering::is_lt),
            CompareOp::LtE => self.const_cmp(left, right).map(std::cmp::Ordering::is_le),
            CompareOp::In => self.const_contains(left, right),
            CompareOp::NotIn => self.const_contains(left, right).map(|b| !b),
        }
    }

    /// Constant equality of two values, when decidable.
    fn const_eq(&self, left: ValueId, right: ValueId) -> Option<bool> {
        let lv = self.env.value(left);
        let rv = self.env.value(right);
        match (&lv.kind, &rv.kind) {
            (
                ValueKind::Number { constant: a, .. },
                ValueKind::Number { constant: b, .. },
            ) => match (a, b) {
                (Some(a), Some(b)) => Some(a.as_f64() == b.as_f64()),
                _ => None,
            },
            (ValueKind::Str { constant: a }, ValueKind::Str { constant: b }) => match (a, b) {
                (Some(a), Some(b)) => Some(a == b),
                _ => None,
            },
            (ValueKind::Bool { constant: a }, ValueKind::Bool { constant: b }) => match (a, b) {
                (Some(a), Some(b)) => Some(a == b),
                _ => None,
            },
            (ValueKind::None, ValueKind::None) => Some(true),
            (ValueKind::None, _) => {
                if rv.has_constant() {
                    Some(false)
                } else {
                    None
                }
            }
            (_, ValueKind::None) => {
                if lv.has_constant() {
                    Some(false)
                } else {
                    None
                }
            }
            _ => {
                if lv.has_constant() && rv.has_constant() && !lv.same_kind(rv) {
                    Some(false)
                } else {
                    None
                }
            }
        }
    }

    fn const_cmp(&self, left: ValueId, right: ValueId) -> Option<std::cmp::Ordering> {
        let lv = self.env.value(left);
        let rv = self.env.value(right);
        match (&lv.kind, &rv.kind) {
            (
                ValueKind::Number { constant: a, .. },
                ValueKind::Number { constant: b, .. },
            ) => match (a, b) {
                (Some(a), Some(b)) => a.as_f64().partial_cmp(&b.as_f64()),
                _ => None,
            },
            (ValueKind::Str { constant: a }, ValueKind::Str { constant: b }) => match (a, b) {
                (Some(a), Some(b)) => Some(a.cmp(b)),
                _ => None,
            },
            _ => None,
        }
    }

    /// Constant containment (`in`): decidable when a known element matches,
    /// or when the container is fully known and nothing matches.
    fn const_contains(&self, left: ValueId, right: ValueId) -> Option<bool> {
        let items = self.env.value(right).as_const_items()?;
        let mut all_known = true;
        for &item in items {
            let item_value = self.env.object_value(item);
            match self.const_eq(left, item_value) {
                Some(true) => return Some(true),
                Some(false) => {}
                None => all_known = false,
            }
        }
        if all_known {
            Some(false)
        } else {
            None
        }
    }

    // Subscripts.

    pub(crate) fn eval_subscript(
        &mut self,
        value: ExprId,
        index: &SubscriptKind,
        line: LineInfo,
        field: FieldId,
        graph: &mut Graph,
    ) -> TraceResult<Option<Evaluated>> {
        let value_ev = self.eval_expr(value, field, graph)?;
        let Some(container) = self.try_get_value(value_ev.as_ref(), "subscript", line) else {
            return Ok(None);
        };

        enum ContainerClass {
            Dict(Option<FieldId>),
            Sequence,
            Other(&'static str),
        }
        let class = match &self.env.value(container).kind {
            ValueKind::Dict { entries } => ContainerClass::Dict(*entries),
            ValueKind::List { .. } | ValueKind::Tuple { .. } | ValueKind::Tensor { .. } => {
                ContainerClass::Sequence
            }
            _ => ContainerClass::Other(self.env.value(container).type_name()),
        };

        match class {
            ContainerClass::Dict(entries) => {
                let SubscriptKind::Index(key) = index else {
                    self.sink.warn("This subscript form is not supported for dicts", line);
                    return Ok(None);
                };
                let key_ev = self.eval_expr(*key, field, graph)?;
                let Some(key_value) = self.try_get_value(key_ev.as_ref(), "subscript", line)
                else {
                    return Ok(None);
                };
                let Some(encoded) = encode_dict_key(self.env.value(key_value)) else {
                    self.sink
                        .warn("Dict subscript requires a compile-time key", line);
                    return Ok(None);
                };
                let Some(entries) = entries else {
                    self.sink.warn("Dict entries are unknown", line);
                    return Ok(None);
                };
                let name = self.module.intern(&encoded);
                let attr = self.env.resolve(entries, name, AccessMode::Read);
                Ok(Some(Evaluated::Attr(attr)))
            }
            ContainerClass::Sequence => {
                self.eval_sequence_subscript(container, index, line, field, graph)
            }
            ContainerClass::Other(type_name) => {
                self.sink.warn(
                    format!("Subscript is not possible for type {type_name}"),
                    line,
                );
                Ok(None)
            }
        }
    }

    fn eval_sequence_subscript(
        &mut self,
        container: ValueId,
        index: &SubscriptKind,
        line: LineInfo,
        field: FieldId,
        graph: &mut Graph,
    ) -> TraceResult<Option<Evaluated>> {
        match index {
            SubscriptKind::Index(index_expr) => {
                let index_ev = self.eval_expr(*index_expr, field, graph)?;
                let Some(index_value) = self.try_get_value(index_ev.as_ref(), "subscript", line)
                else {
                    return Ok(None);
                };

                // x[i, j]: a constant tuple index becomes a multi-index
                // lookup; a non-constant one cannot be resolved.
                let tuple_index = match &self.env.value(index_value).kind {
                    ValueKind::Tuple { items } => Some(items.clone()),
                    _ => None,
                };
                if let Some(items) = tuple_index {
                    let node = match items {
                        Some(items) => {
                            let mut inputs = vec![container];
                            for &item in &items {
                                inputs.push(self.env.object_value(item));
                            }
                            Node::new(NodeKind::GetItem, inputs, line)
                        }
                        None => {
                            self.sink.warn("This subscript is not supported", line);
                            Node::new(NodeKind::Invalid, vec![container], line)
                        }
                    };
                    let result = self.index_result(container, None, line);
                    let out = self.env.add_value(result);
                    let mut node = node;
                    node.set_outputs(vec![out]);
                    graph.add_node(node);
                    return Ok(Some(Evaluated::Obj(self.env.new_object(out))));
                }

                let index_const = self.env.value(index_value).as_const_int();

                // Constant lookup into a compile-time container of opaque
                // elements resolves to the element object itself.
                if let Some(items) = self.env.value(container).as_const_items() {
                    if let Some(i) = index_const.and_then(|i| normalize_index(i, items.len())) {
                        let element = items[i];
                        let element_value = self.env.object_value(element);
                        if matches!(
                            self.env.value(element_value).kind,
                            ValueKind::Instance | ValueKind::Func(_)
                        ) {
                            return Ok(Some(Evaluated::Obj(element)));
                        }
                    }
                }

                let result = self.index_result(container, index_const, line);
                let out = self.env.add_value(result);
                let mut node =
                    Node::new(NodeKind::GetItem, vec![container, index_value], line);
                node.set_outputs(vec![out]);
                graph.add_node(node);
                Ok(Some(Evaluated::Obj(self.env.new_object(out))))
            }
            SubscriptKind::Slice { lower, upper, step } => {
                let indices = self.slice_indices(*lower, *upper, *step, field, graph)?;
                let specs = vec![indices.len()];
                let mut result_id = self.env.fresh_like(container, skein_graph::Suffix::None);

                // Constant propagation: slice the compile-time payload when
                // the container and every bound are known.
                let bounds: Vec<Option<i64>> = indices
                    .iter()
                    .map(|&v| self.env.value(v).as_const_int())
                    .collect();
                let const_items = self.env.value(container).as_const_items().map(<[_]>::to_vec);
                if let Some(items) = const_items {
                    if bounds.iter().all(Option::is_some) && !bounds.is_empty() {
                        let start = bounds[0].unwrap_or(0);
                        let end = bounds.get(1).copied().flatten().unwrap_or(SLICE_INT_MAX);
                        let step = bounds.get(2).copied().flatten().unwrap_or(1);
                        if let Some(sliced) = py_slice(&items, start, end, step) {
                            let fresh = self.env.value(result_id).clone();
                            let mut updated = fresh;
                            if let ValueKind::List { items, .. } | ValueKind::Tuple { items } =
                                &mut updated.kind
                            {
                                *items = Some(sliced);
                            }
                            result_id = self.env.add_value(updated);
                        }
                    }
                }

                let mut inputs = vec![container];
                inputs.extend(indices);
                let mut node = Node::new(NodeKind::Slice { specs }, inputs, line);
                node.set_outputs(vec![result_id]);
                graph.add_node(node);
                Ok(Some(Evaluated::Obj(self.env.new_object(result_id))))
            }
            SubscriptKind::ExtSlice(dims) => {
                let mut inputs = vec![container];
                let mut specs = Vec::with_capacity(dims.len());
                for dim in dims {
                    match dim {
                        SliceDim::Index(expr) => {
                            let ev = self.eval_expr(*expr, field, graph)?;
                            let Some(value) = self.try_get_value(ev.as_ref(), "subscript", line)
                            else {
                                return Ok(None);
                            };
                            inputs.push(value);
                            specs.push(1);
                        }
                        SliceDim::Slice { lower, upper, step } => {
                            let indices = self.slice_indices(*lower, *upper, *step, field, graph)?;
                            specs.push(indices.len());
                            inputs.extend(indices);
                        }
                    }
                }
                let result = self.env.fresh_like(container, skein_graph::Suffix::None);
                let mut node = Node::new(NodeKind::Slice { specs }, inputs, line);
                node.set_outputs(vec![result]);
                graph.add_node(node);
                Ok(Some(Evaluated::Obj(self.env.new_object(result))))
            }
        }
    }

    /// Evaluate slice bounds, substituting defaults for omitted ones.
    /// A fully empty slice (`[:]`) produces no index values.
    fn slice_indices(
        &mut self,
        lower: Option<ExprId>,
        upper: Option<ExprId>,
        step: Option<ExprId>,
        field: FieldId,
        graph: &mut Graph,
    ) -> TraceResult<Vec<ValueId>> {
        if lower.is_none() && upper.is_none() && step.is_none() {
            return Ok(Vec::new());
        }
        let mut indices = Vec::with_capacity(3);
        indices.push(self.slice_bound(lower, 0, field, graph)?);
        indices.push(self.slice_bound(upper, SLICE_INT_MAX, field, graph)?);
        if step.is_some() {
            indices.push(self.slice_bound(step, 1, field, graph)?);
        }
        Ok(indices)
    }

    fn slice_bound(
        &mut self,
        bound: Option<ExprId>,
        default: i64,
        field: FieldId,
        graph: &mut Graph,
    ) -> TraceResult<ValueId> {
        match bound {
            Some(expr) => {
                let line = self.module.expr(expr).line;
                let ev = self.eval_expr(expr, field, graph)?;
                match self.try_get_value(ev.as_ref(), "subscript", line) {
                    Some(value) => Ok(value),
                    None => {
                        let mut value = Value::int(default);
                        value.name = "@SliceDefault".to_owned();
                        Ok(self.env.add_value(value))
                    }
                }
            }
            None => {
                let mut value = Value::int(default);
                value.name = "@SliceDefault".to_owned();
                Ok(self.env.add_value(value))
            }
        }
    }

    /// Result typing for a single-element lookup.
    fn index_result(
        &mut self,
        container: ValueId,
        index_const: Option<i64>,
        line: LineInfo,
    ) -> Value {
        let value = self.env.value(container).clone();
        match &value.kind {
            ValueKind::Tensor { shape, dtype } => {
                let inner: skein_shape::Shape = shape.iter().skip(1).cloned().collect();
                Value::tensor(inner, *dtype)
            }
            ValueKind::List { items, elem_dtype } => {
                if let (Some(items), Some(index)) = (items, index_const) {
                    if let Some(i) = normalize_index(index, items.len()) {
                        let element_value = self.env.object_value(items[i]);
                        return self.env.value(element_value).fresh_same_type();
                    }
                }
                if let Some(dtype) = elem_dtype {
                    return Value::new(ValueKind::Number {
                        constant: None,
                        dtype: Some(*dtype),
                    });
                }
                self.sink.warn(
                    "Unable to determine the element type; using a tensor as default",
                    line,
                );
                Value::tensor(skein_shape::Shape::new(), None)
            }
            ValueKind::Tuple { items } => {
                if let (Some(items), Some(index)) = (items, index_const) {
                    if let Some(i) = normalize_index(index, items.len()) {
                        let element_value = self.env.object_value(items[i]);
                        return self.env.value(element_value).fresh_same_type();
                    }
                }
                self.sink.warn(
                    "Unable to determine the element type; using a tensor as default",
                    line,
                );
                Value::tensor(skein_shape::Shape::new(), None)
            }
            _ => Value::unknown(),
        }
    }

    /// Element object produced by iterating a sequence value, when the
    /// element type is determinable.
    pub(crate) fn iterator_element(&mut self, iter_value: ValueId) -> Option<ObjectId> {
        let value = self.env.value(iter_value).clone();
        let element = match &value.kind {
            ValueKind::List { items, elem_dtype } => {
                if let Some(dtype) = elem_dtype {
                    Value::new(ValueKind::Number {
                        constant: None,
                        dtype: Some(*dtype),
                    })
                } else if let Some(first) = items.as_ref().and_then(|i| i.first()) {
                    let first_value = self.env.object_value(*first);
                    self.env.value(first_value).fresh_same_type()
                } else {
                    Value::unknown()
                }
            }
            ValueKind::Tuple { items } => {
                if let Some(first) = items.as_ref().and_then(|i| i.first()) {
                    let first_value = self.env.object_value(*first);
                    self.env.value(first_value).fresh_same_type()
                } else {
                    Value::unknown()
                }
            }
            ValueKind::Range { .. } => Value::new(ValueKind::Number {
                constant: None,
                dtype: Some(Dtype::Int64),
            }),
            ValueKind::Tensor { shape, dtype } => {
                let inner: skein_shape::Shape = shape.iter().skip(1).cloned().collect();
                Value::tensor(inner, *dtype)
            }
            _ => return None,
        };
        Some(self.env.object_of(element))
    }
}

fn promote_opt(a: Option<Dtype>, b: Option<Dtype>) -> Option<Dtype> {
    match (a, b) {
        (Some(a), Some(b)) => Some(Dtype::promote(a, b)),
        (Some(a), None) => Some(a),
        (None, b) => b,
    }
}

/// Encode a constant value as a dict-entry attribute name.
fn encode_dict_key(value: &Value) -> Option<String> {
    match &value.kind {
        ValueKind::Number { constant, .. } => constant.map(|n| format!("n:{n}")),
        ValueKind::Str { constant } => constant.as_ref().map(|s| format!("s:{s}")),
        ValueKind::Bool { constant } => constant.map(|b| format!("b:{b}")),
        _ => None,
    }
}

/// Normalize a possibly-negative index against a length.
fn normalize_index(index: i64, len: usize) -> Option<usize> {
    let len = len as i64;
    let normalized = if index < 0 { index + len } else { index };
    if (0..len).contains(&normalized) {
        Some(normalized as usize)
    } else {
        None
    }
}

/// Host-language slice over a compile-time element list (positive step
/// only; anything fancier stays symbolic).
fn py_slice(items: &[ObjectId], start: i64, end: i64, step: i64) -> Option<Vec<ObjectId>> {
    if step <= 0 {
        return None;
    }
    let len = items.len() as i64;
    let clamp = |v: i64| -> i64 {
        let v = if v < 0 { v + len } else { v };
        v.clamp(0, len)
    };
    let (start, end) = (clamp(start), clamp(end.min(len)));
    let mut out = Vec::new();
    let mut i = start;
    while i < end {
        out.push(items[i as usize]);
        i += step;
    }
    Some(out)
}
