//! Builtin evaluation rules.

use skein_diagnostic::{TraceError, TraceResult};
use skein_graph::{
    AccessMode, AggregateKind, BuiltinFunc, ConvertKind, Dtype, Env, FieldId, FuncValue,
    GenerateKind, Graph, Node, NodeKind, ObjectId, Value, ValueId, ValueKind,
};
use skein_ir::{Interner, LineInfo, Name, Number};

use crate::call::ArgInput;
use crate::context::FlagDirective;
use crate::tracer::{Evaluated, Tracer};

/// Bind the builtin functions (and the `flags` directive namespace) into a
/// module field. Call this once when setting up the defining field of a
/// trace.
pub fn install_builtins(env: &mut Env, field: FieldId, interner: &Interner) {
    let builtins: &[(&str, BuiltinFunc)] = &[
        ("len", BuiltinFunc::Len),
        ("range", BuiltinFunc::Range),
        ("list", BuiltinFunc::List),
        ("print", BuiltinFunc::Print),
        ("copy", BuiltinFunc::Copy),
        ("getattr", BuiltinFunc::GetAttr),
        ("hasattr", BuiltinFunc::HasAttr),
        ("min", BuiltinFunc::Aggregate(AggregateKind::Min)),
        ("max", BuiltinFunc::Aggregate(AggregateKind::Max)),
        ("sum", BuiltinFunc::Aggregate(AggregateKind::Sum)),
    ];
    for &(name, builtin) in builtins {
        let obj = env.object_of(Value::named(
            name,
            ValueKind::Func(FuncValue::builtin(builtin)),
        ));
        let attr = env.resolve(field, interner.intern(name), AccessMode::Write);
        env.bind_attr_quiet(attr, obj);
    }

    // Trace directives live under a `flags` namespace object; calling one
    // inside a `with` header records it into the flag cache.
    let flags_obj = env.object_of(Value::named("flags", ValueKind::Instance));
    let flags_attr = env.resolve(field, interner.intern("flags"), AccessMode::Write);
    env.bind_attr_quiet(flags_attr, flags_obj);
    let flags_field = env.object_field(flags_obj);
    for name in ["unroll", "ignore_branch"] {
        let directive = interner.intern(name);
        let obj = env.object_of(Value::named(
            name,
            ValueKind::Func(FuncValue::builtin(BuiltinFunc::Directive(directive))),
        ));
        let attr = env.resolve(flags_field, directive, AccessMode::Write);
        env.bind_attr_quiet(attr, obj);
    }
}

impl Tracer<'_> {
    pub(crate) fn call_builtin(
        &mut self,
        builtin: BuiltinFunc,
        bound: Option<ObjectId>,
        args: ArgInput,
        line: LineInfo,
        graph: &mut Graph,
    ) -> TraceResult<Option<Evaluated>> {
        match builtin {
            BuiltinFunc::Len => self.builtin_len(&args, line, graph),
            BuiltinFunc::Range => self.builtin_range(&args, line, graph),
            BuiltinFunc::List => self.builtin_list(&args, line, graph),
            BuiltinFunc::Print => self.builtin_print(&args, line, graph),
            BuiltinFunc::Copy => self.builtin_copy(&args, line, graph),
            BuiltinFunc::Append => self.builtin_append(bound, &args, line, graph),
            BuiltinFunc::GetAttr => self.builtin_getattr(&args, line),
            BuiltinFunc::HasAttr => self.builtin_hasattr(&args, line),
            BuiltinFunc::Aggregate(kind) => self.builtin_aggregate(kind, &args, line, graph),
            BuiltinFunc::Directive(name) => self.builtin_directive(name, &args, line),
        }
    }

    /// Positional-or-keyword argument lookup for builtins with fixed specs.
    fn builtin_arg(&self, args: &ArgInput, index: usize, name: &str) -> Option<ObjectId> {
        args.inputs.get(index).copied().or_else(|| {
            args.keywords
                .iter()
                .find(|&&(kw, _)| self.lookup(kw) == name)
                .map(|&(_, obj)| obj)
        })
    }

    fn builtin_len(
        &mut self,
        args: &ArgInput,
        line: LineInfo,
        graph: &mut Graph,
    ) -> TraceResult<Option<Evaluated>> {
        let Some(&obj) = args.inputs.first() else {
            self.sink.warn("len() requires an argument", line);
            return Ok(None);
        };
        let value = self.env.object_value(obj);
        let constant = match &self.env.value(value).kind {
            ValueKind::List {
                items: Some(items), ..
            }
            | ValueKind::Tuple { items: Some(items) } => Some(Number::Int(items.len() as i64)),
            ValueKind::Str { constant: Some(s) } => Some(Number::Int(s.chars().count() as i64)),
            ValueKind::Tensor { shape, .. } => {
                shape.first().and_then(|dim| dim.as_int()).map(Number::Int)
            }
            _ => None,
        };
        let mut result = Value::new(ValueKind::Number {
            constant,
            dtype: Some(Dtype::Int64),
        });
        result.name = format!("@F.{}.len", line.line);
        let out = self.env.add_value(result);
        let mut node = Node::new(
            NodeKind::Call {
                name: "len".to_owned(),
            },
            vec![value],
            line,
        );
        node.set_outputs(vec![out]);
        graph.add_node(node);
        Ok(Some(Evaluated::Obj(self.env.new_object(out))))
    }

    /// `range`: a `Generate` node producing a range value, or, under the
    /// unroll flag, a compile-time list of numbers (a fatal error if any
    /// bound is not constant).
    fn builtin_range(
        &mut self,
        args: &ArgInput,
        line: LineInfo,
        graph: &mut Graph,
    ) -> TraceResult<Option<Evaluated>> {
        let values: Vec<ValueId> = args
            .inputs
            .iter()
            .map(|&obj| self.env.object_value(obj))
            .collect();
        if values.is_empty() || values.len() > 3 {
            self.sink.warn("range() takes 1 to 3 arguments", line);
            return Ok(None);
        }

        if self.ctx.flags.for_unroll {
            let mut bounds = Vec::with_capacity(values.len());
            for &value in &values {
                match self.env.value(value).as_const_int() {
                    Some(n) => bounds.push(n),
                    None => return Err(TraceError::UnrollNonConstant { line }),
                }
            }
            let (start, stop, step) = range_bounds(&bounds);
            if step == 0 {
                self.sink.warn("range() step must not be zero", line);
                return Ok(None);
            }
            let mut items = Vec::new();
            let mut current = start;
            while (step > 0 && current < stop) || (step < 0 && current > stop) {
                items.push(self.env.object_of(Value::int(current)));
                current += step;
            }
            let list = self.env.object_of(Value::list(Some(items)));
            return Ok(Some(Evaluated::Obj(list)));
        }

        let consts: Vec<Option<i64>> = values
            .iter()
            .map(|&value| self.env.value(value).as_const_int())
            .collect();
        let (start, stop, step) = match consts.as_slice() {
            [stop] => (Some(0), *stop, Some(1)),
            [start, stop] => (*start, *stop, Some(1)),
            [start, stop, step] => (*start, *stop, *step),
            _ => (None, None, None),
        };
        let mut result = Value::new(ValueKind::Range { start, stop, step });
        result.name = format!("@F.{}.range", line.line);
        let out = self.env.add_value(result);
        let mut node = Node::new(
            NodeKind::Generate {
                what: GenerateKind::Range,
            },
            values,
            line,
        );
        node.set_outputs(vec![out]);
        graph.add_node(node);
        Ok(Some(Evaluated::Obj(self.env.new_object(out))))
    }

    fn builtin_list(
        &mut self,
        args: &ArgInput,
        line: LineInfo,
        graph: &mut Graph,
    ) -> TraceResult<Option<Evaluated>> {
        let arg_value = args.inputs.first().map(|&obj| self.env.object_value(obj));
        let convert_from = match arg_value {
            Some(value) if !matches!(self.env.value(value).kind, ValueKind::None) => Some(value),
            _ => None,
        };

        let (mut result, node) = match convert_from {
            None => {
                let result = Value::list(Some(Vec::new()));
                let node = Node::new(
                    NodeKind::Generate {
                        what: GenerateKind::List,
                    },
                    vec![],
                    line,
                );
                (result, node)
            }
            Some(value) => {
                let items = self.env.value(value).as_const_items().map(<[_]>::to_vec);
                let result = Value::list(items);
                let node = Node::new(
                    NodeKind::Convert {
                        what: ConvertKind::List,
                    },
                    vec![value],
                    line,
                );
                (result, node)
            }
        };
        result.name = format!("@F.{}.list", line.line);
        let out = self.env.add_value(result);
        let mut node = node;
        node.set_outputs(vec![out]);
        graph.add_node(node);
        Ok(Some(Evaluated::Obj(self.env.new_object(out))))
    }

    /// `print` is a side-effect-only call: a node with no outputs.
    fn builtin_print(
        &mut self,
        args: &ArgInput,
        line: LineInfo,
        graph: &mut Graph,
    ) -> TraceResult<Option<Evaluated>> {
        let values: Vec<ValueId> = args
            .inputs
            .iter()
            .map(|&obj| self.env.object_value(obj))
            .collect();
        graph.add_node(Node::new(
            NodeKind::Call {
                name: "print".to_owned(),
            },
            values,
            line,
        ));
        Ok(None)
    }

    fn builtin_copy(
        &mut self,
        args: &ArgInput,
        line: LineInfo,
        graph: &mut Graph,
    ) -> TraceResult<Option<Evaluated>> {
        let Some(&obj) = args.inputs.first() else {
            self.sink.warn("copy() requires an argument", line);
            return Ok(None);
        };
        let value = self.env.object_value(obj);
        let out = self.env.copy_of(value);
        let mut node = Node::new(NodeKind::Copy, vec![value], line);
        node.set_outputs(vec![out]);
        graph.add_node(node);
        Ok(Some(Evaluated::Obj(self.env.new_object(out))))
    }

    /// Bound list method: produces a new list value, revising the receiver
    /// so the append is visible as a write event.
    fn builtin_append(
        &mut self,
        bound: Option<ObjectId>,
        args: &ArgInput,
        line: LineInfo,
        graph: &mut Graph,
    ) -> TraceResult<Option<Evaluated>> {
        let Some(list_obj) = bound else {
            self.sink.warn("append() requires a receiver", line);
            return Ok(None);
        };
        let Some(&elt_obj) = args.inputs.first() else {
            self.sink.warn("append() requires an argument", line);
            return Ok(None);
        };
        let list_value = self.env.object_value(list_obj);
        let elt_value = self.env.object_value(elt_obj);
        let (items, elem_dtype) = match &self.env.value(list_value).kind {
            ValueKind::List { items, elem_dtype } => (items.clone(), *elem_dtype),
            _ => {
                self.sink.warn("append() on a non-list receiver", line);
                return Ok(None);
            }
        };

        let items = items.map(|mut items| {
            items.push(elt_obj);
            items
        });
        let mut result = Value::new(ValueKind::List { items, elem_dtype });
        result.name = format!("@F.{}.append", line.line);
        let out = self.env.add_value(result);
        let mut node = Node::new(
            NodeKind::Call {
                name: "list.append".to_owned(),
            },
            vec![list_value, elt_value],
            line,
        );
        node.set_outputs(vec![out]);
        graph.add_node(node);

        self.env.revise_object(list_obj, out);
        Ok(Some(Evaluated::Obj(self.env.object_of(Value::none()))))
    }

    fn builtin_getattr(
        &mut self,
        args: &ArgInput,
        line: LineInfo,
    ) -> TraceResult<Option<Evaluated>> {
        let (Some(obj), Some(name_obj)) = (
            self.builtin_arg(args, 0, "object"),
            self.builtin_arg(args, 1, "name"),
        ) else {
            self.sink.warn("getattr() requires (object, name)", line);
            return Ok(None);
        };
        let name_value = self.env.object_value(name_obj);
        let Some(member) = self.env.value(name_value).as_const_str().map(str::to_owned) else {
            self.sink
                .warn("getattr() requires a constant attribute name", line);
            return Ok(None);
        };
        let name = self.module.intern(&member);
        match self.resolve_member(obj, name) {
            Some(attr) => Ok(Some(Evaluated::Attr(attr))),
            None => {
                self.sink
                    .warn(format!("Attribute \"{member}\" is not found"), line);
                Ok(None)
            }
        }
    }

    fn builtin_hasattr(
        &mut self,
        args: &ArgInput,
        line: LineInfo,
    ) -> TraceResult<Option<Evaluated>> {
        let (Some(obj), Some(name_obj)) = (
            self.builtin_arg(args, 0, "obj"),
            self.builtin_arg(args, 1, "name"),
        ) else {
            self.sink.warn("hasattr() requires (obj, name)", line);
            return Ok(None);
        };
        let name_value = self.env.object_value(name_obj);
        let Some(member) = self.env.value(name_value).as_const_str().map(str::to_owned) else {
            self.sink
                .warn("hasattr() requires a constant attribute name", line);
            return Ok(None);
        };
        let name = self.module.intern(&member);
        let present = self.resolve_member(obj, name).is_some();
        Ok(Some(Evaluated::Obj(
            self.env.object_of(Value::bool_value(Some(present))),
        )))
    }

    /// min/max/sum over a sequence. Discrete operands build an implicit
    /// list node first.
    fn builtin_aggregate(
        &mut self,
        kind: AggregateKind,
        args: &ArgInput,
        line: LineInfo,
        graph: &mut Graph,
    ) -> TraceResult<Option<Evaluated>> {
        let seq_value = if args.inputs.len() >= 2 {
            let values: Vec<ValueId> = args
                .inputs
                .iter()
                .map(|&obj| self.env.object_value(obj))
                .collect();
            let list = self.env.add_value(Value::list(Some(args.inputs.clone())));
            let mut node = Node::new(
                NodeKind::Generate {
                    what: GenerateKind::List,
                },
                values,
                line,
            );
            node.set_outputs(vec![list]);
            graph.add_node(node);
            list
        } else {
            let Some(&obj) = args.inputs.first() else {
                self.sink.warn("Aggregate builtins require arguments", line);
                return Ok(None);
            };
            self.env.object_value(obj)
        };

        let (constant, elem_dtype) = self.fold_aggregate(kind, seq_value);
        let dtype = elem_dtype.or(match constant {
            Some(Number::Int(_)) => Some(Dtype::Int64),
            Some(Number::Float(_)) => Some(Dtype::Float64),
            None => None,
        });
        let kind_name = match kind {
            AggregateKind::Min => "min",
            AggregateKind::Max => "max",
            AggregateKind::Sum => "sum",
        };
        let mut result = Value::new(ValueKind::Number { constant, dtype });
        result.name = format!("@F.{}.{kind_name}", line.line);
        let out = self.env.add_value(result);
        let mut node = Node::new(NodeKind::Aggregate { kind }, vec![seq_value], line);
        node.set_outputs(vec![out]);
        graph.add_node(node);
        Ok(Some(Evaluated::Obj(self.env.new_object(out))))
    }

    fn fold_aggregate(
        &self,
        kind: AggregateKind,
        seq_value: ValueId,
    ) -> (Option<Number>, Option<Dtype>) {
        let (items, elem_dtype) = match &self.env.value(seq_value).kind {
            ValueKind::List { items, elem_dtype } => (items.as_deref(), *elem_dtype),
            ValueKind::Tuple { items } => (items.as_deref(), None),
            _ => (None, None),
        };
        let Some(items) = items else {
            return (None, elem_dtype);
        };
        let numbers: Option<Vec<Number>> = items
            .iter()
            .map(|&obj| {
                self.env
                    .value(self.env.object_value(obj))
                    .as_const_number()
            })
            .collect();
        let Some(numbers) = numbers else {
            return (None, elem_dtype);
        };
        if numbers.is_empty() {
            return (
                match kind {
                    AggregateKind::Sum => Some(Number::Int(0)),
                    _ => None,
                },
                elem_dtype,
            );
        }

        let all_int = numbers.iter().all(|n| matches!(n, Number::Int(_)));
        let folded = if all_int {
            let ints: Vec<i64> = numbers
                .iter()
                .map(|n| match n {
                    Number::Int(i) => *i,
                    Number::Float(_) => 0,
                })
                .collect();
            let value = match kind {
                AggregateKind::Min => ints.iter().copied().min(),
                AggregateKind::Max => ints.iter().copied().max(),
                AggregateKind::Sum => Some(ints.iter().sum()),
            };
            value.map(Number::Int)
        } else {
            let floats: Vec<f64> = numbers.iter().map(|n| n.as_f64()).collect();
            let value = match kind {
                AggregateKind::Min => floats.iter().copied().reduce(f64::min),
                AggregateKind::Max => floats.iter().copied().reduce(f64::max),
                AggregateKind::Sum => Some(floats.iter().sum()),
            };
            value.map(Number::Float)
        };
        (folded, elem_dtype)
    }

    /// Trace directive: records (name, constant arguments) into the
    /// per-trace flag cache for the enclosing `with` to consume.
    fn builtin_directive(
        &mut self,
        name: Name,
        args: &ArgInput,
        line: LineInfo,
    ) -> TraceResult<Option<Evaluated>> {
        let mut const_args = Vec::with_capacity(args.inputs.len());
        for &obj in &args.inputs {
            let value_id = self.env.object_value(obj);
            let value = self.env.value(value_id);
            if !value.has_constant() {
                return Err(TraceError::NonConstantDirective { line });
            }
            const_args.push(value.clone());
        }
        self.ctx.flags_cache.push(FlagDirective {
            name,
            args: const_args,
        });
        Ok(Some(Evaluated::Obj(self.env.object_of(Value::none()))))
    }
}

fn range_bounds(bounds: &[i64]) -> (i64, i64, i64) {
    match bounds {
        [stop] => (0, *stop, 1),
        [start, stop] => (*start, *stop, 1),
        [start, stop, step] => (*start, *stop, *step),
        _ => (0, 0, 1),
    }
}
