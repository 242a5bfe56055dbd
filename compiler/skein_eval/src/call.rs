//! Function-call resolution: builtins, user-defined functions, lambdas and
//! opaque catalog operators.

use skein_diagnostic::{TraceError, TraceResult};
use skein_graph::{
    AccessMode, FieldId, FuncKind, FuncValue, Graph, LambdaFunc, Node, NodeKind, ObjectId, OpId,
    UserFunc, Value, ValueId, ValueKind,
};
use skein_ir::{ExprId, ExprKind, LineInfo, Name, Param};

use crate::catalog::OpArgs;
use crate::tracer::{Evaluated, Tracer};

/// Collected call arguments before parameter binding.
#[derive(Default, Debug)]
pub(crate) struct ArgInput {
    pub inputs: Vec<ObjectId>,
    pub keywords: Vec<(Name, ObjectId)>,
}

impl Tracer<'_> {
    pub(crate) fn eval_call(
        &mut self,
        func: ExprId,
        args: &[ExprId],
        keywords: &[(Name, ExprId)],
        line: LineInfo,
        field: FieldId,
        graph: &mut Graph,
    ) -> TraceResult<Option<Evaluated>> {
        let func_ev = self.eval_expr(func, field, graph)?;
        let Some(func_obj) = self.try_get_obj(func_ev.as_ref(), "call", line) else {
            self.sink.warn("Unknown function is called", line);
            return Ok(None);
        };

        let mut input = ArgInput::default();
        for &arg in args {
            let ev = self.eval_expr(arg, field, graph)?;
            match self.try_get_obj(ev.as_ref(), "call", line) {
                Some(obj) => input.inputs.push(obj),
                None => {
                    self.sink.warn("Invalid arguments exist in the call", line);
                    return Ok(None);
                }
            }
        }
        for &(name, expr) in keywords {
            let ev = self.eval_expr(expr, field, graph)?;
            match self.try_get_obj(ev.as_ref(), "call", line) {
                Some(obj) => input.keywords.push((name, obj)),
                None => {
                    self.sink.warn("Invalid arguments exist in the call", line);
                    return Ok(None);
                }
            }
        }

        let func_value = self.env.object_value(func_obj);
        if let Some(func) = self.env.value(func_value).as_func().copied() {
            return self.call_func(func, input, line, graph);
        }

        // A callable instance dispatches through its call member.
        if matches!(self.env.value(func_value).kind, ValueKind::Instance) {
            let call_name = self.module.intern("__call__");
            if let Some(attr) = self.resolve_member(func_obj, call_name) {
                if let Some(value) = self.env.attr_value(attr) {
                    if let Some(mut func) = self.env.value(value).as_func().copied() {
                        if func.bound.is_none() {
                            func.bound = Some(func_obj);
                        }
                        return self.call_func(func, input, line, graph);
                    }
                }
            }
        }

        self.sink.warn("Unknown function is called", line);
        Ok(None)
    }

    pub(crate) fn call_func(
        &mut self,
        func: FuncValue,
        args: ArgInput,
        line: LineInfo,
        graph: &mut Graph,
    ) -> TraceResult<Option<Evaluated>> {
        match func.kind {
            FuncKind::Builtin(builtin) => self.call_builtin(builtin, func.bound, args, line, graph),
            FuncKind::User(user) => self.call_user(user, func.bound, args, line, graph),
            FuncKind::Lambda(lambda) => self.call_lambda(lambda, func.bound, args, line, graph),
            FuncKind::Op(id) => self.call_op(id, args, line, graph),
        }
    }

    /// Bind positional and keyword arguments against an ordered parameter
    /// spec with optional defaults. `None` means binding failed (already
    /// diagnosed).
    fn bind_args(
        &mut self,
        params: &[Param],
        bound: Option<ObjectId>,
        args: &ArgInput,
        defining_field: FieldId,
        graph: &mut Graph,
        line: LineInfo,
    ) -> TraceResult<Option<Vec<(Name, ObjectId)>>> {
        let positional: Vec<ObjectId> = bound
            .into_iter()
            .chain(args.inputs.iter().copied())
            .collect();
        if positional.len() > params.len() {
            self.sink.warn("Too many arguments in the call", line);
            return Ok(None);
        }
        for &(name, _) in &args.keywords {
            if !params.iter().any(|p| p.name == name) {
                self.sink.warn(
                    format!("Unexpected keyword argument \"{}\"", self.lookup(name)),
                    line,
                );
                return Ok(None);
            }
        }

        let mut bindings = Vec::with_capacity(params.len());
        for (index, param) in params.iter().enumerate() {
            let keyword = args
                .keywords
                .iter()
                .find(|(name, _)| *name == param.name)
                .map(|(_, obj)| *obj);
            let obj = if index < positional.len() {
                if keyword.is_some() {
                    self.sink.warn(
                        format!(
                            "Argument \"{}\" given both positionally and by keyword",
                            self.lookup(param.name)
                        ),
                        line,
                    );
                    return Ok(None);
                }
                positional[index]
            } else if let Some(obj) = keyword {
                obj
            } else if let Some(default) = param.default {
                let ev = self.eval_expr(default, defining_field, graph)?;
                match self.try_get_obj(ev.as_ref(), "default", line) {
                    Some(obj) => obj,
                    None => return Ok(None),
                }
            } else {
                self.sink.warn(
                    format!("Argument \"{}\" is missing", self.lookup(param.name)),
                    line,
                );
                return Ok(None);
            };
            bindings.push((param.name, obj));
        }
        Ok(Some(bindings))
    }

    /// Call a user-defined function: bind arguments into a child field of
    /// the defining field and evaluate the body into the caller's graph.
    fn call_user(
        &mut self,
        user: UserFunc,
        bound: Option<ObjectId>,
        args: ArgInput,
        line: LineInfo,
        graph: &mut Graph,
    ) -> TraceResult<Option<Evaluated>> {
        let module = self.module;
        let def = module.func(user.def);
        if def.vararg || def.kwarg {
            return Err(TraceError::VariadicParams { line });
        }
        let Some(bindings) = self.bind_args(&def.params, bound, &args, user.field, graph, line)?
        else {
            return Ok(None);
        };
        let call_field = self.env.new_field(Some(user.field));
        for (name, obj) in bindings {
            let attr = self.env.resolve(call_field, name, AccessMode::Write);
            self.env.bind_attr_quiet(attr, obj);
        }
        self.ctx.call_depth += 1;
        let result = self.eval_body(&def.body, call_field, graph);
        self.ctx.call_depth -= 1;
        result
    }

    fn call_lambda(
        &mut self,
        lambda: LambdaFunc,
        bound: Option<ObjectId>,
        args: ArgInput,
        line: LineInfo,
        graph: &mut Graph,
    ) -> TraceResult<Option<Evaluated>> {
        let module = self.module;
        let ExprKind::Lambda { params, body } = &module.expr(lambda.expr).kind else {
            return Err(TraceError::internal(
                "lambda value does not reference a lambda expression",
                line,
            ));
        };
        let Some(bindings) = self.bind_args(params, bound, &args, lambda.field, graph, line)?
        else {
            return Ok(None);
        };
        let call_field = self.env.new_field(Some(lambda.field));
        for (name, obj) in bindings {
            let attr = self.env.resolve(call_field, name, AccessMode::Write);
            self.env.bind_attr_quiet(attr, obj);
        }
        self.ctx.call_depth += 1;
        let result = self.eval_expr(*body, call_field, graph);
        self.ctx.call_depth -= 1;
        result
    }

    /// Call an opaque operator through the catalog: emit a `Call` node and
    /// ask the registered rule for the symbolic result.
    fn call_op(
        &mut self,
        id: OpId,
        args: ArgInput,
        line: LineInfo,
        graph: &mut Graph,
    ) -> TraceResult<Option<Evaluated>> {
        let catalog = self.catalog;
        let Some(spec) = catalog.get(id) else {
            self.sink.warn("Unknown operator is called", line);
            return Ok(None);
        };

        if args.inputs.len() > spec.params.len() {
            self.sink.warn(
                format!("Too many arguments for operator \"{}\"", spec.name),
                line,
            );
            return Ok(None);
        }
        let mut slots: Vec<Option<ObjectId>> = vec![None; spec.params.len()];
        for (index, &obj) in args.inputs.iter().enumerate() {
            slots[index] = Some(obj);
        }
        for &(name, obj) in &args.keywords {
            let key = self.lookup(name);
            match spec.params.iter().position(|p| p.name == key) {
                Some(index) if slots[index].is_none() => slots[index] = Some(obj),
                Some(_) => {
                    self.sink.warn(
                        format!("Argument \"{key}\" given both positionally and by keyword"),
                        line,
                    );
                    return Ok(None);
                }
                None => {
                    self.sink.warn(
                        format!(
                            "Unexpected keyword argument \"{key}\" for operator \"{}\"",
                            spec.name
                        ),
                        line,
                    );
                    return Ok(None);
                }
            }
        }

        let mut values: Vec<ValueId> = Vec::with_capacity(slots.len());
        for (param, slot) in spec.params.iter().zip(slots) {
            match slot {
                Some(obj) => values.push(self.env.object_value(obj)),
                None if param.required => {
                    self.sink.warn(
                        format!(
                            "Argument \"{}\" is missing for operator \"{}\"",
                            param.name, spec.name
                        ),
                        line,
                    );
                    return Ok(None);
                }
                None => values.push(self.env.add_value(Value::none())),
            }
        }

        let mut result = spec.build_result(&OpArgs {
            env: self.env,
            values: &values,
        });
        let short_name = spec.name.rsplit('.').next().unwrap_or(&spec.name);
        result.name = format!("@F.{}.{}", line.line, short_name);
        let out = self.env.add_value(result);
        let mut node = Node::new(
            NodeKind::Call {
                name: spec.name.clone(),
            },
            values,
            line,
        );
        node.set_outputs(vec![out]);
        graph.add_node(node);
        Ok(Some(Evaluated::Obj(self.env.new_object(out))))
    }
}
