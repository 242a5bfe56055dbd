//! The dispatcher: statement/expression evaluation entry points.

use skein_diagnostic::{DiagnosticSink, TraceError, TraceResult};
use skein_graph::{
    AccessMode, AttrRef, Env, FieldId, FuncKind, FuncValue, Graph, Node, NodeKind, ObjectId,
    ScopeEvents, Value, ValueId, ValueKind,
};
use skein_ir::{ExprId, ExprKind, FuncId, LineInfo, Module, Name, StmtId, StmtKind};

use crate::catalog::OpCatalog;
use crate::context::EvalCtx;
use crate::stack::ensure_sufficient_stack;

/// Result of evaluating one syntax-tree node.
///
/// An `Attr` is a live binding slot (assignable, history-tracked); an `Obj`
/// is a fresh object with no binding; `Targets` only appears when a tuple
/// expression is evaluated as a written target.
#[derive(Clone, Debug)]
pub enum Evaluated {
    Attr(AttrRef),
    Obj(ObjectId),
    Targets(Vec<Evaluated>),
}

/// The symbolic abstract interpreter.
///
/// One tracer exists per trace invocation; it owns the evaluation context
/// (flags, directive cache) and borrows the tree, catalog, environment and
/// diagnostics sink.
pub struct Tracer<'a> {
    pub module: &'a Module,
    pub catalog: &'a OpCatalog,
    pub env: &'a mut Env,
    pub sink: &'a mut DiagnosticSink,
    pub(crate) ctx: EvalCtx,
}

impl<'a> Tracer<'a> {
    pub fn new(
        module: &'a Module,
        catalog: &'a OpCatalog,
        env: &'a mut Env,
        sink: &'a mut DiagnosticSink,
    ) -> Self {
        Tracer {
            module,
            catalog,
            env,
            sink,
            ctx: EvalCtx::new(),
        }
    }

    #[inline]
    pub(crate) fn lookup(&self, name: Name) -> &'static str {
        self.module.lookup(name)
    }

    // Result coercions, mirroring the two-step attribute/object/value
    // indirection of the data model.

    /// Coerce an evaluation result to an object, warning on failure.
    pub(crate) fn try_get_obj(
        &mut self,
        value: Option<&Evaluated>,
        what: &str,
        line: LineInfo,
    ) -> Option<ObjectId> {
        match value {
            None => {
                self.sink
                    .warn(format!("Failed to get value in \"{what}\""), line);
                None
            }
            Some(Evaluated::Attr(attr)) => self.env.attr_obj(*attr),
            Some(Evaluated::Obj(obj)) => Some(*obj),
            Some(Evaluated::Targets(_)) => None,
        }
    }

    /// Coerce an evaluation result to a value. A `None`-typed value is
    /// itself treated as a failure unless `none_allowed`.
    pub(crate) fn try_get_value_impl(
        &mut self,
        value: Option<&Evaluated>,
        what: &str,
        line: LineInfo,
        none_allowed: bool,
    ) -> Option<ValueId> {
        let obj = self.try_get_obj(value, what, line)?;
        let value_id = self.env.object_value(obj);
        if !none_allowed && matches!(self.env.value(value_id).kind, ValueKind::None) {
            self.sink
                .warn(format!("Value in \"{what}\" is none"), line);
            return None;
        }
        Some(value_id)
    }

    pub(crate) fn try_get_value(
        &mut self,
        value: Option<&Evaluated>,
        what: &str,
        line: LineInfo,
    ) -> Option<ValueId> {
        self.try_get_value_impl(value, what, line, false)
    }

    pub(crate) fn try_get_value_allow_none(
        &mut self,
        value: Option<&Evaluated>,
        what: &str,
        line: LineInfo,
    ) -> Option<ValueId> {
        self.try_get_value_impl(value, what, line, true)
    }

    /// Scalar payloads are re-wrapped on assignment so rebinding one name
    /// does not alias another (containers and instances keep identity).
    pub(crate) fn rewrap_scalar(&mut self, obj: ObjectId) -> ObjectId {
        let value = self.env.object_value(obj);
        match self.env.value(value).kind {
            ValueKind::Number { .. }
            | ValueKind::Str { .. }
            | ValueKind::Bool { .. }
            | ValueKind::None
            | ValueKind::Tuple { .. } => self.env.new_object(value),
            _ => obj,
        }
    }

    /// Run `f` under a pushed history scope; the scope is popped on every
    /// exit path and its captured events are returned.
    pub(crate) fn with_history<R>(
        &mut self,
        id: u64,
        f: impl FnOnce(&mut Self) -> TraceResult<R>,
    ) -> TraceResult<(R, ScopeEvents)> {
        self.env.push_history(id);
        let result = f(self);
        let events = self.env.pop_history();
        Ok((result?, events))
    }

    // Statement dispatch.

    /// Evaluate one statement. Returns `Some` only for `return`, which ends
    /// the enclosing body.
    pub fn eval_stmt(
        &mut self,
        id: StmtId,
        field: FieldId,
        graph: &mut Graph,
    ) -> TraceResult<Option<Evaluated>> {
        ensure_sufficient_stack(|| self.eval_stmt_inner(id, field, graph))
    }

    fn eval_stmt_inner(
        &mut self,
        id: StmtId,
        field: FieldId,
        graph: &mut Graph,
    ) -> TraceResult<Option<Evaluated>> {
        let module = self.module;
        let stmt = module.stmt(id);
        let line = stmt.line;
        match &stmt.kind {
            StmtKind::Expr(expr) => {
                self.eval_expr(*expr, field, graph)?;
                Ok(None)
            }
            StmtKind::Assign { target, value } => {
                self.eval_assign(*target, *value, line, field, graph)?;
                Ok(None)
            }
            StmtKind::AugAssign { target, op, value } => {
                self.eval_aug_assign(*target, *op, *value, line, field, graph)?;
                Ok(None)
            }
            StmtKind::Return(expr) => {
                let value = self.eval_expr(*expr, field, graph)?;
                let Some(value_id) = self.try_get_value(value.as_ref(), "return", line) else {
                    self.sink.warn("Returned values are not found", line);
                    return Ok(None);
                };
                // Inside an inlined callee, return only ends the body; the
                // graph-level Return belongs to the outermost function.
                if self.ctx.call_depth == 0 {
                    graph.add_node(Node::new(NodeKind::Return, vec![value_id], line));
                }
                Ok(value)
            }
            StmtKind::If { test, body, orelse } => {
                self.eval_if(*test, body, orelse, line, field, graph)?;
                Ok(None)
            }
            StmtKind::For { target, iter, body } => {
                self.eval_for(*target, *iter, body, line, field, graph)?;
                Ok(None)
            }
            // Recognized but currently a no-op at the graph level; they do
            // not feed the loop's keep-going output.
            StmtKind::Break | StmtKind::Continue => Ok(None),
            StmtKind::With { items, body } => {
                self.eval_with(items, body, line, field, graph)?;
                Ok(None)
            }
        }
    }

    /// Evaluate a statement list; a `return` stops evaluation and yields
    /// its value.
    pub fn eval_body(
        &mut self,
        stmts: &[StmtId],
        field: FieldId,
        graph: &mut Graph,
    ) -> TraceResult<Option<Evaluated>> {
        for &stmt in stmts {
            let ret = self.eval_stmt(stmt, field, graph)?;
            if ret.is_some() {
                return Ok(ret);
            }
        }
        Ok(None)
    }

    // Expression dispatch.

    pub fn eval_expr(
        &mut self,
        id: ExprId,
        field: FieldId,
        graph: &mut Graph,
    ) -> TraceResult<Option<Evaluated>> {
        ensure_sufficient_stack(|| self.eval_expr_inner(id, field, graph))
    }

    fn eval_expr_inner(
        &mut self,
        id: ExprId,
        field: FieldId,
        graph: &mut Graph,
    ) -> TraceResult<Option<Evaluated>> {
        let module = self.module;
        let expr = module.expr(id);
        let line = expr.line;
        match &expr.kind {
            ExprKind::Num(n) => Ok(Some(self.literal(Value::number(Some(*n)), line))),
            ExprKind::Str(s) => {
                let text = self.lookup(*s).to_owned();
                Ok(Some(self.literal(Value::str_value(Some(text)), line)))
            }
            ExprKind::Bool(b) => Ok(Some(self.literal(Value::bool_value(Some(*b)), line))),
            ExprKind::NoneLit => Ok(Some(self.literal(Value::none(), line))),
            ExprKind::Name(name) => Ok(Some(Evaluated::Attr(self.env.resolve(
                field,
                *name,
                AccessMode::Read,
            )))),
            ExprKind::Attribute { value, attr } => {
                self.eval_attribute(*value, *attr, line, field, graph)
            }
            ExprKind::BinOp { op, left, right } => {
                self.eval_bin_op(*op, *left, *right, line, field, graph)
            }
            ExprKind::UnaryOp { op, operand } => {
                self.eval_unary_op(*op, *operand, line, field, graph)
            }
            ExprKind::BoolOp { op, values } => self.eval_bool_op(*op, values, line, field, graph),
            ExprKind::Compare { op, left, right } => {
                self.eval_compare(*op, *left, *right, line, field, graph)
            }
            ExprKind::Call {
                func,
                args,
                keywords,
            } => self.eval_call(*func, args, keywords, line, field, graph),
            ExprKind::Subscript { value, index } => {
                self.eval_subscript(*value, index, line, field, graph)
            }
            ExprKind::Tuple(elts) => self.eval_tuple(elts, line, field, graph),
            ExprKind::List(elts) => self.eval_list(elts, line, field, graph),
            ExprKind::Dict { keys, values } => self.eval_dict(keys, values, line, field, graph),
            ExprKind::ListComp { elt, target, iter } => {
                self.eval_listcomp(*elt, *target, *iter, line, field, graph)
            }
            ExprKind::Lambda { .. } => {
                let func = Value::func(FuncValue {
                    kind: FuncKind::Lambda(skein_graph::LambdaFunc { expr: id, field }),
                    bound: None,
                });
                Ok(Some(Evaluated::Obj(self.env.object_of(func))))
            }
        }
    }

    fn literal(&mut self, mut value: Value, line: LineInfo) -> Evaluated {
        value.name = format!("@C.{}", line.line);
        Evaluated::Obj(self.env.object_of(value))
    }

    /// Evaluate an expression as a written target.
    ///
    /// Only plain names, attribute accesses, and tuples thereof are
    /// assignable; anything else is a fatal trace error.
    pub(crate) fn eval_target(
        &mut self,
        id: ExprId,
        field: FieldId,
        graph: &mut Graph,
    ) -> TraceResult<Option<Evaluated>> {
        let module = self.module;
        let expr = module.expr(id);
        let line = expr.line;
        match &expr.kind {
            ExprKind::Name(name) => Ok(Some(Evaluated::Attr(self.env.resolve(
                field,
                *name,
                AccessMode::Write,
            )))),
            ExprKind::Tuple(elts) => {
                let mut targets = Vec::with_capacity(elts.len());
                for &elt in elts {
                    match self.eval_target(elt, field, graph)? {
                        Some(target) => targets.push(target),
                        None => return Ok(None),
                    }
                }
                Ok(Some(Evaluated::Targets(targets)))
            }
            ExprKind::Attribute { value, attr } => {
                let value_ev = self.eval_expr(*value, field, graph)?;
                let Some(obj) = self.try_get_obj(value_ev.as_ref(), "attribute", line) else {
                    self.sink.warn("Assigning value is not found", line);
                    return Ok(None);
                };
                let obj_field = self.env.object_field(obj);
                Ok(Some(Evaluated::Attr(self.env.resolve(
                    obj_field,
                    *attr,
                    AccessMode::Write,
                ))))
            }
            _ => Err(TraceError::UnsupportedTarget { line }),
        }
    }
}

/// Trace one function body into a complete root graph.
///
/// `module_field` is the defining field (module-level bindings: builtins,
/// catalog operators, host objects); `args` are the argument objects bound
/// positionally to the function's parameters, whose values become the
/// graph's declared inputs. Return values become the graph's declared
/// outputs.
pub fn trace_function(
    module: &Module,
    func: FuncId,
    catalog: &OpCatalog,
    env: &mut Env,
    module_field: FieldId,
    args: Vec<ObjectId>,
    sink: &mut DiagnosticSink,
) -> TraceResult<Graph> {
    let def = module.func(func);
    if def.vararg || def.kwarg {
        return Err(TraceError::VariadicParams { line: def.line });
    }

    tracing::debug!(func = module.lookup(def.name), "tracing function");
    let mut graph = Graph::new(module.lookup(def.name));
    let call_field = env.new_field(Some(module_field));

    if args.len() > def.params.len() {
        sink.warn("Too many arguments for traced function", def.line);
    }
    for (param, &obj) in def.params.iter().zip(args.iter()) {
        graph.add_input_value(env.object_value(obj));
        let attr = env.resolve(call_field, param.name, AccessMode::Write);
        env.bind_attr_quiet(attr, obj);
    }
    for param in def.params.iter().skip(args.len()) {
        sink.warn(
            format!(
                "Argument \"{}\" is missing; tracing with an unknown value",
                module.lookup(param.name)
            ),
            def.line,
        );
        let obj = env.object_of(Value::unknown());
        let attr = env.resolve(call_field, param.name, AccessMode::Write);
        env.bind_attr_quiet(attr, obj);
    }

    let mut tracer = Tracer::new(module, catalog, env, sink);
    tracer.eval_body(&def.body, call_field, &mut graph)?;

    let returns: Vec<ValueId> = graph
        .nodes()
        .iter()
        .filter(|node| matches!(node.kind, NodeKind::Return))
        .flat_map(|node| node.inputs.iter().copied())
        .collect();
    for value in returns {
        graph.add_output_value(value);
    }
    Ok(graph)
}
