//! Control-flow evaluation: the branch/loop merge algorithms.
//!
//! Each construct evaluates its body/bodies into fresh sub-graphs under a
//! pushed history scope, then reconciles the captured read/write events into
//! a single composite node with explicit input/output value lists, applying
//! merged outputs back to the enclosing environment.

use rustc_hash::FxHashMap;
use skein_diagnostic::{TraceError, TraceResult};
use skein_graph::{
    AccessEvent, AccessMode, AttrRef, BuiltinFunc, Dtype, FieldId, Graph, Node, NodeKind,
    ObjectId, ScopeEvents, Suffix, Value, ValueId, ValueKind, WriteEvent,
};
use skein_ir::{ExprId, ExprKind, LineInfo, Name, StmtId, WithItem};

use crate::call::ArgInput;
use crate::context::FlagDirective;
use crate::exprs::const_truthiness;
use crate::tracer::{Evaluated, Tracer};

/// Per-(field, name) event summary of one branch body.
#[derive(Copy, Clone, Default)]
struct LoopPair {
    input: Option<AccessEvent>,
    output: Option<WriteEvent>,
}

/// Insertion-ordered (field, name) → events table for a single body.
#[derive(Default)]
struct LoopPairs {
    order: Vec<(FieldId, Name)>,
    map: FxHashMap<(FieldId, Name), LoopPair>,
}

impl LoopPairs {
    fn collect(events: &ScopeEvents) -> Self {
        let mut pairs = LoopPairs::default();
        for event in &events.inputs {
            pairs.entry(event.field, event.name).input = Some(*event);
        }
        // Later writes supersede earlier ones.
        for event in &events.outputs {
            pairs.entry(event.field, event.name).output = Some(*event);
        }
        pairs
    }

    fn entry(&mut self, field: FieldId, name: Name) -> &mut LoopPair {
        let key = (field, name);
        if !self.map.contains_key(&key) {
            self.order.push(key);
        }
        self.map.entry(key).or_default()
    }

    fn remove(&mut self, field: FieldId, name: Name) {
        let key = (field, name);
        self.map.remove(&key);
        self.order.retain(|k| *k != key);
    }
}

/// Two-branch variant of [`LoopPairs`] for the If merge.
#[derive(Copy, Clone, Default)]
struct BranchPair {
    true_input: Option<AccessEvent>,
    false_input: Option<AccessEvent>,
    true_output: Option<WriteEvent>,
    false_output: Option<WriteEvent>,
}

impl BranchPair {
    fn input_value(&self) -> Option<ValueId> {
        self.true_input
            .map(|e| e.input_value)
            .or(self.false_input.map(|e| e.input_value))
    }
}

#[derive(Default)]
struct BranchPairs {
    order: Vec<(FieldId, Name)>,
    map: FxHashMap<(FieldId, Name), BranchPair>,
}

impl BranchPairs {
    fn collect(true_events: &ScopeEvents, false_events: &ScopeEvents) -> Self {
        let mut pairs = BranchPairs::default();
        for event in &true_events.inputs {
            pairs.entry(event.field, event.name).true_input = Some(*event);
        }
        for event in &true_events.outputs {
            pairs.entry(event.field, event.name).true_output = Some(*event);
        }
        for event in &false_events.inputs {
            pairs.entry(event.field, event.name).false_input = Some(*event);
        }
        for event in &false_events.outputs {
            pairs.entry(event.field, event.name).false_output = Some(*event);
        }
        pairs
    }

    fn entry(&mut self, field: FieldId, name: Name) -> &mut BranchPair {
        let key = (field, name);
        if !self.map.contains_key(&key) {
            self.order.push(key);
        }
        self.map.entry(key).or_default()
    }
}

impl Tracer<'_> {
    // If.

    pub(crate) fn eval_if(
        &mut self,
        test: ExprId,
        body: &[StmtId],
        orelse: &[StmtId],
        line: LineInfo,
        field: FieldId,
        graph: &mut Graph,
    ) -> TraceResult<()> {
        let test_ev = self.eval_expr(test, field, graph)?;
        let Some(test_value) = self.try_get_value(test_ev.as_ref(), "if", line) else {
            return Ok(());
        };
        let test_const = const_truthiness(self.env.value(test_value));
        let if_guid = self.env.next_guid();

        // Branch bodies run strictly sequentially, each under its own
        // history scope. A decidable test skips the dead body entirely.
        let mut true_graph = Graph::new("True");
        let ((), true_events) = self.with_history(if_guid, |tracer| {
            if test_const == Some(false) {
                Ok(())
            } else {
                tracer.eval_body(body, field, &mut true_graph).map(|_| ())
            }
        })?;

        let mut false_graph = Graph::new("False");
        let ((), false_events) = self.with_history(if_guid, |tracer| {
            if test_const == Some(true) {
                Ok(())
            } else {
                tracer.eval_body(orelse, field, &mut false_graph).map(|_| ())
            }
        })?;

        let pairs = BranchPairs::collect(&true_events, &false_events);

        // Collect inputs, deduplicated by the outer value: names aliasing
        // the same value share one input slot, and both sub-graphs always
        // declare a slot (synthesizing a placeholder for the branch that
        // never referenced it).
        let mut input_order: Vec<ValueId> = Vec::new();
        let mut input_map: FxHashMap<ValueId, (ValueId, ValueId)> = FxHashMap::default();
        for key in &pairs.order {
            let pair = pairs.map[key];
            let Some(input_value) = pair.input_value() else {
                continue;
            };
            if input_map.contains_key(&input_value) {
                continue;
            }
            let true_body = match pair.true_input {
                Some(event) => event.body_value,
                None => self.env.fresh_like(input_value, Suffix::Input),
            };
            let false_body = match pair.false_input {
                Some(event) => event.body_value,
                None => self.env.fresh_like(input_value, Suffix::Input),
            };
            input_map.insert(input_value, (true_body, false_body));
            input_order.push(input_value);
        }

        let mut node_inputs = Vec::with_capacity(input_order.len());
        for &input_value in &input_order {
            let (true_body, false_body) = input_map[&input_value];
            node_inputs.push(input_value);
            true_graph.add_input_value(true_body);
            false_graph.add_input_value(false_body);
        }

        // Reconcile outputs.
        let mut node_outputs = Vec::new();
        for key in &pairs.order {
            let pair = pairs.map[key];
            let attr = AttrRef {
                field: key.0,
                name: key.1,
            };
            let body_inputs = pair.input_value().and_then(|v| input_map.get(&v).copied());

            if pair.true_output.is_none() && pair.false_output.is_none() {
                // Input-only pair: no merged output.
                continue;
            }

            // An untouched branch passes its input through; with no input
            // either, the binding was defined only in the other arm and a
            // dummy placeholder of matching type stands in.
            let true_out = match pair.true_output {
                Some(event) => event.body_value,
                None => match body_inputs {
                    Some((true_body, _)) => true_body,
                    None => {
                        let Some(false_event) = pair.false_output else {
                            return Err(TraceError::internal(
                                "merged output produced by neither branch",
                                line,
                            ));
                        };
                        self.env.fresh_like(false_event.body_value, Suffix::Dummy)
                    }
                },
            };
            let false_out = match pair.false_output {
                Some(event) => event.body_value,
                None => match body_inputs {
                    Some((_, false_body)) => false_body,
                    None => {
                        let Some(true_event) = pair.true_output else {
                            return Err(TraceError::internal(
                                "merged output produced by neither branch",
                                line,
                            ));
                        };
                        self.env.fresh_like(true_event.body_value, Suffix::Dummy)
                    }
                },
            };

            // Type agreement between the arms is a diagnostic, not a hard
            // failure; the non-placeholder arm decides the merged type.
            let true_typed =
                (!self.env.value(true_out).is_placeholder_type()).then_some(true_out);
            let false_typed =
                (!self.env.value(false_out).is_placeholder_type()).then_some(false_out);
            if let (Some(t), Some(f)) = (true_typed, false_typed) {
                if !self.env.value(t).same_kind(self.env.value(f)) {
                    self.sink.warn(
                        format!(
                            "Values with different types were generated for \"{}\" between true and false",
                            self.lookup(key.1)
                        ),
                        line,
                    );
                }
            }

            // A decidable test has exactly one live arm; its constant
            // payload survives the merge. An undecidable test erases
            // constants.
            let output = match test_const {
                Some(live) => {
                    let source = if live { true_out } else { false_out };
                    self.env.copy_of(source)
                }
                None => {
                    let source = true_typed.or(false_typed).unwrap_or(true_out);
                    self.env.fresh_like(source, Suffix::None)
                }
            };

            node_outputs.push(output);
            true_graph.add_output_value(true_out);
            false_graph.add_output_value(false_out);
            self.apply_merged_output(
                attr,
                pair.true_output.map(|e| e.obj),
                pair.false_output.map(|e| e.obj),
                output,
                line,
            )?;
        }

        let mut node = Node::new(
            NodeKind::If {
                test: test_value,
                true_graph,
                false_graph,
            },
            node_inputs,
            line,
        );
        node.set_outputs(node_outputs);
        graph.add_node(node);
        Ok(())
    }

    /// Apply one merged output back to its originating binding so code
    /// after the control construct sees the merged value.
    fn apply_merged_output(
        &mut self,
        attr: AttrRef,
        true_obj: Option<ObjectId>,
        false_obj: Option<ObjectId>,
        output: ValueId,
        line: LineInfo,
    ) -> TraceResult<()> {
        match (true_obj, false_obj) {
            (Some(obj), None) | (None, Some(obj)) => {
                self.env.revise_object(obj, output);
                self.env.revise_attr(attr, obj);
            }
            (Some(_), Some(_)) => {
                if let Some(obj) = self.env.attr_obj(attr) {
                    self.env.revise_object(obj, output);
                } else {
                    let obj = self.env.new_object(output);
                    self.env.revise_attr(attr, obj);
                }
            }
            (None, None) => {
                return Err(TraceError::internal(
                    "merged output bound in neither branch",
                    line,
                ));
            }
        }
        Ok(())
    }

    // For.

    pub(crate) fn eval_for(
        &mut self,
        target: ExprId,
        iter: ExprId,
        body: &[StmtId],
        line: LineInfo,
        field: FieldId,
        graph: &mut Graph,
    ) -> TraceResult<()> {
        let iter_ev = self.eval_expr(iter, field, graph)?;
        let Some(input_iter_value) = self.try_get_value(iter_ev.as_ref(), "for", line) else {
            return Ok(());
        };

        let target_name = match &self.module.expr(target).kind {
            ExprKind::Name(name) => *name,
            _ => {
                self.sink.warn("This for loop is not supported", line);
                return Ok(());
            }
        };

        // A loop over a compile-time-constant untyped sequence is not a
        // graph construct at all.
        if matches!(
            self.env.value(input_iter_value).kind,
            ValueKind::List {
                items: Some(_),
                elem_dtype: None,
            }
        ) {
            return self.eval_for_unroll(target_name, input_iter_value, body, field, graph);
        }

        let body_iter_value = self.env.fresh_like(input_iter_value, Suffix::Input);
        let for_guid = self.env.next_guid();

        let mut body_graph = Graph::new(format!("Body_{for_guid}"));
        let input_node = body_graph.add_node(Node::new(NodeKind::Input, vec![], line));

        let counter_value = self.env.add_value(Value::named(
            format!("for_counter_{for_guid}"),
            ValueKind::Number {
                constant: None,
                dtype: Some(Dtype::Int64),
            },
        ));
        let cond_value = self.env.add_value(Value::named(
            format!("for_cond_{for_guid}"),
            ValueKind::Bool { constant: None },
        ));

        let target_obj = match self.iterator_element(input_iter_value) {
            Some(obj) => obj,
            None => {
                self.sink.warn("Unknown iterable type", line);
                self.env.object_of(Value::unknown())
            }
        };
        let target_value = self.env.object_value(target_obj);

        let (keepgoing_value, events) = self.with_history(for_guid, |tracer| {
            let mut forgen = Node::new(
                NodeKind::ForGenerator,
                vec![counter_value, body_iter_value],
                line,
            );
            forgen.set_outputs(vec![target_value]);
            let target_attr = tracer.env.resolve(field, target_name, AccessMode::Read);
            tracer.env.revise_attr(target_attr, target_obj);
            body_graph.add_node(forgen);

            tracer.eval_body(body, field, &mut body_graph)?;

            // The body's keep-going binding if it produced one, else the
            // per-iteration condition placeholder. Break/continue do not
            // feed this.
            let keepgoing_name = tracer.module.intern("#keepgoing");
            let keepgoing_attr = tracer.env.resolve(field, keepgoing_name, AccessMode::Read);
            Ok(tracer.env.attr_value(keepgoing_attr).unwrap_or(cond_value))
        })?;

        // The body graph's fixed leading contract.
        body_graph.add_input_value(counter_value);
        body_graph.add_input_value(cond_value);
        body_graph.add_input_value(body_iter_value);
        body_graph.add_output_value(keepgoing_value);
        body_graph.add_output_value(body_iter_value);

        let mut node_inputs = vec![input_iter_value];
        let mut node_outputs = vec![self.env.fresh_like(input_iter_value, Suffix::None)];
        let mut input_node_outputs = Vec::new();

        let pairs = LoopPairs::collect(&events);
        for key in &pairs.order {
            let pair = pairs.map[key];
            let attr = AttrRef {
                field: key.0,
                name: key.1,
            };
            match (pair.input, pair.output) {
                (Some(input), output) => {
                    node_inputs.push(input.input_value);
                    body_graph.add_input_value(input.body_value);
                    match output {
                        Some(output) => {
                            body_graph.add_output_value(output.body_value);
                            let merged = self.env.fresh_like(output.body_value, Suffix::None);
                            node_outputs.push(merged);
                            self.apply_merged_output(attr, Some(output.obj), None, merged, line)?;
                        }
                        None => {
                            // Read-only: identity pass-through.
                            body_graph.add_output_value(input.body_value);
                            node_outputs.push(self.env.fresh_like(input.body_value, Suffix::None));
                        }
                    }
                }
                (None, Some(output)) => {
                    // Written without being read first: a dummy input pair
                    // distinguishes the first-iteration value from the
                    // fed-back one; the body-side version is produced by
                    // the Input node.
                    let dummy_outer = self.env.fresh_like(output.body_value, Suffix::Dummy);
                    let dummy_body = self.env.fresh_like(output.body_value, Suffix::Dummy);
                    node_inputs.push(dummy_outer);
                    body_graph.add_input_value(dummy_body);
                    input_node_outputs.push(dummy_body);

                    body_graph.add_output_value(output.body_value);
                    let merged = self.env.fresh_like(output.body_value, Suffix::None);
                    node_outputs.push(merged);
                    self.apply_merged_output(attr, Some(output.obj), None, merged, line)?;
                }
                (None, None) => {}
            }
        }

        body_graph.node_mut(input_node).set_outputs(input_node_outputs);

        let mut node = Node::new(
            NodeKind::For {
                cond: cond_value,
                body: body_graph,
            },
            node_inputs,
            line,
        );
        node.set_outputs(node_outputs);
        graph.add_node(node);
        Ok(())
    }

    /// Unrolled loop: bind each element in turn and evaluate the body
    /// directly against the enclosing environment and graph. Produces the
    /// same graph as inlining the body by hand.
    fn eval_for_unroll(
        &mut self,
        target_name: Name,
        iter_value: ValueId,
        body: &[StmtId],
        field: FieldId,
        graph: &mut Graph,
    ) -> TraceResult<()> {
        let items = match &self.env.value(iter_value).kind {
            ValueKind::List {
                items: Some(items), ..
            } => items.clone(),
            _ => return Ok(()),
        };
        for element in items {
            let attr = self.env.resolve(field, target_name, AccessMode::Write);
            self.env.revise_attr(attr, element);
            self.eval_body(body, field, graph)?;
        }
        Ok(())
    }

    // List comprehension.

    pub(crate) fn eval_listcomp(
        &mut self,
        elt: ExprId,
        target: ExprId,
        iter: ExprId,
        line: LineInfo,
        field: FieldId,
        graph: &mut Graph,
    ) -> TraceResult<Option<Evaluated>> {
        let iter_ev = self.eval_expr(iter, field, graph)?;
        let Some(iter_value) = self.try_get_value(iter_ev.as_ref(), "generator", line) else {
            return Ok(None);
        };

        let target_name = match &self.module.expr(target).kind {
            ExprKind::Name(name) => *name,
            _ => {
                self.sink.warn("This comprehension is not supported", line);
                return Ok(None);
            }
        };

        let guid = self.env.next_guid();
        let list_name = self
            .module
            .intern(&format!("@internal/listcomp_list_{guid}"));

        // The implicit result list is generated in the enclosing graph and
        // carried through the body via an internal binding.
        let list_value = self.env.add_value(Value::list(Some(Vec::new())));
        let list_obj = self.env.new_object(list_value);
        let mut generate = Node::new(
            NodeKind::Generate {
                what: skein_graph::GenerateKind::List,
            },
            vec![],
            line,
        );
        generate.set_outputs(vec![list_value]);
        graph.add_node(generate);

        let counter_value = self.env.add_value(Value::named(
            format!("@internal/listcomp_counter_{guid}"),
            ValueKind::Number {
                constant: None,
                dtype: Some(Dtype::Int64),
            },
        ));
        let cond_value = self.env.add_value(Value::named(
            format!("@internal/listcomp_cond_{guid}"),
            ValueKind::Bool { constant: None },
        ));

        let list_attr = self.env.resolve(field, list_name, AccessMode::Write);
        self.env.revise_attr(list_attr, list_obj);

        let target_obj = match self.iterator_element(iter_value) {
            Some(obj) => obj,
            None => {
                self.sink.warn("Unknown iterable type", line);
                self.env.object_of(Value::unknown())
            }
        };
        let target_value = self.env.object_value(target_obj);

        let mut body_graph = Graph::new(format!("Body_{guid}"));
        let ((), events) = self.with_history(guid, |tracer| {
            let mut forgen = Node::new(
                NodeKind::ForGenerator,
                vec![counter_value, iter_value],
                line,
            );
            forgen.set_outputs(vec![target_value]);
            let target_attr = tracer.env.resolve(field, target_name, AccessMode::Read);
            tracer.env.revise_attr(target_attr, target_obj);
            body_graph.add_node(forgen);

            let elt_ev = tracer.eval_expr(elt, field, &mut body_graph)?;
            let Some(elt_obj) = tracer.try_get_obj(elt_ev.as_ref(), "listcomp", line) else {
                return Ok(());
            };

            // Append through the internal binding; the read registers the
            // list as a loop-carried value.
            let list_read = tracer.env.resolve(field, list_name, AccessMode::Read);
            let Some(body_list_obj) = tracer.env.attr_obj(list_read) else {
                return Ok(());
            };
            tracer.call_builtin(
                BuiltinFunc::Append,
                Some(body_list_obj),
                ArgInput {
                    inputs: vec![elt_obj],
                    keywords: Vec::new(),
                },
                line,
                &mut body_graph,
            )?;
            Ok(())
        })?;

        body_graph.add_input_value(counter_value);
        body_graph.add_input_value(cond_value);
        body_graph.add_input_value(iter_value);
        body_graph.add_output_value(cond_value);
        body_graph.add_output_value(iter_value);

        let mut node_inputs = vec![iter_value];
        let mut node_outputs = vec![self.env.fresh_like(iter_value, Suffix::None)];

        let mut pairs = LoopPairs::collect(&events);
        // The loop variable is body-local.
        pairs.remove(field, target_name);

        for key in &pairs.order {
            let pair = pairs.map[key];
            let attr = AttrRef {
                field: key.0,
                name: key.1,
            };
            match (pair.input, pair.output) {
                (Some(input), output) => {
                    node_inputs.push(input.input_value);
                    body_graph.add_input_value(input.body_value);
                    match output {
                        Some(output) => {
                            body_graph.add_output_value(output.body_value);
                            let merged = self.env.fresh_like(output.body_value, Suffix::None);
                            node_outputs.push(merged);
                            self.apply_merged_output(attr, Some(output.obj), None, merged, line)?;
                        }
                        None => {
                            body_graph.add_output_value(input.body_value);
                            node_outputs.push(self.env.fresh_like(input.body_value, Suffix::None));
                        }
                    }
                }
                (None, Some(output)) => {
                    let outer = self.env.fresh_like(output.body_value, Suffix::None);
                    let body_side = self.env.fresh_like(output.body_value, Suffix::None);
                    node_inputs.push(outer);
                    body_graph.add_input_value(body_side);

                    body_graph.add_output_value(output.body_value);
                    let merged = self.env.fresh_like(output.body_value, Suffix::None);
                    node_outputs.push(merged);
                    self.apply_merged_output(attr, Some(output.obj), None, merged, line)?;
                }
                (None, None) => {}
            }
        }

        let mut node = Node::new(NodeKind::Listcomp { body: body_graph }, node_inputs, line);
        node.set_outputs(node_outputs);
        graph.add_node(node);

        let result_attr = self.env.resolve(field, list_name, AccessMode::Read);
        Ok(self.env.attr_obj(result_attr).map(Evaluated::Obj))
    }

    // With.

    /// `with` applies interpreter-level flags for the duration of a body.
    ///
    /// Enter-time, each context value's enter method (if present) is
    /// resolved and its result bound to the target name; the body runs
    /// under the directives collected by the header's directive calls, and
    /// the flags are released on every exit path. Exit-time, each context's
    /// exit method is called with three null placeholders; no real
    /// exception propagation is modeled.
    pub(crate) fn eval_with(
        &mut self,
        items: &[WithItem],
        body: &[StmtId],
        line: LineInfo,
        field: FieldId,
        graph: &mut Graph,
    ) -> TraceResult<()> {
        self.ctx.flags_cache.clear();

        let exit_name = self.module.intern("__exit__");
        let mut exit_funcs = Vec::new();
        for item in items {
            let Some(entered) = self.eval_withitem(item, field, graph, line)? else {
                continue;
            };
            if let Some(attr) = self.resolve_member(entered, exit_name) {
                if let Some(value) = self.env.attr_value(attr) {
                    if let Some(func) = self.env.value(value).as_func().copied() {
                        exit_funcs.push(func);
                    }
                }
            }
        }

        let saved = self.ctx.save_flags();
        let directives: Vec<FlagDirective> = self.ctx.flags_cache.drain(..).collect();
        for directive in &directives {
            match self.lookup(directive.name) {
                "unroll" => self.ctx.flags.for_unroll = true,
                "ignore_branch" => self.ctx.flags.ignore_branch = true,
                other => {
                    self.sink
                        .warn(format!("Unknown trace directive \"{other}\""), line);
                }
            }
        }

        let result = if self.ctx.flags.ignore_branch {
            Ok(None)
        } else {
            self.eval_body(body, field, graph)
        };
        // Flags are deactivated even when the body aborts early.
        self.ctx.restore_flags(saved);
        result?;

        for func in exit_funcs {
            let mut args = ArgInput::default();
            for _ in 0..3 {
                let none_obj = self.env.object_of(Value::none());
                args.inputs.push(none_obj);
            }
            self.call_func(func, args, line, graph)?;
        }
        Ok(())
    }

    fn eval_withitem(
        &mut self,
        item: &WithItem,
        field: FieldId,
        graph: &mut Graph,
        line: LineInfo,
    ) -> TraceResult<Option<ObjectId>> {
        let value_ev = self.eval_expr(item.context, field, graph)?;
        let Some(mut value_obj) = self.try_get_obj(value_ev.as_ref(), "withitem", line) else {
            self.sink
                .warn("It is possible that a with item is invalid", line);
            return Ok(None);
        };

        let enter_name = self.module.intern("__enter__");
        if let Some(attr) = self.resolve_member(value_obj, enter_name) {
            if let Some(value) = self.env.attr_value(attr) {
                if let Some(func) = self.env.value(value).as_func().copied() {
                    let entered = self.call_func(func, ArgInput::default(), line, graph)?;
                    if let Some(obj) = self.try_get_obj(entered.as_ref(), "withitem", line) {
                        value_obj = obj;
                    }
                }
            }
        }

        let value_obj = self.rewrap_scalar(value_obj);
        if let Some(var) = item.optional_var {
            if let Some(Evaluated::Attr(attr)) = self.eval_target(var, field, graph)? {
                let assigned = self.env.object_value(value_obj);
                graph.add_node(Node::new(NodeKind::Assign, vec![assigned], line));
                self.env.revise_attr(attr, value_obj);
            }
        }
        Ok(Some(value_obj))
    }
}
