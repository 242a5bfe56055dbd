//! End-to-end traces over hand-built syntax trees.

use pretty_assertions::assert_eq;
use skein_diagnostic::{DiagnosticSink, TraceError};
use skein_eval::{install_builtins, trace_function, OpCatalog, OpParam};
use skein_graph::{Dtype, Env, Graph, NodeKind, Value, ValueKind};
use skein_ir::{
    BinOp, CompareOp, ExprKind, FuncDef, FuncId, LineInfo, Module, ModuleBuilder, Param, StmtKind,
    WithItem,
};
use skein_shape::{Shape, ShapeElem};

/// Trace `func` with the given argument values and an empty catalog.
fn run(module: &Module, func: FuncId, args: Vec<Value>) -> (Graph, Env, DiagnosticSink) {
    run_with_catalog(module, func, args, &OpCatalog::new())
}

fn run_with_catalog(
    module: &Module,
    func: FuncId,
    args: Vec<Value>,
    catalog: &OpCatalog,
) -> (Graph, Env, DiagnosticSink) {
    let mut env = Env::new();
    let module_field = env.new_field(None);
    install_builtins(&mut env, module_field, module.interner());
    catalog.bind_module(&mut env, module_field, module.interner());
    let mut sink = DiagnosticSink::new();
    let arg_objs: Vec<_> = args.into_iter().map(|v| env.object_of(v)).collect();
    let graph = trace_function(module, func, catalog, &mut env, module_field, arg_objs, &mut sink)
        .expect("trace should succeed");
    (graph, env, sink)
}

fn node_labels(graph: &Graph) -> Vec<String> {
    graph.nodes().iter().map(|n| n.kind.label()).collect()
}

#[test]
fn add_two_parameters_produces_one_binop() {
    // def f(a, b): return a + b
    let mut b = ModuleBuilder::new();
    let line = LineInfo::new(1);
    let a_ref = b.name("a", line);
    let b_ref = b.name("b", line);
    let sum = b.expr(
        ExprKind::BinOp {
            op: BinOp::Add,
            left: a_ref,
            right: b_ref,
        },
        line,
    );
    let ret = b.stmt(StmtKind::Return(sum), line);
    let func = b.func(FuncDef {
        name: b.intern("f"),
        params: vec![
            Param {
                name: b.intern("a"),
                default: None,
            },
            Param {
                name: b.intern("b"),
                default: None,
            },
        ],
        vararg: false,
        kwarg: false,
        body: vec![ret],
        line,
    });
    let module = b.finish();

    let (graph, _env, sink) = run(
        &module,
        func,
        vec![Value::number(None), Value::number(None)],
    );

    assert!(sink.is_empty(), "unexpected diagnostics: {:?}", sink.diagnostics());
    let binops: Vec<_> = graph
        .nodes()
        .iter()
        .filter(|n| matches!(n.kind, NodeKind::BinOp { op: BinOp::Add }))
        .collect();
    assert_eq!(binops.len(), 1);
    // Inputs are exactly the two parameter values, the sole output is
    // returned.
    assert_eq!(binops[0].inputs, graph.input_values);
    assert_eq!(graph.output_values, binops[0].outputs);
}

#[test]
fn constant_operands_fold() {
    // def f(): x = 3 + 4; return x
    let mut b = ModuleBuilder::new();
    let line = LineInfo::new(1);
    let three = b.int(3, line);
    let four = b.int(4, line);
    let sum = b.expr(
        ExprKind::BinOp {
            op: BinOp::Add,
            left: three,
            right: four,
        },
        line,
    );
    let x_target = b.name("x", line);
    let assign = b.stmt(
        StmtKind::Assign {
            target: x_target,
            value: sum,
        },
        line,
    );
    let x_read = b.name("x", LineInfo::new(2));
    let ret = b.stmt(StmtKind::Return(x_read), LineInfo::new(2));
    let func = b.func(FuncDef {
        name: b.intern("f"),
        params: vec![],
        vararg: false,
        kwarg: false,
        body: vec![assign, ret],
        line,
    });
    let module = b.finish();

    let (graph, env, _sink) = run(&module, func, vec![]);
    assert_eq!(env.value(graph.output_values[0]).as_const_int(), Some(7));
}

#[test]
fn constant_true_branch_skips_else_and_keeps_constant() {
    // def f(): if True: x = 1
    //          return x
    let mut b = ModuleBuilder::new();
    let line = LineInfo::new(1);
    let test = b.bool_lit(true, line);
    let one = b.int(1, LineInfo::new(2));
    let x_target = b.name("x", LineInfo::new(2));
    let assign = b.stmt(
        StmtKind::Assign {
            target: x_target,
            value: one,
        },
        LineInfo::new(2),
    );
    let if_stmt = b.stmt(
        StmtKind::If {
            test,
            body: vec![assign],
            orelse: vec![],
        },
        line,
    );
    let x_read = b.name("x", LineInfo::new(3));
    let ret = b.stmt(StmtKind::Return(x_read), LineInfo::new(3));
    let func = b.func(FuncDef {
        name: b.intern("f"),
        params: vec![],
        vararg: false,
        kwarg: false,
        body: vec![if_stmt, ret],
        line,
    });
    let module = b.finish();

    let (graph, env, _sink) = run(&module, func, vec![]);

    let if_node = graph
        .nodes()
        .iter()
        .find(|n| matches!(n.kind, NodeKind::If { .. }))
        .expect("an If node");
    let NodeKind::If {
        true_graph,
        false_graph,
        ..
    } = &if_node.kind
    else {
        unreachable!();
    };
    // The dead false body emitted no nodes.
    assert!(false_graph.is_empty());
    assert!(!true_graph.is_empty());

    // The merged output for x carries the true arm's constant.
    assert_eq!(if_node.outputs.len(), 1);
    assert_eq!(env.value(if_node.outputs[0]).as_const_int(), Some(1));
    assert_eq!(env.value(graph.output_values[0]).as_const_int(), Some(1));
}

#[test]
fn branch_merge_with_undecidable_test_erases_constants() {
    // def f(c): if c: x = 1 else: x = 2
    //           return x
    let mut b = ModuleBuilder::new();
    let line = LineInfo::new(1);
    let test = b.name("c", line);
    let one = b.int(1, LineInfo::new(2));
    let x1 = b.name("x", LineInfo::new(2));
    let assign1 = b.stmt(StmtKind::Assign { target: x1, value: one }, LineInfo::new(2));
    let two = b.int(2, LineInfo::new(3));
    let x2 = b.name("x", LineInfo::new(3));
    let assign2 = b.stmt(StmtKind::Assign { target: x2, value: two }, LineInfo::new(3));
    let if_stmt = b.stmt(
        StmtKind::If {
            test,
            body: vec![assign1],
            orelse: vec![assign2],
        },
        line,
    );
    let x_read = b.name("x", LineInfo::new(4));
    let ret = b.stmt(StmtKind::Return(x_read), LineInfo::new(4));
    let func = b.func(FuncDef {
        name: b.intern("f"),
        params: vec![Param {
            name: b.intern("c"),
            default: None,
        }],
        vararg: false,
        kwarg: false,
        body: vec![if_stmt, ret],
        line,
    });
    let module = b.finish();

    let (graph, env, sink) = run(&module, func, vec![Value::bool_value(None)]);

    // Exactly one merged output for x, typed as a number, with no constant
    // leaking through the unknown test.
    let if_node = graph
        .nodes()
        .iter()
        .find(|n| matches!(n.kind, NodeKind::If { .. }))
        .expect("an If node");
    assert_eq!(if_node.outputs.len(), 1);
    let merged = env.value(if_node.outputs[0]);
    assert!(matches!(merged.kind, ValueKind::Number { .. }));
    assert_eq!(merged.as_const_int(), None);
    assert!(!sink.contains("different types"));
}

#[test]
fn branch_type_mismatch_is_a_diagnostic_not_a_failure() {
    // def f(c): if c: x = 1 else: x = "s"
    let mut b = ModuleBuilder::new();
    let line = LineInfo::new(1);
    let test = b.name("c", line);
    let one = b.int(1, LineInfo::new(2));
    let x1 = b.name("x", LineInfo::new(2));
    let assign1 = b.stmt(StmtKind::Assign { target: x1, value: one }, LineInfo::new(2));
    let s = b.str_lit("s", LineInfo::new(3));
    let x2 = b.name("x", LineInfo::new(3));
    let assign2 = b.stmt(StmtKind::Assign { target: x2, value: s }, LineInfo::new(3));
    let if_stmt = b.stmt(
        StmtKind::If {
            test,
            body: vec![assign1],
            orelse: vec![assign2],
        },
        line,
    );
    let func = b.func(FuncDef {
        name: b.intern("f"),
        params: vec![Param {
            name: b.intern("c"),
            default: None,
        }],
        vararg: false,
        kwarg: false,
        body: vec![if_stmt],
        line,
    });
    let module = b.finish();

    let (graph, _env, sink) = run(&module, func, vec![Value::bool_value(None)]);
    assert!(sink.contains("different types"));
    // The graph is still emitted.
    assert!(graph
        .nodes()
        .iter()
        .any(|n| matches!(n.kind, NodeKind::If { .. })));
}

#[test]
fn loop_over_range_is_not_unrolled() {
    // def f(s): for i in range(3): s = s + i
    //           return s
    let mut b = ModuleBuilder::new();
    let line = LineInfo::new(1);
    let range_fn = b.name("range", line);
    let three = b.int(3, line);
    let range_call = b.expr(
        ExprKind::Call {
            func: range_fn,
            args: vec![three],
            keywords: vec![],
        },
        line,
    );
    let i_target = b.name("i", line);
    let s_read = b.name("s", LineInfo::new(2));
    let i_read = b.name("i", LineInfo::new(2));
    let sum = b.expr(
        ExprKind::BinOp {
            op: BinOp::Add,
            left: s_read,
            right: i_read,
        },
        LineInfo::new(2),
    );
    let s_target = b.name("s", LineInfo::new(2));
    let assign = b.stmt(
        StmtKind::Assign {
            target: s_target,
            value: sum,
        },
        LineInfo::new(2),
    );
    let for_stmt = b.stmt(
        StmtKind::For {
            target: i_target,
            iter: range_call,
            body: vec![assign],
        },
        line,
    );
    let s_final = b.name("s", LineInfo::new(3));
    let ret = b.stmt(StmtKind::Return(s_final), LineInfo::new(3));
    let func = b.func(FuncDef {
        name: b.intern("f"),
        params: vec![Param {
            name: b.intern("s"),
            default: None,
        }],
        vararg: false,
        kwarg: false,
        body: vec![for_stmt, ret],
        line,
    });
    let module = b.finish();

    let (graph, _env, _sink) = run(&module, func, vec![Value::number(None)]);

    let for_nodes: Vec<_> = graph
        .nodes()
        .iter()
        .filter(|n| matches!(n.kind, NodeKind::For { .. }))
        .collect();
    assert_eq!(for_nodes.len(), 1);
    let for_node = for_nodes[0];

    // s flows in: its parameter value is among the node inputs.
    let s_param = graph.input_values[0];
    assert!(for_node.inputs.contains(&s_param));

    // s flows out: the returned value is among the node outputs.
    let returned = graph.output_values[0];
    assert!(for_node.outputs.contains(&returned));

    // The loop variable is bound by a ForGenerator inside the body, and
    // the body declares the keep-going output first.
    let NodeKind::For { body, .. } = &for_node.kind else {
        unreachable!();
    };
    assert!(body
        .nodes()
        .iter()
        .any(|n| matches!(n.kind, NodeKind::ForGenerator)));
    assert!(body.output_values.len() >= 2);
}

#[test]
fn constant_list_loop_unrolls_to_inlined_bodies() {
    // def f(s): for i in [1, 2]: s = s + i
    //           return s
    let mut b = ModuleBuilder::new();
    let line = LineInfo::new(1);
    let one = b.int(1, line);
    let two = b.int(2, line);
    let list = b.expr(ExprKind::List(vec![one, two]), line);
    let i_target = b.name("i", line);
    let s_read = b.name("s", LineInfo::new(2));
    let i_read = b.name("i", LineInfo::new(2));
    let sum = b.expr(
        ExprKind::BinOp {
            op: BinOp::Add,
            left: s_read,
            right: i_read,
        },
        LineInfo::new(2),
    );
    let s_target = b.name("s", LineInfo::new(2));
    let assign = b.stmt(
        StmtKind::Assign {
            target: s_target,
            value: sum,
        },
        LineInfo::new(2),
    );
    let for_stmt = b.stmt(
        StmtKind::For {
            target: i_target,
            iter: list,
            body: vec![assign],
        },
        line,
    );
    let s_final = b.name("s", LineInfo::new(3));
    let ret = b.stmt(StmtKind::Return(s_final), LineInfo::new(3));
    let func = b.func(FuncDef {
        name: b.intern("f"),
        params: vec![Param {
            name: b.intern("s"),
            default: None,
        }],
        vararg: false,
        kwarg: false,
        body: vec![for_stmt, ret],
        line,
    });
    let module = b.finish();

    // Hand-inlined equivalent: s = s + 1; s = s + 2
    let mut m = ModuleBuilder::new();
    let s1 = m.name("s", LineInfo::new(2));
    let one = m.int(1, LineInfo::new(2));
    let sum1 = m.expr(
        ExprKind::BinOp {
            op: BinOp::Add,
            left: s1,
            right: one,
        },
        LineInfo::new(2),
    );
    let s1t = m.name("s", LineInfo::new(2));
    let a1 = m.stmt(StmtKind::Assign { target: s1t, value: sum1 }, LineInfo::new(2));
    let s2 = m.name("s", LineInfo::new(2));
    let two = m.int(2, LineInfo::new(2));
    let sum2 = m.expr(
        ExprKind::BinOp {
            op: BinOp::Add,
            left: s2,
            right: two,
        },
        LineInfo::new(2),
    );
    let s2t = m.name("s", LineInfo::new(2));
    let a2 = m.stmt(StmtKind::Assign { target: s2t, value: sum2 }, LineInfo::new(2));
    let s_final = m.name("s", LineInfo::new(3));
    let ret2 = m.stmt(StmtKind::Return(s_final), LineInfo::new(3));
    let inline_func = m.func(FuncDef {
        name: m.intern("f"),
        params: vec![Param {
            name: m.intern("s"),
            default: None,
        }],
        vararg: false,
        kwarg: false,
        body: vec![a1, a2, ret2],
        line: LineInfo::new(1),
    });
    let inline_module = m.finish();

    let (unrolled, env_a, _) = run(&module, func, vec![Value::int(0)]);
    let (inlined, env_b, _) = run(&inline_module, inline_func, vec![Value::int(0)]);

    // No loop node survives unrolling.
    assert!(!unrolled
        .nodes()
        .iter()
        .any(|n| matches!(n.kind, NodeKind::For { .. })));

    // Same node sequence as the hand-inlined version, modulo the literal
    // list's own Generate node.
    let unrolled_labels: Vec<String> = node_labels(&unrolled)
        .into_iter()
        .filter(|l| !l.starts_with("Generate"))
        .collect();
    assert_eq!(unrolled_labels, node_labels(&inlined));

    // Identical final binding.
    assert_eq!(env_a.value(unrolled.output_values[0]).as_const_int(), Some(3));
    assert_eq!(env_b.value(inlined.output_values[0]).as_const_int(), Some(3));
}

#[test]
fn unroll_directive_unrolls_constant_range() {
    // def f(s):
    //     with flags.unroll():
    //         for i in range(2): s = s + i
    //     return s
    let mut b = ModuleBuilder::new();
    let line = LineInfo::new(1);
    let flags = b.name("flags", line);
    let unroll_attr = b.expr(
        ExprKind::Attribute {
            value: flags,
            attr: b.intern("unroll"),
        },
        line,
    );
    let directive = b.expr(
        ExprKind::Call {
            func: unroll_attr,
            args: vec![],
            keywords: vec![],
        },
        line,
    );
    let range_fn = b.name("range", LineInfo::new(2));
    let two = b.int(2, LineInfo::new(2));
    let range_call = b.expr(
        ExprKind::Call {
            func: range_fn,
            args: vec![two],
            keywords: vec![],
        },
        LineInfo::new(2),
    );
    let i_target = b.name("i", LineInfo::new(2));
    let s_read = b.name("s", LineInfo::new(3));
    let i_read = b.name("i", LineInfo::new(3));
    let sum = b.expr(
        ExprKind::BinOp {
            op: BinOp::Add,
            left: s_read,
            right: i_read,
        },
        LineInfo::new(3),
    );
    let s_target = b.name("s", LineInfo::new(3));
    let assign = b.stmt(
        StmtKind::Assign {
            target: s_target,
            value: sum,
        },
        LineInfo::new(3),
    );
    let for_stmt = b.stmt(
        StmtKind::For {
            target: i_target,
            iter: range_call,
            body: vec![assign],
        },
        LineInfo::new(2),
    );
    let with_stmt = b.stmt(
        StmtKind::With {
            items: vec![WithItem {
                context: directive,
                optional_var: None,
            }],
            body: vec![for_stmt],
        },
        line,
    );
    let s_final = b.name("s", LineInfo::new(4));
    let ret = b.stmt(StmtKind::Return(s_final), LineInfo::new(4));
    let func = b.func(FuncDef {
        name: b.intern("f"),
        params: vec![Param {
            name: b.intern("s"),
            default: None,
        }],
        vararg: false,
        kwarg: false,
        body: vec![with_stmt, ret],
        line,
    });
    let module = b.finish();

    let (graph, env, _sink) = run(&module, func, vec![Value::int(0)]);

    assert!(!graph
        .nodes()
        .iter()
        .any(|n| matches!(n.kind, NodeKind::For { .. })));
    // s = 0 + 0 + 1
    assert_eq!(env.value(graph.output_values[0]).as_const_int(), Some(1));
}

#[test]
fn list_comprehension_produces_one_listcomp_node() {
    // def f(xs): return [y for y in xs]
    let mut b = ModuleBuilder::new();
    let line = LineInfo::new(1);
    let y_elt = b.name("y", line);
    let y_target = b.name("y", line);
    let xs = b.name("xs", line);
    let comp = b.expr(
        ExprKind::ListComp {
            elt: y_elt,
            target: y_target,
            iter: xs,
        },
        line,
    );
    let ret = b.stmt(StmtKind::Return(comp), line);
    let func = b.func(FuncDef {
        name: b.intern("f"),
        params: vec![Param {
            name: b.intern("xs"),
            default: None,
        }],
        vararg: false,
        kwarg: false,
        body: vec![ret],
        line,
    });
    let module = b.finish();

    let xs_value = Value::new(ValueKind::List {
        items: None,
        elem_dtype: Some(Dtype::Float32),
    });
    let (graph, env, _sink) = run(&module, func, vec![xs_value]);

    let comp_nodes: Vec<_> = graph
        .nodes()
        .iter()
        .filter(|n| matches!(n.kind, NodeKind::Listcomp { .. }))
        .collect();
    assert_eq!(comp_nodes.len(), 1);
    let NodeKind::Listcomp { body } = &comp_nodes[0].kind else {
        unreachable!();
    };
    assert!(body
        .nodes()
        .iter()
        .any(|n| matches!(n.kind, NodeKind::ForGenerator)));
    assert!(body
        .nodes()
        .iter()
        .any(|n| matches!(&n.kind, NodeKind::Call { name } if name == "list.append")));

    // The comprehension's value is a list.
    assert!(matches!(
        env.value(graph.output_values[0]).kind,
        ValueKind::List { .. }
    ));
}

#[test]
fn aggregate_over_discrete_operands_builds_implicit_list() {
    // def f(): return min(3, 5)
    let mut b = ModuleBuilder::new();
    let line = LineInfo::new(1);
    let min_fn = b.name("min", line);
    let three = b.int(3, line);
    let five = b.int(5, line);
    let call = b.expr(
        ExprKind::Call {
            func: min_fn,
            args: vec![three, five],
            keywords: vec![],
        },
        line,
    );
    let ret = b.stmt(StmtKind::Return(call), line);
    let func = b.func(FuncDef {
        name: b.intern("f"),
        params: vec![],
        vararg: false,
        kwarg: false,
        body: vec![ret],
        line,
    });
    let module = b.finish();

    let (graph, env, _sink) = run(&module, func, vec![]);

    let labels = node_labels(&graph);
    assert!(labels.iter().any(|l| l == "Generate(List)"));
    assert!(labels.iter().any(|l| l == "Aggregate(Min)"));
    assert_eq!(env.value(graph.output_values[0]).as_const_int(), Some(3));
}

#[test]
fn tuple_unpacking_assigns_elementwise() {
    // def f(): a, b = (1, 2); return a + b
    let mut b = ModuleBuilder::new();
    let line = LineInfo::new(1);
    let one = b.int(1, line);
    let two = b.int(2, line);
    let tuple = b.expr(ExprKind::Tuple(vec![one, two]), line);
    let a_t = b.name("a", line);
    let b_t = b.name("b", line);
    let targets = b.expr(ExprKind::Tuple(vec![a_t, b_t]), line);
    let assign = b.stmt(
        StmtKind::Assign {
            target: targets,
            value: tuple,
        },
        line,
    );
    let a_r = b.name("a", LineInfo::new(2));
    let b_r = b.name("b", LineInfo::new(2));
    let sum = b.expr(
        ExprKind::BinOp {
            op: BinOp::Add,
            left: a_r,
            right: b_r,
        },
        LineInfo::new(2),
    );
    let ret = b.stmt(StmtKind::Return(sum), LineInfo::new(2));
    let func = b.func(FuncDef {
        name: b.intern("f"),
        params: vec![],
        vararg: false,
        kwarg: false,
        body: vec![assign, ret],
        line,
    });
    let module = b.finish();

    let (graph, env, _sink) = run(&module, func, vec![]);
    assert_eq!(env.value(graph.output_values[0]).as_const_int(), Some(3));
}

#[test]
fn variadic_parameters_are_fatal() {
    let mut b = ModuleBuilder::new();
    let line = LineInfo::new(1);
    let func = b.func(FuncDef {
        name: b.intern("f"),
        params: vec![],
        vararg: true,
        kwarg: false,
        body: vec![],
        line,
    });
    let module = b.finish();

    let mut env = Env::new();
    let module_field = env.new_field(None);
    install_builtins(&mut env, module_field, module.interner());
    let catalog = OpCatalog::new();
    let mut sink = DiagnosticSink::new();
    let result = trace_function(
        &module,
        func,
        &catalog,
        &mut env,
        module_field,
        vec![],
        &mut sink,
    );
    assert!(matches!(result, Err(TraceError::VariadicParams { .. })));
}

#[test]
fn unresolved_call_is_a_diagnostic_with_null_result() {
    // def f(): x = mystery(); return x
    let mut b = ModuleBuilder::new();
    let line = LineInfo::new(1);
    let mystery = b.name("mystery", line);
    let call = b.expr(
        ExprKind::Call {
            func: mystery,
            args: vec![],
            keywords: vec![],
        },
        line,
    );
    let x_t = b.name("x", line);
    let assign = b.stmt(StmtKind::Assign { target: x_t, value: call }, line);
    let func = b.func(FuncDef {
        name: b.intern("f"),
        params: vec![],
        vararg: false,
        kwarg: false,
        body: vec![assign],
        line,
    });
    let module = b.finish();

    let (_graph, _env, sink) = run(&module, func, vec![]);
    assert!(sink.contains("Unknown function"));
}

#[test]
fn catalog_operator_emits_call_with_symbolic_result() {
    // def f(x): return ops.relu(x)
    let mut b = ModuleBuilder::new();
    let line = LineInfo::new(1);
    let ops = b.name("ops", line);
    let relu = b.expr(
        ExprKind::Attribute {
            value: ops,
            attr: b.intern("relu"),
        },
        line,
    );
    let x = b.name("x", line);
    let call = b.expr(
        ExprKind::Call {
            func: relu,
            args: vec![x],
            keywords: vec![],
        },
        line,
    );
    let ret = b.stmt(StmtKind::Return(call), line);
    let func = b.func(FuncDef {
        name: b.intern("f"),
        params: vec![Param {
            name: b.intern("x"),
            default: None,
        }],
        vararg: false,
        kwarg: false,
        body: vec![ret],
        line,
    });
    let module = b.finish();

    let mut catalog = OpCatalog::new();
    catalog.register("ops.relu", vec![OpParam::required("x")], |args| {
        match args.value(0) {
            Some(v) => v.fresh_same_type(),
            None => Value::tensor(Shape::new(), None),
        }
    });

    let shape: Shape = [ShapeElem::known(2), ShapeElem::var("n")]
        .into_iter()
        .collect();
    let (graph, env, sink) = run_with_catalog(
        &module,
        func,
        vec![Value::tensor(shape, Some(Dtype::Float32))],
        &catalog,
    );

    assert!(sink.is_empty(), "unexpected diagnostics: {:?}", sink.diagnostics());
    let call_node = graph
        .nodes()
        .iter()
        .find(|n| matches!(&n.kind, NodeKind::Call { name } if name == "ops.relu"))
        .expect("a Call node for the operator");
    assert_eq!(call_node.inputs, graph.input_values);

    let result = env.value(graph.output_values[0]);
    let ValueKind::Tensor { shape, dtype } = &result.kind else {
        panic!("expected a tensor result, got {result:?}");
    };
    assert_eq!(dtype, &Some(Dtype::Float32));
    assert_eq!(shape.len(), 2);
}

#[test]
fn hasattr_materializes_tensor_shape() {
    // def f(t): return hasattr(t, "shape")
    let mut b = ModuleBuilder::new();
    let line = LineInfo::new(1);
    let hasattr_fn = b.name("hasattr", line);
    let t = b.name("t", line);
    let name = b.str_lit("shape", line);
    let call = b.expr(
        ExprKind::Call {
            func: hasattr_fn,
            args: vec![t, name],
            keywords: vec![],
        },
        line,
    );
    let ret = b.stmt(StmtKind::Return(call), line);
    let func = b.func(FuncDef {
        name: b.intern("f"),
        params: vec![Param {
            name: b.intern("t"),
            default: None,
        }],
        vararg: false,
        kwarg: false,
        body: vec![ret],
        line,
    });
    let module = b.finish();

    let shape: Shape = [ShapeElem::known(4)].into_iter().collect();
    let (graph, env, _sink) = run(&module, func, vec![Value::tensor(shape, None)]);
    assert_eq!(
        env.value(graph.output_values[0]).as_const_bool(),
        Some(true)
    );
}

#[test]
fn user_defined_call_inlines_into_the_caller_graph() {
    // def helper(a): return a + 1
    // def f(x): return helper(x)
    let mut b = ModuleBuilder::new();
    let line = LineInfo::new(1);
    let a_read = b.name("a", line);
    let one = b.int(1, line);
    let sum = b.expr(
        ExprKind::BinOp {
            op: BinOp::Add,
            left: a_read,
            right: one,
        },
        line,
    );
    let helper_ret = b.stmt(StmtKind::Return(sum), line);
    let helper = b.func(FuncDef {
        name: b.intern("helper"),
        params: vec![Param {
            name: b.intern("a"),
            default: None,
        }],
        vararg: false,
        kwarg: false,
        body: vec![helper_ret],
        line,
    });

    let line2 = LineInfo::new(3);
    let helper_ref = b.name("helper", line2);
    let x_read = b.name("x", line2);
    let call = b.expr(
        ExprKind::Call {
            func: helper_ref,
            args: vec![x_read],
            keywords: vec![],
        },
        line2,
    );
    let ret = b.stmt(StmtKind::Return(call), line2);
    let func = b.func(FuncDef {
        name: b.intern("f"),
        params: vec![Param {
            name: b.intern("x"),
            default: None,
        }],
        vararg: false,
        kwarg: false,
        body: vec![ret],
        line: line2,
    });
    let module = b.finish();

    let mut env = Env::new();
    let module_field = env.new_field(None);
    install_builtins(&mut env, module_field, module.interner());
    // The host binds the helper into the defining field.
    let helper_obj = env.object_of(Value::named(
        "helper",
        ValueKind::Func(skein_graph::FuncValue::user(helper, module_field)),
    ));
    let helper_attr = env.resolve(
        module_field,
        module.intern("helper"),
        skein_graph::AccessMode::Write,
    );
    env.bind_attr_quiet(helper_attr, helper_obj);

    let catalog = OpCatalog::new();
    let mut sink = DiagnosticSink::new();
    let arg = env.object_of(Value::int(2));
    let graph = trace_function(
        &module,
        func,
        &catalog,
        &mut env,
        module_field,
        vec![arg],
        &mut sink,
    )
    .expect("trace should succeed");

    // The callee's body inlined: one BinOp, and only the outer return
    // produced a Return node.
    let returns = graph
        .nodes()
        .iter()
        .filter(|n| matches!(n.kind, NodeKind::Return))
        .count();
    assert_eq!(returns, 1);
    assert_eq!(env.value(graph.output_values[0]).as_const_int(), Some(3));
}

#[test]
fn lambda_call_binds_parameters() {
    // def f(): g = lambda a: a + 1; return g(2)
    let mut b = ModuleBuilder::new();
    let line = LineInfo::new(1);
    let a_read = b.name("a", line);
    let one = b.int(1, line);
    let body = b.expr(
        ExprKind::BinOp {
            op: BinOp::Add,
            left: a_read,
            right: one,
        },
        line,
    );
    let lambda = b.expr(
        ExprKind::Lambda {
            params: vec![Param {
                name: b.intern("a"),
                default: None,
            }],
            body,
        },
        line,
    );
    let g_target = b.name("g", line);
    let assign = b.stmt(
        StmtKind::Assign {
            target: g_target,
            value: lambda,
        },
        line,
    );
    let g_read = b.name("g", LineInfo::new(2));
    let two = b.int(2, LineInfo::new(2));
    let call = b.expr(
        ExprKind::Call {
            func: g_read,
            args: vec![two],
            keywords: vec![],
        },
        LineInfo::new(2),
    );
    let ret = b.stmt(StmtKind::Return(call), LineInfo::new(2));
    let func = b.func(FuncDef {
        name: b.intern("f"),
        params: vec![],
        vararg: false,
        kwarg: false,
        body: vec![assign, ret],
        line,
    });
    let module = b.finish();

    let (graph, env, _sink) = run(&module, func, vec![]);
    assert_eq!(env.value(graph.output_values[0]).as_const_int(), Some(3));
}

#[test]
fn compare_folds_all_constant_forms() {
    // def f(): return 3 < 4
    let mut b = ModuleBuilder::new();
    let line = LineInfo::new(1);
    let three = b.int(3, line);
    let four = b.int(4, line);
    let cmp = b.expr(
        ExprKind::Compare {
            op: CompareOp::Lt,
            left: three,
            right: four,
        },
        line,
    );
    let ret = b.stmt(StmtKind::Return(cmp), line);
    let func = b.func(FuncDef {
        name: b.intern("f"),
        params: vec![],
        vararg: false,
        kwarg: false,
        body: vec![ret],
        line,
    });
    let module = b.finish();

    let (graph, env, _sink) = run(&module, func, vec![]);
    assert_eq!(
        env.value(graph.output_values[0]).as_const_bool(),
        Some(true)
    );
}
