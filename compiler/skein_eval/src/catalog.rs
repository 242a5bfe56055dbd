//! The opaque-operator catalog boundary.
//!
//! The tracer performs no numeric computation for external operators; it
//! resolves qualified names through this registry, emits `Call` nodes, and
//! asks the registered rule for the symbolic result value.

use rustc_hash::FxHashMap;
use skein_graph::{Env, FieldId, FuncValue, OpId, Value, ValueId};
use skein_ir::Interner;

/// A formal parameter of an opaque operator.
#[derive(Clone, Debug)]
pub struct OpParam {
    pub name: String,
    pub required: bool,
}

impl OpParam {
    pub fn required(name: impl Into<String>) -> Self {
        OpParam {
            name: name.into(),
            required: true,
        }
    }

    pub fn optional(name: impl Into<String>) -> Self {
        OpParam {
            name: name.into(),
            required: false,
        }
    }
}

/// Argument view handed to a symbolic result builder.
pub struct OpArgs<'a> {
    pub env: &'a Env,
    /// Argument values in call order (positional, then keywords).
    pub values: &'a [ValueId],
}

impl OpArgs<'_> {
    pub fn value(&self, index: usize) -> Option<&Value> {
        self.values.get(index).map(|&id| self.env.value(id))
    }
}

/// Symbolic return-value rule of one operator.
type ResultBuilder = Box<dyn Fn(&OpArgs<'_>) -> Value>;

/// One catalog entry: call signature plus the symbolic return-type rule.
pub struct OpSpec {
    pub name: String,
    pub params: Vec<OpParam>,
    result: ResultBuilder,
}

impl OpSpec {
    pub fn build_result(&self, args: &OpArgs<'_>) -> Value {
        (self.result)(args)
    }
}

/// Registry of opaque operators, keyed by qualified name (`ops.matmul`).
#[derive(Default)]
pub struct OpCatalog {
    ops: Vec<OpSpec>,
    by_name: FxHashMap<String, OpId>,
}

impl OpCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an operator and return its id.
    pub fn register<F>(&mut self, name: impl Into<String>, params: Vec<OpParam>, result: F) -> OpId
    where
        F: Fn(&OpArgs<'_>) -> Value + 'static,
    {
        let name = name.into();
        let id = OpId(self.ops.len() as u32);
        self.by_name.insert(name.clone(), id);
        self.ops.push(OpSpec {
            name,
            params,
            result: Box::new(result),
        });
        id
    }

    pub fn get(&self, id: OpId) -> Option<&OpSpec> {
        self.ops.get(id.0 as usize)
    }

    pub fn lookup(&self, name: &str) -> Option<OpId> {
        self.by_name.get(name).copied()
    }

    /// Expose every registered operator as attribute-resolvable objects in
    /// `field`.
    ///
    /// Dotted names create intermediate instance objects: `ops.relu` binds
    /// an `ops` instance whose member field carries `relu`.
    pub fn bind_module(&self, env: &mut Env, field: FieldId, interner: &Interner) {
        use skein_graph::AccessMode;

        for (index, spec) in self.ops.iter().enumerate() {
            let id = OpId(index as u32);
            let mut current = field;
            let mut segments = spec.name.split('.').peekable();
            while let Some(segment) = segments.next() {
                let name = interner.intern(segment);
                if segments.peek().is_none() {
                    // Leaf: the operator itself.
                    let func = env.object_of(Value::named(
                        spec.name.clone(),
                        skein_graph::ValueKind::Func(FuncValue::op(id)),
                    ));
                    let attr = env.resolve(current, name, AccessMode::Write);
                    env.revise_attr(attr, func);
                } else {
                    // Intermediate namespace object, shared across entries.
                    let attr = env.resolve(current, name, AccessMode::Write);
                    let obj = match env.attr_obj(attr) {
                        Some(obj) => obj,
                        None => {
                            let obj = env.object_of(Value::named(
                                segment.to_owned(),
                                skein_graph::ValueKind::Instance,
                            ));
                            env.revise_attr(attr, obj);
                            obj
                        }
                    };
                    current = env.object_field(obj);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use skein_graph::AccessMode;

    #[test]
    fn register_and_lookup() {
        let mut catalog = OpCatalog::new();
        let id = catalog.register("ops.relu", vec![OpParam::required("x")], |_| {
            Value::tensor(Default::default(), None)
        });
        assert_eq!(catalog.lookup("ops.relu"), Some(id));
        assert!(catalog.lookup("ops.missing").is_none());
    }

    #[test]
    fn bind_module_creates_namespace_chain() {
        let interner = Interner::new();
        let mut catalog = OpCatalog::new();
        catalog.register("ops.relu", vec![OpParam::required("x")], |_| {
            Value::tensor(Default::default(), None)
        });
        catalog.register("ops.sigmoid", vec![OpParam::required("x")], |_| {
            Value::tensor(Default::default(), None)
        });

        let mut env = Env::new();
        let module = env.new_field(None);
        catalog.bind_module(&mut env, module, &interner);

        let ops = env.resolve(module, interner.intern("ops"), AccessMode::Read);
        let ops_obj = env.attr_obj(ops).expect("ops namespace bound");
        let ops_field = env.object_field_opt(ops_obj).expect("namespace field");
        let relu = env.resolve(ops_field, interner.intern("relu"), AccessMode::Read);
        let relu_value = env.attr_value(relu).expect("relu bound");
        assert!(env.value(relu_value).as_func().is_some());
    }
}
