//! The traced environment: value/object/field arenas plus history scopes.

use std::fmt;

use rustc_hash::FxHashMap;
use skein_ir::Name;

use crate::history::{AccessEvent, HistoryScope, ScopeEvents, WriteEvent};
use crate::value::Value;

/// Index of a [`Value`] in the environment's value arena.
#[derive(Copy, Clone, Eq, PartialEq, Hash)]
pub struct ValueId(u32);

/// Index of an object record.
#[derive(Copy, Clone, Eq, PartialEq, Hash)]
pub struct ObjectId(u32);

/// Index of a field (a scope's name table).
#[derive(Copy, Clone, Eq, PartialEq, Hash)]
pub struct FieldId(u32);

impl ValueId {
    #[inline]
    fn index(self) -> usize {
        self.0 as usize
    }
}

impl ObjectId {
    #[inline]
    fn index(self) -> usize {
        self.0 as usize
    }
}

impl FieldId {
    #[inline]
    fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Debug for ValueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

impl fmt::Debug for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "o{}", self.0)
    }
}

impl fmt::Debug for FieldId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "F{}", self.0)
    }
}

/// A resolved binding slot: a field plus a name inside it.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub struct AttrRef {
    pub field: FieldId,
    pub name: Name,
}

/// How a name resolution is being performed.
///
/// `Read` resolves through the parent chain and registers input events on
/// active history scopes; `Write` resolves locally (creating the binding if
/// needed) and registers nothing; the subsequent revise records the write.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum AccessMode {
    Read,
    Write,
}

/// Display-name suffix for synthesized values.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum Suffix {
    None,
    Input,
    Dummy,
}

impl Suffix {
    const fn as_str(self) -> &'static str {
        match self {
            Suffix::None => "",
            Suffix::Input => "/in",
            Suffix::Dummy => "/dummy",
        }
    }
}

/// One named, revisable binding slot.
#[derive(Debug, Default)]
struct Attribute {
    obj: Option<ObjectId>,
}

/// An object: one value plus a lazily created member field.
///
/// The field is shared by index wherever the object is referenced, so
/// mutation of members is observable through every alias.
#[derive(Debug)]
struct ObjectRec {
    value: ValueId,
    field: Option<FieldId>,
    /// The attribute this object was last bound to; object-level revision
    /// reports its write event through this binding.
    bound_to: Option<AttrRef>,
}

/// A scope's ordered name table.
#[derive(Debug, Default)]
struct FieldRec {
    parent: Option<FieldId>,
    order: Vec<Name>,
    attrs: FxHashMap<Name, Attribute>,
}

/// The whole mutable trace state: arenas, history scopes and the id
/// generator. One `Env` is created per top-level trace invocation, which
/// gives the "reset once per trace" lifecycle without any global state.
#[derive(Debug, Default)]
pub struct Env {
    values: Vec<Value>,
    objects: Vec<ObjectRec>,
    fields: Vec<FieldRec>,
    history: Vec<HistoryScope>,
    guid: u64,
}

impl Env {
    pub fn new() -> Self {
        Env::default()
    }

    /// Monotonically increasing id for synthetic names.
    pub fn next_guid(&mut self) -> u64 {
        let id = self.guid;
        self.guid += 1;
        id
    }

    // Values.

    pub fn add_value(&mut self, value: Value) -> ValueId {
        let id = ValueId(self.values.len() as u32);
        self.values.push(value);
        id
    }

    #[inline]
    pub fn value(&self, id: ValueId) -> &Value {
        &self.values[id.index()]
    }

    #[inline]
    pub fn value_mut(&mut self, id: ValueId) -> &mut Value {
        &mut self.values[id.index()]
    }

    /// Same-typed constant-free placeholder of an existing value.
    pub fn fresh_like(&mut self, value: ValueId, suffix: Suffix) -> ValueId {
        let mut fresh = self.values[value.index()].fresh_same_type();
        if suffix != Suffix::None {
            fresh.name = format!("{}{}", fresh.name, suffix.as_str());
        }
        fresh.dummy = suffix == Suffix::Dummy;
        self.add_value(fresh)
    }

    /// Full copy (constants included) of an existing value.
    pub fn copy_of(&mut self, value: ValueId) -> ValueId {
        let copy = self.values[value.index()].copied();
        self.add_value(copy)
    }

    // Objects.

    pub fn new_object(&mut self, value: ValueId) -> ObjectId {
        let id = ObjectId(self.objects.len() as u32);
        self.objects.push(ObjectRec {
            value,
            field: None,
            bound_to: None,
        });
        id
    }

    /// Allocate a value and wrap it in a new object.
    pub fn object_of(&mut self, value: Value) -> ObjectId {
        let value = self.add_value(value);
        self.new_object(value)
    }

    #[inline]
    pub fn object_value(&self, obj: ObjectId) -> ValueId {
        self.objects[obj.index()].value
    }

    /// The object's member field, created on first use.
    pub fn object_field(&mut self, obj: ObjectId) -> FieldId {
        if let Some(field) = self.objects[obj.index()].field {
            return field;
        }
        let field = self.new_field(None);
        self.objects[obj.index()].field = Some(field);
        field
    }

    pub fn object_field_opt(&self, obj: ObjectId) -> Option<FieldId> {
        self.objects[obj.index()].field
    }

    /// Replace the object's value. Records a write event when the object is
    /// currently bound to an attribute (value replacement at a binding site).
    pub fn revise_object(&mut self, obj: ObjectId, value: ValueId) {
        self.objects[obj.index()].value = value;
        if let Some(attr) = self.objects[obj.index()].bound_to {
            if self.attr_obj(attr) == Some(obj) {
                self.record_write(attr, obj);
            }
        }
    }

    // Fields.

    pub fn new_field(&mut self, parent: Option<FieldId>) -> FieldId {
        let id = FieldId(self.fields.len() as u32);
        self.fields.push(FieldRec {
            parent,
            order: Vec::new(),
            attrs: FxHashMap::default(),
        });
        id
    }

    pub fn field_parent(&self, field: FieldId) -> Option<FieldId> {
        self.fields[field.index()].parent
    }

    pub fn has_local_attr(&self, field: FieldId, name: Name) -> bool {
        self.fields[field.index()].attrs.contains_key(&name)
    }

    /// Names bound in this field, in insertion order.
    pub fn local_names(&self, field: FieldId) -> &[Name] {
        &self.fields[field.index()].order
    }

    fn insert_attr(&mut self, field: FieldId, name: Name) {
        let rec = &mut self.fields[field.index()];
        if !rec.attrs.contains_key(&name) {
            rec.attrs.insert(name, Attribute::default());
            rec.order.push(name);
        }
    }

    /// Resolve a name for the given access mode.
    ///
    /// Read resolution walks the parent chain and registers input events on
    /// every active history scope the binding is not yet known to (see
    /// [`AccessEvent`]); an unresolved name creates an empty local binding.
    /// Write resolution is local-only: an existing local binding is reused,
    /// anything else creates one (assignment shadows enclosing scopes).
    pub fn resolve(&mut self, field: FieldId, name: Name, mode: AccessMode) -> AttrRef {
        match mode {
            AccessMode::Read => {
                let mut cur = Some(field);
                while let Some(f) = cur {
                    if self.fields[f.index()].attrs.contains_key(&name) {
                        let attr = AttrRef { field: f, name };
                        self.register_reads(attr);
                        return attr;
                    }
                    cur = self.fields[f.index()].parent;
                }
                self.insert_attr(field, name);
                AttrRef { field, name }
            }
            AccessMode::Write => {
                if !self.fields[field.index()].attrs.contains_key(&name) {
                    self.insert_attr(field, name);
                }
                AttrRef { field, name }
            }
        }
    }

    pub fn attr_obj(&self, attr: AttrRef) -> Option<ObjectId> {
        self.fields[attr.field.index()]
            .attrs
            .get(&attr.name)
            .and_then(|a| a.obj)
    }

    pub fn attr_has_obj(&self, attr: AttrRef) -> bool {
        self.attr_obj(attr).is_some()
    }

    /// The value currently visible through a binding.
    pub fn attr_value(&self, attr: AttrRef) -> Option<ValueId> {
        self.attr_obj(attr).map(|obj| self.object_value(obj))
    }

    /// Rebind an attribute to an object and record the write.
    pub fn revise_attr(&mut self, attr: AttrRef, obj: ObjectId) {
        self.bind_attr_quiet(attr, obj);
        self.record_write(attr, obj);
    }

    /// Rebind an attribute without recording a history event.
    ///
    /// Used for bindings that are not observable effects of the traced body:
    /// call-argument binding and lazy member materialization.
    pub fn bind_attr_quiet(&mut self, attr: AttrRef, obj: ObjectId) {
        if !self.fields[attr.field.index()].attrs.contains_key(&attr.name) {
            self.insert_attr(attr.field, attr.name);
        }
        if let Some(slot) = self.fields[attr.field.index()].attrs.get_mut(&attr.name) {
            slot.obj = Some(obj);
        }
        self.objects[obj.index()].bound_to = Some(attr);
    }

    // History scopes.

    pub fn push_history(&mut self, id: u64) {
        tracing::trace!(id, depth = self.history.len(), "push history scope");
        self.history.push(HistoryScope::new(id));
    }

    /// Pop the innermost scope and return its captured events.
    ///
    /// Scope discipline is strictly nested; popping with no active scope is
    /// an internal bug.
    pub fn pop_history(&mut self) -> ScopeEvents {
        debug_assert!(!self.history.is_empty(), "history stack underflow");
        let events = self
            .history
            .pop()
            .map(HistoryScope::into_events)
            .unwrap_or_default();
        tracing::trace!(
            inputs = events.inputs.len(),
            outputs = events.outputs.len(),
            "pop history scope"
        );
        events
    }

    pub fn history_depth(&self) -> usize {
        self.history.len()
    }

    /// Register read events for an attribute in every active scope that has
    /// not seen it yet, outermost first.
    ///
    /// Each registration snapshots the current value as the scope's input
    /// and replaces the object's value with a fresh same-typed body version,
    /// so nested scopes chain naturally: the inner scope's input is the
    /// outer scope's body value.
    fn register_reads(&mut self, attr: AttrRef) {
        if self.history.is_empty() {
            return;
        }
        let Some(obj) = self.attr_obj(attr) else {
            return;
        };
        // Compile-time entities never become sub-graph inputs.
        if self.is_static_entity(self.objects[obj.index()].value) {
            return;
        }
        let key = (attr.field, attr.name);
        for scope_idx in 0..self.history.len() {
            if self.history[scope_idx].registered.contains(&key) {
                continue;
            }
            let input_value = self.objects[obj.index()].value;
            let body_value = self.fresh_like(input_value, Suffix::Input);
            self.objects[obj.index()].value = body_value;
            let scope = &mut self.history[scope_idx];
            scope.registered.insert(key);
            scope.inputs.push(AccessEvent {
                field: attr.field,
                name: attr.name,
                input_value,
                body_value,
                obj,
            });
        }
    }

    /// Callables and opaque instances exist only at trace time; they are
    /// never threaded through control-flow value contracts.
    fn is_static_entity(&self, value: ValueId) -> bool {
        matches!(
            self.values[value.index()].kind,
            crate::value::ValueKind::Func(_) | crate::value::ValueKind::Instance
        )
    }

    fn record_write(&mut self, attr: AttrRef, obj: ObjectId) {
        let body_value = self.objects[obj.index()].value;
        if self.is_static_entity(body_value) {
            return;
        }
        if let Some(scope) = self.history.last_mut() {
            scope.registered.insert((attr.field, attr.name));
            scope.outputs.push(WriteEvent {
                field: attr.field,
                name: attr.name,
                body_value,
                obj,
            });
        }
    }
}
