//! History scopes: the read/write event log behind phi construction.
//!
//! While a control-flow body is being evaluated, a history scope is active
//! and every attribute read or write anywhere in the environment is recorded
//! against it. After the body completes, the captured events tell the merge
//! algorithm exactly which outer bindings the body consumed (inputs) and
//! which it redefined (outputs), with no static scope analysis required.

use rustc_hash::FxHashSet;
use skein_ir::Name;

use crate::env::{FieldId, ObjectId, ValueId};

/// First read of an outer binding inside a scope.
///
/// Recording a read replaces the binding's value with a fresh same-typed
/// `body_value` (the SSA version the body's nodes consume) and remembers the
/// pre-replacement `input_value` (what the enclosing graph feeds in).
#[derive(Copy, Clone, Debug)]
pub struct AccessEvent {
    pub field: FieldId,
    pub name: Name,
    pub input_value: ValueId,
    pub body_value: ValueId,
    pub obj: ObjectId,
}

/// A write to a binding inside a scope. Later writes to the same binding
/// supersede earlier ones at merge time.
#[derive(Copy, Clone, Debug)]
pub struct WriteEvent {
    pub field: FieldId,
    pub name: Name,
    pub body_value: ValueId,
    pub obj: ObjectId,
}

/// The captured event lists of a completed scope.
#[derive(Debug, Default)]
pub struct ScopeEvents {
    pub inputs: Vec<AccessEvent>,
    pub outputs: Vec<WriteEvent>,
}

/// One active history scope.
///
/// Scopes form a strict stack: pushed before a branch/loop body is
/// evaluated, popped immediately after, never interleaved (the tracer is
/// single-threaded).
#[derive(Debug)]
pub(crate) struct HistoryScope {
    pub id: u64,
    pub inputs: Vec<AccessEvent>,
    pub outputs: Vec<WriteEvent>,
    /// (field, name) pairs already registered in this scope: either read
    /// (input recorded) or first defined here (write recorded). Reads of a
    /// registered pair do not create further input events.
    pub registered: FxHashSet<(FieldId, Name)>,
}

impl HistoryScope {
    pub fn new(id: u64) -> Self {
        HistoryScope {
            id,
            inputs: Vec::new(),
            outputs: Vec::new(),
            registered: FxHashSet::default(),
        }
    }

    pub fn into_events(self) -> ScopeEvents {
        ScopeEvents {
            inputs: self.inputs,
            outputs: self.outputs,
        }
    }
}
