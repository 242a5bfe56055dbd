//! Skein Graph - the symbolic state the tracer manipulates.
//!
//! Three layers live here:
//! - [`Value`]: tagged type/shape descriptors with optional compile-time
//!   constant payloads. A value never changes its variant after creation;
//!   bindings are updated by *revising* an [`Object`] or attribute to point
//!   at a new value.
//! - [`Env`]: arenas of objects and fields referenced by index
//!   ([`ObjectId`], [`FieldId`]), plus the history-scope stack that records
//!   every attribute read and write while a control-flow body is being
//!   evaluated. Aliasing is explicit shared-index reference.
//! - [`Graph`]/[`Node`]: the static dataflow program being built. Control
//!   flow nodes own their child graphs outright; the node tree has no
//!   back-edges.

mod env;
mod graph;
mod history;
mod value;

pub use env::{AccessMode, AttrRef, Env, FieldId, ObjectId, Suffix, ValueId};
pub use graph::{AggregateKind, ConvertKind, GenerateKind, Graph, Node, NodeKind};
pub use history::{AccessEvent, ScopeEvents, WriteEvent};
pub use value::{
    BuiltinFunc, Dtype, FuncKind, FuncValue, LambdaFunc, OpId, UserFunc, Value, ValueKind,
};
