//! Skein Diagnostic - warning and error reporting for the skein tracer.
//!
//! Two failure classes exist (and only two):
//! - **Diagnostics** are non-fatal, location-tagged warnings collected in a
//!   [`DiagnosticSink`]. The evaluator emits one and continues best-effort
//!   with a null result.
//! - **[`TraceError`]** is fatal: the trace aborts immediately and no partial
//!   graph is produced.

mod diagnostic;
mod error;

pub use diagnostic::{Diagnostic, DiagnosticSink, Severity};
pub use error::{TraceError, TraceResult};
