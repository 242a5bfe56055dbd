//! Per-trace evaluation context: interpreter flags and the directive cache.

use skein_graph::Value;
use skein_ir::Name;

/// One recorded trace directive: the directive's name plus its
/// compile-time-constant arguments.
#[derive(Clone, Debug)]
pub struct FlagDirective {
    pub name: Name,
    pub args: Vec<Value>,
}

/// Interpreter flags active during evaluation.
///
/// Flags are scoped: `with` bodies apply the directives collected in the
/// flag cache for the duration of the body and restore the previous state on
/// every exit path.
#[derive(Copy, Clone, Default, Debug, PartialEq, Eq)]
pub struct EvalFlags {
    /// Unroll loops over constant ranges (`range` yields a constant list).
    pub for_unroll: bool,
    /// Skip body evaluation entirely (dead configuration branches).
    pub ignore_branch: bool,
}

/// Mutable evaluator state threaded through every call.
#[derive(Default, Debug)]
pub struct EvalCtx {
    pub flags: EvalFlags,
    /// Directives recorded by builtin directive calls inside a `with`
    /// header, consumed when the body is entered.
    pub flags_cache: Vec<FlagDirective>,
    /// Depth of inlined user-function calls. A `return` emits a graph
    /// `Return` node only at depth zero; inside an inlined callee it just
    /// ends the body and yields the call's value.
    pub call_depth: usize,
}

impl EvalCtx {
    pub fn new() -> Self {
        Self::default()
    }

    /// Save the current flags, returning the state to restore later.
    pub fn save_flags(&self) -> EvalFlags {
        self.flags
    }

    /// Restore a previously saved flag state.
    pub fn restore_flags(&mut self, saved: EvalFlags) {
        self.flags = saved;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_save_and_restore() {
        let mut ctx = EvalCtx::new();
        let saved = ctx.save_flags();
        ctx.flags.for_unroll = true;
        ctx.flags.ignore_branch = true;
        ctx.restore_flags(saved);
        assert_eq!(ctx.flags, EvalFlags::default());
    }
}
