//! The syntax tree.
//!
//! Nodes live in per-module arenas and reference each other through
//! `ExprId`/`StmtId` indices. The tree covers the staticizable subset of the
//! host language the tracer supports; anything else is the external parser's
//! job to reject or desugar.

use std::fmt;

use crate::{BinOp, BoolOpKind, CompareOp, Interner, LineInfo, Name, UnaryOp};

/// Index of an expression in a [`Module`].
#[derive(Copy, Clone, Eq, PartialEq, Hash)]
pub struct ExprId(u32);

/// Index of a statement in a [`Module`].
#[derive(Copy, Clone, Eq, PartialEq, Hash)]
pub struct StmtId(u32);

/// Index of a function definition in a [`Module`].
#[derive(Copy, Clone, Eq, PartialEq, Hash)]
pub struct FuncId(u32);

impl fmt::Debug for ExprId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "e{}", self.0)
    }
}

impl fmt::Debug for StmtId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s{}", self.0)
    }
}

impl fmt::Debug for FuncId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "f{}", self.0)
    }
}

/// Numeric literal payload.
#[derive(Copy, Clone, PartialEq, Debug)]
pub enum Number {
    Int(i64),
    Float(f64),
}

impl Number {
    pub fn as_f64(self) -> f64 {
        match self {
            Number::Int(n) => n as f64,
            Number::Float(x) => x,
        }
    }

    pub fn is_float(self) -> bool {
        matches!(self, Number::Float(_))
    }
}

impl fmt::Display for Number {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Number::Int(n) => write!(f, "{n}"),
            Number::Float(x) => write!(f, "{x}"),
        }
    }
}

/// Expression node.
#[derive(Clone, Debug)]
pub struct Expr {
    pub kind: ExprKind,
    pub line: LineInfo,
}

/// Expression variants.
#[derive(Clone, Debug)]
pub enum ExprKind {
    /// Numeric literal: `1`, `2.5`
    Num(Number),
    /// String literal (interned).
    Str(Name),
    /// Boolean literal: `True`, `False`
    Bool(bool),
    /// `None`
    NoneLit,
    /// Variable reference.
    Name(Name),
    /// Member access: `value.attr`
    Attribute { value: ExprId, attr: Name },
    /// Binary operation: `left op right`
    BinOp {
        op: BinOp,
        left: ExprId,
        right: ExprId,
    },
    /// Unary operation: `op operand`
    UnaryOp { op: UnaryOp, operand: ExprId },
    /// Boolean operation over two or more operands: `a and b and c`
    BoolOp { op: BoolOpKind, values: Vec<ExprId> },
    /// Comparison: `left op right` (chained comparisons are desugared by the
    /// parser into the first pair).
    Compare {
        op: CompareOp,
        left: ExprId,
        right: ExprId,
    },
    /// Call: `func(args..., kw=..)`
    Call {
        func: ExprId,
        args: Vec<ExprId>,
        keywords: Vec<(Name, ExprId)>,
    },
    /// Subscript: `value[index]`, `value[a:b]`, `value[i, a:b]`
    Subscript {
        value: ExprId,
        index: SubscriptKind,
    },
    /// Tuple literal: `(a, b)`; also appears as an assignment target.
    Tuple(Vec<ExprId>),
    /// List literal: `[a, b]`
    List(Vec<ExprId>),
    /// Dict literal: `{k: v}`
    Dict {
        keys: Vec<ExprId>,
        values: Vec<ExprId>,
    },
    /// List comprehension with a single generator: `[elt for target in iter]`
    ListComp {
        elt: ExprId,
        target: ExprId,
        iter: ExprId,
    },
    /// Lambda: `lambda a, b=1: body`
    Lambda { params: Vec<Param>, body: ExprId },
}

/// Subscript index forms.
#[derive(Clone, Debug)]
pub enum SubscriptKind {
    /// `value[i]`
    Index(ExprId),
    /// `value[lower:upper:step]`, any bound optional.
    Slice {
        lower: Option<ExprId>,
        upper: Option<ExprId>,
        step: Option<ExprId>,
    },
    /// `value[i, a:b, ...]`: mixed index/slice dimensions.
    ExtSlice(Vec<SliceDim>),
}

/// One dimension of an extended slice.
#[derive(Clone, Debug)]
pub enum SliceDim {
    Index(ExprId),
    Slice {
        lower: Option<ExprId>,
        upper: Option<ExprId>,
        step: Option<ExprId>,
    },
}

/// Statement node.
#[derive(Clone, Debug)]
pub struct Stmt {
    pub kind: StmtKind,
    pub line: LineInfo,
}

/// Statement variants.
#[derive(Clone, Debug)]
pub enum StmtKind {
    /// Bare expression statement (a call evaluated for effect).
    Expr(ExprId),
    /// Assignment: `target = value`. The target is a Name, Attribute,
    /// Subscript, or Tuple expression.
    Assign { target: ExprId, value: ExprId },
    /// Augmented assignment: `target op= value`
    AugAssign {
        target: ExprId,
        op: BinOp,
        value: ExprId,
    },
    /// `return value`
    Return(ExprId),
    /// `if test: body else: orelse`
    If {
        test: ExprId,
        body: Vec<StmtId>,
        orelse: Vec<StmtId>,
    },
    /// `for target in iter: body`
    For {
        target: ExprId,
        iter: ExprId,
        body: Vec<StmtId>,
    },
    /// `break`
    Break,
    /// `continue`
    Continue,
    /// `with items: body`
    With {
        items: Vec<WithItem>,
        body: Vec<StmtId>,
    },
}

/// One item of a `with` statement: `context as optional_var`.
#[derive(Clone, Debug)]
pub struct WithItem {
    pub context: ExprId,
    /// Target name the context's enter result is bound to, if any.
    pub optional_var: Option<ExprId>,
}

/// A formal parameter with an optional default expression.
#[derive(Clone, Debug)]
pub struct Param {
    pub name: Name,
    pub default: Option<ExprId>,
}

/// A function definition (the unit handed to the tracer).
#[derive(Clone, Debug)]
pub struct FuncDef {
    pub name: Name,
    pub params: Vec<Param>,
    /// `*args` declared. The tracer rejects this unconditionally.
    pub vararg: bool,
    /// `**kwargs` declared. The tracer rejects this unconditionally.
    pub kwarg: bool,
    pub body: Vec<StmtId>,
    pub line: LineInfo,
}

/// One traced module: node arenas plus the identifier interner.
pub struct Module {
    exprs: Vec<Expr>,
    stmts: Vec<Stmt>,
    funcs: Vec<FuncDef>,
    interner: Interner,
}

impl Module {
    #[inline]
    pub fn expr(&self, id: ExprId) -> &Expr {
        &self.exprs[id.0 as usize]
    }

    #[inline]
    pub fn stmt(&self, id: StmtId) -> &Stmt {
        &self.stmts[id.0 as usize]
    }

    #[inline]
    pub fn func(&self, id: FuncId) -> &FuncDef {
        &self.funcs[id.0 as usize]
    }

    #[inline]
    pub fn interner(&self) -> &Interner {
        &self.interner
    }

    /// Intern an identifier through the module's interner.
    #[inline]
    pub fn intern(&self, s: &str) -> Name {
        self.interner.intern(s)
    }

    /// Resolve an interned identifier.
    #[inline]
    pub fn lookup(&self, name: Name) -> &'static str {
        self.interner.lookup(name)
    }
}

impl fmt::Debug for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Module")
            .field("exprs", &self.exprs.len())
            .field("stmts", &self.stmts.len())
            .field("funcs", &self.funcs.len())
            .finish()
    }
}

/// Construction API for [`Module`].
///
/// The external parser targets this builder; tests use it to assemble trees
/// by hand.
pub struct ModuleBuilder {
    module: Module,
}

impl ModuleBuilder {
    pub fn new() -> Self {
        ModuleBuilder {
            module: Module {
                exprs: Vec::new(),
                stmts: Vec::new(),
                funcs: Vec::new(),
                interner: Interner::new(),
            },
        }
    }

    pub fn intern(&self, s: &str) -> Name {
        self.module.intern(s)
    }

    pub fn expr(&mut self, kind: ExprKind, line: LineInfo) -> ExprId {
        let id = ExprId(self.module.exprs.len() as u32);
        self.module.exprs.push(Expr { kind, line });
        id
    }

    pub fn stmt(&mut self, kind: StmtKind, line: LineInfo) -> StmtId {
        let id = StmtId(self.module.stmts.len() as u32);
        self.module.stmts.push(Stmt { kind, line });
        id
    }

    pub fn func(&mut self, def: FuncDef) -> FuncId {
        let id = FuncId(self.module.funcs.len() as u32);
        self.module.funcs.push(def);
        id
    }

    // Literal/reference shorthands.

    pub fn int(&mut self, value: i64, line: LineInfo) -> ExprId {
        self.expr(ExprKind::Num(Number::Int(value)), line)
    }

    pub fn float(&mut self, value: f64, line: LineInfo) -> ExprId {
        self.expr(ExprKind::Num(Number::Float(value)), line)
    }

    pub fn str_lit(&mut self, value: &str, line: LineInfo) -> ExprId {
        let name = self.intern(value);
        self.expr(ExprKind::Str(name), line)
    }

    pub fn bool_lit(&mut self, value: bool, line: LineInfo) -> ExprId {
        self.expr(ExprKind::Bool(value), line)
    }

    pub fn none(&mut self, line: LineInfo) -> ExprId {
        self.expr(ExprKind::NoneLit, line)
    }

    pub fn name(&mut self, ident: &str, line: LineInfo) -> ExprId {
        let name = self.intern(ident);
        self.expr(ExprKind::Name(name), line)
    }

    pub fn finish(self) -> Module {
        self.module
    }
}

impl Default for ModuleBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_assigns_sequential_ids() {
        let mut b = ModuleBuilder::new();
        let a = b.int(1, LineInfo::new(1));
        let c = b.int(2, LineInfo::new(1));
        assert_ne!(a, c);
        let module = b.finish();
        assert!(matches!(
            module.expr(a).kind,
            ExprKind::Num(Number::Int(1))
        ));
        assert!(matches!(
            module.expr(c).kind,
            ExprKind::Num(Number::Int(2))
        ));
    }

    #[test]
    fn names_are_interned_through_the_module() {
        let mut b = ModuleBuilder::new();
        let x1 = b.name("x", LineInfo::new(1));
        let x2 = b.name("x", LineInfo::new(2));
        let module = b.finish();
        let (ExprKind::Name(n1), ExprKind::Name(n2)) =
            (&module.expr(x1).kind, &module.expr(x2).kind)
        else {
            panic!("expected name exprs");
        };
        assert_eq!(n1, n2);
        assert_eq!(module.lookup(*n1), "x");
    }
}
