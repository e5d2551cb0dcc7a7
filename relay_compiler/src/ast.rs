//! Guest syntax tree consumed by the compiler.
//!
//! The front end hands over a [`Module`] of [`FunctionDef`]s. Suspension
//! points are already distinct node kinds: [`ExprKind::Yield`] for a plain
//! yield and [`ExprKind::YieldFrom`] for delegation.
//!
//! The constructor helpers build nodes with dummy spans; chain [`Expr::at`]
//! or [`Stmt::at`] to attach real locations.

use relay_core::Span;
use std::sync::Arc;

// ============================================================================
// Module & Functions
// ============================================================================

/// A compilation unit: a flat list of top-level functions.
#[derive(Debug, Clone, Default)]
pub struct Module {
    /// Functions in definition order.
    pub functions: Vec<FunctionDef>,
}

impl Module {
    /// Create a module from its functions.
    pub fn new(functions: Vec<FunctionDef>) -> Self {
        Self { functions }
    }
}

/// A function definition.
#[derive(Debug, Clone)]
pub struct FunctionDef {
    /// Function name, bound as a module global.
    pub name: Arc<str>,
    /// Positional parameter names.
    pub params: Vec<Arc<str>>,
    /// Body statements.
    pub body: Vec<Stmt>,
    /// Location of the whole definition.
    pub span: Span,
}

impl FunctionDef {
    /// Create a function definition.
    pub fn new(name: &str, params: &[&str], body: Vec<Stmt>) -> Self {
        Self {
            name: name.into(),
            params: params.iter().map(|p| Arc::from(*p)).collect(),
            body,
            span: Span::dummy(),
        }
    }
}

// ============================================================================
// Operators
// ============================================================================

/// Binary arithmetic operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinOp {
    /// `+`
    Add,
    /// `-`
    Sub,
    /// `*`
    Mul,
    /// `//`
    FloorDiv,
    /// `%`
    Mod,
}

impl BinOp {
    /// Operator symbol.
    pub const fn symbol(self) -> &'static str {
        match self {
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::FloorDiv => "//",
            Self::Mod => "%",
        }
    }
}

/// Comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CmpOp {
    /// `==`
    Eq,
    /// `!=`
    Ne,
    /// `<`
    Lt,
    /// `<=`
    Le,
    /// `>`
    Gt,
    /// `>=`
    Ge,
}

impl CmpOp {
    /// Operator symbol.
    pub const fn symbol(self) -> &'static str {
        match self {
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
        }
    }
}

// ============================================================================
// Expressions
// ============================================================================

/// Literal constants.
#[derive(Debug, Clone, PartialEq)]
pub enum Constant {
    /// `None`
    None,
    /// `True` / `False`
    Bool(bool),
    /// Integer literal.
    Int(i64),
    /// String literal.
    Str(Arc<str>),
}

/// An expression node.
#[derive(Debug, Clone)]
pub struct Expr {
    /// Node payload.
    pub kind: ExprKind,
    /// Source location.
    pub span: Span,
}

/// Expression node kinds.
#[derive(Debug, Clone)]
pub enum ExprKind {
    /// Literal.
    Const(Constant),
    /// Variable reference (local or global).
    Name(Arc<str>),
    /// `left op right`
    BinOp {
        /// Operator.
        op: BinOp,
        /// Left operand.
        left: Box<Expr>,
        /// Right operand.
        right: Box<Expr>,
    },
    /// `left op right` for comparisons.
    Compare {
        /// Operator.
        op: CmpOp,
        /// Left operand.
        left: Box<Expr>,
        /// Right operand.
        right: Box<Expr>,
    },
    /// `not operand`
    Not(Box<Expr>),
    /// `func(args...)`
    Call {
        /// Callee.
        func: Box<Expr>,
        /// Positional arguments.
        args: Vec<Expr>,
    },
    /// `[items...]`
    List(Vec<Expr>),
    /// Plain suspension point: `yield` / `yield value`.
    Yield(Option<Box<Expr>>),
    /// Delegating suspension point: `yield from iterable`.
    YieldFrom(Box<Expr>),
}

impl Expr {
    /// Wrap a kind with a dummy span.
    pub fn new(kind: ExprKind) -> Self {
        Self {
            kind,
            span: Span::dummy(),
        }
    }

    /// Attach a source span.
    #[must_use]
    pub fn at(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    /// `None` literal.
    pub fn none() -> Self {
        Self::new(ExprKind::Const(Constant::None))
    }

    /// Boolean literal.
    pub fn boolean(b: bool) -> Self {
        Self::new(ExprKind::Const(Constant::Bool(b)))
    }

    /// Integer literal.
    pub fn int(i: i64) -> Self {
        Self::new(ExprKind::Const(Constant::Int(i)))
    }

    /// String literal.
    pub fn str(s: &str) -> Self {
        Self::new(ExprKind::Const(Constant::Str(s.into())))
    }

    /// Variable reference.
    pub fn name(name: &str) -> Self {
        Self::new(ExprKind::Name(name.into()))
    }

    /// Binary arithmetic.
    pub fn binop(op: BinOp, left: Expr, right: Expr) -> Self {
        Self::new(ExprKind::BinOp {
            op,
            left: Box::new(left),
            right: Box::new(right),
        })
    }

    /// `left + right`
    pub fn add(left: Expr, right: Expr) -> Self {
        Self::binop(BinOp::Add, left, right)
    }

    /// `left - right`
    pub fn sub(left: Expr, right: Expr) -> Self {
        Self::binop(BinOp::Sub, left, right)
    }

    /// `left * right`
    pub fn mul(left: Expr, right: Expr) -> Self {
        Self::binop(BinOp::Mul, left, right)
    }

    /// Comparison.
    pub fn compare(op: CmpOp, left: Expr, right: Expr) -> Self {
        Self::new(ExprKind::Compare {
            op,
            left: Box::new(left),
            right: Box::new(right),
        })
    }

    /// `not operand`
    pub fn not(operand: Expr) -> Self {
        Self::new(ExprKind::Not(Box::new(operand)))
    }

    /// Call a global or local by name.
    pub fn call(name: &str, args: Vec<Expr>) -> Self {
        Self::call_expr(Self::name(name), args)
    }

    /// Call an arbitrary callee expression.
    pub fn call_expr(func: Expr, args: Vec<Expr>) -> Self {
        Self::new(ExprKind::Call {
            func: Box::new(func),
            args,
        })
    }

    /// List display.
    pub fn list(items: Vec<Expr>) -> Self {
        Self::new(ExprKind::List(items))
    }

    /// `yield value`
    pub fn yield_value(value: Expr) -> Self {
        Self::new(ExprKind::Yield(Some(Box::new(value))))
    }

    /// Bare `yield`.
    pub fn yield_none() -> Self {
        Self::new(ExprKind::Yield(None))
    }

    /// `yield from iterable`
    pub fn yield_from(iterable: Expr) -> Self {
        Self::new(ExprKind::YieldFrom(Box::new(iterable)))
    }

    /// Returns true if this node is itself a suspension point.
    pub fn is_suspension(&self) -> bool {
        matches!(self.kind, ExprKind::Yield(_) | ExprKind::YieldFrom(_))
    }

    /// Short description used in diagnostics.
    pub fn describe(&self) -> &'static str {
        match &self.kind {
            ExprKind::Const(_) => "literal",
            ExprKind::Name(_) => "name",
            ExprKind::BinOp { .. } => "expression",
            ExprKind::Compare { .. } => "comparison",
            ExprKind::Not(_) => "expression",
            ExprKind::Call { .. } => "function call",
            ExprKind::List(_) => "list display",
            ExprKind::Yield(_) => "yield expression",
            ExprKind::YieldFrom(_) => "yield from expression",
        }
    }
}

// ============================================================================
// Statements
// ============================================================================

/// One `except` clause.
#[derive(Debug, Clone)]
pub struct ExceptHandler {
    /// Exception class name to match; `None` catches everything.
    pub kind: Option<Arc<str>>,
    /// Local bound to the caught exception.
    pub name: Option<Arc<str>>,
    /// Handler body.
    pub body: Vec<Stmt>,
    /// Location of the clause.
    pub span: Span,
}

impl ExceptHandler {
    /// Create a handler clause.
    pub fn new(kind: Option<&str>, name: Option<&str>, body: Vec<Stmt>) -> Self {
        Self {
            kind: kind.map(Arc::from),
            name: name.map(Arc::from),
            body,
            span: Span::dummy(),
        }
    }
}

/// A statement node.
#[derive(Debug, Clone)]
pub struct Stmt {
    /// Node payload.
    pub kind: StmtKind,
    /// Source location.
    pub span: Span,
}

/// Statement node kinds.
#[derive(Debug, Clone)]
pub enum StmtKind {
    /// Expression evaluated for effect.
    Expr(Expr),
    /// `target = value`
    Assign {
        /// Assignment target; only names are valid.
        target: Expr,
        /// Assigned value.
        value: Expr,
    },
    /// `if test: body else: orelse`
    If {
        /// Condition.
        test: Expr,
        /// Taken branch.
        body: Vec<Stmt>,
        /// Fallback branch.
        orelse: Vec<Stmt>,
    },
    /// `while test: body`
    While {
        /// Loop condition.
        test: Expr,
        /// Loop body.
        body: Vec<Stmt>,
    },
    /// `for target in iter: body`
    For {
        /// Loop variable.
        target: Arc<str>,
        /// Iterable.
        iter: Expr,
        /// Loop body.
        body: Vec<Stmt>,
    },
    /// `break`
    Break,
    /// `continue`
    Continue,
    /// `return` / `return value`
    Return(Option<Expr>),
    /// `raise exc` / bare `raise`
    Raise(Option<Expr>),
    /// `try`/`except`/`finally`
    Try {
        /// Protected body.
        body: Vec<Stmt>,
        /// `except` clauses, matched in order.
        handlers: Vec<ExceptHandler>,
        /// `finally` body.
        finalbody: Vec<Stmt>,
    },
    /// `pass`
    Pass,
}

impl Stmt {
    /// Wrap a kind with a dummy span.
    pub fn new(kind: StmtKind) -> Self {
        Self {
            kind,
            span: Span::dummy(),
        }
    }

    /// Attach a source span.
    #[must_use]
    pub fn at(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    /// Expression statement.
    pub fn expr(expr: Expr) -> Self {
        Self::new(StmtKind::Expr(expr))
    }

    /// `name = value`
    pub fn assign(name: &str, value: Expr) -> Self {
        Self::assign_to(Expr::name(name), value)
    }

    /// Assignment to an arbitrary target expression.
    pub fn assign_to(target: Expr, value: Expr) -> Self {
        Self::new(StmtKind::Assign { target, value })
    }

    /// `if test: body else: orelse`
    pub fn if_else(test: Expr, body: Vec<Stmt>, orelse: Vec<Stmt>) -> Self {
        Self::new(StmtKind::If { test, body, orelse })
    }

    /// `while test: body`
    pub fn while_loop(test: Expr, body: Vec<Stmt>) -> Self {
        Self::new(StmtKind::While { test, body })
    }

    /// `for target in iter: body`
    pub fn for_loop(target: &str, iter: Expr, body: Vec<Stmt>) -> Self {
        Self::new(StmtKind::For {
            target: target.into(),
            iter,
            body,
        })
    }

    /// `break`
    pub fn break_loop() -> Self {
        Self::new(StmtKind::Break)
    }

    /// `continue`
    pub fn continue_loop() -> Self {
        Self::new(StmtKind::Continue)
    }

    /// `return value`
    pub fn return_value(value: Expr) -> Self {
        Self::new(StmtKind::Return(Some(value)))
    }

    /// Bare `return`.
    pub fn return_none() -> Self {
        Self::new(StmtKind::Return(None))
    }

    /// `raise exc`
    pub fn raise(exc: Expr) -> Self {
        Self::new(StmtKind::Raise(Some(exc)))
    }

    /// Bare `raise`.
    pub fn reraise() -> Self {
        Self::new(StmtKind::Raise(None))
    }

    /// `try: body except ...: ...`
    pub fn try_except(body: Vec<Stmt>, handlers: Vec<ExceptHandler>) -> Self {
        Self::try_full(body, handlers, Vec::new())
    }

    /// `try: body finally: finalbody`
    pub fn try_finally(body: Vec<Stmt>, finalbody: Vec<Stmt>) -> Self {
        Self::try_full(body, Vec::new(), finalbody)
    }

    /// `try`/`except`/`finally` with every part.
    pub fn try_full(body: Vec<Stmt>, handlers: Vec<ExceptHandler>, finalbody: Vec<Stmt>) -> Self {
        Self::new(StmtKind::Try {
            body,
            handlers,
            finalbody,
        })
    }

    /// `pass`
    pub fn pass() -> Self {
        Self::new(StmtKind::Pass)
    }
}
