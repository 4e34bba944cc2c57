//! The statement stream a compiled program consists of.
//!
//! The parser (external to this crate) lowers surface syntax into these
//! statements; the interpreter loop in [`run`](crate::run) executes them
//! sequentially, reacting to the control-flow result each one yields.

use std::rc::Rc;

use crate::{air, air::Expression, function::FunctionDef, source::SourceLocation};

/// One statement.
#[derive(Debug, Clone)]
pub enum Statement {
    /// Evaluates the expression and discards the result.
    Expression { expr: Expression, site: SourceLocation },
    /// A braced block: runs in a child scope; deferred expressions attached
    /// to it fire when the block exits.
    Block { body: Vec<Statement> },
    /// `var a = x, b;` / `const c = y;` — declares one cell per name in the
    /// current scope. Initializers evaluate while the name is bound to the
    /// uninitialized sentinel, so self-reference fails loudly.
    Declare {
        decls: Vec<(Rc<str>, Option<Expression>)>,
        immutable: bool,
        site: SourceLocation,
    },
    /// `ref r -> expr;` — binds the name to the evaluated reference itself
    /// (materialized first if it was a temporary), keeping its l-value path.
    DeclareRef {
        name: Rc<str>,
        init: Expression,
        site: SourceLocation,
    },
    /// `func name(params) { … }` — declares a read-only cell bound before
    /// the closure is instantiated, so the body can call itself.
    DeclareFunction {
        name: Rc<str>,
        def: Rc<FunctionDef>,
        site: SourceLocation,
    },
    If {
        cond: Expression,
        branch_true: Vec<Statement>,
        branch_false: Vec<Statement>,
        site: SourceLocation,
    },
    /// Clauses are scanned in order; the subject is compared against each
    /// label with `==` semantics; the label-less clause is the default and
    /// comes last. Execution falls through only across empty clause bodies.
    /// Declarations in skipped clauses are poisoned as bypassed.
    Switch {
        label: Option<Rc<str>>,
        subject: Expression,
        clauses: Vec<SwitchClause>,
        site: SourceLocation,
    },
    While {
        label: Option<Rc<str>>,
        cond: Expression,
        body: Vec<Statement>,
        site: SourceLocation,
    },
    DoWhile {
        label: Option<Rc<str>>,
        body: Vec<Statement>,
        cond: Expression,
        site: SourceLocation,
    },
    For {
        label: Option<Rc<str>>,
        init: Option<Box<Statement>>,
        cond: Option<Expression>,
        step: Option<Expression>,
        body: Vec<Statement>,
        site: SourceLocation,
    },
    /// `for(each k, v -> range)` — arrays bind integer indices, objects
    /// bind keys in insertion order; `v` is a live l-value into the range.
    ForEach {
        label: Option<Rc<str>>,
        key_name: Rc<str>,
        value_name: Rc<str>,
        range: Expression,
        body: Vec<Statement>,
        site: SourceLocation,
    },
    Break {
        label: Option<Rc<str>>,
        site: SourceLocation,
    },
    Continue {
        label: Option<Rc<str>>,
        site: SourceLocation,
    },
    /// `return;` yields a void reference; `return expr;` dereferences into
    /// a temporary unless `by_ref`. A tail call in `expr` comes back as a
    /// pending-call reference the invocation trampoline consumes.
    Return {
        expr: Option<Expression>,
        by_ref: bool,
        site: SourceLocation,
    },
    Throw {
        expr: Expression,
        site: SourceLocation,
    },
    Try {
        body: Vec<Statement>,
        exc_name: Rc<str>,
        handler: Vec<Statement>,
        site: SourceLocation,
    },
    /// `defer expr;` — queues the expression on the current scope; queued
    /// expressions fire in LIFO order when the scope exits.
    Defer {
        expr: Expression,
        site: SourceLocation,
    },
    /// `assert expr [: message];` — failure is fatal and uncatchable.
    Assert {
        expr: Expression,
        message: Option<Rc<str>>,
        site: SourceLocation,
    },
}

/// One `case expr:` / `default:` clause of a switch.
#[derive(Debug, Clone)]
pub struct SwitchClause {
    /// `None` marks the default clause.
    pub label: Option<Expression>,
    pub body: Vec<Statement>,
    /// Names this clause's body declares at its top level; poisoned as
    /// bypassed when the clause is skipped over.
    pub declared: Vec<Rc<str>>,
}

/// A compiled program: the statement stream plus the source name every
/// backtrace frame refers to.
#[derive(Debug, Clone)]
pub struct Program {
    pub file: Rc<str>,
    pub statements: Vec<Statement>,
}

impl Program {
    pub fn new(file: impl Into<Rc<str>>, statements: Vec<Statement>) -> Self {
        Self {
            file: file.into(),
            statements,
        }
    }

    /// Applies compile-time rewrites at the given optimization level.
    /// Level 0 is a no-op; level 1 and above fold constants.
    pub(crate) fn optimize(&mut self, level: u8) {
        if level == 0 {
            return;
        }
        for statement in &mut self.statements {
            optimize_statement(statement);
        }
    }
}

fn optimize_statement(statement: &mut Statement) {
    let fold = air::fold_constants;
    match statement {
        Statement::Expression { expr, .. }
        | Statement::DeclareRef { init: expr, .. }
        | Statement::Throw { expr, .. }
        | Statement::Defer { expr, .. }
        | Statement::Assert { expr, .. } => *expr = fold(expr),
        Statement::Declare { decls, .. } => {
            for (_, init) in decls {
                if let Some(expr) = init {
                    *expr = fold(expr);
                }
            }
        }
        Statement::DeclareFunction { .. } => {
            // Function bodies are shared (`Rc`) and may already be
            // instantiated; they are folded when their defining program is
            // built, not here.
        }
        Statement::Block { body } => optimize_all(body),
        Statement::If {
            cond,
            branch_true,
            branch_false,
            ..
        } => {
            *cond = fold(cond);
            optimize_all(branch_true);
            optimize_all(branch_false);
        }
        Statement::Switch { subject, clauses, .. } => {
            *subject = fold(subject);
            for clause in clauses {
                if let Some(label) = &mut clause.label {
                    *label = fold(label);
                }
                optimize_all(&mut clause.body);
            }
        }
        Statement::While { cond, body, .. } | Statement::DoWhile { cond, body, .. } => {
            *cond = fold(cond);
            optimize_all(body);
        }
        Statement::For {
            init, cond, step, body, ..
        } => {
            if let Some(init) = init {
                optimize_statement(init);
            }
            if let Some(cond) = cond {
                *cond = fold(cond);
            }
            if let Some(step) = step {
                *step = fold(step);
            }
            optimize_all(body);
        }
        Statement::ForEach { range, body, .. } => {
            *range = fold(range);
            optimize_all(body);
        }
        Statement::Return { expr, .. } => {
            if let Some(expr) = expr {
                *expr = fold(expr);
            }
        }
        Statement::Try { body, handler, .. } => {
            optimize_all(body);
            optimize_all(handler);
        }
        Statement::Break { .. } | Statement::Continue { .. } => {}
    }
}

fn optimize_all(statements: &mut [Statement]) {
    for statement in statements {
        optimize_statement(statement);
    }
}
