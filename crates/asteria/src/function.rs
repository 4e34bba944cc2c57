//! Function values: scripted closures and native bindings.

use std::{collections::HashSet, fmt, rc::Rc};

use crate::{
    air::{AirNode, Expression},
    context::{GlobalContext, Scope},
    exception::ExecResult,
    llds::PointerHashSet,
    reference::Reference,
    source::SourceLocation,
    statement::Statement,
    variable::VarHandle,
};

/// The compiled definition of a scripted function: parameters, body, and
/// the free names the body resolves from its defining scope.
///
/// The free-name set is computed once, here, when the definition is built —
/// this is the compile-time, no-execution resolution pass. At instantiation
/// each free name is looked up in the enclosing chain and copied into a
/// fresh capture context, which the function value then owns strongly
/// (the one strong context edge a value can hold, and therefore the one
/// closure cycle the collector has to untangle).
#[derive(Debug)]
pub struct FunctionDef {
    name: Rc<str>,
    params: Vec<Rc<str>>,
    variadic: bool,
    body: Vec<Statement>,
    location: SourceLocation,
    captures: Vec<Rc<str>>,
}

impl FunctionDef {
    pub fn new(
        name: impl Into<Rc<str>>,
        params: Vec<Rc<str>>,
        variadic: bool,
        body: Vec<Statement>,
        location: SourceLocation,
    ) -> Rc<Self> {
        let mut analysis = FreeNames::default();
        for param in &params {
            analysis.declare(param);
        }
        analysis.declare("this");
        analysis.walk_statements(&body);
        Rc::new(Self {
            name: name.into(),
            params,
            variadic,
            body,
            location,
            captures: analysis.free,
        })
    }

    pub fn name(&self) -> &Rc<str> {
        &self.name
    }

    pub fn params(&self) -> &[Rc<str>] {
        &self.params
    }

    pub fn is_variadic(&self) -> bool {
        self.variadic
    }

    pub fn body(&self) -> &[Statement] {
        &self.body
    }

    pub fn location(&self) -> &SourceLocation {
        &self.location
    }

    /// Names the body resolves from the defining scope.
    pub fn captures(&self) -> &[Rc<str>] {
        &self.captures
    }
}

/// Accumulates names referenced but not declared by a statement tree.
///
/// The analysis is flow-insensitive on purpose: a name declared anywhere in
/// the body shadows an outer binding for the whole body, matching how
/// declarations hide outer names at runtime. Lazily synthesized `__` names
/// are per-frame and never captured.
#[derive(Default)]
struct FreeNames {
    declared: HashSet<Rc<str>>,
    seen: HashSet<Rc<str>>,
    free: Vec<Rc<str>>,
}

impl FreeNames {
    fn declare(&mut self, name: &str) {
        self.declared.insert(Rc::from(name));
    }

    fn reference(&mut self, name: &Rc<str>) {
        if name.starts_with("__") || self.declared.contains(name) {
            return;
        }
        if self.seen.insert(name.clone()) {
            self.free.push(name.clone());
        }
    }

    fn walk_statements(&mut self, statements: &[Statement]) {
        // Declarations first: a name declared later in the body still
        // shadows the outer binding for earlier references (which fail at
        // runtime as bypassed, not as captures).
        for statement in statements {
            match statement {
                Statement::Declare { decls, .. } => {
                    for (name, _) in decls {
                        self.declared.insert(name.clone());
                    }
                }
                Statement::DeclareRef { name, .. } | Statement::DeclareFunction { name, .. } => {
                    self.declared.insert(name.clone());
                }
                _ => {}
            }
        }
        for statement in statements {
            self.walk_statement(statement);
        }
    }

    fn walk_statement(&mut self, statement: &Statement) {
        match statement {
            Statement::Expression { expr, .. }
            | Statement::Throw { expr, .. }
            | Statement::Defer { expr, .. }
            | Statement::Assert { expr, .. }
            | Statement::DeclareRef { init: expr, .. } => self.walk_expression(expr),
            Statement::Declare { decls, .. } => {
                for (_, init) in decls {
                    if let Some(expr) = init {
                        self.walk_expression(expr);
                    }
                }
            }
            Statement::DeclareFunction { def, .. } => {
                for name in def.captures() {
                    self.reference(name);
                }
            }
            Statement::Block { body } => self.walk_statements(body),
            Statement::If {
                cond,
                branch_true,
                branch_false,
                ..
            } => {
                self.walk_expression(cond);
                self.walk_statements(branch_true);
                self.walk_statements(branch_false);
            }
            Statement::Switch { subject, clauses, .. } => {
                self.walk_expression(subject);
                for clause in clauses {
                    if let Some(label) = &clause.label {
                        self.walk_expression(label);
                    }
                    for name in &clause.declared {
                        self.declared.insert(name.clone());
                    }
                    self.walk_statements(&clause.body);
                }
            }
            Statement::While { cond, body, .. } | Statement::DoWhile { body, cond, .. } => {
                self.walk_expression(cond);
                self.walk_statements(body);
            }
            Statement::For {
                init, cond, step, body, ..
            } => {
                if let Some(init) = init {
                    self.walk_statement(init);
                }
                if let Some(cond) = cond {
                    self.walk_expression(cond);
                }
                if let Some(step) = step {
                    self.walk_expression(step);
                }
                self.walk_statements(body);
            }
            Statement::ForEach {
                key_name,
                value_name,
                range,
                body,
                ..
            } => {
                self.walk_expression(range);
                self.declared.insert(key_name.clone());
                self.declared.insert(value_name.clone());
                self.walk_statements(body);
            }
            Statement::Return { expr, .. } => {
                if let Some(expr) = expr {
                    self.walk_expression(expr);
                }
            }
            Statement::Try {
                body, exc_name, handler, ..
            } => {
                self.walk_statements(body);
                self.declared.insert(exc_name.clone());
                self.walk_statements(handler);
            }
            Statement::Break { .. } | Statement::Continue { .. } => {}
        }
    }

    fn walk_expression(&mut self, expr: &Expression) {
        for node in expr.nodes() {
            match node {
                AirNode::PushName { name, global: false } => self.reference(name),
                AirNode::PushClosure { def } => {
                    for name in def.captures() {
                        self.reference(name);
                    }
                }
                AirNode::And { rhs, .. } | AirNode::Or { rhs, .. } | AirNode::Coalesce { rhs, .. } => {
                    self.walk_expression(rhs);
                }
                AirNode::Select { on_true, on_false } => {
                    self.walk_expression(on_true);
                    self.walk_expression(on_false);
                }
                _ => {}
            }
        }
    }
}

/// A scripted function instance: a shared definition plus the capture
/// context built when the closure was instantiated.
#[derive(Debug)]
pub struct ScriptedFunction {
    def: Rc<FunctionDef>,
    scope: Rc<Scope>,
}

impl ScriptedFunction {
    pub(crate) fn new(def: Rc<FunctionDef>, scope: Rc<Scope>) -> Self {
        Self { def, scope }
    }

    pub fn def(&self) -> &Rc<FunctionDef> {
        &self.def
    }

    pub(crate) fn scope(&self) -> &Rc<Scope> {
        &self.scope
    }
}

/// A native binding callable from script.
///
/// Implementations must translate host failures into runtime exceptions;
/// panicking across the evaluator is not supported.
pub trait NativeFunction {
    /// Name used by `print`/`dump` and backtraces.
    fn name(&self) -> &str;

    fn invoke(
        &self,
        global: &Rc<GlobalContext>,
        self_ref: Reference,
        args: Vec<Reference>,
    ) -> ExecResult<Reference>;

    /// Discovery hook for bindings that hold variable handles in their own
    /// state. Most bindings hold none.
    fn collect_variables(&self, staged: &mut PointerHashSet, out: &mut Vec<VarHandle>) {
        let _ = (staged, out);
    }
}

struct ClosureNative<F> {
    name: String,
    body: F,
}

impl<F> NativeFunction for ClosureNative<F>
where
    F: Fn(&Rc<GlobalContext>, Reference, Vec<Reference>) -> ExecResult<Reference>,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn invoke(
        &self,
        global: &Rc<GlobalContext>,
        self_ref: Reference,
        args: Vec<Reference>,
    ) -> ExecResult<Reference> {
        (self.body)(global, self_ref, args)
    }
}

/// An invocable value. Cloning shares the payload.
#[derive(Clone)]
pub enum Function {
    Scripted(Rc<ScriptedFunction>),
    Native(Rc<dyn NativeFunction>),
}

impl Function {
    /// Wraps a Rust closure as a native binding.
    pub fn native<F>(name: impl Into<String>, body: F) -> Self
    where
        F: Fn(&Rc<GlobalContext>, Reference, Vec<Reference>) -> ExecResult<Reference> + 'static,
    {
        Self::Native(Rc::new(ClosureNative {
            name: name.into(),
            body,
        }))
    }

    pub fn is_scripted(&self) -> bool {
        matches!(self, Self::Scripted(_))
    }

    /// One line of text for `print`/`dump` emission.
    pub fn describe(&self) -> String {
        match self {
            Self::Scripted(s) => {
                let def = s.def();
                let mut text = format!("{}(", def.name());
                for (n, param) in def.params().iter().enumerate() {
                    if n != 0 {
                        text.push_str(", ");
                    }
                    text.push_str(param);
                }
                if def.is_variadic() {
                    if !def.params().is_empty() {
                        text.push_str(", ");
                    }
                    text.push_str("...");
                }
                text.push_str(&format!(") at '{}'", def.location()));
                text
            }
            Self::Native(n) => format!("native {}", n.name()),
        }
    }

    pub(crate) fn payload_ptr(&self) -> *const () {
        match self {
            Self::Scripted(s) => Rc::as_ptr(s).cast(),
            Self::Native(n) => Rc::as_ptr(n).cast::<u8>().cast(),
        }
    }

    pub(crate) fn collect_variables(&self, staged: &mut PointerHashSet, out: &mut Vec<VarHandle>) {
        if !staged.insert(self.payload_ptr()) {
            return;
        }
        match self {
            Self::Scripted(s) => s.scope().collect_variables(staged, out),
            Self::Native(n) => n.collect_variables(staged, out),
        }
    }
}

impl fmt::Debug for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Function({})", self.describe())
    }
}
