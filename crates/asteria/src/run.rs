//! The statement interpreter and the embedding driver.
//!
//! [`Script`] is the host-facing entry point: it takes a compiled
//! [`Program`], applies the compile-time rewrites the options ask for, and
//! executes the statement stream as a variadic function against a
//! [`GlobalContext`]. The [`Executor`] underneath runs statements, fires
//! deferred expressions on every scope exit path, unwinds exceptions
//! through `try`/`catch`, and settles pending tail calls by replacing the
//! current frame instead of nesting — which is what keeps unbounded tail
//! recursion in constant native stack.

use std::rc::Rc;

use crate::{
    air::PtcHint,
    context::{Deferred, FrameInfo, GlobalContext, Scope},
    exception::{ExecResult, Exception, FrameKind},
    function::{Function, FunctionDef, ScriptedFunction},
    gc::Generation,
    reference::Reference,
    resource::{self, Options},
    source::SourceLocation,
    statement::{Program, Statement, SwitchClause},
    tracer::{NoopTracer, StderrTracer, StepTracer},
    value::{Compare, Value},
};

/// Loads `import`ed modules. The parser is external to this crate, so the
/// host decides how a path becomes a [`Program`].
pub trait ModuleLoader {
    fn load(&self, path: &str) -> ExecResult<Program>;
}

/// What one statement told the interpreter loop to do next.
#[derive(Debug)]
pub(crate) enum Control {
    Next,
    Break(Option<Rc<str>>),
    Continue(Option<Rc<str>>),
    Return(Reference),
}

fn label_matches(requested: &Option<Rc<str>>, own: &Option<Rc<str>>) -> bool {
    match requested {
        None => true,
        Some(name) => own.as_ref() == Some(name),
    }
}

/// The interpreter state for one execution: the global context, the
/// tracer, and the site of the statement being executed (stamped onto
/// frameless exceptions as they surface).
pub(crate) struct Executor<'t, T: StepTracer> {
    pub(crate) global: Rc<GlobalContext>,
    pub(crate) tracer: &'t mut T,
    pub(crate) site: SourceLocation,
}

impl<T: StepTracer> Executor<'_, T> {
    /// Runs a statement sequence in `scope`, without opening a child scope.
    /// Scheduled collections run and the interrupt flag is consulted
    /// between statements.
    pub(crate) fn run_statements(&mut self, statements: &[Statement], scope: &Rc<Scope>) -> ExecResult<Control> {
        for statement in statements {
            if let Some((limit, reclaimed)) = self.global.run_pending_collection() {
                self.tracer.on_collect(limit, reclaimed);
            }
            self.global.check_interrupt(&self.site)?;
            match self.execute_statement(statement, scope)? {
                Control::Next => {}
                other => return Ok(other),
            }
        }
        Ok(Control::Next)
    }

    /// Runs a statement sequence in a fresh child scope and fires its
    /// deferred expressions on every exit path.
    fn run_block(&mut self, statements: &[Statement], parent: &Rc<Scope>) -> ExecResult<Control> {
        let scope = Scope::new_plain(parent.clone());
        let result = self.run_statements(statements, &scope);
        self.fire_defers(&scope, result)
    }

    /// Fires `scope`'s deferred expressions in LIFO order.
    ///
    /// During exceptional exit a deferred exception is suppressed, the
    /// in-flight one taking precedence; during normal exit the first
    /// deferred exception becomes the scope's result.
    fn fire_defers(&mut self, scope: &Rc<Scope>, result: ExecResult<Control>) -> ExecResult<Control> {
        let deferred = scope.take_deferred();
        let mut result = result;
        for entry in deferred.into_iter().rev() {
            let Deferred { expr, site } = entry;
            match self.evaluate(&expr, scope) {
                Ok(_) => {}
                Err(secondary) => {
                    if result.is_ok() {
                        result = Err(secondary.at(site));
                    }
                }
            }
        }
        result
    }

    fn execute_statement(&mut self, statement: &Statement, scope: &Rc<Scope>) -> ExecResult<Control> {
        if let Some(site) = statement_site(statement) {
            self.site = site.clone();
            self.tracer.on_statement(&self.site);
        }
        let site = self.site.clone();
        self.execute_statement_inner(statement, scope)
            .map_err(|e| e.at(site))
    }

    fn execute_statement_inner(&mut self, statement: &Statement, scope: &Rc<Scope>) -> ExecResult<Control> {
        match statement {
            Statement::Expression { expr, .. } => {
                self.evaluate(expr, scope)?;
                Ok(Control::Next)
            }
            Statement::Block { body } => self.run_block(body, scope),
            Statement::Declare { decls, immutable, .. } => {
                for (name, init) in decls {
                    // The name resolves to the uninitialized sentinel while
                    // its own initializer runs, so `var x = x;` fails.
                    scope.insert(name.clone(), Reference::uninit(name.clone()));
                    let value = match init {
                        Some(expr) => self.evaluate(expr, scope)?.read()?,
                        None => Value::Null,
                    };
                    let cell = self.global.gc().create_variable(Generation::Newest);
                    cell.initialize(value);
                    if *immutable {
                        cell.mark_readonly();
                    }
                    scope.insert(name.clone(), Reference::variable(cell));
                }
                Ok(Control::Next)
            }
            Statement::DeclareRef { name, init, .. } => {
                let mut reference = self.evaluate(init, scope)?;
                reference.materialize(self.global.gc())?;
                scope.insert(name.clone(), reference);
                Ok(Control::Next)
            }
            Statement::DeclareFunction { name, def, .. } => {
                // Bind the name before instantiation so the closure
                // captures its own cell and recursion resolves.
                let cell = self.global.gc().create_variable(Generation::Newest);
                scope.insert(name.clone(), Reference::variable(cell.clone()));
                let function = self.instantiate_closure(def, scope)?;
                cell.initialize(Value::Function(function));
                cell.mark_readonly();
                Ok(Control::Next)
            }
            Statement::If {
                cond,
                branch_true,
                branch_false,
                ..
            } => {
                if self.evaluate(cond, scope)?.read()?.test() {
                    self.run_block(branch_true, scope)
                } else {
                    self.run_block(branch_false, scope)
                }
            }
            Statement::Switch {
                label,
                subject,
                clauses,
                ..
            } => self.run_switch(label, subject, clauses, scope),
            Statement::While { label, cond, body, .. } => {
                loop {
                    self.global.check_interrupt(&self.site)?;
                    if !self.evaluate(cond, scope)?.read()?.test() {
                        break;
                    }
                    match self.run_block(body, scope)? {
                        Control::Next => {}
                        Control::Continue(l) if label_matches(&l, label) => {}
                        Control::Break(l) if label_matches(&l, label) => break,
                        other => return Ok(other),
                    }
                }
                Ok(Control::Next)
            }
            Statement::DoWhile { label, body, cond, .. } => {
                loop {
                    self.global.check_interrupt(&self.site)?;
                    match self.run_block(body, scope)? {
                        Control::Next => {}
                        Control::Continue(l) if label_matches(&l, label) => {}
                        Control::Break(l) if label_matches(&l, label) => break,
                        other => return Ok(other),
                    }
                    if !self.evaluate(cond, scope)?.read()?.test() {
                        break;
                    }
                }
                Ok(Control::Next)
            }
            Statement::For {
                label,
                init,
                cond,
                step,
                body,
                ..
            } => {
                let outer = Scope::new_plain(scope.clone());
                let result = self.run_for(label, init.as_deref(), cond.as_ref(), step.as_ref(), body, &outer);
                self.fire_defers(&outer, result)
            }
            Statement::ForEach {
                label,
                key_name,
                value_name,
                range,
                body,
                ..
            } => {
                let outer = Scope::new_plain(scope.clone());
                let result = self.run_for_each(label, key_name, value_name, range, body, &outer);
                self.fire_defers(&outer, result)
            }
            Statement::Break { label, .. } => Ok(Control::Break(label.clone())),
            Statement::Continue { label, .. } => Ok(Control::Continue(label.clone())),
            Statement::Return { expr, by_ref, site } => {
                let reference = match expr {
                    None => Reference::void(),
                    Some(expr) => {
                        let reference = self.evaluate(expr, scope)?;
                        if *by_ref || reference.is_pending_call() || reference.is_void() {
                            reference
                        } else {
                            Reference::temporary(reference.read().map_err(|e| e.at(site.clone()))?)
                        }
                    }
                };
                Ok(Control::Return(reference))
            }
            Statement::Throw { expr, site } => {
                let value = self.evaluate(expr, scope)?.read()?;
                Err(Exception::throw_value(value, site.clone()))
            }
            Statement::Try {
                body,
                exc_name,
                handler,
                ..
            } => {
                let outcome = self.run_block(body, scope);
                match outcome {
                    Err(exception) if exception.is_catchable() => {
                        let handler_scope = Scope::new_plain(scope.clone());
                        let cell = self.global.gc().create_variable(Generation::Newest);
                        cell.initialize(exception.value().clone());
                        handler_scope.insert(exc_name.clone(), Reference::variable(cell));
                        handler_scope.insert("__backtrace", Reference::constant(exception.backtrace_value()));
                        let result = self.run_statements(handler, &handler_scope);
                        self.fire_defers(&handler_scope, result)
                    }
                    other => other,
                }
            }
            Statement::Defer { expr, site } => {
                scope.push_deferred(Deferred {
                    expr: expr.clone(),
                    site: site.clone(),
                });
                Ok(Control::Next)
            }
            Statement::Assert { expr, message, site } => {
                if self.evaluate(expr, scope)?.read()?.test() {
                    return Ok(Control::Next);
                }
                let mut text = String::from("assertion failure");
                if let Some(message) = message {
                    text.push_str(": ");
                    text.push_str(message);
                }
                Err(Exception::assertion(text, site.clone()))
            }
        }
    }

    fn run_switch(
        &mut self,
        own_label: &Option<Rc<str>>,
        subject: &crate::air::Expression,
        clauses: &[SwitchClause],
        scope: &Rc<Scope>,
    ) -> ExecResult<Control> {
        let subject = self.evaluate(subject, scope)?.read()?;
        let mut matched = None;
        let mut default = None;
        for (index, clause) in clauses.iter().enumerate() {
            match &clause.label {
                None => default = Some(index),
                Some(label) => {
                    let label = self.evaluate(label, scope)?.read()?;
                    if subject.compare(&label) == Compare::Equal {
                        matched = Some(index);
                        break;
                    }
                }
            }
        }
        let Some(start) = matched.or(default) else {
            return Ok(Control::Next);
        };

        // Fall through only across empty clause bodies.
        let mut chosen = start;
        while chosen < clauses.len() && clauses[chosen].body.is_empty() {
            chosen += 1;
        }
        if chosen == clauses.len() {
            return Ok(Control::Next);
        }

        let body_scope = Scope::new_plain(scope.clone());
        // Declarations in the clauses skipped over are poisoned: touching
        // one raises the bypassed-variable error instead of silently
        // reading null.
        for clause in &clauses[..chosen] {
            for name in &clause.declared {
                body_scope.insert(name.clone(), Reference::uninit(name.clone()));
            }
        }
        let result = self.run_statements(&clauses[chosen].body, &body_scope);
        match self.fire_defers(&body_scope, result)? {
            Control::Break(l) if label_matches(&l, own_label) => Ok(Control::Next),
            other => Ok(other),
        }
    }

    fn run_for(
        &mut self,
        label: &Option<Rc<str>>,
        init: Option<&Statement>,
        cond: Option<&crate::air::Expression>,
        step: Option<&crate::air::Expression>,
        body: &[Statement],
        outer: &Rc<Scope>,
    ) -> ExecResult<Control> {
        if let Some(init) = init {
            match self.execute_statement(init, outer)? {
                Control::Next => {}
                other => return Ok(other),
            }
        }
        loop {
            self.global.check_interrupt(&self.site)?;
            if let Some(cond) = cond
                && !self.evaluate(cond, outer)?.read()?.test()
            {
                break;
            }
            match self.run_block(body, outer)? {
                Control::Next => {}
                Control::Continue(l) if label_matches(&l, label) => {}
                Control::Break(l) if label_matches(&l, label) => break,
                other => return Ok(other),
            }
            if let Some(step) = step {
                self.evaluate(step, outer)?;
            }
        }
        Ok(Control::Next)
    }

    fn run_for_each(
        &mut self,
        label: &Option<Rc<str>>,
        key_name: &Rc<str>,
        value_name: &Rc<str>,
        range: &crate::air::Expression,
        body: &[Statement],
        outer: &Rc<Scope>,
    ) -> ExecResult<Control> {
        let mut range_ref = self.evaluate(range, outer)?;
        range_ref.materialize(self.global.gc())?;
        let range_value = range_ref.read()?;

        // The key set is snapshotted at entry; the element binding stays a
        // live l-value into the range.
        enum Keys {
            Indices(usize),
            Names(Vec<Rc<str>>),
        }
        let keys = match &range_value {
            Value::Array(a) => Keys::Indices(a.len()),
            Value::Object(o) => Keys::Names(o.keys().cloned().collect()),
            other => {
                return Err(Exception::runtime(format!(
                    "`for each` not applicable (range had type `{}`)",
                    other.type_of()
                )));
            }
        };

        let run_one = |this: &mut Self, key: Value, element: Reference| -> ExecResult<Option<Control>> {
            this.global.check_interrupt(&this.site)?;
            let iteration = Scope::new_plain(outer.clone());
            iteration.insert(key_name.clone(), Reference::constant(key));
            iteration.insert(value_name.clone(), element);
            let result = this.run_statements(body, &iteration);
            match this.fire_defers(&iteration, result)? {
                Control::Next => Ok(None),
                Control::Continue(l) if label_matches(&l, label) => Ok(None),
                Control::Break(l) if label_matches(&l, label) => Ok(Some(Control::Next)),
                other => Ok(Some(other)),
            }
        };

        match keys {
            Keys::Indices(len) => {
                for index in 0..len {
                    let mut element = range_ref.clone();
                    element.push_modifier(crate::reference::Modifier::ArrayIndex(index as i64));
                    if let Some(result) = run_one(self, Value::Integer(index as i64), element)? {
                        return Ok(result);
                    }
                }
            }
            Keys::Names(names) => {
                for name in names {
                    let mut element = range_ref.clone();
                    element.push_modifier(crate::reference::Modifier::ObjectKey(name.clone()));
                    if let Some(result) = run_one(self, Value::String(name), element)? {
                        return Ok(result);
                    }
                }
            }
        }
        Ok(Control::Next)
    }

    /// Invokes a function value directly (not in tail position): natives
    /// run in place; scripted callees get a frame, and any pending tail
    /// call their body returns is settled here by replacing that frame.
    pub(crate) fn invoke_function(
        &mut self,
        callee: Function,
        self_ref: Option<Reference>,
        args: Vec<Reference>,
        site: SourceLocation,
    ) -> ExecResult<Reference> {
        match callee {
            Function::Native(native) => native
                .invoke(&self.global, self_ref.unwrap_or_else(Reference::void), args)
                .map_err(|mut e| {
                    e = e.at(site.clone());
                    e.push_frame(FrameKind::Native, site.clone());
                    e
                }),
            Function::Scripted(target) => self.invoke_scripted(target, self_ref, args, site),
        }
    }

    fn invoke_scripted(
        &mut self,
        target: Rc<ScriptedFunction>,
        self_ref: Option<Reference>,
        args: Vec<Reference>,
        site: SourceLocation,
    ) -> ExecResult<Reference> {
        let mut target = target;
        let mut self_ref = self_ref;
        let mut args = args;
        // Call sites elided by tail-call frame replacement, replayed into
        // any escaping exception so traces match un-optimized nesting.
        let mut elided: Vec<SourceLocation> = Vec::new();
        let mut dereference_result = false;

        let outcome = loop {
            let caller_site = std::mem::replace(&mut self.site, target.def().location().clone());
            let frame = match self.bind_frame(&target, self_ref.take(), std::mem::take(&mut args)) {
                Ok(frame) => frame,
                Err(e) => {
                    self.site = caller_site;
                    break Err(e);
                }
            };
            if let Err(e) = self.global.enter_frame(frame.clone()) {
                self.site = caller_site;
                break Err(e);
            }
            self.tracer.on_call(target.def().name(), self.global.call_depth());

            let result = self.run_statements(target.def().body(), &frame);
            let result = self.fire_defers(&frame, result);

            self.global.leave_frame();
            self.tracer.on_return(self.global.call_depth());
            self.site = caller_site;

            match result {
                Err(e) => break Err(e),
                Ok(Control::Return(reference)) if reference.is_pending_call() => {
                    let call = reference.into_pending_call().expect("checked pending call");
                    if call.hint == PtcHint::ByValue {
                        dereference_result = true;
                    }
                    elided.push(call.site);
                    self.tracer.on_tail_call(call.target.def().name());
                    target = call.target;
                    self_ref = call.self_ref;
                    args = call.args;
                }
                Ok(Control::Return(reference)) => break Ok(reference),
                Ok(Control::Next) => break Ok(Reference::void()),
                Ok(Control::Break(_) | Control::Continue(_)) => {
                    break Err(Exception::runtime(
                        "`break` or `continue` outside of a loop or switch",
                    ));
                }
            }
        };

        match outcome {
            Ok(reference) => {
                if dereference_result && !reference.is_void() {
                    Ok(Reference::temporary(reference.read().map_err(|e| e.at(site))?))
                } else {
                    Ok(reference)
                }
            }
            Err(mut exception) => {
                // Innermost elided frame first, then this call's boundary:
                // exactly the frames nested execution would have recorded.
                for location in elided.drain(..).rev() {
                    exception.push_frame(FrameKind::Function, location);
                }
                exception.push_frame(FrameKind::Function, site);
                Err(exception)
            }
        }
    }

    /// Builds the function frame scope: parameters bound left to right
    /// (missing ones materialize as null so they stay writable), extras
    /// collected into the variadic pack when the callee accepts one.
    fn bind_frame(
        &mut self,
        target: &Rc<ScriptedFunction>,
        self_ref: Option<Reference>,
        args: Vec<Reference>,
    ) -> ExecResult<Rc<Scope>> {
        let def = target.def();
        resource::check_argument_count(args.len(), self.global.options().max_argument_count)?;

        let mut args = args.into_iter();
        let mut bound: Vec<(Rc<str>, Reference)> = Vec::with_capacity(def.params().len());
        for param in def.params() {
            let reference = match args.next() {
                Some(reference) => reference,
                None => {
                    let mut missing = Reference::temporary(Value::Null);
                    missing.materialize(self.global.gc())?;
                    missing
                }
            };
            bound.push((param.clone(), reference));
        }
        let varg: Vec<Reference> = if def.is_variadic() { args.collect() } else { Vec::new() };

        let frame = Scope::new_function(
            target.scope().clone(),
            FrameInfo {
                name: def.name().clone(),
                location: def.location().clone(),
                this: self_ref,
                varg,
            },
        );
        for (name, reference) in bound {
            frame.insert(name, reference);
        }
        Ok(frame)
    }
}

fn statement_site(statement: &Statement) -> Option<&SourceLocation> {
    match statement {
        Statement::Expression { site, .. }
        | Statement::Declare { site, .. }
        | Statement::DeclareRef { site, .. }
        | Statement::DeclareFunction { site, .. }
        | Statement::If { site, .. }
        | Statement::Switch { site, .. }
        | Statement::While { site, .. }
        | Statement::DoWhile { site, .. }
        | Statement::For { site, .. }
        | Statement::ForEach { site, .. }
        | Statement::Break { site, .. }
        | Statement::Continue { site, .. }
        | Statement::Return { site, .. }
        | Statement::Throw { site, .. }
        | Statement::Try { site, .. }
        | Statement::Defer { site, .. }
        | Statement::Assert { site, .. } => Some(site),
        Statement::Block { .. } => None,
    }
}

/// A compiled, executable script.
///
/// The statement stream runs as the body of an implicit variadic function
/// whose defining scope is the global scope, so top-level declarations are
/// frame-local and host arguments arrive through `__varg`.
#[derive(Debug)]
pub struct Script {
    main: Rc<FunctionDef>,
}

impl Script {
    /// Compiles a program against the given options (the optimization
    /// level applies here; execution limits are read from the global
    /// context at run time).
    pub fn new(mut program: Program, options: &Options) -> Self {
        program.optimize(options.optimization_level);
        let location = SourceLocation::new(program.file.clone(), 1);
        let main = FunctionDef::new("<script>", Vec::new(), true, program.statements, location);
        Self { main }
    }

    /// Executes with no arguments.
    pub fn execute(&self, global: &Rc<GlobalContext>) -> Result<Reference, Exception> {
        self.execute_with_args(global, Vec::new())
    }

    /// Executes, binding `args` as the variadic pack. The tracer follows
    /// `verbose_single_step_traps` from the global context's options.
    pub fn execute_with_args(&self, global: &Rc<GlobalContext>, args: Vec<Value>) -> Result<Reference, Exception> {
        if global.options().verbose_single_step_traps {
            let mut tracer = StderrTracer::default();
            self.execute_traced(global, args, &mut tracer)
        } else {
            let mut tracer = NoopTracer;
            self.execute_traced(global, args, &mut tracer)
        }
    }

    /// Executes with an explicit tracer.
    pub fn execute_traced<T: StepTracer>(
        &self,
        global: &Rc<GlobalContext>,
        args: Vec<Value>,
        tracer: &mut T,
    ) -> Result<Reference, Exception> {
        let mut executor = Executor {
            global: global.clone(),
            tracer,
            site: self.main.location().clone(),
        };
        let mut arg_refs = Vec::with_capacity(args.len());
        for value in args {
            let mut reference = Reference::temporary(value);
            reference.materialize(global.gc())?;
            arg_refs.push(reference);
        }
        let main = ScriptedFunction::new(self.main.clone(), global.global_scope().clone());
        executor.invoke_function(
            Function::Scripted(Rc::new(main)),
            None,
            arg_refs,
            self.main.location().clone(),
        )
    }
}
