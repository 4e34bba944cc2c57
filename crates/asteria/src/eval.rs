//! Reverse-Polish expression evaluation.
//!
//! [`Executor::evaluate`] runs one expression's AIR node sequence over a
//! local reference stack. Operand nodes push, operator nodes pop and push,
//! and the single surviving reference is the expression result. Branch
//! nodes evaluate their sub-expressions on the same stack, which is what
//! makes short-circuit forms skip their right-hand side entirely.

use std::rc::Rc;

use crate::{
    air::{AirNode, ArgSpec, Expression, PtcHint, Subscript, UnaryOp},
    context::Scope,
    exception::{ExecResult, Exception},
    function::{Function, FunctionDef, ScriptedFunction},
    ops,
    reference::{Modifier, PtcCall, Reference},
    run::Executor,
    source::SourceLocation,
    tracer::StepTracer,
    value::{ObjectMap, Value},
};

fn pop(stack: &mut Vec<Reference>) -> ExecResult<Reference> {
    stack
        .pop()
        .ok_or_else(|| Exception::runtime("evaluation stack underflow (malformed expression)"))
}

fn top(stack: &mut [Reference]) -> ExecResult<&mut Reference> {
    stack
        .last_mut()
        .ok_or_else(|| Exception::runtime("evaluation stack underflow (malformed expression)"))
}

impl<T: StepTracer> Executor<'_, T> {
    /// Evaluates one expression to its result reference.
    pub(crate) fn evaluate(&mut self, expr: &Expression, scope: &Rc<Scope>) -> ExecResult<Reference> {
        let mut stack: Vec<Reference> = Vec::with_capacity(4);
        self.eval_nodes(expr.nodes(), scope, &mut stack)?;
        debug_assert!(stack.len() == 1, "expression left {} stack entries", stack.len());
        pop(&mut stack)
    }

    fn eval_nodes(
        &mut self,
        nodes: &[AirNode],
        scope: &Rc<Scope>,
        stack: &mut Vec<Reference>,
    ) -> ExecResult<()> {
        for node in nodes {
            self.eval_node(node, scope, stack)?;
        }
        Ok(())
    }

    fn eval_node(&mut self, node: &AirNode, scope: &Rc<Scope>, stack: &mut Vec<Reference>) -> ExecResult<()> {
        match node {
            AirNode::PushLiteral(value) => {
                stack.push(Reference::constant(value.clone()));
                Ok(())
            }
            AirNode::PushName { name, global } => {
                let found = if *global {
                    self.global.global_scope().lookup(name)?
                } else {
                    Scope::resolve(scope, name)?
                };
                let reference =
                    found.ok_or_else(|| Exception::runtime(format!("unresolvable identifier `{name}`")))?;
                stack.push(reference);
                Ok(())
            }
            AirNode::PushClosure { def } => {
                let function = self.instantiate_closure(def, scope)?;
                stack.push(Reference::temporary(Value::Function(function)));
                Ok(())
            }
            AirNode::MakeArray { count } => {
                let at = stack
                    .len()
                    .checked_sub(*count)
                    .ok_or_else(|| Exception::runtime("evaluation stack underflow (malformed expression)"))?;
                let mut elements = Vec::with_capacity(*count);
                for reference in stack.drain(at..) {
                    elements.push(reference.read()?);
                }
                stack.push(Reference::temporary(Value::from(elements)));
                Ok(())
            }
            AirNode::MakeObject { keys } => {
                let at = stack
                    .len()
                    .checked_sub(keys.len())
                    .ok_or_else(|| Exception::runtime("evaluation stack underflow (malformed expression)"))?;
                let mut values = Vec::with_capacity(keys.len());
                for reference in stack.drain(at..) {
                    values.push(reference.read()?);
                }
                let map: ObjectMap = keys.iter().cloned().zip(values).collect();
                stack.push(Reference::temporary(Value::from(map)));
                Ok(())
            }
            AirNode::Unary { op, assign } => self.eval_unary(*op, *assign, stack),
            AirNode::Binary { op, assign } => self.eval_binary(*op, *assign, stack),
            AirNode::Assign => {
                let value = pop(stack)?.read()?;
                top(stack)?.write(value)
            }
            AirNode::And { rhs, assign } => {
                if top(stack)?.read()?.test() {
                    self.eval_branch_rhs(rhs, scope, stack, *assign)?;
                }
                Ok(())
            }
            AirNode::Or { rhs, assign } => {
                if !top(stack)?.read()?.test() {
                    self.eval_branch_rhs(rhs, scope, stack, *assign)?;
                }
                Ok(())
            }
            AirNode::Coalesce { rhs, assign } => {
                if top(stack)?.read()?.is_null() {
                    self.eval_branch_rhs(rhs, scope, stack, *assign)?;
                }
                Ok(())
            }
            AirNode::Select { on_true, on_false } => {
                let branch = if pop(stack)?.read()?.test() { on_true } else { on_false };
                self.eval_nodes(branch.nodes(), scope, stack)
            }
            AirNode::Member { subscript } => self.eval_subscript(subscript, stack),
            AirNode::Call { args, ptc, site } => self.eval_call(args, *ptc, site, stack),
            AirNode::Import { arg_count, site } => self.eval_import(*arg_count, site, stack),
        }
    }

    // The short-circuit tail: the decision to evaluate has been made, so
    // the left-hand side comes off the stack, the right-hand side runs,
    // and — for the compound-assign forms — the result is written back
    // through the left-hand reference. When the left-hand side settles the
    // result this function is never reached, which is exactly the "no
    // write-back on short-circuit" rule.
    fn eval_branch_rhs(
        &mut self,
        rhs: &Expression,
        scope: &Rc<Scope>,
        stack: &mut Vec<Reference>,
        assign: bool,
    ) -> ExecResult<()> {
        let lhs = pop(stack)?;
        self.eval_nodes(rhs.nodes(), scope, stack)?;
        if assign {
            let value = pop(stack)?.read()?;
            lhs.write(value)?;
            stack.push(lhs);
        }
        Ok(())
    }

    fn eval_unary(&mut self, op: UnaryOp, assign: bool, stack: &mut Vec<Reference>) -> ExecResult<()> {
        match op {
            UnaryOp::PreInc | UnaryOp::PreDec | UnaryOp::PostInc | UnaryOp::PostDec => {
                let delta = if matches!(op, UnaryOp::PreInc | UnaryOp::PostInc) { 1 } else { -1 };
                let target = top(stack)?.clone();
                let old = target.read()?;
                target.write(ops::increment(&old, delta)?)?;
                if matches!(op, UnaryOp::PostInc | UnaryOp::PostDec) {
                    pop(stack)?;
                    stack.push(Reference::temporary(old));
                }
                Ok(())
            }
            _ if assign => {
                let target = top(stack)?.clone();
                let value = ops::unary(op, &target.read()?)?;
                target.write(value)
            }
            _ => {
                let operand = pop(stack)?.read()?;
                stack.push(Reference::temporary(ops::unary(op, &operand)?));
                Ok(())
            }
        }
    }

    fn eval_binary(&mut self, op: crate::air::BinaryOp, assign: bool, stack: &mut Vec<Reference>) -> ExecResult<()> {
        let rhs = pop(stack)?.read()?;
        if assign {
            let target = top(stack)?.clone();
            let value = ops::binary(op, &target.read()?, &rhs)?;
            target.write(value)
        } else {
            let lhs = pop(stack)?.read()?;
            stack.push(Reference::temporary(ops::binary(op, &lhs, &rhs)?));
            Ok(())
        }
    }

    fn eval_subscript(&mut self, subscript: &Subscript, stack: &mut Vec<Reference>) -> ExecResult<()> {
        match subscript {
            Subscript::Index => {
                let sub = pop(stack)?.read()?;
                let modifier = match sub {
                    Value::Integer(index) => Modifier::ArrayIndex(index),
                    Value::String(key) => Modifier::ObjectKey(key),
                    other => {
                        return Err(Exception::runtime(format!(
                            "subscript value not an integer or a string (type was `{}`)",
                            other.type_of()
                        )));
                    }
                };
                top(stack)?.push_modifier(modifier);
            }
            Subscript::Key(key) => top(stack)?.push_modifier(Modifier::ObjectKey(key.clone())),
            Subscript::Head => top(stack)?.push_modifier(Modifier::ArrayHead),
            Subscript::Tail => top(stack)?.push_modifier(Modifier::ArrayTail),
            Subscript::Random => {
                let seed = self.global.next_random_seed();
                top(stack)?.push_modifier(Modifier::ArrayRandom(seed));
            }
        }
        Ok(())
    }

    fn eval_call(
        &mut self,
        specs: &[ArgSpec],
        ptc: PtcHint,
        site: &SourceLocation,
        stack: &mut Vec<Reference>,
    ) -> ExecResult<()> {
        let at = stack
            .len()
            .checked_sub(specs.len() + 1)
            .ok_or_else(|| Exception::runtime("evaluation stack underflow (malformed expression)"))?;
        let mut args: Vec<Reference> = stack.drain(at..).collect();
        let callee = args.remove(0);

        for (arg, spec) in args.iter_mut().zip(specs) {
            match spec {
                ArgSpec::ByValue => {
                    let mut copied = Reference::temporary(arg.read().map_err(|e| e.at(site.clone()))?);
                    copied.materialize(self.global.gc())?;
                    *arg = copied;
                }
                ArgSpec::ByRef => {
                    if !arg.is_variable_rooted() {
                        return Err(Exception::runtime(
                            "argument is not a valid reference (pass-by-reference needs a variable)",
                        )
                        .at(site.clone()));
                    }
                }
            }
        }

        // A member-access callee donates its parent as `this`.
        let self_ref = if callee.modifiers().is_empty() {
            None
        } else {
            let mut parent = callee.clone();
            parent.pop_modifier();
            Some(parent)
        };

        let value = callee.read().map_err(|e| e.at(site.clone()))?;
        let callee_type = value.type_of();
        let Value::Function(function) = value else {
            return Err(Exception::runtime(format!(
                "attempt to call a non-function (value had type `{callee_type}`)"
            ))
            .at(site.clone()));
        };

        if ptc != PtcHint::None
            && let Function::Scripted(target) = &function
        {
            // Tail position: hand the pending call up to the trampoline
            // instead of nesting a frame.
            stack.push(Reference::pending_call(PtcCall {
                target: target.clone(),
                self_ref,
                args,
                hint: ptc,
                site: site.clone(),
            }));
            return Ok(());
        }

        let result = self.invoke_function(function, self_ref, args, site.clone())?;
        stack.push(result);
        Ok(())
    }

    fn eval_import(&mut self, arg_count: usize, site: &SourceLocation, stack: &mut Vec<Reference>) -> ExecResult<()> {
        let at = stack
            .len()
            .checked_sub(arg_count + 1)
            .ok_or_else(|| Exception::runtime("evaluation stack underflow (malformed expression)"))?;
        let mut args: Vec<Reference> = stack.drain(at..).collect();
        let path_ref = args.remove(0);
        let path = path_ref.read().map_err(|e| e.at(site.clone()))?;
        let path = path.as_string().map_err(|e| e.at(site.clone()))?.clone();

        for arg in &mut args {
            let mut copied = Reference::temporary(arg.read().map_err(|e| e.at(site.clone()))?);
            copied.materialize(self.global.gc())?;
            *arg = copied;
        }

        let program = self.global.load_module(&path).map_err(|e| e.at(site.clone()))?;
        let location = SourceLocation::new(program.file.clone(), 1);
        let def = FunctionDef::new(path, Vec::new(), true, program.statements, location);
        let module = ScriptedFunction::new(def, self.global.global_scope().clone());
        let result = self.invoke_function(Function::Scripted(Rc::new(module)), None, args, site.clone())?;
        stack.push(result);
        Ok(())
    }

    /// Builds a closure instance: resolve the definition's free names in
    /// the current chain and copy them into a fresh capture scope, which
    /// the function value owns from here on.
    pub(crate) fn instantiate_closure(&mut self, def: &Rc<FunctionDef>, scope: &Rc<Scope>) -> ExecResult<Function> {
        let capture = Scope::new_capture(self.global.global_scope().clone());
        for name in def.captures() {
            if let Some(reference) = Scope::resolve(scope, name)? {
                capture.insert(name.clone(), reference);
            }
        }
        Ok(Function::Scripted(Rc::new(ScriptedFunction::new(def.clone(), capture))))
    }
}
