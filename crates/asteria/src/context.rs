//! Scopes and the global context.
//!
//! A [`Scope`] is one node of a parent-linked chain. Ordinary lookup probes
//! the local dictionary and ascends; `__global`-qualified lookup goes
//! straight to the global scope. Names starting with `__` that miss are
//! synthesized lazily by the owning scope (`__func`, `__varg`, `__this`,
//! `__file`, `__line`) and inserted through the dictionary directly, so
//! synthesis can never re-enter itself.
//!
//! Scopes are `Rc`-shared because closures own their definition-time
//! capture scope strongly; that edge is the only way a value can keep a
//! scope alive, and the garbage collector descends it via
//! [`Scope::collect_variables`].

use std::{
    cell::{Cell, RefCell},
    rc::Rc,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::{
    air::Expression,
    exception::{ExecResult, Exception},
    function::Function,
    gc::{GarbageCollector, Generation},
    io::{PrintWriter, StdPrint},
    library,
    llds::{PointerHashSet, ReferenceDictionary},
    reference::Reference,
    resource::Options,
    run::ModuleLoader,
    source::SourceLocation,
    value::Value,
    variable::VarHandle,
};

/// Call-frame details a function scope carries for its lazy built-ins.
#[derive(Debug)]
pub(crate) struct FrameInfo {
    /// The callee's name, as `__func` reports it.
    pub name: Rc<str>,
    /// The callee's definition site, for `__file`/`__line`.
    pub location: SourceLocation,
    /// The `this` reference, when the call went through member access.
    pub this: Option<Reference>,
    /// Extra positional arguments of a variadic call, for `__varg`.
    pub varg: Vec<Reference>,
}

/// What role a scope plays in the chain.
#[derive(Debug)]
pub(crate) enum ScopeKind {
    /// The root scope owned by the [`GlobalContext`].
    Global,
    /// A block, loop body, switch body or handler scope.
    Plain,
    /// A closure's definition-time capture scope.
    Capture,
    /// A function call frame.
    Function(Box<FrameInfo>),
}

/// A deferred expression queued by a `defer` statement, fired when the
/// owning scope exits.
#[derive(Debug)]
pub(crate) struct Deferred {
    pub expr: Expression,
    pub site: SourceLocation,
}

/// One node of the scope chain.
#[derive(Debug)]
pub struct Scope {
    kind: ScopeKind,
    parent: Option<Rc<Scope>>,
    names: RefCell<ReferenceDictionary>,
    deferred: RefCell<Vec<Deferred>>,
}

impl Scope {
    fn new(kind: ScopeKind, parent: Option<Rc<Self>>) -> Rc<Self> {
        Rc::new(Self {
            kind,
            parent,
            names: RefCell::new(ReferenceDictionary::new()),
            deferred: RefCell::new(Vec::new()),
        })
    }

    pub(crate) fn new_global() -> Rc<Self> {
        Self::new(ScopeKind::Global, None)
    }

    pub(crate) fn new_plain(parent: Rc<Self>) -> Rc<Self> {
        Self::new(ScopeKind::Plain, Some(parent))
    }

    pub(crate) fn new_capture(parent: Rc<Self>) -> Rc<Self> {
        Self::new(ScopeKind::Capture, Some(parent))
    }

    pub(crate) fn new_function(parent: Rc<Self>, frame: FrameInfo) -> Rc<Self> {
        Self::new(ScopeKind::Function(Box::new(frame)), Some(parent))
    }

    pub(crate) fn parent(&self) -> Option<&Rc<Self>> {
        self.parent.as_ref()
    }

    /// Binds `name` in this scope, shadowing any outer binding. Returns
    /// whether the name was new here.
    pub fn insert(&self, name: impl Into<Rc<str>>, reference: Reference) -> bool {
        self.names.borrow_mut().insert(name, reference)
    }

    /// Removes the binding for `name` from this scope only.
    pub fn erase(&self, name: &str) -> Option<Reference> {
        self.names.borrow_mut().erase(name)
    }

    /// Probes this scope only: the dictionary first, then — for `__` names
    /// that miss — the lazy synthesizer. The caller decides whether to
    /// ascend on a miss.
    pub fn lookup(&self, name: &str) -> ExecResult<Option<Reference>> {
        let found = self.names.borrow().find(name).cloned();
        if let Some(found) = found {
            return Ok(Some(found));
        }
        if !name.starts_with("__") {
            return Ok(None);
        }
        let Some(synthesized) = self.synthesize_lazy(name)? else {
            return Ok(None);
        };
        // Install through the dictionary itself; the synthesizer is never
        // consulted for a name that is already present, so this cannot
        // recurse.
        self.names.borrow_mut().insert(name, synthesized.clone());
        Ok(Some(synthesized))
    }

    fn synthesize_lazy(&self, name: &str) -> ExecResult<Option<Reference>> {
        let ScopeKind::Function(frame) = &self.kind else {
            return Ok(None);
        };
        match name {
            "__func" => Ok(Some(Reference::constant(Value::String(frame.name.clone())))),
            "__file" => Ok(Some(Reference::constant(Value::String(
                frame.location.file().clone(),
            )))),
            "__line" => Ok(Some(Reference::constant(Value::Integer(i64::from(
                frame.location.line(),
            ))))),
            "__this" => Ok(frame.this.clone()),
            "__varg" => {
                let mut values = Vec::with_capacity(frame.varg.len());
                for arg in &frame.varg {
                    values.push(arg.read()?);
                }
                Ok(Some(Reference::constant(Value::from(values))))
            }
            _ => Ok(None),
        }
    }

    /// Walks the chain from `scope` outward until a binding is found.
    pub fn resolve(scope: &Rc<Self>, name: &str) -> ExecResult<Option<Reference>> {
        let mut current = Some(scope);
        while let Some(s) = current {
            if let Some(found) = s.lookup(name)? {
                return Ok(Some(found));
            }
            current = s.parent.as_ref();
        }
        Ok(None)
    }

    pub(crate) fn push_deferred(&self, deferred: Deferred) {
        self.deferred.borrow_mut().push(deferred);
    }

    /// Takes the queued deferred expressions, oldest first. The caller
    /// fires them in reverse (LIFO) order.
    pub(crate) fn take_deferred(&self) -> Vec<Deferred> {
        std::mem::take(&mut self.deferred.borrow_mut())
    }

    /// Stages every variable this scope pins: dictionary bindings, the
    /// frame's `this` and variadic pack, and the parent chain. Shared
    /// scopes are walked once per traversal thanks to `staged`.
    pub(crate) fn collect_variables(&self, staged: &mut PointerHashSet, out: &mut Vec<VarHandle>) {
        if !staged.insert(std::ptr::from_ref(self).cast()) {
            return;
        }
        self.names.borrow().for_each(|_, reference| {
            reference.collect_variables(staged, out);
        });
        if let ScopeKind::Function(frame) = &self.kind {
            if let Some(this) = &frame.this {
                this.collect_variables(staged, out);
            }
            for arg in &frame.varg {
                arg.collect_variables(staged, out);
            }
        }
        if let Some(parent) = &self.parent {
            parent.collect_variables(staged, out);
        }
    }
}

/// Host handle for requesting an interrupt; safe to set from any thread
/// (for example a signal handler thread).
#[derive(Debug, Clone, Default)]
pub struct InterruptFlag(Arc<AtomicBool>);

impl InterruptFlag {
    pub fn set(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn clear(&self) {
        self.0.store(false, Ordering::Relaxed);
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// The root of everything: owns the garbage collector, the global scope,
/// the random-number state behind `[?]` subscripts, the interrupt flag,
/// the output writer and the module loader.
///
/// One global context is one interpreter instance. Instances are fully
/// independent; variables must never migrate between them.
pub struct GlobalContext {
    gc: GarbageCollector,
    scope: Rc<Scope>,
    rng: RefCell<ChaCha8Rng>,
    interrupt: InterruptFlag,
    writer: RefCell<Box<dyn PrintWriter>>,
    loader: RefCell<Option<Box<dyn ModuleLoader>>>,
    options: Options,
    /// Function frame scopes currently on the call stack, for GC root
    /// scanning.
    frames: RefCell<Vec<Rc<Scope>>>,
    depth: Cell<usize>,
}

impl GlobalContext {
    /// A fresh interpreter instance with the built-in `std` tree seeded.
    pub fn new(options: Options) -> Rc<Self> {
        let global = Rc::new(Self {
            gc: GarbageCollector::new(),
            scope: Scope::new_global(),
            rng: RefCell::new(ChaCha8Rng::seed_from_u64(0x415F_7465_7269_61F5)),
            interrupt: InterruptFlag::default(),
            writer: RefCell::new(Box::new(StdPrint)),
            loader: RefCell::new(None),
            options: options.validated(),
            frames: RefCell::new(Vec::new()),
            depth: Cell::new(0),
        });
        library::install(&global);
        global
    }

    pub fn new_default() -> Rc<Self> {
        Self::new(Options::default())
    }

    pub fn gc(&self) -> &GarbageCollector {
        &self.gc
    }

    pub fn global_scope(&self) -> &Rc<Scope> {
        &self.scope
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    /// Reseeds the RNG behind `[?]` subscripts, for reproducible runs.
    pub fn seed_rng(&self, seed: u64) {
        *self.rng.borrow_mut() = ChaCha8Rng::seed_from_u64(seed);
    }

    pub(crate) fn next_random_seed(&self) -> u32 {
        self.rng.borrow_mut().next_u32()
    }

    pub fn interrupt_flag(&self) -> InterruptFlag {
        self.interrupt.clone()
    }

    pub(crate) fn check_interrupt(&self, site: &SourceLocation) -> ExecResult<()> {
        if self.interrupt.is_set() {
            return Err(Exception::interrupt(site.clone()));
        }
        Ok(())
    }

    /// Replaces the output writer used by `std.io`/`std.debug`.
    pub fn set_print_writer(&self, writer: Box<dyn PrintWriter>) {
        *self.writer.borrow_mut() = writer;
    }

    pub(crate) fn with_writer<R>(&self, with: impl FnOnce(&mut dyn PrintWriter) -> R) -> R {
        with(self.writer.borrow_mut().as_mut())
    }

    /// Installs the loader behind `import` nodes.
    pub fn set_module_loader(&self, loader: Box<dyn ModuleLoader>) {
        *self.loader.borrow_mut() = Some(loader);
    }

    pub(crate) fn load_module(&self, path: &str) -> ExecResult<crate::statement::Program> {
        let loader = self.loader.borrow();
        let Some(loader) = loader.as_ref() else {
            return Err(Exception::runtime("module loading is not available in this context"));
        };
        loader.load(path)
    }

    // Call-depth accounting. Tail calls re-enter through the trampoline
    // without touching the depth, so only genuine nesting counts.

    pub(crate) fn enter_frame(&self, scope: Rc<Scope>) -> ExecResult<()> {
        crate::resource::check_recursion_depth(self.depth.get(), self.options.max_recursion_depth)?;
        self.depth.set(self.depth.get() + 1);
        self.frames.borrow_mut().push(scope);
        Ok(())
    }

    pub(crate) fn leave_frame(&self) {
        self.depth.set(self.depth.get().saturating_sub(1));
        self.frames.borrow_mut().pop();
    }

    pub(crate) fn call_depth(&self) -> usize {
        self.depth.get()
    }

    /// Forces a collection of the given generation and all younger ones
    /// (the whole heap by default), returning how many variables were
    /// reclaimed.
    pub fn collect(&self, limit: Option<Generation>) -> usize {
        let mut roots = vec![self.scope.clone()];
        roots.extend(self.frames.borrow().iter().cloned());
        self.gc
            .collect_with_roots(limit.unwrap_or(Generation::Oldest), &roots)
    }

    /// Runs a collection scheduled by threshold crossings, if any.
    pub(crate) fn run_pending_collection(&self) -> Option<(usize, usize)> {
        let limit = self.gc.take_pending()?;
        let reclaimed = self.collect(Some(limit));
        Some((limit as usize, reclaimed))
    }

    // Host binding helpers.

    /// Creates a variable in the oldest generation, binds it to `name` in
    /// the global scope, and hands the cell back for direct host access.
    pub fn define_variable(&self, name: &str, value: Value) -> VarHandle {
        let cell = self.gc.create_variable(Generation::Oldest);
        cell.initialize(value);
        self.scope.insert(name, Reference::variable(cell.clone()));
        cell
    }

    /// As [`define_variable`](Self::define_variable), but read-only.
    pub fn define_constant(&self, name: &str, value: Value) -> VarHandle {
        let cell = self.define_variable(name, value);
        cell.mark_readonly();
        cell
    }

    /// Binds a native function under `name` in the global scope.
    pub fn define_function(&self, name: &str, function: Function) -> VarHandle {
        self.define_constant(name, Value::Function(function))
    }

    /// Binds an arbitrary reference in the global scope.
    pub fn open_named_reference(&self, name: &str, reference: Reference) {
        self.scope.insert(name, reference);
    }
}

impl std::fmt::Debug for GlobalContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GlobalContext")
            .field("options", &self.options)
            .field("depth", &self.depth.get())
            .field("pooled_variables", &self.gc.count_pooled_variables())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame_scope(parent: Rc<Scope>) -> Rc<Scope> {
        Scope::new_function(
            parent,
            FrameInfo {
                name: Rc::from("probe"),
                location: SourceLocation::new("ctx", 5),
                this: None,
                varg: vec![
                    Reference::constant(Value::Integer(8)),
                    Reference::constant(Value::Integer(9)),
                ],
            },
        )
    }

    #[test]
    fn resolve_ascends_and_inner_shadows() {
        let outer = Scope::new_global();
        outer.insert("x", Reference::constant(Value::Integer(1)));
        outer.insert("y", Reference::constant(Value::Integer(2)));
        let inner = Scope::new_plain(outer.clone());
        inner.insert("x", Reference::constant(Value::Integer(10)));

        let x = Scope::resolve(&inner, "x").unwrap().unwrap();
        assert_eq!(x.read().unwrap().as_integer().unwrap(), 10);
        let y = Scope::resolve(&inner, "y").unwrap().unwrap();
        assert_eq!(y.read().unwrap().as_integer().unwrap(), 2);
        assert!(Scope::resolve(&inner, "z").unwrap().is_none());
    }

    #[test]
    fn lazy_names_synthesize_once_on_the_function_scope() {
        let frame = frame_scope(Scope::new_global());
        let func = frame.lookup("__func").unwrap().unwrap();
        assert_eq!(&**func.read().unwrap().as_string().unwrap(), "probe");
        let varg = frame.lookup("__varg").unwrap().unwrap();
        assert_eq!(varg.read().unwrap().print_string(), "[ 8, 9 ]");
        let line = frame.lookup("__line").unwrap().unwrap();
        assert_eq!(line.read().unwrap().as_integer().unwrap(), 5);

        // The synthesized entry is now an ordinary dictionary binding.
        assert!(frame.names.borrow().find("__func").is_some());
    }

    #[test]
    fn plain_scopes_do_not_synthesize() {
        let plain = Scope::new_plain(Scope::new_global());
        assert!(plain.lookup("__func").unwrap().is_none());
        // But resolution ascends into an enclosing function scope.
        let nested = Scope::new_plain(frame_scope(Scope::new_global()));
        assert!(Scope::resolve(&nested, "__func").unwrap().is_some());
    }

    #[test]
    fn non_lazy_double_underscore_names_stay_missing() {
        let frame = frame_scope(Scope::new_global());
        assert!(frame.lookup("__nonsense").unwrap().is_none());
        assert!(frame.names.borrow().find("__nonsense").is_none());
    }

    #[test]
    fn deferred_entries_drain_in_insertion_order() {
        let scope = Scope::new_plain(Scope::new_global());
        for line in 1..=3 {
            scope.push_deferred(Deferred {
                expr: Expression::new(vec![]),
                site: SourceLocation::new("ctx", line),
            });
        }
        let drained = scope.take_deferred();
        assert_eq!(drained.len(), 3);
        assert_eq!(drained[0].site.line(), 1);
        assert!(scope.take_deferred().is_empty());
    }
}
