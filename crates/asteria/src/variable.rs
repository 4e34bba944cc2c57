//! The mutable heap cell behind every named binding.

use std::{
    cell::{Cell, Ref, RefCell},
    rc::Rc,
};

use crate::{exception::ExecResult, value::Value};

/// Strong handle to a [`Variable`]. Cloning shares the cell.
pub type VarHandle = Rc<Variable>;

/// A shared, mutable cell holding one [`Value`], plus a read-only flag.
///
/// Variables are the only runtime objects that can participate in reference
/// cycles: values embed other values by copy, but a captured name or an
/// l-value always goes through a variable cell. Allocation goes through the
/// [garbage collector](crate::gc::GarbageCollector), which registers every
/// cell in a generation's tracked set.
///
/// The two `gc_*` fields are collector scratch: an internal-reference tally
/// and a reachability mark, both meaningless outside a collection.
#[derive(Debug)]
pub struct Variable {
    value: RefCell<Value>,
    readonly: Cell<bool>,
    gc_ref: Cell<u32>,
    gc_mark: Cell<bool>,
}

impl Variable {
    /// A fresh null-holding, writable cell. Prefer
    /// [`GarbageCollector::create_variable`](crate::gc::GarbageCollector::create_variable),
    /// which also registers the cell for collection.
    pub fn new() -> Self {
        Self {
            value: RefCell::new(Value::Null),
            readonly: Cell::new(false),
            gc_ref: Cell::new(0),
            gc_mark: Cell::new(false),
        }
    }

    /// Borrows the stored value.
    ///
    /// # Panics
    /// Panics if called while `set_value` is writing the same cell, which
    /// the single-threaded evaluator never does.
    pub fn get_value(&self) -> Ref<'_, Value> {
        self.value.borrow()
    }

    /// Copies the stored value out (cheap: container payloads are shared).
    pub fn clone_value(&self) -> Value {
        self.value.borrow().clone()
    }

    /// Mutable access for the reference walker. The read-only flag is
    /// checked by the caller, which knows whether the access is a write or
    /// a declaration.
    pub(crate) fn with_value_mut<R>(&self, with: impl FnOnce(&mut Value) -> R) -> R {
        with(&mut self.value.borrow_mut())
    }

    /// Replaces the stored value, failing on read-only cells.
    pub fn set_value(&self, value: Value) -> ExecResult<()> {
        if self.readonly.get() {
            return Err(crate::exception::Exception::runtime(
                "attempt to modify a read-only variable",
            ));
        }
        *self.value.borrow_mut() = value;
        Ok(())
    }

    /// Stores the declaration-time value, bypassing the read-only flag.
    /// Used once per cell, when a `var`/`const`/`func` declaration
    /// completes.
    pub fn initialize(&self, value: Value) {
        *self.value.borrow_mut() = value;
    }

    /// Clears the cell to null, dropping whatever payload it held. The
    /// collector uses this to break the outgoing edges of unreachable
    /// cells; the cascading handle drops are what deallocate a dead cycle.
    pub fn uninitialize(&self) {
        *self.value.borrow_mut() = Value::Null;
    }

    pub fn mark_readonly(&self) {
        self.readonly.set(true);
    }

    pub fn is_readonly(&self) -> bool {
        self.readonly.get()
    }

    // Collector scratch accessors.

    pub(crate) fn gc_reset(&self) {
        self.gc_ref.set(0);
        self.gc_mark.set(false);
    }

    pub(crate) fn gc_bump_ref(&self) {
        self.gc_ref.set(self.gc_ref.get().saturating_add(1));
    }

    pub(crate) fn gc_ref(&self) -> u32 {
        self.gc_ref.get()
    }

    pub(crate) fn gc_mark(&self) {
        self.gc_mark.set(true);
    }

    pub(crate) fn gc_marked(&self) -> bool {
        self.gc_mark.get()
    }
}

impl Default for Variable {
    fn default() -> Self {
        Self::new()
    }
}
