//! Host-opaque values.

use std::{fmt, rc::Rc};

use uuid::Uuid;

use crate::{llds::PointerHashSet, variable::VarHandle};

/// State a host embeds into script-visible [`Value::Opaque`]
/// (crate::value::Value::Opaque) handles.
///
/// An opaque carries a UUID identifying its concrete kind to other host
/// code, a one-line description used by `print`/`dump`, and — when the
/// state holds variable handles — a traversal hook so the collector can
/// discover them.
pub trait OpaqueData {
    /// Identifies the concrete kind of state to host code.
    fn uuid(&self) -> Uuid;

    /// One line of text for `print` and `dump` emission.
    fn describe(&self) -> String;

    /// Pushes every variable handle embedded in this state into `out`.
    ///
    /// `staged` deduplicates shared sub-payloads the same way value
    /// traversal does; implementations that own no variables can ignore
    /// both arguments.
    fn collect_variables(&self, staged: &mut PointerHashSet, out: &mut Vec<VarHandle>) {
        let _ = (staged, out);
    }
}

/// A shared handle to host state. Cloning shares the payload.
#[derive(Clone)]
pub struct Opaque(Rc<dyn OpaqueData>);

impl Opaque {
    pub fn new(data: impl OpaqueData + 'static) -> Self {
        Self(Rc::new(data))
    }

    pub fn from_rc(data: Rc<dyn OpaqueData>) -> Self {
        Self(data)
    }

    pub fn uuid(&self) -> Uuid {
        self.0.uuid()
    }

    pub fn describe(&self) -> String {
        self.0.describe()
    }

    /// Address identity of the shared payload, for GC deduplication.
    pub(crate) fn payload_ptr(&self) -> *const () {
        Rc::as_ptr(&self.0).cast::<()>()
    }

    pub(crate) fn collect_variables(&self, staged: &mut PointerHashSet, out: &mut Vec<VarHandle>) {
        if staged.insert(self.payload_ptr()) {
            self.0.collect_variables(staged, out);
        }
    }
}

impl fmt::Debug for Opaque {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Opaque({} `{}`)", self.uuid(), self.describe())
    }
}
