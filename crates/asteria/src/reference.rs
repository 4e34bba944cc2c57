//! References: l-value paths from a root to a nested location.
//!
//! A reference is a [`Root`] plus a short chain of [`Modifier`] steps. Each
//! of the access operations walks the chain once:
//!
//! | Op | On a missing path |
//! |----|-------------------|
//! | [`Reference::read`] | null through null ancestors; error on wrongly-typed ancestors |
//! | [`Reference::open_with`] | autovivifies: null parents become containers, out-of-range indices pad with nulls |
//! | [`Reference::unset`] | removes the target slot, no-op when absent |
//! | [`Reference::materialize`] | promotes a constant/temporary root to a fresh variable; idempotent |
//! | [`Reference::dereference_copy`] | the read value, aliasing container payloads copy-on-write |

use std::rc::Rc;

use smallvec::SmallVec;

use crate::{
    air::PtcHint,
    exception::{ExecResult, Exception},
    function::ScriptedFunction,
    gc::{GarbageCollector, Generation},
    llds::PointerHashSet,
    source::SourceLocation,
    value::Value,
    variable::VarHandle,
};

/// A pending proper tail call, flowing out of a tail-positioned call node
/// as a reference root. Only the invocation trampoline consumes it; using
/// one as a plain value is an interpreter defect surfaced as an error.
#[derive(Debug)]
pub struct PtcCall {
    pub(crate) target: Rc<ScriptedFunction>,
    pub(crate) self_ref: Option<Reference>,
    pub(crate) args: Vec<Reference>,
    pub(crate) hint: PtcHint,
    pub(crate) site: SourceLocation,
}

/// Where a reference starts.
#[derive(Debug)]
pub enum Root {
    /// Declaration in progress, or a declaration skipped over by control
    /// flow. Every access fails with the bypassed-variable error.
    Uninit { name: Rc<str> },
    /// A function returned no value; reading fails distinctively.
    Void,
    /// An inline immutable value.
    Constant(Value),
    /// A computed rvalue; read-only until materialized.
    Temporary(Value),
    /// A shared variable cell; writable unless the cell is read-only.
    Variable(VarHandle),
    /// A pending proper tail call (see [`PtcCall`]).
    PendingCall(Box<PtcCall>),
}

/// One step of descent into the current value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Modifier {
    /// Subscript with wrap-around for negatives.
    ArrayIndex(i64),
    /// Member access by key.
    ObjectKey(Rc<str>),
    /// First element; opening inserts at the front.
    ArrayHead,
    /// Last element; opening appends.
    ArrayTail,
    /// Probed pseudo-random element, deterministic per seed.
    ArrayRandom(u32),
}

/// A binding or l-value path. Cheap to clone: the root shares storage and
/// the modifier chain is a small-vector (0–3 steps is the common case).
#[derive(Debug)]
pub struct Reference {
    root: Root,
    modifiers: SmallVec<[Modifier; 2]>,
}

impl Clone for Reference {
    fn clone(&self) -> Self {
        let root = match &self.root {
            Root::Uninit { name } => Root::Uninit { name: name.clone() },
            Root::Void => Root::Void,
            Root::Constant(v) => Root::Constant(v.clone()),
            Root::Temporary(v) => Root::Temporary(v.clone()),
            Root::Variable(h) => Root::Variable(h.clone()),
            Root::PendingCall(_) => {
                // Pending calls are consumed by the trampoline before any
                // clone site can see them.
                unreachable!("attempt to clone a pending tail call reference")
            }
        };
        Self {
            root,
            modifiers: self.modifiers.clone(),
        }
    }
}

impl Reference {
    pub fn constant(value: Value) -> Self {
        Self {
            root: Root::Constant(value),
            modifiers: SmallVec::new(),
        }
    }

    pub fn temporary(value: Value) -> Self {
        Self {
            root: Root::Temporary(value),
            modifiers: SmallVec::new(),
        }
    }

    pub fn variable(handle: VarHandle) -> Self {
        Self {
            root: Root::Variable(handle),
            modifiers: SmallVec::new(),
        }
    }

    pub fn void() -> Self {
        Self {
            root: Root::Void,
            modifiers: SmallVec::new(),
        }
    }

    pub fn uninit(name: impl Into<Rc<str>>) -> Self {
        Self {
            root: Root::Uninit { name: name.into() },
            modifiers: SmallVec::new(),
        }
    }

    pub(crate) fn pending_call(call: PtcCall) -> Self {
        Self {
            root: Root::PendingCall(Box::new(call)),
            modifiers: SmallVec::new(),
        }
    }

    pub fn root(&self) -> &Root {
        &self.root
    }

    pub fn modifiers(&self) -> &[Modifier] {
        &self.modifiers
    }

    pub fn is_variable_rooted(&self) -> bool {
        matches!(self.root, Root::Variable(_))
    }

    pub fn is_void(&self) -> bool {
        matches!(self.root, Root::Void) && self.modifiers.is_empty()
    }

    pub(crate) fn is_pending_call(&self) -> bool {
        matches!(self.root, Root::PendingCall(_))
    }

    pub(crate) fn into_pending_call(self) -> Option<Box<PtcCall>> {
        match self.root {
            Root::PendingCall(call) => Some(call),
            _ => None,
        }
    }

    /// Appends one step of descent.
    pub fn push_modifier(&mut self, modifier: Modifier) {
        self.modifiers.push(modifier);
    }

    /// Drops the last step, returning it. Used by call nodes to derive the
    /// `this` reference from a member-access callee.
    pub fn pop_modifier(&mut self) -> Option<Modifier> {
        self.modifiers.pop()
    }

    fn bypassed_error(name: &str) -> Exception {
        Exception::runtime(format!("bypassed variable or reference `{name}`"))
    }

    fn void_error() -> Exception {
        Exception::runtime("attempt to use the result of a function call which returned no value")
    }

    /// Resolves the path and copies the value out.
    ///
    /// A null ancestor anywhere along the chain yields null; a wrongly
    /// typed ancestor is an error.
    pub fn read(&self) -> ExecResult<Value> {
        match &self.root {
            Root::Uninit { name } => Err(Self::bypassed_error(name)),
            Root::Void => Err(Self::void_error()),
            Root::Constant(v) | Root::Temporary(v) => read_through(v, &self.modifiers),
            Root::Variable(h) => read_through(&h.get_value(), &self.modifiers),
            Root::PendingCall(_) => Err(Exception::runtime("pending tail call used as a plain value")),
        }
    }

    /// Identical to [`read`](Self::read); spelled out where the copy (with
    /// copy-on-write payload aliasing) is the point.
    pub fn dereference_copy(&self) -> ExecResult<Value> {
        self.read()
    }

    /// Resolves the path for writing, autovivifying missing structure, and
    /// applies `with` to the target slot.
    pub fn open_with<R>(&self, with: impl FnOnce(&mut Value) -> ExecResult<R>) -> ExecResult<R> {
        match &self.root {
            Root::Uninit { name } => Err(Self::bypassed_error(name)),
            Root::Void => Err(Self::void_error()),
            Root::Constant(_) => Err(Exception::runtime("attempt to modify a constant value")),
            Root::Temporary(_) => Err(Exception::runtime("attempt to modify a temporary value")),
            Root::Variable(h) => {
                if h.is_readonly() {
                    return Err(Exception::runtime("attempt to modify a read-only variable"));
                }
                h.with_value_mut(|value| open_through(value, &self.modifiers, with))
            }
            Root::PendingCall(_) => Err(Exception::runtime("pending tail call used as a plain value")),
        }
    }

    /// Writes `value` into the target slot, creating the path as needed.
    pub fn write(&self, value: Value) -> ExecResult<()> {
        self.open_with(move |slot| {
            *slot = value;
            Ok(())
        })
    }

    /// Removes the target slot, returning the removed value (null when the
    /// path was absent). Ancestors are never created.
    pub fn unset(&self) -> ExecResult<Value> {
        let Some((last, ancestors)) = self.modifiers.split_last() else {
            return Err(Exception::runtime(
                "only elements of arrays and members of objects may be unset",
            ));
        };
        match &self.root {
            Root::Uninit { name } => Err(Self::bypassed_error(name)),
            Root::Void => Err(Self::void_error()),
            Root::Constant(_) => Err(Exception::runtime("attempt to modify a constant value")),
            Root::Temporary(_) => Err(Exception::runtime("attempt to modify a temporary value")),
            Root::Variable(h) => {
                if h.is_readonly() {
                    return Err(Exception::runtime("attempt to modify a read-only variable"));
                }
                h.with_value_mut(|value| unset_through(value, ancestors, last))
            }
            Root::PendingCall(_) => Err(Exception::runtime("pending tail call used as a plain value")),
        }
    }

    /// Promotes a constant or temporary root to a fresh variable holding
    /// the root value, leaving the modifier chain in place. No-op on
    /// variable roots, so the operation is idempotent. A constant root
    /// stays immutable: the fresh variable is marked read-only.
    pub fn materialize(&mut self, gc: &GarbageCollector) -> ExecResult<()> {
        match &self.root {
            Root::Variable(_) => Ok(()),
            Root::Uninit { name } => Err(Self::bypassed_error(name)),
            Root::Void => Err(Self::void_error()),
            Root::Constant(v) => {
                let cell = gc.create_variable(Generation::Newest);
                cell.initialize(v.clone());
                cell.mark_readonly();
                self.root = Root::Variable(cell);
                Ok(())
            }
            Root::Temporary(v) => {
                let cell = gc.create_variable(Generation::Newest);
                cell.initialize(v.clone());
                self.root = Root::Variable(cell);
                Ok(())
            }
            Root::PendingCall(_) => Err(Exception::runtime("pending tail call used as a plain value")),
        }
    }

    /// Pushes every variable handle this reference pins into `out`: the
    /// root cell itself, any cells reachable through an embedded constant
    /// or temporary value, and everything pinned by a pending call's
    /// captured arguments.
    pub(crate) fn collect_variables(&self, staged: &mut PointerHashSet, out: &mut Vec<VarHandle>) {
        match &self.root {
            Root::Uninit { .. } | Root::Void => {}
            Root::Constant(v) | Root::Temporary(v) => v.collect_variables(staged, out),
            Root::Variable(h) => out.push(h.clone()),
            Root::PendingCall(call) => {
                if staged.insert(Rc::as_ptr(&call.target).cast()) {
                    call.target.scope().collect_variables(staged, out);
                }
                if let Some(self_ref) = &call.self_ref {
                    self_ref.collect_variables(staged, out);
                }
                for arg in &call.args {
                    arg.collect_variables(staged, out);
                }
            }
        }
    }
}

fn read_through(parent: &Value, modifiers: &[Modifier]) -> ExecResult<Value> {
    let mut current = parent;
    for modifier in modifiers {
        match modifier.apply_read(current)? {
            Some(next) => current = next,
            None => return Ok(Value::Null),
        }
    }
    Ok(current.clone())
}

fn open_through<R>(
    parent: &mut Value,
    modifiers: &[Modifier],
    with: impl FnOnce(&mut Value) -> ExecResult<R>,
) -> ExecResult<R> {
    match modifiers.split_first() {
        None => with(parent),
        Some((first, rest)) => open_through(first.apply_open(parent)?, rest, with),
    }
}

fn unset_through(parent: &mut Value, ancestors: &[Modifier], last: &Modifier) -> ExecResult<Value> {
    let mut current = parent;
    for modifier in ancestors {
        match modifier.apply_write(current)? {
            Some(next) => current = next,
            None => return Ok(Value::Null),
        }
    }
    last.apply_unset(current)
}

/// Result of wrapping a subscript against an array length: the effective
/// slot, plus how many null elements an `open` has to create before or
/// after the existing ones.
struct WrappedIndex {
    rindex: usize,
    nprepend: usize,
    nappend: usize,
}

fn wrap_index(index: i64, len: usize) -> WrappedIndex {
    let mut wrapped = index;
    if wrapped < 0 {
        wrapped += len as i64;
    }
    if wrapped < 0 {
        WrappedIndex {
            rindex: 0,
            nprepend: wrapped.unsigned_abs() as usize,
            nappend: 0,
        }
    } else if (wrapped as u64) >= len as u64 {
        WrappedIndex {
            rindex: wrapped as usize,
            nprepend: 0,
            nappend: (wrapped as u64 - len as u64 + 1) as usize,
        }
    } else {
        WrappedIndex {
            rindex: wrapped as usize,
            nprepend: 0,
            nappend: 0,
        }
    }
}

/// Probes the random-subscript slot: a fixed-point multiply hash of the
/// seed, scaled by the length. Deterministic per seed, uniform over the
/// array, stable across platforms.
fn random_slot(seed: u32, len: usize) -> usize {
    let hash = u64::from(seed.wrapping_mul(0x9E37_79B9));
    ((hash * len as u64) >> 32) as usize
}

impl Modifier {
    fn apply_read<'v>(&self, parent: &'v Value) -> ExecResult<Option<&'v Value>> {
        match self {
            Self::ArrayIndex(index) => {
                if parent.is_null() {
                    return Ok(None);
                }
                let Ok(arr) = parent.as_array() else {
                    return Err(Exception::runtime(format!(
                        "integer subscript not applicable (parent type was `{}`; index was `{index}`)",
                        parent.type_of()
                    )));
                };
                let w = wrap_index(*index, arr.len());
                if w.nprepend != 0 || w.nappend != 0 {
                    return Ok(None);
                }
                Ok(Some(&arr[w.rindex]))
            }
            Self::ObjectKey(key) => {
                if parent.is_null() {
                    return Ok(None);
                }
                let Ok(obj) = parent.as_object() else {
                    return Err(Exception::runtime(format!(
                        "string subscript not applicable (parent type was `{}`; key was `{key}`)",
                        parent.type_of()
                    )));
                };
                Ok(obj.get(&**key))
            }
            Self::ArrayHead => {
                if parent.is_null() {
                    return Ok(None);
                }
                let arr = head_tail_array(parent, "head")?;
                Ok(arr.first())
            }
            Self::ArrayTail => {
                if parent.is_null() {
                    return Ok(None);
                }
                let arr = head_tail_array(parent, "tail")?;
                Ok(arr.last())
            }
            Self::ArrayRandom(seed) => {
                if parent.is_null() {
                    return Ok(None);
                }
                let arr = head_tail_array(parent, "random")?;
                if arr.is_empty() {
                    return Ok(None);
                }
                Ok(Some(&arr[random_slot(*seed, arr.len())]))
            }
        }
    }

    // Write access without creation; `None` when the path is absent.
    fn apply_write<'v>(&self, parent: &'v mut Value) -> ExecResult<Option<&'v mut Value>> {
        match self {
            Self::ArrayIndex(index) => {
                if parent.is_null() {
                    return Ok(None);
                }
                let index = *index;
                let len = parent.as_array()?.len();
                let w = wrap_index(index, len);
                if w.nprepend != 0 || w.nappend != 0 {
                    return Ok(None);
                }
                Ok(Some(&mut parent.mut_array()?[w.rindex]))
            }
            Self::ObjectKey(key) => {
                if parent.is_null() {
                    return Ok(None);
                }
                if !parent.as_object()?.contains_key(&**key) {
                    return Ok(None);
                }
                Ok(parent.mut_object()?.get_mut(&**key))
            }
            Self::ArrayHead => {
                if parent.is_null() || parent.as_array()?.is_empty() {
                    return Ok(None);
                }
                Ok(parent.mut_array()?.first_mut())
            }
            Self::ArrayTail => {
                if parent.is_null() || parent.as_array()?.is_empty() {
                    return Ok(None);
                }
                Ok(parent.mut_array()?.last_mut())
            }
            Self::ArrayRandom(seed) => {
                if parent.is_null() {
                    return Ok(None);
                }
                let len = parent.as_array()?.len();
                if len == 0 {
                    return Ok(None);
                }
                let slot = random_slot(*seed, len);
                Ok(Some(&mut parent.mut_array()?[slot]))
            }
        }
    }

    // Write access with autovivification: null parents become containers,
    // out-of-range indices pad with nulls, head/tail grow the array.
    fn apply_open<'v>(&self, parent: &'v mut Value) -> ExecResult<&'v mut Value> {
        match self {
            Self::ArrayIndex(index) => {
                let index = *index;
                if parent.is_null() {
                    *parent = Value::from(Vec::new());
                }
                if !matches!(parent, Value::Array(_)) {
                    return Err(Exception::runtime(format!(
                        "integer subscript not applicable (parent type was `{}`; index was `{index}`)",
                        parent.type_of()
                    )));
                }
                let arr = parent.mut_array()?;
                let w = wrap_index(index, arr.len());
                if w.nprepend != 0 {
                    arr.splice(0..0, std::iter::repeat_n(Value::Null, w.nprepend));
                } else if w.nappend != 0 {
                    arr.extend(std::iter::repeat_n(Value::Null, w.nappend));
                }
                Ok(&mut arr[w.rindex])
            }
            Self::ObjectKey(key) => {
                if parent.is_null() {
                    *parent = Value::Object(Rc::new(crate::value::ObjectMap::default()));
                }
                if !matches!(parent, Value::Object(_)) {
                    return Err(Exception::runtime(format!(
                        "string subscript not applicable (parent type was `{}`; key was `{key}`)",
                        parent.type_of()
                    )));
                }
                let obj = parent.mut_object()?;
                Ok(obj.entry(key.clone()).or_insert(Value::Null))
            }
            Self::ArrayHead => {
                if parent.is_null() {
                    *parent = Value::from(Vec::new());
                }
                let arr = open_array(parent, "head")?;
                arr.insert(0, Value::Null);
                Ok(&mut arr[0])
            }
            Self::ArrayTail => {
                if parent.is_null() {
                    *parent = Value::from(Vec::new());
                }
                let arr = open_array(parent, "tail")?;
                arr.push(Value::Null);
                Ok(arr.last_mut().expect("array just grew"))
            }
            Self::ArrayRandom(seed) => {
                if parent.is_null() {
                    *parent = Value::from(Vec::new());
                }
                let arr = open_array(parent, "random")?;
                if arr.is_empty() {
                    return Err(Exception::runtime("cannot write to a random element of an empty array"));
                }
                let slot = random_slot(*seed, arr.len());
                Ok(&mut arr[slot])
            }
        }
    }

    fn apply_unset(&self, parent: &mut Value) -> ExecResult<Value> {
        match self {
            Self::ArrayIndex(index) => {
                if parent.is_null() {
                    return Ok(Value::Null);
                }
                let index = *index;
                let len = parent.as_array()?.len();
                let w = wrap_index(index, len);
                if w.nprepend != 0 || w.nappend != 0 {
                    return Ok(Value::Null);
                }
                Ok(parent.mut_array()?.remove(w.rindex))
            }
            Self::ObjectKey(key) => {
                if parent.is_null() {
                    return Ok(Value::Null);
                }
                // Shift-removal keeps insertion order among the survivors.
                Ok(parent
                    .mut_object()?
                    .shift_remove(&**key)
                    .unwrap_or(Value::Null))
            }
            Self::ArrayHead => {
                if parent.is_null() || parent.as_array()?.is_empty() {
                    return Ok(Value::Null);
                }
                Ok(parent.mut_array()?.remove(0))
            }
            Self::ArrayTail => {
                if parent.is_null() || parent.as_array()?.is_empty() {
                    return Ok(Value::Null);
                }
                Ok(parent.mut_array()?.pop().expect("array is non-empty"))
            }
            Self::ArrayRandom(seed) => {
                if parent.is_null() {
                    return Ok(Value::Null);
                }
                let len = parent.as_array()?.len();
                if len == 0 {
                    return Ok(Value::Null);
                }
                let slot = random_slot(*seed, len);
                Ok(parent.mut_array()?.remove(slot))
            }
        }
    }
}

fn head_tail_array<'v>(parent: &'v Value, op: &str) -> ExecResult<&'v Vec<Value>> {
    parent.as_array().map_err(|_| {
        Exception::runtime(format!(
            "{op} operator not applicable (parent type was `{}`)",
            parent.type_of()
        ))
    })
}

fn open_array<'v>(parent: &'v mut Value, op: &str) -> ExecResult<&'v mut Vec<Value>> {
    let type_name = parent.type_of();
    parent
        .mut_array()
        .map_err(|_| Exception::runtime(format!("{op} operator not applicable (parent type was `{type_name}`)")))
}
