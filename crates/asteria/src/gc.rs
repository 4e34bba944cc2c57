//! The generational, cycle-resolving garbage collector.
//!
//! Every variable cell is reference-counted (`Rc`), which reclaims acyclic
//! garbage by itself — except that each cell is also held by its
//! generation's tracked set, so in practice cells die at collection time.
//! What refcounting alone cannot do is reclaim cycles (a closure capturing
//! the cell its own function value is stored in), and that is the
//! collector's job.
//!
//! The algorithm is trial deletion over the tracked sets, with no
//! stop-the-world machinery and no color protocol:
//!
//! 1. **Stage** the candidates (tracked sets of the collected generations)
//!    and tally, per candidate, how many handle slots inside candidate
//!    payloads point at it. Shared copy-on-write payloads and shared
//!    capture scopes are walked once (pointer-staged), so each slot counts
//!    exactly once.
//! 2. **Reconcile**: a candidate whose strong count exceeds its two
//!    bookkeeping handles plus the tally has an owner outside the pool —
//!    an evaluation stack, a host handle, an older generation's payload —
//!    and seeds the live set.
//! 3. **Root scan** the global scope and every active frame chain, marking
//!    everything they reach. This rescues cells whose only handles sit in
//!    scope dictionaries that step 1 counted as internal (a capture scope
//!    chains up to the global scope, so global bindings are reachable from
//!    candidate values).
//! 4. **Propagate** liveness through values and capture scopes.
//! 5. **Sweep**: unmarked candidates move to the unreachable set and their
//!    values are cleared, breaking the cycle's edges; the cascading handle
//!    drops deallocate the whole cycle when the set is released. Survivors
//!    are promoted one generation (the oldest is sticky).

use std::{cell::RefCell, rc::Rc};

use crate::{
    context::Scope,
    llds::{PointerHashSet, VariableHashMap},
    variable::{VarHandle, Variable},
};

/// How many generations the collector maintains.
pub const GENERATION_COUNT: usize = 3;

/// Default collection thresholds, newest to oldest.
pub const DEFAULT_THRESHOLDS: [usize; GENERATION_COUNT] = [10, 70, 500];

/// A collector generation. New variables enter `Newest` unless hinted
/// otherwise; survivors are promoted towards `Oldest`, which is sticky.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Generation {
    Newest = 0,
    Middle = 1,
    Oldest = 2,
}

impl Generation {
    fn from_index(index: usize) -> Self {
        match index {
            0 => Self::Newest,
            1 => Self::Middle,
            _ => Self::Oldest,
        }
    }
}

#[derive(Default)]
struct GcState {
    thresholds: [usize; GENERATION_COUNT],
    counters: [usize; GENERATION_COUNT],
    tracked: [VariableHashMap; GENERATION_COUNT],
    /// Highest generation whose threshold crossing is awaiting collection.
    pending: Option<usize>,
    // Collection scratch, kept allocated between runs.
    staged: PointerHashSet,
    candidates: VariableHashMap,
    visited: VariableHashMap,
    unreach: VariableHashMap,
    edges: Vec<VarHandle>,
}

/// The collector. Owned by the global context; all interior mutability so
/// allocation sites need only a shared borrow.
pub struct GarbageCollector {
    state: RefCell<GcState>,
    collecting: std::cell::Cell<bool>,
}

impl GarbageCollector {
    pub fn new() -> Self {
        let mut state = GcState::default();
        state.thresholds = DEFAULT_THRESHOLDS;
        Self {
            state: RefCell::new(state),
            collecting: std::cell::Cell::new(false),
        }
    }

    /// Allocates a zeroed variable, registers it in the hinted generation's
    /// tracked set, and schedules a collection when the generation's
    /// allocation counter crosses its threshold. The collection itself runs
    /// later, from a statement boundary — never re-entrantly from here.
    pub fn create_variable(&self, hint: Generation) -> VarHandle {
        let cell: VarHandle = Rc::new(Variable::new());
        let mut state = self.state.borrow_mut();
        let generation = hint as usize;
        state.tracked[generation].insert(&cell);
        state.counters[generation] += 1;
        if state.counters[generation] >= state.thresholds[generation] && !self.collecting.get() {
            state.pending = Some(state.pending.map_or(generation, |p| p.max(generation)));
        }
        cell
    }

    /// Takes the scheduled collection limit, if a threshold was crossed.
    pub(crate) fn take_pending(&self) -> Option<Generation> {
        self.state.borrow_mut().pending.take().map(Generation::from_index)
    }

    /// Collects the given generation and all younger ones, treating the
    /// passed scopes (the global scope plus every active frame) as roots.
    /// Returns the number of variables reclaimed.
    pub(crate) fn collect_with_roots(&self, limit: Generation, roots: &[Rc<Scope>]) -> usize {
        if self.collecting.replace(true) {
            // A collection is already running further up the stack.
            return 0;
        }
        let reclaimed = self.state.borrow_mut().collect(limit as usize, roots);
        self.collecting.set(false);
        reclaimed
    }

    /// Clears every generation and sweeps everything. Called once at
    /// interpreter shutdown; afterwards the collector is empty but usable.
    pub fn finalize(&self) -> usize {
        let mut state = self.state.borrow_mut();
        let mut reclaimed = 0;
        for generation in 0..GENERATION_COUNT {
            while let Some(cell) = state.tracked[generation].extract_any() {
                state.unreach.insert(&cell);
            }
            state.counters[generation] = 0;
        }
        state.unreach.for_each(|cell| cell.uninitialize());
        reclaimed += state.unreach.size();
        state.unreach.clear();
        state.pending = None;
        reclaimed
    }

    pub fn count_tracked_variables(&self, generation: Generation) -> usize {
        self.state.borrow().tracked[generation as usize].size()
    }

    /// Total live variables across all generations.
    pub fn count_pooled_variables(&self) -> usize {
        let state = self.state.borrow();
        state.tracked.iter().map(VariableHashMap::size).sum()
    }

    pub fn get_threshold(&self, generation: Generation) -> usize {
        self.state.borrow().thresholds[generation as usize]
    }

    pub fn set_threshold(&self, generation: Generation, threshold: usize) {
        self.state.borrow_mut().thresholds[generation as usize] = threshold.max(1);
    }
}

impl Default for GarbageCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for GarbageCollector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.borrow();
        f.debug_struct("GarbageCollector")
            .field("counters", &state.counters)
            .field("thresholds", &state.thresholds)
            .field(
                "tracked",
                &[
                    state.tracked[0].size(),
                    state.tracked[1].size(),
                    state.tracked[2].size(),
                ],
            )
            .finish_non_exhaustive()
    }
}

impl GcState {
    fn collect(&mut self, limit: usize, roots: &[Rc<Scope>]) -> usize {
        self.staged.clear();
        self.candidates.clear();
        self.visited.clear();
        self.unreach.clear();
        let mut edges = std::mem::take(&mut self.edges);
        let mut worklist: Vec<VarHandle> = Vec::new();

        // Stage: the candidate universe is the union of the collected
        // generations' tracked sets. Scratch fields are reset here; they
        // are meaningless between collections.
        for generation in 0..=limit {
            let (tracked, candidates) = (&self.tracked[generation], &mut self.candidates);
            tracked.for_each(|cell| {
                cell.gc_reset();
                candidates.insert(cell);
            });
        }

        // Tally internal references: every handle slot reachable from a
        // candidate's value bumps its target's tally once.
        {
            let (candidates, staged) = (&self.candidates, &mut self.staged);
            candidates.for_each(|cell| {
                cell.get_value().collect_variables(staged, &mut edges);
            });
        }
        for target in edges.drain(..) {
            target.gc_bump_ref();
        }

        // Reconcile refcounts: two handles per candidate are bookkeeping
        // (its tracked set and the candidate set); anything beyond those
        // plus the tally is an owner outside the pool.
        {
            let candidates = &self.candidates;
            candidates.for_each(|cell| {
                if Rc::strong_count(cell) > 2 + cell.gc_ref() as usize {
                    worklist.push(cell.clone());
                }
            });
        }
        for cell in &worklist {
            cell.gc_mark();
            self.visited.insert(cell);
        }

        // Root scan: contexts reachable from candidate values were counted
        // as internal above, so every variable a live scope chain names
        // must be re-seeded from outside.
        self.staged.clear();
        for scope in roots {
            scope.collect_variables(&mut self.staged, &mut edges);
        }
        for target in edges.drain(..) {
            if self.visited.insert(&target) {
                target.gc_mark();
                worklist.push(target);
            }
        }

        // Propagate liveness through values and capture scopes. The walk
        // descends through non-candidates too: an old-generation cell can
        // be the only path keeping a young one alive.
        while let Some(cell) = worklist.pop() {
            cell.get_value().collect_variables(&mut self.staged, &mut edges);
            for target in edges.drain(..) {
                if self.visited.insert(&target) {
                    target.gc_mark();
                    worklist.push(target);
                }
            }
        }

        // Sweep, oldest collected generation first so promoted survivors
        // are not re-examined in the same pass.
        let mut stash: Vec<VarHandle> = Vec::new();
        for generation in (0..=limit).rev() {
            stash.clear();
            while let Some(cell) = self.tracked[generation].extract_any() {
                stash.push(cell);
            }
            for cell in stash.drain(..) {
                if cell.gc_marked() {
                    let target = (generation + 1).min(GENERATION_COUNT - 1);
                    self.tracked[target].insert(&cell);
                    if target != generation {
                        self.counters[target] += 1;
                        if self.counters[target] >= self.thresholds[target] && target > limit {
                            self.pending = Some(self.pending.map_or(target, |p| p.max(target)));
                        }
                    }
                } else {
                    self.unreach.insert(&cell);
                }
            }
            self.counters[generation] = 0;
        }

        // Break the unreachable cells' outgoing edges; the cascading
        // handle drops free the cycle once the set releases its handles.
        self.unreach.for_each(|cell| cell.uninitialize());
        let reclaimed = self.unreach.size();
        self.unreach.clear();

        // Scratch hygiene: these hold strong handles and must not survive
        // into the next reconcile phase's strong counts.
        self.candidates.clear();
        self.visited.clear();
        self.staged.clear();
        self.edges = edges;
        reclaimed
    }
}
