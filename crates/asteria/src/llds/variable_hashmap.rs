use super::hash_pointer;
use crate::variable::{VarHandle, Variable};

/// A map from variable identity (heap address) to a strong variable handle.
///
/// This is the collector's workhorse: tracked sets, the candidate staging
/// set, the liveness-visited set and the unreachable set are all instances
/// of this container. Keying by address is what makes deduplication free —
/// the key is recomputed from the stored handle, so buckets carry nothing
/// but the handle itself.
///
/// Erasure relocates displaced entries backward along their probe chains
/// instead of leaving tombstones, and the load factor stays at or below one
/// half, so lookups and the collector's extract loops stay O(1) amortized.
#[derive(Debug, Default)]
pub struct VariableHashMap {
    buckets: Vec<Option<VarHandle>>,
    size: usize,
}

impl VariableHashMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    fn key_of(handle: &VarHandle) -> *const () {
        std::rc::Rc::as_ptr(handle).cast()
    }

    fn home(&self, key: *const ()) -> usize {
        (hash_pointer(key) as usize) & (self.buckets.len() - 1)
    }

    /// Inserts `handle`, returning whether the variable was new to the map.
    pub fn insert(&mut self, handle: &VarHandle) -> bool {
        self.reserve_one();
        let key = Self::key_of(handle);
        let mask = self.buckets.len() - 1;
        let mut at = self.home(key);
        loop {
            match &self.buckets[at] {
                None => {
                    self.buckets[at] = Some(handle.clone());
                    self.size += 1;
                    return true;
                }
                Some(present) if std::ptr::eq(Self::key_of(present), key) => return false,
                Some(_) => at = (at + 1) & mask,
            }
        }
    }

    pub fn contains(&self, variable: &Variable) -> bool {
        self.find_bucket(std::ptr::from_ref(variable).cast()).is_some()
    }

    pub fn contains_handle(&self, handle: &VarHandle) -> bool {
        self.find_bucket(Self::key_of(handle)).is_some()
    }

    fn find_bucket(&self, key: *const ()) -> Option<usize> {
        if self.buckets.is_empty() {
            return None;
        }
        let mask = self.buckets.len() - 1;
        let mut at = self.home(key);
        loop {
            match &self.buckets[at] {
                None => return None,
                Some(present) if std::ptr::eq(Self::key_of(present), key) => return Some(at),
                Some(_) => at = (at + 1) & mask,
            }
        }
    }

    /// Removes the variable with this identity, returning its handle.
    pub fn erase(&mut self, variable: &Variable) -> Option<VarHandle> {
        let at = self.find_bucket(std::ptr::from_ref(variable).cast())?;
        let handle = self.buckets[at].take();
        self.size -= 1;
        self.relocate_after(at);
        handle
    }

    /// Removes and returns an arbitrary entry; the collector drains sets
    /// with this.
    pub fn extract_any(&mut self) -> Option<VarHandle> {
        if self.size == 0 {
            return None;
        }
        let at = self
            .buckets
            .iter()
            .position(Option::is_some)
            .expect("size positive but no occupied bucket");
        let handle = self.buckets[at].take();
        self.size -= 1;
        self.relocate_after(at);
        handle
    }

    /// Visits every entry. The map must not be mutated during the scan.
    pub fn for_each(&self, mut visit: impl FnMut(&VarHandle)) {
        for bucket in self.buckets.iter().flatten() {
            visit(bucket);
        }
    }

    /// Drops every entry but keeps the bucket storage for reuse.
    pub fn clear(&mut self) {
        for bucket in &mut self.buckets {
            *bucket = None;
        }
        self.size = 0;
    }

    // Backward relocation: walk the chain after the freshly emptied bucket
    // and slide back any entry whose home position permits it, so a later
    // probe never stops early at the hole.
    fn relocate_after(&mut self, hole: usize) {
        let mask = self.buckets.len() - 1;
        let mut hole = hole;
        let mut at = (hole + 1) & mask;
        while let Some(present) = &self.buckets[at] {
            let home = self.home(Self::key_of(present));
            // `present` may move into the hole only if its home position
            // does not lie strictly between the hole and its current slot.
            let distance_home = at.wrapping_sub(home) & mask;
            let distance_hole = at.wrapping_sub(hole) & mask;
            if distance_home >= distance_hole {
                self.buckets[hole] = self.buckets[at].take();
                hole = at;
            }
            at = (at + 1) & mask;
        }
    }

    fn reserve_one(&mut self) {
        if self.buckets.is_empty() {
            self.buckets = (0..16).map(|_| None).collect();
            return;
        }
        if (self.size + 1) * 2 <= self.buckets.len() {
            return;
        }
        let new_len = self.buckets.len() * 2;
        let old = std::mem::replace(
            &mut self.buckets,
            (0..new_len).map(|_| None).collect(),
        );
        let mask = self.buckets.len() - 1;
        for handle in old.into_iter().flatten() {
            let mut at = (hash_pointer(Self::key_of(&handle)) as usize) & mask;
            while self.buckets[at].is_some() {
                at = (at + 1) & mask;
            }
            self.buckets[at] = Some(handle);
        }
    }
}
