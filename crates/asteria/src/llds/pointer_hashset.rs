use super::hash_pointer;

/// An address-identity set with no payload.
///
/// The collector uses this to remember which copy-on-write payloads and
/// capture contexts it has already walked, so shared storage contributes
/// each of its handle slots exactly once per traversal. Keys are bare
/// addresses; the set never dereferences them.
#[derive(Debug, Default)]
pub struct PointerHashSet {
    buckets: Vec<*const ()>,
    size: usize,
}

const EMPTY: *const () = std::ptr::null();

impl PointerHashSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Inserts `key`, returning whether it was new.
    pub fn insert(&mut self, key: *const ()) -> bool {
        debug_assert!(!key.is_null());
        self.reserve_one();
        let mask = self.buckets.len() - 1;
        let mut at = (hash_pointer(key) as usize) & mask;
        loop {
            let slot = self.buckets[at];
            if slot == EMPTY {
                self.buckets[at] = key;
                self.size += 1;
                return true;
            }
            if std::ptr::eq(slot, key) {
                return false;
            }
            at = (at + 1) & mask;
        }
    }

    pub fn contains(&self, key: *const ()) -> bool {
        if self.buckets.is_empty() {
            return false;
        }
        let mask = self.buckets.len() - 1;
        let mut at = (hash_pointer(key) as usize) & mask;
        loop {
            let slot = self.buckets[at];
            if slot == EMPTY {
                return false;
            }
            if std::ptr::eq(slot, key) {
                return true;
            }
            at = (at + 1) & mask;
        }
    }

    /// Forgets every key but keeps the bucket storage for reuse.
    pub fn clear(&mut self) {
        self.buckets.fill(EMPTY);
        self.size = 0;
    }

    // Keeps the load factor at or below one half so probing always ends.
    fn reserve_one(&mut self) {
        if self.buckets.is_empty() {
            self.buckets = vec![EMPTY; 16];
            return;
        }
        if (self.size + 1) * 2 <= self.buckets.len() {
            return;
        }
        let new_len = self.buckets.len() * 2;
        let old = std::mem::replace(&mut self.buckets, vec![EMPTY; new_len]);
        let mask = self.buckets.len() - 1;
        for key in old {
            if key == EMPTY {
                continue;
            }
            let mut at = (hash_pointer(key) as usize) & mask;
            while self.buckets[at] != EMPTY {
                at = (at + 1) & mask;
            }
            self.buckets[at] = key;
        }
    }
}
