use std::rc::Rc;

use crate::reference::Reference;

/// Sentinel for "no bucket" in the intrusive list links.
const NIL: u32 = u32::MAX;

#[derive(Debug)]
struct Bucket {
    name: Rc<str>,
    /// Cached 32-bit hash of `name`; probing and relocation never rehash.
    hash: u32,
    value: Reference,
    /// Intrusive circular list threading occupied buckets in insertion
    /// order.
    prev: u32,
    next: u32,
}

/// The name → reference map inside every scope.
///
/// Open-addressed with linear probing at a load factor of at most one half;
/// each bucket caches a 32-bit hash so probing compares integers before
/// strings. Occupied buckets are threaded on a circular doubly-linked list
/// so iteration touches only live entries, in insertion order. Erasure
/// relocates displaced entries backward (no tombstones) and re-threads the
/// list links of every bucket it moves, so iteration order survives
/// deletions.
#[derive(Debug, Default)]
pub struct ReferenceDictionary {
    buckets: Vec<Option<Bucket>>,
    head: u32,
    size: usize,
}

fn hash_name(name: &str) -> u32 {
    // Fixed seeds keep hashes stable across runs; the dictionary is not
    // exposed to untrusted key floods.
    ahash::RandomState::with_seeds(0x6A09_E667, 0xBB67_AE85, 0x3C6E_F372, 0xA54F_F53A).hash_one(name) as u32
}

impl ReferenceDictionary {
    pub fn new() -> Self {
        Self {
            buckets: Vec::new(),
            head: NIL,
            size: 0,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    fn mask(&self) -> usize {
        self.buckets.len() - 1
    }

    fn find_slot(&self, name: &str, hash: u32) -> Option<usize> {
        if self.buckets.is_empty() {
            return None;
        }
        let mask = self.mask();
        let mut at = hash as usize & mask;
        loop {
            match &self.buckets[at] {
                None => return None,
                Some(b) if b.hash == hash && *b.name == *name => return Some(at),
                Some(_) => at = (at + 1) & mask,
            }
        }
    }

    pub fn find(&self, name: &str) -> Option<&Reference> {
        let at = self.find_slot(name, hash_name(name))?;
        Some(&self.buckets[at].as_ref().expect("probed occupied bucket").value)
    }

    pub fn find_mut(&mut self, name: &str) -> Option<&mut Reference> {
        let at = self.find_slot(name, hash_name(name))?;
        Some(&mut self.buckets[at].as_mut().expect("probed occupied bucket").value)
    }

    /// Inserts or replaces the binding for `name`, returning whether the
    /// name was new.
    pub fn insert(&mut self, name: impl Into<Rc<str>>, value: Reference) -> bool {
        let name = name.into();
        let hash = hash_name(&name);
        if let Some(at) = self.find_slot(&name, hash) {
            self.buckets[at].as_mut().expect("probed occupied bucket").value = value;
            return false;
        }
        self.reserve_one();
        let mask = self.mask();
        let mut at = hash as usize & mask;
        while self.buckets[at].is_some() {
            at = (at + 1) & mask;
        }
        self.buckets[at] = Some(Bucket {
            name,
            hash,
            value,
            prev: NIL,
            next: NIL,
        });
        self.attach_tail(at as u32);
        self.size += 1;
        true
    }

    /// Removes the binding for `name`, returning the old reference.
    pub fn erase(&mut self, name: &str) -> Option<Reference> {
        let at = self.find_slot(name, hash_name(name))?;
        self.detach(at as u32);
        let bucket = self.buckets[at].take().expect("probed occupied bucket");
        self.size -= 1;
        self.relocate_after(at);
        Some(bucket.value)
    }

    /// Visits every binding in insertion order.
    pub fn for_each(&self, mut visit: impl FnMut(&str, &Reference)) {
        if self.head == NIL {
            return;
        }
        let mut at = self.head;
        loop {
            let bucket = self.buckets[at as usize].as_ref().expect("threaded bucket occupied");
            visit(&bucket.name, &bucket.value);
            at = bucket.next;
            if at == self.head {
                return;
            }
        }
    }

    /// Collects the names in insertion order.
    pub fn names(&self) -> Vec<Rc<str>> {
        let mut names = Vec::with_capacity(self.size);
        if self.head == NIL {
            return names;
        }
        let mut at = self.head;
        loop {
            let bucket = self.buckets[at as usize].as_ref().expect("threaded bucket occupied");
            names.push(bucket.name.clone());
            at = bucket.next;
            if at == self.head {
                return names;
            }
        }
    }

    pub fn clear(&mut self) {
        for bucket in &mut self.buckets {
            *bucket = None;
        }
        self.head = NIL;
        self.size = 0;
    }

    // Links `at` before the head, i.e. at the tail of the circular order.
    fn attach_tail(&mut self, at: u32) {
        if self.head == NIL {
            let b = self.buckets[at as usize].as_mut().expect("fresh bucket");
            b.prev = at;
            b.next = at;
            self.head = at;
            return;
        }
        let head = self.head;
        let tail = self.buckets[head as usize].as_ref().expect("head occupied").prev;
        {
            let b = self.buckets[at as usize].as_mut().expect("fresh bucket");
            b.prev = tail;
            b.next = head;
        }
        self.buckets[tail as usize].as_mut().expect("tail occupied").next = at;
        self.buckets[head as usize].as_mut().expect("head occupied").prev = at;
    }

    fn detach(&mut self, at: u32) {
        let (prev, next) = {
            let b = self.buckets[at as usize].as_ref().expect("detaching occupied bucket");
            (b.prev, b.next)
        };
        if prev == at {
            self.head = NIL;
            return;
        }
        self.buckets[prev as usize].as_mut().expect("prev occupied").next = next;
        self.buckets[next as usize].as_mut().expect("next occupied").prev = prev;
        if self.head == at {
            self.head = next;
        }
    }

    // Re-threads the list after a bucket moved from `from` to `to` during
    // relocation, preserving iteration order.
    fn rethread(&mut self, from: u32, to: u32) {
        let (prev, next) = {
            let b = self.buckets[to as usize].as_ref().expect("moved bucket occupied");
            (b.prev, b.next)
        };
        if prev == from {
            // The bucket was the only element; it now links to itself.
            let b = self.buckets[to as usize].as_mut().expect("moved bucket occupied");
            b.prev = to;
            b.next = to;
        } else {
            self.buckets[prev as usize].as_mut().expect("prev occupied").next = to;
            self.buckets[next as usize].as_mut().expect("next occupied").prev = to;
        }
        if self.head == from {
            self.head = to;
        }
    }

    fn relocate_after(&mut self, hole: usize) {
        let mask = self.mask();
        let mut hole = hole;
        let mut at = (hole + 1) & mask;
        while let Some(present) = &self.buckets[at] {
            let home = present.hash as usize & mask;
            let distance_home = at.wrapping_sub(home) & mask;
            let distance_hole = at.wrapping_sub(hole) & mask;
            if distance_home >= distance_hole {
                self.buckets[hole] = self.buckets[at].take();
                self.rethread(at as u32, hole as u32);
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
        // Rebuild at twice the capacity, reinserting in iteration order so
        // the threading comes out identical.
        let mut order = Vec::with_capacity(self.size);
        if self.head != NIL {
            let mut at = self.head;
            loop {
                let bucket = self.buckets[at as usize].take().expect("threaded bucket occupied");
                let next = bucket.next;
                order.push(bucket);
                at = next;
                if at == self.head {
                    break;
                }
            }
        }
        self.buckets = (0..self.buckets.len() * 2).map(|_| None).collect();
        self.head = NIL;
        self.size = 0;
        let mask = self.mask();
        for bucket in order {
            let mut at = bucket.hash as usize & mask;
            while self.buckets[at].is_some() {
                at = (at + 1) & mask;
            }
            self.buckets[at] = Some(Bucket { prev: NIL, next: NIL, ..bucket });
            self.attach_tail(at as u32);
            self.size += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn constant(n: i64) -> Reference {
        Reference::constant(crate::value::Value::Integer(n))
    }

    #[test]
    fn insert_find_replace() {
        let mut dict = ReferenceDictionary::new();
        assert!(dict.insert("a", constant(1)));
        assert!(!dict.insert("a", constant(2)));
        assert_eq!(dict.size(), 1);
        let r = dict.find("a").unwrap();
        assert_eq!(r.read().unwrap().as_integer().unwrap(), 2);
        assert!(dict.find("b").is_none());
    }

    #[test]
    fn iteration_is_insertion_ordered() {
        let mut dict = ReferenceDictionary::new();
        for n in 0..100 {
            dict.insert(format!("name_{n}"), constant(n));
        }
        let names = dict.names();
        assert_eq!(names.len(), 100);
        for (n, name) in names.iter().enumerate() {
            assert_eq!(&**name, format!("name_{n}"));
        }
    }

    #[test]
    fn erase_preserves_order_of_the_rest() {
        let mut dict = ReferenceDictionary::new();
        for n in 0..40 {
            dict.insert(format!("k{n}"), constant(n));
        }
        for n in (0..40).step_by(3) {
            assert!(dict.erase(&format!("k{n}")).is_some());
        }
        let names = dict.names();
        let expected: Vec<String> = (0..40).filter(|n| n % 3 != 0).map(|n| format!("k{n}")).collect();
        assert_eq!(names.len(), expected.len());
        for (name, want) in names.iter().zip(&expected) {
            assert_eq!(&**name, want.as_str());
        }
        // The erased names really are gone and lookups still terminate.
        assert!(dict.find("k0").is_none());
        assert!(dict.find("k1").is_some());
    }

    #[test]
    fn erase_everything_then_reuse() {
        let mut dict = ReferenceDictionary::new();
        for n in 0..20 {
            dict.insert(format!("k{n}"), constant(n));
        }
        for n in 0..20 {
            assert!(dict.erase(&format!("k{n}")).is_some());
        }
        assert!(dict.is_empty());
        assert!(dict.insert("again", constant(7)));
        assert_eq!(dict.names().len(), 1);
    }
}
