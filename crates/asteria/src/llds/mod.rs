//! Low-level data structures shared by the scope machinery and the garbage
//! collector.
//!
//! All three containers use the same storage discipline: open addressing with
//! linear probing, a load factor kept at or below one half, and erasure by
//! backward relocation of the probe chain so that no tombstones are ever
//! left behind.
//!
//! | Container | Key | Payload | Used by |
//! |-----------|-----|---------|---------|
//! | [`ReferenceDictionary`] | name (string) | [`Reference`](crate::reference::Reference) | every scope |
//! | [`VariableHashMap`] | variable address | strong variable handle | GC tracked/staging sets |
//! | [`PointerHashSet`] | address | — | GC payload deduplication |

mod pointer_hashset;
mod reference_dictionary;
mod variable_hashmap;

pub use pointer_hashset::PointerHashSet;
pub use reference_dictionary::ReferenceDictionary;
pub use variable_hashmap::VariableHashMap;

/// Multiplies the address by a 64-bit Fibonacci constant and keeps the high
/// bits, which is enough mixing for pointer keys that share alignment.
#[inline]
pub(crate) fn hash_pointer(ptr: *const ()) -> u64 {
    (ptr as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15).rotate_left(32)
}
