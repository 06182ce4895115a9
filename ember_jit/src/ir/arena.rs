//! Index arenas for tree nodes and basic blocks.
//!
//! Every IR entity is addressed by a typed [`Id`] into an [`Arena`]. Parents
//! own their children through ids, and CFG edges are plain block ids, so loop
//! back-edges never create ownership cycles.
//!
//! Side tables computed by later passes (value bindings, liveness sets) live in
//! a [`SecondaryMap`] or a [`BitSet`] instead of being stored on the nodes.

use std::marker::PhantomData;
use std::ops::{Index, IndexMut};

// =============================================================================
// Typed ID
// =============================================================================

/// A type-safe index into an [`Arena<T>`].
///
/// Traits are implemented by hand so that `Id<T>` is `Copy`/`Eq`/`Hash`
/// whatever `T` is.
pub struct Id<T> {
    index: u32,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Copy for Id<T> {}

impl<T> Clone for Id<T> {
    #[inline]
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> PartialEq for Id<T> {
    #[inline]
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index
    }
}

impl<T> Eq for Id<T> {}

impl<T> PartialOrd for Id<T> {
    #[inline]
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for Id<T> {
    #[inline]
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.index.cmp(&other.index)
    }
}

impl<T> std::hash::Hash for Id<T> {
    #[inline]
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.index.hash(state);
    }
}

impl<T> Id<T> {
    /// Create an ID from a raw index.
    #[inline]
    pub const fn new(index: u32) -> Self {
        Id {
            index,
            _marker: PhantomData,
        }
    }

    /// Get the raw index.
    #[inline]
    pub const fn index(self) -> u32 {
        self.index
    }

    /// Get the index as usize.
    #[inline]
    pub const fn as_usize(self) -> usize {
        self.index as usize
    }
}

impl<T> std::fmt::Debug for Id<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.index)
    }
}

impl<T> std::fmt::Display for Id<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.index)
    }
}

// =============================================================================
// Arena
// =============================================================================

/// Append-only storage for homogeneous items.
///
/// Items are never removed; the whole arena is dropped with the compilation
/// unit.
#[derive(Debug, Clone)]
pub struct Arena<T> {
    items: Vec<T>,
}

impl<T> Arena<T> {
    /// Create a new empty arena.
    #[inline]
    pub fn new() -> Self {
        Arena { items: Vec::new() }
    }

    /// Allocate a new item and return its ID.
    #[inline]
    pub fn alloc(&mut self, item: T) -> Id<T> {
        let index = self.items.len() as u32;
        self.items.push(item);
        Id::new(index)
    }

    /// Get a reference to an item by ID.
    #[inline]
    pub fn get(&self, id: Id<T>) -> Option<&T> {
        self.items.get(id.as_usize())
    }

    /// Get the number of items in the arena.
    #[inline]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Check if the arena is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Iterate over all items with their IDs, in allocation order.
    #[inline]
    pub fn iter(&self) -> impl Iterator<Item = (Id<T>, &T)> {
        self.items
            .iter()
            .enumerate()
            .map(|(i, item)| (Id::new(i as u32), item))
    }

    /// Iterate over all IDs, in allocation order.
    #[inline]
    pub fn ids(&self) -> impl Iterator<Item = Id<T>> + use<T> {
        (0..self.items.len() as u32).map(Id::new)
    }
}

impl<T> Default for Arena<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Index<Id<T>> for Arena<T> {
    type Output = T;

    #[inline]
    fn index(&self, id: Id<T>) -> &Self::Output {
        &self.items[id.as_usize()]
    }
}

impl<T> IndexMut<Id<T>> for Arena<T> {
    #[inline]
    fn index_mut(&mut self, id: Id<T>) -> &mut Self::Output {
        &mut self.items[id.as_usize()]
    }
}

// =============================================================================
// Secondary Map
// =============================================================================

/// Dense side table keyed by arena IDs.
///
/// Missing entries read as `V::default()`.
#[derive(Debug, Clone)]
pub struct SecondaryMap<K, V> {
    values: Vec<V>,
    _marker: PhantomData<K>,
}

impl<K, V: Default + Clone> SecondaryMap<K, V> {
    /// Create a new empty secondary map.
    pub fn new() -> Self {
        SecondaryMap {
            values: Vec::new(),
            _marker: PhantomData,
        }
    }

    /// Create a map pre-sized for an arena of `len` items.
    pub fn with_len(len: usize) -> Self {
        SecondaryMap {
            values: vec![V::default(); len],
            _marker: PhantomData,
        }
    }

    /// Get a value by ID.
    pub fn get(&self, id: Id<K>) -> Option<&V> {
        self.values.get(id.as_usize())
    }

    /// Set a value by ID, growing the table if needed.
    pub fn set(&mut self, id: Id<K>, value: V) {
        let idx = id.as_usize();
        if idx >= self.values.len() {
            self.values.resize(idx + 1, V::default());
        }
        self.values[idx] = value;
    }

    /// Iterate over all entries.
    pub fn iter(&self) -> impl Iterator<Item = (Id<K>, &V)> {
        self.values
            .iter()
            .enumerate()
            .map(|(i, v)| (Id::new(i as u32), v))
    }
}

impl<K, V: Default + Clone> Default for SecondaryMap<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V: Default + Clone> Index<Id<K>> for SecondaryMap<K, V> {
    type Output = V;

    fn index(&self, id: Id<K>) -> &Self::Output {
        &self.values[id.as_usize()]
    }
}

// =============================================================================
// Bit Set
// =============================================================================

/// Growable bit set used for liveness sets and the free-register pool.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BitSet {
    bits: Vec<u64>,
}

impl BitSet {
    /// Create a new empty bit set.
    pub fn new() -> Self {
        BitSet { bits: Vec::new() }
    }

    /// Create a bit set with room for `n` bits.
    pub fn with_capacity(n: usize) -> Self {
        BitSet {
            bits: vec![0; n.div_ceil(64)],
        }
    }

    /// Create a bit set with bits `0..n` set.
    pub fn filled(n: usize) -> Self {
        let mut set = BitSet::with_capacity(n);
        for i in 0..n {
            set.insert(i);
        }
        set
    }

    fn ensure_capacity(&mut self, n: usize) {
        let words = n.div_ceil(64);
        if words > self.bits.len() {
            self.bits.resize(words, 0);
        }
    }

    /// Set a bit. Returns `true` if it was not already set.
    #[inline]
    pub fn insert(&mut self, index: usize) -> bool {
        self.ensure_capacity(index + 1);
        let word = &mut self.bits[index / 64];
        let mask = 1u64 << (index % 64);
        let fresh = *word & mask == 0;
        *word |= mask;
        fresh
    }

    /// Clear a bit.
    #[inline]
    pub fn remove(&mut self, index: usize) {
        if let Some(word) = self.bits.get_mut(index / 64) {
            *word &= !(1u64 << (index % 64));
        }
    }

    /// Check if a bit is set.
    #[inline]
    pub fn contains(&self, index: usize) -> bool {
        self.bits
            .get(index / 64)
            .is_some_and(|word| word & (1u64 << (index % 64)) != 0)
    }

    /// Union with another bit set (self |= other). Returns `true` on change.
    pub fn union_with(&mut self, other: &BitSet) -> bool {
        if other.bits.len() > self.bits.len() {
            self.bits.resize(other.bits.len(), 0);
        }
        let mut changed = false;
        for (word, &theirs) in self.bits.iter_mut().zip(&other.bits) {
            let merged = *word | theirs;
            changed |= merged != *word;
            *word = merged;
        }
        changed
    }

    /// Remove every bit set in `other` (self &= !other).
    pub fn subtract(&mut self, other: &BitSet) {
        for (word, &theirs) in self.bits.iter_mut().zip(&other.bits) {
            *word &= !theirs;
        }
    }

    /// Check if the bit set is empty.
    pub fn is_empty(&self) -> bool {
        self.bits.iter().all(|&w| w == 0)
    }

    /// Count the number of set bits.
    pub fn count(&self) -> usize {
        self.bits.iter().map(|w| w.count_ones() as usize).sum()
    }

    /// Lowest set bit, if any.
    pub fn first(&self) -> Option<usize> {
        self.bits
            .iter()
            .enumerate()
            .find(|&(_, &w)| w != 0)
            .map(|(i, &w)| i * 64 + w.trailing_zeros() as usize)
    }

    /// Iterate over set bit indices in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        self.bits.iter().enumerate().flat_map(|(word_idx, &word)| {
            (0..64).filter_map(move |bit| {
                if (word & (1 << bit)) != 0 {
                    Some(word_idx * 64 + bit)
                } else {
                    None
                }
            })
        })
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    struct Slot {
        value: i32,
    }

    #[test]
    fn test_arena_alloc_and_index() {
        let mut arena: Arena<Slot> = Arena::new();

        let a = arena.alloc(Slot { value: 10 });
        let b = arena.alloc(Slot { value: 20 });

        assert_eq!(a.index(), 0);
        assert_eq!(b.index(), 1);
        assert_eq!(arena[b].value, 20);

        arena[a].value = 11;
        assert_eq!(arena[a].value, 11);
        assert_eq!(arena.ids().collect::<Vec<_>>(), vec![a, b]);
    }

    #[test]
    fn test_secondary_map_defaults() {
        let mut arena: Arena<Slot> = Arena::new();
        let a = arena.alloc(Slot { value: 1 });
        let b = arena.alloc(Slot { value: 2 });

        let mut map: SecondaryMap<Slot, Option<u32>> = SecondaryMap::with_len(arena.len());
        map.set(b, Some(7));

        assert_eq!(map[a], None);
        assert_eq!(map[b], Some(7));
    }

    #[test]
    fn test_bit_set_first_and_iter() {
        let mut set = BitSet::new();
        assert_eq!(set.first(), None);

        set.insert(70);
        set.insert(3);
        set.insert(64);

        assert_eq!(set.first(), Some(3));
        assert_eq!(set.iter().collect::<Vec<_>>(), vec![3, 64, 70]);

        set.remove(3);
        assert_eq!(set.first(), Some(64));
        assert_eq!(set.count(), 2);
    }

    #[test]
    fn test_bit_set_union_reports_change() {
        let mut a = BitSet::new();
        a.insert(1);
        let mut b = BitSet::new();
        b.insert(1);

        assert!(!a.union_with(&b));
        b.insert(100);
        assert!(a.union_with(&b));
        assert!(a.contains(100));

        a.subtract(&b);
        assert!(a.is_empty());
    }

    #[test]
    fn test_bit_set_filled() {
        let set = BitSet::filled(3);
        assert_eq!(set.iter().collect::<Vec<_>>(), vec![0, 1, 2]);
        assert!(!set.contains(3));
    }
}
