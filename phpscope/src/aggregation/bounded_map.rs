//! Fixed-capacity associative container with least-recently-used eviction.
//!
//! This is the storage primitive every aggregation table is built on. It
//! behaves like a `BPF_MAP_TYPE_LRU_HASH`: inserting a new key into a full map
//! silently evicts the least recently accessed entry, so writers never see a
//! "map full" error.
//!
//! # Layout
//!
//! ```text
//! index: HashMap<K, slot>        slots: Vec<Slot>
//!                                 ┌────┬────┬────┬────┐
//!   head (MRU) ─────────────────▶ │ s2 │ s0 │ s3 │ s1 │ ◀── tail (LRU)
//!                                 └────┴────┴────┴────┘
//!                                  prev/next links form the recency list
//! ```
//!
//! Slots live in a dense `Vec`; the recency list is intrusive (`prev`/`next`
//! are slot indices). Eviction reuses the tail slot in place, removal
//! swap-removes and patches the links of the moved slot.
//!
//! # Concurrency
//!
//! All operations take `&self`. Each map serializes its read-modify-write
//! operations under one mutex, which makes per-key increments atomic (no lost
//! updates). A poisoned mutex is recovered rather than propagated: the table
//! is never left half-linked by a panicking caller because no user code runs
//! while the lock is held.

use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Bounded map whose values are counters
pub type BoundedCountingMap<K> = BoundedMap<K, u64>;

/// Fixed-capacity map with LRU eviction (see module docs)
pub struct BoundedMap<K, V> {
    table: Mutex<LruTable<K, V>>,
    capacity: usize,
    evictions: AtomicU64,
}

impl<K, V> BoundedMap<K, V>
where
    K: Hash + Eq + Clone,
{
    /// Create an empty map holding at most `capacity` entries.
    ///
    /// A capacity of zero is raised to one so that an insert always has room
    /// after eviction.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            table: Mutex::new(LruTable::with_capacity(capacity.min(PREALLOCATE_LIMIT))),
            capacity,
            evictions: AtomicU64::new(0),
        }
    }

    /// Maximum number of entries
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Current number of entries (never exceeds `capacity()`)
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().slots.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of entries evicted to make room since creation
    #[must_use]
    pub fn evictions(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }

    /// Check for a key without touching its recency
    #[must_use]
    pub fn contains_key(&self, key: &K) -> bool {
        self.lock().index.contains_key(key)
    }

    /// Insert or overwrite `key`, returning the value it replaced.
    ///
    /// The entry becomes the most recently used. If the key is new and the map
    /// is full, the least recently used entry is evicted first.
    pub fn insert(&self, key: K, value: V) -> Option<V> {
        let mut table = self.lock();
        if let Some(slot) = table.find(&key) {
            table.touch(slot);
            return Some(std::mem::replace(&mut table.slots[slot].value, value));
        }
        if table.insert_new(key, value, self.capacity).is_some() {
            self.evictions.fetch_add(1, Ordering::Relaxed);
        }
        None
    }

    /// Remove `key`, returning its value
    pub fn remove(&self, key: &K) -> Option<V> {
        let mut table = self.lock();
        let slot = table.find(key)?;
        Some(table.remove_slot(slot))
    }

    /// Drop every entry (the eviction counter is kept)
    pub fn clear(&self) {
        let mut table = self.lock();
        table.index.clear();
        table.slots.clear();
        table.head = None;
        table.tail = None;
    }

    fn lock(&self) -> MutexGuard<'_, LruTable<K, V>> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<K, V> BoundedMap<K, V>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    /// Look up `key`, marking it as most recently used
    #[must_use]
    pub fn get(&self, key: &K) -> Option<V> {
        let mut table = self.lock();
        let slot = table.find(key)?;
        table.touch(slot);
        Some(table.slots[slot].value.clone())
    }

    /// Look up `key` without changing its recency
    #[must_use]
    pub fn peek(&self, key: &K) -> Option<V> {
        let table = self.lock();
        table.find(key).map(|slot| table.slots[slot].value.clone())
    }

    /// Copy out every entry, most recently used first.
    ///
    /// Recency is not disturbed, so exporting never changes which key is
    /// evicted next.
    #[must_use]
    pub fn snapshot(&self) -> Vec<(K, V)> {
        let table = self.lock();
        let mut entries = Vec::with_capacity(table.slots.len());
        let mut cursor = table.head;
        while let Some(slot) = cursor {
            let entry = &table.slots[slot];
            entries.push((entry.key.clone(), entry.value.clone()));
            cursor = entry.next;
        }
        entries
    }
}

impl<K> BoundedMap<K, u64>
where
    K: Hash + Eq + Clone,
{
    /// Add `delta` to the counter for `key`, creating it if absent.
    ///
    /// Saturates at `u64::MAX`. Evicts the least recently used key when a new
    /// key arrives at a full map; the evicted count is lost.
    pub fn increment(&self, key: K, delta: u64) {
        let mut table = self.lock();
        if let Some(slot) = table.find(&key) {
            let value = &mut table.slots[slot].value;
            *value = value.saturating_add(delta);
            table.touch(slot);
            return;
        }
        if table.insert_new(key, delta, self.capacity).is_some() {
            self.evictions.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Counter for `key`, or zero if absent. Counts as an access.
    #[must_use]
    pub fn get_or_zero(&self, key: &K) -> u64 {
        self.get(key).unwrap_or(0)
    }
}

impl<K, V> fmt::Debug for BoundedMap<K, V>
where
    K: Hash + Eq + Clone,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoundedMap")
            .field("capacity", &self.capacity)
            .field("len", &self.len())
            .field("evictions", &self.evictions())
            .finish()
    }
}

/// Large capacities (65536 compiled files) grow on demand instead of
/// reserving every slot up front.
const PREALLOCATE_LIMIT: usize = 1024;

struct Slot<K, V> {
    key: K,
    value: V,
    prev: Option<usize>,
    next: Option<usize>,
}

struct LruTable<K, V> {
    index: HashMap<K, usize>,
    slots: Vec<Slot<K, V>>,
    /// Most recently used
    head: Option<usize>,
    /// Least recently used, next to be evicted
    tail: Option<usize>,
}

impl<K, V> LruTable<K, V>
where
    K: Hash + Eq + Clone,
{
    fn with_capacity(reserve: usize) -> Self {
        Self {
            index: HashMap::with_capacity(reserve),
            slots: Vec::with_capacity(reserve),
            head: None,
            tail: None,
        }
    }

    fn find(&self, key: &K) -> Option<usize> {
        self.index.get(key).copied()
    }

    /// Insert a key known to be absent. Returns the evicted entry, if any.
    fn insert_new(&mut self, key: K, value: V, capacity: usize) -> Option<(K, V)> {
        if self.slots.len() < capacity {
            let slot = self.slots.len();
            self.slots.push(Slot { key: key.clone(), value, prev: None, next: None });
            self.index.insert(key, slot);
            self.push_front(slot);
            return None;
        }

        // Full: recycle the LRU slot in place
        let slot = self.tail?;
        self.unlink(slot);
        let old_key = std::mem::replace(&mut self.slots[slot].key, key.clone());
        let old_value = std::mem::replace(&mut self.slots[slot].value, value);
        self.index.remove(&old_key);
        self.index.insert(key, slot);
        self.push_front(slot);
        Some((old_key, old_value))
    }

    fn remove_slot(&mut self, slot: usize) -> V {
        self.unlink(slot);
        let last = self.slots.len() - 1;
        if slot != last {
            // The last slot moves into `slot`; repoint everything that referenced it
            let (prev, next) = (self.slots[last].prev, self.slots[last].next);
            match prev {
                Some(p) => self.slots[p].next = Some(slot),
                None => self.head = Some(slot),
            }
            match next {
                Some(n) => self.slots[n].prev = Some(slot),
                None => self.tail = Some(slot),
            }
            if let Some(index) = self.index.get_mut(&self.slots[last].key) {
                *index = slot;
            }
        }
        let removed = self.slots.swap_remove(slot);
        self.index.remove(&removed.key);
        removed.value
    }

    fn touch(&mut self, slot: usize) {
        if self.head != Some(slot) {
            self.unlink(slot);
            self.push_front(slot);
        }
    }

    fn unlink(&mut self, slot: usize) {
        let (prev, next) = (self.slots[slot].prev, self.slots[slot].next);
        match prev {
            Some(p) => self.slots[p].next = next,
            None => self.head = next,
        }
        match next {
            Some(n) => self.slots[n].prev = prev,
            None => self.tail = prev,
        }
        self.slots[slot].prev = None;
        self.slots[slot].next = None;
    }

    fn push_front(&mut self, slot: usize) {
        self.slots[slot].prev = None;
        self.slots[slot].next = self.head;
        match self.head {
            Some(h) => self.slots[h].prev = Some(slot),
            None => self.tail = Some(slot),
        }
        self.head = Some(slot);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys(map: &BoundedCountingMap<&'static str>) -> Vec<&'static str> {
        map.snapshot().into_iter().map(|(k, _)| k).collect()
    }

    #[test]
    fn test_increment_creates_and_accumulates() {
        let map = BoundedCountingMap::new(4);
        map.increment("a", 1);
        map.increment("a", 2);
        map.increment("b", 5);

        assert_eq!(map.get_or_zero(&"a"), 3);
        assert_eq!(map.get_or_zero(&"b"), 5);
        assert_eq!(map.get_or_zero(&"missing"), 0);
        assert_eq!(map.len(), 2);
    }

    #[test]
    fn test_evicts_least_recently_used() {
        let map = BoundedCountingMap::new(3);
        map.increment("a", 1);
        map.increment("b", 1);
        map.increment("c", 1);

        // "a" is now the most recent, "b" the least
        map.increment("a", 1);
        map.increment("d", 1);

        assert_eq!(map.len(), 3);
        assert!(!map.contains_key(&"b"));
        assert_eq!(keys(&map), vec!["d", "a", "c"]);
        assert_eq!(map.evictions(), 1);
    }

    #[test]
    fn test_evicted_count_is_not_carried_forward() {
        let map = BoundedCountingMap::new(1);
        map.increment("a", 10);
        map.increment("b", 1);
        map.increment("a", 1);

        assert_eq!(map.peek(&"a"), Some(1));
        assert_eq!(map.evictions(), 2);
    }

    #[test]
    fn test_get_marks_recent_but_peek_does_not() {
        let map = BoundedCountingMap::new(2);
        map.increment("a", 1);
        map.increment("b", 1);

        let _ = map.peek(&"a");
        map.increment("c", 1);
        assert!(!map.contains_key(&"a"), "peek must not refresh recency");

        let _ = map.get(&"b");
        map.increment("d", 1);
        assert!(map.contains_key(&"b"), "get refreshes recency");
        assert!(!map.contains_key(&"c"));
    }

    #[test]
    fn test_remove_keeps_links_consistent() {
        let map = BoundedCountingMap::new(4);
        for key in ["a", "b", "c", "d"] {
            map.increment(key, 1);
        }

        // Middle, head, then tail
        assert_eq!(map.remove(&"b"), Some(1));
        assert_eq!(map.remove(&"d"), Some(1));
        assert_eq!(map.remove(&"a"), Some(1));
        assert_eq!(map.remove(&"a"), None);
        assert_eq!(keys(&map), vec!["c"]);

        map.increment("e", 1);
        map.increment("f", 1);
        map.increment("g", 1);
        map.increment("h", 1);
        assert_eq!(keys(&map), vec!["h", "g", "f", "e"]);
    }

    #[test]
    fn test_insert_returns_previous_value() {
        let map: BoundedMap<u32, u64> = BoundedMap::new(2);
        assert_eq!(map.insert(1, 100), None);
        assert_eq!(map.insert(1, 200), Some(100));
        assert_eq!(map.peek(&1), Some(200));
    }

    #[test]
    fn test_zero_capacity_is_raised_to_one() {
        let map = BoundedCountingMap::new(0);
        assert_eq!(map.capacity(), 1);
        map.increment("a", 1);
        map.increment("b", 1);
        assert_eq!(map.len(), 1);
        assert_eq!(map.get_or_zero(&"b"), 1);
    }

    #[test]
    fn test_increment_saturates() {
        let map = BoundedCountingMap::new(1);
        map.increment("a", u64::MAX - 1);
        map.increment("a", 5);
        assert_eq!(map.get_or_zero(&"a"), u64::MAX);
    }

    #[test]
    fn test_clear() {
        let map = BoundedCountingMap::new(2);
        map.increment("a", 1);
        map.clear();
        assert!(map.is_empty());
        map.increment("b", 1);
        assert_eq!(keys(&map), vec!["b"]);
    }
}
