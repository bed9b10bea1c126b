use std::{collections::HashMap, hash::Hash, num::NonZeroUsize};

const NIL: usize = usize::MAX;

struct Slot<K, V> {
    key: K,
    value: V,
    prev: usize,
    next: usize,
}

/// Fixed-capacity key/value cache with least-recently-used eviction.
///
/// `get` and `put` promote the touched key to most-recently-used;
/// inserting beyond capacity evicts exactly one LRU entry. All
/// operations are O(1) amortized. Not synchronized; the owning task is
/// expected to be the only accessor.
pub struct BoundedCache<K, V> {
    capacity: NonZeroUsize,
    map: HashMap<K, usize>,
    slots: Vec<Slot<K, V>>,
    free: Vec<usize>,
    head: usize,
    tail: usize,
}

impl<K: Eq + Hash + Clone, V> BoundedCache<K, V> {
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            capacity,
            map: HashMap::with_capacity(capacity.get()),
            slots: Vec::with_capacity(capacity.get()),
            free: Vec::new(),
            head: NIL,
            tail: NIL,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity.get()
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Membership test without recency promotion.
    pub fn contains(&self, key: &K) -> bool {
        self.map.contains_key(key)
    }

    pub fn get(&mut self, key: &K) -> Option<&V> {
        let index = *self.map.get(key)?;
        self.detach(index);
        self.attach_front(index);
        Some(&self.slots[index].value)
    }

    pub fn put(&mut self, key: K, value: V) {
        if let Some(&index) = self.map.get(&key) {
            self.slots[index].value = value;
            self.detach(index);
            self.attach_front(index);
            return;
        }

        if self.map.len() == self.capacity.get() {
            self.evict_lru();
        }

        let slot = Slot {
            key: key.clone(),
            value,
            prev: NIL,
            next: NIL,
        };
        let index = match self.free.pop() {
            Some(index) => {
                self.slots[index] = slot;
                index
            }
            None => {
                self.slots.push(slot);
                self.slots.len() - 1
            }
        };
        self.map.insert(key, index);
        self.attach_front(index);
    }

    fn evict_lru(&mut self) {
        let index = self.tail;
        if index == NIL {
            return;
        }
        self.detach(index);
        let key = self.slots[index].key.clone();
        self.map.remove(&key);
        self.free.push(index);
    }

    fn detach(&mut self, index: usize) {
        let prev = self.slots[index].prev;
        let next = self.slots[index].next;
        if prev == NIL {
            self.head = next;
        } else {
            self.slots[prev].next = next;
        }
        if next == NIL {
            self.tail = prev;
        } else {
            self.slots[next].prev = prev;
        }
        self.slots[index].prev = NIL;
        self.slots[index].next = NIL;
    }

    fn attach_front(&mut self, index: usize) {
        self.slots[index].prev = NIL;
        self.slots[index].next = self.head;
        if self.head != NIL {
            self.slots[self.head].prev = index;
        }
        self.head = index;
        if self.tail == NIL {
            self.tail = index;
        }
    }
}
