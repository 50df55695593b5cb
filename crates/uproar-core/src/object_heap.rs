//! Correlation registry: u64 keys to owned values.
//!
//! Backs the in-flight operation table of a ring. Keys are slot indexes;
//! freed slots are threaded on an intrusive free chain and reused LIFO,
//! so the backing array only grows to the high-water mark of concurrent
//! entries. Single-threaded by design (one registry per ring owner).

use crate::kwarn;

const NO_SLOT: i32 = -1;

enum Slot<T> {
    Occupied(T),
    /// Index of the next free slot, or `NO_SLOT` at the chain end.
    Free(i32),
}

pub struct ObjectHeap<T> {
    slots: Vec<Slot<T>>,
    first_free: i32,
    count: usize,
}

impl<T> ObjectHeap<T> {
    pub fn new() -> Self {
        Self { slots: Vec::new(), first_free: NO_SLOT, count: 0 }
    }

    pub fn with_capacity(cap: usize) -> Self {
        Self { slots: Vec::with_capacity(cap), first_free: NO_SLOT, count: 0 }
    }

    /// Store a value and return its key. O(1): pops the free chain or
    /// appends a fresh slot.
    pub fn alloc(&mut self, value: T) -> u64 {
        self.count += 1;
        if self.first_free != NO_SLOT {
            let idx = self.first_free as usize;
            match self.slots[idx] {
                Slot::Free(next) => self.first_free = next,
                // The chain only ever links free slots.
                Slot::Occupied(_) => unreachable!("free chain entered an occupied slot"),
            }
            self.slots[idx] = Slot::Occupied(value);
            idx as u64
        } else {
            self.slots.push(Slot::Occupied(value));
            (self.slots.len() - 1) as u64
        }
    }

    /// Take the value stored under `key`. Returns `None` for a key that
    /// is out of range or already released; both cases are logged, since
    /// they mean a completion arrived for an unknown correlation id.
    pub fn release(&mut self, key: u64) -> Option<T> {
        let idx = key as usize;
        if idx >= self.slots.len() {
            kwarn!("object heap: release of unknown key {}", key);
            return None;
        }
        match std::mem::replace(&mut self.slots[idx], Slot::Free(self.first_free)) {
            Slot::Occupied(value) => {
                self.first_free = idx as i32;
                self.count -= 1;
                Some(value)
            }
            Slot::Free(next) => {
                // Undo the replace so the chain stays intact.
                self.slots[idx] = Slot::Free(next);
                kwarn!("object heap: double release of key {}", key);
                None
            }
        }
    }

    pub fn get(&self, key: u64) -> Option<&T> {
        match self.slots.get(key as usize) {
            Some(Slot::Occupied(v)) => Some(v),
            _ => None,
        }
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }
}

impl<T> Default for ObjectHeap<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alloc_release_round_trip() {
        let mut heap = ObjectHeap::new();
        let k = heap.alloc("hello");
        assert_eq!(heap.len(), 1);
        assert_eq!(heap.get(k), Some(&"hello"));
        assert_eq!(heap.release(k), Some("hello"));
        assert!(heap.is_empty());
    }

    #[test]
    fn released_slots_are_reused() {
        let mut heap = ObjectHeap::new();
        let a = heap.alloc(1);
        let b = heap.alloc(2);
        let c = heap.alloc(3);
        assert_eq!(heap.release(b), Some(2));
        // LIFO reuse: the freed slot comes back first, no array growth.
        let d = heap.alloc(4);
        assert_eq!(d, b);
        assert_eq!(heap.len(), 3);
        assert_eq!(heap.release(a), Some(1));
        assert_eq!(heap.release(c), Some(3));
        assert_eq!(heap.release(d), Some(4));
    }

    #[test]
    fn reuse_does_not_confuse_keys() {
        let mut heap = ObjectHeap::new();
        let mut keys = Vec::new();
        for i in 0..32 {
            keys.push((heap.alloc(i), i));
        }
        for &(k, v) in keys.iter().step_by(2) {
            assert_eq!(heap.release(k), Some(v));
        }
        for i in 100..116 {
            keys.push((heap.alloc(i), i));
        }
        for &(k, v) in keys.iter().skip(1).step_by(2) {
            assert_eq!(heap.release(k), Some(v));
        }
    }

    #[test]
    fn double_release_returns_none() {
        crate::kprint::set_log_level(crate::kprint::LogLevel::Off);
        let mut heap = ObjectHeap::new();
        let k = heap.alloc(7);
        assert_eq!(heap.release(k), Some(7));
        assert_eq!(heap.release(k), None);
        assert_eq!(heap.release(999), None);
        assert!(heap.is_empty());
        // Chain survives the bad releases.
        let k2 = heap.alloc(8);
        assert_eq!(heap.release(k2), Some(8));
    }
}
