//! Recency Index
//!
//! Most-recently-used-first ordering of tracked entries plus a key -> slot
//! map. The list is a slab of slots linked by index, with vacated slots
//! recycled through a free list, so every operation is O(1) without shared
//! pointers.
//!
//! The index is not synchronized; a [`Layer`](super::Layer) wraps it in its
//! own `RwLock`.

use std::collections::HashMap;
use std::time::{Duration, Instant};

/// One tracked blob
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    /// Cache key
    pub key: String,
    /// Last successful get/put
    pub last_access: Instant,
    /// Content length in bytes at last access
    pub size: u64,
}

impl Entry {
    /// Time elapsed since the last access
    pub fn idle(&self) -> Duration {
        self.last_access.elapsed()
    }
}

/// Index into the slab
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct SlotIdx(usize);

struct Slot {
    entry: Entry,
    prev: Option<SlotIdx>,
    next: Option<SlotIdx>,
}

/// Outcome of [`RecencyIndex::touch`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Touch {
    /// Key was untracked and has been inserted at the front
    Inserted,
    /// Key was tracked; carries its previous size
    Updated { previous_size: u64 },
}

/// Ordered MRU -> LRU sequence with keyed lookup
#[derive(Default)]
pub struct RecencyIndex {
    slots: Vec<Option<Slot>>,
    free: Vec<usize>,
    lookup: HashMap<String, SlotIdx>,
    head: Option<SlotIdx>,
    tail: Option<SlotIdx>,
}

impl RecencyIndex {
    /// Create an empty index
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of tracked entries
    pub fn len(&self) -> usize {
        self.lookup.len()
    }

    /// Check if nothing is tracked
    pub fn is_empty(&self) -> bool {
        self.lookup.is_empty()
    }

    /// Check if `key` is tracked
    pub fn contains(&self, key: &str) -> bool {
        self.lookup.contains_key(key)
    }

    /// Tracked entry for `key`
    pub fn get(&self, key: &str) -> Option<&Entry> {
        let idx = *self.lookup.get(key)?;
        Some(&self.node(idx).entry)
    }

    /// Record an access: insert `key` at the front, or move it there and
    /// refresh its size and timestamp.
    pub fn touch(&mut self, key: &str, size: u64, now: Instant) -> Touch {
        if let Some(&idx) = self.lookup.get(key) {
            let previous_size = {
                let entry = &mut self.node_mut(idx).entry;
                let previous = entry.size;
                entry.size = size;
                entry.last_access = now;
                previous
            };
            self.move_to_front(idx);
            return Touch::Updated { previous_size };
        }

        let idx = self.alloc(Entry {
            key: key.to_string(),
            last_access: now,
            size,
        });
        self.link_front(idx);
        self.lookup.insert(key.to_string(), idx);
        Touch::Inserted
    }

    /// Stop tracking `key`, returning its entry
    pub fn remove(&mut self, key: &str) -> Option<Entry> {
        let idx = self.lookup.remove(key)?;
        Some(self.unlink(idx))
    }

    /// Least-recently-used entry, if any
    pub fn peek_tail(&self) -> Option<&Entry> {
        self.tail.map(|idx| &self.node(idx).entry)
    }

    /// Remove and return the least-recently-used entry
    pub fn pop_tail(&mut self) -> Option<Entry> {
        let idx = self.tail?;
        let entry = self.unlink(idx);
        self.lookup.remove(&entry.key);
        Some(entry)
    }

    /// Keys from most to least recently used
    pub fn keys(&self) -> Vec<String> {
        let mut keys = Vec::with_capacity(self.len());
        let mut cursor = self.head;
        while let Some(idx) = cursor {
            let slot = self.node(idx);
            keys.push(slot.entry.key.clone());
            cursor = slot.next;
        }
        keys
    }

    // -- Internal helpers --

    fn alloc(&mut self, entry: Entry) -> SlotIdx {
        let slot = Slot {
            entry,
            prev: None,
            next: None,
        };
        match self.free.pop() {
            Some(free) => {
                self.slots[free] = Some(slot);
                SlotIdx(free)
            }
            None => {
                self.slots.push(Some(slot));
                SlotIdx(self.slots.len() - 1)
            }
        }
    }

    fn link_front(&mut self, idx: SlotIdx) {
        let old_head = self.head;
        {
            let node = self.node_mut(idx);
            node.prev = None;
            node.next = old_head;
        }
        match old_head {
            Some(h) => self.node_mut(h).prev = Some(idx),
            None => self.tail = Some(idx),
        }
        self.head = Some(idx);
    }

    fn detach(&mut self, idx: SlotIdx) {
        let (prev, next) = {
            let node = self.node(idx);
            (node.prev, node.next)
        };
        match prev {
            Some(p) => self.node_mut(p).next = next,
            None => self.head = next,
        }
        match next {
            Some(n) => self.node_mut(n).prev = prev,
            None => self.tail = prev,
        }
    }

    fn move_to_front(&mut self, idx: SlotIdx) {
        if self.head == Some(idx) {
            return;
        }
        self.detach(idx);
        self.link_front(idx);
    }

    fn unlink(&mut self, idx: SlotIdx) -> Entry {
        self.detach(idx);
        self.free.push(idx.0);
        match self.slots[idx.0].take() {
            Some(slot) => slot.entry,
            None => unreachable!("recency index slot {} vacant while linked", idx.0),
        }
    }

    #[inline]
    fn node(&self, idx: SlotIdx) -> &Slot {
        match &self.slots[idx.0] {
            Some(slot) => slot,
            None => unreachable!("dangling recency slot {}", idx.0),
        }
    }

    #[inline]
    fn node_mut(&mut self, idx: SlotIdx) -> &mut Slot {
        match &mut self.slots[idx.0] {
            Some(slot) => slot,
            None => unreachable!("dangling recency slot {}", idx.0),
        }
    }
}

impl std::fmt::Debug for RecencyIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecencyIndex")
            .field("len", &self.len())
            .field("keys", &self.keys())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
