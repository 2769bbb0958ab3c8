//! Bounded set of recently closed/reset stream identifiers (spec §3
//! "Recycled-identifier set", §9 "Recycled-stream set bound").

use std::collections::BTreeSet;

use crate::frame::StreamId;

const DEFAULT_CAP: usize = 10_000;

/// Lets the protocol handler recognize and ignore late frames for a stream
/// it already finished, without growing unbounded under a chatty server.
/// When the cap is exceeded the oldest half is dropped; very late frames for
/// very old streams may then be treated as session errors rather than
/// silently ignored, which is acceptable per spec §9.
#[derive(Debug, Clone)]
pub struct RecycledStreamIds {
    cap: usize,
    insertion_order: Vec<StreamId>,
    members: BTreeSet<StreamId>,
}

impl RecycledStreamIds {
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAP)
    }

    #[must_use]
    pub fn with_capacity(cap: usize) -> Self {
        Self {
            cap,
            insertion_order: Vec::new(),
            members: BTreeSet::new(),
        }
    }

    pub fn insert(&mut self, id: StreamId) {
        if self.members.insert(id) {
            self.insertion_order.push(id);
            if self.insertion_order.len() > self.cap {
                self.evict_oldest_half();
            }
        }
    }

    #[must_use]
    pub fn contains(&self, id: StreamId) -> bool {
        self.members.contains(&id)
    }

    fn evict_oldest_half(&mut self) {
        let drop_count = self.insertion_order.len() / 2;
        for id in self.insertion_order.drain(..drop_count) {
            self.members.remove(&id);
        }
    }
}

impl Default for RecycledStreamIds {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remembers_inserted_ids() {
        let mut set = RecycledStreamIds::new();
        set.insert(1);
        set.insert(3);
        assert!(set.contains(1));
        assert!(set.contains(3));
        assert!(!set.contains(5));
    }

    #[test]
    fn evicts_oldest_half_past_capacity() {
        let mut set = RecycledStreamIds::with_capacity(4);
        for id in [1u32, 3, 5, 7] {
            set.insert(id);
        }
        set.insert(9);
        // Oldest half (2 entries: 1, 3) dropped once the 5th insert pushes
        // past capacity.
        assert!(!set.contains(1));
        assert!(!set.contains(3));
        assert!(set.contains(5));
        assert!(set.contains(7));
        assert!(set.contains(9));
    }
}
