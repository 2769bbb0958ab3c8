//! Static table (RFC 7541 Appendix A) and the per-direction dynamic FIFO
//! table (spec §3 "HPACK entities", §9 "HPACK dynamic table with
//! duplicates").

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use bytes::Bytes;

use crate::error::HpackError;

pub const STATIC_TABLE_LEN: usize = 61;

#[rustfmt::skip]
pub(crate) const STATIC_TABLE: [(&[u8], &[u8]); STATIC_TABLE_LEN] = [
    (b":authority", b""),
    (b":method", b"GET"),
    (b":method", b"POST"),
    (b":path", b"/"),
    (b":path", b"/index.html"),
    (b":scheme", b"http"),
    (b":scheme", b"https"),
    (b":status", b"200"),
    (b":status", b"204"),
    (b":status", b"206"),
    (b":status", b"304"),
    (b":status", b"400"),
    (b":status", b"404"),
    (b":status", b"500"),
    (b"accept-charset", b""),
    (b"accept-encoding", b"gzip, deflate"),
    (b"accept-language", b""),
    (b"accept-ranges", b""),
    (b"accept", b""),
    (b"access-control-allow-origin", b""),
    (b"age", b""),
    (b"allow", b""),
    (b"authorization", b""),
    (b"cache-control", b""),
    (b"content-disposition", b""),
    (b"content-encoding", b""),
    (b"content-language", b""),
    (b"content-length", b""),
    (b"content-location", b""),
    (b"content-range", b""),
    (b"content-type", b""),
    (b"cookie", b""),
    (b"date", b""),
    (b"etag", b""),
    (b"expect", b""),
    (b"expires", b""),
    (b"from", b""),
    (b"host", b""),
    (b"if-match", b""),
    (b"if-modified-since", b""),
    (b"if-none-match", b""),
    (b"if-range", b""),
    (b"if-unmodified-since", b""),
    (b"last-modified", b""),
    (b"link", b""),
    (b"location", b""),
    (b"max-forwards", b""),
    (b"proxy-authenticate", b""),
    (b"proxy-authorization", b""),
    (b"range", b""),
    (b"referer", b""),
    (b"refresh", b""),
    (b"retry-after", b""),
    (b"server", b""),
    (b"set-cookie", b""),
    (b"strict-transport-security", b""),
    (b"transfer-encoding", b""),
    (b"user-agent", b""),
    (b"vary", b""),
    (b"via", b""),
    (b"www-authenticate", b""),
];

#[derive(Debug, Clone)]
struct Entry {
    name: Bytes,
    value: Bytes,
    recency: u64,
}

impl Entry {
    fn size(&self) -> u32 {
        (self.name.len() + self.value.len() + 32) as u32
    }
}

/// A FIFO of header fields with an auxiliary recency index so encoder-side
/// lookups don't need a linear scan over every duplicate name/value pair.
#[derive(Debug, Clone)]
pub struct DynamicTable {
    entries: VecDeque<Entry>,
    size: u32,
    capacity: u32,
    max_capacity: u32,
    next_recency: u64,
    pair_index: BTreeMap<(Bytes, Bytes), BTreeSet<u64>>,
    name_index: BTreeMap<Bytes, BTreeSet<u64>>,
}

impl DynamicTable {
    #[must_use]
    pub fn new(max_capacity: u32) -> Self {
        Self {
            entries: VecDeque::new(),
            size: 0,
            capacity: max_capacity,
            max_capacity,
            next_recency: 0,
            pair_index: BTreeMap::new(),
            name_index: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    #[must_use]
    pub fn max_capacity(&self) -> u32 {
        self.max_capacity
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// `index` is 0-based, counting from the most recently inserted entry.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<(&[u8], &[u8])> {
        self.entries.get(index).map(|e| (e.name.as_ref(), e.value.as_ref()))
    }

    #[must_use]
    pub fn index_of(&self, name: &[u8], value: &[u8]) -> Option<usize> {
        let key: (Bytes, Bytes) = (Bytes::copy_from_slice(name), Bytes::copy_from_slice(value));
        let recency = *self.pair_index.get(&key)?.iter().next_back()?;
        self.position_of(recency)
    }

    #[must_use]
    pub fn index_of_name(&self, name: &[u8]) -> Option<usize> {
        let recency = *self.name_index.get(name)?.iter().next_back()?;
        self.position_of(recency)
    }

    fn position_of(&self, recency: u64) -> Option<usize> {
        self.entries.iter().position(|e| e.recency == recency)
    }

    /// Prepends a new entry, evicting from the back until it fits. An entry
    /// that alone exceeds capacity clears the table instead of being stored.
    pub fn prepend(&mut self, name: Bytes, value: Bytes) {
        let entry_size = name.len() as u32 + value.len() as u32 + 32;
        if entry_size > self.capacity {
            self.clear();
            return;
        }
        while self.size + entry_size > self.capacity {
            if !self.evict_oldest() {
                break;
            }
        }
        let recency = self.next_recency;
        self.next_recency += 1;
        self.pair_index
            .entry((name.clone(), value.clone()))
            .or_default()
            .insert(recency);
        self.name_index.entry(name.clone()).or_default().insert(recency);
        self.size += entry_size;
        self.entries.push_front(Entry { name, value, recency });
    }

    fn evict_oldest(&mut self) -> bool {
        let Some(entry) = self.entries.pop_back() else {
            return false;
        };
        self.size -= entry.size();
        let key = (entry.name.clone(), entry.value.clone());
        if let Some(set) = self.pair_index.get_mut(&key) {
            set.remove(&entry.recency);
            if set.is_empty() {
                self.pair_index.remove(&key);
            }
        }
        if let Some(set) = self.name_index.get_mut(&entry.name) {
            set.remove(&entry.recency);
            if set.is_empty() {
                self.name_index.remove(&entry.name);
            }
        }
        true
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.pair_index.clear();
        self.name_index.clear();
        self.size = 0;
    }

    /// Raises or lowers the ceiling itself, e.g. when a SETTINGS frame
    /// changes `HEADER_TABLE_SIZE`. Lowering it below the current capacity
    /// evicts immediately.
    pub fn set_max_capacity(&mut self, max_capacity: u32) {
        self.max_capacity = max_capacity;
        if self.capacity > max_capacity {
            self.capacity = max_capacity;
            while self.size > self.capacity {
                if !self.evict_oldest() {
                    break;
                }
            }
        }
    }

    /// A dynamic table size update (RFC 7541 §6.3). `size` above
    /// `max_capacity` (the peer-advertised ceiling) is a session error.
    pub fn update_size(&mut self, size: u32) -> Result<(), HpackError> {
        if size > self.max_capacity {
            return Err(HpackError::OversizedDynamicTableUpdate {
                requested: size,
                max: self.max_capacity,
            });
        }
        self.capacity = size;
        while self.size > self.capacity {
            if !self.evict_oldest() {
                break;
            }
        }
        Ok(())
    }
}

/// Combines the fixed static table with a direction-local dynamic table,
/// offering the single 1-based index space HPACK representations use.
#[derive(Debug, Clone)]
pub struct HeaderTable {
    dynamic: DynamicTable,
}

impl HeaderTable {
    #[must_use]
    pub fn new(max_dynamic_capacity: u32) -> Self {
        Self {
            dynamic: DynamicTable::new(max_dynamic_capacity),
        }
    }

    #[must_use]
    pub fn capacity(&self) -> u32 {
        self.dynamic.capacity()
    }

    #[must_use]
    pub fn max_capacity(&self) -> u32 {
        self.dynamic.max_capacity()
    }

    pub fn field(&self, index: u64) -> Result<(Bytes, Bytes), HpackError> {
        if index == 0 {
            return Err(HpackError::ZeroIndex);
        }
        let idx = index as usize;
        if idx <= STATIC_TABLE_LEN {
            let (name, value) = STATIC_TABLE[idx - 1];
            return Ok((Bytes::from_static(name), Bytes::from_static(value)));
        }
        let dynamic_index = idx - STATIC_TABLE_LEN - 1;
        self.dynamic
            .get(dynamic_index)
            .map(|(name, value)| (Bytes::copy_from_slice(name), Bytes::copy_from_slice(value)))
            .ok_or(HpackError::InvalidIndex(index))
    }

    #[must_use]
    pub fn index_of(&self, name: &[u8], value: &[u8]) -> Option<u64> {
        if let Some(i) = STATIC_TABLE.iter().position(|(n, v)| *n == name && *v == value) {
            return Some((i + 1) as u64);
        }
        self.dynamic
            .index_of(name, value)
            .map(|i| (STATIC_TABLE_LEN + i + 1) as u64)
    }

    #[must_use]
    pub fn index_of_name(&self, name: &[u8]) -> Option<u64> {
        if let Some(i) = STATIC_TABLE.iter().position(|(n, _)| *n == name) {
            return Some((i + 1) as u64);
        }
        self.dynamic
            .index_of_name(name)
            .map(|i| (STATIC_TABLE_LEN + i + 1) as u64)
    }

    pub fn prepend(&mut self, name: Bytes, value: Bytes) {
        self.dynamic.prepend(name, value);
    }

    pub fn update_size(&mut self, size: u32) -> Result<(), HpackError> {
        self.dynamic.update_size(size)
    }

    pub fn set_max_capacity(&mut self, max_capacity: u32) {
        self.dynamic.set_max_capacity(max_capacity);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn static_table_has_61_entries() {
        assert_eq!(STATIC_TABLE.len(), 61);
        assert_eq!(STATIC_TABLE[0], (&b":authority"[..], &b""[..]));
        assert_eq!(STATIC_TABLE[60], (&b"www-authenticate"[..], &b""[..]));
    }

    #[test]
    fn dynamic_table_eviction_keeps_newest() {
        let mut table = DynamicTable::new(60);
        table.prepend(Bytes::from_static(b"a"), Bytes::from_static(b"1"));
        table.prepend(Bytes::from_static(b"b"), Bytes::from_static(b"2"));
        // Each entry is len("a")+len("1")+32 = 34 bytes; capacity 60 only
        // fits one, so the older is evicted on the second insert.
        assert_eq!(table.len(), 1);
        assert_eq!(table.get(0), Some((&b"b"[..], &b"2"[..])));
    }

    #[test]
    fn index_of_prefers_most_recent_duplicate() {
        let mut table = DynamicTable::new(4096);
        table.prepend(Bytes::from_static(b"x-custom"), Bytes::from_static(b"one"));
        table.prepend(Bytes::from_static(b"x-custom"), Bytes::from_static(b"one"));
        assert_eq!(table.index_of(b"x-custom", b"one"), Some(0));
    }

    #[test]
    fn oversized_update_is_rejected() {
        let mut table = DynamicTable::new(100);
        assert!(matches!(
            table.update_size(200),
            Err(HpackError::OversizedDynamicTableUpdate { requested: 200, max: 100 })
        ));
    }
}
