//! Routing tables with a fixed capacity.
//!
//! A table lives in one SDRAM block and cannot grow past the capacity that
//! block was allocated with. The current length is just `entries.len()`.

use crate::keymask::RoutingEntry;

/// Words used by the length header of a table image.
pub const HEADER_WORDS: usize = 1;

/// Words used by one entry in a table image (key, mask, route, source).
pub const WORDS_PER_ENTRY: usize = 4;

/// Words needed to store a table of `capacity` entries.
pub fn size_in_words(capacity: usize) -> usize {
    HEADER_WORDS + capacity * WORDS_PER_ENTRY
}

/// An ordered sequence of routing entries with a declared capacity.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RoutingTable {
    entries: Vec<RoutingEntry>,
    capacity: usize,
}

impl RoutingTable {
    /// Create an empty table able to hold `capacity` entries.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
            capacity,
        }
    }

    /// Create a table holding exactly `entries`, with matching capacity.
    pub fn from_entries(entries: Vec<RoutingEntry>) -> Self {
        let capacity = entries.len();
        Self { entries, capacity }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Free slots left before the table is full.
    pub fn remaining(&self) -> usize {
        self.capacity - self.entries.len()
    }

    pub fn entries(&self) -> &[RoutingEntry] {
        &self.entries
    }

    /// Mutable access to the entries for in-place minimisation.
    pub fn entries_mut(&mut self) -> &mut Vec<RoutingEntry> {
        &mut self.entries
    }

    /// Append an entry; returns false when the table is full.
    #[must_use]
    pub fn push(&mut self, entry: RoutingEntry) -> bool {
        if self.entries.len() >= self.capacity {
            return false;
        }
        self.entries.push(entry);
        true
    }

    /// Append all of `entries`; returns false, leaving the table unchanged,
    /// when they don't all fit.
    #[must_use]
    pub fn extend_from_slice(&mut self, entries: &[RoutingEntry]) -> bool {
        if entries.len() > self.remaining() {
            return false;
        }
        self.entries.extend_from_slice(entries);
        true
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Serialize as little-endian words: length, then key/mask/route/source
    /// for each entry.
    pub fn to_words(&self) -> Vec<u32> {
        let mut words = Vec::with_capacity(size_in_words(self.entries.len()));
        words.push(self.entries.len() as u32);
        for entry in &self.entries {
            words.push(entry.keymask.key);
            words.push(entry.keymask.mask);
            words.push(entry.route);
            words.push(entry.source);
        }
        words
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_respects_capacity() {
        let mut table = RoutingTable::with_capacity(2);
        assert!(table.push(RoutingEntry::new(1, u32::MAX, 1, 0)));
        assert!(table.push(RoutingEntry::new(2, u32::MAX, 1, 0)));
        assert!(!table.push(RoutingEntry::new(3, u32::MAX, 1, 0)));
        assert_eq!(table.len(), 2);
        assert_eq!(table.remaining(), 0);
    }

    #[test]
    fn test_extend_all_or_nothing() {
        let mut table = RoutingTable::with_capacity(3);
        let entries = [RoutingEntry::new(1, u32::MAX, 1, 0); 4];

        assert!(!table.extend_from_slice(&entries));
        assert!(table.is_empty());
        assert!(table.extend_from_slice(&entries[..3]));
        assert_eq!(table.len(), 3);
    }

    #[test]
    fn test_to_words() {
        let table = RoutingTable::from_entries(vec![RoutingEntry::new(0x10, 0xF0, 3, 1)]);
        assert_eq!(table.to_words(), vec![1, 0x10, 0xF0, 3, 1]);
        assert_eq!(size_in_words(1), 5);
    }
}
