//! Routing table minimisation: sort by route, then greedily merge entries
//! that share a route.
//!
//! # Algorithm
//!
//! 1. Sort entries by route with an in-place three-way quicksort. Entries
//!    equal to the pivot are left where they land; only the strictly-less and
//!    strictly-greater partitions are sorted further. The smaller partition is
//!    handled by recursion and the larger by looping, so stack depth is
//!    bounded by `log2(n)`.
//! 2. Walk the runs of equal route. Inside a run, repeatedly try to merge the
//!    leftmost unfinished entry with each later entry of the run. A merge is
//!    accepted only if the merged keymask intersects no entry of another
//!    route: neither the entries already finalised by earlier runs nor the
//!    untouched entries of later runs. An accepted merge replaces the left
//!    entry, and the consumed slot is refilled from the end of the run. When
//!    no merge is possible the left entry is finalised at the write position.
//! 3. Truncate the table to the finalised entries.
//!
//! A merge is never accepted at the cost of correctness, so the result may
//! still exceed the target length.

use crate::keymask::RoutingEntry;
use crate::table::RoutingTable;
use tracing::debug;

/// Result of one minimisation attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MinimiseOutcome {
    /// Whether the final length fits the target
    pub success: bool,
    /// Number of entries left in the table
    pub length: usize,
    /// Number of accepted merges
    pub merges: usize,
}

/// Sort entries by route, ascending, in place.
pub fn sort_by_route(entries: &mut [RoutingEntry]) {
    sort_range(entries, 0, entries.len());
}

/// Sort `entries[low..high]`.
fn sort_range(entries: &mut [RoutingEntry], mut low: usize, mut high: usize) {
    while high - low > 1 {
        let (less_end, greater_start) = partition(entries, low, high);
        if less_end - low < high - greater_start {
            sort_range(entries, low, less_end);
            low = greater_start;
        } else {
            sort_range(entries, greater_start, high);
            high = less_end;
        }
    }
}

/// Three-way partition of `entries[low..high]` around the route at `low`.
///
/// Returns `(less_end, greater_start)`: `[low, less_end)` holds smaller
/// routes, `[less_end, greater_start)` the pivot route, and
/// `[greater_start, high)` larger routes.
fn partition(entries: &mut [RoutingEntry], low: usize, high: usize) -> (usize, usize) {
    let pivot = entries[low].route;
    // entries[less_write..check] always hold the pivot route
    let mut less_write = low;
    let mut check = low + 1;
    // Everything after greater_write is larger than the pivot
    let mut greater_write = high - 1;

    while check <= greater_write {
        let route = entries[check].route;
        if route < pivot {
            entries.swap(less_write, check);
            less_write += 1;
            check += 1;
        } else if route > pivot {
            entries.swap(greater_write, check);
            greater_write -= 1;
        } else {
            check += 1;
        }
    }

    (less_write, check)
}

/// Indices threaded through one minimisation call.
struct Compaction {
    /// Next slot to write a finalised entry to
    write: usize,
    /// Entries before this index are finalised by earlier runs
    previous: usize,
    /// Entries from this index on belong to later, untouched runs
    remaining: usize,
    merges: usize,
}

impl Compaction {
    /// Try to merge `entries[index]` into `entries[left]`.
    fn find_merge(&self, entries: &mut [RoutingEntry], left: usize, index: usize) -> bool {
        let merged = entries[left].merge(&entries[index]);
        let clashes = entries[..self.previous]
            .iter()
            .chain(entries[self.remaining..].iter())
            .any(|other| other.keymask.intersects(&merged.keymask));
        if clashes {
            return false;
        }
        entries[left] = merged;
        true
    }

    /// Merge what can be merged in the run `entries[left..=right]`.
    fn compress_run(&mut self, entries: &mut [RoutingEntry], mut left: usize, mut right: usize) {
        while left < right {
            let mut merged = false;
            for index in left + 1..=right {
                if self.find_merge(entries, left, index) {
                    entries[index] = entries[right];
                    right -= 1;
                    self.merges += 1;
                    merged = true;
                    break;
                }
            }
            if !merged {
                entries[self.write] = entries[left];
                self.write += 1;
                left += 1;
            }
        }
        if left == right {
            entries[self.write] = entries[left];
            self.write += 1;
        }
    }
}

/// Minimise `entries` in place, reporting success against `target_length`.
///
/// On failure the entries are still left in their minimised form so the
/// caller can inspect the resulting length.
pub fn minimise(entries: &mut Vec<RoutingEntry>, target_length: usize) -> MinimiseOutcome {
    let size = entries.len();
    sort_by_route(entries);

    let mut state = Compaction {
        write: 0,
        previous: 0,
        remaining: 0,
        merges: 0,
    };

    let mut left = 0;
    while left < size {
        let mut right = left;
        while right + 1 < size && entries[right + 1].route == entries[left].route {
            right += 1;
        }
        state.remaining = right + 1;
        state.compress_run(entries, left, right);
        left = right + 1;
        state.previous = state.write;
    }

    entries.truncate(state.write);
    let outcome = MinimiseOutcome {
        success: state.write <= target_length,
        length: state.write,
        merges: state.merges,
    };
    debug!(
        input = size,
        output = outcome.length,
        merges = outcome.merges,
        target_length,
        success = outcome.success,
        "minimised table"
    );
    outcome
}

/// Minimise a table in place.
pub fn minimise_table(table: &mut RoutingTable, target_length: usize) -> MinimiseOutcome {
    minimise(table.entries_mut(), target_length)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(key: u32, mask: u32, route: u32) -> RoutingEntry {
        RoutingEntry::new(key, mask, route, 0)
    }

    fn routes(entries: &[RoutingEntry]) -> Vec<u32> {
        entries.iter().map(|e| e.route).collect()
    }

    #[test]
    fn test_sort_by_route() {
        let mut entries: Vec<_> = [5, 1, 4, 1, 3, 9, 2, 6, 5, 3]
            .iter()
            .enumerate()
            .map(|(i, &r)| entry(i as u32, u32::MAX, r))
            .collect();

        sort_by_route(&mut entries);
        assert_eq!(routes(&entries), vec![1, 1, 2, 3, 3, 4, 5, 5, 6, 9]);
    }

    #[test]
    fn test_sort_already_sorted_and_reversed() {
        let mut sorted: Vec<_> = (0..50).map(|r| entry(r, u32::MAX, r)).collect();
        sort_by_route(&mut sorted);
        assert_eq!(routes(&sorted), (0..50).collect::<Vec<_>>());

        let mut reversed: Vec<_> = (0..50).rev().map(|r| entry(r, u32::MAX, r)).collect();
        sort_by_route(&mut reversed);
        assert_eq!(routes(&reversed), (0..50).collect::<Vec<_>>());
    }

    #[test]
    fn test_sort_all_equal() {
        let mut entries: Vec<_> = (0..10).map(|k| entry(k, u32::MAX, 7)).collect();
        sort_by_route(&mut entries);
        // Equal routes are never moved
        let keys: Vec<_> = entries.iter().map(|e| e.keymask.key).collect();
        assert_eq!(keys, (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn test_empty_table_succeeds() {
        let mut entries = Vec::new();
        let outcome = minimise(&mut entries, 0);
        assert!(outcome.success);
        assert_eq!(outcome.length, 0);
    }

    #[test]
    fn test_single_entry_retained() {
        let mut entries = vec![entry(0x42, 0xFF, 3)];
        let outcome = minimise(&mut entries, 1);
        assert!(outcome.success);
        assert_eq!(entries, vec![entry(0x42, 0xFF, 3)]);
    }

    #[test]
    fn test_merge_pair_into_one() {
        let mut entries = vec![entry(0b00, 0b11, 1), entry(0b01, 0b11, 1)];

        let outcome = minimise(&mut entries, 1);

        assert!(outcome.success);
        assert_eq!(outcome.length, 1);
        assert_eq!(outcome.merges, 1);
        assert_eq!(entries, vec![entry(0b00, 0b10, 1)]);
    }

    #[test]
    fn test_merge_blocked_by_other_route() {
        // Merging 0b00 and 0b11 would cover 0b10, which routes elsewhere
        let mut entries = vec![
            entry(0b00, 0b11, 1),
            entry(0b11, 0b11, 1),
            entry(0b10, 0b11, 2),
        ];

        let outcome = minimise(&mut entries, 1);

        assert!(!outcome.success);
        assert_eq!(outcome.length, 3);
        assert_eq!(outcome.merges, 0);
    }

    #[test]
    fn test_unrelated_entry_does_not_block_merge() {
        // 0b10 is outside the merged keymask (0b0x), so the merge goes ahead,
        // but two entries still exceed a target of one
        let mut entries = vec![
            entry(0b00, 0b11, 1),
            entry(0b01, 0b11, 1),
            entry(0b10, 0b11, 2),
        ];

        let outcome = minimise(&mut entries, 1);

        assert!(!outcome.success);
        assert_eq!(outcome.length, 2);
        assert_eq!(entries[0], entry(0b00, 0b10, 1));
        assert_eq!(entries[1], entry(0b10, 0b11, 2));
    }

    #[test]
    fn test_blocked_by_finalised_earlier_run() {
        // Route 1 runs first; route 2's merge would swallow key 0b10
        let mut entries = vec![
            entry(0b00, 0b11, 2),
            entry(0b10, 0b11, 1),
            entry(0b11, 0b11, 2),
        ];

        let outcome = minimise(&mut entries, 3);

        assert!(outcome.success);
        assert_eq!(outcome.length, 3);
        assert_eq!(routes(&entries), vec![1, 2, 2]);
    }

    #[test]
    fn test_full_block_collapses() {
        // 16 consecutive keys on one route collapse to a single entry
        let mut entries: Vec<_> = (0..16).map(|k| entry(0x100 | k, u32::MAX, 5)).collect();

        let outcome = minimise(&mut entries, 1);

        assert!(outcome.success);
        assert_eq!(entries, vec![entry(0x100, 0xFFFF_FFF0, 5)]);
    }

    #[test]
    fn test_idempotent() {
        let mut entries: Vec<_> = (0..32)
            .map(|k| entry(k, u32::MAX, if k % 3 == 0 { 1 } else { 2 }))
            .collect();

        let first = minimise(&mut entries, 32);
        let snapshot = entries.clone();
        let second = minimise(&mut entries, first.length);

        assert!(second.success);
        assert_eq!(second.length, first.length);
        assert_eq!(second.merges, 0);
        assert_eq!(entries.len(), snapshot.len());
    }

    #[test]
    fn test_minimise_table_wrapper() {
        let mut table =
            RoutingTable::from_entries(vec![entry(0b10, 0b11, 4), entry(0b11, 0b11, 4)]);
        let outcome = minimise_table(&mut table, 1);
        assert!(outcome.success);
        assert_eq!(table.len(), 1);
    }
}
