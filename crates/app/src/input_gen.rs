//! Synthetic routing table generation.
//!
//! With no real machine to load from, we generate a table with interesting
//! compression characteristics: neighbouring blocks often share a route and
//! can merge, while the rest cannot.
//!
//! # Design
//!
//! Generated tables have:
//! - One entry per block of 16 keys, blocks laid out back to back
//! - Routes drawn from a small palette, with runs of repeated routes
//! - Bit-fields on distinct entries, each filtering one processor of the
//!   entry's route with a random atom bitmap
//!
//! This makes the search behavior visible in metrics.

use compressor_sim_core::{BitField, Result, RoutingEntry, RoutingTable};
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// Keys covered by each generated entry.
pub const ATOMS_PER_ENTRY: u32 = 16;

const BLOCK_MASK: u32 = !(ATOMS_PER_ENTRY - 1);

/// Routes a generated entry can take: a few links plus a few processors.
const ROUTE_PALETTE: [u32; 6] = [
    0b0000_0001,
    0b0000_0110,
    0b0100_1000,
    0b1000_0001,
    0b0011_0000,
    0b1110_0000,
];

/// Generate a routing table of `n_entries` entries.
///
/// # Arguments
/// - `seed`: random seed for determinism
/// - `n_entries`: number of entries (one block of keys each)
pub fn generate_table(seed: u64, n_entries: usize) -> RoutingTable {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut route = ROUTE_PALETTE[0];

    let entries = (0..n_entries as u32)
        .map(|i| {
            // 60% continue the current run of routes
            if rng.gen_range(0..10) >= 6 {
                route = ROUTE_PALETTE[rng.gen_range(0..ROUTE_PALETTE.len())];
            }
            RoutingEntry::new(i * ATOMS_PER_ENTRY, BLOCK_MASK, route, i + 1)
        })
        .collect();
    RoutingTable::from_entries(entries)
}

/// Generate `n_bit_fields` bit-fields over distinct entries of `table`.
///
/// Each filters one processor bit taken from its entry's route, with a
/// random bitmap and priority.
pub fn generate_bit_fields(seed: u64, table: &RoutingTable, n_bit_fields: usize) -> Result<Vec<BitField>> {
    // Independent of the table's stream
    let mut rng = ChaCha8Rng::seed_from_u64(seed.wrapping_add(1));

    let mut indices: Vec<usize> = (0..table.len()).collect();
    indices.shuffle(&mut rng);

    indices
        .into_iter()
        .take(n_bit_fields)
        .enumerate()
        .map(|(id, index)| {
            let entry = &table.entries()[index];
            let processor = pick_route_bit(&mut rng, entry.route);
            let bitmap = rng.gen::<u32>() & ((1 << ATOMS_PER_ENTRY) - 1);
            BitField::new(
                id as u32,
                entry.keymask,
                processor,
                ATOMS_PER_ENTRY,
                vec![bitmap],
                rng.gen_range(0..100),
            )
        })
        .collect()
}

/// Pick one set bit of `route` at random.
fn pick_route_bit(rng: &mut ChaCha8Rng, route: u32) -> u32 {
    let bits: Vec<u32> = (0..u32::BITS).filter(|bit| route & (1 << bit) != 0).collect();
    bits.choose(rng).copied().unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_table() {
        let table = generate_table(42, 100);
        assert_eq!(table.len(), 100);

        // Blocks never overlap
        for pair in table.entries().windows(2) {
            assert!(!pair[0].keymask.intersects(&pair[1].keymask));
        }
    }

    #[test]
    fn test_determinism() {
        assert_eq!(generate_table(12345, 200), generate_table(12345, 200));

        let table = generate_table(7, 50);
        let a = generate_bit_fields(7, &table, 10).unwrap();
        let b = generate_bit_fields(7, &table, 10).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_different_seeds() {
        assert_ne!(generate_table(1, 100), generate_table(2, 100));
    }

    #[test]
    fn test_bit_fields_apply_to_distinct_entries() {
        let table = generate_table(3, 64);
        let bit_fields = generate_bit_fields(3, &table, 32).unwrap();

        assert_eq!(bit_fields.len(), 32);
        for bit_field in &bit_fields {
            let matching = table
                .entries()
                .iter()
                .filter(|e| bit_field.applies_to(e))
                .count();
            assert_eq!(matching, 1, "bit-field {}", bit_field.id);
        }
        let mut keys: Vec<u32> = bit_fields.iter().map(|bf| bf.keymask.key).collect();
        keys.sort_unstable();
        keys.dedup();
        assert_eq!(keys.len(), 32);
    }

    #[test]
    fn test_more_bit_fields_than_entries() {
        let table = generate_table(5, 4);
        assert_eq!(generate_bit_fields(5, &table, 10).unwrap().len(), 4);
    }

    #[test]
    fn test_various_sizes() {
        for size in [0, 1, 100, 1000] {
            assert_eq!(generate_table(999, size).len(), size);
        }
    }
}
