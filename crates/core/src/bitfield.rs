//! Bit-fields and the candidate tables derived from them.
//!
//! A bit-field records, for one source keymask and one target processor,
//! which atoms (keys under the keymask) actually have a target on that
//! processor. Applying it splits the matching routing entry into one entry
//! per atom and drops the processor from the route of every atom whose bit is
//! clear. That makes routing more precise at the cost of more entries, which
//! is why the coordinator searches for how many bit-fields still fit.

use crate::error::{Error, Result};
use crate::keymask::{KeyMask, RoutingEntry};
use crate::table::RoutingTable;

const BITS_PER_WORD: u32 = 32;

/// One bit-field: an atom bitmap for a (keymask, processor) pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BitField {
    pub id: u32,
    pub keymask: KeyMask,
    /// Route bit of the processor this bit-field filters
    pub processor: u32,
    pub n_atoms: u32,
    words: Vec<u32>,
    /// Higher priority bit-fields are folded in first
    pub priority: u32,
}

impl BitField {
    /// Create a bit-field.
    ///
    /// # Errors
    /// `Error::InvalidBitField` if the processor bit is out of range, the
    /// atom count differs from the number of keys the keymask matches, or
    /// the bitmap is too short.
    ///
    /// Atom `i` is the keymask's `i`-th key (see [`KeyMask::nth_key`]), so
    /// every key of a refined entry keeps a route.
    pub fn new(
        id: u32,
        keymask: KeyMask,
        processor: u32,
        n_atoms: u32,
        words: Vec<u32>,
        priority: u32,
    ) -> Result<Self> {
        let invalid = |reason: String| Error::InvalidBitField { id, reason };

        if processor >= BITS_PER_WORD {
            return Err(invalid(format!("processor bit {processor} out of range")));
        }
        if u64::from(n_atoms) != keymask.n_keys() {
            return Err(invalid(format!(
                "{n_atoms} atoms for a keymask matching {} keys",
                keymask.n_keys()
            )));
        }
        let needed = n_atoms.div_ceil(BITS_PER_WORD) as usize;
        if words.len() < needed {
            return Err(invalid(format!(
                "bitmap has {} words, {n_atoms} atoms need {needed}",
                words.len()
            )));
        }

        Ok(Self {
            id,
            keymask,
            processor,
            n_atoms,
            words,
            priority,
        })
    }

    /// Whether `atom` has a target on the processor.
    ///
    /// Atoms past `n_atoms` have no bit and read as clear.
    pub fn is_set(&self, atom: u32) -> bool {
        if atom >= self.n_atoms {
            return false;
        }
        let word = self.words[(atom / BITS_PER_WORD) as usize];
        word & (1 << (atom % BITS_PER_WORD)) != 0
    }

    /// Number of atoms whose bit is clear.
    pub fn n_redundant(&self) -> u32 {
        (0..self.n_atoms).filter(|&atom| !self.is_set(atom)).count() as u32
    }

    /// Inclusion predicate: whether this bit-field refines `entry`.
    pub fn applies_to(&self, entry: &RoutingEntry) -> bool {
        entry.keymask == self.keymask && entry.route & (1 << self.processor) != 0
    }
}

/// Sort bit-fields into search order: highest priority first, then by id.
pub fn sort_by_priority(bit_fields: &mut [BitField]) {
    bit_fields.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.id.cmp(&b.id)));
}

/// The tables making up one compression attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateTables {
    /// Uncompressed table without the refined entries
    pub base: RoutingTable,
    /// One table per refined entry, in uncompressed-table order
    pub refined: Vec<RoutingTable>,
}

impl CandidateTables {
    /// Total entries across all tables.
    pub fn total_entries(&self) -> usize {
        self.base.len() + self.refined.iter().map(RoutingTable::len).sum::<usize>()
    }

    /// All tables, base first.
    pub fn tables(&self) -> impl Iterator<Item = &RoutingTable> {
        std::iter::once(&self.base).chain(self.refined.iter())
    }
}

/// Build the candidate tables for folding in `selected` bit-fields.
///
/// With no bit-fields selected the result is a plain copy of `uncompressed`.
pub fn build_candidate(uncompressed: &RoutingTable, selected: &[BitField]) -> CandidateTables {
    let mut base = Vec::with_capacity(uncompressed.len());
    let mut refined = Vec::new();

    for entry in uncompressed.entries() {
        let applying: Vec<&BitField> = selected.iter().filter(|bf| bf.applies_to(entry)).collect();
        if applying.is_empty() {
            base.push(*entry);
            continue;
        }

        let n_atoms = applying.iter().map(|bf| bf.n_atoms).max().unwrap_or(0);
        let atom_entries = (0..n_atoms)
            .map(|atom| {
                let route = applying
                    .iter()
                    .filter(|bf| !bf.is_set(atom))
                    .fold(entry.route, |route, bf| route & !(1 << bf.processor));
                RoutingEntry {
                    keymask: KeyMask::exact(entry.keymask.nth_key(atom)),
                    route,
                    source: entry.source,
                }
            })
            .collect();
        refined.push(RoutingTable::from_entries(atom_entries));
    }

    CandidateTables {
        base: RoutingTable::from_entries(base),
        refined,
    }
}

/// Upper bound on the entries any candidate can have.
///
/// Used to size a worker's scratch region.
pub fn max_candidate_entries(uncompressed: &RoutingTable, bit_fields: &[BitField]) -> usize {
    build_candidate(uncompressed, bit_fields).total_entries().max(uncompressed.len())
}
