//! Simulated shared SDRAM.
//!
//! Cores share no memory except SDRAM, and SDRAM is only reachable through an
//! [`Address`]. The arena hands out one routing table block per address and
//! tracks a word budget so exhaustion behaves like a failed `malloc`.
//!
//! Ownership is explicit: a block lives until [`Sdram::free`] is called with
//! its address, exactly once. Freeing an unknown address is an error, which
//! catches double frees.

use crate::error::{Result, SdramError};
use crate::table::{size_in_words, RoutingTable};
use std::collections::BTreeMap;
use std::fmt;
use tracing::{debug, warn};

/// First byte address handed out by the arena.
pub const SDRAM_BASE: u32 = 0x6000_0000;

/// Opaque handle to one SDRAM block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Address(pub u32);

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#010x}", self.0)
    }
}

#[derive(Debug)]
struct Block {
    words: usize,
    table: RoutingTable,
}

/// Arena of routing table blocks with a fixed word budget.
#[derive(Debug)]
pub struct Sdram {
    capacity_words: usize,
    used_words: usize,
    next_address: u32,
    blocks: BTreeMap<Address, Block>,
}

impl Sdram {
    /// Create an arena that can hold `capacity_words` words in total.
    pub fn new(capacity_words: usize) -> Self {
        Self {
            capacity_words,
            used_words: 0,
            next_address: SDRAM_BASE,
            blocks: BTreeMap::new(),
        }
    }

    /// Allocate an empty table block able to hold `capacity` entries.
    ///
    /// # Errors
    /// `SdramError::OutOfMemory` if the block would exceed the budget.
    pub fn alloc_table(&mut self, capacity: usize) -> Result<Address> {
        let words = size_in_words(capacity);
        let available = self.available_words();
        if words > available {
            warn!(requested = words, available, "sdram allocation failed");
            return Err(SdramError::OutOfMemory {
                requested: words,
                available,
            }
            .into());
        }

        let address = Address(self.next_address);
        self.next_address = self.next_address.wrapping_add((words * 4) as u32);
        self.used_words += words;
        self.blocks.insert(
            address,
            Block {
                words,
                table: RoutingTable::with_capacity(capacity),
            },
        );
        debug!(%address, capacity, "allocated table block");
        Ok(address)
    }

    /// Allocate a block holding a copy of `table`, sized to its length.
    pub fn store_table(&mut self, table: &RoutingTable) -> Result<Address> {
        let address = self.alloc_table(table.len())?;
        // Sized to fit
        let _ = self.table_mut(address)?.extend_from_slice(table.entries());
        Ok(address)
    }

    /// Allocate a new block holding a copy of the table at `address`.
    pub fn clone_table(&mut self, address: Address) -> Result<Address> {
        let source = self.table(address)?.clone();
        self.store_table(&source)
    }

    /// Release the block at `address`.
    pub fn free(&mut self, address: Address) -> Result<()> {
        let block = self
            .blocks
            .remove(&address)
            .ok_or(SdramError::UnknownAddress(address))?;
        self.used_words -= block.words;
        debug!(%address, "freed table block");
        Ok(())
    }

    pub fn table(&self, address: Address) -> Result<&RoutingTable> {
        self.blocks
            .get(&address)
            .map(|b| &b.table)
            .ok_or_else(|| SdramError::UnknownAddress(address).into())
    }

    pub fn table_mut(&mut self, address: Address) -> Result<&mut RoutingTable> {
        self.blocks
            .get_mut(&address)
            .map(|b| &mut b.table)
            .ok_or_else(|| SdramError::UnknownAddress(address).into())
    }

    /// Copy `table` into the existing block at `address`.
    ///
    /// # Errors
    /// `SdramError::BlockOverflow` if the block's capacity is too small.
    pub fn write_table(&mut self, address: Address, table: &RoutingTable) -> Result<()> {
        let block = self.table_mut(address)?;
        if table.len() > block.capacity() {
            return Err(SdramError::BlockOverflow {
                address,
                capacity: block.capacity(),
                needed: table.len(),
            }
            .into());
        }
        block.clear();
        // Capacity was checked above
        let _ = block.extend_from_slice(table.entries());
        Ok(())
    }

    pub fn contains(&self, address: Address) -> bool {
        self.blocks.contains_key(&address)
    }

    pub fn used_words(&self) -> usize {
        self.used_words
    }

    pub fn available_words(&self) -> usize {
        self.capacity_words - self.used_words
    }

    pub fn live_blocks(&self) -> usize {
        self.blocks.len()
    }
}
