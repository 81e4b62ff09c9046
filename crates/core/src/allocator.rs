//! Worker slot allocation and buffer ownership.
//!
//! Each worker core has one [`WorkerSlot`] recording what it is doing and
//! which SDRAM blocks belong to its current attempt. A slot is idle until the
//! coordinator acquires it for a midpoint, and idle again once the result for
//! that midpoint has been recorded and its buffers released.
//!
//! Buffers handed to a worker are owned by its slot until release, so every
//! candidate table is freed exactly once. The compressed-table buffer is the
//! exception: it is kept across attempts on the same slot and only given up
//! when the coordinator takes it over.

use crate::error::{Error, Result};
use crate::link::CoreId;
use crate::sdram::{Address, Sdram};
use tracing::{debug, error};

/// One worker core and the resources of its current attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerSlot {
    pub core_id: CoreId,
    /// Midpoint being explored, or `None` when idle
    midpoint: Option<u32>,
    /// Candidate tables owned by the attempt in flight
    tables: Vec<Address>,
    /// Bit-fields folded into the attempt in flight
    n_bit_fields: u32,
    /// Output buffer, reused across attempts
    compressed_table: Option<Address>,
    /// Working space handed to the worker with every attempt
    scratch_region: Address,
}

impl WorkerSlot {
    fn new(core_id: CoreId, scratch_region: Address) -> Self {
        Self {
            core_id,
            midpoint: None,
            tables: Vec::new(),
            n_bit_fields: 0,
            compressed_table: None,
            scratch_region,
        }
    }

    pub fn is_idle(&self) -> bool {
        self.midpoint.is_none()
    }

    pub fn midpoint(&self) -> Option<u32> {
        self.midpoint
    }

    pub fn tables(&self) -> &[Address] {
        &self.tables
    }

    pub fn n_bit_fields(&self) -> u32 {
        self.n_bit_fields
    }

    pub fn compressed_table(&self) -> Option<Address> {
        self.compressed_table
    }

    pub fn scratch_region(&self) -> Address {
        self.scratch_region
    }
}

/// All worker slots plus the idle count.
#[derive(Debug)]
pub struct WorkerPool {
    slots: Vec<WorkerSlot>,
    n_available: usize,
}

impl WorkerPool {
    /// Create a pool of idle slots, one per `(core, scratch region)` pair.
    pub fn new(workers: impl IntoIterator<Item = (CoreId, Address)>) -> Self {
        let slots: Vec<WorkerSlot> = workers
            .into_iter()
            .map(|(core_id, scratch)| WorkerSlot::new(core_id, scratch))
            .collect();
        let n_available = slots.len();
        Self { slots, n_available }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Number of idle slots.
    pub fn n_available(&self) -> usize {
        self.n_available
    }

    pub fn slots(&self) -> &[WorkerSlot] {
        &self.slots
    }

    pub fn slot(&self, slot: usize) -> Result<&WorkerSlot> {
        self.slots
            .get(slot)
            .ok_or(Error::UnknownWorker(slot as u32))
    }

    fn slot_mut(&mut self, slot: usize) -> Result<&mut WorkerSlot> {
        self.slots
            .get_mut(slot)
            .ok_or(Error::UnknownWorker(slot as u32))
    }

    /// Find the slot driving `core_id`.
    pub fn slot_for_core(&self, core_id: CoreId) -> Option<usize> {
        self.slots.iter().position(|s| s.core_id == core_id)
    }

    /// Midpoints currently being explored.
    pub fn in_flight(&self) -> impl Iterator<Item = u32> + '_ {
        self.slots.iter().filter_map(|s| s.midpoint)
    }

    /// Reserve an idle slot for `midpoint`.
    ///
    /// # Errors
    /// `Error::NoIdleWorker` (fatal) if every slot is busy. Callers check
    /// [`WorkerPool::n_available`] first, so this means a coordinator defect.
    pub fn acquire(&mut self, midpoint: u32) -> Result<usize> {
        let Some(index) = self.slots.iter().position(WorkerSlot::is_idle) else {
            error!(midpoint, "no idle worker to allocate");
            return Err(Error::NoIdleWorker { midpoint });
        };
        self.slots[index].midpoint = Some(midpoint);
        self.n_available -= 1;
        debug!(slot = index, core = self.slots[index].core_id, midpoint, "worker acquired");
        Ok(index)
    }

    /// Output buffer for `slot`, allocating one of `target_length` entries
    /// the first time.
    pub fn compressed_table(
        &mut self,
        slot: usize,
        sdram: &mut Sdram,
        target_length: usize,
    ) -> Result<Address> {
        let worker = self.slot_mut(slot)?;
        if let Some(address) = worker.compressed_table {
            return Ok(address);
        }
        let address = sdram.alloc_table(target_length)?;
        worker.compressed_table = Some(address);
        Ok(address)
    }

    /// Store the tables and midpoint of the attempt about to be dispatched
    /// on `slot`; the slot now owns those tables.
    ///
    /// Tables left over from an earlier attempt are freed first.
    pub fn record_attempt(
        &mut self,
        slot: usize,
        tables: Vec<Address>,
        midpoint: u32,
        sdram: &mut Sdram,
    ) -> Result<()> {
        let worker = self.slot_mut(slot)?;
        for address in worker.tables.drain(..) {
            sdram.free(address)?;
        }
        worker.tables = tables;
        worker.n_bit_fields = midpoint;
        worker.midpoint = Some(midpoint);
        Ok(())
    }

    /// Free the attempt's tables and return `slot` to idle.
    ///
    /// # Returns
    /// The slot's compressed-table address, still owned by the slot, or
    /// `None` if it was taken over.
    ///
    /// # Errors
    /// `Error::IdleWorker` (fatal) if the slot has nothing in flight.
    pub fn release(&mut self, slot: usize, sdram: &mut Sdram) -> Result<Option<Address>> {
        let worker = self.slot_mut(slot)?;
        if worker.midpoint.is_none() {
            return Err(Error::IdleWorker { slot: slot as u32 });
        }
        for address in worker.tables.drain(..) {
            sdram.free(address)?;
        }
        worker.midpoint = None;
        worker.n_bit_fields = 0;
        let compressed = worker.compressed_table;
        self.n_available += 1;
        debug!(slot, "worker released");
        Ok(compressed)
    }

    /// Take ownership of `slot`'s compressed table; the slot will allocate a
    /// fresh one for its next attempt.
    pub fn take_compressed_table(&mut self, slot: usize) -> Result<Option<Address>> {
        Ok(self.slot_mut(slot)?.compressed_table.take())
    }

    /// Free every buffer still owned by any slot, scratch regions included.
    pub fn free_all(&mut self, sdram: &mut Sdram) -> Result<()> {
        for worker in &mut self.slots {
            for address in worker.tables.drain(..) {
                sdram.free(address)?;
            }
            if let Some(address) = worker.compressed_table.take() {
                sdram.free(address)?;
            }
            if sdram.contains(worker.scratch_region) {
                sdram.free(worker.scratch_region)?;
            }
            if worker.midpoint.take().is_some() {
                self.n_available += 1;
            }
        }
        Ok(())
    }
}
