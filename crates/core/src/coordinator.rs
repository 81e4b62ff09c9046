//! The coordinator core: drives the search and owns every attempt's buffers.
//!
//! For each midpoint the coordinator reserves a worker, builds the candidate
//! tables in SDRAM, and ships their addresses to the worker. When the
//! worker's response comes back it narrows the search and releases the
//! worker's buffers. The compressed table of the best success so far is taken
//! away from its worker slot so later attempts on that slot cannot overwrite
//! it.
//!
//! An SDRAM allocation failure while preparing an attempt is not fatal: the
//! attempt's partial buffers are freed and the midpoint counts as failed.

use crate::allocator::WorkerPool;
use crate::bitfield::{build_candidate, sort_by_priority, BitField};
use crate::error::{Error, Result};
use crate::link::{CoreId, Link};
use crate::message::{Response, ResponseCode};
use crate::sdram::{Address, Sdram};
use crate::search::{SearchPhase, SearchState};
use crate::table::RoutingTable;
use crate::transport::Transport;
use tracing::{debug, info, warn};

/// Result of one midpoint attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttemptRecord {
    pub midpoint: u32,
    pub code: ResponseCode,
    /// Entries after minimisation (0 when nothing ran)
    pub length: u32,
}

impl AttemptRecord {
    pub fn is_success(&self) -> bool {
        self.code == ResponseCode::SuccessfulCompression
    }
}

/// Final answer of a compression job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome {
    /// Most bit-fields that could be folded in, `None` on overall failure
    pub best_midpoint: Option<u32>,
    /// The compressed table for `best_midpoint`
    pub table: Option<RoutingTable>,
    /// Every attempt in the order its result was recorded
    pub attempts: Vec<AttemptRecord>,
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        self.best_midpoint.is_some()
    }
}

/// Search driver running on the coordinator core.
#[derive(Debug)]
pub struct Coordinator {
    core_id: CoreId,
    target_length: usize,
    uncompressed: Address,
    bit_fields: Vec<BitField>,
    search: SearchState,
    pool: WorkerPool,
    transport: Transport,
    /// Midpoint and buffer of the best compressed table so far
    best: Option<(u32, Address)>,
    attempts: Vec<AttemptRecord>,
    allocation_failures: u64,
    fragments_sent: u64,
    tables_sent: u64,
}

impl Coordinator {
    /// Create a coordinator for the table stored at `uncompressed`.
    ///
    /// Bit-fields are put in priority order here; midpoint `m` means the first
    /// `m` of them.
    pub fn new(
        core_id: CoreId,
        target_length: usize,
        payload_bytes: usize,
        uncompressed: Address,
        mut bit_fields: Vec<BitField>,
        pool: WorkerPool,
    ) -> Result<Self> {
        if pool.is_empty() {
            return Err(Error::Config("coordinator needs at least one worker".into()));
        }
        sort_by_priority(&mut bit_fields);
        let n_bit_fields = bit_fields.len() as u32;
        info!(
            core = core_id,
            n_bit_fields,
            workers = pool.len(),
            target_length,
            "coordinator ready"
        );

        Ok(Self {
            core_id,
            target_length,
            uncompressed,
            search: SearchState::new(n_bit_fields),
            bit_fields,
            pool,
            transport: Transport::new(core_id, payload_bytes)?,
            best: None,
            attempts: Vec::new(),
            allocation_failures: 0,
            fragments_sent: 0,
            tables_sent: 0,
        })
    }

    pub fn core_id(&self) -> CoreId {
        self.core_id
    }

    pub fn search(&self) -> &SearchState {
        &self.search
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    pub fn transport(&self) -> &Transport {
        &self.transport
    }

    /// Bit-fields in priority order.
    pub fn bit_fields(&self) -> &[BitField] {
        &self.bit_fields
    }

    pub fn attempts(&self) -> &[AttemptRecord] {
        &self.attempts
    }

    /// Attempts lost to SDRAM or scratch exhaustion.
    pub fn allocation_failures(&self) -> u64 {
        self.allocation_failures
    }

    pub fn fragments_sent(&self) -> u64 {
        self.fragments_sent
    }

    pub fn tables_sent(&self) -> u64 {
        self.tables_sent
    }

    pub fn phase(&self) -> SearchPhase {
        self.search.phase()
    }

    pub fn is_converged(&self) -> bool {
        self.search.is_converged()
    }

    /// Start attempts on idle workers until none are idle or the search has
    /// nothing more to try.
    ///
    /// # Returns
    /// Midpoints started, including those that failed to allocate.
    pub fn dispatch_ready(&mut self, sdram: &mut Sdram, link: &mut Link) -> Result<usize> {
        let mut started = 0;
        while self.pool.n_available() > 0 {
            let Some(midpoint) = self.search.next_midpoint() else {
                break;
            };
            if !self.dispatch(midpoint, sdram, link)? {
                debug!(midpoint, "attempt concluded without dispatch");
            }
            started += 1;
        }
        Ok(started)
    }

    /// Prepare and send one attempt.
    ///
    /// # Returns
    /// `false` if the attempt could not be allocated and was recorded as a
    /// failure instead.
    fn dispatch(&mut self, midpoint: u32, sdram: &mut Sdram, link: &mut Link) -> Result<bool> {
        let slot = self.pool.acquire(midpoint)?;

        let compressed = match self.prepare(slot, midpoint, sdram) {
            Ok(address) => address,
            Err(err) if !err.is_fatal() => {
                warn!(midpoint, %err, "cannot allocate attempt, treating as failed");
                self.pool.release(slot, sdram)?;
                self.allocation_failures += 1;
                self.conclude(midpoint, ResponseCode::FailedMalloc, 0);
                return Ok(false);
            }
            Err(err) => return Err(err),
        };

        let worker = self.pool.slot(slot)?;
        let dest = worker.core_id;
        let scratch = worker.scratch_region();
        let tables = worker.tables().to_vec();

        let fragments = self
            .transport
            .dispatch(link, dest, &tables, compressed, scratch)?;
        self.fragments_sent += fragments as u64;
        self.tables_sent += tables.len() as u64;

        info!(midpoint, core = dest, tables = tables.len(), fragments, "attempt dispatched");
        Ok(true)
    }

    /// Allocate the output buffer and candidate tables for `slot`.
    fn prepare(&mut self, slot: usize, midpoint: u32, sdram: &mut Sdram) -> Result<Address> {
        let compressed = self.pool.compressed_table(slot, sdram, self.target_length)?;
        let tables = self.store_candidate(midpoint, sdram)?;
        self.pool.record_attempt(slot, tables, midpoint, sdram)?;
        Ok(compressed)
    }

    /// Write the candidate tables for `midpoint` into SDRAM.
    ///
    /// On failure every table stored so far is freed again.
    fn store_candidate(&self, midpoint: u32, sdram: &mut Sdram) -> Result<Vec<Address>> {
        if midpoint == 0 {
            return Ok(vec![sdram.clone_table(self.uncompressed)?]);
        }

        let selected = &self.bit_fields[..midpoint as usize];
        let candidate = build_candidate(sdram.table(self.uncompressed)?, selected);
        debug!(
            midpoint,
            refined = candidate.refined.len(),
            entries = candidate.total_entries(),
            "built candidate"
        );

        let mut stored = Vec::with_capacity(1 + candidate.refined.len());
        for table in candidate.tables() {
            match sdram.store_table(table) {
                Ok(address) => stored.push(address),
                Err(err) => {
                    for address in stored {
                        sdram.free(address)?;
                    }
                    return Err(err);
                }
            }
        }
        Ok(stored)
    }

    /// Record a worker's response and free its attempt.
    ///
    /// # Errors
    /// - `Error::UnknownWorker` if `source` is not one of our workers
    /// - `Error::IdleWorker` if that worker has no attempt in flight
    pub fn handle_response(
        &mut self,
        source: CoreId,
        response: Response,
        sdram: &mut Sdram,
    ) -> Result<AttemptRecord> {
        let slot = self
            .pool
            .slot_for_core(source)
            .ok_or(Error::UnknownWorker(source))?;
        let midpoint = self
            .pool
            .slot(slot)?
            .midpoint()
            .ok_or(Error::IdleWorker { slot: slot as u32 })?;

        if response.is_success() && self.best.map_or(true, |(best, _)| midpoint > best) {
            if let Some(address) = self.pool.take_compressed_table(slot)? {
                if let Some((previous, old)) = self.best.replace((midpoint, address)) {
                    debug!(previous, midpoint, "dropping superseded table");
                    sdram.free(old)?;
                }
            }
        }
        if response.code == ResponseCode::FailedMalloc {
            self.allocation_failures += 1;
        }

        self.pool.release(slot, sdram)?;
        Ok(self.conclude(midpoint, response.code, response.length))
    }

    fn conclude(&mut self, midpoint: u32, code: ResponseCode, length: u32) -> AttemptRecord {
        let record = AttemptRecord {
            midpoint,
            code,
            length,
        };
        self.search.record(midpoint, record.is_success());
        self.attempts.push(record);

        if self.search.is_converged() {
            info!(
                best = ?self.search.outcome(),
                attempts = self.attempts.len(),
                "search converged"
            );
        }
        record
    }

    /// Collect the outcome and free every buffer the coordinator still owns.
    ///
    /// The uncompressed table is left alone; it belongs to whoever stored it.
    pub fn finish(&mut self, sdram: &mut Sdram) -> Result<Outcome> {
        self.pool.free_all(sdram)?;

        let best_midpoint = self.search.outcome();
        let table = match self.best.take() {
            Some((midpoint, address)) => {
                let table = sdram.table(address)?.clone();
                sdram.free(address)?;
                (best_midpoint == Some(midpoint)).then_some(table)
            }
            None => None,
        };

        Ok(Outcome {
            best_midpoint,
            table,
            attempts: std::mem::take(&mut self.attempts),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keymask::{KeyMask, RoutingEntry};
    use crate::link::LinkConfig;
    use crate::message::Message;

    const COORDINATOR: CoreId = 1;

    fn setup(n_workers: u32, n_bit_fields: u32, sdram_words: usize) -> (Sdram, Link, Coordinator) {
        let mut sdram = Sdram::new(sdram_words);
        let table = RoutingTable::from_entries(
            (0..n_bit_fields)
                .map(|i| RoutingEntry::new(i << 3, 0xFFFF_FFF8, 0b11, i))
                .collect(),
        );
        let uncompressed = sdram.store_table(&table).unwrap();
        let bit_fields = (0..n_bit_fields)
            .map(|i| {
                BitField::new(i, KeyMask::new(i << 3, 0xFFFF_FFF8), 1, 8, vec![0x0F], i).unwrap()
            })
            .collect();
        let workers: Vec<_> = (0..n_workers)
            .map(|i| (i + 2, sdram.alloc_table(64).unwrap()))
            .collect();
        let coordinator = Coordinator::new(
            COORDINATOR,
            4,
            256,
            uncompressed,
            bit_fields,
            WorkerPool::new(workers),
        )
        .unwrap();
        (sdram, Link::new(LinkConfig::perfect(7)), coordinator)
    }

    fn respond(coordinator: &mut Coordinator, sdram: &mut Sdram, core: CoreId, ok: bool) {
        let response = Response {
            code: if ok {
                ResponseCode::SuccessfulCompression
            } else {
                ResponseCode::FailedToCompress
            },
            length: 3,
        };
        coordinator.handle_response(core, response, sdram).unwrap();
    }

    #[test]
    fn test_bit_fields_sorted_by_priority() {
        let (_, _, coordinator) = setup(1, 3, 100_000);
        let ids: Vec<_> = coordinator.bit_fields().iter().map(|bf| bf.id).collect();
        assert_eq!(ids, vec![2, 1, 0]);
    }

    #[test]
    fn test_baseline_ships_one_clone() {
        let (mut sdram, mut link, mut coordinator) = setup(1, 4, 100_000);

        assert_eq!(coordinator.dispatch_ready(&mut sdram, &mut link).unwrap(), 1);

        let slot = &coordinator.pool().slots()[0];
        assert_eq!(slot.midpoint(), Some(0));
        assert_eq!(slot.tables().len(), 1);
        let packet = link.recv(2).unwrap();
        match Message::deserialize(&packet.payload).unwrap() {
            Message::Start(start) => {
                assert_eq!(start.total_tables, 1);
                assert_eq!(start.tables, slot.tables());
                assert_eq!(start.scratch_region, slot.scratch_region());
            }
            other => panic!("expected start fragment, got {other:?}"),
        }
    }

    #[test]
    fn test_dispatch_fills_every_idle_worker() {
        let (mut sdram, mut link, mut coordinator) = setup(3, 8, 100_000);

        assert_eq!(coordinator.dispatch_ready(&mut sdram, &mut link).unwrap(), 3);
        assert_eq!(coordinator.pool().n_available(), 0);
        let mut midpoints: Vec<_> = coordinator.pool().in_flight().collect();
        midpoints.sort_unstable();
        assert_eq!(midpoints, vec![0, 4, 6]);

        // Nothing idle, nothing more to start
        assert_eq!(coordinator.dispatch_ready(&mut sdram, &mut link).unwrap(), 0);
    }

    #[test]
    fn test_candidate_tables_for_midpoint() {
        let (mut sdram, mut link, mut coordinator) = setup(2, 4, 100_000);
        coordinator.dispatch_ready(&mut sdram, &mut link).unwrap();

        // Midpoint 2 refines two entries: base plus two atom tables
        let slot = &coordinator.pool().slots()[1];
        assert_eq!(slot.midpoint(), Some(2));
        assert_eq!(slot.tables().len(), 3);
        assert_eq!(sdram.table(slot.tables()[0]).unwrap().len(), 2);
        assert_eq!(sdram.table(slot.tables()[1]).unwrap().len(), 8);
    }

    #[test]
    fn test_result_narrows_and_releases() {
        let (mut sdram, mut link, mut coordinator) = setup(1, 8, 100_000);
        coordinator.dispatch_ready(&mut sdram, &mut link).unwrap();
        let busy_blocks = sdram.live_blocks();

        respond(&mut coordinator, &mut sdram, 2, true);

        assert_eq!(coordinator.search().best_success(), Some(0));
        assert_eq!(coordinator.pool().n_available(), 1);
        // The candidate table is gone; the output buffer moved to the coordinator
        assert_eq!(sdram.live_blocks(), busy_blocks - 1);
        assert_eq!(coordinator.attempts().len(), 1);
    }

    #[test]
    fn test_best_table_survives_later_attempts() {
        let (mut sdram, mut link, mut coordinator) = setup(1, 8, 100_000);

        for fits in [true, true, false, false] {
            coordinator.dispatch_ready(&mut sdram, &mut link).unwrap();
            respond(&mut coordinator, &mut sdram, 2, fits);
        }
        // 0 and 4 fit; 6 and 5 don't
        assert!(coordinator.is_converged());

        let outcome = coordinator.finish(&mut sdram).unwrap();
        assert_eq!(outcome.best_midpoint, Some(4));
        assert!(outcome.table.is_some());
        assert_eq!(outcome.attempts.len(), 4);
    }

    #[test]
    fn test_allocation_failure_counts_as_failed_midpoint() {
        // Room for the uncompressed table, the scratch region and the
        // baseline, but not for the bigger candidates
        let (mut sdram, mut link, mut coordinator) = setup(1, 8, 33 + 257 + 4 * 4 + 1 + 33);
        coordinator.dispatch_ready(&mut sdram, &mut link).unwrap();
        respond(&mut coordinator, &mut sdram, 2, true);
        let before = sdram.live_blocks();

        coordinator.dispatch_ready(&mut sdram, &mut link).unwrap();

        assert!(coordinator.allocation_failures() > 0);
        assert!(coordinator.is_converged());
        assert_eq!(coordinator.search().outcome(), Some(0));
        // Only the slot's fresh output buffer is left behind
        assert_eq!(sdram.live_blocks(), before + 1);
        assert!(coordinator
            .attempts()
            .iter()
            .skip(1)
            .all(|a| a.code == ResponseCode::FailedMalloc));
    }

    #[test]
    fn test_response_from_unknown_core() {
        let (mut sdram, _, mut coordinator) = setup(1, 2, 100_000);
        let response = Response {
            code: ResponseCode::SuccessfulCompression,
            length: 1,
        };

        assert!(matches!(
            coordinator.handle_response(99, response, &mut sdram),
            Err(Error::UnknownWorker(99))
        ));
        assert!(matches!(
            coordinator.handle_response(2, response, &mut sdram),
            Err(Error::IdleWorker { slot: 0 })
        ));
    }

    #[test]
    fn test_finish_frees_everything_but_uncompressed() {
        let (mut sdram, mut link, mut coordinator) = setup(2, 4, 100_000);
        coordinator.dispatch_ready(&mut sdram, &mut link).unwrap();
        respond(&mut coordinator, &mut sdram, 2, true);
        respond(&mut coordinator, &mut sdram, 3, true);

        coordinator.finish(&mut sdram).unwrap();
        assert_eq!(sdram.live_blocks(), 1);
    }
}
