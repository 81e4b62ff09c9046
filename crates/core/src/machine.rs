//! The simulated machine: one coordinator, a pool of workers, shared SDRAM
//! and the link between them.
//!
//! Every core runs handlers to completion, one event at a time. One round of
//! the loop is:
//!
//! 1. The coordinator starts attempts on every idle worker.
//! 2. Each worker handles the fragments queued for it, in order, and answers
//!    once a dispatch is complete.
//! 3. The coordinator handles every queued response.
//!
//! Rounds repeat until the search converges. A round that neither starts nor
//! delivers anything while the search is still open means the machine is
//! wedged, which is reported as [`Error::Stalled`].

use crate::allocator::WorkerPool;
use crate::bitfield::{max_candidate_entries, BitField};
use crate::config::CompressorConfig;
use crate::coordinator::{AttemptRecord, Coordinator};
use crate::error::{Error, MessageError, Result};
use crate::link::{CoreId, Link, LinkConfig, LinkStats, Packet};
use crate::message::Message;
use crate::metrics::Metrics;
use crate::recording::{ChannelRecorder, Recorder};
use crate::sdram::{Address, Sdram};
use crate::table::RoutingTable;
use crate::worker::Worker;
use tracing::{error, info, warn};

pub use crate::coordinator::Outcome;

/// Core running the coordinator.
pub const COORDINATOR_CORE: CoreId = 1;

/// Core of the first worker; the rest follow consecutively.
pub const FIRST_WORKER_CORE: CoreId = 2;

/// Channel receiving one record per attempt result.
pub const DIAGNOSTIC_CHANNEL: usize = 0;

/// Channel receiving the final summary.
pub const SUMMARY_CHANNEL: usize = 1;

const DIAGNOSTIC_CHANNEL_BYTES: usize = 4096;
const SUMMARY_CHANNEL_BYTES: usize = 64;

/// Everything needed to run one compression job.
pub struct Machine {
    sdram: Sdram,
    link: Link,
    coordinator: Coordinator,
    workers: Vec<Worker>,
    recorder: ChannelRecorder,
    metrics: Metrics,
    /// Taken once the job has finished
    uncompressed: Option<Address>,
}

impl Machine {
    /// Boot the machine: store the table, carve out a scratch region per
    /// worker and set up the coordinator.
    ///
    /// Scratch regions are sized for the largest candidate any midpoint can
    /// produce.
    ///
    /// # Errors
    /// `Error::Config` for a bad configuration, or `Error::Sdram` if the
    /// table and scratch regions don't fit the arena.
    pub fn new(
        config: &CompressorConfig,
        link: LinkConfig,
        uncompressed: &RoutingTable,
        bit_fields: Vec<BitField>,
    ) -> Result<Self> {
        config.validate()?;

        let mut sdram = Sdram::new(config.sdram_capacity_words);
        let table_address = sdram.store_table(uncompressed)?;
        let scratch_entries = max_candidate_entries(uncompressed, &bit_fields);

        let mut slots = Vec::with_capacity(config.n_workers);
        let mut workers = Vec::with_capacity(config.n_workers);
        for core_id in (FIRST_WORKER_CORE..).take(config.n_workers) {
            slots.push((core_id, sdram.alloc_table(scratch_entries)?));
            workers.push(Worker::new(
                core_id,
                COORDINATOR_CORE,
                config.target_length,
                config.fragment_payload_bytes,
            )?);
        }

        let mut metrics = Metrics::new();
        metrics.uncompressed_entries = uncompressed.len() as u64;
        metrics.target_length = config.target_length as u64;
        metrics.n_bit_fields = bit_fields.len() as u64;

        let coordinator = Coordinator::new(
            COORDINATOR_CORE,
            config.target_length,
            config.fragment_payload_bytes,
            table_address,
            bit_fields,
            WorkerPool::new(slots),
        )?;

        info!(
            workers = config.n_workers,
            entries = uncompressed.len(),
            scratch_entries,
            sdram_used = sdram.used_words(),
            "machine booted"
        );

        Ok(Self {
            sdram,
            link: Link::new(link),
            coordinator,
            workers,
            recorder: ChannelRecorder::new(&[DIAGNOSTIC_CHANNEL_BYTES, SUMMARY_CHANNEL_BYTES]),
            metrics,
            uncompressed: Some(table_address),
        })
    }

    pub fn sdram(&self) -> &Sdram {
        &self.sdram
    }

    pub fn link_stats(&self) -> LinkStats {
        self.link.stats()
    }

    pub fn coordinator(&self) -> &Coordinator {
        &self.coordinator
    }

    pub fn workers(&self) -> &[Worker] {
        &self.workers
    }

    pub fn recorder(&self) -> &ChannelRecorder {
        &self.recorder
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Run the job to convergence.
    ///
    /// All SDRAM is released on success.
    ///
    /// # Errors
    /// Any fatal error from a core halts the run immediately.
    pub fn run(&mut self) -> Result<Outcome> {
        let Some(uncompressed) = self.uncompressed else {
            return Err(Error::Config("machine has already run".into()));
        };

        let mut rounds = 0u64;
        loop {
            rounds += 1;
            let started = self.coordinator.dispatch_ready(&mut self.sdram, &mut self.link)?;
            let delivered = self.deliver_to_workers()? + self.deliver_to_coordinator()?;

            if self.coordinator.is_converged() {
                break;
            }
            if started == 0 && delivered == 0 {
                let in_flight = self.coordinator.pool().in_flight().count();
                error!(rounds, in_flight, "machine stalled");
                return Err(Error::Stalled { in_flight });
            }
        }

        let outcome = self.coordinator.finish(&mut self.sdram)?;
        self.sdram.free(uncompressed)?;
        self.uncompressed = None;

        self.update_metrics(&outcome);
        self.record_summary(&outcome);
        info!(
            best = ?outcome.best_midpoint,
            attempts = outcome.attempts.len(),
            rounds,
            "compression finished"
        );
        Ok(outcome)
    }

    /// Let each worker handle its queued packets.
    fn deliver_to_workers(&mut self) -> Result<usize> {
        let mut delivered = 0;
        for worker in &mut self.workers {
            while let Some(packet) = self.link.recv(worker.core_id()) {
                delivered += 1;
                worker.on_packet(packet, &mut self.sdram, &mut self.link)?;
            }
        }
        Ok(delivered)
    }

    /// Let the coordinator handle every queued response.
    fn deliver_to_coordinator(&mut self) -> Result<usize> {
        let mut delivered = 0;
        while let Some(packet) = self.link.recv(COORDINATOR_CORE) {
            delivered += 1;
            let record = self.on_response(packet)?;
            self.record_attempt(&record);
        }
        Ok(delivered)
    }

    fn on_response(&mut self, packet: Packet) -> Result<AttemptRecord> {
        match Message::deserialize(&packet.payload)? {
            Message::Response(response) => {
                self.coordinator
                    .handle_response(packet.source, response, &mut self.sdram)
            }
            other => Err(MessageError::Unexpected {
                command: other.command() as u32,
                core: COORDINATOR_CORE,
            }
            .into()),
        }
    }

    /// Log one attempt on the diagnostic channel.
    fn record_attempt(&mut self, record: &AttemptRecord) {
        let mut data = Vec::with_capacity(12);
        for word in [record.midpoint, u32::from(record.is_success()), record.length] {
            data.extend_from_slice(&word.to_le_bytes());
        }
        if !self.recorder.record(DIAGNOSTIC_CHANNEL, &data) {
            self.metrics.diagnostics_dropped += 1;
        }
    }

    /// Write the final summary and close the recorder.
    fn record_summary(&mut self, outcome: &Outcome) {
        let mut data = Vec::with_capacity(12);
        let best = outcome.best_midpoint.unwrap_or(u32::MAX);
        let length = outcome.table.as_ref().map_or(0, |t| t.len() as u32);
        for word in [best, outcome.attempts.len() as u32, length] {
            data.extend_from_slice(&word.to_le_bytes());
        }

        let committed = self.recorder.record_and_notify(
            SUMMARY_CHANNEL,
            &data,
            Box::new(|| info!(channel = SUMMARY_CHANNEL, "summary recorded")),
        );
        if !committed {
            warn!("summary could not be recorded");
            self.metrics.diagnostics_dropped += 1;
        }
        self.recorder.finalise();
    }

    fn update_metrics(&mut self, outcome: &Outcome) {
        let metrics = &mut self.metrics;
        metrics.best_midpoint = outcome.best_midpoint;
        metrics.compressed_entries = outcome.table.as_ref().map(|t| t.len() as u64);
        metrics.attempts = outcome.attempts.len() as u64;
        metrics.attempts_succeeded = outcome.attempts.iter().filter(|a| a.is_success()).count() as u64;
        metrics.attempts_failed = metrics.attempts - metrics.attempts_succeeded;
        metrics.allocation_failures = self.coordinator.allocation_failures();
        metrics.tables_sent = self.coordinator.tables_sent();
        metrics.fragments_sent = self.coordinator.fragments_sent();
        metrics.send_retries = self.coordinator.transport().retries()
            + self.workers.iter().map(|w| w.transport().retries()).sum::<u64>();

        let link = self.link.stats();
        metrics.packets_sent = link.packets_sent;
        metrics.packets_rejected = link.packets_rejected;
        metrics.complete();
    }
}
