//! A worker core: reassembles a dispatch, minimises, and reports back.
//!
//! The worker copies every table of the request into its scratch region, in
//! the order the addresses arrived, minimises the combined table in place and
//! on success copies the result into the compressed-table buffer. It never
//! allocates or frees SDRAM itself; all buffers belong to the coordinator.

use crate::error::{Error, Result, SdramError};
use crate::link::{CoreId, Link, Packet};
use crate::message::{Message, Response, ResponseCode};
use crate::minimise::minimise_table;
use crate::reassembly::{CompressionRequest, MessageAssembler};
use crate::sdram::Sdram;
use crate::transport::Transport;
use tracing::{debug, info, warn};

/// One worker core.
#[derive(Debug)]
pub struct Worker {
    core_id: CoreId,
    coordinator: CoreId,
    target_length: usize,
    assembler: MessageAssembler,
    transport: Transport,
    attempts: u64,
}

impl Worker {
    pub fn new(
        core_id: CoreId,
        coordinator: CoreId,
        target_length: usize,
        payload_bytes: usize,
    ) -> Result<Self> {
        Ok(Self {
            core_id,
            coordinator,
            target_length,
            assembler: MessageAssembler::new(),
            transport: Transport::new(core_id, payload_bytes)?,
            attempts: 0,
        })
    }

    pub fn core_id(&self) -> CoreId {
        self.core_id
    }

    pub fn transport(&self) -> &Transport {
        &self.transport
    }

    /// Attempts run to completion.
    pub fn attempts(&self) -> u64 {
        self.attempts
    }

    pub fn is_idle(&self) -> bool {
        self.assembler.is_idle()
    }

    /// Handle one packet addressed to this core.
    ///
    /// # Returns
    /// The response sent back, if this packet completed a request.
    ///
    /// # Errors
    /// Malformed or out-of-order fragments and a failed response send are
    /// fatal.
    pub fn on_packet(
        &mut self,
        packet: Packet,
        sdram: &mut Sdram,
        link: &mut Link,
    ) -> Result<Option<Response>> {
        let message = Message::deserialize(&packet.payload)?;
        let Some(request) = self.assembler.insert(message)? else {
            return Ok(None);
        };

        let response = self.compress(&request, sdram)?;
        self.attempts += 1;
        self.transport
            .send(link, self.coordinator, &Message::Response(response))?;
        Ok(Some(response))
    }

    /// Run one compression attempt.
    pub fn compress(&self, request: &CompressionRequest, sdram: &mut Sdram) -> Result<Response> {
        let mut entries = Vec::new();
        for &address in &request.tables {
            entries.extend_from_slice(sdram.table(address)?.entries());
        }

        let scratch = sdram.table_mut(request.scratch_region)?;
        scratch.clear();
        if !scratch.extend_from_slice(&entries) {
            warn!(
                core = self.core_id,
                entries = entries.len(),
                capacity = scratch.capacity(),
                "candidate does not fit the scratch region"
            );
            return Ok(Response {
                code: ResponseCode::FailedMalloc,
                length: 0,
            });
        }

        let outcome = minimise_table(scratch, self.target_length);
        let length = outcome.length as u32;
        if !outcome.success {
            debug!(core = self.core_id, length, "table too long");
            return Ok(Response {
                code: ResponseCode::FailedToCompress,
                length,
            });
        }

        let result = scratch.clone();
        match sdram.write_table(request.compressed_table, &result) {
            Ok(()) => {}
            Err(Error::Sdram(SdramError::BlockOverflow { capacity, .. })) => {
                warn!(core = self.core_id, length, capacity, "output buffer too small");
                return Ok(Response {
                    code: ResponseCode::FailedMalloc,
                    length,
                });
            }
            Err(err) => return Err(err),
        }

        info!(
            core = self.core_id,
            input = entries.len(),
            length,
            merges = outcome.merges,
            "compressed"
        );
        Ok(Response {
            code: ResponseCode::SuccessfulCompression,
            length,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keymask::RoutingEntry;
    use crate::link::LinkConfig;
    use crate::sdram::Address;
    use crate::table::RoutingTable;

    const WORKER: CoreId = 2;
    const COORDINATOR: CoreId = 1;

    fn store(sdram: &mut Sdram, entries: &[(u32, u32, u32)]) -> Address {
        let table = RoutingTable::from_entries(
            entries
                .iter()
                .map(|&(key, mask, route)| RoutingEntry::new(key, mask, route, 0))
                .collect(),
        );
        sdram.store_table(&table).unwrap()
    }

    fn request(sdram: &mut Sdram, scratch: usize, target: usize, tables: Vec<Address>) -> CompressionRequest {
        CompressionRequest {
            compressed_table: sdram.alloc_table(target).unwrap(),
            scratch_region: sdram.alloc_table(scratch).unwrap(),
            tables,
        }
    }

    #[test]
    fn test_compress_success_writes_output() {
        let mut sdram = Sdram::new(10_000);
        let a = store(&mut sdram, &[(0b00, 0b11, 1)]);
        let b = store(&mut sdram, &[(0b01, 0b11, 1)]);
        let request = request(&mut sdram, 4, 1, vec![a, b]);
        let worker = Worker::new(WORKER, COORDINATOR, 1, 256).unwrap();

        let response = worker.compress(&request, &mut sdram).unwrap();

        assert!(response.is_success());
        assert_eq!(response.length, 1);
        let output = sdram.table(request.compressed_table).unwrap();
        assert_eq!(output.entries(), &[RoutingEntry::new(0b00, 0b10, 1, 0)]);
        // Inputs are untouched
        assert_eq!(sdram.table(a).unwrap().len(), 1);
    }

    #[test]
    fn test_compress_too_long() {
        let mut sdram = Sdram::new(10_000);
        let a = store(&mut sdram, &[(0b00, 0b11, 1), (0b11, 0b11, 1), (0b10, 0b11, 2)]);
        let request = request(&mut sdram, 4, 1, vec![a]);
        let worker = Worker::new(WORKER, COORDINATOR, 1, 256).unwrap();

        let response = worker.compress(&request, &mut sdram).unwrap();

        assert_eq!(response.code, ResponseCode::FailedToCompress);
        assert_eq!(response.length, 3);
        assert!(sdram.table(request.compressed_table).unwrap().is_empty());
    }

    #[test]
    fn test_scratch_too_small() {
        let mut sdram = Sdram::new(10_000);
        let a = store(&mut sdram, &[(0, 0xFF, 1), (1, 0xFF, 2), (2, 0xFF, 3)]);
        let request = request(&mut sdram, 2, 8, vec![a]);
        let worker = Worker::new(WORKER, COORDINATOR, 8, 256).unwrap();

        let response = worker.compress(&request, &mut sdram).unwrap();
        assert_eq!(response.code, ResponseCode::FailedMalloc);
    }

    #[test]
    fn test_unknown_table_is_fatal() {
        let mut sdram = Sdram::new(10_000);
        let request = request(&mut sdram, 2, 2, vec![Address(0x1234)]);
        let worker = Worker::new(WORKER, COORDINATOR, 2, 256).unwrap();

        let err = worker.compress(&request, &mut sdram).unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn test_on_packet_replies_to_coordinator() {
        let mut sdram = Sdram::new(10_000);
        let mut link = Link::new(LinkConfig::perfect(11));
        let a = store(&mut sdram, &[(0b00, 0b11, 1), (0b01, 0b11, 1)]);
        let request = request(&mut sdram, 4, 2, vec![a]);
        let mut sender = Transport::new(COORDINATOR, 256).unwrap();
        sender
            .dispatch(
                &mut link,
                WORKER,
                &request.tables,
                request.compressed_table,
                request.scratch_region,
            )
            .unwrap();

        let mut worker = Worker::new(WORKER, COORDINATOR, 2, 256).unwrap();
        let packet = link.recv(WORKER).unwrap();
        let response = worker.on_packet(packet, &mut sdram, &mut link).unwrap();

        assert_eq!(
            response,
            Some(Response {
                code: ResponseCode::SuccessfulCompression,
                length: 1
            })
        );
        assert!(worker.is_idle());
        assert_eq!(worker.attempts(), 1);

        let reply = link.recv(COORDINATOR).unwrap();
        assert_eq!(reply.source, WORKER);
        assert_eq!(
            Message::deserialize(&reply.payload).unwrap(),
            Message::Response(response.unwrap())
        );
    }

    #[test]
    fn test_garbage_packet_is_fatal() {
        let mut sdram = Sdram::new(100);
        let mut link = Link::new(LinkConfig::perfect(1));
        let mut worker = Worker::new(WORKER, COORDINATOR, 2, 256).unwrap();
        let packet = Packet {
            source: COORDINATOR,
            dest: WORKER,
            payload: vec![99, 0, 0, 0],
        };

        let err = worker.on_packet(packet, &mut sdram, &mut link).unwrap_err();
        assert!(matches!(err, Error::Message(_)));
        assert_eq!(err.exit_code(), 4);
    }
}
