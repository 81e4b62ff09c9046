//! Worker-side reassembly of dispatch streams.
//!
//! A worker receives one start fragment followed by `n_fragments - 1` extra
//! fragments, in order, and turns them back into a single
//! [`CompressionRequest`]. The coordinator never has more than one attempt in
//! flight per worker, so an assembler tracks at most one stream.
//!
//! # Design
//!
//! - **Single stream**: a new start fragment while a stream is incomplete is
//!   a protocol violation, not a restart
//! - **Strict counting**: fragment and table counts announced by the start
//!   fragment must be met exactly
//! - **No timeouts**: the link never drops an accepted message, so a stream
//!   that stalls means the sender has halted
//!
//! # Thread Safety
//!
//! This structure is NOT thread-safe. Each worker owns its own assembler.

use crate::error::{ReassemblyError, Result};
use crate::message::{ExtraFragment, Message, StartFragment};
use crate::sdram::Address;

/// Everything a worker needs to run one compression attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompressionRequest {
    /// Where a successful result is written
    pub compressed_table: Address,
    /// Working space for the combined table
    pub scratch_region: Address,
    /// Tables to combine, in order
    pub tables: Vec<Address>,
}

/// State for the stream being reassembled.
#[derive(Debug)]
struct StreamState {
    /// Fragments announced by the start fragment
    n_fragments: u32,

    /// Fragments received so far, start included
    received: u32,

    /// Tables announced by the start fragment
    total_tables: u32,

    compressed_table: Address,
    scratch_region: Address,
    tables: Vec<Address>,
}

impl StreamState {
    /// Create stream state when the start fragment arrives.
    fn new(start: StartFragment) -> Result<Self> {
        if start.n_fragments == 0 {
            return Err(ReassemblyError::EmptyStream.into());
        }

        let mut tables = Vec::with_capacity(start.total_tables as usize);
        tables.extend_from_slice(&start.tables);

        let state = Self {
            n_fragments: start.n_fragments,
            received: 1,
            total_tables: start.total_tables,
            compressed_table: start.compressed_table,
            scratch_region: start.scratch_region,
            tables,
        };
        state.check_table_count()?;
        Ok(state)
    }

    /// Append an extra fragment.
    fn insert_extra(&mut self, extra: ExtraFragment) -> Result<()> {
        if self.received >= self.n_fragments {
            return Err(ReassemblyError::TooManyFragments {
                expected: self.n_fragments,
                received: self.received + 1,
            }
            .into());
        }
        self.received += 1;
        self.tables.extend_from_slice(&extra.tables);
        self.check_table_count()
    }

    /// Tables must never exceed the announced total.
    fn check_table_count(&self) -> Result<()> {
        if self.tables.len() > self.total_tables as usize {
            return Err(ReassemblyError::TableCountMismatch {
                expected: self.total_tables,
                actual: self.tables.len() as u32,
            }
            .into());
        }
        Ok(())
    }

    fn is_complete(&self) -> bool {
        self.received == self.n_fragments
    }

    /// Number of missing fragments.
    fn missing_count(&self) -> u32 {
        self.n_fragments - self.received
    }

    /// Finish the stream, validating the final table count.
    fn into_request(self) -> Result<CompressionRequest> {
        if self.tables.len() != self.total_tables as usize {
            return Err(ReassemblyError::TableCountMismatch {
                expected: self.total_tables,
                actual: self.tables.len() as u32,
            }
            .into());
        }
        Ok(CompressionRequest {
            compressed_table: self.compressed_table,
            scratch_region: self.scratch_region,
            tables: self.tables,
        })
    }
}

/// Assembler collecting fragments back into compression requests.
#[derive(Debug, Default)]
pub struct MessageAssembler {
    stream: Option<StreamState>,
    streams_completed: u64,
}

impl MessageAssembler {
    /// Create an idle assembler.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert one fragment.
    ///
    /// # Returns
    /// - `Ok(Some(request))` when this fragment completed a stream
    /// - `Ok(None)` when more fragments are needed
    ///
    /// # Errors
    /// - `ReassemblyError::InterruptedStream` for a start fragment mid-stream
    /// - `ReassemblyError::ExtraWithoutStart` for an extra fragment with no stream
    /// - `ReassemblyError::TableCountMismatch` if tables don't add up
    /// - `ReassemblyError::UnexpectedResponse` for a response message
    pub fn insert(&mut self, message: Message) -> Result<Option<CompressionRequest>> {
        match message {
            Message::Start(start) => {
                if let Some(stream) = &self.stream {
                    return Err(ReassemblyError::InterruptedStream {
                        missing: stream.missing_count(),
                    }
                    .into());
                }
                self.stream = Some(StreamState::new(start)?);
            }
            Message::Extra(extra) => {
                let stream = self
                    .stream
                    .as_mut()
                    .ok_or(ReassemblyError::ExtraWithoutStart)?;
                stream.insert_extra(extra)?;
            }
            Message::Response(_) => return Err(ReassemblyError::UnexpectedResponse.into()),
        }

        match self.stream.take() {
            Some(stream) if stream.is_complete() => {
                self.streams_completed += 1;
                stream.into_request().map(Some)
            }
            pending => {
                self.stream = pending;
                Ok(None)
            }
        }
    }

    /// Check if no stream is in progress.
    pub fn is_idle(&self) -> bool {
        self.stream.is_none()
    }

    /// Fragments still expected for the current stream.
    pub fn missing_fragments(&self) -> u32 {
        self.stream.as_ref().map_or(0, StreamState::missing_count)
    }

    /// Streams completed since creation.
    pub fn streams_completed(&self) -> u64 {
        self.streams_completed
    }
}
