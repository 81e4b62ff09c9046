//! Error types for the compressor-sim system.
//!
//! All operations return structured errors rather than panicking. Errors fall
//! into two groups:
//! - **Fatal**: link exhaustion, allocator misuse, and protocol violations.
//!   There is nothing above a core to escalate to, so the caller halts the
//!   machine with [`Error::exit_code`].
//! - **Recoverable**: SDRAM exhaustion during a compression attempt. The
//!   coordinator turns it into a failed search step instead of propagating it.
//!
//! A table that does not fit its target length is not an error at all; it is
//! an ordinary outcome that steers the search.

use crate::sdram::Address;
use thiserror::Error;

/// Top-level error type for all operations in the system.
#[derive(Debug, Error)]
pub enum Error {
    /// Wire-level message decode or encode failure
    #[error("message error: {0}")]
    Message(#[from] MessageError),

    /// A worker received a fragment stream it cannot make sense of
    #[error("reassembly error: {0}")]
    Reassembly(#[from] ReassemblyError),

    /// SDRAM arena request failed
    #[error("sdram error: {0}")]
    Sdram(#[from] SdramError),

    /// A fragment could not be delivered within the retry budget
    #[error("send to core {dest} failed after {attempts} attempts")]
    TransportExhausted { dest: u32, attempts: u32 },

    /// The coordinator asked for a worker while none was idle
    #[error("no idle worker for midpoint {midpoint}")]
    NoIdleWorker { midpoint: u32 },

    /// A worker slot index or core id that does not exist
    #[error("unknown worker: {0}")]
    UnknownWorker(u32),

    /// A result was recorded for a worker with no attempt in flight
    #[error("worker slot {slot} has no attempt in flight")]
    IdleWorker { slot: u32 },

    /// Nothing was dispatched or delivered, yet the search has not converged
    #[error("search stalled with {in_flight} attempts in flight")]
    Stalled { in_flight: usize },

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// A bit-field that cannot describe its keymask
    #[error("invalid bit-field {id}: {reason}")]
    InvalidBitField { id: u32, reason: String },
}

impl Error {
    /// Whether this error must halt the machine.
    ///
    /// Only SDRAM exhaustion is survivable; everything else signals a broken
    /// link or a logic defect.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Error::Sdram(SdramError::OutOfMemory { .. }))
    }

    /// Process exit code used when halting on this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::TransportExhausted { .. } => 2,
            Error::NoIdleWorker { .. }
            | Error::UnknownWorker(_)
            | Error::IdleWorker { .. }
            | Error::Stalled { .. } => 3,
            Error::Message(_) | Error::Reassembly(_) => 4,
            Error::Sdram(_) => 5,
            Error::Config(_) | Error::InvalidBitField { .. } => 64,
        }
    }
}

/// Message encode/decode errors.
#[derive(Debug, Error)]
pub enum MessageError {
    /// Message is too short to contain its header
    #[error("message too short: need at least {required} bytes, got {actual}")]
    TooShort { required: usize, actual: usize },

    /// Length is not a whole number of words
    #[error("message length {actual} is not a multiple of {word} bytes")]
    Misaligned { actual: usize, word: usize },

    /// Unknown command tag in the first word
    #[error("unknown command {0}")]
    UnknownCommand(u32),

    /// Unknown response code
    #[error("unknown response code {0}")]
    UnknownResponseCode(u32),

    /// A valid command that the receiving core never expects
    #[error("unexpected command {command} at core {core}")]
    Unexpected { command: u32, core: u32 },

    /// Table count in the header doesn't match the payload
    #[error("table count mismatch: header says {expected}, payload holds {actual}")]
    TableCountMismatch { expected: usize, actual: usize },

    /// Encoded message exceeds the fragment payload capacity
    #[error("message size {size} exceeds payload capacity {capacity}")]
    ExceedsCapacity { size: usize, capacity: usize },
}

/// Fragment stream reassembly errors (worker side).
#[derive(Debug, Error)]
pub enum ReassemblyError {
    /// An extra fragment arrived with no start fragment before it
    #[error("extra fragment without a preceding start fragment")]
    ExtraWithoutStart,

    /// A start fragment arrived while another stream was still incomplete
    #[error("start fragment interrupted a stream still missing {missing} fragments")]
    InterruptedStream { missing: u32 },

    /// More fragments arrived than the start fragment announced
    #[error("fragment {received} exceeds announced count {expected}")]
    TooManyFragments { expected: u32, received: u32 },

    /// The table count across fragments doesn't match the start header
    #[error("table count mismatch: expected {expected}, got {actual}")]
    TableCountMismatch { expected: u32, actual: u32 },

    /// A start fragment announced zero fragments
    #[error("start fragment announced an empty stream")]
    EmptyStream,

    /// A response arrived where only dispatch fragments are expected
    #[error("unexpected response message in a dispatch stream")]
    UnexpectedResponse,
}

/// SDRAM arena errors.
#[derive(Debug, Error)]
pub enum SdramError {
    /// Allocation would exceed the arena budget
    #[error("out of sdram: requested {requested} words, {available} available")]
    OutOfMemory { requested: usize, available: usize },

    /// Address does not name a live block
    #[error("no block at {0}")]
    UnknownAddress(Address),

    /// Writing more entries than the block can hold
    #[error("block at {address} holds {capacity} entries, needed {needed}")]
    BlockOverflow {
        address: Address,
        capacity: usize,
        needed: usize,
    },
}

/// Type alias for Result with our Error type
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        let oom = Error::Sdram(SdramError::OutOfMemory {
            requested: 10,
            available: 2,
        });
        assert!(!oom.is_fatal());

        let exhausted = Error::TransportExhausted { dest: 3, attempts: 30 };
        assert!(exhausted.is_fatal());
        assert_eq!(exhausted.exit_code(), 2);

        let no_worker = Error::NoIdleWorker { midpoint: 4 };
        assert!(no_worker.is_fatal());
        assert_eq!(no_worker.exit_code(), 3);
    }

    #[test]
    fn test_display() {
        let err = Error::from(ReassemblyError::TableCountMismatch {
            expected: 7,
            actual: 6,
        });
        assert_eq!(
            err.to_string(),
            "reassembly error: table count mismatch: expected 7, got 6"
        );
    }
}
