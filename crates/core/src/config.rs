//! Plain configuration values handed to the machine at boot.

use crate::error::{Error, Result};
use crate::message::{FragmentCapacity, DEFAULT_PAYLOAD_BYTES};

/// Default SDRAM budget in words (32 MiB).
pub const DEFAULT_SDRAM_WORDS: usize = 8 * 1024 * 1024;

/// Entries a hardware router table can hold.
pub const DEFAULT_TARGET_LENGTH: usize = 1023;

/// Knobs for one compression job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompressorConfig {
    /// Worker cores available for attempts
    pub n_workers: usize,

    /// Maximum entries the compressed table may have
    pub target_length: usize,

    /// Bytes of payload per link message
    pub fragment_payload_bytes: usize,

    /// SDRAM budget shared by every core
    pub sdram_capacity_words: usize,
}

impl Default for CompressorConfig {
    fn default() -> Self {
        Self {
            n_workers: 4,
            target_length: DEFAULT_TARGET_LENGTH,
            fragment_payload_bytes: DEFAULT_PAYLOAD_BYTES,
            sdram_capacity_words: DEFAULT_SDRAM_WORDS,
        }
    }
}

impl CompressorConfig {
    /// Check the configuration is usable.
    ///
    /// # Errors
    /// `Error::Config` naming the first bad value.
    pub fn validate(&self) -> Result<()> {
        if self.n_workers == 0 {
            return Err(Error::Config("at least one worker is required".into()));
        }
        if self.target_length == 0 {
            return Err(Error::Config("target length must be positive".into()));
        }
        FragmentCapacity::from_payload_bytes(self.fragment_payload_bytes).map_err(|_| {
            Error::Config(format!(
                "payload of {} bytes cannot carry a table address",
                self.fragment_payload_bytes
            ))
        })?;
        if self.sdram_capacity_words == 0 {
            return Err(Error::Config("sdram capacity must be positive".into()));
        }
        Ok(())
    }
}
