//! Metrics collection and reporting for a compression job.
//!
//! This module provides observable insights into system behavior:
//! - Table sizes before and after compression
//! - Search progress (attempts, successes, failures, allocation failures)
//! - Link-level statistics (fragments, retries, rejections)
//! - Timing information
//!
//! # Design
//!
//! Metrics are collected in a plain struct. The machine fills it in as the
//! job runs; nothing here feeds back into the search.
//!
//! # Thread Safety
//!
//! The `Metrics` struct is NOT thread-safe. The whole machine runs on one
//! event loop, so it never needs to be.

use std::time::{Duration, Instant};

/// Counters and timings for one compression job.
#[derive(Debug, Clone)]
pub struct Metrics {
    // === Timing ===
    /// When the job started
    pub start_time: Instant,

    /// When the search converged (set on completion)
    pub end_time: Option<Instant>,

    // === Tables ===
    /// Entries in the uncompressed table
    pub uncompressed_entries: u64,

    /// Entries in the winning compressed table
    pub compressed_entries: Option<u64>,

    /// Maximum entries allowed
    pub target_length: u64,

    /// Bit-fields available to the search
    pub n_bit_fields: u64,

    /// Bit-fields folded into the winning table
    pub best_midpoint: Option<u32>,

    // === Search ===
    /// Attempts whose result was recorded
    pub attempts: u64,

    /// Attempts that fit the target
    pub attempts_succeeded: u64,

    /// Attempts that did not fit or could not run
    pub attempts_failed: u64,

    /// Attempts lost to SDRAM or scratch exhaustion
    pub allocation_failures: u64,

    // === Link ===
    /// Table addresses shipped to workers
    pub tables_sent: u64,

    /// Dispatch fragments sent by the coordinator
    pub fragments_sent: u64,

    /// Sends refused by the link and retried, all cores
    pub send_retries: u64,

    /// Messages offered to the link, all cores
    pub packets_sent: u64,

    /// Messages refused by the link
    pub packets_rejected: u64,

    // === Recording ===
    /// Diagnostic records the recorder refused
    pub diagnostics_dropped: u64,
}

impl Metrics {
    /// Create new metrics with start time set to now.
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            end_time: None,
            uncompressed_entries: 0,
            compressed_entries: None,
            target_length: 0,
            n_bit_fields: 0,
            best_midpoint: None,
            attempts: 0,
            attempts_succeeded: 0,
            attempts_failed: 0,
            allocation_failures: 0,
            tables_sent: 0,
            fragments_sent: 0,
            send_retries: 0,
            packets_sent: 0,
            packets_rejected: 0,
            diagnostics_dropped: 0,
        }
    }

    /// Mark the job as complete.
    pub fn complete(&mut self) {
        self.end_time = Some(Instant::now());
    }

    /// Get total duration (or current elapsed if not complete).
    pub fn duration(&self) -> Duration {
        match self.end_time {
            Some(end) => end.duration_since(self.start_time),
            None => self.start_time.elapsed(),
        }
    }

    /// Compute compression ratio (compressed / uncompressed entries).
    ///
    /// Returns 0.0 if there is no compressed table.
    pub fn compression_ratio(&self) -> f64 {
        match self.compressed_entries {
            Some(compressed) if self.uncompressed_entries > 0 => {
                compressed as f64 / self.uncompressed_entries as f64
            }
            _ => 0.0,
        }
    }

    /// Compute send retry rate (retries / messages offered).
    pub fn retry_rate(&self) -> f64 {
        if self.packets_sent == 0 {
            0.0
        } else {
            self.send_retries as f64 / self.packets_sent as f64
        }
    }

    /// Compute attempt success rate.
    pub fn success_rate(&self) -> f64 {
        if self.attempts == 0 {
            0.0
        } else {
            self.attempts_succeeded as f64 / self.attempts as f64
        }
    }

    /// Whether a table within the target was found.
    pub fn is_success(&self) -> bool {
        self.best_midpoint.is_some()
    }

    /// Print a human-readable summary to stdout.
    pub fn print_summary(&self) {
        println!("\n=== Compression Summary ===");
        println!("Duration: {} ms", self.duration().as_millis());
        println!();

        println!("=== Tables ===");
        println!("Uncompressed: {} entries", self.uncompressed_entries);
        match self.compressed_entries {
            Some(entries) => println!(
                "Compressed:   {} entries ({:.1}% of input)",
                entries,
                self.compression_ratio() * 100.0
            ),
            None => println!("Compressed:   none"),
        }
        println!("Target:       {} entries", self.target_length);
        println!();

        println!("=== Search ===");
        println!("Bit-fields: {}", self.n_bit_fields);
        match self.best_midpoint {
            Some(midpoint) => println!("Best midpoint: {midpoint}"),
            None => println!("Best midpoint: none"),
        }
        println!(
            "Attempts: {} ({} succeeded, {} failed, {:.1}% success)",
            self.attempts,
            self.attempts_succeeded,
            self.attempts_failed,
            self.success_rate() * 100.0
        );
        println!("Allocation failures: {}", self.allocation_failures);
        println!();

        println!("=== Link ===");
        println!("Tables shipped: {}", self.tables_sent);
        println!("Fragments sent: {}", self.fragments_sent);
        println!("Messages offered: {}", self.packets_sent);
        println!(
            "Messages refused: {} ({:.2}%)",
            self.packets_rejected,
            self.retry_rate() * 100.0
        );
        println!("Diagnostics dropped: {}", self.diagnostics_dropped);
        println!();
    }

    /// Print just the final result (pass/fail).
    pub fn print_result(&self) {
        match (self.best_midpoint, self.compressed_entries) {
            (Some(midpoint), Some(entries)) => {
                println!("✓ Compression succeeded");
                println!(
                    "  {} -> {} entries with {} of {} bit-fields in {} ms",
                    self.uncompressed_entries,
                    entries,
                    midpoint,
                    self.n_bit_fields,
                    self.duration().as_millis()
                );
            }
            _ => println!(
                "✗ Compression failed: table cannot fit {} entries",
                self.target_length
            ),
        }
    }

    /// Export metrics as a simple text format (for parsing/testing).
    pub fn export_text(&self) -> String {
        let optional = |value: Option<u64>| value.map_or_else(|| "none".to_string(), |v| v.to_string());
        format!(
            "duration_ms={}\n\
             uncompressed_entries={}\n\
             compressed_entries={}\n\
             target_length={}\n\
             compression_ratio={:.4}\n\
             n_bit_fields={}\n\
             best_midpoint={}\n\
             attempts={}\n\
             attempts_succeeded={}\n\
             attempts_failed={}\n\
             allocation_failures={}\n\
             fragments_sent={}\n\
             send_retries={}\n\
             retry_rate={:.4}\n",
            self.duration().as_millis(),
            self.uncompressed_entries,
            optional(self.compressed_entries),
            self.target_length,
            self.compression_ratio(),
            self.n_bit_fields,
            optional(self.best_midpoint.map(u64::from)),
            self.attempts,
            self.attempts_succeeded,
            self.attempts_failed,
            self.allocation_failures,
            self.fragments_sent,
            self.send_retries,
            self.retry_rate(),
        )
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_creation() {
        let metrics = Metrics::new();
        assert!(metrics.end_time.is_none());
        assert!(!metrics.is_success());
        assert!(metrics.duration().as_millis() < 100); // Should be recent
    }

    #[test]
    fn test_compression_ratio() {
        let mut metrics = Metrics::new();
        metrics.uncompressed_entries = 1000;
        assert_eq!(metrics.compression_ratio(), 0.0);

        metrics.compressed_entries = Some(750);
        assert_eq!(metrics.compression_ratio(), 0.75);
    }

    #[test]
    fn test_retry_rate() {
        let mut metrics = Metrics::new();
        metrics.packets_sent = 100;
        metrics.send_retries = 5;

        assert_eq!(metrics.retry_rate(), 0.05);
    }

    #[test]
    fn test_success_rate() {
        let mut metrics = Metrics::new();
        metrics.attempts = 4;
        metrics.attempts_succeeded = 3;
        metrics.attempts_failed = 1;

        assert_eq!(metrics.success_rate(), 0.75);
    }

    #[test]
    fn test_export_text() {
        let mut metrics = Metrics::new();
        metrics.uncompressed_entries = 1000;
        metrics.compressed_entries = Some(900);
        metrics.best_midpoint = Some(6);
        metrics.attempts = 5;

        let text = metrics.export_text();
        assert!(text.contains("uncompressed_entries=1000"));
        assert!(text.contains("compressed_entries=900"));
        assert!(text.contains("best_midpoint=6"));
        assert!(text.contains("attempts=5"));
    }

    #[test]
    fn test_export_text_on_failure() {
        let metrics = Metrics::new();
        let text = metrics.export_text();
        assert!(text.contains("compressed_entries=none"));
        assert!(text.contains("best_midpoint=none"));
    }
}
