//! Configuration for the compressor-sim application.
//!
//! Handles parsing command-line arguments and generating sensible defaults
//! (including randomized defaults that are reproducible with a seed).
//!
//! # Philosophy
//!
//! The tool should work with ZERO arguments, using intelligent defaults.
//! All defaults are printed so runs are reproducible.

use clap::Parser;
use compressor_sim_core::config::DEFAULT_SDRAM_WORDS;
use compressor_sim_core::message::DEFAULT_PAYLOAD_BYTES;
use compressor_sim_core::{CompressorConfig, LinkConfig};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::time::{SystemTime, UNIX_EPOCH};

/// Compress a synthetic routing table on a simulated many-core machine
#[derive(Parser, Debug, Clone)]
#[command(name = "compressor-sim")]
#[command(version, about, long_about = None)]
pub struct Args {
    /// Random seed for determinism (default: time-based)
    #[arg(long)]
    pub seed: Option<u64>,

    /// Entries in the generated routing table (default: random 64-512)
    #[arg(long)]
    pub entries: Option<usize>,

    /// Bit-fields to generate (default: random, up to half the entries)
    #[arg(long)]
    pub bit_fields: Option<usize>,

    /// Worker cores (default: random 1-8)
    #[arg(short, long)]
    pub workers: Option<usize>,

    /// Maximum entries in the compressed table (default: random, at least the table size)
    #[arg(short, long)]
    pub target: Option<usize>,

    /// Bytes of payload per link message
    #[arg(long, default_value_t = DEFAULT_PAYLOAD_BYTES)]
    pub payload: usize,

    /// SDRAM budget in words
    #[arg(long, default_value_t = DEFAULT_SDRAM_WORDS)]
    pub sdram_words: usize,

    /// Probability 0.0-1.0 that the link refuses a send (default: random 0-0.2)
    #[arg(long)]
    pub reject: Option<f64>,

    /// Disable link rejections (same as --reject 0)
    #[arg(long, conflicts_with = "reject")]
    pub perfect_link: bool,

    /// Print resolved configuration
    #[arg(long)]
    pub print_config: bool,

    /// Don't print metrics summary
    #[arg(long)]
    pub no_metrics: bool,

    /// Print metrics as key=value lines
    #[arg(long)]
    pub export_metrics: bool,

    /// Log level (trace, debug, info, warn, error); RUST_LOG takes precedence
    #[arg(short, long, default_value = "info")]
    pub log_level: String,
}

/// Complete configuration for a compression run.
#[derive(Debug, Clone)]
pub struct Config {
    /// Seed for input generation and the link
    pub seed: u64,

    // === Input ===
    /// Entries in the generated table
    pub n_entries: usize,

    /// Bit-fields to generate
    pub n_bit_fields: usize,

    // === Machine ===
    pub compressor: CompressorConfig,

    /// Link simulation config
    pub link: LinkConfig,

    // === Behavior ===
    /// Whether to print detailed config
    pub print_config: bool,

    /// Whether to print detailed metrics summary
    pub print_metrics: bool,

    /// Whether to print metrics in key=value form
    pub export_metrics: bool,
}

impl Config {
    /// Resolve parsed arguments into a full configuration.
    ///
    /// If --seed is provided, uses that seed for all randomness (fully
    /// deterministic); otherwise a time-based seed is used and printed.
    pub fn from_args(args: Args) -> Self {
        let seed = args.seed.unwrap_or_else(|| {
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map_or(0, |d| d.as_millis() as u64)
        });

        // Generate defaults using seed
        let mut rng = ChaCha8Rng::seed_from_u64(seed);

        let n_entries = args.entries.unwrap_or_else(|| rng.gen_range(64..=512));
        let n_bit_fields = args
            .bit_fields
            .unwrap_or_else(|| rng.gen_range(0..=n_entries / 2))
            .min(n_entries);
        let n_workers = args.workers.unwrap_or_else(|| rng.gen_range(1..=8));
        // Never below the table size, so the baseline always fits
        let target_length = args
            .target
            .unwrap_or_else(|| n_entries + rng.gen_range(0..=n_bit_fields * 4));

        let reject_rate = if args.perfect_link {
            0.0
        } else {
            args.reject.unwrap_or_else(|| {
                // Bias toward small rejection rates
                let r: f64 = rng.gen();
                (r * r * 0.2).min(0.2) // 0-20%, biased toward 0
            })
        };

        Config {
            seed,
            n_entries,
            n_bit_fields,
            compressor: CompressorConfig {
                n_workers,
                target_length,
                fragment_payload_bytes: args.payload,
                sdram_capacity_words: args.sdram_words,
            },
            link: LinkConfig::with_reject_rate(reject_rate, seed),
            print_config: args.print_config,
            print_metrics: !args.no_metrics,
            export_metrics: args.export_metrics,
        }
    }

    /// Print the configuration in human-readable form.
    pub fn print(&self) {
        println!("=== Configuration ===");
        println!("Seed: {}", self.seed);
        println!();
        println!("=== Input ===");
        println!("Table entries: {}", self.n_entries);
        println!("Bit-fields: {}", self.n_bit_fields);
        println!();
        println!("=== Machine ===");
        println!("Workers: {}", self.compressor.n_workers);
        println!("Target length: {} entries", self.compressor.target_length);
        println!("Payload: {} bytes", self.compressor.fragment_payload_bytes);
        println!(
            "SDRAM: {} words ({} KiB)",
            self.compressor.sdram_capacity_words,
            self.compressor.sdram_capacity_words * 4 / 1024
        );
        println!();
        println!("=== Link Simulation ===");
        println!("Reject rate: {:.2}%", self.link.reject_rate * 100.0);
        println!();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Args {
        Args::try_parse_from(std::iter::once("compressor-sim").chain(args.iter().copied()))
            .expect("valid arguments")
    }

    #[test]
    fn test_zero_arguments() {
        let config = Config::from_args(parse(&[]));
        assert!(config.compressor.validate().is_ok());
        assert!(config.compressor.target_length >= config.n_entries);
        assert!(config.print_metrics);
    }

    #[test]
    fn test_seed_is_deterministic() {
        let a = Config::from_args(parse(&["--seed", "42"]));
        let b = Config::from_args(parse(&["--seed", "42"]));

        assert_eq!(a.n_entries, b.n_entries);
        assert_eq!(a.n_bit_fields, b.n_bit_fields);
        assert_eq!(a.compressor, b.compressor);
        assert_eq!(a.link.reject_rate, b.link.reject_rate);
    }

    #[test]
    fn test_explicit_values_win() {
        let config = Config::from_args(parse(&[
            "--seed", "1", "--entries", "100", "--bit-fields", "20", "-w", "3", "-t", "90",
            "--perfect-link",
        ]));

        assert_eq!(config.n_entries, 100);
        assert_eq!(config.n_bit_fields, 20);
        assert_eq!(config.compressor.n_workers, 3);
        assert_eq!(config.compressor.target_length, 90);
        assert_eq!(config.link.reject_rate, 0.0);
    }

    #[test]
    fn test_bit_fields_capped_by_entries() {
        let config = Config::from_args(parse(&["--entries", "10", "--bit-fields", "50"]));
        assert_eq!(config.n_bit_fields, 10);
    }

    #[test]
    fn test_conflicting_link_flags() {
        let result = Args::try_parse_from(["compressor-sim", "--reject", "0.1", "--perfect-link"]);
        assert!(result.is_err());
    }
}
