//! compressor-sim: compress a seeded routing table on a simulated machine.
//!
//! Generates a table and bit-fields, boots the coordinator and workers, runs
//! the search to convergence and prints what happened.

mod config;
mod input_gen;

use anyhow::{Context, Result};
use clap::Parser;
use compressor_sim_core::{Error, Machine};
use config::{Args, Config};
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

fn main() {
    let args = Args::parse();

    if let Err(err) = init_logging(&args.log_level) {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }

    match run(args) {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(err) => {
            error!("{err:#}");
            let code = err.downcast_ref::<Error>().map_or(1, Error::exit_code);
            std::process::exit(code);
        }
    }
}

/// Run one compression job. Returns whether a table within target was found.
fn run(args: Args) -> Result<bool> {
    let config = Config::from_args(args);
    if config.print_config {
        config.print();
    }
    info!(
        seed = config.seed,
        entries = config.n_entries,
        bit_fields = config.n_bit_fields,
        workers = config.compressor.n_workers,
        target = config.compressor.target_length,
        "starting compression job"
    );

    let table = input_gen::generate_table(config.seed, config.n_entries);
    let bit_fields = input_gen::generate_bit_fields(config.seed, &table, config.n_bit_fields)
        .context("failed to generate bit-fields")?;

    let mut machine = Machine::new(&config.compressor, config.link, &table, bit_fields)
        .context("failed to boot machine")?;
    let outcome = machine.run().context("compression job halted")?;

    let metrics = machine.metrics();
    if config.print_metrics {
        metrics.print_summary();
    }
    metrics.print_result();
    if config.export_metrics {
        print!("{}", metrics.export_text());
    }

    Ok(outcome.is_success())
}

/// Initialize the tracing subscriber; `RUST_LOG` wins over `--log-level`.
fn init_logging(level: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .or_else(|_| EnvFilter::try_new("info"))
        .map_err(|e| anyhow::anyhow!("invalid log level: {}", e))?;

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true))
        .with(filter)
        .init();

    Ok(())
}
