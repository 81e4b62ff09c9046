//! compressor-sim-core: distributed routing table compression on a simulated
//! many-core machine
//!
//! This library provides the core components of a system that:
//! - Minimises routing tables by sorting on route and merging compatible keymasks
//! - Searches for how many bit-field refinements still fit a target table size
//! - Ships candidate tables to worker cores in bounded fragments with retries
//! - Tracks worker cores and the SDRAM buffers each attempt owns
//!
//! # Architecture
//!
//! The system is designed around clear module boundaries:
//! - `keymask`: Key/mask algebra and routing entries
//! - `table`: Fixed-capacity routing tables
//! - `minimise`: Sort and greedy merge of a table
//! - `bitfield`: Bit-fields and the candidate tables they generate
//! - `message`: Wire format and fragmentation
//! - `link`: Link simulator with seeded rejection
//! - `transport`: Bounded-retry delivery
//! - `reassembly`: Worker-side fragment reassembly
//! - `sdram`: Shared memory arena with explicit ownership
//! - `allocator`: Worker slots and their buffers
//! - `search`: Binary search over bit-field counts
//! - `coordinator`: Drives the search and dispatches attempts
//! - `worker`: Runs one attempt and reports back
//! - `recording`: Diagnostic side channel
//! - `machine`: The event loop tying every core together
//! - `metrics`: Observable system behavior
//!
//! # Design Principles
//!
//! - **No panics**: All errors are structured; fatal ones carry an exit code
//! - **Explicit ownership**: Every SDRAM block has exactly one owner and is freed once
//! - **Deterministic**: Seeded randomness makes runs reproducible
//! - **Observable**: Structured logging plus metrics for understanding behavior

pub mod allocator;
pub mod bitfield;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod keymask;
pub mod link;
pub mod machine;
pub mod message;
pub mod metrics;
pub mod minimise;
pub mod recording;
pub mod reassembly;
pub mod sdram;
pub mod search;
pub mod table;
pub mod transport;
pub mod worker;

// Re-export commonly used types
pub use bitfield::BitField;
pub use config::CompressorConfig;
pub use error::{Error, Result};
pub use keymask::{KeyMask, RoutingEntry};
pub use link::LinkConfig;
pub use machine::{Machine, Outcome};
pub use table::RoutingTable;
