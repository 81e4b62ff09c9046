//! Simulated point-to-point link between cores.
//!
//! The fabric never reorders messages between two cores, but a send can be
//! refused when the receiving side is busy. This simulator models exactly
//! that: every destination has a FIFO queue, and each send is rejected with a
//! configurable probability. A rejected send leaves no trace on the receiver;
//! retrying is the sender's job (see [`crate::transport`]).
//!
//! # Determinism
//!
//! All randomness comes from a seeded ChaCha8 RNG. Given the same seed and
//! inputs, the pattern of rejections is identical.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::collections::{HashMap, VecDeque};

/// Identifier of a core on the chip.
pub type CoreId = u32;

/// Configuration for link simulation.
#[derive(Debug, Clone, Copy)]
pub struct LinkConfig {
    /// Probability [0.0, 1.0] that a send is refused
    pub reject_rate: f64,

    /// Random seed for determinism
    pub seed: u64,
}

impl LinkConfig {
    /// A link that accepts every send.
    pub fn perfect(seed: u64) -> Self {
        Self {
            reject_rate: 0.0,
            seed,
        }
    }

    /// A link refusing sends with the given probability.
    pub fn with_reject_rate(reject_rate: f64, seed: u64) -> Self {
        Self { reject_rate, seed }
    }
}

/// A message in transit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub source: CoreId,
    pub dest: CoreId,
    pub payload: Vec<u8>,
}

/// Link simulator with per-destination in-order delivery.
///
/// # Thread Safety
/// Not thread-safe. The whole machine runs on one event loop.
pub struct Link {
    config: LinkConfig,
    rng: ChaCha8Rng,
    queues: HashMap<CoreId, VecDeque<Packet>>,

    // Statistics
    packets_sent: u64,
    packets_rejected: u64,
    packets_delivered: u64,
}

impl Link {
    /// Create a new link with the given configuration.
    pub fn new(config: LinkConfig) -> Self {
        let rng = ChaCha8Rng::seed_from_u64(config.seed);

        Self {
            config,
            rng,
            queues: HashMap::new(),
            packets_sent: 0,
            packets_rejected: 0,
            packets_delivered: 0,
        }
    }

    /// Offer a packet to the link.
    ///
    /// # Returns
    /// `true` if the packet was queued for its destination, `false` if it was
    /// refused. A refused packet is dropped.
    pub fn send(&mut self, packet: Packet) -> bool {
        self.packets_sent += 1;

        if self.config.reject_rate > 0.0 {
            let roll: f64 = self.rng.gen();
            if roll < self.config.reject_rate {
                self.packets_rejected += 1;
                return false;
            }
        }

        self.queues.entry(packet.dest).or_default().push_back(packet);
        true
    }

    /// Take the oldest packet queued for `dest`, if any.
    pub fn recv(&mut self, dest: CoreId) -> Option<Packet> {
        let packet = self.queues.get_mut(&dest)?.pop_front()?;
        self.packets_delivered += 1;
        Some(packet)
    }

    /// Check if any packets are queued for `dest`.
    pub fn has_pending(&self, dest: CoreId) -> bool {
        self.queues.get(&dest).is_some_and(|q| !q.is_empty())
    }

    /// Get count of packets queued for all destinations.
    pub fn pending_count(&self) -> usize {
        self.queues.values().map(VecDeque::len).sum()
    }

    /// Take every packet queued for `dest`, in order.
    pub fn drain(&mut self, dest: CoreId) -> Vec<Packet> {
        let packets: Vec<Packet> = self
            .queues
            .get_mut(&dest)
            .map(|q| q.drain(..).collect())
            .unwrap_or_default();
        self.packets_delivered += packets.len() as u64;
        packets
    }

    /// Get statistics about link behavior.
    pub fn stats(&self) -> LinkStats {
        LinkStats {
            packets_sent: self.packets_sent,
            packets_rejected: self.packets_rejected,
            packets_delivered: self.packets_delivered,
            packets_in_flight: self.pending_count(),
        }
    }
}

/// Statistics about link simulator behavior.
#[derive(Debug, Clone, Copy)]
pub struct LinkStats {
    /// Total send attempts offered to the link
    pub packets_sent: u64,

    /// Sends refused
    pub packets_rejected: u64,

    /// Packets taken off a queue by their destination
    pub packets_delivered: u64,

    /// Packets currently queued
    pub packets_in_flight: usize,
}

impl LinkStats {
    /// Compute rejection rate (rejected / sent).
    pub fn rejection_rate(&self) -> f64 {
        if self.packets_sent == 0 {
            0.0
        } else {
            self.packets_rejected as f64 / self.packets_sent as f64
        }
    }

    /// Compute delivery rate (delivered / sent).
    pub fn delivery_rate(&self) -> f64 {
        if self.packets_sent == 0 {
            0.0
        } else {
            self.packets_delivered as f64 / self.packets_sent as f64
        }
    }
}
