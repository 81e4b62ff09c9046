//! Bounded-retry delivery of messages over the link.
//!
//! Each message is offered to the link until it is accepted, up to
//! [`MAX_SEND_ATTEMPTS`] times back to back. Running out of attempts is fatal:
//! a dispatch that is half delivered cannot be recovered, so the caller is
//! expected to halt the machine.

use crate::error::{Error, MessageError, Result};
use crate::link::{CoreId, Link, Packet};
use crate::message::{fragment, FragmentCapacity, Message};
use crate::sdram::Address;
use tracing::{debug, error, warn};

/// Sends attempted per message before giving up.
pub const MAX_SEND_ATTEMPTS: u32 = 30;

/// Sending side of one core.
#[derive(Debug)]
pub struct Transport {
    core_id: CoreId,
    capacity: FragmentCapacity,
    payload_bytes: usize,
    messages_sent: u64,
    retries: u64,
}

impl Transport {
    /// Create a transport for `core_id` with the given payload size.
    pub fn new(core_id: CoreId, payload_bytes: usize) -> Result<Self> {
        Ok(Self {
            core_id,
            capacity: FragmentCapacity::from_payload_bytes(payload_bytes)?,
            payload_bytes,
            messages_sent: 0,
            retries: 0,
        })
    }

    pub fn core_id(&self) -> CoreId {
        self.core_id
    }

    pub fn capacity(&self) -> FragmentCapacity {
        self.capacity
    }

    /// Messages delivered so far.
    pub fn messages_sent(&self) -> u64 {
        self.messages_sent
    }

    /// Sends that were refused and retried.
    pub fn retries(&self) -> u64 {
        self.retries
    }

    /// Deliver one message to `dest`.
    ///
    /// # Returns
    /// The number of send attempts it took.
    ///
    /// # Errors
    /// - `MessageError::ExceedsCapacity` if the message is larger than a payload
    /// - `Error::TransportExhausted` (fatal) if every attempt was refused
    pub fn send(&mut self, link: &mut Link, dest: CoreId, message: &Message) -> Result<u32> {
        let size = message.size();
        if size > self.payload_bytes {
            return Err(MessageError::ExceedsCapacity {
                size,
                capacity: self.payload_bytes,
            }
            .into());
        }

        let payload = message.serialize();
        for attempt in 1..=MAX_SEND_ATTEMPTS {
            let packet = Packet {
                source: self.core_id,
                dest,
                payload: payload.clone(),
            };
            if link.send(packet) {
                self.messages_sent += 1;
                debug!(dest, attempt, command = ?message.command(), "message sent");
                return Ok(attempt);
            }
            self.retries += 1;
            warn!(dest, attempt, "send refused, trying again");
        }

        error!(dest, attempts = MAX_SEND_ATTEMPTS, "giving up on send");
        Err(Error::TransportExhausted {
            dest,
            attempts: MAX_SEND_ATTEMPTS,
        })
    }

    /// Fragment a table-address list and deliver every fragment, in order.
    ///
    /// # Returns
    /// The number of fragments sent.
    pub fn dispatch(
        &mut self,
        link: &mut Link,
        dest: CoreId,
        tables: &[Address],
        compressed_table: Address,
        scratch_region: Address,
    ) -> Result<usize> {
        let fragments = fragment(tables, compressed_table, scratch_region, self.capacity);
        for message in &fragments {
            self.send(link, dest, message)?;
        }
        debug!(dest, tables = tables.len(), fragments = fragments.len(), "dispatch delivered");
        Ok(fragments.len())
    }
}
