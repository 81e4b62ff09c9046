//! Diagnostic recording channels.
//!
//! A side channel for data that should survive independently of compression.
//! Writes either fit in the channel or are refused whole; nothing the
//! recorder does feeds back into the search.

use tracing::{debug, warn};

/// Sink for diagnostic records.
pub trait Recorder {
    /// Append `data` to `channel`.
    ///
    /// # Returns
    /// `false` if the channel does not exist, is full, or was finalised.
    fn record(&mut self, channel: usize, data: &[u8]) -> bool;

    /// Like [`Recorder::record`], running `callback` once the data is committed.
    ///
    /// The callback does not run when the write is refused.
    fn record_and_notify(
        &mut self,
        channel: usize,
        data: &[u8],
        callback: Box<dyn FnOnce() + '_>,
    ) -> bool;

    /// Close every channel to further writes.
    fn finalise(&mut self);

    /// Drop all recorded data and reopen the channels.
    fn reset(&mut self);
}

/// Bounded in-memory channels.
#[derive(Debug, Clone)]
pub struct ChannelRecorder {
    channels: Vec<Channel>,
    finalised: bool,
}

#[derive(Debug, Clone)]
struct Channel {
    capacity: usize,
    data: Vec<u8>,
    refused: u64,
}

impl ChannelRecorder {
    /// One channel per entry of `capacities`, each holding that many bytes.
    pub fn new(capacities: &[usize]) -> Self {
        let channels = capacities
            .iter()
            .map(|&capacity| Channel {
                capacity,
                data: Vec::with_capacity(capacity),
                refused: 0,
            })
            .collect();
        Self {
            channels,
            finalised: false,
        }
    }

    pub fn is_finalised(&self) -> bool {
        self.finalised
    }

    /// Bytes recorded on `channel` so far.
    pub fn data(&self, channel: usize) -> &[u8] {
        self.channels.get(channel).map_or(&[], |c| c.data.as_slice())
    }

    /// Writes refused on `channel` for lack of space.
    pub fn refused(&self, channel: usize) -> u64 {
        self.channels.get(channel).map_or(0, |c| c.refused)
    }

    /// Decode a channel as little-endian words, ignoring a trailing partial word.
    pub fn words(&self, channel: usize) -> Vec<u32> {
        self.data(channel)
            .chunks_exact(4)
            .map(|w| u32::from_le_bytes([w[0], w[1], w[2], w[3]]))
            .collect()
    }
}

impl Recorder for ChannelRecorder {
    fn record(&mut self, channel: usize, data: &[u8]) -> bool {
        if self.finalised {
            return false;
        }
        let Some(target) = self.channels.get_mut(channel) else {
            warn!(channel, "record to unknown channel");
            return false;
        };
        if target.data.len() + data.len() > target.capacity {
            target.refused += 1;
            debug!(channel, size = data.len(), "recording channel full");
            return false;
        }
        target.data.extend_from_slice(data);
        true
    }

    fn record_and_notify(
        &mut self,
        channel: usize,
        data: &[u8],
        callback: Box<dyn FnOnce() + '_>,
    ) -> bool {
        let committed = self.record(channel, data);
        if committed {
            callback();
        }
        committed
    }

    fn finalise(&mut self) {
        self.finalised = true;
    }

    fn reset(&mut self) {
        for channel in &mut self.channels {
            channel.data.clear();
            channel.refused = 0;
        }
        self.finalised = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn test_record_until_full() {
        let mut recorder = ChannelRecorder::new(&[8]);

        assert!(recorder.record(0, &[1, 2, 3, 4]));
        assert!(recorder.record(0, &[5, 6, 7, 8]));
        assert!(!recorder.record(0, &[9]));

        assert_eq!(recorder.data(0), &[1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(recorder.refused(0), 1);
    }

    #[test]
    fn test_unknown_channel() {
        let mut recorder = ChannelRecorder::new(&[8]);
        assert!(!recorder.record(3, &[1]));
        assert!(recorder.data(3).is_empty());
    }

    #[test]
    fn test_notify_runs_only_on_commit() {
        let mut recorder = ChannelRecorder::new(&[4]);
        let calls = Cell::new(0);

        assert!(recorder.record_and_notify(0, &[1, 2], Box::new(|| calls.set(calls.get() + 1))));
        assert!(!recorder.record_and_notify(0, &[1, 2, 3], Box::new(|| calls.set(calls.get() + 1))));

        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn test_finalise_and_reset() {
        let mut recorder = ChannelRecorder::new(&[16, 16]);
        assert!(recorder.record(1, &7u32.to_le_bytes()));

        recorder.finalise();
        assert!(recorder.is_finalised());
        assert!(!recorder.record(1, &[0]));
        assert_eq!(recorder.words(1), vec![7]);

        recorder.reset();
        assert!(!recorder.is_finalised());
        assert!(recorder.data(1).is_empty());
        assert!(recorder.record(1, &[0]));
    }
}
