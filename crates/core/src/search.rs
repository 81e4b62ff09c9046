//! Binary search over how many bit-fields to fold in.
//!
//! The search keeps `[low, high]`, the range of midpoints whose outcome is
//! still unknown. A success at `m` means every midpoint up to `m` is assumed
//! to fit, so `low` moves past it; a failure at `m` moves `high` below it.
//! This relies on folding in more bit-fields never making a table easier to
//! compress, which is assumed rather than checked.
//!
//! Midpoint 0 (no bit-fields) is the baseline and is always tried first. If
//! it fails, nothing else can fit and the search ends with no result.
//!
//! With several workers, the next midpoint is the middle of the widest
//! stretch of `[low, high]` not already split by an attempt in flight
//! (leftmost on ties). With a single worker that is just `(low + high) / 2`.

use std::collections::BTreeSet;
use tracing::{debug, info};

/// Progress of the baseline attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Baseline {
    Pending,
    InFlight,
    Succeeded,
    Failed,
}

/// Coarse search state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchPhase {
    /// Bounds open or attempts still in flight
    Searching,
    /// Nothing left to try and nothing in flight
    Converged,
}

/// Search bounds and best results, owned by the coordinator.
#[derive(Debug, Clone)]
pub struct SearchState {
    n_bit_fields: u32,
    low: u32,
    high: u32,
    best_success: Option<u32>,
    best_failure: Option<u32>,
    baseline: Baseline,
    in_flight: BTreeSet<u32>,
    attempts: u32,
}

impl SearchState {
    /// Start a search over midpoints `0..=n_bit_fields`.
    pub fn new(n_bit_fields: u32) -> Self {
        Self {
            n_bit_fields,
            low: 0,
            high: n_bit_fields,
            best_success: None,
            best_failure: None,
            baseline: Baseline::Pending,
            in_flight: BTreeSet::new(),
            attempts: 0,
        }
    }

    pub fn n_bit_fields(&self) -> u32 {
        self.n_bit_fields
    }

    pub fn low(&self) -> u32 {
        self.low
    }

    pub fn high(&self) -> u32 {
        self.high
    }

    pub fn baseline(&self) -> Baseline {
        self.baseline
    }

    /// Largest midpoint that compressed successfully.
    pub fn best_success(&self) -> Option<u32> {
        self.best_success
    }

    /// Smallest midpoint that failed.
    pub fn best_failure(&self) -> Option<u32> {
        self.best_failure
    }

    /// Attempts handed out so far.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn in_flight(&self) -> impl Iterator<Item = u32> + '_ {
        self.in_flight.iter().copied()
    }

    pub fn phase(&self) -> SearchPhase {
        if self.is_converged() {
            SearchPhase::Converged
        } else {
            SearchPhase::Searching
        }
    }

    /// Whether the search is over and every attempt has reported back.
    pub fn is_converged(&self) -> bool {
        if !self.in_flight.is_empty() {
            return false;
        }
        match self.baseline {
            Baseline::Failed => true,
            Baseline::Succeeded => self.low > self.high,
            Baseline::Pending | Baseline::InFlight => false,
        }
    }

    /// Final answer once converged: the best midpoint, or `None` when even
    /// the baseline did not fit.
    pub fn outcome(&self) -> Option<u32> {
        match self.baseline {
            Baseline::Failed => None,
            _ => self.best_success,
        }
    }

    /// Pick the next midpoint to try and mark it in flight.
    ///
    /// # Returns
    /// `None` when nothing more can usefully be dispatched right now.
    pub fn next_midpoint(&mut self) -> Option<u32> {
        let midpoint = match self.baseline {
            Baseline::Failed => return None,
            Baseline::Pending => {
                self.baseline = Baseline::InFlight;
                0
            }
            Baseline::InFlight | Baseline::Succeeded => self.widest_gap_midpoint()?,
        };

        self.in_flight.insert(midpoint);
        self.attempts += 1;
        debug!(midpoint, low = self.low, high = self.high, "picked midpoint");
        Some(midpoint)
    }

    /// Middle of the widest run of untried midpoints in `[max(low, 1), high]`.
    fn widest_gap_midpoint(&self) -> Option<u32> {
        let lo = self.low.max(1);
        let hi = self.high;
        if lo > hi {
            return None;
        }

        let mut best: Option<(u32, u32)> = None;
        let mut start = lo;
        let cuts = self.in_flight.range(lo..=hi).copied().chain(std::iter::once(hi + 1));
        for cut in cuts {
            if cut > start {
                let end = cut - 1;
                let wider = best.map_or(true, |(s, e)| end - start > e - s);
                if wider {
                    best = Some((start, end));
                }
            }
            start = cut + 1;
        }

        best.map(|(s, e)| s + (e - s) / 2)
    }

    /// Record the outcome of an attempt at `midpoint`.
    pub fn record(&mut self, midpoint: u32, success: bool) {
        self.in_flight.remove(&midpoint);

        if midpoint == 0 {
            self.baseline = if success {
                Baseline::Succeeded
            } else {
                Baseline::Failed
            };
        }

        if success {
            self.best_success = Some(self.best_success.map_or(midpoint, |b| b.max(midpoint)));
            self.low = self.low.max(midpoint + 1);
        } else {
            self.best_failure = Some(self.best_failure.map_or(midpoint, |b| b.min(midpoint)));
            if midpoint > 0 {
                self.high = self.high.min(midpoint - 1);
            }
        }

        info!(
            midpoint,
            success,
            low = self.low,
            high = self.high,
            best = ?self.best_success,
            "search narrowed"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Drive a single-worker search against an oracle.
    fn run(n: u32, fits: impl Fn(u32) -> bool) -> (SearchState, Vec<u32>) {
        let mut search = SearchState::new(n);
        let mut tried = Vec::new();
        while let Some(midpoint) = search.next_midpoint() {
            tried.push(midpoint);
            search.record(midpoint, fits(midpoint));
        }
        (search, tried)
    }

    #[test]
    fn test_baseline_first() {
        let mut search = SearchState::new(8);
        assert_eq!(search.next_midpoint(), Some(0));
        assert_eq!(search.baseline(), Baseline::InFlight);
    }

    #[test]
    fn test_converges_on_best_success() {
        // 0, 4 and 6 fit; 7 and 8 don't
        let (search, tried) = run(8, |m| m <= 6);

        assert_eq!(tried, vec![0, 4, 6, 7]);
        assert!(search.is_converged());
        assert_eq!(search.phase(), SearchPhase::Converged);
        assert_eq!(search.outcome(), Some(6));
        assert_eq!(search.best_failure(), Some(7));
    }

    #[test]
    fn test_baseline_failure_ends_search() {
        let (search, tried) = run(8, |_| false);

        assert_eq!(tried, vec![0]);
        assert!(search.is_converged());
        assert_eq!(search.outcome(), None);
    }

    #[test]
    fn test_no_bit_fields() {
        let (search, tried) = run(0, |_| true);
        assert_eq!(tried, vec![0]);
        assert_eq!(search.outcome(), Some(0));
    }

    #[test]
    fn test_everything_fits() {
        let (search, tried) = run(8, |_| true);
        assert_eq!(tried, vec![0, 4, 6, 7, 8]);
        assert_eq!(search.outcome(), Some(8));
    }

    #[test]
    fn test_only_baseline_fits() {
        let (search, _) = run(100, |m| m == 0);
        assert_eq!(search.outcome(), Some(0));
        assert_eq!(search.high(), 0);
    }

    #[test]
    fn test_parallel_picks_distinct_midpoints() {
        let mut search = SearchState::new(15);
        let picked: Vec<_> = (0..4).map(|_| search.next_midpoint().unwrap()).collect();

        // Baseline, then the middle of [1, 15], then the middles of each half
        assert_eq!(picked, vec![0, 8, 4, 12]);
        assert!(!search.is_converged());
    }

    #[test]
    fn test_not_converged_while_in_flight() {
        let mut search = SearchState::new(2);
        let baseline = search.next_midpoint().unwrap();
        let other = search.next_midpoint().unwrap();
        assert_eq!((baseline, other), (0, 1));

        search.record(baseline, true);
        assert!(!search.is_converged());
        assert_eq!(search.in_flight().collect::<Vec<_>>(), vec![1]);

        search.record(other, false);
        assert!(search.is_converged());
        assert_eq!(search.outcome(), Some(0));
    }

    #[test]
    fn test_out_of_order_results() {
        let mut search = SearchState::new(8);
        let m0 = search.next_midpoint().unwrap();
        let m1 = search.next_midpoint().unwrap();
        let m2 = search.next_midpoint().unwrap();
        assert_eq!((m0, m1, m2), (0, 4, 6));

        search.record(m2, false);
        search.record(m1, false);
        assert!(!search.is_converged());
        search.record(m0, true);

        assert_eq!(search.next_midpoint(), Some(2));
        search.record(2, true);
        assert_eq!(search.next_midpoint(), Some(3));
        search.record(3, true);
        assert!(search.is_converged());
        assert_eq!(search.outcome(), Some(3));
        assert_eq!(search.best_failure(), Some(4));
    }
}
