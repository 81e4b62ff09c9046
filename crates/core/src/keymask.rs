//! Key/mask algebra for routing entries.
//!
//! A [`KeyMask`] matches every 32-bit key `k` with `k & mask == key`. Bits
//! clear in the mask are "don't care". Merging two keymasks yields the
//! smallest keymask covering both; two keymasks intersect when some key is
//! matched by both.
//!
//! Everything here is pure, allocation-free and constant-time.

/// A (key, mask) pair describing a set of routing keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct KeyMask {
    pub key: u32,
    pub mask: u32,
}

impl KeyMask {
    pub const fn new(key: u32, mask: u32) -> Self {
        Self { key, mask }
    }

    /// Keymask matching exactly one key.
    pub const fn exact(key: u32) -> Self {
        Self {
            key,
            mask: u32::MAX,
        }
    }

    /// Whether `key` is matched by this keymask.
    #[inline]
    pub fn contains(&self, key: u32) -> bool {
        key & self.mask == self.key & self.mask
    }

    /// Number of keys matched, as `2^(don't-care bits)`.
    pub fn n_keys(&self) -> u64 {
        1u64 << (!self.mask).count_ones()
    }

    /// The `index`-th key matched, counting in key order.
    ///
    /// The bits of `index` are spread over the don't-care bits, lowest first,
    /// so the don't-care bits need not be contiguous. Bits of `index` beyond
    /// the number of don't-care bits are ignored.
    pub fn nth_key(&self, index: u32) -> u32 {
        let mut key = self.key & self.mask;
        let mut free = !self.mask;
        let mut index = index;
        while free != 0 && index != 0 {
            let lowest = free & free.wrapping_neg();
            if index & 1 != 0 {
                key |= lowest;
            }
            index >>= 1;
            free &= free - 1;
        }
        key
    }

    /// Whether some key is matched by both keymasks.
    #[inline]
    pub fn intersects(&self, other: &KeyMask) -> bool {
        let common = self.mask & other.mask;
        self.key & common == other.key & common
    }

    /// Smallest keymask covering both `self` and `other`.
    ///
    /// Any bit where the keys differ becomes a don't-care, as does any bit
    /// that is already a don't-care in either input.
    #[inline]
    pub fn merge(&self, other: &KeyMask) -> KeyMask {
        let same = !(self.key ^ other.key);
        let mask = self.mask & other.mask & same;
        KeyMask {
            key: (self.key | other.key) & mask,
            mask,
        }
    }
}

/// Source value recorded when merged entries came from different sources.
pub const MIXED_SOURCE: u32 = 0;

/// One routing table entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct RoutingEntry {
    pub keymask: KeyMask,
    /// Bitmap of outgoing links and processors
    pub route: u32,
    /// Incoming direction the entry was generated for
    pub source: u32,
}

impl RoutingEntry {
    pub const fn new(key: u32, mask: u32, route: u32, source: u32) -> Self {
        Self {
            keymask: KeyMask::new(key, mask),
            route,
            source,
        }
    }

    /// Merge `other` into a copy of `self`.
    ///
    /// The route is taken from `self`; callers merge only entries that share a
    /// route. The source survives only when both entries agree on it.
    #[inline]
    pub fn merge(&self, other: &RoutingEntry) -> RoutingEntry {
        RoutingEntry {
            keymask: self.keymask.merge(&other.keymask),
            route: self.route,
            source: if self.source == other.source {
                self.source
            } else {
                MIXED_SOURCE
            },
        }
    }
}
