//! # Histwatch Index
//!
//! The in-memory recency index: every distinct command ever seen, exactly
//! once, under a process-lifetime monotonic rank.
//!
//! ```text
//! touch("ls")        -> rank 1
//! touch("cd /tmp")   -> rank 2
//! touch("ls")        -> rank 3   (rank 1 is now permanently vacant)
//! ```
//!
//! A single writer (the ingestion loop) mutates the index; any number of
//! streaming readers walk it downward from a captured horizon. The index is
//! always passed around as an explicit [`SharedIndex`] handle so tests can
//! construct isolated instances.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use parking_lot::RwLock;

/// Handle shared between the ingestion loop (writer) and stream handlers
/// (readers). Acquire per operation; never hold across an await point.
pub type SharedIndex = Arc<RwLock<RankedIndex>>;

pub fn shared() -> SharedIndex {
    Arc::new(RwLock::new(RankedIndex::new()))
}

/// Deduplicated move-to-front set keyed by a strictly increasing rank.
///
/// Ranks start at 1 and are never reused: re-touching a key vacates its old
/// rank forever and spends the next one. Lookups walking downward therefore
/// have to tolerate gaps, which [`RankedIndex::at_or_below`] does by
/// returning the nearest populated rank instead of demanding an exact hit.
#[derive(Debug, Default)]
pub struct RankedIndex {
    by_rank: BTreeMap<u64, String>,
    ranks: HashMap<String, u64>,
    last_rank: u64,
}

impl RankedIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `key` or promote it to the newest position.
    ///
    /// Either way the key ends up holding the single highest rank, which is
    /// returned.
    pub fn touch(&mut self, key: &str) -> u64 {
        self.last_rank += 1;
        let rank = self.last_rank;
        if let Some(old) = self.ranks.insert(key.to_string(), rank) {
            self.by_rank.remove(&old);
        }
        self.by_rank.insert(rank, key.to_string());
        rank
    }

    pub fn rank_of(&self, key: &str) -> Option<u64> {
        self.ranks.get(key).copied()
    }

    /// The entry at the greatest populated rank `<= rank`, if any.
    ///
    /// This is the descending-cursor primitive: a walk emits the returned
    /// entry and continues at `rank - 1`, silently hopping over vacated
    /// slots.
    pub fn at_or_below(&self, rank: u64) -> Option<(u64, &str)> {
        self.by_rank
            .range(..=rank)
            .next_back()
            .map(|(r, key)| (*r, key.as_str()))
    }

    /// Current highest assigned rank. Non-decreasing; equals the total
    /// number of touch events plus the number of keys loaded at startup.
    pub fn highest_rank(&self) -> u64 {
        self.last_rank
    }

    pub fn len(&self) -> usize {
        self.by_rank.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_rank.is_empty()
    }

    /// Startup-only bulk reconstruction from persisted keys.
    ///
    /// Keys get dense ranks 1..N in the order the iterator yields them. The
    /// caller decides what that order is (for the durable store it is the
    /// store's native key order, not the original chronology).
    pub fn load<I>(&mut self, keys: I)
    where
        I: IntoIterator<Item = String>,
    {
        for key in keys {
            self.touch(&key);
        }
    }
}
