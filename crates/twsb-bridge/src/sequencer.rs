//! Per-source sequence numbering.
//!
//! Every accepted event is stamped with the next number for its
//! [`SourceId`]: the first event of a source gets 1, then 2, 3, ... with no
//! gaps. Numbers are assigned exactly once, here, on the broker callback
//! thread; nothing downstream renumbers.
//!
//! # Thread safety
//!
//! Not thread-safe, and does not need to be: the ingestion thread is the only
//! writer.

use ahash::AHashMap;
use twsb_core::SourceId;

/// Last-used sequence number per source.
pub struct Sequencer {
    last: AHashMap<SourceId, u64>,
}

impl Sequencer {
    pub fn new() -> Self {
        Self { last: AHashMap::new() }
    }

    /// Assign and return the next sequence number for `source`.
    #[inline]
    pub fn next(&mut self, source: &SourceId) -> u64 {
        if let Some(last) = self.last.get_mut(source) {
            *last += 1;
            *last
        } else {
            self.last.insert(source.clone(), 1);
            1
        }
    }

    /// Returns the last assigned number for a source, or `None`.
    pub fn last(&self, source: &SourceId) -> Option<u64> {
        self.last.get(source).copied()
    }
}

impl Default for Sequencer {
    fn default() -> Self {
        Self::new()
    }
}
