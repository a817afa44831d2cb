//! Optimistic concurrency expectations for revisioned stores.

/// Expected revision of a key at write time (compare-and-swap).
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ExpectedRevision {
    /// Skip revision checking (last writer wins).
    Any,
    /// Require the key to be absent.
    NoEntry,
    /// Require the key to be at an exact revision.
    Exact(u64),
}

impl ExpectedRevision {
    pub fn matches(self, actual: Option<u64>) -> bool {
        match (self, actual) {
            (ExpectedRevision::Any, _) => true,
            (ExpectedRevision::NoEntry, None) => true,
            (ExpectedRevision::Exact(v), Some(a)) => v == a,
            _ => false,
        }
    }
}
