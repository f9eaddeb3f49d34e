use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};

/// Per-connection correlation identifier linking a request to its reply.
///
/// Sequences are carried *in-band* in the envelope's `s` field. Zero is
/// never handed out by [`SequenceCounter`], so a zero sequence marks an
/// uncorrelated envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Sequence(u32);

impl Sequence {
    /// Wrap a raw wire value.
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    /// The raw wire value.
    pub const fn get(self) -> u32 {
        self.0
    }

    /// Whether this sequence can correlate a call.
    pub const fn is_correlated(self) -> bool {
        self.0 != 0
    }
}

impl From<u32> for Sequence {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

impl fmt::Display for Sequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Monotonic sequence allocator shared by every caller of one connection.
///
/// The counter wraps after `u32::MAX` and skips zero. A wrapped value could
/// in theory collide with a call that has been outstanding for 2^32 calls;
/// that case is not guarded against.
#[derive(Debug, Default)]
pub struct SequenceCounter {
    last: AtomicU32,
}

impl SequenceCounter {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub fn starting_after(last: u32) -> Self {
        Self {
            last: AtomicU32::new(last),
        }
    }

    /// Allocate the next sequence.
    pub fn next(&self) -> Sequence {
        // ---
        loop {
            let value = self.last.fetch_add(1, Ordering::Relaxed).wrapping_add(1);
            if value != 0 {
                return Sequence(value);
            }
        }
    }

    /// The most recently allocated raw value (zero if none yet).
    pub fn current(&self) -> u32 {
        self.last.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;

    #[test]
    fn test_starts_at_one() {
        // ---
        let counter = SequenceCounter::new();
        assert_eq!(counter.next().get(), 1);
        assert_eq!(counter.next().get(), 2);
        assert_eq!(counter.current(), 2);
    }

    #[test]
    fn test_wrap_skips_zero() {
        // ---
        let counter = SequenceCounter::starting_after(u32::MAX - 1);
        assert_eq!(counter.next().get(), u32::MAX);
        assert_eq!(counter.next().get(), 1);
    }

    #[test]
    fn test_unique_across_threads() {
        // ---
        let counter = Arc::new(SequenceCounter::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let counter = counter.clone();
                std::thread::spawn(move || (0..1000).map(|_| counter.next()).collect::<Vec<_>>())
            })
            .collect();

        let mut seen = HashSet::new();
        for handle in handles {
            for seq in handle.join().unwrap() {
                assert!(seen.insert(seq), "duplicate sequence {seq}");
            }
        }
        assert_eq!(seen.len(), 8000);
    }

    #[test]
    fn test_format() {
        // ---
        assert_eq!(Sequence::new(42).to_string(), "#42");
        assert!(!Sequence::new(0).is_correlated());
    }
}
