//! Linear positions over the tree IR.
//!
//! Every node gets one [`ProgPoint`] in block order, statement order and tree
//! post-order, so a parent's point is always after its children's. Synthetic
//! instructions (stores, reloads, moves) are placed in the [`Gap`] before or
//! after a node instead of being renumbered into the sequence.

use std::cmp::Ordering;
use std::fmt;

// =============================================================================
// Program Point
// =============================================================================

/// The linear position of a tree node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProgPoint(u32);

impl ProgPoint {
    /// The invalid/unnumbered program point.
    pub const INVALID: ProgPoint = ProgPoint(u32::MAX);

    /// Create a program point from a node's index in execution order.
    #[inline]
    pub const fn new(index: u32) -> Self {
        ProgPoint(index)
    }

    /// Get the raw index.
    #[inline]
    pub const fn index(self) -> u32 {
        self.0
    }

    /// Get the index as usize.
    #[inline]
    pub const fn as_usize(self) -> usize {
        self.0 as usize
    }

    /// Get the next program point.
    #[inline]
    pub const fn next(self) -> Self {
        ProgPoint(self.0 + 1)
    }

    /// Get the previous program point (saturating at zero).
    #[inline]
    pub const fn prev(self) -> Self {
        ProgPoint(self.0.saturating_sub(1))
    }

    /// Check if this point has been assigned.
    #[inline]
    pub const fn is_valid(self) -> bool {
        self.0 != u32::MAX
    }
}

impl fmt::Display for ProgPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_valid() {
            write!(f, "{}", self.0)
        } else {
            write!(f, "?")
        }
    }
}

// =============================================================================
// Gap
// =============================================================================

/// An insertion point between two nodes.
///
/// Gaps are totally ordered: `Before(p) < After(p) < Before(p + 1)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Gap {
    /// Immediately before the node at this point executes.
    Before(ProgPoint),
    /// Immediately after the node at this point executes.
    After(ProgPoint),
}

impl Gap {
    #[inline]
    const fn key(self) -> u64 {
        match self {
            Gap::Before(p) => (p.0 as u64) * 2,
            Gap::After(p) => (p.0 as u64) * 2 + 1,
        }
    }
}

impl PartialOrd for Gap {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Gap {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key().cmp(&other.key())
    }
}

impl fmt::Display for Gap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Gap::Before(p) => write!(f, "{}b", p),
            Gap::After(p) => write!(f, "{}a", p),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gap_order() {
        let p = ProgPoint::new(4);
        let mut gaps = vec![
            Gap::Before(p.next()),
            Gap::After(p),
            Gap::Before(p),
            Gap::After(p.prev()),
        ];
        gaps.sort();

        assert_eq!(
            gaps,
            vec![
                Gap::After(ProgPoint::new(3)),
                Gap::Before(ProgPoint::new(4)),
                Gap::After(ProgPoint::new(4)),
                Gap::Before(ProgPoint::new(5)),
            ]
        );
    }

    #[test]
    fn test_invalid_point() {
        assert!(!ProgPoint::INVALID.is_valid());
        assert_eq!(format!("{}", ProgPoint::INVALID), "?");
        assert_eq!(format!("{}", Gap::After(ProgPoint::new(2))), "2a");
    }
}
