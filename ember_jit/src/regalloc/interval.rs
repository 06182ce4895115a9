//! Live Interval Representation
//!
//! # Key Concepts
//!
//! - **Live Range**: The closed span `[start, end]` where a value is live
//! - **Use Position**: A concrete read or write of the value at a node
//! - **Sub-Interval**: A piece of the live range bound to one location;
//!   a split interval has several, covering the range without gaps
//!
//! Intervals model no lifetime holes: a value live in two distant blocks
//! occupies everything in between.

use super::{Location, ValueId};
use crate::ir::node::NodeId;
use crate::ir::operators::{LocalId, OpKind, TempId};
use crate::ir::position::ProgPoint;
use smallvec::SmallVec;
use std::fmt;

// =============================================================================
// Value Kind
// =============================================================================

/// What an allocatable value stands for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
    /// A local variable; may be written several times.
    Local(LocalId),
    /// A shared temp; one `DefTemp`, any number of `TempRef` reads.
    Temp(TempId),
    /// The result of a `Const` or `Binary` node, read once by its parent.
    Node(NodeId),
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueKind::Local(l) => write!(f, "local {}", l),
            ValueKind::Temp(t) => write!(f, "temp {}", t),
            ValueKind::Node(n) => write!(f, "node {}", n),
        }
    }
}

// =============================================================================
// Live Range
// =============================================================================

/// A closed span of positions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LiveRange {
    /// First live position (inclusive).
    pub start: ProgPoint,
    /// Last live position (inclusive).
    pub end: ProgPoint,
}

impl LiveRange {
    /// Create a new live range.
    #[inline]
    pub const fn new(start: ProgPoint, end: ProgPoint) -> Self {
        LiveRange { start, end }
    }

    /// A range covering a single position.
    #[inline]
    pub const fn point(pos: ProgPoint) -> Self {
        LiveRange::new(pos, pos)
    }

    /// Check if this range contains a position.
    #[inline]
    pub const fn contains(&self, pos: ProgPoint) -> bool {
        self.start.index() <= pos.index() && pos.index() <= self.end.index()
    }

    /// Grow the range to include `pos`.
    pub fn extend_to(&mut self, pos: ProgPoint) {
        if pos < self.start {
            self.start = pos;
        }
        if pos > self.end {
            self.end = pos;
        }
    }
}

impl fmt::Display for LiveRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.start, self.end)
    }
}

// =============================================================================
// Use Position
// =============================================================================

/// The kind of use at a position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UseKind {
    /// Definition (output).
    Def,
    /// Use (input).
    Use,
    /// Both read and written by the same node (e.g. `x = x`).
    DefUse,
}

impl UseKind {
    /// Check if the old value is needed at this position.
    #[inline]
    pub const fn reads(self) -> bool {
        matches!(self, UseKind::Use | UseKind::DefUse)
    }

    /// Check if the value is written at this position.
    #[inline]
    pub const fn writes(self) -> bool {
        matches!(self, UseKind::Def | UseKind::DefUse)
    }
}

/// A use or def position of a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UsePosition {
    pub pos: ProgPoint,
    pub kind: UseKind,
}

impl UsePosition {
    #[inline]
    pub const fn new(pos: ProgPoint, kind: UseKind) -> Self {
        UsePosition { pos, kind }
    }

    #[inline]
    pub const fn def(pos: ProgPoint) -> Self {
        UsePosition::new(pos, UseKind::Def)
    }

    #[inline]
    pub const fn use_pos(pos: ProgPoint) -> Self {
        UsePosition::new(pos, UseKind::Use)
    }
}

// =============================================================================
// Sub-Interval
// =============================================================================

/// A piece of a live range with a single location.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubInterval {
    pub range: LiveRange,
    pub location: Location,
}

// =============================================================================
// Live Interval
// =============================================================================

/// The lifetime of one value and, after allocation, where it lives.
#[derive(Debug, Clone)]
pub struct LiveInterval {
    /// The value this interval is for.
    pub value: ValueId,
    pub kind: ValueKind,
    /// Widened live span; `None` for a value that is never live.
    range: Option<LiveRange>,
    /// Concrete reads and writes, sorted by position.
    uses: Vec<UsePosition>,
    /// Node whose write starts the interval, if it starts with a write.
    pub def_node: Option<NodeId>,
    /// Operator of `def_node`.
    pub def_op: Option<OpKind>,
    /// Values read by `def_node`, in child order.
    pub operands: SmallVec<[ValueId; 2]>,
    /// Final locations, in position order.
    pub sub_intervals: Vec<SubInterval>,
    /// Operand whose register this value took at its definition.
    pub reused_from: Option<ValueId>,
}

impl LiveInterval {
    /// Create an interval with no uses.
    pub fn new(value: ValueId, kind: ValueKind) -> Self {
        LiveInterval {
            value,
            kind,
            range: None,
            uses: Vec::new(),
            def_node: None,
            def_op: None,
            operands: SmallVec::new(),
            sub_intervals: Vec::new(),
            reused_from: None,
        }
    }

    /// Record a use. Uses must arrive in non-decreasing position order; a
    /// read and a write at the same position merge into `DefUse`.
    pub fn add_use(&mut self, use_pos: UsePosition) {
        self.cover(use_pos.pos);
        if let Some(last) = self.uses.last_mut() {
            if last.pos == use_pos.pos {
                if last.kind != use_pos.kind {
                    last.kind = UseKind::DefUse;
                }
                return;
            }
        }
        self.uses.push(use_pos);
    }

    /// Widen the live range to include `pos`.
    pub fn cover(&mut self, pos: ProgPoint) {
        match &mut self.range {
            Some(range) => range.extend_to(pos),
            None => self.range = Some(LiveRange::point(pos)),
        }
    }

    #[inline]
    pub fn range(&self) -> Option<LiveRange> {
        self.range
    }

    /// Get the start position of the interval.
    pub fn start(&self) -> ProgPoint {
        self.range.map_or(ProgPoint::INVALID, |r| r.start)
    }

    /// Get the end position of the interval.
    pub fn end(&self) -> ProgPoint {
        self.range.map_or(ProgPoint::INVALID, |r| r.end)
    }

    /// Check if the value is never live.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.range.is_none()
    }

    /// All concrete uses.
    #[inline]
    pub fn uses(&self) -> &[UsePosition] {
        &self.uses
    }

    /// Check if the interval begins with a write of the value rather than
    /// being live on entry to a block.
    pub fn starts_with_def(&self) -> bool {
        self.uses
            .first()
            .is_some_and(|u| u.pos == self.start() && u.kind == UseKind::Def)
    }

    /// Position of the first write, if any.
    pub fn def_position(&self) -> Option<ProgPoint> {
        self.uses.iter().find(|u| u.kind.writes()).map(|u| u.pos)
    }

    /// Get the next use position at or after a point.
    pub fn next_use_at_or_after(&self, pos: ProgPoint) -> Option<&UsePosition> {
        let index = self.uses.partition_point(|u| u.pos < pos);
        self.uses.get(index)
    }

    /// Get the next position at or after a point that reads the value.
    pub fn next_read_at_or_after(&self, pos: ProgPoint) -> Option<&UsePosition> {
        let index = self.uses.partition_point(|u| u.pos < pos);
        self.uses[index..].iter().find(|u| u.kind.reads())
    }

    /// Get the last use position strictly before a point.
    pub fn last_use_before(&self, pos: ProgPoint) -> Option<&UsePosition> {
        let index = self.uses.partition_point(|u| u.pos < pos);
        index.checked_sub(1).map(|i| &self.uses[i])
    }

    /// The location holding the value at `pos`.
    pub fn location_at(&self, pos: ProgPoint) -> Option<Location> {
        self.sub_intervals
            .iter()
            .find(|sub| sub.range.contains(pos))
            .map(|sub| sub.location)
    }

    /// Check if the interval was split into several locations.
    #[inline]
    pub fn is_split(&self) -> bool {
        self.sub_intervals.len() > 1
    }

    /// Check if any part of the interval lives in a register.
    pub fn has_register(&self) -> bool {
        self.sub_intervals
            .iter()
            .any(|sub| matches!(sub.location, Location::Reg(_)))
    }
}

impl fmt::Display for LiveInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.value, self.kind)?;
        match self.range {
            Some(range) => write!(f, " {}", range)?,
            None => return write!(f, " dead"),
        }
        for (i, sub) in self.sub_intervals.iter().enumerate() {
            let sep = if i == 0 { ":" } else { "," };
            write!(f, "{} {} {}", sep, sub.location, sub.range)?;
        }
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::regalloc::PReg;
    use crate::regalloc::spill::SpillSlot;

    fn p(i: u32) -> ProgPoint {
        ProgPoint::new(i)
    }

    #[test]
    fn test_range_closed() {
        let mut a = LiveRange::new(p(2), p(5));

        assert!(a.contains(p(2)));
        assert!(a.contains(p(5)));
        assert!(!a.contains(p(6)));
        a.extend_to(p(1));
        assert_eq!(a.start, p(1));
        assert_eq!(format!("{}", a), "[1, 5]");
    }

    #[test]
    fn test_uses_merge_into_def_use() {
        let mut interval = LiveInterval::new(ValueId::new(0), ValueKind::Local(LocalId(0)));
        interval.add_use(UsePosition::def(p(1)));
        interval.add_use(UsePosition::use_pos(p(4)));
        interval.add_use(UsePosition::def(p(4)));
        interval.add_use(UsePosition::use_pos(p(9)));

        assert_eq!(interval.uses().len(), 3);
        assert_eq!(interval.uses()[1].kind, UseKind::DefUse);
        assert_eq!((interval.start(), interval.end()), (p(1), p(9)));
        assert!(interval.starts_with_def());
        assert_eq!(interval.def_position(), Some(p(1)));
    }

    #[test]
    fn test_next_and_previous_uses() {
        let mut interval = LiveInterval::new(ValueId::new(0), ValueKind::Local(LocalId(0)));
        interval.add_use(UsePosition::def(p(2)));
        interval.add_use(UsePosition::def(p(5)));
        interval.add_use(UsePosition::use_pos(p(7)));

        assert_eq!(interval.next_use_at_or_after(p(3)).map(|u| u.pos), Some(p(5)));
        assert_eq!(interval.next_read_at_or_after(p(3)).map(|u| u.pos), Some(p(7)));
        assert_eq!(interval.last_use_before(p(5)).map(|u| u.pos), Some(p(2)));
        assert!(interval.last_use_before(p(2)).is_none());
        assert!(interval.next_use_at_or_after(p(8)).is_none());
    }

    #[test]
    fn test_live_in_start_is_not_a_def() {
        let mut interval = LiveInterval::new(ValueId::new(1), ValueKind::Local(LocalId(1)));
        interval.cover(p(0));
        interval.add_use(UsePosition::use_pos(p(3)));
        assert!(!interval.starts_with_def());
        assert_eq!(interval.start(), p(0));
    }

    #[test]
    fn test_location_lookup() {
        let mut interval = LiveInterval::new(ValueId::new(3), ValueKind::Temp(TempId(0)));
        interval.add_use(UsePosition::def(p(2)));
        interval.add_use(UsePosition::use_pos(p(6)));

        let r0 = Location::Reg(PReg::new(0));
        let s0 = Location::Slot(SpillSlot::new(0));
        interval.sub_intervals = vec![
            SubInterval {
                range: LiveRange::new(p(2), p(3)),
                location: r0,
            },
            SubInterval {
                range: LiveRange::new(p(4), p(5)),
                location: s0,
            },
            SubInterval {
                range: LiveRange::point(p(6)),
                location: r0,
            },
        ];

        assert_eq!(interval.location_at(p(3)), Some(r0));
        assert_eq!(interval.location_at(p(4)), Some(s0));
        assert_eq!(interval.location_at(p(7)), None);
        assert!(interval.is_split());
        assert_eq!(
            interval.to_string(),
            "v3 (temp t0) [2, 6]: r0 [2, 3], s0 [4, 5], r0 [6, 6]"
        );
    }
}
