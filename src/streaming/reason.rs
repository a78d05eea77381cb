//! Reasons a hierarchy is streamed to a client.
//!
//! A hierarchy stays in a session's streamed set while at least one reason
//! bit is set; clearing the last bit removes it.

use std::fmt;
use std::ops::{BitAnd, BitOr, BitOrAssign, Not};

/// OR-able set of streaming reasons.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct StreamReason(pub u32);

impl StreamReason {
    pub const NONE: StreamReason = StreamReason(0);
    /// Inside the spatial admission radius
    pub const NEARBY: StreamReason = StreamReason(1 << 0);
    /// Streamed because of a tag-driven policy
    pub const TAGGED: StreamReason = StreamReason(1 << 1);
    /// Streamed on explicit request from the host
    pub const FORCED: StreamReason = StreamReason(1 << 2);
    /// Reserved "clear everything" mask used on teardown
    pub const ALL: StreamReason = StreamReason(u32::MAX);

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn contains(self, other: StreamReason) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn intersects(self, other: StreamReason) -> bool {
        self.0 & other.0 != 0
    }

    /// `self` with every bit of `other` cleared
    pub fn without(self, other: StreamReason) -> StreamReason {
        StreamReason(self.0 & !other.0)
    }
}

impl BitOr for StreamReason {
    type Output = StreamReason;

    fn bitor(self, rhs: StreamReason) -> StreamReason {
        StreamReason(self.0 | rhs.0)
    }
}

impl BitOrAssign for StreamReason {
    fn bitor_assign(&mut self, rhs: StreamReason) {
        self.0 |= rhs.0;
    }
}

impl BitAnd for StreamReason {
    type Output = StreamReason;

    fn bitand(self, rhs: StreamReason) -> StreamReason {
        StreamReason(self.0 & rhs.0)
    }
}

impl Not for StreamReason {
    type Output = StreamReason;

    fn not(self) -> StreamReason {
        StreamReason(!self.0)
    }
}

impl fmt::Debug for StreamReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == StreamReason::ALL {
            return write!(f, "StreamReason(ALL)");
        }
        let mut names = Vec::new();
        if self.contains(StreamReason::NEARBY) {
            names.push("NEARBY");
        }
        if self.contains(StreamReason::TAGGED) {
            names.push("TAGGED");
        }
        if self.contains(StreamReason::FORCED) {
            names.push("FORCED");
        }
        let known = (StreamReason::NEARBY | StreamReason::TAGGED | StreamReason::FORCED).0;
        if self.0 & !known != 0 {
            return write!(f, "StreamReason({}|{:#x})", names.join("|"), self.0 & !known);
        }
        write!(f, "StreamReason({})", names.join("|"))
    }
}
