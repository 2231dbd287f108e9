//! Pending execution points.
//!
//! Points are kept in a set, so a point re-enqueued before being processed
//! is interpreted once with its latest merged env. The pop order (lowest
//! context, then lowest pc) only affects how fast the fixpoint is reached.

use super::state::ExecutionPoint;
use std::collections::BTreeSet;

#[derive(Debug, Default)]
pub struct Worklist {
    pending: BTreeSet<ExecutionPoint>,
}

impl Worklist {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `false` if the point was already pending.
    pub fn push(&mut self, ep: ExecutionPoint) -> bool {
        self.pending.insert(ep)
    }

    pub fn pop(&mut self) -> Option<ExecutionPoint> {
        self.pending.pop_first()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
