use crate::NodeId;

/// A deferred state change, applied when the matching async result
/// arrives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Work {
    FinishStart,
    FinishPause,
    FinishSuspend,
}

#[derive(Debug)]
struct Pending {
    node: NodeId,
    seq: u32,
    work: Work,
}

/// Queue pairing async sequence numbers to pending state transitions.
///
/// Drained on every result event.
#[derive(Debug, Default)]
pub struct WorkQueue {
    pending: Vec<Pending>,
}

impl WorkQueue {
    /// Construct an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register work to finish when `seq` completes for `node`.
    pub(crate) fn add(&mut self, node: NodeId, seq: u32, work: Work) {
        self.pending.push(Pending { node, seq, work });
    }

    /// Complete and return the work registered for the given result.
    pub(crate) fn complete(&mut self, node: NodeId, seq: u32) -> Option<Work> {
        let index = self
            .pending
            .iter()
            .position(|p| p.node == node && p.seq == seq)?;

        Some(self.pending.swap_remove(index).work)
    }

    /// Drop all work pending for a node, for when it is destroyed.
    pub(crate) fn abandon(&mut self, node: NodeId) {
        self.pending.retain(|p| p.node != node);
    }
}
