use crate::{NodeId, NodeState};

/// Events emitted by the graph on the main loop.
///
/// Hot-path state lives in the activation records; these events only carry
/// lifecycle and completion notifications for subscribers such as the
/// control bindings and the daemon.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum GraphEvent {
    /// A node moved to a new state.
    NodeStateChanged {
        node: NodeId,
        old: NodeState,
        new: NodeState,
    },
    /// A node reported an unrecoverable error.
    NodeError { node: NodeId, reason: String },
    /// An asynchronously accepted operation completed.
    Result { node: NodeId, seq: u32, res: i32 },
    /// A cycle overran; recorded in the driver's activation and surfaced
    /// here for observability.
    XRun { node: NodeId },
    /// The node was moved to a new driver.
    DriverChanged { node: NodeId, driver: NodeId },
}
