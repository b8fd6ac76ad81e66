use anyhow::Result;
use protocol::EventFd;
use protocol::consts::{ActivationStatus, INVALID_ID, PositionState};

use crate::NodeId;
use crate::ffi;
use crate::memory::Region;
use crate::ptr::{atomic, volatile};

/// The default sync timeout armed on a fresh activation, in nanoseconds.
pub(crate) const DEFAULT_SYNC_TIMEOUT_NS: u64 = 5_000_000_000;

/// One entry of a node's target list.
///
/// Holds everything needed to signal the target without any lookup: a view
/// of its activation record and a duplicate of its wake-fd.
#[derive(Debug)]
pub struct Target {
    /// The node this target signals.
    pub node: NodeId,
    pub(crate) activation: Region<ffi::NodeActivation>,
    pub(crate) signal_fd: EventFd,
    /// The target is the elected driver of the component, so the
    /// decrement-to-zero closes the cycle rather than starting a process.
    pub(crate) driver: bool,
}

/// The outcome of signalling a target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Signalled {
    /// The target still waits for other predecessors.
    Pending,
    /// This signal performed the decrement-to-zero and woke the target.
    Triggered,
    /// The target is a driver which already ran its process this cycle;
    /// the decrement-to-zero closes its cycle instead.
    CycleDone,
}

impl Target {
    /// Signal the target, decrementing its pending count.
    ///
    /// The caller that performs the decrement-to-zero is the only one that
    /// transitions the target's status and posts its wake-fd.
    ///
    /// # Safety
    ///
    /// The activation region must be a valid activation record.
    pub(crate) unsafe fn signal(&self, nsec: u64) -> Result<Signalled> {
        let pending = atomic!(self.activation, state[0].pending).sub(1);

        if pending != 1 {
            return Ok(Signalled::Pending);
        }

        volatile!(self.activation, signal_time).write(nsec);

        let changed = atomic!(self.activation, status).compare_exchange(
            ActivationStatus::NOT_TRIGGERED.into_raw(),
            ActivationStatus::TRIGGERED.into_raw(),
        );

        if changed {
            if !self.signal_fd.write(1)? {
                tracing::error!(node = ?self.node, "Failed to signal activation");
            }

            return Ok(Signalled::Triggered);
        }

        // The driver has already been through its process this cycle; the
        // last decrement is the cycle closing.
        if self.driver {
            return Ok(Signalled::CycleDone);
        }

        tracing::trace!(node = ?self.node, "Target not in a triggerable state");
        Ok(Signalled::Pending)
    }

    /// Reset the target for a new cycle.
    ///
    /// Restores `pending = required` and clears the status. Only the driver
    /// calls this, at the start of a cycle, while no signal is in flight.
    pub(crate) unsafe fn reset(&self) {
        let required = volatile!(self.activation, state[0].required).read();
        atomic!(self.activation, state[0].pending).store(required);
        atomic!(self.activation, status).store(ActivationStatus::NOT_TRIGGERED.into_raw());
    }
}

/// Initialize a freshly mapped activation record.
///
/// The mapping starts zeroed; only the fields with non-zero defaults need
/// to be written.
pub(crate) fn init_activation(region: &Region<ffi::NodeActivation>, node_id: NodeId, quantum: u32) {
    volatile!(region, status).write(ActivationStatus::INACTIVE.into_raw());
    volatile!(region, sync_timeout).write(DEFAULT_SYNC_TIMEOUT_NS);
    // Node ids may legitimately be zero, so unowned slots hold the
    // invalid id.
    volatile!(region, reposition_owner).write(INVALID_ID);
    volatile!(region, segment_owner[0]).write(INVALID_ID);
    volatile!(region, segment_owner[1]).write(INVALID_ID);
    volatile!(region, position.state).write(PositionState::STOPPED.into_raw());
    volatile!(region, position.n_segments).write(1);
    volatile!(region, position.segments[0].rate).write(1.0f64);
    volatile!(region, position.clock.id).write(node_id.into_u32());
    volatile!(region, position.clock.rate).write(ffi::Fraction { num: 1, denom: 48000 });
    volatile!(region, position.clock.duration).write(u64::from(quantum));
    volatile!(region, position.clock.rate_diff).write(1.0f64);
}
