//! Well-known constants used across the protocol.

/// The current version of the control protocol.
pub const VERSION: u32 = 1;

/// An invalid object or buffer identifier.
pub const INVALID_ID: u32 = u32::MAX;

pod::macros::id! {
    /// The direction of a port.
    pub struct Direction(u32) {
        UNKNOWN;
        INPUT = 0;
        OUTPUT = 1;
    }

    /// The per-cycle status stored in an activation record.
    pub struct ActivationStatus(u32) {
        UNKNOWN;
        NOT_TRIGGERED = 0;
        TRIGGERED = 1;
        AWAKE = 2;
        FINISHED = 3;
        INACTIVE = 4;
    }

    /// The command slot of an activation record.
    pub struct ActivationCommand(u32) {
        UNKNOWN;
        NONE = 0;
        START = 1;
        STOP = 2;
    }

    /// The transport state carried in the position area.
    pub struct PositionState(u32) {
        UNKNOWN;
        STOPPED = 0;
        STARTING = 1;
        RUNNING = 2;
    }
}

impl Direction {
    /// The opposite direction.
    #[inline]
    pub fn reverse(self) -> Self {
        match self {
            Direction::INPUT => Direction::OUTPUT,
            Direction::OUTPUT => Direction::INPUT,
            other => other,
        }
    }
}
