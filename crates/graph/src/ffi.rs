//! The shared-memory ABI.
//!
//! Every struct in this module is mapped into multiple processes and must
//! keep a fixed layout. The activation record is sealed at the size
//! documented here when its fd is created; peers validate against it.

use core::fmt;

/// The maximum number of segments visible in the future.
pub const POSITION_MAX_SEGMENTS: usize = 8;

#[derive(Copy, Clone, PartialEq, Eq)]
#[repr(transparent)]
pub(crate) struct Pad<T>(T);

impl<T> fmt::Debug for Pad<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Pad")
    }
}

/// One countdown slot of an activation record.
///
/// Index 0 drives processing; index 1 is reserved for staged
/// reconfiguration.
#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ActivationState {
    /// Required number of signals; the in-degree in the current graph walk.
    pub required: u32,
    /// Number of pending signals this cycle. Accessed with atomic RMW.
    pub pending: u32,
}

/// A rational number.
#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Fraction {
    pub num: u32,
    pub denom: u32,
}

/// Absolute clock information, written by the driver before it signals the
/// start of a cycle. Followers read it through the shared position.
#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct IoClock {
    /// Clock flags.
    pub flags: u32,
    /// Unique clock id; for a driver clock this is the driver's node id.
    pub id: u32,
    /// Time in nanoseconds against the monotonic clock.
    pub nsec: u64,
    /// Rate for position, duration and delay.
    pub rate: Fraction,
    /// Current position in samples at `rate`.
    pub position: u64,
    /// Duration of the current cycle in samples at `rate`.
    pub duration: u64,
    /// Delay between position and hardware in samples at `rate`.
    pub delay: i64,
    /// Rate difference between the clock and monotonic time.
    pub rate_diff: f64,
    /// Estimated next wakeup time in nanoseconds.
    pub next_nsec: u64,
}

/// Bar and beat information for a segment.
#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct SegmentBar {
    /// Extra flags.
    pub flags: u32,
    /// Offset in the segment of this beat.
    pub offset: u32,
    /// Time signature numerator.
    pub signature_num: f32,
    /// Time signature denominator.
    pub signature_denom: f32,
    /// Beats per minute.
    pub bpm: f64,
    /// Current beat in the segment.
    pub beat: f64,
}

/// Video frame information for a segment.
#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct SegmentVideo {
    pub flags: u32,
    /// Offset in the segment.
    pub offset: u32,
    pub framerate: Fraction,
    pub hours: u32,
    pub minutes: u32,
    pub seconds: u32,
    pub frames: u32,
}

/// A segment converts a running time to a stream position.
///
/// The segment is valid while the running time is between `start` and
/// `start + duration`; the position is then
/// `(running time - start) * rate + position`.
#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct IoSegment {
    pub version: u32,
    pub flags: u32,
    /// Running time at which this segment activates. May be in the future
    /// for pending changes.
    pub start: u64,
    /// Duration after which the segment becomes invalid. Zero extends the
    /// segment to the next one.
    pub duration: u64,
    /// Overall rate of the segment, negative for backwards time reporting.
    pub rate: f64,
    /// The stream position when the running time equals `start`.
    pub position: u64,
    pub bar: SegmentBar,
    pub video: SegmentVideo,
}

/// The position of a graph, owned by the driver and shared with every
/// follower.
///
/// Segments are ordered by their start time, which makes it possible to
/// look ahead at scheduled changes in the timeline.
#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct IoPosition {
    /// Clock position of the driver, always valid and read only.
    pub clock: IoClock,
    /// Offset subtracted from the clock position to get a running time.
    pub offset: i64,
    /// One of `PositionState`.
    pub state: u32,
    /// Number of valid segments.
    pub n_segments: u32,
    pub segments: [IoSegment; POSITION_MAX_SEGMENTS],
}

/// The per-node cycle state shared with every peer that signals the node.
///
/// The layout is a stable ABI; size and field offsets are pinned by the
/// layout test below and the fd is sealed at this size when created.
#[repr(C)]
#[derive(Debug, Copy, Clone)]
pub struct NodeActivation {
    /// One of `ActivationStatus`. Single writer per transition.
    pub status: u32,
    /// A sync is pending for this node.
    pub pending_sync: u8,
    /// A new position is pending for this node.
    pub pending_new_pos: u8,
    pub(crate) _pad: Pad<[u8; 2]>,
    /// Countdown slots; index 0 = process, index 1 reserved.
    pub state: [ActivationState; 2],
    /// Next command, one of `ActivationCommand`. Atomic swap.
    pub command: u32,
    /// Owner id with new reposition info, last one to update wins.
    pub reposition_owner: u32,
    /// Time at which the node was signalled ready to process.
    pub signal_time: u64,
    /// Time at which processing actually started.
    pub awake_time: u64,
    /// Time at which processing completed.
    pub finish_time: u64,
    /// Previous time at which the node was signalled.
    pub prev_signal_time: u64,
    /// Sync timeout in nanoseconds; position goes to RUNNING without
    /// waiting longer for sync clients.
    pub sync_timeout: u64,
    /// Number of cycles left before the sync timeout.
    pub sync_left: u64,
    /// Cpu load averaged over 1, 8 and 32 cycles.
    pub cpu_load: [f32; 3],
    /// Number of xruns.
    pub xrun_count: u32,
    /// Time of the last xrun.
    pub xrun_time: u64,
    /// Delay of the last xrun.
    pub xrun_delay: u64,
    /// Max of all xrun delays.
    pub max_delay: u64,
    /// Owners of the extra segment info structs; nodes that want to update
    /// segment info CAS their node id into this array.
    pub segment_owner: [u32; 2],
    /// Current position and segment info, updated by the driver.
    pub position: IoPosition,
    /// Reposition info, applied when the driver reads this node id from
    /// `reposition_owner`.
    pub reposition: IoSegment,
    /// Staged segment info, applied when this node id is in
    /// `segment_owner`.
    pub segment: IoSegment,
}

/// The io area through which two linked ports exchange buffer ids.
///
/// The output side writes `HAVE_DATA` and a valid id when it has produced
/// a buffer; the input side writes `NEED_DATA` after consuming. `STOPPED`
/// signals end. A buffer id of `INVALID_ID` means none.
#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct IoBuffers {
    /// The status code; node status bits or a negative errno.
    pub status: i32,
    /// A buffer id.
    pub buffer_id: u32,
}

/// Rate matching information for resampling.
#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct IoRateMatch {
    /// Extra delay in samples.
    pub delay: i32,
    /// Requested input size for the next cycle.
    pub size: u32,
    /// Rate scaler.
    pub rate: f64,
}

/// Essential buffer metadata such as flags and timestamps.
#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct MetaHeader {
    pub flags: u32,
    /// Offset in the current cycle.
    pub offset: u32,
    /// Presentation timestamp in nanoseconds.
    pub pts: i64,
    /// Decoding timestamp as a difference with pts.
    pub dts_offset: i64,
    /// Sequence number, increments with a media specific frequency.
    pub seq: u64,
}

/// Valid region of one data block of a buffer.
#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// Offset of the valid data in the block.
    pub offset: u32,
    /// Size of the valid data.
    pub size: u32,
    /// Stride of valid data.
    pub stride: i32,
    /// Chunk flags.
    pub flags: u32,
}

impl NodeActivation {
    /// The documented size of the record, sealed when the fd is created.
    pub const SIZE: usize = core::mem::size_of::<Self>();
}

#[cfg(test)]
mod tests {
    use core::mem;

    use super::*;

    #[test]
    fn activation_layout() {
        assert_eq!(mem::size_of::<IoClock>(), 64);
        assert_eq!(mem::size_of::<SegmentBar>(), 32);
        assert_eq!(mem::size_of::<SegmentVideo>(), 32);
        assert_eq!(mem::size_of::<IoSegment>(), 104);
        assert_eq!(mem::size_of::<IoPosition>(), 912);

        assert_eq!(mem::offset_of!(NodeActivation, status), 0);
        assert_eq!(mem::offset_of!(NodeActivation, pending_sync), 4);
        assert_eq!(mem::offset_of!(NodeActivation, pending_new_pos), 5);
        assert_eq!(mem::offset_of!(NodeActivation, state), 8);
        assert_eq!(mem::offset_of!(NodeActivation, command), 24);
        assert_eq!(mem::offset_of!(NodeActivation, reposition_owner), 28);
        assert_eq!(mem::offset_of!(NodeActivation, signal_time), 32);
        assert_eq!(mem::offset_of!(NodeActivation, sync_timeout), 64);
        assert_eq!(mem::offset_of!(NodeActivation, cpu_load), 80);
        assert_eq!(mem::offset_of!(NodeActivation, xrun_count), 92);
        assert_eq!(mem::offset_of!(NodeActivation, segment_owner), 120);
        assert_eq!(mem::offset_of!(NodeActivation, position), 128);
        assert_eq!(mem::size_of::<NodeActivation>(), 1248);
    }

    #[test]
    fn io_buffers_layout() {
        assert_eq!(mem::size_of::<IoBuffers>(), 8);
        assert_eq!(mem::offset_of!(IoBuffers, status), 0);
        assert_eq!(mem::offset_of!(IoBuffers, buffer_id), 4);
    }

    #[test]
    fn chunk_layout() {
        assert_eq!(mem::size_of::<Chunk>(), 16);
        assert_eq!(mem::size_of::<MetaHeader>(), 32);
    }
}
