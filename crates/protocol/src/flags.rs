//! Flag sets used across the protocol.

pod::macros::flags! {
    /// Node status bits returned from `process`.
    ///
    /// These also steer buffer exchange through the io area: an output
    /// writes `HAVE_DATA` with a valid buffer id, an input writes
    /// `NEED_DATA` after consuming, `STOPPED` signals end of stream.
    pub struct Status(i32) {
        OK;
        NEED_DATA = 1 << 0;
        HAVE_DATA = 1 << 1;
        STOPPED = 1 << 2;
        DRAINED = 1 << 3;
    }

    /// Flags on a buffer data block.
    pub struct DataFlags(u32) {
        NONE;
        /// Data is readable.
        READABLE = 1 << 0;
        /// Data is writable.
        WRITABLE = 1 << 1;
        /// Data pointer may change per cycle.
        DYNAMIC = 1 << 2;
        /// Data is mappable with simple mmap/munmap. Some memory types are
        /// not mappable (DmaBuf) unless explicitly marked with this flag.
        MAPPABLE = 1 << 3;
    }

    /// Read/write state of a parameter on a node or port.
    pub struct ParamFlags(u32) {
        NONE;
        /// Signal an update even when the read/write flags don't change.
        SERIAL = 1 << 0;
        READ = 1 << 1;
        WRITE = 1 << 2;
    }

    /// Flags describing a port.
    pub struct PortFlags(u64) {
        NONE;
        /// Port can be removed.
        REMOVABLE = 1 << 0;
        /// Processing on the port is optional.
        OPTIONAL = 1 << 1;
        /// The port can allocate buffer data.
        CAN_ALLOC_BUFFERS = 1 << 2;
        /// Data is not created from this port or will not be made available
        /// on another port.
        TERMINAL = 1 << 3;
        /// Data pointers on buffers may be changed, only blocks marked
        /// DYNAMIC can change.
        DYNAMIC_DATA = 1 << 4;
    }

    /// Flags describing a node.
    pub struct NodeFlags(u64) {
        NONE;
        /// Node can do real-time processing.
        RT = 1 << 0;
        /// Input ports can be added and removed.
        IN_DYNAMIC_PORTS = 1 << 1;
        /// Output ports can be added and removed.
        OUT_DYNAMIC_PORTS = 1 << 2;
        /// Node needs configuration before it can be started.
        NEED_CONFIGURE = 1 << 3;
        /// The process function might offload work to a worker thread.
        ASYNC = 1 << 4;
    }

    /// Flags of a shared memory block.
    pub struct MemFlags(u32) {
        NONE;
        READABLE = 1 << 0;
        WRITABLE = 1 << 1;
        /// Seal the fd when it is created.
        SEAL = 1 << 2;
        /// Map the fd on registration.
        MAP = 1 << 3;
    }

    /// Flags on a buffer chunk.
    pub struct ChunkFlags(u32) {
        NONE;
        /// Chunk data is corrupted in some way.
        CORRUPTED = 1 << 0;
        /// Chunk data is media-neutral, such as silence or black.
        EMPTY = 1 << 1;
    }

    /// Flags on a buffer meta header.
    pub struct MetaHeaderFlags(u32) {
        NONE;
        /// Data is not continuous with the previous buffer.
        DISCONT = 1 << 0;
        /// Data might be corrupted.
        CORRUPTED = 1 << 1;
        /// Media specific marker.
        MARKER = 1 << 2;
        /// Data contains a codec specific header.
        HEADER = 1 << 3;
    }

    /// Flags of the driver clock.
    pub struct IoClockFlags(u32) {
        NONE;
        /// Graph is freewheeling.
        FREEWHEEL = 1 << 0;
        /// Recovering from an xrun.
        XRUN_RECOVER = 1 << 1;
    }
}

impl Status {
    /// Test if any of the given bits are set.
    #[inline]
    pub fn intersects(self, other: Self) -> bool {
        self.into_raw() & other.into_raw() != 0
    }
}

impl ParamFlags {
    /// Read and write flags combined.
    pub const READWRITE: Self = Self::from_raw(Self::READ.into_raw() | Self::WRITE.into_raw());
}

impl DataFlags {
    pub const READWRITE: Self = Self::from_raw(Self::READABLE.into_raw() | Self::WRITABLE.into_raw());
}

impl MemFlags {
    pub const READWRITE: Self = Self::from_raw(Self::READABLE.into_raw() | Self::WRITABLE.into_raw());
}
