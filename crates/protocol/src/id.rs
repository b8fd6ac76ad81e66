//! Typed identifiers used in parameters and io areas.

pod::macros::id! {
    /// Parameter ids understood by the scheduler. This set is closed.
    pub struct Param(u32) {
        UNKNOWN;
        INVALID = 0;
        PROP_INFO = 1;
        PROPS = 2;
        ENUM_FORMAT = 3;
        FORMAT = 4;
        BUFFERS = 5;
        META = 6;
        IO = 7;
        PORT_CONFIG = 8;
        LATENCY = 9;
        RATE = 10;
    }

    /// Object types for parameter objects.
    pub struct ObjectType(u32) {
        UNKNOWN;
        PROP_INFO = 0x40001;
        PROPS = 0x40002;
        FORMAT = 0x40003;
        PARAM_BUFFERS = 0x40004;
        PARAM_META = 0x40005;
        PARAM_IO = 0x40006;
        PARAM_PORT_CONFIG = 0x40007;
        PARAM_LATENCY = 0x40008;
        COMMAND_NODE = 0x30001;
    }

    /// The kind of an io area installed with `set_io`.
    pub struct IoType(u32) {
        UNKNOWN;
        INVALID = 0;
        BUFFERS = 1;
        CLOCK = 3;
        LATENCY = 4;
        CONTROL = 5;
        NOTIFY = 6;
        POSITION = 7;
        RATE_MATCH = 8;
    }

    /// The memory type of a data block.
    pub struct DataType(u32) {
        UNKNOWN;
        INVALID = 0;
        /// An already-mapped address.
        MEM_PTR = 1;
        /// A file descriptor with offset and size, requires mmap.
        MEM_FD = 2;
        /// A dma-buf descriptor, not cpu-mapped.
        DMA_BUF = 3;
        /// A reference to a pre-registered pool entry.
        MEM_ID = 4;
    }

    /// The kind of a metadata slot on a buffer.
    pub struct Meta(u32) {
        UNKNOWN;
        INVALID = 0;
        HEADER = 1;
    }

    /// The media type of a format.
    pub struct MediaType(u32) {
        UNKNOWN;
        AUDIO = 1;
        VIDEO = 2;
        APPLICATION = 3;
    }

    /// The media subtype of a format.
    pub struct MediaSubType(u32) {
        UNKNOWN;
        RAW = 1;
        DSP = 2;
    }

    /// Sample formats for raw audio.
    pub struct AudioFormat(u32) {
        UNKNOWN;
        S16 = 1;
        S16P = 2;
        S32 = 3;
        S32P = 4;
        F32 = 5;
        F32P = 6;
        F64 = 7;
        F64P = 8;
    }

    /// Property keys of a format object.
    pub struct Format(u32) {
        UNKNOWN;
        MEDIA_TYPE = 1;
        MEDIA_SUB_TYPE = 2;
        AUDIO_FORMAT = 0x10001;
        AUDIO_RATE = 0x10002;
        AUDIO_CHANNELS = 0x10003;
    }

    /// Property keys of a buffer-requirement object.
    pub struct ParamBuffers(u32) {
        UNKNOWN;
        BUFFERS = 1;
        BLOCKS = 2;
        SIZE = 3;
        STRIDE = 4;
        ALIGN = 5;
        DATA_TYPE = 6;
    }

    /// Property keys of a metadata-requirement object.
    pub struct ParamMeta(u32) {
        UNKNOWN;
        TYPE = 1;
        SIZE = 2;
    }

    /// Property keys of an io-requirement object.
    pub struct ParamIo(u32) {
        UNKNOWN;
        ID = 1;
        SIZE = 2;
    }

    /// Property keys of a port-config object.
    pub struct ParamPortConfig(u32) {
        UNKNOWN;
        DIRECTION = 1;
        MODE = 2;
        FORMAT = 3;
    }

    /// Property keys of a latency object.
    pub struct ParamLatency(u32) {
        UNKNOWN;
        DIRECTION = 1;
        MIN_QUANTUM = 2;
        MAX_QUANTUM = 3;
        MIN_RATE = 4;
        MAX_RATE = 5;
        MIN_NS = 6;
        MAX_NS = 7;
    }

    /// Property keys of a props object.
    pub struct Prop(u32) {
        UNKNOWN;
        VOLUME = 1;
        MUTE = 2;
        FREQUENCY = 3;
    }

    /// Property keys of a prop-info object.
    pub struct PropInfo(u32) {
        UNKNOWN;
        ID = 1;
        NAME = 2;
        TYPE = 3;
    }

    /// Commands sent to a node processor.
    pub struct Command(u32) {
        UNKNOWN;
        SUSPEND = 0;
        PAUSE = 1;
        START = 2;
        FLUSH = 3;
        DRAIN = 4;
        MARKER = 5;
        PARAM_BEGIN = 6;
        PARAM_END = 7;
        REQUEST_PROCESS = 8;
    }

    /// The kind of a control in a sequence.
    pub struct ControlType(u32) {
        UNKNOWN;
        INVALID = 0;
        PROPERTIES = 1;
        MIDI = 2;
    }
}
