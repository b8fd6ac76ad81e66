use crate::id::{LinkId, MemId, MixId, NodeId, PortId};

/// A directed binding of one output port mix slot to one input port mix
/// slot, sharing one io-buffers area.
#[derive(Debug)]
pub struct Link {
    id: LinkId,
    pub output_node: NodeId,
    pub output_port: PortId,
    pub output_mix: MixId,
    pub input_node: NodeId,
    pub input_port: PortId,
    pub input_mix: MixId,
    /// The shared block holding the io-buffers area.
    pub(crate) io_mem: MemId,
    pub(crate) active: bool,
}

impl Link {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        id: LinkId,
        output_node: NodeId,
        output_port: PortId,
        output_mix: MixId,
        input_node: NodeId,
        input_port: PortId,
        input_mix: MixId,
        io_mem: MemId,
    ) -> Self {
        Self {
            id,
            output_node,
            output_port,
            output_mix,
            input_node,
            input_port,
            input_mix,
            io_mem,
            active: false,
        }
    }

    /// The link id.
    #[inline]
    pub fn id(&self) -> LinkId {
        self.id
    }

    /// Whether the link participates in scheduling.
    #[inline]
    pub fn is_active(&self) -> bool {
        self.active
    }
}
