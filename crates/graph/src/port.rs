use std::collections::VecDeque;

use anyhow::{Result, bail};
use pod::Value;
use protocol::consts::Direction;
use protocol::flags::PortFlags;
use protocol::id::{IoType, Param};
use slab::Slab;

use crate::buffer::BufferSet;
use crate::ffi;
use crate::format::{self, AudioFormat};
use crate::id::{MemId, MixId, PortId};
use crate::memory::Region;
use crate::params::Parameters;

/// The configuration state of a port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortState {
    /// No format configured.
    Configure,
    /// Format configured, no buffers.
    Ready,
    /// Format and buffers configured.
    Paused,
}

/// A per-link view of a port, carrying its own io-buffers area.
#[derive(Debug)]
pub struct MixSlot {
    pub id: MixId,
    pub(crate) io_buffers: Option<Region<ffi::IoBuffers>>,
    pub(crate) active: bool,
}

/// One endpoint on a node.
#[derive(Debug)]
pub struct Port {
    id: PortId,
    direction: Direction,
    pub name: String,
    pub(crate) flags: PortFlags,
    pub(crate) params: Parameters,
    state: PortState,
    pub(crate) format: Option<AudioFormat>,
    pub(crate) buffers: Option<BufferSet>,
    pub(crate) mixes: Slab<MixSlot>,
    pub(crate) io_rate_match: Option<Region<ffi::IoRateMatch>>,
    /// The pool block backing the rate-match area, released with it.
    pub(crate) io_rate_match_mem: Option<MemId>,
    /// For inputs, set when the port wants a new buffer.
    pub(crate) need_data: bool,
    /// For outputs, produced buffer ids not yet handed to the mixes.
    pub(crate) ready: VecDeque<u32>,
}

impl Port {
    pub(crate) fn new(id: PortId, direction: Direction) -> Self {
        Self {
            id,
            direction,
            name: String::new(),
            flags: PortFlags::NONE,
            params: Parameters::new(),
            state: PortState::Configure,
            format: None,
            buffers: None,
            mixes: Slab::new(),
            io_rate_match: None,
            io_rate_match_mem: None,
            need_data: direction == Direction::INPUT,
            ready: VecDeque::new(),
        }
    }

    /// Access the port id.
    #[inline]
    pub fn id(&self) -> PortId {
        self.id
    }

    /// The direction of the port.
    #[inline]
    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// The configuration state of the port.
    #[inline]
    pub fn state(&self) -> PortState {
        self.state
    }

    /// The negotiated format, if any.
    #[inline]
    pub fn format(&self) -> Option<AudioFormat> {
        self.format
    }

    /// The declared flags of the port.
    #[inline]
    pub fn flags(&self) -> PortFlags {
        self.flags
    }

    /// For inputs, whether the port wants a new buffer.
    #[inline]
    pub fn need_data(&self) -> bool {
        self.need_data
    }

    /// The current rate-match request, when a resampler installed one.
    pub fn rate_match(&self) -> Option<ffi::IoRateMatch> {
        // SAFETY: Rate match is written between cycles only.
        self.io_rate_match.as_ref().map(|region| unsafe { region.read() })
    }

    /// Enumerate parameters of the given kind.
    ///
    /// Enumeration is lazy and restartable through `index`; results are
    /// narrowed against `filter` when one is given.
    pub fn enum_params(
        &self,
        id: Param,
        index: u32,
        max: u32,
        filter: Option<&Value>,
    ) -> Vec<Value> {
        let mut out = Vec::new();

        for value in self.params.get_param(id).iter().skip(index as usize) {
            if out.len() >= max as usize {
                break;
            }

            match filter {
                Some(filter) => {
                    if let Some(value) = pod::filter(value, filter) {
                        out.push(value);
                    }
                }
                None => out.push(value.clone()),
            }
        }

        out
    }

    /// Set or clear the format of the port.
    ///
    /// Clearing the format drops any installed buffers, which are returned
    /// so the caller can release them against the pool, and moves the port
    /// back to `Configure`.
    pub(crate) fn set_format(
        &mut self,
        value: Option<&Value>,
        quantum: u32,
    ) -> Result<Option<BufferSet>> {
        let Some(value) = value else {
            self.format = None;
            self.params.remove_param(Param::FORMAT);
            self.params.remove_param(Param::BUFFERS);
            self.state = PortState::Configure;
            return Ok(self.buffers.take());
        };

        let format = AudioFormat::from_value(value)?;

        let dropped = self.buffers.take();
        self.format = Some(format);
        self.params.set_param(Param::FORMAT, vec![value.clone()]);
        self.params.set_param(
            Param::BUFFERS,
            vec![format::buffers_value(
                2,
                format.blocks(),
                quantum * format.stride(),
                format.stride(),
                16,
            )],
        );
        self.state = PortState::Ready;
        Ok(dropped)
    }

    /// Install or clear the buffer set of the port.
    ///
    /// A port rejects buffers without a current format.
    pub(crate) fn use_buffers(&mut self, buffers: Option<BufferSet>) -> Result<Option<BufferSet>> {
        if self.format.is_none() && buffers.is_some() {
            bail!("Port {} has no format, cannot use buffers", self.id);
        }

        let replaced = match buffers {
            Some(buffers) => {
                let replaced = self.buffers.replace(buffers);
                self.state = PortState::Paused;
                replaced
            }
            None => {
                let replaced = self.buffers.take();

                if self.format.is_some() {
                    self.state = PortState::Ready;
                }

                replaced
            }
        };

        self.ready.clear();
        Ok(replaced)
    }

    /// Install or clear a typed io area.
    pub(crate) fn set_io(
        &mut self,
        mix: MixId,
        id: IoType,
        region: Option<Region<ffi::IoBuffers>>,
    ) -> Result<Option<Region<ffi::IoBuffers>>> {
        match id {
            IoType::BUFFERS => {
                let Some(slot) = self.mixes.get_mut(mix.index()) else {
                    bail!("Port {} has no mix slot {mix}", self.id);
                };

                let old = match region {
                    Some(region) => slot.io_buffers.replace(region),
                    None => slot.io_buffers.take(),
                };

                Ok(old)
            }
            id => bail!("Io area {id:?} is not supported on port {}", self.id),
        }
    }

    /// Validate and queue a buffer id back onto the ready side.
    ///
    /// Inputs recycle buffers of the upstream port; the id must belong to
    /// the installed set.
    pub(crate) fn reuse_buffer(&mut self, buffer_id: u32) -> Result<()> {
        let Some(buffers) = &mut self.buffers else {
            bail!("Port {} has no buffers", self.id);
        };

        if buffers.get(buffer_id).is_none() {
            bail!("Buffer {buffer_id} is not installed on port {}", self.id);
        }

        buffers.mark_free(buffer_id);
        Ok(())
    }

    /// Allocate a new mix slot, or reuse the only slot when multiple links
    /// are not allowed.
    pub(crate) fn alloc_mix(&mut self) -> MixId {
        let entry = self.mixes.vacant_entry();
        let id = MixId::new(entry.key() as u32);

        entry.insert(MixSlot {
            id,
            io_buffers: None,
            active: false,
        });

        id
    }

    /// Release a mix slot.
    pub(crate) fn release_mix(&mut self, mix: MixId) -> Option<MixSlot> {
        self.mixes.try_remove(mix.index())
    }
}

/// The ports of one node, by direction.
#[derive(Default, Debug)]
pub struct Ports {
    input_ports: Slab<Port>,
    output_ports: Slab<Port>,
}

impl Ports {
    /// Construct a new collection of ports.
    pub(crate) fn new() -> Self {
        Self {
            input_ports: Slab::new(),
            output_ports: Slab::new(),
        }
    }

    /// Iterate input ports.
    pub fn inputs(&self) -> impl Iterator<Item = &Port> {
        self.input_ports.iter().map(|(_, port)| port)
    }

    /// Iterate output ports.
    pub fn outputs(&self) -> impl Iterator<Item = &Port> {
        self.output_ports.iter().map(|(_, port)| port)
    }

    pub(crate) fn outputs_mut(&mut self) -> impl Iterator<Item = &mut Port> {
        self.output_ports.iter_mut().map(|(_, port)| port)
    }

    /// Iterate every port of both directions.
    pub(crate) fn all_mut(&mut self) -> impl Iterator<Item = &mut Port> {
        self.input_ports
            .iter_mut()
            .chain(self.output_ports.iter_mut())
            .map(|(_, port)| port)
    }

    /// Insert a new port in the specified direction.
    pub(crate) fn insert(&mut self, direction: Direction) -> Result<&mut Port> {
        let ports = self.get_direction_mut(direction)?;
        let entry = ports.vacant_entry();
        let id = PortId::new(entry.key() as u32);
        Ok(entry.insert(Port::new(id, direction)))
    }

    /// Remove a port.
    pub(crate) fn remove(&mut self, direction: Direction, id: PortId) -> Result<Port> {
        let ports = self.get_direction_mut(direction)?;

        let Some(port) = ports.try_remove(id.index()) else {
            bail!("Port {id} not found in {direction:?} ports");
        };

        Ok(port)
    }

    /// Get a port.
    pub fn get(&self, direction: Direction, id: PortId) -> Result<&Port> {
        let ports = self.get_direction(direction)?;

        let Some(port) = ports.get(id.index()) else {
            bail!("Port {id} not found in {direction:?} ports");
        };

        Ok(port)
    }

    /// Get a port mutably.
    pub(crate) fn get_mut(&mut self, direction: Direction, id: PortId) -> Result<&mut Port> {
        let ports = self.get_direction_mut(direction)?;

        let Some(port) = ports.get_mut(id.index()) else {
            bail!("Port {id} not found in {direction:?} ports");
        };

        Ok(port)
    }

    fn get_direction(&self, direction: Direction) -> Result<&Slab<Port>> {
        match direction {
            Direction::INPUT => Ok(&self.input_ports),
            Direction::OUTPUT => Ok(&self.output_ports),
            direction => bail!("Unknown port direction: {direction:?}"),
        }
    }

    fn get_direction_mut(&mut self, direction: Direction) -> Result<&mut Slab<Port>> {
        match direction {
            Direction::INPUT => Ok(&mut self.input_ports),
            Direction::OUTPUT => Ok(&mut self.output_ports),
            direction => bail!("Unknown port direction: {direction:?}"),
        }
    }
}
