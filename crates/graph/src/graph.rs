use core::mem::offset_of;

use std::collections::{HashMap, HashSet, VecDeque};

use anyhow::{Context as _, Result, bail};
use pod::Value;
use protocol::Properties;
use protocol::consts::{
    ActivationCommand, ActivationStatus, Direction, INVALID_ID, PositionState,
};
use protocol::flags::{MemFlags, Status};
use protocol::id::{Command, IoType, Param};
use slab::Slab;

use crate::activation::{self, Signalled, Target};
use crate::buffer::BufferSet;
use crate::events::GraphEvent;
use crate::ffi;
use crate::format;
use crate::id::{LinkId, MixId, NodeId, PortId};
use crate::link::Link;
use crate::memory::Memory;
use crate::node::{Node, NodeState};
use crate::node_impl::{NodeImpl, ProcessContext};
use crate::ptr::{atomic, volatile};
use crate::utils::get_monotonic_nsec;
use crate::work::{Work, WorkQueue};

const DEFAULT_QUANTUM: u32 = 1024;
const DEFAULT_RATE: u32 = 48000;

/// The graph context: node and link arenas, the shared memory pool, driver
/// election and the cycle protocol.
///
/// All configuration methods run on the main loop. The hot path consists
/// of [`tick`][Graph::tick], [`handle_wake`][Graph::handle_wake] and the
/// completion plumbing they drive.
pub struct Graph {
    memory: Memory,
    nodes: Slab<Node>,
    links: Slab<Link>,
    default_quantum: u32,
    rate: u32,
    events: VecDeque<GraphEvent>,
    work: WorkQueue,
}

impl Graph {
    /// Construct a new empty graph.
    pub fn new() -> Self {
        Self {
            memory: Memory::new(),
            nodes: Slab::new(),
            links: Slab::new(),
            default_quantum: DEFAULT_QUANTUM,
            rate: DEFAULT_RATE,
            events: VecDeque::new(),
            work: WorkQueue::new(),
        }
    }

    /// Access the shared memory pool.
    pub fn memory(&mut self) -> &mut Memory {
        &mut self.memory
    }

    /// Drain the next pending event.
    pub fn poll_event(&mut self) -> Option<GraphEvent> {
        self.events.pop_front()
    }

    /// Access a node.
    pub fn node(&self, id: NodeId) -> Result<&Node> {
        let Some(node) = self.nodes.get(id.index()) else {
            bail!("No node with id {id}");
        };

        Ok(node)
    }

    pub(crate) fn node_mut(&mut self, id: NodeId) -> Result<&mut Node> {
        let Some(node) = self.nodes.get_mut(id.index()) else {
            bail!("No node with id {id}");
        };

        Ok(node)
    }

    /// Create a new node around an implementation.
    ///
    /// Allocates the activation record and the wake-fd; the node starts in
    /// the creating state and must be registered before it participates.
    #[tracing::instrument(skip(self, properties, implementation))]
    pub fn add_node(
        &mut self,
        properties: Properties,
        implementation: Box<dyn NodeImpl>,
    ) -> Result<NodeId> {
        let id = NodeId::new(self.nodes.vacant_key() as u32);

        let activation_mem = self.memory.alloc(
            &format!("activation-{id}"),
            ffi::NodeActivation::SIZE,
            MemFlags::READWRITE | MemFlags::SEAL,
        )?;

        let activation = self
            .memory
            .map_region(activation_mem, 0, ffi::NodeActivation::SIZE)?
            .cast::<ffi::NodeActivation>()?;

        activation::init_activation(&activation, id, self.default_quantum);

        let wake_fd = protocol::EventFd::new_nonblocking(0)?;

        let node = Node::new(
            id,
            properties,
            implementation,
            activation_mem,
            activation,
            wake_fd,
        );

        self.nodes.insert(node);
        tracing::info!(node = ?id, "created node");
        Ok(id)
    }

    /// Publish the node, moving it from creating to suspended.
    pub fn register(&mut self, id: NodeId) -> Result<()> {
        let node = self.node_mut(id)?;

        if node.state() != NodeState::Creating {
            bail!("Node {id} is already registered");
        }

        self.set_state(id, NodeState::Suspended)?;
        self.recalc()
    }

    /// Tear the node down, removing its links and releasing its resources.
    #[tracing::instrument(skip(self))]
    pub fn destroy_node(&mut self, id: NodeId) -> Result<()> {
        let links: Vec<LinkId> = self
            .links
            .iter()
            .filter(|(_, l)| l.output_node == id || l.input_node == id)
            .map(|(_, l)| l.id())
            .collect();

        for link in links {
            self.unlink(link)?;
        }

        self.work.abandon(id);

        let Some(mut node) = self.nodes.try_remove(id.index()) else {
            bail!("No node with id {id}");
        };

        for port in node.ports.all_mut() {
            if let Some(buffers) = port.buffers.take() {
                buffers.release(&mut self.memory);
            }

            if let Some(rate_match) = port.io_rate_match.take() {
                self.memory.free(rate_match);
            }

            if let Some(mem) = port.io_rate_match_mem.take() {
                self.memory.release(mem);
            }
        }

        if let Some(position) = node.position.take() {
            self.memory.free(position);
        }

        if let Some(control) = node.io_control.take() {
            self.memory.free(control);
        }

        if let Some(control_mem) = node.io_control_mem.take() {
            self.memory.release(control_mem);
        }

        self.memory.free(node.activation.clone());
        self.memory.release(node.activation_mem);

        self.recalc()
    }

    /// Add a port to a node.
    pub fn add_port(&mut self, id: NodeId, direction: Direction) -> Result<PortId> {
        let node = self.node_mut(id)?;
        let port = node.ports.insert(direction)?;
        Ok(port.id())
    }

    /// Remove a port from a node.
    pub fn remove_port(&mut self, id: NodeId, direction: Direction, port: PortId) -> Result<()> {
        let in_use = self.links.iter().any(|(_, l)| {
            (l.output_node == id && l.output_port == port && direction == Direction::OUTPUT)
                || (l.input_node == id && l.input_port == port && direction == Direction::INPUT)
        });

        if in_use {
            bail!("Port {port} on node {id} is linked");
        }

        let memory = &mut self.memory;
        let node = self
            .nodes
            .get_mut(id.index())
            .with_context(|| format!("No node with id {id}"))?;

        let mut removed = node.ports.remove(direction, port)?;

        if let Some(buffers) = removed.buffers.take() {
            buffers.release(memory);
        }

        if let Some(rate_match) = removed.io_rate_match.take() {
            memory.free(rate_match);
        }

        if let Some(mem) = removed.io_rate_match_mem.take() {
            memory.release(mem);
        }

        Ok(())
    }

    /// Replace the declared values of a port parameter.
    ///
    /// This is how implementations publish what they can do, such as their
    /// format menu.
    pub fn port_update_params(
        &mut self,
        id: NodeId,
        direction: Direction,
        port: PortId,
        param: Param,
        values: Vec<Value>,
    ) -> Result<()> {
        let node = self.node_mut(id)?;
        let port = node.ports.get_mut(direction, port)?;
        port.params.set_param(param, values);
        Ok(())
    }

    /// Enumerate parameters on a port.
    pub fn port_enum_params(
        &self,
        id: NodeId,
        direction: Direction,
        port: PortId,
        param: Param,
        index: u32,
        max: u32,
        filter: Option<&Value>,
    ) -> Result<Vec<Value>> {
        let node = self.node(id)?;
        let port = node.ports.get(direction, port)?;
        Ok(port.enum_params(param, index, max, filter))
    }

    /// Set a parameter on a port.
    ///
    /// Setting a format moves the port to ready; clearing it drops buffers
    /// and moves the port back to configure.
    pub fn port_set_param(
        &mut self,
        id: NodeId,
        direction: Direction,
        port_id: PortId,
        param: Param,
        value: Option<&Value>,
    ) -> Result<()> {
        let quantum = self.default_quantum;
        let memory = &mut self.memory;

        let node = self
            .nodes
            .get_mut(id.index())
            .with_context(|| format!("No node with id {id}"))?;

        let port = node.ports.get_mut(direction, port_id)?;

        match param {
            Param::FORMAT => {
                if let Some(dropped) = port.set_format(value, quantum)? {
                    dropped.release(memory);
                }
            }
            param => match value {
                Some(value) => port.params.set_param(param, vec![value.clone()]),
                None => {
                    port.params.remove_param(param);
                }
            },
        }

        node.implementation
            .port_set_param(direction, port_id, param, value)?;
        Ok(())
    }

    /// Recycle a buffer id on an input port.
    ///
    /// The id must belong to the installed set; the recycled buffer is
    /// offered back to the upstream producer through the mix io area.
    pub fn port_reuse_buffer(&mut self, id: NodeId, port_id: PortId, buffer: u32) -> Result<()> {
        let node = self.node_mut(id)?;
        let port = node.ports.get_mut(Direction::INPUT, port_id)?;
        port.reuse_buffer(buffer)?;

        for (_, mix) in port.mixes.iter_mut() {
            let Some(io) = &mix.io_buffers else {
                continue;
            };

            // SAFETY: Consumer-side write, per the io-buffers handshake.
            unsafe {
                io.write(ffi::IoBuffers {
                    status: Status::NEED_DATA.into_raw(),
                    buffer_id: buffer,
                });
            }
        }

        node.implementation.reuse_buffer(port_id, buffer)?;
        Ok(())
    }

    /// Mark a node as living in another process.
    ///
    /// Exported nodes are never processed locally; their wake-fd and
    /// activation are mapped by the owning client, which runs the cycle
    /// protocol on its own data loop.
    pub fn set_exported(&mut self, id: NodeId, exported: bool) -> Result<()> {
        let node = self.node_mut(id)?;
        node.exported = exported;
        Ok(())
    }

    /// Change the operator's activation request for the node.
    pub fn set_active(&mut self, id: NodeId, active: bool) -> Result<()> {
        {
            let node = self.node_mut(id)?;
            node.active = active;
        }

        if active {
            self.maybe_start(id)?;
        } else if self.node(id)?.state() == NodeState::Running {
            self.pause_node(id)?;
        }

        self.recalc()
    }

    /// Send a command to a node, driving its state machine.
    pub fn send_command(&mut self, id: NodeId, command: Command) -> Result<()> {
        match command {
            Command::START => self.maybe_start(id),
            Command::PAUSE => self.pause_node(id),
            Command::SUSPEND => self.suspend_node(id),
            command => {
                let node = self.node_mut(id)?;
                node.implementation.send_command(command)?;
                Ok(())
            }
        }
    }

    /// Post a transport start command into the driver's activation.
    pub fn transport_start(&mut self, driver: NodeId) -> Result<()> {
        let node = self.node(driver)?;
        atomic!(node.activation(), command).store(ActivationCommand::START.into_raw());
        Ok(())
    }

    /// Post a transport stop command into the driver's activation.
    pub fn transport_stop(&mut self, driver: NodeId) -> Result<()> {
        let node = self.node(driver)?;
        atomic!(node.activation(), command).store(ActivationCommand::STOP.into_raw());
        Ok(())
    }

    /// Claim ownership of a segment info slot on the driver.
    ///
    /// Claiming is a compare-and-swap against an unowned slot; the winner
    /// stays the owner until it releases the slot.
    pub fn claim_segment_owner(&mut self, driver: NodeId, index: usize, owner: NodeId) -> Result<bool> {
        if index >= 2 {
            bail!("Segment owner index {index} out of range");
        }

        let node = self.node(driver)?;
        let a = node.activation();

        let claimed = match index {
            0 => atomic!(a, segment_owner[0]).compare_exchange(INVALID_ID, owner.into_u32()),
            _ => atomic!(a, segment_owner[1]).compare_exchange(INVALID_ID, owner.into_u32()),
        };

        Ok(claimed)
    }

    /// Stage bar segment info on a follower, picked up by the driver at the
    /// next tick if the follower owns the slot.
    pub fn stage_segment_bar(&mut self, id: NodeId, bar: ffi::SegmentBar) -> Result<()> {
        let node = self.node(id)?;
        volatile!(node.activation(), segment.bar).write(bar);
        Ok(())
    }

    /// Request a reposition from a follower.
    ///
    /// The follower stages the segment in its activation and registers as
    /// the reposition owner; the last owner to register wins the cycle.
    pub fn request_reposition(
        &mut self,
        driver: NodeId,
        id: NodeId,
        segment: ffi::IoSegment,
    ) -> Result<()> {
        {
            let node = self.node(id)?;
            volatile!(node.activation(), reposition).write(segment);
        }

        let node = self.node(driver)?;
        atomic!(node.activation(), reposition_owner).swap(id.into_u32());
        Ok(())
    }

    /// Enable or disable the rate-match io area on a port.
    ///
    /// Resamplers use the area to request a different input size for the
    /// next cycle.
    pub fn port_set_rate_match(
        &mut self,
        id: NodeId,
        direction: Direction,
        port_id: PortId,
        enable: bool,
    ) -> Result<()> {
        let (old, old_mem) = {
            let node = self.node_mut(id)?;
            let port = node.ports.get_mut(direction, port_id)?;
            (port.io_rate_match.take(), port.io_rate_match_mem.take())
        };

        if let Some(old) = old {
            self.memory.free(old);
        }

        if let Some(old_mem) = old_mem {
            self.memory.release(old_mem);
        }

        if !enable {
            let node = self.node_mut(id)?;
            node.implementation
                .port_set_io(direction, port_id, MixId::new(0), IoType::RATE_MATCH, None)?;
            return Ok(());
        }

        let size = core::mem::size_of::<ffi::IoRateMatch>();

        let mem = self.memory.alloc(
            &format!("rate-match-{id}-{port_id}"),
            size,
            MemFlags::READWRITE | MemFlags::SEAL,
        )?;

        let region = self
            .memory
            .map_region(mem, 0, size)?
            .cast::<ffi::IoRateMatch>()?;

        // SAFETY: Fresh area, nothing else references it yet.
        unsafe {
            region.write(ffi::IoRateMatch {
                delay: 0,
                size: 0,
                rate: 1.0,
            });
        }

        let node = self.node_mut(id)?;
        let port = node.ports.get_mut(direction, port_id)?;
        port.io_rate_match = Some(region);
        port.io_rate_match_mem = Some(mem);

        node.implementation.port_set_io(
            direction,
            port_id,
            MixId::new(0),
            IoType::RATE_MATCH,
            Some((mem, 0, size)),
        )?;

        Ok(())
    }

    /// Install or clear the control io area of a node.
    ///
    /// The value must be a sequence of timed controls; it is encoded into a
    /// shared region the node's process consumes in offset order within one
    /// cycle.
    pub fn set_node_control(&mut self, id: NodeId, value: Option<&Value>) -> Result<()> {
        let (old, old_mem) = {
            let node = self.node_mut(id)?;
            (node.io_control.take(), node.io_control_mem.take())
        };

        if let Some(old) = old {
            self.memory.free(old);
        }

        if let Some(old_mem) = old_mem {
            self.memory.release(old_mem);
        }

        let Some(value) = value else {
            let node = self.node_mut(id)?;
            node.implementation.set_io(IoType::CONTROL, None)?;
            return Ok(());
        };

        if !matches!(value, Value::Sequence(..)) {
            bail!("Control io for node {id} must be a sequence");
        }

        let bytes = value.encode()?;

        let mem = self.memory.alloc(
            &format!("control-{id}"),
            bytes.len(),
            MemFlags::READWRITE | MemFlags::SEAL,
        )?;

        let mut region = self.memory.map_region(mem, 0, bytes.len())?.cast_bytes();

        // SAFETY: Freshly mapped region, nothing else references it yet.
        unsafe {
            region.as_slice_mut().copy_from_slice(&bytes);
        }

        let size = bytes.len();
        let node = self.node_mut(id)?;
        node.io_control = Some(region);
        node.io_control_mem = Some(mem);
        node.implementation
            .set_io(IoType::CONTROL, Some((mem, 0, size)))?;
        Ok(())
    }

    /// Put the node into the error state with a reason.
    ///
    /// Peers keep draining; they observe stopped io areas instead of
    /// stalling the cycle.
    pub fn set_node_error(&mut self, id: NodeId, reason: impl Into<String>) {
        let reason = reason.into();

        if let Ok(node) = self.node_mut(id) {
            node.error = Some(reason.clone());

            for port in node.ports.all_mut() {
                for (_, mix) in port.mixes.iter_mut() {
                    if let Some(io) = &mix.io_buffers {
                        // SAFETY: Error teardown; peers only ever read a
                        // stopped status from here on.
                        unsafe {
                            io.write(ffi::IoBuffers {
                                status: Status::STOPPED.into_raw(),
                                buffer_id: INVALID_ID,
                            });
                        }
                    }
                }
            }
        }

        let _ = self.set_state(id, NodeState::Error);
        self.events.push_back(GraphEvent::NodeError { node: id, reason });
        let _ = self.recalc();
    }

    /// Report an async result for a node, completing pending work.
    pub fn handle_result(&mut self, id: NodeId, seq: u32, res: i32) -> Result<()> {
        let work = self.work.complete(id, seq);

        self.events.push_back(GraphEvent::Result { node: id, seq, res });

        let Some(work) = work else {
            return Ok(());
        };

        if res < 0 {
            tracing::warn!(node = ?id, seq, res, "async operation failed");
            return Ok(());
        }

        match work {
            Work::FinishStart => {
                self.set_state(id, NodeState::Running)?;
                self.recalc()
            }
            Work::FinishPause => {
                self.set_state(id, NodeState::Idle)?;
                self.recalc()
            }
            Work::FinishSuspend => {
                self.set_state(id, NodeState::Suspended)?;
                self.recalc()
            }
        }
    }

    fn set_state(&mut self, id: NodeId, new: NodeState) -> Result<()> {
        let node = self.node_mut(id)?;
        let old = node.state;

        if old == new {
            return Ok(());
        }

        node.state = new;

        if new != NodeState::Error {
            node.error = None;
        }

        tracing::debug!(node = ?id, ?old, ?new, "state changed");
        self.events
            .push_back(GraphEvent::NodeStateChanged { node: id, old, new });
        Ok(())
    }

    /// Start the node if the operator asked for it and the start condition
    /// holds.
    pub fn maybe_start(&mut self, id: NodeId) -> Result<()> {
        let seq = {
            let node = self.node_mut(id)?;

            if !node.active
                || !matches!(node.state(), NodeState::Suspended | NodeState::Idle)
                || !node.start_condition()
            {
                return Ok(());
            }

            node.implementation.send_command(Command::START)?
        };

        if seq > 0 {
            self.work.add(id, seq as u32, Work::FinishStart);
            return Ok(());
        }

        self.set_state(id, NodeState::Running)?;
        self.recalc()
    }

    /// Pause the node, removing it from its driver's scheduling graph.
    pub fn pause_node(&mut self, id: NodeId) -> Result<()> {
        let seq = {
            let node = self.node_mut(id)?;

            if node.state() != NodeState::Running {
                return Ok(());
            }

            node.implementation.send_command(Command::PAUSE)?
        };

        if seq > 0 {
            self.work.add(id, seq as u32, Work::FinishPause);
            return Ok(());
        }

        self.set_state(id, NodeState::Idle)?;
        self.recalc()
    }

    /// Suspend the node, clearing the formats on all its ports.
    pub fn suspend_node(&mut self, id: NodeId) -> Result<()> {
        self.pause_node(id)?;

        {
            let quantum = self.default_quantum;
            let memory = &mut self.memory;

            let node = self
                .nodes
                .get_mut(id.index())
                .with_context(|| format!("No node with id {id}"))?;

            if !matches!(node.state(), NodeState::Idle | NodeState::Suspended) {
                return Ok(());
            }

            for port in node.ports.all_mut() {
                if let Some(dropped) = port.set_format(None, quantum)? {
                    dropped.release(memory);
                }
            }

            node.implementation.send_command(Command::SUSPEND)?;
        }

        self.set_state(id, NodeState::Suspended)?;
        self.recalc()
    }

    /// Create a link between an output port and an input port.
    ///
    /// Negotiates the format and buffers, installs the shared io-buffers
    /// area on both mix slots and activates the link.
    #[tracing::instrument(skip(self))]
    pub fn link(
        &mut self,
        output: (NodeId, PortId),
        input: (NodeId, PortId),
    ) -> Result<LinkId> {
        let (output_node, output_port) = output;
        let (input_node, input_port) = input;

        if output_node == input_node {
            bail!("Cannot link node {output_node} to itself");
        }

        // Negotiate the format across both ports.
        let out_formats = self.port_enum_params(
            output_node,
            Direction::OUTPUT,
            output_port,
            Param::ENUM_FORMAT,
            0,
            u32::MAX,
            None,
        )?;

        let in_formats = self.port_enum_params(
            input_node,
            Direction::INPUT,
            input_port,
            Param::ENUM_FORMAT,
            0,
            u32::MAX,
            None,
        )?;

        let Some(format_value) = format::negotiate(&out_formats, &in_formats) else {
            bail!(
                "No common format between {output_node}:{output_port} and {input_node}:{input_port}"
            );
        };

        // The output side dictates the layout, so it is configured first.
        self.port_set_param(
            output_node,
            Direction::OUTPUT,
            output_port,
            Param::FORMAT,
            Some(&format_value),
        )?;

        self.port_set_param(
            input_node,
            Direction::INPUT,
            input_port,
            Param::FORMAT,
            Some(&format_value),
        )?;

        let format = crate::format::AudioFormat::from_value(&format_value)?;

        // Merge the buffer requirements both sides reported.
        let out_req = self.buffer_requirements(output_node, Direction::OUTPUT, output_port)?;
        let in_req = self.buffer_requirements(input_node, Direction::INPUT, input_port)?;

        let n_buffers = out_req.0.max(in_req.0).clamp(1, 32);
        let size = out_req.1.max(in_req.1);
        let blocks = format.blocks();

        let link_id = LinkId::new(self.links.vacant_key() as u32);

        // One buffer set satisfies both ports; the output side allocates.
        let out_set = BufferSet::alloc(
            &mut self.memory,
            &format!("buffers-{link_id}"),
            n_buffers,
            blocks,
            size,
            true,
        )?;

        let buffers_mem = out_set.mem;

        let in_set = BufferSet::map_view(
            &mut self.memory,
            buffers_mem,
            n_buffers,
            blocks,
            size,
            true,
        )?;

        // The shared io area both ports exchange buffer ids through.
        let io_mem = self.memory.alloc(
            &format!("io-buffers-{link_id}"),
            core::mem::size_of::<ffi::IoBuffers>(),
            MemFlags::READWRITE | MemFlags::SEAL,
        )?;

        let out_io = self
            .memory
            .map_region(io_mem, 0, core::mem::size_of::<ffi::IoBuffers>())?
            .cast::<ffi::IoBuffers>()?;

        let in_io = self
            .memory
            .map_region(io_mem, 0, core::mem::size_of::<ffi::IoBuffers>())?
            .cast::<ffi::IoBuffers>()?;

        // SAFETY: Fresh io area, nothing else references it yet.
        unsafe {
            out_io.write(ffi::IoBuffers {
                status: Status::NEED_DATA.into_raw(),
                buffer_id: INVALID_ID,
            });
        }

        let output_mix = {
            let memory = &mut self.memory;
            let node = self
                .nodes
                .get_mut(output_node.index())
                .with_context(|| format!("No node with id {output_node}"))?;

            let port = node.ports.get_mut(Direction::OUTPUT, output_port)?;
            let mix = port.alloc_mix();

            if let Some(replaced) = port.use_buffers(Some(out_set))? {
                replaced.release(memory);
            }

            let port = node.ports.get_mut(Direction::OUTPUT, output_port)?;
            port.set_io(mix, IoType::BUFFERS, Some(out_io))?;

            if let Some(slot) = port.mixes.get_mut(mix.index()) {
                slot.active = true;
            }

            node.n_used_output_links += 1;
            node.n_ready_output_links += 1;
            node.implementation.port_use_buffers(
                Direction::OUTPUT,
                output_port,
                mix,
                n_buffers,
            )?;
            node.implementation.port_set_io(
                Direction::OUTPUT,
                output_port,
                mix,
                IoType::BUFFERS,
                Some((io_mem, 0, core::mem::size_of::<ffi::IoBuffers>())),
            )?;
            mix
        };

        let input_mix = {
            let memory = &mut self.memory;
            let node = self
                .nodes
                .get_mut(input_node.index())
                .with_context(|| format!("No node with id {input_node}"))?;

            let port = node.ports.get_mut(Direction::INPUT, input_port)?;
            let mix = port.alloc_mix();

            if let Some(replaced) = port.use_buffers(Some(in_set))? {
                replaced.release(memory);
            }

            let port = node.ports.get_mut(Direction::INPUT, input_port)?;
            port.set_io(mix, IoType::BUFFERS, Some(in_io))?;

            if let Some(slot) = port.mixes.get_mut(mix.index()) {
                slot.active = true;
            }

            node.n_used_input_links += 1;
            node.n_ready_input_links += 1;
            node.implementation
                .port_use_buffers(Direction::INPUT, input_port, mix, n_buffers)?;
            node.implementation.port_set_io(
                Direction::INPUT,
                input_port,
                mix,
                IoType::BUFFERS,
                Some((io_mem, 0, core::mem::size_of::<ffi::IoBuffers>())),
            )?;
            mix
        };

        let mut link = Link::new(
            link_id,
            output_node,
            output_port,
            output_mix,
            input_node,
            input_port,
            input_mix,
            io_mem,
        );

        link.active = true;
        self.links.insert(link);

        tracing::info!(
            ?link_id,
            ?output_node,
            ?output_port,
            ?input_node,
            ?input_port,
            "linked"
        );

        self.recalc()?;
        self.maybe_start(output_node)?;
        self.maybe_start(input_node)?;
        Ok(link_id)
    }

    /// Destroy a link, the mirror image of link creation.
    #[tracing::instrument(skip(self))]
    pub fn unlink(&mut self, id: LinkId) -> Result<()> {
        let Some(link) = self.links.try_remove(id.index()) else {
            bail!("No link with id {id}");
        };

        {
            let memory = &mut self.memory;

            if let Some(node) = self.nodes.get_mut(link.output_node.index()) {
                if let Ok(port) = node.ports.get_mut(Direction::OUTPUT, link.output_port) {
                    let replaced = port.use_buffers(None)?;
                    let io = port.set_io(link.output_mix, IoType::BUFFERS, None)?;
                    port.release_mix(link.output_mix);

                    if let Some(buffers) = replaced {
                        buffers.release(memory);
                    }

                    if let Some(io) = io {
                        memory.free(io);
                    }
                }

                if link.active {
                    node.n_used_output_links = node.n_used_output_links.saturating_sub(1);
                    node.n_ready_output_links = node.n_ready_output_links.saturating_sub(1);
                }

                node.implementation.port_set_io(
                    Direction::OUTPUT,
                    link.output_port,
                    link.output_mix,
                    IoType::BUFFERS,
                    None,
                )?;
            }
        }

        {
            let memory = &mut self.memory;

            if let Some(node) = self.nodes.get_mut(link.input_node.index()) {
                if let Ok(port) = node.ports.get_mut(Direction::INPUT, link.input_port) {
                    let replaced = port.use_buffers(None)?;
                    let io = port.set_io(link.input_mix, IoType::BUFFERS, None)?;
                    port.release_mix(link.input_mix);

                    if let Some(buffers) = replaced {
                        buffers.release(memory);
                    }

                    if let Some(io) = io {
                        memory.free(io);
                    }
                }

                if link.active {
                    node.n_used_input_links = node.n_used_input_links.saturating_sub(1);
                    node.n_ready_input_links = node.n_ready_input_links.saturating_sub(1);
                }

                node.implementation.port_set_io(
                    Direction::INPUT,
                    link.input_port,
                    link.input_mix,
                    IoType::BUFFERS,
                    None,
                )?;
            }
        }

        self.memory.release(link.io_mem);
        self.recalc()
    }

    fn buffer_requirements(
        &self,
        id: NodeId,
        direction: Direction,
        port: PortId,
    ) -> Result<(u32, u32)> {
        let node = self.node(id)?;
        let port = node.ports.get(direction, port)?;

        let mut n_buffers = 2u32;
        let mut size = 0u32;

        for value in port.params.get_param(Param::BUFFERS) {
            let Some(object) = value.as_object() else {
                continue;
            };

            if let Some(v) = object.property(protocol::id::ParamBuffers::BUFFERS) {
                let v = pod::fixate(v);

                if let Some(v) = v.as_int() {
                    n_buffers = n_buffers.max(v as u32);
                }
            }

            if let Some(v) = object.property(protocol::id::ParamBuffers::SIZE) {
                let v = pod::fixate(v);

                if let Some(v) = v.as_int() {
                    size = size.max(v as u32);
                }
            }
        }

        if size == 0 {
            let stride = port.format.map(|f| f.stride()).unwrap_or(4);
            size = self.default_quantum * stride;
        }

        Ok((n_buffers, size))
    }

    /// Re-run driver election and rebuild the scheduling structures.
    ///
    /// Runs on the main loop on any add/remove of nodes or links and on
    /// activation changes; the data loop observes the new lists only at
    /// its poll safe point.
    pub fn recalc(&mut self) -> Result<()> {
        let ids: Vec<NodeId> = self
            .nodes
            .iter()
            .filter(|(_, n)| n.state() != NodeState::Creating)
            .map(|(_, n)| n.id())
            .collect();

        // Union the registered nodes over the active links.
        let mut component: HashMap<NodeId, NodeId> = ids.iter().map(|&n| (n, n)).collect();

        fn root(component: &mut HashMap<NodeId, NodeId>, mut n: NodeId) -> NodeId {
            while component[&n] != n {
                let parent = component[&n];
                n = parent;
            }

            n
        }

        for (_, link) in self.links.iter() {
            if !link.active {
                continue;
            }

            if !component.contains_key(&link.output_node) || !component.contains_key(&link.input_node)
            {
                continue;
            }

            let a = root(&mut component, link.output_node);
            let b = root(&mut component, link.input_node);

            if a != b {
                let low = a.min(b);
                let high = a.max(b);
                component.insert(high, low);
            }
        }

        // Elect one driver per component: the lowest-id capable node.
        let mut driver_of: HashMap<NodeId, NodeId> = HashMap::new();
        let mut global_driver: Option<NodeId> = None;

        for &id in &ids {
            let node = self.node(id)?;

            if !node.driver {
                continue;
            }

            let r = root(&mut component, id);

            let entry = driver_of.entry(r).or_insert(id);
            *entry = (*entry).min(id);

            global_driver = Some(match global_driver {
                Some(d) => d.min(id),
                None => id,
            });
        }

        // Assign drivers and masters.
        let mut assignments: Vec<(NodeId, Option<NodeId>)> = Vec::with_capacity(ids.len());

        for &id in &ids {
            let r = root(&mut component, id);
            let mut driver = driver_of.get(&r).copied();

            if driver.is_none() && self.node(id)?.want_driver {
                driver = global_driver;
            }

            assignments.push((id, driver));
        }

        for (id, driver) in &assignments {
            let previous = {
                let node = self.node_mut(*id)?;
                let previous = node.driver_node;
                node.driver_node = *driver;
                node.master = node.driver && *driver == Some(*id);
                node.target_list.clear();
                node.members.clear();
                node.seed_targets.clear();
                node.driver_seed = false;
                previous
            };

            if previous != *driver {
                if let Some(driver) = *driver {
                    self.events.push_back(GraphEvent::DriverChanged {
                        node: *id,
                        driver,
                    });
                }

                self.install_position(*id, *driver)?;
            }
        }

        // Build the walk per driver component over running members.
        let drivers: HashSet<NodeId> = assignments.iter().filter_map(|(_, d)| *d).collect();

        for driver in drivers {
            self.build_component(driver, &assignments)?;
        }

        Ok(())
    }

    fn install_position(&mut self, id: NodeId, driver: Option<NodeId>) -> Result<()> {
        let old = {
            let node = self.node_mut(id)?;
            node.position.take()
        };

        if let Some(old) = old {
            self.memory.free(old);
        }

        let Some(driver) = driver else {
            return Ok(());
        };

        let mem = self.node(driver)?.activation_mem;

        let region = self
            .memory
            .map_region(
                mem,
                offset_of!(ffi::NodeActivation, position),
                core::mem::size_of::<ffi::IoPosition>(),
            )?
            .cast::<ffi::IoPosition>()?;

        let node = self.node_mut(id)?;
        node.position = Some(region);
        node.implementation.set_io(
            IoType::POSITION,
            Some((
                mem,
                offset_of!(ffi::NodeActivation, position),
                core::mem::size_of::<ffi::IoPosition>(),
            )),
        )?;

        Ok(())
    }

    fn build_component(
        &mut self,
        driver: NodeId,
        assignments: &[(NodeId, Option<NodeId>)],
    ) -> Result<()> {
        let members: Vec<NodeId> = assignments
            .iter()
            .filter(|(id, d)| {
                *d == Some(driver)
                    && self
                        .node(*id)
                        .map(|n| n.state() == NodeState::Running)
                        .unwrap_or(false)
            })
            .map(|(id, _)| *id)
            .collect();

        if members.is_empty() || !members.contains(&driver) {
            return Ok(());
        }

        // Successors and in-degrees over the active links between members.
        let mut successors: HashMap<NodeId, Vec<NodeId>> =
            members.iter().map(|&m| (m, Vec::new())).collect();
        let mut in_degree: HashMap<NodeId, u32> = members.iter().map(|&m| (m, 0)).collect();

        for (_, link) in self.links.iter() {
            if !link.active {
                continue;
            }

            if !successors.contains_key(&link.output_node)
                || !successors.contains_key(&link.input_node)
            {
                continue;
            }

            let succ = successors.entry(link.output_node).or_default();

            if !succ.contains(&link.input_node) {
                succ.push(link.input_node);
                *in_degree.entry(link.input_node).or_default() += 1;
            }
        }

        // Every node signals its successors; nodes with none close the
        // cycle by signalling the driver.
        let mut required: HashMap<NodeId, u32> = members.iter().map(|&m| (m, 0)).collect();
        let mut target_lists: HashMap<NodeId, Vec<NodeId>> = HashMap::new();
        let mut seeds: Vec<NodeId> = Vec::new();

        for &member in &members {
            let mut targets = successors.get(&member).cloned().unwrap_or_default();

            if targets.is_empty() && member != driver {
                targets.push(driver);
            }

            for &t in &targets {
                *required.entry(t).or_default() += 1;
            }

            target_lists.insert(member, targets);

            if in_degree.get(&member).copied().unwrap_or_default() == 0 {
                if member == driver {
                    // The driver itself processes directly at the tick.
                } else {
                    seeds.push(member);
                    *required.entry(member).or_default() += 1;
                }
            }
        }

        // The quantum of the component is the smallest non-zero request.
        let quantum = members
            .iter()
            .filter_map(|&m| {
                let q = self.node(m).ok()?.quantum_size;
                (q != 0).then_some(q)
            })
            .min()
            .unwrap_or(self.default_quantum);

        // The clock rate follows the driver's negotiated port format.
        let rate = {
            let node = self.node(driver)?;
            node.ports
                .inputs()
                .chain(node.ports.outputs())
                .find_map(|p| p.format.map(|f| f.rate))
                .unwrap_or(self.rate)
        };

        // Publish required counts and build the target structures.
        for &member in &members {
            let list = target_lists.get(&member).cloned().unwrap_or_default();
            let mut targets = Vec::with_capacity(list.len());

            for t in list {
                targets.push(self.make_target(t, t == driver)?);
            }

            let req = required.get(&member).copied().unwrap_or_default();

            let node = self.node_mut(member)?;
            node.target_list = targets;

            let a = node.activation();
            volatile!(a, state[0].required).write(req);
            atomic!(a, state[0].pending).store(req);
            atomic!(a, status).store(ActivationStatus::NOT_TRIGGERED.into_raw());
        }

        let mut member_targets = Vec::with_capacity(members.len());
        let mut seed_targets = Vec::with_capacity(seeds.len());

        for &member in &members {
            member_targets.push(self.make_target(member, member == driver)?);
        }

        for &seed in &seeds {
            seed_targets.push(self.make_target(seed, false)?);
        }

        let driver_seed = in_degree.get(&driver).copied().unwrap_or_default() == 0;

        let node = self.node_mut(driver)?;
        node.members = member_targets;
        node.seed_targets = seed_targets;
        node.driver_seed = driver_seed;

        let a = node.activation();
        volatile!(a, position.clock.id).write(driver.into_u32());
        volatile!(a, position.clock.duration).write(u64::from(quantum));
        volatile!(a, position.clock.rate).write(ffi::Fraction {
            num: 1,
            denom: rate,
        });

        tracing::debug!(
            ?driver,
            members = members.len(),
            quantum,
            rate,
            "rebuilt component"
        );

        Ok(())
    }

    fn make_target(&self, id: NodeId, driver: bool) -> Result<Target> {
        let node = self.node(id)?;

        Ok(Target {
            node: id,
            activation: node.activation.clone(),
            signal_fd: node.wake_fd.try_clone()?,
            driver,
        })
    }

    /// One driver tick: close out an overrun, apply staged updates, reset
    /// the component and seed the cycle.
    pub fn tick(&mut self, driver: NodeId) -> Result<()> {
        let now = get_monotonic_nsec()?;

        let run_driver = {
            let node = self
                .nodes
                .get_mut(driver.index())
                .with_context(|| format!("No node with id {driver}"))?;

            if !node.master {
                bail!("Node {driver} is not a master driver");
            }

            if node.state() != NodeState::Running {
                return Ok(());
            }

            let a = node.activation.clone();

            // A cycle still in flight at the next tick is an overrun; it is
            // recorded and the graph moves on, data is not replayed.
            if node.cycle_open {
                let pending = atomic!(a, state[0].pending).load();

                if pending != 0u32 {
                    let signal_time = volatile!(a, signal_time).read();
                    let delay = now.saturating_sub(signal_time);
                    node.record_xrun(now, delay);
                    node.dump_members();

                    // The missed closure still advances the clock and the
                    // sync countdown; data is not replayed.
                    advance_position(node);
                    self.events.push_back(GraphEvent::XRun { node: driver });
                }

                let node = self
                    .nodes
                    .get_mut(driver.index())
                    .with_context(|| format!("No node with id {driver}"))?;
                node.cycle_open = false;
                node.tick_processed = false;
            }

            let node = self
                .nodes
                .get_mut(driver.index())
                .with_context(|| format!("No node with id {driver}"))?;
            let a = node.activation.clone();

            let cycle_ns = node.cycle_duration_ns().max(1);

            // Apply staged transport commands.
            let command = ActivationCommand::from_raw(
                atomic!(a, command).swap(ActivationCommand::NONE.into_raw()),
            );
            let reposition_owner = atomic!(a, reposition_owner).swap(INVALID_ID);

            let mut sync_start = reposition_owner != INVALID_ID;

            match command {
                ActivationCommand::START => {
                    volatile!(a, position.state).write(PositionState::STARTING.into_raw());
                    let timeout = volatile!(a, sync_timeout).read();
                    volatile!(a, sync_left).write((timeout / cycle_ns).max(1));
                    sync_start = true;
                }
                ActivationCommand::STOP => {
                    volatile!(a, position.state).write(PositionState::STOPPED.into_raw());
                }
                _ => {}
            }

            let owner0 = atomic!(a, segment_owner[0]).load();
            let owner1 = atomic!(a, segment_owner[1]).load();

            // Reset every member for the new cycle, collecting staged
            // segment info from the slot owners.
            for t in &node.members {
                // SAFETY: The cycle is closed, no signal is in flight.
                unsafe {
                    t.reset();
                }

                if t.node.into_u32() == owner0 && owner0 != INVALID_ID {
                    let bar = volatile!(t.activation, segment.bar).read();
                    volatile!(a, position.segments[0].bar).write(bar);
                }

                if t.node.into_u32() == owner1 && owner1 != INVALID_ID {
                    let video = volatile!(t.activation, segment.video).read();
                    volatile!(a, position.segments[0].video).write(video);
                }

                if sync_start {
                    volatile!(t.activation, pending_sync).write(1u8);
                    volatile!(t.activation, pending_new_pos).write(1u8);
                }
            }

            // Apply a staged reposition from the owning follower; writers
            // that do not own the slot are ignored.
            if reposition_owner != INVALID_ID {
                let staged = node
                    .members
                    .iter()
                    .find(|t| t.node.into_u32() == reposition_owner)
                    .map(|t| volatile!(t.activation, reposition).read());

                if let Some(mut segment) = staged {
                    if segment.start == 0 {
                        let position = volatile!(a, position.clock.position).read();
                        let offset = volatile!(a, position.offset).read();
                        segment.start = position.saturating_sub(offset.max(0) as u64);
                    }

                    volatile!(a, position.segments[0]).write(segment);

                    let state = volatile!(a, position.state).read();

                    if state == PositionState::RUNNING.into_raw() {
                        volatile!(a, position.state).write(PositionState::STARTING.into_raw());
                        let timeout = volatile!(a, sync_timeout).read();
                        volatile!(a, sync_left).write((timeout / cycle_ns).max(1));
                    }
                }
            }

            // Advance the driver clock for this cycle.
            let prev = volatile!(a, signal_time).read();
            volatile!(a, prev_signal_time).write(prev);
            volatile!(a, signal_time).write(now);
            volatile!(a, position.clock.nsec).write(now);
            volatile!(a, position.clock.next_nsec).write(now.saturating_add(cycle_ns));

            node.cycle_open = true;
            node.tick_processed = false;

            // Kick every member without predecessors.
            let mut outcomes = Vec::new();

            for t in &node.seed_targets {
                // SAFETY: Valid activation records by construction.
                let outcome = unsafe { t.signal(now)? };
                outcomes.push((t.node, outcome));
            }

            for (seed, outcome) in outcomes {
                if outcome != Signalled::Triggered {
                    tracing::trace!(node = ?seed, ?outcome, "seed did not trigger");
                }
            }

            if node.driver_seed {
                atomic!(a, status).store(ActivationStatus::TRIGGERED.into_raw());
                node.tick_processed = true;
                true
            } else {
                false
            }
        };

        if run_driver {
            self.process_node(driver)?;
        }

        Ok(())
    }

    /// Handle the node's wake-fd becoming readable.
    pub fn handle_wake(&mut self, id: NodeId) -> Result<()> {
        let (is_master, cycle_open, status, pending) = {
            let node = self.node(id)?;
            node.wake_fd.read()?;

            let a = node.activation();
            let status = atomic!(a, status).load();
            let pending = atomic!(a, state[0].pending).load();
            (node.is_master(), node.cycle_open, status, pending)
        };

        if status == ActivationStatus::TRIGGERED.into_raw() {
            return self.process_node(id);
        }

        if is_master && cycle_open && pending == 0u32 {
            let now = get_monotonic_nsec()?;
            return self.complete_cycle(id, now);
        }

        tracing::trace!(node = ?id, ?status, "spurious wake");
        Ok(())
    }

    /// Run one cycle of processing on a node.
    ///
    /// A node whose process returns `OK` continues asynchronously and
    /// completes through [`node_ready`][Graph::node_ready].
    pub fn process_node(&mut self, id: NodeId) -> Result<()> {
        let now = get_monotonic_nsec()?;
        let quantum = self.default_quantum;

        let status = {
            let node = self
                .nodes
                .get_mut(id.index())
                .with_context(|| format!("No node with id {id}"))?;

            if !node.start_process(now) {
                return Ok(());
            }

            let Node {
                implementation,
                ports,
                position,
                io_control,
                ..
            } = node;

            let mut ctx = ProcessContext {
                ports,
                position: position.as_ref(),
                io_control: io_control.as_ref(),
                quantum,
            };

            implementation.process(&mut ctx)
        };

        if status == Status::OK {
            tracing::trace!(node = ?id, "async continue");
            return Ok(());
        }

        let finish = get_monotonic_nsec()?;
        self.finish_node(id, status, finish)
    }

    /// Async completion callback for implementations whose process
    /// offloaded work.
    pub fn node_ready(&mut self, id: NodeId, status: Status) -> Result<()> {
        let now = get_monotonic_nsec()?;
        self.finish_node(id, status, now)
    }

    fn finish_node(&mut self, id: NodeId, status: Status, now: u64) -> Result<()> {
        let (outcomes, is_master, pending_after) = {
            let node = self
                .nodes
                .get_mut(id.index())
                .with_context(|| format!("No node with id {id}"))?;

            if status.intersects(Status::HAVE_DATA) {
                fan_out_outputs(node);
            }

            node.last_status = status;
            node.end_process(now);

            let awake = volatile!(node.activation(), awake_time).read();
            node.stats.timing_sum += now.saturating_sub(awake);
            node.stats.timing_count += 1;

            let mut outcomes = Vec::with_capacity(node.target_list.len());

            for t in &node.target_list {
                // SAFETY: Valid activation records by construction.
                let outcome = unsafe { t.signal(now)? };
                outcomes.push((t.node, outcome));
            }

            for (peer, outcome) in &outcomes {
                match outcome {
                    Signalled::Triggered | Signalled::CycleDone => {
                        node.stats.signal_ok += 1;
                        node.stats.signal_ok_set.set(peer.into_u32());
                    }
                    Signalled::Pending => {}
                }
            }

            let pending = atomic!(node.activation(), state[0].pending).load();
            (outcomes, node.is_master(), pending)
        };

        for (peer, outcome) in outcomes {
            if outcome == Signalled::CycleDone {
                self.complete_cycle(peer, now)?;
            }
        }

        if is_master && pending_after == 0u32 {
            self.complete_cycle(id, now)?;
        }

        Ok(())
    }

    /// Close the driver's cycle: fold statistics, advance the position and
    /// resolve the starting handshake.
    fn complete_cycle(&mut self, driver: NodeId, now: u64) -> Result<()> {
        let node = self
            .nodes
            .get_mut(driver.index())
            .with_context(|| format!("No node with id {driver}"))?;

        if !node.master || !node.cycle_open {
            return Ok(());
        }

        node.cycle_open = false;
        node.calculate_stats();
        advance_position(node);

        tracing::trace!(node = ?driver, cycle_end = now, "cycle complete");
        Ok(())
    }

    /// Override the sync timeout armed on starting handshakes.
    pub fn set_sync_timeout(&mut self, driver: NodeId, timeout_ns: u64) -> Result<()> {
        let node = self.node(driver)?;
        volatile!(node.activation(), sync_timeout).write(timeout_ns);
        Ok(())
    }

    /// Tick the driver and drain all locally runnable work, for harnesses
    /// that drive the graph without a data loop.
    pub fn drive_cycle(&mut self, driver: NodeId) -> Result<()> {
        self.tick(driver)?;
        self.dispatch_ready()
    }

    /// Process every local node whose activation is in the triggered
    /// state, until none is left.
    pub fn dispatch_ready(&mut self) -> Result<()> {
        loop {
            let next = self.nodes.iter().find_map(|(_, n)| {
                if n.exported {
                    return None;
                }

                let status = atomic!(n.activation(), status).load();
                (status == ActivationStatus::TRIGGERED.into_raw()).then(|| n.id())
            });

            let Some(id) = next else {
                return Ok(());
            };

            self.handle_wake(id)?;
        }
    }
}

impl Default for Graph {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

/// Advance the driver's position at the end of a cycle: resolve the
/// starting handshake and step the clock.
///
/// Also run at the tick when the previous cycle overran, so a hung
/// follower cannot stall the clock or the sync timeout.
fn advance_position(node: &Node) {
    let a = &node.activation;
    let duration = volatile!(a, position.clock.duration).read();
    let state = volatile!(a, position.state).read();

    if state == PositionState::STARTING.into_raw() {
        let mut all_ready = true;

        for t in &node.members {
            all_ready &= volatile!(t.activation, pending_sync).read() == 0;
        }

        if all_ready {
            volatile!(a, position.state).write(PositionState::RUNNING.into_raw());
        } else {
            let left = volatile!(a, sync_left).read().saturating_sub(1);
            volatile!(a, sync_left).write(left);

            if left == 0 {
                tracing::warn!(node = ?node.id(), "sync timeout, forcing RUNNING");
                node.dump_members();
                volatile!(a, position.state).write(PositionState::RUNNING.into_raw());
            }
        }
    }

    let state = volatile!(a, position.state).read();

    if state != PositionState::RUNNING.into_raw() {
        let offset = volatile!(a, position.offset).read();
        volatile!(a, position.offset).write(offset.saturating_add(duration as i64));
    }

    let position = volatile!(a, position.clock.position).read();
    volatile!(a, position.clock.position).write(position.saturating_add(duration));
}

/// Deliver produced buffers to every active mix of the node's output ports
/// and reclaim the ones consumers have finished with.
fn fan_out_outputs(node: &mut Node) {
    for port in node.ports.outputs_mut() {
        let Some(buffers) = port.buffers.as_mut() else {
            port.ready.clear();
            continue;
        };

        // Reclaim buffers the consumers are done with.
        for (_, mix) in port.mixes.iter_mut() {
            if !mix.active {
                continue;
            }

            let Some(io) = &mix.io_buffers else {
                continue;
            };

            // SAFETY: Producer-side access per the io handshake.
            let state = unsafe { io.read() };

            if state.status & Status::NEED_DATA.into_raw() != 0 && state.buffer_id != INVALID_ID {
                let id = state.buffer_id;

                // SAFETY: See above.
                unsafe {
                    io.write(ffi::IoBuffers {
                        status: state.status,
                        buffer_id: INVALID_ID,
                    });
                }

                if let Some(out) = buffers.outstanding.get_mut(id as usize) {
                    *out = out.saturating_sub(1);

                    if *out == 0 {
                        buffers.mark_free(id);
                    }
                }
            }
        }

        // Hand the freshly produced buffers to the consumers.
        while let Some(id) = port.ready.pop_front() {
            let mut delivered = 0u32;

            for (_, mix) in port.mixes.iter_mut() {
                if !mix.active {
                    continue;
                }

                let Some(io) = &mix.io_buffers else {
                    continue;
                };

                // SAFETY: Producer-side access per the io handshake.
                let state = unsafe { io.read() };

                if state.status & Status::HAVE_DATA.into_raw() != 0 {
                    // The consumer still holds the previous buffer; this
                    // one is dropped, which is not fatal.
                    continue;
                }

                // SAFETY: See above.
                unsafe {
                    io.write(ffi::IoBuffers {
                        status: Status::HAVE_DATA.into_raw(),
                        buffer_id: id,
                    });
                }

                delivered += 1;
            }

            if delivered == 0 {
                buffers.mark_free(id);
            } else if let Some(out) = buffers.outstanding.get_mut(id as usize) {
                *out += delivered;
            }
        }
    }
}
