use anyhow::Result;
use pod::{Control, Value};
use protocol::consts::{Direction, INVALID_ID};
use protocol::flags::Status;
use protocol::id::{Command, IoType, Param};

use crate::buffer::Buffer;
use crate::ffi;
use crate::id::{MemId, MixId, PortId};
use crate::memory::Region;
use crate::port::Ports;
use crate::ptr::volatile;

/// The capability set of a node implementation.
///
/// Implementations come in two variants: local processors compiled into the
/// runtime and remote proxies that forward configuration over the control
/// channel. Everything else is composition.
///
/// Configuration methods return `0` when applied synchronously or a
/// positive sequence number when the result arrives asynchronously through
/// a later `result` event.
pub trait NodeImpl {
    /// Enumerate implementation-defined parameters.
    fn enum_params(
        &self,
        id: Param,
        index: u32,
        max: u32,
        filter: Option<&Value>,
    ) -> Result<Vec<Value>> {
        let (_, _, _, _) = (id, index, max, filter);
        Ok(Vec::new())
    }

    /// Set a node-level parameter.
    fn set_param(&mut self, id: Param, value: Option<&Value>) -> Result<i32> {
        let (_, _) = (id, value);
        Ok(0)
    }

    /// Install or clear a node-level io area.
    fn set_io(&mut self, id: IoType, mem: Option<(MemId, usize, usize)>) -> Result<()> {
        let (_, _) = (id, mem);
        Ok(())
    }

    /// Send a command to the processor.
    fn send_command(&mut self, command: Command) -> Result<i32> {
        let _ = command;
        Ok(0)
    }

    /// Set a port-level parameter.
    fn port_set_param(
        &mut self,
        direction: Direction,
        port: PortId,
        id: Param,
        value: Option<&Value>,
    ) -> Result<i32> {
        let (_, _, _, _) = (direction, port, id, value);
        Ok(0)
    }

    /// Install a buffer set on a port mix.
    fn port_use_buffers(
        &mut self,
        direction: Direction,
        port: PortId,
        mix: MixId,
        buffers: u32,
    ) -> Result<i32> {
        let (_, _, _, _) = (direction, port, mix, buffers);
        Ok(0)
    }

    /// Install or clear a port-level io area.
    fn port_set_io(
        &mut self,
        direction: Direction,
        port: PortId,
        mix: MixId,
        id: IoType,
        mem: Option<(MemId, usize, usize)>,
    ) -> Result<()> {
        let (_, _, _, _, _) = (direction, port, mix, id, mem);
        Ok(())
    }

    /// Recycle a buffer on an input port.
    fn reuse_buffer(&mut self, port: PortId, buffer: u32) -> Result<()> {
        let (_, _) = (port, buffer);
        Ok(())
    }

    /// Run one cycle of processing.
    ///
    /// Must not block; all blocking operations happen on the main loop.
    /// Returning [`Status::OK`] means processing continues asynchronously
    /// and completion is reported through the ready callback.
    fn process(&mut self, ctx: &mut ProcessContext<'_>) -> Status;
}

/// The view of a node handed to its implementation during `process`.
pub struct ProcessContext<'a> {
    pub(crate) ports: &'a mut Ports,
    pub(crate) position: Option<&'a Region<ffi::IoPosition>>,
    pub(crate) io_control: Option<&'a Region<[u8]>>,
    pub(crate) quantum: u32,
}

impl ProcessContext<'_> {
    /// The duration of the current cycle in frames.
    pub fn duration(&self) -> u32 {
        match self.position {
            Some(position) => {
                let duration = volatile!(position, clock.duration).read();

                if duration == 0 {
                    self.quantum
                } else {
                    duration as u32
                }
            }
            None => self.quantum,
        }
    }

    /// A snapshot of the shared position, when the node has one.
    pub fn position(&self) -> Option<ffi::IoPosition> {
        // SAFETY: The position is single-writer (the driver) and stable for
        // the duration of the cycle.
        self.position.map(|region| unsafe { region.read() })
    }

    /// Take a produced buffer from an input port.
    ///
    /// Consuming writes `NEED_DATA` back into the mix io area; the consumed
    /// buffer id stays visible so the producer can recycle it.
    pub fn dequeue_input(&mut self, port: PortId) -> Option<u32> {
        let port = self.ports.get_mut(Direction::INPUT, port).ok()?;
        let need_data = &mut port.need_data;

        for (_, mix) in port.mixes.iter_mut() {
            let Some(io) = &mix.io_buffers else {
                continue;
            };

            // SAFETY: The io area is written by one side at a time.
            let state = unsafe { io.read() };

            if state.status & Status::HAVE_DATA.into_raw() == 0 {
                continue;
            }

            if state.buffer_id == INVALID_ID {
                continue;
            }

            // SAFETY: See above.
            unsafe {
                io.write(ffi::IoBuffers {
                    status: Status::NEED_DATA.into_raw(),
                    buffer_id: state.buffer_id,
                });
            }

            *need_data = false;
            return Some(state.buffer_id);
        }

        *need_data = true;
        None
    }

    /// Take a free buffer from an output port for producing.
    pub fn dequeue_output(&mut self, port: PortId) -> Option<u32> {
        let port = self.ports.get_mut(Direction::OUTPUT, port).ok()?;
        port.buffers.as_mut()?.take_free()
    }

    /// Queue a produced buffer for delivery to the port's links.
    pub fn queue_output(&mut self, port: PortId, buffer: u32) {
        if let Ok(port) = self.ports.get_mut(Direction::OUTPUT, port) {
            port.ready.push_back(buffer);
        }
    }

    /// Access a buffer installed on a port.
    pub fn buffer_mut(
        &mut self,
        direction: Direction,
        port: PortId,
        buffer: u32,
    ) -> Option<&mut Buffer> {
        let port = self.ports.get_mut(direction, port).ok()?;
        port.buffers.as_mut()?.get_mut(buffer)
    }

    /// The timed controls scheduled for this cycle, in offset order.
    pub fn controls(&self) -> Vec<Control> {
        let Some(region) = self.io_control else {
            return Vec::new();
        };

        // SAFETY: The control area is written on the main loop between
        // cycles only.
        let bytes = unsafe { region.as_slice() };

        let Ok(Value::Sequence(sequence)) = Value::decode(bytes) else {
            return Vec::new();
        };

        let mut controls = sequence.controls;
        controls.sort_by_key(|c| c.offset);
        controls
    }
}
