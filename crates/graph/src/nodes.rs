//! Minimal built-in processors.
//!
//! These are consumers of the node contract used by the daemon's default
//! configuration and by tests: a silence source that fills buffers with
//! zeroes (optionally a sine when a frequency control arrives) and a null
//! sink that consumes and recycles buffers while acting as a driver.

use core::f32::consts::TAU;

use pod::Value;
use protocol::flags::Status;
use protocol::id::{ControlType, Prop};

use crate::ffi;
use crate::id::PortId;
use crate::node_impl::{NodeImpl, ProcessContext};

/// A source producing silence, or a sine wave when told to.
///
/// Listens for `Properties { frequency, volume }` controls on the control
/// io area, applied in offset order within the cycle.
pub struct SilenceSource {
    port: PortId,
    rate: u32,
    frequency: f32,
    volume: f32,
    phase: f32,
    /// Cycles produced so far.
    pub cycles: u64,
}

impl SilenceSource {
    /// Construct a source producing on the given output port.
    pub fn new(port: PortId, rate: u32) -> Self {
        Self {
            port,
            rate,
            frequency: 0.0,
            volume: 1.0,
            phase: 0.0,
            cycles: 0,
        }
    }

    fn apply_control(&mut self, value: &Value) {
        let Some(object) = value.as_object() else {
            return;
        };

        if let Some(v) = object.property(Prop::FREQUENCY) {
            match v {
                Value::Float(f) => self.frequency = *f,
                Value::Double(f) => self.frequency = *f as f32,
                Value::Int(f) => self.frequency = *f as f32,
                _ => {}
            }
        }

        if let Some(v) = object.property(Prop::VOLUME) {
            if let Value::Float(f) = v {
                self.volume = *f;
            }
        }
    }
}

impl NodeImpl for SilenceSource {
    fn process(&mut self, ctx: &mut ProcessContext<'_>) -> Status {
        for control in ctx.controls() {
            if ControlType::from_raw(control.kind) == ControlType::PROPERTIES {
                self.apply_control(&control.value);
            }
        }

        let frames = ctx.duration() as usize;

        let Some(id) = ctx.dequeue_output(self.port) else {
            return Status::NEED_DATA;
        };

        let step = self.frequency * TAU / self.rate as f32;

        if let Some(buffer) = ctx.buffer_mut(protocol::consts::Direction::OUTPUT, self.port, id) {
            for block in &mut buffer.blocks {
                let mut phase = self.phase;

                // SAFETY: The buffer was dequeued from the free set, so the
                // consumer side is not holding it.
                let data = unsafe { block.data_mut() };
                let samples = frames.min(data.len() / 4);

                for n in 0..samples {
                    let value = if self.frequency > 0.0 {
                        (phase.sin() * self.volume).to_le_bytes()
                    } else {
                        0f32.to_le_bytes()
                    };

                    data[n * 4..n * 4 + 4].copy_from_slice(&value);
                    phase += step;
                }

                block.set_chunk(ffi::Chunk {
                    offset: 0,
                    size: (samples * 4) as u32,
                    stride: 4,
                    flags: if self.frequency > 0.0 {
                        0
                    } else {
                        protocol::flags::ChunkFlags::EMPTY.into_raw()
                    },
                });
            }

            buffer.set_header(ffi::MetaHeader {
                flags: 0,
                offset: 0,
                pts: -1,
                dts_offset: 0,
                seq: self.cycles,
            });
        }

        self.phase = (self.phase + step * frames as f32) % TAU;
        self.cycles += 1;
        ctx.queue_output(self.port, id);
        Status::HAVE_DATA
    }
}

/// A sink that consumes whatever arrives and throws it away.
///
/// Declared a driver in the daemon configuration, so it typically paces
/// the component from a timer.
pub struct NullSink {
    port: PortId,
    /// Cycles consumed so far.
    pub cycles: u64,
    /// Frames consumed so far.
    pub frames: u64,
}

impl NullSink {
    /// Construct a sink consuming on the given input port.
    pub fn new(port: PortId) -> Self {
        Self {
            port,
            cycles: 0,
            frames: 0,
        }
    }
}

impl NodeImpl for NullSink {
    fn process(&mut self, ctx: &mut ProcessContext<'_>) -> Status {
        self.cycles += 1;

        let Some(id) = ctx.dequeue_input(self.port) else {
            return Status::NEED_DATA;
        };

        if let Some(buffer) = ctx.buffer_mut(protocol::consts::Direction::INPUT, self.port, id) {
            if let Some(block) = buffer.blocks.first() {
                let chunk = block.chunk();
                self.frames += u64::from(chunk.size) / chunk.stride.max(1) as u64;
            }
        }

        Status::NEED_DATA
    }
}
