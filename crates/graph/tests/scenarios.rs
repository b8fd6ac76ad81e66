use std::cell::Cell;
use std::rc::Rc;
use std::time::Duration;

use anyhow::Result;
use graph::nodes::NullSink;
use graph::{AudioFormat, Graph, NodeId, NodeImpl, NodeState, PortId, ProcessContext, ffi};
use protocol::consts::{ActivationStatus, Direction, PositionState};
use protocol::flags::Status;
use protocol::id::{AudioFormat as SampleFormat, Command, Param};
use protocol::{EventFd, Properties};

fn props(pairs: &[(&str, &str)]) -> Properties {
    pairs.iter().copied().collect()
}

fn audio(rate: u32) -> AudioFormat {
    AudioFormat {
        format: SampleFormat::F32P,
        rate,
        channels: 1,
    }
}

/// Reads the activation record of a node.
fn activation(graph: &Graph, id: NodeId) -> ffi::NodeActivation {
    // SAFETY: Tests read between cycles, when nothing is processing.
    unsafe { graph.node(id).unwrap().activation().read() }
}

/// A source that produces one zeroed buffer per cycle, or goes async when
/// stalled.
struct TestSource {
    port: PortId,
    produced: Rc<Cell<u64>>,
    stall: Rc<Cell<bool>>,
}

impl NodeImpl for TestSource {
    fn process(&mut self, ctx: &mut ProcessContext<'_>) -> Status {
        if self.stall.get() {
            return Status::OK;
        }

        let Some(id) = ctx.dequeue_output(self.port) else {
            return Status::NEED_DATA;
        };

        if let Some(buffer) = ctx.buffer_mut(Direction::OUTPUT, self.port, id) {
            for block in &mut buffer.blocks {
                block.set_chunk(ffi::Chunk {
                    offset: 0,
                    size: block.maxsize as u32,
                    stride: 4,
                    flags: 0,
                });
            }
        }

        ctx.queue_output(self.port, id);
        self.produced.set(self.produced.get() + 1);
        Status::HAVE_DATA
    }
}

/// A sink that consumes one buffer per cycle and counts what it saw.
struct TestSink {
    port: PortId,
    cycles: Rc<Cell<u64>>,
    consumed: Rc<Cell<u64>>,
}

impl NodeImpl for TestSink {
    fn process(&mut self, ctx: &mut ProcessContext<'_>) -> Status {
        self.cycles.set(self.cycles.get() + 1);

        if ctx.dequeue_input(self.port).is_some() {
            self.consumed.set(self.consumed.get() + 1);
        }

        Status::NEED_DATA
    }
}

struct Source {
    id: NodeId,
    port: PortId,
    produced: Rc<Cell<u64>>,
    stall: Rc<Cell<bool>>,
}

fn add_source(graph: &mut Graph, name: &str, rates: &[u32]) -> Result<Source> {
    let produced = Rc::new(Cell::new(0));
    let stall = Rc::new(Cell::new(false));

    let implementation = TestSource {
        port: PortId::new(0),
        produced: produced.clone(),
        stall: stall.clone(),
    };

    let id = graph.add_node(props(&[("node.name", name)]), Box::new(implementation))?;
    let port = graph.add_port(id, Direction::OUTPUT)?;

    graph.port_update_params(
        id,
        Direction::OUTPUT,
        port,
        Param::ENUM_FORMAT,
        vec![audio(rates[0]).enum_value([SampleFormat::F32P], rates.iter().copied())],
    )?;

    graph.register(id)?;

    Ok(Source {
        id,
        port,
        produced,
        stall,
    })
}

struct Sink {
    id: NodeId,
    port: PortId,
    cycles: Rc<Cell<u64>>,
    consumed: Rc<Cell<u64>>,
}

fn add_sink(graph: &mut Graph, name: &str, driver: bool, rates: &[u32]) -> Result<Sink> {
    let cycles = Rc::new(Cell::new(0));
    let consumed = Rc::new(Cell::new(0));

    let implementation = TestSink {
        port: PortId::new(0),
        cycles: cycles.clone(),
        consumed: consumed.clone(),
    };

    let id = graph.add_node(
        props(&[
            ("node.name", name),
            ("node.driver", if driver { "true" } else { "false" }),
            ("node.latency", "1024/48000"),
        ]),
        Box::new(implementation),
    )?;

    let port = graph.add_port(id, Direction::INPUT)?;

    graph.port_update_params(
        id,
        Direction::INPUT,
        port,
        Param::ENUM_FORMAT,
        vec![audio(rates[0]).enum_value([SampleFormat::F32P], rates.iter().copied())],
    )?;

    graph.register(id)?;

    Ok(Sink {
        id,
        port,
        cycles,
        consumed,
    })
}

#[test]
fn s1_two_node_sink_drive() -> Result<()> {
    let mut graph = Graph::new();

    let a = add_source(&mut graph, "a", &[48000])?;
    let b = add_sink(&mut graph, "b", true, &[48000])?;

    graph.set_active(a.id, true)?;
    graph.set_active(b.id, true)?;
    graph.link((a.id, a.port), (b.id, b.port))?;

    assert_eq!(graph.node(a.id)?.state(), NodeState::Running);
    assert_eq!(graph.node(b.id)?.state(), NodeState::Running);
    assert!(graph.node(b.id)?.is_master());

    let mut last_awake = 0;

    for k in 1..=10u64 {
        graph.drive_cycle(b.id)?;

        let aa = activation(&graph, a.id);
        let ba = activation(&graph, b.id);

        assert!(
            aa.finish_time <= ba.awake_time,
            "cycle {k}: upstream finished at {} after downstream woke at {}",
            aa.finish_time,
            ba.awake_time
        );

        assert!(ba.awake_time > last_awake, "cycle {k}: wake went backwards");
        last_awake = ba.awake_time;

        assert_eq!(ba.xrun_count, 0);
        assert_eq!(ba.position.clock.position, 1024 * k);
    }

    assert_eq!(a.produced.get(), 10);
    assert_eq!(b.cycles.get(), 10);
    assert_eq!(b.consumed.get(), 10);
    Ok(())
}

#[test]
fn s2_format_renegotiation() -> Result<()> {
    let mut graph = Graph::new();

    let a = add_source(&mut graph, "a", &[48000, 44100])?;
    let b = add_sink(&mut graph, "b", true, &[48000, 44100])?;

    graph.set_active(a.id, true)?;
    graph.set_active(b.id, true)?;
    let link = graph.link((a.id, a.port), (b.id, b.port))?;

    for _ in 0..5 {
        graph.drive_cycle(b.id)?;
    }

    let first = activation(&graph, b.id);
    assert_eq!(first.position.clock.rate.denom, 48000);

    graph.send_command(a.id, Command::SUSPEND)?;
    graph.send_command(b.id, Command::SUSPEND)?;

    assert_eq!(graph.node(a.id)?.state(), NodeState::Suspended);
    assert_eq!(graph.node(a.id)?.ports().get(Direction::OUTPUT, a.port)?.format(), None);

    // Narrow both menus to the new rate and negotiate again.
    graph.unlink(link)?;

    graph.port_update_params(
        b.id,
        Direction::INPUT,
        b.port,
        Param::ENUM_FORMAT,
        vec![audio(44100).enum_value([SampleFormat::F32P], [44100])],
    )?;

    graph.link((a.id, a.port), (b.id, b.port))?;

    for (node, direction, port) in [
        (a.id, Direction::OUTPUT, a.port),
        (b.id, Direction::INPUT, b.port),
    ] {
        let formats = graph.port_enum_params(node, direction, port, Param::FORMAT, 0, 16, None)?;
        assert_eq!(formats.len(), 1);
        assert_eq!(AudioFormat::from_value(&formats[0])?.rate, 44100);
    }

    graph.drive_cycle(b.id)?;

    let after = activation(&graph, b.id);
    assert_eq!(after.position.clock.rate.denom, 44100);
    Ok(())
}

#[test]
fn s3_follower_xrun() -> Result<()> {
    let mut graph = Graph::new();

    let a = add_source(&mut graph, "a", &[48000])?;
    let b = add_sink(&mut graph, "b", true, &[48000])?;

    graph.set_active(a.id, true)?;
    graph.set_active(b.id, true)?;
    graph.link((a.id, a.port), (b.id, b.port))?;

    graph.drive_cycle(b.id)?;
    assert_eq!(activation(&graph, b.id).xrun_count, 0);

    // One cycle where the source does not finish in time.
    a.stall.set(true);
    graph.drive_cycle(b.id)?;
    a.stall.set(false);

    let quantum_ns = 1024u64 * 1_000_000_000 / 48000;
    std::thread::sleep(Duration::from_nanos(quantum_ns + 2_000_000));

    graph.drive_cycle(b.id)?;

    let ba = activation(&graph, b.id);
    assert_eq!(ba.xrun_count, 1);
    assert!(
        ba.xrun_delay >= quantum_ns,
        "xrun delay {} shorter than one quantum",
        ba.xrun_delay
    );
    assert_eq!(ba.max_delay, ba.xrun_delay);

    // The graph continues and the count stays where it was.
    for _ in 0..3 {
        graph.drive_cycle(b.id)?;
    }

    assert_eq!(activation(&graph, b.id).xrun_count, 1);
    Ok(())
}

#[test]
fn s4_reposition_handshake() -> Result<()> {
    let mut graph = Graph::new();

    let f1 = add_source(&mut graph, "f1", &[48000])?;
    let f2 = add_source(&mut graph, "f2", &[48000])?;
    let d = add_sink(&mut graph, "d", true, &[48000])?;
    let d_port2 = graph.add_port(d.id, Direction::INPUT)?;

    graph.port_update_params(
        d.id,
        Direction::INPUT,
        d_port2,
        Param::ENUM_FORMAT,
        vec![audio(48000).enum_value([SampleFormat::F32P], [48000])],
    )?;

    graph.set_active(f1.id, true)?;
    graph.set_active(f2.id, true)?;
    graph.set_active(d.id, true)?;
    graph.link((f1.id, f1.port), (d.id, d.port))?;
    graph.link((f2.id, f2.port), (d.id, d_port2))?;

    // F1 wins the bar slot; F2's claim must fail.
    assert!(graph.claim_segment_owner(d.id, 0, f1.id)?);
    assert!(!graph.claim_segment_owner(d.id, 0, f2.id)?);

    let bar = |bpm: f64| ffi::SegmentBar {
        flags: 0,
        offset: 0,
        signature_num: 4.0,
        signature_denom: 4.0,
        bpm,
        beat: 0.0,
    };

    graph.stage_segment_bar(f1.id, bar(120.0))?;
    graph.stage_segment_bar(f2.id, bar(999.0))?;

    graph.drive_cycle(d.id)?;

    let da = activation(&graph, d.id);
    assert_eq!(da.position.segments[0].bar.bpm, 120.0);

    // Reposition: the last follower to register its id wins the cycle.
    let segment = |position: u64| ffi::IoSegment {
        version: 0,
        flags: 0,
        start: 1,
        duration: 0,
        rate: 1.0,
        position,
        bar: bar(0.0),
        video: ffi::SegmentVideo {
            flags: 0,
            offset: 0,
            framerate: ffi::Fraction { num: 0, denom: 1 },
            hours: 0,
            minutes: 0,
            seconds: 0,
            frames: 0,
        },
    };

    graph.request_reposition(d.id, f2.id, segment(8888))?;
    graph.request_reposition(d.id, f1.id, segment(9999))?;

    graph.drive_cycle(d.id)?;

    let da = activation(&graph, d.id);
    assert_eq!(da.position.segments[0].position, 9999);
    Ok(())
}

#[test]
fn s5_cross_process_activation() -> Result<()> {
    let mut graph = Graph::new();

    // The remote source never processes locally; this test plays the part
    // of its data loop, exactly as a client with the mapped activation and
    // fds would. No control-channel traffic is involved per cycle.
    let r = add_source(&mut graph, "r", &[48000])?;
    let l = add_sink(&mut graph, "l", true, &[48000])?;

    graph.set_exported(r.id, true)?;
    graph.set_active(r.id, true)?;
    graph.set_active(l.id, true)?;
    graph.link((r.id, r.port), (l.id, l.port))?;

    graph.tick(l.id)?;

    // The remote side was woken: triggered, with nothing left pending.
    let ra = activation(&graph, r.id);
    assert_eq!(ra.status, ActivationStatus::TRIGGERED.into_raw());
    assert_eq!(ra.state[0].pending, 0);

    let remote_wake = EventFd::from(graph.node(r.id)?.wake_dup()?);
    assert_eq!(remote_wake.read()?, Some(1));

    // The remote completes its cycle; its completion alone must wake the
    // local driver.
    graph.node_ready(r.id, Status::HAVE_DATA)?;

    let la = activation(&graph, l.id);
    assert_eq!(la.status, ActivationStatus::TRIGGERED.into_raw());
    assert_eq!(la.state[0].pending, 0);

    graph.dispatch_ready()?;

    assert_eq!(l.cycles.get(), 1);
    assert_eq!(activation(&graph, l.id).position.clock.position, 1024);
    Ok(())
}

#[test]
fn s6_driver_election() -> Result<()> {
    let mut graph = Graph::new();

    let d1 = add_sink(&mut graph, "d1", true, &[48000])?;
    let d2 = add_sink(&mut graph, "d2", true, &[48000])?;
    let f = add_source(&mut graph, "f", &[48000])?;

    graph.set_active(d1.id, true)?;
    graph.set_active(d2.id, true)?;
    graph.set_active(f.id, true)?;

    assert!(graph.node(d1.id)?.is_master());
    assert!(graph.node(d2.id)?.is_master());
    assert_eq!(graph.node(f.id)?.driver_node(), None);

    let link = graph.link((f.id, f.port), (d1.id, d1.port))?;

    assert_eq!(graph.node(f.id)?.driver_node(), Some(d1.id));
    assert!(graph.node(d1.id)?.is_master());
    assert!(graph.node(d2.id)?.is_master());

    graph.unlink(link)?;
    graph.link((f.id, f.port), (d2.id, d2.port))?;

    assert_eq!(graph.node(f.id)?.driver_node(), Some(d2.id));
    assert!(graph.node(d2.id)?.is_master());
    Ok(())
}

#[test]
fn port_configuration_sequence() -> Result<()> {
    let mut graph = Graph::new();

    let a = add_source(&mut graph, "a", &[48000])?;
    let b = add_sink(&mut graph, "b", true, &[48000])?;

    use graph::PortState;

    let state = |graph: &Graph| -> Result<PortState> {
        Ok(graph
            .node(b.id)?
            .ports()
            .get(Direction::INPUT, b.port)?
            .state())
    };

    assert_eq!(state(&graph)?, PortState::Configure);

    graph.set_active(a.id, true)?;
    graph.set_active(b.id, true)?;
    let link = graph.link((a.id, a.port), (b.id, b.port))?;

    // Format and buffers installed by the link.
    assert_eq!(state(&graph)?, PortState::Paused);

    // Dropping buffers returns to ready, clearing the format to configure.
    graph.unlink(link)?;
    assert_eq!(state(&graph)?, PortState::Ready);

    graph.port_set_param(b.id, Direction::INPUT, b.port, Param::FORMAT, None)?;
    assert_eq!(state(&graph)?, PortState::Configure);

    let port = graph.node(b.id)?.ports().get(Direction::INPUT, b.port)?;
    assert!(port.format().is_none());

    // A rate-match area can be installed and removed independently.
    graph.port_set_rate_match(b.id, Direction::INPUT, b.port, true)?;

    let rate_match = graph
        .node(b.id)?
        .ports()
        .get(Direction::INPUT, b.port)?
        .rate_match()
        .expect("rate match installed");

    assert_eq!(rate_match.rate, 1.0);

    graph.port_set_rate_match(b.id, Direction::INPUT, b.port, false)?;

    let port = graph.node(b.id)?.ports().get(Direction::INPUT, b.port)?;
    assert!(port.rate_match().is_none());
    Ok(())
}

#[test]
fn reuse_buffer_validates_ids() -> Result<()> {
    let mut graph = Graph::new();

    let a = add_source(&mut graph, "a", &[48000])?;
    let b = add_sink(&mut graph, "b", true, &[48000])?;

    graph.set_active(a.id, true)?;
    graph.set_active(b.id, true)?;
    graph.link((a.id, a.port), (b.id, b.port))?;

    assert!(graph.port_reuse_buffer(b.id, b.port, 0).is_ok());
    assert!(graph.port_reuse_buffer(b.id, b.port, 99).is_err());
    Ok(())
}

#[test]
fn use_buffers_requires_format() -> Result<()> {
    let mut graph = Graph::new();

    // A sink whose menu shares nothing with the source fails negotiation
    // before any buffers exist.
    let a = add_source(&mut graph, "a", &[48000])?;
    let b = add_sink(&mut graph, "b", true, &[8000])?;

    graph.set_active(a.id, true)?;
    graph.set_active(b.id, true)?;

    assert!(graph.link((a.id, a.port), (b.id, b.port)).is_err());
    Ok(())
}

#[test]
fn starting_handshake_times_out() -> Result<()> {
    let mut graph = Graph::new();

    let r = add_source(&mut graph, "r", &[48000])?;
    let d = add_sink(&mut graph, "d", true, &[48000])?;

    // The remote follower never acknowledges the sync.
    graph.set_exported(r.id, true)?;
    graph.set_active(r.id, true)?;
    graph.set_active(d.id, true)?;
    graph.link((r.id, r.port), (d.id, d.port))?;

    let quantum_ns = 1024u64 * 1_000_000_000 / 48000;
    graph.set_sync_timeout(d.id, 2 * quantum_ns)?;

    graph.transport_start(d.id)?;

    graph.drive_cycle(d.id)?;
    assert_eq!(
        activation(&graph, d.id).position.state,
        PositionState::STARTING.into_raw()
    );

    // Two more missed cycles exhaust sync_left and force RUNNING.
    graph.drive_cycle(d.id)?;
    graph.drive_cycle(d.id)?;

    assert_eq!(
        activation(&graph, d.id).position.state,
        PositionState::RUNNING.into_raw()
    );
    Ok(())
}

#[test]
fn two_predecessors_trigger_driver_once() -> Result<()> {
    let mut graph = Graph::new();

    let f1 = add_source(&mut graph, "f1", &[48000])?;
    let f2 = add_source(&mut graph, "f2", &[48000])?;
    let d = add_sink(&mut graph, "d", true, &[48000])?;
    let d_port2 = graph.add_port(d.id, Direction::INPUT)?;

    graph.port_update_params(
        d.id,
        Direction::INPUT,
        d_port2,
        Param::ENUM_FORMAT,
        vec![audio(48000).enum_value([SampleFormat::F32P], [48000])],
    )?;

    graph.set_active(f1.id, true)?;
    graph.set_active(f2.id, true)?;
    graph.set_active(d.id, true)?;
    graph.link((f1.id, f1.port), (d.id, d.port))?;
    graph.link((f2.id, f2.port), (d.id, d_port2))?;

    assert_eq!(activation(&graph, d.id).state[0].required, 2);

    for k in 1..=5 {
        graph.drive_cycle(d.id)?;

        // Both predecessors raced to decrement; only the second one to
        // finish may have signalled, so the driver ran exactly once.
        assert_eq!(d.cycles.get(), k);
        assert_eq!(activation(&graph, d.id).xrun_count, 0);
    }

    assert_eq!(f1.produced.get(), 5);
    assert_eq!(f2.produced.get(), 5);
    Ok(())
}

#[test]
fn pause_and_start_round_trip() -> Result<()> {
    let mut graph = Graph::new();

    let a = add_source(&mut graph, "a", &[48000])?;
    let b = add_sink(&mut graph, "b", true, &[48000])?;

    graph.set_active(a.id, true)?;
    graph.set_active(b.id, true)?;
    graph.link((a.id, a.port), (b.id, b.port))?;

    for _ in 0..3 {
        graph.drive_cycle(b.id)?;
    }

    assert_eq!(b.consumed.get(), 3);

    graph.send_command(a.id, Command::PAUSE)?;
    assert_eq!(graph.node(a.id)?.state(), NodeState::Idle);

    // The driver keeps running alone while the source is out of the graph.
    graph.drive_cycle(b.id)?;
    graph.drive_cycle(b.id)?;

    assert_eq!(a.produced.get(), 3);
    assert_eq!(activation(&graph, b.id).xrun_count, 0);

    graph.send_command(a.id, Command::START)?;
    assert_eq!(graph.node(a.id)?.state(), NodeState::Running);

    let before = activation(&graph, b.id).position.clock.position;
    graph.drive_cycle(b.id)?;

    // The same per-cycle exchange pattern resumes and the clock only
    // advanced by time, never jumped.
    assert_eq!(a.produced.get(), 4);
    assert_eq!(b.consumed.get(), 4);
    assert_eq!(
        activation(&graph, b.id).position.clock.position,
        before + 1024
    );
    Ok(())
}

#[test]
fn want_driver_attaches_to_a_driver() -> Result<()> {
    let mut graph = Graph::new();

    let d = add_sink(&mut graph, "d", true, &[48000])?;

    let produced = Rc::new(Cell::new(0));
    let stall = Rc::new(Cell::new(false));

    let id = graph.add_node(
        props(&[("node.name", "lonely"), ("node.always-process", "true")]),
        Box::new(TestSource {
            port: PortId::new(0),
            produced: produced.clone(),
            stall,
        }),
    )?;

    graph.add_port(id, Direction::OUTPUT)?;
    graph.register(id)?;

    graph.set_active(d.id, true)?;
    graph.set_active(id, true)?;
    graph.send_command(id, Command::START)?;

    assert_eq!(graph.node(id)?.driver_node(), Some(d.id));

    // The unlinked node is still scheduled every cycle.
    graph.drive_cycle(d.id)?;
    graph.drive_cycle(d.id)?;

    assert_eq!(activation(&graph, d.id).xrun_count, 0);
    assert_eq!(d.cycles.get(), 2);
    Ok(())
}

#[test]
fn null_sink_drives_consumption() -> Result<()> {
    let mut graph = Graph::new();

    let a = add_source(&mut graph, "a", &[48000])?;

    let id = graph.add_node(
        props(&[
            ("node.name", "null"),
            ("node.driver", "true"),
            ("node.latency", "1024/48000"),
        ]),
        Box::new(NullSink::new(PortId::new(0))),
    )?;

    let port = graph.add_port(id, Direction::INPUT)?;

    graph.port_update_params(
        id,
        Direction::INPUT,
        port,
        Param::ENUM_FORMAT,
        vec![audio(48000).enum_value([SampleFormat::F32P], [48000])],
    )?;

    graph.register(id)?;
    graph.set_active(a.id, true)?;
    graph.set_active(id, true)?;
    graph.link((a.id, a.port), (id, port))?;

    for _ in 0..4 {
        graph.drive_cycle(id)?;
    }

    assert_eq!(a.produced.get(), 4);
    assert_eq!(activation(&graph, id).xrun_count, 0);
    Ok(())
}

#[test]
fn control_sequence_steers_the_source() -> Result<()> {
    use graph::nodes::SilenceSource;
    use pod::{Builder, Control, Sequence, Value};
    use protocol::id::{ControlType, ObjectType, Prop};

    struct FlagSink {
        port: PortId,
        last_flags: Rc<Cell<u32>>,
    }

    impl NodeImpl for FlagSink {
        fn process(&mut self, ctx: &mut ProcessContext<'_>) -> Status {
            if let Some(id) = ctx.dequeue_input(self.port) {
                if let Some(buffer) = ctx.buffer_mut(Direction::INPUT, self.port, id) {
                    if let Some(block) = buffer.blocks.first() {
                        self.last_flags.set(block.chunk().flags);
                    }
                }
            }

            Status::NEED_DATA
        }
    }

    let mut graph = Graph::new();

    let src = graph.add_node(
        props(&[("node.name", "sine")]),
        Box::new(SilenceSource::new(PortId::new(0), 48000)),
    )?;

    let src_port = graph.add_port(src, Direction::OUTPUT)?;

    graph.port_update_params(
        src,
        Direction::OUTPUT,
        src_port,
        Param::ENUM_FORMAT,
        vec![audio(48000).enum_value([SampleFormat::F32P], [48000])],
    )?;

    graph.register(src)?;

    let last_flags = Rc::new(Cell::new(u32::MAX));

    let sink = graph.add_node(
        props(&[
            ("node.name", "flags"),
            ("node.driver", "true"),
            ("node.latency", "1024/48000"),
        ]),
        Box::new(FlagSink {
            port: PortId::new(0),
            last_flags: last_flags.clone(),
        }),
    )?;

    let sink_port = graph.add_port(sink, Direction::INPUT)?;

    graph.port_update_params(
        sink,
        Direction::INPUT,
        sink_port,
        Param::ENUM_FORMAT,
        vec![audio(48000).enum_value([SampleFormat::F32P], [48000])],
    )?;

    graph.register(sink)?;
    graph.set_active(src, true)?;
    graph.set_active(sink, true)?;
    graph.link((src, src_port), (sink, sink_port))?;

    // Silence first: the chunk is marked media-neutral.
    graph.drive_cycle(sink)?;
    assert_eq!(
        last_flags.get(),
        protocol::flags::ChunkFlags::EMPTY.into_raw()
    );

    // A frequency control turns the silence into a signal.
    let controls = Value::Sequence(Sequence {
        unit: 0,
        controls: vec![Control {
            offset: 0,
            kind: ControlType::PROPERTIES.into_raw(),
            value: Builder::object(ObjectType::PROPS, Param::PROPS)
                .property(Prop::FREQUENCY, Value::Float(440.0))
                .build_value(),
        }],
    });

    graph.set_node_control(src, Some(&controls))?;

    graph.drive_cycle(sink)?;
    assert_eq!(last_flags.get(), 0);

    graph.set_node_control(src, None)?;
    Ok(())
}

#[test]
fn async_start_completes_by_result() -> Result<()> {
    struct AsyncImpl;

    impl NodeImpl for AsyncImpl {
        fn send_command(&mut self, command: protocol::id::Command) -> Result<i32> {
            if command == protocol::id::Command::START {
                return Ok(7);
            }

            Ok(0)
        }

        fn process(&mut self, _ctx: &mut ProcessContext<'_>) -> Status {
            Status::OK
        }
    }

    let mut graph = Graph::new();

    let id = graph.add_node(props(&[("node.name", "slowpoke")]), Box::new(AsyncImpl))?;
    graph.register(id)?;
    graph.set_active(id, true)?;

    // The start was accepted asynchronously; the transition waits for the
    // matching result.
    assert_eq!(graph.node(id)?.state(), NodeState::Suspended);

    graph.handle_result(id, 7, 0)?;
    assert_eq!(graph.node(id)?.state(), NodeState::Running);

    let mut saw_result = false;

    while let Some(event) = graph.poll_event() {
        if let graph::GraphEvent::Result { node, seq, res } = event {
            assert_eq!(node, id);
            assert_eq!(seq, 7);
            assert_eq!(res, 0);
            saw_result = true;
        }
    }

    assert!(saw_result);
    Ok(())
}

#[test]
fn errored_node_does_not_stall_the_graph() -> Result<()> {
    let mut graph = Graph::new();

    let a = add_source(&mut graph, "a", &[48000])?;
    let b = add_sink(&mut graph, "b", true, &[48000])?;

    graph.set_active(a.id, true)?;
    graph.set_active(b.id, true)?;
    graph.link((a.id, a.port), (b.id, b.port))?;

    graph.drive_cycle(b.id)?;
    assert_eq!(b.consumed.get(), 1);

    graph.set_node_error(a.id, "decode failure");
    assert_eq!(graph.node(a.id)?.state(), NodeState::Error);
    assert_eq!(graph.node(a.id)?.error(), Some("decode failure"));

    let mut saw_error = false;

    while let Some(event) = graph.poll_event() {
        if let graph::GraphEvent::NodeError { node, reason } = event {
            assert_eq!(node, a.id);
            assert_eq!(reason, "decode failure");
            saw_error = true;
        }
    }

    assert!(saw_error);

    // The driver keeps draining on its own; no overruns accumulate.
    graph.drive_cycle(b.id)?;
    graph.drive_cycle(b.id)?;

    assert_eq!(activation(&graph, b.id).xrun_count, 0);
    assert_eq!(b.consumed.get(), 1);
    Ok(())
}

#[test]
fn quantum_follows_latency_property() -> Result<()> {
    let mut graph = Graph::new();

    let a = add_source(&mut graph, "a", &[48000])?;

    let cycles = Rc::new(Cell::new(0));
    let consumed = Rc::new(Cell::new(0));

    // A latency request that is not a power of two is floored to one.
    let id = graph.add_node(
        props(&[
            ("node.name", "b"),
            ("node.driver", "true"),
            ("node.latency", "1000/48000"),
        ]),
        Box::new(TestSink {
            port: PortId::new(0),
            cycles,
            consumed,
        }),
    )?;

    let port = graph.add_port(id, Direction::INPUT)?;

    graph.port_update_params(
        id,
        Direction::INPUT,
        port,
        Param::ENUM_FORMAT,
        vec![audio(48000).enum_value([SampleFormat::F32P], [48000])],
    )?;

    graph.register(id)?;
    graph.set_active(a.id, true)?;
    graph.set_active(id, true)?;
    graph.link((a.id, a.port), (id, port))?;

    graph.drive_cycle(id)?;

    assert_eq!(activation(&graph, id).position.clock.duration, 512);
    assert_eq!(activation(&graph, id).position.clock.position, 512);
    Ok(())
}
