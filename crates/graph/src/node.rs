use protocol::EventFd;
use protocol::Properties;
use protocol::consts::ActivationStatus;
use protocol::flags::Status;
use protocol::prop;

use crate::Stats;
use crate::activation::Target;
use crate::ffi;
use crate::params::Parameters;
use crate::id::{MemId, NodeId};
use crate::memory::Region;
use crate::node_impl::NodeImpl;
use crate::port::Ports;
use crate::ptr::{atomic, volatile};
use crate::utils::flp2;

/// The lifecycle state of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    /// The node is being created and is not yet published.
    Creating,
    /// The node is published but has no configured formats.
    Suspended,
    /// The node is configured but not processing.
    Idle,
    /// The node processes once per cycle.
    Running,
    /// The node reported an unrecoverable error.
    Error,
}

/// A processing unit with ports, run once per cycle while running.
pub struct Node {
    id: NodeId,
    pub name: String,
    pub properties: Properties,
    pub(crate) state: NodeState,
    pub(crate) error: Option<String>,
    /// The operator wants the node scheduled.
    pub(crate) active: bool,
    /// The node can drive a graph.
    pub(crate) driver: bool,
    /// The node wants a driver even in an otherwise idle component.
    pub(crate) want_driver: bool,
    /// The node is the elected driver of its component this epoch.
    pub(crate) master: bool,
    pub(crate) pause_on_idle: bool,
    /// The node lives in another process; configuration goes through the
    /// control channel and wakeups through the shared activation.
    pub(crate) exported: bool,
    pub(crate) driver_node: Option<NodeId>,
    /// Requested cycle size in frames; zero when the node has no opinion.
    pub(crate) quantum_size: u32,
    pub(crate) ports: Ports,
    /// Node-level parameters pushed by the implementation.
    pub(crate) params: Parameters,
    pub(crate) implementation: Box<dyn NodeImpl>,
    pub(crate) activation_mem: MemId,
    pub(crate) activation: Region<ffi::NodeActivation>,
    /// Writing `u64 = 1` here wakes the node's loop.
    pub(crate) wake_fd: EventFd,
    /// The driver's shared position.
    pub(crate) position: Option<Region<ffi::IoPosition>>,
    pub(crate) io_control: Option<Region<[u8]>>,
    /// The pool block backing the control area, released with it.
    pub(crate) io_control_mem: Option<MemId>,
    /// Downstream targets signalled on completion.
    pub(crate) target_list: Vec<Target>,
    /// Master only: every member of the component, reset each cycle.
    pub(crate) members: Vec<Target>,
    /// Master only: followers with no predecessors, kicked at every tick.
    pub(crate) seed_targets: Vec<Target>,
    /// Master only: the driver itself has no predecessors and processes at
    /// the tick.
    pub(crate) driver_seed: bool,
    /// Master only: set while a cycle is in flight.
    pub(crate) cycle_open: bool,
    /// Set when the node processed directly at the tick this cycle.
    pub(crate) tick_processed: bool,
    pub(crate) last_status: Status,
    pub(crate) n_ready_input_links: u32,
    pub(crate) n_used_input_links: u32,
    pub(crate) n_ready_output_links: u32,
    pub(crate) n_used_output_links: u32,
    pub(crate) stats: Stats,
}

impl Node {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        id: NodeId,
        properties: Properties,
        implementation: Box<dyn NodeImpl>,
        activation_mem: MemId,
        activation: Region<ffi::NodeActivation>,
        wake_fd: EventFd,
    ) -> Self {
        let mut node = Self {
            id,
            name: format!("node-{id}"),
            properties,
            state: NodeState::Creating,
            error: None,
            active: false,
            driver: false,
            want_driver: false,
            master: false,
            pause_on_idle: true,
            exported: false,
            driver_node: None,
            quantum_size: 0,
            ports: Ports::new(),
            params: Parameters::new(),
            implementation,
            activation_mem,
            activation,
            wake_fd,
            position: None,
            io_control: None,
            io_control_mem: None,
            target_list: Vec::new(),
            members: Vec::new(),
            seed_targets: Vec::new(),
            driver_seed: false,
            cycle_open: false,
            tick_processed: false,
            last_status: Status::OK,
            n_ready_input_links: 0,
            n_used_input_links: 0,
            n_ready_output_links: 0,
            n_used_output_links: 0,
            stats: Stats::default(),
        };

        node.check_properties();
        node
    }

    /// The node id.
    #[inline]
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// The lifecycle state.
    #[inline]
    pub fn state(&self) -> NodeState {
        self.state
    }

    /// The error reason, when the node is in the error state.
    #[inline]
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Whether this node is the elected driver of its component.
    #[inline]
    pub fn is_master(&self) -> bool {
        self.master
    }

    /// The driver this node follows.
    #[inline]
    pub fn driver_node(&self) -> Option<NodeId> {
        self.driver_node
    }

    /// The ports of the node.
    #[inline]
    pub fn ports(&self) -> &Ports {
        &self.ports
    }

    /// The node-level parameters.
    #[inline]
    pub fn params(&self) -> &Parameters {
        &self.params
    }

    /// The status the node last returned from its process.
    #[inline]
    pub fn last_status(&self) -> Status {
        self.last_status
    }

    /// The pool block backing the node's activation record.
    #[inline]
    pub fn activation_mem(&self) -> MemId {
        self.activation_mem
    }

    /// A view of the node's activation record.
    #[inline]
    pub fn activation(&self) -> &Region<ffi::NodeActivation> {
        &self.activation
    }

    /// The raw wake-fd of the node, for poll registration.
    #[inline]
    pub fn wake_raw_fd(&self) -> std::os::fd::RawFd {
        use std::os::fd::AsRawFd;
        self.wake_fd.as_raw_fd()
    }

    /// Duplicate the wake-fd for handing to another process.
    #[inline]
    pub fn wake_dup(&self) -> std::io::Result<std::os::fd::OwnedFd> {
        self.wake_fd.dup()
    }

    /// Re-read the properties the scheduler interprets.
    ///
    /// Returns true if a property changed in a way that requires a graph
    /// recalculation.
    pub(crate) fn check_properties(&mut self) -> bool {
        let mut recalc = false;

        if let Some(name) = self.properties.get(prop::NODE_NAME) {
            if self.name != name {
                self.name = name.into();
                tracing::info!(node = ?self.id, name = ?self.name);
            }
        }

        self.pause_on_idle = self
            .properties
            .parse_bool(prop::NODE_PAUSE_ON_IDLE)
            .unwrap_or(true);

        let driver = self
            .properties
            .parse_bool(prop::NODE_DRIVER)
            .unwrap_or(false);

        if self.driver != driver {
            tracing::info!(node = ?self.id, driver, "driver capability changed");
            self.driver = driver;
            recalc = true;
        }

        self.want_driver = self
            .properties
            .parse_bool(prop::NODE_ALWAYS_PROCESS)
            .unwrap_or(false);

        if let Some((num, denom)) = self.properties.parse_fraction(prop::NODE_LATENCY) {
            let quantum_size = flp2(num.saturating_mul(48000) / denom);

            if quantum_size != self.quantum_size {
                tracing::info!(node = ?self.id, quantum_size);
                self.quantum_size = quantum_size;
                recalc |= self.active;
            }
        }

        recalc
    }

    /// The start condition: every used link on both directions is ready.
    pub(crate) fn start_condition(&self) -> bool {
        self.n_ready_output_links == self.n_used_output_links
            && self.n_ready_input_links == self.n_used_input_links
    }

    /// Begin processing; transitions the activation to awake.
    ///
    /// Returns false when the node was not in the triggered state, which is
    /// counted rather than treated as an error.
    pub(crate) fn start_process(&mut self, nsec: u64) -> bool {
        let a = &self.activation;

        if !atomic!(a, status).compare_exchange(
            ActivationStatus::TRIGGERED.into_raw(),
            ActivationStatus::AWAKE.into_raw(),
        ) {
            self.stats.not_self_triggered += 1;
            return false;
        }

        volatile!(a, awake_time).write(nsec);
        volatile!(a, pending_sync).write(0u8);
        volatile!(a, pending_new_pos).write(0u8);
        true
    }

    /// Finish processing; transitions the activation to finished.
    pub(crate) fn end_process(&mut self, nsec: u64) {
        let a = &self.activation;
        volatile!(a, finish_time).write(nsec);
        atomic!(a, status).store(ActivationStatus::FINISHED.into_raw());
    }

    /// Record an xrun against this node's activation.
    pub(crate) fn record_xrun(&mut self, nsec: u64, delay: u64) {
        let a = &self.activation;
        let count = volatile!(a, xrun_count).read() + 1;
        volatile!(a, xrun_count).write(count);
        volatile!(a, xrun_time).write(nsec);
        volatile!(a, xrun_delay).write(delay);

        let max = volatile!(a, max_delay).read().max(delay);
        volatile!(a, max_delay).write(max);

        tracing::debug!(
            node = ?self.id,
            count,
            delay,
            max,
            "xrun"
        );
    }

    /// Fold this cycle's timings into the cpu load averages.
    pub(crate) fn calculate_stats(&mut self) {
        let a = &self.activation;
        let signal_time = volatile!(a, signal_time).read();
        let prev_signal_time = volatile!(a, prev_signal_time).read();

        if signal_time <= prev_signal_time {
            return;
        }

        let finish_time = volatile!(a, finish_time).read();
        let process_time = finish_time.saturating_sub(signal_time);
        let period_time = signal_time - prev_signal_time;
        let load = process_time as f32 / period_time as f32;

        let loads = volatile!(a, cpu_load).read();
        volatile!(a, cpu_load).write([
            (loads[0] + load) / 2.0,
            (loads[1] * 7.0 + load) / 8.0,
            (loads[2] * 31.0 + load) / 32.0,
        ]);
    }

    /// The duration of one cycle in nanoseconds, from the driver clock.
    pub(crate) fn cycle_duration_ns(&self) -> u64 {
        let a = &self.activation;
        let duration = volatile!(a, position.clock.duration).read();
        let rate = volatile!(a, position.clock.rate).read();

        if rate.denom == 0 {
            return 0;
        }

        duration.saturating_mul(1_000_000_000) / u64::from(rate.denom)
    }

    /// Dump the scheduling state of every member, used when a cycle hangs.
    pub(crate) fn dump_members(&self) {
        for t in &self.members {
            let a = &t.activation;

            let pending = volatile!(a, state[0].pending).read();
            let required = volatile!(a, state[0].required).read();
            let signal = volatile!(a, signal_time).read();
            let awake = volatile!(a, awake_time).read();
            let finish = volatile!(a, finish_time).read();
            let status = volatile!(a, status).read();

            tracing::warn!(
                node = ?t.node,
                pending,
                required,
                signal,
                awake,
                finish,
                status,
                "member state"
            );
        }
    }
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("state", &self.state)
            .field("active", &self.active)
            .field("driver", &self.driver)
            .field("master", &self.master)
            .field("quantum_size", &self.quantum_size)
            .finish_non_exhaustive()
    }
}
