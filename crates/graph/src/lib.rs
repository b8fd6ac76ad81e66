//! The graph scheduler core.
//!
//! Nodes exchange buffers through ports under a shared real-time scheduling
//! discipline. One node per connected component is elected driver and paces
//! the cycle; every other node is a follower that must finish its work
//! within that cycle. Coordination across processes happens exclusively
//! through atomics in shared activation records and `u64` writes to
//! wake-fds; the control channel only carries declarative configuration.

pub mod ffi;

mod id;
pub use self::id::{LinkId, MemId, MixId, NodeId, PortId};

pub(crate) mod ptr;

mod memory;
pub use self::memory::{Memory, Region};

mod activation;
pub use self::activation::Target;

mod buffer;
pub use self::buffer::{Buffer, BufferSet, DataBlock};

mod params;
pub use self::params::Parameters;

mod format;
pub use self::format::AudioFormat;

mod port;
pub use self::port::{MixSlot, Port, PortState, Ports};

mod node;
pub use self::node::{Node, NodeState};

mod node_impl;
pub use self::node_impl::{NodeImpl, ProcessContext};

pub mod nodes;

mod link;
pub use self::link::Link;

mod graph;
pub use self::graph::Graph;

mod events;
pub use self::events::GraphEvent;

mod work;
pub use self::work::WorkQueue;

mod stats;
pub use self::stats::Stats;

mod data_loop;
pub use self::data_loop::DataLoop;

mod control;
pub use self::control::ClientBinding;

pub(crate) mod utils;
