//! Opcodes of the control channel.
//!
//! The channel is declarative configuration only; the hot path runs over
//! the shared activation records and wake-fds.

/// Server to client: hand over the node's wake-fds and activation mapping.
pub const NODE_TRANSPORT_EVENT: u8 = 0;
/// Server to client: set a node parameter.
pub const NODE_SET_PARAM_EVENT: u8 = 1;
/// Server to client: install or clear a node io area.
pub const NODE_SET_IO_EVENT: u8 = 2;
/// Server to client: a node command such as start or pause.
pub const NODE_COMMAND_EVENT: u8 = 3;
/// Server to client: a port was added.
pub const NODE_ADD_PORT_EVENT: u8 = 4;
/// Server to client: a port was removed.
pub const NODE_REMOVE_PORT_EVENT: u8 = 5;
/// Server to client: set a port parameter.
pub const PORT_SET_PARAM_EVENT: u8 = 6;
/// Server to client: install a buffer set on a port mix.
pub const PORT_USE_BUFFERS_EVENT: u8 = 7;
/// Server to client: install or clear a port io area.
pub const PORT_SET_IO_EVENT: u8 = 8;
/// Server to client: recycle a buffer id on an input port.
pub const PORT_REUSE_BUFFER_EVENT: u8 = 9;
/// Server to client: teach the client how to signal a peer node.
pub const NODE_SET_ACTIVATION_EVENT: u8 = 10;
/// Server to client: per-link mix information for a port.
pub const PORT_SET_MIX_INFO_EVENT: u8 = 11;
/// Server to client: an async operation completed.
pub const NODE_RESULT_EVENT: u8 = 12;
/// Server to client: an error reply, matched by sequence number.
pub const NODE_ERROR_EVENT: u8 = 13;

/// Client to server: push node info and parameters.
pub const NODE_UPDATE: u8 = 32;
/// Client to server: push port info and parameters.
pub const PORT_UPDATE: u8 = 33;
/// Client to server: return allocated buffer descriptors.
pub const PORT_BUFFERS: u8 = 34;
