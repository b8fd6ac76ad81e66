//! The control-channel binding for exported nodes.
//!
//! A client owning a node in another process configures it through this
//! channel; the hot path never touches it. After `transport` and a
//! matching set of `set_activation` messages, the client wakes its peers
//! directly through the shared activation records and wake-fds.

use core::cell::RefCell;

use std::collections::VecDeque;
use std::os::fd::OwnedFd;
use std::rc::Rc;

use anyhow::{Context as _, Result, bail};
use pod::{Object, Value};
use protocol::buf::RecvBuf;
use protocol::consts::Direction;
use protocol::flags::Status;
use protocol::id::{Command, IoType, Param};
use protocol::{Connection, Header, Properties, op};

use crate::Graph;
use crate::id::{MemId, MixId, NodeId, PortId};
use crate::node_impl::{NodeImpl, ProcessContext};

/// A configuration message queued by the remote proxy, sent by the
/// binding's flush.
#[derive(Debug)]
pub(crate) enum OutboundOp {
    SetParam {
        param: Param,
        value: Option<Value>,
    },
    SetIo {
        io: IoType,
        mem: Option<(MemId, usize, usize)>,
    },
    Command {
        command: Command,
    },
    AddPort {
        direction: Direction,
        port: PortId,
    },
    RemovePort {
        direction: Direction,
        port: PortId,
    },
    PortSetParam {
        direction: Direction,
        port: PortId,
        param: Param,
        value: Option<Value>,
    },
    PortUseBuffers {
        direction: Direction,
        port: PortId,
        mix: MixId,
    },
    PortSetIo {
        direction: Direction,
        port: PortId,
        mix: MixId,
        io: IoType,
        mem: Option<(MemId, usize, usize)>,
    },
    ReuseBuffer {
        port: PortId,
        buffer: u32,
    },
}

type OpQueue = Rc<RefCell<VecDeque<OutboundOp>>>;

/// The in-core representative of a node living in a client process.
///
/// Configuration calls become queued messages; the node is never processed
/// locally.
pub(crate) struct RemoteNode {
    ops: OpQueue,
}

impl NodeImpl for RemoteNode {
    fn set_param(&mut self, id: Param, value: Option<&Value>) -> Result<i32> {
        self.ops.borrow_mut().push_back(OutboundOp::SetParam {
            param: id,
            value: value.cloned(),
        });
        Ok(0)
    }

    fn set_io(&mut self, id: IoType, mem: Option<(MemId, usize, usize)>) -> Result<()> {
        self.ops
            .borrow_mut()
            .push_back(OutboundOp::SetIo { io: id, mem });
        Ok(())
    }

    fn send_command(&mut self, command: Command) -> Result<i32> {
        self.ops
            .borrow_mut()
            .push_back(OutboundOp::Command { command });
        Ok(0)
    }

    fn port_set_param(
        &mut self,
        direction: Direction,
        port: PortId,
        id: Param,
        value: Option<&Value>,
    ) -> Result<i32> {
        self.ops.borrow_mut().push_back(OutboundOp::PortSetParam {
            direction,
            port,
            param: id,
            value: value.cloned(),
        });
        Ok(0)
    }

    fn port_use_buffers(
        &mut self,
        direction: Direction,
        port: PortId,
        mix: MixId,
        _buffers: u32,
    ) -> Result<i32> {
        self.ops.borrow_mut().push_back(OutboundOp::PortUseBuffers {
            direction,
            port,
            mix,
        });
        Ok(0)
    }

    fn port_set_io(
        &mut self,
        direction: Direction,
        port: PortId,
        mix: MixId,
        id: IoType,
        mem: Option<(MemId, usize, usize)>,
    ) -> Result<()> {
        self.ops.borrow_mut().push_back(OutboundOp::PortSetIo {
            direction,
            port,
            mix,
            io: id,
            mem,
        });
        Ok(())
    }

    fn reuse_buffer(&mut self, port: PortId, buffer: u32) -> Result<()> {
        self.ops
            .borrow_mut()
            .push_back(OutboundOp::ReuseBuffer { port, buffer });
        Ok(())
    }

    fn process(&mut self, _ctx: &mut ProcessContext<'_>) -> Status {
        // Exported nodes process in their own loop; the representative is
        // never scheduled locally.
        Status::OK
    }
}

/// One client connection and the exported node it owns.
pub struct ClientBinding {
    connection: Connection,
    recv: RecvBuf,
    fds: VecDeque<OwnedFd>,
    pending_header: Option<Header>,
    node: Option<NodeId>,
    ops: OpQueue,
}

impl ClientBinding {
    /// Wrap a connection into a binding.
    pub fn new(connection: Connection) -> Self {
        Self {
            connection,
            recv: RecvBuf::new(),
            fds: VecDeque::new(),
            pending_header: None,
            node: None,
            ops: Rc::new(RefCell::new(VecDeque::new())),
        }
    }

    /// The exported node owned by the client, once attached.
    pub fn node(&self) -> Option<NodeId> {
        self.node
    }

    /// Access the connection, for poll registration.
    pub fn connection(&mut self) -> &mut Connection {
        &mut self.connection
    }

    /// Create the exported node for the client and hand over transport.
    ///
    /// After this message the client may drive its side of the cycle
    /// protocol without further channel traffic.
    pub fn attach(&mut self, graph: &mut Graph, properties: Properties) -> Result<NodeId> {
        if self.node.is_some() {
            bail!("Client already owns a node");
        }

        let remote = RemoteNode {
            ops: self.ops.clone(),
        };

        let id = graph.add_node(properties, Box::new(remote))?;
        graph.set_exported(id, true)?;
        graph.register(id)?;

        let (read_dup, write_dup, mem) = {
            let node = graph.node(id)?;
            (node.wake_dup()?, node.wake_dup()?, node.activation_mem())
        };

        let mem_fd = graph.memory().dup_fd(mem)?;

        let value = Value::Struct(vec![
            Value::Int(id.into_u32() as i32),
            Value::Fd(0),
            Value::Fd(1),
            Value::Fd(2),
            Value::Long(0),
            Value::Long(crate::ffi::NodeActivation::SIZE as i64),
        ]);

        self.connection.request(
            id.into_u32(),
            op::NODE_TRANSPORT_EVENT,
            &value,
            vec![read_dup, write_dup, mem_fd],
        )?;

        self.node = Some(id);
        Ok(id)
    }

    /// Teach the client how to signal a peer node directly.
    pub fn send_set_activation(&mut self, graph: &mut Graph, peer: NodeId) -> Result<()> {
        let node = self.node.context("Client has no node")?;

        let (signal_fd, mem) = {
            let peer = graph.node(peer)?;
            (peer.wake_dup()?, peer.activation_mem())
        };

        let mem_fd = graph.memory().dup_fd(mem)?;

        let value = Value::Struct(vec![
            Value::Int(peer.into_u32() as i32),
            Value::Fd(0),
            Value::Fd(1),
            Value::Long(0),
            Value::Long(crate::ffi::NodeActivation::SIZE as i64),
        ]);

        self.connection.request(
            node.into_u32(),
            op::NODE_SET_ACTIVATION_EVENT,
            &value,
            vec![signal_fd, mem_fd],
        )?;

        Ok(())
    }

    /// Send an error reply, matched by the client to a request sequence.
    pub fn send_error(&mut self, seq: u32, res: i32, message: &str) -> Result<()> {
        let node = self.node.context("Client has no node")?;

        let value = Value::Struct(vec![
            Value::Int(seq as i32),
            Value::Int(res),
            Value::String(message.into()),
        ]);

        self.connection
            .request(node.into_u32(), op::NODE_ERROR_EVENT, &value, Vec::new())?;
        Ok(())
    }

    /// Encode and send every queued configuration message.
    pub fn flush(&mut self, graph: &mut Graph) -> Result<()> {
        let Some(node) = self.node else {
            return Ok(());
        };

        let ops: Vec<OutboundOp> = self.ops.borrow_mut().drain(..).collect();

        for op in ops {
            self.send_op(graph, node, op)?;
        }

        self.connection.send()?;
        Ok(())
    }

    fn send_op(&mut self, graph: &mut Graph, node: NodeId, op: OutboundOp) -> Result<()> {
        let id = node.into_u32();

        match op {
            OutboundOp::SetParam { param, value } => {
                let value = Value::Struct(vec![
                    Value::id(param),
                    Value::Int(0),
                    value.unwrap_or(Value::None),
                ]);

                self.connection
                    .request(id, op::NODE_SET_PARAM_EVENT, &value, Vec::new())?;
            }
            OutboundOp::SetIo { io, mem } => {
                let (fd, fds, offset, size) = self.mem_descriptor(graph, mem)?;

                let value = Value::Struct(vec![
                    Value::id(io),
                    fd,
                    Value::Long(offset),
                    Value::Long(size),
                ]);

                self.connection
                    .request(id, op::NODE_SET_IO_EVENT, &value, fds)?;
            }
            OutboundOp::Command { command } => {
                let value = Value::Struct(vec![Value::id(command)]);

                self.connection
                    .request(id, op::NODE_COMMAND_EVENT, &value, Vec::new())?;
            }
            OutboundOp::AddPort { direction, port } => {
                let value = Value::Struct(vec![
                    Value::Int(direction.into_raw() as i32),
                    Value::Int(port.into_u32() as i32),
                ]);

                self.connection
                    .request(id, op::NODE_ADD_PORT_EVENT, &value, Vec::new())?;
            }
            OutboundOp::RemovePort { direction, port } => {
                let value = Value::Struct(vec![
                    Value::Int(direction.into_raw() as i32),
                    Value::Int(port.into_u32() as i32),
                ]);

                self.connection
                    .request(id, op::NODE_REMOVE_PORT_EVENT, &value, Vec::new())?;
            }
            OutboundOp::PortSetParam {
                direction,
                port,
                param,
                value,
            } => {
                let value = Value::Struct(vec![
                    Value::Int(direction.into_raw() as i32),
                    Value::Int(port.into_u32() as i32),
                    Value::id(param),
                    Value::Int(0),
                    value.unwrap_or(Value::None),
                ]);

                self.connection
                    .request(id, op::PORT_SET_PARAM_EVENT, &value, Vec::new())?;
            }
            OutboundOp::PortUseBuffers {
                direction,
                port,
                mix,
            } => {
                // Describe the installed set so the client can map it.
                let (mem, n_buffers, blocks, size) = {
                    let n = graph.node(node)?;
                    let p = n.ports().get(direction, port)?;

                    let Some(buffers) = &p.buffers else {
                        bail!("Port {port} has no buffers to describe");
                    };

                    let blocks = buffers
                        .buffers
                        .first()
                        .map(|b| b.blocks.len() as u32)
                        .unwrap_or(0);

                    let size = buffers
                        .buffers
                        .first()
                        .and_then(|b| b.blocks.first())
                        .map(|d| d.maxsize as u32)
                        .unwrap_or(0);

                    (buffers.mem, buffers.len() as u32, blocks, size)
                };

                let mem_fd = graph.memory().dup_fd(mem)?;

                let value = Value::Struct(vec![
                    Value::Int(direction.into_raw() as i32),
                    Value::Int(port.into_u32() as i32),
                    Value::Int(mix.into_u32() as i32),
                    Value::Int(0),
                    Value::Int(n_buffers as i32),
                    Value::Fd(0),
                    Value::Int(blocks as i32),
                    Value::Int(size as i32),
                ]);

                self.connection
                    .request(id, op::PORT_USE_BUFFERS_EVENT, &value, vec![mem_fd])?;
            }
            OutboundOp::PortSetIo {
                direction,
                port,
                mix,
                io,
                mem,
            } => {
                let (fd, fds, offset, size) = self.mem_descriptor(graph, mem)?;

                let value = Value::Struct(vec![
                    Value::Int(direction.into_raw() as i32),
                    Value::Int(port.into_u32() as i32),
                    Value::Int(mix.into_u32() as i32),
                    Value::id(io),
                    fd,
                    Value::Long(offset),
                    Value::Long(size),
                ]);

                self.connection
                    .request(id, op::PORT_SET_IO_EVENT, &value, fds)?;
            }
            OutboundOp::ReuseBuffer { port, buffer } => {
                let value = Value::Struct(vec![
                    Value::Int(port.into_u32() as i32),
                    Value::Int(buffer as i32),
                ]);

                self.connection
                    .request(id, op::PORT_REUSE_BUFFER_EVENT, &value, Vec::new())?;
            }
        }

        Ok(())
    }

    fn mem_descriptor(
        &self,
        graph: &mut Graph,
        mem: Option<(MemId, usize, usize)>,
    ) -> Result<(Value, Vec<OwnedFd>, i64, i64)> {
        match mem {
            Some((mem, offset, size)) => {
                let fd = graph.memory().dup_fd(mem)?;
                Ok((Value::Fd(0), vec![fd], offset as i64, size as i64))
            }
            None => Ok((Value::Fd(-1), Vec::new(), 0, 0)),
        }
    }

    /// Receive and apply pending client messages.
    pub fn handle(&mut self, graph: &mut Graph) -> Result<()> {
        let mut incoming = Vec::new();
        self.connection.recv(&mut self.recv, &mut incoming)?;
        self.fds.extend(incoming);

        loop {
            let header = match self.pending_header.take() {
                Some(header) => header,
                None => {
                    let Some(bytes) = self.recv.read_bytes(Header::SIZE) else {
                        return Ok(());
                    };

                    let mut raw = [0u8; Header::SIZE];
                    raw.copy_from_slice(&bytes);
                    Header::from_bytes(&raw)
                }
            };

            let Some(payload) = self.recv.read_bytes(header.size() as usize) else {
                self.pending_header = Some(header);
                return Ok(());
            };

            let value = Value::decode(&payload)?;

            // Client messages carry no descriptors the core keeps; drop
            // any that travelled with this frame.
            for _ in 0..header.n_fds() {
                drop(self.fds.pop_front());
            }

            if let Err(error) = self.dispatch(graph, &header, &value) {
                tracing::warn!(?header, ?error, "client message failed");
                self.send_error(header.seq(), -1, &format!("{error}"))?;
            }
        }
    }

    fn dispatch(&mut self, graph: &mut Graph, header: &Header, value: &Value) -> Result<()> {
        match header.op_code() {
            op::NODE_UPDATE => self.node_update(graph, value),
            op::PORT_UPDATE => self.port_update(graph, value),
            op::PORT_BUFFERS => self.port_buffers(graph, value),
            op => {
                tracing::warn!(op, "unsupported client op");
                Ok(())
            }
        }
    }

    fn node_update(&mut self, graph: &mut Graph, value: &Value) -> Result<()> {
        let node = self.node.context("Client has no node")?;
        let mut fields = Fields::new(value)?;

        let _change_mask = fields.int()?;
        let n_params = fields.int()?;

        let mut params: Vec<Object> = Vec::new();

        for _ in 0..n_params {
            params.push(fields.object()?.clone());
        }

        let n_props = fields.int()?;
        let mut props = Vec::new();

        for _ in 0..n_props {
            let key = fields.str()?.to_owned();
            let value = fields.str()?.to_owned();
            props.push((key, value));
        }

        let recalc = {
            let n = graph.node_mut(node)?;

            for object in params {
                let param = Param::from_raw(object.object_id);
                n.params.push_param(param, Value::Object(object));
            }

            for (key, value) in props {
                n.properties.insert(key, value);
            }

            n.check_properties()
        };

        if recalc {
            graph.recalc()?;
        }

        Ok(())
    }

    fn port_update(&mut self, graph: &mut Graph, value: &Value) -> Result<()> {
        let node = self.node.context("Client has no node")?;
        let mut fields = Fields::new(value)?;

        let direction = Direction::from_raw(fields.int()? as u32);
        let port_id = PortId::new(fields.int()? as u32);
        let _change_mask = fields.int()?;
        let n_params = fields.int()?;

        let mut params: Vec<Object> = Vec::new();

        for _ in 0..n_params {
            params.push(fields.object()?.clone());
        }

        if graph.node(node)?.ports().get(direction, port_id).is_err() {
            let added = graph.add_port(node, direction)?;

            if added != port_id {
                bail!("Client port {port_id} does not match allocated {added}");
            }
        }

        for object in params {
            let param = Param::from_raw(object.object_id);
            graph.port_update_params(node, direction, port_id, param, vec![Value::Object(object)])?;
        }

        Ok(())
    }

    fn port_buffers(&mut self, _graph: &mut Graph, value: &Value) -> Result<()> {
        let mut fields = Fields::new(value)?;

        let direction = Direction::from_raw(fields.int()? as u32);
        let port = fields.int()?;
        let mix = fields.int()?;
        let n_buffers = fields.int()?;

        tracing::debug!(?direction, port, mix, n_buffers, "client returned buffers");
        Ok(())
    }
}

/// Cursor over the fields of a struct message.
struct Fields<'a> {
    values: &'a [Value],
    at: usize,
}

impl<'a> Fields<'a> {
    fn new(value: &'a Value) -> Result<Self> {
        let Value::Struct(values) = value else {
            bail!("Message payload is not a struct");
        };

        Ok(Self { values, at: 0 })
    }

    fn next(&mut self) -> Result<&'a Value> {
        let Some(value) = self.values.get(self.at) else {
            bail!("Message truncated at field {}", self.at);
        };

        self.at += 1;
        Ok(value)
    }

    fn int(&mut self) -> Result<i32> {
        let value = self.next()?;

        let Some(value) = value.as_int() else {
            bail!("Expected int field, found {value:?}");
        };

        Ok(value)
    }

    fn str(&mut self) -> Result<&'a str> {
        let value = self.next()?;

        let Some(value) = value.as_str() else {
            bail!("Expected string field, found {value:?}");
        };

        Ok(value)
    }

    fn object(&mut self) -> Result<&'a Object> {
        let value = self.next()?;

        let Some(value) = value.as_object() else {
            bail!("Expected object field, found {value:?}");
        };

        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::Fields;
    use pod::{Builder, Value};

    #[test]
    fn fields_cursor() {
        let value = Value::Struct(vec![
            Value::Int(3),
            Value::String(String::from("x")),
            Builder::object(1u32, 2u32).build_value(),
        ]);

        let mut fields = Fields::new(&value).unwrap();
        assert_eq!(fields.int().unwrap(), 3);
        assert_eq!(fields.str().unwrap(), "x");
        assert_eq!(fields.object().unwrap().object_id, 2);
        assert!(fields.int().is_err());
    }
}
