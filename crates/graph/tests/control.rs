use anyhow::Result;
use graph::{ClientBinding, Graph};
use pod::{Builder, Value};
use protocol::buf::RecvBuf;
use protocol::consts::Direction;
use protocol::id::{
    AudioFormat as SampleFormat, Format, MediaSubType, MediaType, ObjectType, Param,
};
use protocol::{Connection, Header, Properties, op};

/// Receive one framed message from the client end of the channel.
fn recv_frame(
    connection: &mut Connection,
    recv: &mut RecvBuf,
    fds: &mut Vec<std::os::fd::OwnedFd>,
) -> Result<Option<(Header, Value)>> {
    connection.recv(recv, fds)?;

    let Some(bytes) = recv.read_bytes(Header::SIZE) else {
        return Ok(None);
    };

    let mut raw = [0u8; Header::SIZE];
    raw.copy_from_slice(&bytes);
    let header = Header::from_bytes(&raw);

    let payload = recv
        .read_bytes(header.size() as usize)
        .expect("payload missing after header");

    Ok(Some((header, Value::decode(&payload)?)))
}

#[test]
fn transport_hands_over_fds() -> Result<()> {
    let mut graph = Graph::new();
    let (server, mut client) = Connection::pair()?;

    let mut binding = ClientBinding::new(server);
    binding.connection().set_nonblocking(true)?;
    client.set_nonblocking(true)?;

    let node = binding.attach(&mut graph, Properties::new())?;
    binding.flush(&mut graph)?;

    let mut recv = RecvBuf::new();
    let mut fds = Vec::new();

    let (header, value) = recv_frame(&mut client, &mut recv, &mut fds)?.expect("transport frame");

    assert_eq!(header.op_code(), op::NODE_TRANSPORT_EVENT);
    assert_eq!(header.id(), node.into_u32());
    assert_eq!(header.n_fds(), 3);
    assert_eq!(fds.len(), 3);

    let Value::Struct(fields) = value else {
        panic!("transport payload is not a struct");
    };

    assert_eq!(fields[0], Value::Int(node.into_u32() as i32));
    assert_eq!(fields[1], Value::Fd(0));
    Ok(())
}

#[test]
fn port_update_declares_ports() -> Result<()> {
    let mut graph = Graph::new();
    let (server, mut client) = Connection::pair()?;

    let mut binding = ClientBinding::new(server);
    binding.connection().set_nonblocking(true)?;
    client.set_nonblocking(true)?;

    let node = binding.attach(&mut graph, Properties::new())?;

    // The client pushes an output port with a format menu.
    let format = Builder::object(ObjectType::FORMAT, Param::ENUM_FORMAT)
        .property(Format::MEDIA_TYPE, Value::id(MediaType::AUDIO))
        .property(Format::MEDIA_SUB_TYPE, Value::id(MediaSubType::RAW))
        .property(Format::AUDIO_FORMAT, Value::id(SampleFormat::F32P))
        .property(Format::AUDIO_RATE, Value::Int(48000))
        .property(Format::AUDIO_CHANNELS, Value::Int(1))
        .build_value();

    let update = Value::Struct(vec![
        Value::Int(Direction::OUTPUT.into_raw() as i32),
        Value::Int(0),
        Value::Int(0),
        Value::Int(1),
        format.clone(),
    ]);

    client.request(node.into_u32(), op::PORT_UPDATE, &update, Vec::new())?;
    client.send()?;

    binding.handle(&mut graph)?;

    let declared = graph.port_enum_params(
        node,
        Direction::OUTPUT,
        graph::PortId::new(0),
        Param::ENUM_FORMAT,
        0,
        16,
        None,
    )?;

    assert_eq!(declared.len(), 1);
    assert_eq!(declared[0], format);
    Ok(())
}

#[test]
fn node_update_applies_properties() -> Result<()> {
    let mut graph = Graph::new();
    let (server, mut client) = Connection::pair()?;

    let mut binding = ClientBinding::new(server);
    binding.connection().set_nonblocking(true)?;
    client.set_nonblocking(true)?;

    let node = binding.attach(&mut graph, Properties::new())?;

    let update = Value::Struct(vec![
        Value::Int(0),
        Value::Int(0),
        Value::Int(2),
        Value::String(String::from("node.name")),
        Value::String(String::from("remote-node")),
        Value::String(String::from("node.latency")),
        Value::String(String::from("512/48000")),
    ]);

    client.request(node.into_u32(), op::NODE_UPDATE, &update, Vec::new())?;
    client.send()?;

    binding.handle(&mut graph)?;

    assert_eq!(graph.node(node)?.name, "remote-node");
    assert_eq!(graph.node(node)?.properties.get("node.latency"), Some("512/48000"));
    Ok(())
}

#[test]
fn set_activation_teaches_peers() -> Result<()> {
    let mut graph = Graph::new();
    let (server, mut client) = Connection::pair()?;

    let mut binding = ClientBinding::new(server);
    binding.connection().set_nonblocking(true)?;
    client.set_nonblocking(true)?;

    let node = binding.attach(&mut graph, Properties::new())?;
    binding.flush(&mut graph)?;

    let peer = graph.add_node(Properties::new(), Box::new(Nothing))?;
    graph.register(peer)?;

    binding.send_set_activation(&mut graph, peer)?;
    binding.flush(&mut graph)?;

    let mut recv = RecvBuf::new();
    let mut fds = Vec::new();

    // Skip past the transport frame.
    let (header, ..) = recv_frame(&mut client, &mut recv, &mut fds)?.expect("transport");
    assert_eq!(header.op_code(), op::NODE_TRANSPORT_EVENT);

    let frame = match recv_frame(&mut client, &mut recv, &mut fds)? {
        Some(frame) => frame,
        None => recv_frame(&mut client, &mut recv, &mut fds)?.expect("set_activation"),
    };

    let (header, value) = frame;
    assert_eq!(header.op_code(), op::NODE_SET_ACTIVATION_EVENT);
    assert_eq!(header.id(), node.into_u32());
    assert_eq!(header.n_fds(), 2);

    let Value::Struct(fields) = value else {
        panic!("set_activation payload is not a struct");
    };

    assert_eq!(fields[0], Value::Int(peer.into_u32() as i32));

    // Five descriptors arrived overall: three transport, two activation.
    assert_eq!(fds.len(), 5);
    Ok(())
}

struct Nothing;

impl graph::NodeImpl for Nothing {
    fn process(&mut self, _ctx: &mut graph::ProcessContext<'_>) -> protocol::flags::Status {
        protocol::flags::Status::OK
    }
}
