use std::collections::HashMap;
use std::fs;
use std::os::fd::AsRawFd;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context as _, Result, bail};
use clap::Parser;
use graph::nodes::{NullSink, SilenceSource};
use graph::{ClientBinding, DataLoop, Graph, NodeId};
use protocol::consts::Direction;
use protocol::id::{AudioFormat as SampleFormat, Param};
use protocol::poll::{Interest, Poll, PollEvent, Token};
use protocol::{Listener, Properties};
use tracing_subscriber::EnvFilter;

mod config;
use self::config::Config;

const TOKEN_LISTENER: u64 = 1;
const TOKEN_DATA_LOOP: u64 = 2;
const TOKEN_CLIENT_BASE: u64 = 16;

#[derive(Parser, Debug)]
#[command(name = "skein", about = "A multimedia processing graph runtime")]
struct Args {
    /// Path of the configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override the control socket path.
    #[arg(long)]
    socket: Option<PathBuf>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::default_graph(),
    };

    if let Some(socket) = args.socket {
        config.socket = socket;
    }

    let mut graph = Graph::new();
    let mut data_loop = DataLoop::new()?;

    let nodes = build_static_graph(&mut graph, &config)?;

    for (name, id) in &nodes {
        tracing::info!(name, node = ?id, "static node");
    }

    // Pace every elected driver from a timer.
    for (_, &id) in &nodes {
        data_loop.add_node(&graph, id)?;

        let node = graph.node(id)?;

        if node.is_master() {
            let period = driver_period(&graph, id)?;
            tracing::info!(node = ?id, ?period, "arming driver timer");
            data_loop.add_driver_timer(id, period)?;
        }
    }

    let _ = fs::remove_file(&config.socket);
    let listener = Listener::bind(&config.socket)?;
    tracing::info!(socket = %config.socket.display(), "listening");

    run(graph, data_loop, listener)
}

/// Construct the statically configured nodes and links.
fn build_static_graph(graph: &mut Graph, config: &Config) -> Result<HashMap<String, NodeId>> {
    let mut nodes = HashMap::new();
    let mut out_ports = HashMap::new();
    let mut in_ports = HashMap::new();

    for node_config in &config.nodes {
        let mut properties: Properties = node_config
            .properties
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        properties.insert(protocol::prop::NODE_NAME, node_config.name.clone());

        let format = graph::AudioFormat {
            format: SampleFormat::F32P,
            rate: 48000,
            channels: 1,
        };

        let id = match node_config.factory.as_str() {
            "silence-source" => {
                let port = graph::PortId::new(0);
                let id = graph.add_node(properties, Box::new(SilenceSource::new(port, 48000)))?;
                let port = graph.add_port(id, Direction::OUTPUT)?;

                graph.port_update_params(
                    id,
                    Direction::OUTPUT,
                    port,
                    Param::ENUM_FORMAT,
                    vec![format.enum_value(
                        [SampleFormat::F32P, SampleFormat::S16],
                        [48000, 44100],
                    )],
                )?;

                out_ports.insert(node_config.name.clone(), (id, port));
                id
            }
            "null-sink" => {
                let port = graph::PortId::new(0);
                let id = graph.add_node(properties, Box::new(NullSink::new(port)))?;
                let port = graph.add_port(id, Direction::INPUT)?;

                graph.port_update_params(
                    id,
                    Direction::INPUT,
                    port,
                    Param::ENUM_FORMAT,
                    vec![format.enum_value(
                        [SampleFormat::F32P, SampleFormat::S16],
                        [48000, 44100],
                    )],
                )?;

                in_ports.insert(node_config.name.clone(), (id, port));
                id
            }
            factory => bail!("Unknown factory {factory:?} for node {:?}", node_config.name),
        };

        graph.register(id)?;
        graph.set_active(id, true)?;
        nodes.insert(node_config.name.clone(), id);
    }

    for link in &config.links {
        let output = out_ports
            .get(&link.output)
            .with_context(|| format!("Link output {:?} is not a source", link.output))?;

        let input = in_ports
            .get(&link.input)
            .with_context(|| format!("Link input {:?} is not a sink", link.input))?;

        graph.link(*output, *input)?;
    }

    Ok(nodes)
}

/// The timer period for a driver, from its clock duration and rate.
fn driver_period(graph: &Graph, id: NodeId) -> Result<Duration> {
    let node = graph.node(id)?;
    let activation = node.activation();

    // SAFETY: Main-loop read of driver-owned fields before the loop runs.
    let clock = unsafe { activation.read() }.position.clock;

    let denom = clock.rate.denom.max(1);
    let nanos = clock.duration.saturating_mul(1_000_000_000) / u64::from(denom);
    Ok(Duration::from_nanos(nanos.max(1)))
}

/// The main loop: control traffic and lifecycle, with the data loop's poll
/// fd nested so one thread can serve both.
fn run(mut graph: Graph, mut data_loop: DataLoop, listener: Listener) -> Result<()> {
    let mut poll = Poll::new()?;
    let mut events: Vec<PollEvent> = Vec::new();
    let mut clients: HashMap<u64, ClientBinding> = HashMap::new();
    let mut next_client = TOKEN_CLIENT_BASE;

    poll.add(listener.as_raw_fd(), Token::new(TOKEN_LISTENER), Interest::READ)?;
    poll.add(
        data_loop.as_raw_fd(),
        Token::new(TOKEN_DATA_LOOP),
        Interest::READ,
    )?;

    loop {
        events.clear();
        poll.poll(&mut events, None)?;

        for n in 0..events.len() {
            let event = events[n];

            match event.token.value() {
                TOKEN_LISTENER => {
                    while let Some(mut connection) = listener.accept()? {
                        connection.set_nonblocking(true)?;

                        let token = next_client;
                        next_client += 1;

                        poll.add(
                            connection.as_raw_fd(),
                            Token::new(token),
                            connection.interest(),
                        )?;

                        let mut binding = ClientBinding::new(connection);

                        match binding.attach(&mut graph, Properties::new()) {
                            Ok(node) => {
                                tracing::info!(token, ?node, "client connected");
                                let _ = binding.flush(&mut graph);
                                clients.insert(token, binding);
                            }
                            Err(error) => {
                                tracing::warn!(token, ?error, "client attach failed");
                                let _ = poll.delete(binding.connection().as_raw_fd());
                            }
                        }
                    }
                }
                TOKEN_DATA_LOOP => {
                    data_loop.run_once(&mut graph, Some(Duration::ZERO))?;
                }
                token => {
                    let Some(client) = clients.get_mut(&token) else {
                        tracing::warn!(token, "event for unknown client");
                        continue;
                    };

                    let mut drop_client = false;

                    if event.interest.is_hup() || event.interest.is_error() {
                        drop_client = true;
                    } else {
                        if let Err(error) = client.handle(&mut graph) {
                            tracing::warn!(token, ?error, "client failed");
                            drop_client = true;
                        }

                        if !drop_client {
                            if let Err(error) = client.flush(&mut graph) {
                                tracing::warn!(token, ?error, "client flush failed");
                                drop_client = true;
                            }
                        }
                    }

                    if drop_client {
                        if let Some(mut client) = clients.remove(&token) {
                            let _ = poll.delete(client.connection().as_raw_fd());

                            if let Some(node) = client.node() {
                                tracing::info!(?node, "destroying client node");
                                let _ = graph.destroy_node(node);
                            }
                        }

                        continue;
                    }

                    let client = clients.get_mut(&token).context("client vanished")?;

                    if let protocol::poll::ChangeInterest::Changed(interest) =
                        client.connection().modified()
                    {
                        poll.modify(client.connection().as_raw_fd(), event.token, interest)?;
                    }
                }
            }
        }

        while let Some(event) = graph.poll_event() {
            tracing::debug!(?event, "graph event");
        }
    }
}
