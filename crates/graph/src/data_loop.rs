use core::time::Duration;

use std::collections::{HashMap, VecDeque};
use std::os::fd::{AsRawFd, RawFd};

use anyhow::{Context as _, Result};
use protocol::poll::{Interest, Poll, PollEvent, Token};
use protocol::{EventFd, TimerFd};

use crate::Graph;
use crate::id::NodeId;

enum SourceKind {
    /// The internal invoke wakeup.
    Invoke,
    /// A node's wake-fd became readable.
    NodeWake(NodeId),
    /// A driver's cycle timer fired.
    DriverTimer(NodeId),
}

/// The real-time side of the runtime.
///
/// A single-threaded poll loop over node wake-fds and driver timers. The
/// only blocking point is the outer poll; structure changes from the main
/// loop are applied through [`invoke`][DataLoop::invoke] at the poll safe
/// point, so no traversal observes a half-updated graph.
pub struct DataLoop {
    poll: Poll,
    wake: EventFd,
    invoke: VecDeque<Box<dyn FnOnce(&mut Graph)>>,
    sources: HashMap<u64, SourceKind>,
    timers: HashMap<NodeId, (TimerFd, u64)>,
    node_tokens: HashMap<NodeId, u64>,
    next_token: u64,
    events: Vec<PollEvent>,
}

impl DataLoop {
    /// Construct a new data loop.
    pub fn new() -> Result<Self> {
        let mut poll = Poll::new()?;
        let wake = EventFd::new_nonblocking(0)?;

        let mut sources = HashMap::new();
        sources.insert(0, SourceKind::Invoke);
        poll.add(wake.as_raw_fd(), Token::new(0), Interest::READ)?;

        Ok(Self {
            poll,
            wake,
            invoke: VecDeque::new(),
            sources,
            timers: HashMap::new(),
            node_tokens: HashMap::new(),
            next_token: 1,
            events: Vec::new(),
        })
    }

    fn alloc_token(&mut self) -> u64 {
        let token = self.next_token;
        self.next_token += 1;
        token
    }

    /// Watch a node's wake-fd.
    pub fn add_node(&mut self, graph: &Graph, id: NodeId) -> Result<()> {
        if self.node_tokens.contains_key(&id) {
            return Ok(());
        }

        let fd = graph.node(id)?.wake_raw_fd();
        let token = self.alloc_token();

        self.poll.add(fd, Token::new(token), Interest::READ)?;
        self.sources.insert(token, SourceKind::NodeWake(id));
        self.node_tokens.insert(id, token);
        Ok(())
    }

    /// Stop watching a node's wake-fd.
    pub fn remove_node(&mut self, graph: &Graph, id: NodeId) -> Result<()> {
        let Some(token) = self.node_tokens.remove(&id) else {
            return Ok(());
        };

        self.sources.remove(&token);

        if let Ok(node) = graph.node(id) {
            self.poll.delete(node.wake_raw_fd())?;
        }

        Ok(())
    }

    /// Arm a cycle timer pacing the given driver.
    pub fn add_driver_timer(&mut self, id: NodeId, period: Duration) -> Result<()> {
        if let Some((timer, ..)) = self.timers.get(&id) {
            timer.set_interval(period)?;
            return Ok(());
        }

        let timer = TimerFd::new()?;
        timer.set_interval(period)?;

        let token = self.alloc_token();
        self.poll.add(timer.as_raw_fd(), Token::new(token), Interest::READ)?;
        self.sources.insert(token, SourceKind::DriverTimer(id));
        self.timers.insert(id, (timer, token));
        Ok(())
    }

    /// Disarm and remove a driver's cycle timer.
    pub fn remove_driver_timer(&mut self, id: NodeId) -> Result<()> {
        let Some((timer, token)) = self.timers.remove(&id) else {
            return Ok(());
        };

        timer.disarm()?;
        self.poll.delete(timer.as_raw_fd())?;
        self.sources.remove(&token);
        Ok(())
    }

    /// Queue a closure to run at the next poll safe point.
    ///
    /// This is how the main loop hands over structure changes without the
    /// data path observing them mid-traversal.
    pub fn invoke(&mut self, f: impl FnOnce(&mut Graph) + 'static) -> Result<()> {
        self.invoke.push_back(Box::new(f));
        self.wake.write(1)?;
        Ok(())
    }

    /// Run one iteration of the loop.
    pub fn run_once(&mut self, graph: &mut Graph, timeout: Option<Duration>) -> Result<()> {
        // Safe point: no traversal is in flight between polls.
        while let Some(f) = self.invoke.pop_front() {
            f(graph);
        }

        self.events.clear();
        self.poll.poll(&mut self.events, timeout)?;

        let events = std::mem::take(&mut self.events);

        for event in &events {
            let Some(kind) = self.sources.get(&event.token.value()) else {
                tracing::warn!(token = event.token.value(), "event for unknown source");
                continue;
            };

            match kind {
                SourceKind::Invoke => {
                    self.wake.read()?;

                    while let Some(f) = self.invoke.pop_front() {
                        f(graph);
                    }
                }
                SourceKind::NodeWake(id) => {
                    let id = *id;

                    if let Err(error) = graph.handle_wake(id) {
                        tracing::error!(node = ?id, ?error, "wake handling failed");
                    }
                }
                SourceKind::DriverTimer(id) => {
                    let id = *id;

                    let expirations = self
                        .timers
                        .get(&id)
                        .context("timer vanished")?
                        .0
                        .read()?
                        .unwrap_or(0);

                    if expirations > 1 {
                        tracing::trace!(node = ?id, expirations, "late ticks coalesced");
                    }

                    if let Err(error) = graph.tick(id) {
                        tracing::error!(node = ?id, ?error, "tick failed");
                    }
                }
            }
        }

        self.events = events;
        Ok(())
    }
}

impl AsRawFd for DataLoop {
    /// The loop's poll fd, so it can be nested inside another poll.
    #[inline]
    fn as_raw_fd(&self) -> RawFd {
        self.poll.as_raw_fd()
    }
}
