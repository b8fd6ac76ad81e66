//! OS-level and wire-level plumbing shared by every graph participant.
//!
//! This crate carries the pieces that sit below the scheduler: event and
//! timer file descriptors, the epoll wrapper driving both loops, the
//! unix-socket control-channel framing with fd passing, and the well-known
//! identifiers, flags and properties of the protocol.

mod error;
pub use self::error::Error;

mod event_fd;
pub use self::event_fd::EventFd;

mod timer_fd;
pub use self::timer_fd::TimerFd;

pub mod poll;

mod events;
pub use self::events::Events;

pub mod buf;

mod connection;
pub use self::connection::{Connection, Listener};

mod types;
pub use self::types::Header;

pub mod consts;
pub mod flags;
pub mod id;
pub mod op;
pub mod prop;

mod properties;
pub use self::properties::Properties;

pub mod ids;
pub use self::ids::{IdSet, Ids};
