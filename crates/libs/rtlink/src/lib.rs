//! A cache-coherent adapter between the kernel's rtnetlink link objects and
//! an upstream network-management daemon: the kernel is always the source
//! of truth, the cache is a materialized view, and netlink notifications
//! are hints that trigger a fresh kernel query rather than data in their
//! own right.

mod cache;
mod command;
mod config;
mod engine;
mod error;
mod object;
mod signal;
mod transport;

pub use cache::LinkCache;
pub use command::CommandSurface;
pub use config::{Tunables, DEFAULT_EVENT_BUFFER_BYTES};
pub use engine::CoherenceEngine;
pub use error::PlatformError;
pub use object::{Link, LinkKind, RawLinkMessage};
pub use signal::{Signal, SignalEmitter, Subscriber};
pub use transport::{flags, EventChannel, LinkEvent, LinkSource, NetlinkTransport};
