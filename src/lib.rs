//! h2-reactor: a single-threaded, readiness-based HTTP/2 session reactor
//!
//! This crate multiplexes connections, sessions and streams over non-blocking sockets
//! without threads. One [`Reactor`] owns the mio poll loop; everything else runs as
//! callbacks on that thread.
//!
//! # Layers
//!
//! - **Buffer**: fixed-capacity byte staging with zero-copy views ([`buffer`])
//! - **Bus**: deferred publish/subscribe between layers, broadcast and anycast ([`bus`])
//! - **Session**: one socket plus recv/send buffers with watermark backpressure ([`session`])
//! - **Server**: accepts connections and creates sessions ([`server`])
//! - **ProtocolSession / Stream**: drives the HTTP/2 engine, per-stream idle timers and
//!   graceful shutdown ([`protocol`])
//! - **Handlers**: application recipients on the bus ([`handler`])
//! - **Codec**: the sans-I/O HTTP/2 engine the protocol layer drives ([`codec`])
//!
//! # Quick Start
//!
//! ```no_run
//! use h2_reactor::{handler, protocol, Config, Reactor};
//!
//! let mut reactor = Reactor::new(Config::default())?;
//! protocol::install(reactor.core_mut());
//! handler::install_http2(reactor.core_mut());
//! reactor.listen("127.0.0.1:8080".parse().unwrap())?;
//! reactor.run()?;
//! # Ok::<(), h2_reactor::Error>(())
//! ```
//!
//! # Ordering
//!
//! Readiness handlers never call protocol or application code directly. They publish on the
//! bus, and the reactor delivers messages between poll calls in publication order. Messages
//! published while a batch is being delivered wait for the next batch.

pub mod buffer;
pub mod bus;
pub mod channels;
pub mod codec;
pub mod config;
pub mod error;
pub mod handler;
pub mod protocol;
pub mod reactor;
pub mod server;
pub mod session;
pub mod timer;

pub use buffer::{Buffer, Transfer};
pub use bus::{Bus, BusError, BusHost, Message, RecipientHandle};
pub use channels::{Channel, Event, SessionId};
pub use config::Config;
pub use error::{Error, Result};
pub use protocol::{ProtocolSession, Stream, StreamMap, StreamState};
pub use reactor::{Core, Reactor, StopHandle};
pub use server::Server;
pub use session::{Session, Socket};
