//! The event loop.
//!
//! [`Core`] holds every piece of per-reactor state that callbacks need: sessions, protocol
//! sessions, the bus and the timers. It is the host type handed to bus recipients and
//! timer callbacks. [`Reactor`] wraps a `Core` together with the mio [`Poll`], the
//! listening [`Server`] and a [`StopHandle`].
//!
//! One loop iteration:
//!
//! 1. dispatch bus messages until the queue is empty;
//! 2. block in `poll` until readiness or the nearest timer deadline;
//! 3. route readiness: write before read for each connection;
//! 4. fire expired timers.

use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use log::{debug, error, info, trace};
use mio::{Events, Poll, Registry, Token, Waker};

use crate::bus::{self, Bus, BusHost};
use crate::channels::{Event, SessionId};
use crate::config::Config;
use crate::error::Result;
use crate::protocol::ProtocolSession;
use crate::server::Server;
use crate::session::Session;
use crate::timer::Timers;

const WAKER: Token = Token(usize::MAX);
const LISTENER: Token = Token(usize::MAX - 1);

/// Shared reactor state.
pub struct Core {
    pub(crate) registry: Registry,
    pub(crate) config: Config,
    pub(crate) bus: Bus<Core, Event>,
    pub(crate) sessions: HashMap<SessionId, Session>,
    pub(crate) protocols: HashMap<SessionId, ProtocolSession>,
    pub(crate) timers: Timers<Core>,
    next_session_id: u64,
}

impl std::fmt::Debug for Core {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Core")
            .field("sessions", &self.sessions.len())
            .field("protocols", &self.protocols.len())
            .field("bus", &self.bus)
            .field("timers", &self.timers)
            .finish()
    }
}

impl BusHost<Event> for Core {
    fn bus(&mut self) -> &mut Bus<Core, Event> {
        &mut self.bus
    }
}

impl Core {
    pub fn new(registry: Registry, config: Config) -> Self {
        Self {
            registry,
            bus: Bus::new(config.bus_capacity),
            config,
            sessions: HashMap::new(),
            protocols: HashMap::new(),
            timers: Timers::new(),
            next_session_id: 1,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn bus_mut(&mut self) -> &mut Bus<Core, Event> {
        &mut self.bus
    }

    pub fn timers(&self) -> &Timers<Core> {
        &self.timers
    }

    pub(crate) fn next_session_id(&mut self) -> SessionId {
        let id = SessionId(self.next_session_id);
        self.next_session_id += 1;
        id
    }

    /// Deliver bus messages until none are left. Returns the number delivered.
    pub fn dispatch_pending(&mut self) -> Result<usize> {
        let mut delivered = 0;
        while self.bus.pending() > 0 {
            delivered += bus::dispatch(self)?;
        }
        Ok(delivered)
    }

    /// Run the callbacks of timers due at `now`. Returns how many fired.
    pub fn fire_timers(&mut self, now: Instant) -> Result<usize> {
        let epoch = self.timers.epoch();
        let mut fired = 0;
        while let Some((_, callback)) = self.timers.pop_expired(now, epoch) {
            callback(self)?;
            fired += 1;
        }
        Ok(fired)
    }
}

/// Stops a running [`Reactor`] from any thread.
#[derive(Debug, Clone)]
pub struct StopHandle {
    stopped: Arc<AtomicBool>,
    waker: Arc<Waker>,
}

impl StopHandle {
    pub fn stop(&self) -> io::Result<()> {
        self.stopped.store(true, Ordering::SeqCst);
        self.waker.wake()
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

pub struct Reactor {
    poll: Poll,
    events: Events,
    core: Core,
    server: Option<Server>,
    stop: StopHandle,
}

impl Reactor {
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        let poll = Poll::new()?;
        let waker = Waker::new(poll.registry(), WAKER)?;
        let registry = poll.registry().try_clone()?;
        Ok(Self {
            events: Events::with_capacity(config.events_capacity),
            core: Core::new(registry, config),
            poll,
            server: None,
            stop: StopHandle {
                stopped: Arc::new(AtomicBool::new(false)),
                waker: Arc::new(waker),
            },
        })
    }

    /// Bind and start accepting on `addr`. Returns the bound address.
    pub fn listen(&mut self, addr: SocketAddr) -> Result<SocketAddr> {
        let server = Server::listen(self.poll.registry(), addr, LISTENER)?;
        let local = server.local_addr();
        self.server = Some(server);
        Ok(local)
    }

    pub fn core(&self) -> &Core {
        &self.core
    }

    pub fn core_mut(&mut self) -> &mut Core {
        &mut self.core
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    /// Run until stopped or a fatal error occurs.
    pub fn run(&mut self) -> Result<()> {
        info!("reactor running");
        loop {
            self.core.dispatch_pending()?;
            if self.stop.is_stopped() {
                info!("reactor stopped");
                return Ok(());
            }

            let timeout = self
                .core
                .timers
                .next_deadline()
                .map(|deadline| deadline.saturating_duration_since(Instant::now()));
            if let Err(e) = self.poll.poll(&mut self.events, timeout) {
                if e.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                return Err(e.into());
            }

            for event in self.events.iter() {
                match event.token() {
                    WAKER => trace!("woken"),
                    LISTENER => {
                        if let Some(server) = self.server.as_mut() {
                            absorb(server.accept(&mut self.core))?;
                        }
                    }
                    token => {
                        let id = SessionId(token.0 as u64);
                        let writable = event.is_writable() || event.is_write_closed();
                        let readable = event.is_readable() || event.is_read_closed() || event.is_error();
                        if writable && self.core.session(id).is_some_and(Session::is_writing) {
                            absorb(self.core.handle_writable(id))?;
                        }
                        if readable && self.core.session(id).is_some_and(Session::is_reading) {
                            absorb(self.core.handle_readable(id))?;
                        }
                    }
                }
            }

            let fired = self.core.fire_timers(Instant::now())?;
            if fired > 0 {
                debug!("{} timer(s) fired", fired);
            }
        }
    }
}

/// Log and swallow errors that only concern one connection.
fn absorb(result: Result<()>) -> Result<()> {
    match result {
        Err(e) if !e.is_fatal() => {
            error!("{}", e);
            Ok(())
        }
        other => other,
    }
}
