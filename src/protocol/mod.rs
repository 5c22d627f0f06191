//! HTTP/2 protocol sessions layered over [`Session`](crate::session::Session)s.
//!
//! A [`ProtocolSession`] owns the engine for one connection, the stream-id map, the
//! settings-ack timer and the graceful-shutdown state. It never calls the session layer from
//! inside a readiness handler: it reacts to bus events registered by [`install`].
//!
//! Lifecycle: `ACTIVE → SHUTTING_DOWN → DELETED`. Shutdown queues the engine's final
//! frames, registers a one-shot recipient on [`Channel::SendBufferEmpty`] and deletes the
//! session once everything queued has reached the socket.

mod callbacks;
pub mod stream;

use log::{debug, warn};

use crate::bus::RecipientHandle;
use crate::channels::{Channel, Event, SessionId};
use crate::codec::{error_code, settings_id, CodecError, EngineSettings, H2Engine, H2Header};
use crate::error::{Error, Result};
use crate::reactor::Core;
use crate::timer::TimerKey;

use callbacks::Callbacks;
pub use stream::{Stream, StreamMap, StreamState};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TimerKind {
    Recv,
    Send,
}

#[derive(Debug)]
pub struct ProtocolSession {
    id: SessionId,
    engine: H2Engine,
    streams: StreamMap,
    settings_timer: TimerKey,
    shutdown: Option<RecipientHandle>,
}

impl ProtocolSession {
    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn engine(&self) -> &H2Engine {
        &self.engine
    }

    pub fn streams(&self) -> &StreamMap {
        &self.streams
    }

    pub fn settings_timer(&self) -> TimerKey {
        self.settings_timer
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_some()
    }

    /// Queue a response on `stream_id`. Nothing is written until the next pump.
    pub fn submit_response(
        &mut self,
        stream_id: u32,
        headers: &[H2Header],
        body: Option<Vec<u8>>,
    ) -> Result<(), CodecError> {
        self.engine.submit_response(stream_id, headers, body)
    }
}

/// Register the protocol layer's bus recipients.
pub fn install(core: &mut Core) {
    core.bus.register(Channel::SessionInitialized, |core: &mut Core, event: &Event| {
        create(core, event.session())
    });
    core.bus.register(Channel::DataReceived, |core: &mut Core, event: &Event| {
        data_received(core, event.session())
    });
    core.bus.register(Channel::WantWrite, |core: &mut Core, event: &Event| {
        pump(core, event.session())
    });
    core.bus.register(Channel::SendBufferEmpty, |core: &mut Core, event: &Event| {
        pump(core, event.session())
    });
    core.bus.register(Channel::SessionDeleted, |core: &mut Core, event: &Event| {
        release(core, event.session());
        Ok(())
    });
}

impl Core {
    pub fn protocol(&self, id: SessionId) -> Option<&ProtocolSession> {
        self.protocols.get(&id)
    }

    pub fn protocol_mut(&mut self, id: SessionId) -> Option<&mut ProtocolSession> {
        self.protocols.get_mut(&id)
    }
}

fn create(core: &mut Core, id: SessionId) -> Result<()> {
    if !core.sessions.contains_key(&id) {
        return Ok(());
    }
    if core.protocols.contains_key(&id) {
        return Err(Error::invariant(format!("[{}] protocol session created twice", id)));
    }
    debug!("[{}] init http session", id);

    let settings_timer = core.timers.insert(core.config.settings_timeout, move |core: &mut Core| {
        debug!("[{}] settings timeout", id);
        shutdown(core, id, Some(error_code::SETTINGS_TIMEOUT))
    });
    core.timers.start(settings_timer);

    let max_concurrent_streams = core.config.max_concurrent_streams;
    let mut engine = H2Engine::new(EngineSettings { max_concurrent_streams });
    engine.submit_settings(&[(settings_id::MAX_CONCURRENT_STREAMS, max_concurrent_streams)]);

    core.protocols.insert(
        id,
        ProtocolSession {
            id,
            engine,
            streams: StreamMap::new(),
            settings_timer,
            shutdown: None,
        },
    );
    check_want_write(core, id)
}

/// Feed everything in the recv buffer to the engine.
fn data_received(core: &mut Core, id: SessionId) -> Result<()> {
    let Core {
        sessions,
        protocols,
        timers,
        bus,
        config,
        ..
    } = &mut *core;
    let (Some(session), Some(proto)) = (sessions.get_mut(&id), protocols.get_mut(&id)) else {
        return Ok(());
    };

    let ProtocolSession {
        engine,
        streams,
        settings_timer,
        ..
    } = proto;
    let mut cb = Callbacks::new(id, streams, timers, bus, config, *settings_timer);
    let input = session.recv_buffer_mut().outgoing_view();
    let len = input.len();
    let received = engine.mem_recv(input, &mut cb);
    cb.finish()?;
    let (wants_read, wants_write) = (engine.want_read(), engine.want_write());

    core.recv_consumed(id, len)?;
    match received {
        Ok(n) => debug!("[{}] recv {} bytes of http data", id, n),
        Err(e) => {
            warn!("[{}] protocol error: {}", id, e);
            return shutdown(core, id, Some(e.error_code()));
        }
    }

    if !wants_read && !wants_write {
        debug!("[{}] engine wants neither read nor write", id);
        return shutdown(core, id, None);
    }
    check_want_write(core, id)
}

fn check_want_write(core: &mut Core, id: SessionId) -> Result<()> {
    let wants_write = core.protocols.get(&id).is_some_and(|p| p.engine.want_write());
    if wants_write {
        core.bus.broadcast(Event::WantWrite(id))?;
    }
    Ok(())
}

/// Move pending engine output into the send buffer and push it at the socket.
pub fn pump(core: &mut Core, id: SessionId) -> Result<()> {
    let written = {
        let Core {
            sessions,
            protocols,
            timers,
            bus,
            config,
            ..
        } = &mut *core;
        let (Some(session), Some(proto)) = (sessions.get_mut(&id), protocols.get_mut(&id)) else {
            return Ok(());
        };
        let ProtocolSession {
            engine,
            streams,
            settings_timer,
            ..
        } = proto;
        let mut cb = Callbacks::new(id, streams, timers, bus, config, *settings_timer);
        let written = engine.send(session.send_buffer_mut().incoming_view(), &mut cb);
        cb.finish()?;
        written
    };
    if written == 0 {
        return Ok(());
    }
    debug!("[{}] send {} bytes of http data", id, written);
    core.send_provided(id, written)?;
    core.flush_send_buffer(id)
}

/// Begin graceful shutdown, optionally telling the peer why with a GOAWAY code.
pub fn shutdown(core: &mut Core, id: SessionId, code: Option<u32>) -> Result<()> {
    let Some(proto) = core.protocols.get_mut(&id) else {
        return Ok(());
    };
    if let Some(code) = code {
        debug!("[{}] terminate with error {}", id, code);
        proto.engine.terminate_session(code);
    }
    if proto.shutdown.is_some() {
        debug!("[{}] shutdown in progress...", id);
        return pump(core, id);
    }
    debug!("[{}] shutdown http session", id);
    let handle = core.bus.register(Channel::SendBufferEmpty, move |core: &mut Core, event: &Event| {
        if event.session() == id {
            shutdown_flushed(core, id)
        } else {
            Ok(())
        }
    });
    proto.shutdown = Some(handle);

    pump(core, id)?;
    let idle = core.session(id).is_some_and(|s| s.send_buffer().is_empty());
    if idle {
        core.bus.broadcast(Event::SendBufferEmpty(id))?;
    }
    Ok(())
}

fn shutdown_flushed(core: &mut Core, id: SessionId) -> Result<()> {
    let pending_output = core.session(id).is_some_and(|s| !s.send_buffer().is_empty());
    let Some(proto) = core.protocols.get_mut(&id) else {
        return Ok(());
    };
    if pending_output || proto.engine.want_write() {
        return Ok(());
    }
    if let Some(handle) = proto.shutdown.take() {
        core.bus.unregister(Channel::SendBufferEmpty, handle)?;
    }
    core.delete_session(id)
}

/// Release protocol state after its session is gone.
fn release(core: &mut Core, id: SessionId) {
    let Some(mut proto) = core.protocols.remove(&id) else {
        return;
    };
    debug!("[{}] delete http session", id);
    core.timers.remove(proto.settings_timer);
    if let Some(handle) = proto.shutdown.take() {
        if core.bus.unregister(Channel::SendBufferEmpty, handle).is_err() {
            debug!("[{}] shutdown recipient already gone", id);
        }
    }
    proto.streams.clear(&mut core.timers);
}

/// A stream idled past its timeout: reset it and shut its connection down.
pub(crate) fn stream_timeout(core: &mut Core, id: SessionId, stream_id: u32, kind: TimerKind) -> Result<()> {
    let Some(proto) = core.protocols.get_mut(&id) else {
        return Ok(());
    };
    if !proto.streams.contains(stream_id) {
        return Ok(());
    }
    warn!("[{}] stream {} {:?} timeout", id, stream_id, kind);
    proto.engine.reset_stream(stream_id, error_code::INTERNAL_ERROR);
    shutdown(core, id, None)
}
