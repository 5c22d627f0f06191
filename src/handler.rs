//! Application handlers.
//!
//! Handlers are plain bus recipients. [`install_http2`] answers every finished request
//! stream with an empty `200`; [`install_echo`] bypasses HTTP/2 entirely and writes back
//! whatever a connection sends.

use log::debug;

use crate::channels::{Channel, Event, SessionId};
use crate::codec::H2Header;
use crate::error::Result;
use crate::protocol;
use crate::reactor::Core;

/// Respond to [`Event::StreamReady`] with `:status: 200` and no body.
pub fn install_http2(core: &mut Core) {
    core.bus_mut().register(Channel::StreamReady, |core: &mut Core, event: &Event| {
        match *event {
            Event::StreamReady { session, stream_id } => respond(core, session, stream_id),
            _ => Ok(()),
        }
    });
}

fn respond(core: &mut Core, id: SessionId, stream_id: u32) -> Result<()> {
    let Some(proto) = core.protocol_mut(id) else {
        return Ok(());
    };
    let headers = [H2Header::new(":status", "200")];
    if let Err(e) = proto.submit_response(stream_id, &headers, None) {
        debug!("[{}] cannot respond on stream {}: {}", id, stream_id, e);
        return Ok(());
    }
    debug!("[{}] respond 200 on stream {}", id, stream_id);
    // Bytes are ready now; pump flushes without waiting for write readiness.
    protocol::pump(core, id)
}

/// Echo received bytes back to the sender.
pub fn install_echo(core: &mut Core) {
    core.bus_mut().register(Channel::DataReceived, |core: &mut Core, event: &Event| {
        echo(core, event.session())
    });
    core.bus_mut().register(Channel::SendBufferEmpty, |core: &mut Core, event: &Event| {
        echo(core, event.session())
    });
}

fn echo(core: &mut Core, id: SessionId) -> Result<()> {
    let Some(session) = core.session(id) else {
        return Ok(());
    };
    let n = session
        .recv_buffer()
        .used_space()
        .min(session.send_buffer().free_space());
    if n == 0 {
        return Ok(());
    }
    let mut chunk = vec![0u8; n];
    let read = core.session_recv(id, &mut chunk)?;
    let queued = core.session_send(id, &chunk[..read])?;
    debug!("[{}] echo {} bytes", id, queued);
    core.flush_send_buffer(id)
}
