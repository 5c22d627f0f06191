//! Listening socket.

use std::io;
use std::net::SocketAddr;

use log::{error, info};
use mio::net::TcpListener;
use mio::{Interest, Registry, Token};

use crate::error::Result;
use crate::reactor::Core;

#[derive(Debug)]
pub struct Server {
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl Server {
    pub fn listen(registry: &Registry, addr: SocketAddr, token: Token) -> Result<Self> {
        let mut listener = TcpListener::bind(addr)?;
        registry.register(&mut listener, token, Interest::READABLE)?;
        let local_addr = listener.local_addr()?;
        info!("listening on {}", local_addr);
        Ok(Self { listener, local_addr })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Accept every pending connection. Readiness is edge-triggered, so this runs until the
    /// listener would block. Accept failures are logged and leave the server listening.
    pub fn accept(&mut self, core: &mut Core) -> Result<()> {
        loop {
            let (stream, peer) = match self.listener.accept() {
                Ok(accepted) => accepted,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    error!("accept: {}", e);
                    return Ok(());
                }
            };
            if let Err(e) = stream.set_nodelay(true) {
                error!("set_nodelay for {}: {}", peer, e);
            }
            match core.add_session(Box::new(stream), peer.to_string()) {
                Ok(id) => info!("[{}] accept connection {}", id, peer),
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => error!("add session for {}: {}", peer, e),
            }
        }
    }
}
