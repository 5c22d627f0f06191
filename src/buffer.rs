//! Fixed-capacity byte staging area with independent write and read cursors.
//!
//! Bytes enter at the `incoming` cursor and leave at the `outgoing` cursor:
//!
//! ```text
//! 0          outgoing          incoming          capacity
//! |  consumed  |   used space    |   free region   |
//! ```
//!
//! Both regions are exposed as slices so the codec and socket syscalls work on the
//! backing storage directly. Once the buffer is drained both cursors snap back to 0.

use std::io::{self, Read, Write};

/// Outcome of a non-blocking transfer between a buffer and a socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transfer {
    /// `n` bytes were moved. `n` is 0 only when the buffer had no room (fill) or nothing
    /// queued (drain), in which case the socket is not touched.
    Bytes(usize),
    /// The socket is not ready; nothing was moved.
    WouldBlock,
    /// The peer closed its side: a read returned 0 or a write accepted nothing.
    Closed,
}

#[derive(Debug)]
pub struct Buffer {
    data: Box<[u8]>,
    incoming: usize,
    outgoing: usize,
}

impl Buffer {
    pub fn allocate(capacity: usize) -> Self {
        Self {
            data: vec![0u8; capacity].into_boxed_slice(),
            incoming: 0,
            outgoing: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    pub fn used_space(&self) -> usize {
        self.incoming - self.outgoing
    }

    /// Room left in the incoming region.
    pub fn free_space(&self) -> usize {
        self.data.len() - self.incoming
    }

    pub fn is_full(&self) -> bool {
        self.incoming == self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outgoing == self.incoming
    }

    /// Read from `socket` into the free region. Interrupted reads are retried.
    pub fn fill_from_socket<R: Read + ?Sized>(&mut self, socket: &mut R) -> io::Result<Transfer> {
        if self.is_full() {
            return Ok(Transfer::Bytes(0));
        }
        loop {
            match socket.read(&mut self.data[self.incoming..]) {
                Ok(0) => return Ok(Transfer::Closed),
                Ok(n) => {
                    self.incoming += n;
                    return Ok(Transfer::Bytes(n));
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(Transfer::WouldBlock),
                Err(e) => return Err(e),
            }
        }
    }

    /// Write the used region to `socket`. Interrupted writes are retried.
    pub fn drain_to_socket<W: Write + ?Sized>(&mut self, socket: &mut W) -> io::Result<Transfer> {
        if self.is_empty() {
            return Ok(Transfer::Bytes(0));
        }
        loop {
            match socket.write(&self.data[self.outgoing..self.incoming]) {
                Ok(0) => return Ok(Transfer::Closed),
                Ok(n) => {
                    self.outgoing_consumed(n);
                    return Ok(Transfer::Bytes(n));
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(Transfer::WouldBlock),
                Err(e) => return Err(e),
            }
        }
    }

    /// Copy as much of `src` as fits. Returns the number of bytes copied.
    pub fn fill_from_memory(&mut self, src: &[u8]) -> usize {
        let n = src.len().min(self.free_space());
        self.data[self.incoming..self.incoming + n].copy_from_slice(&src[..n]);
        self.incoming += n;
        n
    }

    /// Copy up to `dst.len()` used bytes out. Returns the number of bytes copied.
    pub fn drain_to_memory(&mut self, dst: &mut [u8]) -> usize {
        let n = dst.len().min(self.used_space());
        dst[..n].copy_from_slice(&self.data[self.outgoing..self.outgoing + n]);
        self.outgoing_consumed(n);
        n
    }

    /// Writable free region. Follow with [`incoming_provided`](Self::incoming_provided).
    pub fn incoming_view(&mut self) -> &mut [u8] {
        &mut self.data[self.incoming..]
    }

    pub fn incoming_provided(&mut self, n: usize) {
        assert!(n <= self.free_space(), "provided {} bytes beyond free space {}", n, self.free_space());
        self.incoming += n;
    }

    /// Readable used region. Follow with [`outgoing_consumed`](Self::outgoing_consumed).
    pub fn outgoing_view(&self) -> &[u8] {
        &self.data[self.outgoing..self.incoming]
    }

    pub fn outgoing_consumed(&mut self, n: usize) {
        assert!(n <= self.used_space(), "consumed {} bytes beyond used space {}", n, self.used_space());
        self.outgoing += n;
        if self.outgoing == self.incoming {
            self.outgoing = 0;
            self.incoming = 0;
        }
    }

    #[cfg(test)]
    pub(crate) fn cursors(&self) -> (usize, usize) {
        (self.outgoing, self.incoming)
    }
}
