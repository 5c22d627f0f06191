//! Scripted in-memory socket and helpers shared by the reactor tests

use std::cell::RefCell;
use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::rc::Rc;

use mio::event::Source;
use mio::{Interest, Poll, Registry, Token};

use h2_reactor::codec::frame::FrameParser;
use h2_reactor::codec::FrameKind;
use h2_reactor::{Channel, Config, Core, Event};

#[derive(Debug)]
pub struct MockState {
    pub input: VecDeque<u8>,
    /// Reads return 0 once `input` is drained.
    pub eof: bool,
    pub output: Vec<u8>,
    /// Bytes the socket accepts before writes would block.
    pub write_budget: usize,
    pub interest: Option<Interest>,
}

/// A non-blocking socket whose behaviour is driven from the test through a shared handle.
#[derive(Debug, Clone)]
pub struct MockSocket {
    pub state: Rc<RefCell<MockState>>,
}

impl MockSocket {
    pub fn new() -> Self {
        Self {
            state: Rc::new(RefCell::new(MockState {
                input: VecDeque::new(),
                eof: false,
                output: Vec::new(),
                write_budget: usize::MAX,
                interest: None,
            })),
        }
    }

    pub fn push_input(&self, bytes: &[u8]) {
        self.state.borrow_mut().input.extend(bytes.iter().copied());
    }

    pub fn close_input(&self) {
        self.state.borrow_mut().eof = true;
    }

    pub fn set_write_budget(&self, budget: usize) {
        self.state.borrow_mut().write_budget = budget;
    }

    pub fn take_output(&self) -> Vec<u8> {
        std::mem::take(&mut self.state.borrow_mut().output)
    }

    pub fn output_len(&self) -> usize {
        self.state.borrow().output.len()
    }

    pub fn interest(&self) -> Option<Interest> {
        self.state.borrow().interest
    }
}

impl Read for MockSocket {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut state = self.state.borrow_mut();
        if state.input.is_empty() {
            return if state.eof {
                Ok(0)
            } else {
                Err(io::ErrorKind::WouldBlock.into())
            };
        }
        let n = buf.len().min(state.input.len());
        for (slot, byte) in buf.iter_mut().zip(state.input.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }
}

impl Write for MockSocket {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut state = self.state.borrow_mut();
        if state.write_budget == 0 {
            return Err(io::ErrorKind::WouldBlock.into());
        }
        let n = buf.len().min(state.write_budget);
        state.write_budget -= n;
        state.output.extend_from_slice(&buf[..n]);
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Source for MockSocket {
    fn register(&mut self, _registry: &Registry, _token: Token, interests: Interest) -> io::Result<()> {
        self.state.borrow_mut().interest = Some(interests);
        Ok(())
    }

    fn reregister(&mut self, _registry: &Registry, _token: Token, interests: Interest) -> io::Result<()> {
        self.state.borrow_mut().interest = Some(interests);
        Ok(())
    }

    fn deregister(&mut self, _registry: &Registry) -> io::Result<()> {
        self.state.borrow_mut().interest = None;
        Ok(())
    }
}

/// A `Core` detached from any running loop. The `Poll` must outlive it.
pub fn core_with(config: Config) -> (Poll, Core) {
    let poll = Poll::new().unwrap();
    let registry = poll.registry().try_clone().unwrap();
    (poll, Core::new(registry, config))
}

/// Record every message delivered on `channels`.
pub fn record(core: &mut Core, channels: &[Channel]) -> Rc<RefCell<Vec<Event>>> {
    let seen = Rc::new(RefCell::new(Vec::new()));
    for &channel in channels {
        let seen = Rc::clone(&seen);
        core.bus_mut().register(channel, move |_: &mut Core, event: &Event| {
            seen.borrow_mut().push(*event);
            Ok(())
        });
    }
    seen
}

pub fn parse_frames(bytes: &[u8]) -> Vec<(u32, FrameKind)> {
    FrameParser::new()
        .feed(bytes)
        .unwrap()
        .into_iter()
        .map(|f| (f.header.stream_id, f.kind))
        .collect()
}
