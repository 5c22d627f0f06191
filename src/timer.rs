//! Reactor-managed one-shot timers.
//!
//! A timer is created once with its timeout and then started, stopped and rearmed
//! (`again`) for as long as its owner lives. Owners must [`remove`](Timers::remove) their
//! timers before they go away.
//!
//! Every arming gets a sequence number. A firing pass only considers timers armed before
//! the pass began, so a callback that rearms a timer cannot make the pass spin.

use std::collections::BTreeSet;
use std::fmt;
use std::rc::Rc;
use std::time::{Duration, Instant};

use slab::Slab;

use crate::error::Result;

pub type TimerCallback<H> = Rc<dyn Fn(&mut H) -> Result<()>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerKey(usize);

struct Entry<H> {
    after: Duration,
    deadline: Option<(Instant, u64)>,
    callback: TimerCallback<H>,
}

pub struct Timers<H> {
    entries: Slab<Entry<H>>,
    armed: BTreeSet<(Instant, u64, usize)>,
    next_seq: u64,
}

impl<H> fmt::Debug for Timers<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Timers")
            .field("timers", &self.entries.len())
            .field("armed", &self.armed.len())
            .finish()
    }
}

impl<H> Default for Timers<H> {
    fn default() -> Self {
        Self {
            entries: Slab::new(),
            armed: BTreeSet::new(),
            next_seq: 0,
        }
    }
}

impl<H> Timers<H> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a stopped timer that fires `after` its start.
    pub fn insert<F>(&mut self, after: Duration, callback: F) -> TimerKey
    where
        F: Fn(&mut H) -> Result<()> + 'static,
    {
        TimerKey(self.entries.insert(Entry {
            after,
            deadline: None,
            callback: Rc::new(callback),
        }))
    }

    /// Arm a stopped timer. No-op if already armed.
    pub fn start(&mut self, key: TimerKey) {
        if !self.is_active(key) {
            self.arm(key);
        }
    }

    /// Rearm from now, whether armed or not.
    pub fn again(&mut self, key: TimerKey) {
        self.disarm(key);
        self.arm(key);
    }

    pub fn stop(&mut self, key: TimerKey) {
        self.disarm(key);
    }

    pub fn is_active(&self, key: TimerKey) -> bool {
        self.entries.get(key.0).is_some_and(|e| e.deadline.is_some())
    }

    pub fn remove(&mut self, key: TimerKey) {
        self.disarm(key);
        if self.entries.contains(key.0) {
            self.entries.remove(key.0);
        }
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.armed.first().map(|(deadline, _, _)| *deadline)
    }

    /// Sequence number the next arming will get. Pass it to [`pop_expired`](Self::pop_expired).
    pub fn epoch(&self) -> u64 {
        self.next_seq
    }

    /// Disarm and return the earliest timer due at `now` that was armed before `epoch`.
    pub fn pop_expired(&mut self, now: Instant, epoch: u64) -> Option<(TimerKey, TimerCallback<H>)> {
        let &(deadline, seq, key) = self
            .armed
            .iter()
            .take_while(|(deadline, _, _)| *deadline <= now)
            .find(|(_, seq, _)| *seq < epoch)?;
        self.armed.remove(&(deadline, seq, key));
        let entry = self.entries.get_mut(key)?;
        entry.deadline = None;
        Some((TimerKey(key), entry.callback.clone()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn arm(&mut self, key: TimerKey) {
        if let Some(entry) = self.entries.get_mut(key.0) {
            let deadline = Instant::now() + entry.after;
            let seq = self.next_seq;
            self.next_seq += 1;
            entry.deadline = Some((deadline, seq));
            self.armed.insert((deadline, seq, key.0));
        }
    }

    fn disarm(&mut self, key: TimerKey) {
        if let Some(entry) = self.entries.get_mut(key.0) {
            if let Some((deadline, seq)) = entry.deadline.take() {
                self.armed.remove(&(deadline, seq, key.0));
            }
        }
    }
}
