//! Deferred publish/subscribe dispatcher.
//!
//! Producers never call recipients: [`Bus::broadcast`] and [`Bus::anycast`] only enqueue.
//! The reactor later runs [`dispatch`] against the host that owns the bus, handing each
//! recipient `&mut` access to the host. A dispatch pass delivers exactly the messages that
//! were queued when the pass started; anything published during the pass waits for the next
//! one.

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::hash::Hash;
use std::rc::Rc;

use log::trace;
use slab::Slab;
use thiserror::Error;

use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BusError {
    #[error("bus queue is full ({0} messages pending)")]
    QueueFull(usize),
    #[error("recipient is not registered on this channel")]
    NotRegistered,
}

/// A bus payload. Each message knows which channel it travels on.
pub trait Message {
    type Channel: Copy + Eq + Hash + fmt::Debug;

    fn channel(&self) -> Self::Channel;
}

/// Anything that owns a bus and can be handed to that bus's recipients.
pub trait BusHost<M: Message>: Sized {
    fn bus(&mut self) -> &mut Bus<Self, M>;
}

type Callback<H, M> = Rc<RefCell<dyn FnMut(&mut H, &M) -> Result<()>>>;

/// Identifies one registration. Generations make stale handles harmless after slab reuse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RecipientHandle {
    key: usize,
    generation: u64,
}

struct Recipient<H, M> {
    generation: u64,
    callback: Callback<H, M>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Delivery {
    Broadcast,
    Anycast,
}

struct Envelope<M> {
    seq: u64,
    delivery: Delivery,
    message: M,
}

pub struct Bus<H, M: Message> {
    recipients: Slab<Recipient<H, M>>,
    /// Registration order per channel.
    channels: HashMap<M::Channel, Vec<RecipientHandle>>,
    queue: VecDeque<Envelope<M>>,
    capacity: usize,
    next_seq: u64,
    next_generation: u64,
}

impl<H, M: Message> fmt::Debug for Bus<H, M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bus")
            .field("recipients", &self.recipients.len())
            .field("pending", &self.queue.len())
            .field("capacity", &self.capacity)
            .finish()
    }
}

impl<H, M: Message> Bus<H, M> {
    pub fn new(capacity: usize) -> Self {
        Self {
            recipients: Slab::new(),
            channels: HashMap::new(),
            queue: VecDeque::new(),
            capacity,
            next_seq: 0,
            next_generation: 0,
        }
    }

    /// Append a recipient to `channel`. Recipients are called in registration order.
    pub fn register<F>(&mut self, channel: M::Channel, callback: F) -> RecipientHandle
    where
        F: FnMut(&mut H, &M) -> Result<()> + 'static,
    {
        let generation = self.next_generation;
        self.next_generation += 1;
        let key = self.recipients.insert(Recipient {
            generation,
            callback: Rc::new(RefCell::new(callback)),
        });
        let handle = RecipientHandle { key, generation };
        self.channels.entry(channel).or_default().push(handle);
        trace!("bus: register {:?} on {:?}", handle, channel);
        handle
    }

    pub fn unregister(&mut self, channel: M::Channel, handle: RecipientHandle) -> Result<(), BusError> {
        let list = self.channels.get_mut(&channel).ok_or(BusError::NotRegistered)?;
        let pos = list.iter().position(|h| *h == handle).ok_or(BusError::NotRegistered)?;
        list.remove(pos);
        if list.is_empty() {
            self.channels.remove(&channel);
        }
        self.recipients.remove(handle.key);
        trace!("bus: unregister {:?} from {:?}", handle, channel);
        Ok(())
    }

    pub fn is_registered(&self, handle: RecipientHandle) -> bool {
        self.recipients
            .get(handle.key)
            .is_some_and(|r| r.generation == handle.generation)
    }

    /// Queue `message` for every recipient of its channel.
    pub fn broadcast(&mut self, message: M) -> Result<(), BusError> {
        self.enqueue(Delivery::Broadcast, message)
    }

    /// Queue `message` for the first recipient of its channel only.
    pub fn anycast(&mut self, message: M) -> Result<(), BusError> {
        self.enqueue(Delivery::Anycast, message)
    }

    fn enqueue(&mut self, delivery: Delivery, message: M) -> Result<(), BusError> {
        if self.queue.len() >= self.capacity {
            return Err(BusError::QueueFull(self.queue.len()));
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        self.queue.push_back(Envelope { seq, delivery, message });
        Ok(())
    }

    /// Drop every undelivered message matching `predicate`. Returns how many were dropped.
    pub fn cancel_messages<P>(&mut self, mut predicate: P) -> usize
    where
        P: FnMut(&M) -> bool,
    {
        let before = self.queue.len();
        self.queue.retain(|envelope| !predicate(&envelope.message));
        before - self.queue.len()
    }

    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    fn targets(&self, channel: M::Channel, delivery: Delivery) -> Vec<(RecipientHandle, Callback<H, M>)> {
        let Some(handles) = self.channels.get(&channel) else {
            return Vec::new();
        };
        let take = match delivery {
            Delivery::Broadcast => handles.len(),
            Delivery::Anycast => 1,
        };
        handles
            .iter()
            .take(take)
            .filter_map(|h| self.recipients.get(h.key).map(|r| (*h, r.callback.clone())))
            .collect()
    }
}

/// Run one dispatch pass over `host`'s bus. Returns the number of messages delivered.
///
/// Recipients unregistered earlier in the pass are skipped, so a recipient removed while a
/// message is in flight is never invoked afterwards. An error from a recipient stops the
/// pass; messages not yet delivered stay queued.
pub fn dispatch<H, M>(host: &mut H) -> Result<usize>
where
    H: BusHost<M>,
    M: Message,
{
    let end = host.bus().next_seq;
    let mut delivered = 0;

    loop {
        let envelope = {
            let bus = host.bus();
            match bus.queue.front() {
                Some(front) if front.seq < end => bus.queue.pop_front(),
                _ => None,
            }
        };
        let Some(envelope) = envelope else {
            break;
        };

        let channel = envelope.message.channel();
        let targets = host.bus().targets(channel, envelope.delivery);
        trace!("bus: deliver {:?} to {} recipient(s)", channel, targets.len());
        for (handle, callback) in targets {
            if !host.bus().is_registered(handle) {
                continue;
            }
            let mut recipient = callback
                .try_borrow_mut()
                .map_err(|_| Error::invariant(format!("bus recipient on {:?} re-entered", channel)))?;
            (&mut *recipient)(host, &envelope.message)?;
        }
        delivered += 1;
    }

    Ok(delivered)
}
