//! The Signal Emitter: fan-out of cache transitions to upstream
//! subscribers. Delivery is synchronous, on the engine's own call stack,
//! immediately after the corresponding cache mutation.

use crate::object::Link;

/// A single observed cache transition.
#[derive(Debug, Clone)]
pub enum Signal {
    LinkAdded(Link),
    LinkChanged(Link),
    LinkRemoved(Link),
}

/// A subscriber callback. Subscribers must not issue mutating commands from
/// within the callback — the engine does not detect a reentrancy
/// violation, it is caller error.
pub type Subscriber = Box<dyn FnMut(&Signal) + Send>;

#[derive(Default)]
pub struct SignalEmitter {
    subscribers: Vec<Subscriber>,
}

impl SignalEmitter {
    pub fn new() -> Self {
        Self { subscribers: Vec::new() }
    }

    /// Registers a subscriber. Every subscriber receives every signal, in
    /// the order it was emitted.
    pub fn subscribe(&mut self, callback: impl FnMut(&Signal) + Send + 'static) {
        self.subscribers.push(Box::new(callback));
    }

    pub fn emit(&mut self, signal: Signal) {
        for subscriber in &mut self.subscribers {
            subscriber(&signal);
        }
    }
}
