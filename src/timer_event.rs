//! Named events with pending handlers that may carry a deadline.
//!
//! Handlers never call back into their owner. They report what happened by
//! returning [`Handled`], and expired deadlines hand back the `on_expire`
//! value given at registration. The owner decides what those outputs mean,
//! which keeps every mutation on the caller's side of the borrow.

use crate::keyed_queue::KeyedQueue;
use std::collections::BTreeMap;
use std::fmt;

pub type HandlerId = u64;

/// What a handler wants done after seeing an event value.
#[derive(Debug, Clone, PartialEq)]
pub enum Handled<O> {
    /// Not the value it was waiting for; stay registered.
    Keep,
    /// Report `O` and stay registered.
    Emit(O),
    /// Finished; remove the handler and disarm its deadline.
    Done,
    /// Finished with a result.
    DoneWith(O),
}

#[derive(Debug, Clone)]
pub struct Timeout<O> {
    pub duration_ms: u64,
    pub on_expire: O,
}

impl<O> Timeout<O> {
    pub fn new(duration_ms: u64, on_expire: O) -> Self {
        Self { duration_ms, on_expire }
    }
}

type HandlerFn<V, O> = Box<dyn FnMut(&V) -> Handled<O> + Send>;

struct Listener<V, O> {
    id: HandlerId,
    handler: HandlerFn<V, O>,
    expiry: Option<(u64, O)>,
}

pub struct TimerEventRegistry<V, O> {
    listeners: KeyedQueue<String, Listener<V, O>>,
    events_by_id: BTreeMap<HandlerId, String>,
    next_id: HandlerId,
}

impl<V, O> TimerEventRegistry<V, O> {
    pub fn new() -> Self {
        Self {
            listeners: KeyedQueue::new(),
            events_by_id: BTreeMap::new(),
            next_id: 0,
        }
    }

    /// Register `handler` under `event`. With a timeout, the handler is
    /// removed and `on_expire` returned from [`expire`](Self::expire) once
    /// `now + duration_ms` passes without the handler finishing.
    pub fn add_handler<F>(&mut self, event: &str, handler: F, timeout: Option<Timeout<O>>, now: u64) -> HandlerId
    where
        F: FnMut(&V) -> Handled<O> + Send + 'static,
    {
        self.next_id = self.next_id.wrapping_add(1);
        let id = self.next_id;

        let listener = Listener {
            id,
            handler: Box::new(handler),
            expiry: timeout.map(|t| (now.saturating_add(t.duration_ms), t.on_expire)),
        };
        self.listeners.push(event.to_string(), listener);
        self.events_by_id.insert(id, event.to_string());
        id
    }

    /// Run every handler registered under `event` with `value`.
    pub fn fire(&mut self, event: &str, value: &V) -> Vec<O> {
        let mut outputs = Vec::new();
        let mut finished = Vec::new();

        self.listeners.retain(&event.to_string(), |listener| {
            match (listener.handler)(value) {
                Handled::Keep => true,
                Handled::Emit(output) => {
                    outputs.push(output);
                    true
                }
                Handled::Done => {
                    finished.push(listener.id);
                    false
                }
                Handled::DoneWith(output) => {
                    outputs.push(output);
                    finished.push(listener.id);
                    false
                }
            }
        });

        for id in finished {
            self.events_by_id.remove(&id);
        }
        outputs
    }

    pub fn fire_all<'a, I>(&mut self, events: I) -> Vec<O>
    where
        I: IntoIterator<Item = (&'a str, &'a V)>,
        V: 'a,
    {
        events
            .into_iter()
            .flat_map(|(event, value)| self.fire(event, value))
            .collect()
    }

    /// Drop a handler without producing anything. Returns false when it
    /// already fired, expired or was removed.
    pub fn remove_handler(&mut self, id: HandlerId) -> bool {
        let Some(event) = self.events_by_id.remove(&id) else {
            return false;
        };
        self.listeners.remove_first(&event, |listener| listener.id == id).is_some()
    }

    /// Remove every handler whose deadline is at or before `now`, returning
    /// their `on_expire` values in deadline order.
    pub fn expire(&mut self, now: u64) -> Vec<O> {
        let events: Vec<String> = self.listeners.keys().cloned().collect();
        let mut expired = Vec::new();

        for event in events {
            let removed = self.listeners.remove_all(&event, |listener| {
                matches!(listener.expiry, Some((deadline, _)) if deadline <= now)
            });
            for listener in removed {
                self.events_by_id.remove(&listener.id);
                if let Some((deadline, output)) = listener.expiry {
                    expired.push((deadline, listener.id, output));
                }
            }
        }

        expired.sort_by_key(|(deadline, id, _)| (*deadline, *id));
        expired.into_iter().map(|(_, _, output)| output).collect()
    }

    pub fn next_deadline(&self) -> Option<u64> {
        self.listeners
            .iter()
            .filter_map(|(_, listener)| listener.expiry.as_ref().map(|(deadline, _)| *deadline))
            .min()
    }

    pub fn is_registered(&self, id: HandlerId) -> bool {
        self.events_by_id.contains_key(&id)
    }

    pub fn handler_count(&self, event: &str) -> usize {
        self.listeners.size(&event.to_string())
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    /// Cancel every handler and deadline.
    pub fn clear(&mut self) -> usize {
        let cleared = self.listeners.len();
        self.listeners.clear();
        self.events_by_id.clear();
        cleared
    }
}

impl<V, O> Default for TimerEventRegistry<V, O> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V, O> fmt::Debug for TimerEventRegistry<V, O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimerEventRegistry")
            .field("handlers", &self.listeners.len())
            .field("next_deadline", &self.next_deadline())
            .finish()
    }
}
