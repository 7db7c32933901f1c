use std::collections::VecDeque;

use super::Envelope;

pub const DEFAULT_CAPACITY: usize = 30;

/// Most recent envelopes, oldest evicted first.
#[derive(Debug, Clone, PartialEq)]
pub struct EventLog {
    capacity: usize,
    events: VecDeque<Envelope>,
}

impl EventLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            events: VecDeque::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, envelope: Envelope) {
        if self.capacity == 0 {
            return;
        }
        while self.events.len() >= self.capacity {
            self.events.pop_front();
        }
        self.events.push_back(envelope);
    }

    pub fn iter(&self) -> impl Iterator<Item = &Envelope> {
        self.events.iter()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn latest(&self) -> Option<&Envelope> {
        self.events.back()
    }
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
