//! Messages held while the client is not connected.

use std::collections::VecDeque;

/// FIFO of encoded frames with a hard bound. When full, the oldest entry
/// is dropped to make room.
#[derive(Debug, Clone)]
pub struct PendingQueue {
    items: VecDeque<String>,
    max: usize,
    dropped: u64,
}

impl PendingQueue {
    /// Empty queue holding at most `max` entries.
    pub fn new(max: usize) -> Self {
        Self {
            items: VecDeque::with_capacity(max.min(1024)),
            max,
            dropped: 0,
        }
    }

    /// Append an entry. Returns the entry evicted to make room, if any.
    /// With a bound of zero the new entry itself is returned.
    pub fn push(&mut self, item: String) -> Option<String> {
        if self.max == 0 {
            self.dropped += 1;
            return Some(item);
        }
        let evicted = if self.items.len() >= self.max {
            self.dropped += 1;
            self.items.pop_front()
        } else {
            None
        };
        self.items.push_back(item);
        evicted
    }

    /// Remove every entry in insertion order.
    pub fn drain(&mut self) -> impl Iterator<Item = String> + '_ {
        self.items.drain(..)
    }

    /// Put an entry back at the head, used when a flush is interrupted.
    pub fn push_front(&mut self, item: String) {
        if self.max == 0 {
            return;
        }
        if self.items.len() >= self.max {
            let _ = self.items.pop_back();
            self.dropped += 1;
        }
        self.items.push_front(item);
    }

    /// Entries waiting.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether nothing is waiting.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Entries discarded over the queue's lifetime.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}
