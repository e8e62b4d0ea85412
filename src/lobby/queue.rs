//! Matchmaking Queue
//!
//! FIFO, duplicate-free waiting list. Arrival order is the only fairness rule.

use std::collections::{BTreeSet, VecDeque};

use crate::core::ids::ConnectionId;

/// Queue errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum QueueError {
    /// Connection is already waiting.
    #[error("already queued")]
    AlreadyQueued,
}

/// The waiting list.
#[derive(Debug, Default)]
pub struct MatchQueue {
    order: VecDeque<ConnectionId>,
    members: BTreeSet<ConnectionId>,
}

impl MatchQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a connection to the back.
    pub fn enqueue(&mut self, connection_id: ConnectionId) -> Result<(), QueueError> {
        if !self.members.insert(connection_id) {
            return Err(QueueError::AlreadyQueued);
        }
        self.order.push_back(connection_id);
        Ok(())
    }

    /// Remove exactly `n` entries from the front, or nothing if fewer wait.
    pub fn dequeue_batch(&mut self, n: usize) -> Vec<ConnectionId> {
        if n == 0 || self.order.len() < n {
            return Vec::new();
        }
        let batch: Vec<ConnectionId> = self.order.drain(..n).collect();
        for id in &batch {
            self.members.remove(id);
        }
        batch
    }

    /// Put entries back at the front, keeping their relative order.
    ///
    /// Entries already present elsewhere in the queue are skipped.
    pub fn requeue_front(&mut self, batch: Vec<ConnectionId>) {
        for id in batch.into_iter().rev() {
            if self.members.insert(id) {
                self.order.push_front(id);
            }
        }
    }

    /// Remove a connection. No-op if absent.
    pub fn remove(&mut self, connection_id: &ConnectionId) -> bool {
        if !self.members.remove(connection_id) {
            return false;
        }
        self.order.retain(|id| id != connection_id);
        true
    }

    /// Whether a connection is waiting.
    pub fn contains(&self, connection_id: &ConnectionId) -> bool {
        self.members.contains(connection_id)
    }

    /// Waiting count.
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// True when nobody waits.
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Waiting connections, front first.
    pub fn iter(&self) -> impl Iterator<Item = &ConnectionId> {
        self.order.iter()
    }
}
