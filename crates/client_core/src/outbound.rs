use std::collections::VecDeque;

use shared::protocol::OutboundFrame;

use crate::error::SendError;

/// Validated frames waiting for an open connection, in enqueue order.
#[derive(Debug)]
pub struct OutboundQueue {
    pending: VecDeque<OutboundFrame>,
    capacity: usize,
}

impl OutboundQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            pending: VecDeque::new(),
            capacity,
        }
    }

    /// Never evicts: a full queue rejects the newcomer.
    pub fn push(&mut self, frame: OutboundFrame) -> Result<(), SendError> {
        if self.pending.len() >= self.capacity {
            return Err(SendError::QueueFull {
                capacity: self.capacity,
            });
        }
        self.pending.push_back(frame);
        Ok(())
    }

    pub fn drain(&mut self) -> Vec<OutboundFrame> {
        self.pending.drain(..).collect()
    }

    /// Returns how many frames were discarded.
    pub fn clear(&mut self) -> usize {
        let discarded = self.pending.len();
        self.pending.clear();
        discarded
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
