//! Per PLCI inbound message queue
//!
//! Messages an application sends while its PLCI is busy wait here. The queue keeps the
//! accounting of a fixed size byte ring: every entry takes its message length plus
//! [MSG_IN_OVERHEAD], rounded up to 4 bytes. When the tail of the ring cannot take an
//! entry it wraps to the start, provided the start is free.

use std::collections::VecDeque;

use crate::{
    CapiError, CapiResult,
    config::{MSG_IN_OVERHEAD, MSG_IN_QUEUE_SIZE},
    message::{CapiMessage, HEADER_LEN},
};

/// A queued message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedMsg {
    /// Sending application
    pub appl: u16,
    /// The message
    pub msg: CapiMessage,
    offset: usize,
    size: usize,
}

/// Ring accounted FIFO of application messages
#[derive(Debug, Clone)]
pub struct MsgInQueue {
    entries: VecDeque<QueuedMsg>,
    read: usize,
    write: usize,
    wrap: usize,
    capacity: usize,
}

impl Default for MsgInQueue {
    fn default() -> Self {
        Self::with_capacity(MSG_IN_QUEUE_SIZE)
    }
}

// sized from what the message holds, whatever its header claims
fn entry_size(msg: &CapiMessage) -> usize {
    let len = (msg.header.length as usize).max(HEADER_LEN + msg.params.len());
    (len + MSG_IN_OVERHEAD + 3) & !3
}

impl MsgInQueue {
    /// Queue with a ring of `capacity` bytes
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            read: 0,
            write: 0,
            wrap: capacity,
            capacity,
        }
    }

    /// True if nothing is queued
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of queued messages
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Ring positions `(read, write, wrap)`
    pub fn positions(&self) -> (usize, usize, usize) {
        (self.read, self.write, self.wrap)
    }

    /// Queued messages, oldest first
    pub fn iter(&self) -> impl Iterator<Item = &QueuedMsg> {
        self.entries.iter()
    }

    /// Appends a message, or fails with [CapiError::QueueFull]
    pub fn push(&mut self, appl: u16, msg: CapiMessage) -> CapiResult<()> {
        let n = entry_size(&msg);
        let offset = if self.write >= self.read {
            if self.capacity - self.write >= n {
                self.write
            } else if self.read > n {
                self.wrap = self.write;
                0
            } else {
                return Err(CapiError::QueueFull);
            }
        } else if self.read - self.write > n {
            self.write
        } else {
            return Err(CapiError::QueueFull);
        };
        self.write = offset + n;
        self.entries.push_back(QueuedMsg {
            appl,
            msg,
            offset,
            size: n,
        });
        Ok(())
    }

    /// Removes the oldest message
    pub fn pop(&mut self) -> Option<QueuedMsg> {
        let e = self.entries.pop_front()?;
        self.read = e.offset + e.size;
        if self.entries.is_empty() {
            self.reset_positions();
        } else if self.read == self.wrap {
            self.read = 0;
            self.wrap = self.capacity;
        }
        Some(e)
    }

    /// Drops everything, returning what was queued
    pub fn clear(&mut self) -> Vec<QueuedMsg> {
        self.reset_positions();
        self.entries.drain(..).collect()
    }

    fn reset_positions(&mut self) {
        self.read = 0;
        self.write = 0;
        self.wrap = self.capacity;
    }
}
