//! In-memory block cursor for log streams (no disk persistence).
//!
//! A new subscription starts at the chain tip observed when it was opened; history before
//! that is never replayed. Live delivery can stop partway through a block, so the cursor
//! remembers the last log index handed over in its last block.

/// Position of the last log handed to the subscriber.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Cursor {
    pub last_processed_block: u64,
    /// `Some(i)`: only logs up to index `i` of `last_processed_block` were delivered.
    /// `None`: the whole block was.
    last_log_index: Option<u64>,
}

impl Cursor {
    pub fn new(last_processed_block: u64) -> Self {
        Self {
            last_processed_block,
            last_log_index: None,
        }
    }

    /// First block that may still hold undelivered logs.
    pub fn next_block(&self) -> u64 {
        match self.last_log_index {
            Some(_) => self.last_processed_block,
            None => self.last_processed_block.saturating_add(1),
        }
    }

    /// Mark every log up to and including `block` as delivered; never moves backwards.
    pub fn advance_to(&mut self, block: u64) {
        if block >= self.last_processed_block {
            self.last_processed_block = block;
            self.last_log_index = None;
        }
    }

    /// Record a single delivered log.
    pub fn record_log(&mut self, block: u64, log_index: u64) {
        if block > self.last_processed_block {
            self.last_processed_block = block;
            self.last_log_index = Some(log_index);
        } else if block == self.last_processed_block {
            if let Some(seen) = self.last_log_index {
                self.last_log_index = Some(seen.max(log_index));
            }
        }
    }

    pub fn is_delivered(&self, block: u64, log_index: u64) -> bool {
        block < self.last_processed_block
            || (block == self.last_processed_block
                && self.last_log_index.map_or(true, |seen| log_index <= seen))
    }
}
