//! Inbound frame queue.
//!
//! Frames are pushed as they arrive from the socket and drained on the
//! session's drain tick. Deduplication happens at dequeue, so the window only
//! ever holds keys of frames that were actually delivered.

use std::collections::VecDeque;

use murmur_proto::InboundFrame;

use crate::dedup::ProcessedMessageWindow;

pub struct InboundQueue {
    pending: VecDeque<InboundFrame>,
    window: ProcessedMessageWindow,
    duplicates_dropped: u64,
}

impl InboundQueue {
    pub fn new(dedup_capacity: usize) -> Self {
        Self {
            pending: VecDeque::new(),
            window: ProcessedMessageWindow::new(dedup_capacity),
            duplicates_dropped: 0,
        }
    }

    pub fn push(&mut self, frame: InboundFrame) {
        self.pending.push_back(frame);
    }

    /// Take every queued frame in arrival order, minus duplicates.
    pub fn drain(&mut self) -> Vec<InboundFrame> {
        let mut accepted = Vec::with_capacity(self.pending.len());
        while let Some(frame) = self.pending.pop_front() {
            if let Some(key) = frame.dedup_key() {
                if !self.window.insert(key) {
                    log::debug!("Dropping duplicate {} frame", frame.kind());
                    self.duplicates_dropped += 1;
                    continue;
                }
            }
            accepted.push(frame);
        }
        accepted
    }

    /// Drop queued frames and forget every processed key.
    pub fn clear(&mut self) {
        self.pending.clear();
        self.window.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn duplicates_dropped(&self) -> u64 {
        self.duplicates_dropped
    }
}
