//! FIFO queue of pending triggers for one job.
//!
//! Tracks the log ids currently queued so the same trigger cannot be
//! enqueued twice. A log id leaves the dedup set when its trigger is popped,
//! so a trigger that is already running can be queued again.

use std::collections::{HashSet, VecDeque};

use crate::types::{LogId, TriggerRequest};

#[derive(Debug, Default)]
pub struct TriggerQueue {
    items: VecDeque<TriggerRequest>,
    /// Log ids currently in `items`.
    queued_ids: HashSet<LogId>,
}

impl TriggerQueue {
    pub fn new() -> Self {
        TriggerQueue::default()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn contains(&self, log_id: LogId) -> bool {
        self.queued_ids.contains(&log_id)
    }

    /// Appends a trigger.
    ///
    /// Returns `false` without enqueueing if a trigger with the same log id
    /// is already queued.
    pub fn push(&mut self, trigger: TriggerRequest) -> bool {
        if !self.queued_ids.insert(trigger.log_id) {
            return false;
        }
        self.items.push_back(trigger);
        true
    }

    pub fn pop(&mut self) -> Option<TriggerRequest> {
        let trigger = self.items.pop_front()?;
        self.queued_ids.remove(&trigger.log_id);
        Some(trigger)
    }

    /// Removes every queued trigger, oldest first.
    pub fn drain(&mut self) -> Vec<TriggerRequest> {
        self.queued_ids.clear();
        self.items.drain(..).collect()
    }
}
