//! Table of requests the coordinator has received but not yet answered.

use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

use crate::protocol::{MethodClass, Request, RequestKey};

/// Work an in-flight request is blocked on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Subtask {
    ChainRpc,
    Confirmation,
    NetworkProbe,
}

/// Lifecycle of one request. `Responded` is not a stage: answering removes
/// the entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Received,
    Classified(MethodClass),
    Awaiting(Subtask),
}

#[derive(Debug, Clone)]
pub struct PendingEntry {
    pub request: Request,
    pub stage: Stage,
    pub received_at: Instant,
}

#[derive(Debug, Default)]
pub struct PendingTable {
    entries: HashMap<RequestKey, PendingEntry>,
}

impl PendingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a new request. Returns false, leaving the table untouched,
    /// when the key is already present.
    pub fn insert(&mut self, request: Request, now: Instant) -> bool {
        let key = request.key();
        if self.entries.contains_key(&key) {
            return false;
        }
        self.entries.insert(key, PendingEntry { request, stage: Stage::Received, received_at: now });
        true
    }

    /// Moves an entry to `stage`; false if it is gone (answered or swept).
    pub fn advance(&mut self, key: &RequestKey, stage: Stage) -> bool {
        match self.entries.get_mut(key) {
            Some(entry) => {
                entry.stage = stage;
                true
            }
            None => false,
        }
    }

    /// Removes the entry. Whoever gets `Some` owns the one response.
    pub fn take(&mut self, key: &RequestKey) -> Option<PendingEntry> {
        self.entries.remove(key)
    }

    pub fn stage(&self, key: &RequestKey) -> Option<Stage> {
        self.entries.get(key).map(|e| e.stage)
    }

    /// Removes and returns entries older than `ttl`.
    pub fn sweep(&mut self, now: Instant, ttl: Duration) -> Vec<PendingEntry> {
        let expired: Vec<RequestKey> = self
            .entries
            .iter()
            .filter(|(_, e)| now.saturating_duration_since(e.received_at) >= ttl)
            .map(|(k, _)| *k)
            .collect();
        expired.iter().filter_map(|k| self.entries.remove(k)).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
