//! Confirmations waiting for a user decision.
//!
//! Exactly one confirmation is presented at a time. It lives in its durable
//! slot (`pendingAuth` or `pendingSignature`) where the confirmation UI finds
//! it; the rest wait in memory in arrival order.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tracing::debug;

use crate::core::errors::BridgeError;
use crate::protocol::{Request, RequestKey, TabId};
use crate::storage::{keys, StoreHandle};

/// Persisted `pendingAuth` record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingAuthorization {
    pub request_id: RequestKey,
    pub origin: String,
    pub origin_tab: Option<TabId>,
    pub created_at: DateTime<Utc>,
}

/// Persisted `pendingSignature` record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingSignature {
    pub request_id: RequestKey,
    pub request: Request,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Confirmation {
    Authorization(PendingAuthorization),
    Signature(PendingSignature),
}

impl Confirmation {
    pub fn authorization(request: &Request) -> Self {
        Confirmation::Authorization(PendingAuthorization {
            request_id: request.key(),
            origin: request.origin.origin.clone(),
            origin_tab: request.origin.tab_id,
            created_at: request.created_at,
        })
    }

    pub fn signature(request: &Request) -> Self {
        Confirmation::Signature(PendingSignature {
            request_id: request.key(),
            request: request.clone(),
            created_at: request.created_at,
        })
    }

    pub fn key(&self) -> RequestKey {
        match self {
            Confirmation::Authorization(a) => a.request_id,
            Confirmation::Signature(s) => s.request_id,
        }
    }

    /// Store key of the slot this confirmation occupies when presented.
    pub fn slot(&self) -> &'static str {
        match self {
            Confirmation::Authorization(_) => keys::PENDING_AUTH,
            Confirmation::Signature(_) => keys::PENDING_SIGNATURE,
        }
    }

    pub fn origin(&self) -> &str {
        match self {
            Confirmation::Authorization(a) => &a.origin,
            Confirmation::Signature(s) => &s.request.origin.origin,
        }
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        match self {
            Confirmation::Authorization(a) => a.created_at,
            Confirmation::Signature(s) => s.created_at,
        }
    }

    pub fn is_stale(&self, ttl: chrono::Duration, now: DateTime<Utc>) -> bool {
        now.signed_duration_since(self.created_at()) >= ttl
    }

    pub async fn persist(&self, store: &StoreHandle) -> Result<(), BridgeError> {
        match self {
            Confirmation::Authorization(a) => store.save(keys::PENDING_AUTH, a).await,
            Confirmation::Signature(s) => store.save(keys::PENDING_SIGNATURE, s).await,
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SlotOwner {
    request_id: RequestKey,
}

/// Clears `slot` only if it still holds the record for `key`, so a late
/// clear never erases the confirmation promoted after it.
pub async fn clear_slot_if(
    store: &StoreHandle,
    slot: &str,
    key: &RequestKey,
) -> Result<bool, BridgeError> {
    match store.load_or_discard::<SlotOwner>(slot).await? {
        Some(owner) if owner.request_id == *key => {
            store.remove(slot).await?;
            Ok(true)
        }
        _ => Ok(false),
    }
}

/// Outcome of offering a confirmation to the book.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Written to its slot; the UI should be activated.
    Presented,
    /// Waiting behind others, 1-based.
    Queued { position: usize },
    /// Backlog at capacity; the request must be refused.
    Full,
}

#[derive(Debug, Default)]
pub struct Completion {
    /// The confirmation that was removed, if the key was known.
    pub finished: Option<Confirmation>,
    /// The confirmation that took over the slot.
    pub promoted: Option<Confirmation>,
}

#[derive(Debug)]
pub struct ConfirmationBook {
    store: StoreHandle,
    active: Option<Confirmation>,
    backlog: VecDeque<Confirmation>,
    capacity: usize,
}

impl ConfirmationBook {
    pub fn new(store: StoreHandle, capacity: usize) -> Self {
        Self { store, active: None, backlog: VecDeque::new(), capacity }
    }

    pub async fn admit(&mut self, confirmation: Confirmation) -> Result<Admission, BridgeError> {
        if self.active.is_none() {
            confirmation.persist(&self.store).await?;
            self.active = Some(confirmation);
            return Ok(Admission::Presented);
        }
        if self.backlog.len() >= self.capacity {
            return Ok(Admission::Full);
        }
        self.backlog.push_back(confirmation);
        Ok(Admission::Queued { position: self.backlog.len() })
    }

    /// Removes the confirmation for `key` wherever it is. Completing the
    /// presented one promotes the next in line.
    pub async fn complete(&mut self, key: &RequestKey) -> Result<Completion, BridgeError> {
        if self.active.as_ref().map(Confirmation::key) == Some(*key) {
            let finished = self.active.take();
            if let Some(done) = &finished {
                clear_slot_if(&self.store, done.slot(), key).await?;
            }
            let promoted = self.promote().await?;
            return Ok(Completion { finished, promoted });
        }
        if let Some(position) = self.backlog.iter().position(|c| c.key() == *key) {
            debug!(key = %key, "queued confirmation withdrawn");
            return Ok(Completion { finished: self.backlog.remove(position), promoted: None });
        }
        Ok(Completion::default())
    }

    async fn promote(&mut self) -> Result<Option<Confirmation>, BridgeError> {
        if self.active.is_some() {
            return Ok(None);
        }
        let Some(next) = self.backlog.pop_front() else {
            return Ok(None);
        };
        if let Err(e) = next.persist(&self.store).await {
            self.backlog.push_front(next);
            return Err(e);
        }
        debug!(key = %next.key(), "confirmation promoted");
        self.active = Some(next.clone());
        Ok(Some(next))
    }

    pub fn active(&self) -> Option<&Confirmation> {
        self.active.as_ref()
    }

    pub fn queued(&self) -> usize {
        self.backlog.len()
    }
}
