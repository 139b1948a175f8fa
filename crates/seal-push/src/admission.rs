//! Event admission pipeline.
//!
//! Every inbound event passes these steps in order, stopping at the first
//! failure:
//! 1. signature and id verification
//! 2. ledger lookup for (event id, recipient)
//! 3. proof-of-work gate
//! 4. ledger commit
//!
//! Only an event that survives all four reaches a handler. The commit happens
//! before dispatch, so a copy of the same event arriving from another relay
//! while the handler runs is rejected at step 2 or step 4.

use crate::ledger::DedupLedger;
use crate::recipient::RecipientKey;
use nostr::{Event, event_difficulty, verify_event};
use nostr_client::RelayUrl;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

/// Proof-of-work thresholds, in leading zero bits of the event id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PowPolicy {
    /// Events below this are dropped as spam.
    pub minimum: u32,
    /// Events at or above this are exempt from delivery throttling.
    pub trusted: u32,
}

impl Default for PowPolicy {
    fn default() -> Self {
        Self {
            minimum: 8,
            trusted: 16,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowClass {
    Insufficient,
    Admitted,
    Trusted,
}

impl PowPolicy {
    pub fn classify(&self, difficulty: u32) -> PowClass {
        if difficulty < self.minimum {
            PowClass::Insufficient
        } else if difficulty >= self.trusted {
            PowClass::Trusted
        } else {
            PowClass::Admitted
        }
    }
}

/// An event that passed admission for one recipient.
#[derive(Debug, Clone)]
pub struct AdmittedEvent {
    pub recipient: RecipientKey,
    pub relay: RelayUrl,
    pub event: Event,
    pub difficulty: u32,
    pub trusted: bool,
}

/// Why an event was not admitted.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Rejection {
    #[error("invalid id or signature")]
    InvalidSignature,

    #[error("already admitted")]
    Duplicate,

    #[error("proof of work {difficulty} below minimum {minimum}")]
    InsufficientWork { difficulty: u32, minimum: u32 },

    #[error("ledger unavailable: {0}")]
    Ledger(String),
}

impl Rejection {
    /// Short label for logs and counters.
    pub fn reason(&self) -> &'static str {
        match self {
            Rejection::InvalidSignature => "invalid_signature",
            Rejection::Duplicate => "duplicate",
            Rejection::InsufficientWork { .. } => "insufficient_work",
            Rejection::Ledger(_) => "ledger",
        }
    }
}

pub struct AdmissionPipeline {
    ledger: Arc<dyn DedupLedger>,
    policy: PowPolicy,
}

impl AdmissionPipeline {
    pub fn new(ledger: Arc<dyn DedupLedger>, policy: PowPolicy) -> Self {
        Self { ledger, policy }
    }

    pub fn policy(&self) -> PowPolicy {
        self.policy
    }

    /// Run `event` through the pipeline for `recipient`.
    ///
    /// A ledger failure rejects the event rather than risk a second delivery.
    pub async fn admit(
        &self,
        event: Event,
        recipient: &RecipientKey,
        relay: &RelayUrl,
    ) -> Result<AdmittedEvent, Rejection> {
        if !matches!(verify_event(&event), Ok(true)) {
            return Err(Rejection::InvalidSignature);
        }

        let seen = self
            .ledger
            .is_admitted(&event.id, recipient)
            .await
            .map_err(|e| Rejection::Ledger(e.to_string()))?;
        if seen {
            return Err(Rejection::Duplicate);
        }

        let difficulty = event_difficulty(&event);
        let class = self.policy.classify(difficulty);
        if class == PowClass::Insufficient {
            return Err(Rejection::InsufficientWork {
                difficulty,
                minimum: self.policy.minimum,
            });
        }

        let newly_marked = self
            .ledger
            .mark_admitted(&event.id, recipient)
            .await
            .map_err(|e| Rejection::Ledger(e.to_string()))?;
        if !newly_marked {
            return Err(Rejection::Duplicate);
        }

        Ok(AdmittedEvent {
            recipient: recipient.clone(),
            relay: relay.clone(),
            event,
            difficulty,
            trusted: class == PowClass::Trusted,
        })
    }
}
