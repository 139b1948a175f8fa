//! NIP-13: Proof of Work.
//!
//! Difficulty is the number of leading zero bits of the event id. A sender may
//! commit to a target through a `["nonce", "<counter>", "<target>"]` tag.

use crate::nip01::Event;
#[cfg(feature = "full")]
use crate::nip01::{EventTemplate, Nip01Error, UnsignedEvent, finalize_event, get_event_hash};
use thiserror::Error;

/// Tag name carrying the mining counter and committed target.
pub const NONCE_TAG: &str = "nonce";

#[derive(Debug, Error)]
pub enum Nip13Error {
    #[cfg(feature = "full")]
    #[error(transparent)]
    Event(#[from] Nip01Error),

    #[error("nonce space exhausted before reaching difficulty {target}")]
    Exhausted { target: u32 },
}

/// Count the leading zero bits of a hex string.
///
/// Each leading `0` digit contributes four bits. The first non-zero digit
/// contributes the leading zeros of its nibble and ends the count. A character
/// that is not a hex digit also ends the count.
///
/// ```
/// use nostr::count_leading_zero_bits;
///
/// assert_eq!(count_leading_zero_bits("03ff"), 6);
/// assert_eq!(count_leading_zero_bits("0000f0"), 16);
/// ```
pub fn count_leading_zero_bits(hex: &str) -> u32 {
    let mut bits = 0;
    for c in hex.chars() {
        let Some(nibble) = c.to_digit(16) else {
            break;
        };
        if nibble == 0 {
            bits += 4;
            continue;
        }
        // nibble is in 1..=15, so the u32 has at least 28 leading zeros
        bits += nibble.leading_zeros() - 28;
        break;
    }
    bits
}

/// Proof-of-work difficulty of an event, computed from its id.
pub fn event_difficulty(event: &Event) -> u32 {
    count_leading_zero_bits(&event.id)
}

/// Target difficulty the author committed to in a nonce tag, if any.
pub fn committed_difficulty(event: &Event) -> Option<u32> {
    event
        .tags
        .iter()
        .find(|tag| tag.first().map(String::as_str) == Some(NONCE_TAG))
        .and_then(|tag| tag.get(2))
        .and_then(|target| target.parse().ok())
}

/// Mine a nonce tag until the event id reaches `target` leading zero bits,
/// then sign the winning event.
///
/// Any nonce tag already on the template is replaced. Only the hash is
/// recomputed per attempt; the signature is produced once.
#[cfg(feature = "full")]
pub fn mine_event(
    template: &EventTemplate,
    secret_key: &[u8; 32],
    target: u32,
) -> Result<Event, Nip13Error> {
    let pubkey = crate::nip01::get_public_key_hex(secret_key)?;

    let mut tags: Vec<Vec<String>> = template
        .tags
        .iter()
        .filter(|tag| tag.first().map(String::as_str) != Some(NONCE_TAG))
        .cloned()
        .collect();
    tags.push(vec![
        NONCE_TAG.to_string(),
        "0".to_string(),
        target.to_string(),
    ]);
    let nonce_index = tags.len() - 1;

    let mut candidate = UnsignedEvent {
        pubkey,
        created_at: template.created_at,
        kind: template.kind,
        tags,
        content: template.content.clone(),
    };

    for nonce in 0..u64::MAX {
        candidate.tags[nonce_index][1] = nonce.to_string();
        let id = get_event_hash(&candidate)?;
        if count_leading_zero_bits(&id) >= target {
            let winner = EventTemplate {
                created_at: candidate.created_at,
                kind: candidate.kind,
                tags: candidate.tags,
                content: candidate.content,
            };
            return Ok(finalize_event(&winner, secret_key)?);
        }
    }

    Err(Nip13Error::Exhausted { target })
}
