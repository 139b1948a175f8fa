//! Nostr event primitives for the push bridge.
//!
//! This crate provides:
//! - NIP-01: Event structure, canonical serialization, signing and verification
//! - NIP-13: Proof of Work scoring and mining
//! - NIP-19: bech32 `npub` encoding (requires `full` feature)
//! - NIP-59: Gift Wrap kinds and recipient lookup
//!
//! # Features
//!
//! - `full` (default): Full crypto support including key generation and signing
//! - `minimal`: Just Event type and serialization

mod nip01;
mod nip13;
#[cfg(feature = "full")]
mod nip19;
mod nip59;

// NIP-01: Basic protocol (Event type always available)
pub use nip01::{
    Event, EventTemplate, Nip01Error, UnsignedEvent, serialize_event, validate_event,
    validate_unsigned_event,
};

// NIP-01: Crypto functions (require full feature)
#[cfg(feature = "full")]
pub use nip01::{
    finalize_event, generate_secret_key, get_event_hash, get_public_key, get_public_key_hex,
    verify_event,
};

// NIP-13: Proof of Work
pub use nip13::{
    NONCE_TAG, Nip13Error, committed_difficulty, count_leading_zero_bits, event_difficulty,
};
#[cfg(feature = "full")]
pub use nip13::mine_event;

// NIP-19: bech32-encoded public keys
#[cfg(feature = "full")]
pub use nip19::{NPUB_HRP, Nip19Error, npub_to_public_key, public_key_to_npub};

// NIP-59: Gift Wrap
pub use nip59::{KIND_GIFT_WRAP, KIND_SEAL, gift_wrap_recipient, is_gift_wrap};
