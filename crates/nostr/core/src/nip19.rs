//! NIP-19: bech32-encoded public keys.
//!
//! Only the `npub` entity is needed here: recipients may register with either
//! an `npub1...` string or the raw hex key.

use bech32::{Bech32, Hrp};
use thiserror::Error;

/// Human-readable part for npub (public key)
pub const NPUB_HRP: &str = "npub";

#[derive(Debug, Error)]
pub enum Nip19Error {
    #[error("bech32 encoding error: {0}")]
    Bech32Encode(String),

    #[error("bech32 decoding error: {0}")]
    Bech32Decode(String),

    #[error("invalid hrp: expected {expected}, got {got}")]
    InvalidHrp { expected: String, got: String },

    #[error("invalid key length: expected 32 bytes, got {0}")]
    InvalidLength(usize),
}

/// Encode a 32-byte x-only public key as `npub1...`.
pub fn public_key_to_npub(public_key: &[u8; 32]) -> Result<String, Nip19Error> {
    let hrp = Hrp::parse(NPUB_HRP).map_err(|e| Nip19Error::Bech32Encode(e.to_string()))?;
    bech32::encode::<Bech32>(hrp, public_key).map_err(|e| Nip19Error::Bech32Encode(e.to_string()))
}

/// Decode an `npub1...` string to the 32-byte public key.
pub fn npub_to_public_key(npub: &str) -> Result<[u8; 32], Nip19Error> {
    let (hrp, data) = bech32::decode(npub).map_err(|e| Nip19Error::Bech32Decode(e.to_string()))?;

    if hrp.as_str() != NPUB_HRP {
        return Err(Nip19Error::InvalidHrp {
            expected: NPUB_HRP.to_string(),
            got: hrp.to_string(),
        });
    }

    data.as_slice()
        .try_into()
        .map_err(|_| Nip19Error::InvalidLength(data.len()))
}
