//! Recipient public keys.

use crate::error::{BridgeError, Result};
use nostr::{npub_to_public_key, public_key_to_npub};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A recipient's x-only public key, stored as 64 lowercase hex characters.
///
/// Parsed from either an `npub1...` string or hex.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RecipientKey(String);

impl RecipientKey {
    pub fn parse(input: &str) -> Result<Self> {
        let input = input.trim();

        if input.starts_with("npub1") {
            let bytes = npub_to_public_key(input)
                .map_err(|e| BridgeError::InvalidRecipientKey(format!("{}: {}", input, e)))?;
            return Ok(Self(hex::encode(bytes)));
        }

        if input.len() == 64 && input.chars().all(|c| c.is_ascii_hexdigit()) {
            return Ok(Self(input.to_ascii_lowercase()));
        }

        Err(BridgeError::InvalidRecipientKey(format!(
            "expected npub or 64 hex characters, got {:?}",
            input
        )))
    }

    pub fn as_hex(&self) -> &str {
        &self.0
    }

    pub fn to_npub(&self) -> Result<String> {
        let mut bytes = [0u8; 32];
        hex::decode_to_slice(&self.0, &mut bytes)
            .map_err(|e| BridgeError::InvalidRecipientKey(e.to_string()))?;
        public_key_to_npub(&bytes).map_err(|e| BridgeError::InvalidRecipientKey(e.to_string()))
    }

    /// Short prefix for log lines.
    pub fn short(&self) -> &str {
        &self.0[..12]
    }
}

impl FromStr for RecipientKey {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for RecipientKey {
    type Error = BridgeError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<RecipientKey> for String {
    fn from(key: RecipientKey) -> Self {
        key.0
    }
}

impl fmt::Display for RecipientKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
