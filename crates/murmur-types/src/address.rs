use std::fmt;
use std::str::FromStr;

use curve25519_dalek::edwards::CompressedEdwardsY;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Shortest and longest base58 rendering of a 32-byte public key.
pub const MIN_ADDRESS_LEN: usize = 32;
pub const MAX_ADDRESS_LEN: usize = 44;

const BASE58_ALPHABET: &str = "123456789ABCDEFGHJKLMNPQRSTUVWXYZabcdefghijkmnopqrstuvwxyz";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AddressError {
    #[error("address is empty")]
    Empty,

    #[error("address contains non-base58 character {0:?}")]
    InvalidAlphabet(char),

    #[error("address must be {MIN_ADDRESS_LEN}-{MAX_ADDRESS_LEN} characters, got {0}")]
    InvalidLength(usize),

    #[error("address does not decode to a 32-byte key")]
    InvalidKeyLength,

    #[error("address is not a point on the curve")]
    OffCurve,

    #[error("address is a low-order point and cannot receive messages")]
    SmallOrder,
}

/// Public identity of a wallet: a base58-encoded Ed25519 public key.
///
/// Only constructed through [`Address::parse`], so holding one means the
/// string passed alphabet, length and curve validation. Low-order points
/// are refused since no shared secret can be agreed with them.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Address {
    encoded: String,
    key: [u8; 32],
}

impl Address {
    pub fn parse(input: &str) -> Result<Self, AddressError> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(AddressError::Empty);
        }

        if let Some(bad) = trimmed.chars().find(|c| !BASE58_ALPHABET.contains(*c)) {
            return Err(AddressError::InvalidAlphabet(bad));
        }

        let len = trimmed.chars().count();
        if !(MIN_ADDRESS_LEN..=MAX_ADDRESS_LEN).contains(&len) {
            return Err(AddressError::InvalidLength(len));
        }

        let bytes = bs58::decode(trimmed)
            .into_vec()
            .map_err(|_| AddressError::InvalidKeyLength)?;
        let key: [u8; 32] = bytes
            .try_into()
            .map_err(|_| AddressError::InvalidKeyLength)?;

        let point = CompressedEdwardsY(key)
            .decompress()
            .ok_or(AddressError::OffCurve)?;
        if point.is_small_order() {
            return Err(AddressError::SmallOrder);
        }

        Ok(Self {
            encoded: trimmed.to_string(),
            key,
        })
    }

    /// Build an address from raw public key bytes.
    pub fn from_public_key(key: [u8; 32]) -> Result<Self, AddressError> {
        Self::parse(&bs58::encode(key).into_string())
    }

    pub fn as_str(&self) -> &str {
        &self.encoded
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.key
    }

    /// "first 4…last 4" label used when nothing better is known.
    pub fn short(&self) -> String {
        let chars: Vec<char> = self.encoded.chars().collect();
        let head: String = chars[..4].iter().collect();
        let tail: String = chars[chars.len() - 4..].iter().collect();
        format!("{}…{}", head, tail)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encoded)
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({})", self.encoded)
    }
}

impl FromStr for Address {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Address {
    type Error = AddressError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Address> for String {
    fn from(address: Address) -> Self {
        address.encoded
    }
}
