//! Account addresses.
//!
//! An [`Address`] is 32 bytes, rendered as base58. Besides externally owned
//! accounts, the ledger derives keyless addresses (per-slot escrow accounts,
//! slashing accounts) with [`Address::derive`]; nobody can act as those
//! addresses, so funds held under them can only be moved by their controller.

use std::fmt;
use std::str::FromStr;

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

use crate::CoreError;

/// A 32-byte account address.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Address([u8; 32]);

impl Address {
    /// Length of an address in bytes.
    pub const LEN: usize = 32;

    /// The all-zero address.
    pub const ZERO: Self = Self([0u8; 32]);

    /// Irrecoverable sink that burned funds are sent to.
    pub const BURN: Self = {
        let mut bytes = [0u8; 32];
        bytes[30] = 0xde;
        bytes[31] = 0xad;
        Self(bytes)
    };

    /// Creates an address from raw bytes.
    #[must_use]
    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Creates an address from a byte slice.
    ///
    /// # Errors
    ///
    /// Returns error if the slice is not 32 bytes.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, CoreError> {
        let array: [u8; 32] = bytes.try_into().map_err(|_| {
            CoreError::InvalidAddress(format!("address must be 32 bytes, got {}", bytes.len()))
        })?;
        Ok(Self(array))
    }

    /// Decodes a base58 address.
    ///
    /// # Errors
    ///
    /// Returns error if the string is not valid base58 or has the wrong length.
    pub fn from_base58(s: &str) -> Result<Self, CoreError> {
        let bytes = bs58::decode(s)
            .into_vec()
            .map_err(|e| CoreError::InvalidAddress(format!("invalid base58: {e}")))?;
        Self::from_slice(&bytes)
    }

    /// Derives a keyless address from a domain label and data.
    #[must_use]
    pub fn derive(domain: &str, data: &[u8]) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(b"stow/address/");
        hasher.update(domain.as_bytes());
        hasher.update(&[0]);
        hasher.update(data);
        Self(*hasher.finalize().as_bytes())
    }

    /// Returns the raw bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Returns the base58 encoding.
    #[must_use]
    pub fn to_base58(&self) -> String {
        bs58::encode(self.0).into_string()
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_base58())
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({})", self.to_base58())
    }
}

impl FromStr for Address {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_base58(s)
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_base58())
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base58_roundtrip() {
        let address = Address::new([7u8; 32]);
        let encoded = address.to_base58();
        assert_eq!(Address::from_base58(&encoded), Ok(address));
    }

    #[test]
    fn rejects_wrong_length() {
        let short = bs58::encode([1u8; 20]).into_string();
        assert!(matches!(
            Address::from_base58(&short),
            Err(CoreError::InvalidAddress(_))
        ));
        assert!(Address::from_base58("0OIl").is_err());
    }

    #[test]
    fn derived_addresses_are_domain_separated() {
        let a = Address::derive("slot-escrow", b"data");
        let b = Address::derive("slot-collateral", b"data");
        let c = Address::derive("slot-escrow", b"other");
        assert_ne!(a, b);
        assert_ne!(a, c);
        assert_eq!(a, Address::derive("slot-escrow", b"data"));
    }

    #[test]
    fn burn_sink_ends_in_dead() {
        assert_eq!(&Address::BURN.as_bytes()[30..], &[0xde, 0xad]);
        assert!(Address::BURN.as_bytes()[..30].iter().all(|b| *b == 0));
    }

    #[test]
    fn serializes_as_base58_string() {
        let address = Address::new([9u8; 32]);
        let json = serde_json::to_string(&address).expect("serialize");
        assert_eq!(json, format!("\"{}\"", address.to_base58()));
        let restored: Address = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(restored, address);
    }
}
