//! 32-byte identifiers.
//!
//! Requests, slots, proof schedules and vault contexts are all named by
//! 32-byte digests. Each gets its own newtype so they cannot be mixed up.

use std::fmt;
use std::str::FromStr;

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

use crate::CoreError;

macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
        pub struct $name([u8; 32]);

        impl $name {
            /// Creates the identifier from raw bytes.
            #[must_use]
            pub const fn new(bytes: [u8; 32]) -> Self {
                Self(bytes)
            }

            /// Returns the raw bytes.
            #[must_use]
            pub const fn as_bytes(&self) -> &[u8; 32] {
                &self.0
            }

            /// Returns the lowercase hex encoding.
            #[must_use]
            pub fn to_hex(&self) -> String {
                hex::encode(self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.to_hex())
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), &self.to_hex()[..16])
            }
        }

        impl FromStr for $name {
            type Err = CoreError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let bytes = hex::decode(s.trim_start_matches("0x"))
                    .map_err(|e| CoreError::InvalidId(format!("invalid hex: {e}")))?;
                let array: [u8; 32] = bytes.as_slice().try_into().map_err(|_| {
                    CoreError::InvalidId(format!("identifier must be 32 bytes, got {}", bytes.len()))
                })?;
                Ok(Self(array))
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(&self.to_hex())
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let s = String::deserialize(deserializer)?;
                s.parse().map_err(de::Error::custom)
            }
        }
    };
}

define_id!(
    /// Identifies a storage request (hash of all request fields).
    RequestId
);

define_id!(
    /// Identifies one slot of a request (hash of request id and index).
    SlotId
);

define_id!(
    /// Identifies a proof schedule.
    ProofId
);

define_id!(
    /// Names an isolated group of balances inside the vault.
    Context
);

impl SlotId {
    /// Derives the id of slot `index` of `request`.
    #[must_use]
    pub fn derive(request: &RequestId, index: u64) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(b"stow/slot/");
        hasher.update(request.as_bytes());
        hasher.update(&index.to_be_bytes());
        Self(*hasher.finalize().as_bytes())
    }
}

impl Context {
    /// Derives a context from a domain label and data.
    #[must_use]
    pub fn derive(domain: &str, data: &[u8]) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(b"stow/context/");
        hasher.update(domain.as_bytes());
        hasher.update(&[0]);
        hasher.update(data);
        Self(*hasher.finalize().as_bytes())
    }
}

impl From<SlotId> for ProofId {
    fn from(id: SlotId) -> Self {
        Self(id.0)
    }
}

impl From<RequestId> for Context {
    fn from(id: RequestId) -> Self {
        Self(id.0)
    }
}
