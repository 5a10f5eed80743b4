use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// Length in bytes of a [`BlobId`].
pub const BLOB_ID_LEN: usize = 16;

/// Identifier of an immutable blob in the blob store.
///
/// Unlike a content hash, a `BlobId` is generated fresh for every stored
/// state (time-ordered random bytes), so two snapshots with identical
/// content still occupy distinct blobs. Ordering is unsigned lexicographic
/// over the raw bytes and is used to break timestamp ties between states.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BlobId([u8; BLOB_ID_LEN]);

impl BlobId {
    /// Generate a new, unique identifier.
    pub fn generate() -> Self {
        Self(uuid::Uuid::now_v7().into_bytes())
    }

    /// Create a `BlobId` from raw bytes.
    pub const fn from_bytes(bytes: [u8; BLOB_ID_LEN]) -> Self {
        Self(bytes)
    }

    /// The raw 16 bytes.
    pub fn as_bytes(&self) -> &[u8; BLOB_ID_LEN] {
        &self.0
    }

    /// Hex-encoded string representation (32 characters).
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Short hex representation (first 8 characters).
    pub fn short_hex(&self) -> String {
        hex::encode(&self.0[..4])
    }

    /// Parse from a 32-character hex string.
    pub fn from_hex(s: &str) -> Result<Self, TypeError> {
        let bytes = hex::decode(s).map_err(|e| TypeError::InvalidHex(e.to_string()))?;
        if bytes.len() != BLOB_ID_LEN {
            return Err(TypeError::InvalidLength {
                expected: BLOB_ID_LEN,
                actual: bytes.len(),
            });
        }
        let mut arr = [0u8; BLOB_ID_LEN];
        arr.copy_from_slice(&bytes);
        Ok(Self(arr))
    }
}

impl fmt::Debug for BlobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlobId({})", self.short_hex())
    }
}

impl fmt::Display for BlobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl From<[u8; BLOB_ID_LEN]> for BlobId {
    fn from(bytes: [u8; BLOB_ID_LEN]) -> Self {
        Self(bytes)
    }
}

impl From<BlobId> for [u8; BLOB_ID_LEN] {
    fn from(id: BlobId) -> Self {
        id.0
    }
}
