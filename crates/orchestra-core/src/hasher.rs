//! Identity Hasher
//!
//! Turns a target identifier into an opaque [`TargetHandle`]. The handle is
//! the only form of a target allowed in logs and in outbound third-party
//! queries.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt::{self, Display, Formatter};

/// Length of a handle in hex characters
pub const HANDLE_LEN: usize = 16;

/// Opaque, fixed-length handle for a target
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TargetHandle(String);

impl TargetHandle {
    /// Hex representation
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for TargetHandle {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Deterministic one-way target hasher
///
/// SHA-256 over an optional deployment salt and the target, truncated to
/// [`HANDLE_LEN`] hex characters. Stable across restarts for a given salt.
#[derive(Clone, Default)]
pub struct IdentityHasher {
    salt: Vec<u8>,
}

impl IdentityHasher {
    /// Unsalted hasher
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Hasher with a deployment salt
    #[must_use]
    pub fn with_salt(salt: impl AsRef<[u8]>) -> Self {
        Self {
            salt: salt.as_ref().to_vec(),
        }
    }

    /// Hash a target
    #[must_use]
    pub fn hash(&self, target: &str) -> TargetHandle {
        let mut hasher = Sha256::new();
        if !self.salt.is_empty() {
            hasher.update(&self.salt);
            hasher.update([0]);
        }
        hasher.update(target.as_bytes());
        let digest = hasher.finalize();
        TargetHandle(hex::encode(&digest[..HANDLE_LEN / 2]))
    }
}

impl fmt::Debug for IdentityHasher {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdentityHasher")
            .field("salted", &!self.salt.is_empty())
            .finish()
    }
}

/// Hash a target with the unsalted hasher
#[inline]
#[must_use]
pub fn hash(target: &str) -> TargetHandle {
    IdentityHasher::new().hash(target)
}
