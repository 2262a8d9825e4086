//! SHA-256 digests of replica state.
//!
//! Two nodes have converged when their state digests are equal. The digest
//! is computed over a canonical byte encoding (keys and members in sorted
//! order), so equal states always hash equally.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// A 32-byte SHA-256 digest.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StateDigest([u8; 32]);

impl StateDigest {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        StateDigest(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{:02x}", b)).collect()
    }

    /// First 8 hex characters, for logs.
    pub fn short(&self) -> String {
        self.to_hex()[..8].to_string()
    }
}

impl fmt::Debug for StateDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StateDigest({}...)", self.short())
    }
}

impl fmt::Display for StateDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// Incremental digest builder with length-prefixed fields.
pub(crate) struct DigestWriter {
    inner: Sha256,
}

impl DigestWriter {
    pub(crate) fn new() -> Self {
        DigestWriter {
            inner: Sha256::new(),
        }
    }

    /// Single tag byte separating field kinds.
    pub(crate) fn tag(&mut self, tag: u8) {
        self.inner.update([tag]);
    }

    pub(crate) fn bytes(&mut self, data: &[u8]) {
        self.inner.update((data.len() as u64).to_be_bytes());
        self.inner.update(data);
    }

    pub(crate) fn str(&mut self, s: &str) {
        self.bytes(s.as_bytes());
    }

    pub(crate) fn i64(&mut self, v: i64) {
        self.inner.update(v.to_be_bytes());
    }

    pub(crate) fn finish(self) -> StateDigest {
        let result = self.inner.finalize();
        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(&result);
        StateDigest(bytes)
    }
}
