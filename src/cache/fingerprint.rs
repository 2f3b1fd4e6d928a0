//! Content fingerprints shared by the result cache and the in-flight coordinator.

use sha2::{Digest, Sha256};
use std::fmt;

/// Hex SHA-256 of a normalized document.
///
/// Documents that differ only in surrounding whitespace or letter case map to
/// the same fingerprint on purpose.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Fingerprint a document: trim, lower-case, hash the UTF-8 bytes.
    pub fn of(document: &str) -> Self {
        let normalized = document.trim().to_lowercase();
        let digest = Sha256::digest(normalized.as_bytes());
        Self(digest.iter().map(|b| format!("{b:02x}")).collect())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 8 hex chars, for log lines.
    pub fn short(&self) -> &str {
        &self.0[..8.min(self.0.len())]
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Shorthand for [`Fingerprint::of`].
pub fn fingerprint(document: &str) -> Fingerprint {
    Fingerprint::of(document)
}
