//! Cache keys for explanation artifacts.

use fundus_abstraction::{ExplanationOptions, ImageAsset};
use serde::Serialize;
use std::fmt;

/// Cache key identifying an image+options pair.
///
/// Derived deterministically from `(name, byte_length, last_modified_ms,
/// options)`. The image content itself does not participate: two assets with
/// identical derived fields are the same logical image even if their bytes
/// differ. This weak identity is the documented contract, not an oversight;
/// strengthening it to a content hash would change which requests hit the
/// cache.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Fingerprint {
    name: String,
    byte_length: u64,
    last_modified_ms: i64,
    /// Canonical JSON encoding of the explanation options.
    options_key: String,
}

impl Fingerprint {
    /// Derives the fingerprint for an image and its explanation options.
    ///
    /// Pure: equal inputs always yield equal fingerprints, and changing any
    /// one of the four identity fields changes the fingerprint.
    #[must_use]
    pub fn derive(image: &ImageAsset, options: &ExplanationOptions) -> Self {
        let options_key =
            serde_json::to_string(options).expect("explanation options serialize infallibly");
        Self {
            name: image.name().to_string(),
            byte_length: image.byte_length(),
            last_modified_ms: image.last_modified_ms(),
            options_key,
        }
    }

    /// The source-reported file name component.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// SHA-256 digest of the composed identity fields, hex-encoded. For
    /// logging and stats; equality and hashing use the fields directly.
    #[must_use]
    pub fn digest(&self) -> String {
        use sha2::{Digest, Sha256};

        let mut hasher = Sha256::new();
        hasher.update(self.name.as_bytes());
        hasher.update(self.byte_length.to_le_bytes());
        hasher.update(self.last_modified_ms.to_le_bytes());
        hasher.update(self.options_key.as_bytes());
        format!("{:x}", hasher.finalize())
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.name, &self.digest()[..12])
    }
}
