//! Content-addressed digests for build inputs and stages

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest as _, Sha256};
use std::fmt;

const SHA256: &str = "sha256";

/// Represents a content-addressable digest (e.g., "sha256:abc123...")
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Digest {
    algorithm: String,
    hash: String,
}

impl Digest {
    /// Parse a digest string in format "algorithm:hash"
    pub fn parse(digest: &str) -> Result<Self> {
        let (algorithm, hash) = digest.split_once(':').with_context(|| {
            format!(
                "Invalid digest format (expected 'algorithm:hash'): {}",
                digest
            )
        })?;

        if algorithm.is_empty() || hash.is_empty() {
            anyhow::bail!("Invalid digest format (empty component): {}", digest);
        }

        Ok(Self {
            algorithm: algorithm.to_string(),
            hash: hash.to_string(),
        })
    }

    /// SHA-256 digest of a byte slice
    pub fn of_bytes(bytes: &[u8]) -> Self {
        Self {
            algorithm: SHA256.to_string(),
            hash: hex::encode(Sha256::digest(bytes)),
        }
    }

    pub fn algorithm(&self) -> &str {
        &self.algorithm
    }

    pub fn hash(&self) -> &str {
        &self.hash
    }

    /// First 12 hex characters, the way image ids are usually shown
    pub fn short(&self) -> &str {
        let end = self.hash.len().min(12);
        &self.hash[..end]
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.algorithm, self.hash)
    }
}

impl TryFrom<String> for Digest {
    type Error = anyhow::Error;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<Digest> for String {
    fn from(digest: Digest) -> Self {
        digest.to_string()
    }
}

/// Incremental SHA-256 over length-prefixed fields.
///
/// Every field is framed with its length so that `("ab", "c")` and
/// `("a", "bc")` never collide.
pub struct DigestBuilder {
    hasher: Sha256,
}

impl DigestBuilder {
    pub fn new(domain: &str) -> Self {
        let mut builder = Self {
            hasher: Sha256::new(),
        };
        builder.field(domain.as_bytes());
        builder
    }

    pub fn field(&mut self, bytes: &[u8]) -> &mut Self {
        self.hasher.update((bytes.len() as u64).to_be_bytes());
        self.hasher.update(bytes);
        self
    }

    pub fn str(&mut self, value: &str) -> &mut Self {
        self.field(value.as_bytes())
    }

    pub fn digest(&mut self, digest: &Digest) -> &mut Self {
        self.str(&digest.to_string())
    }

    pub fn finish(self) -> Digest {
        Digest {
            algorithm: SHA256.to_string(),
            hash: hex::encode(self.hasher.finalize()),
        }
    }
}
