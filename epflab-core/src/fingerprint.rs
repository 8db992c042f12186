//! Run fingerprinting: deterministic identification of configurations and datasets.
//!
//! - `ContentHash`: BLAKE3 over a canonical JSON rendering of any serializable value.
//! - `RunId`: configuration hash + dataset hash, identifying one backtest run.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentHash(pub String);

impl ContentHash {
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self(blake3::hash(bytes).to_hex().to_string())
    }

    /// Hash of `value`'s JSON form. Use `BTreeMap` for map fields so key
    /// order is canonical.
    pub fn of<T: Serialize>(value: &T) -> Result<Self, serde_json::Error> {
        let json = serde_json::to_vec(value)?;
        Ok(Self::from_bytes(&json))
    }

    /// First 12 hex characters, for log lines and file names.
    pub fn short(&self) -> &str {
        self.0.get(..12).unwrap_or(&self.0)
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identity of one run: what was configured and what data it saw.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunId {
    pub config_hash: ContentHash,
    pub dataset_hash: ContentHash,
}

impl RunId {
    pub fn new(config_hash: ContentHash, dataset_hash: ContentHash) -> Self {
        Self {
            config_hash,
            dataset_hash,
        }
    }

    /// Combined BLAKE3 digest of both halves.
    pub fn hash(&self) -> String {
        let mut hasher = blake3::Hasher::new();
        hasher.update(self.config_hash.0.as_bytes());
        hasher.update(b":");
        hasher.update(self.dataset_hash.0.as_bytes());
        hasher.finalize().to_hex().to_string()
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.config_hash.short(), self.dataset_hash.short())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn content_hash_is_deterministic() {
        let mut params = BTreeMap::new();
        params.insert("lambda", 0.5);
        params.insert("alpha", 1.0);
        assert_eq!(ContentHash::of(&params).unwrap(), ContentHash::of(&params.clone()).unwrap());
    }

    #[test]
    fn run_id_changes_with_dataset() {
        let config = ContentHash::from_bytes(b"config");
        let a = RunId::new(config.clone(), ContentHash::from_bytes(b"data-a"));
        let b = RunId::new(config, ContentHash::from_bytes(b"data-b"));
        assert_ne!(a.hash(), b.hash());
    }

    #[test]
    fn short_hash_is_a_prefix() {
        let h = ContentHash::from_bytes(b"x");
        assert_eq!(h.short().len(), 12);
        assert!(h.0.starts_with(h.short()));
    }
}
